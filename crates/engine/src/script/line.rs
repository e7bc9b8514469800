//! Built-in line-oriented interpreter.
//!
//! Each non-blank line is one statement:
//!
//! * `name = <expression>` and the augmented forms `+=`, `-=`, `*=`, `/=`, `%=`
//! * `import a, b as c` / `from a import b` (binds opaque module objects)
//! * `print(<expression>, ...)`
//! * `pass`, comments starting with `#`, or a bare expression
//!
//! Expressions use the same language as declared bindings. Assigning a
//! built-in function by name or calling `now()` produces an opaque value.

use indexmap::IndexMap;
use stepwise_types::Value;
use tracing::debug;

use super::{ScriptBinding, ScriptError, ScriptInterpreter};
use crate::expression::lexer::{Token, tokenize};
use crate::expression::parser::{BinaryOp, parse_tokens};
use crate::expression::{Expr, ExpressionError, Scope, evaluate_parsed, render};

const BUILTIN_FUNCTIONS: &[&str] = &[
    "str",
    "int",
    "float",
    "bool",
    "len",
    "lower",
    "upper",
    "get",
    "get_sp",
    "check_empty",
    "now",
];

#[derive(Debug, Clone, Default)]
pub struct LineScriptInterpreter;

impl LineScriptInterpreter {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone)]
enum Statement {
    Import { names: Vec<String> },
    Print { args: Vec<Expr> },
    Assign { target: String, value: Expr },
    Evaluate { expression: Expr },
}

impl Statement {
    fn reads(&self) -> Vec<String> {
        match self {
            Statement::Import { .. } => Vec::new(),
            Statement::Print { args } => args.iter().flat_map(Expr::free_variables).collect(),
            Statement::Assign { value, .. } => value.free_variables(),
            Statement::Evaluate { expression } => expression.free_variables(),
        }
    }
}

impl ScriptInterpreter for LineScriptInterpreter {
    fn required_bindings(&self, script: &str) -> Result<Vec<String>, ScriptError> {
        let mut assigned: Vec<String> = Vec::new();
        let mut required: Vec<String> = Vec::new();

        for (_, statement) in parse_script(script)? {
            for name in statement.reads() {
                let known = assigned.contains(&name) || required.contains(&name) || BUILTIN_FUNCTIONS.contains(&name.as_str());
                if !known {
                    required.push(name);
                }
            }
            match statement {
                Statement::Import { names } => assigned.extend(names),
                Statement::Assign { target, .. } => assigned.push(target),
                Statement::Print { .. } | Statement::Evaluate { .. } => {}
            }
        }

        Ok(required)
    }

    fn execute(&self, script: &str, arguments: &IndexMap<String, Value>) -> Result<IndexMap<String, ScriptBinding>, ScriptError> {
        let statements = parse_script(script)?;
        let mut namespace = Namespace::seeded(arguments);

        for (line, statement) in statements {
            match statement {
                Statement::Import { names } => {
                    for name in names {
                        namespace.assign_opaque(name, "module", false);
                    }
                }
                Statement::Print { args } => {
                    let rendered = args
                        .iter()
                        .map(|arg| namespace.evaluate(arg, line).map(|value| render(value.content())))
                        .collect::<Result<Vec<_>, _>>()?;
                    debug!(line, output = %rendered.join(" "), "script print");
                }
                Statement::Assign { target, value } => namespace.assign(target, &value, line)?,
                Statement::Evaluate { expression } => {
                    namespace.evaluate(&expression, line)?;
                }
            }
        }

        Ok(namespace.bindings)
    }
}

struct Namespace {
    bindings: IndexMap<String, ScriptBinding>,
    values: IndexMap<String, Value>,
}

impl Namespace {
    fn seeded(arguments: &IndexMap<String, Value>) -> Self {
        Self {
            bindings: arguments
                .iter()
                .map(|(name, value)| (name.clone(), ScriptBinding::Serializable(value.clone())))
                .collect(),
            values: arguments.clone(),
        }
    }

    fn assign(&mut self, target: String, value: &Expr, line: usize) -> Result<(), ScriptError> {
        match value {
            Expr::Call { function, args } if function == "now" && args.is_empty() => {
                self.assign_opaque(target, "datetime", true);
            }
            Expr::Name { name } if !self.bindings.contains_key(name) && BUILTIN_FUNCTIONS.contains(&name.as_str()) => {
                self.assign_opaque(target, "builtin_function_or_method", false);
            }
            Expr::Name { name } if matches!(self.bindings.get(name), Some(ScriptBinding::Unserializable { .. })) => {
                if let Some(binding) = self.bindings.get(name).cloned() {
                    self.values.shift_remove(&target);
                    self.bindings.insert(target, binding);
                }
            }
            expression => {
                let evaluated = self.evaluate(expression, line)?;
                self.bindings.insert(target.clone(), ScriptBinding::Serializable(evaluated.clone()));
                self.values.insert(target, evaluated);
            }
        }
        Ok(())
    }

    fn assign_opaque(&mut self, target: String, type_name: &str, exportable: bool) {
        self.values.shift_remove(&target);
        self.bindings.insert(
            target,
            ScriptBinding::Unserializable {
                type_name: type_name.to_string(),
                exportable,
            },
        );
    }

    fn evaluate(&self, expression: &Expr, line: usize) -> Result<Value, ScriptError> {
        let scope = Scope::default().with_layer(&self.values);
        evaluate_parsed(expression, &scope).map_err(|source| {
            if let ExpressionError::UndefinedVariable { name } = &source
                && let Some(ScriptBinding::Unserializable { type_name, .. }) = self.bindings.get(name)
            {
                return ScriptError::Runtime {
                    line,
                    message: format!("'{name}' is a {type_name} object and cannot be used as a value"),
                };
            }
            ScriptError::Expression { line, source }
        })
    }
}

fn parse_script(script: &str) -> Result<Vec<(usize, Statement)>, ScriptError> {
    let mut statements = Vec::new();
    for (index, raw_line) in script.lines().enumerate() {
        let line = index + 1;
        let text = raw_line.trim();
        if text.is_empty() || text.starts_with('#') || text == "pass" {
            continue;
        }
        statements.push((line, parse_statement(text, line)?));
    }
    Ok(statements)
}

fn parse_statement(text: &str, line: usize) -> Result<Statement, ScriptError> {
    if let Some(rest) = text.strip_prefix("import ") {
        return Ok(Statement::Import {
            names: imported_names(rest),
        });
    }
    if let Some(rest) = text.strip_prefix("from ") {
        let Some((_, imported)) = rest.split_once(" import ") else {
            return Err(ScriptError::Runtime {
                line,
                message: format!("malformed import statement '{text}'"),
            });
        };
        return Ok(Statement::Import {
            names: imported_names(imported),
        });
    }

    let expression_error = |source| ScriptError::Expression { line, source };
    let tokens = tokenize(text).map_err(expression_error)?;

    match tokens.as_slice() {
        [Token::Name(target), Token::Assign, rest @ ..] => Ok(Statement::Assign {
            target: target.clone(),
            value: parse_tokens(rest, text).map_err(expression_error)?,
        }),
        [Token::Name(target), operator, Token::Assign, rest @ ..] => {
            let Some(op) = augmented_operator(operator) else {
                return Err(ScriptError::Runtime {
                    line,
                    message: format!("unsupported statement '{text}'"),
                });
            };
            Ok(Statement::Assign {
                target: target.clone(),
                value: Expr::Binary {
                    op,
                    left: Box::new(Expr::Name { name: target.clone() }),
                    right: Box::new(parse_tokens(rest, text).map_err(expression_error)?),
                },
            })
        }
        _ => match parse_tokens(&tokens, text).map_err(expression_error)? {
            Expr::Call { function, args } if function == "print" => Ok(Statement::Print { args }),
            expression => Ok(Statement::Evaluate { expression }),
        },
    }
}

fn augmented_operator(token: &Token) -> Option<BinaryOp> {
    match token {
        Token::Plus => Some(BinaryOp::Add),
        Token::Minus => Some(BinaryOp::Subtract),
        Token::Star => Some(BinaryOp::Multiply),
        Token::Slash => Some(BinaryOp::Divide),
        Token::Percent => Some(BinaryOp::Modulo),
        _ => None,
    }
}

/// Names bound by an import list: `a.b` binds `a`, `x as y` binds `y`.
fn imported_names(list: &str) -> Vec<String> {
    list.split(',')
        .filter_map(|item| {
            let item = item.trim();
            let bound = match item.split_once(" as ") {
                Some((_, alias)) => alias.trim(),
                None => item.split('.').next().unwrap_or(item),
            };
            (!bound.is_empty()).then(|| bound.to_string())
        })
        .collect()
}
