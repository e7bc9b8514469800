use std::cmp::Ordering;

use serde_json::{Map, Number, Value as JsonValue};

use super::parser::{BinaryOp, Expr, UnaryOp};
use super::{ExpressionError, Scope};

/// Longest string `str * int` may build, in bytes.
const MAX_REPEATED_LENGTH: usize = 16 * 1024 * 1024;

pub(super) struct Evaluator<'s, 'a> {
    scope: &'s Scope<'a>,
    read_sensitive: bool,
}

impl<'s, 'a> Evaluator<'s, 'a> {
    pub(super) fn new(scope: &'s Scope<'a>) -> Self {
        Self {
            scope,
            read_sensitive: false,
        }
    }

    pub(super) fn read_sensitive(&self) -> bool {
        self.read_sensitive
    }

    pub(super) fn evaluate(&mut self, expression: &Expr) -> Result<JsonValue, ExpressionError> {
        match expression {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Name { name } => {
                let value = self
                    .scope
                    .lookup(name)
                    .ok_or_else(|| ExpressionError::UndefinedVariable { name: name.clone() })?;
                self.read_sensitive |= value.is_sensitive();
                Ok(value.content().clone())
            }
            Expr::List { items } => items
                .iter()
                .map(|item| self.evaluate(item))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            Expr::Map { entries } => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = python_str(&self.evaluate(key)?);
                    let value = self.evaluate(value)?;
                    map.insert(key, value);
                }
                Ok(JsonValue::Object(map))
            }
            Expr::Unary { op, operand } => {
                let operand = self.evaluate(operand)?;
                match op {
                    UnaryOp::Not => Ok(JsonValue::Bool(!truthy(&operand))),
                    UnaryOp::Negate => negate(&operand),
                }
            }
            Expr::Binary { op: BinaryOp::And, left, right } => {
                let left = self.evaluate(left)?;
                if truthy(&left) { self.evaluate(right) } else { Ok(left) }
            }
            Expr::Binary { op: BinaryOp::Or, left, right } => {
                let left = self.evaluate(left)?;
                if truthy(&left) { Ok(left) } else { self.evaluate(right) }
            }
            Expr::Binary { op, left, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary(*op, &left, &right)
            }
            Expr::Call { function, args } => self.call(function, args),
            Expr::Index { target, index } => {
                let target = self.evaluate(target)?;
                let index = self.evaluate(index)?;
                subscript(&target, &index)
            }
        }
    }

    fn call(&mut self, function: &str, args: &[Expr]) -> Result<JsonValue, ExpressionError> {
        match function {
            "get" => {
                let name = self.string_argument(function, args, 0)?;
                match self.scope.lookup(&name) {
                    Some(value) if !value.is_empty() => {
                        self.read_sensitive |= value.is_sensitive();
                        Ok(value.content().clone())
                    }
                    _ => self.optional_argument(args, 1),
                }
            }
            "get_sp" => {
                let name = self.string_argument(function, args, 0)?;
                match self.scope.system_property(&name) {
                    Some(value) => {
                        self.read_sensitive |= value.is_sensitive();
                        Ok(value.content().clone())
                    }
                    None => self.optional_argument(args, 1),
                }
            }
            "check_empty" => {
                expect_arity(function, args, 2)?;
                let value = self.evaluate(&args[0])?;
                if is_blank(&value) { self.evaluate(&args[1]) } else { Ok(value) }
            }
            "str" | "int" | "float" | "bool" | "len" | "lower" | "upper" => {
                expect_arity(function, args, 1)?;
                let value = self.evaluate(&args[0])?;
                convert(function, &value)
            }
            other => Err(ExpressionError::UnknownFunction { name: other.to_string() }),
        }
    }

    fn string_argument(&mut self, function: &str, args: &[Expr], position: usize) -> Result<String, ExpressionError> {
        let Some(argument) = args.get(position) else {
            return Err(ExpressionError::type_error(format!("{function}() missing argument {}", position + 1)));
        };
        match self.evaluate(argument)? {
            JsonValue::String(text) => Ok(text),
            other => Err(ExpressionError::type_error(format!(
                "{function}() expects a string name, got {}",
                type_name(&other)
            ))),
        }
    }

    fn optional_argument(&mut self, args: &[Expr], position: usize) -> Result<JsonValue, ExpressionError> {
        match args.get(position) {
            Some(argument) => self.evaluate(argument),
            None => Ok(JsonValue::Null),
        }
    }
}

fn expect_arity(function: &str, args: &[Expr], expected: usize) -> Result<(), ExpressionError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ExpressionError::type_error(format!(
            "{function}() takes {expected} argument(s) but {} were given",
            args.len()
        )))
    }
}

fn convert(function: &str, value: &JsonValue) -> Result<JsonValue, ExpressionError> {
    match function {
        "str" => Ok(JsonValue::String(python_str(value))),
        "bool" => Ok(JsonValue::Bool(truthy(value))),
        "int" => match value {
            JsonValue::Bool(flag) => Ok(JsonValue::from(i64::from(*flag))),
            JsonValue::Number(number) => match Numeric::from_number(number) {
                Some(Numeric::Int(int)) => Ok(JsonValue::from(int)),
                Some(Numeric::Float(float)) => Ok(JsonValue::from(float.trunc() as i64)),
                None => Err(ExpressionError::type_error("unsupported number")),
            },
            JsonValue::String(text) => text
                .trim()
                .parse::<i64>()
                .map(JsonValue::from)
                .map_err(|_| ExpressionError::Conversion {
                    message: format!("invalid literal for int(): '{text}'"),
                }),
            other => Err(ExpressionError::type_error(format!("int() argument must be a string or a number, not {}", type_name(other)))),
        },
        "float" => {
            let float = match value {
                JsonValue::Bool(flag) => f64::from(u8::from(*flag)),
                JsonValue::Number(number) => number.as_f64().unwrap_or_default(),
                JsonValue::String(text) => text.trim().parse::<f64>().map_err(|_| ExpressionError::Conversion {
                    message: format!("could not convert string to float: '{text}'"),
                })?,
                other => {
                    return Err(ExpressionError::type_error(format!(
                        "float() argument must be a string or a number, not {}",
                        type_name(other)
                    )));
                }
            };
            float_value(float)
        }
        "len" => match value {
            JsonValue::String(text) => Ok(JsonValue::from(text.chars().count())),
            JsonValue::Array(items) => Ok(JsonValue::from(items.len())),
            JsonValue::Object(map) => Ok(JsonValue::from(map.len())),
            other => Err(ExpressionError::type_error(format!("object of type {} has no len()", type_name(other)))),
        },
        "lower" | "upper" => match value {
            JsonValue::String(text) if function == "lower" => Ok(JsonValue::String(text.to_lowercase())),
            JsonValue::String(text) => Ok(JsonValue::String(text.to_uppercase())),
            other => Err(ExpressionError::type_error(format!("{function}() expects a string, got {}", type_name(other)))),
        },
        other => Err(ExpressionError::UnknownFunction { name: other.to_string() }),
    }
}

#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    fn from_number(number: &Number) -> Option<Self> {
        if let Some(int) = number.as_i64() {
            Some(Numeric::Int(int))
        } else {
            number.as_f64().map(Numeric::Float)
        }
    }

    fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(number) => Self::from_number(number),
            JsonValue::Bool(flag) => Some(Numeric::Int(i64::from(*flag))),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(int) => int as f64,
            Numeric::Float(float) => float,
        }
    }
}

fn float_value(float: f64) -> Result<JsonValue, ExpressionError> {
    Number::from_f64(float)
        .map(JsonValue::Number)
        .ok_or_else(|| ExpressionError::type_error(format!("non-finite float result {float}")))
}

fn negate(value: &JsonValue) -> Result<JsonValue, ExpressionError> {
    match Numeric::from_json(value) {
        Some(Numeric::Int(int)) => int
            .checked_neg()
            .map(JsonValue::from)
            .ok_or_else(integer_overflow),
        Some(Numeric::Float(float)) => float_value(-float),
        None => Err(ExpressionError::type_error(format!("bad operand type for unary -: {}", type_name(value)))),
    }
}

fn binary(op: BinaryOp, left: &JsonValue, right: &JsonValue) -> Result<JsonValue, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(JsonValue::Bool(values_equal(left, right))),
        BinaryOp::NotEq => Ok(JsonValue::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right)?;
            let outcome = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(JsonValue::Bool(outcome))
        }
        BinaryOp::In => contains(right, left).map(JsonValue::Bool),
        BinaryOp::NotIn => contains(right, left).map(|found| JsonValue::Bool(!found)),
        BinaryOp::Add => add(left, right),
        BinaryOp::Multiply => multiply(left, right),
        BinaryOp::Subtract | BinaryOp::Divide | BinaryOp::Modulo => arithmetic(op, left, right),
        BinaryOp::And | BinaryOp::Or => Err(ExpressionError::type_error("logical operators are evaluated lazily")),
    }
}

fn add(left: &JsonValue, right: &JsonValue) -> Result<JsonValue, ExpressionError> {
    match (left, right) {
        (JsonValue::String(a), JsonValue::String(b)) => Ok(JsonValue::String(format!("{a}{b}"))),
        (JsonValue::Array(a), JsonValue::Array(b)) => Ok(JsonValue::Array(a.iter().chain(b.iter()).cloned().collect())),
        (JsonValue::String(_), other) | (other, JsonValue::String(_)) => Err(ExpressionError::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            type_name(other)
        ))),
        _ => arithmetic(BinaryOp::Add, left, right),
    }
}

fn multiply(left: &JsonValue, right: &JsonValue) -> Result<JsonValue, ExpressionError> {
    match (left, right) {
        (JsonValue::String(text), JsonValue::Number(count)) | (JsonValue::Number(count), JsonValue::String(text)) => {
            let times = count
                .as_i64()
                .ok_or_else(|| ExpressionError::type_error("can't multiply sequence by non-int"))?;
            let times = usize::try_from(times).unwrap_or(0);
            let length = text.len().checked_mul(times).filter(|length| *length <= MAX_REPEATED_LENGTH);
            if length.is_none() {
                return Err(ExpressionError::Overflow {
                    message: format!("repeated string would exceed {MAX_REPEATED_LENGTH} bytes"),
                });
            }
            Ok(JsonValue::String(text.repeat(times)))
        }
        _ => arithmetic(BinaryOp::Multiply, left, right),
    }
}

fn arithmetic(op: BinaryOp, left: &JsonValue, right: &JsonValue) -> Result<JsonValue, ExpressionError> {
    let (Some(a), Some(b)) = (Numeric::from_json(left), Numeric::from_json(right)) else {
        return Err(ExpressionError::type_error(format!(
            "unsupported operand types for {op:?}: '{}' and '{}'",
            type_name(left),
            type_name(right)
        )));
    };

    match (op, a, b) {
        (BinaryOp::Divide, _, b) if b.as_f64() == 0.0 => Err(ExpressionError::DivisionByZero),
        (BinaryOp::Modulo, _, b) if b.as_f64() == 0.0 => Err(ExpressionError::DivisionByZero),
        (BinaryOp::Divide, a, b) => float_value(a.as_f64() / b.as_f64()),
        (BinaryOp::Add, Numeric::Int(a), Numeric::Int(b)) => a.checked_add(b).map(JsonValue::from).ok_or_else(integer_overflow),
        (BinaryOp::Subtract, Numeric::Int(a), Numeric::Int(b)) => a.checked_sub(b).map(JsonValue::from).ok_or_else(integer_overflow),
        (BinaryOp::Multiply, Numeric::Int(a), Numeric::Int(b)) => a.checked_mul(b).map(JsonValue::from).ok_or_else(integer_overflow),
        (BinaryOp::Modulo, Numeric::Int(a), Numeric::Int(b)) => {
            let remainder = a.checked_rem(b).ok_or_else(integer_overflow)?;
            let adjusted = if remainder != 0 && (remainder < 0) != (b < 0) { remainder + b } else { remainder };
            Ok(JsonValue::from(adjusted))
        }
        (BinaryOp::Add, a, b) => float_value(a.as_f64() + b.as_f64()),
        (BinaryOp::Subtract, a, b) => float_value(a.as_f64() - b.as_f64()),
        (BinaryOp::Multiply, a, b) => float_value(a.as_f64() * b.as_f64()),
        (BinaryOp::Modulo, a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            float_value(a - b * (a / b).floor())
        }
        (op, _, _) => Err(ExpressionError::type_error(format!("{op:?} is not an arithmetic operator"))),
    }
}

fn integer_overflow() -> ExpressionError {
    ExpressionError::Overflow {
        message: "integer result out of range".to_string(),
    }
}

fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => match (Numeric::from_number(a), Numeric::from_number(b)) {
            (Some(Numeric::Int(a)), Some(Numeric::Int(b))) => a == b,
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => false,
        },
        (JsonValue::Array(a), JsonValue::Array(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y)),
        _ => left == right,
    }
}

fn compare(left: &JsonValue, right: &JsonValue) -> Result<Ordering, ExpressionError> {
    match (left, right) {
        (JsonValue::String(a), JsonValue::String(b)) => Ok(a.cmp(b)),
        _ => match (Numeric::from_json(left), Numeric::from_json(right)) {
            (Some(Numeric::Int(a)), Some(Numeric::Int(b))) => Ok(a.cmp(&b)),
            (Some(a), Some(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .ok_or_else(|| ExpressionError::type_error("cannot order NaN")),
            _ => Err(ExpressionError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                type_name(left),
                type_name(right)
            ))),
        },
    }
}

fn contains(container: &JsonValue, item: &JsonValue) -> Result<bool, ExpressionError> {
    match (container, item) {
        (JsonValue::String(haystack), JsonValue::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (JsonValue::Array(items), item) => Ok(items.iter().any(|candidate| values_equal(candidate, item))),
        (JsonValue::Object(map), JsonValue::String(key)) => Ok(map.contains_key(key)),
        (container, item) => Err(ExpressionError::type_error(format!(
            "'in <{}>' requires a compatible left operand, not {}",
            type_name(container),
            type_name(item)
        ))),
    }
}

fn subscript(target: &JsonValue, index: &JsonValue) -> Result<JsonValue, ExpressionError> {
    match (target, index) {
        (JsonValue::Array(items), JsonValue::Number(number)) => {
            let position = sequence_position(number, items.len())?;
            Ok(items[position].clone())
        }
        (JsonValue::String(text), JsonValue::Number(number)) => {
            let characters: Vec<char> = text.chars().collect();
            let position = sequence_position(number, characters.len())?;
            Ok(JsonValue::String(characters[position].to_string()))
        }
        (JsonValue::Object(map), JsonValue::String(key)) => map.get(key).cloned().ok_or_else(|| ExpressionError::Index {
            message: format!("key '{key}' not found"),
        }),
        (target, index) => Err(ExpressionError::type_error(format!(
            "'{}' object is not subscriptable with {}",
            type_name(target),
            type_name(index)
        ))),
    }
}

fn sequence_position(number: &Number, length: usize) -> Result<usize, ExpressionError> {
    let index = number
        .as_i64()
        .ok_or_else(|| ExpressionError::type_error("indices must be integers"))?;
    let length = i64::try_from(length).unwrap_or(i64::MAX);
    let resolved = if index < 0 { index + length } else { index };
    if (0..length).contains(&resolved) {
        usize::try_from(resolved).map_err(|_| ExpressionError::Index {
            message: "index out of range".to_string(),
        })
    } else {
        Err(ExpressionError::Index {
            message: format!("index {index} out of range"),
        })
    }
}

fn is_blank(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(text) => text.is_empty(),
        _ => false,
    }
}

pub(super) fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(number) => number.as_f64().is_some_and(|float| float != 0.0),
        JsonValue::String(text) => !text.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

pub(super) fn python_str(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "None".to_string(),
        JsonValue::Bool(true) => "True".to_string(),
        JsonValue::Bool(false) => "False".to_string(),
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "NoneType",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(number) if number.is_f64() => "float",
        JsonValue::Number(_) => "int",
        JsonValue::String(_) => "str",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "dict",
    }
}
