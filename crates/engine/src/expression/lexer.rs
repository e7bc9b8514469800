//! Tokenizer shared by the expression evaluator and the line script interpreter.

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Single `=`; only meaningful to the script interpreter.
    Assign,
}

/// Split `source` into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        if current.is_whitespace() {
            index += 1;
            continue;
        }

        if current.is_ascii_digit() {
            let start = index;
            while index < chars.len() && chars[index].is_ascii_digit() {
                index += 1;
            }
            let is_float = index + 1 < chars.len() && chars[index] == '.' && chars[index + 1].is_ascii_digit();
            if is_float {
                index += 1;
                while index < chars.len() && chars[index].is_ascii_digit() {
                    index += 1;
                }
            }
            let literal: String = chars[start..index].iter().collect();
            let token = if is_float {
                literal.parse::<f64>().map(Token::Float).ok()
            } else {
                literal.parse::<i64>().map(Token::Int).ok()
            };
            tokens.push(token.ok_or_else(|| syntax(source, format!("invalid number literal '{literal}'")))?);
            continue;
        }

        if current.is_alphabetic() || current == '_' {
            let start = index;
            while index < chars.len() && (chars[index].is_alphanumeric() || chars[index] == '_') {
                index += 1;
            }
            tokens.push(Token::Name(chars[start..index].iter().collect()));
            continue;
        }

        if current == '\'' || current == '"' {
            let (literal, next) = read_string(&chars, index, source)?;
            tokens.push(Token::Str(literal));
            index = next;
            continue;
        }

        let next = chars.get(index + 1).copied();
        let (token, width) = match (current, next) {
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('=', _) => (Token::Assign, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            (other, _) => return Err(syntax(source, format!("unexpected character '{other}'"))),
        };
        tokens.push(token);
        index += width;
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize, source: &str) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    let mut literal = String::new();
    let mut index = start + 1;
    while index < chars.len() {
        match chars[index] {
            '\\' if index + 1 < chars.len() => {
                let escaped = chars[index + 1];
                literal.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                index += 2;
            }
            character if character == quote => return Ok((literal, index + 1)),
            character => {
                literal.push(character);
                index += 1;
            }
        }
    }
    Err(syntax(source, "unterminated string literal"))
}

fn syntax(source: &str, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        expression: source.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_mixed_expression() {
        let tokens = tokenize("str(int(a) + 3*4) == '15'").expect("tokens");
        assert_eq!(
            tokens,
            vec![
                Token::Name("str".into()),
                Token::LParen,
                Token::Name("int".into()),
                Token::LParen,
                Token::Name("a".into()),
                Token::RParen,
                Token::Plus,
                Token::Int(3),
                Token::Star,
                Token::Int(4),
                Token::RParen,
                Token::EqEq,
                Token::Str("15".into()),
            ]
        );
    }

    #[test]
    fn distinguishes_assignment_from_equality() {
        let tokens = tokenize("condition = 1 == 1.5").expect("tokens");
        assert_eq!(tokens[1], Token::Assign);
        assert_eq!(tokens[3], Token::EqEq);
        assert_eq!(tokens[4], Token::Float(1.5));
    }

    #[test]
    fn rejects_unterminated_strings() {
        assert!(matches!(tokenize("'abc"), Err(ExpressionError::Syntax { .. })));
    }
}
