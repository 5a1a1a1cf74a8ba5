//! Array element type descriptors.
//!
//! A descriptor is stored as the text of a small literal, for example
//! `[('a', 'int32'), ('b', 'float64', (3,))]`. The literal is parsed back
//! by a dedicated parser; nothing is ever evaluated.

use thiserror::Error;

use crate::model::ElementKind;

/// An element type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    Scalar(ElementKind),
    Record(Vec<DTypeField>),
}

/// One named field of a record descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DTypeField {
    pub name: String,
    pub dtype: DType,
    /// Sub-array shape; empty for a plain field.
    pub shape: Vec<usize>,
}

/// Error parsing a descriptor literal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid dtype literal at offset {offset}: {message}")]
pub struct DTypeParseError {
    pub offset: usize,
    pub message: &'static str,
}

impl DType {
    /// Renders the descriptor literal.
    pub fn to_literal(&self) -> String {
        let mut out = String::new();
        self.write_literal(&mut out);
        out
    }

    fn write_literal(&self, out: &mut String) {
        match self {
            DType::Scalar(kind) => push_quoted(out, &kind.name()),
            DType::Record(fields) => {
                out.push('[');
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push('(');
                    push_quoted(out, &field.name);
                    out.push_str(", ");
                    field.dtype.write_literal(out);
                    if !field.shape.is_empty() {
                        out.push_str(", (");
                        for (j, dim) in field.shape.iter().enumerate() {
                            if j > 0 {
                                out.push_str(", ");
                            }
                            out.push_str(&dim.to_string());
                        }
                        if field.shape.len() == 1 {
                            out.push(',');
                        }
                        out.push(')');
                    }
                    out.push(')');
                }
                out.push(']');
            }
        }
    }

    /// Parses a literal produced by [`DType::to_literal`].
    pub fn parse_literal(text: &str) -> Result<DType, DTypeParseError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let dtype = parser.dtype()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(dtype)
    }
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Int(usize),
    Open(char),
    Close(char),
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, DTypeParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((offset, c)) = chars.next() {
        match c {
            ' ' | '\t' | '\n' => {}
            '[' | '(' => tokens.push((offset, Token::Open(c))),
            ']' | ')' => tokens.push((offset, Token::Close(c))),
            ',' => tokens.push((offset, Token::Comma)),
            '\'' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\'')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, escaped)) => s.push(escaped),
                            None => {
                                return Err(DTypeParseError {
                                    offset,
                                    message: "unterminated escape",
                                });
                            }
                        },
                        Some((_, other)) => s.push(other),
                        None => {
                            return Err(DTypeParseError {
                                offset,
                                message: "unterminated string",
                            });
                        }
                    }
                }
                tokens.push((offset, Token::Str(s)));
            }
            '0'..='9' => {
                let mut value = c as usize - '0' as usize;
                while let Some(&(_, d)) = chars.peek() {
                    let Some(digit) = d.to_digit(10) else { break };
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(digit as usize))
                        .ok_or(DTypeParseError {
                            offset,
                            message: "integer overflow",
                        })?;
                    chars.next();
                }
                tokens.push((offset, Token::Int(value)));
            }
            _ => {
                return Err(DTypeParseError {
                    offset,
                    message: "unexpected character",
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn error(&self, message: &'static str) -> DTypeParseError {
        let offset = self.tokens.get(self.pos).map_or(usize::MAX, |(o, _)| *o);
        DTypeParseError { offset, message }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, token: Token, message: &'static str) -> Result<(), DTypeParseError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn dtype(&mut self) -> Result<DType, DTypeParseError> {
        match self.peek() {
            Some(Token::Str(_)) => {
                let Some(Token::Str(name)) = self.next() else {
                    return Err(self.error("expected type name"));
                };
                ElementKind::from_name(&name)
                    .map(DType::Scalar)
                    .ok_or_else(|| self.error("unknown type name"))
            }
            Some(Token::Open('[')) => {
                self.pos += 1;
                let mut fields = Vec::new();
                loop {
                    if self.peek() == Some(&Token::Close(']')) {
                        self.pos += 1;
                        break;
                    }
                    fields.push(self.field()?);
                    match self.next() {
                        Some(Token::Comma) => {}
                        Some(Token::Close(']')) => break,
                        _ => return Err(self.error("expected ',' or ']'")),
                    }
                }
                Ok(DType::Record(fields))
            }
            _ => Err(self.error("expected type name or field list")),
        }
    }

    fn field(&mut self) -> Result<DTypeField, DTypeParseError> {
        self.expect(Token::Open('('), "expected '('")?;
        let name = match self.next() {
            Some(Token::Str(name)) => name,
            _ => return Err(self.error("expected field name")),
        };
        self.expect(Token::Comma, "expected ','")?;
        let dtype = self.dtype()?;
        let mut shape = Vec::new();
        if self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            shape = self.shape()?;
        }
        self.expect(Token::Close(')'), "expected ')'")?;
        Ok(DTypeField { name, dtype, shape })
    }

    fn shape(&mut self) -> Result<Vec<usize>, DTypeParseError> {
        self.expect(Token::Open('('), "expected shape")?;
        let mut dims = Vec::new();
        loop {
            match self.next() {
                Some(Token::Int(d)) => dims.push(d),
                Some(Token::Close(')')) => break,
                _ => return Err(self.error("expected dimension")),
            }
            match self.next() {
                Some(Token::Comma) => {}
                Some(Token::Close(')')) => break,
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
        Ok(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_literal() {
        let dtype = DType::Scalar(ElementKind::F64);
        assert_eq!(dtype.to_literal(), "'float64'");
        assert_eq!(DType::parse_literal("'float64'").unwrap(), dtype);
    }

    #[test]
    fn test_record_literal() {
        let dtype = DType::Record(vec![
            DTypeField {
                name: "a".into(),
                dtype: DType::Scalar(ElementKind::I32),
                shape: vec![],
            },
            DTypeField {
                name: "b'q".into(),
                dtype: DType::Scalar(ElementKind::F64),
                shape: vec![3],
            },
            DTypeField {
                name: "c".into(),
                dtype: DType::Record(vec![DTypeField {
                    name: "x".into(),
                    dtype: DType::Scalar(ElementKind::Str(4)),
                    shape: vec![2, 2],
                }]),
                shape: vec![],
            },
        ]);
        let literal = dtype.to_literal();
        assert_eq!(
            literal,
            "[('a', 'int32'), ('b\\'q', 'float64', (3,)), ('c', [('x', 'str128', (2, 2))])]"
        );
        assert_eq!(DType::parse_literal(&literal).unwrap(), dtype);
    }

    #[test]
    fn test_rejects_code() {
        assert!(DType::parse_literal("__import__('os')").is_err());
        assert!(DType::parse_literal("'float64' 'int8'").is_err());
        assert!(DType::parse_literal("'nosuchtype'").is_err());
        assert!(DType::parse_literal("[('a', 'int8'").is_err());
    }
}
