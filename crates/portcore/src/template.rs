//! Small template language used by the parameter binder.
//!
//! Text outside `{{ … }}` is copied verbatim. A tag holds one operand (a
//! document path or a literal) followed by any number of filters:
//!
//! ```text
//! Hello {{ workflow.parameters.name | upcase }}
//! {{ input.items | size | plus: 1 }}
//! {{ input.title | default: "untitled" }}
//! ```
//!
//! The evaluator is a trait so the engine can be swapped; the binder only
//! relies on "(template, flat model) -> text".

use crate::document::lookup;
use crate::value::{as_number, display_text, number_value, type_name};
use crate::TemplateError;
use serde_json::Value;

/// Renders template expressions against a flattened document.
pub trait ExpressionEvaluator: Send + Sync {
    fn render(&self, template: &str, model: &Value) -> Result<String, TemplateError>;
}

/// Whether `expression` must go through the template evaluator rather than a
/// direct path lookup.
pub fn has_template_markers(expression: &str) -> bool {
    expression.contains("{{")
}

/// Default [`ExpressionEvaluator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a single tag body (no braces) to a value.
    pub fn evaluate(&self, expression: &str, model: &Value) -> Result<Value, TemplateError> {
        self.evaluate_at(expression, model, 0)
    }

    fn evaluate_at(&self, expression: &str, model: &Value, base: usize) -> Result<Value, TemplateError> {
        let tokens = tokenize(expression, base)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            model,
            end: base + expression.len(),
        };
        parser.pipeline()
    }
}

impl ExpressionEvaluator for TemplateEngine {
    fn render(&self, template: &str, model: &Value) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let body_start = open + 2;
            let close = find_close(&rest[body_start..]).ok_or_else(|| TemplateError::Syntax {
                offset: offset + open,
                message: "unterminated '{{'".to_string(),
            })?;
            let body = &rest[body_start..body_start + close];
            let value = self.evaluate_at(body, model, offset + body_start)?;
            out.push_str(&display_text(&value));

            let consumed = body_start + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Byte index of the closing `}}`, skipping over string literals.
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Literal(Value),
    Pipe,
    Colon,
    Comma,
}

fn is_path_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | '-' | '[')
}

fn tokenize(source: &str, base: usize) -> Result<Vec<(Token, usize)>, TemplateError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (at, c) = chars[i];
        let offset = base + at;
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push((Token::Pipe, offset));
                i += 1;
            }
            ':' => {
                tokens.push((Token::Colon, offset));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, offset));
                i += 1;
            }
            '"' | '\'' => {
                let (text, next) = read_string(&chars, i, base)?;
                tokens.push((Token::Literal(Value::String(text)), offset));
                i = next;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() {
                    let ch = chars[i].1;
                    let exponent_sign =
                        matches!(ch, '+' | '-') && matches!(chars[i - 1].1, 'e' | 'E');
                    if ch.is_ascii_digit() || matches!(ch, '.' | 'e' | 'E') || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
                let value: Value = serde_json::from_str(&text).map_err(|_| TemplateError::Syntax {
                    offset,
                    message: format!("invalid number '{}'", text),
                })?;
                tokens.push((Token::Literal(value), offset));
            }
            c if is_path_start(c) => {
                let start = i;
                let mut depth = 0usize;
                while i < chars.len() {
                    let ch = chars[i].1;
                    if ch == ']' {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    } else if ch == '[' {
                        depth += 1;
                    } else if depth == 0 && !is_path_char(ch) {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
                let token = match text.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" | "nil" => Token::Literal(Value::Null),
                    _ => Token::Path(text),
                };
                tokens.push((token, offset));
            }
            other => {
                return Err(TemplateError::Syntax {
                    offset,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }
    }
    Ok(tokens)
}

fn read_string(chars: &[(usize, char)], start: usize, base: usize) -> Result<(String, usize), TemplateError> {
    let quote = chars[start].1;
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == '\\' {
            if let Some((_, escaped)) = chars.get(i + 1) {
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
                continue;
            }
        } else if c == quote {
            return Ok((text, i + 1));
        }
        text.push(c);
        i += 1;
    }
    Err(TemplateError::Syntax {
        offset: base + chars[start].0,
        message: "unterminated string literal".to_string(),
    })
}

struct Parser<'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    model: &'a Value,
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn pipeline(&mut self) -> Result<Value, TemplateError> {
        let mut value = self.operand()?;

        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            let name = match self.next() {
                Some((Token::Path(name), _)) => name,
                Some((_, offset)) => {
                    return Err(TemplateError::Syntax {
                        offset,
                        message: "expected a filter name".to_string(),
                    })
                }
                None => {
                    return Err(TemplateError::Syntax {
                        offset: self.end,
                        message: "expected a filter name".to_string(),
                    })
                }
            };

            let mut args = Vec::new();
            if self.peek() == Some(&Token::Colon) {
                self.pos += 1;
                args.push(self.operand()?);
                while self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    args.push(self.operand()?);
                }
            }
            value = apply_filter(&name, value, &args)?;
        }

        if let Some((_, offset)) = self.tokens.get(self.pos) {
            return Err(TemplateError::Syntax {
                offset: *offset,
                message: "unexpected token".to_string(),
            });
        }
        Ok(value)
    }

    fn operand(&mut self) -> Result<Value, TemplateError> {
        match self.next() {
            Some((Token::Literal(value), _)) => Ok(value),
            Some((Token::Path(path), _)) => Ok(lookup(self.model, &path).cloned().unwrap_or(Value::Null)),
            Some((_, offset)) => Err(TemplateError::Syntax {
                offset,
                message: "expected a value".to_string(),
            }),
            None => Err(TemplateError::Syntax {
                offset: self.end,
                message: "expected a value".to_string(),
            }),
        }
    }
}

fn required_arg<'a>(filter: &str, args: &'a [Value]) -> Result<&'a Value, TemplateError> {
    args.first().ok_or_else(|| TemplateError::Filter {
        filter: filter.to_string(),
        message: "missing argument".to_string(),
    })
}

fn apply_filter(name: &str, input: Value, args: &[Value]) -> Result<Value, TemplateError> {
    match name {
        "upcase" => Ok(Value::String(display_text(&input).to_uppercase())),
        "downcase" => Ok(Value::String(display_text(&input).to_lowercase())),
        "strip" => Ok(Value::String(display_text(&input).trim().to_string())),
        "size" => {
            let size = match &input {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                _ => 0,
            };
            Ok(Value::from(size))
        }
        "json" => Ok(Value::String(input.to_string())),
        "default" => {
            let fallback = required_arg(name, args)?;
            let empty = input.is_null() || input.as_str().is_some_and(str::is_empty);
            Ok(if empty { fallback.clone() } else { input })
        }
        "append" => {
            let suffix = required_arg(name, args)?;
            Ok(Value::String(display_text(&input) + &display_text(suffix)))
        }
        "prepend" => {
            let prefix = required_arg(name, args)?;
            Ok(Value::String(display_text(prefix) + &display_text(&input)))
        }
        "plus" | "minus" | "times" | "divided_by" => arithmetic(name, &input, required_arg(name, args)?),
        "join" => {
            let separator = args.first().map(display_text).unwrap_or_else(|| " ".to_string());
            match input {
                Value::Array(items) => {
                    let parts: Vec<String> = items.iter().map(display_text).collect();
                    Ok(Value::String(parts.join(&separator)))
                }
                other => Ok(Value::String(display_text(&other))),
            }
        }
        "first" => Ok(match input {
            Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
            Value::String(s) => s.chars().next().map(|c| Value::String(c.to_string())).unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        "last" => Ok(match input {
            Value::Array(mut items) => items.pop().unwrap_or(Value::Null),
            Value::String(s) => s.chars().last().map(|c| Value::String(c.to_string())).unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        other => Err(TemplateError::UnknownFilter(other.to_string())),
    }
}

fn arithmetic(filter: &str, lhs: &Value, rhs: &Value) -> Result<Value, TemplateError> {
    let (Some(a), Some(b)) = (as_number(lhs), as_number(rhs)) else {
        return Err(TemplateError::Filter {
            filter: filter.to_string(),
            message: format!("expected numbers, got {} and {}", type_name(lhs), type_name(rhs)),
        });
    };
    let result = match filter {
        "plus" => a + b,
        "minus" => a - b,
        "times" => a * b,
        _ => {
            if b == 0.0 {
                return Err(TemplateError::Filter {
                    filter: filter.to_string(),
                    message: "division by zero".to_string(),
                });
            }
            a / b
        }
    };
    number_value(result).ok_or_else(|| TemplateError::Filter {
        filter: filter.to_string(),
        message: "result is not a finite number".to_string(),
    })
}
