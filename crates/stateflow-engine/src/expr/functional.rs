//! Built-in functional-expression adapter.
//!
//! Evaluates the expression subset the interpreter itself exercises:
//! literals, `$states.input` / `$states.context` / `$states.result`
//! navigation, `$variable` references, comparisons, `and`/`or`, string
//! concatenation with `&`, and basic arithmetic. Anything richer belongs to
//! an injected [`QueryEvaluator`](stateflow_core::traits::QueryEvaluator).

use serde_json::{Map, Number, Value};

use stateflow_core::error::{EngineError, Result};

pub fn evaluate(
    expr: &str,
    input: &Value,
    context: &Value,
    variables: &Map<String, Value>,
) -> Result<Value> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        input,
        context,
        variables,
        source: expr,
    };
    let value = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing input"));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Ref(String), // "$states", "$count", ...
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '&' => {
                tokens.push(Token::Op("&"));
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op("+"));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Op("-"));
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op("*"));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op("/"));
                i += 1;
            }
            '%' => {
                tokens.push(Token::Op("%"));
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op("="));
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("!="));
                    i += 2;
                } else {
                    return Err(lex_error(expr, c));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("<="));
                    i += 2;
                } else {
                    tokens.push(Token::Op("<"));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(">="));
                    i += 2;
                } else {
                    tokens.push(Token::Op(">"));
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&'\\') => {
                            if let Some(&next) = chars.get(i + 1) {
                                s.push(next);
                                i += 2;
                            } else {
                                return Err(lex_error(expr, '\\'));
                            }
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(EngineError::Expression(format!(
                                "unterminated string in expression '{}'",
                                expr
                            )))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '$' => {
                i += 1;
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(Token::Ref(format!("${}", name)));
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // A dot is part of the number only when followed by a digit,
                    // so `1.field` navigation still lexes.
                    if chars[i] == '.'
                        && !chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
                    {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| EngineError::Expression(format!("bad number '{}'", text)))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(lex_error(expr, c)),
        }
    }
    Ok(tokens)
}

fn lex_error(expr: &str, c: char) -> EngineError {
    EngineError::Expression(format!("unexpected '{}' in expression '{}'", c, expr))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    input: &'a Value,
    context: &'a Value,
    variables: &'a Map<String, Value>,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> EngineError {
        EngineError::Expression(format!("{} in expression '{}'", message, self.source))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<Value> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Value> {
        let mut left = self.and_expr()?;
        while self.peek_ident("or") {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Value::Bool(as_bool(&left, self)? || as_bool(&right, self)?);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Value> {
        let mut left = self.comparison()?;
        while self.peek_ident("and") {
            self.pos += 1;
            let right = self.comparison()?;
            left = Value::Bool(as_bool(&left, self)? && as_bool(&right, self)?);
        }
        Ok(left)
    }

    fn peek_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn comparison(&mut self) -> Result<Value> {
        let left = self.concat()?;
        let op = match self.peek() {
            Some(Token::Op(op @ ("=" | "!=" | "<" | "<=" | ">" | ">="))) => *op,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.concat()?;
        let result = match op {
            "=" => left == right,
            "!=" => left != right,
            _ => ordered_compare(&left, &right, op).ok_or_else(|| {
                self.error("ordering comparison requires two numbers or two strings")
            })?,
        };
        Ok(Value::Bool(result))
    }

    fn concat(&mut self) -> Result<Value> {
        let mut left = self.additive()?;
        while matches!(self.peek(), Some(Token::Op("&"))) {
            self.pos += 1;
            let right = self.additive()?;
            left = Value::String(format!("{}{}", stringify(&left), stringify(&right)));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Value> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op @ ("+" | "-"))) => *op,
                _ => break,
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = self.arithmetic(&left, &right, op)?;
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Value> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op @ ("*" | "/" | "%"))) => *op,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = self.arithmetic(&left, &right, op)?;
        }
        Ok(left)
    }

    fn arithmetic(&mut self, left: &Value, right: &Value, op: &str) -> Result<Value> {
        let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
            return Err(self.error("arithmetic requires numeric operands"));
        };
        let out = match op {
            "+" => l + r,
            "-" => l - r,
            "*" => l * r,
            "/" => l / r,
            "%" => l % r,
            _ => return Err(self.error("unknown arithmetic operator")),
        };
        number(out).ok_or_else(|| self.error("arithmetic result is not a finite number"))
    }

    fn unary(&mut self) -> Result<Value> {
        if matches!(self.peek(), Some(Token::Op("-"))) {
            self.pos += 1;
            let value = self.unary()?;
            let n = value
                .as_f64()
                .ok_or_else(|| self.error("unary '-' requires a number"))?;
            return number(-n).ok_or_else(|| self.error("negation overflowed"));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value> {
        match self.advance() {
            Some(Token::Number(n)) => {
                number(n).ok_or_else(|| self.error("number is not finite"))
            }
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(self.error("unexpected identifier")),
            },
            Some(Token::LParen) => {
                let value = self.expression()?;
                if self.advance() != Some(Token::RParen) {
                    return Err(self.error("expected ')'"));
                }
                Ok(value)
            }
            Some(Token::Ref(name)) => self.reference(&name),
            _ => Err(self.error("unexpected end of expression")),
        }
    }

    /// `$states.input…`, `$states.context…`, `$states.result…`, or a
    /// `$variable` with optional trailing navigation.
    fn reference(&mut self, name: &str) -> Result<Value> {
        let base = if name == "$states" {
            if self.advance() != Some(Token::Dot) {
                return Err(self.error("'$states' must be followed by a field"));
            }
            let field = match self.advance() {
                Some(Token::Ident(f)) => f,
                _ => return Err(self.error("'$states' must be followed by a field")),
            };
            match field.as_str() {
                "input" | "result" => self.input.clone(),
                "context" => self.context.clone(),
                _ => {
                    return Err(self.error(
                        "'$states' only exposes 'input', 'result', and 'context'",
                    ))
                }
            }
        } else {
            let var = &name[1..];
            self.variables.get(var).cloned().unwrap_or(Value::Null)
        };
        self.navigate(base)
    }

    fn navigate(&mut self, mut current: Value) -> Result<Value> {
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let key = match self.advance() {
                        Some(Token::Ident(k)) => k,
                        _ => return Err(self.error("expected a field name after '.'")),
                    };
                    current = current.get(&key).cloned().unwrap_or(Value::Null);
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let token = self.advance();
                    let next = match token {
                        Some(Token::Number(n)) => {
                            current.get(n as usize).cloned().unwrap_or(Value::Null)
                        }
                        Some(Token::Str(key)) => {
                            current.get(key.as_str()).cloned().unwrap_or(Value::Null)
                        }
                        _ => return Err(self.error("expected an index or key after '['")),
                    };
                    if self.advance() != Some(Token::RBracket) {
                        return Err(self.error("expected ']'"));
                    }
                    current = next;
                }
                _ => return Ok(current),
            }
        }
    }
}

fn as_bool(value: &Value, parser: &Parser<'_>) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| parser.error("'and'/'or' require boolean operands"))
}

fn ordered_compare(left: &Value, right: &Value, op: &str) -> Option<bool> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return Some(match op {
            "<" => l < r,
            "<=" => l <= r,
            ">" => l > r,
            ">=" => l >= r,
            _ => return None,
        });
    }
    if let (Some(l), Some(r)) = (left.as_str(), right.as_str()) {
        return Some(match op {
            "<" => l < r,
            "<=" => l <= r,
            ">" => l > r,
            ">=" => l >= r,
            _ => return None,
        });
    }
    None
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn number(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        return Some(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n).map(Value::Number)
}
