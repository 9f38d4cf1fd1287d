//! Transition guard expressions (§4.6).
//!
//! Grounded in `iteration347_workflow_engine.py::_evaluate_condition`: a
//! small boolean expression language over workflow variables — comparisons
//! (`==`, `!=`, `<`, `<=`, `>`, `>=`), combined with `&&`/`||`/`!` and
//! parentheses. Unlike the Python original (which `eval()`s the condition
//! string against a variables dict, a code-injection hazard), this is a
//! hand-rolled recursive-descent parser producing a small AST that is only
//! ever evaluated against a read-only variable map.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("unexpected character {0:?} at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expected token {0:?}")]
    Expected(String),
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Bool(bool),
    Op(String),
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>, GuardError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(GuardError::UnexpectedEnd);
                }
                tokens.push(Token::Str(chars[start..j].iter().collect()));
                i = j + 1;
            }
            '&' | '|' => {
                if i + 1 < chars.len() && chars[i + 1] == c {
                    tokens.push(Token::Op(format!("{c}{c}")));
                    i += 2;
                } else {
                    return Err(GuardError::UnexpectedChar(c, i));
                }
            }
            '=' | '!' | '<' | '>' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::Op(format!("{c}=")));
                    i += 2;
                } else if c == '!' {
                    tokens.push(Token::Op("!".to_string()));
                    i += 1;
                } else if c == '<' || c == '>' {
                    tokens.push(Token::Op(c.to_string()));
                    i += 1;
                } else {
                    return Err(GuardError::UnexpectedChar(c, i));
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            _ if c.is_ascii_digit() || (c == '-' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(num.parse().map_err(|_| GuardError::UnexpectedChar(c, start))?));
            }
            _ => return Err(GuardError::UnexpectedChar(c, i)),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Var(String),
    Lit(Value),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(String, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> Result<Expr, GuardError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Op(op)) if op == "||") {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, GuardError> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::Op(op)) if op == "&&") {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, GuardError> {
        if matches!(self.peek(), Some(Token::Op(op)) if op == "!") {
            self.next();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, GuardError> {
        let left = self.parse_atom()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            if ["==", "!=", "<", "<=", ">", ">="].contains(&op.as_str()) {
                self.next();
                let right = self.parse_atom()?;
                return Ok(Expr::Cmp(op, Box::new(left), Box::new(right)));
            }
        }
        Ok(left)
    }

    fn parse_atom(&mut self) -> Result<Expr, GuardError> {
        match self.next().ok_or(GuardError::UnexpectedEnd)? {
            Token::LParen => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(GuardError::Expected(")".to_string())),
                }
            }
            Token::Ident(name) => Ok(Expr::Var(name)),
            Token::Number(n) => Ok(Expr::Lit(serde_json::json!(n))),
            Token::Str(s) => Ok(Expr::Lit(Value::String(s))),
            Token::Bool(b) => Ok(Expr::Lit(Value::Bool(b))),
            other => Err(GuardError::Expected(format!("{other:?}"))),
        }
    }
}

/// A parsed guard expression, ready to evaluate against a variable map.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardExpr(Expr);

impl fmt::Display for GuardExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl GuardExpr {
    pub fn parse(src: &str) -> Result<Self, GuardError> {
        let tokens = tokenize(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(GuardError::Expected("end of expression".to_string()));
        }
        Ok(GuardExpr(expr))
    }

    pub fn eval(&self, variables: &HashMap<String, Value>) -> Result<bool, GuardError> {
        Ok(eval_expr(&self.0, variables)?.as_bool().unwrap_or(false))
    }
}

fn eval_expr(expr: &Expr, vars: &HashMap<String, Value>) -> Result<Value, GuardError> {
    match expr {
        Expr::Var(name) => vars.get(name).cloned().ok_or_else(|| GuardError::UnknownVariable(name.clone())),
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Not(e) => Ok(Value::Bool(!eval_expr(e, vars)?.as_bool().unwrap_or(false))),
        Expr::And(a, b) => {
            let left = eval_expr(a, vars)?.as_bool().unwrap_or(false);
            Ok(Value::Bool(left && eval_expr(b, vars)?.as_bool().unwrap_or(false)))
        }
        Expr::Or(a, b) => {
            let left = eval_expr(a, vars)?.as_bool().unwrap_or(false);
            Ok(Value::Bool(left || eval_expr(b, vars)?.as_bool().unwrap_or(false)))
        }
        Expr::Cmp(op, a, b) => {
            let lhs = eval_expr(a, vars)?;
            let rhs = eval_expr(b, vars)?;
            Ok(Value::Bool(compare(op, &lhs, &rhs)))
        }
    }
}

fn compare(op: &str, lhs: &Value, rhs: &Value) -> bool {
    if op == "==" {
        return lhs == rhs;
    }
    if op == "!=" {
        return lhs != rhs;
    }
    let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) else {
        return false;
    };
    match op {
        "<" => l < r,
        "<=" => l <= r,
        ">" => l > r,
        ">=" => l >= r,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn numeric_comparison() {
        let expr = GuardExpr::parse("amount > 100").unwrap();
        assert!(expr.eval(&vars(&[("amount", serde_json::json!(150))])).unwrap());
        assert!(!expr.eval(&vars(&[("amount", serde_json::json!(50))])).unwrap());
    }

    #[test]
    fn string_equality() {
        let expr = GuardExpr::parse("status == \"approved\"").unwrap();
        assert!(expr.eval(&vars(&[("status", serde_json::json!("approved"))])).unwrap());
    }

    #[test]
    fn and_or_not_precedence() {
        let expr = GuardExpr::parse("a > 1 && (b == true || !c)").unwrap();
        let ok = expr
            .eval(&vars(&[
                ("a", serde_json::json!(2)),
                ("b", serde_json::json!(false)),
                ("c", serde_json::json!(false)),
            ]))
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn unknown_variable_errors() {
        let expr = GuardExpr::parse("missing == 1").unwrap();
        assert!(expr.eval(&HashMap::new()).is_err());
    }
}
