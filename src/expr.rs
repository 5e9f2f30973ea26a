//! Arithmetic length expressions.
//!
//! Grammar: `E := T (('+'|'-') T)* ; T := F (('*'|'/') F)* ; F := INT | IDENT
//! | '(' E ')'`. Whitespace is insignificant. Identifiers resolve against a
//! caller-supplied map of previously parsed field values. `/` is integer
//! division truncating toward zero. There are no strings, comparisons, or
//! calls; this is a length calculator, not an expression language.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("expression syntax error: {0}")]
    ParseFailure(String),
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression result {0} is not a valid length")]
    InvalidResult(i64),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
enum RpnItem {
    Const(i64),
    Ident(String),
    Op(char),
}

/// A compiled expression: RPN produced by shunting-yard, ready to evaluate
/// against any context.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    rpn: Vec<RpnItem>,
}

impl Expr {
    /// Parse an expression without evaluating it. Used by the grammar
    /// validator to reject malformed `length_expr` strings up front.
    pub fn parse(src: &str) -> Result<Expr, ExprError> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err(ExprError::ParseFailure("empty expression".into()));
        }
        let rpn = shunt(&tokens)?;
        // Dry-run the stack discipline so "1 2" or "1 +" fail at parse time.
        let mut depth = 0usize;
        for item in &rpn {
            match item {
                RpnItem::Const(_) | RpnItem::Ident(_) => depth += 1,
                RpnItem::Op(_) => {
                    if depth < 2 {
                        return Err(ExprError::ParseFailure("missing operand".into()));
                    }
                    depth -= 1;
                }
            }
        }
        if depth != 1 {
            return Err(ExprError::ParseFailure("dangling operand".into()));
        }
        Ok(Expr { rpn })
    }

    /// Identifiers the expression references, in evaluation order.
    pub fn idents(&self) -> impl Iterator<Item = &str> {
        self.rpn.iter().filter_map(|item| match item {
            RpnItem::Ident(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Evaluate against a context of integer field values.
    ///
    /// Intermediate values may be negative; a negative final result is
    /// rejected with [`ExprError::InvalidResult`].
    pub fn eval(&self, context: &HashMap<String, i64>) -> Result<i64, ExprError> {
        let mut stack: Vec<i128> = Vec::with_capacity(self.rpn.len());
        for item in &self.rpn {
            match item {
                RpnItem::Const(n) => stack.push(*n as i128),
                RpnItem::Ident(name) => {
                    let v = context
                        .get(name)
                        .ok_or_else(|| ExprError::UnknownIdentifier(name.clone()))?;
                    stack.push(*v as i128);
                }
                RpnItem::Op(op) => {
                    let b = stack.pop().ok_or_else(malformed)?;
                    let a = stack.pop().ok_or_else(malformed)?;
                    let r = match op {
                        '+' => a + b,
                        '-' => a - b,
                        '*' => a * b,
                        '/' => {
                            if b == 0 {
                                return Err(ExprError::DivisionByZero);
                            }
                            a / b
                        }
                        _ => return Err(malformed()),
                    };
                    stack.push(r);
                }
            }
        }
        let result = match stack.as_slice() {
            [r] => *r,
            _ => return Err(malformed()),
        };
        let result = i64::try_from(result)
            .map_err(|_| ExprError::InvalidResult(if result < 0 { i64::MIN } else { i64::MAX }))?;
        if result < 0 {
            return Err(ExprError::InvalidResult(result));
        }
        Ok(result)
    }
}

fn malformed() -> ExprError {
    ExprError::ParseFailure("malformed expression".into())
}

/// Parse and evaluate in one step.
pub fn evaluate(src: &str, context: &HashMap<String, i64>) -> Result<i64, ExprError> {
    Expr::parse(src)?.eval(context)
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' | '-' | '*' | '/' => {
                chars.next();
                tokens.push(Token::Op(c));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '0'..='9' => {
                let mut num = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = num
                    .parse::<i64>()
                    .map_err(|_| ExprError::ParseFailure(format!("bad integer `{num}`")))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(ExprError::ParseFailure(format!(
                    "invalid character `{other}`"
                )))
            }
        }
    }
    Ok(tokens)
}

fn precedence(op: char) -> u8 {
    match op {
        '*' | '/' => 2,
        _ => 1,
    }
}

fn shunt(tokens: &[Token]) -> Result<Vec<RpnItem>, ExprError> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut operators: Vec<Token> = Vec::new();
    for token in tokens {
        match token {
            Token::Int(n) => output.push(RpnItem::Const(*n)),
            Token::Ident(name) => output.push(RpnItem::Ident(name.clone())),
            Token::Op(op) => {
                while let Some(Token::Op(top)) = operators.last() {
                    if precedence(*top) >= precedence(*op) {
                        output.push(RpnItem::Op(*top));
                        operators.pop();
                    } else {
                        break;
                    }
                }
                operators.push(Token::Op(*op));
            }
            Token::LParen => operators.push(Token::LParen),
            Token::RParen => {
                loop {
                    match operators.pop() {
                        Some(Token::Op(op)) => output.push(RpnItem::Op(op)),
                        Some(Token::LParen) => break,
                        _ => {
                            return Err(ExprError::ParseFailure("unbalanced parentheses".into()))
                        }
                    }
                }
            }
        }
    }
    while let Some(token) = operators.pop() {
        match token {
            Token::Op(op) => output.push(RpnItem::Op(op)),
            _ => return Err(ExprError::ParseFailure("unbalanced parentheses".into())),
        }
    }
    Ok(output)
}
