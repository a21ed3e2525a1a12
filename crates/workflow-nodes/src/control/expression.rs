//! Restricted expression language for branch decisions
//!
//! Expressions are parsed into an AST and interpreted directly over a JSON
//! scope. The grammar allows literals, dotted/bracketed field access,
//! arithmetic, comparisons and boolean logic, nothing else: there are no
//! calls, assignments or statements, and identifiers naming host facilities
//! are rejected outright.
//!
//! ```text
//! or      := and (("||" | "or") and)*
//! and     := not (("&&" | "and") not)*
//! not     := ("!" | "not") not | compare
//! compare := sum (("==" | "!=" | "<" | "<=" | ">" | ">=" | "contains") sum)?
//! sum     := product (("+" | "-") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := number | string | true | false | null | path | "(" or ")"
//! path    := ident ("." ident | "[" (number | string) "]")*
//! ```

use serde_json::Value;
use thiserror::Error;

/// Longest accepted expression source, in bytes
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Deepest accepted nesting of parentheses and prefix operators
pub const MAX_NESTING: usize = 64;

/// Identifiers that are never valid, anywhere in an expression
pub const FORBIDDEN_TOKENS: &[&str] = &[
    "eval",
    "Function",
    "function",
    "constructor",
    "prototype",
    "__proto__",
    "import",
    "require",
    "process",
    "global",
    "globalThis",
    "window",
    "document",
    "this",
    "new",
    "setTimeout",
    "setInterval",
    "fetch",
    "while",
    "for",
    "return",
];

fn is_forbidden(word: &str) -> bool {
    FORBIDDEN_TOKENS.iter().any(|f| *f == word)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("expression contains forbidden token '{0}'")]
    Forbidden(String),

    #[error("expression exceeds {} bytes", MAX_EXPRESSION_LEN)]
    TooLong,

    #[error("expression nests deeper than {} levels", MAX_NESTING)]
    TooDeep,

    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("type error: {0}")]
    Type(String),
}

impl ExpressionError {
    fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }
}

type ExprResult<T> = std::result::Result<T, ExpressionError>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "(", ")", "[", "]", ".",
];

fn tokenize(source: &str) -> ExprResult<Vec<(usize, Token)>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| ExpressionError::syntax(pos, format!("invalid number '{}'", text)))?;
            tokens.push((pos, Token::Number(number)));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().map(|(_, c)| c).collect();
            if is_forbidden(&ident) {
                return Err(ExpressionError::Forbidden(ident));
            }
            tokens.push((pos, Token::Ident(ident)));
        } else if c == '"' || c == '\'' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                let Some(&(_, c)) = chars.get(i) else {
                    return Err(ExpressionError::syntax(pos, "unterminated string"));
                };
                i += 1;
                match c {
                    '\\' => {
                        let Some(&(_, escaped)) = chars.get(i) else {
                            return Err(ExpressionError::syntax(pos, "unterminated string"));
                        };
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    c if c == quote => break,
                    c => text.push(c),
                }
            }
            tokens.push((pos, Token::Str(text)));
        } else {
            let rest = &source[pos..];
            let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
                let message = match c {
                    '=' => "assignment is not allowed; use '=='".to_string(),
                    other => format!("unexpected character '{}'", other),
                };
                return Err(ExpressionError::syntax(pos, message));
            };
            tokens.push((pos, Token::Op(*op)));
            i += op.chars().count();
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path(Vec<Segment>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(p, _)| *p)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Run `parse` one nesting level deeper
    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> ExprResult<Expr>) -> ExprResult<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(ExpressionError::TooDeep);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect_op(&mut self, op: &str) -> ExprResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(ExpressionError::syntax(self.position(), format!("expected '{}'", op)))
        }
    }

    fn or(&mut self) -> ExprResult<Expr> {
        let mut left = self.and()?;
        while self.eat_op("||") || self.eat_word("or") {
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> ExprResult<Expr> {
        let mut left = self.not()?;
        while self.eat_op("&&") || self.eat_word("and") {
            left = Expr::And(Box::new(left), Box::new(self.not()?));
        }
        Ok(left)
    }

    fn not(&mut self) -> ExprResult<Expr> {
        if self.eat_op("!") || self.eat_word("not") {
            return Ok(Expr::Not(Box::new(self.nested(Self::not)?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> ExprResult<Expr> {
        let left = self.sum()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => BinaryOp::Eq,
            Some(Token::Op("!=")) => BinaryOp::Ne,
            Some(Token::Op("<")) => BinaryOp::Lt,
            Some(Token::Op("<=")) => BinaryOp::Le,
            Some(Token::Op(">")) => BinaryOp::Gt,
            Some(Token::Op(">=")) => BinaryOp::Ge,
            Some(Token::Ident(w)) if w == "contains" => BinaryOp::Contains,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.sum()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn sum(&mut self) -> ExprResult<Expr> {
        let mut left = self.product()?;
        loop {
            let op = if self.eat_op("+") {
                BinaryOp::Add
            } else if self.eat_op("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            left = Expr::Binary(op, Box::new(left), Box::new(self.product()?));
        }
    }

    fn product(&mut self) -> ExprResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinaryOp::Mul
            } else if self.eat_op("/") {
                BinaryOp::Div
            } else if self.eat_op("%") {
                BinaryOp::Rem
            } else {
                return Ok(left);
            };
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> ExprResult<Expr> {
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ExprResult<Expr> {
        let position = self.position();
        let Some(token) = self.tokens.get(self.pos).map(|(_, t)| t.clone()) else {
            return Err(ExpressionError::syntax(position, "unexpected end of expression"));
        };
        self.pos += 1;

        match token {
            Token::Number(n) => Ok(Expr::Literal(number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Op("(") => {
                let inner = self.nested(Self::or)?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "and" | "or" | "not" | "contains" => {
                    Err(ExpressionError::syntax(position, format!("unexpected keyword '{}'", word)))
                }
                _ => self.path(word),
            },
            Token::Op(op) => Err(ExpressionError::syntax(position, format!("unexpected '{}'", op))),
        }
    }

    fn path(&mut self, head: String) -> ExprResult<Expr> {
        let mut segments = vec![Segment::Key(head)];
        loop {
            if self.eat_op(".") {
                let position = self.position();
                match self.tokens.get(self.pos).map(|(_, t)| t.clone()) {
                    Some(Token::Ident(key)) => {
                        self.pos += 1;
                        segments.push(Segment::Key(key));
                    }
                    _ => return Err(ExpressionError::syntax(position, "expected field name after '.'")),
                }
            } else if self.eat_op("[") {
                let position = self.position();
                match self.tokens.get(self.pos).map(|(_, t)| t.clone()) {
                    Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                        segments.push(Segment::Index(n as usize));
                    }
                    Some(Token::Str(key)) => {
                        if is_forbidden(&key) {
                            return Err(ExpressionError::Forbidden(key));
                        }
                        segments.push(Segment::Key(key));
                    }
                    _ => return Err(ExpressionError::syntax(position, "expected index or quoted key")),
                }
                self.pos += 1;
                self.expect_op("]")?;
            } else {
                return Ok(Expr::Path(segments));
            }
        }
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

/// JavaScript-style truthiness
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn numbers(op: &str, a: &Value, b: &Value) -> ExprResult<(f64, f64)> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(ExpressionError::Type(format!(
            "'{}' needs numbers, got {} and {}",
            op,
            describe(a),
            describe(b)
        ))),
    }
}

fn order(op: BinaryOp, a: &Value, b: &Value) -> ExprResult<bool> {
    let ordering = match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => {
            let (x, y) = numbers("comparison", a, b)?;
            x.partial_cmp(&y)
                .ok_or_else(|| ExpressionError::Type("comparison with NaN".into()))?
        }
    };
    Ok(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn contains(haystack: &Value, needle: &Value) -> ExprResult<bool> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => Ok(s.contains(&other.to_string())),
        },
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::Object(map) => Ok(needle.as_str().map_or(false, |k| map.contains_key(k))),
        Value::Null => Ok(false),
        other => Err(ExpressionError::Type(format!("cannot search inside a {}", describe(other)))),
    }
}

fn eval(expr: &Expr, scope: &Value) -> ExprResult<Value> {
    Ok(match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(segments) => {
            let mut current = scope;
            for segment in segments {
                let next = match segment {
                    Segment::Key(key) => current.get(key.as_str()),
                    Segment::Index(index) => current.get(*index),
                };
                match next {
                    Some(value) => current = value,
                    None => return Ok(Value::Null),
                }
            }
            current.clone()
        }
        Expr::Not(inner) => Value::Bool(!truthy(&eval(inner, scope)?)),
        Expr::Neg(inner) => {
            let value = eval(inner, scope)?;
            let n = value
                .as_f64()
                .ok_or_else(|| ExpressionError::Type(format!("cannot negate a {}", describe(&value))))?;
            number(-n)
        }
        Expr::And(left, right) => Value::Bool(truthy(&eval(left, scope)?) && truthy(&eval(right, scope)?)),
        Expr::Or(left, right) => Value::Bool(truthy(&eval(left, scope)?) || truthy(&eval(right, scope)?)),
        Expr::Binary(op, left, right) => {
            let a = eval(left, scope)?;
            let b = eval(right, scope)?;
            match op {
                BinaryOp::Eq => Value::Bool(loose_eq(&a, &b)),
                BinaryOp::Ne => Value::Bool(!loose_eq(&a, &b)),
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => Value::Bool(order(*op, &a, &b)?),
                BinaryOp::Contains => Value::Bool(contains(&a, &b)?),
                BinaryOp::Add => match (&a, &b) {
                    (Value::String(x), Value::String(y)) => Value::String(format!("{}{}", x, y)),
                    _ => {
                        let (x, y) = numbers("+", &a, &b)?;
                        number(x + y)
                    }
                },
                BinaryOp::Sub => {
                    let (x, y) = numbers("-", &a, &b)?;
                    number(x - y)
                }
                BinaryOp::Mul => {
                    let (x, y) = numbers("*", &a, &b)?;
                    number(x * y)
                }
                BinaryOp::Div | BinaryOp::Rem => {
                    let symbol = if *op == BinaryOp::Div { "/" } else { "%" };
                    let (x, y) = numbers(symbol, &a, &b)?;
                    if y == 0.0 {
                        return Err(ExpressionError::Type("division by zero".into()));
                    }
                    number(if *op == BinaryOp::Div { x / y } else { x % y })
                }
            }
        }
    })
}

/// A parsed, reusable expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse an expression, rejecting forbidden tokens and unknown syntax
    pub fn parse(source: &str) -> ExprResult<Self> {
        if source.len() > MAX_EXPRESSION_LEN {
            return Err(ExpressionError::TooLong);
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
            depth: 0,
        };
        let ast = parser.or()?;
        if parser.pos < parser.tokens.len() {
            return Err(ExpressionError::syntax(parser.position(), "unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate over a scope; missing fields read as `null`
    pub fn evaluate(&self, scope: &Value) -> ExprResult<Value> {
        eval(&self.ast, scope)
    }

    /// Evaluate and apply truthiness
    pub fn evaluate_bool(&self, scope: &Value) -> ExprResult<bool> {
        self.evaluate(scope).map(|v| truthy(&v))
    }
}
