//! Expression engine for column definitions, filters and variations.
//!
//! Supports arithmetic (+, -, *, /), comparisons (==, !=, <, <=, >, >=),
//! boolean operators (&&, ||, !), element-wise broadcasting between scalars
//! and vectors, mask/element indexing (`Jet_pt[Jet_pt > 25]`, `v[0]`), brace
//! lists of alternatives (`{a * 1.1, a * 0.9}`) and calls into a
//! [`FunctionRegistry`].

use agc_core::{Error, Result};

use crate::functions::{EvalContext, Function, FunctionRegistry};
use crate::value::{Value, ValueRef};

// ── AST ────────────────────────────────────────────────────────

#[derive(Clone)]
enum Expr {
    Number(f64),
    Var(usize), // index into required_columns
    UnaryNeg(Box<Expr>),
    UnaryNot(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Call(Function, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn kernel(self) -> fn(f64, f64) -> f64 {
        fn b(v: bool) -> f64 {
            if v { 1.0 } else { 0.0 }
        }
        match self {
            BinOp::Add => |l, r| l + r,
            BinOp::Sub => |l, r| l - r,
            BinOp::Mul => |l, r| l * r,
            BinOp::Div => |l, r| l / r,
            BinOp::Eq => |l, r| b((l - r).abs() < f64::EPSILON),
            BinOp::Ne => |l, r| b((l - r).abs() >= f64::EPSILON),
            BinOp::Lt => |l, r| b(l < r),
            BinOp::Le => |l, r| b(l <= r),
            BinOp::Gt => |l, r| b(l > r),
            BinOp::Ge => |l, r| b(l >= r),
            BinOp::And => |l, r| b(l > 0.0 && r > 0.0),
            BinOp::Or => |l, r| b(l > 0.0 || r > 0.0),
        }
    }
}

// ── Compiled expression ────────────────────────────────────────

/// A compiled expression ready for evaluation.
///
/// Identifiers that are not function calls are column references.
#[derive(Clone)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
    /// Columns referenced by this expression (ordered by first occurrence).
    pub required_columns: Vec<String>,
}

impl std::fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpr")
            .field("source", &self.source)
            .field("required_columns", &self.required_columns)
            .finish()
    }
}

impl CompiledExpr {
    /// Parse and compile an expression string, resolving calls in `registry`.
    pub fn compile(input: &str, registry: &FunctionRegistry) -> Result<Self> {
        let tokens = tokenize(input)?;
        let mut parser = Parser::new(&tokens, registry);
        let ast = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::Expression(format!(
                "unexpected token after expression '{input}': {:?}",
                parser.tokens[parser.pos]
            )));
        }
        let columns = std::mem::take(&mut parser.columns);
        Ok(CompiledExpr { source: input.to_string(), ast, required_columns: columns })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate for one event.
    ///
    /// `inputs` must have the same length and order as `required_columns`.
    pub fn eval(&self, inputs: &[ValueRef<'_>], ctx: &mut EvalContext) -> Result<Value> {
        eval_expr(&self.ast, inputs, ctx)
    }

    /// Evaluate with scalar inputs only.
    pub fn eval_scalars(&self, inputs: &[f64], ctx: &mut EvalContext) -> Result<Value> {
        let refs: Vec<ValueRef<'_>> = inputs.iter().map(|&x| ValueRef::Scalar(x)).collect();
        self.eval(&refs, ctx)
    }
}

// ── Evaluation ─────────────────────────────────────────────────

fn eval_expr(e: &Expr, vals: &[ValueRef<'_>], ctx: &mut EvalContext) -> Result<Value> {
    match e {
        Expr::Number(n) => Ok(Value::Scalar(*n)),
        Expr::Var(i) => Ok(vals[*i].to_value()),
        Expr::UnaryNeg(a) => eval_expr(a, vals, ctx)?.map(|x| -x),
        Expr::UnaryNot(a) => eval_expr(a, vals, ctx)?.map(|x| if x > 0.0 { 0.0 } else { 1.0 }),
        Expr::BinOp(op, a, b) => {
            let lhs = eval_expr(a, vals, ctx)?;
            let rhs = eval_expr(b, vals, ctx)?;
            lhs.zip_with(&rhs, op.kernel())
        }
        Expr::Index(base, idx) => {
            let base = eval_expr(base, vals, ctx)?;
            let idx = eval_expr(idx, vals, ctx)?;
            index(base, idx)
        }
        Expr::List(items) => {
            Ok(Value::List(items.iter().map(|it| eval_expr(it, vals, ctx)).collect::<Result<_>>()?))
        }
        Expr::Call(f, args) => {
            let args: Vec<Value> =
                args.iter().map(|a| eval_expr(a, vals, ctx)).collect::<Result<_>>()?;
            (f.eval)(&args, ctx)
        }
    }
}

/// `base[idx]`: a vector index selects entries where the mask is true, a
/// scalar index picks one element.
fn index(base: Value, idx: Value) -> Result<Value> {
    let data = base.as_vector("index base")?;
    match idx {
        Value::Vector(mask) => {
            if mask.len() != data.len() {
                return Err(Error::Execution(format!(
                    "mask length {} does not match vector length {}",
                    mask.len(),
                    data.len()
                )));
            }
            Ok(Value::Vector(
                data.iter().zip(&mask).filter(|(_, m)| **m > 0.0).map(|(&x, _)| x).collect(),
            ))
        }
        Value::Scalar(i) => {
            if !i.is_finite() || i < 0.0 || i.fract() != 0.0 {
                return Err(Error::Expression(format!("index {i} is not a non-negative integer")));
            }
            if i as usize >= data.len() {
                return Err(Error::Execution(format!(
                    "index {i} out of range for vector of length {}",
                    data.len()
                )));
            }
            Ok(Value::Scalar(data[i as usize]))
        }
        Value::List(_) => Err(Error::Execution("cannot index with a list".into())),
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Two-character operators
        if let Some(&next) = chars.get(i + 1) {
            let tok = match (c, next) {
                ('&', '&') => Some(Token::And),
                ('|', '|') => Some(Token::Or),
                ('=', '=') => Some(Token::Eq),
                ('!', '=') => Some(Token::Ne),
                ('<', '=') => Some(Token::Le),
                ('>', '=') => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            ',' => Some(Token::Comma),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 =
                s.parse().map_err(|_| Error::Expression(format!("invalid number: '{s}'")))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(Error::Expression(format!("unexpected character: '{c}'")));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    columns: Vec<String>,
    registry: &'a FunctionRegistry,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], registry: &'a FunctionRegistry) -> Self {
        Self { tokens, pos: 0, columns: Vec::new(), registry }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Expression(format!("expected {:?}, got {:?}", expected, other))),
        }
    }

    fn resolve_var(&mut self, name: &str) -> usize {
        if let Some(i) = self.columns.iter().position(|b| b == name) {
            i
        } else {
            self.columns.push(name.to_string());
            self.columns.len() - 1
        }
    }

    /// Comma-separated expressions up to `close` (consumed).
    fn parse_args(&mut self, close: &Token) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(close) {
            self.advance();
            return Ok(args);
        }
        args.push(self.parse_or()?);
        while matches!(self.peek(), Some(Token::Comma)) {
            self.advance();
            args.push(self.parse_or()?);
        }
        self.expect(close)?;
        Ok(args)
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BinOp(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::BinOp(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(Expr::BinOp(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNeg(Box::new(e)))
            }
            Some(Token::Not) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::UnaryNot(Box::new(e)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut e = self.parse_atom()?;
        while matches!(self.peek(), Some(Token::LBracket)) {
            self.advance();
            let idx = self.parse_or()?;
            self.expect(&Token::RBracket)?;
            e = Expr::Index(Box::new(e), Box::new(idx));
        }
        Ok(e)
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::LBrace) => {
                let items = self.parse_args(&Token::RBrace)?;
                if items.is_empty() {
                    return Err(Error::Expression("empty brace list".into()));
                }
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance(); // consume '('
                    let args = self.parse_args(&Token::RParen)?;
                    let func = self.registry.resolve(&name, args.len())?;
                    Ok(Expr::Call(func, args))
                } else {
                    let idx = self.resolve_var(&name);
                    Ok(Expr::Var(idx))
                }
            }
            other => Err(Error::Expression(format!(
                "expected number, identifier, '(' or '{{', got {:?}",
                other
            ))),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
