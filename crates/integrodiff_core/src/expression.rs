//! `name(t) = expr` kernels: tokenizer, parser, bytecode compiler and stack VM.

use crate::traits::{Kernel, Scalar};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("expected a definition of the form `name(t) = expr`, got `{0}`")]
    MalformedDefinition(String),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown identifier `{0}`; bind it in the environment")]
    UnknownIdentifier(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

/// Values bound to the free identifiers of a kernel expression.
///
/// Identifiers are only ever resolved against this map; nothing is looked up
/// in the caller's scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    values: BTreeMap<String, f64>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// `second`, `ms`, `us` and `ns` in seconds.
    pub fn with_time_units() -> Self {
        Self::new()
            .with("second", 1.0)
            .with("ms", 1e-3)
            .with("us", 1e-6)
            .with("ns", 1e-9)
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Abs,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "exp" => Function::Exp,
            "log" => Function::Log,
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            _ => return None,
        })
    }

    fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Exp => a.exp(),
            Function::Log => a.ln(),
            Function::Sqrt => a.sqrt(),
            Function::Abs => a.abs(),
        }
    }
}

/// OpCodes for the stack-based virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a literal.
    LoadConst(f64),
    /// Pushes the time argument.
    LoadTime,
    /// Pushes a bound identifier by index into the parameter vector.
    LoadParam(usize),
    /// Pops b, a; pushes a + b.
    Add,
    /// Pops b, a; pushes a - b.
    Sub,
    /// Pops b, a; pushes a * b.
    Mul,
    /// Pops b, a; pushes a / b.
    Div,
    /// Pops b, a; pushes a ^ b.
    Pow,
    /// Pops a; pushes -a.
    Neg,
    /// Pops a; pushes f(a).
    Call(Function),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stateless evaluator; the caller owns the stack buffer.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, t: T, params: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();
        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(value) => {
                    stack.push(T::from_f64(value).unwrap_or_else(T::nan));
                }
                OpCode::LoadTime => stack.push(t),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call(function) => {
                    let a = pop(stack);
                    stack.push(function.apply(a));
                }
                binary => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    });
                }
            }
        }
        // The compiler only emits balanced programs, so an empty stack means
        // an empty program.
        stack.pop().unwrap_or_else(T::nan)
    }
}

fn pop<T: Scalar>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

// --- AST & Compiler ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    /// Operator is one of + - * / ^.
    Binary(Box<Expr>, char, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Box<Expr>),
}

/// Resolves identifiers and lowers an [`Expr`] to [`Bytecode`].
pub struct Compiler<'a> {
    time_variable: &'a str,
    environment: &'a Environment,
    param_names: Vec<String>,
}

impl<'a> Compiler<'a> {
    pub fn new(time_variable: &'a str, environment: &'a Environment) -> Self {
        Self {
            time_variable,
            environment,
            param_names: Vec::new(),
        }
    }

    /// Returns the program and the values of the identifiers it loads.
    pub fn compile(mut self, expr: &Expr) -> Result<(Bytecode, Vec<f64>), ExpressionError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        let mut params = Vec::with_capacity(self.param_names.len());
        for name in &self.param_names {
            params.push(self.resolve(name)?);
        }
        Ok((Bytecode { ops }, params))
    }

    fn resolve(&self, name: &str) -> Result<f64, ExpressionError> {
        match (self.environment.get(name), name) {
            (Some(value), _) => Ok(value),
            (None, "pi") => Ok(std::f64::consts::PI),
            _ => Err(ExpressionError::UnknownIdentifier(name.to_string())),
        }
    }

    fn compile_recursive(&mut self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), ExpressionError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) if name == self.time_variable => ops.push(OpCode::LoadTime),
            Expr::Variable(name) => {
                self.resolve(name)?;
                let idx = match self.param_names.iter().position(|p| p == name) {
                    Some(idx) => idx,
                    None => {
                        self.param_names.push(name.clone());
                        self.param_names.len() - 1
                    }
                };
                ops.push(OpCode::LoadParam(idx));
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    other => {
                        return Err(ExpressionError::Syntax(format!("unknown operator `{other}`")))
                    }
                });
            }
            Expr::Neg(operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(name, arg) => {
                let function = Function::from_name(name)
                    .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(function));
            }
        }
        Ok(())
    }
}

// --- Tokenizer & Parser ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign =
                    (d == '+' || d == '-') && matches!(literal.chars().last(), Some('e' | 'E'));
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal
                .parse()
                .map_err(|_| ExpressionError::Syntax(format!("bad number `{literal}`")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    Token::Caret
                }
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => return Err(ExpressionError::Syntax(format!("unexpected `{other}`"))),
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

/// Parses an expression; `**` and `^` both mean power.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_sum()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::Syntax(format!("trailing {token:?}"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_sum(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_product()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some('+'),
            Some(Token::Minus) => Some('-'),
            _ => None,
        } {
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some('*'),
            Some(Token::Slash) => Some('/'),
            _ => None,
        } {
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // -a^b is -(a^b)
    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // Right associative: a^b^c is a^(b^c).
    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_sum()?;
                    self.expect_close()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_sum()?;
                self.expect_close()?;
                Ok(expr)
            }
            Some(token) => Err(ExpressionError::Syntax(format!("unexpected {token:?}"))),
            None => Err(ExpressionError::Syntax("unexpected end of input".to_string())),
        }
    }

    fn expect_close(&mut self) -> Result<(), ExpressionError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(ExpressionError::Syntax("expected `)`".to_string())),
        }
    }
}

// --- Kernel definitions ---

/// A compiled kernel expression with its identifiers already bound.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionKernel {
    bytecode: Bytecode,
    params: Vec<f64>,
}

impl ExpressionKernel {
    pub fn compile(
        source: &str,
        time_variable: &str,
        environment: &Environment,
    ) -> Result<Self, ExpressionError> {
        let expr = parse(source)?;
        let (bytecode, params) = Compiler::new(time_variable, environment).compile(&expr)?;
        Ok(Self { bytecode, params })
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }
}

impl Kernel for ExpressionKernel {
    fn eval(&self, t: f64) -> f64 {
        let mut stack = Vec::with_capacity(self.bytecode.ops.len());
        VM::execute(&self.bytecode, t, &self.params, &mut stack)
    }
}

/// `name(t) = expr`, parsed and bound.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelDefinition {
    pub name: String,
    pub time_variable: String,
    pub kernel: ExpressionKernel,
}

impl KernelDefinition {
    pub fn parse(definition: &str, environment: &Environment) -> Result<Self, ExpressionError> {
        let malformed = || ExpressionError::MalformedDefinition(definition.trim().to_string());
        let (lhs, rhs) = definition.split_once('=').ok_or_else(malformed)?;
        let (name, time_variable) = match tokenize(lhs)?.as_slice() {
            [Token::Identifier(name), Token::LParen, Token::Identifier(time), Token::RParen] => {
                (name.clone(), time.clone())
            }
            _ => return Err(malformed()),
        };
        if rhs.trim().is_empty() {
            return Err(malformed());
        }
        let kernel = ExpressionKernel::compile(rhs, &time_variable, environment)?;
        Ok(Self {
            name,
            time_variable,
            kernel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, t: f64, environment: &Environment) -> f64 {
        ExpressionKernel::compile(source, "t", environment)
            .expect("compile")
            .eval(t)
    }

    #[test]
    fn precedence_and_associativity() {
        let env = Environment::new();
        assert_eq!(eval("1 + 2 * 3", 0.0, &env), 7.0);
        assert_eq!(eval("(1 + 2) * 3", 0.0, &env), 9.0);
        assert_eq!(eval("2 ^ 3 ^ 2", 0.0, &env), 512.0);
        assert_eq!(eval("-2 ^ 2", 0.0, &env), -4.0);
        assert_eq!(eval("2 ** 3", 0.0, &env), 8.0);
        assert_eq!(eval("8 / 4 / 2", 0.0, &env), 1.0);
        assert_eq!(eval("t - -t", 1.5, &env), 3.0);
    }

    #[test]
    fn scientific_literals() {
        let env = Environment::new();
        assert_eq!(eval("1e-3", 0.0, &env), 1e-3);
        assert_eq!(eval("2.5E+2 - 1", 0.0, &env), 249.0);
    }

    #[test]
    fn identifiers_come_from_environment() {
        let env = Environment::with_time_units().with("tau", 10.0);
        let value = eval("t * exp(-t / (tau * ms))", 0.01, &env);
        assert!((value - 0.01 * (-1.0f64).exp()).abs() < 1e-15);
        assert!((eval("cos(pi)", 0.0, &env) + 1.0).abs() < 1e-15);
    }

    #[test]
    fn unknown_names_are_errors() {
        let env = Environment::new();
        let err = ExpressionKernel::compile("exp(-t / tau)", "t", &env).expect_err("unbound tau");
        assert_eq!(err, ExpressionError::UnknownIdentifier("tau".to_string()));

        let err = ExpressionKernel::compile("erf(t)", "t", &env).expect_err("no erf");
        assert_eq!(err, ExpressionError::UnknownFunction("erf".to_string()));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let env = Environment::new();
        for source in ["(t + 1", "t +", "t $ 2", "t t", ""] {
            let err = ExpressionKernel::compile(source, "t", &env).expect_err(source);
            assert!(matches!(err, ExpressionError::Syntax(_)), "{source}: {err:?}");
        }
    }

    #[test]
    fn repeated_identifiers_share_a_slot() {
        let env = Environment::new().with("a", 2.0);
        let kernel = ExpressionKernel::compile("a * t + a", "t", &env).expect("compile");
        let loads = kernel
            .bytecode()
            .ops
            .iter()
            .filter(|op| **op == OpCode::LoadParam(0))
            .count();
        assert_eq!(loads, 2);
        assert_eq!(kernel.eval(3.0), 8.0);
    }

    #[test]
    fn definition_names_kernel_and_time() {
        let env = Environment::new().with("tau", 0.01);
        let definition = KernelDefinition::parse("g(s) = s * exp(-s / tau)", &env).expect("parse");
        assert_eq!(definition.name, "g");
        assert_eq!(definition.time_variable, "s");
        assert!((definition.kernel.eval(0.01) - 0.01 * (-1.0f64).exp()).abs() < 1e-15);
    }

    #[test]
    fn time_variable_shadows_environment() {
        let env = Environment::new().with("t", 100.0);
        assert_eq!(eval("t", 2.0, &env), 2.0);
    }

    #[test]
    fn malformed_definitions() {
        let env = Environment::new();
        for definition in ["g = t", "g(t) t", "g(t) =", "(t) = t"] {
            let err = KernelDefinition::parse(definition, &env).expect_err(definition);
            assert!(matches!(err, ExpressionError::MalformedDefinition(_)), "{definition}");
        }
    }
}
