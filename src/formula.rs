//! Formula parsing: tokenizer, syntax validation and the parsed `Formula` type.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::str::FromStr;

use indexmap::IndexSet;
use thiserror::Error;

use crate::engine;

/// Raised when a formula string is not a well-formed expression
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FormulaFormatError {
    #[error("formula is empty")]
    Empty,
    #[error("invalid token '{0}'")]
    InvalidToken(String),
    #[error("closing parenthesis without a matching opening one")]
    UnmatchedClose,
    #[error("{0} opening parenthesis left unclosed")]
    UnclosedParen(usize),
    #[error("formula cannot start with '{0}'")]
    InvalidStart(String),
    #[error("formula cannot end with '{0}'")]
    InvalidEnd(String),
    #[error("'{found}' cannot follow '{after}', expected a number, variable or '('")]
    ExpectedOperand { after: String, found: String },
    #[error("'{found}' cannot follow '{after}', expected an operator or ')'")]
    ExpectedOperator { after: String, found: String },
    #[error("invalid variable name '{0}'")]
    InvalidVariable(String),
}

/// Evaluation failure, stored as a cell value rather than raised
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot resolve variable '{0}'")]
    UnknownVariable(String),
}

impl FormulaError {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Operator::Add),
            '-' => Some(Operator::Sub),
            '*' => Some(Operator::Mul),
            '/' => Some(Operator::Div),
            _ => None,
        }
    }

    pub(crate) fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '-',
            Operator::Mul => '*',
            Operator::Div => '/',
        }
    }

    pub(crate) fn is_additive(self) -> bool {
        matches!(self, Operator::Add | Operator::Sub)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Token {
    /// Always finite
    Number(f64),
    Variable(String),
    Op(Operator),
    LParen,
    RParen,
}

impl Token {
    /// Bit pattern used for equality and hashing, with both zeros folded together.
    fn number_bits(n: f64) -> u64 {
        if n == 0.0 {
            0.0f64.to_bits()
        } else {
            n.to_bits()
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Token::Number(a), Token::Number(b)) => {
                Token::number_bits(*a) == Token::number_bits(*b)
            }
            (Token::Variable(a), Token::Variable(b)) => a == b,
            (Token::Op(a), Token::Op(b)) => a == b,
            (Token::LParen, Token::LParen) | (Token::RParen, Token::RParen) => true,
            _ => false,
        }
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Token::Number(n) => Token::number_bits(*n).hash(state),
            Token::Variable(name) => name.hash(state),
            Token::Op(op) => op.hash(state),
            Token::LParen | Token::RParen => {}
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Variable(name) => f.write_str(name),
            Token::Op(op) => write!(f, "{}", op.symbol()),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

/// Lexical token before validation. Kept as raw text so errors can quote the input.
#[derive(Debug, PartialEq)]
enum RawToken {
    Number(String),
    Variable(String),
    Op(char),
    LParen,
    RParen,
    Invalid(String),
}

impl RawToken {
    fn text(&self) -> String {
        match self {
            RawToken::Number(s) | RawToken::Variable(s) | RawToken::Invalid(s) => s.clone(),
            RawToken::Op(c) => c.to_string(),
            RawToken::LParen => "(".to_string(),
            RawToken::RParen => ")".to_string(),
        }
    }

    fn is_operand(&self) -> bool {
        matches!(self, RawToken::Number(_) | RawToken::Variable(_))
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '+' | '-' | '*' | '/')
}

/// Split a formula into tokens. Whitespace separates tokens and is otherwise dropped.
fn tokenize(src: &str) -> Vec<RawToken> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(RawToken::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(RawToken::RParen);
            i += 1;
            continue;
        }
        if Operator::from_char(c).is_some() {
            tokens.push(RawToken::Op(c));
            i += 1;
            continue;
        }

        let start = i;
        if c.is_ascii_digit() || c == '.' {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Exponent, only when digits actually follow
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            let text: String = chars[start..i].iter().collect();
            if text.parse::<f64>().is_ok_and(f64::is_finite) {
                tokens.push(RawToken::Number(text));
            } else {
                tokens.push(RawToken::Invalid(text));
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(RawToken::Variable(chars[start..i].iter().collect()));
        } else {
            while i < chars.len() && !is_delimiter(chars[i]) {
                i += 1;
            }
            tokens.push(RawToken::Invalid(chars[start..i].iter().collect()));
        }
    }

    tokens
}

/// True if `name` has the shape of a variable: a letter or underscore,
/// then letters, digits or underscores.
pub fn is_variable_syntax(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate(tokens: &[RawToken]) -> Result<(), FormulaFormatError> {
    let first = tokens.first().ok_or(FormulaFormatError::Empty)?;

    if let Some(bad) = tokens.iter().find(|t| matches!(t, RawToken::Invalid(_))) {
        return Err(FormulaFormatError::InvalidToken(bad.text()));
    }

    let mut depth = 0usize;
    for token in tokens {
        match token {
            RawToken::LParen => depth += 1,
            RawToken::RParen => {
                depth = depth.checked_sub(1).ok_or(FormulaFormatError::UnmatchedClose)?;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(FormulaFormatError::UnclosedParen(depth));
    }

    if !(first.is_operand() || *first == RawToken::LParen) {
        return Err(FormulaFormatError::InvalidStart(first.text()));
    }
    let last = &tokens[tokens.len() - 1];
    if !(last.is_operand() || *last == RawToken::RParen) {
        return Err(FormulaFormatError::InvalidEnd(last.text()));
    }

    for pair in tokens.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let opens = matches!(prev, RawToken::LParen | RawToken::Op(_));
        if opens && !(next.is_operand() || *next == RawToken::LParen) {
            return Err(FormulaFormatError::ExpectedOperand {
                after: prev.text(),
                found: next.text(),
            });
        }
        if !opens && !matches!(next, RawToken::Op(_) | RawToken::RParen) {
            return Err(FormulaFormatError::ExpectedOperator {
                after: prev.text(),
                found: next.text(),
            });
        }
    }

    Ok(())
}

/// A syntactically valid arithmetic formula over `+ - * /`, numbers and
/// named variables. Variables are stored in normalized form.
///
/// Formulas are immutable; evaluation takes the variable lookup as an
/// argument so the same formula can be evaluated against changing values.
/// Two formulas are equal when their token streams are: whitespace and
/// number spelling do not matter, variable names compare after
/// normalization.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Formula {
    tokens: Vec<Token>,
}

impl Formula {
    /// Parse with the identity normalizer and no extra name restriction.
    pub fn parse(src: &str) -> Result<Self, FormulaFormatError> {
        Self::parse_with(src, &|name: &str| name.to_string(), &|_: &str| true)
    }

    /// Parse, normalizing every variable and requiring `is_valid` to accept
    /// the normalized name.
    pub fn parse_with(
        src: &str,
        normalize: &dyn Fn(&str) -> String,
        is_valid: &dyn Fn(&str) -> bool,
    ) -> Result<Self, FormulaFormatError> {
        let raw = tokenize(src);
        validate(&raw)?;

        let mut tokens = Vec::with_capacity(raw.len());
        for token in raw {
            let token = match token {
                RawToken::Number(text) => match text.parse::<f64>() {
                    Ok(n) => Token::Number(n),
                    Err(_) => return Err(FormulaFormatError::InvalidToken(text)),
                },
                RawToken::Variable(name) => {
                    let normalized = normalize(&name);
                    if !is_variable_syntax(&normalized) || !is_valid(&normalized) {
                        return Err(FormulaFormatError::InvalidVariable(name));
                    }
                    Token::Variable(normalized)
                }
                RawToken::Op(c) => match Operator::from_char(c) {
                    Some(op) => Token::Op(op),
                    None => return Err(FormulaFormatError::InvalidToken(c.to_string())),
                },
                RawToken::LParen => Token::LParen,
                RawToken::RParen => Token::RParen,
                RawToken::Invalid(text) => return Err(FormulaFormatError::InvalidToken(text)),
            };
            tokens.push(token);
        }

        Ok(Formula { tokens })
    }

    /// Distinct normalized variables, in order of first appearance
    pub fn variables(&self) -> IndexSet<String> {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Variable(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Evaluate against `lookup`, which returns `None` for names it cannot resolve.
    pub fn evaluate<F>(&self, lookup: F) -> Result<f64, FormulaError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        engine::evaluate(&self.tokens, &lookup)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "{}", token)?;
        }
        Ok(())
    }
}

impl FromStr for Formula {
    type Err = FormulaFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Formula::parse(s)
    }
}
