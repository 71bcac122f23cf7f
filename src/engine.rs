//! Operator-precedence evaluation of validated formula tokens.

use crate::formula::{FormulaError, Operator, Token};

/// Entry on the operator stack
#[derive(Clone, Copy, Debug, PartialEq)]
enum Pending {
    Op(Operator),
    Open,
}

struct Engine<'a> {
    lookup: &'a dyn Fn(&str) -> Option<f64>,
    values: Vec<f64>,
    operators: Vec<Pending>,
}

/// Evaluate a validated token stream. Tokens must have passed formula
/// validation; a malformed stream is a bug and panics.
pub(crate) fn evaluate(
    tokens: &[Token],
    lookup: &dyn Fn(&str) -> Option<f64>,
) -> Result<f64, FormulaError> {
    let mut engine = Engine {
        lookup,
        values: Vec::with_capacity(tokens.len()),
        operators: Vec::new(),
    };
    for token in tokens {
        engine.step(token)?;
    }
    engine.finish()
}

impl<'a> Engine<'a> {
    fn step(&mut self, token: &Token) -> Result<(), FormulaError> {
        match token {
            Token::Number(_) | Token::Variable(_) => {
                let value = self.operand(token)?;
                if self.top_is(false) {
                    let op = self.pop_operator();
                    let left = self.pop_value();
                    self.values.push(arithmetic(left, value, op)?);
                } else {
                    self.values.push(value);
                }
            }
            Token::Op(op) if op.is_additive() => {
                self.collapse_if(true)?;
                self.operators.push(Pending::Op(*op));
            }
            Token::Op(op) => self.operators.push(Pending::Op(*op)),
            Token::LParen => self.operators.push(Pending::Open),
            Token::RParen => {
                self.collapse_if(true)?;
                match self.operators.pop() {
                    Some(Pending::Open) => {}
                    other => panic!("expected '(' on operator stack, found {:?}", other),
                }
                self.collapse_if(false)?;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<f64, FormulaError> {
        if !self.operators.is_empty() {
            let op = self.pop_operator();
            let right = self.pop_value();
            let left = self.pop_value();
            self.values.push(arithmetic(left, right, op)?);
        }
        let result = self.pop_value();
        assert!(
            self.values.is_empty() && self.operators.is_empty(),
            "formula evaluation left {} values and {} operators",
            self.values.len(),
            self.operators.len()
        );
        Ok(result)
    }

    fn operand(&self, token: &Token) -> Result<f64, FormulaError> {
        match token {
            Token::Number(n) => Ok(*n),
            Token::Variable(name) => {
                (self.lookup)(name).ok_or_else(|| FormulaError::UnknownVariable(name.clone()))
            }
            other => unreachable!("not an operand: {}", other),
        }
    }

    /// True if the top of the operator stack is an additive (or, with
    /// `additive == false`, multiplicative) operator.
    fn top_is(&self, additive: bool) -> bool {
        matches!(self.operators.last(), Some(Pending::Op(op)) if op.is_additive() == additive)
    }

    fn collapse_if(&mut self, additive: bool) -> Result<(), FormulaError> {
        if self.top_is(additive) {
            let op = self.pop_operator();
            let right = self.pop_value();
            let left = self.pop_value();
            self.values.push(arithmetic(left, right, op)?);
        }
        Ok(())
    }

    fn pop_operator(&mut self) -> Operator {
        match self.operators.pop() {
            Some(Pending::Op(op)) => op,
            other => panic!("expected an operator on the stack, found {:?}", other),
        }
    }

    fn pop_value(&mut self) -> f64 {
        match self.values.pop() {
            Some(v) => v,
            None => panic!("operand stack underflow in a validated formula"),
        }
    }
}

fn arithmetic(left: f64, right: f64, op: Operator) -> Result<f64, FormulaError> {
    let result = match op {
        Operator::Add => left + right,
        Operator::Sub => left - right,
        Operator::Mul => left * right,
        Operator::Div => {
            if right == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            left / right
        }
    };
    Ok(result)
}
