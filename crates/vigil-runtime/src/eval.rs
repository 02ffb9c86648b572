//! Breakpoint-condition and watch-expression evaluation.
//!
//! Conditions are a deliberately small surface: a bare name, a
//! literal, or a single comparison between two of those. Anything
//! richer belongs in the debugged program, not the hook fast path.

use smol_str::SmolStr;

use crate::error::EvalError;
use crate::frame::Frame;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Name(SmolStr),
    Literal(Value),
}

/// Evaluate a condition expression against a frame's locals.
pub fn evaluate_condition(expr: &str, frame: &Frame) -> Result<bool, EvalError> {
    let (lhs, comparison) = parse(expr)?;
    let lhs = resolve(&lhs, frame)?;
    let Some((op, rhs)) = comparison else {
        return Ok(lhs.is_truthy());
    };
    let rhs = resolve(&rhs, frame)?;
    compare(&lhs, &rhs, op)
}

fn parse(expr: &str) -> Result<(Term, Option<(CmpOp, Term)>), EvalError> {
    let invalid = || EvalError::InvalidExpression(SmolStr::new(expr.trim()));
    let text = expr.trim();
    if text.is_empty() {
        return Err(invalid());
    }
    for (symbol, op) in [
        ("==", CmpOp::Eq),
        ("!=", CmpOp::Ne),
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
    ] {
        if let Some((lhs, rhs)) = text.split_once(symbol) {
            let lhs = parse_term(lhs).ok_or_else(invalid)?;
            let rhs = parse_term(rhs).ok_or_else(invalid)?;
            return Ok((lhs, Some((op, rhs))));
        }
    }
    Ok((parse_term(text).ok_or_else(invalid)?, None))
}

fn parse_term(text: &str) -> Option<Term> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text == "None" {
        return Some(Term::Literal(Value::Nil));
    }
    if text == "True" {
        return Some(Term::Literal(Value::Bool(true)));
    }
    if text == "False" {
        return Some(Term::Literal(Value::Bool(false)));
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Term::Literal(Value::Int(n)));
    }
    if let Ok(f) = text.parse::<f64>() {
        return Some(Term::Literal(Value::Float(f)));
    }
    if (text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2)
        || (text.starts_with('"') && text.ends_with('"') && text.len() >= 2)
    {
        return Some(Term::Literal(Value::Str(text[1..text.len() - 1].to_string())));
    }
    if text.chars().all(|c| c.is_alphanumeric() || c == '_')
        && text.chars().next().is_some_and(|c| !c.is_numeric())
    {
        return Some(Term::Name(SmolStr::new(text)));
    }
    None
}

fn resolve(term: &Term, frame: &Frame) -> Result<Value, EvalError> {
    match term {
        Term::Literal(value) => Ok(value.clone()),
        Term::Name(name) => frame
            .local(name)
            .cloned()
            .ok_or_else(|| EvalError::UndefinedName(name.clone())),
    }
}

fn compare(lhs: &Value, rhs: &Value, op: CmpOp) -> Result<bool, EvalError> {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match op {
        CmpOp::Eq => Ok(ordering == Some(Ordering::Equal)),
        CmpOp::Ne => Ok(ordering != Some(Ordering::Equal)),
        _ => {
            let ordering = ordering.ok_or(EvalError::Incomparable)?;
            Ok(match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::Ge => ordering != Ordering::Less,
                CmpOp::Eq | CmpOp::Ne => unreachable!(),
            })
        }
    }
}
