//! Tree-walking evaluator

use super::parser::{BinaryOp, Expr, LogicalOp, Program, UnaryOp};
use super::value::Value;
use crate::error::ScriptError;

/// Supplies the functions an expression may call
pub trait Host {
    fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError>;
}

/// Evaluate statements in order and return the last value
pub fn evaluate(program: &Program, host: &mut dyn Host) -> Result<Value, ScriptError> {
    let mut last = Value::Undefined;
    for statement in &program.statements {
        last = eval_expr(statement, host)?;
    }
    Ok(last)
}

fn eval_expr(expr: &Expr, host: &mut dyn Host) -> Result<Value, ScriptError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, host)?);
            }
            host.call(name, &values)
        }
        Expr::Unary { op, expr } => {
            let value = eval_expr(expr, host)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!value.truthy()),
                UnaryOp::Neg => Value::Number(-value.to_number()),
            })
        }
        Expr::Logical { op, left, right } => {
            let left = eval_expr(left, host)?;
            match (op, left.truthy()) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                _ => eval_expr(right, host),
            }
        }
        Expr::Binary { op, left, right } => {
            let left = eval_expr(left, host)?;
            let right = eval_expr(right, host)?;
            Ok(binary(*op, &left, &right))
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::Str(format!("{}{}", left, right)),
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_eq(right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}
