//! Arithmetic and comparison operators.

use std::cmp::Ordering;

use super::ast::{BinOp, CmpOp};
use super::error::{type_error, ExcType, PyException, PyResult};
use super::format::percent_format;
use super::value::{check_alloc, Num, Value};

fn overflow() -> PyException {
    PyException::new(ExcType::OverflowError, "integer overflow")
}

fn zero_division(message: &str) -> PyException {
    PyException::new(ExcType::ZeroDivisionError, message)
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> PyException {
    PyException::new(
        ExcType::TypeError,
        format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ),
    )
}

pub fn binary(op: BinOp, left: &Value, right: &Value) -> PyResult<Value> {
    if let (Some(a), Some(b)) = (left.as_num(), right.as_num()) {
        return numeric(op, a, b);
    }
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::str(&joined))
        }
        (BinOp::Add, Value::Str(_), other) => type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        )),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::List(_), other) => type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            other.type_name()
        )),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, seq, count) | (BinOp::Mul, count, seq)
            if count.as_index().is_some()
                && matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
        {
            repeat(seq, count.as_index().unwrap_or(0))
        }
        (BinOp::Mod, Value::Str(template), args) => Ok(Value::str(&percent_format(template, args)?)),
        _ => Err(unsupported(op, left, right)),
    }
}

fn repeat(seq: &Value, count: i64) -> PyResult<Value> {
    let count = count.max(0) as usize;
    let len = seq.len()?;
    check_alloc(len.saturating_mul(count), "repeated sequence")?;
    Ok(match seq {
        Value::Str(s) => Value::str(&s.repeat(count)),
        Value::List(items) => {
            let items = items.borrow();
            Value::list(items.iter().cloned().cycle().take(items.len() * count).collect())
        }
        Value::Tuple(items) => {
            Value::tuple(items.iter().cloned().cycle().take(items.len() * count).collect())
        }
        _ => Value::None,
    })
}

fn numeric(op: BinOp, a: Num, b: Num) -> PyResult<Value> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        return int_op(op, x, y);
    }
    let (x, y) = (a.to_f64(), b.to_f64());
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            x.powf(y)
        }
    };
    Ok(Value::Float(value))
}

fn int_op(op: BinOp, x: i64, y: i64) -> PyResult<Value> {
    let value = match op {
        BinOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        BinOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (y < 0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(value))
}

/// `+=` and friends. Lists extend in place; everything else rebinds.
pub fn inplace(op: BinOp, left: Value, right: &Value) -> PyResult<Value> {
    if let (BinOp::Add, Value::List(items)) = (op, &left) {
        let extra: Vec<Value> = right.iter()?.collect();
        items.borrow_mut().extend(extra);
        return Ok(left);
    }
    binary(op, &left, right)
}

pub fn negate(value: &Value) -> PyResult<Value> {
    match value.as_num() {
        Some(Num::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        Some(Num::Float(f)) => Ok(Value::Float(-f)),
        None => type_error(format!(
            "bad operand type for unary -: '{}'",
            value.type_name()
        )),
    }
}

pub fn positive(value: &Value) -> PyResult<Value> {
    match value.as_num() {
        Some(Num::Int(i)) => Ok(Value::Int(i)),
        Some(Num::Float(f)) => Ok(Value::Float(f)),
        None => type_error(format!(
            "bad operand type for unary +: '{}'",
            value.type_name()
        )),
    }
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> PyResult<bool> {
    let ordered = |wanted: fn(Ordering) -> bool| -> PyResult<bool> {
        Ok(left
            .partial_order(right, op.symbol())?
            .is_some_and(wanted))
    };
    match op {
        CmpOp::Eq => Ok(left.py_eq(right)),
        CmpOp::NotEq => Ok(!left.py_eq(right)),
        CmpOp::Lt => ordered(Ordering::is_lt),
        CmpOp::Le => ordered(Ordering::is_le),
        CmpOp::Gt => ordered(Ordering::is_gt),
        CmpOp::Ge => ordered(Ordering::is_ge),
        CmpOp::In => right.contains(left),
        CmpOp::NotIn => Ok(!right.contains(left)?),
        CmpOp::Is => Ok(left.is_same(right)),
        CmpOp::IsNot => Ok(!left.is_same(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: BinOp, a: Value, b: Value) -> PyResult<Value> {
        binary(op, &a, &b)
    }

    #[test]
    fn test_floor_semantics() {
        assert_eq!(eval(BinOp::FloorDiv, Value::Int(-7), Value::Int(2)).unwrap().repr(), "-4");
        assert_eq!(eval(BinOp::Mod, Value::Int(-7), Value::Int(2)).unwrap().repr(), "1");
        assert_eq!(eval(BinOp::Mod, Value::Int(7), Value::Int(-2)).unwrap().repr(), "-1");
        assert_eq!(eval(BinOp::Div, Value::Int(7), Value::Int(2)).unwrap().repr(), "3.5");
    }

    #[test]
    fn test_errors() {
        let err = eval(BinOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert_eq!(err.kind(), ExcType::ZeroDivisionError);
        let err = eval(BinOp::Mul, Value::Int(i64::MAX), Value::Int(2)).unwrap_err();
        assert_eq!(err.kind(), ExcType::OverflowError);
        let err = eval(BinOp::Add, Value::str("a"), Value::Int(1)).unwrap_err();
        assert_eq!(err.summary(), "TypeError: can only concatenate str (not \"int\") to str");
    }

    #[test]
    fn test_sequences() {
        assert_eq!(eval(BinOp::Mul, Value::str("ab"), Value::Int(3)).unwrap().repr(), "'ababab'");
        assert_eq!(eval(BinOp::Mul, Value::Int(2), Value::list(vec![Value::Int(0)])).unwrap().repr(), "[0, 0]");
        assert_eq!(eval(BinOp::Pow, Value::Int(2), Value::Int(-1)).unwrap().repr(), "0.5");
    }

    #[test]
    fn test_compare() {
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CmpOp::In, &Value::str("b"), &Value::str("abc")).unwrap());
        assert!(compare(CmpOp::Lt, &Value::str("a"), &Value::Int(1)).is_err());
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
    }
}
