//! Type conversion builtins: Null, Boolean, Integer, Real, Number, String,
//! Array, Map
//!
//! Each is named after its target type. Impossible conversions (anything
//! involving functions, or array/map from scalars) throw a catchable
//! runtime string.

use super::{define_builtin, Namespace};
use crate::eval::{throw, EvalResult, Evaluator, Signal};
use crate::token::Pos;
use crate::types::Type;
use crate::value::Value;

fn conversion_error(value: &Value, target: &str, pos: Pos) -> Signal {
    throw(
        format!("cannot convert {} to {target}", value.type_of()),
        pos,
    )
}

fn single(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or(Value::Null)
}

/// The leading integer of a string, or 0: an optional sign followed by
/// digits at the start of the text.
fn leading_integer(s: &str) -> i64 {
    let s = s.trim_start();
    let mut end = 0;
    let bytes = s.as_bytes();
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    s[..end].parse().unwrap_or(0)
}

/// The leading real of a string, or 0: sign, digits, optional fraction and
/// exponent. Returns the matched text so `Number` can pick its result type.
fn leading_real(s: &str) -> (f64, String) {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        let mut frac = end + 1;
        while frac < bytes.len() && bytes[frac].is_ascii_digit() {
            frac += 1;
        }
        if frac > end + 1 {
            end = frac;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && matches!(bytes[exp], b'+' | b'-') {
            exp += 1;
        }
        let digits_start = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > digits_start {
            end = exp;
        }
    }
    let matched = &s[..end];
    (matched.parse().unwrap_or(0.0), matched.to_string())
}

define_builtin! {
    to_null, name: "Null",
    params: [("expr", Type::Any)],
    returns: Type::Null,
    |_ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        match single(args) {
            Value::Function(_) | Value::Builtin(_) => {
                Err(throw("cannot convert Function to Null", pos))
            }
            _ => Ok(Value::Null),
        }
    }
}

define_builtin! {
    to_boolean, name: "Boolean",
    params: [("expr", Type::Any)],
    returns: Type::Boolean,
    |_ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        let value = single(args);
        match &value {
            Value::Null => Ok(Value::Boolean(false)),
            Value::Boolean(_) => Ok(value),
            Value::Integer(n) => Ok(Value::Boolean(*n != 0)),
            Value::Real(n) => Ok(Value::Boolean(*n != 0.0)),
            Value::Str(s) => Ok(Value::Boolean(!s.is_empty())),
            _ => Err(conversion_error(&value, "Boolean", pos)),
        }
    }
}

define_builtin! {
    to_integer, name: "Integer",
    params: [("expr", Type::Any)],
    returns: Type::Integer,
    |_ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        let value = single(args);
        match &value {
            Value::Null => Ok(Value::Integer(0)),
            Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
            Value::Integer(_) => Ok(value),
            Value::Real(n) => Ok(Value::Integer(*n as i64)),
            Value::Str(s) => Ok(Value::Integer(leading_integer(s))),
            _ => Err(conversion_error(&value, "Integer", pos)),
        }
    }
}

define_builtin! {
    to_real, name: "Real",
    params: [("expr", Type::Any)],
    returns: Type::Real,
    |_ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        let value = single(args);
        match &value {
            Value::Null => Ok(Value::Real(0.0)),
            Value::Boolean(b) => Ok(Value::Real(f64::from(u8::from(*b)))),
            Value::Integer(n) => Ok(Value::Real(*n as f64)),
            Value::Real(_) => Ok(value),
            Value::Str(s) => Ok(Value::Real(leading_real(s).0)),
            _ => Err(conversion_error(&value, "Real", pos)),
        }
    }
}

define_builtin! {
    to_number, name: "Number",
    params: [("expr", Type::Any)],
    returns: Type::Number,
    |_ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        let value = single(args);
        match &value {
            Value::Null => Ok(Value::Integer(0)),
            Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
            Value::Integer(_) | Value::Real(_) => Ok(value),
            Value::Str(s) => {
                let (parsed, matched) = leading_real(s);
                if matched.contains('.') || matched.contains('e') || matched.contains('E') {
                    Ok(Value::Real(parsed))
                } else {
                    Ok(Value::Integer(leading_integer(s)))
                }
            }
            _ => Err(conversion_error(&value, "Number", pos)),
        }
    }
}

define_builtin! {
    to_string, name: "String",
    params: [("expr", Type::Any)],
    returns: Type::String,
    |_ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        let value = single(args);
        match &value {
            Value::Function(_) | Value::Builtin(_) => {
                Err(conversion_error(&value, "String", pos))
            }
            Value::Null => Ok(Value::Str(String::new())),
            _ => Ok(Value::Str(value.render_plain())),
        }
    }
}

define_builtin! {
    to_array, name: "Array",
    params: [("expr", Type::Any)],
    returns: Type::Array,
    |ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        let value = single(args);
        match &value {
            Value::Array(_) => Ok(value),
            Value::Str(s) => match ev.eval_literal_source(s, pos) {
                Ok(parsed @ Value::Array(_)) => Ok(parsed),
                _ => Err(throw(format!("cannot parse {s:?} as an array"), pos)),
            },
            _ => Err(conversion_error(&value, "Array", pos)),
        }
    }
}

define_builtin! {
    to_map, name: "Map",
    params: [("expr", Type::Any)],
    returns: Type::Map,
    |ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        let value = single(args);
        match &value {
            Value::Map(_) => Ok(value),
            Value::Str(s) => match ev.eval_literal_source(s, pos) {
                Ok(parsed @ Value::Map(_)) => Ok(parsed),
                _ => Err(throw(format!("cannot parse {s:?} as a map"), pos)),
            },
            _ => Err(conversion_error(&value, "Map", pos)),
        }
    }
}

/// Register all conversion builtins in the namespace
pub fn register(ns: &mut Namespace) {
    register_to_null(ns);
    register_to_boolean(ns);
    register_to_integer(ns);
    register_to_real(ns);
    register_to_number(ns);
    register_to_string(ns);
    register_to_array(ns);
    register_to_map(ns);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_integer() {
        assert_eq!(leading_integer("45abc"), 45);
        assert_eq!(leading_integer("-12"), -12);
        assert_eq!(leading_integer("abc"), 0);
        assert_eq!(leading_integer(""), 0);
        assert_eq!(leading_integer("  7x"), 7);
    }

    #[test]
    fn test_leading_real() {
        assert_eq!(leading_real("2.5rest").0, 2.5);
        assert_eq!(leading_real("-1e3!").0, -1000.0);
        assert_eq!(leading_real("42").0, 42.0);
        assert_eq!(leading_real("x").0, 0.0);
        assert_eq!(leading_real("3.x").1, "3");
    }
}
