//! Introspection: type, whatis, length
//!
//! - `type`: the outermost type name of a value ("Array", "Integer", ...)
//! - `whatis`: the full structural type ("[Integer]", "{x: Integer}",
//!   function signatures)
//! - `length`: element count of an array or map, character count of a string

use super::{define_builtin, Namespace};
use crate::eval::{throw, Evaluator};
use crate::token::Pos;
use crate::types::{unite, Type};
use crate::value::Value;

define_builtin! {
    type_of, name: "type",
    params: [("expr", Type::Any)],
    returns: Type::String,
    |_ev: &mut Evaluator, args: Vec<Value>, _pos: Pos| {
        let name = args.first().map(|v| v.type_of().name()).unwrap_or_default();
        Ok(Value::Str(name))
    }
}

define_builtin! {
    whatis,
    params: [("expr", Type::Any)],
    returns: Type::String,
    |_ev: &mut Evaluator, args: Vec<Value>, _pos: Pos| {
        let printed = args
            .first()
            .map(|v| v.type_of().to_string())
            .unwrap_or_default();
        Ok(Value::Str(printed))
    }
}

define_builtin! {
    length,
    params: [("expr", unite(&[Type::Array, Type::Map, Type::String]))],
    returns: Type::Integer,
    |_ev: &mut Evaluator, args: Vec<Value>, pos: Pos| {
        match args.first() {
            Some(Value::Str(s)) => Ok(Value::Integer(s.chars().count() as i64)),
            Some(Value::Array(elems)) => Ok(Value::Integer(elems.borrow().len() as i64)),
            Some(Value::Map(entries)) => Ok(Value::Integer(entries.borrow().len() as i64)),
            other => Err(throw(
                format!(
                    "cannot take the length of {}",
                    other.map(|v| v.type_of().to_string()).unwrap_or_default()
                ),
                pos,
            )),
        }
    }
}

/// Register all introspection builtins in the namespace
pub fn register(ns: &mut Namespace) {
    register_type_of(ns);
    register_whatis(ns);
    register_length(ns);
}
