//! Sequence operations: map, filter
//!
//! Both take a callback and an array, in either order, so that plain calls
//! and uniform call syntax (`list.map(f)` as well as `f.map(list)`) both
//! read naturally. A bespoke validator replaces the positional check.

use super::{define_builtin, Namespace};
use crate::error::{CompileError, ErrorKind};
use crate::eval::{throw, EvalResult, Evaluator, Signal};
use crate::token::Pos;
use crate::types::{FnKind, Type};
use crate::value::Value;

fn is_function_like(ty: &Type) -> bool {
    matches!(
        ty.resolve(),
        Type::Func { .. } | Type::Function | Type::Builtin | Type::Any
    )
}

fn is_array_like(ty: &Type) -> bool {
    matches!(ty.resolve(), Type::ArrayOf(_) | Type::Array | Type::Any)
}

/// Finds which argument is the callback and which the array, accepting
/// either order. Returns (func_index, list_index).
fn callback_shape(name: &str, tys: &[Type], pos: Pos) -> Result<(usize, usize), CompileError> {
    if tys.len() != 2 {
        return Err(CompileError::new(
            ErrorKind::BadCall,
            format!("`{name}` expects a function and an array, got {} argument(s)", tys.len()),
            pos,
        ));
    }
    let definite_array =
        |ty: &Type| matches!(ty.resolve(), Type::ArrayOf(_) | Type::Array);
    let (f, l) = if definite_array(&tys[0]) { (1, 0) } else { (0, 1) };
    if !is_function_like(&tys[f]) || !is_array_like(&tys[l]) {
        return Err(CompileError::new(
            ErrorKind::BadCall,
            format!(
                "`{name}` expects a function and an array (have types {} and {})",
                tys[0], tys[1]
            ),
            pos,
        ));
    }
    Ok((f, l))
}

fn validate_map(tys: &[Type], pos: Pos) -> Result<Type, CompileError> {
    let (f, _) = callback_shape("map", tys, pos)?;
    let elem = match tys[f].resolve() {
        Type::Func { ret, .. } => (**ret).clone(),
        _ => Type::Any,
    };
    Ok(Type::ArrayOf(Box::new(elem)))
}

fn validate_filter(tys: &[Type], pos: Pos) -> Result<Type, CompileError> {
    let (_, l) = callback_shape("filter", tys, pos)?;
    Ok(match tys[l].resolve() {
        Type::ArrayOf(elem) => Type::ArrayOf(elem.clone()),
        _ => Type::ArrayOf(Box::new(Type::Any)),
    })
}

/// Splits runtime arguments into (callback, elements), either order.
fn callback_args(name: &str, args: Vec<Value>, pos: Pos) -> Result<(Value, Vec<Value>), Signal> {
    let mut func = None;
    let mut list = None;
    for arg in args {
        match arg {
            Value::Array(elems) => list = Some(elems.borrow().clone()),
            v if v.is_callable() => func = Some(v),
            other => {
                return Err(throw(
                    format!("`{name}` cannot use a value of type {}", other.type_of()),
                    pos,
                ))
            }
        }
    }
    match (func, list) {
        (Some(func), Some(list)) => Ok((func, list)),
        _ => Err(throw(format!("`{name}` expects a function and an array"), pos)),
    }
}

define_builtin! {
    map,
    validate: validate_map,
    params: [
        ("func", Type::Func {
            kind: FnKind::Function,
            params: vec![Type::Any],
            ret: Box::new(Type::Any),
        }),
        ("list", Type::Array)
    ],
    returns: Type::Array,
    |ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        let (func, elems) = callback_args("map", args, pos)?;
        let mut out = Vec::with_capacity(elems.len());
        for elem in elems {
            out.push(ev.call_value(&func, vec![elem], pos)?);
        }
        Ok(Value::array_from(out))
    }
}

define_builtin! {
    filter,
    validate: validate_filter,
    params: [
        ("func", Type::Func {
            kind: FnKind::Function,
            params: vec![Type::Any],
            ret: Box::new(Type::Boolean),
        }),
        ("list", Type::Array)
    ],
    returns: Type::Array,
    |ev: &mut Evaluator, args: Vec<Value>, pos: Pos| -> EvalResult {
        let (func, elems) = callback_args("filter", args, pos)?;
        let mut out = Vec::new();
        for elem in elems {
            let keep = ev.call_value(&func, vec![elem.clone()], pos)?;
            if ev.truthy_of(&keep, pos)? {
                out.push(elem);
            }
        }
        Ok(Value::array_from(out))
    }
}

/// Register all sequence builtins in the namespace
pub fn register(ns: &mut Namespace) {
    register_map(ns);
    register_filter(ns);
}
