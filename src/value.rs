// ABOUTME: Runtime value types: payload variants, truthiness, rendering

use crate::ast::{Expr, Param};
use crate::builtins::BuiltinDef;
use crate::scope::Scope;
use crate::types::{unite, FnKind, MapField, Type};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A function value: the definition bundled with its defining scope.
#[derive(Debug)]
pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub ret: Type,
    pub body: Vec<Expr>,
    pub env: Rc<Scope>,
}

/// A runtime value. Arrays and maps are shared handles so that assignment
/// through an access slot is visible to every holder.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<IndexMap<String, Value>>>),
    Function(Rc<Closure>),
    Builtin(Rc<BuiltinDef>),
    /// `a..b`, inclusive; only ever observed inside an index operator.
    Range(i64, i64),
}

impl Value {
    pub fn empty_array() -> Value {
        Value::Array(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn array_from(elems: impl IntoIterator<Item = Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elems.into_iter().collect())))
    }

    pub fn empty_map() -> Value {
        Value::Map(Rc::new(RefCell::new(IndexMap::new())))
    }

    pub fn map_from(entries: impl IntoIterator<Item = (String, Value)>) -> Value {
        Value::Map(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    /// The structural type of this value.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Null => Type::Null,
            Value::Boolean(_) => Type::Boolean,
            Value::Integer(_) => Type::Integer,
            Value::Real(_) => Type::Real,
            Value::Str(_) => Type::String,
            Value::Array(elems) => {
                let tys: Vec<Type> = elems.borrow().iter().map(Value::type_of).collect();
                Type::ArrayOf(Box::new(unite(&tys)))
            }
            Value::Map(entries) => Type::MapOf(
                entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| MapField {
                        key: k.clone(),
                        ty: v.type_of(),
                    })
                    .collect(),
            ),
            Value::Function(c) => Type::Func {
                kind: FnKind::Function,
                params: c.params.iter().map(|p| p.ty.clone()).collect(),
                ret: Box::new(c.ret.clone()),
            },
            Value::Builtin(b) => Type::Func {
                kind: FnKind::Builtin,
                params: b.params.iter().map(|p| p.ty.clone()).collect(),
                ret: Box::new(b.ret.clone()),
            },
            Value::Range(_, _) => Type::Any,
        }
    }

    /// Truthiness, where defined: false, zero, and the empty string are
    /// falsy. Null, arrays, maps, and functions have no truthiness.
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(n) => Some(*n != 0),
            Value::Real(n) => Some(*n != 0.0),
            Value::Str(s) => Some(!s.is_empty()),
            _ => None,
        }
    }

    /// Rendering used by `print` and string interpolation: strings appear
    /// without quotes; everything else matches the literal form.
    pub fn render_plain(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Builtin(_))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Real(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Map(a), Value::Map(b)) => {
                Rc::ptr_eq(a, b) || {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len()
                        && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v == w))
                }
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Range(a, b), Value::Range(c, d)) => a == c && b == d,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// The literal form: strings quoted, arrays bracketed, map entries
    /// rendered `"key" = value` sorted by key.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::Str(s) => write!(f, "\"{}\"", escape_string(s)),
            Value::Array(elems) => {
                f.write_str("[")?;
                for (i, elem) in elems.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{elem}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                let entries = entries.borrow();
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "\"{}\" = {}", escape_string(key), entries[*key])?;
                }
                f.write_str("}")
            }
            Value::Function(_) | Value::Builtin(_) => write!(f, "{}", self.type_of()),
            Value::Range(a, b) => write!(f, "{a}..{b}"),
        }
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}
