//! # Built-in Functions Module
//!
//! The namespace registry mapping identifiers to builtin descriptors, and
//! the default builtin set, organized by category:
//!
//! - **[console]**: print
//! - **[introspection]**: type, whatis, length
//! - **[sequences]**: map, filter
//! - **[conversion]**: Null, Boolean, Integer, Real, Number, String, Array, Map
//!
//! Each category is a sub-module with a `register` function. Hosts extend
//! the set by registering their own descriptors on the namespace before
//! interpreting any code.

use crate::error::CompileError;
use crate::eval::{EvalResult, Evaluator};
use crate::token::Pos;
use crate::types::{FnKind, Type};
use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// Implementation of a builtin: evaluator access (for callbacks and
/// output), the already-evaluated arguments, and the call position.
pub type BuiltinFn = fn(&mut Evaluator, Vec<Value>, Pos) -> EvalResult;

/// An optional bespoke static check, replacing the positional parameter
/// check for builtins with irregular call shapes. Receives the inferred
/// argument types and yields the call's result type.
pub type BuiltinValidator = fn(&[Type], Pos) -> Result<Type, CompileError>;

#[derive(Debug)]
pub struct BuiltinParam {
    pub name: &'static str,
    pub ty: Type,
    pub default: Option<Value>,
}

#[derive(Debug)]
pub struct BuiltinDef {
    pub name: &'static str,
    pub params: Vec<BuiltinParam>,
    pub ret: Type,
    pub func: BuiltinFn,
    pub validate: Option<BuiltinValidator>,
}

impl BuiltinDef {
    /// The builtin's type as seen by the type system.
    pub fn func_type(&self) -> Type {
        Type::Func {
            kind: FnKind::Builtin,
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(self.ret.clone()),
        }
    }
}

/// The process-wide registry of builtin functions. Populated during
/// interpreter construction and read-only during evaluation.
#[derive(Debug, Default)]
pub struct Namespace {
    entries: HashMap<&'static str, Rc<BuiltinDef>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, def: BuiltinDef) {
        self.entries.insert(def.name, Rc::new(def));
    }

    pub fn lookup(&self, name: &str) -> Option<Rc<BuiltinDef>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

// ============================================================================
// Builtin Definition Macro
// ============================================================================
//
// Unified macro for defining builtins with their signatures. Generates the
// implementation function plus a `register_<name>` helper.
//
// Usage:
//   define_builtin! {
//       identifier,                      // or: identifier, name: "Printed",
//       params: [("expr", Type::Any), ("end", Type::String, Value::from("\n"))],
//       returns: Type::Null,
//       |ev, args, pos| { /* implementation */ }
//   }

macro_rules! define_builtin {
    {
        $fn_ident:ident,
        params: [$(($pname:literal, $pty:expr $(, $pdefault:expr)?)),* $(,)?],
        returns: $ret:expr,
        $impl:expr
    } => {
        define_builtin! {
            @inner $fn_ident, stringify!($fn_ident), None,
            [$(($pname, $pty $(, $pdefault)?)),*], $ret, $impl
        }
    };

    {
        $fn_ident:ident,
        name: $name:literal,
        params: [$(($pname:literal, $pty:expr $(, $pdefault:expr)?)),* $(,)?],
        returns: $ret:expr,
        $impl:expr
    } => {
        define_builtin! {
            @inner $fn_ident, $name, None,
            [$(($pname, $pty $(, $pdefault)?)),*], $ret, $impl
        }
    };

    {
        $fn_ident:ident,
        validate: $validate:expr,
        params: [$(($pname:literal, $pty:expr $(, $pdefault:expr)?)),* $(,)?],
        returns: $ret:expr,
        $impl:expr
    } => {
        define_builtin! {
            @inner $fn_ident, stringify!($fn_ident), Some($validate),
            [$(($pname, $pty $(, $pdefault)?)),*], $ret, $impl
        }
    };

    {
        @inner $fn_ident:ident, $name:expr, $validate:expr,
        [$(($pname:literal, $pty:expr $(, $pdefault:expr)?)),*], $ret:expr, $impl:expr
    } => {
        pub fn $fn_ident(
            ev: &mut $crate::eval::Evaluator,
            args: Vec<$crate::value::Value>,
            pos: $crate::token::Pos,
        ) -> $crate::eval::EvalResult {
            let implementation = $impl;
            implementation(ev, args, pos)
        }

        paste::paste! {
            pub fn [<register_ $fn_ident>](ns: &mut $crate::builtins::Namespace) {
                ns.define($crate::builtins::BuiltinDef {
                    name: $name,
                    params: vec![$(
                        $crate::builtins::BuiltinParam {
                            name: $pname,
                            ty: $pty,
                            default: {
                                #[allow(unused_mut, unused_assignments)]
                                let mut d: Option<$crate::value::Value> = None;
                                $( d = Some($pdefault); )?
                                d
                            },
                        }
                    ),*],
                    ret: $ret,
                    func: $fn_ident,
                    validate: $validate,
                });
            }
        }
    };
}

pub(crate) use define_builtin;

// ============================================================================
// Sub-modules
// ============================================================================

pub mod console;
pub mod conversion;
pub mod introspection;
pub mod sequences;

// ============================================================================
// Main Registration Function
// ============================================================================

/// A namespace holding the default builtin set.
pub fn default_namespace() -> Namespace {
    let mut ns = Namespace::new();
    console::register(&mut ns);
    introspection::register(&mut ns);
    sequences::register(&mut ns);
    conversion::register(&mut ns);
    ns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespace_contents() {
        let ns = default_namespace();
        for name in [
            "print", "type", "whatis", "length", "map", "filter", "Null", "Boolean",
            "Integer", "Real", "Number", "String", "Array", "Map",
        ] {
            assert!(ns.lookup(name).is_some(), "missing builtin {name}");
        }
        assert!(ns.lookup("nope").is_none());
    }

    #[test]
    fn test_builtin_func_type() {
        let ns = default_namespace();
        let print = ns.lookup("print").expect("print registered");
        assert_eq!(print.func_type().to_string(), "Builtin(Any, String) -> Null");
    }
}
