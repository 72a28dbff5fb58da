//! Console output: print
//!
//! `print(expr, end)` renders a value to standard output. Strings appear
//! without quotes; the `end` parameter defaults to a newline.

use super::{define_builtin, Namespace};
use crate::eval::Evaluator;
use crate::token::Pos;
use crate::types::Type;
use crate::value::Value;

define_builtin! {
    print,
    params: [("expr", Type::Any), ("end", Type::String, Value::from("\n"))],
    returns: Type::Null,
    |ev: &mut Evaluator, args: Vec<Value>, _pos: Pos| {
        let text = args.first().map(Value::render_plain).unwrap_or_default();
        let end = args
            .get(1)
            .map(Value::render_plain)
            .unwrap_or_else(|| "\n".to_string());
        ev.write_out(&text);
        ev.write_out(&end);
        Ok(Value::Null)
    }
}

/// Register all console builtins in the namespace
pub fn register(ns: &mut Namespace) {
    register_print(ns);
}
