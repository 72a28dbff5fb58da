// ABOUTME: Pipeline facade running lex → parse → validate → evaluate, with
// global state that persists across runs so a REPL can build programs line
// by line

use crate::builtins::{self, BuiltinDef, Namespace};
use crate::error::PlangError;
use crate::eval::{Evaluator, Output, Signal};
use crate::parser;
use crate::scope::Scope;
use crate::token::Pos;
use crate::types::TypeRegistry;
use crate::validator::Validator;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

pub struct Interpreter {
    namespace: Rc<RefCell<Namespace>>,
    validator: Validator,
    evaluator: Evaluator,
    globals: Rc<Scope>,
    max_errors: usize,
}

impl Interpreter {
    pub fn new() -> Self {
        let namespace = Rc::new(RefCell::new(builtins::default_namespace()));
        let types = Rc::new(RefCell::new(TypeRegistry::new()));
        let validator = Validator::new(
            namespace.clone(),
            types.clone(),
            crate::config::MAX_ERRORS,
        );
        let evaluator = Evaluator::new(namespace.clone(), types.clone());
        Interpreter {
            namespace,
            validator,
            evaluator,
            globals: Scope::new(),
            max_errors: crate::config::MAX_ERRORS,
        }
    }

    /// Exposes a host-defined builtin to programs run by this interpreter.
    /// Must be called before the code referring to it is interpreted.
    pub fn register_builtin(&mut self, def: BuiltinDef) {
        self.namespace.borrow_mut().define(def);
    }

    pub fn set_output(&mut self, output: Output) {
        self.evaluator.set_output(output);
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.evaluator.set_max_depth(max_depth);
    }

    /// Runs a source text through the full pipeline and yields the value of
    /// its last expression.
    pub fn interpret(&mut self, source: &str) -> Result<Value, PlangError> {
        debug!(bytes = source.len(), "interpreting");
        let (mut program, errors) = parser::parse(source, self.max_errors);
        if !errors.is_empty() {
            return Err(PlangError::Compile(errors));
        }
        self.validator
            .validate(&mut program)
            .map_err(PlangError::Compile)?;
        self.evaluator
            .eval_program(&program, &self.globals)
            .map_err(signal_to_error)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn signal_to_error(signal: Signal) -> PlangError {
    match signal {
        Signal::Throw { value, pos } => PlangError::Runtime {
            message: format!("uncaught exception: {}", value.render_plain()),
            pos,
        },
        Signal::Return(_) | Signal::Next | Signal::Last => PlangError::Runtime {
            message: "control-flow signal escaped the program".to_string(),
            pos: Pos::default(),
        },
        Signal::Fatal(message) => PlangError::Runtime {
            message,
            pos: Pos::default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_end_to_end() {
        let mut interp = Interpreter::new();
        let value = interp.interpret("1 + 2 * 3").expect("interpret");
        assert_eq!(value, Value::Integer(7));
    }

    #[test]
    fn test_state_persists_across_runs() {
        let mut interp = Interpreter::new();
        interp.interpret("var x = 10").expect("declare");
        let value = interp.interpret("x * 2").expect("use");
        assert_eq!(value, Value::Integer(20));
    }

    #[test]
    fn test_compile_errors_are_reported() {
        let mut interp = Interpreter::new();
        let err = interp.interpret("y + 1").expect_err("undeclared");
        assert!(err.to_string().contains("has not been declared"));
    }

    #[test]
    fn test_uncaught_throw_is_a_runtime_error() {
        let mut interp = Interpreter::new();
        let err = interp.interpret(r#"throw "boom""#).expect_err("throw");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_host_registered_builtin() {
        use crate::types::Type;

        fn double(
            _ev: &mut Evaluator,
            args: Vec<Value>,
            _pos: Pos,
        ) -> Result<Value, Signal> {
            match args.first() {
                Some(Value::Integer(n)) => Ok(Value::Integer(n * 2)),
                _ => Ok(Value::Null),
            }
        }

        let mut interp = Interpreter::new();
        interp.register_builtin(BuiltinDef {
            name: "double",
            params: vec![crate::builtins::BuiltinParam {
                name: "n",
                ty: Type::Integer,
                default: None,
            }],
            ret: Type::Integer,
            func: double,
            validate: None,
        });
        let value = interp.interpret("double(21)").expect("interpret");
        assert_eq!(value, Value::Integer(42));
    }
}
