// ABOUTME: Runtime lexical scopes with parent and closure chains

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A lexical environment. Lookup order is locals, then the closure chain
/// (the scope a function captured at definition), then the parent chain
/// (the caller side); builtins are consulted by the evaluator last.
#[derive(Debug)]
pub struct Scope {
    locals: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
    closure: Option<Rc<Scope>>,
}

impl Scope {
    /// Creates a new global scope with no parent.
    pub fn new() -> Rc<Self> {
        Rc::new(Scope {
            locals: RefCell::new(HashMap::new()),
            parent: None,
            closure: None,
        })
    }

    /// Creates a child scope for a statement group.
    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Scope {
            locals: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            closure: None,
        })
    }

    /// Creates the scope of a function call: the closure chain points at
    /// the function's defining scope, the parent chain at the caller.
    pub fn call(parent: &Rc<Scope>, closure: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Scope {
            locals: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
            closure: Some(closure.clone()),
        })
    }

    /// Declares a binding in THIS scope (never walks the chains).
    pub fn declare(&self, name: impl Into<String>, value: Value) {
        self.locals.borrow_mut().insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.locals.borrow().get(name) {
            return Some(value.clone());
        }
        if let Some(ref closure) = self.closure {
            if let Some(value) = closure.get(name) {
                return Some(value);
            }
        }
        if let Some(ref parent) = self.parent {
            return parent.get(name);
        }
        None
    }

    /// Updates an existing binding wherever it lives. Returns false when the
    /// name is not bound anywhere in reach.
    pub fn set(&self, name: &str, value: Value) -> bool {
        if self.locals.borrow().contains_key(name) {
            self.locals.borrow_mut().insert(name.to_string(), value);
            return true;
        }
        if let Some(ref closure) = self.closure {
            if closure.set(name, value.clone()) {
                return true;
            }
        }
        if let Some(ref parent) = self.parent {
            return parent.set(name, value);
        }
        false
    }

    /// Removes a binding from the innermost scope holding it, returning the
    /// old value.
    pub fn remove(&self, name: &str) -> Option<Value> {
        if let Some(old) = self.locals.borrow_mut().remove(name) {
            return Some(old);
        }
        if let Some(ref closure) = self.closure {
            if let Some(old) = closure.remove(name) {
                return Some(old);
            }
        }
        if let Some(ref parent) = self.parent {
            return parent.remove(name);
        }
        None
    }

    /// Every visible binding, innermost first. Shadowed names keep the
    /// innermost value. Used to seed validation of interpolated spans.
    pub fn flatten(&self) -> Vec<(String, Value)> {
        let mut seen = Vec::new();
        self.collect(&mut seen);
        seen
    }

    fn collect(&self, out: &mut Vec<(String, Value)>) {
        for (name, value) in self.locals.borrow().iter() {
            if !out.iter().any(|(n, _)| n == name) {
                out.push((name.clone(), value.clone()));
            }
        }
        if let Some(ref closure) = self.closure {
            closure.collect(out);
        }
        if let Some(ref parent) = self.parent {
            parent.collect(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_get() {
        let scope = Scope::new();
        scope.declare("x", Value::Integer(42));
        assert_eq!(scope.get("x"), Some(Value::Integer(42)));
        assert_eq!(scope.get("y"), None);
    }

    #[test]
    fn test_shadowing_and_parent_lookup() {
        let parent = Scope::new();
        parent.declare("x", Value::Integer(1));
        parent.declare("y", Value::Integer(2));

        let child = Scope::child(&parent);
        child.declare("x", Value::Integer(10));

        assert_eq!(child.get("x"), Some(Value::Integer(10)));
        assert_eq!(child.get("y"), Some(Value::Integer(2)));
    }

    #[test]
    fn test_set_walks_to_owner() {
        let parent = Scope::new();
        parent.declare("x", Value::Integer(1));
        let child = Scope::child(&parent);

        assert!(child.set("x", Value::Integer(5)));
        assert_eq!(parent.get("x"), Some(Value::Integer(5)));
        assert!(!child.set("missing", Value::Null));
    }

    #[test]
    fn test_closure_chain_precedes_parent_chain() {
        let defining = Scope::new();
        defining.declare("x", Value::Integer(1));

        let caller = Scope::new();
        caller.declare("x", Value::Integer(99));

        let call = Scope::call(&caller, &defining);
        assert_eq!(call.get("x"), Some(Value::Integer(1)));

        // Mutation through the call scope reaches the defining scope.
        assert!(call.set("x", Value::Integer(2)));
        assert_eq!(defining.get("x"), Some(Value::Integer(2)));
        assert_eq!(caller.get("x"), Some(Value::Integer(99)));
    }

    #[test]
    fn test_remove_returns_old_value() {
        let scope = Scope::new();
        scope.declare("x", Value::Integer(7));
        assert_eq!(scope.remove("x"), Some(Value::Integer(7)));
        assert_eq!(scope.get("x"), None);
        assert_eq!(scope.remove("x"), None);
    }
}
