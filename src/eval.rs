// ABOUTME: Tree-walking evaluator: dispatches on node opcodes and threads a
// signal protocol for return/next/last/throw through every evaluation

use crate::ast::{BinOp, Catcher, Expr, ExprKind, UnOp};
use crate::builtins::Namespace;
use crate::parser;
use crate::scope::Scope;
use crate::token::Pos;
use crate::types::{check, Type, TypeRegistry};
use crate::validator::Validator;
use crate::value::{Closure, Value};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use tracing::trace;

/// Non-local control flow, threaded as the `Err` side of every evaluation.
/// Loops consume `Next`/`Last`, calls consume `Return`, `try` consumes
/// `Throw`. `Fatal` marks states the validator should have made impossible.
#[derive(Debug)]
pub enum Signal {
    Return(Value),
    Next,
    Last,
    Throw { value: Value, pos: Pos },
    Fatal(String),
}

pub type EvalResult = Result<Value, Signal>;

/// Where `print` and interpolation diagnostics write to.
#[derive(Debug, Clone)]
pub enum Output {
    Stdout,
    Buffer(Rc<RefCell<String>>),
}

pub struct Evaluator {
    namespace: Rc<RefCell<Namespace>>,
    types: Rc<RefCell<TypeRegistry>>,
    output: Output,
    depth: usize,
    max_depth: usize,
}

/// Builds a catchable runtime condition.
pub fn throw(message: impl Into<String>, pos: Pos) -> Signal {
    Signal::Throw {
        value: Value::Str(message.into()),
        pos,
    }
}

impl Evaluator {
    pub fn new(namespace: Rc<RefCell<Namespace>>, types: Rc<RefCell<TypeRegistry>>) -> Self {
        Evaluator {
            namespace,
            types,
            output: Output::Stdout,
            depth: 0,
            max_depth: crate::config::MAX_CALL_DEPTH,
        }
    }

    pub fn set_output(&mut self, output: Output) {
        self.output = output;
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth;
    }

    pub fn write_out(&mut self, text: &str) {
        match &self.output {
            Output::Stdout => {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            Output::Buffer(buf) => buf.borrow_mut().push_str(text),
        }
    }

    /// Evaluates a validated program in the given scope; the program's value
    /// is the value of its last expression.
    pub fn eval_program(&mut self, program: &[Expr], scope: &Rc<Scope>) -> EvalResult {
        let mut last = Value::Null;
        for expr in program {
            last = self.eval(expr, scope)?;
        }
        Ok(last)
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> EvalResult {
        let pos = expr.pos;
        match &expr.kind {
            ExprKind::Null => Ok(Value::Null),
            ExprKind::Boolean(b) => Ok(Value::Boolean(*b)),
            ExprKind::Integer(n) => Ok(Value::Integer(*n)),
            ExprKind::Real(n) => Ok(Value::Real(*n)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Interp(body) => self.eval_interp(body, scope, pos),

            ExprKind::Ident(name) => {
                if let Some(value) = scope.get(name) {
                    return Ok(value);
                }
                if let Some(def) = self.namespace.borrow().lookup(name) {
                    return Ok(Value::Builtin(def));
                }
                Err(Signal::Fatal(format!("internal error: `{name}` is unbound")))
            }

            ExprKind::Group(exprs) => {
                let inner = Scope::child(scope);
                self.eval_body(exprs, &inner)
            }

            ExprKind::ArrayLit(elems) => {
                let mut values = Vec::with_capacity(elems.len());
                for elem in elems {
                    values.push(self.eval(elem, scope)?);
                }
                Ok(Value::array_from(values))
            }

            ExprKind::MapLit(entries) => {
                let map = Value::empty_map();
                if let Value::Map(handle) = &map {
                    for (key, value_expr) in entries {
                        let value = self.eval(value_expr, scope)?;
                        handle.borrow_mut().insert(key.clone(), value);
                    }
                }
                Ok(map)
            }

            ExprKind::Var { name, init, .. } => {
                let value = match init {
                    Some(init) => self.eval(init, scope)?,
                    None => Value::Null,
                };
                scope.declare(name.clone(), value.clone());
                Ok(value)
            }

            // Registered during validation; nothing to do at runtime.
            ExprKind::TypeDecl { .. } => Ok(Value::Null),

            ExprKind::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, scope, pos),

            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                match op {
                    UnOp::Not => Ok(Value::Boolean(!self.truthy_of(&value, pos)?)),
                    UnOp::Neg => match value {
                        Value::Integer(n) => Ok(Value::Integer(-n)),
                        Value::Real(n) => Ok(Value::Real(-n)),
                        other => Err(throw(
                            format!("cannot negate a value of type {}", other.type_of()),
                            pos,
                        )),
                    },
                    UnOp::Pos => match value {
                        Value::Integer(_) | Value::Real(_) => Ok(value),
                        other => Err(throw(
                            format!("cannot apply unary + to a value of type {}", other.type_of()),
                            pos,
                        )),
                    },
                }
            }

            ExprKind::Incr { decr, prefix, target } => {
                let old = self.eval(target, scope)?;
                let delta = if *decr { -1 } else { 1 };
                let new = match &old {
                    Value::Integer(n) => Value::Integer(n + delta),
                    Value::Real(n) => Value::Real(n + delta as f64),
                    other => {
                        return Err(throw(
                            format!("cannot increment a value of type {}", other.type_of()),
                            pos,
                        ))
                    }
                };
                self.assign_into(target, new.clone(), scope)?;
                Ok(if *prefix { new } else { old })
            }

            ExprKind::Assign { target, value } => {
                let value = self.eval(value, scope)?;
                self.assign_into(target, value, scope)
            }

            ExprKind::CompoundAssign { op, target, value } => {
                let current = self.eval(target, scope)?;
                let rhs = self.eval(value, scope)?;
                let new = match op {
                    BinOp::Xor => {
                        let l = self.truthy_of(&current, pos)?;
                        let r = self.truthy_of(&rhs, pos)?;
                        Value::Boolean(l ^ r)
                    }
                    _ => self.arith(*op, current, rhs, pos)?,
                };
                self.assign_into(target, new, scope)
            }

            ExprKind::Conditional { cond, then, otherwise } => {
                let c = self.eval(cond, scope)?;
                if self.truthy_of(&c, pos)? {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }

            ExprKind::Index { target, index } => {
                let container = self.eval(target, scope)?;
                let key = self.eval(index, scope)?;
                self.index_read(&container, &key, pos)
            }

            ExprKind::Range { from, to } => {
                let from = self.eval(from, scope)?;
                let to = self.eval(to, scope)?;
                let a = self.int_of(&from, pos)?;
                let b = self.int_of(&to, pos)?;
                Ok(Value::Range(a, b))
            }

            ExprKind::Dot { .. } => Err(Signal::Fatal(
                "internal error: unresolved dot expression".to_string(),
            )),

            ExprKind::If { cond, then, otherwise } => {
                let c = self.eval(cond, scope)?;
                if self.truthy_of(&c, pos)? {
                    self.eval(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise, scope)
                } else {
                    Ok(Value::Null)
                }
            }

            ExprKind::While { cond, body } => {
                loop {
                    let c = self.eval(cond, scope)?;
                    if !self.truthy_of(&c, pos)? {
                        break;
                    }
                    match self.eval(body, scope) {
                        Ok(_) => {}
                        Err(Signal::Next) => continue,
                        Err(Signal::Last) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Null)
            }

            ExprKind::Try { body, catchers } => match self.eval(body, scope) {
                Err(Signal::Throw { value, pos: throw_pos }) => {
                    self.dispatch_catch(&value, throw_pos, catchers, scope)
                }
                other => other,
            },

            ExprKind::Throw(value) => {
                let value = self.eval(value, scope)?;
                Err(Signal::Throw { value, pos })
            }

            ExprKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value, scope)?,
                    None => Value::Null,
                };
                Err(Signal::Return(value))
            }

            ExprKind::Next => Err(Signal::Next),
            ExprKind::Last => Err(Signal::Last),

            ExprKind::FnDef(def) => {
                let closure = Value::Function(Rc::new(Closure {
                    name: def.name.clone(),
                    params: def.params.clone(),
                    ret: def.ret.clone(),
                    body: def.body.clone(),
                    env: scope.clone(),
                }));
                if let Some(name) = &def.name {
                    scope.declare(name.clone(), closure.clone());
                }
                Ok(closure)
            }

            ExprKind::Call { target, args } => {
                let callee = self.eval(target, scope)?;
                let mut argv = Vec::with_capacity(args.len());
                for arg in args {
                    argv.push(self.eval(arg, scope)?);
                }
                self.call(&callee, argv, scope, pos)
            }

            ExprKind::Exists(target) => self.eval_exists(target, scope, pos),
            ExprKind::Delete(target) => self.eval_delete(target, scope, pos),

            ExprKind::Keys(target) => {
                let value = self.eval(target, scope)?;
                match value {
                    Value::Map(entries) => Ok(Value::array_from(
                        entries.borrow().keys().map(|k| Value::Str(k.clone())),
                    )),
                    other => Err(throw(
                        format!("cannot take keys of {}", other.type_of()),
                        pos,
                    )),
                }
            }

            ExprKind::Values(target) => {
                let value = self.eval(target, scope)?;
                match value {
                    Value::Map(entries) => {
                        Ok(Value::array_from(entries.borrow().values().cloned()))
                    }
                    other => Err(throw(
                        format!("cannot take values of {}", other.type_of()),
                        pos,
                    )),
                }
            }
        }
    }

    fn eval_body(&mut self, exprs: &[Expr], scope: &Rc<Scope>) -> EvalResult {
        let mut last = Value::Null;
        for expr in exprs {
            last = self.eval(expr, scope)?;
        }
        Ok(last)
    }

    // ── operators ──

    fn eval_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        scope: &Rc<Scope>,
        pos: Pos,
    ) -> EvalResult {
        match op {
            // Short-circuit: the right side only runs when the left side
            // has not already decided the result.
            BinOp::And => {
                let l = self.eval(lhs, scope)?;
                if !self.truthy_of(&l, pos)? {
                    return Ok(Value::Boolean(false));
                }
                let r = self.eval(rhs, scope)?;
                Ok(Value::Boolean(self.truthy_of(&r, pos)?))
            }
            BinOp::Or => {
                let l = self.eval(lhs, scope)?;
                if self.truthy_of(&l, pos)? {
                    return Ok(Value::Boolean(true));
                }
                let r = self.eval(rhs, scope)?;
                Ok(Value::Boolean(self.truthy_of(&r, pos)?))
            }
            BinOp::Xor => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                let (l, r) = (self.truthy_of(&l, pos)?, self.truthy_of(&r, pos)?);
                Ok(Value::Boolean(l ^ r))
            }

            BinOp::Cat => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                Ok(Value::Str(format!("{}{}", l.render_plain(), r.render_plain())))
            }

            BinOp::Idx => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                let (hay, needle) = (l.render_plain(), r.render_plain());
                let index = match hay.find(&needle) {
                    Some(byte_pos) => hay[..byte_pos].chars().count() as i64,
                    None => -1,
                };
                Ok(Value::Integer(index))
            }

            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                self.compare(op, &l, &r, pos)
            }

            _ => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                self.arith(op, l, r, pos)
            }
        }
    }

    fn arith(&mut self, op: BinOp, l: Value, r: Value, pos: Pos) -> EvalResult {
        match (&l, &r) {
            (Value::Integer(a), Value::Integer(b)) => {
                let (a, b) = (*a, *b);
                let result = match op {
                    BinOp::Add => a.checked_add(b),
                    BinOp::Sub => a.checked_sub(b),
                    BinOp::Mul => a.checked_mul(b),
                    BinOp::Div => {
                        if b == 0 {
                            return Err(throw("division by zero", pos));
                        }
                        a.checked_div(b)
                    }
                    BinOp::Rem => {
                        if b == 0 {
                            return Err(throw("division by zero", pos));
                        }
                        a.checked_rem(b)
                    }
                    BinOp::Pow => {
                        if b < 0 {
                            return Ok(Value::Real((a as f64).powf(b as f64)));
                        }
                        u32::try_from(b).ok().and_then(|e| a.checked_pow(e))
                    }
                    _ => None,
                };
                match result {
                    Some(n) => Ok(Value::Integer(n)),
                    None => Err(throw(
                        format!("integer overflow in operator {}", op.name()),
                        pos,
                    )),
                }
            }
            _ => {
                let (Some(a), Some(b)) = (number_of(&l), number_of(&r)) else {
                    return Err(throw(
                        format!(
                            "cannot apply binary operator {} (have types {} and {})",
                            op.name(),
                            l.type_of(),
                            r.type_of()
                        ),
                        pos,
                    ));
                };
                let result = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => {
                        if b == 0.0 {
                            return Err(throw("division by zero", pos));
                        }
                        a / b
                    }
                    BinOp::Rem => {
                        if b == 0.0 {
                            return Err(throw("division by zero", pos));
                        }
                        a % b
                    }
                    BinOp::Pow => a.powf(b),
                    _ => {
                        return Err(Signal::Fatal(format!(
                            "internal error: {} is not arithmetic",
                            op.name()
                        )))
                    }
                };
                Ok(Value::Real(result))
            }
        }
    }

    fn compare(&mut self, op: BinOp, l: &Value, r: &Value, pos: Pos) -> EvalResult {
        let result = match op {
            BinOp::Eq => values_equal(l, r),
            BinOp::Ne => !values_equal(l, r),
            _ => match (number_of(l), number_of(r)) {
                (Some(a), Some(b)) => match op {
                    BinOp::Lt => a < b,
                    BinOp::Le => a <= b,
                    BinOp::Gt => a > b,
                    _ => a >= b,
                },
                _ => match (l, r) {
                    (Value::Str(a), Value::Str(b)) => match op {
                        BinOp::Lt => a < b,
                        BinOp::Le => a <= b,
                        BinOp::Gt => a > b,
                        _ => a >= b,
                    },
                    _ => {
                        return Err(throw(
                            format!(
                                "cannot apply binary operator {} (have types {} and {})",
                                op.name(),
                                l.type_of(),
                                r.type_of()
                            ),
                            pos,
                        ))
                    }
                },
            },
        };
        Ok(Value::Boolean(result))
    }

    pub fn truthy_of(&self, value: &Value, pos: Pos) -> Result<bool, Signal> {
        value.truthy().ok_or_else(|| {
            throw(
                format!("cannot use {} in a boolean context", value.type_of()),
                pos,
            )
        })
    }

    fn int_of(&self, value: &Value, pos: Pos) -> Result<i64, Signal> {
        match value {
            Value::Integer(n) => Ok(*n),
            other => Err(throw(
                format!("index must be Integer, not {}", other.type_of()),
                pos,
            )),
        }
    }

    // ── access ──

    fn index_read(&mut self, container: &Value, key: &Value, pos: Pos) -> EvalResult {
        match (container, key) {
            (Value::Map(entries), key) => {
                let key = match key {
                    Value::Str(s) => s.clone(),
                    other => {
                        return Err(throw(
                            format!("map keys are String, not {}", other.type_of()),
                            pos,
                        ))
                    }
                };
                // A missing key reads as null, never an error.
                Ok(entries.borrow().get(&key).cloned().unwrap_or(Value::Null))
            }
            (Value::Array(elems), Value::Integer(i)) => {
                let elems = elems.borrow();
                Ok(resolve_index(*i, elems.len())
                    .and_then(|idx| elems.get(idx).cloned())
                    .unwrap_or(Value::Null))
            }
            (Value::Array(elems), Value::Range(a, b)) => {
                let elems = elems.borrow();
                let (from, to) = clamp_range(*a, *b, elems.len());
                Ok(Value::array_from(elems[from..to].iter().cloned()))
            }
            (Value::Str(s), Value::Integer(i)) => {
                let chars: Vec<char> = s.chars().collect();
                Ok(resolve_index(*i, chars.len())
                    .and_then(|idx| chars.get(idx).copied())
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or(Value::Null))
            }
            (Value::Str(s), Value::Range(a, b)) => {
                let chars: Vec<char> = s.chars().collect();
                let (from, to) = clamp_range(*a, *b, chars.len());
                Ok(Value::Str(chars[from..to].iter().collect()))
            }
            (container, key) => Err(throw(
                format!(
                    "cannot index {} with {}",
                    container.type_of(),
                    key.type_of()
                ),
                pos,
            )),
        }
    }

    /// Assigns through an lvalue expression and yields the expression's
    /// resulting value. For string slots the result is the whole new string.
    fn assign_into(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> EvalResult {
        let pos = target.pos;
        match &target.kind {
            ExprKind::Ident(name) => {
                if scope.set(name, value.clone()) {
                    Ok(value)
                } else {
                    Err(Signal::Fatal(format!("internal error: `{name}` is unbound")))
                }
            }
            ExprKind::Index { target: inner, index } => {
                let container = self.eval(inner, scope)?;
                let key = self.eval(index, scope)?;
                match container {
                    Value::Map(entries) => {
                        let key = match key {
                            Value::Str(s) => s,
                            other => {
                                return Err(throw(
                                    format!("map keys are String, not {}", other.type_of()),
                                    pos,
                                ))
                            }
                        };
                        // Assigning a missing key extends the map.
                        entries.borrow_mut().insert(key, value.clone());
                        Ok(value)
                    }
                    Value::Array(elems) => {
                        let i = self.int_of(&key, pos)?;
                        let mut elems = elems.borrow_mut();
                        let len = elems.len();
                        match resolve_index(i, len) {
                            Some(idx) if idx < len => {
                                elems[idx] = value.clone();
                                Ok(value)
                            }
                            Some(idx) if idx == len => {
                                elems.push(value.clone());
                                Ok(value)
                            }
                            _ => Err(throw(format!("index {i} out of bounds"), pos)),
                        }
                    }
                    Value::Str(s) => {
                        let replacement = match &value {
                            Value::Str(r) => r.clone(),
                            other => other.render_plain(),
                        };
                        let chars: Vec<char> = s.chars().collect();
                        let (from, to) = match key {
                            Value::Integer(i) => match resolve_index(i, chars.len()) {
                                Some(idx) if idx < chars.len() => (idx, idx + 1),
                                _ => {
                                    return Err(throw(
                                        "index out of bounds in string assignment",
                                        pos,
                                    ))
                                }
                            },
                            Value::Range(a, b) => clamp_range(a, b, chars.len()),
                            other => {
                                return Err(throw(
                                    format!(
                                        "string index must be Integer or range, not {}",
                                        other.type_of()
                                    ),
                                    pos,
                                ))
                            }
                        };
                        let mut new_s: String = chars[..from].iter().collect();
                        new_s.push_str(&replacement);
                        new_s.extend(chars[to..].iter());
                        let result = Value::Str(new_s);
                        // Write back when the string lives somewhere.
                        if inner.kind.is_lvalue() {
                            self.assign_into(inner, result.clone(), scope)?;
                        }
                        Ok(result)
                    }
                    other => Err(throw(
                        format!("cannot assign into a value of type {}", other.type_of()),
                        pos,
                    )),
                }
            }
            _ => Err(Signal::Fatal(
                "internal error: assignment to a non-place expression".to_string(),
            )),
        }
    }

    fn eval_exists(&mut self, target: &Expr, scope: &Rc<Scope>, pos: Pos) -> EvalResult {
        match &target.kind {
            ExprKind::Index { target: inner, index } => {
                let container = self.eval(inner, scope)?;
                let key = self.eval(index, scope)?;
                let found = match (&container, &key) {
                    (Value::Map(entries), Value::Str(k)) => entries.borrow().contains_key(k),
                    (Value::Array(elems), Value::Integer(i)) => {
                        resolve_index(*i, elems.borrow().len())
                            .map(|idx| idx < elems.borrow().len())
                            .unwrap_or(false)
                    }
                    _ => false,
                };
                Ok(Value::Boolean(found))
            }
            ExprKind::Ident(name) => Ok(Value::Boolean(
                scope.get(name).is_some() || self.namespace.borrow().lookup(name).is_some(),
            )),
            _ => Err(throw("`exists` needs a key access or a variable", pos)),
        }
    }

    fn eval_delete(&mut self, target: &Expr, scope: &Rc<Scope>, pos: Pos) -> EvalResult {
        match &target.kind {
            // Deleting a key yields the old value, or null if absent.
            ExprKind::Index { target: inner, index } => {
                let container = self.eval(inner, scope)?;
                let key = self.eval(index, scope)?;
                match (&container, &key) {
                    (Value::Map(entries), Value::Str(k)) => Ok(entries
                        .borrow_mut()
                        .shift_remove(k)
                        .unwrap_or(Value::Null)),
                    _ => Err(throw(
                        format!(
                            "cannot delete {} from {}",
                            key.type_of(),
                            container.type_of()
                        ),
                        pos,
                    )),
                }
            }
            // Deleting a variable removes the binding and yields its value;
            // deleting a whole map empties it and yields the map.
            ExprKind::Ident(name) => {
                if let Some(Value::Map(entries)) = scope.get(name) {
                    entries.borrow_mut().clear();
                    return Ok(Value::Map(entries));
                }
                Ok(scope.remove(name).unwrap_or(Value::Null))
            }
            _ => {
                let value = self.eval(target, scope)?;
                match value {
                    Value::Map(entries) => {
                        entries.borrow_mut().clear();
                        Ok(Value::Map(entries))
                    }
                    other => Err(throw(
                        format!("cannot delete a value of type {}", other.type_of()),
                        pos,
                    )),
                }
            }
        }
    }

    fn dispatch_catch(
        &mut self,
        thrown: &Value,
        throw_pos: Pos,
        catchers: &[Catcher],
        scope: &Rc<Scope>,
    ) -> EvalResult {
        for catcher in catchers {
            let matches = match &catcher.cond {
                None => true,
                Some(cond) => {
                    let cv = self.eval(cond, scope)?;
                    cv.render_plain() == thrown.render_plain()
                }
            };
            if matches {
                return self.eval(&catcher.body, scope);
            }
        }
        Err(Signal::Throw {
            value: thrown.clone(),
            pos: throw_pos,
        })
    }

    // ── calls ──

    /// Invokes a callable value with already-evaluated arguments. Builtins
    /// use this to apply user callbacks.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>, pos: Pos) -> EvalResult {
        match callee {
            Value::Function(c) => {
                let env = c.env.clone();
                self.call_function(c, args, &env, pos)
            }
            _ => self.call(callee, args, &Scope::new(), pos),
        }
    }

    fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        caller: &Rc<Scope>,
        pos: Pos,
    ) -> EvalResult {
        match callee {
            Value::Function(c) => self.call_function(c, args, caller, pos),
            Value::Builtin(def) => {
                if self.depth >= self.max_depth {
                    return Err(throw("maximum call depth exceeded", pos));
                }
                self.depth += 1;
                let result = (def.func)(self, args, pos);
                self.depth -= 1;
                result
            }
            other => Err(throw(
                format!("cannot call a value of type {}", other.type_of()),
                pos,
            )),
        }
    }

    fn call_function(
        &mut self,
        c: &Rc<Closure>,
        mut args: Vec<Value>,
        caller: &Rc<Scope>,
        pos: Pos,
    ) -> EvalResult {
        if self.depth >= self.max_depth {
            return Err(throw("maximum call depth exceeded", pos));
        }
        if args.len() > c.params.len() {
            return Err(throw(
                format!(
                    "extra argument in call to `{}`",
                    c.name.as_deref().unwrap_or("fn")
                ),
                pos,
            ));
        }

        let fn_scope = Scope::call(caller, &c.env);

        // Bind given arguments, then fill trailing defaults.
        let given = args.len();
        for (param, arg) in c.params.iter().zip(args.drain(..)) {
            fn_scope.declare(param.name.clone(), arg);
        }
        for param in c.params.iter().skip(given) {
            match &param.default {
                Some(default) => {
                    let value = self.eval(default, &fn_scope)?;
                    fn_scope.declare(param.name.clone(), value);
                }
                None => {
                    return Err(throw(
                        format!(
                            "missing argument `{}` in call to `{}`",
                            param.name,
                            c.name.as_deref().unwrap_or("fn")
                        ),
                        pos,
                    ))
                }
            }
        }

        trace!(name = c.name.as_deref().unwrap_or("fn"), depth = self.depth, "call");
        self.depth += 1;
        let result = self.eval_body(&c.body, &fn_scope);
        self.depth -= 1;

        let value = match result {
            Ok(value) => value,
            Err(Signal::Return(value)) => value,
            Err(other) => return Err(other),
        };
        self.coerce_return(value, &c.ret, pos)
    }

    /// Step 5 of the call protocol: widen into the declared return type or
    /// report the mismatch.
    fn coerce_return(&self, value: Value, ret: &Type, pos: Pos) -> EvalResult {
        if let (Type::Real, Value::Integer(n)) = (ret.resolve(), &value) {
            return Ok(Value::Real(*n as f64));
        }
        if check(ret, &value.type_of()) {
            return Ok(value);
        }
        Err(throw(
            format!(
                "cannot return {} from a function declared to return {ret}",
                value.type_of()
            ),
            pos,
        ))
    }

    // ── string interpolation ──

    /// Expands a `$"..."` body: escapes are decoded, and each `{...}` span
    /// is lexed, parsed, validated against the current scope, evaluated,
    /// and rendered in place.
    fn eval_interp(&mut self, body: &str, scope: &Rc<Scope>, pos: Pos) -> EvalResult {
        let mut out = String::new();
        let mut chars = body.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    if let Some(esc) = chars.next() {
                        out.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                    }
                }
                '{' => {
                    let mut span = String::new();
                    let mut depth = 1usize;
                    for inner in chars.by_ref() {
                        match inner {
                            '{' => {
                                depth += 1;
                                span.push(inner);
                            }
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                span.push(inner);
                            }
                            _ => span.push(inner),
                        }
                    }
                    if depth != 0 {
                        return Err(throw("unbalanced braces in interpolation", pos));
                    }
                    let value = self.eval_span(&span, scope, pos)?;
                    out.push_str(&value.render_plain());
                }
                _ => out.push(ch),
            }
        }
        Ok(Value::Str(out))
    }

    /// Runs one interpolation span through the whole pipeline in the
    /// current scope.
    fn eval_span(&mut self, source: &str, scope: &Rc<Scope>, pos: Pos) -> EvalResult {
        let (mut program, errors) = parser::parse(source, 1);
        if let Some(err) = errors.into_iter().next() {
            return Err(throw(
                format!("bad interpolation `{{{source}}}`: {}", err.message),
                pos,
            ));
        }

        let mut validator = Validator::new(self.namespace.clone(), self.types.clone(), 1);
        for (name, value) in scope.flatten() {
            validator.bind(&name, value.type_of());
        }
        if let Err(errors) = validator.validate(&mut program) {
            let message = errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "invalid expression".to_string());
            return Err(throw(
                format!("bad interpolation `{{{source}}}`: {message}"),
                pos,
            ));
        }

        self.eval_program(&program, scope)
    }

    /// Parses and evaluates a source fragment that should denote a literal
    /// value; used by the `Array` and `Map` conversions.
    pub fn eval_literal_source(&mut self, source: &str, pos: Pos) -> EvalResult {
        let (program, errors) = parser::parse(source, 1);
        if !errors.is_empty() || program.len() != 1 {
            return Err(throw(format!("cannot parse `{source}` as a literal"), pos));
        }
        let fresh = Scope::new();
        self.eval_program(&program, &fresh)
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(n) => Some(*n as f64),
        Value::Real(n) => Some(*n),
        _ => None,
    }
}

/// Equality with numeric promotion: 1 == 1.0.
fn values_equal(l: &Value, r: &Value) -> bool {
    match (number_of(l), number_of(r)) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

/// Maps a possibly-negative index onto `0..len`; negative counts from the
/// end. Returns None when the result would still be negative.
fn resolve_index(i: i64, len: usize) -> Option<usize> {
    if i >= 0 {
        Some(i as usize)
    } else {
        let from_end = len as i64 + i;
        if from_end >= 0 {
            Some(from_end as usize)
        } else {
            None
        }
    }
}

/// Resolves an inclusive `a..b` onto a clamped half-open `from..to`.
fn clamp_range(a: i64, b: i64, len: usize) -> (usize, usize) {
    let from = resolve_index(a, len).unwrap_or(0).min(len);
    let to = resolve_index(b, len)
        .map(|idx| idx + 1)
        .unwrap_or(0)
        .min(len);
    if from > to {
        (from, from)
    } else {
        (from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(0, 3), Some(0));
        assert_eq!(resolve_index(2, 3), Some(2));
        assert_eq!(resolve_index(-1, 3), Some(2));
        assert_eq!(resolve_index(-3, 3), Some(0));
        assert_eq!(resolve_index(-4, 3), None);
    }

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(1, 3, 9), (1, 4));
        assert_eq!(clamp_range(5, 7, 9), (5, 8));
        assert_eq!(clamp_range(0, 100, 3), (0, 3));
        assert_eq!(clamp_range(-2, -1, 4), (2, 4));
        assert_eq!(clamp_range(3, 1, 4), (3, 3));
    }
}
