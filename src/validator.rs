// ABOUTME: Static validation: type checking, bidirectional inference with
// narrowing, and in-place desugaring so the evaluator sees a simpler tree

use crate::ast::{BinOp, Expr, ExprKind, FnDef, Param, UnOp};
use crate::builtins::Namespace;
use crate::error::{CompileError, ErrorKind};
use crate::token::Pos;
use crate::types::{check, is_equal, promote, unite, FnKind, MapField, Type, TypeAlias, TypeRegistry};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// What the validator knows about one variable: its declared guard, the
/// narrowed working type, and every type observed flowing into it.
#[derive(Debug, Clone)]
struct VarInfo {
    guard: Type,
    inferred: Type,
    types_seen: Vec<Type>,
    /// Full signature when the variable holds a statically-known function;
    /// needed to resolve named arguments and fill parameter defaults.
    sig: Option<Rc<Signature>>,
}

#[derive(Debug)]
struct Signature {
    name: String,
    params: Vec<Param>,
    ret: Type,
}

#[derive(Debug, Default)]
struct Frame {
    vars: HashMap<String, VarInfo>,
}

/// Per-function context while its body is being validated.
struct FnCtx {
    declared_ret: Type,
    returns: Vec<Type>,
    saved_loop_depth: u32,
}

pub struct Validator {
    namespace: Rc<RefCell<Namespace>>,
    types: Rc<RefCell<TypeRegistry>>,
    frames: Vec<Frame>,
    fn_stack: Vec<FnCtx>,
    loop_depth: u32,
    errors: Vec<CompileError>,
    max_errors: usize,
}

impl Validator {
    pub fn new(
        namespace: Rc<RefCell<Namespace>>,
        types: Rc<RefCell<TypeRegistry>>,
        max_errors: usize,
    ) -> Self {
        Validator {
            namespace,
            types,
            frames: vec![Frame::default()],
            fn_stack: Vec::new(),
            loop_depth: 0,
            errors: Vec::new(),
            max_errors,
        }
    }

    /// Seeds the global frame with externally-known bindings. Used when an
    /// interpolated span is validated against the current runtime scope.
    pub fn bind(&mut self, name: &str, ty: Type) {
        self.frames[0].vars.insert(
            name.to_string(),
            VarInfo {
                guard: ty.clone(),
                inferred: ty,
                types_seen: Vec::new(),
                sig: None,
            },
        );
    }

    /// Checks and rewrites a program in place. Global declarations persist
    /// across calls so a REPL can build state line by line.
    pub fn validate(&mut self, program: &mut [Expr]) -> Result<(), Vec<CompileError>> {
        self.errors.clear();
        self.frames.truncate(1);
        self.fn_stack.clear();
        self.loop_depth = 0;
        for expr in program.iter_mut() {
            self.infer(expr);
            if self.errors.len() >= self.max_errors {
                break;
            }
        }
        trace!(errors = self.errors.len(), "validated program");
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    // ── bookkeeping ──

    fn error(&mut self, kind: ErrorKind, message: impl Into<String>, pos: Pos) {
        if self.errors.len() < self.max_errors {
            self.errors.push(CompileError::new(kind, message, pos));
        }
    }

    fn lookup(&self, name: &str) -> Option<&VarInfo> {
        self.frames.iter().rev().find_map(|f| f.vars.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut VarInfo> {
        self.frames.iter_mut().rev().find_map(|f| f.vars.get_mut(name))
    }

    fn declare(&mut self, name: &str, info: VarInfo, pos: Pos) {
        if self.namespace.borrow().lookup(name).is_some() {
            self.error(
                ErrorKind::Redeclaration,
                format!("cannot override builtin `{name}`"),
                pos,
            );
            return;
        }
        let frame = self.frames.last_mut().expect("frame stack never empty");
        if frame.vars.contains_key(name) {
            self.error(
                ErrorKind::Redeclaration,
                format!("`{name}` is already declared in this scope"),
                pos,
            );
            return;
        }
        frame.vars.insert(name.to_string(), info);
    }

    /// Replaces parser-produced `Named` types with their registered aliases.
    fn resolve_type(&mut self, ty: &Type, pos: Pos) -> Type {
        match ty {
            Type::Named(name) => {
                let found = self.types.borrow().lookup(name);
                match found {
                    Some(alias) => Type::Alias(alias),
                    None => {
                        self.error(
                            ErrorKind::UnknownKeyword,
                            format!("unknown type `{name}`"),
                            pos,
                        );
                        Type::Any
                    }
                }
            }
            Type::ArrayOf(elem) => Type::ArrayOf(Box::new(self.resolve_type(elem, pos))),
            Type::MapOf(fields) => Type::MapOf(
                fields
                    .iter()
                    .map(|f| MapField {
                        key: f.key.clone(),
                        ty: self.resolve_type(&f.ty, pos),
                    })
                    .collect(),
            ),
            Type::Func { kind, params, ret } => Type::Func {
                kind: *kind,
                params: params.iter().map(|p| self.resolve_type(p, pos)).collect(),
                ret: Box::new(self.resolve_type(ret, pos)),
            },
            Type::Union(members) => {
                unite(&members.iter().map(|m| self.resolve_type(m, pos)).collect::<Vec<_>>())
            }
            other => other.clone(),
        }
    }

    /// Records an observed concrete type for an `Any`-guarded identifier.
    fn narrow(&mut self, operand: &Expr, to: &Type) {
        if matches!(to, Type::Any) {
            return;
        }
        if let ExprKind::Ident(name) = &operand.kind {
            if let Some(info) = self.lookup_mut(name) {
                if matches!(info.guard, Type::Any) {
                    info.types_seen.push(to.clone());
                    info.inferred = unite(&info.types_seen);
                }
            }
        }
    }

    /// Guard compatibility as the validator applies it: a value whose
    /// static type is Any passes now and is enforced at runtime instead.
    fn accepts(guard: &Type, value: &Type) -> bool {
        matches!(value.resolve(), Type::Any) || check(guard, value)
    }

    fn truthy_eligible(ty: &Type) -> bool {
        match ty.resolve() {
            Type::Any | Type::Boolean | Type::String => true,
            Type::Union(members) => members.iter().all(Self::truthy_eligible),
            other => other.is_arithmetic(),
        }
    }

    fn require_truthy(&mut self, ty: &Type, pos: Pos) {
        if !Self::truthy_eligible(ty) {
            self.error(
                ErrorKind::TypeMismatch,
                format!("cannot use {ty} in a boolean context"),
                pos,
            );
        }
    }

    // ── the walk ──

    /// Infers the type of an expression, recording errors and performing
    /// the desugaring rewrites as it goes.
    fn infer(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        match &mut expr.kind {
            ExprKind::Null => Type::Null,
            ExprKind::Boolean(_) => Type::Boolean,
            ExprKind::Integer(_) => Type::Integer,
            ExprKind::Real(_) => Type::Real,
            ExprKind::Str(_) => Type::String,
            // Interpolation spans are parsed and checked when evaluated.
            ExprKind::Interp(_) => Type::String,

            ExprKind::Ident(name) => {
                let name = name.clone();
                if let Some(info) = self.lookup(&name) {
                    return info.inferred.clone();
                }
                if let Some(def) = self.namespace.borrow().lookup(&name) {
                    return def.func_type();
                }
                self.error(
                    ErrorKind::Undeclared,
                    format!("`{name}` has not been declared"),
                    pos,
                );
                Type::Any
            }

            ExprKind::Group(_) => {
                self.frames.push(Frame::default());
                let ty = self.infer_body(expr);
                self.frames.pop();
                ty
            }

            ExprKind::ArrayLit(elems) => {
                let mut elems = std::mem::take(elems);
                let tys: Vec<Type> = elems.iter_mut().map(|e| self.infer(e)).collect();
                if let ExprKind::ArrayLit(slot) = &mut expr.kind {
                    *slot = elems;
                }
                Type::ArrayOf(Box::new(unite(&tys)))
            }

            ExprKind::MapLit(entries) => {
                let mut entries = std::mem::take(entries);
                let mut fields: Vec<MapField> = Vec::new();
                for (key, value) in entries.iter_mut() {
                    let ty = self.infer(value);
                    if let Some(existing) = fields.iter_mut().find(|f| f.key == *key) {
                        existing.ty = ty;
                    } else {
                        fields.push(MapField { key: key.clone(), ty });
                    }
                }
                if let ExprKind::MapLit(slot) = &mut expr.kind {
                    *slot = entries;
                }
                Type::MapOf(fields)
            }

            ExprKind::Var { .. } => self.infer_var(expr),
            ExprKind::TypeDecl { .. } => self.infer_type_decl(expr),
            ExprKind::Binary { .. } => self.infer_binary(expr),
            ExprKind::Unary { .. } => self.infer_unary(expr),
            ExprKind::Incr { .. } => self.infer_incr(expr),
            ExprKind::Assign { .. } => self.infer_assign(expr),
            ExprKind::CompoundAssign { .. } => self.infer_compound_assign(expr),
            ExprKind::Conditional { .. } => self.infer_conditional(expr),
            ExprKind::Index { .. } => self.infer_index(expr),
            ExprKind::Dot { .. } => self.infer_dot(expr),
            ExprKind::If { .. } => self.infer_if(expr),
            ExprKind::While { .. } => self.infer_while(expr),
            ExprKind::Try { .. } => self.infer_try(expr),
            ExprKind::FnDef(_) => self.infer_fn(expr),
            ExprKind::Call { .. } => self.infer_call(expr),

            ExprKind::Range { .. } => {
                self.error(
                    ErrorKind::InvalidContext,
                    "a range may only appear inside an index",
                    pos,
                );
                Type::Any
            }

            ExprKind::Throw(value) => {
                let mut value = std::mem::replace(value.as_mut(), Expr::new(ExprKind::Null, pos));
                let vt = self.infer(&mut value);
                if let ExprKind::Throw(slot) = &mut expr.kind {
                    **slot = value;
                }
                if !matches!(vt.resolve(), Type::Any | Type::String) {
                    self.error(
                        ErrorKind::TypeMismatch,
                        format!("cannot throw {vt} (a throw carries a String)"),
                        pos,
                    );
                }
                Type::Null
            }

            ExprKind::Return(value) => {
                let mut taken = value.take();
                let vt = match taken.as_deref_mut() {
                    Some(inner) => self.infer(inner),
                    None => Type::Null,
                };
                if let ExprKind::Return(slot) = &mut expr.kind {
                    *slot = taken;
                }
                match self.fn_stack.last_mut() {
                    None => {
                        self.error(
                            ErrorKind::InvalidContext,
                            "`return` outside of a function",
                            pos,
                        );
                    }
                    Some(ctx) => {
                        let declared = ctx.declared_ret.clone();
                        ctx.returns.push(vt.clone());
                        if !Self::accepts(&declared, &vt) {
                            self.error(
                                ErrorKind::TypeMismatch,
                                format!(
                                    "cannot return {vt} from a function declared to return {declared}"
                                ),
                                pos,
                            );
                        }
                    }
                }
                Type::Null
            }

            ExprKind::Next => {
                if self.loop_depth == 0 {
                    self.error(ErrorKind::InvalidContext, "`next` outside of a loop", pos);
                }
                Type::Null
            }
            ExprKind::Last => {
                if self.loop_depth == 0 {
                    self.error(ErrorKind::InvalidContext, "`last` outside of a loop", pos);
                }
                Type::Null
            }

            ExprKind::Exists(target) => {
                let mut target =
                    std::mem::replace(target.as_mut(), Expr::new(ExprKind::Null, pos));
                if !matches!(target.kind, ExprKind::Index { .. } | ExprKind::Ident(_)) {
                    self.error(
                        ErrorKind::BadOperatorOperand,
                        "`exists` needs a key access or a variable",
                        pos,
                    );
                }
                self.infer_exists_target(&mut target);
                if let ExprKind::Exists(slot) = &mut expr.kind {
                    **slot = target;
                }
                Type::Boolean
            }

            ExprKind::Delete(target) => {
                let mut target =
                    std::mem::replace(target.as_mut(), Expr::new(ExprKind::Null, pos));
                let ty = match &target.kind {
                    ExprKind::Index { .. } => {
                        self.infer(&mut target);
                        Type::Any
                    }
                    ExprKind::Ident(_) => {
                        let t = self.infer(&mut target);
                        // Deleting a whole map empties and returns it.
                        if matches!(t.resolve(), Type::Map | Type::MapOf(_)) {
                            t
                        } else {
                            Type::Any
                        }
                    }
                    _ => {
                        let t = self.infer(&mut target);
                        if !matches!(t.resolve(), Type::Map | Type::MapOf(_) | Type::Any) {
                            self.error(
                                ErrorKind::BadOperatorOperand,
                                "`delete` needs a key access, a variable, or a map",
                                pos,
                            );
                        }
                        t
                    }
                };
                if let ExprKind::Delete(slot) = &mut expr.kind {
                    **slot = target;
                }
                ty
            }

            ExprKind::Keys(target) => {
                let mut target =
                    std::mem::replace(target.as_mut(), Expr::new(ExprKind::Null, pos));
                let tt = self.infer(&mut target);
                if let ExprKind::Keys(slot) = &mut expr.kind {
                    **slot = target;
                }
                if !matches!(tt.resolve(), Type::Map | Type::MapOf(_) | Type::Any) {
                    self.error(
                        ErrorKind::BadOperatorOperand,
                        format!("cannot take keys of {tt}"),
                        pos,
                    );
                }
                Type::ArrayOf(Box::new(Type::String))
            }

            ExprKind::Values(target) => {
                let mut target =
                    std::mem::replace(target.as_mut(), Expr::new(ExprKind::Null, pos));
                let tt = self.infer(&mut target);
                if let ExprKind::Values(slot) = &mut expr.kind {
                    **slot = target;
                }
                match tt.resolve() {
                    Type::MapOf(fields) => {
                        let tys: Vec<Type> = fields.iter().map(|f| f.ty.clone()).collect();
                        Type::ArrayOf(Box::new(unite(&tys)))
                    }
                    Type::Map | Type::Any => Type::ArrayOf(Box::new(Type::Any)),
                    other => {
                        self.error(
                            ErrorKind::BadOperatorOperand,
                            format!("cannot take values of {other}"),
                            pos,
                        );
                        Type::ArrayOf(Box::new(Type::Any))
                    }
                }
            }
        }
    }

    /// Infers a group body in the current frame; the group's type is the
    /// type of its last expression.
    fn infer_body(&mut self, expr: &mut Expr) -> Type {
        if let ExprKind::Group(exprs) = &mut expr.kind {
            let mut exprs = std::mem::take(exprs);
            let mut last = Type::Null;
            for e in exprs.iter_mut() {
                last = self.infer(e);
            }
            if let ExprKind::Group(slot) = &mut expr.kind {
                *slot = exprs;
            }
            last
        } else {
            self.infer(expr)
        }
    }

    fn infer_exists_target(&mut self, target: &mut Expr) {
        // `exists m["k"]` must not error when the key is absent; only the
        // container and key expressions are checked.
        if let ExprKind::Index { target: inner, index } = &mut target.kind {
            let mut inner_e =
                std::mem::replace(inner.as_mut(), Expr::new(ExprKind::Null, target.pos));
            let mut index_e =
                std::mem::replace(index.as_mut(), Expr::new(ExprKind::Null, target.pos));
            self.infer(&mut inner_e);
            if !matches!(index_e.kind, ExprKind::Range { .. }) {
                self.infer(&mut index_e);
            }
            if let ExprKind::Index { target: inner, index } = &mut target.kind {
                **inner = inner_e;
                **index = index_e;
            }
        } else if matches!(target.kind, ExprKind::Ident(_)) {
            // A bare identifier: presence is checked at runtime, so an
            // undeclared name is not an error here.
        }
    }

    fn infer_var(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (name, declared, mut init) = match &mut expr.kind {
            ExprKind::Var { name, ty, init } => (name.clone(), ty.clone(), init.take()),
            _ => return Type::Any,
        };
        let declared = self.resolve_type(&declared, pos);

        // An omitted initializer becomes the type's default value.
        if init.is_none() {
            init = Some(Box::new(value_to_expr(&declared.default_value(), pos)));
        }
        let mut init_expr = init.take().map(|b| *b).unwrap_or(Expr::new(ExprKind::Null, pos));
        let it = self.infer(&mut init_expr);

        let explicit = !matches!(declared, Type::Any);
        if explicit && !Self::accepts(&declared, &it) {
            self.error(
                ErrorKind::TypeMismatch,
                format!("cannot initialise `{name}` (have type {it}, want {declared})"),
                pos,
            );
        }

        let sig = signature_of(&init_expr, &name);
        let info = if explicit {
            VarInfo {
                guard: declared.clone(),
                inferred: declared.clone(),
                types_seen: Vec::new(),
                sig,
            }
        } else {
            VarInfo {
                guard: Type::Any,
                inferred: it.clone(),
                types_seen: vec![it.clone()],
                sig,
            }
        };
        self.declare(&name, info, pos);

        if let ExprKind::Var { ty, init, .. } = &mut expr.kind {
            *ty = declared;
            *init = Some(Box::new(init_expr));
        }
        it
    }

    fn infer_type_decl(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (name, underlying, default) = match &mut expr.kind {
            ExprKind::TypeDecl { name, ty, default } => {
                (name.clone(), ty.clone(), default.take())
            }
            _ => return Type::Null,
        };
        let underlying = self.resolve_type(&underlying, pos);

        let mut default_value = None;
        let mut default_back = None;
        if let Some(mut d) = default {
            let dt = self.infer(&mut d);
            if !Self::accepts(&underlying, &dt) {
                self.error(
                    ErrorKind::TypeMismatch,
                    format!("default for type {name} has type {dt}, want {underlying}"),
                    pos,
                );
            }
            match literal_value(&d) {
                Some(v) => default_value = Some(v),
                None => self.error(
                    ErrorKind::BadOperatorOperand,
                    format!("default for type {name} must be a literal"),
                    pos,
                ),
            }
            default_back = Some(d);
        }

        let fresh = self.types.borrow_mut().define(TypeAlias {
            name: name.clone(),
            underlying: underlying.clone(),
            default: default_value,
        });
        if !fresh {
            self.error(
                ErrorKind::Redeclaration,
                format!("type `{name}` is already declared"),
                pos,
            );
        }
        if let ExprKind::TypeDecl { ty, default, .. } = &mut expr.kind {
            *ty = underlying;
            *default = default_back;
        }
        Type::Null
    }

    fn infer_binary(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (op, mut lhs, mut rhs) = match &mut expr.kind {
            ExprKind::Binary { op, lhs, rhs } => {
                let l = std::mem::replace(lhs.as_mut(), Expr::new(ExprKind::Null, pos));
                let r = std::mem::replace(rhs.as_mut(), Expr::new(ExprKind::Null, pos));
                (*op, l, r)
            }
            _ => return Type::Any,
        };
        let lt = self.infer(&mut lhs);
        // Short-circuit operators still type both sides statically.
        let rt = self.infer(&mut rhs);
        let result = self.binary_result(op, &lt, &rt, &lhs, &rhs, pos);
        if let ExprKind::Binary { lhs: ls, rhs: rs, .. } = &mut expr.kind {
            **ls = lhs;
            **rs = rhs;
        }
        result
    }

    /// Applies the operand rules of a binary operator, narrowing `Any`
    /// identifier operands where the rules concretise them.
    fn binary_result(
        &mut self,
        op: BinOp,
        lt: &Type,
        rt: &Type,
        lhs: &Expr,
        rhs: &Expr,
        pos: Pos,
    ) -> Type {
        let l_any = matches!(lt.resolve(), Type::Any);
        let r_any = matches!(rt.resolve(), Type::Any);

        if op.is_arithmetic() {
            let ok = (l_any || lt.is_arithmetic()) && (r_any || rt.is_arithmetic());
            if !ok {
                self.error(
                    ErrorKind::BadOperatorOperand,
                    format!("cannot apply binary operator {op} (have types {lt} and {rt})"),
                    pos,
                );
                return Type::Any;
            }
            return match (l_any, r_any) {
                (true, true) => Type::Any,
                (true, false) => {
                    self.narrow(lhs, rt);
                    rt.clone()
                }
                (false, true) => {
                    self.narrow(rhs, lt);
                    lt.clone()
                }
                (false, false) => promote(lt, rt),
            };
        }

        match op {
            BinOp::Cat | BinOp::Idx => {
                let ok = (l_any || matches!(lt.resolve(), Type::String))
                    && (r_any || matches!(rt.resolve(), Type::String));
                if !ok {
                    self.error(
                        ErrorKind::BadOperatorOperand,
                        format!("cannot apply binary operator {op} (have types {lt} and {rt})"),
                        pos,
                    );
                }
                self.narrow(lhs, &Type::String);
                self.narrow(rhs, &Type::String);
                if op == BinOp::Cat {
                    Type::String
                } else {
                    Type::Integer
                }
            }

            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let comparable = l_any
                    || r_any
                    || (lt.is_arithmetic() && rt.is_arithmetic())
                    || (matches!(lt.resolve(), Type::String) && matches!(rt.resolve(), Type::String))
                    || (op == BinOp::Eq || op == BinOp::Ne) && is_equal(lt, rt);
                if !comparable {
                    self.error(
                        ErrorKind::BadOperatorOperand,
                        format!("cannot apply binary operator {op} (have types {lt} and {rt})"),
                        pos,
                    );
                }
                // A lone Any operand concretises toward the other side.
                if l_any && !r_any {
                    self.narrow(lhs, rt);
                } else if r_any && !l_any {
                    self.narrow(rhs, lt);
                }
                Type::Boolean
            }

            BinOp::And | BinOp::Or | BinOp::Xor => {
                self.require_truthy(lt, pos);
                self.require_truthy(rt, pos);
                Type::Boolean
            }

            _ => Type::Any,
        }
    }

    fn infer_unary(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (op, mut operand) = match &mut expr.kind {
            ExprKind::Unary { op, operand } => {
                let o = std::mem::replace(operand.as_mut(), Expr::new(ExprKind::Null, pos));
                (*op, o)
            }
            _ => return Type::Any,
        };
        let ot = self.infer(&mut operand);
        let result = match op {
            UnOp::Not => {
                self.require_truthy(&ot, pos);
                Type::Boolean
            }
            UnOp::Neg | UnOp::Pos => {
                if !matches!(ot.resolve(), Type::Any) && !ot.is_arithmetic() {
                    self.error(
                        ErrorKind::BadOperatorOperand,
                        format!("cannot apply unary operator {} (have type {ot})", op.name()),
                        pos,
                    );
                    Type::Any
                } else {
                    ot.clone()
                }
            }
        };
        if let ExprKind::Unary { operand: slot, .. } = &mut expr.kind {
            **slot = operand;
        }
        result
    }

    fn infer_incr(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let mut target = match &mut expr.kind {
            ExprKind::Incr { target, .. } => {
                std::mem::replace(target.as_mut(), Expr::new(ExprKind::Null, pos))
            }
            _ => return Type::Any,
        };
        let tt = self.infer(&mut target);
        if !target.kind.is_lvalue() {
            self.error(
                ErrorKind::BadOperatorOperand,
                "increment needs a variable or an access to assign through",
                pos,
            );
        }
        if !matches!(tt.resolve(), Type::Any) && !tt.is_arithmetic() {
            self.error(
                ErrorKind::BadOperatorOperand,
                format!("cannot increment a value of type {tt}"),
                pos,
            );
        }
        self.narrow(&target, &Type::Integer);
        if let ExprKind::Incr { target: slot, .. } = &mut expr.kind {
            **slot = target;
        }
        if matches!(tt.resolve(), Type::Any) {
            Type::Integer
        } else {
            tt
        }
    }

    fn infer_assign(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (mut target, mut value) = match &mut expr.kind {
            ExprKind::Assign { target, value } => {
                let t = std::mem::replace(target.as_mut(), Expr::new(ExprKind::Null, pos));
                let v = std::mem::replace(value.as_mut(), Expr::new(ExprKind::Null, pos));
                (t, v)
            }
            _ => return Type::Any,
        };
        let slot = self.infer(&mut target);
        let vt = self.infer(&mut value);
        // Writing through an access slot must respect the slot's type; a
        // fresh map key has slot type Any and extends the shape instead.
        if matches!(target.kind, ExprKind::Index { .. }) && !Self::accepts(&slot, &vt) {
            self.error(
                ErrorKind::TypeMismatch,
                format!("cannot assign {vt} into a slot of type {slot}"),
                pos,
            );
        }
        self.check_assignment(&mut target, &vt, pos);
        if let ExprKind::Assign { target: ts, value: vs } = &mut expr.kind {
            **ts = target;
            **vs = value;
        }
        vt
    }

    fn check_assignment(&mut self, target: &mut Expr, vt: &Type, pos: Pos) {
        match &target.kind {
            ExprKind::Ident(name) => {
                let name = name.clone();
                let Some(info) = self.lookup(&name) else {
                    // Already reported as undeclared by the target inference.
                    return;
                };
                let guard = info.guard.clone();
                if !Self::accepts(&guard, vt) {
                    self.error(
                        ErrorKind::TypeMismatch,
                        format!("cannot assign to `{name}` (have type {vt}, want {guard})"),
                        pos,
                    );
                    return;
                }
                if let Some(info) = self.lookup_mut(&name) {
                    if matches!(info.guard, Type::Any) {
                        info.types_seen.push(vt.clone());
                        info.inferred = unite(&info.types_seen);
                    }
                }
            }
            ExprKind::Index { target: inner, index } => {
                // Assigning a fresh key extends the map's recorded shape.
                if let (ExprKind::Ident(map_name), ExprKind::Str(key)) =
                    (&inner.kind, &index.kind)
                {
                    let (map_name, key) = (map_name.clone(), key.clone());
                    if let Some(info) = self.lookup_mut(&map_name) {
                        if let Type::MapOf(fields) = &mut info.inferred {
                            match fields.iter_mut().find(|f| f.key == key) {
                                Some(field) => field.ty = vt.clone(),
                                None => fields.push(MapField { key, ty: vt.clone() }),
                            }
                        }
                    }
                }
            }
            _ => {
                self.error(
                    ErrorKind::BadOperatorOperand,
                    "cannot assign to this expression",
                    pos,
                );
            }
        }
    }

    fn infer_compound_assign(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (op, mut target, mut value) = match &mut expr.kind {
            ExprKind::CompoundAssign { op, target, value } => {
                let t = std::mem::replace(target.as_mut(), Expr::new(ExprKind::Null, pos));
                let v = std::mem::replace(value.as_mut(), Expr::new(ExprKind::Null, pos));
                (*op, t, v)
            }
            _ => return Type::Any,
        };
        let tt = self.infer(&mut target);
        let vt = self.infer(&mut value);
        if !target.kind.is_lvalue() {
            self.error(
                ErrorKind::BadOperatorOperand,
                "cannot assign to this expression",
                pos,
            );
        }
        let result = self.binary_result(op, &tt, &vt, &target, &value, pos);
        self.check_assignment(&mut target, &result, pos);
        if let ExprKind::CompoundAssign { target: ts, value: vs, .. } = &mut expr.kind {
            **ts = target;
            **vs = value;
        }
        result
    }

    fn infer_conditional(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (mut cond, mut then, mut otherwise) = match &mut expr.kind {
            ExprKind::Conditional { cond, then, otherwise } => {
                let c = std::mem::replace(cond.as_mut(), Expr::new(ExprKind::Null, pos));
                let t = std::mem::replace(then.as_mut(), Expr::new(ExprKind::Null, pos));
                let o = std::mem::replace(otherwise.as_mut(), Expr::new(ExprKind::Null, pos));
                (c, t, o)
            }
            _ => return Type::Any,
        };
        let ct = self.infer(&mut cond);
        self.require_truthy(&ct, pos);
        let tt = self.infer(&mut then);
        let ot = self.infer(&mut otherwise);
        if let ExprKind::Conditional { cond: cs, then: ts, otherwise: os } = &mut expr.kind {
            **cs = cond;
            **ts = then;
            **os = otherwise;
        }
        unite(&[tt, ot])
    }

    fn infer_index(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (mut target, mut index) = match &mut expr.kind {
            ExprKind::Index { target, index } => {
                let t = std::mem::replace(target.as_mut(), Expr::new(ExprKind::Null, pos));
                let i = std::mem::replace(index.as_mut(), Expr::new(ExprKind::Null, pos));
                (t, i)
            }
            _ => return Type::Any,
        };
        let tt = self.infer(&mut target);

        // A range index is only valid here; its bounds must be integers.
        let it = if let ExprKind::Range { from, to } = &mut index.kind {
            let mut from_e = std::mem::replace(from.as_mut(), Expr::new(ExprKind::Null, pos));
            let mut to_e = std::mem::replace(to.as_mut(), Expr::new(ExprKind::Null, pos));
            let ft = self.infer(&mut from_e);
            let tt2 = self.infer(&mut to_e);
            for bt in [&ft, &tt2] {
                if !matches!(bt.resolve(), Type::Any | Type::Integer) {
                    self.error(
                        ErrorKind::TypeMismatch,
                        format!("range bounds must be Integer, not {bt}"),
                        pos,
                    );
                }
            }
            self.narrow(&from_e, &Type::Integer);
            self.narrow(&to_e, &Type::Integer);
            if let ExprKind::Range { from, to } = &mut index.kind {
                **from = from_e;
                **to = to_e;
            }
            None
        } else {
            Some(self.infer(&mut index))
        };

        let result = match (tt.resolve().clone(), &it) {
            (Type::Any, _) => Type::Any,
            (Type::Map, Some(it)) => {
                self.require_index_type(it, &Type::String, pos);
                Type::Any
            }
            (Type::MapOf(fields), Some(it)) => {
                self.require_index_type(it, &Type::String, pos);
                match &index.kind {
                    ExprKind::Str(key) => fields
                        .iter()
                        .find(|f| f.key == *key)
                        .map(|f| f.ty.clone())
                        .unwrap_or(Type::Any),
                    _ => Type::Any,
                }
            }
            (Type::Map | Type::MapOf(_), None) => {
                self.error(ErrorKind::TypeMismatch, "cannot slice a map", pos);
                Type::Any
            }
            (Type::Array, Some(it)) => {
                self.require_index_type(it, &Type::Integer, pos);
                Type::Any
            }
            (Type::ArrayOf(elem), Some(it)) => {
                self.require_index_type(it, &Type::Integer, pos);
                *elem
            }
            (Type::Array, None) => Type::Array,
            (Type::ArrayOf(elem), None) => Type::ArrayOf(elem),
            (Type::String, Some(it)) => {
                self.require_index_type(it, &Type::Integer, pos);
                Type::String
            }
            (Type::String, None) => Type::String,
            (other, _) => {
                self.error(
                    ErrorKind::BadOperatorOperand,
                    format!("cannot index a value of type {other}"),
                    pos,
                );
                Type::Any
            }
        };

        if let ExprKind::Index { target: ts, index: is } = &mut expr.kind {
            **ts = target;
            **is = index;
        }
        result
    }

    fn require_index_type(&mut self, have: &Type, want: &Type, pos: Pos) {
        if !matches!(have.resolve(), Type::Any) && !Self::accepts(want, have) {
            self.error(
                ErrorKind::TypeMismatch,
                format!("index must be {want}, not {have}"),
                pos,
            );
        }
    }

    /// Resolves `a.b`: map access when `a` is a map, a uniform-call-syntax
    /// rewrite when `b` is a call (or names a callable), and string
    /// concatenation otherwise. The node is rewritten in place.
    fn infer_dot(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (mut lhs, rhs) = match &mut expr.kind {
            ExprKind::Dot { lhs, rhs } => {
                let l = std::mem::replace(lhs.as_mut(), Expr::new(ExprKind::Null, pos));
                let r = std::mem::replace(rhs.as_mut(), Expr::new(ExprKind::Null, pos));
                (l, r)
            }
            _ => return Type::Any,
        };
        let lt = self.infer(&mut lhs);
        let lhs_is_map = matches!(lt.resolve(), Type::Map | Type::MapOf(_));

        let new_kind = match rhs.kind {
            // `m.key` with a map on the left is bracket access in disguise.
            ExprKind::Ident(name) if lhs_is_map => ExprKind::Index {
                target: Box::new(lhs),
                index: Box::new(Expr::new(ExprKind::Str(name), rhs.pos)),
            },

            ExprKind::Call { target, args } => {
                let callable_field = match (&lt.resolve(), &target.kind) {
                    (Type::MapOf(fields), ExprKind::Ident(name)) => fields
                        .iter()
                        .any(|f| f.key == *name && matches!(f.ty.resolve(), Type::Func { .. } | Type::Function | Type::Builtin)),
                    _ => false,
                };
                if callable_field {
                    // The map holds a callable under this key: access, then
                    // call what was found.
                    let name = match &target.kind {
                        ExprKind::Ident(n) => n.clone(),
                        _ => String::new(),
                    };
                    ExprKind::Call {
                        target: Box::new(Expr::new(
                            ExprKind::Index {
                                target: Box::new(lhs),
                                index: Box::new(Expr::new(ExprKind::Str(name), rhs.pos)),
                            },
                            pos,
                        )),
                        args,
                    }
                } else {
                    // Uniform call syntax: x.f(a) is f(x, a).
                    let mut new_args = Vec::with_capacity(args.len() + 1);
                    new_args.push(lhs);
                    new_args.extend(args);
                    ExprKind::Call {
                        target,
                        args: new_args,
                    }
                }
            }

            // `x.f` where f names a callable is a zero-argument call.
            ExprKind::Ident(name)
                if self.names_callable(&name) =>
            {
                ExprKind::Call {
                    target: Box::new(Expr::new(ExprKind::Ident(name), rhs.pos)),
                    args: vec![lhs],
                }
            }

            // Everything else is string concatenation.
            other => ExprKind::Binary {
                op: BinOp::Cat,
                lhs: Box::new(lhs),
                rhs: Box::new(Expr::new(other, rhs.pos)),
            },
        };

        expr.kind = new_kind;
        self.infer(expr)
    }

    fn names_callable(&self, name: &str) -> bool {
        if let Some(info) = self.lookup(name) {
            return matches!(
                info.inferred.resolve(),
                Type::Func { .. } | Type::Function | Type::Builtin
            );
        }
        self.namespace.borrow().lookup(name).is_some()
    }

    fn infer_if(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (mut cond, mut then, otherwise) = match &mut expr.kind {
            ExprKind::If { cond, then, otherwise } => {
                let c = std::mem::replace(cond.as_mut(), Expr::new(ExprKind::Null, pos));
                let t = std::mem::replace(then.as_mut(), Expr::new(ExprKind::Null, pos));
                (c, t, otherwise.take())
            }
            _ => return Type::Any,
        };
        let ct = self.infer(&mut cond);
        self.require_truthy(&ct, pos);
        let tt = self.infer(&mut then);
        let (ot, otherwise) = match otherwise {
            Some(mut o) => {
                let t = self.infer(&mut o);
                (t, Some(o))
            }
            None => (Type::Null, None),
        };
        if let ExprKind::If { cond: cs, then: ts, otherwise: os } = &mut expr.kind {
            **cs = cond;
            **ts = then;
            *os = otherwise;
        }
        unite(&[tt, ot])
    }

    fn infer_while(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (mut cond, mut body) = match &mut expr.kind {
            ExprKind::While { cond, body } => {
                let c = std::mem::replace(cond.as_mut(), Expr::new(ExprKind::Null, pos));
                let b = std::mem::replace(body.as_mut(), Expr::new(ExprKind::Null, pos));
                (c, b)
            }
            _ => return Type::Any,
        };
        let ct = self.infer(&mut cond);
        self.require_truthy(&ct, pos);
        self.loop_depth += 1;
        self.infer(&mut body);
        self.loop_depth -= 1;
        if let ExprKind::While { cond: cs, body: bs } = &mut expr.kind {
            **cs = cond;
            **bs = body;
        }
        Type::Null
    }

    fn infer_try(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (mut body, mut catchers) = match &mut expr.kind {
            ExprKind::Try { body, catchers } => {
                let b = std::mem::replace(body.as_mut(), Expr::new(ExprKind::Null, pos));
                let c = std::mem::take(catchers);
                (b, c)
            }
            _ => return Type::Any,
        };
        let mut branch_types = vec![self.infer(&mut body)];

        let mut seen_conditions: Vec<String> = Vec::new();
        let mut default_seen = false;
        for catcher in catchers.iter_mut() {
            match &mut catcher.cond {
                Some(cond) => {
                    if default_seen {
                        self.error(
                            ErrorKind::InvalidContext,
                            "default catch must come last",
                            cond.pos,
                        );
                    }
                    let ct = self.infer(cond);
                    if !matches!(ct.resolve(), Type::Any | Type::String) {
                        self.error(
                            ErrorKind::TypeMismatch,
                            format!("catch condition must be String, not {ct}"),
                            cond.pos,
                        );
                    }
                    if let ExprKind::Str(s) = &cond.kind {
                        if seen_conditions.iter().any(|c| c == s) {
                            self.error(
                                ErrorKind::DuplicateCatch,
                                format!("duplicate catch condition \"{s}\""),
                                cond.pos,
                            );
                        } else {
                            seen_conditions.push(s.clone());
                        }
                    }
                }
                None => {
                    if default_seen {
                        self.error(
                            ErrorKind::DuplicateCatch,
                            "only one default catch is allowed",
                            catcher.body.pos,
                        );
                    }
                    default_seen = true;
                }
            }
            branch_types.push(self.infer(&mut catcher.body));
        }
        if !default_seen {
            self.error(
                ErrorKind::MissingDefaultCatch,
                "try requires a default catch",
                pos,
            );
        }

        if let ExprKind::Try { body: bs, catchers: cs } = &mut expr.kind {
            **bs = body;
            *cs = catchers;
        }
        unite(&branch_types)
    }

    fn infer_fn(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let mut def = match &mut expr.kind {
            ExprKind::FnDef(def) => std::mem::replace(
                def,
                FnDef {
                    name: None,
                    params: Vec::new(),
                    ret: Type::Any,
                    body: Vec::new(),
                },
            ),
            _ => return Type::Any,
        };

        // Resolve annotations; defaults must trail non-defaulted parameters.
        def.ret = self.resolve_type(&def.ret, pos);
        let mut defaults_started = false;
        for param in def.params.iter_mut() {
            param.ty = self.resolve_type(&param.ty, pos);
            if param.default.is_some() {
                defaults_started = true;
            } else if defaults_started {
                self.error(
                    ErrorKind::BadCall,
                    format!(
                        "parameter `{}` without a default follows a defaulted one",
                        param.name
                    ),
                    pos,
                );
            }
        }

        let declared_type = Type::Func {
            kind: FnKind::Function,
            params: def.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(def.ret.clone()),
        };

        // A named function is visible inside its own body.
        if let Some(name) = &def.name {
            let sig = Rc::new(Signature {
                name: name.clone(),
                params: def.params.clone(),
                ret: def.ret.clone(),
            });
            self.declare(
                name,
                VarInfo {
                    guard: declared_type.clone(),
                    inferred: declared_type.clone(),
                    types_seen: Vec::new(),
                    sig: Some(sig),
                },
                pos,
            );
        }

        // The body runs in its own frame with parameters as locals seeded
        // with their default-value types.
        self.fn_stack.push(FnCtx {
            declared_ret: def.ret.clone(),
            returns: Vec::new(),
            saved_loop_depth: self.loop_depth,
        });
        self.loop_depth = 0;
        self.frames.push(Frame::default());
        // Parameters are seeded in order; a default expression may refer to
        // the parameters declared before it.
        for param in def.params.iter_mut() {
            let mut default_ty = None;
            if let Some(d) = &mut param.default {
                let dt = self.infer(d);
                if !Self::accepts(&param.ty, &dt) {
                    self.error(
                        ErrorKind::TypeMismatch,
                        format!(
                            "default for parameter `{}` has type {dt}, want {}",
                            param.name, param.ty
                        ),
                        pos,
                    );
                }
                default_ty = Some(dt);
            }
            // An unannotated parameter starts out at its default's type.
            let inferred = match (&param.ty, default_ty) {
                (Type::Any, Some(dt)) => dt,
                _ => param.ty.clone(),
            };
            let frame = self.frames.last_mut().expect("frame stack never empty");
            frame.vars.insert(
                param.name.clone(),
                VarInfo {
                    guard: param.ty.clone(),
                    inferred,
                    types_seen: Vec::new(),
                    sig: None,
                },
            );
        }

        let mut last = Type::Null;
        for e in def.body.iter_mut() {
            last = self.infer(e);
        }

        self.frames.pop();
        let ctx = self.fn_stack.pop().expect("fn stack balanced");
        self.loop_depth = ctx.saved_loop_depth;

        let mut observed = ctx.returns;
        observed.push(last);
        let inferred_ret = unite(&observed);

        if matches!(def.ret, Type::Any) {
            // A declared Any return tightens to the inferred union.
            def.ret = inferred_ret.clone();
            if let Some(name) = &def.name {
                let params = def.params.clone();
                let ret = def.ret.clone();
                if let Some(info) = self.lookup_mut(name) {
                    let fty = Type::Func {
                        kind: FnKind::Function,
                        params: params.iter().map(|p| p.ty.clone()).collect(),
                        ret: Box::new(ret.clone()),
                    };
                    info.guard = fty.clone();
                    info.inferred = fty;
                    info.sig = Some(Rc::new(Signature {
                        name: name.clone(),
                        params,
                        ret,
                    }));
                }
            }
        } else if !Self::accepts(&def.ret, &inferred_ret) {
            self.error(
                ErrorKind::TypeMismatch,
                format!(
                    "function body has type {inferred_ret}, declared to return {}",
                    def.ret
                ),
                pos,
            );
        }

        let fty = Type::Func {
            kind: FnKind::Function,
            params: def.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(def.ret.clone()),
        };
        if let ExprKind::FnDef(slot) = &mut expr.kind {
            *slot = def;
        }
        fty
    }

    fn infer_call(&mut self, expr: &mut Expr) -> Type {
        let pos = expr.pos;
        let (mut target, mut args) = match &mut expr.kind {
            ExprKind::Call { target, args } => {
                let t = std::mem::replace(target.as_mut(), Expr::new(ExprKind::Null, pos));
                let a = std::mem::take(args);
                (t, a)
            }
            _ => return Type::Any,
        };

        // A builtin with a bespoke validator checks its own call shape.
        if let ExprKind::Ident(name) = &target.kind {
            let def = self.namespace.borrow().lookup(name);
            if let Some(def) = def {
                if self.lookup(name).is_none() {
                    let ret = self.check_builtin_call(&def, &mut args, pos);
                    if let ExprKind::Call { target: ts, args: aslot } = &mut expr.kind {
                        **ts = target;
                        *aslot = args;
                    }
                    return ret;
                }
            }
        }

        let tt = self.infer(&mut target);
        let sig = match &target.kind {
            ExprKind::Ident(name) => self.lookup(name).and_then(|i| i.sig.clone()),
            _ => None,
        };

        let ret = match (tt.resolve().clone(), sig) {
            (_, Some(sig)) => {
                self.shape_call_args(&sig.name, &sig.params, &mut args, false, pos);
                for (param, arg) in sig.params.iter().zip(args.iter_mut()) {
                    let at = self.infer(arg);
                    if !Self::accepts(&param.ty, &at) {
                        self.error(
                            ErrorKind::TypeMismatch,
                            format!(
                                "cannot pass {at} to parameter `{}` (want {})",
                                param.name, param.ty
                            ),
                            arg.pos,
                        );
                    }
                }
                sig.ret.clone()
            }
            (Type::Func { params, ret, .. }, None) => {
                if args.len() != params.len() {
                    self.error(
                        ErrorKind::BadCall,
                        format!(
                            "call expects {} argument(s), got {}",
                            params.len(),
                            args.len()
                        ),
                        pos,
                    );
                }
                for (i, arg) in args.iter_mut().enumerate() {
                    if let ExprKind::Assign { .. } = arg.kind {
                        self.error(
                            ErrorKind::BadCall,
                            "named arguments need a statically-known function",
                            arg.pos,
                        );
                    }
                    let at = self.infer(arg);
                    if let Some(want) = params.get(i) {
                        if !Self::accepts(want, &at) {
                            self.error(
                                ErrorKind::TypeMismatch,
                                format!("cannot pass {at} to parameter {} (want {want})", i + 1),
                                arg.pos,
                            );
                        }
                    }
                }
                (*ret).clone()
            }
            (Type::Any | Type::Function | Type::Builtin, None) => {
                for arg in args.iter_mut() {
                    self.infer(arg);
                }
                Type::Any
            }
            (other, None) => {
                self.error(
                    ErrorKind::BadCall,
                    format!("cannot call a value of type {other}"),
                    pos,
                );
                for arg in args.iter_mut() {
                    self.infer(arg);
                }
                Type::Any
            }
        };

        if let ExprKind::Call { target: ts, args: aslot } = &mut expr.kind {
            **ts = target;
            *aslot = args;
        }
        ret
    }

    fn check_builtin_call(
        &mut self,
        def: &Rc<crate::builtins::BuiltinDef>,
        args: &mut Vec<Expr>,
        pos: Pos,
    ) -> Type {
        if let Some(validate) = def.validate {
            let mut tys = Vec::with_capacity(args.len());
            for arg in args.iter_mut() {
                tys.push(self.infer(arg));
            }
            return match validate(&tys, pos) {
                Ok(ret) => ret,
                Err(err) => {
                    let (kind, message, pos) = (err.kind, err.message, err.pos);
                    self.error(kind, message, pos);
                    def.ret.clone()
                }
            };
        }

        let params: Vec<Param> = def
            .params
            .iter()
            .map(|p| Param {
                name: p.name.to_string(),
                ty: p.ty.clone(),
                default: p.default.as_ref().map(|v| value_to_expr(v, pos)),
            })
            .collect();
        self.shape_call_args(def.name, &params, args, true, pos);
        for (param, arg) in params.iter().zip(args.iter_mut()) {
            let at = self.infer(arg);
            if !Self::accepts(&param.ty, &at) {
                self.error(
                    ErrorKind::TypeMismatch,
                    format!(
                        "cannot pass {at} to parameter `{}` (want {})",
                        param.name, param.ty
                    ),
                    arg.pos,
                );
            }
        }
        def.ret.clone()
    }

    /// Rewrites a call's arguments into canonical positional order: named
    /// arguments land on their parameter. With `inline_defaults`, omitted
    /// defaulted arguments are written into the call; otherwise trailing
    /// omissions are left for the call itself to bind in its own scope
    /// (a default may refer to earlier parameters).
    fn shape_call_args(
        &mut self,
        fname: &str,
        params: &[Param],
        args: &mut Vec<Expr>,
        inline_defaults: bool,
        pos: Pos,
    ) {
        let mut slots: Vec<Option<Expr>> = params.iter().map(|_| None).collect();
        let mut extra = 0usize;
        let mut positional = 0usize;
        let mut named_started = false;

        for arg in args.drain(..) {
            let named = match &arg.kind {
                ExprKind::Assign { target, .. } => match &target.kind {
                    ExprKind::Ident(n) => match params.iter().position(|p| p.name == *n) {
                        Some(i) => Some((i, n.clone())),
                        // An assignment to a visible local is an ordinary
                        // positional argument; anything else is a typo'd
                        // parameter name.
                        None if self.lookup(n).is_some() => None,
                        None => {
                            self.error(
                                ErrorKind::BadCall,
                                format!(
                                    "named argument `{n}` does not match a parameter of `{fname}`"
                                ),
                                arg.pos,
                            );
                            continue;
                        }
                    },
                    _ => None,
                },
                _ => None,
            };
            match named {
                Some((index, name)) => {
                    named_started = true;
                    if slots[index].is_some() {
                        self.error(
                            ErrorKind::BadCall,
                            format!("argument `{name}` given twice in call to `{fname}`"),
                            arg.pos,
                        );
                        continue;
                    }
                    if let ExprKind::Assign { value, .. } = arg.kind {
                        slots[index] = Some(*value);
                    }
                }
                None => {
                    if named_started {
                        self.error(
                            ErrorKind::BadCall,
                            format!("positional argument after a named one in call to `{fname}`"),
                            arg.pos,
                        );
                    }
                    if positional >= slots.len() {
                        extra += 1;
                    } else {
                        slots[positional] = Some(arg);
                        positional += 1;
                    }
                }
            }
        }

        if extra > 0 {
            self.error(
                ErrorKind::BadCall,
                format!("extra argument in call to `{fname}`"),
                pos,
            );
        }

        let mut shaped: Vec<Option<Expr>> = Vec::with_capacity(params.len());
        for (param, slot) in params.iter().zip(slots.into_iter()) {
            match slot {
                Some(arg) => shaped.push(Some(arg)),
                None => match &param.default {
                    Some(d) if inline_defaults => shaped.push(Some(d.clone())),
                    Some(_) => shaped.push(None),
                    None => {
                        self.error(
                            ErrorKind::BadCall,
                            format!("missing argument `{}` in call to `{fname}`", param.name),
                            pos,
                        );
                        shaped.push(Some(Expr::new(ExprKind::Null, pos)));
                    }
                },
            }
        }

        // Trailing omissions stay omitted; an interior hole has to be
        // inlined to keep later arguments on their positions.
        while matches!(shaped.last(), Some(None)) {
            shaped.pop();
        }
        let mut canonical = Vec::with_capacity(shaped.len());
        for (i, slot) in shaped.into_iter().enumerate() {
            match slot {
                Some(arg) => canonical.push(arg),
                None => canonical.push(
                    params[i]
                        .default
                        .clone()
                        .unwrap_or_else(|| Expr::new(ExprKind::Null, pos)),
                ),
            }
        }
        *args = canonical;
    }
}

/// Extracts the signature when an initializer is a function literal, so
/// later calls through the variable can use named arguments and defaults.
fn signature_of(init: &Expr, var_name: &str) -> Option<Rc<Signature>> {
    match &init.kind {
        ExprKind::FnDef(def) => Some(Rc::new(Signature {
            name: var_name.to_string(),
            params: def.params.clone(),
            ret: def.ret.clone(),
        })),
        _ => None,
    }
}

/// Turns a default value back into a literal expression for the AST.
fn value_to_expr(value: &Value, pos: Pos) -> Expr {
    let kind = match value {
        Value::Null => ExprKind::Null,
        Value::Boolean(b) => ExprKind::Boolean(*b),
        Value::Integer(n) => ExprKind::Integer(*n),
        Value::Real(n) => ExprKind::Real(*n),
        Value::Str(s) => ExprKind::Str(s.clone()),
        Value::Array(elems) => ExprKind::ArrayLit(
            elems.borrow().iter().map(|v| value_to_expr(v, pos)).collect(),
        ),
        Value::Map(entries) => ExprKind::MapLit(
            entries
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), value_to_expr(v, pos)))
                .collect(),
        ),
        _ => ExprKind::Null,
    };
    Expr::new(kind, pos)
}

/// Evaluates a literal expression without an evaluator; non-literals are None.
fn literal_value(expr: &Expr) -> Option<Value> {
    match &expr.kind {
        ExprKind::Null => Some(Value::Null),
        ExprKind::Boolean(b) => Some(Value::Boolean(*b)),
        ExprKind::Integer(n) => Some(Value::Integer(*n)),
        ExprKind::Real(n) => Some(Value::Real(*n)),
        ExprKind::Str(s) => Some(Value::Str(s.clone())),
        ExprKind::Unary { op: UnOp::Neg, operand } => match literal_value(operand)? {
            Value::Integer(n) => Some(Value::Integer(-n)),
            Value::Real(n) => Some(Value::Real(-n)),
            _ => None,
        },
        ExprKind::ArrayLit(elems) => {
            let values: Option<Vec<Value>> = elems.iter().map(literal_value).collect();
            Some(Value::array_from(values?))
        }
        ExprKind::MapLit(entries) => {
            let values: Option<Vec<(String, Value)>> = entries
                .iter()
                .map(|(k, v)| literal_value(v).map(|v| (k.clone(), v)))
                .collect();
            Some(Value::map_from(values?))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::parser;

    fn validator() -> Validator {
        let namespace = Rc::new(RefCell::new(builtins::default_namespace()));
        let types = Rc::new(RefCell::new(TypeRegistry::new()));
        Validator::new(namespace, types, 3)
    }

    fn run(source: &str) -> (Vec<Expr>, Result<(), Vec<CompileError>>) {
        let (mut program, errors) = parser::parse(source, 3);
        assert!(errors.is_empty(), "parse failed: {errors:?}");
        let mut v = validator();
        let result = v.validate(&mut program);
        (program, result)
    }

    fn expect_error(source: &str, kind: ErrorKind, needle: &str) {
        let (_, result) = run(source);
        let errors = result.expect_err("expected a validation error");
        assert!(
            errors.iter().any(|e| e.kind == kind && e.message.contains(needle)),
            "no {kind:?} error containing {needle:?} in {errors:?}"
        );
    }

    #[test]
    fn test_undeclared_and_redeclaration() {
        expect_error("x + 1", ErrorKind::Undeclared, "`x` has not been declared");
        expect_error(
            "var x = 1; var x = 2",
            ErrorKind::Redeclaration,
            "already declared",
        );
        expect_error(
            "var print = 1",
            ErrorKind::Redeclaration,
            "cannot override builtin",
        );
    }

    #[test]
    fn test_operator_mismatch_message() {
        expect_error(
            r#"var a = "45"; a + 1"#,
            ErrorKind::BadOperatorOperand,
            "cannot apply binary operator ADD (have types String and Integer)",
        );
    }

    #[test]
    fn test_initialiser_and_assignment_guards() {
        expect_error(
            "var x: Integer = \"s\"",
            ErrorKind::TypeMismatch,
            "cannot initialise `x`",
        );
        expect_error(
            "var x: Integer = 1; x = \"s\"",
            ErrorKind::TypeMismatch,
            "cannot assign to `x`",
        );
        let (_, result) = run("var x: Number = 1; x = 2.5");
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_initialiser_fills_default() {
        let (program, result) = run("var x: Integer");
        assert!(result.is_ok());
        match &program[0].kind {
            ExprKind::Var { init, .. } => {
                assert_eq!(init.as_ref().map(|e| &e.kind), Some(&ExprKind::Integer(0)));
            }
            other => panic!("bad shape: {other:?}"),
        }
    }

    #[test]
    fn test_dot_desugars_to_index_for_maps() {
        let (program, result) = run(r#"var m = {"x": 1}; m.x"#);
        assert!(result.is_ok(), "{result:?}");
        match &program[1].kind {
            ExprKind::Index { index, .. } => {
                assert_eq!(index.kind, ExprKind::Str("x".into()));
            }
            other => panic!("expected index rewrite: {other:?}"),
        }
    }

    #[test]
    fn test_dot_desugars_to_ufcs() {
        let (program, result) = run("fn double(x) x * 2\nvar n = 4\nn.double()");
        assert!(result.is_ok(), "{result:?}");
        match &program[2].kind {
            ExprKind::Call { target, args } => {
                assert_eq!(target.kind, ExprKind::Ident("double".into()));
                assert_eq!(args.len(), 1);
                assert_eq!(args[0].kind, ExprKind::Ident("n".into()));
            }
            other => panic!("expected call rewrite: {other:?}"),
        }
    }

    #[test]
    fn test_dot_on_strings_is_concatenation() {
        let (program, result) = run(r#"var a = "x"; var b = "y"; a . b"#);
        assert!(result.is_ok(), "{result:?}");
        match &program[2].kind {
            ExprKind::Binary { op: BinOp::Cat, .. } => {}
            other => panic!("expected concatenation: {other:?}"),
        }
    }

    #[test]
    fn test_named_arguments_become_positional() {
        let (program, result) =
            run("fn greet(who: String, end: String = \"!\") who . end\ngreet(end = \"?\", who = \"hi\")");
        assert!(result.is_ok(), "{result:?}");
        match &program[1].kind {
            ExprKind::Call { args, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(args[0].kind, ExprKind::Str("hi".into()));
                assert_eq!(args[1].kind, ExprKind::Str("?".into()));
            }
            other => panic!("expected shaped call: {other:?}"),
        }
    }

    #[test]
    fn test_trailing_defaults_stay_omitted_for_user_functions() {
        // The call binds trailing defaults in its own scope at runtime, so
        // the canonical argument list keeps only what was supplied.
        let (program, result) = run("fn inc(n: Integer, by: Integer = 1) n + by\ninc(5)");
        assert!(result.is_ok(), "{result:?}");
        match &program[1].kind {
            ExprKind::Call { args, .. } => {
                assert_eq!(args.len(), 1);
                assert_eq!(args[0].kind, ExprKind::Integer(5));
            }
            other => panic!("expected shaped call: {other:?}"),
        }
    }

    #[test]
    fn test_builtin_defaults_are_inlined() {
        let (program, result) = run(r#"print("x")"#);
        assert!(result.is_ok(), "{result:?}");
        match &program[0].kind {
            ExprKind::Call { args, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(args[1].kind, ExprKind::Str("\n".into()));
            }
            other => panic!("expected filled call: {other:?}"),
        }
    }

    #[test]
    fn test_call_arity_errors() {
        expect_error(
            "fn f(a) a\nf()",
            ErrorKind::BadCall,
            "missing argument `a`",
        );
        expect_error("fn f(a) a\nf(1, 2)", ErrorKind::BadCall, "extra argument");
    }

    #[test]
    fn test_any_return_is_rewritten_to_inferred_union() {
        let (program, result) = run("fn f(flag: Boolean) flag ? 1 : \"s\"");
        assert!(result.is_ok(), "{result:?}");
        match &program[0].kind {
            ExprKind::FnDef(def) => {
                assert_eq!(def.ret.to_string(), "Integer | String");
            }
            other => panic!("expected fn: {other:?}"),
        }
    }

    #[test]
    fn test_declared_return_is_enforced() {
        expect_error(
            "fn f() -> Integer \"s\"",
            ErrorKind::TypeMismatch,
            "declared to return",
        );
        expect_error(
            "fn f() -> Integer return \"s\"",
            ErrorKind::TypeMismatch,
            "cannot return",
        );
    }

    #[test]
    fn test_narrowing_through_arithmetic() {
        // `n` is Any; `n + 1` narrows it, so the function returns Integer.
        let (program, result) = run("fn f(n) n + 1");
        assert!(result.is_ok(), "{result:?}");
        match &program[0].kind {
            ExprKind::FnDef(def) => assert_eq!(def.ret, Type::Integer),
            other => panic!("expected fn: {other:?}"),
        }
    }

    #[test]
    fn test_loop_and_function_context_rules() {
        expect_error("next", ErrorKind::InvalidContext, "`next` outside");
        expect_error("last", ErrorKind::InvalidContext, "`last` outside");
        expect_error("return 1", ErrorKind::InvalidContext, "`return` outside");
        let (_, result) = run("while 1 { next }");
        assert!(result.is_ok());
        // A function defined inside a loop body is not itself in the loop.
        expect_error(
            "while 1 { var f = fn next }",
            ErrorKind::InvalidContext,
            "`next` outside",
        );
    }

    #[test]
    fn test_try_shape_rules() {
        expect_error(
            "try throw \"x\" catch (\"a\") 1",
            ErrorKind::MissingDefaultCatch,
            "default catch",
        );
        expect_error(
            "try throw \"x\" catch (\"a\") 1 catch (\"a\") 2 catch 3",
            ErrorKind::DuplicateCatch,
            "duplicate catch",
        );
        expect_error(
            "try throw \"x\" catch 1 catch 2",
            ErrorKind::DuplicateCatch,
            "only one default",
        );
    }

    #[test]
    fn test_truthiness_rules() {
        expect_error(
            "var m = {\"a\": 1}; if m then 1 else 2",
            ErrorKind::TypeMismatch,
            "boolean context",
        );
        let (_, result) = run("var s = \"\"; if s then 1 else 2");
        assert!(result.is_ok());
    }

    #[test]
    fn test_range_outside_index() {
        expect_error("1..3", ErrorKind::InvalidContext, "range");
        let (_, result) = run("var s = \"hello\"; s[1..3]");
        assert!(result.is_ok());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let source = r#"
            var m = {"x": 1}
            fn add(a, b = 2) a + b
            m.x
            add(1)
            var y: Integer
            fn pick(flag: Boolean) flag ? 1 : "s"
        "#;
        let (mut program, errors) = parser::parse(source, 3);
        assert!(errors.is_empty());
        let mut v = validator();
        v.validate(&mut program).expect("first pass");
        let snapshot = program.clone();
        let mut v2 = validator();
        v2.validate(&mut program).expect("second pass");
        assert_eq!(program, snapshot);
    }

    #[test]
    fn test_type_declarations() {
        let (_, result) = run("type Celsius: Real = 20.0\nvar t: Celsius\nt = 3.5");
        assert!(result.is_ok(), "{result:?}");
        expect_error(
            "type Celsius: Real\ntype Celsius: Integer",
            ErrorKind::Redeclaration,
            "already declared",
        );
        expect_error("var x: Wibble", ErrorKind::UnknownKeyword, "unknown type");
    }

    #[test]
    fn test_keys_values_precise_types() {
        let source = r#"var m = {"a": 1, "b": "s"}; keys m"#;
        let (mut program, errors) = parser::parse(source, 3);
        assert!(errors.is_empty());
        let mut v = validator();
        v.validate(&mut program).expect("valid");
        // Re-infer the keys expression through a fresh validator to
        // observe its type.
        let mut v2 = validator();
        let mut keys_expr = program[1].clone();
        let mut m_decl = program[0].clone();
        v2.infer(&mut m_decl);
        let ty = v2.infer(&mut keys_expr);
        assert_eq!(ty.to_string(), "[String]");
    }
}
