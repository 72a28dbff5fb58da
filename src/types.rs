// ABOUTME: Type representations and the pure operations over them:
// equality, subtyping, unions, promotion, aliases, defaults, rendering

use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Which flavor of callable a function type describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    Function,
    Builtin,
}

impl fmt::Display for FnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FnKind::Function => f.write_str("Function"),
            FnKind::Builtin => f.write_str("Builtin"),
        }
    }
}

/// One field of a structural map type.
#[derive(Debug, Clone, PartialEq)]
pub struct MapField {
    pub key: String,
    pub ty: Type,
}

/// A user-declared type alias, with an optional declared default value.
#[derive(Debug)]
pub struct TypeAlias {
    pub name: String,
    pub underlying: Type,
    pub default: Option<Value>,
}

impl PartialEq for TypeAlias {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.underlying == other.underlying
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Any,
    Null,
    Boolean,
    Number,
    Integer,
    Real,
    String,
    /// An array of unknown element type.
    Array,
    /// A map of unknown shape.
    Map,
    /// Any function value.
    Function,
    /// Any builtin value.
    Builtin,
    ArrayOf(Box<Type>),
    MapOf(Vec<MapField>),
    Func {
        kind: FnKind,
        params: Vec<Type>,
        ret: Box<Type>,
    },
    Alias(Rc<TypeAlias>),
    /// A type name the parser could not resolve; replaced by the validator.
    Named(String),
    /// Sorted, deduplicated, at least two members.
    Union(Vec<Type>),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => f.write_str("Any"),
            Type::Null => f.write_str("Null"),
            Type::Boolean => f.write_str("Boolean"),
            Type::Number => f.write_str("Number"),
            Type::Integer => f.write_str("Integer"),
            Type::Real => f.write_str("Real"),
            Type::String => f.write_str("String"),
            Type::Array => f.write_str("Array"),
            Type::Map => f.write_str("Map"),
            Type::Function => f.write_str("Function"),
            Type::Builtin => f.write_str("Builtin"),
            Type::ArrayOf(elem) => write!(f, "[{elem}]"),
            Type::MapOf(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.key, field.ty)?;
                }
                f.write_str("}")
            }
            Type::Func { kind, params, ret } => {
                write!(f, "{kind}(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
            Type::Alias(alias) => f.write_str(&alias.name),
            Type::Named(name) => f.write_str(name),
            Type::Union(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
        }
    }
}

impl Type {
    /// Follows alias chains to the underlying type.
    pub fn resolve(&self) -> &Type {
        let mut ty = self;
        while let Type::Alias(alias) = ty {
            ty = &alias.underlying;
        }
        ty
    }

    /// The outermost type name, as reported by the `type` builtin.
    pub fn name(&self) -> String {
        match self {
            Type::ArrayOf(_) => "Array".to_string(),
            Type::MapOf(_) => "Map".to_string(),
            Type::Func { kind, .. } => kind.to_string(),
            Type::Alias(alias) => alias.name.clone(),
            other => other.to_string(),
        }
    }

    /// The simple type a structural type falls under in the subtype DAG.
    fn head(&self) -> Type {
        match self.resolve() {
            Type::ArrayOf(_) => Type::Array,
            Type::MapOf(_) => Type::Map,
            Type::Func { kind: FnKind::Function, .. } => Type::Function,
            Type::Func { kind: FnKind::Builtin, .. } => Type::Builtin,
            other => other.clone(),
        }
    }

    fn is_simple(&self) -> bool {
        matches!(
            self,
            Type::Any
                | Type::Null
                | Type::Boolean
                | Type::Number
                | Type::Integer
                | Type::Real
                | Type::String
                | Type::Array
                | Type::Map
                | Type::Function
                | Type::Builtin
        )
    }

    /// Promotion rank for arithmetic result types. Integer and Real are
    /// siblings under Number; this rank is the only place they are ordered.
    fn rank(&self) -> Option<u8> {
        match self {
            Type::Null => Some(0),
            Type::Boolean => Some(1),
            Type::Integer => Some(2),
            Type::Real => Some(3),
            _ => None,
        }
    }

    /// True when a value of this type may appear in arithmetic.
    pub fn is_arithmetic(&self) -> bool {
        match self.resolve() {
            Type::Number | Type::Integer | Type::Real => true,
            Type::Union(members) => members.iter().all(Type::is_arithmetic),
            _ => false,
        }
    }

    /// The concrete value a declaration of this type starts out holding.
    pub fn default_value(&self) -> Value {
        match self {
            Type::Alias(alias) => match &alias.default {
                Some(v) => v.clone(),
                None => alias.underlying.default_value(),
            },
            Type::Boolean => Value::Boolean(false),
            Type::Number | Type::Integer => Value::Integer(0),
            Type::Real => Value::Real(0.0),
            Type::String => Value::Str(String::new()),
            Type::Array | Type::ArrayOf(_) => Value::empty_array(),
            Type::Map => Value::empty_map(),
            Type::MapOf(fields) => Value::map_from(
                fields
                    .iter()
                    .map(|f| (f.key.clone(), f.ty.default_value())),
            ),
            Type::Union(members) => members
                .first()
                .map(Type::default_value)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// Deep structural equality after alias resolution.
pub fn is_equal(a: &Type, b: &Type) -> bool {
    let (a, b) = (a.resolve(), b.resolve());
    match (a, b) {
        (Type::ArrayOf(x), Type::ArrayOf(y)) => is_equal(x, y),
        (Type::MapOf(xs), Type::MapOf(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|(x, y)| x.key == y.key && is_equal(&x.ty, &y.ty))
        }
        (
            Type::Func { kind: ka, params: pa, ret: ra },
            Type::Func { kind: kb, params: pb, ret: rb },
        ) => {
            ka == kb
                && pa.len() == pb.len()
                && pa.iter().zip(pb).all(|(x, y)| is_equal(x, y))
                && is_equal(ra, rb)
        }
        (Type::Union(xs), Type::Union(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| is_equal(x, y))
        }
        _ => a == b,
    }
}

/// Subtype relation over the simple-type DAG:
/// Any is the root; Number covers Integer and Real; Function covers Builtin.
pub fn is_subtype(sub: &Type, sup: &Type) -> bool {
    let (sub, sup) = (sub.resolve(), sup.resolve());
    if !sub.is_simple() || !sup.is_simple() {
        return false;
    }
    if sub == sup {
        return true;
    }
    match sup {
        Type::Any => true,
        Type::Number => matches!(sub, Type::Integer | Type::Real),
        Type::Function => matches!(sub, Type::Builtin),
        _ => false,
    }
}

/// Does a value of type `value` satisfy the declared type `guard`?
pub fn check(guard: &Type, value: &Type) -> bool {
    let guard = guard.resolve();
    let value = value.resolve();
    if matches!(guard, Type::Any) {
        return true;
    }
    match (guard, value) {
        (Type::Union(gs), Type::Union(_)) => {
            is_equal(guard, value)
                || match value {
                    Type::Union(vs) => vs.iter().all(|v| gs.iter().any(|g| check(g, v))),
                    _ => false,
                }
        }
        (Type::Union(gs), _) => gs.iter().any(|g| check(g, value)),
        (_, Type::Union(vs)) => vs.iter().all(|v| check(guard, v)),
        (Type::ArrayOf(g), Type::ArrayOf(v)) => check(g, v),
        (Type::ArrayOf(g), Type::Array) => matches!(g.resolve(), Type::Any),
        (Type::MapOf(gs), Type::MapOf(vs)) => gs.iter().all(|gf| {
            match vs.iter().find(|vf| vf.key == gf.key) {
                Some(vf) => check(&gf.ty, &vf.ty),
                None => check(&gf.ty, &Type::Null),
            }
        }),
        (
            Type::Func { kind: gk, params: gp, ret: gr },
            Type::Func { kind: vk, params: vp, ret: vr },
        ) => {
            // Any on either side of a parameter defers to the function's
            // own call-site checks.
            let params_fit = gp.len() == vp.len()
                && gp.iter().zip(vp).all(|(g, v)| {
                    matches!(g.resolve(), Type::Any)
                        || matches!(v.resolve(), Type::Any)
                        || check(g, v)
                });
            (gk == vk || (*gk == FnKind::Function && *vk == FnKind::Builtin))
                && params_fit
                && (matches!(vr.resolve(), Type::Any) || check(gr, vr))
        }
        _ if guard.is_simple() => is_subtype(&value.head(), guard),
        _ => is_equal(guard, value),
    }
}

/// Collapses a list of types into a single type or a canonical union:
/// deduplicated by printed form, sorted by printed form, absorbed by Any.
pub fn unite(types: &[Type]) -> Type {
    let mut flat = Vec::new();
    for ty in types {
        match ty {
            Type::Union(members) => flat.extend(members.iter().cloned()),
            other => flat.push(other.clone()),
        }
    }
    if flat.is_empty() || flat.iter().any(|t| matches!(t, Type::Any)) {
        return Type::Any;
    }
    let mut seen: Vec<(String, Type)> = Vec::new();
    for ty in flat {
        let printed = ty.to_string();
        if !seen.iter().any(|(p, _)| *p == printed) {
            seen.push((printed, ty));
        }
    }
    seen.sort_by(|(a, _), (b, _)| a.cmp(b));
    if seen.len() == 1 {
        return seen.remove(0).1;
    }
    Type::Union(seen.into_iter().map(|(_, t)| t).collect())
}

/// Picks the arithmetic result type of a pair of operand types.
pub fn promote(a: &Type, b: &Type) -> Type {
    let (a, b) = (a.resolve(), b.resolve());
    if is_equal(a, b) {
        return a.clone();
    }
    if is_subtype(a, b) {
        return b.clone();
    }
    if is_subtype(b, a) {
        return a.clone();
    }
    match (a.rank(), b.rank()) {
        (Some(ra), Some(rb)) => {
            if ra >= rb {
                a.clone()
            } else {
                b.clone()
            }
        }
        _ => unite(&[a.clone(), b.clone()]),
    }
}

/// Registry of user-declared type names, shared by the validator and the
/// evaluator (string interpolation re-validates in the current program).
#[derive(Debug, Default)]
pub struct TypeRegistry {
    entries: HashMap<String, Rc<TypeAlias>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the name was already taken.
    pub fn define(&mut self, alias: TypeAlias) -> bool {
        if self.entries.contains_key(&alias.name) {
            return false;
        }
        self.entries.insert(alias.name.clone(), Rc::new(alias));
        true
    }

    pub fn lookup(&self, name: &str) -> Option<Rc<TypeAlias>> {
        self.entries.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtype_dag() {
        assert!(is_subtype(&Type::Integer, &Type::Number));
        assert!(is_subtype(&Type::Real, &Type::Number));
        assert!(is_subtype(&Type::Builtin, &Type::Function));
        assert!(is_subtype(&Type::Map, &Type::Any));
        assert!(!is_subtype(&Type::Integer, &Type::Real));
        assert!(!is_subtype(&Type::Real, &Type::Integer));
        assert!(!is_subtype(&Type::Number, &Type::String));
    }

    #[test]
    fn test_check_any_accepts_everything() {
        for ty in [
            Type::Null,
            Type::Integer,
            Type::String,
            Type::ArrayOf(Box::new(Type::Real)),
            Type::Func {
                kind: FnKind::Function,
                params: vec![Type::Any],
                ret: Box::new(Type::Any),
            },
        ] {
            assert!(check(&Type::Any, &ty), "Any must accept {ty}");
        }
        assert!(!check(&Type::Number, &Type::String));
    }

    #[test]
    fn test_check_structural() {
        let guard = Type::ArrayOf(Box::new(Type::Number));
        assert!(check(&guard, &Type::ArrayOf(Box::new(Type::Integer))));
        assert!(!check(&guard, &Type::ArrayOf(Box::new(Type::String))));

        let shape = Type::MapOf(vec![MapField { key: "x".into(), ty: Type::Integer }]);
        let wider = Type::MapOf(vec![
            MapField { key: "x".into(), ty: Type::Integer },
            MapField { key: "y".into(), ty: Type::String },
        ]);
        assert!(check(&shape, &wider));
        assert!(check(&Type::Map, &wider));
        assert!(!check(&wider, &shape));
    }

    #[test]
    fn test_unite_laws() {
        assert_eq!(unite(&[]), Type::Any);
        assert_eq!(unite(&[Type::Integer]), Type::Integer);
        assert_eq!(unite(&[Type::Integer, Type::Any, Type::String]), Type::Any);

        let u = unite(&[Type::String, Type::Integer, Type::String]);
        assert_eq!(u, Type::Union(vec![Type::Integer, Type::String]));

        // Sorted and deduplicated even when built from nested unions.
        let nested = unite(&[u.clone(), Type::Integer]);
        assert_eq!(nested, u);
    }

    #[test]
    fn test_promote_ranks() {
        assert_eq!(promote(&Type::Integer, &Type::Real), Type::Real);
        assert_eq!(promote(&Type::Real, &Type::Integer), Type::Real);
        assert_eq!(promote(&Type::Integer, &Type::Integer), Type::Integer);
        assert_eq!(promote(&Type::Integer, &Type::Number), Type::Number);
        assert_eq!(promote(&Type::Boolean, &Type::Integer), Type::Integer);
    }

    #[test]
    fn test_alias_resolution() {
        let celsius = Type::Alias(Rc::new(TypeAlias {
            name: "Celsius".into(),
            underlying: Type::Real,
            default: None,
        }));
        assert!(is_equal(&celsius, &Type::Real));
        assert!(check(&Type::Number, &celsius));
        assert_eq!(celsius.to_string(), "Celsius");
        assert_eq!(celsius.name(), "Celsius");
        assert_eq!(celsius.default_value(), Value::Real(0.0));
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Type::ArrayOf(Box::new(Type::Integer)).to_string(), "[Integer]");
        let shape = Type::MapOf(vec![
            MapField { key: "x".into(), ty: Type::Integer },
            MapField { key: "y".into(), ty: Type::Real },
        ]);
        assert_eq!(shape.to_string(), "{x: Integer, y: Real}");
        let f = Type::Func {
            kind: FnKind::Builtin,
            params: vec![Type::Any, Type::String],
            ret: Box::new(Type::Null),
        };
        assert_eq!(f.to_string(), "Builtin(Any, String) -> Null");
        assert_eq!(
            Type::Union(vec![Type::Integer, Type::String]).to_string(),
            "Integer | String"
        );
    }

    #[test]
    fn test_union_subset_check() {
        let guard = unite(&[Type::Integer, Type::Real, Type::String]);
        let value = unite(&[Type::Integer, Type::String]);
        assert!(check(&guard, &value));
        assert!(!check(&value, &guard));
    }
}
