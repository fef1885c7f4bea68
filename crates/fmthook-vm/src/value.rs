use std::{
    cell::RefCell,
    fmt,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

use fmthook_core::bytecode::{float_repr, str_repr, Chunk, ConstValue};
use indexmap::IndexMap;

use crate::{vm::Vm, VmError, VmResult};

/* --------------------------- Types de valeur --------------------------- */

/// Valeur dynamique manipulée par la VM.
#[derive(Clone)]
pub enum Value {
    /// `None`.
    None,
    /// Booléen.
    Bool(bool),
    /// Entier 64 bits signé.
    Int(i64),
    /// Flottant 64 bits.
    Float(f64),
    /// Chaîne UTF-8 partagée.
    Str(Rc<str>),
    /// Objet code (avant `MAKE_FUNCTION`).
    Code(Rc<Chunk>),
    /// Fonction invitée liée à son module.
    Function(Rc<Function>),
    /// Fonction native.
    Native(Rc<Native>),
    /// Module chargé.
    Module(Rc<Module>),
}

impl Value {
    /// Chaîne depuis n'importe quel texte.
    pub fn str(s: impl AsRef<str>) -> Self { Self::Str(Rc::from(s.as_ref())) }

    /// Nom de type, pour les messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Code(_) => "code",
            Self::Function(_) => "function",
            Self::Native(_) => "builtin_function",
            Self::Module(_) => "module",
        }
    }

    /// Valeur de vérité.
    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Code(_) | Self::Function(_) | Self::Native(_) | Self::Module(_) => true,
        }
    }

    /// Texte d'une chaîne, sinon `None`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Représentation `repr` (chaînes entre quotes).
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => str_repr(s),
            other => other.to_string(),
        }
    }

    /// Vrai si l'objet peut être appelé.
    pub const fn is_callable(&self) -> bool { matches!(self, Self::Function(_) | Self::Native(_)) }
}

/// Rendu `str` (chaînes sans quotes).
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => f.write_str(&float_repr(*x)),
            Self::Str(s) => f.write_str(s),
            Self::Code(c) => write!(f, "<code {}>", c.name),
            Self::Function(func) => write!(f, "<function {}>", func.name()),
            Self::Native(n) => write!(f, "<built-in function {}>", n.name),
            Self::Module(m) => write!(f, "<module '{}'>", m.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => {
                if s.chars().count() > 64 {
                    let head: String = s.chars().take(64).collect();
                    write!(f, "Str({head}…)")
                } else {
                    write!(f, "Str({s:?})")
                }
            }
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            other => write!(f, "{other}"),
        }
    }
}

/// Égalité du langage : nombres comparés par valeur, objets par identité.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => Rc::ptr_eq(a, b),
            (Self::Module(a), Self::Module(b)) => Rc::ptr_eq(a, b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(Number::Int(x)), Some(Number::Int(y))) => x == y,
                (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
                _ => false,
            },
        }
    }
}

/// Vue numérique (les booléens comptent comme entiers).
#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[allow(clippy::cast_precision_loss)]
    pub(crate) const fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

impl Value {
    pub(crate) const fn as_number(&self) -> Option<Number> {
        match self {
            Self::Bool(b) => Some(Number::Int(*b as i64)),
            Self::Int(i) => Some(Number::Int(*i)),
            Self::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }
}

/* Conversions conviviales */
impl From<()> for Value { fn from((): ()) -> Self { Self::None } }
impl From<bool> for Value { fn from(v: bool) -> Self { Self::Bool(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Self::Int(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Self::Float(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Self::str(v) } }
impl From<String> for Value { fn from(v: String) -> Self { Self::Str(Rc::from(v)) } }
impl From<Rc<Module>> for Value { fn from(v: Rc<Module>) -> Self { Self::Module(v) } }

impl From<&ConstValue> for Value {
    fn from(c: &ConstValue) -> Self {
        match c {
            ConstValue::None => Self::None,
            ConstValue::Bool(b) => Self::Bool(*b),
            ConstValue::Int(i) => Self::Int(*i),
            ConstValue::Float(f) => Self::Float(*f),
            ConstValue::Str(s) => Self::str(s),
            ConstValue::Code(code) => Self::Code(Rc::clone(code)),
        }
    }
}

impl TryFrom<&Value> for i64 {
    type Error = VmError;
    fn try_from(v: &Value) -> VmResult<Self> {
        match v {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(Self::from(*b)),
            other => Err(VmError::ty(format!("expected int, got {}", other.type_name()))),
        }
    }
}

/* ------------------------------ Fonctions ------------------------------ */

/// Fonction invitée : un objet code et le module qui l'a définie.
///
/// Le lien vers le module est faible : le module possède la fonction via son
/// namespace, pas l'inverse.
pub struct Function {
    /// Corps compilé.
    pub code: Rc<Chunk>,
    module: Weak<Module>,
}

impl Function {
    /// Lie `code` au namespace de `module`.
    pub fn new(code: Rc<Chunk>, module: &Rc<Module>) -> Self { Self { code, module: Rc::downgrade(module) } }

    /// Nom de la fonction.
    pub fn name(&self) -> &str { &self.code.name }

    /// Module de définition, s'il est encore chargé.
    pub fn module(&self) -> Option<Rc<Module>> { self.module.upgrade() }
}

/// Signature d'une native : accès à la VM (sortie, appels) et arguments.
pub type NativeFn = dyn Fn(&mut Vm, &[Value]) -> VmResult<Value>;

/// Fonction native avec bornes d'arité.
pub struct Native {
    /// Nom exposé.
    pub name: String,
    /// Arité minimale.
    pub min_arity: usize,
    /// Arité maximale (incluse).
    pub max_arity: usize,
    func: Box<NativeFn>,
}

impl Native {
    /// Déclare une native.
    pub fn new(
        name: impl Into<String>,
        min_arity: usize,
        max_arity: usize,
        func: impl Fn(&mut Vm, &[Value]) -> VmResult<Value> + 'static,
    ) -> Self {
        Self { name: name.into(), min_arity, max_arity, func: Box::new(func) }
    }

    /// Appelle la native après vérification de l'arité.
    pub fn call(&self, vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
        if args.len() < self.min_arity || args.len() > self.max_arity {
            let expected = if self.min_arity == self.max_arity {
                self.min_arity.to_string()
            } else {
                format!("{}..={}", self.min_arity, self.max_arity)
            };
            return Err(VmError::Arity { name: self.name.clone(), expected, got: args.len() });
        }
        (self.func)(vm, args)
    }
}

/* ------------------------------ Modules ------------------------------ */

/// Module chargé : nom, origine, namespace mutable.
pub struct Module {
    /// Nom qualifié (`__main__` pour l'entrée).
    pub name: String,
    /// Fichier source, si le module vient du disque.
    pub origin: Option<PathBuf>,
    namespace: RefCell<IndexMap<String, Value>>,
}

impl Module {
    /// Module vide ; `__name__` et `__file__` sont renseignés.
    pub fn new(name: impl Into<String>, origin: Option<PathBuf>) -> Self {
        let name = name.into();
        let mut ns = IndexMap::new();
        ns.insert("__name__".to_string(), Value::str(&name));
        ns.insert(
            "__file__".to_string(),
            origin.as_deref().map_or(Value::None, |p| Value::from(p.display().to_string())),
        );
        Self { name, origin, namespace: RefCell::new(ns) }
    }

    /// Origine sous forme de chemin.
    pub fn origin(&self) -> Option<&Path> { self.origin.as_deref() }

    /// Lecture d'un nom.
    pub fn get(&self, name: &str) -> Option<Value> { self.namespace.borrow().get(name).cloned() }

    /// Écriture d'un nom.
    pub fn set(&self, name: impl Into<String>, value: Value) { self.namespace.borrow_mut().insert(name.into(), value); }

    /// Retire un nom.
    pub fn remove(&self, name: &str) -> Option<Value> { self.namespace.borrow_mut().shift_remove(name) }

    /// Vrai si le nom est défini.
    pub fn contains(&self, name: &str) -> bool { self.namespace.borrow().contains_key(name) }

    /// Noms définis, dans l'ordre d'insertion.
    pub fn names(&self) -> Vec<String> { self.namespace.borrow().keys().cloned().collect() }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("name", &self.name).field("origin", &self.origin).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_and_repr() {
        assert_eq!(Value::None.to_string(), "None");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::from("a'b").repr(), "\"a'b\"");
        assert_eq!(Value::from("x").repr(), "'x'");
        assert_eq!(Value::from("x").to_string(), "x");
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::from("1"), Value::Int(1));
        assert!(!Value::from("").truthy());
        assert!(Value::Float(0.5).truthy());
    }

    #[test]
    fn module_namespace_has_dunders() {
        let m = Module::new("pkg", Some(PathBuf::from("/p/pkg.fh")));
        assert_eq!(m.get("__name__"), Some(Value::from("pkg")));
        assert_eq!(m.names(), vec!["__name__".to_string(), "__file__".into()]);
        m.set("x", Value::Int(1));
        assert!(m.contains("x"));
        assert_eq!(m.remove("x"), Some(Value::Int(1)));
    }

    #[test]
    fn functions_do_not_keep_modules_alive() {
        let m = Rc::new(Module::new("m", None));
        let f = Function::new(Rc::new(Chunk::new("f")), &m);
        assert!(f.module().is_some());
        drop(m);
        assert!(f.module().is_none());
    }

    #[test]
    fn native_arity_is_checked() {
        let n = Native::new("two", 2, 2, |_, _| Ok(Value::None));
        let mut vm = Vm::new();
        let err = n.call(&mut vm, &[Value::None]).unwrap_err();
        assert_eq!(err.to_string(), "two() takes 2 argument(s), 1 given");
    }
}
