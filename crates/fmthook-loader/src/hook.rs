//! Hook de formatage : appelé à la place du formateur natif par le code réécrit.
//!
//! Contrat : `hook(value, spec=None) -> texte`, un appel par champ
//! interpolé, sur le chemin d'exécution de l'interpolation. Les erreurs du
//! hook remontent telles quelles jusqu'à l'expression d'origine.

use std::{cell::RefCell, rc::Rc, str::FromStr};

use fmthook_vm::{builtins::native_value, format::format_value, Value, Vm, VmError, VmResult};
use serde::{Deserialize, Serialize};

/// Comportement substitué au formatage natif.
pub trait FormatHook {
    /// Formate `value` (avec `spec` si le champ en avait une).
    fn format(&self, vm: &mut Vm, value: &Value, spec: Option<&Value>) -> VmResult<Value>;
}

impl<F> FormatHook for F
where
    F: Fn(&mut Vm, &Value, Option<&Value>) -> VmResult<Value>,
{
    fn format(&self, vm: &mut Vm, value: &Value, spec: Option<&Value>) -> VmResult<Value> { self(vm, value, spec) }
}

/// Hook de référence : `"{value} formatted with {spec}"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHook;

impl FormatHook for DefaultHook {
    fn format(&self, _vm: &mut Vm, value: &Value, spec: Option<&Value>) -> VmResult<Value> {
        let spec = spec.unwrap_or(&Value::None);
        Ok(Value::from(format!("{value} formatted with {spec}")))
    }
}

/// Délègue au formateur natif (comportement identique au code non réécrit).
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFormatHook;

impl FormatHook for NativeFormatHook {
    fn format(&self, _vm: &mut Vm, value: &Value, spec: Option<&Value>) -> VmResult<Value> {
        let spec = match spec {
            None => "",
            Some(Value::Str(s)) => &**s,
            Some(other) => return Err(VmError::ty(format!("format spec must be str, not {}", other.type_name()))),
        };
        Ok(Value::from(format_value(value, spec)?))
    }
}

/// Enveloppe un hook en valeur appelable d'arité 1..=2.
pub fn hook_value(name: &str, hook: impl FormatHook + 'static) -> Value {
    let owned = name.to_string();
    native_value(name, 1, 2, move |vm, args| {
        let value =
            args.first().ok_or_else(|| VmError::Arity { name: owned.clone(), expected: "1..=2".into(), got: 0 })?;
        hook.format(vm, value, args.get(1))
    })
}

/// Hook courant partagé entre le contexte et l'intercepteur, lu à chaque résolution.
#[derive(Clone)]
pub struct HookSlot(Rc<RefCell<Value>>);

impl HookSlot {
    /// Emplacement initialisé avec `hook`.
    pub fn new(hook: Value) -> Self { Self(Rc::new(RefCell::new(hook))) }

    /// Hook courant.
    pub fn get(&self) -> Value { self.0.borrow().clone() }

    /// Remplace le hook pour toutes les copies de l'emplacement.
    pub fn set(&self, hook: Value) { *self.0.borrow_mut() = hook; }
}

/* ───────────────────────────── Choix du hook ───────────────────────────── */

/// Hooks intégrés (config `hook = "..."`, option `--hook`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    /// [`DefaultHook`].
    #[default]
    Default,
    /// [`NativeFormatHook`].
    Native,
}

impl HookKind {
    /// Valeur appelable injectée sous `name`.
    pub fn to_value(self, name: &str) -> Value {
        match self {
            Self::Default => hook_value(name, DefaultHook),
            Self::Native => hook_value(name, NativeFormatHook),
        }
    }
}

impl FromStr for HookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "native" => Ok(Self::Native),
            other => Err(format!("unknown hook `{other}` (expected `default` or `native`)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_hook_describes_value_and_spec() {
        let mut vm = Vm::new();
        let hook = hook_value("__fmthook__", DefaultHook);
        assert_eq!(vm.call(&hook, &[Value::Int(5)]).unwrap(), Value::from("5 formatted with None"));
        assert_eq!(
            vm.call(&hook, &[Value::Float(3.14159), Value::from(".2f")]).unwrap(),
            Value::from("3.14159 formatted with .2f")
        );
        assert!(matches!(
            vm.call(&hook, &[]),
            Err(VmError::Arity { name, expected, got: 0 }) if name == "__fmthook__" && expected == "1..=2"
        ));
    }

    #[test]
    fn slot_copies_see_replacement() {
        let mut vm = Vm::new();
        let slot = HookSlot::new(HookKind::Default.to_value("h"));
        let seen_by_finder = slot.clone();
        slot.set(HookKind::Native.to_value("h"));
        assert_eq!(vm.call(&seen_by_finder.get(), &[Value::Int(5)]).unwrap(), Value::from("5"));
    }

    #[test]
    fn native_hook_is_the_identity() {
        let mut vm = Vm::new();
        let hook = HookKind::Native.to_value("h");
        assert_eq!(vm.call(&hook, &[Value::Float(3.14159), Value::from(".2f")]).unwrap(), Value::from("3.14"));
        assert_eq!(vm.call(&hook, &[Value::Int(5)]).unwrap(), Value::from("5"));
        assert!(matches!(vm.call(&hook, &[Value::Int(5), Value::Int(2)]), Err(VmError::Type(_))));
    }

    #[test]
    fn closures_are_hooks() {
        let mut vm = Vm::new();
        let hook = hook_value("h", |_: &mut Vm, v: &Value, s: Option<&Value>| -> VmResult<Value> {
            Ok(Value::from(format!("[{v}|{}]", s.is_some())))
        });
        assert_eq!(vm.call(&hook, &[Value::Bool(true)]).unwrap(), Value::from("[True|false]"));
    }

    #[test]
    fn hook_kind_parses() {
        assert_eq!("native".parse::<HookKind>(), Ok(HookKind::Native));
        assert!("fancy".parse::<HookKind>().is_err());
    }
}
