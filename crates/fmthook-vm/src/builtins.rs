use std::rc::Rc;

use crate::{format::format_value, Native, Value, Vm, VmError, VmResult};

/// Installe les natives par défaut dans `vm`.
pub fn install_defaults(vm: &mut Vm) {
    vm.register_native(Native::new("print", 0, usize::MAX, native_print));
    vm.register_native(Native::new("str", 0, 1, native_str));
    vm.register_native(Native::new("repr", 1, 1, |_, args| Ok(Value::from(args[0].repr()))));
    vm.register_native(Native::new("format", 1, 2, native_format));
    vm.register_native(Native::new("len", 1, 1, native_len));
    vm.register_native(Native::new("type", 1, 1, |_, args| Ok(Value::str(args[0].type_name()))));
    vm.register_native(Native::new("exit", 0, 1, native_exit));
}

fn native_print(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let line = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ");
    vm.write_line(&line)?;
    Ok(Value::None)
}

fn native_str(_vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    Ok(match args.first() {
        None => Value::str(""),
        Some(s @ Value::Str(_)) => s.clone(),
        Some(v) => Value::from(v.to_string()),
    })
}

/// `format(value, spec="")` : formateur natif, jamais le hook.
fn native_format(_vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let spec = match args.get(1) {
        None => "",
        Some(Value::Str(s)) => &**s,
        Some(other) => return Err(VmError::ty(format!("format spec must be str, not {}", other.type_name()))),
    };
    Ok(Value::from(format_value(&args[0], spec)?))
}

fn native_len(_vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(i64::try_from(s.chars().count()).unwrap_or(i64::MAX))),
        Value::Module(m) => Ok(Value::Int(i64::try_from(m.names().len()).unwrap_or(i64::MAX))),
        other => Err(VmError::ty(format!("object of type '{}' has no len()", other.type_name()))),
    }
}

fn native_exit(_vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let code = match args.first() {
        None | Some(Value::None) => 0,
        Some(v) => {
            let n = i64::try_from(v)?;
            i32::try_from(n).map_err(|_| VmError::ty(format!("exit code out of range: {n}")))?
        }
    };
    Err(VmError::Exit { code })
}

/// Enveloppe une closure Rust en valeur appelable.
pub fn native_value(
    name: &str,
    min_arity: usize,
    max_arity: usize,
    func: impl Fn(&mut Vm, &[Value]) -> VmResult<Value> + 'static,
) -> Value {
    Value::Native(Rc::new(Native::new(name, min_arity, max_arity, func)))
}
