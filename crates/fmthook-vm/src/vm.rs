use std::{
    io::{self, Write},
    rc::Rc,
};

use fmthook_core::bytecode::{BinOp, Chunk, Conversion, Opcode, UnaryOp, FORMAT_SPEC_PRESENT};
use indexmap::IndexMap;
use log::trace;

use crate::{
    builtins,
    format::format_value,
    value::{Function, Module, Native, Number},
    Captured, Value, VmError, VmResult,
};

/// Profondeur d'appels maximale.
pub const MAX_FRAMES: usize = 128;

/* ------------------------------ Imports ------------------------------ */

/// Résolution des `IMPORT` (implémentée par le contexte de chargement).
pub trait Importer {
    /// Charge (ou retrouve) le module `name`.
    fn import(&self, vm: &mut Vm, name: &str) -> VmResult<Rc<Module>>;
}

/* ------------------------------ VM ------------------------------ */

struct Frame {
    module: Rc<Module>,
    unit: String,
}

/// Machine virtuelle : builtins, sortie, pile de frames.
pub struct Vm {
    builtins: IndexMap<String, Value>,
    frames: Vec<Frame>,
    importer: Option<Rc<dyn Importer>>,
    stdout: Box<dyn Write>,
}

impl Default for Vm {
    fn default() -> Self { Self::new() }
}

impl Vm {
    /// VM avec `stdout` réel et natives par défaut.
    pub fn new() -> Self {
        let mut vm = Self { builtins: IndexMap::new(), frames: Vec::new(), importer: None, stdout: Box::new(io::stdout()) };
        builtins::install_defaults(&mut vm);
        vm
    }

    /// Variante utile pour tests: `stdout` capturé.
    pub fn with_captured_stdout() -> (Self, Captured) {
        let cap = Captured::default();
        (Self::new().with_stdout(cap.clone()), cap)
    }

    /// Permet d’injecter un writer custom (ex: buffer, fichier…).
    #[must_use]
    pub fn with_stdout<W: Write + 'static>(mut self, w: W) -> Self {
        self.stdout = Box::new(w);
        self
    }

    /// Branche la résolution des imports.
    pub fn set_importer(&mut self, importer: Rc<dyn Importer>) { self.importer = Some(importer); }

    /// Enregistre une native comme builtin.
    pub fn register_native(&mut self, native: Native) {
        self.builtins.insert(native.name.clone(), Value::Native(Rc::new(native)));
    }

    /// Définit (ou remplace) un builtin.
    pub fn set_builtin(&mut self, name: impl Into<String>, value: Value) { self.builtins.insert(name.into(), value); }

    /// Lecture d'un builtin.
    pub fn builtin(&self, name: &str) -> Option<Value> { self.builtins.get(name).cloned() }

    /// Noms des builtins, dans l'ordre d'enregistrement.
    pub fn builtin_names(&self) -> Vec<String> { self.builtins.keys().cloned().collect() }

    /// Module de la frame en cours d'exécution.
    pub fn current_module(&self) -> Option<Rc<Module>> { self.frames.last().map(|f| Rc::clone(&f.module)) }

    /// Profondeur de la pile de frames.
    pub fn depth(&self) -> usize { self.frames.len() }

    /// Écrit une ligne sur la sortie.
    pub fn write_line(&mut self, s: &str) -> VmResult<()> {
        self.stdout.write_all(s.as_bytes())?;
        self.stdout.write_all(b"\n")?;
        Ok(())
    }

    /// Vide la sortie.
    pub fn flush(&mut self) -> VmResult<()> { Ok(self.stdout.flush()?) }

    /// Exécute le corps d'un module dans son namespace.
    pub fn run_module(&mut self, code: &Rc<Chunk>, module: &Rc<Module>) -> VmResult<Value> {
        trace!("run module `{}` ({} ops)", module.name, code.ops.len());
        self.execute(code, module, Vec::new())
    }

    /// Appelle une valeur.
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> VmResult<Value> {
        match callee {
            Value::Native(n) => n.call(self, args),
            Value::Function(f) => self.call_function(f, args),
            other => Err(VmError::ty(format!("'{}' object is not callable", other.type_name()))),
        }
    }

    fn call_function(&mut self, f: &Rc<Function>, args: &[Value]) -> VmResult<Value> {
        let argc = f.code.argcount as usize;
        let min = f.code.min_args() as usize;
        if args.len() < min || args.len() > argc {
            let expected = if min == argc { argc.to_string() } else { format!("{min}..={argc}") };
            return Err(VmError::Arity { name: f.name().to_string(), expected, got: args.len() });
        }
        let module =
            f.module().ok_or_else(|| VmError::Msg(format!("module of function `{}` is no longer loaded", f.name())))?;
        let mut locals: Vec<Option<Value>> = vec![None; f.code.varnames.len().max(argc)];
        for (slot, a) in locals.iter_mut().zip(args) {
            *slot = Some(a.clone());
        }
        // Paramètres omis : défauts pris dans l'ordre à partir de `min`.
        for (idx, default) in f.code.defaults.iter().enumerate().skip(args.len() - min) {
            locals[min + idx] = Some(Value::from(default));
        }
        self.execute(&f.code, &module, locals)
    }

    fn execute(&mut self, code: &Rc<Chunk>, module: &Rc<Module>, locals: Vec<Option<Value>>) -> VmResult<Value> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(VmError::Stack {
                unit: code.name.clone(),
                pc: 0,
                reason: "maximum recursion depth exceeded".into(),
            });
        }
        self.frames.push(Frame { module: Rc::clone(module), unit: code.name.clone() });
        let result = self.run_frame(code, module, locals);
        self.frames.pop();
        result
    }

    fn run_frame(&mut self, code: &Rc<Chunk>, module: &Rc<Module>, mut locals: Vec<Option<Value>>) -> VmResult<Value> {
        let mut stack: Vec<Value> = Vec::with_capacity(code.stack_size as usize);
        let mut pc = 0usize;

        while let Some(op) = code.ops.get(pc).copied() {
            let at = pc;
            pc += 1;
            let underflow = || VmError::Stack { unit: code.name.clone(), pc: at, reason: format!("{} on empty stack", op.code) };

            match op.code {
                Opcode::Nop => {}
                Opcode::Pop => {
                    stack.pop().ok_or_else(underflow)?;
                }
                Opcode::Dup => {
                    let top = stack.last().cloned().ok_or_else(underflow)?;
                    stack.push(top);
                }
                Opcode::Rot2 => {
                    let n = stack.len();
                    if n < 2 {
                        return Err(underflow());
                    }
                    stack.swap(n - 1, n - 2);
                }
                Opcode::Rot3 => {
                    let n = stack.len();
                    if n < 3 {
                        return Err(underflow());
                    }
                    stack[n - 3..].rotate_right(1);
                }
                Opcode::LoadConst => {
                    let c = code.consts.get(op.arg).ok_or_else(|| self.bad_operand(code, at, "constant"))?;
                    stack.push(Value::from(c));
                }
                Opcode::LoadName | Opcode::LoadGlobal => {
                    let name = self.name_at(code, at, op.arg)?;
                    let v = module.get(name).or_else(|| self.builtin(name)).ok_or_else(|| VmError::Name(name.into()))?;
                    stack.push(v);
                }
                Opcode::StoreName => {
                    let name = self.name_at(code, at, op.arg)?;
                    module.set(name, stack.pop().ok_or_else(underflow)?);
                }
                Opcode::LoadFast => {
                    let slot = locals.get(op.arg as usize).ok_or_else(|| self.bad_operand(code, at, "local"))?;
                    let v = slot.clone().ok_or_else(|| {
                        let name = code.varnames.get(op.arg as usize).map_or("?", String::as_str);
                        VmError::Name(format!("{name} (local referenced before assignment)"))
                    })?;
                    stack.push(v);
                }
                Opcode::StoreFast => {
                    let v = stack.pop().ok_or_else(underflow)?;
                    let slot = locals.get_mut(op.arg as usize).ok_or_else(|| self.bad_operand(code, at, "local"))?;
                    *slot = Some(v);
                }
                Opcode::LoadAttr => {
                    let name = self.name_at(code, at, op.arg)?;
                    let v = match stack.pop().ok_or_else(underflow)? {
                        Value::Module(m) => m
                            .get(name)
                            .ok_or_else(|| VmError::Name(format!("{name} (module '{}' has no such attribute)", m.name)))?,
                        other => {
                            return Err(VmError::ty(format!("'{}' object has no attribute '{name}'", other.type_name())))
                        }
                    };
                    stack.push(v);
                }
                Opcode::Import => {
                    let name = self.name_at(code, at, op.arg)?.to_string();
                    let importer = self
                        .importer
                        .clone()
                        .ok_or_else(|| VmError::Import { name: name.clone(), reason: "no importer configured".into() })?;
                    let m = importer.import(self, &name)?;
                    stack.push(Value::Module(m));
                }
                Opcode::Binary => {
                    let op = BinOp::from_u32(op.arg).ok_or_else(|| self.bad_operand(code, at, "binary operator"))?;
                    let rhs = stack.pop().ok_or_else(underflow)?;
                    let lhs = stack.pop().ok_or_else(underflow)?;
                    stack.push(binary(op, &lhs, &rhs)?);
                }
                Opcode::Unary => {
                    let op = UnaryOp::from_u32(op.arg).ok_or_else(|| self.bad_operand(code, at, "unary operator"))?;
                    let v = stack.pop().ok_or_else(underflow)?;
                    stack.push(unary(op, &v)?);
                }
                Opcode::Convert => {
                    let conv = Conversion::from_u32(op.arg).ok_or_else(|| self.bad_operand(code, at, "conversion"))?;
                    let v = stack.pop().ok_or_else(underflow)?;
                    stack.push(match conv {
                        Conversion::Str => Value::from(v.to_string()),
                        Conversion::Repr => Value::from(v.repr()),
                    });
                }
                Opcode::FormatValue => {
                    if op.arg & !FORMAT_SPEC_PRESENT != 0 {
                        return Err(self.bad_operand(code, at, "format flags"));
                    }
                    let spec = if op.arg & FORMAT_SPEC_PRESENT == 0 {
                        None
                    } else {
                        Some(stack.pop().ok_or_else(underflow)?)
                    };
                    let value = stack.pop().ok_or_else(underflow)?;
                    let spec = match &spec {
                        None => "",
                        Some(Value::Str(s)) => &**s,
                        Some(other) => {
                            return Err(VmError::ty(format!("format spec must be str, not {}", other.type_name())))
                        }
                    };
                    stack.push(Value::from(format_value(&value, spec)?));
                }
                Opcode::BuildString => {
                    let n = op.arg as usize;
                    if stack.len() < n {
                        return Err(underflow());
                    }
                    let mut out = String::new();
                    for piece in stack.drain(stack.len() - n..) {
                        match piece {
                            Value::Str(s) => out.push_str(&s),
                            other => return Err(VmError::ty(format!("cannot join {} into a string", other.type_name()))),
                        }
                    }
                    stack.push(Value::from(out));
                }
                Opcode::Call => {
                    let n = op.arg as usize;
                    if stack.len() < n + 1 {
                        return Err(underflow());
                    }
                    let args = stack.split_off(stack.len() - n);
                    let callee = stack.pop().ok_or_else(underflow)?;
                    let result = self.call(&callee, &args)?;
                    stack.push(result);
                }
                Opcode::MakeFunction => match stack.pop().ok_or_else(underflow)? {
                    Value::Code(c) => stack.push(Value::Function(Rc::new(Function::new(c, module)))),
                    other => return Err(VmError::ty(format!("cannot make a function from {}", other.type_name()))),
                },
                Opcode::Return => return stack.pop().ok_or_else(underflow),
                Opcode::Jump => pc = op.arg as usize,
                Opcode::JumpIfFalse => {
                    if !stack.pop().ok_or_else(underflow)?.truthy() {
                        pc = op.arg as usize;
                    }
                }
            }
        }
        Ok(Value::None)
    }

    fn name_at<'c>(&self, code: &'c Chunk, pc: usize, idx: u32) -> VmResult<&'c str> {
        code.names.get(idx as usize).map(String::as_str).ok_or_else(|| self.bad_operand(code, pc, "name"))
    }

    fn bad_operand(&self, code: &Chunk, pc: usize, what: &str) -> VmError {
        let frame = self.frames.last().map_or("", |f| f.unit.as_str());
        VmError::Stack { unit: code.name.clone(), pc, reason: format!("invalid {what} operand (frame `{frame}`)") }
    }
}

/* ------------------------------ Opérateurs ------------------------------ */

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> VmResult<Value> {
    let mismatch = || {
        VmError::ty(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))
    };
    match op {
        BinOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinOp::Ne => return Ok(Value::Bool(lhs != rhs)),
        _ => {}
    }
    if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
        return match op {
            BinOp::Add => Ok(Value::from(format!("{a}{b}"))),
            BinOp::Lt => Ok(Value::Bool(a < b)),
            BinOp::Le => Ok(Value::Bool(a <= b)),
            BinOp::Gt => Ok(Value::Bool(a > b)),
            BinOp::Ge => Ok(Value::Bool(a >= b)),
            _ => Err(mismatch()),
        };
    }
    let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
        return Err(mismatch());
    };
    let overflow = || VmError::Msg(format!("integer overflow in {}", op.symbol()));
    let zero = || VmError::Msg("division by zero".into());
    Ok(match (a, b) {
        (Number::Int(x), Number::Int(y)) => match op {
            BinOp::Add => Value::Int(x.checked_add(y).ok_or_else(overflow)?),
            BinOp::Sub => Value::Int(x.checked_sub(y).ok_or_else(overflow)?),
            BinOp::Mul => Value::Int(x.checked_mul(y).ok_or_else(overflow)?),
            BinOp::Div if y == 0 => return Err(zero()),
            BinOp::Div => Value::Float(a.as_f64() / b.as_f64()),
            BinOp::Mod if y == 0 => return Err(zero()),
            // signe du diviseur
            BinOp::Mod => {
                let r = x.checked_rem(y).ok_or_else(overflow)?;
                Value::Int(if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
            }
            BinOp::Lt => Value::Bool(x < y),
            BinOp::Le => Value::Bool(x <= y),
            BinOp::Gt => Value::Bool(x > y),
            BinOp::Ge => Value::Bool(x >= y),
            BinOp::Eq | BinOp::Ne => return Err(mismatch()),
        },
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            match op {
                BinOp::Add => Value::Float(x + y),
                BinOp::Sub => Value::Float(x - y),
                BinOp::Mul => Value::Float(x * y),
                BinOp::Div | BinOp::Mod if y == 0.0 => return Err(zero()),
                BinOp::Div => Value::Float(x / y),
                BinOp::Mod => {
                    let r = x % y;
                    Value::Float(if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r })
                }
                BinOp::Lt => Value::Bool(x < y),
                BinOp::Le => Value::Bool(x <= y),
                BinOp::Gt => Value::Bool(x > y),
                BinOp::Ge => Value::Bool(x >= y),
                BinOp::Eq | BinOp::Ne => return Err(mismatch()),
            }
        }
    })
}

fn unary(op: UnaryOp, v: &Value) -> VmResult<Value> {
    match (op, v.as_number()) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Some(Number::Int(i))) => {
            i.checked_neg().map(Value::Int).ok_or_else(|| VmError::Msg("integer overflow in -".into()))
        }
        (UnaryOp::Neg, Some(Number::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, None) => Err(VmError::ty(format!("bad operand type for unary -: '{}'", v.type_name()))),
    }
}

/* --------------------------------- Tests --------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use fmthook_core::asm::assemble;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn run(src: &str) -> VmResult<String> {
        let code = Rc::new(fmthook_compiler::compile_source(src, None).map_err(|e| VmError::Msg(e.to_string()))?);
        let (mut vm, out) = Vm::with_captured_stdout();
        vm.run_module(&code, &Rc::new(Module::new("__main__", None)))?;
        Ok(out.get())
    }

    #[test]
    fn arithmetic_and_control_flow() {
        let out = run(
            "let i = 0; let acc = 0;
             while (i < 5) { if (i % 2 == 0) { acc = acc + i; } i = i + 1; }
             print(acc, 7 / 2, -7 % 3, \"a\" + \"b\", !True);",
        )
        .unwrap();
        assert_eq!(out, "6 3.5 2 ab False\n");
    }

    #[test]
    fn functions_see_their_module_namespace() {
        let out = run(
            "let greeting = \"hi\";
             fn greet(name) { let msg = f\"{greeting}, {name}!\"; return msg; }
             print(greet(\"bob\"));
             fn fact(n) { if (n <= 1) { return 1; } return n * fact(n - 1); }
             print(fact(10));",
        )
        .unwrap();
        assert_eq!(out, "hi, bob!\n3628800\n");
    }

    #[test]
    fn native_formatting_of_fields() {
        let out = run(
            "let x = 3.14159; let w = 8; let s = \"s\";
             print(f\"[{x:.2f}] [{x:>{w}.3f}] [{s!r}] [{42:05d}] [{x}]\");",
        )
        .unwrap();
        assert_eq!(out, "[3.14] [   3.142] ['s'] [00042] [3.14159]\n");
    }

    #[test]
    fn omitted_arguments_take_their_defaults() {
        let src = "fn pad(v, w = 3, fill = \"*\") { return f\"{fill}{v:>{w}}\"; }
             print(pad(1)); print(pad(1, 5)); print(pad(1, 2, \"-\"));";
        assert_eq!(run(src).unwrap(), "*  1\n*    1\n- 1\n");

        let err = run("fn pad(v, w = 3) { return v; } pad();").unwrap_err();
        assert!(matches!(err, VmError::Arity { expected, got: 0, .. } if expected == "1..=2"));
        assert!(matches!(run("fn pad(v, w = 3) { return v; } pad(1, 2, 3);"), Err(VmError::Arity { got: 3, .. })));
    }

    #[test]
    fn errors_are_typed() {
        assert!(matches!(run("print(nope);"), Err(VmError::Name(n)) if n == "nope"));
        assert!(matches!(run("print(1 + \"a\");"), Err(VmError::Type(_))));
        assert!(matches!(run("fn f(a) { return a; } f();"), Err(VmError::Arity { got: 0, .. })));
        assert!(matches!(run("print(f\"{1:q}\");"), Err(VmError::Format(_))));
        assert!(matches!(run("print(1 / 0);"), Err(VmError::Msg(_))));
        assert!(matches!(run("use m;"), Err(VmError::Import { .. })));
        assert!(matches!(run("fn f() { return f(); } f();"), Err(VmError::Stack { .. })));
    }

    #[test]
    fn exit_stops_the_module() {
        let code = Rc::new(fmthook_compiler::compile_source("print(1); exit(4); print(2);", None).unwrap());
        let (mut vm, out) = Vm::with_captured_stdout();
        let err = vm.run_module(&code, &Rc::new(Module::new("__main__", None))).unwrap_err();
        assert!(matches!(err, VmError::Exit { code: 4 }));
        assert_eq!(out.get(), "1\n");
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn rotations_follow_the_calling_convention() {
        // callee sous ses arguments : [v, s, f] --ROT_THREE--> [f, v, s]
        let chunk = assemble(
            r#"
                LOAD_CONST 1.5
                LOAD_CONST ".1f"
                LOAD_NAME pair
                ROT_THREE
                CALL 2
                LOAD_CONST 7
                LOAD_NAME one
                ROT_TWO
                CALL 1
                BUILD_STRING 2
                RETURN
            "#,
        )
        .unwrap();
        let mut vm = Vm::new();
        vm.set_builtin(
            "pair",
            builtins::native_value("pair", 2, 2, |_, a| Ok(Value::from(format!("<{}|{}>", a[0], a[1])))),
        );
        vm.set_builtin("one", builtins::native_value("one", 1, 1, |_, a| Ok(Value::from(format!("<{}>", a[0])))));
        let v = vm.run_module(&Rc::new(chunk), &Rc::new(Module::new("m", None))).unwrap();
        assert_eq!(v, Value::from("<1.5|.1f><7>"));
    }

    #[test]
    fn imports_go_through_the_importer() {
        struct Fixed(RefCell<Vec<String>>);
        impl Importer for Fixed {
            fn import(&self, _vm: &mut Vm, name: &str) -> VmResult<Rc<Module>> {
                self.0.borrow_mut().push(name.to_string());
                let m = Module::new(name, None);
                m.set("answer", Value::Int(42));
                Ok(Rc::new(m))
            }
        }
        let log = Rc::new(Fixed(RefCell::new(Vec::new())));
        let code = Rc::new(fmthook_compiler::compile_source("use lib; print(lib.answer);", None).unwrap());
        let (mut vm, out) = Vm::with_captured_stdout();
        vm.set_importer(log.clone());
        vm.run_module(&code, &Rc::new(Module::new("__main__", None))).unwrap();
        assert_eq!(out.get(), "42\n");
        assert_eq!(*log.0.borrow(), vec!["lib".to_string()]);
    }

    #[test]
    fn current_module_tracks_frames() {
        let mut vm = Vm::new();
        let seen = Rc::new(RefCell::new(None));
        let probe = Rc::clone(&seen);
        vm.set_builtin(
            "whoami",
            builtins::native_value("whoami", 0, 0, move |vm, _| {
                *probe.borrow_mut() = vm.current_module().map(|m| m.name.clone());
                Ok(Value::None)
            }),
        );
        let code = Rc::new(fmthook_compiler::compile_source("fn f() { whoami(); } f();", None).unwrap());
        vm.run_module(&code, &Rc::new(Module::new("app", None))).unwrap();
        assert_eq!(seen.borrow().as_deref(), Some("app"));
        assert!(vm.current_module().is_none());
    }
}
