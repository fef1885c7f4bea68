//! Bootstrap, intercepteur et lanceur sur de vrais arbres de projet.

use std::{cell::RefCell, fs, rc::Rc};

use fmthook_loader::{
    hook_value, BootstrapState, Launch, LaunchMode, Launcher, LoadError, LoadResult, LoaderConfig, MAIN_MODULE,
};
use fmthook_vm::{Value, Vm, VmError, VmResult};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct Project {
    root: TempDir,
    sys: TempDir,
}

impl Project {
    fn new(main: &str) -> Self {
        let p = Self { root: tempfile::tempdir().unwrap(), sys: tempfile::tempdir().unwrap() };
        p.file("main.fh", main);
        p
    }

    fn file(&self, name: &str, src: &str) -> &Self {
        fs::write(self.root.path().join(name), src).unwrap();
        self
    }

    fn sys_file(&self, name: &str, src: &str) -> &Self {
        fs::write(self.sys.path().join(name), src).unwrap();
        self
    }

    fn launcher(&self, mode: LaunchMode) -> Launcher {
        Launcher::new(LoaderConfig::for_project(self.root.path()).search_path(self.sys.path())).mode(mode)
    }

    fn run_with(&self, launcher: &Launcher) -> (LoadResult<Launch>, String) {
        let (mut vm, out) = Vm::with_captured_stdout();
        let res = launcher.run(&mut vm, &self.root.path().join("main.fh"));
        (res, out.get())
    }

    fn run(&self, mode: LaunchMode) -> (Launch, String) {
        let (res, out) = self.run_with(&self.launcher(mode));
        (res.unwrap(), out)
    }
}

type Calls = Rc<RefCell<Vec<Vec<Value>>>>;

fn recording_hook() -> (Value, Calls) {
    let calls: Calls = Rc::default();
    let log = Rc::clone(&calls);
    let hook = hook_value("__fmthook__", move |_: &mut Vm, v: &Value, s: Option<&Value>| -> VmResult<Value> {
        log.borrow_mut().push(std::iter::once(v.clone()).chain(s.cloned()).collect());
        Ok(Value::from("hooked"))
    });
    (hook, calls)
}

#[test]
fn plain_field_goes_through_the_default_hook() {
    let p = Project::new("install();\nlet x = 5;\nprint(f\"{x}\");\n");
    let (launch, out) = p.run(LaunchMode::Bootstrap);
    assert_eq!(out, "5 formatted with None\n");
    assert_eq!(launch.exit_code, 0);
    assert_eq!(launch.context.state(), BootstrapState::Active);
    assert_eq!(launch.context.finder_ids(), vec!["fmthook", "path"]);
    assert_eq!(launch.main_module().unwrap().get("x"), Some(Value::Int(5)));
}

#[test]
fn spec_reaches_the_hook_after_the_value() {
    let p = Project::new("install();\nlet x = 3.14159;\nprint(f\"{x:.2f}\");\n");
    let (hook, calls) = recording_hook();
    let (res, out) = p.run_with(&p.launcher(LaunchMode::Bootstrap).hook(hook));
    res.unwrap();
    assert_eq!(out, "hooked\n");
    assert_eq!(*calls.borrow(), vec![vec![Value::Float(3.14159), Value::from(".2f")]]);
}

#[test]
fn without_install_nothing_is_rewritten() {
    let p = Project::new("let x = 3.14159;\nprint(f\"{x:.2f}\");\n");
    let (launch, out) = p.run(LaunchMode::Bootstrap);
    assert_eq!(out, "3.14\n");
    assert_eq!(launch.context.state(), BootstrapState::Uninstalled);
}

#[test]
fn system_modules_keep_native_formatting() {
    let p = Project::new("install();\nuse fmtlib;\nuse local;\nprint(fmtlib.show(2.5));\nprint(local.show(2.5));\n");
    p.sys_file("fmtlib.fh", "fn show(v) { return f\"{v:.2f}\"; }\n");
    p.file("local.fh", "fn show(v) { return f\"{v:.2f}\"; }\n");

    let (launch, out) = p.run(LaunchMode::Bootstrap);
    assert_eq!(out, "2.50\n2.5 formatted with .2f\n");
    assert!(launch.context.module("fmtlib").unwrap().get("__fmthook__").is_none());
    assert!(launch.context.module("local").unwrap().get("__fmthook__").is_some());
}

#[test]
fn project_root_wins_over_search_paths() {
    let p = Project::new("install();\nuse dup;\nprint(dup.who);\n");
    p.file("dup.fh", "let who = f\"{1}\";\n");
    p.sys_file("dup.fh", "let who = \"system\";\n");
    let (_, out) = p.run(LaunchMode::Bootstrap);
    assert_eq!(out, "1 formatted with None\n");
}

#[test]
fn double_install_neither_duplicates_nor_recurses() {
    let p = Project::new("install();\ninstall();\nprint(f\"{1}\");\n");
    let (launch, out) = p.run(LaunchMode::Bootstrap);
    assert_eq!(out, "1 formatted with None\n");
    assert_eq!(launch.context.finder_ids(), vec!["fmthook", "path"]);
}

#[test]
fn nested_functions_are_rewritten_at_every_depth() {
    let p = Project::new(
        "install();
fn outer(v) {
  fn middle(v) {
    fn inner(v) { return f\"{v:>3}\"; }
    return inner(v);
  }
  return middle(v);
}
print(outer(7));
",
    );
    let (_, out) = p.run(LaunchMode::Bootstrap);
    assert_eq!(out, "7 formatted with >3\n");
}

#[test]
fn a_guest_function_can_replace_the_hook() {
    let p = Project::new(
        "install();
print(f\"{1}\");
fn mine(v) { return \"<\" + str(v) + \">\"; }
__fmthook__ = mine;
print(f\"{2}\");
",
    );
    let (_, out) = p.run(LaunchMode::Bootstrap);
    assert_eq!(out, "1 formatted with None\n<2>\n");
}

#[test]
fn one_guest_hook_serves_fields_with_and_without_spec() {
    let p = Project::new(
        "install();
fn mine(v, s = None) { return \"<\" + str(v) + \"|\" + str(s) + \">\"; }
__fmthook__ = mine;
print(f\"{2:>3}\");
print(f\"{2}\");
",
    );
    let (launch, out) = p.run(LaunchMode::Bootstrap);
    assert_eq!(launch.exit_code, 0);
    assert_eq!(out, "<2|>3>\n<2|None>\n");
}

#[test]
fn hook_errors_reach_the_caller_unchanged() {
    let p = Project::new("install();\nprint(\"before\");\nprint(f\"{1}\");\nprint(\"after\");\n");
    let failing =
        hook_value("__fmthook__", |_: &mut Vm, _: &Value, _: Option<&Value>| -> VmResult<Value> { Err(VmError::Format("boom".into())) });
    let (res, out) = p.run_with(&p.launcher(LaunchMode::Bootstrap).hook(failing));
    assert!(matches!(res, Err(LoadError::Vm(VmError::Format(m))) if m == "boom"));
    assert_eq!(out, "before\n");
}

#[test]
fn exit_code_of_the_reloaded_run_is_kept() {
    let p = Project::new("install();\nprint(f\"{1}\");\nexit(3);\nprint(\"never\");\n");
    let (launch, out) = p.run(LaunchMode::Bootstrap);
    assert_eq!(launch.exit_code, 3);
    assert_eq!(out, "1 formatted with None\n");
}

#[test]
fn eager_mode_matches_bootstrap_output() {
    let main = "install();\nuse local;\nlet n = 4;\nprint(f\"{n:03d}|{local.name!r}\", local.label(n));\n";
    let p = Project::new(main);
    p.file("local.fh", "let name = \"loc\";\nfn label(v) { return f\"#{v}\"; }\n");

    let (boot, boot_out) = p.run(LaunchMode::Bootstrap);
    let (eager, eager_out) = p.run(LaunchMode::Eager);
    assert_eq!(eager_out, boot_out);
    assert_eq!(boot.context.state(), BootstrapState::Active);
    assert_eq!(eager.context.state(), BootstrapState::Active);
    assert_eq!(eager.context.module_names(), vec![MAIN_MODULE.to_string(), "local".to_string()]);
}

#[test]
fn eager_mode_runs_the_entry_module_once() {
    let p = Project::new("print(\"start\");\ninstall();\nprint(f\"{2}\");\n");
    let (_, boot) = p.run(LaunchMode::Bootstrap);
    let (_, eager) = p.run(LaunchMode::Eager);
    assert_eq!(boot, "start\nstart\n2 formatted with None\n");
    assert_eq!(eager, "start\n2 formatted with None\n");
}

#[test]
fn missing_entry_and_missing_module_are_errors() {
    let p = Project::new("install();\nuse nowhere;\n");
    let (res, _) = p.run_with(&p.launcher(LaunchMode::Bootstrap));
    assert!(matches!(res, Err(LoadError::Vm(VmError::Import { name, .. })) if name == "nowhere"));

    let (mut vm, _) = Vm::with_captured_stdout();
    let res = p.launcher(LaunchMode::Eager).run(&mut vm, &p.root.path().join("absent.fh"));
    assert!(matches!(res, Err(LoadError::Read { .. })));
}
