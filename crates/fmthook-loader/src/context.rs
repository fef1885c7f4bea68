//! Contexte de chargement : liste ordonnée des stratégies, table des modules,
//! hook courant et état du bootstrap. Partagé par `Rc` avec la VM (imports)
//! et la native `install`.

use std::{
    cell::{Cell, RefCell},
    path::Path,
    rc::Rc,
};

use fmthook_vm::{Importer, Module, Value, Vm, VmResult};
use indexmap::IndexMap;
use log::{debug, info};

use crate::{
    bootstrap::{install_native, BootstrapState},
    config::LoaderConfig,
    finder::{is_valid_module_name, Finder, PathFinder},
    hook::HookSlot,
    interceptor::{FormatHookFinder, FormatHookLoader},
    spec::ModuleSpec,
    LoadError, LoadResult,
};

/// État de chargement d'un programme.
pub struct LoadingContext {
    config: LoaderConfig,
    finders: RefCell<Vec<Rc<dyn Finder>>>,
    modules: RefCell<IndexMap<String, Rc<Module>>>,
    hook: HookSlot,
    state: Cell<BootstrapState>,
}

impl LoadingContext {
    /// Contexte avec la seule stratégie par défaut (racine du projet puis chemins de recherche).
    pub fn new(config: LoaderConfig) -> Rc<Self> {
        let default: Rc<dyn Finder> = Rc::new(PathFinder::new(config.default_dirs(), config.extension.clone()));
        let hook = config.hook.to_value(&config.hook_name);
        Rc::new(Self {
            config,
            finders: RefCell::new(vec![default]),
            modules: RefCell::new(IndexMap::new()),
            hook: HookSlot::new(hook),
            state: Cell::new(BootstrapState::Uninstalled),
        })
    }

    /// Branche le contexte sur `vm` : imports et native `install`.
    pub fn attach(self: &Rc<Self>, vm: &mut Vm) {
        vm.set_importer(Rc::clone(self) as Rc<dyn Importer>);
        vm.register_native(install_native(self));
    }

    /// Configuration.
    pub const fn config(&self) -> &LoaderConfig { &self.config }

    /* ───── Hook ───── */

    /// Hook injecté par les chargeurs créés ensuite.
    pub fn hook(&self) -> Value { self.hook.get() }

    /// Remplace le hook injecté, y compris pour un intercepteur déjà enregistré.
    pub fn set_hook(&self, hook: Value) { self.hook.set(hook); }

    /* ───── Bootstrap ───── */

    /// État courant.
    pub fn state(&self) -> BootstrapState { self.state.get() }

    pub(crate) fn set_state(&self, next: BootstrapState) {
        let prev = self.state.replace(next);
        if prev != next {
            info!("bootstrap: {prev} -> {next}");
        }
    }

    /* ───── Stratégies ───── */

    /// Identifiants des stratégies, dans l'ordre de consultation.
    pub fn finder_ids(&self) -> Vec<String> { self.finders.borrow().iter().map(|f| f.id().to_string()).collect() }

    /// Ajoute une stratégie en fin de liste.
    pub fn push_finder(&self, finder: Rc<dyn Finder>) { self.finders.borrow_mut().push(finder); }

    /// Vrai si l'intercepteur est en tête.
    pub fn interceptor_is_foremost(&self) -> bool {
        self.finders.borrow().first().is_some_and(|f| f.id() == FormatHookFinder::ID)
    }

    /// Place l'intercepteur en tête ; `false` s'il y était déjà.
    pub fn register_interceptor(&self) -> bool {
        if self.interceptor_is_foremost() {
            return false;
        }
        self.finders.borrow_mut().insert(0, Rc::new(self.interceptor()));
        debug!("interceptor registered under {}", self.config.project_root.display());
        true
    }

    /// Intercepteur configuré (racine du projet, hook courant).
    pub fn interceptor(&self) -> FormatHookFinder {
        FormatHookFinder::new(
            self.config.project_root.clone(),
            &self.config.extension,
            self.config.hook_name.clone(),
            self.hook.clone(),
        )
    }

    /// Chargeur de l'intercepteur lié à un module précis.
    pub fn interceptor_loader(&self, name: &str, origin: &Path) -> FormatHookLoader {
        FormatHookLoader::new(name, origin, self.config.hook_name.clone(), self.hook())
    }

    /// Consulte les stratégies dans l'ordre ; la première qui répond l'emporte.
    pub fn find_spec(&self, name: &str) -> Option<ModuleSpec> {
        let finders = self.finders.borrow().clone();
        let found = finders.iter().find_map(|f| f.find_spec(name).map(|spec| (f.id().to_string(), spec)));
        match &found {
            Some((id, spec)) => debug!("resolve `{name}`: {id} -> {} ({})", spec.origin.display(), spec.loader.kind()),
            None => debug!("resolve `{name}`: no strategy"),
        }
        found.map(|(_, spec)| spec)
    }

    /* ───── Modules ───── */

    /// Module déjà chargé.
    pub fn module(&self, name: &str) -> Option<Rc<Module>> { self.modules.borrow().get(name).cloned() }

    /// Noms des modules chargés, dans l'ordre de chargement.
    pub fn module_names(&self) -> Vec<String> { self.modules.borrow().keys().cloned().collect() }

    /// Enregistre (ou remplace) un module.
    pub fn set_module(&self, module: Rc<Module>) { self.modules.borrow_mut().insert(module.name.clone(), module); }

    /// Charge `name` (ou le retrouve) : résolution, enregistrement, exécution.
    pub fn load_module(&self, vm: &mut Vm, name: &str) -> LoadResult<Rc<Module>> {
        if let Some(m) = self.module(name) {
            return Ok(m);
        }
        if !is_valid_module_name(name) {
            return Err(LoadError::InvalidName(name.to_string()));
        }
        let spec = self.find_spec(name).ok_or_else(|| LoadError::NotFound(name.to_string()))?;
        let module = Rc::new(Module::new(name, Some(spec.origin.clone())));
        // visible avant exécution : un import circulaire voit le module partiel
        self.set_module(Rc::clone(&module));
        if let Err(e) = spec.loader.exec_module(vm, &module) {
            self.modules.borrow_mut().shift_remove(name);
            return Err(e);
        }
        Ok(module)
    }
}

impl Importer for LoadingContext {
    fn import(&self, vm: &mut Vm, name: &str) -> VmResult<Rc<Module>> { Ok(self.load_module(vm, name)?) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HookKind;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn interceptor_is_prepended_once() {
        let ctx = LoadingContext::new(LoaderConfig::for_project("."));
        assert_eq!(ctx.finder_ids(), vec!["path"]);
        assert!(!ctx.interceptor_is_foremost());
        assert!(ctx.register_interceptor());
        assert!(!ctx.register_interceptor());
        assert_eq!(ctx.finder_ids(), vec!["fmthook", "path"]);
    }

    #[test]
    fn project_modules_go_through_the_interceptor_only_once_registered() {
        let root = tempfile::tempdir().unwrap();
        let sys = tempfile::tempdir().unwrap();
        fs::write(root.path().join("local.fh"), "").unwrap();
        fs::write(sys.path().join("stdmod.fh"), "").unwrap();
        let ctx = LoadingContext::new(LoaderConfig::for_project(root.path()).search_path(sys.path()));

        assert_eq!(ctx.find_spec("local").unwrap().loader.kind(), "source");
        ctx.register_interceptor();
        assert_eq!(ctx.find_spec("local").unwrap().loader.kind(), "fmthook");
        assert_eq!(ctx.find_spec("stdmod").unwrap().loader.kind(), "source");
        assert!(ctx.find_spec("nowhere").is_none());
    }

    #[test]
    fn hook_replaced_after_registration_reaches_new_modules() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("m.fh"), "let s = f\"{1}\";").unwrap();
        let ctx = LoadingContext::new(LoaderConfig::for_project(root.path()));
        let (mut vm, _) = Vm::with_captured_stdout();
        ctx.attach(&mut vm);

        assert!(ctx.register_interceptor());
        ctx.set_hook(HookKind::Native.to_value(&ctx.config().hook_name));
        let m = ctx.load_module(&mut vm, "m").unwrap();
        assert_eq!(m.get("s"), Some(Value::from("1")));
    }

    #[test]
    fn failed_modules_are_forgotten() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("bad.fh"), "print(nope);").unwrap();
        let ctx = LoadingContext::new(LoaderConfig::for_project(root.path()));
        let (mut vm, _) = Vm::with_captured_stdout();
        ctx.attach(&mut vm);
        assert!(matches!(ctx.load_module(&mut vm, "bad"), Err(LoadError::Vm(_))));
        assert!(ctx.module("bad").is_none());
        assert!(matches!(ctx.load_module(&mut vm, "../bad"), Err(LoadError::InvalidName(_))));
        assert!(matches!(ctx.load_module(&mut vm, "gone"), Err(LoadError::NotFound(_))));
    }
}
