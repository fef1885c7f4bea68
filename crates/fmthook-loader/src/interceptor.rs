//! Intercepteur : résolution limitée à la racine du projet, unité réécrite,
//! hook injecté dans le namespace avant exécution.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

use fmthook_core::bytecode::Chunk;
use fmthook_rewrite::Rewriter;
use fmthook_vm::{Module, Value, Vm};
use log::debug;

use crate::{
    finder::{Finder, PathFinder},
    hook::HookSlot,
    source::{run_module_code, Loader, SourceLoader},
    spec::ModuleSpec,
    LoadResult,
};

/// Stratégie de résolution de l'intercepteur.
#[derive(Clone)]
pub struct FormatHookFinder {
    root: PathFinder,
    hook_name: String,
    hook: HookSlot,
}

impl FormatHookFinder {
    /// Identifiant.
    pub const ID: &'static str = "fmthook";

    /// Ne résout que sous `project_root` ; le hook est lu dans `hook` à chaque résolution.
    pub fn new(project_root: impl Into<PathBuf>, extension: &str, hook_name: impl Into<String>, hook: HookSlot) -> Self {
        Self { root: PathFinder::new(vec![project_root.into()], extension), hook_name: hook_name.into(), hook }
    }

    /// Racine éligible.
    pub fn root(&self) -> &Path { self.root.dirs().first().map_or_else(|| Path::new("."), PathBuf::as_path) }
}

impl Finder for FormatHookFinder {
    fn id(&self) -> &str { Self::ID }

    fn find_spec(&self, name: &str) -> Option<ModuleSpec> {
        let spec = self.root.find_spec(name)?;
        let loader = FormatHookLoader::new(name, &spec.origin, self.hook_name.clone(), self.hook.get());
        Some(ModuleSpec { loader: Rc::new(loader), ..spec })
    }
}

/// Chargeur lié à un module : unité par défaut, puis réécrite.
#[derive(Clone)]
pub struct FormatHookLoader {
    name: String,
    origin: PathBuf,
    hook_name: String,
    hook: Value,
}

impl FormatHookLoader {
    /// Chargeur pour le module `name` situé en `origin`.
    pub fn new(name: impl Into<String>, origin: &Path, hook_name: impl Into<String>, hook: Value) -> Self {
        Self { name: name.into(), origin: origin.to_path_buf(), hook_name: hook_name.into(), hook }
    }

    /// Module lié.
    pub fn name(&self) -> &str { &self.name }

    /// Fichier lié.
    pub fn origin(&self) -> &Path { &self.origin }

    /// Module neuf (namespace vide) pour le nom et le fichier liés.
    pub fn new_module(&self) -> Rc<Module> { Rc::new(Module::new(self.name.clone(), Some(self.origin.clone()))) }
}

impl Loader for FormatHookLoader {
    fn kind(&self) -> &'static str { "fmthook" }

    fn get_code(&self, name: &str, origin: &Path) -> LoadResult<Rc<Chunk>> {
        let code = SourceLoader.get_code(name, origin)?;
        let mut rw = Rewriter::new(self.hook_name.as_str());
        let out = rw.rewrite_chunk(&code)?;
        debug!("fmthook loader: `{name}` {}", rw.stats());
        Ok(out)
    }

    fn exec_module(&self, vm: &mut Vm, module: &Rc<Module>) -> LoadResult<()> {
        module.set(self.hook_name.as_str(), self.hook.clone());
        run_module_code(self, vm, module)
    }
}
