//! Lanceur : choisit la stratégie de chargement du module d'entrée avant son
//! premier chargement.

use std::{path::Path, rc::Rc};

use fmthook_vm::{Module, Value, Vm};
use log::info;

use crate::{
    bootstrap::BootstrapState,
    config::LoaderConfig,
    context::LoadingContext,
    source::{Loader, SourceLoader},
    LoadResult,
};

/// Nom du module d'entrée.
pub const MAIN_MODULE: &str = "__main__";

/// Mode de lancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMode {
    /// Chargement normal ; `install()` déclenche le rechargement.
    #[default]
    Bootstrap,
    /// Intercepteur actif dès le premier chargement (une seule exécution).
    Eager,
}

/// Issue d'un lancement.
pub struct Launch {
    /// Code de sortie (signal `Exit`, 0 sinon).
    pub exit_code: i32,
    /// Contexte utilisé (modules, état du bootstrap).
    pub context: Rc<LoadingContext>,
}

impl Launch {
    /// Module d'entrée tel qu'enregistré à la fin.
    pub fn main_module(&self) -> Option<Rc<Module>> { self.context.module(MAIN_MODULE) }
}

/// Lance un programme `.fh`.
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    config: LoaderConfig,
    mode: LaunchMode,
    hook: Option<Value>,
}

impl Launcher {
    /// Lanceur pour `config`.
    pub fn new(config: LoaderConfig) -> Self { Self { config, mode: LaunchMode::default(), hook: None } }

    /// Change le mode.
    #[must_use]
    pub const fn mode(mut self, mode: LaunchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Remplace le hook configuré.
    #[must_use]
    pub fn hook(mut self, hook: Value) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Exécute `entry` comme module [`MAIN_MODULE`].
    pub fn run(&self, vm: &mut Vm, entry: &Path) -> LoadResult<Launch> {
        let context = LoadingContext::new(self.config.clone());
        if let Some(hook) = &self.hook {
            context.set_hook(hook.clone());
        }
        context.attach(vm);

        let loader: Rc<dyn Loader> = match self.mode {
            LaunchMode::Bootstrap => Rc::new(SourceLoader),
            LaunchMode::Eager => {
                context.register_interceptor();
                context.set_state(BootstrapState::Active);
                Rc::new(context.interceptor_loader(MAIN_MODULE, entry))
            }
        };
        info!("launch {} ({:?}, loader {})", entry.display(), self.mode, loader.kind());

        let main = Rc::new(Module::new(MAIN_MODULE, Some(entry.to_path_buf())));
        context.set_module(Rc::clone(&main));
        let exit_code = match loader.exec_module(vm, &main) {
            Ok(()) => 0,
            Err(e) => match e.exit_code() {
                Some(code) => code,
                None => return Err(e),
            },
        };
        vm.flush()?;
        Ok(Launch { exit_code, context })
    }
}
