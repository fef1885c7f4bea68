//! Étape « produire l'unité puis l'exécuter » d'un module.

use std::{fs, path::Path, rc::Rc};

use fmthook_core::bytecode::Chunk;
use fmthook_vm::{Module, Vm};
use log::debug;

use crate::{LoadError, LoadResult};

/// Stratégie de chargement d'un module résolu.
pub trait Loader {
    /// Nom court (logs, `Debug`).
    fn kind(&self) -> &'static str;

    /// Unité compilée du module `name` situé en `origin`.
    fn get_code(&self, name: &str, origin: &Path) -> LoadResult<Rc<Chunk>>;

    /// Exécute le module dans son namespace.
    fn exec_module(&self, vm: &mut Vm, module: &Rc<Module>) -> LoadResult<()> { run_module_code(self, vm, module) }
}

/// Exécution par défaut : `get_code` puis exécution dans le namespace du module.
pub fn run_module_code<L: Loader + ?Sized>(loader: &L, vm: &mut Vm, module: &Rc<Module>) -> LoadResult<()> {
    let origin = module.origin().ok_or_else(|| LoadError::NotFound(module.name.clone()))?;
    let code = loader.get_code(&module.name, origin)?;
    vm.run_module(&code, module)?;
    Ok(())
}

/// Lit et compile un source `.fh`, sans transformation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceLoader;

impl Loader for SourceLoader {
    fn kind(&self) -> &'static str { "source" }

    fn get_code(&self, name: &str, origin: &Path) -> LoadResult<Rc<Chunk>> {
        let src = fs::read_to_string(origin).map_err(|source| LoadError::Read { path: origin.to_path_buf(), source })?;
        let filename = origin.display().to_string();
        let chunk = fmthook_compiler::compile_source(&src, Some(&filename))
            .map_err(|source| LoadError::Compile { path: origin.to_path_buf(), source })?;
        debug!("compiled `{name}` from {filename} ({} unit(s))", chunk.unit_count());
        Ok(Rc::new(chunk))
    }
}
