//! Stratégies de résolution : nom de module → [`ModuleSpec`].

use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

use log::trace;

use crate::{source::SourceLoader, spec::ModuleSpec};

/// Stratégie de résolution, consultée dans l'ordre du contexte.
pub trait Finder {
    /// Identifiant de la stratégie.
    fn id(&self) -> &str;

    /// `None` si la stratégie ne connaît pas le module ; le contexte passe à la suivante.
    fn find_spec(&self, name: &str) -> Option<ModuleSpec>;
}

/// Vrai si `name` peut servir de nom de fichier (pas de séparateur, pas de `..`).
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Stratégie par défaut : `<dir>/<name>.<ext>` puis `<dir>/<name>/mod.<ext>`, répertoire par répertoire.
#[derive(Debug, Clone)]
pub struct PathFinder {
    dirs: Vec<PathBuf>,
    extension: String,
}

impl PathFinder {
    /// Identifiant.
    pub const ID: &'static str = "path";

    /// Cherche dans `dirs`, dans l'ordre.
    pub fn new(dirs: Vec<PathBuf>, extension: impl Into<String>) -> Self { Self { dirs, extension: extension.into() } }

    /// Répertoires consultés.
    pub fn dirs(&self) -> &[PathBuf] { &self.dirs }

    /// Fichier source de `name`, s'il existe sous l'un des répertoires.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        if !is_valid_module_name(name) {
            return None;
        }
        self.dirs.iter().find_map(|dir| self.locate_in(dir, name))
    }

    fn locate_in(&self, dir: &Path, name: &str) -> Option<PathBuf> {
        let file = dir.join(format!("{name}.{}", self.extension));
        if file.is_file() {
            return Some(file);
        }
        let package = dir.join(name).join(format!("mod.{}", self.extension));
        package.is_file().then_some(package)
    }
}

impl Finder for PathFinder {
    fn id(&self) -> &str { Self::ID }

    fn find_spec(&self, name: &str) -> Option<ModuleSpec> {
        let origin = self.locate(name);
        trace!("path finder: `{name}` -> {origin:?}");
        origin.map(|o| ModuleSpec::new(name, o, Rc::new(SourceLoader)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn files_win_over_packages_and_order_is_kept() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::create_dir(a.path().join("util")).unwrap();
        fs::write(a.path().join("util/mod.fh"), "").unwrap();
        fs::write(b.path().join("util.fh"), "").unwrap();
        fs::write(a.path().join("only.fh"), "").unwrap();
        fs::write(b.path().join("only.fh"), "").unwrap();

        let finder = PathFinder::new(vec![a.path().into(), b.path().into()], "fh");
        assert_eq!(finder.locate("util"), Some(a.path().join("util/mod.fh")));
        assert_eq!(finder.locate("only"), Some(a.path().join("only.fh")));
        assert_eq!(finder.locate("missing"), None);
        assert_eq!(finder.locate("../only"), None);

        let spec = finder.find_spec("only").unwrap();
        assert_eq!(spec.name, "only");
        assert_eq!(spec.loader.kind(), "source");
    }
}
