//! Résultat de résolution : nom, fichier d'origine et chargeur retenu.

use std::{
    fmt,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::source::Loader;

/// Résultat d'une résolution, consommé aussitôt par le chargement.
#[derive(Clone)]
pub struct ModuleSpec {
    /// Nom du module.
    pub name: String,
    /// Fichier source trouvé.
    pub origin: PathBuf,
    /// Stratégie de chargement retenue.
    pub loader: Rc<dyn Loader>,
}

impl ModuleSpec {
    /// Nouveau spec.
    pub fn new(name: impl Into<String>, origin: impl Into<PathBuf>, loader: Rc<dyn Loader>) -> Self {
        Self { name: name.into(), origin: origin.into(), loader }
    }

    /// Fichier source.
    pub fn origin(&self) -> &Path { &self.origin }
}

impl fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("loader", &self.loader.kind())
            .finish()
    }
}
