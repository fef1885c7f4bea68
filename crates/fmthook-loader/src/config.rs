//! Configuration du chargeur (`.fmthook.toml`).
//!
//! ```toml
//! project_root = "."            # seule racine éligible à la réécriture
//! search_paths = ["/usr/lib/fmthook"]
//! hook_name    = "__fmthook__"
//! hook         = "default"      # ou "native"
//! extension    = "fh"
//! ```
//!
//! Les chemins relatifs sont résolus depuis le dossier du fichier.

use std::{
    env,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use fmthook_rewrite::HOOK_NAME;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{hook::HookKind, LoadError, LoadResult};

/// Nom du fichier de configuration, cherché en remontant depuis l'entrée.
pub const CONFIG_FILE: &str = ".fmthook.toml";

/// Variable d'environnement ajoutant des chemins de recherche.
pub const PATH_ENV: &str = "FMTHOOK_PATH";

/// Configuration du chargeur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Racine du projet : seuls ses modules sont réécrits.
    pub project_root: PathBuf,
    /// Répertoires « système » / tiers, consultés par la stratégie par défaut seulement.
    pub search_paths: Vec<PathBuf>,
    /// Nom réservé du hook dans les namespaces.
    pub hook_name: String,
    /// Hook injecté.
    pub hook: HookKind,
    /// Extension des sources.
    pub extension: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            search_paths: Vec::new(),
            hook_name: HOOK_NAME.to_string(),
            hook: HookKind::Default,
            extension: "fh".to_string(),
        }
    }
}

impl LoaderConfig {
    /// Configuration par défaut enracinée en `root`.
    pub fn for_project(root: impl Into<PathBuf>) -> Self { Self { project_root: root.into(), ..Self::default() } }

    /// Parse un TOML ; les chemins relatifs partent de `base`.
    pub fn from_toml_str(src: &str, base: &Path) -> Result<Self, toml::de::Error> {
        let mut cfg: Self = toml::from_str(src)?;
        cfg.project_root = base.join(&cfg.project_root);
        for p in &mut cfg.search_paths {
            *p = base.join(&*p);
        }
        Ok(cfg)
    }

    /// Charge un fichier explicite.
    pub fn load(path: &Path) -> LoadResult<Self> {
        let src = fs::read_to_string(path).map_err(|source| LoadError::Read { path: path.to_path_buf(), source })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&src, base).map_err(|e| LoadError::Config { path: path.to_path_buf(), reason: e.to_string() })
    }

    /// Recherche ascendante de [`CONFIG_FILE`] depuis `start` ; à défaut, projet enraciné en `start`.
    pub fn discover(start: &Path) -> LoadResult<Self> {
        let mut cur = start.to_path_buf();
        loop {
            let cand = cur.join(CONFIG_FILE);
            if cand.is_file() {
                debug!("config: {}", cand.display());
                return Self::load(&cand);
            }
            if !cur.pop() {
                break;
            }
        }
        Ok(Self::for_project(start))
    }

    /// Ajoute les chemins de [`PATH_ENV`] s'il est défini.
    #[must_use]
    pub fn with_env_paths(self) -> Self {
        match env::var_os(PATH_ENV) {
            Some(v) => self.with_paths_from(&v),
            None => self,
        }
    }

    /// Ajoute une liste de chemins au format `PATH` de la plateforme.
    #[must_use]
    pub fn with_paths_from(mut self, value: &OsStr) -> Self {
        self.search_paths.extend(env::split_paths(value).filter(|p| !p.as_os_str().is_empty()));
        self
    }

    /// Ajoute un répertoire de recherche.
    #[must_use]
    pub fn search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    /// Ordre de la stratégie par défaut : racine du projet, puis chemins de recherche.
    pub fn default_dirs(&self) -> Vec<PathBuf> {
        std::iter::once(self.project_root.clone()).chain(self.search_paths.iter().cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn relative_paths_are_anchored() {
        let cfg = LoaderConfig::from_toml_str(
            "project_root = \"app\"\nsearch_paths = [\"lib\", \"/abs\"]\nhook = \"native\"\n",
            Path::new("/p"),
        )
        .unwrap();
        assert_eq!(cfg.project_root, PathBuf::from("/p/app"));
        assert_eq!(cfg.search_paths, vec![PathBuf::from("/p/lib"), PathBuf::from("/abs")]);
        assert_eq!(cfg.hook, HookKind::Native);
        assert_eq!(cfg.hook_name, HOOK_NAME);
        assert_eq!(cfg.extension, "fh");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(LoaderConfig::from_toml_str("hooks = 1", Path::new(".")).is_err());
    }

    #[test]
    fn discovery_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "hook_name = \"fmt\"\n").unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let cfg = LoaderConfig::discover(&nested).unwrap();
        assert_eq!(cfg.hook_name, "fmt");
        assert_eq!(cfg.project_root, dir.path().join("."));

        let bare = tempfile::tempdir().unwrap();
        assert_eq!(LoaderConfig::discover(bare.path()).unwrap(), LoaderConfig::for_project(bare.path()));
    }

    #[test]
    fn path_lists_are_split() {
        let joined = env::join_paths(["/x", "/y"]).unwrap();
        let cfg = LoaderConfig::for_project("/p").with_paths_from(&joined);
        assert_eq!(cfg.default_dirs(), vec![PathBuf::from("/p"), PathBuf::from("/x"), PathBuf::from("/y")]);
    }
}
