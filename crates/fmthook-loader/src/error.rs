use std::{io, path::PathBuf};

use fmthook_compiler::CompileError;
use fmthook_core::CoreError;
use fmthook_vm::VmError;
use thiserror::Error;

/// Erreurs de chargement.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Aucune stratégie n'a trouvé le module.
    #[error("module `{0}` not found")]
    NotFound(String),

    /// Nom de module inutilisable comme chemin.
    #[error("invalid module name `{0}`")]
    InvalidName(String),

    /// Lecture du source impossible.
    #[error("cannot read `{}`: {source}", path.display())]
    Read {
        /// Fichier visé.
        path: PathBuf,
        /// Cause.
        #[source]
        source: io::Error,
    },

    /// Source invalide.
    #[error("cannot compile `{}`: {source}", path.display())]
    Compile {
        /// Fichier visé.
        path: PathBuf,
        /// Cause.
        #[source]
        source: CompileError,
    },

    /// Fichier de configuration invalide.
    #[error("invalid config `{}`: {reason}", path.display())]
    Config {
        /// Fichier visé.
        path: PathBuf,
        /// Cause.
        reason: String,
    },

    /// Décodage / réencodage d'une unité (réécriture).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Erreur (ou signal `Exit`) remontée par l'exécution du module.
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl LoadError {
    /// Code de sortie si l'erreur est le signal `Exit`.
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Vm(VmError::Exit { code }) => Some(*code),
            _ => None,
        }
    }
}

/// Une erreur de chargement vue depuis la VM (`IMPORT`, `install()`).
/// Les erreurs d'exécution repassent telles quelles.
impl From<LoadError> for VmError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Vm(inner) => inner,
            LoadError::NotFound(name) => Self::Import { reason: "not found in the search path".into(), name },
            LoadError::InvalidName(name) => Self::Import { reason: "invalid module name".into(), name },
            LoadError::Core(c) => Self::Core(c),
            other => Self::Msg(other.to_string()),
        }
    }
}

/// Résultat du chargeur.
pub type LoadResult<T> = std::result::Result<T, LoadError>;
