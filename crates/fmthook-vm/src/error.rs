use std::io;

use fmthook_core::CoreError;
use thiserror::Error;

/// Erreurs runtime.
#[derive(Debug, Error)]
pub enum VmError {
    /// Nom introuvable (namespace, builtins, attribut).
    #[error("name `{0}` is not defined")]
    Name(String),

    /// Type inattendu (message court).
    #[error("type error: {0}")]
    Type(String),

    /// Arité invalide.
    #[error("{name}() takes {expected} argument(s), {got} given")]
    Arity {
        /// Fonction appelée.
        name: String,
        /// Arité attendue (`1` ou `1..=2`).
        expected: String,
        /// Nombre d'arguments effectivement fournis lors de l'appel.
        got: usize,
    },

    /// Spécificateur de format invalide ou incompatible.
    #[error("format error: {0}")]
    Format(String),

    /// Import impossible.
    #[error("cannot import `{name}`: {reason}")]
    Import {
        /// Module demandé.
        name: String,
        /// Cause.
        reason: String,
    },

    /// Pile incohérente à l'exécution (unité mal formée).
    #[error("stack error in `{unit}` at pc {pc}: {reason}")]
    Stack {
        /// Unité fautive.
        unit: String,
        /// Position.
        pc: usize,
        /// Cause.
        reason: String,
    },

    /// I/O hôte.
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// Unité invalide (décodage, opérande).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Message générique.
    #[error("{0}")]
    Msg(String),

    /// Signal de fin : abandonne le chemin d'exécution courant.
    #[error("exit({code})")]
    Exit {
        /// Code de sortie du processus.
        code: i32,
    },
}

impl VmError {
    /// Construit une erreur de type.
    pub fn ty(msg: impl Into<String>) -> Self { Self::Type(msg.into()) }

    /// Vrai pour le signal `Exit`.
    pub const fn is_exit(&self) -> bool { matches!(self, Self::Exit { .. }) }
}

/// Résultat de la VM.
pub type VmResult<T> = std::result::Result<T, VmError>;
