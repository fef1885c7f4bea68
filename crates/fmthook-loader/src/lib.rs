//! fmthook-loader — chargement de modules avec interception du formatage
//!
//! - [`LoadingContext`] : stratégies de résolution ordonnées + table des modules
//! - [`PathFinder`] / [`SourceLoader`] : résolution et chargement par défaut
//! - [`FormatHookFinder`] / [`FormatHookLoader`] : intercepteur limité à la racine du projet
//! - [`install`](bootstrap::install) : activation depuis le module d'entrée (rechargement)
//! - [`Launcher`] : lancement en mode `Bootstrap` ou `Eager`
//!
//! ```no_run
//! use std::path::Path;
//! use fmthook_loader::{LaunchMode, Launcher, LoaderConfig};
//! use fmthook_vm::Vm;
//!
//! let mut vm = Vm::new();
//! let launch = Launcher::new(LoaderConfig::for_project("app"))
//!     .mode(LaunchMode::Eager)
//!     .run(&mut vm, Path::new("app/main.fh"))?;
//! assert_eq!(launch.exit_code, 0);
//! # Ok::<(), fmthook_loader::LoadError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![deny(missing_docs)]

/// Activation (`install()`) et états du bootstrap.
pub mod bootstrap;
/// Configuration (`.fmthook.toml`).
pub mod config;
/// Contexte de chargement.
pub mod context;
/// Erreurs.
pub mod error;
/// Stratégies de résolution.
pub mod finder;
/// Hook de formatage.
pub mod hook;
/// Intercepteur.
pub mod interceptor;
/// Lanceur.
pub mod launcher;
/// Chargeurs.
pub mod source;
/// Résultat de résolution.
pub mod spec;

pub use bootstrap::{install, BootstrapState, INSTALL_NAME};
pub use config::{LoaderConfig, CONFIG_FILE, PATH_ENV};
pub use context::LoadingContext;
pub use error::{LoadError, LoadResult};
pub use finder::{Finder, PathFinder};
pub use hook::{hook_value, DefaultHook, FormatHook, HookKind, HookSlot, NativeFormatHook};
pub use interceptor::{FormatHookFinder, FormatHookLoader};
pub use launcher::{Launch, LaunchMode, Launcher, MAIN_MODULE};
pub use source::{Loader, SourceLoader};
pub use spec::ModuleSpec;
