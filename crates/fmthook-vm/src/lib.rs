//! fmthook-vm — machine à pile pour les unités `Chunk`
//!
//! - `Value`   : valeurs dynamiques (None/Bool/Int/Float/Str, fonctions, natives, modules)
//! - `Module`  : namespace mutable possédé par un module chargé
//! - `Vm`      : exécution, builtins, sortie capturable, pile de frames
//! - `Importer`: point d'entrée des imports (implémenté par le contexte de chargement)
//! - `format`  : formateur natif (mini-langage `[[fill]align][sign][0][width][.precision][type]`)
//!
//! La VM n'a aucun état global : tout passe par l'instance `Vm` et l'`Importer`
//! qu'on lui donne.
//!
//! ```
//! use std::rc::Rc;
//! use fmthook_vm::{Module, Vm};
//!
//! let code = fmthook_compiler::compile_source("print(f\"{6 * 7:>4}\");", None).unwrap();
//! let (mut vm, out) = Vm::with_captured_stdout();
//! vm.run_module(&Rc::new(code), &Rc::new(Module::new("__main__", None))).unwrap();
//! assert_eq!(out.get(), "  42\n");
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![deny(missing_docs)]

/// Natives de base (`print`, `str`, `repr`, `format`, `len`, `type`, `exit`).
pub mod builtins;
/// Erreurs d'exécution.
pub mod error;
/// Formateur natif.
pub mod format;
/// Sorties (stdout réel ou capturé).
pub mod output;
/// Valeurs et modules.
pub mod value;
/// Boucle d'exécution.
pub mod vm;

pub use error::{VmError, VmResult};
pub use output::Captured;
pub use value::{Function, Module, Native, NativeFn, Value};
pub use vm::{Importer, Vm};

/* -------------------------------- Prelude -------------------------------- */

/// Prelude pratique pour importer d’un coup.
pub mod prelude {
    pub use crate::{
        format::{format_value, FormatSpec},
        Captured, Function, Importer, Module, Native, NativeFn, Value, Vm, VmError, VmResult,
    };
}
