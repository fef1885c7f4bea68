//! Activation en cours d'exécution : `install()` appelé en tête du module d'entrée.
//!
//! ```text
//! Uninstalled --install()--> Reloading --install() (réentrant)--> Active
//! ```
//!
//! Le premier appel place l'intercepteur en tête, recharge le module appelant
//! depuis son fichier à travers le chargeur de l'intercepteur, puis renvoie le
//! signal `Exit` pour abandonner l'exécution d'origine. Dans l'exécution
//! rechargée, `install()` trouve l'intercepteur déjà en tête et ne fait rien.

use std::{fmt, path::Path, rc::Rc};

use fmthook_vm::{Native, Value, Vm, VmError, VmResult};
use log::info;

use crate::{context::LoadingContext, source::Loader};

/// Nom de la native d'activation.
pub const INSTALL_NAME: &str = "install";

/// État du bootstrap d'un contexte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapState {
    /// Intercepteur absent.
    #[default]
    Uninstalled,
    /// Seconde exécution du module d'entrée en cours.
    Reloading,
    /// Intercepteur actif, exécution normale.
    Active,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninstalled => "uninstalled",
            Self::Reloading => "reloading",
            Self::Active => "active",
        })
    }
}

/// Native `install()` liée au contexte (référence faible).
pub fn install_native(ctx: &Rc<LoadingContext>) -> Native {
    let ctx = Rc::downgrade(ctx);
    Native::new(INSTALL_NAME, 0, 0, move |vm, _| {
        let ctx = ctx.upgrade().ok_or_else(|| VmError::Msg("install(): loading context is gone".into()))?;
        install(&ctx, vm)
    })
}

/// Corps de `install()`.
pub fn install(ctx: &LoadingContext, vm: &mut Vm) -> VmResult<Value> {
    if ctx.interceptor_is_foremost() {
        if ctx.state() == BootstrapState::Reloading {
            ctx.set_state(BootstrapState::Active);
        }
        return Ok(Value::None);
    }

    let caller = vm.current_module().ok_or_else(|| VmError::Msg("install() must be called from a module".into()))?;
    let origin = caller
        .origin()
        .map(Path::to_path_buf)
        .ok_or_else(|| VmError::Msg(format!("install(): module `{}` has no source file", caller.name)))?;

    ctx.register_interceptor();
    ctx.set_state(BootstrapState::Reloading);

    let loader = ctx.interceptor_loader(&caller.name, &origin);
    let fresh = loader.new_module();
    ctx.set_module(Rc::clone(&fresh));

    let code = match loader.exec_module(vm, &fresh) {
        Ok(()) => 0,
        Err(e) => match e.exit_code() {
            Some(code) => code,
            None => return Err(e.into()),
        },
    };
    info!("`{}` reloaded from {}; original run abandoned (exit {code})", caller.name, origin.display());
    Err(VmError::Exit { code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;

    #[test]
    fn install_needs_a_calling_module() {
        let ctx = LoadingContext::new(LoaderConfig::default());
        let mut vm = Vm::new();
        ctx.attach(&mut vm);
        let f = vm.builtin(INSTALL_NAME).unwrap();
        assert!(matches!(vm.call(&f, &[]), Err(VmError::Msg(_))));
        assert_eq!(ctx.state(), BootstrapState::Uninstalled);
    }

    #[test]
    fn foremost_interceptor_makes_install_a_no_op() {
        let ctx = LoadingContext::new(LoaderConfig::default());
        ctx.register_interceptor();
        ctx.set_state(BootstrapState::Reloading);
        let mut vm = Vm::new();
        assert!(matches!(install(&ctx, &mut vm), Ok(Value::None)));
        assert_eq!(ctx.state(), BootstrapState::Active);
        assert_eq!(ctx.finder_ids(), vec!["fmthook", "path"]);
    }
}
