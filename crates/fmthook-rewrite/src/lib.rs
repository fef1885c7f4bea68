//! fmthook-rewrite — réécriture des opérations de formatage
//!
//! Chaque `FORMAT_VALUE` d'une unité devient un appel au hook de formatage :
//!
//! ```text
//! sans spec   [v]      LOAD_GLOBAL hook ; ROT_TWO   ; CALL 1   -> hook(v)
//! avec spec   [v, s]   LOAD_GLOBAL hook ; ROT_THREE ; CALL 2   -> hook(v, s)
//! ```
//!
//! La convention d'appel de la VM place l'appelé juste sous ses arguments ;
//! la rotation amène le hook (empilé en dernier) sous la valeur et la spec,
//! qui gardent leur ordre. L'effet net de chaque groupe est celui du
//! `FORMAT_VALUE` remplacé (0 ou -1).
//!
//! Les unités imbriquées (constantes `Code`) sont réécrites d'abord (parcours
//! post-ordre). Une unité sans rien à réécrire est rendue telle quelle (même
//! `Rc`). Les erreurs de décodage / réencodage remontent sans traitement.
//!
//! ```
//! use fmthook_core::bytecode::Opcode;
//! use fmthook_rewrite::rewrite;
//!
//! let chunk = fmthook_compiler::compile_source("let x = 5; print(f\"{x}\");", None).unwrap();
//! let out = rewrite(&chunk).unwrap();
//! assert!(out.flags().rewritten);
//! assert!(out.ops.iter().all(|op| op.code != Opcode::FormatValue));
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]
#![deny(missing_docs)]

use std::{fmt, rc::Rc};

use fmthook_core::{
    bytecode::{Arg, Bytecode, Chunk, ChunkFlags, ConstValue, Instr, Item, Opcode, FORMAT_SPEC_PRESENT},
    CoreResult,
};
use log::{debug, trace};

/// Nom réservé sous lequel le hook est injecté dans chaque module.
pub const HOOK_NAME: &str = "__fmthook__";

/* ───────────────────────────── Statistiques ───────────────────────────── */

/// Compteurs d'une réécriture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Unités visitées (racine comprise).
    pub units: usize,
    /// `FORMAT_VALUE` avec spec, devenus `CALL 2`.
    pub rewritten_with_spec: usize,
    /// `FORMAT_VALUE` sans spec, devenus `CALL 1`.
    pub rewritten_without_spec: usize,
}

impl RewriteStats {
    /// Nombre total d'opérations remplacées.
    pub const fn total(&self) -> usize { self.rewritten_with_spec + self.rewritten_without_spec }

    /// Cumule d'autres compteurs.
    pub fn merge(&mut self, other: &Self) {
        self.units += other.units;
        self.rewritten_with_spec += other.rewritten_with_spec;
        self.rewritten_without_spec += other.rewritten_without_spec;
    }
}

impl fmt::Display for RewriteStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unit(s), {} format op(s) rewritten ({} with spec, {} without)",
            self.units,
            self.total(),
            self.rewritten_with_spec,
            self.rewritten_without_spec
        )
    }
}

/* ───────────────────────────── Réécrivain ───────────────────────────── */

/// Réécrivain paramétré par le nom global du hook.
#[derive(Debug, Clone)]
pub struct Rewriter {
    hook_name: String,
    stats: RewriteStats,
}

impl Default for Rewriter {
    fn default() -> Self { Self::new(HOOK_NAME) }
}

impl Rewriter {
    /// Réécrivain qui appelle le global `hook_name`.
    pub fn new(hook_name: impl Into<String>) -> Self { Self { hook_name: hook_name.into(), stats: RewriteStats::default() } }

    /// Nom du hook appelé.
    pub fn hook_name(&self) -> &str { &self.hook_name }

    /// Compteurs cumulés depuis la création.
    pub const fn stats(&self) -> RewriteStats { self.stats }

    /// Réécrit une unité et toutes ses descendantes.
    pub fn rewrite_chunk(&mut self, chunk: &Rc<Chunk>) -> CoreResult<Rc<Chunk>> {
        let before = self.stats;
        let out = self.visit(chunk)?;
        let mut delta = self.stats;
        delta.units -= before.units;
        delta.rewritten_with_spec -= before.rewritten_with_spec;
        delta.rewritten_without_spec -= before.rewritten_without_spec;
        debug!("rewrite `{}`: {delta}", chunk.name);
        Ok(out)
    }

    fn visit(&mut self, chunk: &Rc<Chunk>) -> CoreResult<Rc<Chunk>> {
        self.stats.units += 1;
        let bc = Bytecode::from_chunk(chunk)?;

        let mut changed = false;
        let mut items = Vec::with_capacity(bc.items.len());
        for item in &bc.items {
            let instr = match item {
                Item::Label(l) => {
                    items.push(Item::Label(*l));
                    continue;
                }
                Item::Instr(i) => i,
            };

            if let Some(code) = instr.nested_code() {
                let inner = self.visit(code)?;
                changed |= !Rc::ptr_eq(&inner, code);
                items.push(Item::Instr(Instr::new(Opcode::LoadConst, Arg::Const(ConstValue::Code(inner)), instr.line)));
            } else if instr.opcode == Opcode::FormatValue {
                items.extend(self.hook_call(instr).map(Item::Instr));
                changed = true;
            } else {
                items.push(Item::Instr(instr.clone()));
            }
        }

        if !changed {
            return Ok(Rc::clone(chunk));
        }

        let mut out = bc.with_items(items).to_chunk()?;
        *out.flags_mut() = ChunkFlags { rewritten: true, ..*chunk.flags() };
        Ok(Rc::new(out))
    }

    /// Groupe de remplacement d'un `FORMAT_VALUE`.
    fn hook_call(&mut self, instr: &Instr) -> [Instr; 3] {
        let line = instr.line;
        let with_spec = instr.int_arg() & FORMAT_SPEC_PRESENT != 0;
        let (rot, argc) = if with_spec {
            self.stats.rewritten_with_spec += 1;
            (Opcode::Rot3, 2)
        } else {
            self.stats.rewritten_without_spec += 1;
            (Opcode::Rot2, 1)
        };
        trace!("line {line}: FORMAT_VALUE {:#04x} -> {} {rot} CALL {argc}", instr.int_arg(), self.hook_name);
        [Instr::name(Opcode::LoadGlobal, self.hook_name.as_str(), line), Instr::simple(rot, line), Instr::int(Opcode::Call, argc, line)]
    }
}

/// Réécrit `chunk` avec le hook par défaut ([`HOOK_NAME`]).
pub fn rewrite(chunk: &Chunk) -> CoreResult<Chunk> {
    let out = Rewriter::default().rewrite_chunk(&Rc::new(chunk.clone()))?;
    Ok(Rc::unwrap_or_clone(out))
}

/// Compte les `FORMAT_VALUE` d'une unité et de ses descendantes.
pub fn count_format_ops(chunk: &Chunk) -> usize {
    chunk.ops.iter().filter(|op| op.code == Opcode::FormatValue).count()
        + chunk.nested().map(|c| count_format_ops(c)).sum::<usize>()
}

/* --------------------------------- Tests --------------------------------- */
