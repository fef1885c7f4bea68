//! fmthook-core — primitives partagées
//!
//! Fournit :
//! - `SourceId`, `Pos`, `Span`, `Spanned<T>`
//! - le jeu d'instructions (`Opcode`, `BinOp`, `UnaryOp`, `Conversion`)
//! - les unités compilées (`Chunk`) et leur forme décodée à labels (`Bytecode`)
//! - `crc32_ieee` (compact, sans table)
//! - Erreurs `CoreError` + alias `CoreResult<T>`
//!
//! Features :
//! - `serde` (par défaut) : derive (dé)sérialisation sur les structures de position

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use std::borrow::Cow;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Primitives de bytecode (opcodes, chunk, forme décodée, analyse de pile, asm/disasm).
pub mod bytecode;

/// Raccourci : assembleur textuel.
pub use bytecode::asm;
/// Raccourci : désassembleur textuel.
pub use bytecode::disasm;
/// Raccourci : validations et analyse de profondeur de pile.
pub use bytecode::helpers;

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun au core.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/* ─────────────────────────── Spans / Positions ─────────────────────────── */

/// Identifiant de source (fichier, buffer, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceId(pub u32);

/// Position (offset byte) depuis le début de la source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pos(pub u32);

impl Pos {
    /// Position nulle.
    pub const ZERO: Self = Self(0);
    /// Addition saturée.
    #[must_use]
    pub const fn saturating_add(self, v: u32) -> Self { Self(self.0.saturating_add(v)) }
}

/// Plage (demi-ouverte) `[start, end)` dans une source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Source d’où provient l’item.
    pub source: SourceId,
    /// Début inclus.
    pub start: Pos,
    /// Fin exclue.
    pub end: Pos,
}

impl Span {
    /// Crée un span.
    pub const fn new(source: SourceId, start: Pos, end: Pos) -> Self { Self { source, start, end } }
    /// Longueur en bytes.
    pub const fn len(&self) -> u32 { self.end.0.saturating_sub(self.start.0) }
    /// Vrai si le span est vide.
    pub const fn is_empty(&self) -> bool { self.start.0 >= self.end.0 }
    /// Plus petit span couvrant `self` et `other`.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        Self { source: self.source, start: self.start.min(other.start), end: self.end.max(other.end) }
    }
}

/// Wrapper utilitaire « valeur + span ».
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spanned<T> {
    /// La valeur.
    pub value: T,
    /// La localisation.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Construit un `Spanned<T>`.
    pub const fn new(value: T, span: Span) -> Self { Self { value, span } }
    /// Applique une fonction à la valeur et conserve le span.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> { Spanned { value: f(self.value), span: self.span } }
}

/* ─────────────────────────── CRC32 IEEE ─────────────────────────── */

/// CRC32 (IEEE 802.3), implémentation compacte sans table.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in data {
        let mut x = (crc ^ u32::from(b)) & 0xFF;
        // 8 itérations (bitwise), polynôme 0xEDB88320
        for _ in 0..8 {
            let mask = (x & 1).wrapping_neg() & 0xEDB8_8320;
            x = (x >> 1) ^ mask;
        }
        crc = (crc >> 8) ^ x;
    }
    !crc
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs de bas niveau communes (encodage, décodage, validation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Magic de chunk invalide (attendu `b"FHCK"`).
    #[error("invalid chunk magic")]
    InvalidMagic,
    /// Fin de buffer inattendue.
    #[error("unexpected EOF: need {needed} bytes at {at}")]
    UnexpectedEof {
        /// Nombre d’octets manquants.
        needed: u64,
        /// Offset où l’erreur s’est produite.
        at: u64,
    },
    /// CRC32 du payload différent de celui enregistré.
    #[error("hash mismatch (crc32): expected=0x{expected:08X}, found=0x{found:08X}")]
    HashMismatch {
        /// CRC32 recalculé.
        expected: u32,
        /// CRC32 lu.
        found: u32,
    },
    /// Octet d'opcode inconnu.
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),
    /// Mnémonique inconnu (assembleur).
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    /// Opérande incohérent avec l'opcode.
    #[error("invalid argument for {opcode} at pc {pc}: {reason}")]
    InvalidArg {
        /// Mnémonique concerné.
        opcode: &'static str,
        /// Position de l'instruction.
        pc: u32,
        /// Détail.
        reason: Cow<'static, str>,
    },
    /// Label référencé mais jamais placé.
    #[error("unresolved label L{0}")]
    UnresolvedLabel(u32),
    /// Label placé deux fois.
    #[error("label L{0} placed twice")]
    DuplicateLabel(u32),
    /// Une instruction dépile plus que la pile ne contient.
    #[error("stack underflow in `{unit}` at pc {pc}: {opcode} needs {needed}, depth is {depth}")]
    StackUnderflow {
        /// Nom de l'unité.
        unit: String,
        /// Position.
        pc: u32,
        /// Mnémonique fautif.
        opcode: &'static str,
        /// Nombre d'entrées requises.
        needed: u32,
        /// Profondeur disponible.
        depth: u32,
    },
    /// Deux chemins rejoignent la même instruction avec des profondeurs différentes.
    #[error("stack depth mismatch in `{unit}` at pc {pc}: {first} vs {second}")]
    StackMismatch {
        /// Nom de l'unité.
        unit: String,
        /// Position.
        pc: u32,
        /// Profondeur vue en premier.
        first: u32,
        /// Profondeur conflictuelle.
        second: u32,
    },
    /// UTF-8 invalide.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// Erreur de syntaxe dans un source assembleur.
    #[error("asm line {line}: {msg}")]
    Asm {
        /// Ligne (1-based).
        line: u32,
        /// Message.
        msg: Cow<'static, str>,
    },
    /// Données corrompues (format).
    #[error("corrupted: {0}")]
    Corrupted(Cow<'static, str>),
}

impl CoreError {
    /// Construit une erreur « corrompu ».
    pub fn corrupted(msg: impl Into<Cow<'static, str>>) -> Self { Self::Corrupted(msg.into()) }

    /// Construit une erreur d'assemblage.
    pub fn asm(line: u32, msg: impl Into<Cow<'static, str>>) -> Self { Self::Asm { line, msg: msg.into() } }
}

/* ─────────────────────────── Prélude (reexports utiles) ─────────────────────────── */

/// Prélude pratique pour importer les types/funcs clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{
        bytecode::{
            Arg, BinOp, Bytecode, Chunk, ConstValue, Conversion, Instr, Item, Label, Op, Opcode,
            UnaryOp, FORMAT_SPEC_PRESENT,
        },
        crc32_ieee, CoreError, CoreResult, Pos, SourceId, Span, Spanned,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32_ieee(b""), 0);
    }

    #[test]
    fn span_join_covers_both() {
        let a = Span::new(SourceId(0), Pos(2), Pos(5));
        let b = Span::new(SourceId(0), Pos(4), Pos(9));
        let j = a.join(b);
        assert_eq!(j.start, Pos(2));
        assert_eq!(j.end, Pos(9));
        assert_eq!(j.len(), 7);
        assert!(!j.is_empty());
    }

    #[test]
    fn errors_display() {
        let e = CoreError::StackUnderflow { unit: "m".into(), pc: 3, opcode: "ROT_THREE", needed: 3, depth: 2 };
        assert_eq!(e.to_string(), "stack underflow in `m` at pc 3: ROT_THREE needs 3, depth is 2");
        assert_eq!(CoreError::UnresolvedLabel(4).to_string(), "unresolved label L4");
    }
}
