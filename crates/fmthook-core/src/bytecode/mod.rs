//! Bytecode : jeu d'instructions, unités encodées, forme décodée, outils.
//!
//! Deux représentations coexistent :
//! - [`Chunk`] : forme encodée (opérandes = indices, sauts = positions) que la VM exécute ;
//! - [`Bytecode`] : forme décodée à labels, pratique pour les transformations.

/// Unités encodées et codec binaire.
pub mod chunk;
/// Opcodes et effets de pile.
pub mod opcode;
/// Forme décodée à labels.
pub mod instr;
pub mod helpers;
pub mod disasm;
pub mod asm;

pub use chunk::{float_repr, str_repr, Chunk, ChunkFlags, ConstPool, ConstValue, LineTable, Op, CHUNK_VERSION};
pub use instr::{Arg, Bytecode, Instr, Item, Label};
pub use opcode::{ArgKind, BinOp, Conversion, Opcode, UnaryOp, FORMAT_SPEC_PRESENT};
