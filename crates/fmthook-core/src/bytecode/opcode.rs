//! Jeu d'instructions : opcodes, genres d'opérandes et effets de pile.
//!
//! Chaque instruction encodée est un couple `(opcode, arg: u32)`. Le sens de
//! `arg` dépend de [`ArgKind`] : index de constante, de nom, de variable locale,
//! entier brut ou cible de saut.

use std::fmt;

/// Bit du drapeau de `FORMAT_VALUE` : un spécificateur de format est sur la pile
/// au-dessus de la valeur.
pub const FORMAT_SPEC_PRESENT: u32 = 0x04;

/// Genre d'opérande d'un opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Pas d'opérande (arg = 0).
    None,
    /// Index dans le pool de constantes.
    Const,
    /// Index dans la table des noms (globaux, attributs, modules).
    Name,
    /// Index dans la table des variables locales.
    Local,
    /// Entier brut (compte, drapeaux, sous-opération).
    Int,
    /// Position de l'instruction cible.
    Jump,
}

/// Opcodes de la machine à pile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Ne fait rien.
    Nop = 0x00,
    /// Dépile et jette.
    Pop = 0x01,
    /// Duplique le sommet.
    Dup = 0x02,
    /// `[a, b] -> [b, a]`.
    Rot2 = 0x03,
    /// `[a, b, c] -> [c, a, b]` : le sommet descend de deux crans.
    Rot3 = 0x04,

    /// Empile une constante.
    LoadConst = 0x10,
    /// Lecture d'un nom au niveau module (namespace puis builtins).
    LoadName = 0x11,
    /// Écriture d'un nom au niveau module.
    StoreName = 0x12,
    /// Lecture d'un global depuis une fonction (namespace du module puis builtins).
    LoadGlobal = 0x13,
    /// Lecture d'une variable locale.
    LoadFast = 0x14,
    /// Écriture d'une variable locale.
    StoreFast = 0x15,
    /// Remplace le sommet (un module) par l'un de ses attributs.
    LoadAttr = 0x16,
    /// Importe un module et l'empile.
    Import = 0x17,

    /// Opération binaire (arg = [`BinOp`]).
    Binary = 0x20,
    /// Opération unaire (arg = [`UnaryOp`]).
    Unary = 0x21,

    /// Conversion `!s` / `!r` du sommet (arg = [`Conversion`]).
    Convert = 0x30,
    /// Formate le sommet (arg = drapeaux, voir [`FORMAT_SPEC_PRESENT`]).
    FormatValue = 0x31,
    /// Concatène les `arg` chaînes du sommet.
    BuildString = 0x32,

    /// Appel : la cible est sous ses `arg` arguments.
    Call = 0x40,
    /// Transforme un objet code en fonction liée au module courant.
    MakeFunction = 0x41,
    /// Retourne le sommet.
    Return = 0x42,

    /// Saut inconditionnel.
    Jump = 0x50,
    /// Dépile et saute si la valeur est fausse.
    JumpIfFalse = 0x51,
}

impl Opcode {
    /// Tous les opcodes connus.
    pub const ALL: &'static [Self] = &[
        Self::Nop,
        Self::Pop,
        Self::Dup,
        Self::Rot2,
        Self::Rot3,
        Self::LoadConst,
        Self::LoadName,
        Self::StoreName,
        Self::LoadGlobal,
        Self::LoadFast,
        Self::StoreFast,
        Self::LoadAttr,
        Self::Import,
        Self::Binary,
        Self::Unary,
        Self::Convert,
        Self::FormatValue,
        Self::BuildString,
        Self::Call,
        Self::MakeFunction,
        Self::Return,
        Self::Jump,
        Self::JumpIfFalse,
    ];

    /// Décode un octet d'opcode.
    pub fn from_u8(byte: u8) -> Option<Self> { Self::ALL.iter().copied().find(|op| *op as u8 == byte) }

    /// Retrouve un opcode par son mnémonique (insensible à la casse).
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.mnemonic().eq_ignore_ascii_case(s))
    }

    /// Mnémonique textuel (asm/disasm).
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Rot2 => "ROT_TWO",
            Self::Rot3 => "ROT_THREE",
            Self::LoadConst => "LOAD_CONST",
            Self::LoadName => "LOAD_NAME",
            Self::StoreName => "STORE_NAME",
            Self::LoadGlobal => "LOAD_GLOBAL",
            Self::LoadFast => "LOAD_FAST",
            Self::StoreFast => "STORE_FAST",
            Self::LoadAttr => "LOAD_ATTR",
            Self::Import => "IMPORT",
            Self::Binary => "BINARY",
            Self::Unary => "UNARY",
            Self::Convert => "CONVERT",
            Self::FormatValue => "FORMAT_VALUE",
            Self::BuildString => "BUILD_STRING",
            Self::Call => "CALL",
            Self::MakeFunction => "MAKE_FUNCTION",
            Self::Return => "RETURN",
            Self::Jump => "JUMP",
            Self::JumpIfFalse => "JUMP_IF_FALSE",
        }
    }

    /// Genre d'opérande attendu.
    pub const fn arg_kind(self) -> ArgKind {
        match self {
            Self::LoadConst => ArgKind::Const,
            Self::LoadName | Self::StoreName | Self::LoadGlobal | Self::LoadAttr | Self::Import => ArgKind::Name,
            Self::LoadFast | Self::StoreFast => ArgKind::Local,
            Self::Binary | Self::Unary | Self::Convert | Self::FormatValue | Self::BuildString | Self::Call => {
                ArgKind::Int
            }
            Self::Jump | Self::JumpIfFalse => ArgKind::Jump,
            Self::Nop | Self::Pop | Self::Dup | Self::Rot2 | Self::Rot3 | Self::MakeFunction | Self::Return => {
                ArgKind::None
            }
        }
    }

    /// Nombre d'entrées `(dépilées, empilées)` pour un argument donné.
    pub const fn stack_io(self, arg: u32) -> (u32, u32) {
        match self {
            Self::Nop | Self::Jump => (0, 0),
            Self::Pop | Self::StoreName | Self::StoreFast | Self::Return | Self::JumpIfFalse => (1, 0),
            Self::Dup => (1, 2),
            Self::Rot2 => (2, 2),
            Self::Rot3 => (3, 3),
            Self::LoadConst | Self::LoadName | Self::LoadGlobal | Self::LoadFast | Self::Import => (0, 1),
            Self::LoadAttr | Self::Unary | Self::Convert | Self::MakeFunction => (1, 1),
            Self::Binary => (2, 1),
            Self::FormatValue => {
                if arg & FORMAT_SPEC_PRESENT != 0 { (2, 1) } else { (1, 1) }
            }
            Self::BuildString => (arg, 1),
            Self::Call => (arg.saturating_add(1), 1),
        }
    }

    /// Effet net sur la profondeur de pile.
    pub const fn stack_effect(self, arg: u32) -> i64 {
        let (pops, pushes) = self.stack_io(arg);
        pushes as i64 - pops as i64
    }

    /// Vrai pour les sauts.
    pub const fn is_jump(self) -> bool { matches!(self, Self::Jump | Self::JumpIfFalse) }

    /// Vrai si l'exécution ne continue jamais à l'instruction suivante.
    pub const fn is_terminal(self) -> bool { matches!(self, Self::Jump | Self::Return) }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.mnemonic()) }
}

/* ───────────────────────────── Sous-opérations ───────────────────────────── */

/// Opérations binaires (arg de `BINARY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinOp {
    /// `+`
    Add = 0,
    /// `-`
    Sub = 1,
    /// `*`
    Mul = 2,
    /// `/` (division réelle)
    Div = 3,
    /// `%`
    Mod = 4,
    /// `==`
    Eq = 5,
    /// `!=`
    Ne = 6,
    /// `<`
    Lt = 7,
    /// `<=`
    Le = 8,
    /// `>`
    Gt = 9,
    /// `>=`
    Ge = 10,
}

impl BinOp {
    const ALL: [Self; 11] = [
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Mod,
        Self::Eq,
        Self::Ne,
        Self::Lt,
        Self::Le,
        Self::Gt,
        Self::Ge,
    ];

    /// Décode l'argument brut.
    pub fn from_u32(arg: u32) -> Option<Self> { Self::ALL.iter().copied().find(|op| *op as u32 == arg) }

    /// Symbole source.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Opérations unaires (arg de `UNARY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnaryOp {
    /// `-x`
    Neg = 0,
    /// `!x`
    Not = 1,
}

impl UnaryOp {
    /// Décode l'argument brut.
    pub const fn from_u32(arg: u32) -> Option<Self> {
        match arg {
            0 => Some(Self::Neg),
            1 => Some(Self::Not),
            _ => None,
        }
    }

    /// Symbole source.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "!",
        }
    }
}

/// Conversions explicites d'un champ de chaîne formatée (arg de `CONVERT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Conversion {
    /// `!s`
    Str = 1,
    /// `!r`
    Repr = 2,
}

impl Conversion {
    /// Décode l'argument brut.
    pub const fn from_u32(arg: u32) -> Option<Self> {
        match arg {
            1 => Some(Self::Str),
            2 => Some(Self::Repr),
            _ => None,
        }
    }

    /// Décode le caractère de conversion d'un champ (`s`, `r`).
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            's' => Some(Self::Str),
            'r' => Some(Self::Repr),
            _ => None,
        }
    }

    /// Caractère de conversion.
    pub const fn as_char(self) -> char {
        match self {
            Self::Str => 's',
            Self::Repr => 'r',
        }
    }
}
