//! Forme décodée d'une unité : instructions symboliques et labels.
//!
//! Dans cette forme, les opérandes sont résolus (constante, nom, variable
//! locale) et les sauts visent des [`Label`] plutôt que des positions. On peut
//! donc insérer ou retirer des instructions librement ; [`Bytecode::to_chunk`]
//! recalcule les positions, reconstruit les tables et vérifie la pile.

use std::{collections::BTreeMap, rc::Rc};

use log::trace;

use crate::{
    bytecode::{
        chunk::{Chunk, ConstValue, Op},
        helpers,
        opcode::{ArgKind, Opcode},
    },
    CoreError, CoreResult,
};

/// Cible de saut symbolique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// Opérande résolu.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Aucun opérande.
    None,
    /// Entier brut (compte, drapeaux, sous-opération).
    Int(u32),
    /// Constante.
    Const(ConstValue),
    /// Nom (global, attribut, module).
    Name(String),
    /// Variable locale.
    Local(String),
    /// Cible de saut.
    Label(Label),
}

/// Instruction décodée.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    /// Opcode.
    pub opcode: Opcode,
    /// Opérande.
    pub arg: Arg,
    /// Ligne source.
    pub line: u32,
}

impl Instr {
    /// Instruction quelconque.
    pub const fn new(opcode: Opcode, arg: Arg, line: u32) -> Self { Self { opcode, arg, line } }

    /// Instruction sans opérande.
    pub const fn simple(opcode: Opcode, line: u32) -> Self { Self { opcode, arg: Arg::None, line } }

    /// Instruction à opérande entier.
    pub const fn int(opcode: Opcode, n: u32, line: u32) -> Self { Self { opcode, arg: Arg::Int(n), line } }

    /// Instruction à opérande nom.
    pub fn name(opcode: Opcode, name: impl Into<String>, line: u32) -> Self {
        Self { opcode, arg: Arg::Name(name.into()), line }
    }

    /// Opérande entier (0 sinon).
    pub const fn int_arg(&self) -> u32 {
        match self.arg {
            Arg::Int(n) => n,
            _ => 0,
        }
    }

    /// Effet net sur la pile.
    pub const fn stack_effect(&self) -> i64 { self.opcode.stack_effect(self.int_arg()) }

    /// Unité imbriquée chargée par cette instruction, le cas échéant.
    pub const fn nested_code(&self) -> Option<&Rc<Chunk>> {
        match (&self.opcode, &self.arg) {
            (Opcode::LoadConst, Arg::Const(ConstValue::Code(code))) => Some(code),
            _ => None,
        }
    }
}

/// Élément du flux : label placé ou instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Le label vise l'instruction qui suit.
    Label(Label),
    /// Instruction.
    Instr(Instr),
}

/// Unité décodée.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bytecode {
    /// Nom de l'unité.
    pub name: String,
    /// Noms des paramètres (dans l'ordre).
    pub params: Vec<String>,
    /// Valeurs par défaut des derniers paramètres.
    pub defaults: Vec<ConstValue>,
    /// Fichier source.
    pub filename: Option<String>,
    /// Flux d'instructions et de labels.
    pub items: Vec<Item>,
    next_label: u32,
}

impl Bytecode {
    /// Unité vide.
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), ..Self::default() } }

    /// Copie les métadonnées (nom, paramètres, défauts, fichier) avec un autre flux.
    #[must_use]
    pub fn with_items(&self, items: Vec<Item>) -> Self {
        Self {
            name: self.name.clone(),
            params: self.params.clone(),
            defaults: self.defaults.clone(),
            filename: self.filename.clone(),
            items,
            next_label: self.next_label,
        }
    }

    /// Alloue un label neuf.
    pub fn new_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// Ajoute une instruction.
    pub fn push(&mut self, instr: Instr) { self.items.push(Item::Instr(instr)); }

    /// Place un label devant la prochaine instruction.
    pub fn place(&mut self, label: Label) { self.items.push(Item::Label(label)); }

    /// Instructions seules.
    pub fn instrs(&self) -> impl Iterator<Item = &Instr> + '_ {
        self.items.iter().filter_map(|it| match it {
            Item::Instr(i) => Some(i),
            Item::Label(_) => None,
        })
    }

    /// Décode un chunk (les sauts deviennent des labels).
    pub fn from_chunk(chunk: &Chunk) -> CoreResult<Self> {
        let len = chunk.ops.len() as u32;

        let mut targets = BTreeMap::new();
        for (pc, op) in chunk.ops.iter().enumerate() {
            if op.code.is_jump() {
                if op.arg > len {
                    return Err(invalid_arg(op.code, pc, "jump target out of range"));
                }
                let next = targets.len() as u32;
                targets.entry(op.arg).or_insert(Label(next));
            }
        }

        let mut bc = Self::new(chunk.name.clone());
        bc.params = chunk.arg_names().to_vec();
        bc.defaults.clone_from(&chunk.defaults);
        bc.filename.clone_from(&chunk.filename);
        bc.next_label = targets.len() as u32;

        for (pc, op) in chunk.ops.iter().enumerate() {
            if let Some(label) = targets.get(&(pc as u32)) {
                bc.place(*label);
            }
            let arg = decode_arg(chunk, pc, *op, &targets)?;
            bc.push(Instr::new(op.code, arg, chunk.lines.line_for_pc(pc as u32)));
        }
        if let Some(label) = targets.get(&len) {
            bc.place(*label);
        }
        Ok(bc)
    }

    /// Réencode : positions des labels, tables reconstruites, profondeur de pile vérifiée.
    pub fn to_chunk(&self) -> CoreResult<Chunk> {
        let mut positions = BTreeMap::new();
        let mut pc = 0u32;
        for item in &self.items {
            match item {
                Item::Label(l) => {
                    if positions.insert(*l, pc).is_some() {
                        return Err(CoreError::DuplicateLabel(l.0));
                    }
                }
                Item::Instr(_) => pc += 1,
            }
        }

        if self.defaults.len() > self.params.len() {
            return Err(CoreError::corrupted("more defaults than parameters"));
        }
        if self.defaults.iter().any(|d| d.as_code().is_some()) {
            return Err(CoreError::corrupted("code constant as default"));
        }

        let mut chunk = Chunk::new(self.name.clone());
        chunk.argcount = self.params.len() as u32;
        chunk.defaults.clone_from(&self.defaults);
        for p in &self.params {
            chunk.add_varname(p);
        }
        chunk.filename.clone_from(&self.filename);

        for (pc, instr) in self.instrs().enumerate() {
            let arg = encode_arg(&mut chunk, pc, instr, &positions)?;
            chunk.push_op(Op::new(instr.opcode, arg), instr.line);
        }

        chunk.stack_size = helpers::max_stack_depth(&chunk)?;
        trace!("encoded unit `{}`: {} ops, stack {}", chunk.name, chunk.ops.len(), chunk.stack_size);
        Ok(chunk)
    }
}

fn invalid_arg(opcode: Opcode, pc: usize, reason: &'static str) -> CoreError {
    CoreError::InvalidArg { opcode: opcode.mnemonic(), pc: pc as u32, reason: reason.into() }
}

fn decode_arg(chunk: &Chunk, pc: usize, op: Op, targets: &BTreeMap<u32, Label>) -> CoreResult<Arg> {
    Ok(match op.code.arg_kind() {
        ArgKind::None => Arg::None,
        ArgKind::Int => Arg::Int(op.arg),
        ArgKind::Const => Arg::Const(
            chunk.consts.get(op.arg).cloned().ok_or_else(|| invalid_arg(op.code, pc, "const index out of range"))?,
        ),
        ArgKind::Name => Arg::Name(
            chunk
                .names
                .get(op.arg as usize)
                .cloned()
                .ok_or_else(|| invalid_arg(op.code, pc, "name index out of range"))?,
        ),
        ArgKind::Local => Arg::Local(
            chunk
                .varnames
                .get(op.arg as usize)
                .cloned()
                .ok_or_else(|| invalid_arg(op.code, pc, "local index out of range"))?,
        ),
        ArgKind::Jump => Arg::Label(targets[&op.arg]),
    })
}

fn encode_arg(chunk: &mut Chunk, pc: usize, instr: &Instr, positions: &BTreeMap<Label, u32>) -> CoreResult<u32> {
    match (instr.opcode.arg_kind(), &instr.arg) {
        (ArgKind::None, Arg::None) => Ok(0),
        (ArgKind::Int, Arg::Int(n)) => Ok(*n),
        (ArgKind::Const, Arg::Const(v)) => Ok(chunk.add_const(v.clone())),
        (ArgKind::Name, Arg::Name(n)) => Ok(chunk.add_name(n)),
        (ArgKind::Local, Arg::Local(n)) => Ok(chunk.add_varname(n)),
        (ArgKind::Jump, Arg::Label(l)) => positions.get(l).copied().ok_or(CoreError::UnresolvedLabel(l.0)),
        _ => Err(invalid_arg(instr.opcode, pc, "operand kind does not match opcode")),
    }
}
