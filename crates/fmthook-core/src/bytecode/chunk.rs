//! Unités compilées (`Chunk`) et encodage binaire compact.
//!
//! Un chunk porte les métadonnées de l'unité (nom, paramètres), ses tables
//! (constantes, noms, variables locales), la suite d'instructions et la table
//! des lignes. Les fonctions imbriquées vivent dans le pool de constantes sous
//! forme de [`ConstValue::Code`].

use std::{fmt, ops::Range, rc::Rc, slice};

use crate::{bytecode::opcode::Opcode, crc32_ieee, CoreError, CoreResult};

const MAGIC: &[u8; 4] = b"FHCK";
/// Version du format binaire des chunks.
pub const CHUNK_VERSION: u16 = 1;
const MAX_NESTING: usize = 64;

const CONST_TAG_NONE: u8 = 0x00;
const CONST_TAG_STR: u8 = 0x01;
const CONST_TAG_INT: u8 = 0x02;
const CONST_TAG_FLOAT: u8 = 0x03;
const CONST_TAG_BOOL: u8 = 0x04;
const CONST_TAG_CODE: u8 = 0x05;

/// Drapeaux stockés avec un chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkFlags {
    /// Informations de debug retirées (nom de fichier, lignes à zéro).
    pub stripped: bool,
    /// Unité produite par le réécrivain d'opérations de formatage.
    pub rewritten: bool,
}

impl ChunkFlags {
    const fn to_bits(self) -> u8 { (self.stripped as u8) | ((self.rewritten as u8) << 1) }

    const fn from_bits(bits: u8) -> Self { Self { stripped: bits & 1 != 0, rewritten: bits & 2 != 0 } }
}

/// Valeurs du pool de constantes.
#[derive(Debug, Clone)]
pub enum ConstValue {
    /// `None`
    None,
    /// Booléen.
    Bool(bool),
    /// Entier signé 64 bits.
    Int(i64),
    /// Flottant 64 bits.
    Float(f64),
    /// Chaîne UTF-8.
    Str(String),
    /// Unité imbriquée (corps de fonction).
    Code(Rc<Chunk>),
}

impl ConstValue {
    /// Égalité utilisée pour l'internement : les unités imbriquées sont
    /// comparées par identité.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            _ => self == other,
        }
    }

    /// Unité imbriquée, si c'en est une.
    pub const fn as_code(&self) -> Option<&Rc<Chunk>> {
        match self {
            Self::Code(c) => Some(c),
            _ => None,
        }
    }
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => f.write_str(&float_repr(*x)),
            Self::Str(s) => f.write_str(&str_repr(s)),
            Self::Code(c) => write!(f, "<code {}>", c.name),
        }
    }
}

/* ───────────────────────────── Rendu des constantes ───────────────────────────── */

/// Représentation canonique d'un flottant (`3.0`, `0.1`, `inf`, `nan`).
pub fn float_repr(x: f64) -> String {
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

/// Représentation entre quotes d'une chaîne, avec échappements.
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/* ───────────────────────────── Pool de constantes ───────────────────────────── */

/// Pool de constantes à indices stables (0-based).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstPool {
    values: Vec<ConstValue>,
}

impl ConstPool {
    /// Pool vide.
    pub const fn new() -> Self { Self { values: Vec::new() } }

    /// Nombre de constantes.
    pub fn len(&self) -> usize { self.values.len() }

    /// Vrai si vide.
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Itère en `(index, &ConstValue)`.
    pub fn iter(&self) -> ConstIter<'_> { ConstIter { inner: self.values.iter().enumerate() } }

    /// Ajoute une valeur et renvoie son index.
    pub fn add(&mut self, value: ConstValue) -> u32 {
        let idx = self.values.len() as u32;
        self.values.push(value);
        idx
    }

    /// Ajoute une valeur sauf si une valeur identique existe déjà.
    pub fn intern(&mut self, value: ConstValue) -> u32 {
        match self.values.iter().position(|v| v.same(&value)) {
            Some(idx) => idx as u32,
            None => self.add(value),
        }
    }

    /// Lecture par index.
    pub fn get(&self, idx: u32) -> Option<&ConstValue> { self.values.get(idx as usize) }
}

/// Itérateur renvoyé par [`ConstPool::iter`].
pub struct ConstIter<'a> {
    inner: std::iter::Enumerate<slice::Iter<'a, ConstValue>>,
}

impl<'a> Iterator for ConstIter<'a> {
    type Item = (u32, &'a ConstValue);

    fn next(&mut self) -> Option<Self::Item> { self.inner.next().map(|(idx, value)| (idx as u32, value)) }
}

impl<'a> IntoIterator for &'a ConstPool {
    type Item = (u32, &'a ConstValue);
    type IntoIter = ConstIter<'a>;

    fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/* ───────────────────────────── Table des lignes ───────────────────────────── */

/// Table pc → ligne source, avec itération par plages contiguës.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable {
    lines: Vec<u32>,
}

impl LineTable {
    /// Table vide.
    pub const fn new() -> Self { Self { lines: Vec::new() } }
    /// Ajoute la ligne du pc suivant.
    pub fn push(&mut self, line: u32) { self.lines.push(line); }
    /// Nombre d'entrées.
    pub fn len(&self) -> usize { self.lines.len() }
    /// Vrai si vide.
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    /// Ligne source d'un pc (0 si inconnue).
    pub fn line_for_pc(&self, pc: u32) -> u32 { self.lines.get(pc as usize).copied().unwrap_or_default() }
    /// Plages contiguës de même ligne.
    pub fn iter_ranges(&self) -> LineRangeIter<'_> { LineRangeIter { lines: &self.lines, index: 0 } }
    fn as_slice(&self) -> &[u32] { &self.lines }
}

/// Itérateur de plages `(start..end, line)`.
pub struct LineRangeIter<'a> {
    lines: &'a [u32],
    index: usize,
}

impl Iterator for LineRangeIter<'_> {
    type Item = (Range<u32>, u32);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.lines.len() {
            return None;
        }
        let start = self.index;
        let line = self.lines[start];
        self.index += 1;
        while self.index < self.lines.len() && self.lines[self.index] == line {
            self.index += 1;
        }
        Some((start as u32..self.index as u32, line))
    }
}

/* ───────────────────────────── Instructions ───────────────────────────── */

/// Instruction encodée : opcode + argument brut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Op {
    /// Opcode.
    pub code: Opcode,
    /// Argument (sens donné par [`Opcode::arg_kind`]).
    pub arg: u32,
}

impl Op {
    /// Instruction avec argument.
    pub const fn new(code: Opcode, arg: u32) -> Self { Self { code, arg } }
    /// Instruction sans argument.
    pub const fn simple(code: Opcode) -> Self { Self { code, arg: 0 } }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code.arg_kind() {
            crate::bytecode::opcode::ArgKind::None => write!(f, "{}", self.code),
            _ => write!(f, "{} {}", self.code, self.arg),
        }
    }
}

/* ───────────────────────────── Chunk ───────────────────────────── */

/// Unité compilée : module ou corps de fonction.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    version: u16,
    flags: ChunkFlags,
    /// Nom de l'unité (`<module>` ou nom de fonction).
    pub name: String,
    /// Nombre de paramètres (les premiers `varnames`).
    pub argcount: u32,
    /// Valeurs par défaut des derniers paramètres.
    pub defaults: Vec<ConstValue>,
    /// Variables locales, paramètres en tête.
    pub varnames: Vec<String>,
    /// Noms globaux, attributs et modules référencés.
    pub names: Vec<String>,
    /// Pool de constantes.
    pub consts: ConstPool,
    /// Instructions.
    pub ops: Vec<Op>,
    /// Table pc → ligne.
    pub lines: LineTable,
    /// Profondeur de pile maximale calculée à l'encodage.
    pub stack_size: u32,
    /// Fichier source d'origine.
    pub filename: Option<String>,
}

impl Default for Chunk {
    fn default() -> Self { Self::new("<module>") }
}

impl Chunk {
    /// Chunk vide.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: CHUNK_VERSION,
            flags: ChunkFlags::default(),
            name: name.into(),
            argcount: 0,
            defaults: Vec::new(),
            varnames: Vec::new(),
            names: Vec::new(),
            consts: ConstPool::new(),
            ops: Vec::new(),
            lines: LineTable::new(),
            stack_size: 0,
            filename: None,
        }
    }

    /// Version du format.
    pub const fn version(&self) -> u16 { self.version }

    /// Drapeaux.
    pub const fn flags(&self) -> &ChunkFlags { &self.flags }

    /// Drapeaux (mutable).
    pub fn flags_mut(&mut self) -> &mut ChunkFlags { &mut self.flags }

    /// Ajoute une constante (internée) et renvoie son index.
    pub fn add_const(&mut self, value: ConstValue) -> u32 { self.consts.intern(value) }

    /// Index d'un nom, ajouté au besoin.
    pub fn add_name(&mut self, name: &str) -> u32 { intern_str(&mut self.names, name) }

    /// Index d'une variable locale, ajoutée au besoin.
    pub fn add_varname(&mut self, name: &str) -> u32 { intern_str(&mut self.varnames, name) }

    /// Ajoute une instruction et sa ligne.
    pub fn push_op(&mut self, op: Op, line: u32) {
        self.ops.push(op);
        self.lines.push(line);
    }

    /// Noms des paramètres.
    pub fn arg_names(&self) -> &[String] {
        let n = (self.argcount as usize).min(self.varnames.len());
        &self.varnames[..n]
    }

    /// Nombre minimal d'arguments (paramètres sans valeur par défaut).
    pub fn min_args(&self) -> u32 { self.argcount.saturating_sub(self.defaults.len() as u32) }

    /// Unités directement imbriquées (constantes code).
    pub fn nested(&self) -> impl Iterator<Item = &Rc<Self>> + '_ {
        self.consts.iter().filter_map(|(_, v)| v.as_code())
    }

    /// Nombre total d'unités (celle-ci comprise), récursivement.
    pub fn unit_count(&self) -> usize { 1 + self.nested().map(|c| c.unit_count()).sum::<usize>() }

    /// Hash simple (crc32 + longueur) pour l'invalidation de cache.
    pub fn compute_hash(&self) -> u64 {
        let bytes = self.to_bytes();
        let crc = crc32_ieee(&bytes);
        (u64::from(crc) << 32) | (bytes.len() as u64)
    }

    /// Encode en payload binaire (magic, en-tête, corps récursif, CRC32).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.flags.to_bits());
        out.push(0); // réservé
        write_body(&mut out, self);
        let crc = crc32_ieee(&out);
        write_u32(&mut out, crc);
        out
    }

    /// Décode la sortie de [`Chunk::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> CoreResult<Self> {
        if data.len() < MAGIC.len() + 2 + 2 + 4 {
            return Err(CoreError::corrupted("too short"));
        }

        let (payload, crc_bytes) = data.split_at(data.len() - 4);
        let found = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let expected = crc32_ieee(payload);
        if expected != found {
            return Err(CoreError::HashMismatch { expected, found });
        }

        if &payload[..MAGIC.len()] != MAGIC {
            return Err(CoreError::InvalidMagic);
        }
        let mut off = MAGIC.len();
        let version = read_u16(payload, &mut off)?;
        let flags = ChunkFlags::from_bits(read_u8(payload, &mut off)?);
        let _reserved = read_u8(payload, &mut off)?;

        let mut chunk = read_body(payload, &mut off, 0)?;
        chunk.version = version;
        chunk.flags = flags;

        if off != payload.len() {
            return Err(CoreError::corrupted("trailing bytes"));
        }
        Ok(chunk)
    }
}

fn intern_str(table: &mut Vec<String>, name: &str) -> u32 {
    match table.iter().position(|n| n == name) {
        Some(idx) => idx as u32,
        None => {
            table.push(name.to_owned());
            (table.len() - 1) as u32
        }
    }
}

/* ───────────────────────────── Codec ───────────────────────────── */

fn write_body(out: &mut Vec<u8>, chunk: &Chunk) {
    write_str(out, &chunk.name);
    write_u32(out, chunk.argcount);
    write_u32(out, chunk.defaults.len() as u32);
    for value in &chunk.defaults {
        write_const(out, value);
    }
    write_strs(out, &chunk.varnames);
    write_strs(out, &chunk.names);

    write_u32(out, chunk.consts.len() as u32);
    for (_, value) in &chunk.consts {
        write_const(out, value);
    }

    write_u32(out, chunk.ops.len() as u32);
    for op in &chunk.ops {
        out.push(op.code as u8);
        write_u32(out, op.arg);
    }

    write_u32(out, chunk.lines.len() as u32);
    for line in chunk.lines.as_slice() {
        write_u32(out, *line);
    }

    write_u32(out, chunk.stack_size);
    match &chunk.filename {
        Some(file) => {
            out.push(1);
            write_str(out, file);
        }
        None => out.push(0),
    }
}

fn read_body(data: &[u8], off: &mut usize, depth: usize) -> CoreResult<Chunk> {
    if depth > MAX_NESTING {
        return Err(CoreError::corrupted("code nesting too deep"));
    }

    let mut chunk = Chunk::new(read_string(data, off)?);
    chunk.argcount = read_u32(data, off)?;
    let default_count = read_u32(data, off)?;
    if default_count > chunk.argcount {
        return Err(CoreError::corrupted("more defaults than parameters"));
    }
    for _ in 0..default_count {
        match read_const(data, off, depth)? {
            ConstValue::Code(_) => return Err(CoreError::corrupted("code constant as default")),
            value => chunk.defaults.push(value),
        }
    }
    chunk.varnames = read_strs(data, off)?;
    chunk.names = read_strs(data, off)?;

    let const_count = read_u32(data, off)?;
    for _ in 0..const_count {
        let value = read_const(data, off, depth)?;
        // `add` et non `intern` : les indices doivent rester ceux de l'encodage.
        chunk.consts.add(value);
    }

    let op_count = read_u32(data, off)?;
    for _ in 0..op_count {
        let byte = read_u8(data, off)?;
        let code = Opcode::from_u8(byte).ok_or(CoreError::UnknownOpcode(byte))?;
        let arg = read_u32(data, off)?;
        chunk.ops.push(Op::new(code, arg));
    }

    let line_count = read_u32(data, off)? as usize;
    if line_count != chunk.ops.len() {
        return Err(CoreError::corrupted("line/op length mismatch"));
    }
    for _ in 0..line_count {
        chunk.lines.push(read_u32(data, off)?);
    }

    chunk.stack_size = read_u32(data, off)?;
    chunk.filename = match read_u8(data, off)? {
        0 => None,
        1 => Some(read_string(data, off)?),
        _ => return Err(CoreError::corrupted("invalid filename flag")),
    };
    Ok(chunk)
}

fn write_const(out: &mut Vec<u8>, value: &ConstValue) {
    match value {
        ConstValue::None => out.push(CONST_TAG_NONE),
        ConstValue::Str(s) => {
            out.push(CONST_TAG_STR);
            write_str(out, s);
        }
        ConstValue::Int(v) => {
            out.push(CONST_TAG_INT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        ConstValue::Float(v) => {
            out.push(CONST_TAG_FLOAT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        ConstValue::Bool(b) => {
            out.push(CONST_TAG_BOOL);
            out.push(u8::from(*b));
        }
        ConstValue::Code(code) => {
            out.push(CONST_TAG_CODE);
            write_body(out, code);
        }
    }
}

fn read_const(data: &[u8], off: &mut usize, depth: usize) -> CoreResult<ConstValue> {
    Ok(match read_u8(data, off)? {
        CONST_TAG_NONE => ConstValue::None,
        CONST_TAG_STR => ConstValue::Str(read_string(data, off)?),
        CONST_TAG_INT => ConstValue::Int(i64::from_le_bytes(read_array(data, off)?)),
        CONST_TAG_FLOAT => ConstValue::Float(f64::from_le_bytes(read_array(data, off)?)),
        CONST_TAG_BOOL => match read_u8(data, off)? {
            0 => ConstValue::Bool(false),
            1 => ConstValue::Bool(true),
            _ => return Err(CoreError::corrupted("invalid bool")),
        },
        CONST_TAG_CODE => ConstValue::Code(Rc::new(read_body(data, off, depth + 1)?)),
        _ => return Err(CoreError::corrupted("unknown const tag")),
    })
}

fn write_u32(buf: &mut Vec<u8>, v: u32) { buf.extend_from_slice(&v.to_le_bytes()); }

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn write_strs(buf: &mut Vec<u8>, items: &[String]) {
    write_u32(buf, items.len() as u32);
    for s in items {
        write_str(buf, s);
    }
}

fn read_exact<'a>(data: &'a [u8], off: &mut usize, len: usize) -> CoreResult<&'a [u8]> {
    let end = off.checked_add(len).ok_or_else(|| CoreError::corrupted("overflow"))?;
    if end > data.len() {
        return Err(CoreError::UnexpectedEof { needed: len as u64, at: *off as u64 });
    }
    let slice = &data[*off..end];
    *off = end;
    Ok(slice)
}

fn read_array<const N: usize>(data: &[u8], off: &mut usize) -> CoreResult<[u8; N]> {
    let bytes = read_exact(data, off, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(bytes);
    Ok(arr)
}

fn read_u8(data: &[u8], off: &mut usize) -> CoreResult<u8> { Ok(read_array::<1>(data, off)?[0]) }

fn read_u16(data: &[u8], off: &mut usize) -> CoreResult<u16> { Ok(u16::from_le_bytes(read_array(data, off)?)) }

fn read_u32(data: &[u8], off: &mut usize) -> CoreResult<u32> { Ok(u32::from_le_bytes(read_array(data, off)?)) }

fn read_string(data: &[u8], off: &mut usize) -> CoreResult<String> {
    let len = read_u32(data, off)? as usize;
    let bytes = read_exact(data, off, len)?;
    std::str::from_utf8(bytes).map(str::to_owned).map_err(|_| CoreError::InvalidUtf8)
}

fn read_strs(data: &[u8], off: &mut usize) -> CoreResult<Vec<String>> {
    let count = read_u32(data, off)?;
    (0..count).map(|_| read_string(data, off)).collect()
}
