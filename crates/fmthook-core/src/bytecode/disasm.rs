//! Désassemblage textuel (CLI, tests, logs de debug).

use std::fmt::Write;

use crate::bytecode::{
    chunk::{Chunk, Op},
    opcode::{ArgKind, BinOp, Conversion, Opcode, UnaryOp, FORMAT_SPEC_PRESENT},
};

/// Désassemblage multi-lignes avec métadonnées, récursif sur les unités imbriquées.
pub fn disassemble_full(chunk: &Chunk, title: &str) -> String {
    let mut out = String::new();
    write_unit(&mut out, chunk, title);
    out
}

fn write_unit(out: &mut String, chunk: &Chunk, title: &str) {
    let _ = writeln!(
        out,
        "== {title} == (unit={}, args={}, version={}, rewritten={}, consts={}, ops={}, stack={})",
        chunk.name,
        chunk.argcount,
        chunk.version(),
        chunk.flags().rewritten,
        chunk.consts.len(),
        chunk.ops.len(),
        chunk.stack_size
    );
    if let Some(file) = &chunk.filename {
        let _ = writeln!(out, ";; file: {file}");
    }
    if !chunk.varnames.is_empty() {
        let _ = writeln!(out, ";; locals: {}", chunk.varnames.join(", "));
    }
    if !chunk.names.is_empty() {
        let _ = writeln!(out, ";; names: {}", chunk.names.join(", "));
    }
    if !chunk.defaults.is_empty() {
        let shown: Vec<String> = chunk.defaults.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, ";; defaults: {}", shown.join(", "));
    }

    if !chunk.consts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, ";; constants");
        for (idx, value) in &chunk.consts {
            let _ = writeln!(out, "const[{idx:04}] = {}", truncate(&value.to_string()));
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, ";; ops");
    for (range, line) in chunk.lines.iter_ranges() {
        let _ = writeln!(out, ";; line {line}");
        for pc in range {
            let op = chunk.ops[pc as usize];
            match preview(chunk, op) {
                Some(p) => {
                    let _ = writeln!(out, "{pc:04} | {:<14} {:>4} ;; {p}", op.code.mnemonic(), op.arg);
                }
                None => {
                    let _ = writeln!(out, "{pc:04} | {}", op.code.mnemonic());
                }
            }
        }
    }

    for nested in chunk.nested() {
        let _ = writeln!(out);
        write_unit(out, nested, &format!("{title}.{}", nested.name));
    }
}

/// Variante une-ligne-par-op pour les aperçus rapides.
pub fn disassemble_compact(chunk: &Chunk) -> String {
    let mut out = String::new();
    for (pc, op) in chunk.ops.iter().enumerate() {
        match preview(chunk, *op) {
            Some(p) => {
                let _ = writeln!(out, "{pc:04}: {op} ;; {p}");
            }
            None => {
                let _ = writeln!(out, "{pc:04}: {op}");
            }
        }
    }
    out
}

fn preview(chunk: &Chunk, op: Op) -> Option<String> {
    let shown = match op.code.arg_kind() {
        ArgKind::None => return None,
        ArgKind::Const => chunk.consts.get(op.arg).map(|v| truncate(&v.to_string())),
        ArgKind::Name => chunk.names.get(op.arg as usize).cloned(),
        ArgKind::Local => chunk.varnames.get(op.arg as usize).cloned(),
        ArgKind::Jump => Some(format!("-> {:04}", op.arg)),
        ArgKind::Int => match op.code {
            Opcode::Binary => BinOp::from_u32(op.arg).map(|b| b.symbol().to_owned()),
            Opcode::Unary => UnaryOp::from_u32(op.arg).map(|u| u.symbol().to_owned()),
            Opcode::Convert => Conversion::from_u32(op.arg).map(|c| format!("!{}", c.as_char())),
            Opcode::FormatValue => {
                Some(if op.arg & FORMAT_SPEC_PRESENT != 0 { "with spec".to_owned() } else { "no spec".to_owned() })
            }
            _ => return None,
        },
    };
    Some(shown.unwrap_or_else(|| "<invalid>".to_owned()))
}

fn truncate(s: &str) -> String {
    const MAX: usize = 64;
    match s.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s.to_owned(),
    }
}
