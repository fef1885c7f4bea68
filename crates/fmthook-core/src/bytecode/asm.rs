//! Assembleur textuel (tests, outillage, fixtures).
//!
//! ```text
//! ; commentaire
//! .code square(x, n=2)     ; ouvre une unité imbriquée (défauts en fin)
//!     LOAD_FAST x
//!     LOAD_FAST x
//!     BINARY *
//!     RETURN
//! .end
//! LOAD_CONST @square       ; référence une unité déjà fermée
//! MAKE_FUNCTION
//! STORE_NAME square
//! loop:                    ; label
//! JUMP loop
//! ```
//!
//! Opérandes : entiers, flottants, chaînes (`"…"` ou `'…'`), `None`, `True`,
//! `False`, `@unité`, noms, labels. `BINARY`/`UNARY` acceptent aussi le
//! symbole de l'opération, `CONVERT` accepte `s`/`r`.

use std::{collections::HashMap, rc::Rc};

use crate::{
    bytecode::{
        chunk::{Chunk, ConstValue},
        instr::{Arg, Bytecode, Instr, Label},
        opcode::{ArgKind, BinOp, Conversion, Opcode, UnaryOp},
    },
    CoreError, CoreResult,
};

struct Frame {
    bc: Bytecode,
    labels: HashMap<String, Label>,
    codes: HashMap<String, Rc<Chunk>>,
}

impl Frame {
    fn new(name: &str, params: Vec<String>, defaults: Vec<ConstValue>) -> Self {
        let mut bc = Bytecode::new(name);
        bc.params = params;
        bc.defaults = defaults;
        Self { bc, labels: HashMap::new(), codes: HashMap::new() }
    }

    fn label(&mut self, name: &str) -> Label {
        if let Some(l) = self.labels.get(name) {
            return *l;
        }
        let l = self.bc.new_label();
        self.labels.insert(name.to_owned(), l);
        l
    }
}

/// Assemble un source en [`Chunk`] (unité `<module>`).
pub fn assemble(source: &str) -> CoreResult<Chunk> {
    let mut frames = vec![Frame::new("<module>", Vec::new(), Vec::new())];

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(".code") {
            let parent = frames.last().ok_or_else(|| CoreError::asm(line_no, "no open unit"))?;
            let (name, params, defaults) = parse_header(parent, rest.trim(), line_no)?;
            frames.push(Frame::new(&name, params, defaults));
            continue;
        }

        if line == ".end" {
            let done = match frames.pop() {
                Some(f) if !frames.is_empty() => f,
                _ => return Err(CoreError::asm(line_no, ".end without .code")),
            };
            let code = Rc::new(done.bc.to_chunk()?);
            if let Some(parent) = frames.last_mut() {
                parent.codes.insert(code.name.clone(), code);
            }
            continue;
        }

        let frame = frames.last_mut().ok_or_else(|| CoreError::asm(line_no, "no open unit"))?;

        if let Some(label) = line.strip_suffix(':') {
            if !label.is_empty() && !label.contains(char::is_whitespace) {
                let l = frame.label(label);
                frame.bc.place(l);
                continue;
            }
        }

        let (mnemonic, operand) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (line, ""),
        };
        let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| CoreError::UnknownMnemonic(mnemonic.to_owned()))?;
        let arg = parse_operand(frame, opcode, operand, line_no)?;
        frame.bc.push(Instr::new(opcode, arg, line_no));
    }

    match (frames.pop(), frames.is_empty()) {
        (Some(module), true) => module.bc.to_chunk(),
        _ => Err(CoreError::asm(source.lines().count() as u32, "unclosed .code block")),
    }
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ';' => return &line[..i],
            None => {}
        }
    }
    line
}

fn parse_header(parent: &Frame, rest: &str, line: u32) -> CoreResult<(String, Vec<String>, Vec<ConstValue>)> {
    let (name, tail) = rest.split_once('(').ok_or_else(|| CoreError::asm(line, "expected `.code name(params)`"))?;
    let inner = tail.strip_suffix(')').ok_or_else(|| CoreError::asm(line, "missing `)`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::asm(line, "unit name expected"));
    }
    let mut params = Vec::new();
    let mut defaults = Vec::new();
    for param in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match param.split_once('=') {
            Some((p, value)) => {
                params.push(p.trim().to_owned());
                defaults.push(parse_const(parent, value.trim(), line)?);
            }
            None if !defaults.is_empty() => {
                return Err(CoreError::asm(line, format!("parameter `{param}` follows a default")));
            }
            None => params.push(param.to_owned()),
        }
    }
    Ok((name.to_owned(), params, defaults))
}

fn parse_operand(frame: &mut Frame, opcode: Opcode, operand: &str, line: u32) -> CoreResult<Arg> {
    let kind = opcode.arg_kind();
    if kind == ArgKind::None {
        if !operand.is_empty() {
            return Err(CoreError::asm(line, format!("{opcode} takes no operand")));
        }
        return Ok(Arg::None);
    }
    if operand.is_empty() {
        return Err(CoreError::asm(line, format!("{opcode} expects an operand")));
    }

    Ok(match kind {
        ArgKind::None => Arg::None,
        ArgKind::Int => Arg::Int(parse_int_operand(opcode, operand, line)?),
        ArgKind::Const => Arg::Const(parse_const(frame, operand, line)?),
        ArgKind::Name => Arg::Name(operand.to_owned()),
        ArgKind::Local => Arg::Local(operand.to_owned()),
        ArgKind::Jump => Arg::Label(frame.label(operand)),
    })
}

fn parse_int_operand(opcode: Opcode, operand: &str, line: u32) -> CoreResult<u32> {
    if let Ok(n) = parse_u32(operand) {
        return Ok(n);
    }
    let symbolic = match opcode {
        Opcode::Binary => (0..16).filter_map(BinOp::from_u32).find(|op| op.symbol() == operand).map(|op| op as u32),
        Opcode::Unary => [UnaryOp::Neg, UnaryOp::Not].into_iter().find(|op| op.symbol() == operand).map(|op| op as u32),
        Opcode::Convert => {
            let c = operand.trim_start_matches('!');
            let mut chars = c.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Conversion::from_char(ch).map(|c| c as u32),
                _ => None,
            }
        }
        _ => None,
    };
    symbolic.ok_or_else(|| CoreError::asm(line, format!("invalid operand for {opcode}: `{operand}`")))
}

fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    }
}

fn parse_const(frame: &Frame, operand: &str, line: u32) -> CoreResult<ConstValue> {
    match operand {
        "None" => return Ok(ConstValue::None),
        "True" => return Ok(ConstValue::Bool(true)),
        "False" => return Ok(ConstValue::Bool(false)),
        _ => {}
    }
    if let Some(name) = operand.strip_prefix('@') {
        return frame
            .codes
            .get(name)
            .map(|c| ConstValue::Code(Rc::clone(c)))
            .ok_or_else(|| CoreError::asm(line, format!("unknown unit `@{name}`")));
    }
    if operand.starts_with('"') || operand.starts_with('\'') {
        return parse_string_literal(operand).map(ConstValue::Str).map_err(|msg| CoreError::asm(line, msg));
    }
    if let Ok(i) = operand.parse::<i64>() {
        return Ok(ConstValue::Int(i));
    }
    if let Ok(f) = operand.parse::<f64>() {
        return Ok(ConstValue::Float(f));
    }
    Err(CoreError::asm(line, format!("invalid constant `{operand}`")))
}

fn parse_string_literal(input: &str) -> Result<String, &'static str> {
    let mut chars = input.chars();
    let quote = chars.next().ok_or("string literal expected")?;
    if input.len() < 2 || !input.ends_with(quote) {
        return Err("unterminated string literal");
    }
    let body = &input[quote.len_utf8()..input.len() - quote.len_utf8()];

    let mut out = String::with_capacity(body.len());
    let mut escaping = false;
    for c in body.chars() {
        if escaping {
            out.push(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            });
            escaping = false;
        } else if c == '\\' {
            escaping = true;
        } else {
            out.push(c);
        }
    }
    if escaping {
        return Err("incomplete escape sequence");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{chunk::Op, opcode::FORMAT_SPEC_PRESENT};
    use pretty_assertions::assert_eq;

    #[test]
    fn assembles_nested_units_and_labels() -> CoreResult<()> {
        let src = r#"
            ; carré puis boucle
            .code square(x)
                LOAD_FAST x
                LOAD_FAST x
                BINARY *
                RETURN
            .end
            LOAD_CONST @square
            MAKE_FUNCTION
            STORE_NAME square
            top:
            LOAD_CONST False
            JUMP_IF_FALSE done
            JUMP top
            done:
            LOAD_CONST "a;b"   ; le ; dans la chaîne reste
            RETURN
        "#;
        let chunk = assemble(src)?;
        assert_eq!(chunk.name, "<module>");
        assert_eq!(chunk.ops[4], Op::new(Opcode::JumpIfFalse, 6));
        assert_eq!(chunk.ops[5], Op::new(Opcode::Jump, 3));
        assert_eq!(chunk.consts.get(2), Some(&ConstValue::Str("a;b".into())));

        let square = chunk.nested().next().cloned();
        let square = square.ok_or_else(|| CoreError::corrupted("missing nested unit"))?;
        assert_eq!(square.arg_names(), ["x".to_string()]);
        assert_eq!(square.ops[2], Op::new(Opcode::Binary, BinOp::Mul as u32));
        Ok(())
    }

    #[test]
    fn header_defaults() -> CoreResult<()> {
        let chunk = assemble(".code h(v, s=None)\nLOAD_FAST v\nRETURN\n.end\nLOAD_CONST @h\nRETURN")?;
        let h = chunk.nested().next().cloned().ok_or_else(|| CoreError::corrupted("missing nested unit"))?;
        assert_eq!(h.arg_names(), ["v".to_string(), "s".into()]);
        assert_eq!(h.defaults, vec![ConstValue::None]);
        assert!(matches!(assemble(".code h(a=1, b)\nRETURN\n.end"), Err(CoreError::Asm { line: 1, .. })));
        Ok(())
    }

    #[test]
    fn format_value_operands() -> CoreResult<()> {
        let chunk = assemble("LOAD_CONST 3.5\nLOAD_CONST '.2f'\nFORMAT_VALUE 0x04\nCONVERT !r\nRETURN")?;
        assert_eq!(chunk.ops[2], Op::new(Opcode::FormatValue, FORMAT_SPEC_PRESENT));
        assert_eq!(chunk.ops[3], Op::new(Opcode::Convert, Conversion::Repr as u32));
        assert_eq!(chunk.consts.get(0), Some(&ConstValue::Float(3.5)));
        Ok(())
    }

    #[test]
    fn errors_carry_line_numbers() {
        assert!(matches!(assemble("NOP\nLOAD_CONST ???"), Err(CoreError::Asm { line: 2, .. })));
        assert!(matches!(assemble("FROB 1"), Err(CoreError::UnknownMnemonic(m)) if m == "FROB"));
        assert!(matches!(assemble(".code f()\nRETURN"), Err(CoreError::Asm { .. })));
        assert!(matches!(assemble("RETURN 3"), Err(CoreError::Asm { line: 1, .. })));
        assert!(matches!(assemble("POP"), Err(CoreError::StackUnderflow { .. })));
    }
}
