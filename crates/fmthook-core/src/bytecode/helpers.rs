//! Validations structurelles et analyse de profondeur de pile.

use crate::{
    bytecode::{
        chunk::Chunk,
        opcode::{ArgKind, Opcode, FORMAT_SPEC_PRESENT},
    },
    CoreError, CoreResult,
};

/// Validation structurelle d'un chunk (récursive sur les unités imbriquées).
///
/// Vérifie la cohérence des tables (indices en range, table des lignes),
/// les cibles de saut, les bits réservés de `FORMAT_VALUE`, puis la pile.
pub fn validate_chunk(chunk: &Chunk) -> CoreResult<()> {
    if chunk.ops.len() != chunk.lines.len() {
        return Err(CoreError::corrupted("line/op length mismatch"));
    }
    if chunk.argcount as usize > chunk.varnames.len() {
        return Err(CoreError::corrupted(format!(
            "unit `{}` declares {} params but has {} locals",
            chunk.name,
            chunk.argcount,
            chunk.varnames.len()
        )));
    }

    let len = chunk.ops.len() as u32;
    for (pc, op) in chunk.ops.iter().enumerate() {
        let bound = match op.code.arg_kind() {
            ArgKind::Const => Some(chunk.consts.len() as u32),
            ArgKind::Name => Some(chunk.names.len() as u32),
            ArgKind::Local => Some(chunk.varnames.len() as u32),
            ArgKind::Jump => Some(len + 1),
            ArgKind::None | ArgKind::Int => None,
        };
        if let Some(bound) = bound {
            if op.arg >= bound {
                return Err(CoreError::InvalidArg {
                    opcode: op.code.mnemonic(),
                    pc: pc as u32,
                    reason: format!("index {} out of range (limit {bound})", op.arg).into(),
                });
            }
        }
        if op.code == Opcode::FormatValue && op.arg & !FORMAT_SPEC_PRESENT != 0 {
            return Err(CoreError::InvalidArg {
                opcode: op.code.mnemonic(),
                pc: pc as u32,
                reason: "reserved flag bits set".into(),
            });
        }
    }

    max_stack_depth(chunk)?;
    for nested in chunk.nested() {
        validate_chunk(nested)?;
    }
    Ok(())
}

/// Profondeur de pile maximale atteinte par l'unité.
///
/// Parcourt tous les chemins d'exécution ; échoue si une instruction dépile
/// plus que disponible, ou si deux chemins atteignent la même instruction
/// avec des profondeurs différentes. Sortir de l'unité sans `RETURN` est
/// accepté (retour implicite de `None`).
pub fn max_stack_depth(chunk: &Chunk) -> CoreResult<u32> {
    let len = chunk.ops.len();
    let mut seen: Vec<Option<u32>> = vec![None; len];
    let mut work = vec![(0usize, 0u32)];
    let mut max = 0u32;

    while let Some((pc, depth)) = work.pop() {
        if pc >= len {
            continue;
        }
        match seen[pc] {
            Some(first) if first == depth => continue,
            Some(first) => {
                return Err(CoreError::StackMismatch { unit: chunk.name.clone(), pc: pc as u32, first, second: depth });
            }
            None => seen[pc] = Some(depth),
        }

        let op = chunk.ops[pc];
        let (pops, pushes) = op.code.stack_io(op.arg);
        if depth < pops {
            return Err(CoreError::StackUnderflow {
                unit: chunk.name.clone(),
                pc: pc as u32,
                opcode: op.code.mnemonic(),
                needed: pops,
                depth,
            });
        }
        let after = depth - pops + pushes;
        max = max.max(after).max(depth);

        if op.code.is_jump() {
            work.push((op.arg as usize, after));
        }
        if !op.code.is_terminal() {
            work.push((pc + 1, after));
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::chunk::{ConstValue, Op};

    fn chunk_of(ops: &[Op]) -> Chunk {
        let mut c = Chunk::new("t");
        c.add_const(ConstValue::Int(1));
        for op in ops {
            c.push_op(*op, 1);
        }
        c
    }

    #[test]
    fn depth_of_straight_line_code() {
        let c = chunk_of(&[
            Op::new(Opcode::LoadConst, 0),
            Op::new(Opcode::LoadConst, 0),
            Op::new(Opcode::LoadConst, 0),
            Op::simple(Opcode::Rot3),
            Op::new(Opcode::BuildString, 3),
            Op::simple(Opcode::Return),
        ]);
        assert_eq!(max_stack_depth(&c), Ok(3));
        assert_eq!(validate_chunk(&c), Ok(()));
    }

    #[test]
    fn mismatched_branches_are_rejected() {
        // JUMP_IF_FALSE saute par-dessus un LOAD_CONST : profondeurs 0 et 1 à la jonction.
        let c = chunk_of(&[
            Op::new(Opcode::LoadConst, 0),
            Op::new(Opcode::JumpIfFalse, 3),
            Op::new(Opcode::LoadConst, 0),
            Op::simple(Opcode::Nop),
        ]);
        assert!(matches!(max_stack_depth(&c), Err(CoreError::StackMismatch { pc: 3, .. })));
    }

    #[test]
    fn reserved_format_bits_fail_validation() {
        let c = chunk_of(&[Op::new(Opcode::LoadConst, 0), Op::new(Opcode::FormatValue, 0x01)]);
        assert!(matches!(validate_chunk(&c), Err(CoreError::InvalidArg { opcode: "FORMAT_VALUE", .. })));
    }

    #[test]
    fn out_of_range_indices_fail_validation() {
        let c = chunk_of(&[Op::new(Opcode::LoadConst, 7)]);
        assert!(validate_chunk(&c).is_err());
        let j = chunk_of(&[Op::new(Opcode::Jump, 9)]);
        assert!(validate_chunk(&j).is_err());
    }
}
