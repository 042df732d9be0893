//! IR validation: the contract consumed by the native back end.
//!
//! An emitted function must have every block reachable from entry, exactly
//! one terminator per block, and φ incoming pairs covering exactly the
//! block's predecessors. Violations are compiler bugs surfaced before the
//! IR escapes, not user errors.

use std::collections::BTreeSet;

use thiserror::Error;

use tern_core::id::BlockId;

use crate::model::{Exit, Func, Op, Val};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidateError {
    #[error("function `{func}`: block {block:?} has no terminator")]
    MissingTerminator { func: String, block: BlockId },

    #[error("function `{func}`: block {block:?} is unreachable from entry")]
    UnreachableBlock { func: String, block: BlockId },

    #[error("function `{func}`: jump to out-of-range block {block:?}")]
    BadTarget { func: String, block: BlockId },

    #[error(
        "function `{func}`: phi in block {block:?} covers {covered:?} but predecessors are {preds:?}"
    )]
    PhiMismatch {
        func: String,
        block: BlockId,
        covered: Vec<BlockId>,
        preds: Vec<BlockId>,
    },
}

/// Checks a finished function against the back-end contract.
pub fn validate_func(func: &Func) -> Result<(), ValidateError> {
    let n = func.blocks.len() as u32;
    let in_range = |b: BlockId| b.0 < n;

    // Reachability from entry.
    let mut reachable: BTreeSet<BlockId> = BTreeSet::new();
    let mut work = vec![func.entry];
    while let Some(b) = work.pop() {
        if !in_range(b) {
            return Err(ValidateError::BadTarget {
                func: func.name.clone(),
                block: b,
            });
        }
        if !reachable.insert(b) {
            continue;
        }
        match &func.block(b).exit {
            Exit::None => {
                return Err(ValidateError::MissingTerminator {
                    func: func.name.clone(),
                    block: b,
                })
            }
            Exit::Jump(t) => work.push(*t),
            Exit::Cond {
                on_true, on_false, ..
            } => {
                work.push(*on_true);
                work.push(*on_false);
            }
            Exit::Return => {}
        }
    }

    for i in 0..n {
        let b = BlockId(i);
        if !reachable.contains(&b) {
            return Err(ValidateError::UnreachableBlock {
                func: func.name.clone(),
                block: b,
            });
        }
    }

    // Every phi covers exactly its block's predecessors.
    for &b in &reachable {
        let preds: BTreeSet<BlockId> = func.predecessors(b).into_iter().collect();
        for cmd in &func.block(b).cmds {
            if cmd.op != Op::Phi {
                continue;
            }
            let covered: BTreeSet<BlockId> = cmd
                .args
                .chunks(2)
                .filter_map(|pair| match pair.first() {
                    Some(Val::Block(src)) => Some(*src),
                    _ => None,
                })
                .collect();
            if covered != preds {
                return Err(ValidateError::PhiMismatch {
                    func: func.name.clone(),
                    block: b,
                    covered: covered.into_iter().collect(),
                    preds: preds.into_iter().collect(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Block, Cmd};
    use smallvec::smallvec;
    use tern_core::intern::TypeId;

    fn two_block_func() -> Func {
        let mut func = Func {
            name: "t".into(),
            ty: TypeId::VOID,
            n_params: 0,
            n_rets: 0,
            entry: BlockId(0),
            exit: BlockId(1),
            blocks: vec![Block::new(), Block::new()],
            reg_types: vec![],
        };
        func.blocks[0].exit = Exit::Jump(BlockId(1));
        func.blocks[1].exit = Exit::Return;
        func
    }

    #[test]
    fn valid_function_passes() {
        assert_eq!(validate_func(&two_block_func()), Ok(()));
    }

    #[test]
    fn missing_terminator_is_caught() {
        let mut func = two_block_func();
        func.blocks[1].exit = Exit::None;
        assert!(matches!(
            validate_func(&func),
            Err(ValidateError::MissingTerminator { .. })
        ));
    }

    #[test]
    fn unreachable_block_is_caught() {
        let mut func = two_block_func();
        func.blocks.push(Block {
            cmds: vec![],
            exit: Exit::Return,
        });
        assert!(matches!(
            validate_func(&func),
            Err(ValidateError::UnreachableBlock { .. })
        ));
    }

    #[test]
    fn phi_must_cover_exactly_the_predecessors() {
        let mut func = two_block_func();
        // Block 1 has a single predecessor (block 0) but the phi claims two.
        func.blocks[1].cmds.push(Cmd {
            op: Op::Phi,
            ty: TypeId::I32,
            args: smallvec![
                Val::Block(BlockId(0)),
                Val::Int(1),
                Val::Block(BlockId(7)),
                Val::Int(2)
            ],
            result: Some(tern_core::id::Reg(0)),
        });
        assert!(matches!(
            validate_func(&func),
            Err(ValidateError::PhiMismatch { .. })
        ));

        func.blocks[1].cmds[0].args = smallvec![Val::Block(BlockId(0)), Val::Int(1)];
        assert_eq!(validate_func(&func), Ok(()));
    }
}
