//! IR structural verification
//!
//! Checks the invariants every lowered function must satisfy before it may
//! be emitted: every block ends in exactly one terminator, phis sit at block
//! tops with exactly one argument per predecessor, and every value use is
//! dominated by its definition (phi arguments by their predecessor's
//! terminator).

use crate::ir::{Function, Inst};
use cot_common::{CotError, CotResult};

/// Verify one function; the error message names the first violation.
pub fn verify_function(func: &Function) -> CotResult<()> {
    verify_terminators(func)?;
    verify_phi_placement(func)?;
    verify_dominance(func)?;
    Ok(())
}

fn verify_terminators(func: &Function) -> CotResult<()> {
    for block in &func.blocks {
        let terminator_count =
            block.insts.iter().filter(|inst| inst.is_terminator()).count();
        if terminator_count != 1 {
            return Err(CotError::ice_with_dump(
                format!(
                    "{}: bb{} has {} terminators",
                    func.name, block.id, terminator_count
                ),
                func.to_string(),
            ));
        }
        if !block.insts.last().map_or(false, |inst| inst.is_terminator()) {
            return Err(CotError::ice_with_dump(
                format!("{}: bb{} does not end in its terminator", func.name, block.id),
                func.to_string(),
            ));
        }
    }
    Ok(())
}

fn verify_phi_placement(func: &Function) -> CotResult<()> {
    for block in &func.blocks {
        let mut body_started = false;
        for inst in &block.insts {
            match inst {
                Inst::Phi { dest, args } => {
                    if body_started {
                        return Err(CotError::ice_with_dump(
                            format!(
                                "{}: phi %{} not at the top of bb{}",
                                func.name, dest, block.id
                            ),
                            func.to_string(),
                        ));
                    }
                    let mut phi_blocks: Vec<u32> = args.iter().map(|a| a.block).collect();
                    let mut preds = block.preds.clone();
                    phi_blocks.sort_unstable();
                    preds.sort_unstable();
                    if phi_blocks != preds {
                        return Err(CotError::ice_with_dump(
                            format!(
                                "{}: phi %{} args {:?} do not match preds {:?} of bb{}",
                                func.name, dest, phi_blocks, preds, block.id
                            ),
                            func.to_string(),
                        ));
                    }
                }
                Inst::DebugLine { .. } => {}
                _ => body_started = true,
            }
        }
    }
    Ok(())
}

/// Iterative dominator computation over the block graph. Handler blocks
/// have no explicit predecessors; the block issuing `set_handler` counts as
/// their exceptional predecessor, since the whole try region runs after it.
fn dominators(func: &Function) -> Vec<Vec<bool>> {
    let n = func.blocks.len();
    let mut preds: Vec<Vec<u32>> = func.blocks.iter().map(|b| b.preds.clone()).collect();
    for block in &func.blocks {
        for inst in &block.insts {
            if let Inst::SetHandler { handler } = inst {
                preds[*handler as usize].push(block.id);
            }
        }
    }

    let mut dom = vec![vec![true; n]; n];
    dom[0] = vec![false; n];
    dom[0][0] = true;

    let mut changed = true;
    while changed {
        changed = false;
        for block in func.blocks.iter().skip(1) {
            let i = block.id as usize;
            let mut new_dom = vec![true; n];
            if preds[i].is_empty() {
                new_dom = vec![false; n];
            } else {
                for pred in &preds[i] {
                    for (k, bit) in new_dom.iter_mut().enumerate() {
                        *bit = *bit && dom[*pred as usize][k];
                    }
                }
            }
            new_dom[i] = true;
            if new_dom != dom[i] {
                dom[i] = new_dom;
                changed = true;
            }
        }
    }
    dom
}

fn verify_dominance(func: &Function) -> CotResult<()> {
    let n = func.blocks.len();
    // def_site[v] = (block, instruction index); parameters define at entry.
    let mut def_site = vec![None; func.value_count() as usize];
    for param in &func.params {
        def_site[param.id as usize] = Some((0u32, usize::MAX));
    }
    for block in &func.blocks {
        for (i, inst) in block.insts.iter().enumerate() {
            if let Some(dest) = inst.dest() {
                def_site[dest as usize] = Some((block.id, i));
            }
        }
    }

    let dom = dominators(func);
    let dominates = |a: u32, b: u32| -> bool { dom[b as usize][a as usize] };

    for block in &func.blocks {
        for (i, inst) in block.insts.iter().enumerate() {
            if let Inst::Phi { dest, args } = inst {
                for arg in args.iter() {
                    let Some((def_block, _)) = def_site[arg.value as usize] else {
                        return Err(CotError::ice_with_dump(
                            format!("{}: phi %{} uses undefined %{}", func.name, dest, arg.value),
                            func.to_string(),
                        ));
                    };
                    if (arg.block as usize) < n && !dominates(def_block, arg.block) {
                        return Err(CotError::ice_with_dump(
                            format!(
                                "{}: phi %{} arg %{} does not dominate pred bb{}",
                                func.name, dest, arg.value, arg.block
                            ),
                            func.to_string(),
                        ));
                    }
                }
                continue;
            }
            for used in inst.operands() {
                let Some((def_block, def_index)) = def_site[used as usize] else {
                    return Err(CotError::ice_with_dump(
                        format!("{}: use of undefined value %{}", func.name, used),
                        func.to_string(),
                    ));
                };
                let ok = if def_block == block.id {
                    def_index == usize::MAX || def_index < i
                } else {
                    dominates(def_block, block.id)
                };
                if !ok {
                    return Err(CotError::ice_with_dump(
                        format!(
                            "{}: %{} used in bb{} before its definition dominates it",
                            func.name, used, block.id
                        ),
                        func.to_string(),
                    ));
                }
            }
        }
    }
    Ok(())
}
