//! Release-mode IL optimization and final assembly
//!
//! ```text
//!   codegen items ──► optimize (Release) ──► assemble ──► Method
//!                      │                      │
//!                      ├ drop sequence points ├ labels → instruction indices
//!                      ├ fold constants       ├ IL offsets
//!                      ├ fold const branches  ├ line table (Debug)
//!                      ├ drop dead code       └ max stack depth
//!                      └ drop br-to-next
//! ```
//!
//! Folding uses the same integer semantics as the interpreter, and a fold
//! that would fault (overflow, division by zero) is left for run time.

use super::codegen::Item;
use super::il::{Instruction, LineEntry};
use crate::interpreter::ops::{int_binary, int_unary};
use rustc_hash::{FxHashMap, FxHashSet};

/// Rewrite `items` until no pass makes progress
pub(crate) fn optimize(items: Vec<Item>) -> Vec<Item> {
    let mut items: Vec<Item> = items
        .into_iter()
        .filter(|item| !matches!(item, Item::Seq(_)))
        .collect();

    loop {
        let mut changed = fold_constants(&mut items);
        changed |= fold_constant_branches(&mut items);
        changed |= remove_unused_labels(&mut items);
        changed |= remove_unreachable(&mut items);
        changed |= remove_jumps_to_next(&mut items);
        if !changed {
            return items;
        }
    }
}

fn is_int_binary(instr: Instruction) -> bool {
    matches!(
        instr,
        Instruction::Add
            | Instruction::Sub
            | Instruction::Mul
            | Instruction::Div
            | Instruction::Rem
            | Instruction::And
            | Instruction::Or
            | Instruction::Xor
            | Instruction::Shl
            | Instruction::Shr
            | Instruction::Ceq
            | Instruction::Cne
            | Instruction::Clt
            | Instruction::Cle
            | Instruction::Cgt
            | Instruction::Cge
    )
}

fn fold_constants(items: &mut Vec<Item>) -> bool {
    let mut out: Vec<Item> = Vec::with_capacity(items.len());
    let mut changed = false;

    for &item in items.iter() {
        out.push(item);
        loop {
            let folded = match out.as_slice() {
                [.., Item::Op(Instruction::LdcI8(a)), Item::Op(Instruction::LdcI8(b)), Item::Op(op)]
                    if is_int_binary(*op) =>
                {
                    int_binary(*op, *a, *b).ok().map(|n| (3, Some(n)))
                }
                [.., Item::Op(Instruction::LdcI8(a)), Item::Op(op @ (Instruction::Neg | Instruction::Not))] => {
                    int_unary(*op, *a).ok().map(|n| (2, Some(n)))
                }
                [.., Item::Op(Instruction::LdcI8(_) | Instruction::Ldnull), Item::Op(Instruction::Pop)] => {
                    Some((2, None))
                }
                _ => None,
            };
            let Some((consumed, result)) = folded else {
                break;
            };
            out.truncate(out.len() - consumed);
            if let Some(n) = result {
                out.push(Item::Op(Instruction::LdcI8(n)));
            }
            changed = true;
        }
    }

    *items = out;
    changed
}

fn fold_constant_branches(items: &mut Vec<Item>) -> bool {
    let mut out: Vec<Item> = Vec::with_capacity(items.len());
    let mut changed = false;

    for &item in items.iter() {
        let taken = match (out.last(), item) {
            (Some(Item::Op(Instruction::LdcI8(n))), Item::Op(Instruction::Brtrue(target))) => {
                Some((*n != 0, target))
            }
            (Some(Item::Op(Instruction::LdcI8(n))), Item::Op(Instruction::Brfalse(target))) => {
                Some((*n == 0, target))
            }
            (Some(Item::Op(Instruction::Ldnull)), Item::Op(Instruction::Brtrue(target))) => {
                Some((false, target))
            }
            (Some(Item::Op(Instruction::Ldnull)), Item::Op(Instruction::Brfalse(target))) => {
                Some((true, target))
            }
            _ => None,
        };

        match taken {
            Some((always, target)) => {
                out.pop();
                if always {
                    out.push(Item::Op(Instruction::Br(target)));
                }
                changed = true;
            }
            None => out.push(item),
        }
    }

    *items = out;
    changed
}

fn remove_unused_labels(items: &mut Vec<Item>) -> bool {
    let used: FxHashSet<u32> = items
        .iter()
        .filter_map(|item| match item {
            Item::Op(instr) => instr.branch_target(),
            _ => None,
        })
        .collect();

    let before = items.len();
    items.retain(|item| !matches!(item, Item::Mark(label) if !used.contains(label)));
    items.len() != before
}

/// Drop instructions after `br`/`ret` that no label makes reachable again
fn remove_unreachable(items: &mut Vec<Item>) -> bool {
    let before = items.len();
    let mut dead = false;
    items.retain(|item| match item {
        Item::Op(instr) => {
            let keep = !dead;
            if keep && instr.is_terminator() {
                dead = true;
            }
            keep
        }
        _ => {
            dead = false;
            true
        }
    });
    items.len() != before
}

fn remove_jumps_to_next(items: &mut Vec<Item>) -> bool {
    let mut removed = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let Item::Op(Instruction::Br(target)) = item else {
            continue;
        };
        let lands_next = items[i + 1..]
            .iter()
            .take_while(|next| matches!(next, Item::Mark(_)))
            .any(|next| *next == Item::Mark(*target));
        if lands_next {
            removed.push(i);
        }
    }

    for &i in removed.iter().rev() {
        items.remove(i);
    }
    !removed.is_empty()
}

/// Final code for one method
pub(crate) struct Assembled {
    pub code: Vec<Instruction>,
    pub offsets: Vec<u32>,
    pub lines: Option<Vec<LineEntry>>,
    pub max_stack: usize,
}

/// Resolve labels and lay out offsets. With `keep_lines`, each sequence point
/// becomes a `nop` that a line-table entry points at.
pub(crate) fn assemble(
    items: &[Item],
    keep_lines: bool,
    params_of: impl Fn(u16) -> usize,
) -> Assembled {
    let mut code = Vec::with_capacity(items.len());
    let mut offsets = Vec::with_capacity(items.len());
    let mut lines = Vec::new();
    let mut labels: FxHashMap<u32, usize> = FxHashMap::default();
    let mut offset = 0u32;

    for item in items {
        let instr = match *item {
            Item::Op(instr) => instr,
            Item::Mark(label) => {
                labels.insert(label, code.len());
                continue;
            }
            Item::Seq(line) if keep_lines => {
                lines.push(LineEntry { offset, line });
                Instruction::Nop
            }
            Item::Seq(_) => continue,
        };
        offsets.push(offset);
        offset += instr.encoded_size();
        code.push(instr);
    }

    let end = code.len();
    for instr in code.iter_mut() {
        if let Some(label) = instr.branch_target() {
            let index = labels.get(&label).copied().unwrap_or(end);
            *instr = instr.with_target(index as u32);
        }
    }

    let max_stack = max_stack(&code, params_of);
    Assembled {
        code,
        offsets,
        lines: keep_lines.then_some(lines),
        max_stack,
    }
}

/// Evaluation stack depth before each instruction; `None` where unreachable
pub(crate) fn stack_depths(
    code: &[Instruction],
    params_of: impl Fn(u16) -> usize,
) -> Vec<Option<usize>> {
    let mut depths = vec![None; code.len()];
    let mut work = vec![(0usize, 0usize)];

    while let Some((pc, depth)) = work.pop() {
        if pc >= code.len() || depths[pc].is_some() {
            continue;
        }
        depths[pc] = Some(depth);

        let instr = code[pc];
        let (pops, pushes) = instr.stack_effect(&params_of);
        let after = depth.saturating_sub(pops) + pushes;

        if let Some(target) = instr.branch_target() {
            work.push((target as usize, after));
        }
        if !instr.is_terminator() {
            work.push((pc + 1, after));
        }
    }
    depths
}

/// Deepest evaluation stack over all paths through `code`
pub(crate) fn max_stack(code: &[Instruction], params_of: impl Fn(u16) -> usize) -> usize {
    stack_depths(code, &params_of)
        .iter()
        .zip(code)
        .filter_map(|(depth, instr)| {
            let depth = (*depth)?;
            let (pops, pushes) = instr.stack_effect(&params_of);
            Some(depth.max(depth.saturating_sub(pops) + pushes))
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(instr: Instruction) -> Item {
        Item::Op(instr)
    }

    #[test]
    fn test_folds_nested_constants() {
        // (2 + 3) * -4
        let items = vec![
            op(Instruction::LdcI8(2)),
            op(Instruction::LdcI8(3)),
            op(Instruction::Add),
            op(Instruction::LdcI8(4)),
            op(Instruction::Neg),
            op(Instruction::Mul),
            op(Instruction::Ret),
        ];
        assert_eq!(
            optimize(items),
            vec![op(Instruction::LdcI8(-20)), op(Instruction::Ret)]
        );
    }

    #[test]
    fn test_faulting_fold_is_left_alone() {
        let items = vec![
            op(Instruction::LdcI8(1)),
            op(Instruction::LdcI8(0)),
            op(Instruction::Div),
            op(Instruction::Ret),
        ];
        assert_eq!(optimize(items.clone()), items);
    }

    #[test]
    fn test_constant_condition_removes_dead_branch() {
        // if (0) { return 1; } return 2;
        let items = vec![
            Item::Seq(1),
            op(Instruction::LdcI8(0)),
            op(Instruction::Brfalse(0)),
            op(Instruction::LdcI8(1)),
            op(Instruction::Ret),
            Item::Mark(0),
            op(Instruction::LdcI8(2)),
            op(Instruction::Ret),
        ];
        assert_eq!(
            optimize(items),
            vec![op(Instruction::LdcI8(2)), op(Instruction::Ret)]
        );
    }

    #[test]
    fn test_infinite_loop_keeps_back_edge() {
        let items = vec![
            Item::Mark(0),
            op(Instruction::LdcI8(1)),
            op(Instruction::Brfalse(1)),
            op(Instruction::Nop),
            op(Instruction::Br(0)),
            Item::Mark(1),
            op(Instruction::LdcI8(0)),
            op(Instruction::Ret),
        ];
        assert_eq!(
            optimize(items),
            vec![
                Item::Mark(0),
                op(Instruction::Nop),
                op(Instruction::Br(0)),
            ]
        );
    }

    #[test]
    fn test_assemble_resolves_labels_and_lines() {
        let items = vec![
            Item::Seq(1),
            op(Instruction::LdcI8(1)),
            op(Instruction::Brtrue(7)),
            op(Instruction::Ldnull),
            op(Instruction::Ret),
            Item::Mark(7),
            op(Instruction::LdcI8(2)),
            op(Instruction::Ret),
        ];
        let assembled = assemble(&items, true, |_| 0);
        assert_eq!(assembled.code[2], Instruction::Brtrue(5));
        assert_eq!(assembled.offsets, vec![0, 1, 10, 15, 16, 17]);
        assert_eq!(
            assembled.lines,
            Some(vec![LineEntry { offset: 0, line: 1 }])
        );
        assert_eq!(assembled.max_stack, 1);

        let release = assemble(&items, false, |_| 0);
        assert_eq!(release.lines, None);
        assert_eq!(release.code.len(), 5);
    }

    #[test]
    fn test_max_stack_follows_calls() {
        let code = [
            Instruction::LdcI8(1),
            Instruction::LdcI8(2),
            Instruction::LdcI8(3),
            Instruction::Call(1),
            Instruction::Ret,
        ];
        assert_eq!(max_stack(&code, |_| 3), 3);
    }
}
