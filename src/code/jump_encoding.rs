//! Widening of jumps whose offsets don't fit in 16 bits
//!
//! `goto`, `if*` and the other short branches store a signed 16-bit offset. When a method is big
//! enough that one of these has to jump further, the branch is rewritten to go through `goto_w`:
//!
//! ```text,ignore,no_run
//!     goto FAR        =>      nop
//!                             nop
//!                             goto_w FAR
//!
//!     if<c> FAR       =>      if<c> TRAMPOLINE
//! NEXT: ...               N:  goto NEXT
//!                         T:  goto_w FAR
//!                      NEXT:  ...
//! ```
//!
//! Both rewrites grow the code by a multiple of four bytes (4 and 8 respectively), so padding of
//! any switch later in the method is unaffected.
//!
//! Growing the code can push other short jumps out of range, which then need widening too. This
//! terminates since every rewrite removes one short jump from consideration and the short jumps
//! it introduces have small constant distances.
//!
//! Jumps over a block are found with a [`SegmentTree`] keyed by block index, so each widening only
//! revisits the jumps that actually span it.
//!
//! `jsr` is left alone: code with subroutines never gets laid out.

use crate::code::{BasicBlock, BranchInstruction, JumpTargets, LabelGenerator};
use crate::errors::Error;
use crate::options::ShortJumps;
use crate::util::{Interval, Offset, OffsetVec, SegmentTree, Width};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::ops::{RangeBounds, RangeInclusive};

/// Offsets reachable by `goto` and the `if*` branches
pub const SIGNED_16BIT_JUMP_RANGE: RangeInclusive<isize> =
    RangeInclusive::new(i16::MIN as isize, i16::MAX as isize);

/// Bytes added by each rewrite
const GOTO_GROWTH: isize = 4;
const CONDITIONAL_GROWTH: isize = 8;

type Blocks<Frame, Insn, Lbl> =
    HashMap<Lbl, BasicBlock<Frame, Insn, BranchInstruction<Lbl, Lbl, Lbl>>>;

/// Rewrite the branches in `blocks` that cannot reach their target with a short offset
///
/// Trampoline blocks may be added, so the layout order is updated in place. `small_jump_range` is
/// [`SIGNED_16BIT_JUMP_RANGE`] outside of tests.
///
/// Under [`ShortJumps::Fail`] nothing is rewritten: the first oversized jump is reported instead.
pub fn widen_oversized_jumps<Frame: Clone, Insn: Default + Width, Lbl: Copy + Eq + Hash>(
    block_order: &mut Vec<Lbl>,
    blocks: &mut Blocks<Frame, Insn, Lbl>,
    label_generator: &mut impl LabelGenerator<Lbl>,
    small_jump_range: &impl RangeBounds<isize>,
    policy: ShortJumps,
) -> Result<(), Error> {
    let jumps = short_jumps(block_order, blocks);
    let oversized: Vec<&ShortJump<Lbl>> = jumps
        .iter()
        .filter(|jump| !small_jump_range.contains(&jump.distance.get()))
        .collect();

    match (oversized.first(), policy) {
        (None, _) => return Ok(()),
        (Some(jump), ShortJumps::Fail) => {
            return Err(Error::ShortJumpOverflow {
                offset: jump.offset.0,
                distance: jump.distance.get(),
            })
        }
        (Some(_), ShortJumps::Fix) => (),
    }

    let widened = find_widenings(block_order.len(), &jumps, oversized, small_jump_range);
    log::debug!("widening {} of {} short jumps", widened.len(), jumps.len());

    let mut trampolines: HashMap<Lbl, (Lbl, Lbl)> = HashMap::new();
    for jump in widened {
        match jump.kind {
            JumpKind::Goto => widen_goto(blocks, jump.block),
            JumpKind::Conditional => {
                let near = label_generator.fresh_label();
                let far = label_generator.fresh_label();
                if widen_conditional(blocks, jump.block, near, far) {
                    trampolines.insert(jump.block, (near, far));
                }
            }
        }
    }

    *block_order = block_order
        .iter()
        .flat_map(|lbl| match trampolines.get(lbl) {
            Some((near, far)) => vec![*lbl, *near, *far],
            None => vec![*lbl],
        })
        .collect();
    Ok(())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum JumpKind {
    Goto,
    Conditional,
}

/// Short jump ending some block
#[derive(Debug)]
struct ShortJump<Lbl> {
    /// Block the jump ends
    block: Lbl,

    /// Offset of the jump instruction in the initial layout
    offset: Offset,

    /// Gaps between blocks which the jump crosses. Gap `i` sits just before block `i`, so a jump
    /// out of block `b` starts at gap `b + 1`.
    gaps: RangeInclusive<usize>,

    /// Gap where the jump instruction is
    origin_gap: usize,

    kind: JumpKind,

    /// Signed distance, kept up to date as rewrites grow the code
    distance: Cell<isize>,
}

impl<Lbl> ShortJump<Lbl> {
    /// Account for `bytes` more code between the jump and its target
    fn grow(&self, bytes: isize) -> isize {
        let distance = self.distance.get();
        let grown = if distance < 0 {
            distance - bytes
        } else {
            distance + bytes
        };
        self.distance.set(grown);
        grown
    }
}

impl<Lbl> Interval for ShortJump<Lbl> {
    fn span(&self) -> RangeInclusive<usize> {
        self.gaps.clone()
    }
}

/// Every `goto` or `if*` in the layout, with its initial distance
fn short_jumps<Frame, Insn: Width, Lbl: Copy + Eq + Hash>(
    block_order: &[Lbl],
    blocks: &Blocks<Frame, Insn, Lbl>,
) -> Vec<ShortJump<Lbl>> {
    let offsets = BasicBlock::compute_block_offsets(block_order, blocks);
    let indices: HashMap<Lbl, usize> = block_order
        .iter()
        .enumerate()
        .map(|(idx, lbl)| (*lbl, idx))
        .collect();

    let mut jumps: Vec<ShortJump<Lbl>> = vec![];
    for (idx, lbl) in block_order.iter().enumerate() {
        let block = &blocks[lbl];
        let kind = match block.branch_end {
            BranchInstruction::Goto(_) => JumpKind::Goto,
            BranchInstruction::Jsr(_, _) => continue,
            _ => JumpKind::Conditional,
        };
        let target = match block.branch_end.jump_targets() {
            JumpTargets::Regular(target) => target,
            _ => continue,
        };

        let offset = Offset(offsets[lbl].0 + block.instructions.offset_len().0);
        let origin_gap = idx + 1;
        let target_gap = indices[&target];
        jumps.push(ShortJump {
            block: *lbl,
            offset,
            gaps: origin_gap.min(target_gap)..=origin_gap.max(target_gap),
            origin_gap,
            kind,
            distance: Cell::new(offsets[&target].0 as isize - offset.0 as isize),
        });
    }

    // Deterministic processing order
    jumps.sort_unstable_by_key(|jump| (*jump.gaps.start(), *jump.gaps.end()));
    jumps
}

/// Close `oversized` under "widening this jump pushes that one out of range"
fn find_widenings<'a, Lbl: Copy + Eq + Hash>(
    gap_count: usize,
    jumps: &'a [ShortJump<Lbl>],
    mut oversized: Vec<&'a ShortJump<Lbl>>,
    small_jump_range: &impl RangeBounds<isize>,
) -> Vec<&'a ShortJump<Lbl>> {
    let mut doomed: HashSet<Lbl> = oversized.iter().map(|jump| jump.block).collect();
    let crossing = SegmentTree::new(gap_count + 1, jumps.iter().collect());

    let mut widened = vec![];
    while let Some(jump) = oversized.pop() {
        log::trace!(
            "jump at {} is out of range (distance {})",
            jump.offset.0,
            jump.distance.get()
        );
        let growth = match jump.kind {
            JumpKind::Goto => GOTO_GROWTH,
            JumpKind::Conditional => CONDITIONAL_GROWTH,
        };
        for other in crossing.intervals_containing(jump.origin_gap) {
            if doomed.contains(&other.block) {
                continue;
            }
            if !small_jump_range.contains(&other.grow(growth)) {
                doomed.insert(other.block);
                oversized.push(*other);
            }
        }
        widened.push(jump);
    }
    widened
}

/// `goto` becomes `nop nop goto_w`
fn widen_goto<Frame, Insn: Default + Width, Lbl: Copy + Eq + Hash>(
    blocks: &mut Blocks<Frame, Insn, Lbl>,
    lbl: Lbl,
) {
    if let Some(block) = blocks.get_mut(&lbl) {
        if let BranchInstruction::Goto(target) = block.branch_end {
            block.instructions.push(Insn::default());
            block.instructions.push(Insn::default());
            block.branch_end = BranchInstruction::GotoW(target);
        }
    }
}

/// `if<c> far` becomes `if<c> far_trampoline` with the trampolines `near: goto next` and
/// `far_trampoline: goto_w far` placed right after the block
///
/// The condition is unchanged: it still selects the far target, now through `goto_w`, and the
/// fallthrough still reaches `next`.
fn widen_conditional<Frame: Clone, Insn: Width, Lbl: Copy + Eq + Hash>(
    blocks: &mut Blocks<Frame, Insn, Lbl>,
    lbl: Lbl,
    near: Lbl,
    far: Lbl,
) -> bool {
    use BranchInstruction::*;

    let block = match blocks.get_mut(&lbl) {
        Some(block) => block,
        None => return false,
    };
    let (redirected, next, target) = match block.branch_end {
        If(cmp, target, next) => (If(cmp, far, near), next, target),
        IfICmp(cmp, target, next) => (IfICmp(cmp, far, near), next, target),
        IfACmp(cmp, target, next) => (IfACmp(cmp, far, near), next, target),
        IfNull(cmp, target, next) => (IfNull(cmp, far, near), next, target),
        _ => return false,
    };
    block.branch_end = redirected;

    for (trampoline, to, branch_end) in [(near, next, Goto(next)), (far, target, GotoW(target))] {
        let frame = blocks[&to].frame.clone();
        blocks.insert(
            trampoline,
            BasicBlock {
                instructions: OffsetVec::new(),
                frame,
                branch_end,
            },
        );
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::code::{Instruction, Label, LabelSequence, OrdComparison, SerializableInstruction};

    type Branch = BranchInstruction<Label, Label, Label>;
    type Block = BasicBlock<(), SerializableInstruction, Branch>;

    /// Block with `len` bytes of instructions before its branch
    fn block(len: usize, branch_end: Branch) -> Block {
        let odd = (len % 2 == 1).then_some(Instruction::Nop);
        BasicBlock {
            instructions: odd
                .into_iter()
                .chain((0..len / 2).flat_map(|_| [Instruction::IConst0, Instruction::Pop]))
                .collect(),
            frame: (),
            branch_end,
        }
    }

    fn labels<const N: usize>(generator: &mut LabelSequence) -> [Label; N] {
        [(); N].map(|()| generator.fresh_label())
    }

    fn widen(
        order: &mut Vec<Label>,
        blocks: &mut HashMap<Label, Block>,
        generator: &mut LabelSequence,
    ) {
        let before = BasicBlock::compute_block_offsets(order, blocks);
        widen_oversized_jumps(order, blocks, generator, &SIGNED_16BIT_JUMP_RANGE, ShortJumps::Fix)
            .unwrap();
        let after = BasicBlock::compute_block_offsets(order, blocks);

        for (lbl, offset) in &before {
            assert_eq!(
                after[lbl].0.abs_diff(offset.0) % 4,
                0,
                "{:?} moved from {} to {}",
                lbl,
                offset.0,
                after[lbl].0
            );
        }
        for lbl in order.iter() {
            let block = &blocks[lbl];
            let from = after[lbl].0 + block.instructions.offset_len().0;
            if let JumpTargets::Regular(target) = block.branch_end.jump_targets() {
                let distance = after[&target].0 as isize - from as isize;
                assert!(SIGNED_16BIT_JUMP_RANGE.contains(&distance), "{:?} jumps {}", lbl, distance);
            }
        }
    }

    #[test]
    fn short_jumps_are_untouched() {
        let generator = &mut LabelSequence::new(Label::START);
        let [l0, l1, l2] = labels(generator);
        let original: HashMap<Label, Block> = [
            (l0, block(2, BranchInstruction::If(OrdComparison::LT, l2, l1))),
            (l1, block(30000, BranchInstruction::Return)),
            (l2, block(2, BranchInstruction::Goto(l1))),
        ]
        .into_iter()
        .collect();

        let order = &mut vec![l0, l1, l2];
        let blocks = &mut original.clone();
        widen(order, blocks, generator);
        assert_eq!(order, &[l0, l1, l2]);
        assert_eq!(blocks, &original);
    }

    #[test]
    fn backward_goto_gets_padding() {
        let generator = &mut LabelSequence::new(Label::START);
        let [l0, l1] = labels(generator);
        let order = &mut vec![l0, l1];
        let blocks = &mut [
            (l0, block(2, BranchInstruction::Return)),
            (l1, block(34000, BranchInstruction::Goto(l0))),
        ]
        .into_iter()
        .collect();
        widen(order, blocks, generator);

        let widened = &blocks[&l1];
        assert_eq!(widened.branch_end, BranchInstruction::GotoW(l0));
        // One byte instructions, then the two `nop`s
        assert_eq!(widened.instructions.len(), 34000 + 2);
        assert_eq!(order, &[l0, l1]);
    }

    #[test]
    fn conditionals_get_trampolines() {
        for backward in [false, true] {
            let generator = &mut LabelSequence::new(Label::START);
            let [l0, l1, l2] = labels(generator);
            let (mut order, mut blocks): (Vec<Label>, HashMap<Label, Block>) = if backward {
                (
                    vec![l0, l1, l2],
                    [
                        (l0, block(2, BranchInstruction::Return)),
                        (l1, block(34000, BranchInstruction::If(OrdComparison::EQ, l0, l2))),
                        (l2, block(2, BranchInstruction::Return)),
                    ]
                    .into_iter()
                    .collect(),
                )
            } else {
                (
                    vec![l0, l1, l2],
                    [
                        (l0, block(2, BranchInstruction::If(OrdComparison::EQ, l2, l1))),
                        (l1, block(34000, BranchInstruction::Return)),
                        (l2, block(2, BranchInstruction::Return)),
                    ]
                    .into_iter()
                    .collect(),
                )
            };
            let mut upcoming = generator.clone();
            let [near, far] = labels(&mut upcoming);
            widen(&mut order, &mut blocks, generator);

            let (source, next, target) = if backward { (l1, l2, l0) } else { (l0, l1, l2) };
            let mut expected_order = vec![l0, l1, l2];
            let position = expected_order.iter().position(|lbl| *lbl == source).unwrap();
            expected_order.splice(position + 1..position + 1, [near, far]);
            assert_eq!(order, expected_order);

            assert_eq!(
                blocks[&source].branch_end,
                BranchInstruction::If(OrdComparison::EQ, far, near)
            );
            assert_eq!(blocks[&near], block(0, BranchInstruction::Goto(next)));
            assert_eq!(blocks[&far], block(0, BranchInstruction::GotoW(target)));
        }
    }

    #[test]
    fn widening_can_push_other_jumps_out_of_range() {
        let generator = &mut LabelSequence::new(Label::START);
        let [l0, l1, l2, l3, l4] = labels(generator);

        // The `if` reaches `l3` with two bytes to spare until the `goto` across it grows
        let order = &mut vec![l0, l1, l2, l3, l4];
        let blocks = &mut [
            (l0, block(2, BranchInstruction::If(OrdComparison::GE, l3, l1))),
            (l1, block(10, BranchInstruction::Goto(l4))),
            (l2, block(32748, BranchInstruction::Return)),
            (l3, block(100, BranchInstruction::Return)),
            (l4, block(0, BranchInstruction::Return)),
        ]
        .into_iter()
        .collect();
        let mut upcoming = generator.clone();
        let [near, far] = labels(&mut upcoming);
        widen(order, blocks, generator);

        assert_eq!(order, &[l0, near, far, l1, l2, l3, l4]);
        assert_eq!(blocks[&l1].branch_end, BranchInstruction::GotoW(l4));
        assert_eq!(
            blocks[&l0].branch_end,
            BranchInstruction::If(OrdComparison::GE, far, near)
        );
    }

    #[test]
    fn failing_policy_reports_the_jump() {
        let generator = &mut LabelSequence::new(Label::START);
        let [l0, l1, l2] = labels(generator);
        let order = &mut vec![l0, l1, l2];
        let blocks: &mut HashMap<Label, Block> = &mut [
            (l0, block(3, BranchInstruction::If(OrdComparison::EQ, l2, l1))),
            (l1, block(34000, BranchInstruction::Return)),
            (l2, block(2, BranchInstruction::Return)),
        ]
        .into_iter()
        .collect();
        let before = blocks.clone();

        let result = widen_oversized_jumps(
            order,
            blocks,
            generator,
            &SIGNED_16BIT_JUMP_RANGE,
            ShortJumps::Fail,
        );
        assert!(
            matches!(
                result,
                Err(Error::ShortJumpOverflow {
                    offset: 3,
                    distance: 34004
                })
            ),
            "{:?}",
            result
        );
        assert_eq!(blocks, &before);
    }
}
