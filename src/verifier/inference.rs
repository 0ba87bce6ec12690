use crate::code::{CatchRange, Label, Position, SplitCode};
use crate::descriptors::RefType;
use crate::errors::{Error, VerifierErrorKind};
use crate::verifier::{Frame, MethodContext};
use std::collections::{HashMap, HashSet, VecDeque};

/// Result of running dataflow over the blocks of a method
#[derive(Debug)]
pub struct Inference {
    /// Frame on entry to every reachable block
    pub frames: HashMap<Label, Frame>,

    /// Blocks that are jumped to (or are exception handlers), and so need a stack map frame
    pub jump_targets: HashSet<Label>,

    pub max_stack: usize,
    pub max_locals: usize,
}

impl Inference {
    pub fn is_reachable(&self, block: &Label) -> bool {
        self.frames.contains_key(block)
    }
}

/// Handlers covering a block, in priority order
pub fn handlers_by_block(code: &SplitCode) -> Result<HashMap<Label, Vec<&CatchRange>>, Error> {
    let mut handlers: HashMap<Label, Vec<&CatchRange>> = HashMap::new();
    for catch in &code.catches {
        let start = code.order_index(code.position(catch.start)?);
        let end = code.order_index(code.position(catch.end)?);
        for block in code.block_order.iter().take(end).skip(start) {
            handlers.entry(*block).or_default().push(catch);
        }
    }
    Ok(handlers)
}

/// Compute the frame at the start of every reachable block
///
/// This is a forward dataflow analysis: each block is run through the transfer function starting
/// from its entry frame, and the resulting frame is merged into the entry frames of its
/// successors (and the handlers covering it) until nothing changes.
pub fn infer_frames(
    code: &SplitCode,
    entry_frame: Frame,
    context: &MethodContext,
) -> Result<Inference, Error> {
    let handlers = handlers_by_block(code)?;

    let mut jump_targets: HashSet<Label> = HashSet::new();
    for block in code.blocks.values() {
        jump_targets.extend(block.branch_end.jump_targets().targets().iter().copied());
    }
    for catch in &code.catches {
        if let Ok(Position::Block(handler)) = code.position(catch.handler) {
            jump_targets.insert(handler);
        }
    }

    let mut max_locals = entry_frame.max_locals();
    for block in code.blocks.values() {
        for insn in &block.instructions {
            if let Some((slot, width)) = insn.local_slot() {
                max_locals = max_locals.max(slot as usize + width);
            }
        }
    }

    let Some(&entry) = code.block_order.first() else {
        return Err(Error::FallsOffEnd);
    };

    let mut inference = Inference {
        frames: HashMap::new(),
        jump_targets,
        max_stack: 0,
        max_locals,
    };
    let mut worklist: VecDeque<Label> = VecDeque::new();
    let mut queued: HashSet<Label> = HashSet::new();

    inference.frames.insert(entry, entry_frame);
    worklist.push_back(entry);
    queued.insert(entry);

    while let Some(label) = worklist.pop_front() {
        queued.remove(&label);
        let block = &code.blocks[&label];
        let mut frame = inference.frames[&label].clone();
        let covering = handlers.get(&label).map(Vec::as_slice).unwrap_or(&[]);

        let mut successors: Vec<(Label, Frame)> = vec![];
        for (index, insn) in block.instructions.iter().enumerate() {
            for catch in covering {
                successors.push(handler_entry(code, catch, &frame)?);
            }
            frame
                .execute(insn, (label, index), context)
                .map_err(|kind| verifier_error(format!("{:?}", insn), kind))?;
            inference.max_stack = inference.max_stack.max(frame.max_stack());
            inference.max_locals = inference.max_locals.max(frame.max_locals());
        }
        for catch in covering {
            successors.push(handler_entry(code, catch, &frame)?);
        }

        let branch = &block.branch_end;
        frame
            .execute_branch(branch, context)
            .map_err(|kind| verifier_error(format!("{:?}", branch), kind))?;
        inference.max_stack = inference.max_stack.max(frame.max_stack());

        for target in branch.jump_targets().targets() {
            successors.push((*target, frame.clone()));
        }
        if let Some(next) = branch.fallthrough_target() {
            successors.push((next, frame));
        }

        for (target, incoming) in successors {
            let update = match inference.frames.get(&target) {
                None => Some(incoming),
                Some(existing) => match existing
                    .merge(&incoming, context.hierarchy)
                    .map_err(|kind| verifier_error(format!("{:?}", branch), kind))?
                {
                    None => {
                        return Err(Error::IncompatibleFrames {
                            label: target,
                            first: existing.to_string(),
                            second: incoming.to_string(),
                        })
                    }
                    Some(merged) if &merged != existing => Some(merged),
                    Some(_) => None,
                },
            };
            if let Some(updated) = update {
                inference.frames.insert(target, updated);
                if queued.insert(target) {
                    worklist.push_back(target);
                }
            }
        }
    }

    log::trace!(
        "Inferred frames for {} of {} blocks (max stack {}, max locals {})",
        inference.frames.len(),
        code.block_order.len(),
        inference.max_stack,
        inference.max_locals
    );
    Ok(inference)
}

fn handler_entry(
    code: &SplitCode,
    catch: &CatchRange,
    frame: &Frame,
) -> Result<(Label, Frame), Error> {
    let handler = match code.position(catch.handler)? {
        Position::Block(handler) => handler,
        Position::End => return Err(Error::FallsOffEnd),
    };
    let catch_type = match &catch.catch_type {
        Some(class) => RefType::Object(class.clone()),
        None => RefType::THROWABLE,
    };
    Ok((handler, frame.handler_frame(catch_type)))
}

fn verifier_error(instruction: String, kind: VerifierErrorKind) -> Error {
    Error::VerifierError {
        offset: None,
        instruction,
        kind,
    }
}
