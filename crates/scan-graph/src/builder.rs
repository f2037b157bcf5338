//! Translation of unit bodies into graphs.
//!
//! The body is split into basic blocks, the reachable blocks are visited in
//! reverse post-order and each one is abstractly interpreted over an operand
//! stack and local slots. A block reached by more than one edge becomes a
//! `Merge` with one `Phi` per live slot. Loop headers are entered before their
//! back edges are seen, so their phis receive those inputs late and their
//! stamps are only solved once translation is complete.

use std::collections::{BTreeSet, HashMap, HashSet};

use invariant_scan_types::{Insn, TypeHierarchy, TypeRef, UnitDescriptor};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{BuildError, MalformedReason};
use crate::graph::{ConstValue, Graph, NodeId, NodeKind};
use crate::stamp::{ObjectStamp, Stamp, ValueKind};

/// Knobs that change what the builder accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuilderOptions {
    /// Resolve every type a body references while building, failing with
    /// [`BuildError::Linkage`] on the first one the hierarchy does not know.
    pub eager_resolution: bool,
}

/// Builds one [`Graph`] per unit. Holds no per-unit state, so a single
/// builder can be shared by every task of a scan.
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder<'h> {
    hierarchy: &'h TypeHierarchy,
    options: BuilderOptions,
}

impl<'h> GraphBuilder<'h> {
    pub fn new(hierarchy: &'h TypeHierarchy, options: BuilderOptions) -> Self {
        Self { hierarchy, options }
    }

    /// Build the graph of `unit`'s body.
    ///
    /// The returned graph has usages computed and every phi stamp resolved.
    pub fn build(&self, unit: &UnitDescriptor) -> Result<Graph, BuildError> {
        let (blocks, block_of) = decode_blocks(&unit.body)?;
        let order = reverse_post_order(&blocks);

        let mut incoming_count = vec![0usize; blocks.len()];
        incoming_count[0] = 1; // method entry
        for &b in &order {
            for &succ in &blocks[b].succs {
                incoming_count[succ] += 1;
            }
        }

        let mut translation = Translation {
            hierarchy: self.hierarchy,
            options: self.options,
            unit,
            graph: Graph::new(unit.qualified_name()),
            local_count: local_count(unit),
            pending: (0..blocks.len()).map(|_| Vec::new()).collect(),
            translated: vec![false; blocks.len()],
            blocks,
            block_of,
            incoming_count,
            loop_headers: HashMap::new(),
            phis: Vec::new(),
            conflicting: BTreeSet::new(),
        };
        translation.enter_method()?;
        for b in order {
            translation.translate_block(b)?;
        }
        let graph = translation.finish()?;
        trace!(unit = %graph.unit(), nodes = graph.len(), "built graph");
        Ok(graph)
    }
}

// =============================================================================
// Block decoding
// =============================================================================

#[derive(Debug)]
struct Block {
    start: usize,
    /// Exclusive.
    end: usize,
    /// Successor blocks; conditionals list `[target, fallthrough]`.
    succs: SmallVec<[usize; 2]>,
}

fn decode_blocks(body: &[Insn]) -> Result<(Vec<Block>, Vec<usize>), BuildError> {
    if body.is_empty() {
        return Err(BuildError::Malformed {
            position: None,
            reason: MalformedReason::EmptyBody,
        });
    }

    let mut leaders = BTreeSet::new();
    leaders.insert(0);
    for (pos, insn) in body.iter().enumerate() {
        if let Some(target) = insn.branch_target() {
            if target >= body.len() {
                return Err(BuildError::malformed(pos, MalformedReason::InvalidTarget));
            }
            leaders.insert(target);
        }
        if (insn.branch_target().is_some() || insn.ends_flow()) && pos + 1 < body.len() {
            leaders.insert(pos + 1);
        }
    }

    let starts: Vec<usize> = leaders.into_iter().collect();
    let mut block_of = vec![0usize; body.len()];
    let mut blocks = Vec::with_capacity(starts.len());
    for (b, &start) in starts.iter().enumerate() {
        let end = starts.get(b + 1).copied().unwrap_or(body.len());
        block_of[start..end].fill(b);
        blocks.push(Block {
            start,
            end,
            succs: SmallVec::new(),
        });
    }

    for block in &mut blocks {
        let last = &body[block.end - 1];
        if let Some(target) = last.branch_target() {
            block.succs.push(block_of[target]);
        }
        // A block that runs past the end of the body gets no fallthrough
        // successor; translating it reports the error.
        if !last.ends_flow() && block.end < body.len() {
            block.succs.push(block_of[block.end]);
        }
    }
    Ok((blocks, block_of))
}

/// Reverse post-order of the blocks reachable from the entry block.
fn reverse_post_order(blocks: &[Block]) -> Vec<usize> {
    let mut visited = vec![false; blocks.len()];
    let mut post = Vec::with_capacity(blocks.len());
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    visited[0] = true;
    while let Some(&(block, next)) = stack.last() {
        match blocks[block].succs.get(next) {
            Some(&succ) => {
                let top = stack.len() - 1;
                stack[top].1 += 1;
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push((succ, 0));
                }
            }
            None => {
                post.push(block);
                stack.pop();
            }
        }
    }
    post.reverse();
    post
}

fn local_count(unit: &UnitDescriptor) -> usize {
    let params = unit.signature.params.len() + usize::from(!unit.signature.is_static);
    let used = unit
        .body
        .iter()
        .filter_map(|insn| match insn {
            Insn::Load { local } | Insn::Store { local } => Some(*local as usize + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    params.max(used)
}

// =============================================================================
// Translation
// =============================================================================

/// Abstract machine state flowing along a control edge.
#[derive(Debug, Clone, Default)]
struct FrameState {
    stack: Vec<NodeId>,
    locals: Vec<Option<NodeId>>,
    monitors: usize,
}

impl FrameState {
    fn pop(&mut self, pos: usize) -> Result<NodeId, BuildError> {
        self.stack
            .pop()
            .ok_or_else(|| BuildError::malformed(pos, MalformedReason::StackUnderflow))
    }

    fn pop_kind(&mut self, graph: &Graph, pos: usize, kind: ValueKind) -> Result<NodeId, BuildError> {
        let value = self.pop(pos)?;
        if graph.stamp(value).kind() != kind {
            return Err(BuildError::malformed(pos, MalformedReason::KindMismatch));
        }
        Ok(value)
    }
}

/// An edge into a block that has not been entered yet.
#[derive(Debug)]
struct Incoming {
    control: NodeId,
    position: usize,
    state: FrameState,
}

/// Phis of a block that was entered before all its predecessors were known.
#[derive(Debug, Clone)]
struct LoopHeader {
    merge: NodeId,
    stack: Vec<NodeId>,
    locals: Vec<Option<NodeId>>,
    monitors: usize,
}

struct Translation<'a> {
    hierarchy: &'a TypeHierarchy,
    options: BuilderOptions,
    unit: &'a UnitDescriptor,
    graph: Graph,
    blocks: Vec<Block>,
    block_of: Vec<usize>,
    local_count: usize,
    incoming_count: Vec<usize>,
    pending: Vec<Vec<Incoming>>,
    translated: Vec<bool>,
    loop_headers: HashMap<usize, LoopHeader>,
    phis: Vec<NodeId>,
    /// Local phis whose back-edge inputs disagree in kind with the forward ones.
    conflicting: BTreeSet<NodeId>,
}

impl<'a> Translation<'a> {
    fn enter_method(&mut self) -> Result<(), BuildError> {
        let unit = self.unit;
        let start = self.graph.add(NodeKind::Start, Stamp::Void, None);
        let mut locals = vec![None; self.local_count];
        let mut slot = 0usize;

        if !unit.signature.is_static {
            let this = self.graph.add(
                NodeKind::Parameter { index: 0 },
                Stamp::Object(ObjectStamp::non_null(unit.holder.clone())),
                None,
            );
            locals[0] = Some(this);
            slot = 1;
        }
        for ty in &unit.signature.params {
            if ty.is_void() {
                return Err(BuildError::Malformed {
                    position: None,
                    reason: MalformedReason::VoidParameter,
                });
            }
            let param = self.graph.add(
                NodeKind::Parameter { index: slot as u16 },
                Stamp::for_type(ty),
                None,
            );
            locals[slot] = Some(param);
            slot += 1;
        }

        self.pending[0].push(Incoming {
            control: start,
            position: 0,
            state: FrameState {
                stack: Vec::new(),
                locals,
                monitors: 0,
            },
        });
        Ok(())
    }

    fn translate_block(&mut self, b: usize) -> Result<(), BuildError> {
        let (mut state, mut control) = self.enter_block(b)?;
        self.translated[b] = true;

        let unit = self.unit;
        let body = &unit.body;
        let signature = &unit.signature;
        let (start, end) = (self.blocks[b].start, self.blocks[b].end);

        for pos in start..end {
            let insn = &body[pos];
            match insn {
                Insn::Load { local } => {
                    let value = state
                        .locals
                        .get(*local as usize)
                        .copied()
                        .flatten()
                        .ok_or_else(|| BuildError::malformed(pos, MalformedReason::UninitializedLocal))?;
                    state.stack.push(value);
                }
                Insn::Store { local } => {
                    let value = state.pop(pos)?;
                    state.locals[*local as usize] = Some(value);
                }
                Insn::ConstNull => {
                    let value = self.value(
                        NodeKind::Constant(ConstValue::Null),
                        Stamp::Object(ObjectStamp::null()),
                        &[],
                        pos,
                    );
                    state.stack.push(value);
                }
                Insn::ConstInt { value } => {
                    let value =
                        self.value(NodeKind::Constant(ConstValue::Int(*value)), Stamp::Int, &[], pos);
                    state.stack.push(value);
                }
                Insn::ConstString { value } => {
                    let value = self.value(
                        NodeKind::Constant(ConstValue::String(value.clone())),
                        Stamp::Object(ObjectStamp::non_null(invariant_scan_types::STRING_TYPE)),
                        &[],
                        pos,
                    );
                    state.stack.push(value);
                }
                Insn::GetStatic { field } => {
                    self.resolve(&field.owner, pos)?;
                    let stamp = match &field.ty {
                        TypeRef::Void => {
                            return Err(BuildError::malformed(pos, MalformedReason::KindMismatch))
                        }
                        ty => Stamp::for_type(ty),
                    };
                    let value = self.value(NodeKind::LoadStatic(field.clone()), stamp, &[], pos);
                    state.stack.push(value);
                }
                Insn::New { ty } => {
                    self.resolve(ty, pos)?;
                    let value = self.value(
                        NodeKind::New { ty: ty.clone() },
                        Stamp::Object(ObjectStamp::non_null(ty.clone())),
                        &[],
                        pos,
                    );
                    state.stack.push(value);
                }
                Insn::Invoke { method } => {
                    self.resolve(&method.owner, pos)?;
                    let mut args: SmallVec<[NodeId; 4]> = SmallVec::with_capacity(method.arg_slots());
                    for param in method.params.iter().rev() {
                        let kind = slot_kind(param, pos)?;
                        args.push(state.pop_kind(&self.graph, pos, kind)?);
                    }
                    if !method.is_static {
                        args.push(state.pop_kind(&self.graph, pos, ValueKind::Object)?);
                    }
                    args.reverse();
                    let call = self.value(
                        NodeKind::Invoke(method.clone()),
                        Stamp::for_type(&method.returns),
                        &args,
                        pos,
                    );
                    self.graph.link(control, call);
                    control = call;
                    if !method.returns.is_void() {
                        state.stack.push(call);
                    }
                }
                Insn::Add => {
                    let y = state.pop_kind(&self.graph, pos, ValueKind::Int)?;
                    let x = state.pop_kind(&self.graph, pos, ValueKind::Int)?;
                    let sum = self.value(NodeKind::Add, Stamp::Int, &[x, y], pos);
                    state.stack.push(sum);
                }
                Insn::Pop => {
                    state.pop(pos)?;
                }
                Insn::Dup => {
                    let top = state.pop(pos)?;
                    state.stack.push(top);
                    state.stack.push(top);
                }
                Insn::IfRefEq { target } | Insn::IfRefNe { target } => {
                    let y = state.pop_kind(&self.graph, pos, ValueKind::Object)?;
                    let x = state.pop_kind(&self.graph, pos, ValueKind::Object)?;
                    let cond = self.value(NodeKind::ObjectEquals, Stamp::Int, &[x, y], pos);
                    let jump_on_true = matches!(insn, Insn::IfRefEq { .. });
                    self.branch(std::mem::take(&mut state), control, cond, *target, jump_on_true, pos)?;
                }
                Insn::IfNull { target } | Insn::IfNonNull { target } => {
                    let x = state.pop_kind(&self.graph, pos, ValueKind::Object)?;
                    let cond = self.value(NodeKind::IsNull, Stamp::Int, &[x], pos);
                    let jump_on_true = matches!(insn, Insn::IfNull { .. });
                    self.branch(std::mem::take(&mut state), control, cond, *target, jump_on_true, pos)?;
                }
                Insn::IfInt { cond, target } => {
                    let y = state.pop_kind(&self.graph, pos, ValueKind::Int)?;
                    let x = state.pop_kind(&self.graph, pos, ValueKind::Int)?;
                    let cmp = self.value(NodeKind::IntCompare(*cond), Stamp::Int, &[x, y], pos);
                    self.branch(std::mem::take(&mut state), control, cmp, *target, true, pos)?;
                }
                Insn::Goto { target } => {
                    self.edge_to(*target, control, std::mem::take(&mut state), pos)?;
                }
                Insn::Return => {
                    if !signature.returns.is_void() {
                        return Err(BuildError::malformed(pos, MalformedReason::ReturnMismatch));
                    }
                    check_monitors_released(&state, pos)?;
                    let ret = self.graph.add(NodeKind::Return, Stamp::Void, Some(pos));
                    self.graph.link(control, ret);
                }
                Insn::ReturnValue => {
                    let expected = match &signature.returns {
                        TypeRef::Void => {
                            return Err(BuildError::malformed(pos, MalformedReason::ReturnMismatch))
                        }
                        ty => slot_kind(ty, pos)?,
                    };
                    let value = state.pop(pos)?;
                    if self.graph.stamp(value).kind() != expected {
                        return Err(BuildError::malformed(pos, MalformedReason::ReturnMismatch));
                    }
                    check_monitors_released(&state, pos)?;
                    let ret = self.value(NodeKind::Return, Stamp::Void, &[value], pos);
                    self.graph.link(control, ret);
                }
                Insn::Throw => {
                    let exception = state.pop_kind(&self.graph, pos, ValueKind::Object)?;
                    let unwind = self.value(NodeKind::Unwind, Stamp::Void, &[exception], pos);
                    self.graph.link(control, unwind);
                }
                Insn::MonitorEnter => {
                    let object = state.pop_kind(&self.graph, pos, ValueKind::Object)?;
                    let enter = self.value(NodeKind::MonitorEnter, Stamp::Void, &[object], pos);
                    self.graph.link(control, enter);
                    control = enter;
                    state.monitors += 1;
                }
                Insn::MonitorExit => {
                    let object = state.pop_kind(&self.graph, pos, ValueKind::Object)?;
                    if state.monitors == 0 {
                        return Err(BuildError::Bailout {
                            position: pos,
                            reason: "monitor exit without matching enter".to_string(),
                        });
                    }
                    let exit = self.value(NodeKind::MonitorExit, Stamp::Void, &[object], pos);
                    self.graph.link(control, exit);
                    control = exit;
                    state.monitors -= 1;
                }
                Insn::Unsupported { mnemonic } => {
                    return Err(BuildError::Bailout {
                        position: pos,
                        reason: format!("unsupported operation {}", mnemonic),
                    });
                }
            }
        }

        let last = &body[end - 1];
        if last.branch_target().is_none() && !last.ends_flow() {
            if end >= body.len() {
                return Err(BuildError::malformed(end - 1, MalformedReason::FallsOffEnd));
            }
            self.edge_to(end, control, state, end - 1)?;
        }
        Ok(())
    }

    /// Set up the state at the top of block `b` from its known incoming edges.
    fn enter_block(&mut self, b: usize) -> Result<(FrameState, NodeId), BuildError> {
        let mut incoming = std::mem::take(&mut self.pending[b]);
        if self.incoming_count[b] == 1 {
            if let Some(edge) = incoming.pop() {
                return Ok((edge.state, edge.control));
            }
        }

        let pos = self.blocks[b].start;
        let merge = self.graph.add(NodeKind::Merge, Stamp::Void, Some(pos));
        for edge in &incoming {
            let end = self.graph.add(NodeKind::End, Stamp::Void, Some(edge.position));
            self.graph.link(edge.control, end);
            self.graph.link(end, merge);
        }

        let complete = incoming.len() == self.incoming_count[b];
        let depth = incoming.first().map_or(0, |e| e.state.stack.len());
        let monitors = incoming.first().map_or(0, |e| e.state.monitors);
        for edge in &incoming {
            if edge.state.stack.len() != depth {
                return Err(BuildError::malformed(pos, MalformedReason::StackDepthMismatch));
            }
            if edge.state.monitors != monitors {
                return Err(BuildError::Bailout {
                    position: pos,
                    reason: "unbalanced monitors at join point".to_string(),
                });
            }
        }

        let mut stack = Vec::with_capacity(depth);
        for slot in 0..depth {
            let values: Vec<NodeId> = incoming.iter().map(|e| e.state.stack[slot]).collect();
            if !self.same_kind(&values) {
                return Err(BuildError::malformed(pos, MalformedReason::KindMismatch));
            }
            stack.push(self.merged_value(merge, &values, complete, pos));
        }

        // A local that is unset or of mixed kinds on some path is dead here.
        let mut locals = Vec::with_capacity(self.local_count);
        for slot in 0..self.local_count {
            let values: Option<Vec<NodeId>> = incoming.iter().map(|e| e.state.locals[slot]).collect();
            let merged = match values {
                Some(values) if !values.is_empty() && self.same_kind(&values) => {
                    Some(self.merged_value(merge, &values, complete, pos))
                }
                _ => None,
            };
            locals.push(merged);
        }

        if !complete {
            self.loop_headers.insert(
                b,
                LoopHeader {
                    merge,
                    stack: stack.clone(),
                    locals: locals.clone(),
                    monitors,
                },
            );
        }
        Ok((
            FrameState {
                stack,
                locals,
                monitors,
            },
            merge,
        ))
    }

    fn merged_value(&mut self, merge: NodeId, values: &[NodeId], complete: bool, pos: usize) -> NodeId {
        let first = values[0];
        if complete && values.iter().all(|&v| v == first) {
            return first;
        }
        let provisional = self.graph.stamp(first).widened();
        let phi = self.graph.add(NodeKind::Phi { merge }, provisional, Some(pos));
        for &value in values {
            self.graph.push_input(phi, value);
        }
        self.phis.push(phi);
        phi
    }

    fn same_kind(&self, values: &[NodeId]) -> bool {
        let mut kinds = values.iter().map(|&v| self.graph.stamp(v).kind());
        match kinds.next() {
            Some(first) => kinds.all(|k| k == first),
            None => true,
        }
    }

    fn branch(
        &mut self,
        state: FrameState,
        control: NodeId,
        condition: NodeId,
        target: usize,
        jump_on_true: bool,
        pos: usize,
    ) -> Result<(), BuildError> {
        let fallthrough = pos + 1;
        if fallthrough >= self.unit.body.len() {
            return Err(BuildError::malformed(pos, MalformedReason::FallsOffEnd));
        }
        let node = self.value(NodeKind::If, Stamp::Void, &[condition], pos);
        self.graph.link(control, node);
        let on_true = self.graph.add(NodeKind::Begin, Stamp::Void, Some(pos));
        self.graph.link(node, on_true);
        let on_false = self.graph.add(NodeKind::Begin, Stamp::Void, Some(pos));
        self.graph.link(node, on_false);

        let (true_dest, false_dest) = if jump_on_true {
            (target, fallthrough)
        } else {
            (fallthrough, target)
        };
        self.edge_to(true_dest, on_true, state.clone(), pos)?;
        self.edge_to(false_dest, on_false, state, pos)
    }

    fn edge_to(
        &mut self,
        dest: usize,
        control: NodeId,
        state: FrameState,
        pos: usize,
    ) -> Result<(), BuildError> {
        let b = self.block_of[dest];
        if self.translated[b] {
            return self.connect_back_edge(b, control, state, pos);
        }
        self.pending[b].push(Incoming {
            control,
            position: pos,
            state,
        });
        Ok(())
    }

    fn connect_back_edge(
        &mut self,
        b: usize,
        control: NodeId,
        state: FrameState,
        pos: usize,
    ) -> Result<(), BuildError> {
        // Only blocks with more than one incoming edge can be re-entered.
        let Some(header) = self.loop_headers.get(&b).cloned() else {
            return Err(BuildError::malformed(pos, MalformedReason::InvalidTarget));
        };
        if state.stack.len() != header.stack.len() {
            return Err(BuildError::malformed(pos, MalformedReason::StackDepthMismatch));
        }
        if state.monitors != header.monitors {
            return Err(BuildError::Bailout {
                position: pos,
                reason: "unbalanced monitors at loop back edge".to_string(),
            });
        }

        let end = self.graph.add(NodeKind::End, Stamp::Void, Some(pos));
        self.graph.link(control, end);
        self.graph.link(end, header.merge);

        for (&phi, &value) in header.stack.iter().zip(&state.stack) {
            if self.graph.stamp(value).kind() != self.graph.stamp(phi).kind() {
                return Err(BuildError::malformed(pos, MalformedReason::KindMismatch));
            }
            self.graph.push_input(phi, value);
        }
        for (phi, value) in header.locals.iter().zip(&state.locals) {
            let Some(phi) = *phi else { continue };
            match *value {
                Some(value) => {
                    if self.graph.stamp(value).kind() != self.graph.stamp(phi).kind() {
                        self.conflicting.insert(phi);
                    }
                    self.graph.push_input(phi, value);
                }
                None => {
                    // The slot keeps its value on this path only in name.
                    self.conflicting.insert(phi);
                    self.graph.push_input(phi, phi);
                }
            }
        }
        Ok(())
    }

    fn value(&mut self, kind: NodeKind, stamp: Stamp, inputs: &[NodeId], pos: usize) -> NodeId {
        let id = self.graph.add(kind, stamp, Some(pos));
        for &input in inputs {
            self.graph.push_input(id, input);
        }
        id
    }

    fn resolve(&self, ty: &str, pos: usize) -> Result<(), BuildError> {
        if self.options.eager_resolution && !self.hierarchy.contains(ty) {
            return Err(BuildError::Linkage {
                type_name: ty.to_string(),
                position: pos,
            });
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Graph, BuildError> {
        self.graph.compute_usages();

        let live = self.live_phis();
        for &phi in &self.conflicting {
            if live.contains(&phi) {
                return Err(BuildError::Malformed {
                    position: self.graph.node(phi).position,
                    reason: MalformedReason::InconsistentLocal,
                });
            }
            self.graph.set_stamp(phi, Stamp::Illegal);
        }

        self.solve_phi_stamps();
        Ok(self.graph)
    }

    fn is_phi(&self, id: NodeId) -> bool {
        matches!(self.graph.node(id).kind, NodeKind::Phi { .. })
    }

    /// Phis whose value reaches a non-phi consumer.
    fn live_phis(&self) -> HashSet<NodeId> {
        let mut live = HashSet::new();
        let mut work: Vec<NodeId> = self
            .phis
            .iter()
            .copied()
            .filter(|&phi| self.graph.node(phi).usages.iter().any(|&u| !self.is_phi(u)))
            .collect();
        while let Some(phi) = work.pop() {
            if !live.insert(phi) {
                continue;
            }
            for &input in &self.graph.node(phi).inputs {
                if self.is_phi(input) && !live.contains(&input) {
                    work.push(input);
                }
            }
        }
        live
    }

    /// Solve phi stamps as the meet over their inputs, iterating in node
    /// order until nothing changes. Phis start out unknown so loop phis
    /// converge to the stamp of their entry values.
    fn solve_phi_stamps(&mut self) {
        let pending: Vec<NodeId> = self
            .phis
            .iter()
            .copied()
            .filter(|phi| !self.conflicting.contains(phi))
            .collect();
        let unsolved: HashSet<NodeId> = pending.iter().copied().collect();
        let mut solved: HashMap<NodeId, Stamp> = HashMap::new();

        let max_rounds = pending.len() * 4 + 16;
        let mut rounds = 0;
        let mut changed = true;
        while changed && rounds < max_rounds {
            changed = false;
            rounds += 1;
            for &phi in &pending {
                let mut acc = solved.get(&phi).cloned();
                for &input in &self.graph.node(phi).inputs {
                    if input == phi {
                        continue;
                    }
                    let stamp = if unsolved.contains(&input) {
                        match solved.get(&input) {
                            Some(stamp) => stamp.clone(),
                            None => continue,
                        }
                    } else {
                        self.graph.stamp(input).clone()
                    };
                    acc = Some(match acc {
                        Some(acc) => acc.meet(&stamp, self.hierarchy),
                        None => stamp,
                    });
                }
                if let Some(acc) = acc {
                    if solved.get(&phi) != Some(&acc) {
                        solved.insert(phi, acc);
                        changed = true;
                    }
                }
            }
        }
        if changed {
            trace!(unit = %self.graph.unit(), "phi stamps did not settle, widening");
        }

        for phi in pending {
            if let Some(stamp) = solved.remove(&phi) {
                let stamp = if changed { stamp.widened() } else { stamp };
                self.graph.set_stamp(phi, stamp);
            }
        }
    }
}

fn slot_kind(ty: &TypeRef, pos: usize) -> Result<ValueKind, BuildError> {
    match ty {
        TypeRef::Int => Ok(ValueKind::Int),
        TypeRef::Ref(_) => Ok(ValueKind::Object),
        TypeRef::Void => Err(BuildError::malformed(pos, MalformedReason::VoidParameter)),
    }
}

fn check_monitors_released(state: &FrameState, pos: usize) -> Result<(), BuildError> {
    if state.monitors != 0 {
        return Err(BuildError::Bailout {
            position: pos,
            reason: format!("return with {} monitor(s) held", state.monitors),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeKind;
    use invariant_scan_types::{IntCondition, MethodRef, Signature, UnitFlags};

    fn hierarchy() -> TypeHierarchy {
        TypeHierarchy::new()
            .with_type("Object", &[])
            .with_type("JavaType", &["Object"])
            .with_type("Value", &["Object"])
            .with_type("Constant", &["Value"])
            .with_type("Register", &["Value"])
    }

    fn unit(params: &[&str], returns: &str, is_static: bool, body: Vec<Insn>) -> UnitDescriptor {
        UnitDescriptor {
            holder: "Acme.Foo".to_string(),
            name: "bar".to_string(),
            signature: Signature::new(
                params.iter().map(|p| TypeRef::from(*p)).collect(),
                TypeRef::from(returns),
                is_static,
            ),
            body,
            flags: UnitFlags::default(),
        }
    }

    fn build(unit: &UnitDescriptor) -> Result<Graph, BuildError> {
        let h = hierarchy();
        GraphBuilder::new(&h, BuilderOptions::default()).build(unit)
    }

    fn malformed_reason(result: Result<Graph, BuildError>) -> MalformedReason {
        match result {
            Err(BuildError::Malformed { reason, .. }) => reason,
            other => panic!("expected malformed body, got {:?}", other),
        }
    }

    fn identity_compare() -> UnitDescriptor {
        unit(
            &["JavaType", "JavaType"],
            "int",
            true,
            vec![
                Insn::Load { local: 0 },
                Insn::Load { local: 1 },
                Insn::IfRefEq { target: 5 },
                Insn::ConstInt { value: 0 },
                Insn::ReturnValue,
                Insn::ConstInt { value: 1 },
                Insn::ReturnValue,
            ],
        )
    }

    #[test]
    fn test_build_is_deterministic() {
        let u = identity_compare();
        let first = build(&u).unwrap();
        let second = build(&u).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.edges(), second.edges());
    }

    #[test]
    fn test_identity_comparison_shape() {
        let g = build(&identity_compare()).unwrap();
        let (cmp, node) = g
            .nodes_where(|k| matches!(k, NodeKind::ObjectEquals))
            .next()
            .expect("comparison node");
        assert_eq!(node.inputs.len(), 2);
        for &input in &node.inputs {
            assert!(matches!(g.node(input).kind, NodeKind::Parameter { .. }));
            assert!(g.stamp(input).is_assignable_to("JavaType", &hierarchy()));
        }

        let edges = g.edges();
        assert!(edges
            .iter()
            .any(|e| e.from == node.inputs[0] && e.to == cmp && e.kind == EdgeKind::Data { index: 0 }));
        let returns = g.nodes_where(|k| matches!(k, NodeKind::Return)).count();
        assert_eq!(returns, 2);
        let (_, branch) = g.nodes_where(|k| matches!(k, NodeKind::If)).next().unwrap();
        assert_eq!(branch.successors.len(), 2);
        assert!(edges.iter().any(|e| e.kind == EdgeKind::Control && e.from == g.start()));
    }

    #[test]
    fn test_instance_receiver_is_non_null_holder() {
        let u = unit(&[], "void", false, vec![Insn::Return]);
        let g = build(&u).unwrap();
        let (_, this) = g
            .nodes_where(|k| matches!(k, NodeKind::Parameter { index: 0 }))
            .next()
            .unwrap();
        assert_eq!(this.stamp, Stamp::Object(ObjectStamp::non_null("Acme.Foo")));
    }

    #[test]
    fn test_merge_phi_gets_common_supertype() {
        let u = unit(
            &["Constant", "Register", "int"],
            "Value",
            true,
            vec![
                Insn::Load { local: 2 },
                Insn::ConstInt { value: 0 },
                Insn::IfInt {
                    cond: IntCondition::Eq,
                    target: 5,
                },
                Insn::Load { local: 0 },
                Insn::Goto { target: 6 },
                Insn::Load { local: 1 },
                Insn::ReturnValue,
            ],
        );
        let g = build(&u).unwrap();
        let (merge, merge_node) = g.nodes_where(|k| matches!(k, NodeKind::Merge)).next().unwrap();
        assert_eq!(merge_node.predecessors.len(), 2);
        for &end in &merge_node.predecessors {
            assert_eq!(g.node(end).kind, NodeKind::End);
        }
        let (_, phi) = g
            .nodes_where(move |k| *k == NodeKind::Phi { merge })
            .next()
            .expect("phi at merge");
        assert_eq!(phi.inputs.len(), 2);
        assert_eq!(phi.stamp, Stamp::Object(ObjectStamp::declared("Value")));
    }

    #[test]
    fn test_loop_phis_are_resolved() {
        let u = unit(
            &["JavaType"],
            "void",
            false,
            vec![
                Insn::Load { local: 1 },
                Insn::Store { local: 2 },
                Insn::Load { local: 2 },
                Insn::IfNull { target: 7 },
                Insn::Load { local: 1 },
                Insn::Store { local: 2 },
                Insn::Goto { target: 2 },
                Insn::Return,
            ],
        );
        let g = build(&u).unwrap();
        let (_, merge) = g.nodes_where(|k| matches!(k, NodeKind::Merge)).next().unwrap();
        assert_eq!(merge.predecessors.len(), 2);

        let phis: Vec<_> = g.nodes_where(|k| matches!(k, NodeKind::Phi { .. })).collect();
        assert!(!phis.is_empty());
        for (_, phi) in &phis {
            assert_eq!(phi.inputs.len(), 2);
            assert_ne!(phi.stamp, Stamp::Object(ObjectStamp::unrestricted()));
        }
        assert!(phis
            .iter()
            .any(|(_, phi)| phi.stamp == Stamp::Object(ObjectStamp::declared("JavaType"))));
        assert!(phis
            .iter()
            .any(|(_, phi)| phi.stamp == Stamp::Object(ObjectStamp::non_null("Acme.Foo"))));
    }

    #[test]
    fn test_invoke_is_chained_and_pushes_result() {
        let equals = MethodRef {
            owner: "JavaType".to_string(),
            name: "equals".to_string(),
            params: vec![TypeRef::object("Object")],
            returns: TypeRef::Int,
            is_static: false,
        };
        let u = unit(
            &["JavaType", "JavaType"],
            "int",
            true,
            vec![
                Insn::Load { local: 0 },
                Insn::Load { local: 1 },
                Insn::Invoke { method: equals },
                Insn::ReturnValue,
            ],
        );
        let g = build(&u).unwrap();
        let (call, node) = g.nodes_where(|k| matches!(k, NodeKind::Invoke(_))).next().unwrap();
        assert_eq!(node.inputs.len(), 2);
        assert_eq!(node.stamp, Stamp::Int);
        assert_eq!(node.predecessors.as_slice(), &[g.start()]);
        let (_, ret) = g.nodes_where(|k| matches!(k, NodeKind::Return)).next().unwrap();
        assert_eq!(ret.inputs.as_slice(), &[call]);
        assert!(g.nodes_where(|k| matches!(k, NodeKind::ObjectEquals | NodeKind::IsNull | NodeKind::IntCompare(_))).next().is_none());
    }

    #[test]
    fn test_malformed_bodies() {
        assert_eq!(
            malformed_reason(build(&unit(&[], "void", true, vec![]))),
            MalformedReason::EmptyBody
        );
        assert_eq!(
            malformed_reason(build(&unit(&[], "void", true, vec![Insn::Goto { target: 9 }]))),
            MalformedReason::InvalidTarget
        );
        assert_eq!(
            malformed_reason(build(&unit(&[], "void", true, vec![Insn::Pop, Insn::Return]))),
            MalformedReason::StackUnderflow
        );
        assert_eq!(
            malformed_reason(build(&unit(&["int"], "void", true, vec![Insn::Load { local: 0 }]))),
            MalformedReason::FallsOffEnd
        );
        assert_eq!(
            malformed_reason(build(&unit(
                &[],
                "void",
                true,
                vec![Insn::Load { local: 0 }, Insn::Return]
            ))),
            MalformedReason::UninitializedLocal
        );
        assert_eq!(
            malformed_reason(build(&unit(
                &["int"],
                "void",
                true,
                vec![Insn::Load { local: 0 }, Insn::IfNull { target: 2 }, Insn::Return]
            ))),
            MalformedReason::KindMismatch
        );
        assert_eq!(
            malformed_reason(build(&unit(&["int"], "int", true, vec![Insn::Return]))),
            MalformedReason::ReturnMismatch
        );
    }

    #[test]
    fn test_stack_depth_mismatch_at_merge() {
        let u = unit(
            &["int"],
            "void",
            true,
            vec![
                Insn::Load { local: 0 },
                Insn::Load { local: 0 },
                Insn::IfInt {
                    cond: IntCondition::Eq,
                    target: 4,
                },
                Insn::Load { local: 0 },
                Insn::Return,
            ],
        );
        assert_eq!(malformed_reason(build(&u)), MalformedReason::StackDepthMismatch);
    }

    #[test]
    fn test_mixed_kind_local_is_dead_after_merge() {
        let body = |read_after_merge: bool| {
            let mut body = vec![
                Insn::Load { local: 0 },
                Insn::Load { local: 0 },
                Insn::IfInt {
                    cond: IntCondition::Eq,
                    target: 6,
                },
                Insn::ConstInt { value: 1 },
                Insn::Store { local: 2 },
                Insn::Goto { target: 8 },
                Insn::Load { local: 1 },
                Insn::Store { local: 2 },
            ];
            if read_after_merge {
                body.push(Insn::Load { local: 2 });
                body.push(Insn::Pop);
            }
            body.push(Insn::Return);
            unit(&["int", "JavaType"], "void", true, body)
        };
        assert!(build(&body(false)).is_ok());
        assert_eq!(
            malformed_reason(build(&body(true))),
            MalformedReason::UninitializedLocal
        );
    }

    #[test]
    fn test_bailouts() {
        let exit_without_enter = unit(
            &["JavaType"],
            "void",
            true,
            vec![Insn::Load { local: 0 }, Insn::MonitorExit, Insn::Return],
        );
        let err = build(&exit_without_enter).unwrap_err();
        assert!(matches!(err, BuildError::Bailout { position: 1, .. }));
        assert!(err.is_suppressed());

        let held_on_return = unit(
            &["JavaType"],
            "void",
            true,
            vec![Insn::Load { local: 0 }, Insn::MonitorEnter, Insn::Return],
        );
        assert!(matches!(
            build(&held_on_return),
            Err(BuildError::Bailout { position: 2, .. })
        ));

        let unsupported = unit(
            &[],
            "void",
            true,
            vec![Insn::Unsupported {
                mnemonic: "jsr".to_string(),
            }],
        );
        assert!(matches!(build(&unsupported), Err(BuildError::Bailout { .. })));
    }

    #[test]
    fn test_eager_resolution_reports_linkage() {
        let u = unit(
            &[],
            "void",
            true,
            vec![
                Insn::New {
                    ty: "Missing".to_string(),
                },
                Insn::Pop,
                Insn::Return,
            ],
        );
        let h = hierarchy();
        let eager = GraphBuilder::new(
            &h,
            BuilderOptions {
                eager_resolution: true,
            },
        );
        assert_eq!(
            eager.build(&u),
            Err(BuildError::Linkage {
                type_name: "Missing".to_string(),
                position: 0
            })
        );
        assert!(build(&u).is_ok());
    }

    #[test]
    fn test_usages_are_reverse_of_inputs() {
        let g = build(&identity_compare()).unwrap();
        for (id, node) in g.nodes() {
            for &input in &node.inputs {
                assert!(g.node(input).usages.contains(&id));
            }
        }
    }
}
