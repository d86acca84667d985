#![doc = include_str!("cfg.md")]

use std::fmt::{
    Display,
    Formatter,
};

pub use builder::Builder;
pub use def_use::{
    Use,
    User,
};
pub use domtree::DomTree;
use fxindexmap::FxIndexSet;
use petgraph::prelude::{
    Directed,
    Incoming,
    NodeIndex,
    StableGraph,
};
use rustc_hash::{
    FxHashMap,
    FxHashSet,
};
use slotmap::{
    new_key_type,
    SlotMap,
};
use smallvec::SmallVec;

use crate::{
    instruction::{
        Instr,
        Op,
    },
    InstrKind,
    Type,
    Value,
};

mod builder;
mod def_use;
mod domtree;

new_key_type! { pub struct BasicBlockRef; }
#[derive(Debug, Clone, Eq, PartialEq)]
struct CFGNode {
    bb_ref: BasicBlockRef,
}
type Graph = StableGraph<CFGNode, (), Directed>;

#[derive(Debug, Default, Clone)]
pub struct Cfg {
    graph: Graph,
    pub(crate) basic_blocks: SlotMap<BasicBlockRef, BasicBlock>,
    pub(crate) instructions: SlotMap<InstrRef, Instr>,
    pub(crate) basic_block_args: SlotMap<BBArgRef, BBArg>,
    /// Def-use edges of every value that is referenced at least once.
    uses: FxHashMap<Value, FxIndexSet<Use>>,
    entry_block: Option<BasicBlockRef>,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_basic_block(&mut self, symbol: String) -> BasicBlockRef {
        let bb = {
            self.basic_blocks.insert_with_key(|id| {
                let node_idx = self.graph.add_node(CFGNode { bb_ref: id });
                BasicBlock::new(id, node_idx, symbol)
            })
        };
        if self.entry_block.is_none() {
            self.entry_block = Some(bb);
        }
        bb
    }

    /// Returns the ids of all basic blocks in the order they were created.
    pub fn basic_block_ids(&self) -> impl Iterator<Item = BasicBlockRef> + '_ {
        self.basic_blocks.keys()
    }

    pub fn basic_blocks(&self) -> impl Iterator<Item = (BasicBlockRef, &BasicBlock)> + '_ {
        self.basic_blocks.iter()
    }

    pub fn basic_block(&self, bb_ref: BasicBlockRef) -> &BasicBlock {
        &self.basic_blocks[bb_ref]
    }

    pub fn instr(&self, instr_ref: InstrRef) -> &Instr {
        &self.instructions[instr_ref]
    }

    pub fn bb_arg(&self, arg_ref: BBArgRef) -> &BBArg {
        &self.basic_block_args[arg_ref]
    }

    pub fn entry_block_ref(&self) -> BasicBlockRef {
        self.entry_block.expect("Entry block has not been created")
    }

    /// Appends a new instruction to the end of `defined_in`.
    pub fn add_instruction(
        &mut self,
        defined_in: BasicBlockRef,
        ty: Type,
        instr: InstrKind,
        symbol: String,
    ) -> InstrRef {
        let instr_ref = self.create_instruction(defined_in, ty, instr, symbol);
        self.basic_blocks[defined_in].instructions.insert(instr_ref);
        instr_ref
    }

    /// Inserts a new instruction directly in front of `before`, in the same basic block.
    pub fn insert_instruction_before(
        &mut self,
        before: InstrRef,
        ty: Type,
        instr: InstrKind,
        symbol: String,
    ) -> InstrRef {
        let defined_in = self.instructions[before].defined_in;
        let index = self.basic_blocks[defined_in]
            .instructions
            .get_index_of(&before)
            .expect("Instruction is not part of the basic block it claims to be defined in");
        let instr_ref = self.create_instruction(defined_in, ty, instr, symbol);
        self.basic_blocks[defined_in]
            .instructions
            .shift_insert(index, instr_ref);
        instr_ref
    }

    fn create_instruction(
        &mut self,
        defined_in: BasicBlockRef,
        ty: Type,
        instr: InstrKind,
        symbol: String,
    ) -> InstrRef {
        let instr_ref = self
            .instructions
            .insert_with_key(|id| Instr::new(ty, instr, defined_in, id, symbol));
        self.register_uses(User::Instr(instr_ref));
        instr_ref
    }

    pub fn set_terminator(&mut self, id: BasicBlockRef, terminator: TerminatorKind) {
        if self.basic_blocks[id].has_terminator() {
            self.unregister_uses(User::Term(id));
        }
        self.set_edges_from_terminator(id, &terminator);
        let terminator = Terminator::new(terminator, id);
        self.basic_blocks[id].terminator = Some(terminator);
        self.register_uses(User::Term(id));
    }

    fn set_edges_from_terminator(&mut self, id: BasicBlockRef, terminator: &TerminatorKind) {
        let node = self.basic_blocks[id].node_index;
        self.graph.retain_edges(|graph, edge| {
            graph
                .edge_endpoints(edge)
                .map_or(true, |(source, _)| source != node)
        });
        match &terminator {
            TerminatorKind::Branch(BranchTerm { target }) => {
                self.add_edge(id, target.id);
            }
            TerminatorKind::CondBranch(CondBranchTerm {
                true_target,
                false_target,
                ..
            }) => {
                self.add_edge(id, true_target.id);
                self.add_edge(id, false_target.id);
            }
            TerminatorKind::Ret(_) => {
                // ignore
            }
        }
    }

    fn add_edge(&mut self, source: BasicBlockRef, target: BasicBlockRef) {
        self.graph.add_edge(
            self.basic_blocks[source].node_index,
            self.basic_blocks[target].node_index,
            (),
        );
    }

    pub fn predecessors(&self, bb_ref: BasicBlockRef) -> impl Iterator<Item = BasicBlockRef> + '_ {
        self.graph
            .neighbors_directed(self.basic_blocks[bb_ref].node_index, Incoming)
            .map(|n| self.graph[n].bb_ref)
    }

    pub fn successors(&self, bb_ref: BasicBlockRef) -> impl Iterator<Item = BasicBlockRef> + '_ {
        self.graph
            .neighbors(self.basic_blocks[bb_ref].node_index)
            .map(|n| self.graph[n].bb_ref)
    }

    pub fn dom_tree(&self) -> DomTree {
        DomTree::compute(self)
    }

    pub fn add_bb_argument(&mut self, bb_id: BasicBlockRef, ty: Type, symbol: String) -> BBArgRef {
        let arg_ref = self.basic_block_args.insert_with_key(|id| BBArg {
            id,
            defined_in: bb_id,
            ty,
            symbol,
        });
        self.basic_blocks[bb_id].arguments.insert(arg_ref);
        arg_ref
    }

    /// Returns every value defined in this cfg: instruction results first, then block arguments.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.instructions
            .iter()
            .filter(|(_, instr)| instr.produces_value())
            .map(|(instr_id, _)| Value::Instr(instr_id))
            .chain(self.basic_block_args.keys().map(Value::BBArg))
    }

    /// Returns a symbol that no instruction or basic block argument uses yet.
    ///
    /// `base` itself is returned if it is free, otherwise the first free `{base}{n}` with `n >= 1`.
    pub fn fresh_symbol(&self, base: &str) -> String {
        let taken = self
            .instructions
            .values()
            .map(|instr| instr.symbol.as_str())
            .chain(self.basic_block_args.values().map(|arg| arg.symbol.as_str()))
            .collect::<FxHashSet<_>>();
        if !taken.contains(base) {
            return base.to_string();
        }
        let mut suffix = 1usize;
        loop {
            let candidate = format!("{base}{suffix}");
            if !taken.contains(candidate.as_str()) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

impl Display for Cfg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let indent = "    ";
        for (_, bb) in &self.basic_blocks {
            write!(f, "{}", bb)?;
            if !bb.arguments.is_empty() {
                write!(f, "(")?;
                for (index, arg_ref) in bb.arguments.iter().copied().enumerate() {
                    let arg = &self.basic_block_args[arg_ref];
                    write!(f, "{} {arg}", arg.ty)?;
                    if index < bb.arguments.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                write!(f, ")")?;
            }
            writeln!(f, ":")?;
            for instr in bb.instructions() {
                let instr = &self.instructions[instr];
                writeln!(f, "{}{};", indent, instr.display(self))?;
            }
            if let Some(terminator) = &bb.terminator {
                writeln!(f, "{}{};", indent, terminator.display(self))?;
            }
        }
        Ok(())
    }
}


new_key_type! {
pub struct InstrRef; }

new_key_type! { pub struct BBArgRef; }

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BBArg {
    pub(crate) id: BBArgRef,
    pub(crate) defined_in: BasicBlockRef,
    pub(crate) ty: Type,
    pub symbol: String,
}

impl BBArg {
    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn defined_in(&self) -> BasicBlockRef {
        self.defined_in
    }
}

impl Display for BBArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.symbol)
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BasicBlockRef,
    pub(crate) arguments: FxIndexSet<BBArgRef>,
    pub(crate) instructions: FxIndexSet<InstrRef>,
    pub(crate) terminator: Option<Terminator>,
    node_index: NodeIndex,
    pub symbol: String,
}

impl BasicBlock {
    pub fn new(id: BasicBlockRef, graph_index: NodeIndex, symbol: String) -> Self {
        Self {
            id,
            arguments: FxIndexSet::default(),
            instructions: FxIndexSet::default(),
            symbol,
            node_index: graph_index,
            terminator: None,
        }
    }

    /// Returns the [`Terminator`] of the [`BasicBlock`].
    ///
    /// Panics if the terminators is not set.
    pub fn terminator(&self) -> &Terminator {
        self.terminator
            .as_ref()
            .expect("Basic blocks must have a terminator")
    }

    /// Returns whether the [`Terminator`] is set.
    pub fn has_terminator(&self) -> bool {
        self.terminator.is_some()
    }

    pub fn arguments(&self) -> impl Iterator<Item = BBArgRef> + '_ {
        self.arguments.iter().copied()
    }

    /// Returns an iterator over the [`BasicBlock`]'s [`Instructions`][`InstrRef`] in program order.
    pub fn instructions(&self) -> impl DoubleEndedIterator<Item = InstrRef> + '_ {
        self.instructions.iter().copied()
    }

    /// Returns the instruction at `index` in program order.
    pub fn instruction_at(&self, index: usize) -> Option<InstrRef> {
        self.instructions.get_index(index).copied()
    }

    /// Returns the position of `instr` in program order.
    pub fn position_of(&self, instr: InstrRef) -> Option<usize> {
        self.instructions.get_index_of(&instr)
    }
}

impl Display for BasicBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}


#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Terminator {
    pub bb: BasicBlockRef,
    pub kind: TerminatorKind,
}

impl Terminator {
    pub const fn new(kind: TerminatorKind, bb: BasicBlockRef) -> Self {
        Self { kind, bb }
    }

    /// Returns the operands of this terminator, in slot order.
    pub fn used(&self) -> SmallVec<[&Op; 2]> {
        match &self.kind {
            TerminatorKind::Ret(ret_term) => ret_term.value.as_ref().into_iter().collect(),
            TerminatorKind::Branch(branch_term) => branch_term.target.arguments.iter().collect(),
            TerminatorKind::CondBranch(condbr_term) => [&condbr_term.cond]
                .into_iter()
                .chain(
                    condbr_term
                        .true_target
                        .arguments
                        .iter()
                        .chain(condbr_term.false_target.arguments.iter()),
                )
                .collect(),
        }
    }

    pub fn used_mut(&mut self) -> SmallVec<[&mut Op; 2]> {
        match &mut self.kind {
            TerminatorKind::Ret(ret_term) => ret_term.value.as_mut().into_iter().collect(),
            TerminatorKind::Branch(branch_term) => {
                branch_term.target.arguments.iter_mut().collect()
            }
            TerminatorKind::CondBranch(condbr_term) => [&mut condbr_term.cond]
                .into_iter()
                .chain(
                    condbr_term
                        .true_target
                        .arguments
                        .iter_mut()
                        .chain(condbr_term.false_target.arguments.iter_mut()),
                )
                .collect(),
        }
    }

    pub fn display<'cfg>(&self, cfg: &'cfg Cfg) -> TerminatorDisplay<'cfg, '_> {
        TerminatorDisplay {
            cfg,
            terminator: self,
        }
    }
}

pub struct TerminatorDisplay<'cfg, 'term> {
    cfg: &'cfg Cfg,
    terminator: &'term Terminator,
}

impl Display for TerminatorDisplay<'_, '_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.terminator.kind {
            TerminatorKind::Ret(term) => {
                write!(f, "ret")?;
                if let Some(value) = &term.value {
                    write!(f, " {}", value.display(self.cfg))?;
                }
            }
            TerminatorKind::Branch(branch) => {
                write!(f, "br {}", branch.target.display(self.cfg))?;
            }
            TerminatorKind::CondBranch(branch) => {
                write!(
                    f,
                    "condbr {}, {}, {}",
                    branch.cond.display(self.cfg),
                    branch.true_target.display(self.cfg),
                    branch.false_target.display(self.cfg)
                )?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TerminatorKind {
    Ret(RetTerm),
    Branch(BranchTerm),
    CondBranch(CondBranchTerm),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RetTerm {
    pub value: Option<Op>,
}

impl RetTerm {
    pub const fn new(value: Op) -> Self {
        Self { value: Some(value) }
    }
    pub const fn empty() -> Self {
        Self { value: None }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct JumpTarget {
    pub id: BasicBlockRef,
    pub arguments: Vec<Op>,
}

impl JumpTarget {
    pub fn new(id: BasicBlockRef, arguments: Vec<Op>) -> Self {
        Self { id, arguments }
    }

    pub fn no_args(id: BasicBlockRef) -> Self {
        Self::new(id, vec![])
    }

    pub fn display<'cfg>(&self, cfg: &'cfg Cfg) -> JumpTargetDisplay<'cfg, '_> {
        JumpTargetDisplay { target: self, cfg }
    }
}

pub struct JumpTargetDisplay<'cfg, 'target> {
    target: &'target JumpTarget,
    cfg: &'cfg Cfg,
}

impl Display for JumpTargetDisplay<'_, '_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cfg.basic_blocks[self.target.id])?;
        if !self.target.arguments.is_empty() {
            write!(f, "(")?;
            for (index, arg) in self.target.arguments.iter().enumerate() {
                write!(f, "{}", arg.display(self.cfg))?;
                if index != self.target.arguments.len() - 1 {
                    write!(f, ", ")?;
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BranchTerm {
    pub target: JumpTarget,
}

impl BranchTerm {
    pub const fn new(target: JumpTarget) -> Self {
        Self { target }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CondBranchTerm {
    pub cond: Op,
    pub true_target: JumpTarget,
    pub false_target: JumpTarget,
}

impl CondBranchTerm {
    pub const fn new(cond: Op, true_target: JumpTarget, false_target: JumpTarget) -> Self {
        Self {
            cond,
            true_target,
            false_target,
        }
    }
}
