use petgraph::{
    algo::dominators::Dominators,
    prelude::NodeIndex,
};

use super::{
    BasicBlockRef,
    Cfg,
};

pub struct DomTree<'a> {
    dominators: Dominators<NodeIndex>,
    cfg: &'a Cfg,
}

impl<'a> DomTree<'a> {
    pub fn compute(cfg: &'a Cfg) -> Self {
        let entry = cfg.basic_blocks[cfg.entry_block_ref()].node_index;
        Self {
            dominators: petgraph::algo::dominators::simple_fast(&cfg.graph, entry),
            cfg,
        }
    }

    pub fn idom(&self, basic_block: BasicBlockRef) -> Option<BasicBlockRef> {
        self.dominators
            .immediate_dominator(self.cfg.basic_blocks[basic_block].node_index)
            .map(|node_idx| self.cfg.graph[node_idx].bb_ref)
    }

    /// Returns true if `basic_block` can be reached from the entry block.
    pub fn is_reachable(&self, basic_block: BasicBlockRef) -> bool {
        self.dominators
            .dominators(self.cfg.basic_blocks[basic_block].node_index)
            .is_some()
    }

    /// Returns true if `a` dominates `b`.
    ///
    /// A basic block `a` dominates `b` if every path from the entry block to `b` must go through `a`.
    ///
    /// **Note** that false is returned if `b` is not reachable from the entry block.
    pub fn dominates(&self, a: BasicBlockRef, b: BasicBlockRef) -> bool {
        let a = self.cfg.basic_blocks[a].node_index;
        let Some(mut dominators) = self
            .dominators
            .dominators(self.cfg.basic_blocks[b].node_index)
        else {
            return false;
        };
        dominators.any(|node_idx| node_idx == a)
    }
}
