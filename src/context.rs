//! Compilation context and pass pipeline.
//!
//! `Context` owns the graph of one compilation unit and runs the fixed
//! middle-end order: build, phi pruning, reachability, dominators, then —
//! unless the unit exceeds the size guard — effects, GVN, DCE, and GCM.
//! Skipping the optimizing passes is the policy bypass for oversized
//! functions: the IR stays correct, just unoptimized.

use crate::ast::FunctionLiteral;
use crate::builder::HirBuilder;
use crate::dce::do_dce;
use crate::dominator_tree::{derive_dominators, find_reachable_blocks, reverse_postorder};
use crate::effects::find_effects;
use crate::gcm::do_gcm;
use crate::gvn::do_gvn;
use crate::ir::{Block, FuncRef, Graph};
use crate::prune_phis::do_prune_phis;
use crate::settings::Flags;
use crate::verifier::{verify_graph, VerifierResult};

/// Persistent state of one middle-end run.
pub struct Context {
    /// The unit being compiled.
    pub graph: Graph,
    /// Tuning flags.
    pub flags: Flags,
}

impl Context {
    /// Build the HIR for `script` and every nested function literal.
    pub fn build(script: &FunctionLiteral, flags: Flags) -> Self {
        let graph = HirBuilder::build(script);
        log::debug!("built {} instructions in {} blocks", graph.num_insts(), graph.num_blocks());
        let ctx = Self { graph, flags };
        ctx.log_pass("build");
        ctx
    }

    /// Run the optimization pipeline in its fixed order.
    pub fn optimize(&mut self) {
        self.run("prune-phis", do_prune_phis);
        self.run("reachability", find_reachable_blocks);
        self.run("dominators", derive_dominators);

        if self.graph.num_insts() > self.flags.max_optimizable_size() {
            log::debug!(
                "unit has {} instructions, over the {} limit; skipping gvn/dce/gcm",
                self.graph.num_insts(),
                self.flags.max_optimizable_size()
            );
            return;
        }

        self.run("effects", find_effects);
        // Value numbering and phi pruning feed each other: collapsing a
        // redundant instruction can leave a phi with one distinct input,
        // and collapsing that phi can expose congruent users. Iterate the
        // pair until the instruction set stops shrinking, so a second
        // pipeline run is a no-op.
        loop {
            let before = removed_count(&self.graph);
            self.run("gvn", do_gvn);
            self.run("prune-phis", do_prune_phis);
            if removed_count(&self.graph) == before {
                break;
            }
        }
        self.run("dce", do_dce);
        self.run("gcm", do_gcm);
    }

    fn run(&mut self, name: &str, pass: fn(&mut Graph)) {
        pass(&mut self.graph);
        self.log_pass(name);
    }

    fn log_pass(&self, name: &str) {
        if self.flags.log_passes() {
            log::debug!("after {}:\n{}", name, self.graph.display());
        }
    }

    /// Run the verifier over the whole unit.
    pub fn verify(&self) -> VerifierResult<()> {
        verify_graph(&self.graph)
    }

    /// Blocks of one function in reverse post-order: the order handed to
    /// the LIR stage.
    pub fn block_order(&self, func: FuncRef) -> Vec<Block> {
        let entry = self.graph.functions[func]
            .entry
            .expand()
            .expect("function was never built");
        reverse_postorder(&self.graph, entry)
    }
}

fn removed_count(graph: &Graph) -> usize {
    graph.insts().filter(|&inst| graph.is_removed(inst)).count()
}
