//! Dead-code elimination.
//!
//! Liveness seeds from every instruction with observable side effects
//! (returns and the other terminators included) and closes transitively
//! through argument edges. Anything else that is not pinned is dropped;
//! removal severs its argument edges, so chains and dead phi cycles
//! disappear in one sweep.

use crate::ir::{Graph, Inst};
use cranelift_entity::EntitySet;
use smallvec::SmallVec;

/// Remove every instruction whose result can never reach a side effect.
pub fn do_dce(graph: &mut Graph) {
    let insts: Vec<Inst> = graph.insts().collect();

    let mut live: EntitySet<Inst> = EntitySet::new();
    let mut worklist: Vec<Inst> = Vec::new();
    for &inst in &insts {
        if !graph.is_removed(inst) && graph.opcode(inst).has_side_effects() {
            live.insert(inst);
            worklist.push(inst);
        }
    }

    while let Some(inst) = worklist.pop() {
        let args: SmallVec<[Inst; 4]> = graph.args(inst).iter().copied().collect();
        for arg in args {
            if !live.contains(arg) {
                live.insert(arg);
                worklist.push(arg);
            }
        }
    }

    let mut dropped = 0usize;
    for &inst in &insts {
        if graph.is_removed(inst) || live.contains(inst) || graph.is_pinned(inst) {
            continue;
        }
        graph.remove(inst);
        dropped += 1;
    }
    if dropped > 0 {
        log::debug!("dce: dropped {dropped} dead instructions");
    }
}
