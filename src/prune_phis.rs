//! Phi pruning.
//!
//! On-demand phi insertion over-creates: loop headers open a phi for every
//! live slot, and many never receive a distinct second input. A worklist
//! collapses every phi whose inputs all reduce to one definition (or to the
//! phi itself), rewriting uses transitively; collapsing one phi can expose
//! another, so replaced users re-enter the queue. A phi left with no inputs
//! besides itself denotes an undefined merge and becomes nil.

use crate::ir::{Graph, Inst, Opcode, Payload};
use smallvec::SmallVec;

/// Prune degenerate phis across the whole unit.
pub fn do_prune_phis(graph: &mut Graph) {
    let mut queue: Vec<Inst> = Vec::new();
    for block in graph.blocks().collect::<Vec<_>>() {
        queue.extend(graph.block(block).phis.iter().copied());
    }

    while let Some(phi) = queue.pop() {
        if graph.is_removed(phi) {
            continue;
        }
        let mut distinct: SmallVec<[Inst; 2]> = SmallVec::new();
        for &input in graph.args(phi) {
            if input != phi && !distinct.contains(&input) {
                distinct.push(input);
            }
        }
        match distinct.len() {
            0 => {
                // Nothing flows in: the merge is undefined. Nilify.
                let block = graph.block_of(phi);
                let nil = graph.make_inst(Opcode::Nil, Payload::None, None);
                graph.inst_mut(nil).block = block.into();
                graph.block_mut(block).insts.insert(0, nil);
                let users = requeue_candidates(graph, phi);
                graph.replace_uses(phi, nil);
                graph.remove(phi);
                queue.extend(users);
                log::trace!("prune-phis: {phi} nilified as {nil}");
            }
            1 => {
                let replacement = distinct[0];
                let users = requeue_candidates(graph, phi);
                graph.replace_uses(phi, replacement);
                graph.remove(phi);
                queue.extend(users);
                log::trace!("prune-phis: {phi} collapsed into {replacement}");
            }
            _ => {}
        }
    }
}

/// Users of `phi` that are themselves phis; collapsing `phi` may make them
/// degenerate.
fn requeue_candidates(graph: &Graph, phi: Inst) -> SmallVec<[Inst; 4]> {
    graph
        .uses(phi)
        .iter()
        .copied()
        .filter(|&user| user != phi && graph.opcode(user) == Opcode::Phi)
        .collect()
}
