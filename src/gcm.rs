//! Global code motion.
//!
//! A two-pass rescheduler over unpinned instructions. Schedule-early finds
//! the shallowest legal home: the deepest block that still dominates every
//! argument definition and every in-effect emitter. Schedule-late walks
//! from the least common ancestor of the uses (phi uses count as the
//! matching predecessor block) up toward the early home and picks the block
//! with minimum loop depth, breaking ties toward the deeper block, so
//! loop-invariant code lifts out while everything else sinks next to its
//! uses. Pinned instructions and phis are placement anchors and never move.
//!
//! A final pass rebuilds each block's instruction list in a topological
//! within-block order: arguments before uses, in-effect emitters before
//! their readers, readers before the out-effect emitters that invalidate
//! them, with the pinned skeleton's program order preserved.

use crate::dominator_tree::common_dominator;
use crate::ir::{Block, Graph, Inst, Opcode, UNVISITED};
use cranelift_entity::{EntitySet, SecondaryMap};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Reschedule every unpinned instruction of `graph`.
pub fn do_gcm(graph: &mut Graph) {
    schedule_early_pass(graph);
    schedule_late_pass(graph);
    rebuild_block_lists(graph);
}

fn schedule_early_pass(graph: &mut Graph) {
    let mut visited: EntitySet<Inst> = EntitySet::new();
    let blocks: Vec<Block> = graph.blocks().collect();
    for &block in &blocks {
        if graph.block(block).dfs_id == UNVISITED {
            continue;
        }
        let root = graph.block(block).root.expand().expect("block without a root");
        let body = graph.block(block).insts.clone();
        for inst in body {
            if !graph.is_pinned(inst) {
                continue;
            }
            visited.insert(inst);
            let args: SmallVec<[Inst; 4]> = graph.args(inst).iter().copied().collect();
            for arg in args {
                schedule_early(graph, arg, root, &mut visited);
            }
        }
        let phis = graph.block(block).phis.clone();
        for phi in phis {
            visited.insert(phi);
            let args: SmallVec<[Inst; 2]> = graph.args(phi).iter().copied().collect();
            for arg in args {
                schedule_early(graph, arg, root, &mut visited);
            }
        }
    }
}

/// Hoist `inst` to the deepest block dominating its inputs, recursing into
/// arguments first.
fn schedule_early(graph: &mut Graph, inst: Inst, root: Block, visited: &mut EntitySet<Inst>) {
    if visited.contains(inst) {
        return;
    }
    visited.insert(inst);
    if graph.is_pinned(inst) || graph.opcode(inst) == Opcode::Phi {
        return;
    }

    let mut home = root;
    let args: SmallVec<[Inst; 4]> = graph.args(inst).iter().copied().collect();
    for arg in args {
        schedule_early(graph, arg, root, visited);
        let arg_block = graph.block_of(arg);
        if graph.block(arg_block).dominator_depth > graph.block(home).dominator_depth {
            home = arg_block;
        }
    }
    let emitters: SmallVec<[Inst; 2]> = graph.effects_in(inst).iter().copied().collect();
    for emitter in emitters {
        let emitter_block = graph.block_of(emitter);
        if graph.block(emitter_block).dominator_depth > graph.block(home).dominator_depth {
            home = emitter_block;
        }
    }
    graph.inst_mut(inst).block = home.into();
}

fn schedule_late_pass(graph: &mut Graph) {
    let mut visited: EntitySet<Inst> = EntitySet::new();
    let insts: Vec<Inst> = graph.insts().collect();
    for &inst in &insts {
        if !graph.is_removed(inst) {
            schedule_late(graph, inst, &mut visited);
        }
    }
}

/// Sink `inst` toward its uses, scheduling the uses first.
fn schedule_late(graph: &mut Graph, inst: Inst, visited: &mut EntitySet<Inst>) {
    if visited.contains(inst) {
        return;
    }
    visited.insert(inst);
    if graph.is_pinned(inst) || graph.opcode(inst) == Opcode::Phi {
        return;
    }
    if graph.block(graph.block_of(inst)).dfs_id == UNVISITED {
        return;
    }

    let uses: SmallVec<[Inst; 4]> = graph.uses(inst).iter().copied().collect();
    for &user in &uses {
        schedule_late(graph, user, visited);
    }

    let mut lca: Option<Block> = None;
    for &user in &uses {
        if graph.opcode(user) == Opcode::Phi {
            // A phi uses its input at the end of the matching predecessor.
            let phi_block = graph.block_of(user);
            let preds: SmallVec<[Block; 2]> = graph.block(phi_block).preds().iter().copied().collect();
            let inputs: SmallVec<[Inst; 2]> = graph.args(user).iter().copied().collect();
            for (position, &input) in inputs.iter().enumerate() {
                if input != inst {
                    continue;
                }
                let pred = preds.get(position).copied().expect("phi arity mismatch");
                lca = Some(merge(graph, lca, pred));
            }
        } else {
            let use_block = graph.block_of(user);
            if graph.block(use_block).dfs_id == UNVISITED {
                continue;
            }
            lca = Some(merge(graph, lca, use_block));
        }
    }
    let invalidators: SmallVec<[Inst; 4]> = graph.effects_out(inst).iter().copied().collect();
    for invalidator in invalidators {
        if graph.is_removed(invalidator) {
            continue;
        }
        let block = graph.block_of(invalidator);
        if graph.block(block).dfs_id != UNVISITED {
            lca = Some(merge(graph, lca, block));
        }
    }

    let lca = match lca {
        Some(lca) => lca,
        None => return,
    };

    // Pick the minimum loop depth on the dominator path from the LCA up to
    // the early home; ties go to the deeper block, closer to the uses.
    let early = graph.block_of(inst);
    let mut best = lca;
    let mut cursor = lca;
    while cursor != early {
        match graph.block(cursor).dominator.expand() {
            Some(dominator) => {
                cursor = dominator;
                if graph.block(cursor).loop_depth < graph.block(best).loop_depth {
                    best = cursor;
                }
            }
            None => {
                // Effect constraints pulled the LCA off the early chain;
                // the early home is always legal.
                best = early;
                break;
            }
        }
    }
    graph.inst_mut(inst).block = best.into();
}

fn merge(graph: &Graph, lca: Option<Block>, block: Block) -> Block {
    match lca {
        None => block,
        Some(lca) => common_dominator(graph, lca, block),
    }
}

/// Rewrite every block's instruction list after rescheduling.
fn rebuild_block_lists(graph: &mut Graph) {
    let blocks: Vec<Block> = graph.blocks().collect();
    let mut old: SecondaryMap<Block, Vec<Inst>> = SecondaryMap::new();
    for &block in &blocks {
        old[block] = std::mem::take(&mut graph.block_mut(block).insts);
    }

    let mut residents: SecondaryMap<Block, Vec<Inst>> = SecondaryMap::new();
    let insts: Vec<Inst> = graph.insts().collect();
    for &inst in &insts {
        if graph.is_removed(inst) || graph.is_pinned(inst) || graph.opcode(inst) == Opcode::Phi {
            continue;
        }
        if let Some(home) = graph.inst(inst).block.expand() {
            residents[home].push(inst);
        }
    }

    for &block in &blocks {
        let mut out: Vec<Inst> = Vec::with_capacity(old[block].len());
        let mut emitted: EntitySet<Inst> = EntitySet::new();

        // Readers that must precede a pinned invalidator in this block.
        let mut before: FxHashMap<Inst, SmallVec<[Inst; 2]>> = FxHashMap::default();
        for &reader in &residents[block] {
            for &invalidator in graph.effects_out(reader) {
                if !graph.is_removed(invalidator)
                    && graph.inst(invalidator).block.expand() == Some(block)
                {
                    before.entry(invalidator).or_default().push(reader);
                }
            }
        }

        let pinned: Vec<Inst> = old[block]
            .iter()
            .copied()
            .filter(|&inst| !graph.is_removed(inst) && graph.is_pinned(inst))
            .collect();
        let (body_pinned, terminator) = match pinned.split_last() {
            Some((&last, rest)) if graph.opcode(last).is_terminator() => (rest, Some(last)),
            _ => (&pinned[..], None),
        };

        for &pin in body_pinned {
            if let Some(readers) = before.get(&pin) {
                for &reader in &readers.clone() {
                    emit(graph, block, reader, &mut emitted, &mut out);
                }
            }
            let args: SmallVec<[Inst; 4]> = graph.args(pin).iter().copied().collect();
            for arg in args {
                emit(graph, block, arg, &mut emitted, &mut out);
            }
            emitted.insert(pin);
            out.push(pin);
        }

        // Everything left lands before the terminator, in creation order.
        let rest = residents[block].clone();
        for inst in rest {
            emit(graph, block, inst, &mut emitted, &mut out);
        }
        if let Some(terminator) = terminator {
            let args: SmallVec<[Inst; 4]> = graph.args(terminator).iter().copied().collect();
            for arg in args {
                emit(graph, block, arg, &mut emitted, &mut out);
            }
            out.push(terminator);
        }

        graph.block_mut(block).insts = out;
    }
}

/// Emit an unpinned resident of `block` after its in-block dependencies.
fn emit(graph: &Graph, block: Block, inst: Inst, emitted: &mut EntitySet<Inst>, out: &mut Vec<Inst>) {
    if emitted.contains(inst)
        || graph.is_removed(inst)
        || graph.is_pinned(inst)
        || graph.opcode(inst) == Opcode::Phi
        || graph.inst(inst).block.expand() != Some(block)
    {
        return;
    }
    emitted.insert(inst);
    for &arg in graph.args(inst) {
        emit(graph, block, arg, emitted, out);
    }
    out.push(inst);
}
