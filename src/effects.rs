//! Effect and alias dependence analysis.
//!
//! Memory-like side effects are modeled without a full alias analysis. For
//! each memory-reading instruction, `find_in_effects` walks backward in the
//! dominator tree and records the nearest effect emitter that invalidates
//! it; `find_out_effects` scans forward through the blocks reachable from
//! the reader and records every later invalidator. The contract the other
//! passes rely on: a reordering that moves `x` past `y` is legal iff
//! `y ∉ x.effects_in` and `y ∉ x.effects_out`. GVN additionally compares
//! `effects_in` sets to decide whether two reads observe the same memory.

use crate::ir::{Block, Graph, Inst, Opcode, UNVISITED};
use smallvec::SmallVec;

/// Does executing the emitter `emitter` invalidate what `reader` observed?
///
/// Stores and deletes hit readers of the same base object; pushing a call
/// argument lets the object escape and hits everything. Calls themselves
/// emit effects but invalidate nothing, so reads stay value-numberable
/// across them.
fn invalidates(graph: &Graph, emitter: Inst, reader: Inst) -> bool {
    match graph.opcode(emitter) {
        Opcode::StoreProperty | Opcode::DeleteProperty => {
            graph.args(emitter).first() == graph.args(reader).first()
        }
        Opcode::StoreArg | Opcode::StoreVarArg | Opcode::LoadVarArg => true,
        _ => false,
    }
}

/// Is this opcode sensitive to the state of memory it reads?
pub fn is_memory_reader(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::LoadProperty | Opcode::Keysof | Opcode::Sizeof)
}

/// Compute `effects_in` and `effects_out` for every memory-reading
/// instruction of `graph`. Recomputation is safe: lists are cleared first.
pub fn find_effects(graph: &mut Graph) {
    let insts: Vec<Inst> = graph.insts().collect();
    for &inst in &insts {
        graph.clear_effects(inst);
    }

    let blocks: Vec<Block> = graph.blocks().collect();
    for &block in &blocks {
        if graph.block(block).dfs_id == UNVISITED {
            continue;
        }
        let body = graph.block(block).insts.clone();
        for (position, &inst) in body.iter().enumerate() {
            if graph.is_removed(inst) || !is_memory_reader(graph.opcode(inst)) {
                continue;
            }
            find_in_effects(graph, block, position, inst);
            find_out_effects(graph, block, position, inst);
        }
    }
}

/// Walk backward from `reader` through its block and then up the dominator
/// chain; the nearest emitter that invalidates it becomes its in-effect.
/// The walk stops at that emitter or at the entry.
fn find_in_effects(graph: &mut Graph, block: Block, position: usize, reader: Inst) {
    let mut current = block;
    let mut end = position;
    loop {
        for index in (0..end).rev() {
            let emitter = graph.block(current).insts[index];
            if graph.opcode(emitter).has_side_effects() && invalidates(graph, emitter, reader) {
                graph.push_effect_in(reader, emitter);
                return;
            }
        }
        current = match graph.block(current).dominator.expand() {
            Some(dominator) => dominator,
            None => return,
        };
        end = graph.block(current).insts.len();
    }
}

/// Scan forward through every block reachable from `reader`'s block and
/// record each later emitter that invalidates it.
fn find_out_effects(graph: &mut Graph, block: Block, position: usize, reader: Inst) {
    let blocks: Vec<Block> = graph.blocks().collect();
    let mut out: SmallVec<[Inst; 4]> = SmallVec::new();
    for &candidate in &blocks {
        if !graph.block(candidate).reachable_from.contains(block) {
            continue;
        }
        for (index, &emitter) in graph.block(candidate).insts.iter().enumerate() {
            if candidate == block && index <= position {
                continue;
            }
            if graph.opcode(emitter).has_side_effects() && invalidates(graph, emitter, reader) {
                out.push(emitter);
            }
        }
    }
    for emitter in out {
        graph.push_effect_out(reader, emitter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstNode as A;
    use crate::ast::FunctionLiteral;
    use crate::builder::HirBuilder;
    use crate::dominator_tree::{derive_dominators, find_reachable_blocks};

    fn analyzed(stack_slots: u32, body: Vec<A>) -> Graph {
        let mut graph = HirBuilder::build(&FunctionLiteral::script(stack_slots, body));
        find_reachable_blocks(&mut graph);
        derive_dominators(&mut graph);
        find_effects(&mut graph);
        graph
    }

    fn member(object: A, name: &str) -> A {
        A::Member(Box::new(object), Box::new(A::Property(name.to_string())))
    }

    #[test]
    fn store_is_in_effect_of_later_load() {
        // o = {}; o.a = 1; return o.a
        let graph = analyzed(
            1,
            vec![
                A::assign_stack(0, A::ObjectLiteral(vec![])),
                A::Assign(Box::new(member(A::stack(0), "a")), Box::new(A::number(1.0))),
                A::ret(member(A::stack(0), "a")),
            ],
        );
        let load = graph
            .insts()
            .find(|&i| graph.opcode(i) == Opcode::LoadProperty)
            .expect("no load");
        let ins = graph.effects_in(load);
        assert_eq!(ins.len(), 1);
        assert_eq!(graph.opcode(ins[0]), Opcode::StoreProperty);
        // The reverse direction: the store is not *after* the load.
        assert!(graph.effects_out(load).is_empty());
    }

    #[test]
    fn later_store_is_out_effect_of_load() {
        // o = {}; x = o.a; o.a = 1; return x
        let graph = analyzed(
            2,
            vec![
                A::assign_stack(0, A::ObjectLiteral(vec![])),
                A::assign_stack(1, member(A::stack(0), "a")),
                A::Assign(Box::new(member(A::stack(0), "a")), Box::new(A::number(1.0))),
                A::ret(A::stack(1)),
            ],
        );
        let load = graph
            .insts()
            .find(|&i| graph.opcode(i) == Opcode::LoadProperty)
            .expect("no load");
        assert!(graph.effects_in(load).is_empty());
        let outs = graph.effects_out(load);
        assert_eq!(outs.len(), 1);
        assert_eq!(graph.opcode(outs[0]), Opcode::StoreProperty);
    }

    #[test]
    fn stores_to_other_objects_do_not_interfere() {
        // o = {}; p = {}; p.b = 1; return o.a
        let graph = analyzed(
            2,
            vec![
                A::assign_stack(0, A::ObjectLiteral(vec![])),
                A::assign_stack(1, A::ObjectLiteral(vec![])),
                A::Assign(Box::new(member(A::stack(1), "b")), Box::new(A::number(1.0))),
                A::ret(member(A::stack(0), "a")),
            ],
        );
        let load = graph
            .insts()
            .find(|&i| graph.opcode(i) == Opcode::LoadProperty)
            .expect("no load");
        assert!(graph.effects_in(load).is_empty());
        assert!(graph.effects_out(load).is_empty());
    }

    #[test]
    fn argument_escape_invalidates_reads() {
        // o = {}; f = nil; f(o); return o.a
        let graph = analyzed(
            2,
            vec![
                A::assign_stack(0, A::ObjectLiteral(vec![])),
                A::assign_stack(1, A::Nil),
                A::Call(Box::new(A::stack(1)), vec![A::stack(0)]),
                A::ret(member(A::stack(0), "a")),
            ],
        );
        let load = graph
            .insts()
            .find(|&i| graph.opcode(i) == Opcode::LoadProperty)
            .expect("no load");
        let ins = graph.effects_in(load);
        assert_eq!(ins.len(), 1);
        assert_eq!(graph.opcode(ins[0]), Opcode::StoreArg);
    }
}
