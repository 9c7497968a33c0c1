//! Textual form of the HIR.
//!
//! The format is stable and serves as the ground truth for the builder's
//! golden tests:
//!
//! ```text
//! [Block#<id> {<env_slot_ids>} <phis...> <instrs...> [<pred_ids>]>*>[<succ_ids>]]
//! ```
//!
//! Instructions print as `i<id> = <Opcode>[<payload>](i<arg>, ...)`, phis as
//! `@[<input_ids>]:<id>`. Blocks print one per line in creation order.
//! Removed instructions print nowhere; stale environment entries are
//! resolved through their replacements first.

use crate::ir::entities::{Block, Inst};
use crate::ir::instructions::{Opcode, Payload};
use crate::ir::Graph;
use cranelift_entity::EntityRef;
use std::fmt;

/// Write the whole graph to `w`.
pub fn write_graph(w: &mut dyn fmt::Write, graph: &Graph) -> fmt::Result {
    for block in graph.blocks() {
        write_block(w, graph, block)?;
    }
    Ok(())
}

fn write_block(w: &mut dyn fmt::Write, graph: &Graph, block: Block) -> fmt::Result {
    write!(w, "[Block#{}", block.index())?;

    // Live environment definitions, in slot order.
    write!(w, " {{")?;
    let mut first = true;
    let data = graph.block(block);
    for index in 0..data.env.len() {
        let def = match data.env.get(index) {
            Some(def) => graph.resolve(def),
            None => continue,
        };
        if graph.is_removed(def) {
            continue;
        }
        if !first {
            write!(w, ",")?;
        }
        write!(w, "{}", def.index())?;
        first = false;
    }
    write!(w, "}}")?;

    for &phi in &data.phis {
        if graph.is_removed(phi) {
            continue;
        }
        write!(w, " ")?;
        write_phi(w, graph, phi)?;
    }

    for &inst in &data.insts {
        if graph.is_removed(inst) {
            continue;
        }
        write!(w, " ")?;
        write_inst(w, graph, inst)?;
    }

    write!(w, " [")?;
    write_block_list(w, data.preds())?;
    write!(w, "]>*>[")?;
    write_block_list(w, data.succs())?;
    writeln!(w, "]]")
}

fn write_block_list(w: &mut dyn fmt::Write, blocks: &[Block]) -> fmt::Result {
    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            write!(w, ",")?;
        }
        write!(w, "{}", block.index())?;
    }
    Ok(())
}

fn write_phi(w: &mut dyn fmt::Write, graph: &Graph, phi: Inst) -> fmt::Result {
    write!(w, "@[")?;
    for (i, &input) in graph.args(phi).iter().enumerate() {
        if i > 0 {
            write!(w, ",")?;
        }
        write!(w, "{}", input.index())?;
    }
    write!(w, "]:{}", phi.index())
}

/// Write one instruction line: `i<id> = <Opcode>[<payload>](<args>)`.
pub fn write_inst(w: &mut dyn fmt::Write, graph: &Graph, inst: Inst) -> fmt::Result {
    write!(w, "i{} = {}", inst.index(), graph.opcode(inst))?;

    match graph.inst(inst).payload {
        Payload::BinOp(kind) => write!(w, "[{kind:?}]")?,
        Payload::Entry { context_slots, .. } => write!(w, "[{context_slots}]")?,
        Payload::Alloc { size } => write!(w, "[{size}]")?,
        Payload::Function { .. } | Payload::None => {}
    }
    if graph.opcode(inst) == Opcode::Literal {
        let slot = graph.inst(inst).slot.expect("literal without a root slot");
        write!(w, "[{}]", graph.constants.get(slot))?;
    }

    let args = graph.args(inst);
    if !args.is_empty() {
        write!(w, "(")?;
        for (i, &arg) in args.iter().enumerate() {
            if i > 0 {
                write!(w, ", ")?;
            }
            write!(w, "i{}", arg.index())?;
        }
        write!(w, ")")?;
    }
    Ok(())
}

/// A display wrapper for the whole graph.
pub struct DisplayGraph<'a>(pub &'a Graph);

impl fmt::Display for DisplayGraph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_graph(f, self.0)
    }
}

impl Graph {
    /// The textual form of the graph.
    pub fn display(&self) -> DisplayGraph {
        DisplayGraph(self)
    }
}
