//! HIR verifier.
//!
//! Structural checking used by tests and debug builds: edge symmetry, phi
//! arity, CFG edge symmetry, SSA dominance of uses, and the pinning rules
//! the passes rely on. Errors are collected rather than reported one at a
//! time.

use crate::dominator_tree::dominates;
use crate::ir::{Block, Graph, Inst, Opcode, UNVISITED};
use std::fmt;

/// One verifier finding.
#[derive(Debug)]
pub struct VerifierError {
    /// Human-readable description.
    pub message: String,
    /// Offending instruction, when one is known.
    pub inst: Option<Inst>,
    /// Offending block, when one is known.
    pub block: Option<Block>,
}

impl fmt::Display for VerifierError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.inst, self.block) {
            (Some(inst), _) => write!(f, "{}: {}", inst, self.message),
            (None, Some(block)) => write!(f, "{}: {}", block, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

/// Every finding of one verifier run.
#[derive(Debug, Default)]
pub struct VerifierErrors(pub Vec<VerifierError>);

impl VerifierErrors {
    /// Did the run find nothing?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn report(&mut self, inst: Option<Inst>, block: Option<Block>, message: String) {
        self.0.push(VerifierError { message, inst, block });
    }
}

impl fmt::Display for VerifierErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for error in &self.0 {
            writeln!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VerifierErrors {}

/// Result of a verifier run.
pub type VerifierResult<T> = Result<T, VerifierErrors>;

/// Verify the structural invariants of `graph`.
///
/// Dominance is only checked when the dominator tree has been computed
/// (some root block carries a DFS number).
pub fn verify_graph(graph: &Graph) -> VerifierResult<()> {
    let mut errors = VerifierErrors::default();

    verify_edges(graph, &mut errors);
    verify_blocks(graph, &mut errors);

    let dominators_ready = graph
        .roots
        .iter()
        .any(|&root| graph.block(root).dfs_id != UNVISITED);
    if dominators_ready {
        verify_dominance(graph, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Argument and use lists must mirror each other exactly.
fn verify_edges(graph: &Graph, errors: &mut VerifierErrors) {
    for inst in graph.insts() {
        if graph.is_removed(inst) {
            continue;
        }
        for &arg in graph.args(inst) {
            if graph.is_removed(arg) {
                errors.report(Some(inst), None, format!("argument {arg} is removed"));
                continue;
            }
            let forward = graph.args(inst).iter().filter(|&&a| a == arg).count();
            let backward = graph.uses(arg).iter().filter(|&&u| u == inst).count();
            if forward != backward {
                errors.report(
                    Some(inst),
                    None,
                    format!("{forward} argument edges to {arg} but {backward} use edges back"),
                );
            }
        }
        for &user in graph.uses(inst) {
            if !graph.args(user).contains(&inst) {
                errors.report(
                    Some(inst),
                    None,
                    format!("use edge to {user} without a matching argument edge"),
                );
            }
        }
        if graph.inst(inst).block.is_none() {
            errors.report(Some(inst), None, "instruction without a home block".to_string());
        }
    }
}

/// Per-block structure: phi arity, CFG edge symmetry, terminator placement.
fn verify_blocks(graph: &Graph, errors: &mut VerifierErrors) {
    for block in graph.blocks() {
        let data = graph.block(block);

        for &phi in &data.phis {
            if graph.is_removed(phi) {
                continue;
            }
            if graph.opcode(phi) != Opcode::Phi {
                errors.report(Some(phi), Some(block), "non-phi in a phi list".to_string());
                continue;
            }
            let arity = graph.args(phi).len();
            let preds = data.preds().len();
            if arity != preds {
                errors.report(
                    Some(phi),
                    Some(block),
                    format!("phi has {arity} inputs for {preds} predecessors"),
                );
            }
        }

        for &succ in data.succs() {
            if !graph.block(succ).preds().contains(&block) {
                errors.report(
                    None,
                    Some(block),
                    format!("successor edge to {succ} without a predecessor edge back"),
                );
            }
        }
        for &pred in data.preds() {
            if !graph.block(pred).succs().contains(&block) {
                errors.report(
                    None,
                    Some(block),
                    format!("predecessor edge to {pred} without a successor edge back"),
                );
            }
        }

        for (position, &inst) in data.insts.iter().enumerate() {
            if graph.is_removed(inst) {
                errors.report(Some(inst), Some(block), "removed instruction still listed".to_string());
                continue;
            }
            if graph.inst(inst).block.expand() != Some(block) {
                errors.report(Some(inst), Some(block), "instruction listed outside its home block".to_string());
            }
            let terminator = graph.opcode(inst).is_terminator();
            let last = position + 1 == data.insts.len();
            if terminator && !last {
                errors.report(Some(inst), Some(block), "terminator before the end of the block".to_string());
            }
        }
    }
}

/// Every definition must dominate each of its uses; a phi input must
/// dominate the matching predecessor. Unpinned placements must also be
/// dominated by every argument's home (GCM legality).
fn verify_dominance(graph: &Graph, errors: &mut VerifierErrors) {
    for inst in graph.insts() {
        if graph.is_removed(inst) {
            continue;
        }
        let def_block = match graph.inst(inst).block.expand() {
            Some(block) => block,
            None => continue,
        };
        if graph.block(def_block).dfs_id == UNVISITED {
            continue;
        }
        for &user in graph.uses(inst) {
            if graph.is_removed(user) {
                errors.report(Some(inst), None, format!("use edge to removed {user}"));
                continue;
            }
            let use_block = match graph.inst(user).block.expand() {
                Some(block) => block,
                None => continue,
            };
            if graph.block(use_block).dfs_id == UNVISITED {
                continue;
            }
            if graph.opcode(user) == Opcode::Phi {
                let preds = graph.block(use_block).preds();
                for (position, &input) in graph.args(user).iter().enumerate() {
                    if input != inst {
                        continue;
                    }
                    // Loop phis legitimately take themselves through the
                    // back edge.
                    if user == inst {
                        continue;
                    }
                    match preds.get(position) {
                        Some(&pred) => {
                            if graph.block(pred).dfs_id != UNVISITED
                                && !dominates(graph, def_block, pred)
                            {
                                errors.report(
                                    Some(inst),
                                    None,
                                    format!("does not dominate predecessor of phi {user}"),
                                );
                            }
                        }
                        None => errors.report(
                            Some(user),
                            Some(use_block),
                            "phi input without a predecessor".to_string(),
                        ),
                    }
                }
            } else if use_block == def_block {
                let def_pos = position_of(graph, def_block, inst);
                let use_pos = position_of(graph, use_block, user);
                if let (Some(def_pos), Some(use_pos)) = (def_pos, use_pos) {
                    if def_pos >= use_pos {
                        errors.report(
                            Some(inst),
                            Some(def_block),
                            format!("defined after its use {user}"),
                        );
                    }
                }
            } else if !dominates(graph, def_block, use_block) {
                errors.report(
                    Some(inst),
                    None,
                    format!("does not dominate its use {user}"),
                );
            }
        }
    }
}

/// Position of `inst` in `block`, with phis before every body instruction.
fn position_of(graph: &Graph, block: Block, inst: Inst) -> Option<usize> {
    let data = graph.block(block);
    if data.phis.contains(&inst) {
        return Some(0);
    }
    data.insts
        .iter()
        .position(|&i| i == inst)
        .map(|position| position + 1)
}
