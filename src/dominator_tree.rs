//! Dominator analysis.
//!
//! A depth-first enumeration numbers the blocks of every compilation root,
//! then Lengauer-Tarjan semi-dominators with path compression produce the
//! immediate-dominator map, the per-block dominator depth, and each block's
//! `dominates` list. Reachability is a separate forward DFS filling each
//! block's `reachable_from` set.

use crate::ir::{Block, Graph, UNVISITED};
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{EntitySet, SecondaryMap};
use smallvec::SmallVec;

/// Compute the dominator tree of every root in `graph`.
///
/// Recomputation is safe: all dominator fields are reset first.
pub fn derive_dominators(graph: &mut Graph) {
    let blocks: Vec<Block> = graph.blocks().collect();
    for &block in &blocks {
        let data = graph.block_mut(block);
        data.parent = PackedOption::default();
        data.ancestor = PackedOption::default();
        data.label = PackedOption::default();
        data.semi = PackedOption::default();
        data.dfs_id = UNVISITED;
        data.dominator = PackedOption::default();
        data.dominator_depth = 0;
        data.dominates.clear();
    }

    let mut dfs = Vec::with_capacity(blocks.len());
    let mut counter = 0;
    for root in graph.roots.clone() {
        enumerate_dfs(graph, root, &mut dfs, &mut counter);
    }

    // Semi-dominator pass, in reverse DFS order. Every non-root block has a
    // DFS parent, and each predecessor walk carries the minimum
    // semi-dominator seen through `eval`'s path compression.
    let mut bucket: SecondaryMap<Block, Vec<Block>> = SecondaryMap::new();
    for &w in dfs.iter().rev() {
        let parent = match graph.block(w).parent.expand() {
            Some(parent) => parent,
            None => continue, // a root
        };
        let preds: SmallVec<[Block; 2]> = graph.block(w).preds().iter().copied().collect();
        for v in preds {
            if graph.block(v).dfs_id == UNVISITED {
                continue;
            }
            let u = eval(graph, v);
            let semi_u = semi(graph, u);
            if dfs_id(graph, semi_u) < dfs_id(graph, semi(graph, w)) {
                graph.block_mut(w).semi = semi_u.into();
            }
        }
        bucket[semi(graph, w)].push(w);
        graph.block_mut(w).ancestor = parent.into();

        for v in std::mem::take(&mut bucket[parent]) {
            let u = eval(graph, v);
            let dom = if dfs_id(graph, semi(graph, u)) < dfs_id(graph, semi(graph, v)) {
                u
            } else {
                parent
            };
            graph.block_mut(v).dominator = dom.into();
        }
    }

    // Forward pass turning relative dominators into immediate ones.
    for &w in &dfs {
        if graph.block(w).parent.is_none() {
            continue;
        }
        let dom = graph.block(w).dominator.expand().expect("missing dominator estimate");
        if dom != semi(graph, w) {
            // A root dominates itself, so the chain stops there.
            let above = graph.block(dom).dominator.expand().unwrap_or(dom);
            graph.block_mut(w).dominator = above.into();
        }
    }

    // Depths and child lists. The immediate dominator is a DFS-tree
    // ancestor, so a forward scan sees dominators before dominated blocks.
    for &w in &dfs {
        match graph.block(w).dominator.expand() {
            Some(dom) => {
                let depth = graph.block(dom).dominator_depth + 1;
                graph.block_mut(w).dominator_depth = depth;
                graph.block_mut(dom).dominates.push(w);
            }
            None => graph.block_mut(w).dominator_depth = 0,
        }
    }
}

/// Number the blocks reachable from `root` in a depth-first preorder,
/// recording DFS parents for the dominator computation.
fn enumerate_dfs(graph: &mut Graph, root: Block, dfs: &mut Vec<Block>, counter: &mut u32) {
    let mut stack: Vec<(Block, PackedOption<Block>)> = vec![(root, PackedOption::default())];
    while let Some((block, parent)) = stack.pop() {
        if graph.block(block).dfs_id != UNVISITED {
            continue;
        }
        {
            let data = graph.block_mut(block);
            data.dfs_id = *counter;
            data.parent = parent;
            data.semi = block.into();
            data.label = block.into();
            data.ancestor = PackedOption::default();
        }
        *counter += 1;
        dfs.push(block);
        let succs: SmallVec<[Block; 2]> = graph.block(block).succs().iter().copied().collect();
        for &succ in succs.iter().rev() {
            if graph.block(succ).dfs_id == UNVISITED {
                stack.push((succ, block.into()));
            }
        }
    }
}

fn dfs_id(graph: &Graph, block: Block) -> u32 {
    graph.block(block).dfs_id
}

fn semi(graph: &Graph, block: Block) -> Block {
    graph.block(block).semi.expand().expect("semi-dominator not initialized")
}

/// Evaluate `block`'s minimum-semi label, compressing ancestor paths as a
/// side effect.
fn eval(graph: &mut Graph, block: Block) -> Block {
    if graph.block(block).ancestor.is_none() {
        return block;
    }
    compress(graph, block);
    graph.block(block).label.expand().expect("label not initialized")
}

fn compress(graph: &mut Graph, block: Block) {
    // Collect the ancestor chain, then fold labels back down.
    let mut chain: Vec<Block> = Vec::new();
    let mut current = block;
    while let Some(ancestor) = graph.block(current).ancestor.expand() {
        if graph.block(ancestor).ancestor.is_none() {
            break;
        }
        chain.push(current);
        current = ancestor;
    }
    for &v in chain.iter().rev() {
        let ancestor = graph.block(v).ancestor.expand().expect("ancestor lost during compression");
        let ancestor_label = graph.block(ancestor).label.expand().expect("label not initialized");
        let own_label = graph.block(v).label.expand().expect("label not initialized");
        if dfs_id(graph, semi(graph, ancestor_label)) < dfs_id(graph, semi(graph, own_label)) {
            graph.block_mut(v).label = ancestor_label.into();
        }
        let above = graph.block(ancestor).ancestor;
        graph.block_mut(v).ancestor = above;
    }
}

/// Fill every block's `reachable_from` set with a forward DFS from each
/// block, itself included.
pub fn find_reachable_blocks(graph: &mut Graph) {
    let blocks: Vec<Block> = graph.blocks().collect();
    for &start in &blocks {
        let mut seen = EntitySet::new();
        let mut stack = vec![start];
        while let Some(block) = stack.pop() {
            if seen.contains(block) {
                continue;
            }
            seen.insert(block);
            graph.block_mut(block).reachable_from.insert(start);
            let succs: SmallVec<[Block; 2]> = graph.block(block).succs().iter().copied().collect();
            stack.extend(succs);
        }
    }
}

/// True when `a` dominates `b`; a block dominates itself. Dominance is only
/// defined between reachable blocks of the same root.
pub fn dominates(graph: &Graph, a: Block, b: Block) -> bool {
    let target_depth = graph.block(a).dominator_depth;
    let mut current = b;
    while graph.block(current).dominator_depth > target_depth {
        current = match graph.block(current).dominator.expand() {
            Some(dom) => dom,
            None => return false,
        };
    }
    current == a
}

/// The deepest block dominating both `a` and `b`.
pub fn common_dominator(graph: &Graph, a: Block, b: Block) -> Block {
    let mut a = a;
    let mut b = b;
    while graph.block(a).dominator_depth > graph.block(b).dominator_depth {
        a = graph.block(a).dominator.expand().expect("dominator chain broke");
    }
    while graph.block(b).dominator_depth > graph.block(a).dominator_depth {
        b = graph.block(b).dominator.expand().expect("dominator chain broke");
    }
    while a != b {
        a = graph.block(a).dominator.expand().expect("dominator chain broke");
        b = graph.block(b).dominator.expand().expect("dominator chain broke");
    }
    a
}

/// Blocks of the root `entry`, in reverse post-order. This is the block
/// order handed to the LIR stage.
pub fn reverse_postorder(graph: &Graph, entry: Block) -> Vec<Block> {
    let mut postorder = Vec::new();
    let mut seen = EntitySet::new();
    // Two-phase stack DFS: the first pop pushes successors, the second
    // emits the block.
    let mut stack = vec![(entry, false)];
    seen.insert(entry);
    while let Some((block, emitted)) = stack.pop() {
        if emitted {
            postorder.push(block);
            continue;
        }
        stack.push((block, true));
        let succs: SmallVec<[Block; 2]> = graph.block(block).succs().iter().copied().collect();
        for &succ in succs.iter().rev() {
            if !seen.contains(succ) {
                seen.insert(succ);
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Opcode, Payload};

    /// A diamond with a tail: 0 -> (1, 2) -> 3 -> 4.
    fn diamond() -> (Graph, [Block; 5]) {
        let mut graph = Graph::new();
        let b: Vec<Block> = (0..5).map(|_| graph.make_block(0, 0)).collect();
        graph.roots.push(b[0]);
        let cond = graph.add(b[0], Opcode::Nil, Payload::None, None, &[]);
        graph.branch(b[0], cond, b[1], b[2]);
        graph.goto(b[1], b[3]);
        graph.goto(b[2], b[3]);
        graph.goto(b[3], b[4]);
        (graph, [b[0], b[1], b[2], b[3], b[4]])
    }

    #[test]
    fn diamond_dominators() {
        let (mut graph, [b0, b1, b2, b3, b4]) = diamond();
        derive_dominators(&mut graph);

        assert_eq!(graph.block(b0).dominator.expand(), None);
        assert_eq!(graph.block(b1).dominator.expand(), Some(b0));
        assert_eq!(graph.block(b2).dominator.expand(), Some(b0));
        assert_eq!(graph.block(b3).dominator.expand(), Some(b0));
        assert_eq!(graph.block(b4).dominator.expand(), Some(b3));

        assert!(dominates(&graph, b0, b4));
        assert!(dominates(&graph, b3, b4));
        assert!(!dominates(&graph, b1, b3));
        assert!(dominates(&graph, b1, b1));

        assert_eq!(common_dominator(&graph, b1, b2), b0);
        assert_eq!(common_dominator(&graph, b1, b4), b0);
        assert_eq!(common_dominator(&graph, b3, b4), b3);

        assert_eq!(graph.block(b0).dominator_depth, 0);
        assert_eq!(graph.block(b3).dominator_depth, 1);
        assert_eq!(graph.block(b4).dominator_depth, 2);

        let mut children = graph.block(b0).dominates.clone();
        children.sort();
        assert_eq!(children, vec![b1, b2, b3]);
    }

    #[test]
    fn loop_dominators() {
        // 0 -> 1 (header) -> 2 (body) -> 1, 1 -> 3 (exit)
        let mut graph = Graph::new();
        let b: Vec<Block> = (0..4).map(|_| graph.make_block(0, 0)).collect();
        graph.roots.push(b[0]);
        graph.goto(b[0], b[1]);
        let cond = graph.add(b[1], Opcode::Nil, Payload::None, None, &[]);
        graph.branch(b[1], cond, b[2], b[3]);
        graph.goto(b[2], b[1]);
        derive_dominators(&mut graph);

        assert_eq!(graph.block(b[1]).dominator.expand(), Some(b[0]));
        assert_eq!(graph.block(b[2]).dominator.expand(), Some(b[1]));
        assert_eq!(graph.block(b[3]).dominator.expand(), Some(b[1]));
        assert!(dominates(&graph, b[1], b[2]));
        assert!(!dominates(&graph, b[2], b[1]));
    }

    #[test]
    fn unreachable_blocks_stay_unnumbered() {
        let (mut graph, [b0, ..]) = diamond();
        let stray = graph.make_block(0, 0);
        derive_dominators(&mut graph);
        assert_ne!(graph.block(b0).dfs_id, UNVISITED);
        assert_eq!(graph.block(stray).dfs_id, UNVISITED);
        assert_eq!(graph.block(stray).dominator.expand(), None);
    }

    #[test]
    fn reachability_sets() {
        let (mut graph, [b0, b1, b2, b3, _]) = diamond();
        find_reachable_blocks(&mut graph);
        assert!(graph.block(b3).reachable_from.contains(b0));
        assert!(graph.block(b3).reachable_from.contains(b1));
        assert!(graph.block(b3).reachable_from.contains(b3));
        assert!(!graph.block(b1).reachable_from.contains(b2));
        assert!(!graph.block(b0).reachable_from.contains(b3));
    }

    #[test]
    fn rpo_starts_at_entry() {
        let (graph, [b0, b1, b2, b3, b4]) = diamond();
        let order = reverse_postorder(&graph, b0);
        assert_eq!(order[0], b0);
        assert_eq!(order.len(), 5);
        let pos = |b: Block| order.iter().position(|&x| x == b).expect("missing block");
        assert!(pos(b1) < pos(b3));
        assert!(pos(b2) < pos(b3));
        assert!(pos(b3) < pos(b4));
    }
}
