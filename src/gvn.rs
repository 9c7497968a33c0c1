//! Global value numbering.
//!
//! A pre-order traversal of the dominator tree keeps a scoped table of live
//! expressions: entries inserted in a block are popped when its dominator
//! subtree is left, so lookups only ever see dominating expressions.
//! Congruent instructions collapse onto the dominating instance.
//!
//! Instructions hash structurally — opcode folded with argument hashes
//! through a Jenkins-style mixer, with a cycle guard for phi loops — and
//! collide into candidate buckets compared by `is_equal`: exact argument
//! identity, opcode payload, and, for memory readers, identical in-effect
//! sets. An in-effect from an argument push means the object escaped, which
//! forces inequality. Literals with one root slot are congruent regardless
//! of block; closures never are.

use crate::ir::{Graph, Inst, Opcode, Payload};
use cranelift_entity::{EntitySet, SecondaryMap};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// A hash-keyed multimap of live expressions with per-block scopes.
///
/// Insertions are journaled; leaving a scope pops the journal back to the
/// scope's savepoint so only dominating entries stay visible.
struct ScopedValueTable {
    buckets: FxHashMap<u32, SmallVec<[Inst; 2]>>,
    journal: Vec<(u32, Inst)>,
    scopes: Vec<usize>,
}

impl ScopedValueTable {
    fn new() -> Self {
        Self {
            buckets: FxHashMap::default(),
            journal: Vec::new(),
            scopes: Vec::new(),
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(self.journal.len());
    }

    fn leave_scope(&mut self) {
        let mark = self.scopes.pop().expect("scope stack underflow");
        while self.journal.len() > mark {
            let (hash, inst) = self.journal.pop().expect("journal lost an entry");
            let bucket = self.buckets.get_mut(&hash).expect("journal out of sync");
            let position = bucket
                .iter()
                .rposition(|&candidate| candidate == inst)
                .expect("journal out of sync");
            bucket.remove(position);
        }
    }

    fn insert(&mut self, hash: u32, inst: Inst) {
        self.buckets.entry(hash).or_default().push(inst);
        self.journal.push((hash, inst));
    }

    fn find(&self, hash: u32, mut eq: impl FnMut(Inst) -> bool) -> Option<Inst> {
        self.buckets
            .get(&hash)?
            .iter()
            .copied()
            .find(|&candidate| eq(candidate))
    }
}

/// Structural hash with a cycle guard: an instruction being hashed reports
/// a fixed placeholder to recursive visits through phi loops.
fn hash_inst(
    graph: &Graph,
    inst: Inst,
    cache: &mut SecondaryMap<Inst, u32>,
    hashed: &mut EntitySet<Inst>,
) -> u32 {
    if hashed.contains(inst) {
        return cache[inst];
    }
    hashed.insert(inst);
    cache[inst] = 0xffff;

    // Jenkins mix over [opcode] [hash of input 1] ... [hash of input N].
    let mut r: u32 = graph.opcode(inst) as u32 & 0xff;
    r = r.wrapping_add(r << 10);
    r ^= r >> 6;

    let args: SmallVec<[Inst; 4]> = graph.args(inst).iter().copied().collect();
    for arg in args {
        let mut arg_hash = hash_inst(graph, arg, cache, hashed);
        while arg_hash != 0 {
            r = r.wrapping_add(arg_hash & 0xff);
            r = r.wrapping_add(r << 10);
            r ^= r >> 6;
            arg_hash >>= 8;
        }
    }

    r = r.wrapping_add(r << 3);
    r ^= r >> 13;
    r = r.wrapping_add(r << 15);

    cache[inst] = r;
    r
}

/// Congruence of two instructions with equal hashes.
fn is_equal(graph: &Graph, a: Inst, b: Inst) -> bool {
    if a == b {
        return true;
    }
    if graph.opcode(a) != graph.opcode(b) {
        return false;
    }
    if graph.args(a) != graph.args(b) {
        return false;
    }
    match graph.opcode(a) {
        Opcode::Literal => graph.inst(a).slot == graph.inst(b).slot,
        Opcode::BinOp => graph.inst(a).payload == graph.inst(b).payload,
        Opcode::AllocateObject | Opcode::AllocateArray => match (graph.inst(a).payload, graph.inst(b).payload) {
            (Payload::Alloc { size: sa }, Payload::Alloc { size: sb }) => sa == sb,
            _ => false,
        },
        // A closure's identity is observable.
        Opcode::Function => false,
        Opcode::LoadProperty | Opcode::Keysof | Opcode::Sizeof => has_same_effects(graph, a, b),
        _ => true,
    }
}

/// Do `a` and `b` observe the same memory? True when their in-effect sets
/// have identical membership and none of the emitters lets the object
/// escape through the argument stack.
fn has_same_effects(graph: &Graph, a: Inst, b: Inst) -> bool {
    let a_effects = graph.effects_in(a);
    let b_effects = graph.effects_in(b);
    if a_effects.len() != b_effects.len() {
        return false;
    }
    for &emitter in a_effects {
        if matches!(
            graph.opcode(emitter),
            Opcode::StoreArg | Opcode::StoreVarArg | Opcode::LoadArg | Opcode::LoadVarArg
        ) {
            return false;
        }
        if !b_effects.contains(&emitter) {
            return false;
        }
    }
    true
}

/// Run GVN over every compilation root.
pub fn do_gvn(graph: &mut Graph) {
    let mut table = ScopedValueTable::new();
    let mut cache: SecondaryMap<Inst, u32> = SecondaryMap::new();
    let mut hashed: EntitySet<Inst> = EntitySet::new();

    enum Visit {
        Enter(crate::ir::Block),
        Leave,
    }

    for root in graph.roots.clone() {
        let mut stack = vec![Visit::Enter(root)];
        while let Some(visit) = stack.pop() {
            let block = match visit {
                Visit::Enter(block) => block,
                Visit::Leave => {
                    table.leave_scope();
                    continue;
                }
            };
            table.enter_scope();
            stack.push(Visit::Leave);

            let body = graph.block(block).insts.clone();
            for inst in body {
                if graph.is_removed(inst) || graph.opcode(inst).has_gvn_side_effects() {
                    continue;
                }
                let hash = hash_inst(graph, inst, &mut cache, &mut hashed);
                match table.find(hash, |candidate| is_equal(graph, candidate, inst)) {
                    Some(prior) => {
                        debug_assert!(
                            crate::dominator_tree::dominates(graph, graph.block_of(prior), block),
                            "table entry does not dominate its lookup"
                        );
                        log::trace!("gvn: {inst} is congruent to {prior}");
                        graph.replace_uses(inst, prior);
                        graph.remove(inst);
                    }
                    None => table.insert(hash, inst),
                }
            }

            let children: SmallVec<[crate::ir::Block; 4]> =
                graph.block(block).dominates.iter().copied().collect();
            for &child in children.iter().rev() {
                stack.push(Visit::Enter(child));
            }
        }
    }
}
