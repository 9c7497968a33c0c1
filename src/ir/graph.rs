//! The HIR graph: instruction and block arenas and the edges between them.
//!
//! All IR objects live in entity-indexed arenas for the lifetime of one
//! compilation and are freed en masse; argument, use, and effect edges are
//! intrusive lists inside the shared pool. Every function root of the unit
//! (the script body plus nested function literals) shares these arenas.

use crate::ir::entities::{Block, FuncRef, Inst};
use crate::ir::env::Environment;
use crate::ir::instructions::{InstructionData, Opcode, Payload};
use crate::ir::repr::Representation;
use crate::root::{Constant, Root};
use crate::scope::ScopeSlot;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::{EntitySet, ListPool, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

/// DFS number of a block no enumeration has reached.
pub const UNVISITED: u32 = u32::MAX;

/// A control-flow graph node.
pub struct BlockData {
    /// Ordered instruction body. Phis live in `phis`, not here.
    pub insts: Vec<Inst>,
    /// Control-flow merges at the top of the block, one argument per
    /// predecessor in predecessor order.
    pub phis: Vec<Inst>,
    preds: SmallVec<[Block; 2]>,
    succs: SmallVec<[Block; 2]>,
    /// Slot state at the current end of the block.
    pub env: Environment,
    ended: bool,
    loop_header: bool,
    /// Number of loops enclosing the block.
    pub loop_depth: u32,
    /// Entry block of the compilation root that owns this block.
    pub root: PackedOption<Block>,

    // Dominator algorithm augmentation.
    pub(crate) parent: PackedOption<Block>,
    pub(crate) ancestor: PackedOption<Block>,
    pub(crate) label: PackedOption<Block>,
    pub(crate) semi: PackedOption<Block>,
    /// Preorder number assigned by the dominator DFS; [`UNVISITED`] while
    /// the block has not been reached.
    pub dfs_id: u32,
    /// Immediate dominator; none for roots and unreachable blocks.
    pub dominator: PackedOption<Block>,
    /// Depth in the dominator tree; roots are at zero.
    pub dominator_depth: u32,
    /// Blocks whose immediate dominator is this block.
    pub dominates: Vec<Block>,
    /// Blocks this one is reachable from, itself included.
    pub reachable_from: EntitySet<Block>,
}

impl BlockData {
    fn new(stack_slots: u32, loop_depth: u32) -> Self {
        Self {
            insts: Vec::new(),
            phis: Vec::new(),
            preds: SmallVec::new(),
            succs: SmallVec::new(),
            env: Environment::new(stack_slots),
            ended: false,
            loop_header: false,
            loop_depth,
            root: PackedOption::default(),
            parent: PackedOption::default(),
            ancestor: PackedOption::default(),
            label: PackedOption::default(),
            semi: PackedOption::default(),
            dfs_id: UNVISITED,
            dominator: PackedOption::default(),
            dominator_depth: 0,
            dominates: Vec::new(),
            reachable_from: EntitySet::new(),
        }
    }

    /// Predecessor blocks, in edge order.
    pub fn preds(&self) -> &[Block] {
        &self.preds
    }

    /// Successor blocks, in edge order.
    pub fn succs(&self) -> &[Block] {
        &self.succs
    }

    /// Has a terminator been added?
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Was this block closed as a loop header?
    pub fn is_loop(&self) -> bool {
        self.loop_header
    }
}

/// Data about one compilation root.
pub struct FunctionData {
    /// Entry block, set once the root has been built.
    pub entry: PackedOption<Block>,
    /// Declared parameter count.
    pub arg_count: u32,
    /// Context slots the frame exposes to closures.
    pub context_slots: u32,
}

/// The HIR of one compilation unit.
pub struct Graph {
    insts: PrimaryMap<Inst, InstructionData>,
    blocks: PrimaryMap<Block, BlockData>,
    pool: ListPool<Inst>,
    /// Compilation roots in discovery order; the script body is first.
    pub functions: PrimaryMap<FuncRef, FunctionData>,
    /// Entry blocks of the roots, in the same order.
    pub roots: Vec<Block>,
    /// Interned constants.
    pub constants: Root,
    reprs: SecondaryMap<Inst, Representation>,
}

impl Graph {
    /// An empty graph.
    pub fn new() -> Self {
        Self {
            insts: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            pool: ListPool::new(),
            functions: PrimaryMap::new(),
            roots: Vec::new(),
            constants: Root::new(),
            reprs: SecondaryMap::with_default(Representation::HOLE),
        }
    }

    /// Number of instructions ever created, removed ones included.
    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// Number of blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate over every instruction reference, removed ones included.
    pub fn insts(&self) -> impl Iterator<Item = Inst> {
        self.insts.keys()
    }

    /// Iterate over every block reference.
    pub fn blocks(&self) -> impl Iterator<Item = Block> {
        self.blocks.keys()
    }

    /// Immutable instruction data.
    pub fn inst(&self, inst: Inst) -> &InstructionData {
        &self.insts[inst]
    }

    /// Mutable instruction data.
    pub fn inst_mut(&mut self, inst: Inst) -> &mut InstructionData {
        &mut self.insts[inst]
    }

    /// Immutable block data.
    pub fn block(&self, block: Block) -> &BlockData {
        &self.blocks[block]
    }

    /// Mutable block data.
    pub fn block_mut(&mut self, block: Block) -> &mut BlockData {
        &mut self.blocks[block]
    }

    /// The instruction's opcode.
    pub fn opcode(&self, inst: Inst) -> Opcode {
        self.insts[inst].opcode
    }

    /// The instruction's home block.
    pub fn block_of(&self, inst: Inst) -> Block {
        self.insts[inst].block.expand().expect("instruction not placed in a block")
    }

    /// Ordered data-flow inputs.
    pub fn args(&self, inst: Inst) -> &[Inst] {
        self.insts[inst].args.as_slice(&self.pool)
    }

    /// Instructions using `inst` as an argument, one entry per edge.
    pub fn uses(&self, inst: Inst) -> &[Inst] {
        self.insts[inst].uses.as_slice(&self.pool)
    }

    /// Effect emitters `inst` depends on.
    pub fn effects_in(&self, inst: Inst) -> &[Inst] {
        self.insts[inst].effects_in.as_slice(&self.pool)
    }

    /// Later instructions whose execution invalidates `inst`.
    pub fn effects_out(&self, inst: Inst) -> &[Inst] {
        self.insts[inst].effects_out.as_slice(&self.pool)
    }

    /// Was `inst` removed by a pass?
    pub fn is_removed(&self, inst: Inst) -> bool {
        self.insts[inst].removed
    }

    /// Is `inst` pinned to its block?
    pub fn is_pinned(&self, inst: Inst) -> bool {
        self.insts[inst].pinned
    }

    /// Follow replacement forwarding to the live instruction standing in
    /// for `inst` today.
    pub fn resolve(&self, inst: Inst) -> Inst {
        let mut cur = inst;
        while let Some(next) = self.insts[cur].replacement.expand() {
            cur = next;
        }
        cur
    }

    /// Position of `inst` in its home block's body list.
    pub fn position_in_block(&self, inst: Inst) -> Option<usize> {
        let block = self.insts[inst].block.expand()?;
        self.blocks[block].insts.iter().position(|&i| i == inst)
    }

    // ---- Construction ------------------------------------------------

    /// Create an empty block for a frame with `stack_slots` slots.
    pub fn make_block(&mut self, stack_slots: u32, loop_depth: u32) -> Block {
        self.blocks.push(BlockData::new(stack_slots, loop_depth))
    }

    /// Create an unplaced instruction.
    pub fn make_inst(&mut self, opcode: Opcode, payload: Payload, slot: Option<ScopeSlot>) -> Inst {
        self.insts.push(InstructionData::new(opcode, payload, slot))
    }

    /// Append a new instruction with `args` to `block`.
    pub fn add(
        &mut self,
        block: Block,
        opcode: Opcode,
        payload: Payload,
        slot: Option<ScopeSlot>,
        args: &[Inst],
    ) -> Inst {
        debug_assert!(!self.blocks[block].ended, "adding to an ended block");
        let inst = self.make_inst(opcode, payload, slot);
        self.insts[inst].block = block.into();
        for &arg in args {
            self.add_arg(inst, arg);
        }
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Append an argument edge and its reverse use edge.
    pub fn add_arg(&mut self, inst: Inst, arg: Inst) {
        self.insts[inst].args.push(arg, &mut self.pool);
        self.insts[arg].uses.push(inst, &mut self.pool);
    }

    /// Intern `constant` and return its slot.
    pub fn intern(&mut self, constant: Constant) -> ScopeSlot {
        self.constants.put(constant)
    }

    // ---- CFG wiring --------------------------------------------------

    /// Terminate `from` with an unconditional branch to `target`.
    pub fn goto(&mut self, from: Block, target: Block) -> Inst {
        let inst = self.add(from, Opcode::Goto, Payload::None, None, &[]);
        self.blocks[from].ended = true;
        self.add_successor(from, target);
        inst
    }

    /// Terminate `from` with a conditional branch; successors are `t` then
    /// `f`.
    pub fn branch(&mut self, from: Block, cond: Inst, t: Block, f: Block) -> Inst {
        let inst = self.add(from, Opcode::If, Payload::None, None, &[cond]);
        self.blocks[from].ended = true;
        self.add_successor(from, t);
        self.add_successor(from, f);
        inst
    }

    /// Terminate `from` with a return of `value`.
    pub fn ret(&mut self, from: Block, value: Inst) -> Inst {
        let inst = self.add(from, Opcode::Return, Payload::None, None, &[value]);
        self.blocks[from].ended = true;
        inst
    }

    fn add_successor(&mut self, from: Block, to: Block) {
        debug_assert!(self.blocks[from].succs.len() < 2, "block successor overflow");
        self.blocks[from].succs.push(to);
        self.add_predecessor(to, from);
    }

    /// Wire a predecessor edge, seeding or merging the target's
    /// environment. The first predecessor's environment is copied; a second
    /// predecessor merges slot by slot, creating a phi wherever the
    /// definitions disagree.
    fn add_predecessor(&mut self, to: Block, from: Block) {
        debug_assert!(self.blocks[to].preds.len() < 2, "block predecessor overflow");
        self.blocks[to].preds.push(from);

        if self.blocks[to].preds.len() == 1 {
            let env = self.blocks[from].env.clone();
            self.blocks[to].env.copy_from(&env);
            return;
        }

        for index in 0..self.blocks[to].env.len() {
            let curr = self.blocks[from].env.get(index);
            let old = self.blocks[to].env.get(index);

            // An open phi collects every incoming definition, the block's
            // own phi included, so phi arity tracks predecessor count.
            if let Some(phi) = self.blocks[to].env.phi(index) {
                let input = curr.unwrap_or(phi);
                self.phi_add_input(phi, input);
                continue;
            }

            match (old, curr) {
                (Some(old), Some(curr)) if old != curr => {
                    let phi = self.create_phi(to, ScopeSlot::stack(index as u32));
                    self.phi_add_input(phi, old);
                    self.phi_add_input(phi, curr);
                    self.blocks[to].env.set(index, phi);
                    self.blocks[to].env.set_phi(index, phi);
                }
                (Some(_), Some(_)) => {}
                // A slot defined on only one path is undefined at the
                // merge; a later read materializes nil.
                (Some(_), None) => self.blocks[to].env.clear(index),
                (None, _) => {}
            }
        }
    }

    /// Create a phi merging `slot` at the top of `block`.
    pub fn create_phi(&mut self, block: Block, slot: ScopeSlot) -> Inst {
        let phi = self.make_inst(Opcode::Phi, Payload::None, Some(slot));
        self.insts[phi].block = block.into();
        self.blocks[block].phis.push(phi);
        phi
    }

    /// Append an input to a phi.
    pub fn phi_add_input(&mut self, phi: Inst, input: Inst) {
        debug_assert_eq!(self.opcode(phi), Opcode::Phi);
        debug_assert!(self.args(phi).len() < 2, "phi input overflow");
        self.add_arg(phi, input);
    }

    /// Open a phi for every live slot, so a loop body entered next sees a
    /// merge candidate instead of the pre-loop definition.
    pub fn mark_pre_loop(&mut self, block: Block) {
        for index in 0..self.blocks[block].env.len() {
            let def = match self.blocks[block].env.get(index) {
                Some(def) => def,
                None => continue,
            };
            let phi = self.create_phi(block, ScopeSlot::stack(index as u32));
            self.phi_add_input(phi, def);
            self.blocks[block].env.set(index, phi);
            self.blocks[block].env.set_phi(index, phi);
        }
    }

    /// Close `block` as a loop header once its back edge has been wired.
    pub fn mark_loop(&mut self, block: Block) {
        debug_assert!(self.blocks[block].preds.len() >= 2, "loop header without a back edge");
        self.blocks[block].loop_header = true;
    }

    // ---- SSA edits ---------------------------------------------------

    /// Rewrite one argument edge of `user` from `old` to `new`,
    /// transferring the reverse use edge.
    pub fn replace_arg(&mut self, user: Inst, old: Inst, new: Inst) {
        let pos = match self.args(user).iter().position(|&a| a == old) {
            Some(pos) => pos,
            None => return,
        };
        self.insts[user].args.as_mut_slice(&mut self.pool)[pos] = new;
        self.remove_use(old, user);
        self.insts[new].uses.push(user, &mut self.pool);
    }

    /// Replace every use of `old` with `new`, leaving `old` without uses
    /// and forwarding future lookups to `new`.
    pub fn replace_uses(&mut self, old: Inst, new: Inst) {
        debug_assert_ne!(old, new);
        while let Some(&user) = self.uses(old).first() {
            self.replace_arg(user, old, new);
        }
        self.insts[old].replacement = new.into();
    }

    /// Unlink `inst` entirely: drop its argument edges, detach it from its
    /// block, and mark it removed.
    pub fn remove(&mut self, inst: Inst) {
        let args: SmallVec<[Inst; 4]> = self.args(inst).iter().copied().collect();
        self.insts[inst].args.clear(&mut self.pool);
        for arg in args {
            self.remove_use(arg, inst);
        }
        self.insts[inst].removed = true;
        if let Some(block) = self.insts[inst].block.expand() {
            self.blocks[block].insts.retain(|&i| i != inst);
            self.blocks[block].phis.retain(|&i| i != inst);
        }
    }

    /// Remove one reverse use edge `def -> user`.
    fn remove_use(&mut self, def: Inst, user: Inst) {
        let mut items: SmallVec<[Inst; 4]> = self.uses(def).iter().copied().collect();
        if let Some(pos) = items.iter().position(|&u| u == user) {
            items.remove(pos);
            self.insts[def].uses.clear(&mut self.pool);
            for item in items {
                self.insts[def].uses.push(item, &mut self.pool);
            }
        }
    }

    // ---- Effect edges ------------------------------------------------

    /// Record that `inst` depends on the emitter `emitter`.
    pub fn push_effect_in(&mut self, inst: Inst, emitter: Inst) {
        self.insts[inst].effects_in.push(emitter, &mut self.pool);
    }

    /// Record that `later` invalidates `inst`.
    pub fn push_effect_out(&mut self, inst: Inst, later: Inst) {
        self.insts[inst].effects_out.push(later, &mut self.pool);
    }

    /// Drop both effect lists of `inst`.
    pub fn clear_effects(&mut self, inst: Inst) {
        self.insts[inst].effects_in.clear(&mut self.pool);
        self.insts[inst].effects_out.clear(&mut self.pool);
    }

    // ---- Representation ----------------------------------------------

    /// The cached representation of `inst`, computing it on first use.
    pub fn representation(&mut self, inst: Inst) -> Representation {
        let cached = self.reprs[inst];
        if cached != Representation::HOLE {
            return cached;
        }
        // Cycle guard: a loop phi meeting its own representation must see
        // the identity of the meet.
        self.reprs[inst] = Representation::ANY;
        let repr = self.compute_representation(inst);
        self.reprs[inst] = repr;
        repr
    }

    fn compute_representation(&mut self, inst: Inst) -> Representation {
        use Opcode::*;
        match self.opcode(inst) {
            Nil => Representation::NIL,
            Literal => {
                let slot = self.insts[inst].slot.expect("literal without a root slot");
                match *self.constants.get(slot) {
                    Constant::Number(_) => {
                        if self.constants.is_smi(slot) {
                            Representation::SMI
                        } else {
                            Representation::HEAP_NUMBER
                        }
                    }
                    Constant::Str(_) | Constant::Property(_) => Representation::STRING,
                    Constant::True | Constant::False => Representation::BOOLEAN,
                    Constant::Nil => Representation::NIL,
                }
            }
            Phi => {
                let args: SmallVec<[Inst; 2]> = self.args(inst).iter().copied().collect();
                let mut repr = Representation::ANY;
                for arg in args {
                    repr &= self.representation(arg);
                }
                repr
            }
            BinOp => {
                let kind = match self.insts[inst].payload {
                    Payload::BinOp(kind) => kind,
                    _ => panic!("BinOp without operator payload"),
                };
                let args: SmallVec<[Inst; 2]> = self.args(inst).iter().copied().collect();
                debug_assert_eq!(args.len(), 2);
                let left = self.representation(args[0]);
                let right = self.representation(args[1]);
                if kind.is_binary() {
                    Representation::SMI
                } else if kind.is_logic() || kind.is_bool_logic() {
                    Representation::BOOLEAN
                } else if kind.is_math() {
                    if kind != crate::ast::BinOpKind::Add {
                        Representation::NUMBER
                    } else if (left | right).intersects(Representation::STRING) {
                        // "123" + any, or any + "123"
                        Representation::STRING
                    } else {
                        let mask = Representation::SMI
                            | Representation::HEAP_NUMBER
                            | Representation::NIL;
                        left & right & mask
                    }
                } else {
                    Representation::unknown()
                }
            }
            Not => Representation::BOOLEAN,
            Typeof => Representation::STRING,
            Sizeof => Representation::SMI,
            Keysof => Representation::ARRAY,
            Clone => Representation::OBJECT,
            AllocateObject => Representation::OBJECT,
            AllocateArray => Representation::ARRAY,
            Function => Representation::FUNCTION,
            LoadVarArg => Representation::ARRAY,
            StoreContext => {
                let args: SmallVec<[Inst; 1]> = self.args(inst).iter().copied().collect();
                debug_assert_eq!(args.len(), 1);
                self.representation(args[0])
            }
            StoreProperty => {
                // A store evaluates to the stored value.
                let args: SmallVec<[Inst; 4]> = self.args(inst).iter().copied().collect();
                debug_assert_eq!(args.len(), 3);
                self.representation(args[2])
            }
            _ => Representation::unknown(),
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
