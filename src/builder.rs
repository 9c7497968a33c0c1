//! SSA construction from the front-end AST.
//!
//! A preorder walk emits instructions into the current block, records stack
//! definitions in per-block environments, and creates merge phis on demand
//! at join points: when two predecessors reach a block with divergent
//! definitions for a slot, the block grows a phi. Loops first open phis for
//! every live slot (`mark_pre_loop`), then receive their second input when
//! the back edge completes. Full dominance-frontier insertion is not
//! needed; `prune_phis` removes the phis this strategy over-creates.
//!
//! Nested function literals are queued and built as separate compilation
//! roots sharing the unit's arenas.

use crate::ast::{AstNode, BinOpKind, FunctionLiteral, UnOpKind};
use crate::ir::instructions::{array_alloc_size, object_alloc_size};
use crate::ir::{Block, FunctionData, Graph, Inst, Opcode, Payload};
use crate::root::Constant;
use crate::scope::ScopeSlot;
use cranelift_entity::packed_option::PackedOption;
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Break and continue landing blocks of the innermost loop.
#[derive(Default)]
struct LoopInfo {
    break_blocks: Vec<Block>,
    continue_blocks: Vec<Block>,
}

/// Builds the HIR graph of one compilation unit.
pub struct HirBuilder<'a> {
    graph: Graph,
    current_block: PackedOption<Block>,
    current_root: PackedOption<Block>,
    loop_depth: u32,
    stack_slots: u32,
    loops: Vec<LoopInfo>,
    queue: VecDeque<(crate::ir::FuncRef, &'a FunctionLiteral)>,
}

impl<'a> HirBuilder<'a> {
    /// Build the HIR for `script` and every function literal nested in it.
    pub fn build(script: &'a FunctionLiteral) -> Graph {
        let mut builder = HirBuilder {
            graph: Graph::new(),
            current_block: PackedOption::default(),
            current_root: PackedOption::default(),
            loop_depth: 0,
            stack_slots: 0,
            loops: Vec::new(),
            queue: VecDeque::new(),
        };
        let root = builder.graph.functions.push(FunctionData {
            entry: PackedOption::default(),
            arg_count: script.params.len() as u32,
            context_slots: script.context_slots,
        });
        builder.queue.push_back((root, script));
        while let Some((func, lit)) = builder.queue.pop_front() {
            builder.build_root(func, lit);
        }
        builder.graph
    }

    fn build_root(&mut self, func: crate::ir::FuncRef, lit: &'a FunctionLiteral) {
        self.stack_slots = lit.stack_slots;
        self.loop_depth = 0;
        debug_assert!(self.loops.is_empty());

        let entry = self.graph.make_block(lit.stack_slots, 0);
        self.graph.block_mut(entry).root = entry.into();
        self.current_root = entry.into();
        self.current_block = entry.into();
        self.graph.functions[func].entry = entry.into();
        self.graph.roots.push(entry);

        self.add(
            Opcode::Entry,
            Payload::Entry {
                func,
                context_slots: lit.context_slots,
            },
            None,
            &[],
        );
        for (position, &slot) in lit.params.iter().enumerate() {
            let index = self.number_literal(position as f64);
            let arg = self.add(Opcode::LoadArg, Payload::None, None, &[index]);
            self.assign(slot, arg);
        }
        if let Some(rest) = lit.rest {
            let index = self.number_literal(lit.params.len() as f64);
            let surplus = self.add(Opcode::LoadVarArg, Payload::None, None, &[index]);
            self.assign(rest, surplus);
        }

        self.visit_body(&lit.body);

        if !self.graph.block(self.cur()).is_ended() {
            let nil = self.add(Opcode::Nil, Payload::None, None, &[]);
            self.graph.ret(self.cur(), nil);
        }
    }

    // ---- Helpers -----------------------------------------------------

    fn cur(&self) -> Block {
        self.current_block.expand().expect("no current block")
    }

    fn add(&mut self, opcode: Opcode, payload: Payload, slot: Option<ScopeSlot>, args: &[Inst]) -> Inst {
        let block = self.cur();
        self.graph.add(block, opcode, payload, slot, args)
    }

    fn create_block_at(&mut self, loop_depth: u32) -> Block {
        let block = self.graph.make_block(self.stack_slots, loop_depth);
        self.graph.block_mut(block).root = self.current_root;
        block
    }

    fn create_block(&mut self) -> Block {
        self.create_block_at(self.loop_depth)
    }

    /// Join two open blocks in a fresh merge block.
    fn join(&mut self, left: Block, right: Block) -> Block {
        let join = self.create_block();
        self.graph.goto(left, join);
        self.graph.goto(right, join);
        join
    }

    fn number_literal(&mut self, value: f64) -> Inst {
        let slot = self.graph.intern(Constant::number(value));
        self.add(Opcode::Literal, Payload::None, Some(slot), &[])
    }

    /// Current definition of a slot, materializing nil for the first read
    /// of a slot nothing has defined.
    fn read_value(&mut self, slot: ScopeSlot) -> Inst {
        match slot {
            ScopeSlot::Stack { index } => {
                let block = self.cur();
                match self.graph.block(block).env.get(index as usize) {
                    Some(def) => def,
                    None => {
                        let nil = self.add(Opcode::Nil, Payload::None, None, &[]);
                        self.graph.block_mut(block).env.set(index as usize, nil);
                        nil
                    }
                }
            }
            ScopeSlot::Context { .. } => self.add(Opcode::LoadContext, Payload::None, Some(slot), &[]),
            ScopeSlot::Immediate { .. } => self.add(Opcode::Literal, Payload::None, Some(slot), &[]),
        }
    }

    /// Record `value` as the definition of `slot`.
    fn assign(&mut self, slot: ScopeSlot, value: Inst) -> Inst {
        match slot {
            ScopeSlot::Stack { index } => {
                let block = self.cur();
                self.graph.block_mut(block).env.set(index as usize, value);
                value
            }
            ScopeSlot::Context { .. } => {
                self.add(Opcode::StoreContext, Payload::None, Some(slot), &[value])
            }
            ScopeSlot::Immediate { .. } => panic!("assignment to a constant slot"),
        }
    }

    // ---- Statements --------------------------------------------------

    fn visit_body(&mut self, body: &'a [AstNode]) {
        for stmt in body {
            if self.graph.block(self.cur()).is_ended() {
                break;
            }
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &'a AstNode) {
        match stmt {
            AstNode::If(cond, then_body, else_body) => {
                self.visit_if(cond, then_body, else_body.as_deref())
            }
            AstNode::While(cond, body) => self.visit_while(cond, body),
            AstNode::Break => self.visit_break(),
            AstNode::Continue => self.visit_continue(),
            AstNode::Return(value) => self.visit_return(value.as_deref()),
            _ => {
                self.visit_expr(stmt);
            }
        }
    }

    fn visit_if(&mut self, cond: &'a AstNode, then_body: &'a [AstNode], else_body: Option<&'a [AstNode]>) {
        let cond = self.visit_expr(cond);
        let on_true = self.create_block();
        let on_false = self.create_block();
        self.graph.branch(self.cur(), cond, on_true, on_false);

        self.current_block = on_true.into();
        self.visit_body(then_body);
        let true_end = if self.graph.block(self.cur()).is_ended() {
            None
        } else {
            Some(self.cur())
        };

        self.current_block = on_false.into();
        if let Some(body) = else_body {
            self.visit_body(body);
        }
        let false_end = if self.graph.block(self.cur()).is_ended() {
            None
        } else {
            Some(self.cur())
        };

        let next = match (true_end, false_end) {
            (Some(left), Some(right)) => self.join(left, right),
            (Some(open), None) | (None, Some(open)) => {
                let join = self.create_block();
                self.graph.goto(open, join);
                join
            }
            // Both arms returned; anything that follows is unreachable.
            (None, None) => self.create_block(),
        };
        self.current_block = next.into();
    }

    fn visit_while(&mut self, cond: &'a AstNode, body: &'a [AstNode]) {
        let pre_loop = self.create_block();
        self.graph.goto(self.cur(), pre_loop);

        self.loop_depth += 1;
        let header = self.create_block();
        self.graph.goto(pre_loop, header);
        self.graph.mark_pre_loop(header);

        self.current_block = header.into();
        let cond = self.visit_expr(cond);
        let header_end = self.cur();
        let body_block = self.create_block();
        let exit = self.create_block_at(self.loop_depth - 1);
        self.graph.branch(header_end, cond, body_block, exit);

        self.loops.push(LoopInfo::default());
        self.current_block = body_block.into();
        self.visit_body(body);
        let info = self.loops.pop().expect("loop stack underflow");

        // The fall-through end and every continue merge into one back edge.
        let mut ends = info.continue_blocks;
        if !self.graph.block(self.cur()).is_ended() {
            ends.push(self.cur());
        }
        if let Some((&first, rest)) = ends.split_first() {
            let mut back = first;
            for &block in rest {
                back = self.join(back, block);
            }
            self.graph.goto(back, header);
            self.graph.mark_loop(header);
        }
        self.loop_depth -= 1;

        // Breaks chain into the exit pairwise, keeping in-degrees at two.
        let mut after = exit;
        for block in info.break_blocks {
            after = self.join(after, block);
        }
        self.current_block = after.into();
    }

    fn visit_break(&mut self) {
        let landing = self.create_block();
        self.graph.goto(self.cur(), landing);
        self.loops
            .last_mut()
            .expect("break outside of a loop")
            .break_blocks
            .push(landing);
    }

    fn visit_continue(&mut self) {
        let landing = self.create_block();
        self.graph.goto(self.cur(), landing);
        self.loops
            .last_mut()
            .expect("continue outside of a loop")
            .continue_blocks
            .push(landing);
    }

    fn visit_return(&mut self, value: Option<&'a AstNode>) {
        let result = match value {
            Some(value) => self.visit_expr(value),
            None => self.add(Opcode::Nil, Payload::None, None, &[]),
        };
        self.graph.ret(self.cur(), result);
    }

    // ---- Expressions -------------------------------------------------

    fn visit_expr(&mut self, expr: &'a AstNode) -> Inst {
        match expr {
            AstNode::Nil => self.add(Opcode::Nil, Payload::None, None, &[]),
            AstNode::True => {
                let slot = self.graph.intern(Constant::True);
                self.add(Opcode::Literal, Payload::None, Some(slot), &[])
            }
            AstNode::False => {
                let slot = self.graph.intern(Constant::False);
                self.add(Opcode::Literal, Payload::None, Some(slot), &[])
            }
            AstNode::Number(value) => self.number_literal(*value),
            AstNode::Str(value) => {
                let slot = self.graph.intern(Constant::Str(value.clone()));
                self.add(Opcode::Literal, Payload::None, Some(slot), &[])
            }
            AstNode::Property(name) => {
                let slot = self.graph.intern(Constant::Property(name.clone()));
                self.add(Opcode::Literal, Payload::None, Some(slot), &[])
            }
            AstNode::Value(slot) => self.read_value(*slot),
            AstNode::Assign(target, value) => self.visit_assign(target, value),
            AstNode::BinOp(kind, left, right) => {
                if kind.is_bool_logic() {
                    self.visit_logic(*kind, left, right)
                } else {
                    let left = self.visit_expr(left);
                    let right = self.visit_expr(right);
                    self.add(Opcode::BinOp, Payload::BinOp(*kind), None, &[left, right])
                }
            }
            AstNode::UnOp(kind, operand) => self.visit_unop(*kind, operand),
            AstNode::Member(object, property) => {
                let object = self.visit_expr(object);
                let property = self.visit_expr(property);
                self.add(Opcode::LoadProperty, Payload::None, None, &[object, property])
            }
            AstNode::ObjectLiteral(entries) => {
                let size = object_alloc_size(entries.len() as u32);
                let object = self.add(Opcode::AllocateObject, Payload::Alloc { size }, None, &[]);
                for (key, value) in entries {
                    let key = self.visit_expr(key);
                    let value = self.visit_expr(value);
                    self.add(Opcode::StoreProperty, Payload::None, None, &[object, key, value]);
                }
                object
            }
            AstNode::ArrayLiteral(items) => {
                let size = array_alloc_size(items.len() as u32);
                let array = self.add(Opcode::AllocateArray, Payload::Alloc { size }, None, &[]);
                for (position, item) in items.iter().enumerate() {
                    let key = self.number_literal(position as f64);
                    let value = self.visit_expr(item);
                    self.add(Opcode::StoreProperty, Payload::None, None, &[array, key, value]);
                }
                array
            }
            AstNode::Function(lit) => {
                let arg_count = lit.params.len() as u32;
                let func = self.graph.functions.push(FunctionData {
                    entry: PackedOption::default(),
                    arg_count,
                    context_slots: lit.context_slots,
                });
                self.queue.push_back((func, &**lit));
                self.add(Opcode::Function, Payload::Function { func, arg_count }, None, &[])
            }
            AstNode::Call(callee, args) => self.visit_call(callee, args),
            AstNode::Spread(_) => panic!("spread outside of a call argument list"),
            AstNode::CollectGarbage => self.add(Opcode::CollectGarbage, Payload::None, None, &[]),
            AstNode::GetStackTrace => self.add(Opcode::GetStackTrace, Payload::None, None, &[]),
            AstNode::Typeof(operand) => {
                let operand = self.visit_expr(operand);
                self.add(Opcode::Typeof, Payload::None, None, &[operand])
            }
            AstNode::Sizeof(operand) => {
                let operand = self.visit_expr(operand);
                self.add(Opcode::Sizeof, Payload::None, None, &[operand])
            }
            AstNode::Keysof(operand) => {
                let operand = self.visit_expr(operand);
                self.add(Opcode::Keysof, Payload::None, None, &[operand])
            }
            AstNode::Clone(operand) => {
                let operand = self.visit_expr(operand);
                self.add(Opcode::Clone, Payload::None, None, &[operand])
            }
            AstNode::Delete(target) => match &**target {
                AstNode::Member(object, property) => {
                    let object = self.visit_expr(object);
                    let property = self.visit_expr(property);
                    self.add(Opcode::DeleteProperty, Payload::None, None, &[object, property])
                }
                _ => panic!("delete of a non-member expression"),
            },
            AstNode::If(..) | AstNode::While(..) | AstNode::Break | AstNode::Continue
            | AstNode::Return(_) => panic!("statement in expression position"),
        }
    }

    fn visit_assign(&mut self, target: &'a AstNode, value: &'a AstNode) -> Inst {
        match target {
            AstNode::Value(slot) => {
                let value = self.visit_expr(value);
                self.assign(*slot, value)
            }
            AstNode::Member(object, property) => {
                let value = self.visit_expr(value);
                let object = self.visit_expr(object);
                let property = self.visit_expr(property);
                self.add(
                    Opcode::StoreProperty,
                    Payload::None,
                    None,
                    &[object, property, value],
                )
            }
            _ => panic!("invalid assignment target"),
        }
    }

    fn visit_unop(&mut self, kind: UnOpKind, operand: &'a AstNode) -> Inst {
        match kind {
            UnOpKind::Not => {
                let operand = self.visit_expr(operand);
                self.add(Opcode::Not, Payload::None, None, &[operand])
            }
            UnOpKind::Plus | UnOpKind::Minus => {
                let op = if kind == UnOpKind::Plus {
                    BinOpKind::Add
                } else {
                    BinOpKind::Sub
                };
                let zero = self.number_literal(0.0);
                let operand = self.visit_expr(operand);
                self.add(Opcode::BinOp, Payload::BinOp(op), None, &[zero, operand])
            }
            UnOpKind::PreInc | UnOpKind::PreDec | UnOpKind::PostInc | UnOpKind::PostDec => {
                self.visit_inc_dec(kind, operand)
            }
        }
    }

    fn visit_inc_dec(&mut self, kind: UnOpKind, target: &'a AstNode) -> Inst {
        let (op, post) = match kind {
            UnOpKind::PreInc => (BinOpKind::Add, false),
            UnOpKind::PreDec => (BinOpKind::Sub, false),
            UnOpKind::PostInc => (BinOpKind::Add, true),
            UnOpKind::PostDec => (BinOpKind::Sub, true),
            _ => unreachable!(),
        };
        match target {
            AstNode::Value(slot) => {
                let old = self.read_value(*slot);
                let one = self.number_literal(1.0);
                let new = self.add(Opcode::BinOp, Payload::BinOp(op), None, &[old, one]);
                self.assign(*slot, new);
                if post {
                    old
                } else {
                    new
                }
            }
            AstNode::Member(object, property) => {
                let object = self.visit_expr(object);
                let property = self.visit_expr(property);
                let old = self.add(Opcode::LoadProperty, Payload::None, None, &[object, property]);
                let one = self.number_literal(1.0);
                let new = self.add(Opcode::BinOp, Payload::BinOp(op), None, &[old, one]);
                self.add(
                    Opcode::StoreProperty,
                    Payload::None,
                    None,
                    &[object, property, new],
                );
                if post {
                    old
                } else {
                    new
                }
            }
            _ => panic!("invalid increment target"),
        }
    }

    /// Short-circuit `&&` / `||`: branch on the left value and merge the
    /// result through the logic slot, so the merged value is an ordinary
    /// slot phi.
    fn visit_logic(&mut self, kind: BinOpKind, left: &'a AstNode, right: &'a AstNode) -> Inst {
        let left = self.visit_expr(left);
        let block = self.cur();
        let logic_index = self.graph.block(block).env.len() - 1;
        self.graph.block_mut(block).env.set(logic_index, left);

        let on_true = self.create_block();
        let on_false = self.create_block();
        self.graph.branch(self.cur(), left, on_true, on_false);

        // `&&` evaluates the right side when the left is true; `||` when it
        // is false. The other arm keeps the left value.
        let (eval, keep) = if kind == BinOpKind::LAnd {
            (on_true, on_false)
        } else {
            (on_false, on_true)
        };
        self.current_block = eval.into();
        let right = self.visit_expr(right);
        let eval_end = self.cur();
        self.graph.block_mut(eval_end).env.set(logic_index, right);

        let join = self.join(eval_end, keep);
        self.current_block = join.into();
        self.graph
            .block(join)
            .env
            .get(logic_index)
            .expect("logic slot lost at merge")
    }

    fn visit_call(&mut self, callee: &'a AstNode, args: &'a [AstNode]) -> Inst {
        let callee = self.visit_expr(callee);
        let argc = self.number_literal(args.len() as f64);
        self.add(Opcode::AlignStack, Payload::None, None, &[argc]);

        let mut values: SmallVec<[(bool, Inst); 8]> = SmallVec::new();
        for arg in args {
            match arg {
                AstNode::Spread(inner) => values.push((true, self.visit_expr(inner))),
                _ => values.push((false, self.visit_expr(arg))),
            }
        }
        // Arguments are pushed in reverse so positional indices match the
        // argument stack layout.
        for &(spread, value) in values.iter().rev() {
            let opcode = if spread {
                Opcode::StoreVarArg
            } else {
                Opcode::StoreArg
            };
            self.add(opcode, Payload::None, None, &[value]);
        }
        self.add(Opcode::Call, Payload::None, None, &[callee, argc])
    }
}
