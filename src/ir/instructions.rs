//! Instruction opcodes and per-instruction data.
//!
//! The opcode taxonomy is closed, so instruction behavior lives in tables
//! keyed by opcode — `has_side_effects`, `has_gvn_side_effects`,
//! `is_terminator` — plus a small tagged payload for the few opcodes that
//! carry extra data. The effect relation between opcodes lives in
//! [`effects`](crate::effects).

use crate::ast::BinOpKind;
use crate::ir::entities::{Block, FuncRef, Inst};
use crate::scope::ScopeSlot;
use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::EntityList;
use std::fmt;

/// The closed set of HIR opcodes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Opcode {
    /// No operation.
    Nop,
    /// The `nil` value.
    Nil,
    /// Function prologue.
    Entry,
    /// Return a value to the caller.
    Return,
    /// Materialize a closure for a nested function literal.
    Function,
    /// Read a positional argument.
    LoadArg,
    /// Read surplus arguments as an array.
    LoadVarArg,
    /// Push a call argument.
    StoreArg,
    /// Spread an array into the call argument stack.
    StoreVarArg,
    /// Align the stack before pushing call arguments.
    AlignStack,
    /// Read a captured variable.
    LoadContext,
    /// Write a captured variable.
    StoreContext,
    /// Read `object[key]`.
    LoadProperty,
    /// Write `object[key]`.
    StoreProperty,
    /// Delete `object[key]`.
    DeleteProperty,
    /// Conditional branch on a value.
    If,
    /// An interned constant.
    Literal,
    /// Unconditional branch.
    Goto,
    /// Boolean negation.
    Not,
    /// Binary operator.
    BinOp,
    /// Type name of a value.
    Typeof,
    /// Element count of a value.
    Sizeof,
    /// Key array of a value.
    Keysof,
    /// Shallow copy of an object.
    Clone,
    /// Function call.
    Call,
    /// The `__$gc()` runtime hook.
    CollectGarbage,
    /// The `__$trace()` runtime hook.
    GetStackTrace,
    /// Fresh object.
    AllocateObject,
    /// Fresh array.
    AllocateArray,
    /// Control-flow merge of one slot's definitions.
    Phi,
}

impl Opcode {
    /// True when the instruction is observable in program order. Such
    /// instructions are pinned: never hoisted, sunk, or deduplicated.
    pub fn has_side_effects(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Entry
                | Return
                | If
                | Goto
                | StoreContext
                | StoreProperty
                | DeleteProperty
                | StoreArg
                | StoreVarArg
                | LoadVarArg
                | AlignStack
                | Call
                | CollectGarbage
                | GetStackTrace
        )
    }

    /// True when no other instance may be considered GVN-equivalent, even
    /// though the instruction itself is schedulable: allocations produce
    /// fresh identities and context loads observe mutable state.
    pub fn has_gvn_side_effects(self) -> bool {
        use Opcode::*;
        self.has_side_effects() || matches!(self, LoadContext | AllocateObject | AllocateArray | Clone)
    }

    /// Block terminators.
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Return | Opcode::If | Opcode::Goto)
    }

    /// True when instances start out pinned to their block.
    pub fn is_pinned(self) -> bool {
        self.has_side_effects()
    }

    /// The opcode name as it appears in the textual IR.
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "Nop",
            Nil => "Nil",
            Entry => "Entry",
            Return => "Return",
            Function => "Function",
            LoadArg => "LoadArg",
            LoadVarArg => "LoadVarArg",
            StoreArg => "StoreArg",
            StoreVarArg => "StoreVarArg",
            AlignStack => "AlignStack",
            LoadContext => "LoadContext",
            StoreContext => "StoreContext",
            LoadProperty => "LoadProperty",
            StoreProperty => "StoreProperty",
            DeleteProperty => "DeleteProperty",
            If => "If",
            Literal => "Literal",
            Goto => "Goto",
            Not => "Not",
            BinOp => "BinOp",
            Typeof => "Typeof",
            Sizeof => "Sizeof",
            Keysof => "Keysof",
            Clone => "Clone",
            Call => "Call",
            CollectGarbage => "CollectGarbage",
            GetStackTrace => "GetStackTrace",
            AllocateObject => "AllocateObject",
            AllocateArray => "AllocateArray",
            Phi => "Phi",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opcode-specific payload.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Payload {
    /// No extra data.
    None,
    /// Operator of a `BinOp`.
    BinOp(BinOpKind),
    /// Prologue data: the compilation root and its context slot count.
    Entry {
        /// The root this prologue belongs to.
        func: FuncRef,
        /// Context slots the frame exposes to closures.
        context_slots: u32,
    },
    /// Closure data: the compilation root and its declared parameter count.
    Function {
        /// The root the closure binds.
        func: FuncRef,
        /// Declared parameter count.
        arg_count: u32,
    },
    /// Slot count of an allocation.
    Alloc {
        /// Rounded slot count.
        size: u32,
    },
}

/// An instruction node.
///
/// Argument and use lists are intrusive `EntityList`s in the graph's shared
/// pool; every argument edge has a matching reverse use edge, maintained by
/// the graph's edit operations.
pub struct InstructionData {
    /// Opcode.
    pub opcode: Opcode,
    /// Ordered data-flow inputs.
    pub args: EntityList<Inst>,
    /// Reverse edges: one entry per argument edge pointing here.
    pub uses: EntityList<Inst>,
    /// Effect emitters this instruction depends on.
    pub effects_in: EntityList<Inst>,
    /// Later instructions whose execution invalidates this one.
    pub effects_out: EntityList<Inst>,
    /// Home block, set as soon as the instruction is placed.
    pub block: PackedOption<Block>,
    /// Phi: the merged variable; Literal: the interned constant; context
    /// loads and stores: the context slot.
    pub slot: Option<ScopeSlot>,
    /// Opcode-specific payload.
    pub payload: Payload,
    /// GCM must keep this instruction in its home block.
    pub pinned: bool,
    /// Dropped by an optimization pass.
    pub removed: bool,
    /// Forwarding pointer installed when a pass replaces this instruction.
    pub replacement: PackedOption<Inst>,
}

impl InstructionData {
    /// Fresh, unplaced instruction data for `opcode`.
    pub fn new(opcode: Opcode, payload: Payload, slot: Option<ScopeSlot>) -> Self {
        Self {
            opcode,
            args: EntityList::new(),
            uses: EntityList::new(),
            effects_in: EntityList::new(),
            effects_out: EntityList::new(),
            block: PackedOption::default(),
            slot,
            payload,
            pinned: opcode.is_pinned(),
            removed: false,
            replacement: PackedOption::default(),
        }
    }
}

/// Slot count of an object allocation: the next power of two above the
/// entry count, with a 64-slot floor.
pub fn object_alloc_size(entries: u32) -> u32 {
    (entries + 1).next_power_of_two().max(64)
}

/// Slot count of an array allocation, with a 16-slot floor.
pub fn array_alloc_size(entries: u32) -> u32 {
    (entries + 1).next_power_of_two().max(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_effect_table() {
        assert!(Opcode::Call.has_side_effects());
        assert!(Opcode::StoreProperty.has_side_effects());
        assert!(Opcode::Entry.has_side_effects());
        assert!(!Opcode::Literal.has_side_effects());
        assert!(!Opcode::BinOp.has_side_effects());
        assert!(!Opcode::LoadProperty.has_side_effects());
        assert!(!Opcode::AllocateObject.has_side_effects());
        assert!(Opcode::AllocateObject.has_gvn_side_effects());
        assert!(Opcode::LoadContext.has_gvn_side_effects());
        assert!(!Opcode::LoadProperty.has_gvn_side_effects());
    }

    #[test]
    fn pinning() {
        assert!(Opcode::Return.is_pinned());
        assert!(Opcode::Goto.is_pinned());
        assert!(!Opcode::Literal.is_pinned());
        assert!(!Opcode::AllocateArray.is_pinned());
        assert!(!Opcode::Phi.is_pinned());
    }

    #[test]
    fn alloc_rounding() {
        assert_eq!(object_alloc_size(0), 64);
        assert_eq!(object_alloc_size(63), 64);
        assert_eq!(object_alloc_size(64), 128);
        assert_eq!(array_alloc_size(0), 16);
        assert_eq!(array_alloc_size(15), 16);
        assert_eq!(array_alloc_size(16), 32);
    }
}
