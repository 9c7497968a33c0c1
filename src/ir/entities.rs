//! HIR entity references.
//!
//! Instructions, blocks, and compilation roots reference each other through
//! compact `u32` indices into the arenas owned by [`Graph`](super::Graph),
//! not through Rust references. SSA graphs are inherently cyclic (a loop phi
//! reaches a definition that is dominated by the phi itself), so edges are
//! pairs of indices, never ownership. There is a separate index type per
//! entity so we do not lose type safety.
//!
//! Compact data structures use the `PackedOption<EntityRef>` representation
//! while function arguments and return values prefer the more Rust-like
//! `Option<EntityRef>` variant.

use cranelift_entity::entity_impl;

/// An opaque reference to a HIR instruction.
///
/// Instruction numbers are unique within a compilation unit and monotonic in
/// creation order. The `Display` form is the `iNN` notation used by the
/// textual IR.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "i");

/// An opaque reference to a basic block in the control-flow graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "b");

/// An opaque reference to a function literal compiled in this unit.
///
/// Nested function literals are queued as separate compilation roots; a
/// `FuncRef` names one root and is the label the code generator later binds.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "fn");
