//! Intermediate representation data model.

pub mod entities;
pub mod env;
pub mod graph;
pub mod instructions;
pub mod repr;

pub use self::entities::{Block, FuncRef, Inst};
pub use self::env::Environment;
pub use self::graph::{BlockData, FunctionData, Graph, UNVISITED};
pub use self::instructions::{
    array_alloc_size, object_alloc_size, InstructionData, Opcode, Payload,
};
pub use self::repr::Representation;
