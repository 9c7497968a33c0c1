//! Vireo HIR: SSA construction and optimization for the Vireo JIT.
//!
//! This crate is the middle-end of the Vireo compiler. The front-end hands
//! [`Context::build`] a function literal annotated with scope slots; the
//! builder turns it into a high-level intermediate representation in static
//! single assignment form — a control-flow graph of blocks holding
//! instruction lists, with phis at the merge points. [`Context::optimize`]
//! then runs the pass pipeline:
//!
//! 1. **Phi pruning** collapses the phis on-demand construction
//!    over-creates.
//! 2. **Reachability** and **dominator analysis** (Lengauer-Tarjan) fill
//!    the per-block analysis state everything downstream consumes.
//! 3. **Effect analysis** links memory reads to the stores that produced or
//!    invalidate what they observe.
//! 4. **Global value numbering** collapses congruent expressions within
//!    dominator scope.
//! 5. **Dead-code elimination** drops computations that never reach a side
//!    effect.
//! 6. **Global code motion** reschedules unpinned instructions, lifting
//!    loop-invariant code to pre-headers and sinking the rest toward its
//!    uses.
//!
//! The optimized graph, its block order, and the per-block environments are
//! then handed to the LIR stage for register allocation and code emission;
//! none of that lives here.

#![warn(missing_docs, trivial_numeric_casts, unused_import_braces)]

pub use crate::context::Context;
pub use crate::settings::Flags;
pub use crate::verifier::{verify_graph, VerifierError, VerifierErrors, VerifierResult};
pub use crate::write::write_graph;

pub mod ast;
pub mod builder;
pub mod context;
pub mod dce;
pub mod dominator_tree;
pub mod effects;
pub mod gcm;
pub mod gvn;
pub mod ir;
pub mod prune_phis;
pub mod root;
pub mod scope;
pub mod settings;
pub mod verifier;
pub mod write;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
