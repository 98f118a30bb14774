//! A Warren Abstract Machine that executes compiled Prolog bytecode.
//!
//! Code arrives as flat `u32` words produced by an external compiler. The
//! host loads it with [`Machine::add_code`] and [`Machine::add_predicate`],
//! registers foreign predicates, and then drives queries through
//! [`Machine::run_goal`] and [`Machine::next_solution`].

#[macro_use]
extern crate static_assertions;
#[macro_use]
extern crate log;

#[macro_use]
pub(crate) mod macros;
pub mod atom_table;
pub mod heap_print;
pub mod indexing;
pub mod instructions;
pub mod machine;
pub mod types;

// Re-exports
pub use atom_table::{Atom, Functor, SymbolTables};
pub use instructions::{Instruction, InstructionDescriptor};
pub use machine::code_repo::{CodeIndex, Predicate};
pub use machine::config::*;
pub use machine::foreign::{ForeignCall, ForeignKind, ForeignPredicate, ForeignResult};
pub use machine::inspect::{ChoicepointFrame, EnvironmentFrame, MachineStats};
pub use machine::machine_errors::{Fault, FaultReport};
pub use machine::machine_state::CodePtr;
pub use machine::trace::{InstructionTrace, StepCommand, TraceHook, TraceMode};
pub use machine::{Machine, RunOutcome};
pub use types::{Cell, CellTag};
