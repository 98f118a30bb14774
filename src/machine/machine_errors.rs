use crate::machine::memory::Region;

use thiserror::Error;

/// An unrecoverable condition. Faults are the only errors that leave the
/// dispatch loop; goal failure and Prolog exceptions stay in-band.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("heap exhausted: H reached {h} of {limit} cells")]
    HeapOverflow { h: usize, limit: usize },
    #[error("stack exhausted: a frame at {addr} runs past the stack limit {limit}")]
    StackOverflow { addr: usize, limit: usize },
    #[error("trail exhausted: TR reached {tr}, limit {limit}")]
    TrailOverflow { tr: usize, limit: usize },
    #[error("bad memory access at address {addr}")]
    BadAddress { addr: usize },
    #[error("{register} = {addr} lies outside the {region} region")]
    FrameOutOfRange {
        register: &'static str,
        addr: usize,
        region: Region,
    },
    #[error("no continuation recorded in stack slot {addr}")]
    MissingContinuation { addr: usize },
    #[error("invalid tag in word {word:#010x}")]
    BadTag { word: u32 },
    #[error("unexpected opcode {opcode}")]
    UnknownOpcode { opcode: u32 },
    #[error("instruction at offset {p} runs past the end of its code buffer")]
    TruncatedInstruction { p: usize },
    #[error("code buffer {index} does not exist")]
    MissingCode { index: usize },
    #[error("clause {clause} does not exist in the current predicate")]
    MissingClause { clause: u32 },
    #[error("clause label {label:#x} used outside of any predicate")]
    NoCurrentPredicate { label: u32 },
    #[error("predicate {name} has no clauses")]
    EmptyPredicate { name: String },
    #[error("atom {index} is not in the atom table")]
    UnknownAtom { index: u32 },
    #[error("functor {index} is not in the functor table")]
    UnknownFunctor { index: u32 },
    #[error("malformed switch table at offset {offset}")]
    MalformedTable { offset: usize },
    #[error("register A{index} is out of range")]
    RegisterOutOfRange { index: usize },
    #[error("uncaught exception: {ball}")]
    UncaughtException { ball: String },
    #[error("foreign predicate protocol violation: {reason}")]
    ForeignProtocol { reason: &'static str },
    #[error("goal of arity {expected} given {found} arguments")]
    GoalArity { expected: usize, found: usize },
    #[error("invalid machine configuration: {reason}")]
    Config { reason: String },
}

/// A fault together with the machine context it occurred in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{fault} (in {}, P = {p}, opcode {})",
    .predicate.as_deref().unwrap_or("<no predicate>"),
    .opcode.map_or_else(|| "?".to_owned(), |op| op.to_string())
)]
pub struct FaultReport {
    pub fault: Fault,
    pub predicate: Option<String>,
    pub p: usize,
    pub opcode: Option<u32>,
    /// Most recently entered predicates, oldest first.
    pub recent_calls: Vec<String>,
}

impl FaultReport {
    pub fn fault(&self) -> &Fault {
        &self.fault
    }
}
