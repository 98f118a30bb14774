use crate::atom_table::*;
use crate::machine::machine_errors::Fault;
use crate::machine::stack::CP_SIZE;
use crate::machine::Machine;
use crate::types::WORD_BITS;

/// What a call to a predicate with neither clauses nor a foreign handler
/// does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownPolicy {
    /// Throw `error(existence_error(procedure, Name/Arity), Name/Arity)`.
    #[default]
    Error,
    /// Log a warning, then fail.
    Warning,
    /// Fail.
    Fail,
}

/// Sizes of the three memory regions and the engine flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub heap_size: usize,
    pub stack_size: usize,
    pub trail_size: usize,
    pub unknown: UnknownPolicy,
    /// Predicate called with `(Goal, Info, Id)` for traced calls.
    pub trace_predicate: Option<Functor>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            heap_size: 1_410_700,
            stack_size: 65_535,
            trail_size: 1_000,
            unknown: UnknownPolicy::default(),
            trace_predicate: None,
        }
    }
}

impl MachineConfig {
    fn validate(&self) -> Result<(), Fault> {
        let total = self.heap_size + self.stack_size + self.trail_size;

        // block and backtrack frame addresses reach Prolog code as
        // non-negative integers.
        if total > 1 << (WORD_BITS - 1) {
            return Err(Fault::Config {
                reason: format!("{} cells do not fit a 26-bit address", total),
            });
        }

        if self.heap_size == 0 || self.trail_size == 0 {
            return Err(Fault::Config {
                reason: "the heap and the trail must be non-empty".to_owned(),
            });
        }

        // room for the toplevel environment and one choicepoint.
        if self.stack_size < 2 + CP_SIZE {
            return Err(Fault::Config {
                reason: format!("a stack of {} cells cannot hold a frame", self.stack_size),
            });
        }

        Ok(())
    }
}

/// Describes how a [`Machine`] will be configured.
#[derive(Debug, Default)]
pub struct MachineBuilder {
    pub(crate) config: MachineConfig,
    pub(crate) symbols: Option<SymbolTables>,
}

impl MachineBuilder {
    /// Creates a default configuration.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_heap_size(mut self, cells: usize) -> Self {
        self.config.heap_size = cells;
        self
    }

    pub fn with_stack_size(mut self, cells: usize) -> Self {
        self.config.stack_size = cells;
        self
    }

    pub fn with_trail_size(mut self, cells: usize) -> Self {
        self.config.trail_size = cells;
        self
    }

    pub fn with_unknown(mut self, policy: UnknownPolicy) -> Self {
        self.config.unknown = policy;
        self
    }

    pub fn with_trace_predicate(mut self, functor: Functor) -> Self {
        self.config.trace_predicate = Some(functor);
        self
    }

    /// Starts from symbol tables a loader has already populated.
    pub fn with_symbols(mut self, symbols: SymbolTables) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// Builds the [`Machine`] from this configuration.
    pub fn build(self) -> Result<Machine, Fault> {
        self.config.validate()?;
        Ok(Machine::new(self.config, self.symbols.unwrap_or_default()))
    }
}
