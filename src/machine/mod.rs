pub mod code_repo;
pub mod config;
pub(crate) mod cut;
pub(crate) mod dispatch;
pub mod exceptions;
pub mod foreign;
pub mod inspect;
pub mod machine_errors;
pub mod machine_state;
pub mod machine_state_impl;
pub mod memory;
pub mod stack;
pub(crate) mod system_calls;
pub mod trace;
pub(crate) mod unify;

#[cfg(test)]
pub(crate) mod mock_wam;

use crate::atom_table::*;
use crate::machine::code_repo::*;
use crate::machine::config::*;
use crate::machine::foreign::*;
use crate::machine::inspect::*;
use crate::machine::machine_errors::*;
use crate::machine::machine_state::*;
use crate::machine::system_calls::install_system_predicates;
use crate::machine::trace::*;
use crate::types::*;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

use std::fmt;

/// How a run of the dispatch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The query reached `halt`. More solutions may follow.
    Success,
    Failure,
    /// Control returned to the host with the machine intact. Continue with
    /// [`Machine::resume`] or [`Machine::resume_with_failure`].
    Suspended,
}

/// One engine instance: memory, registers, loaded code and the foreign
/// predicate table. Engines share nothing.
pub struct Machine {
    pub(crate) machine_st: MachineState,
    pub(crate) code_repo: CodeRepo,
    pub(crate) foreign: ForeignTable,
    pub(crate) config: MachineConfig,
    pub(crate) trace_hook: Option<Box<dyn TraceHook>>,
    // set when a step prompt suspended the run; the next run starts by
    // executing that instruction.
    pub(crate) step_resumed: bool,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Machine")
            .field("machine_st", &self.machine_st)
            .field("code_repo", &self.code_repo)
            .field("foreign", &self.foreign)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Machine {
    pub(crate) fn new(config: MachineConfig, mut symbols: SymbolTables) -> Self {
        let mut foreign = IndexMap::with_hasher(FxBuildHasher::default());
        install_system_predicates(&mut symbols, &mut foreign);

        let machine_st = MachineState::new(&config, symbols);

        Machine {
            machine_st,
            code_repo: CodeRepo::new(),
            foreign,
            config,
            trace_hook: None,
            step_resumed: false,
        }
    }

    #[inline]
    pub fn symbols(&self) -> &SymbolTables {
        &self.machine_st.symbols
    }

    #[inline]
    pub fn symbols_mut(&mut self) -> &mut SymbolTables {
        &mut self.machine_st.symbols
    }

    pub fn add_code(&mut self, words: Vec<u32>) -> CodeIndex {
        self.code_repo.add_code(words)
    }

    /// Installs a predicate, returning the definition it replaces.
    pub fn add_predicate(&mut self, predicate: Predicate) -> Option<Predicate> {
        self.code_repo.add_predicate(predicate)
    }

    /// Registers `name/arity` as a foreign predicate. A predicate with
    /// clauses of the same name and arity takes precedence.
    pub fn register_foreign(
        &mut self,
        name: &str,
        arity: usize,
        predicate: ForeignPredicate,
    ) -> Option<ForeignPredicate> {
        let functor = self.machine_st.symbols.intern_functor(name, arity);
        self.foreign.insert(functor, predicate)
    }

    pub fn set_trace_hook(&mut self, hook: impl TraceHook + 'static) {
        self.trace_hook = Some(Box::new(hook));
    }

    pub fn set_trace_mode(&mut self, mode: TraceMode) {
        self.machine_st.trace.call = mode;
    }

    #[inline]
    pub fn trace_mode(&self) -> TraceMode {
        self.machine_st.trace.call
    }

    pub fn set_instruction_trace(&mut self, mode: InstructionTrace) {
        self.machine_st.trace.instruction = mode;
    }

    pub fn set_trace_predicate(&mut self, functor: Option<Functor>) {
        self.config.trace_predicate = functor;
    }

    fn fault_report(&self, fault: Fault) -> FaultReport {
        let machine_st = &self.machine_st;

        let opcode = self
            .code_repo
            .words(machine_st.code)
            .ok()
            .and_then(|words| words.get(machine_st.p).copied());

        FaultReport {
            fault,
            predicate: machine_st
                .current_predicate
                .map(|f| machine_st.symbols.indicator(f).to_string()),
            p: machine_st.p,
            opcode,
            recent_calls: self.recent_calls(),
        }
    }

    fn finish_run(&mut self, result: Result<RunOutcome, Fault>) -> Result<RunOutcome, FaultReport> {
        match result {
            Ok(outcome) => {
                if outcome == RunOutcome::Failure {
                    self.machine_st.running = false;
                }

                Ok(outcome)
            }
            Err(fault) => {
                self.machine_st.running = false;

                let report = self.fault_report(fault);
                error!("{}", report);

                Err(report)
            }
        }
    }

    fn start_query(&mut self, goal: Functor, args: &[Cell]) -> Result<RunOutcome, Fault> {
        let arity = self.machine_st.symbols.functor_arity(goal)?;

        if args.len() != arity {
            return Err(Fault::GoalArity {
                expected: arity,
                found: args.len(),
            });
        }

        if arity > MAX_REGISTERS {
            return Err(Fault::RegisterOutOfRange { index: arity });
        }

        let machine_st = &mut self.machine_st;
        let heap_size = machine_st.memory.heap_size();

        machine_st.b = 0;
        machine_st.b0 = 0;
        machine_st.hb = 0;
        machine_st.tr = machine_st.memory.trail_base();
        machine_st.fail = false;
        machine_st.pdl.clear();
        machine_st.b_floor = heap_size;
        machine_st.block = None;
        machine_st.ball = None;
        machine_st.cleanups.clear();
        machine_st.cleanup_floor = 0;
        machine_st.foreign_retry = false;
        machine_st.foreign_value = None;
        machine_st.suspend_requested = false;

        machine_st.init_toplevel_frame()?;
        machine_st.cp = CodePtr::halt();
        machine_st.registers[..arity].copy_from_slice(args);
        machine_st.num_of_args = arity;

        self.code_repo.set_query(goal);

        machine_st.code = QUERY_CODE;
        machine_st.current_predicate = None;
        machine_st.p = 0;
        machine_st.running = true;

        self.step_resumed = false;

        debug!("query {}", machine_st.symbols.indicator(goal));

        self.dispatch_loop()
    }

    /// Runs `goal` with `args` until its first solution. Terms built with
    /// [`Machine::new_var`] and friends before the call stay valid.
    pub fn run_goal(&mut self, goal: Functor, args: &[Cell]) -> Result<RunOutcome, FaultReport> {
        let result = self.start_query(goal, args);
        self.finish_run(result)
    }

    /// Backtracks into the newest choicepoint of the current query.
    pub fn next_solution(&mut self) -> Result<RunOutcome, FaultReport> {
        if !self.machine_st.running {
            return Ok(RunOutcome::Failure);
        }

        self.machine_st.fail = true;

        let result = self.dispatch_loop();
        self.finish_run(result)
    }

    /// Continues a suspended run where it stopped.
    pub fn resume(&mut self) -> Result<RunOutcome, FaultReport> {
        if !self.machine_st.running {
            return Ok(RunOutcome::Failure);
        }

        let result = self.dispatch_loop();
        self.finish_run(result)
    }

    /// Continues a suspended run by failing the instruction it stopped at.
    pub fn resume_with_failure(&mut self) -> Result<RunOutcome, FaultReport> {
        self.step_resumed = false;
        self.next_solution()
    }

    /// Discards the heap, stack and trail. Code and symbols stay loaded.
    pub fn reset(&mut self) {
        self.machine_st.reset();
        self.step_resumed = false;
    }

    pub fn new_var(&mut self) -> Result<Cell, Fault> {
        self.machine_st.alloc_var()
    }

    pub fn new_structure(&mut self, functor: Functor, args: &[Cell]) -> Result<Cell, Fault> {
        let arity = self.machine_st.symbols.functor_arity(functor)?;

        if arity != args.len() {
            return Err(Fault::GoalArity {
                expected: arity,
                found: args.len(),
            });
        }

        let term = self.machine_st.alloc_structure(functor)?;

        for &arg in args {
            self.machine_st.heap_push(arg)?;
        }

        Ok(term)
    }

    /// Builds a proper list of `items`.
    pub fn new_list(&mut self, items: &[Cell]) -> Result<Cell, Fault> {
        if items.is_empty() {
            return Ok(nil_as_cell!());
        }

        let head = self.machine_st.h;

        for (i, &item) in items.iter().enumerate() {
            self.machine_st.heap_push(item)?;

            let tail = if i + 1 == items.len() {
                nil_as_cell!()
            } else {
                list_loc_as_cell!(self.machine_st.h + 1)
            };

            self.machine_st.heap_push(tail)?;
        }

        Ok(list_loc_as_cell!(head))
    }

    #[inline]
    pub fn deref(&self, cell: Cell) -> Result<Cell, Fault> {
        self.machine_st.deref(cell)
    }

    pub fn term_to_string(&self, term: Cell) -> String {
        self.machine_st.term_to_string(term)
    }

    /// A heap copy of the pending exception term, if there is one.
    pub fn exception(&mut self) -> Result<Option<Cell>, Fault> {
        match self.machine_st.ball.clone() {
            Some(ball) => ball.recall(&mut self.machine_st).map(Some),
            None => Ok(None),
        }
    }

    pub fn environments(&self) -> Result<Vec<EnvironmentFrame>, Fault> {
        self.machine_st.environments(&self.code_repo)
    }

    pub fn choicepoints(&self) -> Result<Vec<ChoicepointFrame>, Fault> {
        self.machine_st.choicepoints()
    }

    #[inline]
    pub fn stats(&self) -> MachineStats {
        self.machine_st.stats
    }

    /// Indicators of the most recently entered predicates, oldest first.
    pub fn recent_calls(&self) -> Vec<String> {
        let symbols = &self.machine_st.symbols;

        self.machine_st
            .call_log
            .iter()
            .map(|&f| symbols.indicator(f).to_string())
            .collect()
    }
}
