use crate::atom_table::*;
use crate::machine::code_repo::CodeRepo;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::types::*;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use smallvec::SmallVec;

use std::fmt;

/// What a foreign predicate reports back to the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignResult {
    Success,
    Failure,
    /// Succeed, leaving a choicepoint. On backtracking the predicate is
    /// called again with this value available from [`ForeignCall::retry`].
    Redo(Cell),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKind {
    Deterministic,
    /// The engine pushes a foreign choicepoint before the first call, so
    /// every binding the handler makes is undone on backtracking.
    Nondeterministic,
}

pub type ForeignHandler = Box<dyn FnMut(&mut ForeignCall) -> Result<ForeignResult, Fault>>;

pub struct ForeignPredicate {
    pub(crate) kind: ForeignKind,
    pub(crate) handler: ForeignHandler,
}

impl ForeignPredicate {
    pub fn deterministic<F>(handler: F) -> Self
    where
        F: FnMut(&mut ForeignCall) -> Result<ForeignResult, Fault> + 'static,
    {
        ForeignPredicate {
            kind: ForeignKind::Deterministic,
            handler: Box::new(handler),
        }
    }

    pub fn nondeterministic<F>(handler: F) -> Self
    where
        F: FnMut(&mut ForeignCall) -> Result<ForeignResult, Fault> + 'static,
    {
        ForeignPredicate {
            kind: ForeignKind::Nondeterministic,
            handler: Box::new(handler),
        }
    }

    #[inline]
    pub fn kind(&self) -> ForeignKind {
        self.kind
    }
}

impl fmt::Debug for ForeignPredicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ForeignPredicate")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

pub(crate) type ForeignTable = IndexMap<Functor, ForeignPredicate, FxBuildHasher>;

/// The view of the machine a foreign predicate gets for one invocation.
pub struct ForeignCall<'a> {
    pub(crate) machine_st: &'a mut MachineState,
    pub(crate) code_repo: &'a CodeRepo,
    args: SmallVec<[Cell; 8]>,
    retry: Option<Cell>,
}

impl<'a> ForeignCall<'a> {
    pub(crate) fn new(
        machine_st: &'a mut MachineState,
        code_repo: &'a CodeRepo,
        arity: usize,
        retry: Option<Cell>,
    ) -> Result<Self, Fault> {
        let args = (0..arity)
            .map(|i| machine_st.deref(machine_st.registers[i]))
            .collect::<Result<SmallVec<[Cell; 8]>, Fault>>()?;

        Ok(ForeignCall {
            machine_st,
            code_repo,
            args,
            retry,
        })
    }

    /// The arguments, dereferenced at the time of the call.
    #[inline]
    pub fn args(&self) -> &[Cell] {
        &self.args
    }

    #[inline]
    pub fn arg(&self, i: usize) -> Cell {
        self.args[i]
    }

    /// The value passed to [`ForeignResult::Redo`] when this is a retry.
    #[inline]
    pub fn retry(&self) -> Option<Cell> {
        self.retry
    }

    pub fn deref(&self, cell: Cell) -> Result<Cell, Fault> {
        self.machine_st.deref(cell)
    }

    /// Unifies two terms, reporting whether they matched. Bindings made
    /// by a failed unification are undone on backtracking.
    pub fn unify(&mut self, a: Cell, b: Cell) -> Result<bool, Fault> {
        self.machine_st.unify(a, b)?;

        let unified = !self.machine_st.fail;
        self.machine_st.fail = false;

        Ok(unified)
    }

    pub fn new_var(&mut self) -> Result<Cell, Fault> {
        self.machine_st.alloc_var()
    }

    pub fn new_structure(&mut self, functor: Functor, args: &[Cell]) -> Result<Cell, Fault> {
        let term = self.machine_st.alloc_structure(functor)?;

        for &arg in args {
            self.machine_st.heap_push(arg)?;
        }

        Ok(term)
    }

    pub fn symbols(&self) -> &SymbolTables {
        &self.machine_st.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTables {
        &mut self.machine_st.symbols
    }

    pub fn term_to_string(&self, term: Cell) -> String {
        self.machine_st.term_to_string(term)
    }

    /// Raises `term` as a Prolog exception. The returned result is what the
    /// predicate should report.
    pub fn throw(&mut self, term: Cell) -> Result<ForeignResult, Fault> {
        self.machine_st.throw_exception(term)?;
        Ok(ForeignResult::Failure)
    }

    /// Makes the dispatch loop return [`RunOutcome::Suspended`] once this
    /// call has completed.
    ///
    /// [`RunOutcome::Suspended`]: crate::machine::RunOutcome::Suspended
    pub fn request_suspend(&mut self) {
        self.machine_st.suspend_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock_wam::*;

    #[test]
    fn arguments_are_dereferenced() {
        let (mut machine_st, code_repo) = mock_machine_with_stub();

        let x = machine_st.alloc_var().unwrap();
        let y = machine_st.alloc_var().unwrap();
        machine_st.bind(y, x).unwrap();
        machine_st.bind(x, int_as_cell!(6)).unwrap();

        machine_st.registers[0] = y;
        machine_st.registers[1] = x;

        let call = ForeignCall::new(&mut machine_st, &code_repo, 2, None).unwrap();

        assert_eq!(call.args(), &[int_as_cell!(6), int_as_cell!(6)]);
        assert_eq!(call.retry(), None);
    }

    #[test]
    fn failed_unification_leaves_the_fail_flag_clear() {
        let (mut machine_st, code_repo) = mock_machine_with_stub();
        let mut call = ForeignCall::new(&mut machine_st, &code_repo, 0, None).unwrap();

        assert_eq!(call.unify(int_as_cell!(1), int_as_cell!(2)), Ok(false));

        let v = call.new_var().unwrap();
        assert_eq!(call.unify(v, int_as_cell!(2)), Ok(true));
        assert!(!machine_st.fail);
    }
}
