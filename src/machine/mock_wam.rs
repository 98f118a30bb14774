pub(crate) use crate::atom_table::*;
pub(crate) use crate::instructions::opcode::*;
pub(crate) use crate::machine::code_repo::*;
pub(crate) use crate::machine::config::*;
pub(crate) use crate::machine::machine_errors::*;
pub(crate) use crate::machine::machine_state::*;
pub(crate) use crate::machine::{Machine, RunOutcome};
pub(crate) use crate::types::*;

// a mini-WAM for test purposes.

/// Small regions, so overflow paths are reachable from tests.
pub(crate) fn mock_config() -> MachineConfig {
    MachineConfig {
        heap_size: 256,
        stack_size: 128,
        trail_size: 32,
        ..MachineConfig::default()
    }
}

/// A machine state with the toplevel frame in place.
pub(crate) fn mock_machine_state() -> MachineState {
    let mut machine_st = MachineState::new(&mock_config(), SymbolTables::new());
    machine_st
        .init_toplevel_frame()
        .expect("the toplevel frame fits the mock stack");
    machine_st
}

/// A machine state and an empty code repository whose halt stub serves as
/// the continuation.
pub(crate) fn mock_machine_with_stub() -> (MachineState, CodeRepo) {
    (mock_machine_state(), CodeRepo::new())
}

pub(crate) fn mock_machine_with(config: MachineConfig) -> Machine {
    MachineBuilder {
        config,
        symbols: None,
    }
    .build()
    .expect("mock configurations are valid")
}

pub(crate) fn mock_machine() -> Machine {
    mock_machine_with(MachineConfig {
        heap_size: 1024,
        stack_size: 512,
        trail_size: 64,
        ..MachineConfig::default()
    })
}

impl Machine {
    /// Installs one code buffer per clause for `key` and returns the entry
    /// of the first clause.
    pub(crate) fn add_clauses(&mut self, key: Functor, clauses: Vec<Vec<u32>>) -> CodePtr {
        let clauses: Vec<CodeIndex> = clauses
            .into_iter()
            .map(|words| self.code_repo.add_code(words))
            .collect();

        let entry = CodePtr {
            code: clauses[0],
            predicate: Some(key),
            offset: 0,
        };

        self.code_repo.add_predicate(Predicate::new(key, clauses));
        entry
    }

    pub(crate) fn add_indexed_clauses(
        &mut self,
        key: Functor,
        index: Vec<u32>,
        clauses: Vec<Vec<u32>>,
    ) {
        let index = self.code_repo.add_code(index);
        let clauses = clauses
            .into_iter()
            .map(|words| self.code_repo.add_code(words))
            .collect();

        self.code_repo
            .add_predicate(Predicate::new(key, clauses).with_index(index));
    }

    pub(crate) fn functor(&mut self, name: &str, arity: usize) -> Functor {
        self.machine_st.symbols.intern_functor(name, arity)
    }

    pub(crate) fn atom(&mut self, name: &str) -> Atom {
        self.machine_st.symbols.intern_atom(name)
    }
}

pub(crate) fn clause_label(n: u32) -> u32 {
    n
}

pub(crate) fn offset_label(offset: usize) -> u32 {
    offset as u32 | ABSOLUTE_LABEL
}

/// Builds bytecode one instruction at a time.
#[derive(Debug, Default)]
pub(crate) struct Assembler {
    words: Vec<u32>,
}

impl Assembler {
    pub(crate) fn new() -> Self {
        Assembler::default()
    }

    fn emit(mut self, words: &[u32]) -> Self {
        self.words.extend_from_slice(words);
        self
    }

    /// The offset the next instruction will be emitted at.
    pub(crate) fn len(&self) -> usize {
        self.words.len()
    }

    pub(crate) fn finish(self) -> Vec<u32> {
        self.words
    }

    pub(crate) fn allocate(self) -> Self {
        self.emit(&[ALLOCATE])
    }

    pub(crate) fn deallocate(self) -> Self {
        self.emit(&[DEALLOCATE])
    }

    pub(crate) fn call(self, target: Functor, env_size: u32) -> Self {
        self.emit(&[CALL, target.index(), env_size])
    }

    pub(crate) fn execute(self, target: Functor) -> Self {
        self.emit(&[EXECUTE, target.index()])
    }

    pub(crate) fn proceed(self) -> Self {
        self.emit(&[PROCEED])
    }

    pub(crate) fn call_aux(self, offset: usize, arity: u32, env_size: u32) -> Self {
        self.emit(&[CALL_AUX, offset as u32, arity, env_size])
    }

    pub(crate) fn put_variable_y(self, y: u32, a: u32) -> Self {
        self.emit(&[PUT_VARIABLE_Y, y, a])
    }

    pub(crate) fn put_value_y(self, y: u32, a: u32) -> Self {
        self.emit(&[PUT_VALUE, 0, y, a])
    }

    pub(crate) fn put_constant(self, atom: Atom, a: u32) -> Self {
        self.emit(&[PUT_CONSTANT, atom.index(), a])
    }

    pub(crate) fn put_structure(self, functor: Functor, a: u32) -> Self {
        self.emit(&[PUT_STRUCTURE, functor.index(), a])
    }

    pub(crate) fn get_value_x(self, x: u32, a: u32) -> Self {
        self.emit(&[GET_VALUE, 1, x, a])
    }

    pub(crate) fn get_constant(self, atom: Atom, a: u32) -> Self {
        self.emit(&[GET_CONSTANT, atom.index(), a])
    }

    pub(crate) fn get_integer(self, n: i32, a: u32) -> Self {
        self.emit(&[GET_INTEGER, integer_word(n), a])
    }

    pub(crate) fn get_structure(self, functor: Functor, a: u32) -> Self {
        self.emit(&[GET_STRUCTURE, functor.index(), a])
    }

    pub(crate) fn get_list(self, a: u32) -> Self {
        self.emit(&[GET_LIST, a])
    }

    pub(crate) fn unify_void(self, n: u32) -> Self {
        self.emit(&[UNIFY_VOID, n])
    }

    pub(crate) fn unify_variable_x(self, x: u32) -> Self {
        self.emit(&[UNIFY_VARIABLE, 1, x])
    }

    pub(crate) fn unify_constant(self, atom: Atom) -> Self {
        self.emit(&[UNIFY_CONSTANT, atom.index()])
    }

    pub(crate) fn unify_integer(self, n: i32) -> Self {
        self.emit(&[UNIFY_INTEGER, integer_word(n)])
    }

    pub(crate) fn try_me_else(self, label: u32) -> Self {
        self.emit(&[TRY_ME_ELSE, label])
    }

    pub(crate) fn retry_me_else(self, label: u32) -> Self {
        self.emit(&[RETRY_ME_ELSE, label])
    }

    pub(crate) fn trust_me(self) -> Self {
        self.emit(&[TRUST_ME, 0])
    }

    pub(crate) fn only_clause(self) -> Self {
        self.emit(&[ONLY_CLAUSE, 0])
    }

    pub(crate) fn try_label(self, label: u32) -> Self {
        self.emit(&[TRY, label])
    }

    pub(crate) fn retry(self, label: u32) -> Self {
        self.emit(&[RETRY, label])
    }

    pub(crate) fn trust(self, label: u32) -> Self {
        self.emit(&[TRUST, label])
    }

    pub(crate) fn goto_clause(self, label: u32) -> Self {
        self.emit(&[GOTO_CLAUSE, label])
    }

    pub(crate) fn neck_cut(self) -> Self {
        self.emit(&[NECK_CUT])
    }

    pub(crate) fn cut(self, y: u32) -> Self {
        self.emit(&[CUT, y])
    }

    pub(crate) fn get_level(self, y: u32) -> Self {
        self.emit(&[GET_LEVEL, y])
    }

    pub(crate) fn get_choicepoint(self, depth: u32, y: u32) -> Self {
        self.emit(&[GET_CHOICEPOINT, depth, y])
    }

    /// Targets are `[var, atom, integer, float, list, structure]`.
    pub(crate) fn switch_on_term(self, targets: [u32; 6]) -> Self {
        self.emit(&[SWITCH_ON_TERM]).emit(&targets)
    }

    pub(crate) fn switch_on_constant(self, kind: u32, table: &[u32]) -> Self {
        self.emit(&[SWITCH_ON_CONSTANT, kind]).emit(table)
    }

    pub(crate) fn switch_on_structure(self, kind: u32, table: &[u32]) -> Self {
        self.emit(&[SWITCH_ON_STRUCTURE, kind]).emit(table)
    }

}
