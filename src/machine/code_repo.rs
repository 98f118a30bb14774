use crate::atom_table::*;
use crate::instructions::opcode;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::CodePtr;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeIndex(usize);

impl CodeIndex {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for CodeIndex {
    #[inline(always)]
    fn from(index: usize) -> Self {
        CodeIndex(index)
    }
}

/// Engine stubs: `[0, halt, retry_foreign]`. The leading zero is the
/// environment size read through a continuation at offset 1.
pub(crate) const SYSTEM_CODE: CodeIndex = CodeIndex(0);
pub(crate) const QUERY_CODE: CodeIndex = CodeIndex(1);

pub(crate) const HALT_OFFSET: usize = 1;
pub(crate) const RETRY_FOREIGN_OFFSET: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub key: Functor,
    /// Clause code in source order. Clause labels index this list.
    pub clauses: Vec<CodeIndex>,
    /// Code starting with the first-argument switch, when compiled.
    pub index: Option<CodeIndex>,
}

impl Predicate {
    pub fn new(key: Functor, clauses: Vec<CodeIndex>) -> Self {
        Predicate {
            key,
            clauses,
            index: None,
        }
    }

    pub fn with_index(mut self, index: CodeIndex) -> Self {
        self.index = Some(index);
        self
    }

    #[inline]
    pub fn entry(&self) -> Option<CodeIndex> {
        self.index.or_else(|| self.clauses.first().copied())
    }
}

/// Loaded bytecode and the predicate table. Immutable while a query runs,
/// apart from the query stub.
#[derive(Debug)]
pub struct CodeRepo {
    buffers: Vec<Vec<u32>>,
    predicates: IndexMap<Functor, Predicate, FxBuildHasher>,
}

impl Default for CodeRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeRepo {
    pub fn new() -> Self {
        CodeRepo {
            buffers: vec![
                vec![0, opcode::HALT, opcode::RETRY_FOREIGN],
                vec![0, opcode::HALT],
            ],
            predicates: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    pub fn add_code(&mut self, words: Vec<u32>) -> CodeIndex {
        self.buffers.push(words);
        CodeIndex(self.buffers.len() - 1)
    }

    #[inline]
    pub fn words(&self, index: CodeIndex) -> Result<&[u32], Fault> {
        self.buffers
            .get(index.0)
            .map(Vec::as_slice)
            .ok_or(Fault::MissingCode { index: index.0 })
    }

    /// Returns the previous definition, if any.
    pub fn add_predicate(&mut self, predicate: Predicate) -> Option<Predicate> {
        self.predicates.insert(predicate.key, predicate)
    }

    #[inline]
    pub fn predicate(&self, key: Functor) -> Option<&Predicate> {
        self.predicates.get(&key)
    }

    pub fn clause(&self, key: Functor, clause: u32) -> Result<CodeIndex, Fault> {
        self.predicate(key)
            .and_then(|predicate| predicate.clauses.get(clause as usize))
            .copied()
            .ok_or(Fault::MissingClause { clause })
    }

    /// The live permanent variable count stored in the word before a call
    /// continuation.
    pub fn env_size_before(&self, cp: CodePtr) -> Result<usize, Fault> {
        let words = self.words(cp.code)?;

        cp.offset
            .checked_sub(1)
            .and_then(|offset| words.get(offset))
            .map(|&n| n as usize)
            .ok_or(Fault::TruncatedInstruction { p: cp.offset })
    }

    /// Rewrites the query stub as `call(goal, 0), halt`.
    pub(crate) fn set_query(&mut self, goal: Functor) {
        self.buffers[QUERY_CODE.0] = vec![opcode::CALL, goal.index(), 0, opcode::HALT];
    }
}

impl CodePtr {
    #[inline]
    pub(crate) fn halt() -> Self {
        CodePtr {
            code: SYSTEM_CODE,
            predicate: None,
            offset: HALT_OFFSET,
        }
    }

    #[inline]
    pub(crate) fn retry_foreign() -> Self {
        CodePtr {
            code: SYSTEM_CODE,
            predicate: None,
            offset: RETRY_FOREIGN_OFFSET,
        }
    }

    #[inline]
    pub(crate) fn is_retry_foreign(&self) -> bool {
        *self == Self::retry_foreign()
    }
}
