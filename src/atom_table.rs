use crate::machine::machine_errors::Fault;

use fxhash::FxBuildHasher;
use indexmap::IndexSet;

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    /// `[]`, always the first atom.
    pub const NIL: Atom = Atom(0);

    #[inline(always)]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl From<u32> for Atom {
    #[inline(always)]
    fn from(index: u32) -> Self {
        Atom(index)
    }
}

/// Index into the functor table. Also the key of the predicate and foreign
/// tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Functor(u32);

impl Functor {
    #[inline(always)]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl From<u32> for Functor {
    #[inline(always)]
    fn from(index: u32) -> Self {
        Functor(index)
    }
}

/// The atom, functor and float tables.
///
/// These are append-only. A loader fills them before code runs, and a few
/// engine primitives add entries lazily (error terms, trace goals). Floats
/// are never deduplicated: each literal owns its own entry.
#[derive(Debug, Clone)]
pub struct SymbolTables {
    atoms: IndexSet<String, FxBuildHasher>,
    functors: IndexSet<(Atom, usize), FxBuildHasher>,
    floats: Vec<f64>,
}

impl Default for SymbolTables {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTables {
    pub fn new() -> Self {
        let mut tables = SymbolTables {
            atoms: IndexSet::with_hasher(FxBuildHasher::default()),
            functors: IndexSet::with_hasher(FxBuildHasher::default()),
            floats: vec![],
        };

        tables.intern_atom("[]");
        tables
    }

    pub fn intern_atom(&mut self, name: &str) -> Atom {
        if let Some(idx) = self.atoms.get_index_of(name) {
            return Atom(idx as u32);
        }

        let (idx, _) = self.atoms.insert_full(name.to_owned());
        Atom(idx as u32)
    }

    pub fn lookup_atom(&self, name: &str) -> Option<Atom> {
        self.atoms.get_index_of(name).map(|idx| Atom(idx as u32))
    }

    pub fn atom_name(&self, atom: Atom) -> Option<&str> {
        self.atoms.get_index(atom.0 as usize).map(String::as_str)
    }

    pub fn intern_functor(&mut self, name: &str, arity: usize) -> Functor {
        let name = self.intern_atom(name);
        let (idx, _) = self.functors.insert_full((name, arity));
        Functor(idx as u32)
    }

    pub fn lookup_functor(&self, name: &str, arity: usize) -> Option<Functor> {
        let name = self.lookup_atom(name)?;
        self.functors
            .get_index_of(&(name, arity))
            .map(|idx| Functor(idx as u32))
    }

    pub fn functor(&self, functor: Functor) -> Result<(Atom, usize), Fault> {
        self.functors
            .get_index(functor.0 as usize)
            .copied()
            .ok_or(Fault::UnknownFunctor { index: functor.0 })
    }

    #[inline]
    pub fn functor_arity(&self, functor: Functor) -> Result<usize, Fault> {
        self.functor(functor).map(|(_, arity)| arity)
    }

    pub fn functor_name(&self, functor: Functor) -> Result<&str, Fault> {
        let (name, _) = self.functor(functor)?;
        self.atom_name(name)
            .ok_or(Fault::UnknownAtom { index: name.0 })
    }

    pub fn add_float(&mut self, value: f64) -> u32 {
        self.floats.push(value);
        (self.floats.len() - 1) as u32
    }

    pub fn float(&self, index: u32) -> Option<f64> {
        self.floats.get(index as usize).copied()
    }

    pub fn indicator(&self, functor: Functor) -> PredicateIndicator<'_> {
        PredicateIndicator {
            tables: self,
            functor,
        }
    }
}

/// Displays a functor as `name/arity`.
pub struct PredicateIndicator<'a> {
    tables: &'a SymbolTables,
    functor: Functor,
}

impl fmt::Display for PredicateIndicator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.tables.functor(self.functor) {
            Ok((name, arity)) => {
                let name = self.tables.atom_name(name).unwrap_or("?");
                write!(f, "{}/{}", name, arity)
            }
            Err(_) => write!(f, "<functor {}>", self.functor.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_atom_zero() {
        let tables = SymbolTables::new();
        assert_eq!(tables.lookup_atom("[]"), Some(Atom::NIL));
        assert_eq!(tables.atom_name(Atom::NIL), Some("[]"));
    }

    #[test]
    fn interning_is_idempotent() {
        let mut tables = SymbolTables::new();

        let foo = tables.intern_atom("foo");
        assert_eq!(tables.intern_atom("foo"), foo);

        let foo_2 = tables.intern_functor("foo", 2);
        let foo_1 = tables.intern_functor("foo", 1);

        assert_ne!(foo_1, foo_2);
        assert_eq!(tables.intern_functor("foo", 2), foo_2);
        assert_eq!(tables.functor(foo_2).unwrap(), (foo, 2));
        assert_eq!(tables.indicator(foo_1).to_string(), "foo/1");
    }

    #[test]
    fn floats_are_never_shared() {
        let mut tables = SymbolTables::new();

        let a = tables.add_float(1.5);
        let b = tables.add_float(1.5);

        assert_ne!(a, b);
        assert_eq!(tables.float(a), tables.float(b));
    }

    #[test]
    fn unknown_functor_is_a_fault() {
        let tables = SymbolTables::new();
        assert!(matches!(
            tables.functor(Functor::from(42)),
            Err(Fault::UnknownFunctor { index: 42 })
        ));
    }
}
