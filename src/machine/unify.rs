use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::types::*;

use std::ops::{Deref, DerefMut};

/// Iterative unification over the push-down list. Failure is reported by
/// setting `fail`; only memory faults are returned as errors.
pub(crate) trait Unifier: DerefMut<Target = MachineState> {
    fn unify_structure(&mut self, s1: usize, value: Cell) -> Result<(), Fault> {
        read_cell!(value,
            (CellTag::Str, s2) => {
                let s2 = s2 as usize;
                let h1 = self.memory.load(s1)?;
                let h2 = self.memory.load(s2)?;

                if h1 == h2 {
                    let arity = self.symbols.functor_arity(h1.as_functor())?;

                    for idx in (1..=arity).rev() {
                        self.pdl.push(ref_as_cell!(s2 + idx));
                        self.pdl.push(ref_as_cell!(s1 + idx));
                    }
                } else {
                    self.fail = true;
                }
            }
            (CellTag::Ref, _) => {
                Self::bind(self, value, str_loc_as_cell!(s1))?;
            }
            (CellTag::Lst | CellTag::Int | CellTag::Atm | CellTag::Flt, _) => {
                self.fail = true;
            }
        );

        Ok(())
    }

    fn unify_list(&mut self, l1: usize, value: Cell) -> Result<(), Fault> {
        read_cell!(value,
            (CellTag::Lst, l2) => {
                let l2 = l2 as usize;

                for idx in (0..2).rev() {
                    self.pdl.push(ref_as_cell!(l2 + idx));
                    self.pdl.push(ref_as_cell!(l1 + idx));
                }
            }
            (CellTag::Ref, _) => {
                Self::bind(self, value, list_loc_as_cell!(l1))?;
            }
            (CellTag::Str | CellTag::Int | CellTag::Atm | CellTag::Flt, _) => {
                self.fail = true;
            }
        );

        Ok(())
    }

    /// Atoms and integers unify only with the identical word, which the
    /// caller has already ruled out. Floats are compared by table entry, so
    /// two distinct entries never unify even when their values are equal.
    fn unify_constant(&mut self, constant: Cell, value: Cell) -> Result<(), Fault> {
        if value.is_ref() {
            Self::bind(self, value, constant)
        } else {
            value.get_tag()?;
            self.fail = true;
            Ok(())
        }
    }

    fn unify_internal(&mut self) -> Result<(), Fault> {
        while !(self.pdl.is_empty() || self.fail) {
            let (Some(s1), Some(s2)) = (self.pdl.pop(), self.pdl.pop()) else {
                break;
            };

            let d1 = MachineState::deref(self, s1)?;
            let d2 = MachineState::deref(self, s2)?;

            if d1 == d2 {
                continue;
            }

            read_cell!(d1,
                (CellTag::Ref, _) => {
                    Self::bind(self, d1, d2)?;
                }
                (CellTag::Str, s1) => {
                    Self::unify_structure(self, s1 as usize, d2)?;
                }
                (CellTag::Lst, l1) => {
                    Self::unify_list(self, l1 as usize, d2)?;
                }
                (CellTag::Atm | CellTag::Int | CellTag::Flt, _) => {
                    Self::unify_constant(self, d1, d2)?;
                }
            );
        }

        self.pdl.clear();
        Ok(())
    }

    fn bind(&mut self, a: Cell, b: Cell) -> Result<(), Fault>;
}

pub(crate) struct DefaultUnifier<'a> {
    machine_st: &'a mut MachineState,
}

impl<'a> From<&'a mut MachineState> for DefaultUnifier<'a> {
    #[inline(always)]
    fn from(machine_st: &'a mut MachineState) -> Self {
        Self { machine_st }
    }
}

impl Deref for DefaultUnifier<'_> {
    type Target = MachineState;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.machine_st
    }
}

impl DerefMut for DefaultUnifier<'_> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.machine_st
    }
}

impl Unifier for DefaultUnifier<'_> {
    #[inline(always)]
    fn bind(&mut self, a: Cell, b: Cell) -> Result<(), Fault> {
        self.machine_st.bind(a, b)
    }
}

impl MachineState {
    /// Unifies two terms. On a mismatch `fail` is set and bindings made so
    /// far are left for backtracking to undo.
    pub fn unify(&mut self, a: Cell, b: Cell) -> Result<(), Fault> {
        self.pdl.clear();
        self.pdl.push(b);
        self.pdl.push(a);

        let mut unifier = DefaultUnifier::from(self);
        unifier.unify_internal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock_wam::*;

    #[test]
    fn unification_is_symmetric() {
        let mut machine_st = mock_machine_state();
        let f = machine_st.symbols.intern_functor("f", 2);
        let a = machine_st.symbols.intern_atom("a");

        for swap in [false, true] {
            machine_st.reset();

            // f(X, a) = f(3, Y)
            let x = machine_st.alloc_var().unwrap();
            let t1 = machine_st.alloc_structure(f).unwrap();
            machine_st.heap_push(x).unwrap();
            machine_st.heap_push(atom_as_cell!(a)).unwrap();

            let t2 = machine_st.alloc_structure(f).unwrap();
            machine_st.heap_push(int_as_cell!(3)).unwrap();
            let y = machine_st.alloc_var().unwrap();

            if swap {
                machine_st.unify(t2, t1).unwrap();
            } else {
                machine_st.unify(t1, t2).unwrap();
            }

            assert!(!machine_st.fail);
            assert_eq!(machine_st.deref(x).unwrap(), int_as_cell!(3));
            assert_eq!(machine_st.deref(y).unwrap(), atom_as_cell!(a));
        }
    }

    #[test]
    fn mismatched_functors_fail_both_ways() {
        let mut machine_st = mock_machine_state();
        let f = machine_st.symbols.intern_functor("f", 1);
        let g = machine_st.symbols.intern_functor("g", 1);

        let t1 = machine_st.alloc_structure(f).unwrap();
        machine_st.heap_push(int_as_cell!(1)).unwrap();
        let t2 = machine_st.alloc_structure(g).unwrap();
        machine_st.heap_push(int_as_cell!(1)).unwrap();

        machine_st.unify(t1, t2).unwrap();
        assert!(machine_st.fail);

        machine_st.fail = false;
        machine_st.unify(t2, t1).unwrap();
        assert!(machine_st.fail);
    }

    #[test]
    fn lists_unify_elementwise() {
        let mut machine_st = mock_machine_state();

        // [1|T] = [H|[]]
        let l1 = machine_st.h;
        machine_st.heap_push(int_as_cell!(1)).unwrap();
        let t = machine_st.alloc_var().unwrap();

        let l2 = machine_st.h;
        let hd = machine_st.alloc_var().unwrap();
        machine_st.heap_push(nil_as_cell!()).unwrap();

        machine_st
            .unify(list_loc_as_cell!(l1), list_loc_as_cell!(l2))
            .unwrap();

        assert!(!machine_st.fail);
        assert_eq!(machine_st.deref(hd).unwrap(), int_as_cell!(1));
        assert_eq!(machine_st.deref(t).unwrap(), nil_as_cell!());
    }

    #[test]
    fn lists_never_unify_with_structures() {
        let mut machine_st = mock_machine_state();
        let dot = machine_st.symbols.intern_functor(".", 2);

        let s = machine_st.alloc_structure(dot).unwrap();
        machine_st.heap_push(int_as_cell!(1)).unwrap();
        machine_st.heap_push(nil_as_cell!()).unwrap();

        let l = machine_st.h;
        machine_st.heap_push(int_as_cell!(1)).unwrap();
        machine_st.heap_push(nil_as_cell!()).unwrap();

        machine_st.unify(s, list_loc_as_cell!(l)).unwrap();
        assert!(machine_st.fail);
    }

    #[test]
    fn equal_floats_in_distinct_entries_do_not_unify() {
        let mut machine_st = mock_machine_state();

        let f1 = machine_st.symbols.add_float(1.5);
        let f2 = machine_st.symbols.add_float(1.5);

        machine_st.unify(flt_as_cell!(f1), flt_as_cell!(f1)).unwrap();
        assert!(!machine_st.fail);

        machine_st.unify(flt_as_cell!(f1), flt_as_cell!(f2)).unwrap();
        assert!(machine_st.fail);
    }

    #[test]
    fn aliased_variables_share_a_binding() {
        let mut machine_st = mock_machine_state();

        let x = machine_st.alloc_var().unwrap();
        let y = machine_st.alloc_var().unwrap();

        machine_st.unify(x, y).unwrap();
        machine_st.unify(y, int_as_cell!(7)).unwrap();

        assert!(!machine_st.fail);
        assert_eq!(machine_st.deref(x).unwrap(), int_as_cell!(7));

        machine_st.unify(x, int_as_cell!(8)).unwrap();
        assert!(machine_st.fail);
    }
}
