use crate::atom_table::*;
use crate::instructions::RegType;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::machine::memory::Region;
use crate::machine::stack::*;
use crate::types::*;

impl MachineState {
    /// Follows a reference chain to its representative cell. An unbound
    /// variable is returned as the reference to itself.
    pub fn deref(&self, mut cell: Cell) -> Result<Cell, Fault> {
        while cell.is_ref() {
            let next = self.memory.load(cell.addr())?;

            if next == cell {
                break;
            }

            cell = next;
        }

        Ok(cell)
    }

    #[inline]
    pub(crate) fn heap_push(&mut self, cell: Cell) -> Result<usize, Fault> {
        let h = self.h;

        if h >= self.memory.heap_size() {
            return Err(Fault::HeapOverflow {
                h,
                limit: self.memory.heap_size(),
            });
        }

        self.memory[h] = cell;
        self.h += 1;

        if self.h > self.stats.max_heap {
            self.stats.max_heap = self.h;
        }

        Ok(h)
    }

    pub fn alloc_var(&mut self) -> Result<Cell, Fault> {
        let h = self.h;
        self.heap_push(ref_as_cell!(h))?;
        Ok(ref_as_cell!(h))
    }

    /// Pushes a structure header; the caller pushes the arguments.
    pub(crate) fn alloc_structure(&mut self, functor: Functor) -> Result<Cell, Fault> {
        let h = self.heap_push(functor_as_cell!(functor))?;
        Ok(str_loc_as_cell!(h))
    }

    /// Stack address of permanent variable `Yn` in the current environment.
    #[inline]
    pub(crate) fn perm_addr(&self, n: usize) -> Result<usize, Fault> {
        let addr = self.e + ENV_VARS + n;

        if addr < self.memory.stack_limit() {
            Ok(addr)
        } else {
            Err(Fault::StackOverflow {
                addr,
                limit: self.memory.stack_limit(),
            })
        }
    }

    #[inline]
    pub(crate) fn reg_value(&self, reg: RegType) -> Result<Cell, Fault> {
        match reg {
            RegType::Temp(x) => Ok(self.registers[x]),
            RegType::Perm(y) => self.memory.load(self.perm_addr(y)?),
        }
    }

    #[inline]
    pub(crate) fn set_reg(&mut self, reg: RegType, cell: Cell) -> Result<(), Fault> {
        match reg {
            RegType::Temp(x) => self.registers[x] = cell,
            RegType::Perm(y) => {
                let addr = self.perm_addr(y)?;
                self.memory[addr] = cell;
            }
        }

        Ok(())
    }

    /// A fresh unbound variable in `Yn`.
    pub(crate) fn new_perm_var(&mut self, n: usize) -> Result<Cell, Fault> {
        let addr = self.perm_addr(n)?;
        self.memory[addr] = ref_as_cell!(addr);
        Ok(ref_as_cell!(addr))
    }

    /// Binds whichever of `a` and `b` is the younger unbound variable to
    /// the other. Heap variables are always older than stack variables, so
    /// stack cells never point into discarded frames.
    pub(crate) fn bind(&mut self, a: Cell, b: Cell) -> Result<(), Fault> {
        if a.is_ref() && (!b.is_ref() || b.addr() < a.addr()) {
            self.memory.store_at(a.addr(), b)?;
            self.trail(a)
        } else {
            self.memory.store_at(b.addr(), a)?;
            self.trail(b)
        }
    }

    /// Records `var` if a backtrack would otherwise not reset it: it is
    /// older than the heap barrier, or a stack cell below the newest
    /// choicepoint.
    #[inline]
    pub(crate) fn trail(&mut self, var: Cell) -> Result<(), Fault> {
        let addr = var.addr();

        if addr < self.hb || (self.h < addr && addr < self.b) {
            if self.tr >= self.memory.trail_limit() {
                return Err(Fault::TrailOverflow {
                    tr: self.tr,
                    limit: self.memory.trail_limit(),
                });
            }

            self.memory[self.tr] = ref_as_cell!(addr);
            self.tr += 1;
        }

        Ok(())
    }

    /// Resets every variable trailed in `[from, to)` to unbound.
    pub(crate) fn unwind_trail(&mut self, from: usize, to: usize) -> Result<(), Fault> {
        for entry in from..to {
            let addr = self.memory.load(entry)?.addr();
            self.memory.store_at(addr, ref_as_cell!(addr))?;
        }

        Ok(())
    }

    /// Drops trail entries above the top choicepoint's saved TR that no
    /// live choicepoint needs. Entries are removed by moving the last entry
    /// into their place.
    pub(crate) fn tidy_trail(&mut self) -> Result<(), Fault> {
        let n = self.memory.word(self.b)?;
        let mut t = self.memory.word(self.b + n + CP_TR)?;

        while t < self.tr {
            let addr = self.memory.load(t)?.addr();

            if addr < self.hb || (self.h < addr && addr < self.b) {
                t += 1;
            } else {
                self.tr -= 1;
                self.memory[t] = self.memory[self.tr];
            }
        }

        Ok(())
    }

    /// Heap barrier for the current top choicepoint.
    pub(crate) fn choicepoint_heap_top(&self) -> Result<usize, Fault> {
        if self.b <= self.memory.heap_size() {
            return Ok(0);
        }

        let n = self.memory.word(self.b)?;
        self.memory.word(self.b + n + CP_H)
    }

    #[inline]
    pub(crate) fn validate_heap_top(&self, h: usize) -> Result<usize, Fault> {
        if h <= self.memory.heap_size() {
            Ok(h)
        } else {
            Err(Fault::FrameOutOfRange {
                register: "H",
                addr: h,
                region: Region::Heap,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::code_repo::CodeRepo;
    use crate::machine::config::MachineConfig;

    fn machine_st() -> MachineState {
        let config = MachineConfig {
            heap_size: 64,
            stack_size: 64,
            trail_size: 8,
            ..MachineConfig::default()
        };

        MachineState::new(&config, SymbolTables::new())
    }

    #[test]
    fn deref_stops_at_a_self_reference() {
        let mut machine_st = machine_st();

        let x = machine_st.alloc_var().unwrap();
        let y = machine_st.alloc_var().unwrap();

        machine_st.bind(y, x).unwrap();
        assert_eq!(machine_st.deref(y).unwrap(), x);

        machine_st.bind(x, int_as_cell!(3)).unwrap();
        assert_eq!(machine_st.deref(y).unwrap(), int_as_cell!(3));
    }

    #[test]
    fn bind_points_the_younger_variable_at_the_older() {
        let mut machine_st = machine_st();

        let old = machine_st.alloc_var().unwrap();
        let young = machine_st.alloc_var().unwrap();

        machine_st.bind(old, young).unwrap();

        assert_eq!(machine_st.memory[young.addr()], old);
        assert_eq!(machine_st.memory[old.addr()], old);
    }

    #[test]
    fn only_conditional_bindings_are_trailed() {
        let mut machine_st = machine_st();
        let trail_base = machine_st.memory.trail_base();

        let old = machine_st.alloc_var().unwrap();
        machine_st.hb = machine_st.h;
        let young = machine_st.alloc_var().unwrap();

        machine_st.bind(young, atom_as_cell!(Atom::NIL)).unwrap();
        assert_eq!(machine_st.tr, trail_base);

        machine_st.bind(old, atom_as_cell!(Atom::NIL)).unwrap();
        assert_eq!(machine_st.tr, trail_base + 1);
        assert_eq!(machine_st.memory[trail_base], old);

        machine_st.unwind_trail(trail_base, machine_st.tr).unwrap();
        assert_eq!(machine_st.deref(old).unwrap(), old);
    }

    #[test]
    fn trail_exhaustion_is_a_fault() {
        let mut machine_st = machine_st();

        let vars: Vec<Cell> = (0..9).map(|_| machine_st.alloc_var().unwrap()).collect();
        machine_st.hb = machine_st.h;

        let mut result = Ok(());

        for var in vars {
            result = machine_st.bind(var, int_as_cell!(1));

            if result.is_err() {
                break;
            }
        }

        assert!(matches!(result, Err(Fault::TrailOverflow { .. })));
    }

    #[test]
    fn heap_exhaustion_is_a_fault() {
        let mut machine_st = machine_st();

        for _ in 0..64 {
            machine_st.alloc_var().unwrap();
        }

        assert_eq!(
            machine_st.alloc_var(),
            Err(Fault::HeapOverflow { h: 64, limit: 64 })
        );
        assert_eq!(machine_st.stats.max_heap, 64);
    }

    #[test]
    fn tidy_trail_keeps_only_entries_a_live_choicepoint_needs() {
        let mut machine_st = machine_st();
        let code_repo = CodeRepo::new();
        let trail_base = machine_st.memory.trail_base();

        machine_st.init_toplevel_frame().unwrap();

        let older = machine_st.alloc_var().unwrap();
        machine_st
            .push_or_frame(&code_repo, CodePtr::halt(), None)
            .unwrap();
        let outer = machine_st.b;

        let middle = machine_st.alloc_var().unwrap();
        machine_st
            .push_or_frame(&code_repo, CodePtr::halt(), None)
            .unwrap();

        machine_st.bind(older, atom_as_cell!(Atom::NIL)).unwrap();
        machine_st.bind(middle, atom_as_cell!(Atom::NIL)).unwrap();
        assert_eq!(machine_st.tr, trail_base + 2);

        // cut back to the outer choicepoint.
        machine_st.b = outer;
        machine_st.hb = machine_st.choicepoint_heap_top().unwrap();
        machine_st.tidy_trail().unwrap();

        assert_eq!(machine_st.tr, trail_base + 1);
        assert_eq!(machine_st.memory[trail_base], older);
    }
}
