use crate::atom_table::*;
use crate::heap_print::*;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::types::*;

use fxhash::FxHashMap;

/// A thrown term, copied out of the heap so that backtracking to the catch
/// site cannot destroy it. Addresses inside are relative to the copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Ball {
    cells: Vec<Cell>,
}

impl Ball {
    pub(crate) fn record(machine_st: &MachineState, term: Cell) -> Result<Self, Fault> {
        let mut cells = vec![Cell::default()];
        let mut vars: FxHashMap<usize, usize> = FxHashMap::default();
        let mut worklist = vec![(0, term)];

        while let Some((dest, cell)) = worklist.pop() {
            let cell = machine_st.deref(cell)?;

            let copied = read_cell!(cell,
                (CellTag::Ref, addr) => {
                    let pos = *vars.entry(addr as usize).or_insert(dest);
                    ref_as_cell!(pos)
                }
                (CellTag::Str, s) => {
                    let s = s as usize;
                    let header = machine_st.memory.load(s)?;
                    let arity = machine_st.symbols.functor_arity(header.as_functor())?;
                    let pos = cells.len();

                    cells.push(header);

                    for i in 1..=arity {
                        cells.push(Cell::default());
                        worklist.push((pos + i, machine_st.memory.load(s + i)?));
                    }

                    str_loc_as_cell!(pos)
                }
                (CellTag::Lst, l) => {
                    let l = l as usize;
                    let pos = cells.len();

                    cells.push(Cell::default());
                    cells.push(Cell::default());

                    worklist.push((pos, machine_st.memory.load(l)?));
                    worklist.push((pos + 1, machine_st.memory.load(l + 1)?));

                    list_loc_as_cell!(pos)
                }
                (CellTag::Int | CellTag::Atm | CellTag::Flt, _) => {
                    cell
                }
            );

            cells[dest] = copied;
        }

        Ok(Ball { cells })
    }

    /// Copies the ball onto the heap and returns the root term.
    pub(crate) fn recall(&self, machine_st: &mut MachineState) -> Result<Cell, Fault> {
        let base = machine_st.h;

        for &cell in &self.cells {
            let relocated = read_cell!(cell,
                (CellTag::Ref, addr) => { ref_as_cell!(base + addr as usize) }
                (CellTag::Str, addr) => { str_loc_as_cell!(base + addr as usize) }
                (CellTag::Lst, addr) => { list_loc_as_cell!(base + addr as usize) }
                (CellTag::Int | CellTag::Atm | CellTag::Flt, _) => { cell }
            );

            machine_st.heap_push(relocated)?;
        }

        // the root's own slot only matters when the ball is a variable.
        Ok(machine_st.memory[base])
    }
}

impl MachineState {
    /// Records `term` as the exception and unwinds to the current block
    /// by failing into it. Without a block the exception is a fault.
    pub(crate) fn throw_exception(&mut self, term: Cell) -> Result<(), Fault> {
        debug!("throw: {}", self.term_to_string(term));

        self.ball = Some(Ball::record(self, term)?);
        self.throw_count += 1;

        self.unwind_to_block()
    }

    pub(crate) fn unwind_to_block(&mut self) -> Result<(), Fault> {
        match self.block {
            Some(block) => {
                self.b = block;
                self.fail = true;
                Ok(())
            }
            None => {
                let ball = match self.ball.clone() {
                    Some(ball) => {
                        let term = ball.recall(self)?;
                        self.term_to_string(term)
                    }
                    None => "<no exception term>".to_owned(),
                };

                Err(Fault::UncaughtException { ball })
            }
        }
    }

    /// Throws `error(existence_error(procedure, Name/Arity), Name/Arity)`.
    pub(crate) fn existence_error(&mut self, functor: Functor) -> Result<(), Fault> {
        let (name, arity) = self.symbols.functor(functor)?;

        let slash = self.symbols.intern_functor("/", 2);
        let existence_error = self.symbols.intern_functor("existence_error", 2);
        let error = self.symbols.intern_functor("error", 2);
        let procedure = self.symbols.intern_atom("procedure");

        let indicator = self.alloc_structure(slash)?;
        self.heap_push(atom_as_cell!(name))?;
        self.heap_push(int_as_cell!(arity))?;

        let culprit = self.alloc_structure(existence_error)?;
        self.heap_push(atom_as_cell!(procedure))?;
        self.heap_push(indicator)?;

        let term = self.alloc_structure(error)?;
        self.heap_push(culprit)?;
        self.heap_push(indicator)?;

        self.throw_exception(term)
    }

    pub(crate) fn term_to_string(&self, term: Cell) -> String {
        let printer = HCPrinter::new(self);

        match printer.print(term) {
            Ok(text) => text,
            Err(fault) => format!("<unprintable term: {}>", fault),
        }
    }
}
