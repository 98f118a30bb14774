use crate::atom_table::*;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::types::*;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;

/// Output is cut off after this many subterms, which also bounds the
/// printing of cyclic terms.
pub const MAX_PRINTED_TERMS: usize = 100_000;

#[derive(Debug, Clone, Copy)]
enum TokenOrRedirect {
    Term(Cell),
    ListTail(Cell),
    Text(&'static str),
}

/// Renders heap terms in canonical form: no operators, no quoting, lists in
/// bracket notation and variables named `_G<n>` in order of appearance.
pub struct HCPrinter<'a> {
    machine_st: &'a MachineState,
    state_stack: Vec<TokenOrRedirect>,
    pub var_names: IndexMap<usize, usize, FxBuildHasher>,
    pub max_terms: usize,
}

impl<'a> HCPrinter<'a> {
    pub fn new(machine_st: &'a MachineState) -> Self {
        HCPrinter {
            machine_st,
            state_stack: vec![],
            var_names: IndexMap::with_hasher(FxBuildHasher::default()),
            max_terms: MAX_PRINTED_TERMS,
        }
    }

    fn symbols(&self) -> &SymbolTables {
        &self.machine_st.symbols
    }

    fn print_var(&mut self, addr: usize, output: &mut String) {
        let next = self.var_names.len();
        let n = *self.var_names.entry(addr).or_insert(next);

        output.push_str("_G");
        output.push_str(&n.to_string());
    }

    fn print_atom(&self, atom: Atom, output: &mut String) -> Result<(), Fault> {
        let name = self
            .symbols()
            .atom_name(atom)
            .ok_or(Fault::UnknownAtom {
                index: atom.index(),
            })?;

        output.push_str(name);
        Ok(())
    }

    fn print_float(&self, index: u32, output: &mut String) {
        match self.symbols().float(index) {
            Some(value) => output.push_str(&format!("{:?}", value)),
            None => output.push_str(&format!("<float {}>", index)),
        }
    }

    fn handle_term(&mut self, cell: Cell, output: &mut String) -> Result<(), Fault> {
        let cell = self.machine_st.deref(cell)?;

        read_cell!(cell,
            (CellTag::Ref, addr) => {
                self.print_var(addr as usize, output);
            }
            (CellTag::Int, _) => {
                output.push_str(&cell.as_integer().to_string());
            }
            (CellTag::Atm, _) => {
                self.print_atom(cell.as_atom(), output)?;
            }
            (CellTag::Flt, index) => {
                self.print_float(index, output);
            }
            (CellTag::Str, s) => {
                let s = s as usize;
                let header = self.machine_st.memory.load(s)?;
                let (name, arity) = self.symbols().functor(header.as_functor())?;

                self.print_atom(name, output)?;

                if arity > 0 {
                    output.push('(');
                    self.state_stack.push(TokenOrRedirect::Text(")"));

                    for i in (1..=arity).rev() {
                        self.state_stack.push(TokenOrRedirect::Term(ref_as_cell!(s + i)));

                        if i > 1 {
                            self.state_stack.push(TokenOrRedirect::Text(","));
                        }
                    }
                }
            }
            (CellTag::Lst, l) => {
                let l = l as usize;

                output.push('[');
                self.state_stack.push(TokenOrRedirect::ListTail(ref_as_cell!(l + 1)));
                self.state_stack.push(TokenOrRedirect::Term(ref_as_cell!(l)));
            }
        );

        Ok(())
    }

    fn handle_list_tail(&mut self, cell: Cell, output: &mut String) -> Result<(), Fault> {
        let cell = self.machine_st.deref(cell)?;

        if cell == nil_as_cell!() {
            output.push(']');
        } else if cell.is_tagged(CellTag::Lst) {
            let l = cell.addr();

            output.push(',');
            self.state_stack.push(TokenOrRedirect::ListTail(ref_as_cell!(l + 1)));
            self.state_stack.push(TokenOrRedirect::Term(ref_as_cell!(l)));
        } else {
            output.push('|');
            self.state_stack.push(TokenOrRedirect::Text("]"));
            self.state_stack.push(TokenOrRedirect::Term(cell));
        }

        Ok(())
    }

    pub fn print(mut self, term: Cell) -> Result<String, Fault> {
        let mut output = String::new();
        let mut printed = 0;

        self.state_stack.push(TokenOrRedirect::Term(term));

        while let Some(item) = self.state_stack.pop() {
            match item {
                TokenOrRedirect::Text(text) => output.push_str(text),
                _ if printed >= self.max_terms => {
                    output.push_str("...");
                    break;
                }
                TokenOrRedirect::Term(cell) => {
                    printed += 1;
                    self.handle_term(cell, &mut output)?;
                }
                TokenOrRedirect::ListTail(cell) => {
                    printed += 1;
                    self.handle_list_tail(cell, &mut output)?;
                }
            }
        }

        Ok(output)
    }
}
