use wam_engine::instructions::opcode::*;
use wam_engine::types::integer_word;
use wam_engine::*;

pub fn int(n: i32) -> Cell {
    Cell::build_with(CellTag::Int, integer_word(n))
}

pub fn atom(atom: Atom) -> Cell {
    Cell::build_with(CellTag::Atm, atom.index())
}

/// Loads `name(n)` facts, one clause per value, chained with
/// try_me_else/retry_me_else/trust_me.
pub fn load_int_facts(machine: &mut Machine, name: &str, values: &[i32]) -> Functor {
    let key = machine.symbols_mut().intern_functor(name, 1);
    let last = values.len() - 1;

    let clauses = values
        .iter()
        .enumerate()
        .map(|(i, &n)| {
            let control = match i {
                0 if last == 0 => [ONLY_CLAUSE, 0],
                0 => [TRY_ME_ELSE, 1],
                i if i == last => [TRUST_ME, 0],
                i => [RETRY_ME_ELSE, i as u32 + 1],
            };

            let mut words = control.to_vec();
            words.extend_from_slice(&[GET_INTEGER, integer_word(n), 0, PROCEED]);

            machine.add_code(words)
        })
        .collect();

    machine.add_predicate(Predicate::new(key, clauses));
    key
}

pub fn small_machine() -> Machine {
    MachineBuilder::new()
        .with_heap_size(4096)
        .with_stack_size(1024)
        .with_trail_size(256)
        .build()
        .expect("a valid configuration")
}
