use crate::atom_table::*;
use crate::machine::cut::CleanupGuard;
use crate::machine::foreign::*;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::machine::stack::CP_B;
use crate::machine::trace::*;
use crate::types::*;

#[inline]
fn succeed_if(unified: bool) -> ForeignResult {
    if unified {
        ForeignResult::Success
    } else {
        ForeignResult::Failure
    }
}

fn atom_arg<'a>(call: &'a ForeignCall, i: usize) -> Option<&'a str> {
    let cell = call.arg(i);

    if cell.is_tagged(CellTag::Atm) {
        call.symbols().atom_name(cell.as_atom())
    } else {
        None
    }
}

fn integer_arg(call: &ForeignCall, i: usize) -> Option<i32> {
    let cell = call.arg(i);

    if cell.is_tagged(CellTag::Int) {
        Some(cell.as_integer())
    } else {
        None
    }
}

fn address_cell(addr: Option<usize>) -> Cell {
    match addr {
        Some(addr) => int_as_cell!(addr),
        None => int_as_cell!(-1),
    }
}

fn throw(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    let ball = call.arg(0);
    call.throw(ball)
}

fn get_current_block(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    let block = address_cell(call.machine_st.block);
    call.unify(call.arg(0), block).map(succeed_if)
}

fn install_new_block(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    let b = call.machine_st.b;
    call.machine_st.block = Some(b);
    call.unify(call.arg(0), int_as_cell!(b)).map(succeed_if)
}

fn reset_block(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    match integer_arg(call, 0) {
        Some(block) => {
            call.machine_st.block = usize::try_from(block).ok();
            Ok(ForeignResult::Success)
        }
        None => Ok(ForeignResult::Failure),
    }
}

/// Drops the block's choicepoint along with the top one when the block is
/// directly below it.
fn clean_up_block(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    let Some(block) = integer_arg(call, 0).and_then(|block| usize::try_from(block).ok()) else {
        return Ok(ForeignResult::Failure);
    };

    let machine_st = &mut *call.machine_st;
    let b = machine_st.b;

    if b > machine_st.memory.heap_size() {
        let n = machine_st.memory.word(b)?;

        if machine_st.memory.word(b + n + CP_B)? == block && block > machine_st.memory.heap_size() {
            let n = machine_st.memory.word(block)?;

            machine_st.b = machine_st.memory.word(block + n + CP_B)?;
            machine_st.hb = machine_st.choicepoint_heap_top()?;
        }
    }

    Ok(ForeignResult::Success)
}

fn get_exception(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    match call.machine_st.ball.clone() {
        Some(ball) => {
            let term = ball.recall(call.machine_st)?;
            call.unify(call.arg(0), term).map(succeed_if)
        }
        None => Ok(ForeignResult::Failure),
    }
}

fn clear_exception(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    call.machine_st.ball = None;
    Ok(ForeignResult::Success)
}

fn get_backtrack_frame(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    let b = call.machine_st.b;
    call.unify(call.arg(0), int_as_cell!(b)).map(succeed_if)
}

fn set_backtrack_frame(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    match integer_arg(call, 0).and_then(|b| usize::try_from(b).ok()) {
        Some(b) => {
            call.machine_st.b = b;
            call.machine_st.hb = call.machine_st.choicepoint_heap_top()?;
            Ok(ForeignResult::Success)
        }
        None => Ok(ForeignResult::Failure),
    }
}

/// Protects the current choicepoint with a goal that runs when a cut or a
/// backtrack discards it.
fn push_cleanup(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    let goal = call.arg(0);

    let (functor, args) = if goal.is_tagged(CellTag::Atm) {
        let name = call
            .symbols()
            .atom_name(goal.as_atom())
            .ok_or(Fault::UnknownAtom {
                index: goal.get_value(),
            })?
            .to_owned();

        (call.symbols_mut().intern_functor(&name, 0), vec![])
    } else if goal.is_tagged(CellTag::Str) {
        let s = goal.addr();
        let functor = call.machine_st.memory.load(s)?.as_functor();
        let arity = call.symbols().functor_arity(functor)?;

        let args = (1..=arity)
            .map(|i| call.machine_st.memory.load(s + i))
            .collect::<Result<Vec<_>, _>>()?;

        (functor, args)
    } else {
        return Ok(ForeignResult::Failure);
    };

    let entry = call.code_repo.predicate(functor).and_then(|pred| pred.entry());

    match entry {
        Some(code) => {
            let depth = call.machine_st.b;

            call.machine_st.cleanups.push(CleanupGuard {
                depth,
                entry: CodePtr {
                    code,
                    predicate: Some(functor),
                    offset: 0,
                },
                args,
            });

            Ok(ForeignResult::Success)
        }
        None => {
            call.machine_st.existence_error(functor)?;
            Ok(ForeignResult::Failure)
        }
    }
}

fn pop_cleanup(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    if call.machine_st.cleanups.len() > call.machine_st.cleanup_floor {
        call.machine_st.cleanups.pop();
    }

    Ok(ForeignResult::Success)
}

fn trace_set(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    match atom_arg(call, 0).and_then(TraceMode::from_name) {
        Some(mode) => {
            call.machine_st.trace.call = mode;
            Ok(ForeignResult::Success)
        }
        None => Ok(ForeignResult::Failure),
    }
}

fn trace_value(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    let mode = call.machine_st.trace.call;
    let atom = call.symbols_mut().intern_atom(mode.as_str());

    call.unify(call.arg(0), atom_as_cell!(atom)).map(succeed_if)
}

fn trace_set_info(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    call.machine_st.trace.info = call.arg(0);
    Ok(ForeignResult::Success)
}

fn trace_instruction_set(call: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    match atom_arg(call, 0).and_then(InstructionTrace::from_name) {
        Some(mode) => {
            call.machine_st.trace.instruction = mode;
            Ok(ForeignResult::Success)
        }
        None => Ok(ForeignResult::Failure),
    }
}

fn succeed(_: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    Ok(ForeignResult::Success)
}

fn fail(_: &mut ForeignCall) -> Result<ForeignResult, Fault> {
    Ok(ForeignResult::Failure)
}

/// Registers the predicates every machine provides.
pub(crate) fn install_system_predicates(symbols: &mut SymbolTables, foreign: &mut ForeignTable) {
    type Builtin = fn(&mut ForeignCall) -> Result<ForeignResult, Fault>;

    let builtins: [(&str, usize, Builtin); 17] = [
        ("throw", 1, throw),
        ("get_current_block", 1, get_current_block),
        ("install_new_block", 1, install_new_block),
        ("reset_block", 1, reset_block),
        ("clean_up_block", 1, clean_up_block),
        ("get_exception", 1, get_exception),
        ("clear_exception", 0, clear_exception),
        ("get_backtrack_frame", 1, get_backtrack_frame),
        ("set_backtrack_frame", 1, set_backtrack_frame),
        ("$push_cleanup", 1, push_cleanup),
        ("$pop_cleanup", 0, pop_cleanup),
        ("trace_set", 1, trace_set),
        ("trace_value", 1, trace_value),
        ("trace_set_info", 1, trace_set_info),
        ("trace_instruction_set", 1, trace_instruction_set),
        ("true", 0, succeed),
        ("fail", 0, fail),
    ];

    for (name, arity, builtin) in builtins {
        let functor = symbols.intern_functor(name, arity);
        foreign.insert(functor, ForeignPredicate::deterministic(builtin));
    }
}
