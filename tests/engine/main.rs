mod helper;

use helper::*;
use wam_engine::instructions::opcode::*;
use wam_engine::types::integer_word;
use wam_engine::*;

use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn solutions_are_enumerated_by_backtracking() {
    let mut machine = small_machine();
    let p = load_int_facts(&mut machine, "p", &[10, 20, 30]);

    let x = machine.new_var().unwrap();
    let mut solutions = vec![];

    let mut outcome = machine.run_goal(p, &[x]).unwrap();

    while outcome == RunOutcome::Success {
        solutions.push(machine.deref(x).unwrap().as_integer());
        outcome = machine.next_solution().unwrap();
    }

    assert_eq!(outcome, RunOutcome::Failure);
    assert_eq!(solutions, vec![10, 20, 30]);
}

#[test]
fn foreign_predicates_see_dereferenced_arguments() {
    let mut machine = small_machine();
    let seen = Rc::new(RefCell::new(vec![]));
    let log = seen.clone();

    machine.register_foreign(
        "show",
        1,
        ForeignPredicate::deterministic(move |call| {
            let text = call.term_to_string(call.arg(0));
            log.borrow_mut().push(text);
            Ok(ForeignResult::Success)
        }),
    );

    let show = machine.symbols_mut().intern_functor("show", 1);
    let pair = machine.symbols_mut().intern_functor("pair", 2);
    let a = machine.symbols_mut().intern_atom("a");

    // q :- show(pair(a, [1, 2])).
    let q = machine.symbols_mut().intern_functor("q", 0);
    #[rustfmt::skip]
    let words = [
        ONLY_CLAUSE, 0,
        PUT_LIST, 1,
        UNIFY_INTEGER, integer_word(2),
        UNIFY_CONSTANT, 0,
        PUT_LIST, 2,
        UNIFY_INTEGER, integer_word(1),
        UNIFY_VALUE, 1, 1,
        PUT_STRUCTURE, pair.index(), 0,
        UNIFY_CONSTANT, a.index(),
        UNIFY_VALUE, 1, 2,
        EXECUTE, show.index(),
    ];

    let code = machine.add_code(words.to_vec());
    machine.add_predicate(Predicate::new(q, vec![code]));

    assert_eq!(machine.run_goal(q, &[]), Ok(RunOutcome::Success));
    assert_eq!(*seen.borrow(), vec!["pair(a,[1,2])".to_owned()]);
}

#[test]
fn failing_foreign_predicates_backtrack() {
    let mut machine = small_machine();

    machine.register_foreign(
        "odd",
        1,
        ForeignPredicate::deterministic(|call| {
            if call.arg(0).as_integer() % 2 == 1 {
                Ok(ForeignResult::Success)
            } else {
                Ok(ForeignResult::Failure)
            }
        }),
    );

    let p = load_int_facts(&mut machine, "p", &[2, 4, 5]);
    let odd = machine.symbols_mut().intern_functor("odd", 1);
    let r = machine.symbols_mut().intern_functor("r", 1);

    // r(X) :- p(X), odd(X).
    #[rustfmt::skip]
    let code = machine.add_code(vec![
        ONLY_CLAUSE, 0,
        ALLOCATE,
        GET_VARIABLE, 0, 0, 0,
        CALL, p.index(), 1,
        PUT_VALUE, 0, 0, 0,
        DEALLOCATE,
        EXECUTE, odd.index(),
    ]);
    machine.add_predicate(Predicate::new(r, vec![code]));

    let x = machine.new_var().unwrap();

    assert_eq!(machine.run_goal(r, &[x]), Ok(RunOutcome::Success));
    assert_eq!(machine.deref(x).unwrap().as_integer(), 5);
    assert_eq!(machine.next_solution(), Ok(RunOutcome::Failure));
}

#[test]
fn unknown_opcodes_produce_a_fault_report() {
    let mut machine = small_machine();
    let broken = machine.symbols_mut().intern_functor("broken", 0);

    let code = machine.add_code(vec![ONLY_CLAUSE, 0, 200]);
    machine.add_predicate(Predicate::new(broken, vec![code]));

    let report = machine.run_goal(broken, &[]).unwrap_err();

    assert_eq!(*report.fault(), Fault::UnknownOpcode { opcode: 200 });
    assert_eq!(report.predicate.as_deref(), Some("broken/0"));
    assert_eq!(report.recent_calls, vec!["broken/0".to_owned()]);
}

#[test]
fn invalid_configurations_are_rejected() {
    let result = MachineBuilder::new().with_heap_size(0).build();
    assert!(matches!(result, Err(Fault::Config { .. })));

    let result = MachineBuilder::new().with_stack_size(4).build();
    assert!(matches!(result, Err(Fault::Config { .. })));
}

#[test]
fn exceptions_are_formatted_for_the_host() {
    let mut machine = small_machine();
    let throw = machine.symbols_mut().intern_functor("throw", 1);
    let oops = machine.symbols_mut().intern_functor("oops", 1);

    let ball = machine.new_structure(oops, &[int(-3)]).unwrap();
    let report = machine.run_goal(throw, &[ball]).unwrap_err();

    assert_eq!(
        *report.fault(),
        Fault::UncaughtException {
            ball: "oops(-3)".to_owned()
        }
    );
}

#[test]
fn machines_reset_between_queries() {
    let mut machine = small_machine();
    let p = load_int_facts(&mut machine, "p", &[1]);

    assert_eq!(machine.run_goal(p, &[int(1)]), Ok(RunOutcome::Success));

    machine.reset();

    assert_eq!(machine.run_goal(p, &[int(1)]), Ok(RunOutcome::Success));
    assert_eq!(machine.run_goal(p, &[int(2)]), Ok(RunOutcome::Failure));
    assert!(machine.stats().instructions > 0);
}
