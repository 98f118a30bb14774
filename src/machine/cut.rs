use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::machine::stack::*;
use crate::machine::trace::InstructionTrace;
use crate::machine::{Machine, RunOutcome};
use crate::types::*;

/// A goal to run when the choicepoint at `depth` is cut away or
/// backtracked through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CleanupGuard {
    pub(crate) depth: usize,
    pub(crate) entry: CodePtr,
    pub(crate) args: Vec<Cell>,
}

impl Machine {
    /// Pops the newest guard if it is above the floor of the current run
    /// and its depth satisfies `discarded`.
    fn take_guard(&mut self, discarded: impl Fn(usize) -> bool) -> Option<CleanupGuard> {
        let machine_st = &mut self.machine_st;

        match machine_st.cleanups.last() {
            Some(guard)
                if machine_st.cleanups.len() > machine_st.cleanup_floor
                    && discarded(guard.depth) =>
            {
                machine_st.cleanups.pop()
            }
            _ => None,
        }
    }

    /// Removes every choicepoint above `barrier`, running the cleanup
    /// guards of the discarded ones newest first.
    pub(crate) fn cut_to(&mut self, barrier: usize) -> Result<(), Fault> {
        let old_b = self.machine_st.b;

        if old_b <= barrier {
            return Ok(());
        }

        let throw_count = self.machine_st.throw_count;

        while let Some(guard) = self.take_guard(|depth| barrier < depth && depth < old_b) {
            self.run_cleanup(guard)?;
        }

        debug!("cut: B {} -> {}", old_b, barrier);

        self.machine_st.b = barrier;

        if barrier > self.machine_st.memory.heap_size() {
            self.machine_st.hb = self.machine_st.choicepoint_heap_top()?;
            self.machine_st.tidy_trail()?;
        } else {
            self.machine_st.hb = 0;
        }

        if self.machine_st.throw_count != throw_count {
            self.machine_st.unwind_to_block()?;
        }

        Ok(())
    }

    pub(crate) fn neck_cut(&mut self) -> Result<(), Fault> {
        let b0 = self.machine_st.b0;
        self.cut_to(b0)
    }

    /// Runs the guards of the choicepoint about to be resumed and of any
    /// above it. An exception raised by a guard moves B to the block, and
    /// the guards of the choicepoints skipped on the way run too.
    pub(crate) fn run_backtrack_cleanups(&mut self) -> Result<(), Fault> {
        loop {
            let b = self.machine_st.b;
            let throw_count = self.machine_st.throw_count;

            let Some(guard) = self.take_guard(|depth| depth >= b) else {
                return Ok(());
            };

            self.run_cleanup(guard)?;

            if self.machine_st.throw_count != throw_count {
                self.machine_st.unwind_to_block()?;
                self.machine_st.fail = false;
            }
        }
    }

    /// Runs a guard goal to its first solution in a nested dispatch run.
    /// Every register but H and TR is restored afterwards, the fail flag
    /// included.
    pub(crate) fn run_cleanup(&mut self, guard: CleanupGuard) -> Result<(), Fault> {
        debug!(
            "running cleanup guard at depth {} ({} args)",
            guard.depth,
            guard.args.len()
        );

        // a scratch environment keeps the guard's frames above the live ones.
        let top = self.machine_st.frame_top(&self.code_repo)?;
        self.machine_st.reserve_frame(top, ENV_VARS)?;

        let saved = self.machine_st.save_registers();
        let failing = self.machine_st.fail;
        let machine_st = &mut self.machine_st;

        machine_st
            .memory
            .store_at(top + E_CE, addr_as_cell!(machine_st.e))?;
        machine_st
            .memory
            .set_continuation(top + E_CP, CodePtr::halt())?;

        machine_st.e = top;
        machine_st.cp = CodePtr::halt();
        machine_st.b_floor = machine_st.b;
        machine_st.b0 = machine_st.b;
        machine_st.cleanup_floor = machine_st.cleanups.len();
        machine_st.trace.instruction = InstructionTrace::NoTrace;
        machine_st.foreign_retry = false;
        machine_st.fail = false;
        machine_st.pdl.clear();

        for (i, &arg) in guard.args.iter().enumerate() {
            machine_st.registers[i] = arg;
        }

        machine_st.num_of_args = guard.args.len();
        machine_st.code = guard.entry.code;
        machine_st.current_predicate = guard.entry.predicate;
        machine_st.p = guard.entry.offset;

        let outcome = self.dispatch_loop();
        self.machine_st.restore_registers(saved);
        self.machine_st.fail = failing;

        match outcome? {
            RunOutcome::Success => {}
            RunOutcome::Failure => debug!("cleanup guard failed"),
            RunOutcome::Suspended => warn!("cleanup guard suspended; treating it as finished"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::foreign::*;
    use crate::machine::mock_wam::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    fn counting_guard(machine: &mut Machine, name: &str) -> (CodePtr, Rc<RefCell<Vec<i32>>>) {
        let runs = Rc::new(RefCell::new(vec![]));
        let log = runs.clone();

        machine.register_foreign(
            "record",
            1,
            ForeignPredicate::deterministic(move |call| {
                log.borrow_mut().push(call.arg(0).as_integer());
                Ok(ForeignResult::Success)
            }),
        );

        let record = machine.symbols_mut().intern_functor("record", 1);
        let guard = machine.symbols_mut().intern_functor(name, 1);

        let code = Assembler::new().execute(record).finish();
        let entry = machine.add_clauses(guard, vec![code]);

        (entry, runs)
    }

    fn push_choicepoints(machine: &mut Machine, count: usize) -> Vec<usize> {
        let code_repo = &machine.code_repo;
        let machine_st = &mut machine.machine_st;

        (0..count)
            .map(|_| {
                machine_st
                    .push_or_frame(code_repo, CodePtr::halt(), None)
                    .unwrap();
                machine_st.b
            })
            .collect()
    }

    #[test]
    fn cut_runs_the_guards_it_discards_newest_first() {
        let mut machine = mock_machine();
        let (entry, runs) = counting_guard(&mut machine, "guard");

        machine.machine_st.init_toplevel_frame().unwrap();
        let frames = push_choicepoints(&mut machine, 3);

        for (i, &depth) in frames.iter().enumerate() {
            machine.machine_st.cleanups.push(CleanupGuard {
                depth,
                entry,
                args: vec![int_as_cell!(i)],
            });
        }

        // the newest guard was pushed at the current B, so it shields the
        // older ones.
        machine.machine_st.b = frames[2];
        machine.cut_to(frames[0]).unwrap();

        assert_eq!(machine.machine_st.b, frames[0]);
        assert!(runs.borrow().is_empty());

        machine.machine_st.cleanups.truncate(2);
        machine.machine_st.b = frames[2];
        machine.cut_to(frames[0]).unwrap();

        assert_eq!(*runs.borrow(), vec![1]);
        assert_eq!(machine.machine_st.cleanups.len(), 1);
    }

    #[test]
    fn guard_runs_restore_the_registers() {
        let mut machine = mock_machine();
        let (entry, runs) = counting_guard(&mut machine, "guard");

        machine.machine_st.init_toplevel_frame().unwrap();
        let frames = push_choicepoints(&mut machine, 2);

        machine.machine_st.registers[0] = int_as_cell!(77);
        machine.machine_st.p = 5;
        let e = machine.machine_st.e;

        machine
            .run_cleanup(CleanupGuard {
                depth: frames[1],
                entry,
                args: vec![int_as_cell!(9)],
            })
            .unwrap();

        assert_eq!(*runs.borrow(), vec![9]);
        assert_eq!(machine.machine_st.registers[0], int_as_cell!(77));
        assert_eq!(machine.machine_st.p, 5);
        assert_eq!(machine.machine_st.e, e);
        assert_eq!(machine.machine_st.b, frames[1]);
    }

    #[test]
    fn backtracking_runs_guards_at_or_above_the_resumed_frame() {
        let mut machine = mock_machine();
        let (entry, runs) = counting_guard(&mut machine, "guard");

        machine.machine_st.init_toplevel_frame().unwrap();
        let frames = push_choicepoints(&mut machine, 2);

        for (i, &depth) in frames.iter().enumerate() {
            machine.machine_st.cleanups.push(CleanupGuard {
                depth,
                entry,
                args: vec![int_as_cell!(i)],
            });
        }

        machine.run_backtrack_cleanups().unwrap();

        assert_eq!(*runs.borrow(), vec![1]);
        assert_eq!(machine.machine_st.cleanups.len(), 1);
    }

    #[test]
    fn guards_run_while_the_machine_is_failing() {
        let mut machine = mock_machine();
        let (entry, runs) = counting_guard(&mut machine, "guard");

        machine.machine_st.init_toplevel_frame().unwrap();
        let frames = push_choicepoints(&mut machine, 1);

        machine.machine_st.cleanups.push(CleanupGuard {
            depth: frames[0],
            entry,
            args: vec![int_as_cell!(4)],
        });

        machine.machine_st.fail = true;
        machine.run_backtrack_cleanups().unwrap();

        assert_eq!(*runs.borrow(), vec![4]);
        assert!(machine.machine_st.cleanups.is_empty());
        assert!(machine.machine_st.fail);
    }
}
