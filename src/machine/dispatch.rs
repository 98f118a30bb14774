use crate::atom_table::*;
use crate::indexing::search_table;
use crate::instructions::*;
use crate::machine::code_repo::*;
use crate::machine::config::UnknownPolicy;
use crate::machine::foreign::*;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::machine::stack::*;
use crate::machine::trace::*;
use crate::machine::{Machine, RunOutcome};
use crate::types::*;

use log::Level;

macro_rules! fail_unless {
    ($machine_st:expr, $cond:expr) => {
        if !$cond {
            $machine_st.fail = true;
        }
    };
}

impl Machine {
    /// Runs until `halt`, final failure, a suspension point or a fault.
    pub(crate) fn dispatch_loop(&mut self) -> Result<RunOutcome, Fault> {
        self.machine_st.stats.enter();
        let outcome = self.run_instructions();
        self.machine_st.stats.exit();

        outcome
    }

    fn run_instructions(&mut self) -> Result<RunOutcome, Fault> {
        loop {
            if self.machine_st.fail && !self.backtrack()? {
                return Ok(RunOutcome::Failure);
            }

            let words = self.code_repo.words(self.machine_st.code)?;
            let instr = Instruction::decode(words, self.machine_st.p)?;

            if self.machine_st.trace.traces_instructions() {
                if let Some(outcome) = self.trace_instruction(instr) {
                    return Ok(outcome);
                }
            } else {
                self.machine_st.trace.debugging = false;
                self.step_resumed = false;
            }

            if log_enabled!(Level::Trace) {
                trace!("{}", self.describe(instr));
            }

            self.machine_st.stats.instructions += 1;

            if let Some(outcome) = self.execute_instr(instr)? {
                return Ok(outcome);
            }

            if self.machine_st.suspend_requested {
                self.machine_st.suspend_requested = false;
                return Ok(RunOutcome::Suspended);
            }
        }
    }

    pub(crate) fn describe(&self, instr: Instruction) -> InstructionDescriptor {
        let symbols = &self.machine_st.symbols;

        InstructionDescriptor {
            instruction: instr,
            predicate: self
                .machine_st
                .current_predicate
                .map(|f| symbols.indicator(f).to_string()),
            p: self.machine_st.p,
            text: instr.display(symbols).to_string(),
        }
    }

    // reports the instruction to the hook, or suspends before it.
    fn trace_instruction(&mut self, instr: Instruction) -> Option<RunOutcome> {
        let descriptor = self.describe(instr);

        match self.machine_st.trace.instruction {
            InstructionTrace::Step => {
                // resuming from a step suspension runs the instruction as is.
                if !std::mem::take(&mut self.step_resumed) {
                    let command = self
                        .trace_hook
                        .as_mut()
                        .and_then(|hook| hook.step(&descriptor));

                    match command {
                        Some(command) => self.machine_st.trace.apply(command),
                        None => {
                            self.step_resumed = true;
                            return Some(RunOutcome::Suspended);
                        }
                    }
                }
            }
            InstructionTrace::Trace => match self.trace_hook.as_mut() {
                Some(hook) => hook.instruction(&descriptor),
                None => trace!("{}", descriptor),
            },
            InstructionTrace::NoTrace => {}
        }

        if self.machine_st.trace.debugging {
            debug!("{}", descriptor);
        }

        None
    }

    /// Resumes the newest choicepoint. Returns false when there is none
    /// above the floor of the current run.
    pub(crate) fn backtrack(&mut self) -> Result<bool, Fault> {
        self.run_backtrack_cleanups()?;

        let machine_st = &mut self.machine_st;

        if machine_st.b <= machine_st.b_floor {
            return Ok(false);
        }

        let frame = machine_st.or_frame(machine_st.b)?;

        debug!("backtrack to B = {}", machine_st.b);

        machine_st.b0 = frame.b0;
        machine_st.unwind_trail(frame.tr, machine_st.tr)?;
        machine_st.num_of_args = frame.num_args();

        machine_st.code = frame.next.code;
        machine_st.current_predicate = frame.next.predicate;
        machine_st.p = frame.next.offset;

        machine_st.fail = false;
        machine_st.pdl.clear();

        Ok(true)
    }

    fn current_predicate(&self, label: CodeLabel) -> Result<Functor, Fault> {
        self.machine_st
            .current_predicate
            .ok_or(Fault::NoCurrentPredicate {
                label: label.as_word(),
            })
    }

    /// Where a choicepoint resumes for the alternative `label`: the start
    /// of a clause, control instruction included.
    fn alternative(&self, label: CodeLabel) -> Result<CodePtr, Fault> {
        let predicate = self.current_predicate(label)?;

        match label {
            CodeLabel::Clause(n) => Ok(CodePtr {
                code: self.code_repo.clause(predicate, n)?,
                predicate: Some(predicate),
                offset: 0,
            }),
            CodeLabel::Offset(offset) => Ok(CodePtr {
                code: self.machine_st.code,
                predicate: Some(predicate),
                offset,
            }),
        }
    }

    /// Jumps to `label`. A clause label lands past the clause's control
    /// instruction unless `at_control` is set.
    fn goto_label(&mut self, label: CodeLabel, at_control: bool) -> Result<(), Fault> {
        match label {
            CodeLabel::Clause(n) => {
                let predicate = self.current_predicate(label)?;

                self.machine_st.code = self.code_repo.clause(predicate, n)?;
                self.machine_st.p = if at_control { 0 } else { 2 };
            }
            CodeLabel::Offset(offset) => {
                self.machine_st.p = offset;
            }
        }

        Ok(())
    }

    fn goto_code(&mut self, ptr: CodePtr) {
        self.machine_st.code = ptr.code;
        self.machine_st.current_predicate = ptr.predicate;
        self.machine_st.p = ptr.offset;
    }

    fn next_instr(&self, offset: usize) -> CodePtr {
        CodePtr {
            code: self.machine_st.code,
            predicate: self.machine_st.current_predicate,
            offset: self.machine_st.p + offset,
        }
    }

    /// Continues at `cp`, taking the argument count from its predicate.
    fn proceed_to(&mut self, cp: CodePtr) -> Result<(), Fault> {
        self.machine_st.num_of_args = match cp.predicate {
            Some(predicate) => self.machine_st.symbols.functor_arity(predicate)?,
            None => 0,
        };

        self.goto_code(cp);
        Ok(())
    }

    fn call_predicate(&mut self, target: Functor, is_call: bool) -> Result<(), Fault> {
        let arity = self.machine_st.symbols.functor_arity(target)?;
        let return_ptr = self.next_instr(3);

        if self.machine_st.traces_calls() {
            let trace_entry = self.config.trace_predicate.and_then(|trace_predicate| {
                self.code_repo
                    .predicate(trace_predicate)
                    .and_then(Predicate::entry)
                    .map(|entry| (trace_predicate, entry))
            });

            let name = self.machine_st.symbols.functor_name(target)?;

            if let Some((trace_predicate, entry)) = trace_entry {
                if !is_untraced_predicate(name) {
                    debug!("trace {}", self.machine_st.symbols.indicator(target));

                    if is_call {
                        self.machine_st.cp = return_ptr;
                    }

                    self.machine_st.setup_trace_call(target)?;
                    self.goto_code(CodePtr {
                        code: entry,
                        predicate: Some(trace_predicate),
                        offset: 0,
                    });

                    return Ok(());
                }
            }
        }

        let retrying = std::mem::take(&mut self.machine_st.foreign_retry);

        if !retrying {
            self.machine_st.advance_next_trace();
        }

        self.machine_st.log_call(target);

        if let Some(entry) = self.code_repo.predicate(target).and_then(Predicate::entry) {
            debug!("call {}", self.machine_st.symbols.indicator(target));

            if is_call {
                self.machine_st.cp = return_ptr;
            }

            self.machine_st.num_of_args = arity;
            self.machine_st.b0 = self.machine_st.b;

            self.goto_code(CodePtr {
                code: entry,
                predicate: Some(target),
                offset: 0,
            });

            return Ok(());
        }

        if self.foreign.contains_key(&target) {
            if is_call {
                self.machine_st.cp = return_ptr;
            }

            return self.call_foreign(target, arity, retrying);
        }

        if self.code_repo.predicate(target).is_some() {
            return Err(Fault::EmptyPredicate {
                name: self.machine_st.symbols.indicator(target).to_string(),
            });
        }

        self.undefined_predicate(target)
    }

    fn call_foreign(&mut self, target: Functor, arity: usize, retrying: bool) -> Result<(), Fault> {
        let retry = if retrying {
            self.machine_st.foreign_value.take()
        } else {
            None
        };

        let kind = self.foreign[&target].kind();

        debug!(
            "call foreign {}{}",
            self.machine_st.symbols.indicator(target),
            if retry.is_some() { " (retry)" } else { "" }
        );

        let own_frame = match kind {
            ForeignKind::Deterministic => None,
            ForeignKind::Nondeterministic => {
                if retry.is_none() {
                    let call_site = self.next_instr(0);

                    self.machine_st.num_of_args = arity;
                    self.machine_st.push_or_frame(
                        &self.code_repo,
                        CodePtr::retry_foreign(),
                        Some((nil_as_cell!(), call_site)),
                    )?;
                }

                Some(self.machine_st.b)
            }
        };

        let result = {
            let predicate = self
                .foreign
                .get_mut(&target)
                .ok_or(Fault::ForeignProtocol {
                    reason: "foreign predicate removed during a call",
                })?;

            let mut call = ForeignCall::new(&mut self.machine_st, &self.code_repo, arity, retry)?;
            (predicate.handler)(&mut call)?
        };

        match result {
            ForeignResult::Success => {
                if own_frame == Some(self.machine_st.b) {
                    self.machine_st.pop_or_frame()?;
                }

                let cp = self.machine_st.cp;
                self.proceed_to(cp)
            }
            ForeignResult::Redo(value) => {
                let Some(b) = own_frame else {
                    return Err(Fault::ForeignProtocol {
                        reason: "a deterministic foreign predicate asked to be retried",
                    });
                };

                self.machine_st.memory.store_at(b + FCP_V, value)?;

                let cp = self.machine_st.cp;
                self.proceed_to(cp)
            }
            ForeignResult::Failure => {
                if own_frame == Some(self.machine_st.b) {
                    self.machine_st.pop_or_frame()?;
                }

                self.machine_st.fail = true;
                Ok(())
            }
        }
    }

    /// Re-enters a nondeterministic foreign predicate from its choicepoint.
    fn retry_foreign(&mut self) -> Result<(), Fault> {
        let b = self.machine_st.b;
        self.machine_st.restore_or_frame()?;

        let value = self.machine_st.memory.load(b + FCP_V)?;
        let call_site = self.machine_st.memory.continuation(b + FCP_C)?;

        self.machine_st.foreign_retry = true;
        self.machine_st.foreign_value = Some(value);
        self.goto_code(call_site);

        Ok(())
    }

    fn undefined_predicate(&mut self, target: Functor) -> Result<(), Fault> {
        match self.config.unknown {
            UnknownPolicy::Error => self.machine_st.existence_error(target),
            UnknownPolicy::Warning => {
                warn!(
                    "Undefined predicate {}",
                    self.machine_st.symbols.indicator(target)
                );

                self.machine_st.fail = true;
                Ok(())
            }
            UnknownPolicy::Fail => {
                self.machine_st.fail = true;
                Ok(())
            }
        }
    }

    fn switch_on_term(&mut self, targets: SwitchOnTermTargets) -> Result<(), Fault> {
        let a0 = self.machine_st.deref(self.machine_st.registers[0])?;

        let (target, at_control) = read_cell!(a0,
            (CellTag::Ref, _) => { (targets.var, true) }
            (CellTag::Atm, _) => { (targets.atom, false) }
            (CellTag::Int, _) => { (targets.integer, false) }
            (CellTag::Flt, _) => { (targets.float, false) }
            (CellTag::Lst, _) => { (targets.list, false) }
            (CellTag::Str, _) => { (targets.structure, false) }
        );

        match target {
            Some(label) => self.goto_label(label, at_control),
            None => {
                self.machine_st.fail = true;
                Ok(())
            }
        }
    }

    fn switch_on_key(&mut self, kind: TableKind, key: Option<u32>, start: usize) -> Result<(), Fault> {
        let label = match key {
            Some(key) => search_table(self.code_repo.words(self.machine_st.code)?, kind, key, start)?,
            None => None,
        };

        match label {
            Some(label) => self.goto_label(label, false),
            None => {
                self.machine_st.fail = true;
                Ok(())
            }
        }
    }

    /// Executes one instruction. `Some` ends the run.
    fn execute_instr(&mut self, instr: Instruction) -> Result<Option<RunOutcome>, Fault> {
        let size = instr.size();

        match instr {
            Instruction::Allocate => {
                self.machine_st.allocate_and_frame(&self.code_repo)?;
                self.machine_st.p += size;
            }
            Instruction::Deallocate => {
                self.machine_st.deallocate_and_frame()?;
                self.machine_st.p += size;
            }
            Instruction::Call(target, _) => {
                self.call_predicate(target, true)?;
            }
            Instruction::Execute(target) => {
                self.call_predicate(target, false)?;
            }
            Instruction::Proceed => {
                let cp = self.machine_st.cp;
                self.proceed_to(cp)?;
            }
            Instruction::CallAux(offset, arity, _) => {
                self.machine_st.cp = self.next_instr(size);
                self.machine_st.num_of_args = arity;
                self.machine_st.b0 = self.machine_st.b;
                self.machine_st.p = offset;
            }
            Instruction::ExecuteAux(offset, arity) => {
                self.machine_st.num_of_args = arity;
                self.machine_st.b0 = self.machine_st.b;
                self.machine_st.p = offset;
            }
            Instruction::TryMeElse(label) => {
                let next = self.alternative(label)?;

                self.machine_st.push_or_frame(&self.code_repo, next, None)?;
                self.machine_st.p += size;
            }
            Instruction::RetryMeElse(label) => {
                let next = self.alternative(label)?;

                self.machine_st.restore_or_frame()?;
                self.machine_st.set_next_alternative(next)?;
                self.machine_st.p += size;
            }
            Instruction::TrustMe => {
                self.machine_st.restore_or_frame()?;
                self.machine_st.pop_or_frame()?;
                self.machine_st.p += size;
            }
            Instruction::Try(label) => {
                let next = self.next_instr(size);

                self.machine_st.push_or_frame(&self.code_repo, next, None)?;
                self.goto_label(label, false)?;
            }
            Instruction::Retry(label) => {
                let next = self.next_instr(size);

                self.machine_st.restore_or_frame()?;
                self.machine_st.set_next_alternative(next)?;
                self.goto_label(label, false)?;
            }
            Instruction::Trust(label) => {
                self.machine_st.restore_or_frame()?;
                self.machine_st.pop_or_frame()?;
                self.goto_label(label, false)?;
            }
            Instruction::GotoClause(label) => {
                self.goto_label(label, false)?;
            }
            Instruction::SwitchOnTerm(targets) => {
                self.switch_on_term(targets)?;
            }
            Instruction::SwitchOnConstant(kind, start) => {
                let a0 = self.machine_st.deref(self.machine_st.registers[0])?;
                self.switch_on_key(kind, Some(a0.get_value()), start)?;
            }
            Instruction::SwitchOnStructure(kind, start) => {
                let a0 = self.machine_st.deref(self.machine_st.registers[0])?;

                let key = if a0.is_tagged(CellTag::Str) {
                    Some(self.machine_st.memory.load(a0.addr())?.get_value())
                } else {
                    None
                };

                self.switch_on_key(kind, key, start)?;
            }
            Instruction::OnlyClause => {
                self.machine_st.p += size;
            }
            Instruction::NeckCut => {
                self.neck_cut()?;
                self.machine_st.p += size;
            }
            Instruction::Cut(y) => {
                let addr = self.machine_st.perm_addr(y)?;
                let barrier = self.machine_st.memory.load(addr)?.addr();

                self.cut_to(barrier)?;
                self.machine_st.p += size;
            }
            Instruction::GetLevel(y) => {
                let addr = self.machine_st.perm_addr(y)?;

                self.machine_st.memory[addr] = addr_as_cell!(self.machine_st.b0);
                self.machine_st.p += size;
            }
            Instruction::GetChoicepoint(depth, y) => {
                let addr = self.machine_st.perm_addr(y)?;
                let b = self.machine_st.nth_or_frame(depth)?;

                self.machine_st.memory[addr] = addr_as_cell!(b);
                self.machine_st.p += size;
            }
            Instruction::RetryForeign => {
                self.retry_foreign()?;
            }
            Instruction::Halt => {
                return Ok(Some(RunOutcome::Success));
            }
            instr => {
                self.machine_st.execute_term_instr(instr)?;
                self.machine_st.p += size;
            }
        }

        Ok(None)
    }
}

impl MachineState {
    /// The put, get and unify families. None of these transfer control.
    fn execute_term_instr(&mut self, instr: Instruction) -> Result<(), Fault> {
        match instr {
            Instruction::PutVariable(RegType::Perm(y), a) => {
                self.registers[a] = self.new_perm_var(y)?;
            }
            Instruction::PutVariable(RegType::Temp(x), a) => {
                let var = self.alloc_var()?;

                self.registers[x] = var;
                self.registers[a] = var;
            }
            Instruction::PutPermVariable(y) => {
                self.new_perm_var(y)?;
            }
            Instruction::PutValue(reg, a) => {
                self.registers[a] = self.reg_value(reg)?;
            }
            Instruction::PutUnsafeValue(y, a) => {
                let addr = self.perm_addr(y)?;
                let value = self.deref(self.memory.load(addr)?)?;

                // an unbound variable in the discarded frame moves to the heap.
                self.registers[a] = if value.is_ref() && value.addr() >= self.e {
                    let var = self.alloc_var()?;
                    self.bind(value, var)?;
                    var
                } else {
                    value
                };
            }
            Instruction::PutConstant(atom, a) => {
                self.registers[a] = atom_as_cell!(atom);
            }
            Instruction::PutNil(a) => {
                self.registers[a] = nil_as_cell!();
            }
            Instruction::PutInteger(n, a) => {
                self.registers[a] = n;
            }
            Instruction::PutFloat(index, a) => {
                self.registers[a] = flt_as_cell!(index);
            }
            Instruction::PutStructure(functor, a) => {
                self.registers[a] = self.alloc_structure(functor)?;
                self.mode = MachineMode::Write;
            }
            Instruction::PutList(a) => {
                self.registers[a] = list_loc_as_cell!(self.h);
                self.mode = MachineMode::Write;
            }
            Instruction::GetVariable(reg, a) => {
                self.set_reg(reg, self.registers[a])?;
            }
            Instruction::GetValue(reg, a) => {
                let value = self.reg_value(reg)?;
                self.unify(value, self.registers[a])?;
            }
            Instruction::GetConstant(atom, a) => {
                self.get_constant(atom_as_cell!(atom), a)?;
            }
            Instruction::GetNil(a) => {
                self.get_constant(nil_as_cell!(), a)?;
            }
            Instruction::GetInteger(n, a) => {
                self.get_constant(n, a)?;
            }
            Instruction::GetFloat(index, a) => {
                self.get_constant(flt_as_cell!(index), a)?;
            }
            Instruction::GetStructure(functor, a) => {
                let value = self.deref(self.registers[a])?;

                read_cell!(value,
                    (CellTag::Str, s) => {
                        let s = s as usize;
                        let matches = self.memory.load(s)? == functor_as_cell!(functor);

                        fail_unless!(self, matches);

                        self.s = s + 1;
                        self.mode = MachineMode::Read;
                    }
                    (CellTag::Ref, _) => {
                        let term = self.alloc_structure(functor)?;

                        self.bind(value, term)?;
                        self.mode = MachineMode::Write;
                    }
                    _ => {
                        self.fail = true;
                    }
                );
            }
            Instruction::GetList(a) => {
                let value = self.deref(self.registers[a])?;

                read_cell!(value,
                    (CellTag::Lst, l) => {
                        self.s = l as usize;
                        self.mode = MachineMode::Read;
                    }
                    (CellTag::Ref, _) => {
                        self.bind(value, list_loc_as_cell!(self.h))?;
                        self.mode = MachineMode::Write;
                    }
                    _ => {
                        self.fail = true;
                    }
                );
            }
            Instruction::UnifyVoid(n) => match self.mode {
                MachineMode::Read => self.s += n,
                MachineMode::Write => {
                    for _ in 0..n {
                        self.alloc_var()?;
                    }
                }
            },
            Instruction::UnifyVariable(reg) => match self.mode {
                MachineMode::Read => {
                    let value = self.memory.load(self.s)?;

                    self.set_reg(reg, value)?;
                    self.s += 1;
                }
                MachineMode::Write => {
                    let var = self.alloc_var()?;
                    self.set_reg(reg, var)?;
                }
            },
            Instruction::UnifyValue(reg) => {
                let value = self.reg_value(reg)?;

                match self.mode {
                    MachineMode::Read => {
                        self.unify(value, self.memory.load(self.s)?)?;
                        self.s += 1;
                    }
                    MachineMode::Write => {
                        self.heap_push(value)?;
                    }
                }
            }
            Instruction::UnifyLocalValue(reg) => {
                let value = self.reg_value(reg)?;

                match self.mode {
                    MachineMode::Read => {
                        self.unify(value, self.memory.load(self.s)?)?;
                        self.s += 1;
                    }
                    MachineMode::Write => {
                        let value = self.deref(value)?;

                        // the heap must not point into the stack.
                        if value.is_ref() && value.addr() >= self.memory.heap_size() {
                            let var = self.alloc_var()?;

                            self.bind(value, var)?;
                            self.set_reg(reg, var)?;
                        } else {
                            self.heap_push(value)?;
                        }
                    }
                }
            }
            Instruction::UnifyConstant(atom) => {
                self.unify_constant_arg(atom_as_cell!(atom))?;
            }
            Instruction::UnifyInteger(n) => {
                self.unify_constant_arg(n)?;
            }
            Instruction::UnifyFloat(index) => {
                self.unify_constant_arg(flt_as_cell!(index))?;
            }
            instr => unreachable!("{:?} transfers control", instr),
        }

        Ok(())
    }

    #[inline]
    fn get_constant(&mut self, constant: Cell, a: usize) -> Result<(), Fault> {
        self.get_constant_cell(constant, self.registers[a])
    }

    fn unify_constant_arg(&mut self, constant: Cell) -> Result<(), Fault> {
        match self.mode {
            MachineMode::Read => {
                let value = self.memory.load(self.s)?;

                self.s += 1;
                self.get_constant_cell(constant, value)
            }
            MachineMode::Write => self.heap_push(constant).map(|_| ()),
        }
    }

    fn get_constant_cell(&mut self, constant: Cell, value: Cell) -> Result<(), Fault> {
        let value = self.deref(value)?;

        if value.is_ref() {
            self.bind(value, constant)
        } else {
            fail_unless!(self, value == constant);
            Ok(())
        }
    }
}
