use crate::machine::code_repo::CodeRepo;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::machine::memory::Region;
use crate::machine::trace::TraceMode;
use crate::types::*;

// and-frame (environment) slots, relative to E.
pub(crate) const E_CE: usize = 0;
pub(crate) const E_CP: usize = 1;
pub(crate) const ENV_VARS: usize = 2;

// or-frame (choicepoint) slots, relative to B + n where n = memory[B].
pub(crate) const CP_E: usize = 1;
pub(crate) const CP_CP: usize = 2;
pub(crate) const CP_B: usize = 3;
pub(crate) const CP_NEXT: usize = 4;
pub(crate) const CP_TR: usize = 5;
pub(crate) const CP_H: usize = 6;
pub(crate) const CP_B0: usize = 7;
pub(crate) const CP_TC: usize = 8;
pub(crate) const CP_TI: usize = 9;
pub(crate) const CP_SIZE: usize = 10;

// foreign or-frame prefix, relative to B.
pub(crate) const FCP_V: usize = 1;
pub(crate) const FCP_C: usize = 2;
pub(crate) const FCP_R: usize = 3;
pub(crate) const FOREIGN_PREFIX: usize = 2;

/// The saved registers of an or-frame, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrFramePrelude {
    pub num_cells: usize,
    pub e: usize,
    pub cp: CodePtr,
    pub b: usize,
    pub next: CodePtr,
    pub tr: usize,
    pub h: usize,
    pub b0: usize,
    pub trace_call: TraceMode,
    pub trace_info: Cell,
}

impl OrFramePrelude {
    #[inline]
    pub fn is_foreign(&self) -> bool {
        self.next.is_retry_foreign()
    }

    /// Number of argument registers saved in the frame.
    #[inline]
    pub fn num_args(&self) -> usize {
        if self.is_foreign() {
            self.num_cells.saturating_sub(FOREIGN_PREFIX)
        } else {
            self.num_cells
        }
    }

    #[inline]
    fn args_base(&self, b: usize) -> usize {
        if self.is_foreign() {
            b + FCP_R
        } else {
            b + 1
        }
    }
}

impl MachineState {
    /// Seeds the outermost and-frame at the stack base. Its continuation
    /// halts the run.
    pub(crate) fn init_toplevel_frame(&mut self) -> Result<(), Fault> {
        let e = self.memory.stack_base();

        self.memory[e + E_CE] = addr_as_cell!(e);
        self.memory.set_continuation(e + E_CP, CodePtr::halt())?;
        self.e = e;

        Ok(())
    }

    /// First free stack address. The numerically higher of E and B is the
    /// newest frame; an and-frame's live size is read from the word before
    /// the current continuation.
    pub(crate) fn frame_top(&self, code_repo: &CodeRepo) -> Result<usize, Fault> {
        if self.e > self.b {
            self.memory.validate("E", self.e, Region::Stack)?;
            Ok(self.e + code_repo.env_size_before(self.cp)? + ENV_VARS)
        } else {
            self.memory.validate("B", self.b, Region::Stack)?;
            Ok(self.b + self.memory.word(self.b)? + CP_SIZE)
        }
    }

    pub(crate) fn reserve_frame(&mut self, base: usize, size: usize) -> Result<(), Fault> {
        let top = base + size;

        if top > self.memory.stack_limit() {
            return Err(Fault::StackOverflow {
                addr: base,
                limit: self.memory.stack_limit(),
            });
        }

        let used = top - self.memory.stack_base();

        if used > self.stats.max_stack {
            self.stats.max_stack = used;
        }

        let stack_size = self.memory.stack_limit() - self.memory.stack_base();

        if !self.reported_large_stack && used * 4 > stack_size * 3 {
            self.reported_large_stack = true;
            warn!(
                "frame stack is over 75% full: {} of {} cells in use (E = {}, B = {})",
                used, stack_size, self.e, self.b
            );
        }

        Ok(())
    }

    pub(crate) fn allocate_and_frame(&mut self, code_repo: &CodeRepo) -> Result<(), Fault> {
        let e = self.frame_top(code_repo)?;

        // CE and CP are always written; Y slots are bounded by perm_addr.
        self.reserve_frame(e, ENV_VARS)?;

        self.memory[e + E_CE] = addr_as_cell!(self.e);
        self.memory.set_continuation(e + E_CP, self.cp)?;
        self.e = e;

        Ok(())
    }

    pub(crate) fn deallocate_and_frame(&mut self) -> Result<(), Fault> {
        let e = self.memory.validate("E", self.e, Region::Stack)?;

        self.cp = self.memory.continuation(e + E_CP)?;
        self.e = self.memory.validate("E", self.memory.word(e + E_CE)?, Region::Stack)?;

        Ok(())
    }

    /// Pushes an or-frame resuming at `next`. A foreign frame carries the
    /// handler's value and the call-site continuation ahead of the saved
    /// argument registers.
    pub(crate) fn push_or_frame(
        &mut self,
        code_repo: &CodeRepo,
        next: CodePtr,
        foreign: Option<(Cell, CodePtr)>,
    ) -> Result<(), Fault> {
        let b = self.frame_top(code_repo)?;
        let prefix = if foreign.is_some() { FOREIGN_PREFIX } else { 0 };
        let n = self.num_of_args + prefix;

        self.reserve_frame(b, n + CP_SIZE)?;

        self.memory[b] = addr_as_cell!(n);

        if let Some((value, call_site)) = foreign {
            self.memory[b + FCP_V] = value;
            self.memory.set_continuation(b + FCP_C, call_site)?;
        }

        let args_base = b + 1 + prefix;

        for i in 0..self.num_of_args {
            self.memory[args_base + i] = self.registers[i];
        }

        self.memory[b + n + CP_E] = addr_as_cell!(self.e);
        self.memory.set_continuation(b + n + CP_CP, self.cp)?;
        self.memory[b + n + CP_B] = addr_as_cell!(self.b);
        self.memory.set_continuation(b + n + CP_NEXT, next)?;
        self.memory[b + n + CP_TR] = addr_as_cell!(self.tr);
        self.memory[b + n + CP_H] = addr_as_cell!(self.h);
        self.memory[b + n + CP_B0] = addr_as_cell!(self.b0);
        self.memory[b + n + CP_TC] = addr_as_cell!(self.trace.call.code());
        self.memory[b + n + CP_TI] = self.trace.info;

        self.b = b;
        self.hb = self.h;

        Ok(())
    }

    pub(crate) fn or_frame(&self, b: usize) -> Result<OrFramePrelude, Fault> {
        let b = self.memory.validate("B", b, Region::Stack)?;
        let n = self.memory.word(b)?;

        let trace_code = self.memory.word(b + n + CP_TC)?;
        let trace_call = TraceMode::from_code(trace_code).ok_or(Fault::BadTag {
            word: self.memory.load(b + n + CP_TC)?.as_word(),
        })?;

        Ok(OrFramePrelude {
            num_cells: n,
            e: self.memory.word(b + n + CP_E)?,
            cp: self.memory.continuation(b + n + CP_CP)?,
            b: self.memory.word(b + n + CP_B)?,
            next: self.memory.continuation(b + n + CP_NEXT)?,
            tr: self.memory.word(b + n + CP_TR)?,
            h: self.memory.word(b + n + CP_H)?,
            b0: self.memory.word(b + n + CP_B0)?,
            trace_call,
            trace_info: self.memory.load(b + n + CP_TI)?,
        })
    }

    /// Restores the machine from the top or-frame without popping it:
    /// argument registers, E, CP, the trail and the heap top. The trace
    /// registers are only restored while tracing is on.
    pub(crate) fn restore_or_frame(&mut self) -> Result<OrFramePrelude, Fault> {
        let b = self.b;
        let frame = self.or_frame(b)?;
        let args_base = frame.args_base(b);

        for i in 0..frame.num_args() {
            self.registers[i] = self.memory.load(args_base + i)?;
        }

        self.e = self.memory.validate("E", frame.e, Region::Stack)?;
        self.cp = frame.cp;

        self.unwind_trail(frame.tr, self.tr)?;
        self.tr = frame.tr;
        self.h = self.validate_heap_top(frame.h)?;
        self.hb = self.h;

        if self.trace.call != TraceMode::NoTrace {
            self.trace.call = frame.trace_call;
            self.trace.info = frame.trace_info;
        }

        Ok(frame)
    }

    pub(crate) fn set_next_alternative(&mut self, next: CodePtr) -> Result<(), Fault> {
        let n = self.memory.word(self.b)?;
        self.memory.set_continuation(self.b + n + CP_NEXT, next)
    }

    /// Discards the top or-frame.
    pub(crate) fn pop_or_frame(&mut self) -> Result<(), Fault> {
        let n = self.memory.word(self.b)?;
        let b = self.memory.word(self.b + n + CP_B)?;

        if b != 0 {
            self.memory.validate("B", b, Region::Stack)?;
        }

        self.b = b;
        self.hb = self.choicepoint_heap_top()?;

        Ok(())
    }

    /// The or-frame `depth` links below B, or 0 when the chain is shorter.
    pub(crate) fn nth_or_frame(&self, depth: usize) -> Result<usize, Fault> {
        let mut b = self.b;

        for _ in 0..depth {
            if b == 0 {
                break;
            }

            let n = self.memory.word(b)?;
            b = self.memory.word(b + n + CP_B)?;
        }

        Ok(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock_wam::*;

    #[test]
    fn or_frames_restore_the_heap_and_trail() {
        let (mut machine_st, code_repo) = mock_machine_with_stub();

        let x = machine_st.alloc_var().unwrap();
        machine_st.registers[0] = x;
        machine_st.num_of_args = 1;

        let h = machine_st.h;
        let next = CodePtr::halt();

        machine_st.push_or_frame(&code_repo, next, None).unwrap();
        assert_eq!(machine_st.hb, h);

        machine_st.alloc_var().unwrap();
        machine_st.bind(x, int_as_cell!(5)).unwrap();
        machine_st.registers[0] = int_as_cell!(9);

        let frame = machine_st.restore_or_frame().unwrap();

        assert_eq!(frame.next, next);
        assert_eq!(machine_st.h, h);
        assert_eq!(machine_st.registers[0], x);
        assert_eq!(machine_st.deref(x).unwrap(), x);

        machine_st.pop_or_frame().unwrap();
        assert_eq!(machine_st.b, 0);
        assert_eq!(machine_st.hb, 0);
    }

    #[test]
    fn frames_are_placed_above_the_newest_frame() {
        let (mut machine_st, code_repo) = mock_machine_with_stub();
        let base = machine_st.memory.stack_base();

        // the toplevel continuation reports no live variables.
        assert_eq!(machine_st.frame_top(&code_repo).unwrap(), base + ENV_VARS);

        machine_st.num_of_args = 2;
        machine_st.push_or_frame(&code_repo, CodePtr::halt(), None).unwrap();

        let b = machine_st.b;
        assert_eq!(b, base + ENV_VARS);
        assert_eq!(machine_st.frame_top(&code_repo).unwrap(), b + 2 + CP_SIZE);

        machine_st.allocate_and_frame(&code_repo).unwrap();
        assert_eq!(machine_st.e, b + 2 + CP_SIZE);

        machine_st.deallocate_and_frame().unwrap();
        assert_eq!(machine_st.e, base);
        assert_eq!(machine_st.cp, CodePtr::halt());
    }

    #[test]
    fn foreign_frames_keep_the_value_apart_from_the_registers() {
        let (mut machine_st, code_repo) = mock_machine_with_stub();

        machine_st.num_of_args = 1;
        machine_st.registers[0] = int_as_cell!(4);

        let call_site = CodePtr::halt();
        machine_st
            .push_or_frame(
                &code_repo,
                CodePtr::retry_foreign(),
                Some((int_as_cell!(17), call_site)),
            )
            .unwrap();

        let b = machine_st.b;
        let frame = machine_st.or_frame(b).unwrap();

        assert!(frame.is_foreign());
        assert_eq!(frame.num_args(), 1);
        assert_eq!(machine_st.memory[b + FCP_V], int_as_cell!(17));
        assert_eq!(machine_st.memory.continuation(b + FCP_C), Ok(call_site));
        assert_eq!(machine_st.memory[b + FCP_R], int_as_cell!(4));
    }

    #[test]
    fn frames_past_the_stack_limit_are_faults() {
        let (mut machine_st, code_repo) = mock_machine_with_stub();

        machine_st.num_of_args = 200;
        let result = machine_st.push_or_frame(&code_repo, CodePtr::halt(), None);

        assert!(matches!(result, Err(Fault::StackOverflow { .. })));
    }
}
