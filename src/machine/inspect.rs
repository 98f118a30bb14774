use crate::machine::code_repo::CodeRepo;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::machine::stack::*;
use crate::types::*;

use std::time::{Duration, Instant};

/// Resource high-water marks and timing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineStats {
    /// Highest value H has reached.
    pub max_heap: usize,
    /// Most stack cells in use at once.
    pub max_stack: usize,
    pub instructions: u64,
    /// Wall-clock time spent inside the dispatch loop.
    pub wall_time: Duration,
    nesting: u32,
    started: Option<Instant>,
}

impl MachineStats {
    // nested runs are timed as part of the outermost one.
    pub(crate) fn enter(&mut self) {
        self.nesting += 1;

        if self.nesting == 1 {
            self.started = Some(Instant::now());
        }
    }

    pub(crate) fn exit(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);

        if self.nesting == 0 {
            if let Some(started) = self.started.take() {
                self.wall_time += started.elapsed();
            }
        }
    }
}

/// A read-only view of one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentFrame {
    pub addr: usize,
    pub ce: usize,
    pub cp: CodePtr,
    /// The permanent variables still live at the frame's current call.
    pub vars: Vec<Cell>,
}

/// A read-only view of one choicepoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoicepointFrame {
    pub addr: usize,
    pub prelude: OrFramePrelude,
    pub args: Vec<Cell>,
    /// The foreign handler's saved value.
    pub foreign_value: Option<Cell>,
}

impl MachineState {
    /// The environment chain, newest first.
    pub(crate) fn environments(&self, code_repo: &CodeRepo) -> Result<Vec<EnvironmentFrame>, Fault> {
        let base = self.memory.stack_base();
        let mut frames = vec![];
        let mut e = self.e;
        let mut cp = self.cp;

        loop {
            let live = code_repo.env_size_before(cp).unwrap_or(0);
            let saved_cp = self.memory.continuation(e + E_CP)?;
            let ce = self.memory.word(e + E_CE)?;

            let vars = (0..live)
                .map(|i| self.memory.load(e + ENV_VARS + i))
                .collect::<Result<Vec<_>, _>>()?;

            frames.push(EnvironmentFrame {
                addr: e,
                ce,
                cp: saved_cp,
                vars,
            });

            if e <= base || ce >= e {
                break;
            }

            e = ce;
            cp = saved_cp;
        }

        Ok(frames)
    }

    /// The choicepoint chain, newest first.
    pub(crate) fn choicepoints(&self) -> Result<Vec<ChoicepointFrame>, Fault> {
        let mut frames = vec![];
        let mut b = self.b;

        while b > self.memory.heap_size() {
            let prelude = self.or_frame(b)?;

            let args_base = if prelude.is_foreign() { b + FCP_R } else { b + 1 };
            let args = (0..prelude.num_args())
                .map(|i| self.memory.load(args_base + i))
                .collect::<Result<Vec<_>, _>>()?;

            let foreign_value = if prelude.is_foreign() {
                Some(self.memory.load(b + FCP_V)?)
            } else {
                None
            };

            frames.push(ChoicepointFrame {
                addr: b,
                prelude,
                args,
                foreign_value,
            });

            if prelude.b >= b {
                break;
            }

            b = prelude.b;
        }

        Ok(frames)
    }
}
