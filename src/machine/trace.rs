use crate::atom_table::*;
use crate::instructions::InstructionDescriptor;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::*;
use crate::types::*;

use std::fmt;

/// The trace-call state machine, driven from Prolog through `trace_set/1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TraceMode {
    #[default]
    NoTrace,
    Trace,
    LeapTrace,
    TraceNext,
    LeapTraceNext,
    SkipTrace,
    SuspendLeapTrace,
}

const TRACE_MODES: [TraceMode; 7] = [
    TraceMode::NoTrace,
    TraceMode::Trace,
    TraceMode::LeapTrace,
    TraceMode::TraceNext,
    TraceMode::LeapTraceNext,
    TraceMode::SkipTrace,
    TraceMode::SuspendLeapTrace,
];

impl TraceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceMode::NoTrace => "no_trace",
            TraceMode::Trace => "trace",
            TraceMode::LeapTrace => "leap_trace",
            TraceMode::TraceNext => "trace_next",
            TraceMode::LeapTraceNext => "leap_trace_next",
            TraceMode::SkipTrace => "skip_trace",
            TraceMode::SuspendLeapTrace => "suspend_leap_trace",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        TRACE_MODES.iter().copied().find(|mode| mode.as_str() == name)
    }

    /// The number saved in choicepoint frames.
    #[inline]
    pub(crate) fn code(self) -> usize {
        self as usize
    }

    #[inline]
    pub(crate) fn from_code(code: usize) -> Option<Self> {
        TRACE_MODES.get(code).copied()
    }
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstructionTrace {
    #[default]
    NoTrace,
    /// Report every instruction to the hook.
    Trace,
    /// Ask the hook for a command before every instruction.
    Step,
}

impl InstructionTrace {
    pub fn as_str(self) -> &'static str {
        match self {
            InstructionTrace::NoTrace => "no_trace",
            InstructionTrace::Trace => "trace",
            InstructionTrace::Step => "step",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "no_trace" => Some(InstructionTrace::NoTrace),
            "trace" => Some(InstructionTrace::Trace),
            "step" => Some(InstructionTrace::Step),
            _ => None,
        }
    }
}

/// A debugger's answer at a `step` prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCommand {
    /// Show debug output for this instruction and stop at the next one.
    ShowAndStep,
    /// Hide debug output and stop at the next instruction.
    HideAndStep,
    /// Hide debug output and stop stepping.
    HideAndRun,
    /// Show debug output for this and all later instructions.
    ShowAndRun,
}

impl StepCommand {
    /// The single-key commands `m`, `x`, `y` and `z`.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'm' => Some(StepCommand::ShowAndStep),
            'x' => Some(StepCommand::HideAndStep),
            'y' => Some(StepCommand::HideAndRun),
            'z' => Some(StepCommand::ShowAndRun),
            _ => None,
        }
    }
}

/// Receives per-instruction trace events.
pub trait TraceHook {
    fn instruction(&mut self, descriptor: &InstructionDescriptor);

    /// Asked before each instruction while stepping. Returning `None`
    /// suspends the machine at this instruction.
    fn step(&mut self, descriptor: &InstructionDescriptor) -> Option<StepCommand>;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TraceState {
    pub(crate) call: TraceMode,
    pub(crate) instruction: InstructionTrace,
    pub(crate) info: Cell,
    pub(crate) identifier: u32,
    pub(crate) debugging: bool,
}

impl Default for TraceState {
    fn default() -> Self {
        TraceState {
            call: TraceMode::NoTrace,
            instruction: InstructionTrace::NoTrace,
            info: nil_as_cell!(),
            identifier: 0,
            debugging: false,
        }
    }
}

impl TraceState {
    pub(crate) fn apply(&mut self, command: StepCommand) {
        let (debugging, instruction) = match command {
            StepCommand::ShowAndStep => (true, InstructionTrace::Step),
            StepCommand::HideAndStep => (false, InstructionTrace::Step),
            StepCommand::HideAndRun => (false, InstructionTrace::Trace),
            StepCommand::ShowAndRun => (true, InstructionTrace::Trace),
        };

        self.debugging = debugging;
        self.instruction = instruction;
    }

    #[inline]
    pub(crate) fn traces_instructions(&self) -> bool {
        self.call == TraceMode::Trace && self.instruction != InstructionTrace::NoTrace
    }
}

/// Calls to these never go through the trace predicate.
pub(crate) fn is_untraced_predicate(name: &str) -> bool {
    name.starts_with("debugger:")
        || name.starts_with("system:$trace")
        || name == "true"
        || name == "system:true"
}

impl MachineState {
    #[inline]
    pub(crate) fn traces_calls(&self) -> bool {
        matches!(self.trace.call, TraceMode::Trace | TraceMode::LeapTrace) && !self.foreign_retry
    }

    /// Turns call tracing into its suspended form for the duration of a
    /// trace predicate call.
    pub(crate) fn suspend_trace(&mut self) {
        self.trace.call = match self.trace.call {
            TraceMode::Trace => TraceMode::SkipTrace,
            TraceMode::LeapTrace => TraceMode::SuspendLeapTrace,
            mode => mode,
        };

        self.trace.instruction = InstructionTrace::NoTrace;
    }

    pub(crate) fn advance_next_trace(&mut self) {
        self.trace.call = match self.trace.call {
            TraceMode::TraceNext => TraceMode::Trace,
            TraceMode::LeapTraceNext => TraceMode::LeapTrace,
            mode => mode,
        };
    }

    /// Loads `(Goal, Info, Id)` for the trace predicate, reifying the
    /// pending call from the argument registers.
    pub(crate) fn setup_trace_call(&mut self, target: Functor) -> Result<(), Fault> {
        let (name, arity) = self.symbols.functor(target)?;

        self.suspend_trace();
        self.trace.identifier += 1;

        self.registers[0] = if arity == 0 {
            atom_as_cell!(name)
        } else {
            let goal = self.alloc_structure(target)?;

            for i in 0..arity {
                self.heap_push(self.registers[i])?;
            }

            goal
        };

        self.registers[1] = self.trace.info;
        self.registers[2] = int_as_cell!(self.trace.identifier);
        self.num_of_args = 3;
        self.b0 = self.b;

        Ok(())
    }
}
