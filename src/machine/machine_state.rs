use crate::atom_table::*;
use crate::machine::code_repo::*;
use crate::machine::config::MachineConfig;
use crate::machine::cut::CleanupGuard;
use crate::machine::exceptions::Ball;
use crate::machine::inspect::MachineStats;
use crate::machine::memory::Memory;
use crate::machine::trace::TraceState;
use crate::types::*;

use std::collections::VecDeque;

pub const MAX_REGISTERS: usize = 256;

/// Number of predicate entries remembered for fault reports.
pub(crate) const CALL_LOG_LEN: usize = 100;

pub type Registers = [Cell; MAX_REGISTERS];

/// A code position: buffer, owning predicate and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePtr {
    pub code: CodeIndex,
    pub predicate: Option<Functor>,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineMode {
    Read,
    Write,
}

/// Registers and memory of one engine instance.
#[derive(Debug)]
pub struct MachineState {
    pub(crate) memory: Memory,
    pub(crate) symbols: SymbolTables,
    pub(crate) registers: Registers,
    pub(crate) p: usize,
    pub(crate) code: CodeIndex,
    pub(crate) current_predicate: Option<Functor>,
    pub(crate) num_of_args: usize,
    pub(crate) cp: CodePtr,
    pub(crate) e: usize,
    pub(crate) b: usize,
    pub(crate) b0: usize,
    pub(crate) h: usize,
    pub(crate) hb: usize,
    pub(crate) tr: usize,
    pub(crate) s: usize,
    pub(crate) mode: MachineMode,
    pub(crate) fail: bool,
    pub(crate) running: bool,
    pub(crate) pdl: Vec<Cell>,
    // backtracking to a choicepoint at or below this address ends the run.
    pub(crate) b_floor: usize,
    pub(crate) foreign_retry: bool,
    pub(crate) foreign_value: Option<Cell>,
    pub(crate) suspend_requested: bool,
    pub(crate) block: Option<usize>,
    pub(crate) ball: Option<Ball>,
    pub(crate) throw_count: u64,
    pub(crate) cleanups: Vec<CleanupGuard>,
    pub(crate) cleanup_floor: usize,
    pub(crate) trace: TraceState,
    pub(crate) stats: MachineStats,
    pub(crate) call_log: VecDeque<Functor>,
    pub(crate) reported_large_stack: bool,
}

/// Registers saved around a nested run. Everything but H and TR is put
/// back afterwards.
pub(crate) struct SavedRegisters {
    registers: Box<Registers>,
    p: usize,
    code: CodeIndex,
    current_predicate: Option<Functor>,
    num_of_args: usize,
    cp: CodePtr,
    e: usize,
    b: usize,
    b0: usize,
    hb: usize,
    s: usize,
    mode: MachineMode,
    b_floor: usize,
    cleanup_floor: usize,
    foreign_retry: bool,
    foreign_value: Option<Cell>,
    running: bool,
    trace: TraceState,
}

impl MachineState {
    pub(crate) fn new(config: &MachineConfig, symbols: SymbolTables) -> Self {
        let memory = Memory::new(config.heap_size, config.stack_size, config.trail_size);
        let heap_size = memory.heap_size();
        let trail_base = memory.trail_base();

        MachineState {
            memory,
            symbols,
            registers: [Cell::default(); MAX_REGISTERS],
            p: 0,
            code: QUERY_CODE,
            current_predicate: None,
            num_of_args: 0,
            cp: CodePtr::halt(),
            e: heap_size,
            b: 0,
            b0: 0,
            h: 0,
            hb: 0,
            tr: trail_base,
            s: 0,
            mode: MachineMode::Read,
            fail: false,
            running: false,
            pdl: vec![],
            b_floor: heap_size,
            foreign_retry: false,
            foreign_value: None,
            suspend_requested: false,
            block: None,
            ball: None,
            throw_count: 0,
            cleanups: vec![],
            cleanup_floor: 0,
            trace: TraceState::default(),
            stats: MachineStats::default(),
            call_log: VecDeque::with_capacity(CALL_LOG_LEN),
            reported_large_stack: false,
        }
    }

    pub(crate) fn save_registers(&self) -> SavedRegisters {
        SavedRegisters {
            registers: Box::new(self.registers),
            p: self.p,
            code: self.code,
            current_predicate: self.current_predicate,
            num_of_args: self.num_of_args,
            cp: self.cp,
            e: self.e,
            b: self.b,
            b0: self.b0,
            hb: self.hb,
            s: self.s,
            mode: self.mode,
            b_floor: self.b_floor,
            cleanup_floor: self.cleanup_floor,
            foreign_retry: self.foreign_retry,
            foreign_value: self.foreign_value,
            running: self.running,
            trace: self.trace,
        }
    }

    pub(crate) fn restore_registers(&mut self, saved: SavedRegisters) {
        self.registers = *saved.registers;
        self.p = saved.p;
        self.code = saved.code;
        self.current_predicate = saved.current_predicate;
        self.num_of_args = saved.num_of_args;
        self.cp = saved.cp;
        self.e = saved.e;
        self.b = saved.b;
        self.b0 = saved.b0;
        self.hb = saved.hb;
        self.s = saved.s;
        self.mode = saved.mode;
        self.b_floor = saved.b_floor;
        self.cleanup_floor = saved.cleanup_floor;
        self.foreign_retry = saved.foreign_retry;
        self.foreign_value = saved.foreign_value;
        self.running = saved.running;
        self.trace = saved.trace;
        self.fail = false;
        self.pdl.clear();
    }

    /// Empties the machine for a fresh query, keeping the symbol tables.
    pub(crate) fn reset(&mut self) {
        let heap_size = self.memory.heap_size();

        self.p = 0;
        self.code = QUERY_CODE;
        self.current_predicate = None;
        self.num_of_args = 0;
        self.cp = CodePtr::halt();
        self.e = heap_size;
        self.b = 0;
        self.b0 = 0;
        self.h = 0;
        self.hb = 0;
        self.tr = self.memory.trail_base();
        self.s = 0;
        self.mode = MachineMode::Read;
        self.fail = false;
        self.running = false;
        self.pdl.clear();
        self.b_floor = heap_size;
        self.foreign_retry = false;
        self.foreign_value = None;
        self.suspend_requested = false;
        self.block = None;
        self.ball = None;
        self.cleanups.clear();
        self.cleanup_floor = 0;
        self.trace = TraceState::default();
        self.reported_large_stack = false;
    }

    #[inline]
    pub(crate) fn log_call(&mut self, functor: Functor) {
        if self.call_log.len() == CALL_LOG_LEN {
            self.call_log.pop_front();
        }

        self.call_log.push_back(functor);
    }
}
