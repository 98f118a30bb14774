use crate::atom_table::*;
use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::MAX_REGISTERS;
use crate::types::*;

use std::fmt;

/// Opcode numbers. These are a fixed contract with the compiler.
pub mod opcode {
    pub const ALLOCATE: u32 = 1;
    pub const DEALLOCATE: u32 = 2;
    pub const CALL: u32 = 3;
    pub const EXECUTE: u32 = 4;
    pub const PROCEED: u32 = 5;
    pub const PUT_VARIABLE_Y: u32 = 6;
    pub const PUT_VARIABLE_X: u32 = 7;
    pub const PUT_VALUE: u32 = 8;
    pub const PUT_UNSAFE_VALUE: u32 = 9;
    pub const PUT_CONSTANT: u32 = 10;
    pub const PUT_NIL: u32 = 11;
    pub const PUT_STRUCTURE: u32 = 12;
    pub const PUT_LIST: u32 = 13;
    pub const PUT_INTEGER: u32 = 14;
    pub const GET_VARIABLE: u32 = 15;
    pub const GET_VALUE: u32 = 16;
    pub const GET_CONSTANT: u32 = 17;
    pub const GET_NIL: u32 = 18;
    pub const GET_STRUCTURE: u32 = 19;
    pub const GET_LIST: u32 = 20;
    pub const GET_INTEGER: u32 = 21;
    pub const UNIFY_VOID: u32 = 22;
    pub const UNIFY_VARIABLE: u32 = 23;
    pub const UNIFY_VALUE: u32 = 24;
    pub const UNIFY_LOCAL_VALUE: u32 = 25;
    pub const UNIFY_CONSTANT: u32 = 26;
    pub const UNIFY_INTEGER: u32 = 27;
    pub const TRY_ME_ELSE: u32 = 28;
    pub const RETRY_ME_ELSE: u32 = 29;
    pub const TRUST_ME: u32 = 30;
    pub const NECK_CUT: u32 = 31;
    pub const CUT: u32 = 32;
    pub const GET_LEVEL: u32 = 33;
    pub const CALL_AUX: u32 = 40;
    pub const EXECUTE_AUX: u32 = 41;
    pub const RETRY_FOREIGN: u32 = 42;
    pub const GET_CHOICEPOINT: u32 = 43;
    pub const SWITCH_ON_TERM: u32 = 44;
    pub const SWITCH_ON_CONSTANT: u32 = 45;
    pub const SWITCH_ON_STRUCTURE: u32 = 46;
    pub const GET_FLOAT: u32 = 50;
    pub const PUT_FLOAT: u32 = 51;
    pub const UNIFY_FLOAT: u32 = 52;
    pub const PUT_PERM_VARIABLE: u32 = 60;
    pub const TRY: u32 = 71;
    pub const RETRY: u32 = 72;
    pub const TRUST: u32 = 73;
    pub const GOTO_CLAUSE: u32 = 74;
    pub const ONLY_CLAUSE: u32 = 254;
    pub const HALT: u32 = 255;
}

/// Marks a `switch_on_term` slot with no matching clauses.
pub const FAIL_ADDRESS: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegType {
    Perm(usize),
    Temp(usize),
}

impl fmt::Display for RegType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegType::Perm(n) => write!(f, "Y{}", n),
            RegType::Temp(n) => write!(f, "X{}", n),
        }
    }
}

/// A jump target inside the current predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLabel {
    /// Position in the predicate's clause list.
    Clause(u32),
    /// Absolute offset in the current code buffer.
    Offset(usize),
}

impl CodeLabel {
    #[inline]
    pub fn from_word(word: u32) -> Self {
        if word & ABSOLUTE_LABEL == 0 {
            CodeLabel::Clause(word)
        } else {
            CodeLabel::Offset((word ^ ABSOLUTE_LABEL) as usize)
        }
    }

    #[inline]
    pub fn as_word(self) -> u32 {
        match self {
            CodeLabel::Clause(n) => n,
            CodeLabel::Offset(o) => o as u32 | ABSOLUTE_LABEL,
        }
    }
}

impl fmt::Display for CodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodeLabel::Clause(n) => write!(f, "clause {}", n),
            CodeLabel::Offset(o) => write!(f, "@{}", o),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Sorted,
    Hashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchOnTermTargets {
    pub var: Option<CodeLabel>,
    pub atom: Option<CodeLabel>,
    pub integer: Option<CodeLabel>,
    pub float: Option<CodeLabel>,
    pub list: Option<CodeLabel>,
    pub structure: Option<CodeLabel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Allocate,
    Deallocate,
    Call(Functor, usize),
    Execute(Functor),
    Proceed,
    PutVariable(RegType, usize),
    PutValue(RegType, usize),
    PutUnsafeValue(usize, usize),
    PutConstant(Atom, usize),
    PutNil(usize),
    PutStructure(Functor, usize),
    PutList(usize),
    PutInteger(Cell, usize),
    PutFloat(u32, usize),
    PutPermVariable(usize),
    GetVariable(RegType, usize),
    GetValue(RegType, usize),
    GetConstant(Atom, usize),
    GetNil(usize),
    GetStructure(Functor, usize),
    GetList(usize),
    GetInteger(Cell, usize),
    GetFloat(u32, usize),
    UnifyVoid(usize),
    UnifyVariable(RegType),
    UnifyValue(RegType),
    UnifyLocalValue(RegType),
    UnifyConstant(Atom),
    UnifyInteger(Cell),
    UnifyFloat(u32),
    TryMeElse(CodeLabel),
    RetryMeElse(CodeLabel),
    TrustMe,
    NeckCut,
    Cut(usize),
    GetLevel(usize),
    CallAux(usize, usize, usize),
    ExecuteAux(usize, usize),
    RetryForeign,
    GetChoicepoint(usize, usize),
    SwitchOnTerm(SwitchOnTermTargets),
    SwitchOnConstant(TableKind, usize),
    SwitchOnStructure(TableKind, usize),
    Try(CodeLabel),
    Retry(CodeLabel),
    Trust(CodeLabel),
    GotoClause(CodeLabel),
    OnlyClause,
    Halt,
}

struct Operands<'a> {
    code: &'a [u32],
    p: usize,
}

impl Operands<'_> {
    #[inline]
    fn word(&self, i: usize) -> Result<u32, Fault> {
        self.code
            .get(self.p + i)
            .copied()
            .ok_or(Fault::TruncatedInstruction { p: self.p })
    }

    #[inline]
    fn usize(&self, i: usize) -> Result<usize, Fault> {
        self.word(i).map(|w| w as usize)
    }

    #[inline]
    fn arg(&self, i: usize) -> Result<usize, Fault> {
        let index = self.usize(i)?;

        if index < MAX_REGISTERS {
            Ok(index)
        } else {
            Err(Fault::RegisterOutOfRange { index })
        }
    }

    // a kind word of 0 selects a permanent variable.
    fn reg(&self, kind: usize, i: usize) -> Result<RegType, Fault> {
        if self.word(kind)? == 0 {
            Ok(RegType::Perm(self.usize(i)?))
        } else {
            Ok(RegType::Temp(self.arg(i)?))
        }
    }

    fn label(&self, i: usize) -> Result<CodeLabel, Fault> {
        self.word(i).map(CodeLabel::from_word)
    }

    fn switch_target(&self, i: usize) -> Result<Option<CodeLabel>, Fault> {
        let word = self.word(i)?;

        if word == FAIL_ADDRESS {
            Ok(None)
        } else {
            Ok(Some(CodeLabel::from_word(word)))
        }
    }

    fn table_kind(&self, i: usize) -> Result<TableKind, Fault> {
        match self.word(i)? {
            0 => Ok(TableKind::Sorted),
            1 => Ok(TableKind::Hashed),
            _ => Err(Fault::MalformedTable { offset: self.p + i }),
        }
    }
}

impl Instruction {
    /// Decodes the instruction at `p`, validating operand counts and
    /// register numbers.
    pub fn decode(code: &[u32], p: usize) -> Result<Instruction, Fault> {
        use self::opcode::*;

        let ops = Operands { code, p };

        let instr = match ops.word(0)? {
            ALLOCATE => Instruction::Allocate,
            DEALLOCATE => Instruction::Deallocate,
            CALL => Instruction::Call(Functor::from(ops.word(1)?), ops.usize(2)?),
            EXECUTE => Instruction::Execute(Functor::from(ops.word(1)?)),
            PROCEED => Instruction::Proceed,
            PUT_VARIABLE_Y => Instruction::PutVariable(RegType::Perm(ops.usize(1)?), ops.arg(2)?),
            PUT_VARIABLE_X => Instruction::PutVariable(RegType::Temp(ops.arg(1)?), ops.arg(2)?),
            PUT_VALUE => Instruction::PutValue(ops.reg(1, 2)?, ops.arg(3)?),
            PUT_UNSAFE_VALUE => Instruction::PutUnsafeValue(ops.usize(1)?, ops.arg(2)?),
            PUT_CONSTANT => Instruction::PutConstant(Atom::from(ops.word(1)?), ops.arg(2)?),
            PUT_NIL => Instruction::PutNil(ops.arg(1)?),
            PUT_STRUCTURE => Instruction::PutStructure(Functor::from(ops.word(1)?), ops.arg(2)?),
            PUT_LIST => Instruction::PutList(ops.arg(1)?),
            PUT_INTEGER => Instruction::PutInteger(integer_operand(ops.word(1)?), ops.arg(2)?),
            GET_VARIABLE => Instruction::GetVariable(ops.reg(1, 2)?, ops.arg(3)?),
            GET_VALUE => Instruction::GetValue(ops.reg(1, 2)?, ops.arg(3)?),
            GET_CONSTANT => Instruction::GetConstant(Atom::from(ops.word(1)?), ops.arg(2)?),
            GET_NIL => Instruction::GetNil(ops.arg(1)?),
            GET_STRUCTURE => Instruction::GetStructure(Functor::from(ops.word(1)?), ops.arg(2)?),
            GET_LIST => Instruction::GetList(ops.arg(1)?),
            GET_INTEGER => Instruction::GetInteger(integer_operand(ops.word(1)?), ops.arg(2)?),
            UNIFY_VOID => Instruction::UnifyVoid(ops.usize(1)?),
            UNIFY_VARIABLE => Instruction::UnifyVariable(ops.reg(1, 2)?),
            UNIFY_VALUE => Instruction::UnifyValue(ops.reg(1, 2)?),
            UNIFY_LOCAL_VALUE => Instruction::UnifyLocalValue(ops.reg(1, 2)?),
            UNIFY_CONSTANT => Instruction::UnifyConstant(Atom::from(ops.word(1)?)),
            UNIFY_INTEGER => Instruction::UnifyInteger(integer_operand(ops.word(1)?)),
            TRY_ME_ELSE => Instruction::TryMeElse(ops.label(1)?),
            RETRY_ME_ELSE => Instruction::RetryMeElse(ops.label(1)?),
            TRUST_ME => Instruction::TrustMe,
            NECK_CUT => Instruction::NeckCut,
            CUT => Instruction::Cut(ops.usize(1)?),
            GET_LEVEL => Instruction::GetLevel(ops.usize(1)?),
            CALL_AUX => Instruction::CallAux(ops.usize(1)?, ops.usize(2)?, ops.usize(3)?),
            EXECUTE_AUX => Instruction::ExecuteAux(ops.usize(1)?, ops.usize(2)?),
            RETRY_FOREIGN => Instruction::RetryForeign,
            GET_CHOICEPOINT => Instruction::GetChoicepoint(ops.usize(1)?, ops.usize(2)?),
            SWITCH_ON_TERM => Instruction::SwitchOnTerm(SwitchOnTermTargets {
                var: ops.switch_target(1)?,
                atom: ops.switch_target(2)?,
                integer: ops.switch_target(3)?,
                float: ops.switch_target(4)?,
                list: ops.switch_target(5)?,
                structure: ops.switch_target(6)?,
            }),
            SWITCH_ON_CONSTANT => Instruction::SwitchOnConstant(ops.table_kind(1)?, p + 2),
            SWITCH_ON_STRUCTURE => Instruction::SwitchOnStructure(ops.table_kind(1)?, p + 2),
            GET_FLOAT => Instruction::GetFloat(ops.word(1)?, ops.arg(2)?),
            PUT_FLOAT => Instruction::PutFloat(ops.word(1)?, ops.arg(2)?),
            UNIFY_FLOAT => Instruction::UnifyFloat(ops.word(1)?),
            PUT_PERM_VARIABLE => Instruction::PutPermVariable(ops.usize(1)?),
            TRY => Instruction::Try(ops.label(1)?),
            RETRY => Instruction::Retry(ops.label(1)?),
            TRUST => Instruction::Trust(ops.label(1)?),
            GOTO_CLAUSE => Instruction::GotoClause(ops.label(1)?),
            ONLY_CLAUSE => Instruction::OnlyClause,
            HALT => Instruction::Halt,
            opcode => return Err(Fault::UnknownOpcode { opcode }),
        };

        Ok(instr)
    }

    /// Number of code words, for instructions that fall through.
    pub fn size(&self) -> usize {
        match self {
            Instruction::Allocate
            | Instruction::Deallocate
            | Instruction::Proceed
            | Instruction::NeckCut
            | Instruction::RetryForeign
            | Instruction::Halt => 1,
            Instruction::Execute(..)
            | Instruction::PutNil(..)
            | Instruction::PutList(..)
            | Instruction::PutPermVariable(..)
            | Instruction::GetNil(..)
            | Instruction::GetList(..)
            | Instruction::UnifyVoid(..)
            | Instruction::UnifyConstant(..)
            | Instruction::UnifyInteger(..)
            | Instruction::UnifyFloat(..)
            | Instruction::TryMeElse(..)
            | Instruction::RetryMeElse(..)
            | Instruction::TrustMe
            | Instruction::Cut(..)
            | Instruction::GetLevel(..)
            | Instruction::Try(..)
            | Instruction::Retry(..)
            | Instruction::Trust(..)
            | Instruction::GotoClause(..)
            | Instruction::OnlyClause => 2,
            Instruction::Call(..)
            | Instruction::PutUnsafeValue(..)
            | Instruction::PutConstant(..)
            | Instruction::PutStructure(..)
            | Instruction::PutInteger(..)
            | Instruction::PutFloat(..)
            | Instruction::GetConstant(..)
            | Instruction::GetStructure(..)
            | Instruction::GetInteger(..)
            | Instruction::GetFloat(..)
            | Instruction::UnifyVariable(..)
            | Instruction::UnifyValue(..)
            | Instruction::UnifyLocalValue(..)
            | Instruction::ExecuteAux(..)
            | Instruction::GetChoicepoint(..)
            | Instruction::PutVariable(..) => 3,
            Instruction::PutValue(..)
            | Instruction::GetVariable(..)
            | Instruction::GetValue(..)
            | Instruction::CallAux(..) => 4,
            Instruction::SwitchOnTerm(..) => 7,
            Instruction::SwitchOnConstant(..) | Instruction::SwitchOnStructure(..) => 2,
        }
    }

    pub fn display<'a>(&'a self, symbols: &'a SymbolTables) -> InstructionDisplay<'a> {
        InstructionDisplay {
            instr: self,
            symbols,
        }
    }
}

pub struct InstructionDisplay<'a> {
    instr: &'a Instruction,
    symbols: &'a SymbolTables,
}

impl fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let atom = |a: Atom| self.symbols.atom_name(a).unwrap_or("?").to_owned();
        let ind = |func: Functor| self.symbols.indicator(func);
        let float = |i: u32| match self.symbols.float(i) {
            Some(value) => format!("{}", value),
            None => format!("<float {}>", i),
        };

        match *self.instr {
            Instruction::Allocate => write!(f, "allocate"),
            Instruction::Deallocate => write!(f, "deallocate"),
            Instruction::Call(func, n) => write!(f, "call({}, {})", ind(func), n),
            Instruction::Execute(func) => write!(f, "execute({})", ind(func)),
            Instruction::Proceed => write!(f, "proceed"),
            Instruction::PutVariable(r, a) => write!(f, "put_variable({}, A{})", r, a),
            Instruction::PutValue(r, a) => write!(f, "put_value({}, A{})", r, a),
            Instruction::PutUnsafeValue(y, a) => write!(f, "put_unsafe_value(Y{}, A{})", y, a),
            Instruction::PutConstant(c, a) => write!(f, "put_constant({}, A{})", atom(c), a),
            Instruction::PutNil(a) => write!(f, "put_nil(A{})", a),
            Instruction::PutStructure(func, a) => write!(f, "put_structure({}, A{})", ind(func), a),
            Instruction::PutList(a) => write!(f, "put_list(A{})", a),
            Instruction::PutInteger(n, a) => write!(f, "put_integer({}, A{})", n.as_integer(), a),
            Instruction::PutFloat(i, a) => write!(f, "put_float({}, A{})", float(i), a),
            Instruction::PutPermVariable(y) => write!(f, "put_variable(Y{})", y),
            Instruction::GetVariable(r, a) => write!(f, "get_variable({}, A{})", r, a),
            Instruction::GetValue(r, a) => write!(f, "get_value({}, A{})", r, a),
            Instruction::GetConstant(c, a) => write!(f, "get_constant({}, A{})", atom(c), a),
            Instruction::GetNil(a) => write!(f, "get_nil(A{})", a),
            Instruction::GetStructure(func, a) => write!(f, "get_structure({}, A{})", ind(func), a),
            Instruction::GetList(a) => write!(f, "get_list(A{})", a),
            Instruction::GetInteger(n, a) => write!(f, "get_integer({}, A{})", n.as_integer(), a),
            Instruction::GetFloat(i, a) => write!(f, "get_float({}, A{})", float(i), a),
            Instruction::UnifyVoid(n) => write!(f, "unify_void({})", n),
            Instruction::UnifyVariable(r) => write!(f, "unify_variable({})", r),
            Instruction::UnifyValue(r) => write!(f, "unify_value({})", r),
            Instruction::UnifyLocalValue(r) => write!(f, "unify_local_value({})", r),
            Instruction::UnifyConstant(c) => write!(f, "unify_constant({})", atom(c)),
            Instruction::UnifyInteger(n) => write!(f, "unify_integer({})", n.as_integer()),
            Instruction::UnifyFloat(i) => write!(f, "unify_float({})", float(i)),
            Instruction::TryMeElse(l) => write!(f, "try_me_else({})", l),
            Instruction::RetryMeElse(l) => write!(f, "retry_me_else({})", l),
            Instruction::TrustMe => write!(f, "trust_me"),
            Instruction::NeckCut => write!(f, "neck_cut"),
            Instruction::Cut(y) => write!(f, "cut(Y{})", y),
            Instruction::GetLevel(y) => write!(f, "get_level(Y{})", y),
            Instruction::CallAux(o, n, e) => write!(f, "call_aux(@{}, {}, {})", o, n, e),
            Instruction::ExecuteAux(o, n) => write!(f, "execute_aux(@{}, {})", o, n),
            Instruction::RetryForeign => write!(f, "retry_foreign"),
            Instruction::GetChoicepoint(i, y) => write!(f, "get_choicepoint({}, Y{})", i, y),
            Instruction::SwitchOnTerm(_) => write!(f, "switch_on_term"),
            Instruction::SwitchOnConstant(..) => write!(f, "switch_on_constant"),
            Instruction::SwitchOnStructure(..) => write!(f, "switch_on_structure"),
            Instruction::Try(l) => write!(f, "try({})", l),
            Instruction::Retry(l) => write!(f, "retry({})", l),
            Instruction::Trust(l) => write!(f, "trust({})", l),
            Instruction::GotoClause(l) => write!(f, "goto_clause({})", l),
            Instruction::OnlyClause => write!(f, "nop"),
            Instruction::Halt => write!(f, "halt"),
        }
    }
}

/// A decoded instruction together with where it was fetched from. This is
/// what trace hooks receive.
#[derive(Debug, Clone)]
pub struct InstructionDescriptor {
    pub instruction: Instruction,
    pub predicate: Option<String>,
    pub p: usize,
    pub text: String,
}

impl fmt::Display for InstructionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.predicate {
            Some(name) => write!(f, "{}@{}: {}", name, self.p, self.text),
            None => write!(f, "@{}: {}", self.p, self.text),
        }
    }
}
