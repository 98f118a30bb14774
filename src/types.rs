use crate::atom_table::*;
use crate::machine::machine_errors::Fault;

use scryer_modular_bitfield::prelude::*;
use scryer_modular_bitfield::Specifier;

use std::fmt;
use std::mem;

/// Width of the payload field of a [`Cell`].
pub const WORD_BITS: u32 = 27;
pub const VAL_MASK: u32 = (1 << WORD_BITS) - 1;

/// Bit 31 of a label word marks an absolute code offset rather than a
/// clause position.
pub const ABSOLUTE_LABEL: u32 = 0x8000_0000;

#[derive(BitfieldSpecifier, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[bits = 3]
pub enum CellTag {
    Ref = 0b000,
    Str = 0b001,
    Lst = 0b010,
    Int = 0b011,
    Atm = 0b100,
    Flt = 0b101,
}

impl CellTag {
    pub fn name(self) -> &'static str {
        match self {
            CellTag::Ref => "REF",
            CellTag::Str => "STR",
            CellTag::Lst => "LST",
            CellTag::Int => "INT",
            CellTag::Atm => "ATM",
            CellTag::Flt => "FLT",
        }
    }
}

/// One tagged machine word.
///
/// The layout is a fixed binary contract: a 27-bit payload in bits 0..27,
/// the tag in bits 27..30, and the reserved mark (`m`) and float (`f`)
/// flags in bits 30 and 31. Memory cells, argument registers and bytecode
/// constants all carry this representation.
#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Hash, PartialEq, Eq)]
pub struct Cell {
    val: B27,
    tag: B3,
    #[allow(unused)]
    m: bool,
    #[allow(unused)]
    f: bool,
}

const_assert!(mem::size_of::<Cell>() == 4);

impl Cell {
    #[inline(always)]
    pub fn build_with(tag: CellTag, value: u32) -> Self {
        Cell::new()
            .with_tag(tag as u8)
            .with_val(value & VAL_MASK)
    }

    #[inline(always)]
    pub fn from_word(word: u32) -> Self {
        Cell::from(word)
    }

    #[inline(always)]
    pub fn as_word(self) -> u32 {
        u32::from(self)
    }

    /// Decodes the tag. The two unused bit patterns are reported as a
    /// fault; no valid term ever carries them.
    #[inline(always)]
    pub fn get_tag(self) -> Result<CellTag, Fault> {
        CellTag::from_bytes(self.tag()).map_err(|_| Fault::BadTag {
            word: self.as_word(),
        })
    }

    #[inline(always)]
    pub fn get_value(self) -> u32 {
        self.val()
    }

    #[inline(always)]
    pub fn addr(self) -> usize {
        self.val() as usize
    }

    #[inline(always)]
    pub fn is_ref(self) -> bool {
        self.tag() == CellTag::Ref as u8
    }

    #[inline(always)]
    pub fn is_tagged(self, tag: CellTag) -> bool {
        self.tag() == tag as u8
    }

    /// The payload read as a signed 27-bit integer.
    #[inline(always)]
    pub fn as_integer(self) -> i32 {
        ((self.val() << (32 - WORD_BITS)) as i32) >> (32 - WORD_BITS)
    }

    #[inline(always)]
    pub fn as_atom(self) -> Atom {
        Atom::from(self.val())
    }

    #[inline(always)]
    pub fn as_functor(self) -> Functor {
        Functor::from(self.val())
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::new()
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.get_tag() {
            Ok(CellTag::Int) => write!(f, "INT({})", self.as_integer()),
            Ok(tag) => write!(f, "{}({})", tag.name(), self.val()),
            Err(_) => write!(f, "BAD({:#010x})", self.as_word()),
        }
    }
}

/// Reads an integer operand from a bytecode word, keeping the low 27 bits
/// as a two's complement value.
#[inline(always)]
pub fn integer_operand(word: u32) -> Cell {
    Cell::build_with(CellTag::Int, word)
}

/// Encodes an `i32` for use as an integer operand or cell payload.
/// Values outside the 27-bit range wrap.
#[inline(always)]
pub fn integer_word(n: i32) -> u32 {
    (n as u32) & VAL_MASK
}
