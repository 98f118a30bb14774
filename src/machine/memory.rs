use crate::machine::machine_errors::Fault;
use crate::machine::machine_state::CodePtr;
use crate::types::*;

use std::fmt;
use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Heap,
    Stack,
    Trail,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Region::Heap => write!(f, "heap"),
            Region::Stack => write!(f, "stack"),
            Region::Trail => write!(f, "trail"),
        }
    }
}

/// The single cell array holding the heap, the frame stack and the trail,
/// in that order.
///
/// Continuations saved in frames are not cells; they live in a side table
/// with one optional slot per stack address.
#[derive(Debug)]
pub struct Memory {
    cells: Vec<Cell>,
    conts: Vec<Option<CodePtr>>,
    heap_size: usize,
    stack_size: usize,
    trail_size: usize,
}

impl Memory {
    pub fn new(heap_size: usize, stack_size: usize, trail_size: usize) -> Self {
        Memory {
            cells: vec![Cell::default(); heap_size + stack_size + trail_size],
            conts: vec![None; stack_size],
            heap_size,
            stack_size,
            trail_size,
        }
    }

    #[inline(always)]
    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    #[inline(always)]
    pub fn stack_base(&self) -> usize {
        self.heap_size
    }

    #[inline(always)]
    pub fn stack_limit(&self) -> usize {
        self.heap_size + self.stack_size
    }

    #[inline(always)]
    pub fn trail_base(&self) -> usize {
        self.stack_limit()
    }

    #[inline(always)]
    pub fn trail_limit(&self) -> usize {
        self.stack_limit() + self.trail_size
    }

    pub fn region_of(&self, addr: usize) -> Option<Region> {
        if addr < self.heap_size {
            Some(Region::Heap)
        } else if addr < self.stack_limit() {
            Some(Region::Stack)
        } else if addr < self.trail_limit() {
            Some(Region::Trail)
        } else {
            None
        }
    }

    /// Checks that a frame or heap pointer lies inside `region`.
    pub fn validate(
        &self,
        register: &'static str,
        addr: usize,
        region: Region,
    ) -> Result<usize, Fault> {
        if self.region_of(addr) == Some(region) {
            Ok(addr)
        } else {
            Err(Fault::FrameOutOfRange {
                register,
                addr,
                region,
            })
        }
    }

    #[inline]
    pub fn load(&self, addr: usize) -> Result<Cell, Fault> {
        self.cells.get(addr).copied().ok_or(Fault::BadAddress { addr })
    }

    #[inline]
    pub fn store_at(&mut self, addr: usize, cell: Cell) -> Result<(), Fault> {
        match self.cells.get_mut(addr) {
            Some(slot) => {
                *slot = cell;
                Ok(())
            }
            None => Err(Fault::BadAddress { addr }),
        }
    }

    /// Reads a bookkeeping word (saved pointer or count) from a frame.
    #[inline]
    pub fn word(&self, addr: usize) -> Result<usize, Fault> {
        self.load(addr).map(Cell::addr)
    }

    pub fn continuation(&self, addr: usize) -> Result<CodePtr, Fault> {
        addr.checked_sub(self.heap_size)
            .and_then(|slot| self.conts.get(slot).copied().flatten())
            .ok_or(Fault::MissingContinuation { addr })
    }

    pub fn set_continuation(&mut self, addr: usize, cp: CodePtr) -> Result<(), Fault> {
        let slot = addr
            .checked_sub(self.heap_size)
            .and_then(|slot| self.conts.get_mut(slot))
            .ok_or(Fault::StackOverflow {
                addr,
                limit: self.heap_size + self.stack_size,
            })?;

        *slot = Some(cp);
        // the cell itself only marks the slot as occupied.
        self.cells[addr] = addr_as_cell!(0);

        Ok(())
    }
}

impl Index<usize> for Memory {
    type Output = Cell;

    #[inline(always)]
    fn index(&self, addr: usize) -> &Cell {
        &self.cells[addr]
    }
}

impl IndexMut<usize> for Memory {
    #[inline(always)]
    fn index_mut(&mut self, addr: usize) -> &mut Cell {
        &mut self.cells[addr]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::code_repo::CodeIndex;

    #[test]
    fn regions_partition_the_address_space() {
        let memory = Memory::new(100, 50, 10);

        assert_eq!(memory.region_of(0), Some(Region::Heap));
        assert_eq!(memory.region_of(99), Some(Region::Heap));
        assert_eq!(memory.region_of(100), Some(Region::Stack));
        assert_eq!(memory.region_of(149), Some(Region::Stack));
        assert_eq!(memory.region_of(150), Some(Region::Trail));
        assert_eq!(memory.region_of(160), None);
    }

    #[test]
    fn validation_names_the_register() {
        let memory = Memory::new(100, 50, 10);

        assert_eq!(memory.validate("E", 120, Region::Stack), Ok(120));
        assert_eq!(
            memory.validate("E", 20, Region::Stack),
            Err(Fault::FrameOutOfRange {
                register: "E",
                addr: 20,
                region: Region::Stack
            })
        );
    }

    #[test]
    fn continuations_live_beside_stack_cells() {
        let mut memory = Memory::new(100, 50, 10);
        let cp = CodePtr {
            code: CodeIndex::from(3),
            predicate: None,
            offset: 7,
        };

        memory.set_continuation(101, cp).unwrap();
        assert_eq!(memory.continuation(101), Ok(cp));
        assert_eq!(
            memory.continuation(102),
            Err(Fault::MissingContinuation { addr: 102 })
        );
        assert!(memory.set_continuation(10, cp).is_err());
        assert!(memory.load(1000).is_err());
    }
}
