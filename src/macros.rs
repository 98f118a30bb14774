macro_rules! ref_as_cell {
    ($h:expr) => {
        Cell::build_with(CellTag::Ref, $h as u32)
    };
}

macro_rules! str_loc_as_cell {
    ($h:expr) => {
        Cell::build_with(CellTag::Str, $h as u32)
    };
}

macro_rules! list_loc_as_cell {
    ($h:expr) => {
        Cell::build_with(CellTag::Lst, $h as u32)
    };
}

macro_rules! atom_as_cell {
    ($atom:expr) => {
        Cell::build_with(CellTag::Atm, $atom.index())
    };
}

// structure headers carry the functor index under the atom tag.
macro_rules! functor_as_cell {
    ($functor:expr) => {
        Cell::build_with(CellTag::Atm, $functor.index())
    };
}

macro_rules! int_as_cell {
    ($n:expr) => {
        Cell::build_with(CellTag::Int, $crate::types::integer_word($n as i32))
    };
}

macro_rules! flt_as_cell {
    ($idx:expr) => {
        Cell::build_with(CellTag::Flt, $idx as u32)
    };
}

macro_rules! nil_as_cell {
    () => {
        Cell::build_with(CellTag::Atm, 0)
    };
}

/// Bookkeeping words in frames (saved pointers, counts) are stored as
/// integer cells holding an unsigned address.
macro_rules! addr_as_cell {
    ($a:expr) => {
        Cell::build_with(CellTag::Int, $a as u32)
    };
}

/// Matches on the tag of a cell, binding its payload.
///
/// Without a wildcard arm the match must be exhaustive and a corrupt tag
/// is propagated with `?` as [`Fault::BadTag`](crate::machine::machine_errors::Fault).
macro_rules! read_cell {
    ($cell:expr, $( ($($tag:path)|+, $value:pat) => $code:block )+ _ => $default:block) => {{
        let cell: Cell = $cell;
        match cell.get_tag() {
            $(
                Ok($($tag)|+) => {
                    #[allow(unused_variables)]
                    let $value = cell.get_value();
                    $code
                }
            )+
            _ => $default
        }
    }};
    ($cell:expr, $( ($($tag:path)|+, $value:pat) => $code:block )+) => {{
        let cell: Cell = $cell;
        match cell.get_tag()? {
            $(
                $($tag)|+ => {
                    #[allow(unused_variables)]
                    let $value = cell.get_value();
                    $code
                }
            )+
        }
    }};
}
