//! Heuristic scans over code sections.
//!
//! Two scans drive the whole recovery. The TObject locator walks a code
//! section looking for the one universal base-class vftable and derives
//! the standard header length from it — this value varies by compiler
//! release and build settings, so it must be measured, never assumed.
//! The vftable scanner then uses that length to flag every location whose
//! first slot points at itself plus the header length, the defining
//! structural signature of a Delphi vftable.

use tracing::{debug, trace};

use crate::queue::{ObjectKind, WorkQueue};
use crate::section::SectionMap;

/// First four bytes of TObject's length-prefixed class name
/// (`\x07TObject` begins `07 54 4F 62`).
pub const TOBJECT_NAME_TAG: u32 = 0x624F_5407;

/// Sanity bounds on the derived header length, covering every known
/// compiler layout.
pub const MIN_HEADER_LENGTH: u32 = 36;
pub const MAX_HEADER_LENGTH: u32 = 128;

/// Offset of the class-name slot inside the common vftable header.
const NAME_SLOT: u32 = 32;

/// Bytes kept in reserve at section end so a full header is always
/// readable from an accepted position.
const LOCATOR_TAIL: u32 = 128;

/// A located TObject vftable and the header length measured from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TObjectMatch {
    pub va: u32,
    pub header_length: u32,
}

/// Scan one code section for TObject's vftable.
///
/// A position `j` is accepted when all of the following hold:
/// - the interface-table and auto-table slots (`j+4`, `j+8`) are zero,
///   which is consistent for TObject across Delphi versions;
/// - the first slot points forward into the same section, with a
///   distance inside `[36, 128]`;
/// - the name slot at `j+32` points into the section, at the
///   length-prefixed string `TObject`.
///
/// The first accepted position wins; the measured distance is the
/// standard vftable header length. A section shorter than the reserve
/// tail is never probed at all.
pub fn find_tobject(section: &SectionMap) -> Option<TObjectMatch> {
    let end = section.size().saturating_sub(LOCATOR_TAIL);
    let found = (0..end)
        .step_by(4)
        .find_map(|j| tobject_candidate(section, j));
    if let Some(m) = found {
        debug!(
            section = section.name(),
            va = format_args!("{:#010x}", m.va),
            header_length = m.header_length,
            "TObject candidate accepted"
        );
    }
    found
}

fn tobject_candidate(section: &SectionMap, j: u32) -> Option<TObjectMatch> {
    let ptr = section.read_u32_at(j).ok()?;
    let check1 = section.read_u32_at(j + 4).ok()?;
    let check2 = section.read_u32_at(j + 8).ok()?;

    if check1 != 0 || check2 != 0 {
        return None;
    }
    if !section.contains_va(ptr) {
        return None;
    }

    // The self pointer lands on the first method slot (or the table end
    // when there are none); its distance from the table start is the
    // header length.
    let offset = section.offset_from_va(ptr).ok()?;
    let difference = offset.checked_sub(j)?;
    if !(MIN_HEADER_LENGTH..=MAX_HEADER_LENGTH).contains(&difference) {
        return None;
    }

    let name_ptr = section.read_u32_at(j + NAME_SLOT).ok()?;
    if !section.contains_va(name_ptr) {
        return None;
    }
    let name_offset = section.offset_from_va(name_ptr).ok()?;
    if section.read_u32_at(name_offset).ok()? != TOBJECT_NAME_TAG {
        return None;
    }

    Some(TObjectMatch {
        va: section.va_from_offset(j),
        header_length: difference,
    })
}

/// Scan the object section for vftable candidates and enqueue them.
///
/// A candidate is any 4-byte-aligned location whose first slot equals its
/// own virtual address plus the header length. The five following header
/// slots must each be zero or a valid in-section address — a loose
/// pre-filter; the thorough check happens when the candidate is parsed
/// into an object. Returns the number of candidates enqueued.
pub fn find_vftables(section: &SectionMap, header_length: u32, queue: &mut WorkQueue) -> usize {
    let end = section.size().saturating_sub(header_length);
    let mut found = 0;
    let mut i = 0u32;

    while i < end {
        let va = section.va_from_offset(i);
        if let Ok(ptr) = section.read_u32_at(i) {
            if va.checked_add(header_length) == Some(ptr) && header_slots_plausible(section, i) {
                trace!(va = format_args!("{:#010x}", va), "vftable candidate");
                if queue.add_item(va, ObjectKind::Vftable) {
                    found += 1;
                }
            }
        }
        i += 4;
    }

    found
}

fn header_slots_plausible(section: &SectionMap, i: u32) -> bool {
    (1..=5u32).all(|slot| match section.read_u32_at(i + slot * 4) {
        Ok(0) => true,
        Ok(ptr) => section.contains_va(ptr),
        Err(_) => false,
    })
}
