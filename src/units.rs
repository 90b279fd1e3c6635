//! Unit initialisation table location and parsing.
//!
//! Delphi's entry stub loads the address of the unit initialisation
//! table into EAX immediately before calling the runtime's startup
//! routine. The table is a `{unit_count, unit_info}` header, where
//! `unit_info` names an array of per-unit init/fini routine pairs. It is
//! used here as an anchor: its presence confirms the Delphi runtime and
//! pins the principal code section. Only the one immediate-load opcode is
//! matched; nothing is disassembled.

use serde::Serialize;
use tracing::trace;

use crate::context::RecoveryContext;
use crate::error::ValidationError;
use crate::section::{SectionMap, SectionReader};

/// How far past the entry point the immediate-load is searched for.
pub const ENTRY_STUB_WINDOW: u32 = 96;

/// `mov eax, imm32`.
const MOV_EAX_IMM32: u8 = 0xb8;

const MAX_UNITS: u32 = 0x4000;

/// One unit's startup/teardown routine pair. Either may be null.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct UnitInitEntry {
    pub init: u32,
    pub fini: u32,
}

/// The compiler-emitted unit initialisation table.
#[derive(Debug, Clone, Serialize)]
pub struct UnitInitTable {
    pub va: u32,
    pub unit_count: u32,
    pub unit_info: u32,
    pub entries: Vec<UnitInitEntry>,
}

/// Search the entry stub for the initialisation-table load and parse the
/// table it names. Returns `None` when no candidate within the window
/// validates.
pub fn find_init_table(
    section: &SectionMap,
    entry_va: u32,
    context: &RecoveryContext,
) -> Option<UnitInitTable> {
    let start = section.offset_from_va(entry_va).ok()?;
    let end = start
        .saturating_add(ENTRY_STUB_WINDOW)
        .min(section.size());

    for offset in start..end {
        let Ok(opcode) = section.read_u8_at(offset) else {
            break;
        };
        if opcode != MOV_EAX_IMM32 {
            continue;
        }
        let Ok(imm) = section.read_u32_at(offset + 1) else {
            break;
        };
        if !section.contains_va(imm) {
            continue;
        }
        trace!(
            at = format_args!("{:#010x}", section.va_from_offset(offset)),
            imm = format_args!("{:#010x}", imm),
            "immediate load candidate"
        );
        if let Ok(table) = parse_init_table(section, imm, context) {
            return Some(table);
        }
    }
    None
}

/// Parse and validate the initialisation table at `table_va`.
pub fn parse_init_table(
    section: &SectionMap,
    table_va: u32,
    context: &RecoveryContext,
) -> Result<UnitInitTable, ValidationError> {
    let offset = section.offset_from_va(table_va)?;
    let mut r = SectionReader::new(section, offset);

    let unit_count = r.read_u32()?;
    if unit_count == 0 || unit_count > MAX_UNITS {
        return Err(ValidationError::ImplausibleCount {
            what: "unit",
            count: unit_count,
        });
    }
    let unit_info = r.read_u32()?;
    if !section.contains_va(unit_info) {
        return Err(ValidationError::BadSlot {
            slot: "unit info pointer",
            value: unit_info,
        });
    }

    let mut r = SectionReader::new(section, section.offset_from_va(unit_info)?);
    let mut entries = Vec::with_capacity(unit_count as usize);
    for _ in 0..unit_count {
        let init = r.read_u32()?;
        let fini = r.read_u32()?;
        for (slot, value) in [("unit init routine", init), ("unit fini routine", fini)] {
            if value != 0 && !context.is_code_va(value) {
                return Err(ValidationError::BadSlot { slot, value });
            }
        }
        entries.push(UnitInitEntry { init, fini });
    }

    Ok(UnitInitTable {
        va: table_va,
        unit_count,
        unit_info,
        entries,
    })
}
