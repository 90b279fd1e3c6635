//! PE container access.
//!
//! Wraps the `object` parser as the binary-container collaborator: the
//! recovery engine only ever sees sections, the entry point, and raw
//! resource bytes. Only 32-bit PE images are accepted — the whole object
//! model is pointer-width 4.
//!
//! Resource lookup walks the `.rsrc` directory by hand (three levels:
//! type, name, language), since the generic parser does not surface it.

use object::{Object, ObjectSection, SectionFlags};
use tracing::debug;

use crate::error::AnalysisError;
use crate::section::SectionMap;

/// RT_RCDATA resource type id.
pub const RT_RCDATA: u32 = 10;

/// A parsed 32-bit PE image.
pub struct PeImage<'data> {
    file: object::File<'data>,
}

impl<'data> PeImage<'data> {
    /// Parse and gate the input: must be PE, must be 32-bit.
    pub fn parse(data: &'data [u8]) -> Result<Self, AnalysisError> {
        let file = object::File::parse(data)?;
        if file.format() != object::BinaryFormat::Pe {
            return Err(AnalysisError::NotPe);
        }
        if file.is_64() {
            return Err(AnalysisError::Unsupported("PE32+ images are not supported"));
        }
        Ok(Self { file })
    }

    /// The declared entry-point virtual address.
    pub fn entry_point(&self) -> u32 {
        self.file.entry() as u32
    }

    /// Sections flagged as containing code.
    pub fn code_sections(&self) -> Vec<SectionMap> {
        self.sections_with(object::pe::IMAGE_SCN_CNT_CODE)
    }

    /// Sections flagged as containing initialised data.
    pub fn data_sections(&self) -> Vec<SectionMap> {
        self.sections_with(object::pe::IMAGE_SCN_CNT_INITIALIZED_DATA)
    }

    fn sections_with(&self, flag: u32) -> Vec<SectionMap> {
        self.file
            .sections()
            .filter_map(|section| {
                let SectionFlags::Coff { characteristics } = section.flags() else {
                    return None;
                };
                if characteristics & flag == 0 {
                    return None;
                }
                let name = section.name().ok()?;
                let data = section.data().ok()?;
                Some(SectionMap::new(
                    name,
                    section.address() as u32,
                    data.to_vec(),
                ))
            })
            .collect()
    }

    /// Resolve an RCDATA resource by name to its raw bytes.
    pub fn rcdata_resource(&self, name: &str) -> Option<Vec<u8>> {
        self.resource(RT_RCDATA, name)
    }

    /// Resolve a named resource of the given type. Any language variant
    /// is accepted (the first one wins).
    pub fn resource(&self, type_id: u32, name: &str) -> Option<Vec<u8>> {
        let rsrc = self
            .file
            .sections()
            .find(|s| matches!(s.name(), Ok(".rsrc")))?;
        let dir = rsrc.data().ok()?;
        let rsrc_rva =
            rsrc.address().checked_sub(self.file.relative_address_base())? as u32;

        let name_dir = find_entry(dir, 0, &EntrySelector::Id(type_id))?;
        let lang_dir = find_entry(dir, subdirectory(name_dir)?, &EntrySelector::Name(name))?;
        let data_entry = first_entry(dir, subdirectory(lang_dir)?)?;
        if data_entry & SUBDIRECTORY_BIT != 0 {
            return None;
        }

        let data_rva = read_u32(dir, data_entry as usize)?;
        let size = read_u32(dir, data_entry as usize + 4)?;
        let start = data_rva.checked_sub(rsrc_rva)? as usize;
        let bytes = dir.get(start..start.checked_add(size as usize)?)?;
        debug!(name, size, "resource resolved");
        Some(bytes.to_vec())
    }
}

const SUBDIRECTORY_BIT: u32 = 0x8000_0000;
const DIRECTORY_HEADER: usize = 16;
const ENTRY_SIZE: usize = 8;

enum EntrySelector<'a> {
    Id(u32),
    Name(&'a str),
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// A directory entry's second dword: either a data-entry offset or a
/// subdirectory offset with the high bit set.
fn subdirectory(entry_value: u32) -> Option<usize> {
    if entry_value & SUBDIRECTORY_BIT == 0 {
        return None;
    }
    Some((entry_value & !SUBDIRECTORY_BIT) as usize)
}

/// Find a directory entry by id or name. Named entries come first in the
/// entry list, id entries after.
fn find_entry(dir: &[u8], table: usize, selector: &EntrySelector<'_>) -> Option<u32> {
    let named = read_u16(dir, table + 12)? as usize;
    let ids = read_u16(dir, table + 14)? as usize;
    let entries = table + DIRECTORY_HEADER;

    match selector {
        EntrySelector::Id(id) => (named..named + ids)
            .map(|i| entries + i * ENTRY_SIZE)
            .find(|&at| read_u32(dir, at) == Some(*id))
            .and_then(|at| read_u32(dir, at + 4)),
        EntrySelector::Name(name) => (0..named)
            .map(|i| entries + i * ENTRY_SIZE)
            .find(|&at| {
                read_u32(dir, at)
                    .and_then(|v| read_name(dir, (v & !SUBDIRECTORY_BIT) as usize))
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|at| read_u32(dir, at + 4)),
    }
}

/// First entry of a directory table, whatever its key.
fn first_entry(dir: &[u8], table: usize) -> Option<u32> {
    let named = read_u16(dir, table + 12)? as usize;
    let ids = read_u16(dir, table + 14)? as usize;
    if named + ids == 0 {
        return None;
    }
    read_u32(dir, table + DIRECTORY_HEADER + 4)
}

/// Resource name string: a length-prefixed UTF-16 string inside the
/// resource section.
fn read_name(dir: &[u8], offset: usize) -> Option<String> {
    let len = read_u16(dir, offset)? as usize;
    let mut units = Vec::with_capacity(len);
    for i in 0..len {
        units.push(read_u16(dir, offset + 2 + i * 2)?);
    }
    String::from_utf16(&units).ok()
}
