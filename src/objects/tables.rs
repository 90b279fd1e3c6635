//! Auxiliary RTTI tables referenced from a vftable header.
//!
//! Field tables come in two shapes: the legacy one leads with its entry
//! count and points at a separate table of field class vftables, the
//! modern one leads with a zero word and embeds per-field type-info
//! references plus skippable extra data. Method and dynamic tables list
//! code pointers; interface tables list GUID-keyed entries.

use serde::Serialize;
use uuid::Uuid;

use crate::context::RecoveryContext;
use crate::error::ValidationError;
use crate::queue::{ObjectKind, WorkQueue};
use crate::section::{SectionMap, SectionReader};

const MAX_FIELDS: u16 = 1024;
const MAX_METHODS: u16 = 4096;
const MAX_INTERFACES: u32 = 256;
const MAX_DYNAMIC: u16 = 4096;

/// How a field entry names its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTypeRef {
    /// Index into the legacy field-types table.
    LegacyIndex(u16),
    /// `PPTypeInfo` reference (modern layout).
    TypeInfo(u32),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldEntry {
    pub offset: u32,
    pub name: String,
    pub type_ref: FieldTypeRef,
}

/// A published-field table.
#[derive(Debug, Clone, Serialize)]
pub struct FieldTable {
    pub va: u32,
    /// Legacy tables carry a pointer to their field-types table.
    pub field_types: Option<u32>,
    pub fields: Vec<FieldEntry>,
}

impl FieldTable {
    pub fn parse(
        section: &SectionMap,
        va: u32,
        _context: &RecoveryContext,
        queue: &mut WorkQueue,
    ) -> Result<Self, ValidationError> {
        let offset = section.offset_from_va(va)?;
        let mut r = SectionReader::new(section, offset);
        let mut pending: Vec<(u32, ObjectKind)> = Vec::new();

        // Zero header word means the modern layout; a nonzero word is the
        // legacy entry count.
        let header = r.read_u16()?;
        let (field_types, fields) = if header == 0 {
            (None, Self::parse_modern(section, &mut r, &mut pending)?)
        } else {
            Self::parse_legacy(section, &mut r, header, &mut pending)?
        };

        for (location, kind) in pending {
            queue.add_item(location, kind);
        }

        Ok(Self {
            va,
            field_types,
            fields,
        })
    }

    fn parse_legacy(
        section: &SectionMap,
        r: &mut SectionReader<'_>,
        count: u16,
        pending: &mut Vec<(u32, ObjectKind)>,
    ) -> Result<(Option<u32>, Vec<FieldEntry>), ValidationError> {
        if count > MAX_FIELDS {
            return Err(ValidationError::ImplausibleCount {
                what: "field",
                count: count as u32,
            });
        }
        let field_types = r.read_u32()?;
        if !section.contains_va(field_types) {
            return Err(ValidationError::BadSlot {
                slot: "field types pointer",
                value: field_types,
            });
        }
        pending.push((field_types, ObjectKind::FieldTypes));

        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = r.read_u32()?;
            let type_index = r.read_u16()?;
            let name = r.read_pascal_string()?;
            fields.push(FieldEntry {
                offset,
                name,
                type_ref: FieldTypeRef::LegacyIndex(type_index),
            });
        }
        Ok((Some(field_types), fields))
    }

    fn parse_modern(
        section: &SectionMap,
        r: &mut SectionReader<'_>,
        pending: &mut Vec<(u32, ObjectKind)>,
    ) -> Result<Vec<FieldEntry>, ValidationError> {
        r.skip(4)?;
        let count = r.read_u16()?;
        if count > MAX_FIELDS {
            return Err(ValidationError::ImplausibleCount {
                what: "field",
                count: count as u32,
            });
        }

        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            r.skip(1)?; // visibility flags
            let type_ptr = r.read_u32()?;
            if type_ptr != 0 {
                if !section.contains_va(type_ptr) {
                    return Err(ValidationError::BadSlot {
                        slot: "field type reference",
                        value: type_ptr,
                    });
                }
                let target = section.read_u32_at(section.offset_from_va(type_ptr)?)?;
                if target != 0 && section.contains_va(target) {
                    pending.push((target, ObjectKind::TypeInfo));
                }
            }
            let offset = r.read_u32()?;
            let name = r.read_pascal_string()?;
            let extra = r.read_u16()? as u32;
            if extra < 2 {
                return Err(ValidationError::TruncatedEntry {
                    declared: extra,
                    consumed: 2,
                });
            }
            r.skip(extra - 2)?;
            fields.push(FieldEntry {
                offset,
                name,
                type_ref: FieldTypeRef::TypeInfo(type_ptr),
            });
        }
        Ok(fields)
    }
}

/// Legacy field-types table: class vftable pointers, one per published
/// field type. Each entry is itself a vftable candidate.
#[derive(Debug, Clone, Serialize)]
pub struct FieldTypes {
    pub va: u32,
    pub classes: Vec<u32>,
}

impl FieldTypes {
    pub fn parse(
        section: &SectionMap,
        va: u32,
        _context: &RecoveryContext,
        queue: &mut WorkQueue,
    ) -> Result<Self, ValidationError> {
        let offset = section.offset_from_va(va)?;
        let mut r = SectionReader::new(section, offset);

        let count = r.read_u16()?;
        if count > MAX_FIELDS {
            return Err(ValidationError::ImplausibleCount {
                what: "field type",
                count: count as u32,
            });
        }
        let mut classes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let class_ptr = r.read_u32()?;
            if !section.contains_va(class_ptr) {
                return Err(ValidationError::BadSlot {
                    slot: "field class pointer",
                    value: class_ptr,
                });
            }
            classes.push(class_ptr);
        }

        for &class_ptr in &classes {
            queue.add_item(class_ptr, ObjectKind::Vftable);
        }

        Ok(Self { va, classes })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodEntry {
    pub function: u32,
    pub name: String,
}

/// A published-method table. Entries are self-sizing; anything past the
/// fixed fields and name (modern parameter data) is skipped via the
/// declared entry size.
#[derive(Debug, Clone, Serialize)]
pub struct MethodTable {
    pub va: u32,
    pub methods: Vec<MethodEntry>,
}

impl MethodTable {
    pub fn parse(
        section: &SectionMap,
        va: u32,
        context: &RecoveryContext,
        _queue: &mut WorkQueue,
    ) -> Result<Self, ValidationError> {
        let offset = section.offset_from_va(va)?;
        let mut r = SectionReader::new(section, offset);

        let count = r.read_u16()?;
        if count > MAX_METHODS {
            return Err(ValidationError::ImplausibleCount {
                what: "method",
                count: count as u32,
            });
        }

        let mut methods = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let entry_start = r.pos();
            let size = r.read_u16()? as u32;
            let function = r.read_u32()?;
            if function == 0 || !context.is_code_va(function) {
                return Err(ValidationError::BadSlot {
                    slot: "method function pointer",
                    value: function,
                });
            }
            let name = r.read_pascal_string()?;
            let consumed = r.pos() - entry_start;
            if size < consumed {
                return Err(ValidationError::TruncatedEntry {
                    declared: size,
                    consumed,
                });
            }
            r.skip(size - consumed)?;
            methods.push(MethodEntry { function, name });
        }

        Ok(Self { va, methods })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceEntry {
    pub guid: Uuid,
    pub vtable: u32,
    pub offset: u32,
    pub getter: u32,
}

/// An implemented-interfaces table.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceTable {
    pub va: u32,
    pub entries: Vec<InterfaceEntry>,
}

impl InterfaceTable {
    pub fn parse(
        section: &SectionMap,
        va: u32,
        _context: &RecoveryContext,
        _queue: &mut WorkQueue,
    ) -> Result<Self, ValidationError> {
        let offset = section.offset_from_va(va)?;
        let mut r = SectionReader::new(section, offset);

        let count = r.read_u32()?;
        if count == 0 || count > MAX_INTERFACES {
            return Err(ValidationError::ImplausibleCount {
                what: "interface",
                count,
            });
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw = r.read_bytes(16)?;
            let mut guid_bytes = [0u8; 16];
            guid_bytes.copy_from_slice(raw);
            let guid = Uuid::from_bytes_le(guid_bytes);
            let vtable = r.read_u32()?;
            if !section.contains_va(vtable) {
                return Err(ValidationError::BadSlot {
                    slot: "interface vtable pointer",
                    value: vtable,
                });
            }
            let offset = r.read_u32()?;
            let getter = r.read_u32()?;
            entries.push(InterfaceEntry {
                guid,
                vtable,
                offset,
                getter,
            });
        }

        Ok(Self { va, entries })
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DynamicEntry {
    pub index: u16,
    pub handler: u32,
}

/// A dynamic-method table: parallel arrays of message/method indices and
/// handler code pointers.
#[derive(Debug, Clone, Serialize)]
pub struct DynamicTable {
    pub va: u32,
    pub entries: Vec<DynamicEntry>,
}

impl DynamicTable {
    pub fn parse(
        section: &SectionMap,
        va: u32,
        context: &RecoveryContext,
        _queue: &mut WorkQueue,
    ) -> Result<Self, ValidationError> {
        let offset = section.offset_from_va(va)?;
        let mut r = SectionReader::new(section, offset);

        let count = r.read_u16()?;
        if count > MAX_DYNAMIC {
            return Err(ValidationError::ImplausibleCount {
                what: "dynamic method",
                count: count as u32,
            });
        }

        let mut indices = Vec::with_capacity(count as usize);
        for _ in 0..count {
            indices.push(r.read_u16()?);
        }
        let mut entries = Vec::with_capacity(count as usize);
        for index in indices {
            let handler = r.read_u32()?;
            if handler == 0 || !context.is_code_va(handler) {
                return Err(ValidationError::BadSlot {
                    slot: "dynamic handler pointer",
                    value: handler,
                });
            }
            entries.push(DynamicEntry { index, handler });
        }

        Ok(Self { va, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(load: u32, data: Vec<u8>) -> RecoveryContext {
        let mut context = RecoveryContext::default();
        context
            .code_sections
            .push(SectionMap::new("CODE", load, data));
        context.header_length = Some(76);
        context.object_section = Some(0);
        context
    }

    fn put_u16(data: &mut [u8], at: u32, value: u16) {
        data[at as usize..at as usize + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put(data: &mut [u8], at: u32, value: u32) {
        data[at as usize..at as usize + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_pascal(data: &mut [u8], at: u32, text: &str) {
        data[at as usize] = text.len() as u8;
        data[at as usize + 1..at as usize + 1 + text.len()].copy_from_slice(text.as_bytes());
    }

    #[test]
    fn test_legacy_field_table() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        // One legacy field "FOwner" of type index 0; types table at 0x200.
        put_u16(&mut data, 0x100, 1);
        put(&mut data, 0x102, load + 0x200);
        put(&mut data, 0x106, 4); // instance offset
        put_u16(&mut data, 0x10a, 0);
        put_pascal(&mut data, 0x10c, "FOwner");
        // Field-types table: one class pointer.
        put_u16(&mut data, 0x200, 1);
        put(&mut data, 0x202, load + 0x300);
        let context = context(load, data);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let table = FieldTable::parse(section, load + 0x100, &context, &mut queue).unwrap();
        assert_eq!(table.field_types, Some(load + 0x200));
        assert_eq!(table.fields.len(), 1);
        assert_eq!(table.fields[0].name, "FOwner");
        assert_eq!(table.fields[0].type_ref, FieldTypeRef::LegacyIndex(0));

        // The types table was enqueued; parsing it enqueues its classes
        // as vftable candidates.
        let item = queue.get_item().unwrap();
        assert_eq!(item.kind, ObjectKind::FieldTypes);
        let types = FieldTypes::parse(section, item.location, &context, &mut queue).unwrap();
        assert_eq!(types.classes, vec![load + 0x300]);
        let item = queue.get_item().unwrap();
        assert_eq!((item.location, item.kind), (load + 0x300, ObjectKind::Vftable));
    }

    #[test]
    fn test_modern_field_table() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        put_u16(&mut data, 0x100, 0); // modern marker
        put(&mut data, 0x102, 0); // reserved
        put_u16(&mut data, 0x106, 1);
        data[0x108] = 2; // visibility
        put(&mut data, 0x109, load + 0x200); // PPTypeInfo
        put(&mut data, 0x10d, 8); // instance offset
        put_pascal(&mut data, 0x111, "FCount");
        put_u16(&mut data, 0x118, 2); // no extra data
        put(&mut data, 0x200, load + 0x280); // indirection target
        let context = context(load, data);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let table = FieldTable::parse(section, load + 0x100, &context, &mut queue).unwrap();
        assert_eq!(table.field_types, None);
        assert_eq!(table.fields[0].type_ref, FieldTypeRef::TypeInfo(load + 0x200));
        let item = queue.get_item().unwrap();
        assert_eq!((item.location, item.kind), (load + 0x280, ObjectKind::TypeInfo));
    }

    #[test]
    fn test_method_table_skips_extra_data() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        put_u16(&mut data, 0x100, 2);
        // Entry one: declared size includes 4 bytes of trailing data.
        put_u16(&mut data, 0x102, 2 + 4 + 5 + 4);
        put(&mut data, 0x104, load + 0x80);
        put_pascal(&mut data, 0x108, "Free");
        // Entry two starts after the skipped bytes.
        let at = 0x102 + 15;
        put_u16(&mut data, at, 2 + 4 + 8);
        put(&mut data, at + 2, load + 0x90);
        put_pascal(&mut data, at + 6, "Destroy");
        let context = context(load, data);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let table = MethodTable::parse(section, load + 0x100, &context, &mut queue).unwrap();
        assert_eq!(table.methods.len(), 2);
        assert_eq!(table.methods[0].name, "Free");
        assert_eq!(table.methods[1].name, "Destroy");
        assert_eq!(table.methods[1].function, load + 0x90);
    }

    #[test]
    fn test_method_table_rejects_non_code_pointer() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        put_u16(&mut data, 0x100, 1);
        put_u16(&mut data, 0x102, 11);
        put(&mut data, 0x104, 0x7fff_0000); // not in any code section
        put_pascal(&mut data, 0x108, "Free");
        let context = context(load, data);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let err = MethodTable::parse(section, load + 0x100, &context, &mut queue).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::BadSlot {
                slot: "method function pointer",
                ..
            }
        ));
    }

    #[test]
    fn test_interface_table() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        put(&mut data, 0x100, 1);
        // IUnknown {00000000-0000-0000-C000-000000000046}.
        let guid: [u8; 16] = [
            0, 0, 0, 0, 0, 0, 0, 0, 0xc0, 0, 0, 0, 0, 0, 0, 0x46,
        ];
        data[0x104..0x114].copy_from_slice(&guid);
        put(&mut data, 0x114, load + 0x200);
        put(&mut data, 0x118, 12);
        put(&mut data, 0x11c, 0);
        let context = context(load, data);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let table = InterfaceTable::parse(section, load + 0x100, &context, &mut queue).unwrap();
        assert_eq!(table.entries.len(), 1);
        assert_eq!(
            table.entries[0].guid.to_string(),
            "00000000-0000-0000-c000-000000000046"
        );
        assert_eq!(table.entries[0].vtable, load + 0x200);
        assert_eq!(table.entries[0].offset, 12);
    }

    #[test]
    fn test_dynamic_table() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        put_u16(&mut data, 0x100, 2);
        put_u16(&mut data, 0x102, 0xb000); // WM_USER-ish message ids
        put_u16(&mut data, 0x104, 0xb001);
        put(&mut data, 0x106, load + 0x80);
        put(&mut data, 0x10a, load + 0x90);
        let context = context(load, data);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let table = DynamicTable::parse(section, load + 0x100, &context, &mut queue).unwrap();
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[0].index, 0xb000);
        assert_eq!(table.entries[1].handler, load + 0x90);
    }

    #[test]
    fn test_counts_are_bounded() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        put_u16(&mut data, 0x100, u16::MAX);
        let context = context(load, data);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        assert!(matches!(
            FieldTable::parse(section, load + 0x100, &context, &mut queue),
            Err(ValidationError::ImplausibleCount { .. })
        ));
        assert!(matches!(
            MethodTable::parse(section, load + 0x100, &context, &mut queue),
            Err(ValidationError::ImplausibleCount { .. })
        ));
        assert!(matches!(
            DynamicTable::parse(section, load + 0x100, &context, &mut queue),
            Err(ValidationError::ImplausibleCount { .. })
        ));
    }
}
