//! Vftable parsing.
//!
//! Every Delphi class gets one vftable: eleven common header slots
//! (self pointer, seven table pointers, class name, instance size,
//! parent), the generation-dependent standard method slots, then the
//! user's virtual methods. The self pointer in slot zero references the
//! first user method, which is how the scanner finds candidates and how
//! the header length is measured.

use serde::Serialize;

use crate::context::RecoveryContext;
use crate::error::ValidationError;
use crate::queue::{ObjectKind, WorkQueue};
use crate::section::{SectionMap, SectionReader};

/// Total size of the eleven-slot common header (self pointer through
/// parent, 4 bytes each).
pub const VMT_COMMON_LENGTH: u32 = 44;

/// A validated class vftable.
#[derive(Debug, Clone, Serialize)]
pub struct Vftable {
    pub va: u32,
    pub self_ptr: u32,
    pub intf_table: u32,
    pub auto_table: u32,
    pub init_table: u32,
    pub type_info: u32,
    pub field_table: u32,
    pub method_table: u32,
    pub dynamic_table: u32,
    pub class_name_ptr: u32,
    pub instance_size: u32,
    pub parent: u32,
    /// Class name resolved through the name slot.
    pub class_name: String,
    /// Standard method slots between the common header and the first
    /// user method (count depends on the derived header length).
    pub standard_slots: Vec<u32>,
}

impl Vftable {
    /// Parse and validate a vftable at `va`.
    ///
    /// The table pointers must each be zero or an in-section address, the
    /// self pointer must honour the derived header length exactly, and
    /// the class name must resolve to a plausible identifier. On success
    /// the parent and every referenced table are enqueued for later
    /// passes; a failed candidate enqueues nothing.
    pub fn parse(
        section: &SectionMap,
        va: u32,
        context: &RecoveryContext,
        queue: &mut WorkQueue,
    ) -> Result<Self, ValidationError> {
        let header_length = context
            .header_length
            .ok_or(ValidationError::MissingFact("header length"))?;
        let offset = section.offset_from_va(va)?;
        let mut r = SectionReader::new(section, offset);

        let self_ptr = r.read_u32()?;
        let intf_table = r.read_u32()?;
        let auto_table = r.read_u32()?;
        let init_table = r.read_u32()?;
        let type_info = r.read_u32()?;
        let field_table = r.read_u32()?;
        let method_table = r.read_u32()?;
        let dynamic_table = r.read_u32()?;
        let class_name_ptr = r.read_u32()?;
        let instance_size = r.read_u32()?;
        let parent = r.read_u32()?;

        let expected = va.wrapping_add(header_length);
        if self_ptr != expected {
            return Err(ValidationError::SelfPointerMismatch {
                found: self_ptr,
                expected,
            });
        }

        for (slot, value) in [
            ("vmtIntfTable", intf_table),
            ("vmtAutoTable", auto_table),
            ("vmtInitTable", init_table),
            ("vmtTypeInfo", type_info),
            ("vmtFieldTable", field_table),
            ("vmtMethodTable", method_table),
            ("vmtDynamicTable", dynamic_table),
        ] {
            if value != 0 && !section.contains_va(value) {
                return Err(ValidationError::BadSlot { slot, value });
            }
        }

        if !section.contains_va(class_name_ptr) {
            return Err(ValidationError::BadSlot {
                slot: "vmtClassName",
                value: class_name_ptr,
            });
        }
        let name_offset = section.offset_from_va(class_name_ptr)?;
        let (class_name, _) = section.read_pascal_string_at(name_offset)?;
        if class_name.is_empty() {
            return Err(ValidationError::BadString {
                offset: name_offset,
            });
        }

        // Every Delphi instance carries at least a class pointer.
        if instance_size < 4 {
            return Err(ValidationError::BadSlot {
                slot: "vmtInstanceSize",
                value: instance_size,
            });
        }

        if parent != 0 && !section.contains_va(parent) {
            return Err(ValidationError::BadSlot {
                slot: "vmtParent",
                value: parent,
            });
        }

        // Standard method slots occupy the gap between the common header
        // and the self-pointer target. They are never null and always
        // land in code.
        let slot_count = header_length.saturating_sub(VMT_COMMON_LENGTH) / 4;
        let mut standard_slots = Vec::with_capacity(slot_count as usize);
        for _ in 0..slot_count {
            let slot = r.read_u32()?;
            if slot == 0 || !context.is_code_va(slot) {
                return Err(ValidationError::BadSlot {
                    slot: "standard method",
                    value: slot,
                });
            }
            standard_slots.push(slot);
        }

        // All checks passed: only now register follow-up work.
        if parent != 0 {
            queue.add_item(parent, ObjectKind::Vftable);
        }
        for (target, kind) in [
            (intf_table, ObjectKind::InterfaceTable),
            (type_info, ObjectKind::TypeInfo),
            (field_table, ObjectKind::FieldTable),
            (method_table, ObjectKind::MethodTable),
            (dynamic_table, ObjectKind::DynamicTable),
        ] {
            if target != 0 {
                queue.add_item(target, kind);
            }
        }

        Ok(Self {
            va,
            self_ptr,
            intf_table,
            auto_table,
            init_table,
            type_info,
            field_table,
            method_table,
            dynamic_table,
            class_name_ptr,
            instance_size,
            parent,
            class_name,
            standard_slots,
        })
    }

    /// Minimal vftable for tests that only need an entry in the item list.
    #[cfg(test)]
    pub(crate) fn synthetic(va: u32) -> Self {
        Self {
            va,
            self_ptr: va + 76,
            intf_table: 0,
            auto_table: 0,
            init_table: 0,
            type_info: 0,
            field_table: 0,
            method_table: 0,
            dynamic_table: 0,
            class_name_ptr: va + 44,
            instance_size: 4,
            parent: 0,
            class_name: "TObject".to_string(),
            standard_slots: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(load: u32, data: Vec<u8>, header_length: u32) -> RecoveryContext {
        let mut context = RecoveryContext::default();
        context
            .code_sections
            .push(SectionMap::new("CODE", load, data));
        context.header_length = Some(header_length);
        context.object_section = Some(0);
        context
    }

    fn put(data: &mut [u8], at: u32, value: u32) {
        data[at as usize..at as usize + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_pascal(data: &mut [u8], at: u32, text: &str) {
        data[at as usize] = text.len() as u8;
        data[at as usize + 1..at as usize + 1 + text.len()].copy_from_slice(text.as_bytes());
    }

    /// Vftable with a 40-byte header at 0x100, name at 0x200.
    fn craft(data: &mut [u8], load: u32) {
        put(data, 0x100, load + 0x100 + 40);
        put(data, 0x120, load + 0x200);
        put(data, 0x124, 8);
        put(data, 0x128, 0);
        put_pascal(data, 0x200, "TObject");
    }

    #[test]
    fn test_parse_valid_vftable() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        craft(&mut data, load);
        let context = context(load, data, 40);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let v = Vftable::parse(section, load + 0x100, &context, &mut queue).unwrap();
        assert_eq!(v.class_name, "TObject");
        assert_eq!(v.self_ptr, load + 0x140);
        assert_eq!(v.instance_size, 8);
        assert_eq!(v.parent, 0);
        assert!(v.standard_slots.is_empty());
        // TObject references no tables, so nothing is enqueued.
        assert!(queue.is_empty());
    }

    #[test]
    fn test_parse_enqueues_references() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        craft(&mut data, load);
        // Give the class a parent and a method table.
        put(&mut data, 0x128, load + 0x300);
        put(&mut data, 0x118, load + 0x340);
        let context = context(load, data, 40);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        Vftable::parse(section, load + 0x100, &context, &mut queue).unwrap();
        let first = queue.get_item().unwrap();
        assert_eq!((first.location, first.kind), (load + 0x300, ObjectKind::Vftable));
        let second = queue.get_item().unwrap();
        assert_eq!(
            (second.location, second.kind),
            (load + 0x340, ObjectKind::MethodTable)
        );
    }

    #[test]
    fn test_parse_rejects_self_pointer_mismatch() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        craft(&mut data, load);
        let context = context(load, data, 44); // wrong derived length
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let err = Vftable::parse(section, load + 0x100, &context, &mut queue).unwrap_err();
        assert!(matches!(err, ValidationError::SelfPointerMismatch { .. }));
        // A failed candidate must register no follow-up work.
        assert!(queue.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_name() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        craft(&mut data, load);
        // Name pointer that leaves the section.
        put(&mut data, 0x120, load + 0x1000);
        let context = context(load, data, 40);
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let err = Vftable::parse(section, load + 0x100, &context, &mut queue).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::BadSlot {
                slot: "vmtClassName",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_standard_slots_must_hit_code() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        // 48-byte header: one standard slot at offset 44.
        put(&mut data, 0x100, load + 0x100 + 48);
        put(&mut data, 0x120, load + 0x200);
        put(&mut data, 0x124, 8);
        put_pascal(&mut data, 0x200, "TObject");

        // Null standard slot: rejected.
        let ctx1 = context(load, data.clone(), 48);
        let section = ctx1.object_section().unwrap();
        let mut queue = WorkQueue::new();
        let err = Vftable::parse(section, load + 0x100, &ctx1, &mut queue).unwrap_err();
        assert!(matches!(err, ValidationError::BadSlot { slot: "standard method", .. }));

        // Pointing into code: accepted.
        put(&mut data, 0x12c, load + 0x80);
        let ctx2 = context(load, data, 48);
        let section = ctx2.object_section().unwrap();
        let mut queue = WorkQueue::new();
        let v = Vftable::parse(section, load + 0x100, &ctx2, &mut queue).unwrap();
        assert_eq!(v.standard_slots, vec![load + 0x80]);
    }

    #[test]
    fn test_parse_requires_header_length_fact() {
        let load = 0x0040_1000;
        let mut data = vec![0u8; 0x400];
        craft(&mut data, load);
        let mut context = context(load, data, 40);
        context.header_length = None;
        let section = context.object_section().unwrap();
        let mut queue = WorkQueue::new();

        let err = Vftable::parse(section, load + 0x100, &context, &mut queue).unwrap_err();
        assert_eq!(err, ValidationError::MissingFact("header length"));
    }
}
