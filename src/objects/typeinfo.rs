//! Type-information record parsing.
//!
//! A type-info record is a one-byte type kind, a length-prefixed name,
//! and a kind-specific payload. References between records go through a
//! pointer-to-pointer indirection (`PPTypeInfo`): the slot names a
//! location that itself holds the address of the referenced record.
//! Record text encoding is generation-dependent, which is why these parse
//! only after the compiler generation has been classified.

use serde::Serialize;

use crate::context::RecoveryContext;
use crate::error::ValidationError;
use crate::queue::{ObjectKind, WorkQueue};
use crate::section::{SectionMap, SectionReader};

/// Delphi type kinds, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Unknown,
    Integer,
    Char,
    Enumeration,
    Float,
    ShortString,
    Set,
    Class,
    Method,
    WChar,
    LString,
    WString,
    Variant,
    Array,
    Record,
    Interface,
    Int64,
    DynArray,
    UString,
    ClassRef,
    Pointer,
    Procedure,
}

impl TypeKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => TypeKind::Unknown,
            1 => TypeKind::Integer,
            2 => TypeKind::Char,
            3 => TypeKind::Enumeration,
            4 => TypeKind::Float,
            5 => TypeKind::ShortString,
            6 => TypeKind::Set,
            7 => TypeKind::Class,
            8 => TypeKind::Method,
            9 => TypeKind::WChar,
            10 => TypeKind::LString,
            11 => TypeKind::WString,
            12 => TypeKind::Variant,
            13 => TypeKind::Array,
            14 => TypeKind::Record,
            15 => TypeKind::Interface,
            16 => TypeKind::Int64,
            17 => TypeKind::DynArray,
            18 => TypeKind::UString,
            19 => TypeKind::ClassRef,
            20 => TypeKind::Pointer,
            21 => TypeKind::Procedure,
            _ => return None,
        })
    }
}

/// Storage width and signedness of an ordinal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrdinalType {
    SByte,
    UByte,
    SWord,
    UWord,
    SLong,
    ULong,
}

impl OrdinalType {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => OrdinalType::SByte,
            1 => OrdinalType::UByte,
            2 => OrdinalType::SWord,
            3 => OrdinalType::UWord,
            4 => OrdinalType::SLong,
            5 => OrdinalType::ULong,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FloatType {
    Single,
    Double,
    Extended,
    Comp,
    Curr,
}

impl FloatType {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => FloatType::Single,
            1 => FloatType::Double,
            2 => FloatType::Extended,
            3 => FloatType::Comp,
            4 => FloatType::Curr,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Procedure,
    Function,
    Constructor,
    Destructor,
    ClassProcedure,
    ClassFunction,
    ClassConstructor,
    OperatorOverload,
    SafeProcedure,
    SafeFunction,
}

impl MethodKind {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => MethodKind::Procedure,
            1 => MethodKind::Function,
            2 => MethodKind::Constructor,
            3 => MethodKind::Destructor,
            4 => MethodKind::ClassProcedure,
            5 => MethodKind::ClassFunction,
            6 => MethodKind::ClassConstructor,
            7 => MethodKind::OperatorOverload,
            8 => MethodKind::SafeProcedure,
            9 => MethodKind::SafeFunction,
            _ => return None,
        })
    }
}

/// One published property of a class type.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyEntry {
    pub type_ref: u32,
    pub get_proc: u32,
    pub set_proc: u32,
    pub stored_proc: u32,
    pub index: u32,
    pub default: u32,
    pub name_index: u16,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodParam {
    pub flags: u8,
    pub name: String,
    pub type_name: String,
}

/// Kind-specific payload. Kinds that do not feed the class map are
/// carried with kind and name only.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TypePayload {
    Ordinal {
        ord_type: OrdinalType,
        min: i32,
        max: i32,
    },
    Enumeration {
        ord_type: OrdinalType,
        min: i32,
        max: i32,
        base_type: u32,
    },
    Class {
        class_ptr: u32,
        parent_ref: u32,
        unit_name: String,
        properties: Vec<PropertyEntry>,
    },
    Float {
        float_type: FloatType,
    },
    Int64 {
        min: i64,
        max: i64,
    },
    Set {
        base_type: u32,
    },
    Pointer {
        referenced: u32,
    },
    ClassRef {
        referenced: u32,
    },
    Method {
        method_kind: MethodKind,
        params: Vec<MethodParam>,
    },
    Opaque,
}

/// A validated type-information record.
#[derive(Debug, Clone, Serialize)]
pub struct TypeInfo {
    pub va: u32,
    pub kind: TypeKind,
    pub name: String,
    pub payload: TypePayload,
}

impl TypeInfo {
    pub fn parse(
        section: &SectionMap,
        va: u32,
        context: &RecoveryContext,
        queue: &mut WorkQueue,
    ) -> Result<Self, ValidationError> {
        let layout = context
            .version
            .ok_or(ValidationError::MissingFact("compiler generation"))?
            .layout();

        let offset = section.offset_from_va(va)?;
        let mut r = SectionReader::new(section, offset);

        let kind_byte = r.read_u8()?;
        let kind = TypeKind::from_u8(kind_byte).ok_or(ValidationError::BadEnum {
            what: "type kind",
            value: kind_byte,
        })?;
        let name = read_name(&mut r, layout.utf8_names)?;

        // Follow-up work is collected and only registered once the whole
        // record has validated.
        let mut pending: Vec<(u32, ObjectKind)> = Vec::new();

        let payload = match kind {
            TypeKind::Integer | TypeKind::Char | TypeKind::WChar => {
                let ord_type = read_ordinal_type(&mut r)?;
                let min = r.read_i32()?;
                let max = r.read_i32()?;
                check_range(min, max)?;
                TypePayload::Ordinal { ord_type, min, max }
            }
            TypeKind::Enumeration => {
                let ord_type = read_ordinal_type(&mut r)?;
                let min = r.read_i32()?;
                let max = r.read_i32()?;
                check_range(min, max)?;
                let base_type = r.read_u32()?;
                follow_type_ref(section, base_type, &mut pending)?;
                TypePayload::Enumeration {
                    ord_type,
                    min,
                    max,
                    base_type,
                }
            }
            TypeKind::Class => {
                let class_ptr = r.read_u32()?;
                if class_ptr != 0 {
                    if !section.contains_va(class_ptr) {
                        return Err(ValidationError::BadSlot {
                            slot: "class vftable pointer",
                            value: class_ptr,
                        });
                    }
                    pending.push((class_ptr, ObjectKind::Vftable));
                }
                let parent_ref = r.read_u32()?;
                follow_type_ref(section, parent_ref, &mut pending)?;
                r.skip(2)?;
                let unit_name = read_name(&mut r, layout.utf8_names)?;
                let prop_count = r.read_u16()?;
                if prop_count > 512 {
                    return Err(ValidationError::ImplausibleCount {
                        what: "property",
                        count: prop_count as u32,
                    });
                }
                let mut properties = Vec::with_capacity(prop_count as usize);
                for _ in 0..prop_count {
                    let type_ref = r.read_u32()?;
                    follow_type_ref(section, type_ref, &mut pending)?;
                    let get_proc = r.read_u32()?;
                    let set_proc = r.read_u32()?;
                    let stored_proc = r.read_u32()?;
                    let index = r.read_u32()?;
                    let default = r.read_u32()?;
                    let name_index = r.read_u16()?;
                    let name = read_name(&mut r, layout.utf8_names)?;
                    properties.push(PropertyEntry {
                        type_ref,
                        get_proc,
                        set_proc,
                        stored_proc,
                        index,
                        default,
                        name_index,
                        name,
                    });
                }
                TypePayload::Class {
                    class_ptr,
                    parent_ref,
                    unit_name,
                    properties,
                }
            }
            TypeKind::Float => {
                let value = r.read_u8()?;
                let float_type = FloatType::from_u8(value).ok_or(ValidationError::BadEnum {
                    what: "float type",
                    value,
                })?;
                TypePayload::Float { float_type }
            }
            TypeKind::Int64 => {
                let min = r.read_i64()?;
                let max = r.read_i64()?;
                if min > max {
                    return Err(ValidationError::InvertedRange { what: "Int64" });
                }
                TypePayload::Int64 { min, max }
            }
            TypeKind::Set => {
                r.skip(1)?;
                let base_type = r.read_u32()?;
                follow_type_ref(section, base_type, &mut pending)?;
                TypePayload::Set { base_type }
            }
            TypeKind::Pointer => {
                let referenced = r.read_u32()?;
                follow_type_ref(section, referenced, &mut pending)?;
                TypePayload::Pointer { referenced }
            }
            TypeKind::ClassRef => {
                let referenced = r.read_u32()?;
                follow_type_ref(section, referenced, &mut pending)?;
                TypePayload::ClassRef { referenced }
            }
            TypeKind::Method => {
                let value = r.read_u8()?;
                let method_kind = MethodKind::from_u8(value).ok_or(ValidationError::BadEnum {
                    what: "method kind",
                    value,
                })?;
                let param_count = r.read_u8()?;
                let mut params = Vec::with_capacity(param_count as usize);
                for _ in 0..param_count {
                    let flags = r.read_u8()?;
                    let name = read_name(&mut r, layout.utf8_names)?;
                    let type_name = read_name(&mut r, layout.utf8_names)?;
                    params.push(MethodParam {
                        flags,
                        name,
                        type_name,
                    });
                }
                TypePayload::Method {
                    method_kind,
                    params,
                }
            }
            // Remaining kinds carry kind and name only.
            _ => TypePayload::Opaque,
        };

        for (location, kind) in pending {
            queue.add_item(location, kind);
        }

        Ok(Self {
            va,
            kind,
            name,
            payload,
        })
    }
}

fn read_name(r: &mut SectionReader<'_>, utf8: bool) -> Result<String, ValidationError> {
    let at = r.pos();
    let name = r.read_pascal_string()?;
    if !utf8 && !name.is_ascii() {
        return Err(ValidationError::BadString { offset: at });
    }
    Ok(name)
}

fn read_ordinal_type(r: &mut SectionReader<'_>) -> Result<OrdinalType, ValidationError> {
    let value = r.read_u8()?;
    OrdinalType::from_u8(value).ok_or(ValidationError::BadEnum {
        what: "ordinal type",
        value,
    })
}

fn check_range(min: i32, max: i32) -> Result<(), ValidationError> {
    if min > max {
        return Err(ValidationError::InvertedRange { what: "ordinal" });
    }
    Ok(())
}

/// Follow a `PPTypeInfo` slot: the slot may be null; when set it must be
/// an in-section location holding the address of the referenced record.
/// Targets outside the section (imported package RTTI) are skipped, not
/// failures.
fn follow_type_ref(
    section: &SectionMap,
    ptr: u32,
    pending: &mut Vec<(u32, ObjectKind)>,
) -> Result<(), ValidationError> {
    if ptr == 0 {
        return Ok(());
    }
    if !section.contains_va(ptr) {
        return Err(ValidationError::BadSlot {
            slot: "type reference",
            value: ptr,
        });
    }
    let target = section.read_u32_at(section.offset_from_va(ptr)?)?;
    if target != 0 && section.contains_va(target) {
        pending.push((target, ObjectKind::TypeInfo));
    }
    Ok(())
}
