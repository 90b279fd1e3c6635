//! Typed objects recovered from the work queue.
//!
//! A closed set of record shapes, one constructor per kind, selected by
//! the kind tag carried on the work item. Constructors validate the full
//! byte layout before producing anything: a candidate either becomes a
//! complete object or a [`ValidationError`], never a partial object.

pub mod tables;
pub mod typeinfo;
pub mod vftable;

pub use tables::{
    DynamicEntry, DynamicTable, FieldEntry, FieldTable, FieldTypeRef, FieldTypes, InterfaceEntry,
    InterfaceTable, MethodEntry, MethodTable,
};
pub use typeinfo::{
    FloatType, MethodKind, MethodParam, OrdinalType, PropertyEntry, TypeInfo, TypeKind,
    TypePayload,
};
pub use vftable::Vftable;

use serde::Serialize;

use crate::context::RecoveryContext;
use crate::error::ValidationError;
use crate::queue::{ObjectKind, WorkItem, WorkQueue};
use crate::section::SectionMap;

/// A validated, immutable recovered object.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum RecoveredObject {
    Vftable(Vftable),
    TypeInfo(TypeInfo),
    FieldTable(FieldTable),
    FieldTypes(FieldTypes),
    MethodTable(MethodTable),
    InterfaceTable(InterfaceTable),
    DynamicTable(DynamicTable),
}

impl RecoveredObject {
    /// The virtual address this object was recovered from.
    pub fn location(&self) -> u32 {
        match self {
            RecoveredObject::Vftable(o) => o.va,
            RecoveredObject::TypeInfo(o) => o.va,
            RecoveredObject::FieldTable(o) => o.va,
            RecoveredObject::FieldTypes(o) => o.va,
            RecoveredObject::MethodTable(o) => o.va,
            RecoveredObject::InterfaceTable(o) => o.va,
            RecoveredObject::DynamicTable(o) => o.va,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            RecoveredObject::Vftable(_) => ObjectKind::Vftable,
            RecoveredObject::TypeInfo(_) => ObjectKind::TypeInfo,
            RecoveredObject::FieldTable(_) => ObjectKind::FieldTable,
            RecoveredObject::FieldTypes(_) => ObjectKind::FieldTypes,
            RecoveredObject::MethodTable(_) => ObjectKind::MethodTable,
            RecoveredObject::InterfaceTable(_) => ObjectKind::InterfaceTable,
            RecoveredObject::DynamicTable(_) => ObjectKind::DynamicTable,
        }
    }
}

/// Construct the object a work item declares.
///
/// Shared contract for every kind: read and validate the layout at
/// `item.location` inside `section`; on success the object may have
/// enqueued follow-up work; on failure nothing was enqueued and no
/// object exists.
pub fn construct(
    item: WorkItem,
    section: &SectionMap,
    context: &RecoveryContext,
    queue: &mut WorkQueue,
) -> Result<RecoveredObject, ValidationError> {
    match item.kind {
        ObjectKind::Vftable => {
            Vftable::parse(section, item.location, context, queue).map(RecoveredObject::Vftable)
        }
        ObjectKind::TypeInfo => {
            TypeInfo::parse(section, item.location, context, queue).map(RecoveredObject::TypeInfo)
        }
        ObjectKind::FieldTable => FieldTable::parse(section, item.location, context, queue)
            .map(RecoveredObject::FieldTable),
        ObjectKind::FieldTypes => FieldTypes::parse(section, item.location, context, queue)
            .map(RecoveredObject::FieldTypes),
        ObjectKind::MethodTable => MethodTable::parse(section, item.location, context, queue)
            .map(RecoveredObject::MethodTable),
        ObjectKind::InterfaceTable => InterfaceTable::parse(section, item.location, context, queue)
            .map(RecoveredObject::InterfaceTable),
        ObjectKind::DynamicTable => DynamicTable::parse(section, item.location, context, queue)
            .map(RecoveredObject::DynamicTable),
    }
}
