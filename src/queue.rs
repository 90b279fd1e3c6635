//! Work queue for the queue-driven RTTI parser.
//!
//! An ordered backlog of `(virtual address, expected kind)` pairs awaiting
//! parsing. Items are added by the vftable scanner and by objects during
//! construction (forward references), and consumed by the parser passes.
//! The queue de-duplicates on `(location, kind)` for the lifetime of the
//! run, so every address is parsed at most once per kind and chained
//! references cannot loop forever.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// The closed set of object kinds the parser knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Vftable,
    TypeInfo,
    FieldTable,
    FieldTypes,
    MethodTable,
    InterfaceTable,
    DynamicTable,
}

/// One unit of pending work: where to parse, and what to expect there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub location: u32,
    pub kind: ObjectKind,
}

/// FIFO backlog with kind-filtered dequeue and set-backed de-duplication.
#[derive(Debug, Default)]
pub struct WorkQueue {
    queue: VecDeque<WorkItem>,
    seen: HashSet<(u32, ObjectKind)>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a location unless the same `(location, kind)` pair has
    /// already been admitted this run. Returns whether it was added.
    pub fn add_item(&mut self, location: u32, kind: ObjectKind) -> bool {
        if !self.seen.insert((location, kind)) {
            return false;
        }
        self.queue.push_back(WorkItem { location, kind });
        true
    }

    /// Dequeue the oldest item of any kind.
    pub fn get_item(&mut self) -> Option<WorkItem> {
        self.queue.pop_front()
    }

    /// Dequeue the oldest item of the given kind, leaving the relative
    /// order of everything else untouched.
    pub fn get_item_of(&mut self, kind: ObjectKind) -> Option<WorkItem> {
        let index = self.queue.iter().position(|item| item.kind == kind)?;
        self.queue.remove(index)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = WorkQueue::new();
        q.add_item(0x100, ObjectKind::Vftable);
        q.add_item(0x200, ObjectKind::Vftable);
        q.add_item(0x300, ObjectKind::Vftable);

        assert_eq!(q.get_item().unwrap().location, 0x100);
        assert_eq!(q.get_item().unwrap().location, 0x200);
        assert_eq!(q.get_item().unwrap().location, 0x300);
        assert!(q.get_item().is_none());
    }

    #[test]
    fn test_filtered_dequeue() {
        let mut q = WorkQueue::new();
        q.add_item(0x100, ObjectKind::TypeInfo);
        q.add_item(0x200, ObjectKind::Vftable);
        q.add_item(0x300, ObjectKind::Vftable);

        // Filtered dequeue never returns another kind while the requested
        // kind remains, and preserves FIFO among same-kind items.
        assert_eq!(q.get_item_of(ObjectKind::Vftable).unwrap().location, 0x200);
        assert_eq!(q.get_item_of(ObjectKind::Vftable).unwrap().location, 0x300);
        assert!(q.get_item_of(ObjectKind::Vftable).is_none());

        // The other kind is still there, in its original position.
        assert_eq!(q.get_item().unwrap().location, 0x100);
    }

    #[test]
    fn test_deduplication() {
        let mut q = WorkQueue::new();
        assert!(q.add_item(0x100, ObjectKind::Vftable));
        assert!(!q.add_item(0x100, ObjectKind::Vftable));
        // Same address under a different kind is distinct work.
        assert!(q.add_item(0x100, ObjectKind::TypeInfo));
        assert_eq!(q.len(), 2);

        // Dedup holds across dequeue: a drained pair cannot be requeued.
        q.get_item().unwrap();
        assert!(!q.add_item(0x100, ObjectKind::Vftable));
        assert_eq!(q.len(), 1);
    }
}
