//! Process-wide state for one analysis run.
//!
//! The context is the single source of truth handed to every stage and to
//! every object constructor, so an object can look up the derived header
//! length or the compiler generation while validating itself. It is
//! created once per run, mutated incrementally by each stage, and remains
//! available to the caller after a fatal abort (partially populated).

use crate::objects::{RecoveredObject, Vftable};
use crate::resources::{License, PackageInfo};
use crate::section::SectionMap;
use crate::units::UnitInitTable;
use crate::version::DelphiGeneration;

/// Mutable state for one analysis of one binary. Not re-entrant: one
/// context corresponds to exactly one in-flight run.
#[derive(Debug, Default)]
pub struct RecoveryContext {
    /// Sections flagged as containing code.
    pub code_sections: Vec<SectionMap>,
    /// Sections flagged as containing initialised data.
    pub data_sections: Vec<SectionMap>,
    /// Derived distance from a vftable's start to its first method slot.
    pub header_length: Option<u32>,
    /// Index into `code_sections` of the section holding Delphi objects.
    pub object_section: Option<usize>,
    /// Compiler-generation fact, inferred once vftables are known.
    pub version: Option<DelphiGeneration>,
    /// Every validated object, in construction order. Append-only.
    pub items: Vec<RecoveredObject>,
    /// Product edition recovered from the DVCLAL resource.
    pub license: Option<License>,
    /// Unit list recovered from the PACKAGEINFO resource.
    pub units: Option<PackageInfo>,
    /// The unit initialisation table anchoring the main code section.
    pub init_table: Option<UnitInitTable>,
}

impl RecoveryContext {
    /// The section recovered objects live in, once the TObject locator
    /// has identified it.
    pub fn object_section(&self) -> Option<&SectionMap> {
        self.object_section.map(|idx| &self.code_sections[idx])
    }

    /// Whether `va` lands inside any code section. Used to validate
    /// method and handler pointers, which may target any code section.
    pub fn is_code_va(&self, va: u32) -> bool {
        self.code_sections.iter().any(|s| s.contains_va(va))
    }

    /// The recovered vftables, in construction order.
    pub fn vftables(&self) -> impl Iterator<Item = &Vftable> {
        self.items.iter().filter_map(|item| match item {
            RecoveredObject::Vftable(v) => Some(v),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_code_va() {
        let mut context = RecoveryContext::default();
        context
            .code_sections
            .push(SectionMap::new("CODE", 0x0040_1000, vec![0; 0x100]));
        context
            .code_sections
            .push(SectionMap::new(".itext", 0x0040_2000, vec![0; 0x100]));

        assert!(context.is_code_va(0x0040_1080));
        assert!(context.is_code_va(0x0040_2000));
        assert!(!context.is_code_va(0x0040_1100));
        assert!(!context.is_code_va(0));
    }

    #[test]
    fn test_object_section_lookup() {
        let mut context = RecoveryContext::default();
        context
            .code_sections
            .push(SectionMap::new("CODE", 0x0040_1000, vec![0; 0x100]));
        assert!(context.object_section().is_none());

        context.object_section = Some(0);
        assert_eq!(context.object_section().unwrap().name(), "CODE");
    }
}
