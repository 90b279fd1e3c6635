//! Compiler-generation classification.
//!
//! Delphi's VMT layout changed at Delphi 2009: three standard slots
//! (Equals, GetHashCode, ToString) were inserted between the common
//! header and the eight classic standard methods, and RTTI names became
//! UTF-8. Later record layouts depend on which side of that divide the
//! compiler sits, so the classification must exist before any
//! version-dependent record is parsed.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::RecoveryContext;

/// Discrete compiler-generation fact, derived from structural evidence in
/// recovered vftables. Computed exactly once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelphiGeneration {
    /// Delphi 2 through 2007: 19-slot standard header (76 bytes).
    Legacy,
    /// Delphi 2009 and later: 22-slot standard header (88 bytes),
    /// UTF-8 RTTI names.
    Modern,
}

/// Layout facts a constructor needs when a record shape differs across
/// generations. Looked up from the generation fact instead of branching
/// in every constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmtLayout {
    /// Distance from a vftable's start to its first user method slot.
    pub standard_header_length: u32,
    /// Standard slots inserted after the common header (Equals,
    /// GetHashCode, ToString on modern compilers).
    pub extra_slots: u32,
    /// Whether RTTI names may contain non-ASCII UTF-8.
    pub utf8_names: bool,
}

const LEGACY_LAYOUT: VmtLayout = VmtLayout {
    standard_header_length: 76,
    extra_slots: 0,
    utf8_names: false,
};

const MODERN_LAYOUT: VmtLayout = VmtLayout {
    standard_header_length: 88,
    extra_slots: 3,
    utf8_names: true,
};

impl DelphiGeneration {
    pub fn layout(self) -> VmtLayout {
        match self {
            DelphiGeneration::Legacy => LEGACY_LAYOUT,
            DelphiGeneration::Modern => MODERN_LAYOUT,
        }
    }
}

/// Classify the compiler generation from the vftables recovered so far.
///
/// The derived header length is the distance from a table's start to its
/// first user method, which counts the generation-dependent standard
/// slots; 88 bytes or more only fits the modern header. Inconclusive
/// evidence falls back to [`DelphiGeneration::Legacy`], the most
/// conservative layout.
pub fn infer(context: &RecoveryContext) -> DelphiGeneration {
    let vftables = context.vftables().count();
    if vftables == 0 {
        warn!("no vftables recovered, assuming legacy compiler generation");
        return DelphiGeneration::Legacy;
    }

    let Some(header_length) = context.header_length else {
        warn!("header length never derived, assuming legacy compiler generation");
        return DelphiGeneration::Legacy;
    };

    if header_length >= MODERN_LAYOUT.standard_header_length {
        DelphiGeneration::Modern
    } else if header_length == LEGACY_LAYOUT.standard_header_length {
        DelphiGeneration::Legacy
    } else {
        warn!(
            header_length,
            "unusual standard header length, assuming legacy compiler generation"
        );
        DelphiGeneration::Legacy
    }
}
