//! Error types for the sibyl recovery engine.
//!
//! Two distinct levels, matching how failures propagate:
//! - [`AnalysisError`] is fatal: the run stops and the caller must treat
//!   the analysis as failed, not as a partial success.
//! - [`ValidationError`] is contained at work-item granularity: one bad
//!   candidate is discarded without aborting the run.

use thiserror::Error;

/// Fatal conditions that abort an analysis run.
///
/// These leave the [`RecoveryContext`](crate::context::RecoveryContext)
/// partially populated; no later stage executes once one is raised.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The container parser rejected the input bytes outright.
    #[error("container rejected the image: {0}")]
    Container(#[from] object::Error),

    /// The input parsed, but is not a PE image.
    #[error("input is not a PE image")]
    NotPe,

    /// The input is a PE image we do not handle (e.g. PE32+).
    #[error("unsupported image: {0}")]
    Unsupported(&'static str),

    /// The declared entry point lies in no code section.
    #[error("entry point {entry:#010x} is not contained in any code section")]
    EntryOutsideCode { entry: u32 },

    /// No unit initialisation table was found near the entry point.
    #[error("unit initialisation table not found within {window} bytes of entry point {entry:#010x}")]
    InitTableNotFound { entry: u32, window: u32 },

    /// TObject's vftable was not found, so the standard header length
    /// cannot be derived. The binary was probably not produced by Delphi,
    /// or has been packed.
    #[error("TObject vftable not found in any code section")]
    TObjectNotFound,

    /// TObject matched in more than one section. Refusing to guess which
    /// one is authoritative.
    #[error("TObject vftable found in both section {first:?} and section {second:?}")]
    TObjectAmbiguous { first: String, second: String },
}

/// Result type alias for fatal analysis outcomes.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Structural validation failure while constructing a single object.
///
/// Expected in Pass A (the heuristic scan produces false positives),
/// unexpected but non-fatal in Pass B. Never stored: a constructor that
/// fails produces no object at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A read would run past the mapped section.
    #[error("read of {len} bytes at offset {offset:#x} exceeds section size {size:#x}")]
    OutOfBounds { offset: u32, len: u32, size: u32 },

    /// A virtual address falls outside the section that should hold it.
    #[error("address {va:#010x} lies outside the section")]
    OutsideSection { va: u32 },

    /// The defining self-pointer did not match its own location plus the
    /// derived header length.
    #[error("self pointer {found:#010x} does not match expected {expected:#010x}")]
    SelfPointerMismatch { found: u32, expected: u32 },

    /// A header slot held a value that is neither zero nor a usable
    /// address.
    #[error("slot {slot} holds {value:#010x}, expected zero or an in-section address")]
    BadSlot { slot: &'static str, value: u32 },

    /// A one-byte discriminant was outside its closed value set.
    #[error("invalid {what} value {value:#04x}")]
    BadEnum { what: &'static str, value: u8 },

    /// A length-prefixed string failed to decode as text.
    #[error("string at offset {offset:#x} is not valid text")]
    BadString { offset: u32 },

    /// A count field was too large to be a plausible table.
    #[error("implausible {what} count {count}")]
    ImplausibleCount { what: &'static str, count: u32 },

    /// A min/max pair was inverted.
    #[error("inverted {what} range")]
    InvertedRange { what: &'static str },

    /// A self-sizing entry declared fewer bytes than its fixed fields
    /// occupy.
    #[error("declared entry size {declared} is smaller than the {consumed} bytes consumed")]
    TruncatedEntry { declared: u32, consumed: u32 },

    /// A derived fact (header length, compiler generation) was required
    /// before the stage that produces it had run.
    #[error("derived fact {0} is not available")]
    MissingFact(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_error_display() {
        let err = AnalysisError::EntryOutsideCode { entry: 0x401000 };
        assert_eq!(
            err.to_string(),
            "entry point 0x00401000 is not contained in any code section"
        );

        let err = AnalysisError::TObjectAmbiguous {
            first: "CODE".to_string(),
            second: ".text".to_string(),
        };
        assert!(err.to_string().contains("CODE"));
        assert!(err.to_string().contains(".text"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::SelfPointerMismatch {
            found: 0x401050,
            expected: 0x401048,
        };
        assert_eq!(
            err.to_string(),
            "self pointer 0x00401050 does not match expected 0x00401048"
        );

        let err = ValidationError::OutOfBounds {
            offset: 0xff0,
            len: 4,
            size: 0xff2,
        };
        assert!(err.to_string().contains("0xff0"));
    }
}
