//! sibyl — recover RTTI from compiled Delphi executables.
//!
//! Delphi binaries are self-describing: every class ships a virtual
//! method table whose first slot points at itself offset by a
//! compiler-dependent header length, and whose header references the
//! class name, parent class and RTTI tables. sibyl exploits that to
//! rebuild class information from stripped binaries, without debug
//! symbols:
//!
//! 1. locate `TObject`'s vftable and measure the standard header length;
//! 2. scan the object section for every self-referencing table header;
//! 3. drain a work queue of typed candidates, validating each into a
//!    recovered object and chasing the references it declares;
//! 4. classify the compiler generation from the recovered structure,
//!    which decides the record layouts used by later parsing.
//!
//! The input is untrusted: every read is bounds-checked and a malformed
//! candidate is discarded at item granularity, never propagated.

pub mod analyse;
pub mod context;
pub mod error;
pub mod logging;
pub mod objects;
pub mod pe;
pub mod queue;
pub mod resources;
pub mod scan;
pub mod section;
pub mod units;
pub mod version;

pub use analyse::Analyser;
pub use context::RecoveryContext;
pub use error::{AnalysisError, ValidationError};
pub use objects::RecoveredObject;
pub use pe::PeImage;
pub use queue::{ObjectKind, WorkItem, WorkQueue};
pub use section::{SectionMap, SectionReader};
pub use version::DelphiGeneration;
