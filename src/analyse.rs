//! The staged analysis driver.
//!
//! One `Analyser` owns one run: the context, the work queue, and the
//! entry point. Stages run strictly in order — entry-section check, unit
//! initialisation table, TObject location, vftable scan, vftable-only
//! parse, generation inference, general parse — and a fatal condition
//! stops the pipeline immediately, leaving the context partially
//! populated for the caller to inspect.

use tracing::{debug, info, trace, warn};

use crate::context::RecoveryContext;
use crate::error::AnalysisError;
use crate::objects;
use crate::pe::PeImage;
use crate::queue::{ObjectKind, WorkQueue};
use crate::resources::{License, PackageInfo};
use crate::scan;
use crate::section::SectionMap;
use crate::units;
use crate::version;

/// Drives one analysis of one binary.
pub struct Analyser {
    /// All state recovered so far; remains readable after a fatal abort.
    pub context: RecoveryContext,
    queue: WorkQueue,
    entry_point: u32,
}

impl Analyser {
    /// Build an analyser from a parsed PE image, extracting the section
    /// partition and the Delphi metadata resources up front.
    pub fn from_image(image: &PeImage<'_>) -> Self {
        let mut analyser = Self::from_parts(
            image.code_sections(),
            image.data_sections(),
            image.entry_point(),
        );

        match image.rcdata_resource("DVCLAL") {
            Some(data) => match License::from_bytes(&data) {
                Some(license) => {
                    info!(?license, "DVCLAL license information found");
                    analyser.context.license = Some(license);
                }
                None => {
                    warn!(digest = %hex::encode(&data), "unknown DVCLAL license digest");
                }
            },
            None => warn!("no DVCLAL license resource"),
        }

        match image
            .rcdata_resource("PACKAGEINFO")
            .and_then(|data| PackageInfo::parse(&data))
        {
            Some(units) => {
                info!(contains = units.contains.len(), "PACKAGEINFO unit list found");
                analyser.context.units = Some(units);
            }
            None => warn!("no usable PACKAGEINFO resource"),
        }

        analyser
    }

    /// Build an analyser directly from a section partition and entry
    /// point. This is the container-free seam the tests use.
    pub fn from_parts(
        code_sections: Vec<SectionMap>,
        data_sections: Vec<SectionMap>,
        entry_point: u32,
    ) -> Self {
        let context = RecoveryContext {
            code_sections,
            data_sections,
            ..RecoveryContext::default()
        };
        Self {
            context,
            queue: WorkQueue::new(),
            entry_point,
        }
    }

    /// Run the full recovery pipeline.
    pub fn analyse(&mut self) -> Result<(), AnalysisError> {
        self.locate_entry_section()?;
        let (object_section, header_length) = self.locate_tobject()?;
        self.scan_vftables(object_section, header_length);
        self.parse_vftables(object_section);
        self.infer_generation();
        self.parse_remaining(object_section);
        info!(items = self.context.items.len(), "analysis complete");
        Ok(())
    }

    /// Find the code section holding the entry point and the unit
    /// initialisation table it anchors. Both must exist: their absence
    /// means this is not a live Delphi runtime image.
    fn locate_entry_section(&mut self) -> Result<(), AnalysisError> {
        let entry = self.entry_point;
        let index = self
            .context
            .code_sections
            .iter()
            .position(|s| s.contains_va(entry))
            .ok_or(AnalysisError::EntryOutsideCode { entry })?;
        info!(
            section = self.context.code_sections[index].name(),
            entry = format_args!("{:#010x}", entry),
            "entry point located"
        );

        let table =
            units::find_init_table(&self.context.code_sections[index], entry, &self.context)
                .ok_or(AnalysisError::InitTableNotFound {
                    entry,
                    window: units::ENTRY_STUB_WINDOW,
                })?;
        debug!(
            va = format_args!("{:#010x}", table.va),
            units = table.unit_count,
            "unit initialisation table parsed"
        );
        self.context.init_table = Some(table);
        Ok(())
    }

    /// Scan every code section for TObject and derive the standard
    /// header length. Exactly one section may match; more is an
    /// unexpected configuration we refuse to guess our way through.
    fn locate_tobject(&mut self) -> Result<(usize, u32), AnalysisError> {
        let mut located: Option<(usize, scan::TObjectMatch)> = None;
        for (index, section) in self.context.code_sections.iter().enumerate() {
            let Some(found) = scan::find_tobject(section) else {
                continue;
            };
            info!(
                section = section.name(),
                header_length = found.header_length,
                "TObject located"
            );
            if let Some((first, _)) = located {
                return Err(AnalysisError::TObjectAmbiguous {
                    first: self.context.code_sections[first].name().to_string(),
                    second: section.name().to_string(),
                });
            }
            located = Some((index, found));
        }

        let (index, found) = located.ok_or(AnalysisError::TObjectNotFound)?;
        self.context.header_length = Some(found.header_length);
        self.context.object_section = Some(index);
        Ok((index, found.header_length))
    }

    /// Populate the queue with every self-referencing header in the
    /// object section.
    fn scan_vftables(&mut self, object_section: usize, header_length: u32) {
        let found = scan::find_vftables(
            &self.context.code_sections[object_section],
            header_length,
            &mut self.queue,
        );
        info!(candidates = found, "vftable scan complete");
    }

    /// Pass A: vftables only. Validation failures are expected here —
    /// the scan trades precision for recall — so rejects are dropped
    /// without comment.
    fn parse_vftables(&mut self, object_section: usize) {
        let mut accepted = 0usize;
        while let Some(item) = self.queue.get_item_of(ObjectKind::Vftable) {
            match objects::construct(
                item,
                &self.context.code_sections[object_section],
                &self.context,
                &mut self.queue,
            ) {
                Ok(object) => {
                    trace!(va = format_args!("{:#010x}", item.location), "vftable parsed");
                    self.context.items.push(object);
                    accepted += 1;
                }
                Err(error) => {
                    trace!(
                        va = format_args!("{:#010x}", item.location),
                        %error,
                        "vftable candidate rejected"
                    );
                }
            }
        }
        info!(accepted, "vftable pass complete");
    }

    /// Classify the compiler generation. Runs exactly once, after all
    /// vftables are known and before any version-dependent record parses.
    fn infer_generation(&mut self) {
        debug_assert!(self.context.version.is_none());
        let generation = version::infer(&self.context);
        info!(?generation, "compiler generation classified");
        self.context.version = Some(generation);
    }

    /// Pass B: everything else, including work discovered mid-pass. A
    /// validation failure here points at a parser or heuristic defect,
    /// so it is logged, but one bad record never aborts the run.
    fn parse_remaining(&mut self, object_section: usize) {
        while let Some(item) = self.queue.get_item() {
            match objects::construct(
                item,
                &self.context.code_sections[object_section],
                &self.context,
                &mut self.queue,
            ) {
                Ok(object) => {
                    trace!(
                        kind = ?object.kind(),
                        va = format_args!("{:#010x}", object.location()),
                        "object recovered"
                    );
                    self.context.items.push(object);
                }
                Err(error) => {
                    debug!(
                        kind = ?item.kind,
                        va = format_args!("{:#010x}", item.location),
                        %error,
                        "discarding unparseable work item"
                    );
                }
            }
        }
    }
}
