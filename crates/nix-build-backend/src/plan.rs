//! Dry-run plan parsing
//!
//! `nix-store --realize --dry-run` prints section headers followed by the
//! store paths that belong to them. The grammar is strict: anything that is
//! neither a known header nor a store path aborts the parse, so unexpected
//! output never hides build work.

use crate::error::NixError;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Store paths are absolute and live under this prefix.
pub const STORE_PREFIX: &str = "/nix/store";

/// What a dry run says would happen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunPlan {
    /// Derivations that would be built locally
    pub to_build: Vec<String>,
    /// Outputs that would be substituted from a cache
    pub to_fetch: Vec<String>,
    /// Paths nix reports it cannot build
    pub unbuildable: Vec<String>,
}

#[derive(Clone, Copy)]
enum Section {
    Fetch,
    Build,
    Unknown,
}

fn section_for(line: &str) -> Option<Section> {
    if line.contains("will be fetched") {
        Some(Section::Fetch)
    } else if line.contains("will be built") {
        Some(Section::Build)
    } else if line.contains("don't know how to build") {
        Some(Section::Unknown)
    } else {
        None
    }
}

/// Parse dry-run output into a [`DryRunPlan`].
pub fn parse_dry_run(output: &str) -> Result<DryRunPlan> {
    let mut plan = DryRunPlan::default();
    let mut current: Option<Section> = None;

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(section) = section_for(line) {
            current = Some(section);
            continue;
        }

        match current {
            Some(section) if line.starts_with(STORE_PREFIX) => {
                let bucket = match section {
                    Section::Fetch => &mut plan.to_fetch,
                    Section::Build => &mut plan.to_build,
                    Section::Unknown => &mut plan.unbuildable,
                };
                bucket.push(line.to_string());
            }
            _ => {
                return Err(NixError::PlanParse {
                    line: line.to_string(),
                })
            }
        }
    }

    Ok(plan)
}
