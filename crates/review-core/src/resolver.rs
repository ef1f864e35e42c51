//! Target resolution.
//!
//! Evaluates every requested name in one backend call and collapses names
//! that resolve to the same output path into a single target.

use crate::attr::Attr;
use crate::Result;
use nix_build_backend::{BuildBackend, EvaluatedAttr};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns requested names into deduplicated [`Attr`]s.
pub struct AttrResolver {
    backend: Arc<dyn BuildBackend>,
    denylist: BTreeSet<String>,
}

impl AttrResolver {
    pub fn new(backend: Arc<dyn BuildBackend>, denylist: BTreeSet<String>) -> Self {
        Self { backend, denylist }
    }

    /// Evaluate `names` against the checkout at `nixpkgs`.
    ///
    /// Evaluation failures are fatal; the backend keeps its input on disk.
    pub async fn resolve(&self, names: &BTreeSet<String>, nixpkgs: &Path) -> Result<Vec<Attr>> {
        let names: Vec<String> = names.iter().cloned().collect();
        info!(count = names.len(), "Evaluating attributes");
        let evaluated = self.backend.evaluate(&names, nixpkgs).await?;
        let attrs = dedup_by_output(evaluated, nixpkgs, &self.denylist);
        debug!(count = attrs.len(), "Resolved attributes after dedup");
        Ok(attrs)
    }
}

fn relative_position(position: Option<String>, nixpkgs: &Path) -> Option<String> {
    position.map(|p| match Path::new(&p).strip_prefix(nixpkgs) {
        Ok(rel) => rel.to_string_lossy().to_string(),
        Err(_) => p,
    })
}

/// Build targets from evaluation records, one per distinct output path.
///
/// Names sharing an output become aliases of the shortest name (first seen
/// wins ties). Records without an output path are never merged and follow
/// the deduplicated targets.
pub fn dedup_by_output(
    evaluated: Vec<EvaluatedAttr>,
    nixpkgs: &Path,
    denylist: &BTreeSet<String>,
) -> Vec<Attr> {
    let mut by_path: Vec<Attr> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unkeyed: Vec<Attr> = Vec::new();

    for record in evaluated {
        let mut attr = Attr::new(record.name);
        attr.exists = record.exists;
        attr.broken = record.broken;
        attr.blacklisted = denylist.contains(&attr.name);
        attr.output_path = record.path;
        attr.recipe_id = record.drv_path;
        attr.source_position = relative_position(record.position, nixpkgs);

        let Some(path) = attr.output_path.clone() else {
            unkeyed.push(attr);
            continue;
        };

        match index.get(&path) {
            None => {
                index.insert(path, by_path.len());
                by_path.push(attr);
            }
            Some(&i) => {
                let existing = &mut by_path[i];
                if existing.name.len() > attr.name.len() {
                    let replaced = std::mem::replace(existing, attr);
                    existing.aliases.push(replaced.name);
                    existing.aliases.extend(replaced.aliases);
                } else {
                    existing.aliases.push(attr.name);
                }
            }
        }
    }

    by_path.extend(unkeyed);
    by_path
}
