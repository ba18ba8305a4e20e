//! Data-quality warnings collected during segmentation.
//!
//! Diagnostics never abort a run. Each one is logged at `warn` level when it
//! is recorded and handed back to the caller with the results, so batch jobs
//! can monitor them without scraping logs.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::FixId;

/// A recoverable data-quality issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Exact duplicate positionfixes (same user, time and location) were removed.
    DuplicatesDropped { count: usize },
    /// Tripleg runs with fewer than two distinct coordinates were omitted;
    /// the listed positionfixes keep a null `tripleg_id`.
    InvalidTriplegs { fix_ids: Vec<FixId> },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::DuplicatesDropped { count } => write!(
                f,
                "{} duplicates were dropped from your positionfixes.",
                count
            ),
            Diagnostic::InvalidTriplegs { fix_ids } => {
                let ids: Vec<String> = fix_ids.iter().map(|id| id.to_string()).collect();
                write!(
                    f,
                    "The positionfixes with ids [{}] lead to invalid tripleg geometries.",
                    ids.join(", ")
                )
            }
        }
    }
}

/// Ordered collection of diagnostics for one generation call.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic and log it.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
        self.items.push(diagnostic);
    }

    /// Take over diagnostics that were already logged by a nested call.
    pub fn absorb(&mut self, diagnostics: Vec<Diagnostic>) {
        self.items.extend(diagnostics);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        for diagnostic in iter {
            self.push(diagnostic);
        }
    }
}
