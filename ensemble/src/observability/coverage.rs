//! Category coverage of the modes used in a run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{ModeCatalog, ModeCategory, ModeTier};

/// Coverage of one reasoning category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCoverage {
    pub category: ModeCategory,
    /// Catalog modes in this category.
    pub total_modes: usize,
    /// Modes used in the run, sorted.
    pub used_modes: Vec<String>,
    /// `used / total`, 0 for an empty category.
    pub coverage: f64,
}

/// A mode that would fill a blind spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSuggestion {
    pub category: ModeCategory,
    pub mode_id: String,
    pub code: String,
    pub tier: ModeTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// One entry per category, in catalog order.
    pub categories: Vec<CategoryCoverage>,
    /// Fraction of categories with at least one used mode.
    pub overall: f64,
    /// Categories with no used mode, in catalog order.
    pub blind_spots: Vec<ModeCategory>,
    pub suggestions: Vec<CoverageSuggestion>,
    /// Used ids the catalog does not know.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_modes: Vec<String>,
}

impl CoverageReport {
    pub fn category(&self, category: ModeCategory) -> Option<&CategoryCoverage> {
        self.categories.iter().find(|c| c.category == category)
    }
}

/// Accumulates the modes used so far in a run.
#[derive(Debug, Clone)]
pub struct CoverageMap<'a> {
    catalog: &'a ModeCatalog,
    used: BTreeSet<String>,
    unknown: BTreeSet<String>,
}

impl<'a> CoverageMap<'a> {
    pub fn new(catalog: &'a ModeCatalog) -> Self {
        Self {
            catalog,
            used: BTreeSet::new(),
            unknown: BTreeSet::new(),
        }
    }

    /// Record a mode by id or code.
    pub fn record(&mut self, mode: &str) {
        match self.catalog.resolve(mode) {
            Some(info) => {
                self.used.insert(info.id.clone());
            }
            None => {
                debug!(mode, "Coverage ignoring mode missing from catalog");
                self.unknown.insert(mode.trim().to_lowercase());
            }
        }
    }

    pub fn report(&self) -> CoverageReport {
        let mut categories = Vec::with_capacity(ModeCategory::ALL.len());
        let mut blind_spots = Vec::new();
        let mut suggestions = Vec::new();

        for &category in self.catalog.categories() {
            let in_category = self.catalog.in_category(category);
            let mut used_modes: Vec<String> = in_category
                .iter()
                .filter(|m| self.used.contains(&m.id))
                .map(|m| m.id.clone())
                .collect();
            used_modes.sort();

            let total_modes = in_category.len();
            let coverage = if total_modes == 0 {
                0.0
            } else {
                used_modes.len() as f64 / total_modes as f64
            };

            if used_modes.is_empty() {
                blind_spots.push(category);
                if let Some(best) = in_category.first() {
                    suggestions.push(CoverageSuggestion {
                        category,
                        mode_id: best.id.clone(),
                        code: best.code.clone(),
                        tier: best.tier,
                    });
                }
            }

            categories.push(CategoryCoverage {
                category,
                total_modes,
                used_modes,
                coverage,
            });
        }

        let covered = categories.len() - blind_spots.len();
        let overall = if categories.is_empty() {
            0.0
        } else {
            covered as f64 / categories.len() as f64
        };

        CoverageReport {
            categories,
            overall,
            blind_spots,
            suggestions,
            unknown_modes: self.unknown.iter().cloned().collect(),
        }
    }
}

/// Coverage report for a list of used mode ids or codes.
pub fn compute_coverage<S: AsRef<str>>(catalog: &ModeCatalog, modes: &[S]) -> CoverageReport {
    let mut map = CoverageMap::new(catalog);
    for mode in modes {
        map.record(mode.as_ref());
    }
    map.report()
}
