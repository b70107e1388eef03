//! Append-only registry of announced configurations and their evaluation
//! results.
//!
//! Every candidate the kernel intends to evaluate is announced first and
//! receives a monotone id (0, 1, 2, ...). Ids are arena indices: they are
//! never reused and entries are never removed. Results are recorded per
//! fidelity; the fidelity itself is opaque to the repository.

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::Serialize;

/// Opaque auxiliary payload attached to an evaluation result.
pub type Info = serde_json::Map<String, serde_json::Value>;

/// One evaluation outcome of a configuration at a given fidelity.
#[derive(Debug, Clone, Serialize)]
pub struct FidelityResult {
    pub fidelity: f64,
    pub fitness: f64,
    pub cost: f64,
    pub info: Info,
}

/// An announced configuration and everything observed about it so far.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub vector: Array1<f64>,
    pub results: Vec<FidelityResult>,
}

/// Arena of announced configurations, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct ConfigRepository {
    entries: Vec<ConfigEntry>,
}

impl ConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of configurations announced so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a single configuration and returns its id.
    pub fn announce_config(&mut self, vector: ArrayView1<f64>, _fidelity: f64) -> usize {
        let id = self.entries.len();
        self.entries.push(ConfigEntry { vector: vector.to_owned(), results: Vec::new() });
        id
    }

    /// Registers a whole population; ids are returned in row order.
    pub fn announce_population(&mut self, population: ArrayView2<f64>, fidelity: f64) -> Vec<usize> {
        population
            .rows()
            .into_iter()
            .map(|row| self.announce_config(row, fidelity))
            .collect()
    }

    /// Appends a result record to an announced configuration.
    ///
    /// Telling a result for an id that was never announced is a caller bug.
    pub fn tell_result(&mut self, id: usize, fidelity: f64, fitness: f64, cost: f64, info: Info) {
        assert!(id < self.entries.len(), "result told for unknown config id {}", id);
        self.entries[id].results.push(FidelityResult { fidelity, fitness, cost, info });
    }

    /// Read access to an announced configuration.
    pub fn entry(&self, id: usize) -> &ConfigEntry {
        &self.entries[id]
    }
}
