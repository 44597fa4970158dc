//! Sample reducer: semantics-preserving canonicalisation and deduplication of
//! examples before they are encoded.

pub mod structure;
pub mod trace;

pub use structure::{are_equivalent, reduce_structure, StructureReducer};
pub use trace::{minimal_period, reduce_trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReductionStats {
    pub original_positive_count: usize,
    pub original_negative_count: usize,
    pub reduced_positive_count: usize,
    pub reduced_negative_count: usize,
    pub total_reduction: usize,
}

impl ReductionStats {
    pub fn new(original: (usize, usize), reduced: (usize, usize)) -> Self {
        ReductionStats {
            original_positive_count: original.0,
            original_negative_count: original.1,
            reduced_positive_count: reduced.0,
            reduced_negative_count: reduced.1,
            total_reduction: (original.0 + original.1) - (reduced.0 + reduced.1),
        }
    }

    pub fn reduction_percentage(&self) -> f64 {
        let original = self.original_positive_count + self.original_negative_count;
        if original == 0 {
            0.0
        } else {
            self.total_reduction as f64 / original as f64 * 100.0
        }
    }
}
