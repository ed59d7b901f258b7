use crate::core::grid::boundary::BoundaryConditions;
use crate::core::grid::storage::Storage3D;
use std::collections::BTreeMap;

/// Collective operations of the spatial decomposition.
///
/// Every worker owns one sub-volume plus a halo. Reductions are synchronous:
/// their result is identical on every worker once the call returns, and no
/// worker may act on a partial value. Halo refreshes must complete before any
/// pass that reads neighbour cells.
pub trait Domain: Sync {
    /// Fills the halo of `storage` from neighbouring workers, or from the
    /// local boundary conditions where there is no neighbour.
    fn refresh_halo<T: Clone + Send + Sync>(&self, storage: &mut Storage3D<T>);

    fn sum(&self, value: f64) -> f64;
    fn max(&self, value: f64) -> f64;
    fn min(&self, value: f64) -> f64;
    fn sum_count(&self, value: u64) -> u64;

    /// Element-wise reductions over equally sized slices on every worker.
    fn sum_in_place(&self, values: &mut [f64]);
    fn max_in_place(&self, values: &mut [f64]);
    fn min_in_place(&self, values: &mut [f64]);

    /// Element-wise sum of keyed accumulators. Afterwards every worker holds
    /// the union of all keys; a key missing on a worker counts as zero.
    fn sum_keyed<K: Ord + Copy + Send, const N: usize>(&self, values: &mut BTreeMap<K, [f64; N]>);

    /// Whether this worker prints run-wide console output.
    fn is_root(&self) -> bool {
        true
    }
}

/// A single worker owning the whole grid. Reductions are identities and
/// halos come from the boundary conditions alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialDomain {
    pub boundary: BoundaryConditions,
}

impl SerialDomain {
    pub fn new(boundary: BoundaryConditions) -> Self {
        Self { boundary }
    }
}

impl Domain for SerialDomain {
    fn refresh_halo<T: Clone + Send + Sync>(&self, storage: &mut Storage3D<T>) {
        self.boundary.apply(storage);
    }

    fn sum(&self, value: f64) -> f64 {
        value
    }

    fn max(&self, value: f64) -> f64 {
        value
    }

    fn min(&self, value: f64) -> f64 {
        value
    }

    fn sum_count(&self, value: u64) -> u64 {
        value
    }

    fn sum_in_place(&self, _values: &mut [f64]) {}

    fn max_in_place(&self, _values: &mut [f64]) {}

    fn min_in_place(&self, _values: &mut [f64]) {}

    fn sum_keyed<K: Ord + Copy + Send, const N: usize>(&self, _values: &mut BTreeMap<K, [f64; N]>) {}
}
