use nalgebra::DMatrix;

/// Per-phase-pair interface properties consumed by the evolution engine.
pub trait InterfaceModel: Sync {
    /// Interface energy between phases `a` and `b`.
    fn energy(&self, a: usize, b: usize) -> f64;

    /// Interface mobility between phases `a` and `b`.
    fn mobility(&self, a: usize, b: usize) -> f64;

    /// Largest interface energy over all orientations of the pair.
    fn max_energy(&self, a: usize, b: usize) -> f64;

    /// Scaling of the allowed driving force.
    fn regularization_factor(&self) -> f64;

    /// Explicit stability limit `0.5 dx² / max(σ μ)` of the phase-field
    /// equation, infinite when no pair is mobile.
    fn max_time_step(&self) -> f64;
}

/// Isotropic interface properties from symmetric phase-pair matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceProperties {
    pub(crate) energy: DMatrix<f64>,
    pub(crate) mobility: DMatrix<f64>,
    pub(crate) regularization: f64,
    pub(crate) dx: f64,
}

impl InterfaceProperties {
    pub fn n_phases(&self) -> usize {
        self.energy.nrows()
    }
}

impl InterfaceModel for InterfaceProperties {
    fn energy(&self, a: usize, b: usize) -> f64 {
        self.energy[(a, b)]
    }

    fn mobility(&self, a: usize, b: usize) -> f64 {
        self.mobility[(a, b)]
    }

    fn max_energy(&self, a: usize, b: usize) -> f64 {
        self.energy[(a, b)]
    }

    fn regularization_factor(&self) -> f64 {
        self.regularization
    }

    fn max_time_step(&self) -> f64 {
        let max_product = self
            .energy
            .iter()
            .zip(self.mobility.iter())
            .map(|(s, m)| s * m)
            .fold(0.0, f64::max);
        if max_product > 0.0 {
            0.5 * self.dx * self.dx / max_product
        } else {
            f64::INFINITY
        }
    }
}
