use crate::engine::domain::Domain;
use nalgebra::DMatrix;

/// Share of the allowed driving force above which a sample counts as an
/// overshoot.
pub(super) const OVERSHOOT_SHARE: f64 = 0.4;

/// Extremes of the limited driving force per phase pair, collected between
/// two reports.
#[derive(Debug, Clone, PartialEq)]
pub struct OvershootDiagnostics {
    /// Samples whose magnitude exceeded the overshoot share of their limit.
    pub overshoots: u64,
    /// Largest and smallest ratio of driving force to allowed driving force.
    pub max_ratio: DMatrix<f64>,
    pub min_ratio: DMatrix<f64>,
    /// Largest and smallest unlimited driving force.
    pub max_force: DMatrix<f64>,
    pub min_force: DMatrix<f64>,
}

impl OvershootDiagnostics {
    pub fn new(n_phases: usize) -> Self {
        let zeros = DMatrix::zeros(n_phases, n_phases);
        Self {
            overshoots: 0,
            max_ratio: zeros.clone(),
            min_ratio: zeros.clone(),
            max_force: zeros.clone(),
            min_force: zeros,
        }
    }

    pub(super) fn record(&mut self, pa: usize, pb: usize, force: f64, allowed: f64) {
        if force.abs() > OVERSHOOT_SHARE * allowed {
            self.overshoots += 1;
        }
        let ratio = force / allowed;
        let idx = (pa, pb);
        self.max_ratio[idx] = self.max_ratio[idx].max(ratio);
        self.min_ratio[idx] = self.min_ratio[idx].min(ratio);
        self.max_force[idx] = self.max_force[idx].max(force);
        self.min_force[idx] = self.min_force[idx].min(force);
    }

    pub(super) fn reduce(&mut self, domain: &impl Domain) {
        self.overshoots = domain.sum_count(self.overshoots);
        domain.max_in_place(self.max_ratio.as_mut_slice());
        domain.min_in_place(self.min_ratio.as_mut_slice());
        domain.max_in_place(self.max_force.as_mut_slice());
        domain.min_in_place(self.min_force.as_mut_slice());
    }

    /// Phase pairs `(a, b)` whose ratio left the overshoot band, with the
    /// extreme ratio.
    pub fn overshooting_pairs(&self) -> Vec<(usize, usize, f64)> {
        let n = self.max_ratio.nrows();
        let mut pairs = Vec::new();
        for a in 0..n {
            for b in 0..n {
                let ratio = if self.max_ratio[(a, b)] >= -self.min_ratio[(a, b)] {
                    self.max_ratio[(a, b)]
                } else {
                    self.min_ratio[(a, b)]
                };
                if ratio.abs() > OVERSHOOT_SHARE {
                    pairs.push((a, b, ratio));
                }
            }
        }
        pairs
    }
}
