use super::DrivingForce;
use crate::core::grid::descriptor::{Coord, shift};
use crate::core::grid::storage::{Storage3D, map_cells};
use crate::core::models::force::{CellForces, ForceSample};
use crate::engine::config::WeightsMode;
use crate::engine::domain::Domain;
use crate::engine::phase_field::PhaseField;

/// Neighbour offsets inside the averaging sphere with their distance weight
/// `range - |r|`.
pub(super) fn averaging_offsets(range: i64, extent: Coord, dn: Coord) -> Vec<(Coord, f64)> {
    let reach: Coord = std::array::from_fn(|a| range.min(extent[a] - 1).max(0) * dn[a]);
    let mut offsets = Vec::new();
    for i in -reach[0]..=reach[0] {
        for j in -reach[1]..=reach[1] {
            for k in -reach[2]..=reach[2] {
                let distance = ((i * i + j * j + k * k) as f64).sqrt();
                let weight = range as f64 - distance;
                if weight > 0.0 {
                    offsets.push(([i, j, k], weight));
                }
            }
        }
    }
    offsets
}

/// Running weighted mean of neighbour samples under one weighting mode.
struct WeightedMean {
    mode: WeightsMode,
    value: f64,
    weights: f64,
}

impl WeightedMean {
    fn new(mode: WeightsMode) -> Self {
        Self {
            mode,
            value: 0.0,
            weights: 0.0,
        }
    }

    fn add(&mut self, distance_weight: f64, phase_weight: f64, value: f64) {
        let w = match self.mode {
            WeightsMode::Range => distance_weight,
            WeightsMode::PhaseFields => phase_weight,
            WeightsMode::Counter => 1.0,
        };
        self.value += w * value;
        self.weights += w;
    }

    fn mean_or(&self, fallback: f64) -> f64 {
        if self.weights > 0.0 {
            self.value / self.weights
        } else {
            fallback
        }
    }
}

impl DrivingForce {
    fn threshold(&self) -> f64 {
        let t = self.config.phi_threshold;
        (t * (1.0 - t)).sqrt()
    }

    /// Sets the weight of every sample in interface cells to `sqrt(φa φb)`.
    pub(super) fn set_weights(&mut self, phase_field: &PhaseField) {
        let cells = self.forces.interior();
        let fields = phase_field.fields();
        let forces = &self.forces;
        let weights = map_cells(&cells, |c| {
            let cell = &fields[c];
            if !cell.is_interface() {
                return Vec::new();
            }
            forces[c]
                .iter()
                .map(|s| (cell.value(s.a) * cell.value(s.b)).sqrt())
                .collect::<Vec<_>>()
        });
        for (c, weights) in cells.into_iter().zip(weights) {
            for (s, w) in self.forces[c].iter_mut().zip(weights) {
                s.weight = w;
            }
        }
    }

    /// First pass: samples well inside the interface gather the raw forces
    /// of their neighbourhood into `tmp`, the others keep their raw force.
    pub(super) fn collect(&mut self, phase_field: &PhaseField) {
        let threshold = self.threshold();
        let mode = self.config.weights_mode;
        let cells = self.forces.interior();
        let fields = phase_field.fields();
        let registry = phase_field.registry();
        let forces = &self.forces;
        let offsets = &self.offsets;

        let collected = map_cells(&cells, |c| {
            if !fields[c].is_interface() {
                return Vec::new();
            }
            forces[c]
                .iter()
                .map(|s| {
                    let scale = registry.volume_ratio(s.a) * registry.volume_ratio(s.b);
                    if s.weight <= threshold * scale {
                        return s.raw;
                    }
                    let mut mean = WeightedMean::new(mode);
                    for &(d, distance_weight) in offsets {
                        if let Some(n) = neighbour(forces, c, d, s) {
                            if n.weight > 0.0 {
                                mean.add(distance_weight, n.weight, n.raw);
                            }
                        }
                    }
                    mean.mean_or(s.raw)
                })
                .collect::<Vec<_>>()
        });
        for (c, values) in cells.into_iter().zip(collected) {
            for (s, tmp) in self.forces[c].iter_mut().zip(values) {
                s.tmp = tmp;
            }
        }
    }

    /// Second pass: every weighted sample takes the mean of the collected
    /// values of its well-inside neighbours. Seed pairs without weight fall
    /// back to their raw force.
    pub(super) fn distribute(&mut self, phase_field: &PhaseField) {
        let threshold = self.threshold();
        let mode = self.config.weights_mode;
        let cells = self.forces.interior();
        let fields = phase_field.fields();
        let registry = phase_field.registry();
        let forces = &self.forces;
        let offsets = &self.offsets;

        let distributed = map_cells(&cells, |c| {
            if !fields[c].is_interface() {
                return Vec::new();
            }
            forces[c]
                .iter()
                .map(|s| {
                    if s.weight > 0.0 {
                        let scale = registry.volume_ratio(s.a) * registry.volume_ratio(s.b);
                        let mut mean = WeightedMean::new(mode);
                        for &(d, distance_weight) in offsets {
                            if let Some(n) = neighbour(forces, c, d, s) {
                                if n.weight > threshold * scale {
                                    mean.add(distance_weight, n.weight, n.tmp);
                                }
                            }
                        }
                        mean.mean_or(s.tmp)
                    } else if registry.is_seed(s.a) || registry.is_seed(s.b) {
                        s.raw
                    } else {
                        s.average
                    }
                })
                .collect::<Vec<_>>()
        });
        for (c, values) in cells.into_iter().zip(distributed) {
            for (s, average) in self.forces[c].iter_mut().zip(values) {
                s.average = average;
            }
        }
    }

    /// Uses the raw force as the average in every interface cell.
    pub(super) fn skip_average(&mut self, phase_field: &PhaseField) {
        let fields = phase_field.fields();
        for c in self.forces.interior() {
            let cell = &fields[c];
            if !cell.is_interface() {
                continue;
            }
            for s in self.forces[c].iter_mut() {
                s.weight = (cell.value(s.a) * cell.value(s.b)).sqrt();
                s.average = s.raw;
            }
        }
    }

    /// Smooths the raw forces over the averaging sphere, or copies them
    /// through when averaging is off.
    pub fn average(&mut self, phase_field: &PhaseField, domain: &impl Domain) {
        if !self.config.averaging {
            self.skip_average(phase_field);
            return;
        }
        self.set_weights(phase_field);
        domain.refresh_halo(&mut self.forces);
        self.collect(phase_field);
        domain.refresh_halo(&mut self.forces);
        self.distribute(phase_field);
    }
}

fn neighbour<'a>(
    forces: &'a Storage3D<CellForces>,
    c: Coord,
    d: Coord,
    s: &ForceSample,
) -> Option<&'a ForceSample> {
    let n = shift(c, d);
    if !forces.contains(n) {
        return None;
    }
    forces[n].sample(s.a, s.b)
}
