//! Double-obstacle interface model: curvature-driven pair increments and the
//! interface energy they minimize.

use crate::core::grid::storage::map_cells;
use crate::engine::domain::Domain;
use crate::engine::interface::InterfaceModel;
use crate::engine::phase_field::PhaseField;
use std::f64::consts::PI;

/// Adds `μ σ ((∇²φα - ∇²φβ) + (π/η)² (φα - φβ))` for every field pair of every
/// interface or band cell of the working level into the second increment
/// channel. Band cells carry the zero-valued entries the front moves into.
pub fn curvature_increments(phase_field: &mut PhaseField, ip: &impl InterfaceModel) {
    let (cells, rates) = {
        let registry = phase_field.registry();
        let level = phase_field.working();
        let k2 = (PI / level.grid.eta()).powi(2);
        let cells = level.fields.interior();
        let rates = map_cells(&cells, |c| {
            let cell = &level.fields[c];
            if !cell.is_wide_interface() {
                return Vec::new();
            }
            let entries = cell.entries();
            let mut rates = Vec::new();
            for (i, alpha) in entries.iter().enumerate() {
                for beta in &entries[i + 1..] {
                    let (Some(pa), Some(pb)) =
                        (registry.phase_of(alpha.id), registry.phase_of(beta.id))
                    else {
                        continue;
                    };
                    let curvature =
                        (alpha.laplacian - beta.laplacian) + k2 * (alpha.value - beta.value);
                    let rate = ip.mobility(pa, pb) * ip.energy(pa, pb) * curvature;
                    rates.push((alpha.id, beta.id, rate));
                }
            }
            rates
        });
        (cells, rates)
    };

    let increments = &mut phase_field.working_mut().increments;
    for (c, rates) in cells.into_iter().zip(rates) {
        for (a, b, rate) in rates {
            increments[c].add_asym2(a, b, rate);
        }
    }
}

/// Domain average of the interface energy density
/// `Σ 4σ/η ((η/π)² (-∇φα·∇φβ) + φα φβ)` on the working level.
pub fn energy_density(
    phase_field: &PhaseField,
    ip: &impl InterfaceModel,
    domain: &impl Domain,
) -> f64 {
    let registry = phase_field.registry();
    let level = phase_field.working();
    let eta = level.grid.eta();
    let width = (eta / PI).powi(2);

    let mut energy = 0.0;
    for c in level.fields.interior() {
        let cell = &level.fields[c];
        if !cell.is_interface() {
            continue;
        }
        let entries = cell.entries();
        for (i, alpha) in entries.iter().enumerate() {
            for beta in &entries[i + 1..] {
                let (Some(pa), Some(pb)) =
                    (registry.phase_of(alpha.id), registry.phase_of(beta.id))
                else {
                    continue;
                };
                energy += 4.0 * ip.energy(pa, pb) / eta
                    * (width * -alpha.gradient.dot(&beta.gradient) + alpha.value * beta.value);
            }
        }
    }
    domain.sum(energy) / level.grid.total_cells() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::descriptor::Resolution;
    use crate::core::grid::descriptor::tests::grid_2d;
    use crate::engine::interface::InterfaceProperties;
    use crate::engine::phase_field::tests::{config, disc, periodic};
    use nalgebra::DMatrix;

    const TOLERANCE: f64 = 1e-12;

    fn properties() -> InterfaceProperties {
        InterfaceProperties {
            energy: DMatrix::from_element(2, 2, 0.5),
            mobility: DMatrix::from_element(2, 2, 2.0),
            regularization: 1.0,
            dx: 1.0,
        }
    }

    #[test]
    fn increments_follow_the_obstacle_equation() {
        let (mut phase_field, matrix, grain) = disc(16, 4.0, Resolution::Single);
        phase_field.finalize_initialization(&periodic());
        curvature_increments(&mut phase_field, &properties());

        let k2 = (PI / phase_field.grid().eta()).powi(2);
        let level = phase_field.working();
        let (mut interface, mut band) = (0, 0);
        for c in level.fields.interior() {
            let cell = &level.fields[c];
            let increments = &level.increments[c];
            let (Some(g), Some(m)) = (cell.get(grain), cell.get(matrix)) else {
                assert!(increments.is_empty());
                continue;
            };
            if !cell.is_wide_interface() {
                assert!(increments.is_empty());
                continue;
            }
            let expected = 1.0 * ((g.laplacian - m.laplacian) + k2 * (g.value - m.value));
            assert!((increments.get_asym2(grain, matrix) - expected).abs() < TOLERANCE);
            assert!((increments.get_asym2(matrix, grain) + expected).abs() < TOLERANCE);
            assert_eq!(increments.get_asym1(grain, matrix), 0.0);
            if cell.is_interface() {
                interface += 1;
            } else {
                band += 1;
            }
        }
        assert!(interface > 0);
        assert!(band > 0);
    }

    #[test]
    fn energy_density_is_zero_without_interfaces() {
        let mut phase_field = PhaseField::new(grid_2d(8), config(2));
        let matrix = phase_field.add_field(0).unwrap();
        for c in phase_field.fields().interior() {
            phase_field.fields_mut()[c].set_value(matrix, 1.0);
        }
        phase_field.finalize_initialization(&periodic());
        assert_eq!(energy_density(&phase_field, &properties(), &periodic()), 0.0);
    }

    #[test]
    fn a_grain_boundary_carries_energy() {
        let (mut phase_field, _, _) = disc(16, 4.0, Resolution::Single);
        phase_field.finalize_initialization(&periodic());
        assert!(energy_density(&phase_field, &properties(), &periodic()) > 0.0);
    }
}
