use super::{PhaseField, dual};
use crate::core::grid::storage::map_cells;
use crate::core::models::cell::CellFields;
use crate::core::models::ids::FieldId;
use crate::core::models::pairs::PairIncrements;
use crate::engine::domain::Domain;
use crate::engine::phase_field::level::Level;
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Tolerance on a predicted value before a field counts as out of bounds
/// inside the limiting loop.
const BOUND_SLACK: f64 = 4.0 * f64::EPSILON;

/// Tolerance of the final plausibility check on normalized increments.
const PLAUSIBILITY: f64 = f32::EPSILON as f64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CellOutcome {
    limited: bool,
    capped: bool,
    violation: bool,
}

/// Domain-wide tally of one [`PhaseField::normalize_increments`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationReport {
    /// Cells in which at least one pair was scaled down or dropped.
    pub cells_limited: u64,
    /// Cells that hit the iteration cap of the limiting loop.
    pub capped: u64,
    /// Cells whose increments would still leave a field outside `[0, 1]`.
    pub bound_violations: u64,
}

/// Scale in `[0, 1]` that keeps `old + scale * change` inside `[0, 1]`.
fn bound_scale(old: f64, change: f64) -> f64 {
    let new = old + change;
    if new < 0.0 {
        -old / change
    } else if new > 1.0 {
        (1.0 - old) / change
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    id: FieldId,
    value: f64,
    pos: f64,
    neg: f64,
    lim_pos: f64,
    lim_neg: f64,
}

fn budget_of(budgets: &[Budget], id: FieldId) -> Option<&Budget> {
    budgets.iter().find(|b| b.id == id)
}

fn normalize_single(
    cell: &CellFields,
    increments: &PairIncrements,
    dt: f64,
) -> (PairIncrements, CellOutcome) {
    let Some(p) = increments.iter().next().copied() else {
        return (PairIncrements::default(), CellOutcome::default());
    };
    let change = p.total() * dt;
    let (va, vb) = (cell.value(p.a), cell.value(p.b));
    let pinned = |old: f64, change: f64| (old == 0.0 && change < 0.0) || (old == 1.0 && change > 0.0);

    let limited = CellOutcome {
        limited: true,
        ..Default::default()
    };
    if pinned(va, change) || pinned(vb, -change) {
        return (PairIncrements::default(), limited);
    }

    let norm = bound_scale(va, change).min(bound_scale(vb, -change));
    if norm <= f64::EPSILON {
        return (PairIncrements::default(), limited);
    }
    let mut out = increments.clone();
    if norm < 1.0 {
        out.scale(norm);
        (out, limited)
    } else {
        (out, CellOutcome::default())
    }
}

/// Limits the increments of one cell so that applying them over `dt` keeps
/// every field value inside `[0, 1]`.
fn normalize_cell(
    cell: &CellFields,
    increments: &PairIncrements,
    dt: f64,
    max_iterations: usize,
) -> (PairIncrements, CellOutcome) {
    if increments.len() == 1 {
        return normalize_single(cell, increments, dt);
    }

    let mut outcome = CellOutcome::default();
    let mut out = increments.clone();

    // Fields already at a bound cannot move further past it.
    for e in cell.iter() {
        let net: f64 = out
            .iter()
            .filter(|p| p.touches(e.id))
            .map(|p| if p.a == e.id { p.total() } else { -p.total() })
            .sum();
        if (e.value == 0.0 && net < 0.0) || (e.value == 1.0 && net > 0.0) {
            for p in out.iter_mut().filter(|p| p.touches(e.id)) {
                p.v1 = 0.0;
                p.v2 = 0.0;
            }
            outcome.limited = true;
        }
    }
    out.retain(|p| p.v1 != 0.0 || p.v2 != 0.0);
    if out.is_empty() {
        return (out, outcome);
    }

    for p in out.iter_mut() {
        p.v1 += p.v2;
        p.v2 = 0.0;
    }

    let mut budgets: Vec<Budget> = Vec::new();
    for p in out.iter() {
        for id in [p.a, p.b] {
            if budget_of(&budgets, id).is_none() {
                budgets.push(Budget {
                    id,
                    value: cell.value(id),
                    pos: 0.0,
                    neg: 0.0,
                    lim_pos: 1.0,
                    lim_neg: 1.0,
                });
            }
        }
    }

    let mut iterations = 0;
    loop {
        iterations += 1;

        for b in &mut budgets {
            b.pos = 0.0;
            b.neg = 0.0;
        }
        for p in out.iter() {
            let (gain, loss) = if p.v1 > 0.0 { (p.a, p.b) } else { (p.b, p.a) };
            for b in &mut budgets {
                if b.id == gain {
                    b.pos += p.v1.abs();
                } else if b.id == loss {
                    b.neg -= p.v1.abs();
                }
            }
        }
        for b in &mut budgets {
            let new = b.value + (b.pos + b.neg) * dt;
            b.lim_neg = if new < -BOUND_SLACK {
                (-(b.value + b.pos * dt) / (b.neg * dt)).min(1.0)
            } else {
                1.0
            };
            b.lim_pos = if new > 1.0 + BOUND_SLACK {
                ((1.0 - (b.value + b.neg * dt)) / (b.pos * dt)).min(1.0)
            } else {
                1.0
            };
        }

        let mut limiting_needed = false;
        for p in out.iter_mut() {
            let (Some(a), Some(b)) = (budget_of(&budgets, p.a), budget_of(&budgets, p.b)) else {
                continue;
            };
            let limit = if p.v1 < 0.0 {
                a.lim_neg.min(b.lim_pos)
            } else if p.v1 > 0.0 {
                a.lim_pos.min(b.lim_neg)
            } else {
                1.0
            };
            if limit < 1.0 {
                p.v1 *= limit;
                limiting_needed = true;
            }
        }

        if !limiting_needed {
            break;
        }
        outcome.limited = true;
        if iterations >= max_iterations {
            outcome.capped = true;
            break;
        }
    }

    out.retain(|p| (p.v1 * dt).abs() >= f64::EPSILON);

    outcome.violation = budgets.iter().any(|b| {
        let predicted = b.value
            + out
                .iter()
                .filter(|p| p.touches(b.id))
                .map(|p| if p.a == b.id { p.v1 * dt } else { -p.v1 * dt })
                .sum::<f64>();
        !(-PLAUSIBILITY..=1.0 + PLAUSIBILITY).contains(&predicted)
    });
    (out, outcome)
}

impl PhaseField {
    /// Limits the pending increments of the working level so that merging
    /// them over `dt` keeps every value inside `[0, 1]`. In dual resolution
    /// the normalized fine increments are coarsened onto the coarse level.
    pub fn normalize_increments(&mut self, dt: f64, domain: &impl Domain) -> NormalizationReport {
        let max_iterations = self.config.max_normalization_iterations;
        let level = self.working_mut();

        let cells = level.fields.interior();
        let fields = &level.fields;
        let increments = &level.increments;
        let results = map_cells(&cells, |c| {
            let cell = &fields[c];
            if !cell.is_wide_interface() || increments[c].is_empty() {
                return None;
            }
            Some(normalize_cell(cell, &increments[c], dt, max_iterations))
        });

        let mut local = NormalizationReport::default();
        for (c, result) in cells.into_iter().zip(results) {
            if let Some((normalized, outcome)) = result {
                level.increments[c] = normalized;
                local.cells_limited += u64::from(outcome.limited);
                local.capped += u64::from(outcome.capped);
                local.bound_violations += u64::from(outcome.violation);
            }
        }
        level.refresh_increments(domain);

        if let Some(fine) = self.fine.as_ref() {
            dual::coarsen_increments(&mut self.coarse, fine);
            self.coarse.refresh_increments(domain);
        }

        let report = NormalizationReport {
            cells_limited: domain.sum_count(local.cells_limited),
            capped: domain.sum_count(local.capped),
            bound_violations: domain.sum_count(local.bound_violations),
        };
        if report.capped > 0 || report.bound_violations > 0 {
            warn!(
                capped = report.capped,
                violations = report.bound_violations,
                "Increment normalization did not fully converge"
            );
        } else if report.cells_limited > 0 {
            debug!(cells = report.cells_limited, "Limited phase-field increments");
        }
        report
    }

    /// Removes the net driving-force transfer between every phase pair that
    /// `allowed` marks as non-transforming, redistributing the domain-wide
    /// change over the pair's interface cells with weight `sqrt(φα φβ)`.
    pub fn keep_phase_volume(&mut self, allowed: &DMatrix<bool>, domain: &impl Domain) {
        let registry = &self.registry;
        let locked = |a: FieldId, b: FieldId| match (registry.phase_of(a), registry.phase_of(b)) {
            (Some(pa), Some(pb)) => pa != pb && !allowed[(pa, pb)],
            _ => false,
        };

        let Level {
            fields, increments, ..
        } = match self.fine.as_mut() {
            Some(fine) => fine,
            None => &mut self.coarse,
        };

        // [change, weight] per locked pair; entries are ordered by id, so
        // each pair has a single key.
        let mut sums: BTreeMap<(FieldId, FieldId), [f64; 2]> = BTreeMap::new();
        for c in fields.interior() {
            let cell = &fields[c];
            if !cell.is_wide_interface() {
                continue;
            }
            let entries = cell.entries();
            for (i, alpha) in entries.iter().enumerate() {
                for beta in &entries[i + 1..] {
                    if !locked(alpha.id, beta.id) {
                        continue;
                    }
                    let sum = sums.entry((alpha.id, beta.id)).or_default();
                    sum[0] += increments[c].get_asym1(alpha.id, beta.id);
                    sum[1] += (alpha.value * beta.value).sqrt();
                }
            }
        }
        domain.sum_keyed(&mut sums);
        if sums.is_empty() {
            return;
        }

        for c in fields.interior() {
            let cell = &fields[c];
            if !cell.is_interface() {
                continue;
            }
            let entries = cell.entries();
            for (i, alpha) in entries.iter().enumerate() {
                for beta in &entries[i + 1..] {
                    let product = alpha.value * beta.value;
                    if product == 0.0 {
                        continue;
                    }
                    let Some(&[change, weight]) = sums.get(&(alpha.id, beta.id)) else {
                        continue;
                    };
                    if weight != 0.0 {
                        increments[c].add_asym1(alpha.id, beta.id, -change * product.sqrt() / weight);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::descriptor::Resolution;
    use crate::engine::phase_field::tests::{disc, periodic};
    use slotmap::SlotMap;

    const TOLERANCE: f64 = 1e-12;

    fn ids(n: usize) -> Vec<FieldId> {
        let mut map: SlotMap<FieldId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn cell(values: &[(FieldId, f64)]) -> CellFields {
        let mut cell = CellFields::default();
        for &(id, v) in values {
            cell.set_value(id, v);
        }
        cell
    }

    #[test]
    fn single_pair_inside_bounds_is_untouched() {
        let id = ids(2);
        let cell = cell(&[(id[0], 0.5), (id[1], 0.5)]);
        let mut incr = PairIncrements::default();
        incr.add_asym1(id[0], id[1], 0.2);
        let (out, outcome) = normalize_cell(&cell, &incr, 1.0, 24);
        assert_eq!(out, incr);
        assert!(!outcome.limited);
    }

    #[test]
    fn single_pair_is_scaled_to_reach_the_bound_exactly() {
        let id = ids(2);
        let cell = cell(&[(id[0], 0.9), (id[1], 0.1)]);
        let mut incr = PairIncrements::default();
        incr.add_asym1(id[0], id[1], 0.3);
        incr.add_asym2(id[0], id[1], 0.2);
        let (out, outcome) = normalize_cell(&cell, &incr, 1.0, 24);
        assert!((out.get_total(id[0], id[1]) - 0.1).abs() < TOLERANCE);
        assert!(outcome.limited);
    }

    #[test]
    fn single_pair_pushing_a_pinned_field_is_cleared() {
        let id = ids(2);
        let cell = cell(&[(id[0], 1.0), (id[1], 0.0)]);
        let mut incr = PairIncrements::default();
        incr.add_asym1(id[0], id[1], 0.1);
        let (out, _) = normalize_cell(&cell, &incr, 1.0, 24);
        assert!(out.is_empty());
    }

    #[test]
    fn three_field_overshoot_is_limited_uniformly() {
        let id = ids(3);
        let cell = cell(&[(id[0], 0.5), (id[1], 0.3), (id[2], 0.2)]);
        let mut incr = PairIncrements::default();
        incr.add_asym1(id[1], id[0], 0.48);
        incr.add_asym1(id[2], id[0], 0.32);
        let (out, outcome) = normalize_cell(&cell, &incr, 1.0, 24);

        assert!((out.get_asym1(id[1], id[0]) - 0.3).abs() < TOLERANCE);
        assert!((out.get_asym1(id[2], id[0]) - 0.2).abs() < TOLERANCE);
        assert!(outcome.limited && !outcome.capped && !outcome.violation);
    }

    fn predicted(cell: &CellFields, increments: &PairIncrements, id: FieldId, dt: f64) -> f64 {
        cell.value(id)
            + increments
                .iter()
                .filter(|p| p.touches(id))
                .map(|p| if p.a == id { p.total() * dt } else { -p.total() * dt })
                .sum::<f64>()
    }

    #[test]
    fn field_driven_past_one_is_limited_with_a_shared_factor() {
        let id = ids(3);
        let cell = cell(&[(id[0], 0.5), (id[1], 0.3), (id[2], 0.2)]);
        let mut incr = PairIncrements::default();
        incr.add_asym1(id[0], id[1], 0.48);
        incr.add_asym1(id[0], id[2], 0.32);
        assert!((predicted(&cell, &incr, id[0], 1.0) - 1.3).abs() < TOLERANCE);

        let (out, outcome) = normalize_cell(&cell, &incr, 1.0, 24);
        assert!(outcome.limited && !outcome.capped && !outcome.violation);

        let first = out.get_asym1(id[0], id[1]) / 0.48;
        let second = out.get_asym1(id[0], id[2]) / 0.32;
        assert!(first < 1.0);
        assert!((first - second).abs() < TOLERANCE);

        let values: Vec<f64> = id.iter().map(|&i| predicted(&cell, &out, i, 1.0)).collect();
        assert!(values[0] <= 1.0 + TOLERANCE);
        assert!(values.iter().all(|v| (-TOLERANCE..=1.0 + TOLERANCE).contains(v)));
        assert!((values.iter().sum::<f64>() - 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let id = ids(3);
        let cell = cell(&[(id[0], 0.5), (id[1], 0.3), (id[2], 0.2)]);
        let mut incr = PairIncrements::default();
        incr.add_asym1(id[1], id[0], 0.48);
        incr.add_asym1(id[2], id[0], 0.32);
        incr.add_asym2(id[1], id[2], 0.05);

        let (once, first) = normalize_cell(&cell, &incr, 1.0, 24);
        assert!(first.limited);
        let (twice, second) = normalize_cell(&cell, &once, 1.0, 24);
        assert_eq!(twice, once);
        assert_eq!(second, CellOutcome::default());

        let single = cell_with_pair(0.75, 0.5);
        let (once, _) = normalize_cell(&single.0, &single.1, 1.0, 24);
        let (twice, outcome) = normalize_cell(&single.0, &once, 1.0, 24);
        assert_eq!(twice, once);
        assert!(!outcome.limited);
    }

    fn cell_with_pair(value: f64, rate: f64) -> (CellFields, PairIncrements) {
        let id = ids(2);
        let mut incr = PairIncrements::default();
        incr.add_asym1(id[0], id[1], rate);
        (cell(&[(id[0], value), (id[1], 1.0 - value)]), incr)
    }

    #[test]
    fn curvature_channel_is_folded_before_limiting() {
        let id = ids(3);
        let cell = cell(&[(id[0], 0.5), (id[1], 0.3), (id[2], 0.2)]);
        let mut incr = PairIncrements::default();
        incr.add_asym1(id[1], id[0], 0.28);
        incr.add_asym2(id[1], id[0], 0.2);
        incr.add_asym1(id[2], id[0], 0.32);
        let (out, _) = normalize_cell(&cell, &incr, 1.0, 24);

        assert_eq!(out.get_asym2(id[1], id[0]), 0.0);
        assert!((out.get_asym1(id[1], id[0]) - 0.3).abs() < TOLERANCE);
    }

    #[test]
    fn pairs_of_a_field_pinned_at_zero_are_dropped() {
        let id = ids(3);
        let cell = cell(&[(id[0], 0.0), (id[1], 0.6), (id[2], 0.4)]);
        let mut incr = PairIncrements::default();
        incr.add_asym1(id[1], id[0], 0.1);
        incr.add_asym1(id[2], id[1], 0.05);
        let (out, outcome) = normalize_cell(&cell, &incr, 1.0, 24);

        assert_eq!(out.len(), 1);
        assert!((out.get_asym1(id[2], id[1]) - 0.05).abs() < TOLERANCE);
        assert!(outcome.limited);
    }

    #[test]
    fn normalized_increments_keep_values_in_bounds_after_merge() {
        let (mut phase_field, matrix, grain) = disc(16, 4.0, Resolution::Single);
        let domain = periodic();
        phase_field.finalize_initialization(&domain);
        for c in phase_field.fields().interior() {
            if phase_field.fields()[c].is_interface() {
                phase_field.increments_mut()[c].add_asym1(grain, matrix, 3.0);
            }
        }
        let report = phase_field.normalize_increments(1.0, &domain);
        assert!(report.cells_limited > 0);
        assert_eq!(report.bound_violations, 0);

        phase_field.merge_increments(1.0, &domain);
        crate::engine::phase_field::tests::assert_partition_of_unity(&phase_field);
    }

    #[test]
    fn keep_phase_volume_cancels_the_net_transfer() {
        let (mut phase_field, matrix, grain) = disc(16, 4.0, Resolution::Single);
        let domain = periodic();
        phase_field.finalize_initialization(&domain);
        let cells = phase_field.fields().interior();
        for &c in &cells {
            let cell = &phase_field.fields()[c];
            if cell.is_interface() {
                let bias = 0.01 * cell.value(grain);
                phase_field.increments_mut()[c].add_asym1(grain, matrix, 0.1 + bias);
            }
        }

        let allowed = DMatrix::from_element(2, 2, false);
        phase_field.keep_phase_volume(&allowed, &domain);

        let net: f64 = cells
            .iter()
            .map(|&c| phase_field.working().increments[c].get_asym1(grain, matrix))
            .sum();
        assert!(net.abs() < 1e-9, "net transfer {net}");
    }
}
