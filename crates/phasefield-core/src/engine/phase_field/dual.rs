//! Transfers between the coarse and the fine level in dual resolution.
//!
//! A coarse cell at `c` owns the `2^d` fine cells at `(1 + dN) c + (d + 1) / 2`
//! for `d` in `{-dN, +dN}`. The centre of such a child sits at `c + d / 4` in
//! coarse coordinates.

use super::level::Level;
use crate::core::grid::descriptor::Coord;
use crate::core::grid::storage::{interpolation_weights, map_cells};
use crate::core::models::cell::CellFields;
use crate::core::models::ids::FieldId;
use crate::core::models::pairs::PairIncrements;

/// Position of a fine cell in coarse coordinates.
fn coarse_position(fine: Coord, active: [bool; 3]) -> [f64; 3] {
    std::array::from_fn(|a| {
        if active[a] {
            fine[a] as f64 / 2.0 - 0.25
        } else {
            fine[a] as f64
        }
    })
}

/// Coarse cell owning a fine cell.
fn parent_of(fine: Coord, active: [bool; 3]) -> Coord {
    std::array::from_fn(|a| if active[a] { fine[a].div_euclid(2) } else { fine[a] })
}

/// Whether the children of `c` may differ from the coarse cell.
fn needs_coarsening(coarse: &Level, fine: &Level, c: Coord) -> bool {
    let cell = &coarse.fields[c];
    if cell.is_wide_interface() {
        return true;
    }
    let owner = cell.entries().first().map(|e| e.id);
    coarse.grid.fine_children(c).any(|(f, _)| {
        let child = &fine.fields[f];
        child.is_wide_interface() || child.entries().first().map(|e| e.id) != owner
    })
}

/// Fills every interior fine cell by trilinear interpolation of the coarse
/// values, which must have a fresh halo. Zero-valued entries protected by
/// `keep_zero` survive only in the children of a coarse cell holding them.
pub(super) fn refine(fine: &mut Level, coarse: &Level, keep_zero: impl Fn(FieldId) -> bool + Sync) {
    let active = coarse.grid.active_axes();
    let cells = fine.fields.interior();
    let source = &coarse.fields;

    let refined = map_cells(&cells, |f| {
        let mut cell = CellFields::default();
        for (corner, weight) in interpolation_weights(coarse_position(f, active), active) {
            for e in source[corner].iter() {
                cell.add_value(e.id, weight * e.value);
            }
        }
        let parent = &source[parent_of(f, active)];
        cell.finalize(|id| keep_zero(id) && parent.contains(id));
        cell
    });

    for (f, cell) in cells.into_iter().zip(refined) {
        fine.fields[f] = cell;
    }
}

/// Replaces every coarse cell that is, or covers, an interface with the mean
/// of its fine children.
pub(super) fn coarsen(
    coarse: &mut Level,
    fine: &Level,
    keep_zero: impl Fn(FieldId) -> bool + Sync,
) {
    let cells = coarse.fields.interior();
    let level = &*coarse;

    let coarsened = map_cells(&cells, |c| {
        if !needs_coarsening(level, fine, c) {
            return None;
        }
        let mut cell = CellFields::default();
        let mut children = 0usize;
        for (f, _) in level.grid.fine_children(c) {
            cell.accumulate(&fine.fields[f], 1.0);
            children += 1;
        }
        cell.scale(1.0 / children as f64);
        cell.clear_derivatives();
        cell.finalize(&keep_zero);
        Some(cell)
    });

    for (c, cell) in cells.into_iter().zip(coarsened) {
        if let Some(cell) = cell {
            coarse.fields[c] = cell;
        }
    }
}

/// Averages the fine increments onto the coarse level. Cells that do not
/// cover an interface end up empty.
pub(super) fn coarsen_increments(coarse: &mut Level, fine: &Level) {
    let cells = coarse.increments.interior();
    let level = &*coarse;

    let coarsened = map_cells(&cells, |c| {
        let mut increments = PairIncrements::default();
        if needs_coarsening(level, fine, c) {
            let mut children = 0usize;
            for (f, _) in level.grid.fine_children(c) {
                increments.accumulate(&fine.increments[f], 1.0);
                children += 1;
            }
            increments.scale(1.0 / children as f64);
        }
        increments
    });

    for (c, increments) in cells.into_iter().zip(coarsened) {
        coarse.increments[c] = increments;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::boundary::{BoundaryConditions, BoundaryKind};
    use crate::core::grid::descriptor::tests::grid_2d;
    use crate::core::grid::stencil::{GradientStencil, LaplacianStencil, Stencils};
    use crate::core::grid::storage::Storage3D;
    use crate::engine::domain::{Domain, SerialDomain};
    use slotmap::SlotMap;

    const TOLERANCE: f64 = 1e-12;

    fn ids(n: usize) -> Vec<FieldId> {
        let mut map: SlotMap<FieldId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn levels(n: i64) -> (Level, Level) {
        let grid = grid_2d(n);
        let stencils = Stencils::new(&grid, LaplacianStencil::Simple, GradientStencil::Simple);
        let fine = Level::new(grid.doubled(), 4, stencils.scaled(4.0, 2.0));
        (Level::new(grid, 2, stencils), fine)
    }

    /// Field `b` ramps up linearly across columns 2..=6 of an `a` matrix.
    fn ramp(level: &mut Level, a: FieldId, b: FieldId) {
        for c in level.fields.interior() {
            let share = ((c[0] as f64 - 2.0) / 4.0).clamp(0.0, 1.0);
            let mut cell = CellFields::default();
            if share < 1.0 {
                cell.set_value(a, 1.0 - share);
            }
            if share > 0.0 {
                cell.set_value(b, share);
            }
            level.fields[c] = cell;
        }
        SerialDomain::new(BoundaryConditions::uniform(BoundaryKind::NoFlux))
            .refresh_halo(&mut level.fields);
    }

    fn total(fields: &Storage3D<CellFields>, id: FieldId) -> f64 {
        fields.interior().iter().map(|&c| fields[c].value(id)).sum()
    }

    #[test]
    fn refined_children_interpolate_the_coarse_ramp() {
        let id = ids(2);
        let (mut coarse, mut fine) = levels(12);
        ramp(&mut coarse, id[0], id[1]);
        refine(&mut fine, &coarse, |_| false);

        // Coarse column 3 holds 0.25 of `b`, its children sit at 2.75 and 3.25.
        assert!((fine.fields[[6, 4, 0]].value(id[1]) - 0.1875).abs() < TOLERANCE);
        assert!((fine.fields[[7, 4, 0]].value(id[1]) - 0.3125).abs() < TOLERANCE);
        assert_eq!(fine.fields[[0, 0, 0]].value(id[0]), 1.0);
        assert!(!fine.fields[[0, 0, 0]].is_interface());
    }

    #[test]
    fn refine_then_coarsen_preserves_linear_profiles() {
        let id = ids(2);
        let (mut coarse, mut fine) = levels(12);
        ramp(&mut coarse, id[0], id[1]);
        let original = coarse.fields.clone();
        refine(&mut fine, &coarse, |_| false);
        coarsen(&mut coarse, &fine, |_| false);

        for c in coarse.fields.interior() {
            if (3..=5).contains(&c[0]) || c[0] <= 1 || c[0] >= 7 {
                let expected = original[c].value(id[1]);
                assert!((coarse.fields[c].value(id[1]) - expected).abs() < TOLERANCE, "{c:?}");
            }
            assert!((coarse.fields[c].sum() - 1.0).abs() < TOLERANCE);
        }
        assert!((total(&coarse.fields, id[1]) - total(&original, id[1])).abs() < 1e-9);
    }

    #[test]
    fn seeds_are_only_kept_under_their_coarse_cell() {
        let id = ids(2);
        let (mut coarse, mut fine) = levels(8);
        for c in coarse.fields.interior() {
            coarse.fields[c] = CellFields::single(id[0]);
        }
        coarse.fields[[3, 3, 0]].set_value(id[1], 0.0);
        refine(&mut fine, &coarse, |f| f == id[1]);

        let holders: Vec<Coord> = fine
            .fields
            .interior()
            .into_iter()
            .filter(|&f| fine.fields[f].contains(id[1]))
            .collect();
        assert_eq!(holders.len(), 4);
        assert!(holders.iter().all(|f| parent_of(*f, [true, true, false]) == [3, 3, 0]));
    }

    #[test]
    fn increments_are_averaged_over_children() {
        let id = ids(2);
        let (mut coarse, mut fine) = levels(8);
        ramp(&mut coarse, id[0], id[1]);
        refine(&mut fine, &coarse, |_| false);
        for (f, _) in coarse.grid.fine_children([3, 2, 0]) {
            fine.increments[f].add_asym1(id[1], id[0], 0.4);
        }
        fine.increments[[6, 4, 0]].add_asym2(id[1], id[0], 0.8);
        coarsen_increments(&mut coarse, &fine);

        let incr = &coarse.increments[[3, 2, 0]];
        assert!((incr.get_asym1(id[1], id[0]) - 0.4).abs() < TOLERANCE);
        assert!((incr.get_asym2(id[1], id[0]) - 0.2).abs() < TOLERANCE);
        assert!((incr.get_total(id[1], id[0]) - 0.6).abs() < TOLERANCE);
        assert!(coarse.increments[[0, 0, 0]].is_empty());
    }
}
