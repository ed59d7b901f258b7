use crate::core::grid::descriptor::{Coord, GridDescriptor, shift};
use crate::core::grid::stencil::Stencils;
use crate::core::grid::storage::{Storage3D, for_each_value, for_each_zipped, map_cells};
use crate::core::models::cell::{CellFields, CellFlag};
use crate::core::models::ids::FieldId;
use crate::core::models::pairs::PairIncrements;
use crate::engine::domain::Domain;
use nalgebra::Vector3;

/// Field values and pending increments of one resolution level.
///
/// Both storages share one layout (same extent and halo), so per-cell work
/// that touches both can walk their slices in lockstep.
#[derive(Debug, Clone)]
pub struct Level {
    pub grid: GridDescriptor,
    pub fields: Storage3D<CellFields>,
    pub increments: Storage3D<PairIncrements>,
    pub stencils: Stencils,
}

impl Level {
    pub(crate) fn new(grid: GridDescriptor, halo: i64, stencils: Stencils) -> Self {
        Self {
            fields: Storage3D::new(&grid, halo),
            increments: Storage3D::new(&grid, halo),
            grid,
            stencils,
        }
    }

    pub(crate) fn refresh_fields(&mut self, domain: &impl Domain) {
        domain.refresh_halo(&mut self.fields);
    }

    pub(crate) fn refresh_increments(&mut self, domain: &impl Domain) {
        domain.refresh_halo(&mut self.increments);
    }

    /// Finalizes every wide-interface cell. Halo cells are included; they are
    /// overwritten by the next refresh anyway.
    pub(crate) fn finalize_cells(&mut self, keep_zero: impl Fn(FieldId) -> bool + Sync) {
        for_each_value(self.fields.as_mut_slice(), |cell| {
            if cell.is_wide_interface() {
                cell.finalize(&keep_zero);
            }
        });
    }

    /// Marks the band of cells that are within one stencil step of an
    /// interface cell. Stale band flags from the previous step are dropped
    /// first.
    pub(crate) fn set_flags(&mut self) {
        for_each_value(self.fields.as_mut_slice(), |cell| {
            if cell.flag() == CellFlag::Band {
                cell.set_flag(CellFlag::Bulk);
            }
        });

        let cells = self.fields.cells(self.fields.halo_width() - 1);
        let neighbourhood: Vec<Coord> = self.grid.neighbourhood().collect();
        let fields = &self.fields;
        let band = map_cells(&cells, |c| {
            !fields[c].is_interface()
                && neighbourhood
                    .iter()
                    .any(|&d| fields[shift(c, d)].is_interface())
        });

        for (c, in_band) in cells.into_iter().zip(band) {
            if in_band {
                self.fields[c].set_flag(CellFlag::Band);
            }
        }
    }

    /// Recomputes gradients and Laplacians of every wide-interface cell.
    ///
    /// Fields present only in neighbours are inserted with value zero, which
    /// is how an interface advances into the band around it.
    pub(crate) fn calculate_derivatives(&mut self) {
        let cells = self.fields.cells(self.fields.halo_width() - 1);
        let fields = &self.fields;
        let stencils = &self.stencils;

        let derivatives: Vec<Option<CellFields>> = map_cells(&cells, |c| {
            if !fields[c].is_wide_interface() {
                return None;
            }
            let mut acc = CellFields::default();
            for entry in &stencils.laplacian {
                for e in fields[shift(c, entry.offset)].iter() {
                    if e.value != 0.0 {
                        acc.add_derivatives(e.id, Vector3::zeros(), entry.weight * e.value);
                    }
                }
            }
            for entry in &stencils.gradient {
                for e in fields[shift(c, entry.offset)].iter() {
                    if e.value != 0.0 {
                        acc.add_derivatives(e.id, entry.weight * e.value, 0.0);
                    }
                }
            }
            Some(acc)
        });

        for_each_value(self.fields.as_mut_slice(), CellFields::clear_derivatives);

        for (c, acc) in cells.into_iter().zip(derivatives) {
            if let Some(acc) = acc {
                let cell = &mut self.fields[c];
                for e in acc.iter() {
                    cell.add_derivatives(e.id, e.gradient, e.laplacian);
                }
            }
        }
    }

    /// Applies `factor(a, b) * (v1 + v2) * dt` to both fields of every pair
    /// and clears the increments. Changes below machine epsilon are skipped.
    pub(crate) fn apply_increments(
        &mut self,
        dt: f64,
        factor: impl Fn(FieldId, FieldId) -> f64 + Sync,
    ) {
        for_each_zipped(
            self.fields.as_mut_slice(),
            self.increments.as_mut_slice(),
            |cell, increments| {
                if cell.is_wide_interface() {
                    for p in increments.iter() {
                        let value = factor(p.a, p.b) * p.total() * dt;
                        if value.abs() >= f64::EPSILON {
                            cell.add_value(p.a, value);
                            cell.add_value(p.b, -value);
                        }
                    }
                }
                increments.clear();
            },
        );
    }

    pub(crate) fn clear_increments(&mut self) {
        for_each_value(self.increments.as_mut_slice(), PairIncrements::clear);
    }
}
