//! # Phase Field
//!
//! Owner of the sparse multi-field storage, the field registry and the
//! derived per-cell quantities.
//!
//! In single resolution every operation acts on one [`Level`]. In dual
//! resolution the evolution runs on a fine level at twice the linear density
//! while the coarse level holds the coarsened copy that every read-only
//! accessor, driving-force producer and checkpoint consumes.

mod checkpoint;
mod curvature;
mod dual;
pub mod level;
mod normalize;

pub use checkpoint::checkpoint_paths;
pub use level::Level;
pub use normalize::NormalizationReport;

use crate::core::grid::descriptor::{Coord, GridDescriptor, Resolution, shift};
use crate::core::grid::stencil::Stencils;
use crate::core::grid::storage::{Storage3D, for_each_value, map_cells};
use crate::core::models::cell::CellFields;
use crate::core::models::ids::{FieldId, RawFieldId};
use crate::core::models::pairs::PairIncrements;
use crate::core::models::record::{FieldRecord, GrainStage};
use crate::core::models::registry::FieldRegistry;
use crate::engine::config::PhaseFieldConfig;
use crate::engine::domain::Domain;
use crate::engine::error::EngineError;
use nalgebra::Vector3;
use slotmap::SecondaryMap;
use std::collections::HashMap;
use std::f64::consts::PI;
use tracing::{debug, info};

/// Volume of one existing field, as listed by [`PhaseField::volume_report`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldVolume {
    pub id: FieldId,
    pub phase: usize,
    pub stage: GrainStage,
    pub volume: f64,
}

#[derive(Debug, Clone)]
pub struct PhaseField {
    config: PhaseFieldConfig,
    coarse: Level,
    fine: Option<Level>,
    fractions: Storage3D<Vec<f64>>,
    registry: FieldRegistry,
    growth_factors: HashMap<(FieldId, FieldId), f64>,
    nucleation_present: bool,
    phase_fractions: Vec<f64>,
}

#[inline]
fn ordered(a: FieldId, b: FieldId) -> (FieldId, FieldId) {
    if a < b { (a, b) } else { (b, a) }
}

/// Merge derating of a pair; only applies when both fields report a
/// violated growth constraint.
fn growth_factor(
    registry: &FieldRegistry,
    factors: &HashMap<(FieldId, FieldId), f64>,
    a: FieldId,
    b: FieldId,
) -> f64 {
    let violated = |id| registry.get(id).is_some_and(|r| r.growth_constraint_violated);
    if violated(a) && violated(b) {
        factors.get(&ordered(a, b)).copied().unwrap_or(1.0)
    } else {
        1.0
    }
}

/// Finalizes the cells of one level and re-derives its flags and
/// derivatives, refreshing the halo between passes.
fn finalize_level(level: &mut Level, registry: &FieldRegistry, domain: &impl Domain) {
    level.finalize_cells(|id| registry.is_seed(id));
    derive_level(level, domain);
}

fn derive_level(level: &mut Level, domain: &impl Domain) {
    level.refresh_fields(domain);
    level.set_flags();
    level.refresh_fields(domain);
    level.calculate_derivatives();
    level.refresh_fields(domain);
}

impl PhaseField {
    pub fn new(grid: GridDescriptor, config: PhaseFieldConfig) -> Self {
        let halo = grid.storage_halo();
        let stencils = Stencils::new(&grid, config.laplacian_stencil, config.gradient_stencil);
        let fine = (grid.resolution == Resolution::Dual)
            .then(|| Level::new(grid.doubled(), 2 * halo, stencils.scaled(4.0, 2.0)));
        let fractions = Storage3D::new(&grid, 0);
        let phase_fractions = vec![0.0; config.n_phases];

        Self {
            coarse: Level::new(grid, halo, stencils),
            fine,
            fractions,
            registry: FieldRegistry::new(),
            growth_factors: HashMap::new(),
            nucleation_present: false,
            phase_fractions,
            config,
        }
    }

    pub fn config(&self) -> &PhaseFieldConfig {
        &self.config
    }

    /// Geometry of the coarse level.
    pub fn grid(&self) -> &GridDescriptor {
        &self.coarse.grid
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn coarse(&self) -> &Level {
        &self.coarse
    }

    pub fn fine(&self) -> Option<&Level> {
        self.fine.as_ref()
    }

    /// The level increments are produced and merged on: fine in dual
    /// resolution, coarse otherwise.
    pub fn working(&self) -> &Level {
        self.fine.as_ref().unwrap_or(&self.coarse)
    }

    pub(crate) fn working_mut(&mut self) -> &mut Level {
        match self.fine.as_mut() {
            Some(fine) => fine,
            None => &mut self.coarse,
        }
    }

    /// Coarse-level values.
    pub fn fields(&self) -> &Storage3D<CellFields> {
        &self.coarse.fields
    }

    /// Coarse-level values for initial construction, before
    /// [`finalize_initialization`](Self::finalize_initialization).
    pub fn fields_mut(&mut self) -> &mut Storage3D<CellFields> {
        &mut self.coarse.fields
    }

    /// Increments of the working level, for increment producers.
    pub fn increments_mut(&mut self) -> &mut Storage3D<PairIncrements> {
        &mut self.working_mut().increments
    }

    pub fn nucleation_present(&self) -> bool {
        self.nucleation_present
    }

    /// Domain-wide volume fraction of every phase after the last finalize.
    pub fn phase_fractions(&self) -> &[f64] {
        &self.phase_fractions
    }

    fn check_phase(&self, phase: usize) -> Result<(), EngineError> {
        if phase < self.config.n_phases {
            Ok(())
        } else {
            Err(EngineError::InvalidPhase {
                phase,
                n_phases: self.config.n_phases,
            })
        }
    }

    /// Reference volume of a nucleus of `radius` cells: a length, area or
    /// volume depending on the number of active axes. Zero when nucleus
    /// volumes are not considered.
    pub fn reference_volume(&self, radius: f64) -> f64 {
        if !self.config.consider_nucleus_volume {
            return 0.0;
        }
        let volume = match self.coarse.grid.active() {
            1 => radius,
            2 => PI * radius * radius,
            _ => 4.0 / 3.0 * PI * radius * radius * radius,
        };
        volume * self.config.nucleus_volume_factor
    }

    /// Registers a new `Stable` field of `phase` without placing it.
    pub fn add_field(&mut self, phase: usize) -> Result<FieldId, EngineError> {
        self.check_phase(phase)?;
        let mut record = FieldRecord::new(phase);
        record.ref_volume = self.reference_volume(self.coarse.grid.iwidth);
        record.volume_ratio = 0.0;
        Ok(self.registry.insert(record))
    }

    /// Registers a `Seed` field and inserts it with value zero at the global
    /// cell `position`, on every fine sub-cell as well in dual resolution.
    /// Workers not owning the cell only register the record.
    pub fn plant_nucleus(&mut self, phase: usize, position: Coord) -> Result<FieldId, EngineError> {
        self.check_phase(phase)?;
        let mut record = FieldRecord::new(phase);
        record.stage = GrainStage::Seed;
        record.rcm = Vector3::new(position[0] as f64, position[1] as f64, position[2] as f64);
        record.ref_volume = self.reference_volume(self.coarse.grid.iwidth);
        record.volume_ratio = 0.0;
        let id = self.registry.insert(record);
        self.nucleation_present = true;

        if let Some(local) = self.coarse.grid.contains_global(position) {
            self.coarse.fields[local].set_value(id, 0.0);
            if let Some(fine) = self.fine.as_mut() {
                for (child, _) in self.coarse.grid.fine_children(local) {
                    fine.fields[child].set_value(id, 0.0);
                }
            }
        }
        debug!(raw_id = id.to_raw(), phase, ?position, "Planted nucleus");
        Ok(id)
    }

    pub fn set_growth_constraint(&mut self, id: FieldId, violated: bool) -> Result<(), EngineError> {
        let record = self
            .registry
            .get_mut(id)
            .ok_or(EngineError::FieldNotFound { raw_id: id.to_raw() })?;
        record.growth_constraint_violated = violated;
        Ok(())
    }

    /// Merge factor applied to the pair while both fields violate their
    /// growth constraint.
    pub fn set_pairwise_growth_factor(&mut self, a: FieldId, b: FieldId, factor: f64) {
        self.growth_factors.insert(ordered(a, b), factor);
    }

    /// First finalize after the initial microstructure has been written to
    /// the coarse level. In dual resolution the fine level is interpolated
    /// from the coarse one here.
    pub fn finalize_initialization(&mut self, domain: &impl Domain) {
        finalize_level(&mut self.coarse, &self.registry, domain);

        let registry = &self.registry;
        let refined = match self.fine.as_mut() {
            Some(fine) => {
                dual::refine(fine, &self.coarse, |id| registry.is_seed(id));
                true
            }
            None => false,
        };

        if refined {
            self.finalize_levels(domain);
        } else {
            self.calculate_fractions();
            self.calculate_grain_volumes(domain);
        }
        info!(
            fields = self.registry.existing().count(),
            "Initial microstructure finalized"
        );
    }

    /// Restores every cell invariant after values changed, then re-derives
    /// flags, derivatives, fractions and grain volumes.
    pub fn finalize(&mut self, domain: &impl Domain) {
        self.combine_phase_fields();
        self.finalize_levels(domain);
    }

    fn finalize_levels(&mut self, domain: &impl Domain) {
        let registry = &self.registry;
        match self.fine.as_mut() {
            None => finalize_level(&mut self.coarse, registry, domain),
            Some(fine) => {
                finalize_level(fine, registry, domain);
                dual::coarsen(&mut self.coarse, fine, |id| registry.is_seed(id));
                derive_level(&mut self.coarse, domain);
            }
        }
        self.calculate_fractions();
        self.calculate_grain_volumes(domain);
    }

    /// Applies the normalized increments of the working level and finalizes.
    pub fn merge_increments(&mut self, dt: f64, domain: &impl Domain) {
        let registry = &self.registry;
        let factors = &self.growth_factors;
        let factor = |a, b| growth_factor(registry, factors, a, b);
        match self.fine.as_mut() {
            None => self.coarse.apply_increments(dt, factor),
            Some(fine) => {
                fine.apply_increments(dt, factor);
                self.coarse.clear_increments();
            }
        }
        self.finalize(domain);
    }

    /// Zeroes `Stable` entries below `cutoff` on the working level, then
    /// finalizes.
    pub fn fix_spreading(&mut self, cutoff: f64, domain: &impl Domain) {
        let registry = &self.registry;
        let level = match self.fine.as_mut() {
            Some(fine) => fine,
            None => &mut self.coarse,
        };
        for_each_value(level.fields.as_mut_slice(), |cell| {
            for e in cell.entries_mut() {
                if e.value < cutoff && registry.get(e.id).is_some_and(FieldRecord::is_stable) {
                    e.value = 0.0;
                }
            }
        });
        self.finalize(domain);
    }

    /// Merges all existing `Stable` fields of each combined phase into the
    /// one with the largest volume.
    fn combine_phase_fields(&mut self) {
        for phase in 0..self.config.n_phases {
            if !self.config.combine[phase] {
                continue;
            }

            let mut count = 0usize;
            let mut majority: Option<(FieldId, f64)> = None;
            for (id, record) in self.registry.existing() {
                if record.phase == phase && record.is_stable() {
                    count += 1;
                    if record.volume > majority.map_or(0.0, |(_, v)| v) {
                        majority = Some((id, record.volume));
                    }
                }
            }
            let Some((target, _)) = majority else {
                continue;
            };
            if count < 2 {
                continue;
            }

            let registry = &self.registry;
            let level = match self.fine.as_mut() {
                Some(fine) => fine,
                None => &mut self.coarse,
            };
            for_each_value(level.fields.as_mut_slice(), |cell| {
                let mut combined = 0.0;
                for e in cell.entries_mut() {
                    let merge = e.id != target
                        && registry
                            .get(e.id)
                            .is_some_and(|r| r.phase == phase && r.is_stable());
                    if merge {
                        combined += e.value;
                        e.value = 0.0;
                    }
                }
                if combined > f64::EPSILON {
                    cell.add_value(target, combined);
                }
            });
            debug!(phase, fields = count, raw_id = target.to_raw(), "Combined phase fields");
        }
    }

    fn calculate_fractions(&mut self) {
        let cells = self.fractions.interior();
        let fields = &self.coarse.fields;
        let registry = &self.registry;
        let n_phases = self.config.n_phases;
        let fractions = map_cells(&cells, |c| {
            let mut fractions = vec![0.0; n_phases];
            for e in fields[c].iter() {
                if let Some(slot) = registry.phase_of(e.id).and_then(|p| fractions.get_mut(p)) {
                    *slot += e.value;
                }
            }
            fractions
        });
        for (c, f) in cells.into_iter().zip(fractions) {
            self.fractions[c] = f;
        }
    }

    fn calculate_grain_volumes(&mut self, domain: &impl Domain) {
        let ids: Vec<FieldId> = self.registry.ids().collect();
        let index: SecondaryMap<FieldId, usize> =
            ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let mut volumes = vec![0.0; ids.len()];
        for c in self.coarse.fields.interior() {
            for e in self.coarse.fields[c].iter() {
                if let Some(&i) = index.get(e.id) {
                    volumes[i] += e.value;
                }
            }
        }
        domain.sum_in_place(&mut volumes);

        let volumes: SecondaryMap<FieldId, f64> = ids.into_iter().zip(volumes).collect();
        let summary = self.registry.update_volumes(
            &volumes,
            self.coarse.grid.total_cells(),
            self.config.n_phases,
        );
        self.nucleation_present = summary.nucleation_present;
        self.phase_fractions = summary.phase_fractions;
    }

    /// Id and value of the largest entry of a coarse cell.
    pub fn majority(&self, c: Coord) -> Option<(FieldId, f64)> {
        self.coarse.fields[c].majority().map(|e| (e.id, e.value))
    }

    pub fn fraction(&self, c: Coord, phase: usize) -> f64 {
        self.fractions[c].get(phase).copied().unwrap_or(0.0)
    }

    pub fn fractions(&self, c: Coord) -> &[f64] {
        &self.fractions[c]
    }

    /// Effective number of coexisting interfaces in a cell,
    /// `1 / (2 (1/2 - Σ φα φβ))`; one outside interfaces.
    pub fn interfaces(&self, c: Coord) -> f64 {
        let cell = &self.coarse.fields[c];
        if !cell.is_interface() {
            return 1.0;
        }
        let entries = cell.entries();
        let mut products = 0.0;
        for (i, alpha) in entries.iter().enumerate() {
            for beta in &entries[i + 1..] {
                products += alpha.value * beta.value;
            }
        }
        1.0 / (2.0 * (0.5 - products))
    }

    pub fn variant(&self, c: Coord) -> Option<usize> {
        self.majority(c)
            .and_then(|(id, _)| self.registry.get(id))
            .map(|r| r.variant)
    }

    pub fn parent(&self, c: Coord) -> Option<RawFieldId> {
        self.majority(c)
            .and_then(|(id, _)| self.registry.get(id))
            .and_then(|r| r.parent)
    }

    /// Sorted, unique ids present in the cell and its direct neighbours.
    pub fn vicinity_fields(&self, c: Coord) -> Vec<FieldId> {
        let mut ids: Vec<FieldId> = self
            .coarse
            .grid
            .neighbourhood()
            .flat_map(|d| self.coarse.fields[shift(c, d)].iter().map(|e| e.id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn present_fields(&self) -> Vec<FieldId> {
        self.registry.existing().map(|(id, _)| id).collect()
    }

    /// Phase fractions of a coarse cell after applying its pending
    /// driving-force increments over `dt`, derated by growth factors.
    pub fn new_fractions(&self, c: Coord, dt: f64) -> Vec<f64> {
        let mut fractions = self.fractions[c].clone();
        for p in self.coarse.increments[c].iter() {
            let (Some(pa), Some(pb)) = (self.registry.phase_of(p.a), self.registry.phase_of(p.b))
            else {
                continue;
            };
            if pa == pb {
                continue;
            }
            let change = growth_factor(&self.registry, &self.growth_factors, p.a, p.b) * p.v1 * dt;
            if let Some(f) = fractions.get_mut(pa) {
                *f += change;
            }
            if let Some(f) = fractions.get_mut(pb) {
                *f -= change;
            }
        }
        fractions
    }

    /// Volumes of all existing fields in registry order.
    pub fn volume_report(&self) -> Vec<FieldVolume> {
        self.registry
            .existing()
            .map(|(id, r)| FieldVolume {
                id,
                phase: r.phase,
                stage: r.stage,
                volume: r.volume,
            })
            .collect()
    }
}
