//! Pairwise driving forces between coexisting fields.
//!
//! Producers deposit raw forces with [`DrivingForce::add_raw`]. Once per step
//! the forces are averaged over the interface, optionally unified, and turned
//! into pair increments of the phase field by
//! [`DrivingForce::merge_increments`].

mod averaging;
mod diagnostics;

pub use diagnostics::OvershootDiagnostics;

use crate::core::grid::descriptor::{Coord, GridDescriptor};
use crate::core::grid::storage::{Storage3D, for_each_value, interpolation_weights, map_cells};
use crate::core::models::force::CellForces;
use crate::core::models::ids::FieldId;
use crate::core::models::registry::FieldRegistry;
use crate::engine::config::DrivingForceConfig;
use crate::engine::domain::Domain;
use crate::engine::interface::InterfaceModel;
use crate::engine::phase_field::PhaseField;
use averaging::averaging_offsets;
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::warn;

/// Normalization floor of pairs involving a seed, so a zero-valued nucleus
/// can start to grow.
const SEED_NORM: f64 = 1.0e-6;

/// One pair contribution produced by the merge pass.
#[derive(Debug, Clone, Copy)]
struct MergedPair {
    a: FieldId,
    b: FieldId,
    phases: (usize, usize),
    force: f64,
    allowed: Option<f64>,
    rate: f64,
}

#[derive(Debug, Clone)]
pub struct DrivingForce {
    config: DrivingForceConfig,
    forces: Storage3D<CellForces>,
    offsets: Vec<(Coord, f64)>,
    active: [bool; 3],
    n_phases: usize,
    max_psi: f64,
    diagnostics: OvershootDiagnostics,
    warned_unlimited: bool,
}

impl DrivingForce {
    /// Creates an empty force field on the coarse grid. The halo covers the
    /// averaging range.
    pub fn new(grid: &GridDescriptor, config: DrivingForceConfig, n_phases: usize) -> Self {
        let forces = Storage3D::new(grid, config.range.max(1));
        let offsets = averaging_offsets(config.range, grid.extent(), grid.dn());
        Self {
            config,
            forces,
            offsets,
            active: grid.active_axes(),
            n_phases,
            max_psi: 0.0,
            diagnostics: OvershootDiagnostics::new(n_phases),
            warned_unlimited: false,
        }
    }

    pub fn config(&self) -> &DrivingForceConfig {
        &self.config
    }

    pub fn forces(&self) -> &Storage3D<CellForces> {
        &self.forces
    }

    /// Largest local `|dψ/dt|` of the last merge.
    pub fn max_psi(&self) -> f64 {
        self.max_psi
    }

    /// Drops every sample. Called once per step before producers run.
    pub fn clear(&mut self) {
        for_each_value(self.forces.as_mut_slice(), CellForces::clear);
        self.max_psi = 0.0;
    }

    /// Adds a raw force favouring `a` over `b` in coarse cell `c`.
    pub fn add_raw(&mut self, c: Coord, a: FieldId, b: FieldId, value: f64) {
        self.forces[c].add_raw(a, b, value);
    }

    /// Adds a constant raw force favouring phase `pa` over phase `pb` to every
    /// matching field pair of every interface cell.
    pub fn add_phase_pair_force(&mut self, phase_field: &PhaseField, pa: usize, pb: usize, value: f64) {
        let fields = phase_field.fields();
        let registry = phase_field.registry();
        for c in self.forces.interior() {
            let cell = &fields[c];
            if !cell.is_interface() {
                continue;
            }
            for alpha in cell.iter() {
                for beta in cell.iter() {
                    if registry.phase_of(alpha.id) == Some(pa) && registry.phase_of(beta.id) == Some(pb) {
                        self.forces[c].add_raw(alpha.id, beta.id, value);
                    }
                }
            }
        }
    }

    /// Replaces the raw and averaged force of every sample in interface
    /// cells with its `sqrt(φa φb)`-weighted domain average.
    pub fn unify(&mut self, phase_field: &PhaseField, domain: &impl Domain) {
        let fields = phase_field.fields();

        // [raw, average, weight] per ordered field pair present in any cell.
        let mut sums: BTreeMap<(FieldId, FieldId), [f64; 3]> = BTreeMap::new();
        for c in self.forces.interior() {
            let cell = &fields[c];
            if !cell.is_interface() {
                continue;
            }
            for s in self.forces[c].iter() {
                let w = (cell.value(s.a) * cell.value(s.b)).sqrt();
                let sum = sums.entry((s.a, s.b)).or_default();
                sum[0] += w * s.raw;
                sum[1] += w * s.average;
                sum[2] += w;
            }
        }
        domain.sum_keyed(&mut sums);

        for c in self.forces.interior() {
            if !fields[c].is_interface() {
                continue;
            }
            for s in self.forces[c].iter_mut() {
                let Some(&[raw, average, weight]) = sums.get(&(s.a, s.b)) else {
                    continue;
                };
                if weight > f64::EPSILON {
                    s.raw = raw / weight;
                    s.average = average / weight;
                }
            }
        }
        domain.refresh_halo(&mut self.forces);
    }

    /// Weighted interpolation of the samples at a position in coarse-cell
    /// coordinates. Force components are divided by the interpolated weight.
    pub fn force_at(&self, pos: [f64; 3]) -> CellForces {
        let mut local = CellForces::default();
        for (corner, w) in interpolation_weights(pos, self.active) {
            local.add_all(&self.forces[corner], w);
        }
        for s in local.iter_mut() {
            if s.weight > f64::EPSILON {
                s.raw /= s.weight;
                s.tmp /= s.weight;
                s.average /= s.weight;
            }
        }
        local
    }

    fn merge_pair(
        &self,
        ip: &impl InterfaceModel,
        registry: &FieldRegistry,
        prefactor: f64,
        (a, b): (FieldId, FieldId),
        force: f64,
        norm: f64,
    ) -> Option<MergedPair> {
        let pa = registry.phase_of(a)?;
        let pb = registry.phase_of(b)?;
        let norm = if registry.is_seed(a) || registry.is_seed(b) {
            norm + SEED_NORM
        } else {
            norm
        };

        let (limited, allowed) = if self.config.limiting {
            let allowed = self.config.limits[(pa, pb)]
                * prefactor
                * ip.max_energy(pa, pb)
                * ip.regularization_factor();
            if allowed > 0.0 {
                (allowed * (force / allowed).tanh(), Some(allowed))
            } else {
                (0.0, Some(allowed))
            }
        } else {
            (force, None)
        };

        Some(MergedPair {
            a,
            b,
            phases: (pa, pb),
            force,
            allowed,
            rate: limited * ip.mobility(pa, pb) * norm * prefactor,
        })
    }

    /// Converts the (averaged) forces into first-channel pair increments of
    /// the working level, limiting each pair to its allowed driving force.
    ///
    /// Averaging must have run first, it sets the sample weights used as
    /// normalization.
    pub fn merge_increments(&mut self, phase_field: &mut PhaseField, ip: &impl InterfaceModel) {
        let prefactor = PI / phase_field.grid().eta();
        let merged = {
            let phase_field = &*phase_field;
            let registry = phase_field.registry();
            let level = phase_field.working();
            let cells = level.fields.interior();
            let this = &*self;
            let merged = match phase_field.fine() {
                None => map_cells(&cells, |c| {
                    if !level.fields[c].is_interface() {
                        return Vec::new();
                    }
                    this.forces[c]
                        .iter()
                        .filter_map(|s| {
                            let force = if this.config.averaging { s.average } else { s.raw };
                            this.merge_pair(ip, registry, prefactor, (s.a, s.b), force, s.weight)
                        })
                        .collect::<Vec<_>>()
                }),
                Some(fine) => map_cells(&cells, |f| {
                    let cell = &fine.fields[f];
                    if !cell.is_interface() {
                        return Vec::new();
                    }
                    let pos: [f64; 3] = std::array::from_fn(|a| {
                        if this.active[a] {
                            f[a] as f64 / 2.0 - 0.25
                        } else {
                            f[a] as f64
                        }
                    });
                    let local = this.force_at(pos);
                    let entries = cell.entries();
                    let mut pairs = Vec::new();
                    for (i, alpha) in entries.iter().enumerate() {
                        for beta in &entries[i + 1..] {
                            let force = if this.config.averaging {
                                local.average(alpha.id, beta.id)
                            } else {
                                local.raw(alpha.id, beta.id)
                            };
                            let norm = (alpha.value * beta.value).sqrt();
                            pairs.extend(this.merge_pair(
                                ip,
                                registry,
                                prefactor,
                                (alpha.id, beta.id),
                                force,
                                norm,
                            ));
                        }
                    }
                    pairs
                }),
            };
            cells.into_iter().zip(merged).collect::<Vec<_>>()
        };

        let increments = &mut phase_field.working_mut().increments;
        for (c, pairs) in merged {
            for p in pairs {
                self.max_psi = self.max_psi.max(p.rate.abs());
                match p.allowed {
                    Some(allowed) if allowed > 0.0 => {
                        self.diagnostics.record(p.phases.0, p.phases.1, p.force, allowed);
                    }
                    Some(allowed) if !self.warned_unlimited && p.force != 0.0 => {
                        warn!(
                            phases = ?p.phases,
                            allowed,
                            "Allowed driving force is not positive, the pair cannot move"
                        );
                        self.warned_unlimited = true;
                    }
                    _ => {}
                }
                increments[c].add_asym1(p.a, p.b, p.rate);
            }
        }
    }

    /// Sum of the averaged forces in coarse cell `c` over all field pairs
    /// whose phases are `(pa, pb)`.
    pub fn driving_force(&self, phase_field: &PhaseField, c: Coord, pa: usize, pb: usize) -> f64 {
        let registry = phase_field.registry();
        let mut total = 0.0;
        for s in self.forces[c].iter() {
            let phases = (registry.phase_of(s.a), registry.phase_of(s.b));
            if phases == (Some(pa), Some(pb)) {
                total += s.average;
            }
            if phases == (Some(pb), Some(pa)) {
                total -= s.average;
            }
        }
        total
    }

    /// Domain average of the raw force per phase pair, weighted by
    /// `sqrt(f_a f_b)` of the local phase fractions. Entry `(a, b)` favours
    /// phase `a`.
    pub fn average_global(&self, phase_field: &PhaseField, domain: &impl Domain) -> DMatrix<f64> {
        let n = self.n_phases;
        let registry = phase_field.registry();
        let fields = phase_field.fields();
        let mut values = DMatrix::zeros(n, n);
        let mut weights = DMatrix::zeros(n, n);
        for c in self.forces.interior() {
            if !fields[c].is_interface() {
                continue;
            }
            for s in self.forces[c].iter() {
                let (Some(pa), Some(pb)) = (registry.phase_of(s.a), registry.phase_of(s.b)) else {
                    continue;
                };
                if pa == pb {
                    continue;
                }
                let w = (phase_field.fraction(c, pa) * phase_field.fraction(c, pb)).sqrt();
                values[(pa, pb)] += w * s.raw;
                values[(pb, pa)] -= w * s.raw;
                weights[(pa, pb)] += w;
                weights[(pb, pa)] += w;
            }
        }
        domain.sum_in_place(values.as_mut_slice());
        domain.sum_in_place(weights.as_mut_slice());
        values.zip_map(&weights, |v, w| if w > f64::EPSILON { v / w } else { 0.0 })
    }

    /// Stable time step `min(theoretical · ip limit, numerical / max |dψ/dt|)`
    /// after the last merge. Without any rate only the theoretical term
    /// applies.
    pub fn max_time_step(
        &self,
        ip: &impl InterfaceModel,
        theoretical_limit: f64,
        numerical_limit: f64,
        domain: &impl Domain,
    ) -> f64 {
        let theoretical = theoretical_limit * ip.max_time_step();
        let max_psi = domain.max(self.max_psi);
        if max_psi > f64::EPSILON {
            theoretical.min(numerical_limit / max_psi)
        } else {
            theoretical
        }
    }

    /// Reduces the overshoot statistics collected since the last report,
    /// warns about every affected phase pair and resets the statistics.
    pub fn report_diagnostics(&mut self, domain: &impl Domain) -> OvershootDiagnostics {
        let mut diagnostics = std::mem::replace(
            &mut self.diagnostics,
            OvershootDiagnostics::new(self.n_phases),
        );
        diagnostics.reduce(domain);
        if diagnostics.overshoots > 0 && domain.is_root() {
            for (a, b, ratio) in diagnostics.overshooting_pairs() {
                warn!(
                    phases = ?(a, b),
                    ratio,
                    max_force = diagnostics.max_force[(a, b)],
                    min_force = diagnostics.min_force[(a, b)],
                    "Driving force overshoot"
                );
            }
        }
        diagnostics
    }
}
