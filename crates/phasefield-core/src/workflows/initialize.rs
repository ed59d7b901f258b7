use crate::core::grid::boundary::BoundaryConditions;
use crate::core::grid::descriptor::{Coord, GridDescriptor};
use crate::core::models::ids::FieldId;
use crate::engine::config::{ConfigError, InitialStructure};
use crate::engine::domain::Domain;
use crate::engine::error::EngineError;
use crate::engine::phase_field::PhaseField;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use tracing::info;

/// Value of the inner field of a double-obstacle profile at signed distance
/// `s` (positive inside) from the interface centre.
fn profile(s: f64, iwidth: f64) -> f64 {
    if s >= iwidth / 2.0 {
        1.0
    } else if s <= -iwidth / 2.0 {
        0.0
    } else {
        0.5 + 0.5 * (PI * s / iwidth).sin()
    }
}

fn global_of(grid: &GridDescriptor, c: Coord) -> [f64; 3] {
    [
        (c[0] + grid.offset_x) as f64,
        (c[1] + grid.offset_y) as f64,
        (c[2] + grid.offset_z) as f64,
    ]
}

/// Separation `to - from` on the global grid, folded onto the nearest image
/// along periodic axes.
fn separation(from: [f64; 3], to: [f64; 3], total: [f64; 3], periodic: [bool; 3]) -> [f64; 3] {
    std::array::from_fn(|a| {
        let d = to[a] - from[a];
        if periodic[a] {
            d - total[a] * (d / total[a]).round()
        } else {
            d
        }
    })
}

fn norm2(v: [f64; 3]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

/// Builds `initial` on the coarse level and finalizes the phase field.
pub fn apply(
    phase_field: &mut PhaseField,
    initial: &InitialStructure,
    boundary: &BoundaryConditions,
    domain: &impl Domain,
) -> Result<(), EngineError> {
    match *initial {
        InitialStructure::SingleSphere {
            radius,
            inner_phase,
            outer_phase,
        } => single_sphere(phase_field, radius, inner_phase, outer_phase, domain).map(|_| ()),
        InitialStructure::Voronoi { grains, phase, seed } => {
            voronoi(phase_field, grains, phase, seed, boundary, domain).map(|_| ())
        }
        InitialStructure::PlantedNucleus {
            matrix_phase,
            nucleus_phase,
            position,
        } => planted_nucleus(phase_field, matrix_phase, nucleus_phase, position, domain).map(|_| ()),
    }
}

/// A sphere (disc in 2D) of `inner_phase` with a diffuse rim, centred in a
/// matrix of `outer_phase`. Returns `(inner, outer)`.
pub fn single_sphere(
    phase_field: &mut PhaseField,
    radius: f64,
    inner_phase: usize,
    outer_phase: usize,
    domain: &impl Domain,
) -> Result<(FieldId, FieldId), EngineError> {
    let outer = phase_field.add_field(outer_phase)?;
    let inner = phase_field.add_field(inner_phase)?;

    let grid = phase_field.grid().clone();
    let active = grid.active_axes();
    let centre = [
        grid.total_nx as f64 / 2.0,
        grid.total_ny as f64 / 2.0,
        grid.total_nz as f64 / 2.0,
    ];
    for c in phase_field.fields().interior() {
        let pos = global_of(&grid, c);
        let offset: [f64; 3] = std::array::from_fn(|a| if active[a] { pos[a] - centre[a] } else { 0.0 });
        let value = profile(radius - norm2(offset).sqrt(), grid.iwidth);

        let cell = &mut phase_field.fields_mut()[c];
        cell.clear();
        if value > 0.0 {
            cell.set_value(inner, value);
        }
        if value < 1.0 {
            cell.set_value(outer, 1.0 - value);
        }
    }

    phase_field.finalize_initialization(domain);
    info!(radius, inner_phase, outer_phase, "Single sphere initialized");
    Ok((inner, outer))
}

/// Voronoi tessellation of `grains` grains of one phase around seed points
/// drawn from an RNG seeded with `seed`. Distances wrap across periodic
/// boundaries. Each grain boundary carries the equilibrium profile across
/// the bisector of the two nearest seed points.
pub fn voronoi(
    phase_field: &mut PhaseField,
    grains: usize,
    phase: usize,
    seed: u64,
    boundary: &BoundaryConditions,
    domain: &impl Domain,
) -> Result<Vec<FieldId>, EngineError> {
    if grains == 0 {
        return Err(ConfigError::InvalidParameter {
            name: "grains",
            reason: "at least one grain is required".into(),
        }
        .into());
    }

    let grid = phase_field.grid().clone();
    let active = grid.active_axes();
    let total = [
        grid.total_nx as f64,
        grid.total_ny as f64,
        grid.total_nz as f64,
    ];
    let periodic: [bool; 3] = std::array::from_fn(|a| boundary.is_periodic(a));
    let iwidth = grid.iwidth;

    let mut rng = StdRng::seed_from_u64(seed);
    let points: Vec<[f64; 3]> = (0..grains)
        .map(|_| std::array::from_fn(|a| if active[a] { rng.gen_range(0.0..total[a]) } else { 0.0 }))
        .collect();
    let ids = (0..grains)
        .map(|_| phase_field.add_field(phase))
        .collect::<Result<Vec<_>, _>>()?;

    for c in phase_field.fields().interior() {
        let pos = global_of(&grid, c);
        let mut near: Vec<(usize, f64, [f64; 3])> = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let p = std::array::from_fn(|a| if active[a] { p[a] } else { pos[a] });
                let d = separation(pos, p, total, periodic);
                (i, norm2(d).sqrt(), d)
            })
            .collect();
        near.sort_by(|a, b| a.1.total_cmp(&b.1));
        let closest = near[0].1;
        near.retain(|(_, d, _)| *d < closest + 2.0 * iwidth);

        let cell = &mut phase_field.fields_mut()[c];
        cell.clear();
        for &(i, di, vi) in near.iter().filter(|(_, d, _)| *d < closest + iwidth) {
            // Signed distance to the nearest bisector, positive inside grain i.
            let s = near
                .iter()
                .filter(|(j, _, _)| *j != i)
                .map(|&(_, dj, vj)| {
                    let between = norm2(std::array::from_fn(|a| vj[a] - vi[a])).sqrt();
                    if between > 0.0 {
                        (dj * dj - di * di) / (2.0 * between)
                    } else {
                        0.0
                    }
                })
                .fold(iwidth / 2.0, f64::min);
            let value = profile(s, iwidth);
            if value > 0.0 {
                cell.set_value(ids[i], value);
            }
        }
    }

    phase_field.finalize_initialization(domain);
    info!(
        grains,
        phase,
        seed,
        existing = phase_field.registry().existing().count(),
        "Voronoi tessellation initialized"
    );
    Ok(ids)
}

/// A uniform matrix of `matrix_phase` with a single seed of `nucleus_phase`
/// planted at the global cell `position`. Returns `(matrix, nucleus)`.
pub fn planted_nucleus(
    phase_field: &mut PhaseField,
    matrix_phase: usize,
    nucleus_phase: usize,
    position: Coord,
    domain: &impl Domain,
) -> Result<(FieldId, FieldId), EngineError> {
    let matrix = phase_field.add_field(matrix_phase)?;
    for c in phase_field.fields().interior() {
        let cell = &mut phase_field.fields_mut()[c];
        cell.clear();
        cell.set_value(matrix, 1.0);
    }
    let nucleus = phase_field.plant_nucleus(nucleus_phase, position)?;

    phase_field.finalize_initialization(domain);
    info!(?position, nucleus_phase, "Nucleus planted");
    Ok((matrix, nucleus))
}
