use super::descriptor::{Coord, GridDescriptor};
use itertools::iproduct;
use nalgebra::Vector3;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaplacianStencil {
    Simple,
    #[default]
    Isotropic,
    LatticeBoltzmann,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GradientStencil {
    Simple,
    #[default]
    Isotropic,
    LatticeBoltzmann,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplacianEntry {
    pub offset: Coord,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientEntry {
    pub offset: Coord,
    pub weight: Vector3<f64>,
}

/// Finite-difference weights for the Laplacian and the gradient, expanded
/// onto the active axes of a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Stencils {
    pub laplacian: Vec<LaplacianEntry>,
    pub gradient: Vec<GradientEntry>,
}

/// Weight of a Laplacian neighbour as a function of how many offset
/// components are nonzero (0 = centre, 1 = face, 2 = edge, 3 = corner).
fn laplacian_weights(dim: usize, kind: LaplacianStencil) -> [f64; 4] {
    match (dim, kind) {
        (1, _) => [-2.0, 1.0, 0.0, 0.0],
        (2, LaplacianStencil::Simple) => [-4.0, 1.0, 0.0, 0.0],
        (2, LaplacianStencil::Isotropic) => [-3.0, 0.5, 0.25, 0.0],
        (2, LaplacianStencil::LatticeBoltzmann) => [-10.0 / 3.0, 2.0 / 3.0, 1.0 / 6.0, 0.0],
        (_, LaplacianStencil::Simple) => [-6.0, 1.0, 0.0, 0.0],
        (_, LaplacianStencil::Isotropic) => [-128.0 / 30.0, 14.0 / 30.0, 3.0 / 30.0, 1.0 / 30.0],
        (_, LaplacianStencil::LatticeBoltzmann) => [-4.0, 1.0 / 3.0, 1.0 / 6.0, 0.0],
    }
}

fn gradient_weights(dim: usize, kind: GradientStencil) -> [f64; 4] {
    match (dim, kind) {
        (1, _) | (_, GradientStencil::Simple) => [0.0, 0.5, 0.0, 0.0],
        (2, _) => [0.0, 1.0 / 3.0, 1.0 / 12.0, 0.0],
        (_, GradientStencil::Isotropic) => [0.0, 2.0 / 9.0, 1.0 / 18.0, 1.0 / 72.0],
        (_, GradientStencil::LatticeBoltzmann) => [0.0, 1.0 / 6.0, 1.0 / 12.0, 0.0],
    }
}

impl Stencils {
    pub fn new(grid: &GridDescriptor, laplacian: LaplacianStencil, gradient: GradientStencil) -> Self {
        let dim = grid.active();
        let lap_w = laplacian_weights(dim, laplacian);
        let grad_w = gradient_weights(dim, gradient);
        let dx = grid.dx;
        let [dnx, dny, dnz] = grid.dn();

        let mut stencils = Stencils {
            laplacian: Vec::new(),
            gradient: Vec::new(),
        };

        for (i, j, k) in iproduct!(-dnx..=dnx, -dny..=dny, -dnz..=dnz) {
            let offset = [i, j, k];
            let order = offset.iter().filter(|&&o| o != 0).count();

            let weight = lap_w[order];
            if weight != 0.0 {
                stencils.laplacian.push(LaplacianEntry {
                    offset,
                    weight: weight / (dx * dx),
                });
            }

            let g = grad_w[order];
            if g != 0.0 {
                let weight = Vector3::new(i as f64, j as f64, k as f64) * (g / dx);
                stencils.gradient.push(GradientEntry { offset, weight });
            }
        }
        stencils
    }

    /// Copy with every Laplacian weight multiplied by `laplacian_factor` and
    /// every gradient weight by `gradient_factor`.
    pub fn scaled(&self, laplacian_factor: f64, gradient_factor: f64) -> Self {
        Stencils {
            laplacian: self
                .laplacian
                .iter()
                .map(|e| LaplacianEntry {
                    offset: e.offset,
                    weight: e.weight * laplacian_factor,
                })
                .collect(),
            gradient: self
                .gradient
                .iter()
                .map(|e| GradientEntry {
                    offset: e.offset,
                    weight: e.weight * gradient_factor,
                })
                .collect(),
        }
    }
}
