use super::PhaseField;
use crate::core::grid::descriptor::{Coord, shift};
use crate::core::models::ids::FieldId;
use crate::engine::config::InterfaceNormalModel;
use nalgebra::{Matrix2x3, Matrix3, Vector3};

fn unit(v: Vector3<f64>) -> Vector3<f64> {
    v.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros)
}

impl PhaseField {
    /// Unit normal of the `a`/`b` interface in a coarse cell, pointing from
    /// `a` into `b`. Zero when either field is absent or the gradients cancel.
    pub fn normal(&self, c: Coord, a: FieldId, b: FieldId) -> Vector3<f64> {
        let cell = &self.coarse.fields[c];
        let (Some(alpha), Some(beta)) = (cell.get(a), cell.get(b)) else {
            return Vector3::zeros();
        };
        let normal = match self.config.normal_model {
            InterfaceNormalModel::AverageGradient => beta.gradient - alpha.gradient,
            InterfaceNormalModel::WeightedGradient => {
                beta.gradient * alpha.value - alpha.gradient * beta.value
            }
        };
        unit(normal)
    }

    /// Normalized gradient of every field present in a coarse cell.
    pub fn phase_normals(&self, c: Coord) -> Vec<(FieldId, Vector3<f64>)> {
        self.coarse.fields[c]
            .iter()
            .map(|e| (e.id, unit(e.gradient)))
            .collect()
    }

    /// Principal curvatures `(κ1, κ2)` of every field in an interface cell,
    /// the eigenvalues of the Weingarten map projected onto the tangent
    /// plane spanned by the spherical basis vectors of the field normal.
    /// Empty outside interfaces.
    pub fn principal_curvatures(&self, c: Coord) -> Vec<(FieldId, [f64; 2])> {
        if !self.coarse.fields[c].is_interface() {
            return Vec::new();
        }

        let weight = 0.5 / self.coarse.grid.dx;
        let active = self.coarse.grid.active_axes();
        let mut jacobians: Vec<(FieldId, Matrix3<f64>)> = Vec::new();
        for axis in (0..3).filter(|&a| active[a]) {
            for side in [-1i64, 1] {
                let mut d = [0; 3];
                d[axis] = side;
                for (id, n) in self.phase_normals(shift(c, d)) {
                    let pos = match jacobians.iter().position(|(j, _)| *j == id) {
                        Some(pos) => pos,
                        None => {
                            jacobians.push((id, Matrix3::zeros()));
                            jacobians.len() - 1
                        }
                    };
                    let mut column = jacobians[pos].1.column_mut(axis);
                    column += n * (side as f64 * weight);
                }
            }
        }

        self.phase_normals(c)
            .into_iter()
            .map(|(id, n)| {
                let jacobian = jacobians
                    .iter()
                    .find(|(j, _)| *j == id)
                    .map_or_else(Matrix3::zeros, |(_, m)| *m);

                let phi = n.y.atan2(n.x);
                let theta = n.z.clamp(-1.0, 1.0).acos();
                let e_theta = Vector3::new(
                    theta.cos() * phi.cos(),
                    theta.cos() * phi.sin(),
                    -theta.sin(),
                );
                let e_phi = Vector3::new(-phi.sin(), phi.cos(), 0.0);
                let projection = Matrix2x3::from_rows(&[e_theta.transpose(), e_phi.transpose()]);

                let w = -(projection * jacobian * projection.transpose());
                let mean = 0.5 * (w[(0, 0)] + w[(1, 1)]);
                let half_diff = 0.5 * (w[(0, 0)] - w[(1, 1)]);
                let spread = (half_diff * half_diff + w[(0, 1)] * w[(1, 0)]).max(0.0).sqrt();
                (id, [mean - spread, mean + spread])
            })
            .collect()
    }

    /// Principal curvatures summed over the fields of one phase.
    pub fn phase_principal_curvatures(&self, c: Coord, phase: usize) -> [f64; 2] {
        self.principal_curvatures(c)
            .into_iter()
            .filter(|(id, _)| self.registry.phase_of(*id) == Some(phase))
            .fold([0.0, 0.0], |acc, (_, k)| [acc[0] + k[0], acc[1] + k[1]])
    }

    /// Divergence of the normals of all fields of `phase`, evaluated with
    /// the gradient stencil.
    pub fn curvature_phase(&self, c: Coord, phase: usize) -> f64 {
        let mut kappa = 0.0;
        for entry in &self.coarse.stencils.gradient {
            for (id, n) in self.phase_normals(shift(c, entry.offset)) {
                if self.registry.phase_of(id) == Some(phase) {
                    kappa += entry.weight.dot(&n);
                }
            }
        }
        kappa
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::descriptor::Resolution;
    use crate::core::grid::descriptor::tests::grid_2d;
    use crate::engine::phase_field::tests::{config, disc, periodic};

    const TOLERANCE: f64 = 1e-9;

    fn flat(n: i64) -> (PhaseField, FieldId, FieldId) {
        let mut phase_field = PhaseField::new(grid_2d(n), config(2));
        let a = phase_field.add_field(0).unwrap();
        let b = phase_field.add_field(1).unwrap();
        for c in phase_field.fields().interior() {
            let x = c[0] as f64;
            let share = (0.5 + (x - 7.5) / 4.0).clamp(0.0, 1.0);
            let cell = &mut phase_field.fields_mut()[c];
            if share < 1.0 {
                cell.set_value(a, 1.0 - share);
            }
            if share > 0.0 {
                cell.set_value(b, share);
            }
        }
        phase_field.finalize_initialization(&periodic());
        (phase_field, a, b)
    }

    #[test]
    fn flat_interface_normal_points_from_a_to_b() {
        let (phase_field, a, b) = flat(16);
        let n = phase_field.normal([7, 3, 0], a, b);
        assert!((n.x - 1.0).abs() < TOLERANCE);
        assert!(n.y.abs() < TOLERANCE);
        let reverse = phase_field.normal([7, 3, 0], b, a);
        assert!((reverse.x + 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn flat_interface_has_no_curvature() {
        let (phase_field, _, b) = flat(16);
        let c = [7, 5, 0];
        assert!(phase_field.fields()[c].is_interface());

        for (_, kappa) in phase_field.principal_curvatures(c) {
            assert!(kappa[0].abs() < TOLERANCE && kappa[1].abs() < TOLERANCE);
        }
        assert!(phase_field.curvature_phase(c, 1).abs() < TOLERANCE);
        let phase = phase_field.registry().phase_of(b).unwrap();
        assert_eq!(phase_field.phase_principal_curvatures(c, phase), [0.0, 0.0]);
    }

    #[test]
    fn bulk_cells_report_no_principal_curvatures() {
        let (phase_field, _, _) = flat(16);
        assert!(phase_field.principal_curvatures([0, 0, 0]).is_empty());
    }

    #[test]
    fn grain_boundary_of_a_disc_is_curved() {
        let (mut phase_field, _, grain) = disc(16, 4.0, Resolution::Single);
        phase_field.finalize_initialization(&periodic());
        let c = [12, 8, 0];
        assert!(phase_field.fields()[c].is_interface());

        assert!(phase_field.curvature_phase(c, 1) < 0.0);
        let kappa = phase_field
            .principal_curvatures(c)
            .into_iter()
            .find(|(id, _)| *id == grain)
            .map(|(_, k)| k)
            .unwrap();
        assert!(kappa[0].abs() < TOLERANCE);
        assert!(kappa[1] > 0.0);
    }
}
