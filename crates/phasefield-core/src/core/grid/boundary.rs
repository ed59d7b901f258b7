use super::descriptor::Coord;
use super::storage::Storage3D;
use itertools::iproduct;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryKind {
    #[default]
    Periodic,
    /// Halo repeats the outermost interior layer.
    NoFlux,
    /// Halo reflects the interior about the face.
    Mirror,
    /// Halo keeps whatever it was initialized with.
    Fixed,
}

/// Boundary condition for each of the six faces of a worker's sub-volume
/// that has no neighbouring worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BoundaryConditions {
    pub x0: BoundaryKind,
    pub xn: BoundaryKind,
    pub y0: BoundaryKind,
    pub yn: BoundaryKind,
    pub z0: BoundaryKind,
    pub zn: BoundaryKind,
}

impl BoundaryConditions {
    pub fn uniform(kind: BoundaryKind) -> Self {
        Self {
            x0: kind,
            xn: kind,
            y0: kind,
            yn: kind,
            z0: kind,
            zn: kind,
        }
    }

    fn faces(&self, axis: usize) -> (BoundaryKind, BoundaryKind) {
        match axis {
            0 => (self.x0, self.xn),
            1 => (self.y0, self.yn),
            _ => (self.z0, self.zn),
        }
    }

    pub fn is_periodic(&self, axis: usize) -> bool {
        let (lo, hi) = self.faces(axis);
        lo == BoundaryKind::Periodic && hi == BoundaryKind::Periodic
    }

    /// Refreshes the halo of every active axis. Axes are processed in x, y, z
    /// order over the full allocated range of the other axes, so edge and
    /// corner cells end up consistent.
    pub fn apply<T: Clone>(&self, storage: &mut Storage3D<T>) {
        for axis in 0..3 {
            self.apply_axis(storage, axis);
        }
    }

    fn apply_axis<T: Clone>(&self, storage: &mut Storage3D<T>, axis: usize) {
        let halo = storage.halo();
        let h = halo[axis];
        if h == 0 {
            return;
        }
        let n = storage.extent()[axis];
        let (lo, hi) = self.faces(axis);

        let (u, v) = match axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };
        let extent = storage.extent();
        let u_range = -halo[u]..extent[u] + halo[u];
        let v_range = -halo[v]..extent[v] + halo[v];

        for (layer, a, b) in iproduct!(1..=h, u_range, v_range) {
            let place = |pos: i64| -> Coord {
                let mut c = [0; 3];
                c[axis] = pos;
                c[u] = a;
                c[v] = b;
                c
            };

            if let Some(src) = source_index(lo, -layer, n) {
                storage.copy_cell(place(src), place(-layer));
            }
            if let Some(src) = source_index(hi, n - 1 + layer, n) {
                storage.copy_cell(place(src), place(n - 1 + layer));
            }
        }
    }
}

/// Interior index that feeds halo index `pos` under boundary `kind`.
fn source_index(kind: BoundaryKind, pos: i64, n: i64) -> Option<i64> {
    match kind {
        BoundaryKind::Periodic => Some(pos.rem_euclid(n)),
        BoundaryKind::NoFlux => Some(pos.clamp(0, n - 1)),
        BoundaryKind::Mirror => {
            let reflected = if pos < 0 { -pos - 1 } else { 2 * n - 1 - pos };
            Some(reflected.clamp(0, n - 1))
        }
        BoundaryKind::Fixed => None,
    }
}
