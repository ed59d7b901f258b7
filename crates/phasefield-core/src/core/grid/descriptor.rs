use itertools::iproduct;
use serde::Deserialize;

/// Integer cell coordinate in local storage space. Halo cells carry negative
/// components or components beyond the local extent.
pub type Coord = [i64; 3];

#[inline]
pub fn shift(c: Coord, d: Coord) -> Coord {
    [c[0] + d[0], c[1] + d[1], c[2] + d[2]]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    #[default]
    Single,
    /// A fine grid at twice the linear density runs alongside the coarse one.
    Dual,
}

/// Geometry of the structured grid owned by one worker.
///
/// Extents are counted in cells. An axis is *active* when its global extent is
/// larger than one; inactive axes carry no halo and are skipped by every
/// stencil and neighbourhood loop.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDescriptor {
    pub nx: i64,
    pub ny: i64,
    pub nz: i64,
    pub total_nx: i64,
    pub total_ny: i64,
    pub total_nz: i64,
    pub offset_x: i64,
    pub offset_y: i64,
    pub offset_z: i64,
    pub dnx: i64,
    pub dny: i64,
    pub dnz: i64,
    pub dx: f64,
    /// Interface width in grid cells.
    pub iwidth: f64,
    pub bcells: i64,
    pub resolution: Resolution,
}

impl GridDescriptor {
    /// Number of active axes (1 to 3).
    pub fn active(&self) -> usize {
        (self.dnx + self.dny + self.dnz) as usize
    }

    pub fn active_axes(&self) -> [bool; 3] {
        [self.dnx != 0, self.dny != 0, self.dnz != 0]
    }

    pub fn dn(&self) -> Coord {
        [self.dnx, self.dny, self.dnz]
    }

    pub fn extent(&self) -> Coord {
        [self.nx, self.ny, self.nz]
    }

    /// Physical interface width.
    pub fn eta(&self) -> f64 {
        self.iwidth * self.dx
    }

    pub fn total_cells(&self) -> usize {
        (self.total_nx * self.total_ny * self.total_nz) as usize
    }

    pub fn local_cells(&self) -> usize {
        (self.nx * self.ny * self.nz) as usize
    }

    /// Halo width required by the phase-field storages, wide enough for the
    /// driving-force averaging neighbourhood.
    pub fn storage_halo(&self) -> i64 {
        match self.resolution {
            Resolution::Single => self.bcells.max(self.iwidth as i64 - 1),
            Resolution::Dual => self.bcells.max((self.iwidth / 2.0) as i64),
        }
    }

    /// Maps a global coordinate onto this worker's local coordinate, if the
    /// cell lies inside the owned sub-volume.
    pub fn contains_global(&self, global: Coord) -> Option<Coord> {
        let local = [
            global[0] - self.offset_x,
            global[1] - self.offset_y,
            global[2] - self.offset_z,
        ];
        let inside = (0..3).all(|a| local[a] >= 0 && local[a] < self.extent()[a]);
        inside.then_some(local)
    }

    /// Descriptor of the fine grid coupled to this one in dual resolution.
    pub fn doubled(&self) -> GridDescriptor {
        GridDescriptor {
            nx: self.nx * (1 + self.dnx),
            ny: self.ny * (1 + self.dny),
            nz: self.nz * (1 + self.dnz),
            total_nx: self.total_nx * (1 + self.dnx),
            total_ny: self.total_ny * (1 + self.dny),
            total_nz: self.total_nz * (1 + self.dnz),
            offset_x: self.offset_x * (1 + self.dnx),
            offset_y: self.offset_y * (1 + self.dny),
            offset_z: self.offset_z * (1 + self.dnz),
            dnx: self.dnx,
            dny: self.dny,
            dnz: self.dnz,
            dx: self.dx / 2.0,
            iwidth: self.iwidth * 2.0,
            bcells: self.bcells * 2,
            resolution: self.resolution,
        }
    }

    /// Fine sub-cells covering a coarse cell: `2^d` cells at
    /// `(1 + dN) * i + (di + 1) / 2` for `di` in `{-dN, +dN}`.
    pub fn fine_children(&self, coarse: Coord) -> impl Iterator<Item = (Coord, Coord)> + use<> {
        let [dnx, dny, dnz] = self.dn();
        iproduct!(
            (-dnx..=dnx).step_by(2),
            (-dny..=dny).step_by(2),
            (-dnz..=dnz).step_by(2)
        )
        .map(move |(di, dj, dk)| {
            let fine = [
                (1 + dnx) * coarse[0] + (di + 1) / 2,
                (1 + dny) * coarse[1] + (dj + 1) / 2,
                (1 + dnz) * coarse[2] + (dk + 1) / 2,
            ];
            (fine, [di, dj, dk])
        })
    }

    /// Offsets of the full `3^d` neighbourhood, the cell itself included.
    pub fn neighbourhood(&self) -> impl Iterator<Item = Coord> + use<> {
        let [dnx, dny, dnz] = self.dn();
        iproduct!(-dnx..=dnx, -dny..=dny, -dnz..=dnz).map(|(i, j, k)| [i, j, k])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn grid_2d(n: i64) -> GridDescriptor {
        GridDescriptor {
            nx: n,
            ny: n,
            nz: 1,
            total_nx: n,
            total_ny: n,
            total_nz: 1,
            offset_x: 0,
            offset_y: 0,
            offset_z: 0,
            dnx: 1,
            dny: 1,
            dnz: 0,
            dx: 1.0,
            iwidth: 4.0,
            bcells: 1,
            resolution: Resolution::Single,
        }
    }

    #[test]
    fn active_axes_follow_global_extent() {
        let grid = grid_2d(8);
        assert_eq!(grid.active(), 2);
        assert_eq!(grid.active_axes(), [true, true, false]);
        assert_eq!(grid.total_cells(), 64);
        assert!((grid.eta() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn doubled_grid_refines_only_active_axes() {
        let fine = grid_2d(8).doubled();
        assert_eq!(fine.extent(), [16, 16, 1]);
        assert!((fine.dx - 0.5).abs() < 1e-12);
        assert!((fine.eta() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn fine_children_cover_a_two_by_two_block_in_2d() {
        let grid = grid_2d(8);
        let mut children: Vec<Coord> = grid.fine_children([3, 5, 0]).map(|(c, _)| c).collect();
        children.sort();
        assert_eq!(children, vec![[6, 10, 0], [6, 11, 0], [7, 10, 0], [7, 11, 0]]);
    }

    #[test]
    fn contains_global_respects_worker_offset() {
        let mut grid = grid_2d(4);
        grid.offset_x = 4;
        grid.total_nx = 8;
        assert_eq!(grid.contains_global([5, 1, 0]), Some([1, 1, 0]));
        assert_eq!(grid.contains_global([1, 1, 0]), None);
    }

    #[test]
    fn storage_halo_covers_interface_width() {
        let mut grid = grid_2d(8);
        grid.iwidth = 6.0;
        assert_eq!(grid.storage_halo(), 5);
        grid.resolution = Resolution::Dual;
        assert_eq!(grid.storage_halo(), 3);
    }
}
