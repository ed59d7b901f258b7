use super::descriptor::{Coord, GridDescriptor};
use itertools::iproduct;
use std::ops::{Index, IndexMut};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Dense 3D storage of per-cell values with a halo around the interior.
///
/// The halo exists only along active axes. Coordinates address the interior
/// as `0..n` and the halo as `-h..0` and `n..n+h`.
#[derive(Debug, Clone, PartialEq)]
pub struct Storage3D<T> {
    data: Vec<T>,
    extent: Coord,
    halo: Coord,
    allocated: Coord,
}

impl<T: Clone + Default> Storage3D<T> {
    pub fn new(grid: &GridDescriptor, halo: i64) -> Self {
        Self::with_extent(grid.extent(), grid.active_axes(), halo)
    }

    pub fn with_extent(extent: Coord, active: [bool; 3], halo: i64) -> Self {
        let halo = [
            if active[0] { halo } else { 0 },
            if active[1] { halo } else { 0 },
            if active[2] { halo } else { 0 },
        ];
        let allocated = [
            extent[0] + 2 * halo[0],
            extent[1] + 2 * halo[1],
            extent[2] + 2 * halo[2],
        ];
        let len = (allocated[0] * allocated[1] * allocated[2]) as usize;
        Self {
            data: vec![T::default(); len],
            extent,
            halo,
            allocated,
        }
    }
}

impl<T> Storage3D<T> {
    pub fn extent(&self) -> Coord {
        self.extent
    }

    pub fn halo(&self) -> Coord {
        self.halo
    }

    /// Halo width along the widest active axis.
    pub fn halo_width(&self) -> i64 {
        self.halo.iter().copied().max().unwrap_or(0)
    }

    #[inline]
    pub fn contains(&self, c: Coord) -> bool {
        (0..3).all(|a| c[a] >= -self.halo[a] && c[a] < self.extent[a] + self.halo[a])
    }

    #[inline]
    pub fn is_interior(&self, c: Coord) -> bool {
        (0..3).all(|a| c[a] >= 0 && c[a] < self.extent[a])
    }

    #[inline]
    fn offset(&self, c: Coord) -> usize {
        debug_assert!(self.contains(c), "cell {c:?} outside allocated storage");
        let i = (c[0] + self.halo[0]) as usize;
        let j = (c[1] + self.halo[1]) as usize;
        let k = (c[2] + self.halo[2]) as usize;
        (i * self.allocated[1] as usize + j) * self.allocated[2] as usize + k
    }

    pub fn get(&self, c: Coord) -> Option<&T> {
        self.contains(c).then(|| &self.data[self.offset(c)])
    }

    pub fn get_mut(&mut self, c: Coord) -> Option<&mut T> {
        if self.contains(c) {
            let offset = self.offset(c);
            Some(&mut self.data[offset])
        } else {
            None
        }
    }

    /// Coordinates of the interior extended by `layers` halo layers along
    /// active axes (clamped to the allocated halo), in x-major order.
    pub fn cells(&self, layers: i64) -> Vec<Coord> {
        let l = [
            layers.min(self.halo[0]),
            layers.min(self.halo[1]),
            layers.min(self.halo[2]),
        ];
        iproduct!(
            -l[0]..self.extent[0] + l[0],
            -l[1]..self.extent[1] + l[1],
            -l[2]..self.extent[2] + l[2]
        )
        .map(|(i, j, k)| [i, j, k])
        .collect()
    }

    pub fn interior(&self) -> Vec<Coord> {
        self.cells(0)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    /// Every allocated value, halo included.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub(crate) fn copy_cell(&mut self, from: Coord, to: Coord)
    where
        T: Clone,
    {
        let src = self.offset(from);
        let dst = self.offset(to);
        if src != dst {
            let value = self.data[src].clone();
            self.data[dst] = value;
        }
    }
}

impl<T> Index<Coord> for Storage3D<T> {
    type Output = T;

    #[inline]
    fn index(&self, c: Coord) -> &T {
        &self.data[self.offset(c)]
    }
}

impl<T> IndexMut<Coord> for Storage3D<T> {
    #[inline]
    fn index_mut(&mut self, c: Coord) -> &mut T {
        let offset = self.offset(c);
        &mut self.data[offset]
    }
}

/// Corner cells and trilinear weights of a fractional position. Inactive axes
/// contribute a single corner; corners with zero weight are skipped.
pub fn interpolation_weights(pos: [f64; 3], active: [bool; 3]) -> Vec<(Coord, f64)> {
    let base: Coord = std::array::from_fn(|a| {
        if active[a] {
            pos[a].floor() as i64
        } else {
            pos[a].round() as i64
        }
    });
    let frac: [f64; 3] = std::array::from_fn(|a| {
        if active[a] {
            pos[a] - base[a] as f64
        } else {
            0.0
        }
    });

    iproduct!(
        0..=active[0] as i64,
        0..=active[1] as i64,
        0..=active[2] as i64
    )
    .filter_map(|(i, j, k)| {
        let d = [i, j, k];
        let weight: f64 = (0..3)
            .map(|a| if d[a] == 1 { frac[a] } else { 1.0 - frac[a] })
            .product();
        (weight > 0.0).then_some(([base[0] + i, base[1] + j, base[2] + k], weight))
    })
    .collect()
}

/// Evaluates `f` for every coordinate, in parallel when the `parallel`
/// feature is enabled. Results come back in input order so that the caller
/// can apply them in a separate write pass.
pub fn map_cells<R, F>(cells: &[Coord], f: F) -> Vec<R>
where
    R: Send,
    F: Fn(Coord) -> R + Sync + Send,
{
    #[cfg(not(feature = "parallel"))]
    let results = cells.iter().map(|&c| f(c)).collect();

    #[cfg(feature = "parallel")]
    let results = cells.par_iter().map(|&c| f(c)).collect();

    results
}

/// Applies `f` to every allocated value independently.
pub fn for_each_value<T, F>(values: &mut [T], f: F)
where
    T: Send,
    F: Fn(&mut T) + Sync + Send,
{
    #[cfg(not(feature = "parallel"))]
    values.iter_mut().for_each(f);

    #[cfg(feature = "parallel")]
    values.par_iter_mut().for_each(f);
}

/// Applies `f` to matching values of two storages sharing one layout.
pub fn for_each_zipped<A, B, F>(a: &mut [A], b: &mut [B], f: F)
where
    A: Send,
    B: Send,
    F: Fn(&mut A, &mut B) + Sync + Send,
{
    debug_assert_eq!(a.len(), b.len());

    #[cfg(not(feature = "parallel"))]
    a.iter_mut().zip(b.iter_mut()).for_each(|(x, y)| f(x, y));

    #[cfg(feature = "parallel")]
    a.par_iter_mut()
        .zip(b.par_iter_mut())
        .for_each(|(x, y)| f(x, y));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halo_is_allocated_only_on_active_axes() {
        let storage: Storage3D<f64> = Storage3D::with_extent([4, 3, 1], [true, true, false], 2);
        assert_eq!(storage.halo(), [2, 2, 0]);
        assert!(storage.contains([-2, -2, 0]));
        assert!(storage.contains([5, 4, 0]));
        assert!(!storage.contains([0, 0, 1]));
        assert!(!storage.contains([6, 0, 0]));
    }

    #[test]
    fn index_roundtrips_through_halo_coordinates() {
        let mut storage: Storage3D<i64> = Storage3D::with_extent([3, 3, 1], [true, true, false], 1);
        for c in storage.cells(1) {
            storage[c] = c[0] * 100 + c[1];
        }
        assert_eq!(storage[[-1, 2, 0]], -98);
        assert_eq!(storage[[3, -1, 0]], 299);
        assert_eq!(storage.get([4, 0, 0]), None);
    }

    #[test]
    fn cells_with_layers_are_clamped_to_halo() {
        let storage: Storage3D<u8> = Storage3D::with_extent([2, 2, 1], [true, true, false], 1);
        assert_eq!(storage.interior().len(), 4);
        assert_eq!(storage.cells(1).len(), 16);
        assert_eq!(storage.cells(5).len(), 16);
    }

    #[test]
    fn interpolation_weights_sum_to_one_on_active_axes() {
        let corners = interpolation_weights([1.25, 2.75, 0.0], [true, true, false]);
        assert_eq!(corners.len(), 4);
        let total: f64 = corners.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-12);
        let nearest = corners
            .iter()
            .find(|(c, _)| *c == [1, 3, 0])
            .map(|(_, w)| *w);
        assert_eq!(nearest, Some(0.75 * 0.75));
    }

    #[test]
    fn interpolation_at_a_cell_centre_hits_one_corner() {
        let corners = interpolation_weights([2.0, 0.0, 0.0], [true, false, false]);
        assert_eq!(corners, vec![([2, 0, 0], 1.0)]);
    }

    #[test]
    fn map_cells_preserves_input_order() {
        let cells = vec![[0, 0, 0], [1, 0, 0], [2, 0, 0]];
        let doubled = map_cells(&cells, |c| c[0] * 2);
        assert_eq!(doubled, vec![0, 2, 4]);
    }
}
