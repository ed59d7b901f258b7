use super::ids::FieldId;
use nalgebra::Vector3;

/// One field present in a cell together with its spatial derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldEntry {
    pub id: FieldId,
    pub value: f64,
    pub gradient: Vector3<f64>,
    pub laplacian: f64,
}

impl FieldEntry {
    pub fn new(id: FieldId, value: f64) -> Self {
        Self {
            id,
            value,
            gradient: Vector3::zeros(),
            laplacian: 0.0,
        }
    }
}

/// Position of a cell relative to the diffuse interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellFlag {
    /// Single field, no interface within stencil reach.
    #[default]
    Bulk,
    /// Within stencil reach of an interface cell; derivatives are needed.
    Band,
    /// More than one field present.
    Interface,
}

/// Sparse, id-ordered list of the fields present in one cell.
///
/// The vector is cleared rather than dropped between steps, so the
/// allocation is reused for the lifetime of the storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellFields {
    entries: Vec<FieldEntry>,
    flag: CellFlag,
}

impl CellFields {
    /// A bulk cell fully occupied by one field.
    pub fn single(id: FieldId) -> Self {
        Self {
            entries: vec![FieldEntry::new(id, 1.0)],
            flag: CellFlag::Bulk,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FieldEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldEntry> {
        self.entries.iter()
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [FieldEntry] {
        &mut self.entries
    }

    pub fn flag(&self) -> CellFlag {
        self.flag
    }

    pub(crate) fn set_flag(&mut self, flag: CellFlag) {
        self.flag = flag;
    }

    /// Flagged as holding more than one field. Zero-valued entries inserted
    /// by derivative evaluation do not promote a band cell.
    pub fn is_interface(&self) -> bool {
        self.flag == CellFlag::Interface
    }

    /// Interface cell or inside the stencil band around one.
    pub fn is_wide_interface(&self) -> bool {
        self.flag != CellFlag::Bulk
    }

    fn position(&self, id: FieldId) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.id.cmp(&id))
    }

    pub fn get(&self, id: FieldId) -> Option<&FieldEntry> {
        self.position(id).ok().map(|pos| &self.entries[pos])
    }

    pub fn contains(&self, id: FieldId) -> bool {
        self.position(id).is_ok()
    }

    /// Value of `id`, zero when the field is absent.
    pub fn value(&self, id: FieldId) -> f64 {
        self.get(id).map_or(0.0, |e| e.value)
    }

    fn entry_mut(&mut self, id: FieldId) -> &mut FieldEntry {
        let pos = match self.position(id) {
            Ok(pos) => pos,
            Err(pos) => {
                self.entries.insert(pos, FieldEntry::new(id, 0.0));
                pos
            }
        };
        &mut self.entries[pos]
    }

    pub fn set_value(&mut self, id: FieldId, value: f64) {
        self.entry_mut(id).value = value;
        self.promote();
    }

    pub fn add_value(&mut self, id: FieldId, value: f64) {
        self.entry_mut(id).value += value;
        self.promote();
    }

    fn promote(&mut self) {
        if self.entries.len() > 1 {
            self.flag = CellFlag::Interface;
        }
    }

    /// Entry with the largest value; ties resolve to the lowest id.
    pub fn majority(&self) -> Option<&FieldEntry> {
        self.entries
            .iter()
            .fold(None, |best: Option<&FieldEntry>, e| match best {
                Some(b) if b.value >= e.value => Some(b),
                _ => Some(e),
            })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.flag = CellFlag::Bulk;
    }

    pub fn clear_derivatives(&mut self) {
        for e in &mut self.entries {
            e.gradient = Vector3::zeros();
            e.laplacian = 0.0;
        }
    }

    /// Adds derivative contributions for `id`, inserting a zero-valued entry
    /// when the field is not yet present.
    pub(crate) fn add_derivatives(&mut self, id: FieldId, gradient: Vector3<f64>, laplacian: f64) {
        let entry = self.entry_mut(id);
        entry.gradient += gradient;
        entry.laplacian += laplacian;
    }

    /// Accumulates `weight * other` entry by entry, values and derivatives.
    pub fn accumulate(&mut self, other: &CellFields, weight: f64) {
        for e in &other.entries {
            let entry = self.entry_mut(e.id);
            entry.value += weight * e.value;
            entry.gradient += e.gradient * weight;
            entry.laplacian += weight * e.laplacian;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for e in &mut self.entries {
            e.value *= factor;
            e.gradient *= factor;
            e.laplacian *= factor;
        }
    }

    pub fn retain(&mut self, keep: impl FnMut(&FieldEntry) -> bool) {
        self.entries.retain(keep);
    }

    /// Restores the cell invariants: values clamped to `[0, 1]`, near-zero
    /// entries dropped unless `keep_zero` protects them, the remainder
    /// renormalized to sum to one, and the flag refreshed.
    pub fn finalize(&mut self, keep_zero: impl Fn(FieldId) -> bool) {
        for e in &mut self.entries {
            e.value = e.value.clamp(0.0, 1.0);
        }
        self.entries
            .retain(|e| e.value > f64::EPSILON || keep_zero(e.id));
        for e in &mut self.entries {
            if e.value <= f64::EPSILON {
                e.value = 0.0;
            }
        }

        let total: f64 = self.entries.iter().map(|e| e.value).sum();
        if total > 0.0 {
            for e in &mut self.entries {
                e.value /= total;
            }
        }

        self.flag = if self.entries.len() > 1 {
            CellFlag::Interface
        } else {
            CellFlag::Bulk
        };
    }

    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|e| e.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    const TOLERANCE: f64 = 1e-12;

    fn ids(n: usize) -> Vec<FieldId> {
        let mut map: SlotMap<FieldId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn entries_stay_sorted_and_unique() {
        let id = ids(3);
        let mut cell = CellFields::default();
        cell.set_value(id[2], 0.2);
        cell.set_value(id[0], 0.5);
        cell.add_value(id[2], 0.1);
        cell.set_value(id[1], 0.2);
        let order: Vec<FieldId> = cell.iter().map(|e| e.id).collect();
        assert_eq!(order, vec![id[0], id[1], id[2]]);
        assert!((cell.value(id[2]) - 0.3).abs() < TOLERANCE);
        assert_eq!(cell.flag(), CellFlag::Interface);
    }

    #[test]
    fn finalize_renormalizes_and_drops_vanished_fields() {
        let id = ids(3);
        let mut cell = CellFields::default();
        cell.set_value(id[0], 0.6);
        cell.set_value(id[1], 0.6);
        cell.set_value(id[2], -0.1);
        cell.finalize(|_| false);
        assert_eq!(cell.len(), 2);
        assert!((cell.sum() - 1.0).abs() < TOLERANCE);
        assert!((cell.value(id[0]) - 0.5).abs() < TOLERANCE);
    }

    #[test]
    fn finalize_keeps_protected_zero_entries() {
        let id = ids(2);
        let mut cell = CellFields::single(id[0]);
        cell.set_value(id[1], 0.0);
        cell.finalize(|f| f == id[1]);
        assert_eq!(cell.value(id[1]), 0.0);
        assert_eq!(cell.value(id[0]), 1.0);
        assert!(cell.is_interface());
    }

    #[test]
    fn finalize_of_single_survivor_gives_exactly_one() {
        let id = ids(2);
        let mut cell = CellFields::default();
        cell.set_value(id[0], 1.0000000000000002);
        cell.set_value(id[1], -2.0e-16);
        cell.finalize(|_| false);
        assert_eq!(cell.len(), 1);
        assert_eq!(cell.value(id[0]), 1.0);
        assert_eq!(cell.flag(), CellFlag::Bulk);
    }

    #[test]
    fn derivative_entries_do_not_promote_band_cells() {
        let id = ids(2);
        let mut cell = CellFields::single(id[0]);
        cell.set_flag(CellFlag::Band);
        cell.add_derivatives(id[1], Vector3::new(0.5, 0.0, 0.0), 0.25);
        assert_eq!(cell.len(), 2);
        assert!(!cell.is_interface());
        assert!(cell.is_wide_interface());
        assert_eq!(cell.value(id[1]), 0.0);
    }

    #[test]
    fn majority_picks_largest_value() {
        let id = ids(3);
        let mut cell = CellFields::default();
        cell.set_value(id[0], 0.2);
        cell.set_value(id[1], 0.5);
        cell.set_value(id[2], 0.3);
        assert_eq!(cell.majority().map(|e| e.id), Some(id[1]));
    }

    #[test]
    fn accumulate_and_scale_average_two_cells() {
        let id = ids(2);
        let a = CellFields::single(id[0]);
        let b = CellFields::single(id[1]);
        let mut avg = CellFields::default();
        avg.accumulate(&a, 1.0);
        avg.accumulate(&b, 1.0);
        avg.scale(0.5);
        assert_eq!(avg.value(id[0]), 0.5);
        assert_eq!(avg.value(id[1]), 0.5);
    }
}
