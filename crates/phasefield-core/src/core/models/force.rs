use super::ids::FieldId;

/// Driving-force state between two coexisting fields of one cell, stored with
/// `a < b`. `raw`, `tmp` and `average` are antisymmetric in the pair order;
/// `weight` is symmetric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceSample {
    pub a: FieldId,
    pub b: FieldId,
    pub raw: f64,
    pub tmp: f64,
    pub average: f64,
    pub weight: f64,
}

impl ForceSample {
    fn new(a: FieldId, b: FieldId) -> Self {
        Self {
            a,
            b,
            raw: 0.0,
            tmp: 0.0,
            average: 0.0,
            weight: 0.0,
        }
    }
}

/// Sparse per-cell list of driving-force samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellForces {
    samples: Vec<ForceSample>,
}

#[inline]
fn canonical(a: FieldId, b: FieldId) -> (FieldId, FieldId, f64) {
    if a < b { (a, b, 1.0) } else { (b, a, -1.0) }
}

impl CellForces {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ForceSample> {
        self.samples.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ForceSample> {
        self.samples.iter_mut()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    fn position(&self, a: FieldId, b: FieldId) -> Result<usize, usize> {
        self.samples.binary_search_by(|s| (s.a, s.b).cmp(&(a, b)))
    }

    fn slot(&mut self, a: FieldId, b: FieldId) -> &mut ForceSample {
        let pos = match self.position(a, b) {
            Ok(pos) => pos,
            Err(pos) => {
                self.samples.insert(pos, ForceSample::new(a, b));
                pos
            }
        };
        &mut self.samples[pos]
    }

    pub fn sample(&self, a: FieldId, b: FieldId) -> Option<&ForceSample> {
        let (lo, hi, _) = canonical(a, b);
        self.position(lo, hi).ok().map(|pos| &self.samples[pos])
    }

    /// Adds a raw driving force favouring growth of `a` over `b`.
    pub fn add_raw(&mut self, a: FieldId, b: FieldId, value: f64) {
        if a == b {
            return;
        }
        let (lo, hi, sign) = canonical(a, b);
        self.slot(lo, hi).raw += sign * value;
    }

    pub fn set_weight(&mut self, a: FieldId, b: FieldId, weight: f64) {
        if a == b {
            return;
        }
        let (lo, hi, _) = canonical(a, b);
        self.slot(lo, hi).weight = weight;
    }

    pub fn raw(&self, a: FieldId, b: FieldId) -> f64 {
        let (lo, hi, sign) = canonical(a, b);
        self.position(lo, hi).map_or(0.0, |p| sign * self.samples[p].raw)
    }

    pub fn tmp(&self, a: FieldId, b: FieldId) -> f64 {
        let (lo, hi, sign) = canonical(a, b);
        self.position(lo, hi).map_or(0.0, |p| sign * self.samples[p].tmp)
    }

    pub fn average(&self, a: FieldId, b: FieldId) -> f64 {
        let (lo, hi, sign) = canonical(a, b);
        self.position(lo, hi)
            .map_or(0.0, |p| sign * self.samples[p].average)
    }

    pub fn weight(&self, a: FieldId, b: FieldId) -> f64 {
        let (lo, hi, _) = canonical(a, b);
        self.position(lo, hi).map_or(0.0, |p| self.samples[p].weight)
    }

    /// Accumulates `w * other` into the force components and `w` into the
    /// weight of every sample `other` holds.
    pub fn add_all(&mut self, other: &CellForces, w: f64) {
        for s in &other.samples {
            let slot = self.slot(s.a, s.b);
            slot.raw += w * s.raw;
            slot.tmp += w * s.tmp;
            slot.average += w * s.average;
            slot.weight += w;
        }
    }

    pub fn retain(&mut self, keep: impl FnMut(&ForceSample) -> bool) {
        self.samples.retain(keep);
    }
}
