use super::ids::FieldId;

/// Pending value change between two fields of one cell.
///
/// The pair is stored with `a < b`. Positive values move fraction from `b`
/// to `a`. The two channels are accumulated independently: `v1` carries the
/// driving-force contribution and `v2` the interface-curvature contribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairIncrement {
    pub a: FieldId,
    pub b: FieldId,
    pub v1: f64,
    pub v2: f64,
}

impl PairIncrement {
    pub fn total(&self) -> f64 {
        self.v1 + self.v2
    }

    pub fn touches(&self, id: FieldId) -> bool {
        self.a == id || self.b == id
    }
}

/// Sparse per-cell map of pairwise increments keyed by unordered id pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairIncrements {
    pairs: Vec<PairIncrement>,
}

/// Canonical ordering of a pair and the sign to apply to a directional value.
#[inline]
fn canonical(a: FieldId, b: FieldId) -> (FieldId, FieldId, f64) {
    if a < b { (a, b, 1.0) } else { (b, a, -1.0) }
}

impl PairIncrements {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PairIncrement> {
        self.pairs.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, PairIncrement> {
        self.pairs.iter_mut()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    fn position(&self, a: FieldId, b: FieldId) -> Result<usize, usize> {
        self.pairs
            .binary_search_by(|p| (p.a, p.b).cmp(&(a, b)))
    }

    fn slot(&mut self, a: FieldId, b: FieldId) -> &mut PairIncrement {
        let pos = match self.position(a, b) {
            Ok(pos) => pos,
            Err(pos) => {
                self.pairs.insert(
                    pos,
                    PairIncrement {
                        a,
                        b,
                        v1: 0.0,
                        v2: 0.0,
                    },
                );
                pos
            }
        };
        &mut self.pairs[pos]
    }

    /// Adds `value` (growth of `a` at the expense of `b`) to the first channel.
    pub fn add_asym1(&mut self, a: FieldId, b: FieldId, value: f64) {
        if a == b {
            return;
        }
        let (lo, hi, sign) = canonical(a, b);
        self.slot(lo, hi).v1 += sign * value;
    }

    /// Adds `value` (growth of `a` at the expense of `b`) to the second channel.
    pub fn add_asym2(&mut self, a: FieldId, b: FieldId, value: f64) {
        if a == b {
            return;
        }
        let (lo, hi, sign) = canonical(a, b);
        self.slot(lo, hi).v2 += sign * value;
    }

    pub fn get_asym1(&self, a: FieldId, b: FieldId) -> f64 {
        let (lo, hi, sign) = canonical(a, b);
        self.position(lo, hi)
            .map_or(0.0, |pos| sign * self.pairs[pos].v1)
    }

    pub fn get_asym2(&self, a: FieldId, b: FieldId) -> f64 {
        let (lo, hi, sign) = canonical(a, b);
        self.position(lo, hi)
            .map_or(0.0, |pos| sign * self.pairs[pos].v2)
    }

    /// Sum of both channels in the direction `a` grows.
    pub fn get_total(&self, a: FieldId, b: FieldId) -> f64 {
        self.get_asym1(a, b) + self.get_asym2(a, b)
    }

    pub fn retain(&mut self, keep: impl FnMut(&PairIncrement) -> bool) {
        self.pairs.retain(keep);
    }

    /// Accumulates `weight * other`, channel by channel.
    pub fn accumulate(&mut self, other: &PairIncrements, weight: f64) {
        for p in &other.pairs {
            let slot = self.slot(p.a, p.b);
            slot.v1 += weight * p.v1;
            slot.v2 += weight * p.v2;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for p in &mut self.pairs {
            p.v1 *= factor;
            p.v2 *= factor;
        }
    }
}
