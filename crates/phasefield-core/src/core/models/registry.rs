use super::ids::FieldId;
use super::record::{FieldRecord, GrainStage};
use slotmap::{SecondaryMap, SlotMap};

/// Aggregate produced by [`FieldRegistry::update_volumes`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VolumeSummary {
    /// At least one existing field is still below its reference volume.
    pub nucleation_present: bool,
    /// Volume fraction of each phase over the whole domain.
    pub phase_fractions: Vec<f64>,
    pub existing_fields: usize,
}

/// Owns every field record for the lifetime of a run.
///
/// Records are never removed. A field whose volume drops to zero is marked
/// non-existent and its id stays valid, so external holders of raw ids never
/// observe reuse.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    records: SlotMap<FieldId, FieldRecord>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a non-existent `Stable` record for `phase`.
    pub fn add_field(&mut self, phase: usize) -> FieldId {
        self.records.insert(FieldRecord::new(phase))
    }

    pub fn insert(&mut self, record: FieldRecord) -> FieldId {
        self.records.insert(record)
    }

    pub fn get(&self, id: FieldId) -> Option<&FieldRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: FieldId) -> Option<&mut FieldRecord> {
        self.records.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &FieldRecord)> {
        self.records.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.records.keys()
    }

    pub fn existing(&self) -> impl Iterator<Item = (FieldId, &FieldRecord)> {
        self.records.iter().filter(|(_, r)| r.exists)
    }

    pub fn phase_of(&self, id: FieldId) -> Option<usize> {
        self.records.get(id).map(|r| r.phase)
    }

    pub fn is_seed(&self, id: FieldId) -> bool {
        self.records.get(id).is_some_and(FieldRecord::is_seed)
    }

    pub fn volume_ratio(&self, id: FieldId) -> f64 {
        self.records.get(id).map_or(1.0, |r| r.volume_ratio)
    }

    /// Applies freshly reduced per-field volumes and advances lifecycles.
    ///
    /// `volumes` holds one entry per field (missing entries count as zero),
    /// `total_cells` is the global cell count used for phase fractions.
    pub fn update_volumes(
        &mut self,
        volumes: &SecondaryMap<FieldId, f64>,
        total_cells: usize,
        n_phases: usize,
    ) -> VolumeSummary {
        let mut summary = VolumeSummary {
            phase_fractions: vec![0.0; n_phases],
            ..Default::default()
        };
        let mut unstable = 0usize;

        for (id, record) in self.records.iter_mut() {
            let volume = volumes.get(id).copied().unwrap_or(0.0);
            record.volume = volume;
            record.max_volume = record.max_volume.max(volume);
            record.volume_ratio = if record.ref_volume > 0.0 {
                record.max_volume / record.ref_volume
            } else {
                1.0
            };

            if record.exists && volume <= 0.0 {
                record.exists = false;
                record.stage = GrainStage::Stable;
                record.volume = 0.0;
                record.max_volume = 0.0;
                record.volume_ratio = 1.0;
            } else if volume > 0.0 {
                record.exists = true;
                if record.stage == GrainStage::Seed {
                    record.stage = GrainStage::Nucleus;
                }
                if record.volume_ratio > 1.0 {
                    record.stage = GrainStage::Stable;
                    record.volume_ratio = 1.0;
                }
                if record.stage != GrainStage::Stable {
                    unstable += 1;
                }
            }

            if record.exists {
                summary.existing_fields += 1;
                if let Some(fraction) = summary.phase_fractions.get_mut(record.phase) {
                    *fraction += record.volume;
                }
            }
        }

        if total_cells > 0 {
            for fraction in &mut summary.phase_fractions {
                *fraction /= total_cells as f64;
            }
        }
        summary.nucleation_present = unstable > 0;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    fn volumes(pairs: &[(FieldId, f64)]) -> SecondaryMap<FieldId, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn new_fields_start_absent_and_stable() {
        let mut registry = FieldRegistry::new();
        let id = registry.add_field(1);
        let record = registry.get(id).unwrap();
        assert!(!record.exists);
        assert_eq!(record.stage, GrainStage::Stable);
        assert_eq!(record.phase, 1);
    }

    #[test]
    fn seed_advances_to_nucleus_then_stable() {
        let mut registry = FieldRegistry::new();
        let id = registry.add_field(0);
        {
            let r = registry.get_mut(id).unwrap();
            r.stage = GrainStage::Seed;
            r.ref_volume = 10.0;
            r.volume_ratio = 0.0;
        }

        let summary = registry.update_volumes(&volumes(&[(id, 4.0)]), 100, 1);
        let r = registry.get(id).unwrap();
        assert!(r.exists);
        assert_eq!(r.stage, GrainStage::Nucleus);
        assert!((r.volume_ratio - 0.4).abs() < TOLERANCE);
        assert!(summary.nucleation_present);
        assert!((summary.phase_fractions[0] - 0.04).abs() < TOLERANCE);

        let summary = registry.update_volumes(&volumes(&[(id, 12.0)]), 100, 1);
        let r = registry.get(id).unwrap();
        assert_eq!(r.stage, GrainStage::Stable);
        assert_eq!(r.volume_ratio, 1.0);
        assert!(!summary.nucleation_present);
    }

    #[test]
    fn vanished_field_keeps_its_id() {
        let mut registry = FieldRegistry::new();
        let a = registry.add_field(0);
        let b = registry.add_field(0);
        registry.update_volumes(&volumes(&[(a, 5.0), (b, 5.0)]), 10, 1);
        let summary = registry.update_volumes(&volumes(&[(b, 10.0)]), 10, 1);

        let gone = registry.get(a).unwrap();
        assert!(!gone.exists);
        assert_eq!(gone.volume, 0.0);
        assert_eq!(gone.max_volume, 0.0);
        assert_eq!(summary.existing_fields, 1);

        let c = registry.add_field(0);
        assert_ne!(c, a);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn zero_reference_volume_reads_as_full_ratio() {
        let mut registry = FieldRegistry::new();
        let id = registry.add_field(0);
        registry.update_volumes(&volumes(&[(id, 3.0)]), 10, 1);
        assert_eq!(registry.volume_ratio(id), 1.0);
    }
}
