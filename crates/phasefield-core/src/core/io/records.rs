use super::error::CheckpointError;
use super::traits::CheckpointFile;
use crate::core::models::ids::{FieldId, RawFieldId};
use crate::core::models::record::{FieldRecord, GrainStage};
use crate::core::models::registry::FieldRegistry;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// One CSV row of the field-record companion file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRow {
    pub id: RawFieldId,
    pub phase: usize,
    pub stage: GrainStage,
    pub variant: usize,
    pub parent: Option<RawFieldId>,
    pub q_w: f64,
    pub q_i: f64,
    pub q_j: f64,
    pub q_k: f64,
    pub rcm_x: f64,
    pub rcm_y: f64,
    pub rcm_z: f64,
    pub volume: f64,
    pub max_volume: f64,
    pub ref_volume: f64,
    pub volume_ratio: f64,
    pub exists: bool,
    pub growth_constraint_violated: bool,
}

impl FieldRow {
    pub fn from_record(id: FieldId, record: &FieldRecord) -> Self {
        let q = record.orientation.quaternion();
        Self {
            id: id.to_raw(),
            phase: record.phase,
            stage: record.stage,
            variant: record.variant,
            parent: record.parent,
            q_w: q.w,
            q_i: q.i,
            q_j: q.j,
            q_k: q.k,
            rcm_x: record.rcm.x,
            rcm_y: record.rcm.y,
            rcm_z: record.rcm.z,
            volume: record.volume,
            max_volume: record.max_volume,
            ref_volume: record.ref_volume,
            volume_ratio: record.volume_ratio,
            exists: record.exists,
            growth_constraint_violated: record.growth_constraint_violated,
        }
    }

    pub fn to_record(&self) -> FieldRecord {
        FieldRecord {
            phase: self.phase,
            stage: self.stage,
            variant: self.variant,
            parent: self.parent,
            orientation: UnitQuaternion::from_quaternion(Quaternion::new(
                self.q_w, self.q_i, self.q_j, self.q_k,
            )),
            rcm: Vector3::new(self.rcm_x, self.rcm_y, self.rcm_z),
            volume: self.volume,
            max_volume: self.max_volume,
            ref_volume: self.ref_volume,
            volume_ratio: self.volume_ratio,
            exists: self.exists,
            growth_constraint_violated: self.growth_constraint_violated,
        }
    }
}

/// CSV companion of the restart file holding every field record in
/// insertion order.
pub struct RecordsFile;

impl RecordsFile {
    pub fn rows(registry: &FieldRegistry) -> Vec<FieldRow> {
        registry
            .iter()
            .map(|(id, record)| FieldRow::from_record(id, record))
            .collect()
    }

    /// Rebuilds a registry by re-inserting the rows in order. Every
    /// re-created id must equal the stored one, otherwise external raw ids
    /// and the restart values would point at different fields.
    pub fn restore(rows: &[FieldRow]) -> Result<FieldRegistry, CheckpointError> {
        let mut registry = FieldRegistry::new();
        for row in rows {
            let id = registry.insert(row.to_record());
            if id.to_raw() != row.id {
                return Err(CheckpointError::RegistryMismatch {
                    expected: row.id,
                    found: id.to_raw(),
                });
            }
        }
        Ok(registry)
    }
}

impl CheckpointFile for RecordsFile {
    type Data = Vec<FieldRow>;
    type Error = CheckpointError;

    fn read_from(reader: &mut impl Read) -> Result<Vec<FieldRow>, CheckpointError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let rows = csv_reader
            .deserialize::<FieldRow>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn write_to(data: &Vec<FieldRow>, writer: &mut impl Write) -> Result<(), CheckpointError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in data {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;
    use tempfile::tempdir;

    fn registry() -> FieldRegistry {
        let mut registry = FieldRegistry::new();
        let matrix = registry.add_field(0);
        let grain = registry.add_field(1);
        let r = registry.get_mut(grain).unwrap();
        r.stage = GrainStage::Seed;
        r.parent = Some(matrix.to_raw());
        r.rcm = Vector3::new(4.0, 5.0, 0.0);
        r.orientation = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        r.ref_volume = 50.0;
        r.volume_ratio = 0.0;
        registry
    }

    #[test]
    fn registry_survives_a_csv_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("FieldRecords_0.csv");
        let original = registry();
        RecordsFile::write_to_path(&RecordsFile::rows(&original), &path).unwrap();

        let rows = RecordsFile::read_from_path(&path).unwrap();
        let restored = RecordsFile::restore(&rows).unwrap();
        let ids: Vec<_> = original.ids().collect();
        assert_eq!(restored.ids().collect::<Vec<_>>(), ids);

        let grain = restored.get(ids[1]).unwrap();
        assert_eq!(grain.stage, GrainStage::Seed);
        assert_eq!(grain.parent, Some(ids[0].to_raw()));
        assert_eq!(grain.rcm, Vector3::new(4.0, 5.0, 0.0));
        let angle = grain
            .orientation
            .angle_to(&original.get(ids[1]).unwrap().orientation);
        assert!(angle < 1e-9);
    }

    #[test]
    fn out_of_order_rows_are_rejected() {
        let mut rows = RecordsFile::rows(&registry());
        rows.swap(0, 1);
        let result = RecordsFile::restore(&rows);
        assert!(matches!(result, Err(CheckpointError::RegistryMismatch { .. })));
    }

    #[test]
    fn raw_ids_match_a_fresh_slotmap() {
        let mut map: SlotMap<FieldId, ()> = SlotMap::with_key();
        let first = map.insert(());
        let rows = RecordsFile::rows(&registry());
        assert_eq!(rows[0].id, first.to_raw());
    }
}
