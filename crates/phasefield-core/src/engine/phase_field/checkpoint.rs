use super::PhaseField;
use super::level::Level;
use crate::core::grid::storage::for_each_value;
use crate::core::io::error::CheckpointError;
use crate::core::io::records::RecordsFile;
use crate::core::io::restart::{LevelDump, RestartDump, RestartFile};
use crate::core::io::traits::CheckpointFile;
use crate::core::models::cell::CellFields;
use crate::core::models::ids::FieldId;
use crate::core::models::pairs::PairIncrements;
use crate::core::models::registry::FieldRegistry;
use crate::engine::domain::Domain;
use std::path::{Path, PathBuf};
use tracing::info;

/// Paths of the restart dump and its field-record companion for `step`.
pub fn checkpoint_paths(dir: &Path, step: u64) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("PhaseField_{step}.dat")),
        dir.join(format!("FieldRecords_{step}.csv")),
    )
}

fn dump_level(level: &Level) -> LevelDump {
    let fields = &level.fields;
    LevelDump {
        extent: fields.extent(),
        cells: fields
            .interior()
            .into_iter()
            .map(|c| fields[c].iter().map(|e| (e.id.to_raw(), e.value)).collect())
            .collect(),
    }
}

fn validate_level(
    level: &Level,
    dump: &LevelDump,
    registry: &FieldRegistry,
) -> Result<(), CheckpointError> {
    let expected = level.fields.extent();
    if dump.extent != expected {
        return Err(CheckpointError::DimensionMismatch {
            expected,
            found: dump.extent,
        });
    }
    for entries in &dump.cells {
        if let Some(&(raw, _)) = entries
            .iter()
            .find(|(raw, _)| registry.get(FieldId::from_raw(*raw)).is_none())
        {
            return Err(CheckpointError::Corrupt(format!(
                "cell references unknown field id {raw}"
            )));
        }
    }
    Ok(())
}

fn load_level(level: &mut Level, dump: &LevelDump) {
    for_each_value(level.fields.as_mut_slice(), CellFields::clear);
    for_each_value(level.increments.as_mut_slice(), PairIncrements::clear);
    for (c, entries) in level.fields.interior().into_iter().zip(&dump.cells) {
        let cell = &mut level.fields[c];
        for &(raw, value) in entries {
            cell.set_value(FieldId::from_raw(raw), value);
        }
    }
}

impl PhaseField {
    /// Writes the values of every level and all field records for `step`
    /// into `dir`.
    pub fn write_checkpoint(&self, dir: &Path, step: u64) -> Result<(), CheckpointError> {
        let (values, records) = checkpoint_paths(dir, step);
        let levels = std::iter::once(&self.coarse)
            .chain(self.fine.as_ref())
            .map(dump_level)
            .collect();
        RestartFile::write_to_path(&RestartDump { levels }, &values)?;
        RecordsFile::write_to_path(&RecordsFile::rows(&self.registry), &records)?;
        info!(step, path = %values.display(), "Checkpoint written");
        Ok(())
    }

    /// Restores values and field records written by
    /// [`write_checkpoint`](Self::write_checkpoint), then finalizes.
    ///
    /// Every level is validated before anything is replaced, so a mismatch
    /// leaves the phase field untouched.
    pub fn read_checkpoint(
        &mut self,
        dir: &Path,
        step: u64,
        domain: &impl Domain,
    ) -> Result<(), CheckpointError> {
        let (values, records) = checkpoint_paths(dir, step);
        let rows = RecordsFile::read_from_path(&records)?;
        let registry = RecordsFile::restore(&rows)?;
        let dump = RestartFile::read_from_path(&values)?;

        let expected_levels = 1 + usize::from(self.fine.is_some());
        if dump.levels.len() != expected_levels {
            return Err(CheckpointError::Corrupt(format!(
                "expected {expected_levels} grid levels, found {}",
                dump.levels.len()
            )));
        }
        validate_level(&self.coarse, &dump.levels[0], &registry)?;
        if let Some(fine) = self.fine.as_ref() {
            validate_level(fine, &dump.levels[1], &registry)?;
        }

        load_level(&mut self.coarse, &dump.levels[0]);
        if let Some(fine) = self.fine.as_mut() {
            load_level(fine, &dump.levels[1]);
        }
        self.registry = registry;
        self.finalize(domain);

        info!(
            step,
            fields = self.registry.existing().count(),
            "Restart loaded"
        );
        Ok(())
    }
}
