use super::error::CheckpointError;
use super::traits::CheckpointFile;
use crate::core::models::ids::RawFieldId;
use std::io::{self, Read, Write};

/// Values of one grid level, interior cells only, in x-major order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LevelDump {
    pub extent: [i64; 3],
    pub cells: Vec<Vec<(RawFieldId, f64)>>,
}

/// Contents of a restart file: the coarse level, followed by the fine level
/// in dual resolution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestartDump {
    pub levels: Vec<LevelDump>,
}

/// Little-endian binary restart format.
///
/// Each level starts with `nx, ny, nz` as `i32`, followed by every interior
/// cell as `count: u64` and `count` records of
/// `(id: u64, value: f64, gradient: [f64; 3], laplacian: f64)`. Derivatives
/// are written as zeros and recomputed after loading.
pub struct RestartFile;

const DERIVATIVE_SLOTS: usize = 4;

fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N], CheckpointError> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            CheckpointError::Corrupt("unexpected end of restart data".to_string())
        }
        _ => CheckpointError::Io(e),
    })?;
    Ok(buf)
}

/// Reads a level header, or `None` at a clean end of stream.
fn read_header(reader: &mut impl Read) -> Result<Option<[i64; 3]>, CheckpointError> {
    let mut buf = [0u8; 12];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(CheckpointError::Corrupt(
                    "truncated level header".to_string(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let dim = |i: usize| {
        i32::from_le_bytes([buf[4 * i], buf[4 * i + 1], buf[4 * i + 2], buf[4 * i + 3]]) as i64
    };
    Ok(Some([dim(0), dim(1), dim(2)]))
}

impl CheckpointFile for RestartFile {
    type Data = RestartDump;
    type Error = CheckpointError;

    fn read_from(reader: &mut impl Read) -> Result<RestartDump, CheckpointError> {
        let mut dump = RestartDump::default();
        while let Some(extent) = read_header(reader)? {
            if extent.iter().any(|&n| n <= 0) {
                return Err(CheckpointError::Corrupt(format!(
                    "non-positive grid extent {extent:?}"
                )));
            }
            let n_cells = (extent[0] * extent[1] * extent[2]) as usize;
            let mut cells = Vec::with_capacity(n_cells);
            for _ in 0..n_cells {
                let count = u64::from_le_bytes(read_array(reader)?) as usize;
                let mut entries = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let id = u64::from_le_bytes(read_array(reader)?);
                    let value = f64::from_le_bytes(read_array(reader)?);
                    for _ in 0..DERIVATIVE_SLOTS {
                        read_array::<8>(reader)?;
                    }
                    entries.push((id, value));
                }
                cells.push(entries);
            }
            dump.levels.push(LevelDump { extent, cells });
        }
        Ok(dump)
    }

    fn write_to(data: &RestartDump, writer: &mut impl Write) -> Result<(), CheckpointError> {
        for level in &data.levels {
            for n in level.extent {
                let n = i32::try_from(n).map_err(|_| {
                    CheckpointError::Corrupt(format!("grid extent {n} exceeds the i32 range"))
                })?;
                writer.write_all(&n.to_le_bytes())?;
            }
            for entries in &level.cells {
                writer.write_all(&(entries.len() as u64).to_le_bytes())?;
                for &(id, value) in entries {
                    writer.write_all(&id.to_le_bytes())?;
                    writer.write_all(&value.to_le_bytes())?;
                    for _ in 0..DERIVATIVE_SLOTS {
                        writer.write_all(&0.0f64.to_le_bytes())?;
                    }
                }
            }
        }
        Ok(())
    }
}
