use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Common interface of the checkpoint file formats.
///
/// Implementors translate between an in-memory dump and its on-disk
/// representation. Validation against the running simulation (grid extents,
/// registry ids) is left to the caller, so a mismatch can be handled as a
/// recoverable condition.
pub trait CheckpointFile {
    /// The in-memory form of the file contents.
    type Data;

    /// The error type for I/O operations.
    type Error: Error + From<io::Error>;

    /// Decodes a dump from a reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - The reader positioned at the start of the dump.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is truncated, malformed, or the
    /// underlying I/O fails.
    fn read_from(reader: &mut impl Read) -> Result<Self::Data, Self::Error>;

    /// Encodes a dump to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_to(data: &Self::Data, writer: &mut impl Write) -> Result<(), Self::Error>;

    /// Reads a dump from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or decoding fails.
    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self::Data, Self::Error> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }

    /// Writes a dump to a file path, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or encoding fails.
    fn write_to_path<P: AsRef<Path>>(data: &Self::Data, path: P) -> Result<(), Self::Error> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Self::write_to(data, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
