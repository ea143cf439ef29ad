//! The WPS intermediate file format (version 5).
//!
//! An intermediate file is a Fortran sequential unformatted file written
//! big-endian. Every Fortran record is framed by its length in bytes, as a
//! 4-byte big-endian integer, both before and after its contents. Each field
//! (one variable at one level) takes five Fortran records:
//!
//! 1. the format version, `IFV` (always 5);
//! 2. the header: `HDATE`, `XFCST`, `MAP_SOURCE`, `FIELD`, `UNITS`, `DESC`, `XLVL`,
//!    `NX`, `NY`, `IPROJ`;
//! 3. the projection block, whose layout depends on `IPROJ`;
//! 4. `IS_WIND_EARTH_REL`;
//! 5. the `NX * NY` data values, x varying fastest.
use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use error_stack::ResultExt;

use crate::{field::FieldSlice, grid::GridDescriptor};

pub mod reader;
pub mod writer;

pub use reader::{read_file, IntermediateReader, IntermediateRecord};
pub use writer::write_record;

pub const INTERMEDIATE_VERSION: i32 = 5;
pub const HDATE_LEN: usize = 24;
pub const MAP_SOURCE_LEN: usize = 32;
pub const FIELD_LEN: usize = 9;
pub const UNITS_LEN: usize = 25;
pub const DESC_LEN: usize = 46;
pub const STARTLOC_LEN: usize = 8;
pub const STARTLOC: &str = "SWCORNER";
pub const DEFAULT_EARTH_RADIUS_KM: f32 = 6367.47;

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Field '{field}' has {values_ny}x{values_nx} (NY x NX) values but its grid is {grid_ny}x{grid_nx}")]
    DimensionMismatch {
        field: String,
        values_ny: usize,
        values_nx: usize,
        grid_ny: usize,
        grid_nx: usize,
    },
    #[error("Field '{field}' has {n} points along one axis, more than a 4-byte integer can hold")]
    DimensionTooLarge { field: String, n: usize },
    #[error("{what} '{value}' contains non-ASCII characters")]
    NonAscii { what: &'static str, value: String },
    #[error("I/O error while {0}")]
    Io(String),
    #[error("Malformed intermediate file: {0}")]
    Malformed(String),
    #[error("Unsupported intermediate format version {0}")]
    UnsupportedVersion(i32),
    #[error("Unsupported projection IPROJ = {0}")]
    UnsupportedProjection(i32),
}

impl SerializationError {
    pub fn io<S: ToString>(action: S) -> Self {
        Self::Io(action.to_string())
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Everything in a record except the data values.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMetadata {
    /// Valid time, formatted as `YYYY-MM-DD_HH:MM:SS`.
    pub hdate: String,
    pub forecast_hour: f32,
    pub map_source: String,
    pub field: String,
    pub units: String,
    pub description: String,
    /// Pressure (Pa), or one of the surface/sea level sentinels.
    pub level: f32,
    pub grid: GridDescriptor,
    pub earth_radius_km: f32,
    pub wind_earth_relative: bool,
}

/// An intermediate file being written.
///
/// Records go to a hidden temporary file next to the final path, which is only
/// renamed into place by [`OutputFile::finalize`]. If the `OutputFile` is dropped
/// without being finalized, for any reason, the temporary file is deleted.
pub struct OutputFile {
    final_path: PathBuf,
    temp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    n_records: usize,
}

impl OutputFile {
    pub fn create(path: &Path) -> error_stack::Result<Self, SerializationError> {
        let temp_path = temporary_path(path);
        let f = File::create(&temp_path).change_context_lazy(|| {
            SerializationError::io(format!("creating {}", temp_path.display()))
        })?;

        Ok(Self {
            final_path: path.to_path_buf(),
            temp_path,
            writer: Some(BufWriter::new(f)),
            n_records: 0,
        })
    }

    /// The path the file will have once finalized.
    pub fn path(&self) -> &Path {
        &self.final_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// The number of records written so far.
    pub fn records(&self) -> usize {
        self.n_records
    }

    pub fn write_record(
        &mut self,
        slice: &FieldSlice,
        meta: &RecordMetadata,
    ) -> error_stack::Result<(), SerializationError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SerializationError::io("writing to a closed output file"))?;
        write_record(writer, slice, meta)?;
        self.n_records += 1;
        Ok(())
    }

    /// Flush the records to disk and move the file to its final path.
    pub fn finalize(mut self) -> error_stack::Result<PathBuf, SerializationError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| SerializationError::io("finalizing a closed output file"))?;
        let f = writer.into_inner().map_err(|e| {
            error_stack::Report::new(e.into_error())
                .change_context(SerializationError::io(format!("flushing {}", self.temp_path.display())))
        })?;
        f.sync_all().change_context_lazy(|| {
            SerializationError::io(format!("syncing {}", self.temp_path.display()))
        })?;
        drop(f);

        std::fs::rename(&self.temp_path, &self.final_path).change_context_lazy(|| {
            SerializationError::io(format!(
                "moving {} to {}",
                self.temp_path.display(),
                self.final_path.display()
            ))
        })?;
        Ok(self.final_path.clone())
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        // `finalize` takes the writer, and only after a successful rename is there no
        // temporary file to clean up.
        let uncommitted = self.writer.take().is_some() || self.temp_path.exists();
        if uncommitted {
            if let Err(e) = std::fs::remove_file(&self.temp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!(
                        "Could not remove incomplete file {}: {e}",
                        self.temp_path.display()
                    );
                }
            }
        }
    }
}

/// Hidden sibling of `path` used while the file is being written.
pub fn temporary_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        field::FieldSlice,
        test_utils::{test_grid, TEST_NX, TEST_NY},
    };
    use ndarray::Array2;

    pub(crate) fn slice_and_meta() -> (FieldSlice, RecordMetadata) {
        let grid = test_grid();
        let slice = FieldSlice {
            values: Array2::from_shape_fn((TEST_NY, TEST_NX), |(j, i)| (10 * j + i) as f32),
            grid: grid.clone(),
            units: "K".to_string(),
            description: "air_temperature".to_string(),
        };
        let meta = RecordMetadata {
            hdate: "2010-01-05_06:00:00".to_string(),
            forecast_hour: 0.0,
            map_source: "CMIP6".to_string(),
            field: "TT".to_string(),
            units: "K".to_string(),
            description: "air_temperature".to_string(),
            level: 85000.0,
            grid,
            earth_radius_km: DEFAULT_EARTH_RADIUS_KM,
            wind_earth_relative: false,
        };
        (slice, meta)
    }

    #[test]
    fn test_finalize_moves_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CMIP6:2010-01-05_06");
        let (slice, meta) = slice_and_meta();

        let mut out = OutputFile::create(&path).unwrap();
        out.write_record(&slice, &meta).unwrap();
        out.write_record(&slice, &meta).unwrap();
        assert_eq!(out.records(), 2);
        assert!(out.temp_path().exists());
        assert!(!path.exists());

        let final_path = out.finalize().unwrap();
        assert_eq!(final_path, path);
        assert!(path.exists());
        assert!(!temporary_path(&path).exists());
        assert_eq!(read_file(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_drop_discards_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CMIP6:2010-01-05_06");
        let (slice, meta) = slice_and_meta();

        {
            let mut out = OutputFile::create(&path).unwrap();
            out.write_record(&slice, &meta).unwrap();
            assert!(temporary_path(&path).exists());
        }

        assert!(!path.exists());
        assert!(!temporary_path(&path).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_temporary_path() {
        assert_eq!(
            temporary_path(Path::new("out/FILE:2010-01-05_06")),
            PathBuf::from("out/.FILE:2010-01-05_06.partial")
        );
    }
}
