//! Sources of gridded data.
//!
//! A [`SourceFile`] describes itself once, through its [`SourceInventory`], and
//! afterwards only has to read single horizontal slabs on request. The catalog
//! never holds more than one slab per record being written.
use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;

use crate::{cf_time::CfTimeAxis, field::RawField, grid::GridDescriptor};

pub mod memory;
#[cfg(feature = "netcdf")]
pub mod netcdf_file;

pub use memory::MemorySource;
#[cfg(feature = "netcdf")]
pub use netcdf_file::{index_files, NcSourceFile};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Could not open {}", .0.display())]
    Open(PathBuf),
    #[error("Invalid time coordinate in {}", .0.display())]
    Time(PathBuf),
    #[error("Could not determine the horizontal grid of {}", .0.display())]
    Grid(PathBuf),
    #[error("{} contains no variables on a horizontal grid", .0.display())]
    NoVariables(PathBuf),
    #[error("{} has no variable '{variable}'", .path.display())]
    MissingVariable { path: PathBuf, variable: String },
    #[error("Could not read '{variable}' from {}", .path.display())]
    Read { path: PathBuf, variable: String },
}

impl SourceError {
    pub fn read<P: AsRef<Path>, S: ToString>(path: P, variable: S) -> Self {
        Self::Read {
            path: path.as_ref().to_path_buf(),
            variable: variable.to_string(),
        }
    }
}

/// What a source file knows about one of its variables.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    pub units: Option<String>,
    /// The standard name (or long name) of the variable.
    pub description: String,
    /// `false` for fields like orography or land fraction, which cover every time.
    pub time_dependent: bool,
    /// Vertical levels in Pa, or `None` if the variable has no vertical dimension.
    pub levels: Option<Vec<f64>>,
}

impl VariableInfo {
    pub fn new(name: &str, units: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            units: Some(units.to_string()),
            description: description.to_string(),
            time_dependent: true,
            levels: None,
        }
    }

    pub fn with_levels(mut self, levels: Vec<f64>) -> Self {
        self.levels = Some(levels);
        self
    }

    pub fn time_invariant(mut self) -> Self {
        self.time_dependent = false;
        self
    }

    /// Index of the source level within `tolerance` Pa of `level`, if there is one.
    pub fn level_index(&self, level: f64, tolerance: f64) -> Option<usize> {
        self.levels
            .as_ref()?
            .iter()
            .position(|l| (l - level).abs() <= tolerance)
    }
}

/// The time axis, grid and variables of one source.
#[derive(Debug, Clone)]
pub struct SourceInventory {
    /// `None` if the source has no time coordinate (only time-invariant fields).
    pub time: Option<CfTimeAxis>,
    pub grid: GridDescriptor,
    pub variables: IndexMap<String, VariableInfo>,
}

/// A read-only source of 2-D slabs.
///
/// Implementations must be safe to read from several worker threads at once.
pub trait SourceFile: Display + Send + Sync {
    fn path(&self) -> &Path;

    fn inventory(&self) -> &SourceInventory;

    /// Read one horizontal slab of `variable` with shape `(ny, nx)`.
    ///
    /// `time_index` must be `None` exactly when the variable is time-invariant, and
    /// `level_index` must be `None` exactly when it has no vertical dimension.
    fn read_slab(
        &self,
        variable: &str,
        time_index: Option<usize>,
        level_index: Option<usize>,
    ) -> error_stack::Result<RawField, SourceError>;
}
