use std::{
    collections::HashMap,
    fmt::Display,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use ndarray::Array2;

use super::{SourceError, SourceFile, SourceInventory, VariableInfo};
use crate::{cf_time::CfTimeAxis, field::RawField, grid::GridDescriptor};

type SlabKey = (String, Option<usize>, Option<usize>);

/// A source whose slabs are held in memory, for data that has already been loaded
/// or computed by other means.
#[derive(Debug, Clone)]
pub struct MemorySource {
    path: PathBuf,
    inventory: SourceInventory,
    slabs: HashMap<SlabKey, Array2<f64>>,
}

impl MemorySource {
    /// Create an empty source. `path` only identifies the source in logs and errors.
    pub fn new<P: AsRef<Path>>(path: P, grid: GridDescriptor, time: Option<CfTimeAxis>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            inventory: SourceInventory {
                time,
                grid,
                variables: IndexMap::new(),
            },
            slabs: HashMap::new(),
        }
    }

    pub fn declare_variable(&mut self, info: VariableInfo) {
        self.inventory.variables.insert(info.name.clone(), info);
    }

    /// Store the slab for `(variable, time_index, level_index)`, replacing any existing one.
    pub fn insert_slab(
        &mut self,
        variable: &str,
        time_index: Option<usize>,
        level_index: Option<usize>,
        values: Array2<f64>,
    ) {
        self.slabs
            .insert((variable.to_string(), time_index, level_index), values);
    }
}

impl Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (in memory)", self.path.display())
    }
}

impl SourceFile for MemorySource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn inventory(&self) -> &SourceInventory {
        &self.inventory
    }

    fn read_slab(
        &self,
        variable: &str,
        time_index: Option<usize>,
        level_index: Option<usize>,
    ) -> error_stack::Result<RawField, SourceError> {
        let info = self.inventory.variables.get(variable).ok_or_else(|| {
            SourceError::MissingVariable {
                path: self.path.clone(),
                variable: variable.to_string(),
            }
        })?;

        let values = self
            .slabs
            .get(&(variable.to_string(), time_index, level_index))
            .ok_or_else(|| SourceError::read(&self.path, variable))
            .map_err(|e| {
                error_stack::Report::new(e).attach_printable(format!(
                    "no slab stored for time index {time_index:?} and level index {level_index:?}"
                ))
            })?;

        Ok(RawField {
            values: values.clone(),
            grid: self.inventory.grid.clone(),
            units: info.units.clone(),
            description: info.description.clone(),
        })
    }
}
