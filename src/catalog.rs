//! The read-only index of which source provides each variable at each time.
//!
//! The catalog is built once, before any output is written, and afterwards only
//! answers queries. Nothing is loaded from the sources until a slab is fetched.
use std::path::PathBuf;

use chrono::NaiveDateTime;
use error_stack::ResultExt;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::{
    cf_time::CalendarDateTime,
    error::TimestampError,
    field::{apply_spec, FieldSlice, RawField},
    model_config::VariableSpec,
    source::{SourceFile, VariableInfo},
};

pub const DEFAULT_TIME_TOLERANCE_SECONDS: f64 = 60.0;
pub const DEFAULT_LEVEL_TOLERANCE_PA: f64 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("variable '{variable}' is not declared by any readable source file")]
    VariableNotFound {
        variable: String,
        rejected: Vec<PathBuf>,
    },
    #[error("no source file covers variable '{variable}' at {time}")]
    TimeNotCovered { variable: String, time: NaiveDateTime },
    #[error("variable '{variable}' has no level {level} in {}", .path.display())]
    LevelNotCovered {
        variable: String,
        level: f64,
        path: PathBuf,
    },
    #[error("could not read '{variable}' from {}", .path.display())]
    SourceRead { variable: String, path: PathBuf },
    #[error("could not convert '{variable}': {cause}")]
    Conversion {
        variable: String,
        cause: TimestampError,
    },
}

impl CatalogError {
    /// The per-timestamp failure this lookup error causes.
    pub fn to_timestamp_error(&self) -> TimestampError {
        match self {
            CatalogError::VariableNotFound { variable, rejected } => TimestampError::VariableNotFound {
                variable: variable.clone(),
                rejected: rejected.clone(),
            },
            CatalogError::TimeNotCovered { variable, .. } => TimestampError::TimeNotCovered {
                variable: variable.clone(),
            },
            CatalogError::LevelNotCovered {
                variable,
                level,
                path,
            } => TimestampError::LevelNotCovered {
                variable: variable.clone(),
                level: *level,
                path: path.clone(),
            },
            CatalogError::SourceRead { variable, path } => {
                TimestampError::io(format!("reading '{variable}' from {}", path.display()))
            }
            CatalogError::Conversion { cause, .. } => cause.clone(),
        }
    }
}

/// A source that could not be indexed, and why.
#[derive(Debug, Clone)]
pub struct RejectedSource {
    pub path: PathBuf,
    pub reason: String,
}

/// Where to read a variable at one time from.
#[derive(Clone, Copy)]
pub struct Resolved<'c> {
    pub source: &'c dyn SourceFile,
    pub variable: &'c VariableInfo,
    /// `None` for time-invariant variables.
    pub time_index: Option<usize>,
}

impl<'c> std::fmt::Debug for Resolved<'c> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("source", &self.source.path())
            .field("variable", &self.variable.name)
            .field("time_index", &self.time_index)
            .finish()
    }
}

pub struct CatalogBuilder {
    sources: Vec<Box<dyn SourceFile>>,
    rejected: Vec<RejectedSource>,
    time_tolerance: f64,
    level_tolerance: f64,
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self {
            sources: vec![],
            rejected: vec![],
            time_tolerance: DEFAULT_TIME_TOLERANCE_SECONDS,
            level_tolerance: DEFAULT_LEVEL_TOLERANCE_PA,
        }
    }
}

impl CatalogBuilder {
    /// How far (s) a source time may be from a requested time and still match it.
    pub fn time_tolerance(mut self, seconds: f64) -> Self {
        self.time_tolerance = seconds;
        self
    }

    /// How far (Pa) a source level may be from a configured level and still match it.
    pub fn level_tolerance(mut self, pascals: f64) -> Self {
        self.level_tolerance = pascals;
        self
    }

    /// Add a source. Later sources take precedence over earlier ones.
    pub fn add(&mut self, source: Box<dyn SourceFile>) {
        self.sources.push(source);
    }

    /// Record a source that could not be opened or described.
    pub fn reject<S: ToString>(&mut self, path: PathBuf, reason: S) {
        self.rejected.push(RejectedSource {
            path,
            reason: reason.to_string(),
        });
    }

    pub fn build(self) -> Catalog {
        let mut by_variable: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (isrc, source) in self.sources.iter().enumerate() {
            log_coverage(source.as_ref());
            for name in source.inventory().variables.keys() {
                by_variable.entry(name.clone()).or_default().push(isrc);
            }
        }

        let catalog = Catalog {
            sources: self.sources,
            by_variable,
            rejected: self.rejected,
            time_tolerance: self.time_tolerance,
            level_tolerance: self.level_tolerance,
        };
        catalog.warn_duplicate_coverage();
        catalog
    }
}

/// The index of all sources, queried by variable and time.
pub struct Catalog {
    sources: Vec<Box<dyn SourceFile>>,
    /// Indices into `sources` of the sources declaring each variable, in index order
    by_variable: IndexMap<String, Vec<usize>>,
    rejected: Vec<RejectedSource>,
    time_tolerance: f64,
    level_tolerance: f64,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Index `sources` with the default tolerances. If more than one source covers
    /// the same variable and time, the last one in `sources` wins.
    pub fn index(sources: Vec<Box<dyn SourceFile>>) -> Self {
        let mut builder = Self::builder();
        for source in sources {
            builder.add(source);
        }
        builder.build()
    }

    pub fn sources(&self) -> impl Iterator<Item = &dyn SourceFile> {
        self.sources.iter().map(|s| s.as_ref())
    }

    pub fn rejected(&self) -> &[RejectedSource] {
        &self.rejected
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.by_variable.keys().map(|k| k.as_str())
    }

    /// Find the source and time index to read `variable` at `time` from, without
    /// reading any data.
    pub fn resolve(&self, variable: &str, time: &NaiveDateTime) -> Result<Resolved<'_>, CatalogError> {
        let candidates = self
            .by_variable
            .get(variable)
            .ok_or_else(|| CatalogError::VariableNotFound {
                variable: variable.to_string(),
                rejected: self.rejected.iter().map(|r| r.path.clone()).collect(),
            })?;

        for &isrc in candidates.iter().rev() {
            let source = self.sources[isrc].as_ref();
            let inventory = source.inventory();
            let Some(info) = inventory.variables.get(variable) else {
                continue;
            };

            if !info.time_dependent {
                return Ok(Resolved {
                    source,
                    variable: info,
                    time_index: None,
                });
            }

            let time_index = inventory
                .time
                .as_ref()
                .and_then(|axis| axis.nearest_index(time, self.time_tolerance));
            if let Some(itime) = time_index {
                return Ok(Resolved {
                    source,
                    variable: info,
                    time_index: Some(itime),
                });
            }
        }

        Err(CatalogError::TimeNotCovered {
            variable: variable.to_string(),
            time: *time,
        })
    }

    /// Index of `level` (Pa) in the resolved variable's vertical coordinate.
    ///
    /// `None` requests a surface field: this must be a variable without a vertical
    /// dimension (or with a single level).
    pub fn level_index(&self, resolved: &Resolved, level: Option<f64>) -> Result<Option<usize>, CatalogError> {
        let info = resolved.variable;
        let not_covered = || CatalogError::LevelNotCovered {
            variable: info.name.clone(),
            level: level.unwrap_or(crate::model_config::SURFACE_LEVEL),
            path: resolved.source.path().to_path_buf(),
        };

        match (level, info.levels.as_deref()) {
            (None, None) => Ok(None),
            (None, Some([_])) => Ok(Some(0)),
            (None, Some(_)) => Err(not_covered()),
            (Some(_), None) => Err(not_covered()),
            (Some(p), Some(_)) => info
                .level_index(p, self.level_tolerance)
                .map(Some)
                .ok_or_else(not_covered),
        }
    }

    /// Read the raw slab for a resolved variable at one level index.
    pub fn fetch_raw(
        &self,
        resolved: &Resolved,
        level_index: Option<usize>,
    ) -> error_stack::Result<RawField, CatalogError> {
        resolved
            .source
            .read_slab(&resolved.variable.name, resolved.time_index, level_index)
            .change_context_lazy(|| CatalogError::SourceRead {
                variable: resolved.variable.name.clone(),
                path: resolved.source.path().to_path_buf(),
            })
    }

    /// Read one level of a resolved variable and convert it according to `spec`.
    pub fn fetch(
        &self,
        resolved: &Resolved,
        level: Option<f64>,
        spec: &VariableSpec,
        fill_missing: bool,
    ) -> error_stack::Result<FieldSlice, CatalogError> {
        let level_index = self.level_index(resolved, level)?;
        let raw = self.fetch_raw(resolved, level_index)?;
        let slice = apply_spec(raw, spec, fill_missing).map_err(|cause| CatalogError::Conversion {
            variable: spec.var_id.clone(),
            cause,
        })?;
        Ok(slice)
    }

    /// Resolve and fetch in one step.
    pub fn lookup(
        &self,
        spec: &VariableSpec,
        time: &NaiveDateTime,
        level: Option<f64>,
        fill_missing: bool,
    ) -> error_stack::Result<FieldSlice, CatalogError> {
        let resolved = self.resolve(&spec.var_id, time)?;
        self.fetch(&resolved, level, spec, fill_missing)
    }

    fn warn_duplicate_coverage(&self) {
        for (variable, indices) in self.by_variable.iter() {
            for (&ia, &ib) in indices.iter().tuple_combinations() {
                let (a, b) = (self.sources[ia].as_ref(), self.sources[ib].as_ref());
                if coverage_overlaps(a, b, variable) {
                    log::warn!(
                        "'{variable}' is covered by both {a} and {b} for some times; {b} will be used for those times"
                    );
                }
            }
        }
    }
}

type CoverageKey = (i32, u32, u32, u32, u32, u32);

fn coverage_key(t: &CalendarDateTime) -> CoverageKey {
    (t.year, t.month, t.day, t.hour, t.minute, t.second.round() as u32)
}

fn variable_coverage(source: &dyn SourceFile, variable: &str) -> Option<Option<(CoverageKey, CoverageKey)>> {
    let info = source.inventory().variables.get(variable)?;
    if !info.time_dependent {
        return Some(None);
    }
    let (first, last) = source.inventory().time.as_ref()?.coverage()?;
    Some(Some((coverage_key(&first), coverage_key(&last))))
}

fn coverage_overlaps(a: &dyn SourceFile, b: &dyn SourceFile, variable: &str) -> bool {
    match (variable_coverage(a, variable), variable_coverage(b, variable)) {
        // A time-invariant copy overlaps every other copy.
        (Some(None), Some(_)) | (Some(Some(_)), Some(None)) => true,
        (Some(Some((a0, a1))), Some(Some((b0, b1)))) => a0 <= b1 && b0 <= a1,
        _ => false,
    }
}

fn log_coverage(source: &dyn SourceFile) {
    let inventory = source.inventory();
    let variables = inventory.variables.keys().join(", ");
    match inventory.time.as_ref().and_then(|axis| axis.coverage().map(|c| (axis, c))) {
        Some((axis, (first, last))) => log::info!(
            "Indexed {source}: {variables} from {first} to {last} ({} times, {} calendar)",
            axis.len(),
            axis.calendar()
        ),
        None => log::info!("Indexed {source}: {variables} (time invariant)"),
    }
}
