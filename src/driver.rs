//! Converts every requested timestamp into one intermediate file.
//!
//! Each timestamp goes through the states
//! `Pending -> GridValidated -> Writing -> Closed`, or ends in `Failed`. A failed
//! timestamp never leaves a file behind and never stops the other timestamps.
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::{NaiveDateTime, TimeDelta};
use error_stack::ResultExt;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;
use tabled::Tabled;

use crate::{
    catalog::{Catalog, Resolved},
    error::{RunError, TimestampError},
    field::apply_spec,
    grid::GridDescriptor,
    intermediate::{OutputFile, RecordMetadata, SerializationError},
    model_config::{LevelSet, ModelConfig, VariableSpec},
    settings::ConversionSettings,
    time_axis::{output_file_name, wps_hdate},
};

/// Set from a signal handler to stop the conversion.
///
/// Timestamps not yet finished when the flag is set fail with
/// [`TimestampError::Cancelled`] and their partial files are removed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum TimestampState {
    Pending,
    GridValidated,
    Writing,
    Closed,
    Failed,
}

/// Why a timestamp failed, flattened for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureInfo {
    pub kind: &'static str,
    pub variable: Option<String>,
    pub level: Option<f64>,
    pub message: String,
}

impl From<&TimestampError> for FailureInfo {
    fn from(e: &TimestampError) -> Self {
        Self {
            kind: e.kind(),
            variable: e.variable().map(|v| v.to_string()),
            level: e.level(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimestampOutcome {
    pub time: NaiveDateTime,
    pub path: PathBuf,
    pub state: TimestampState,
    pub records: usize,
    pub failure: Option<FailureInfo>,
}

impl TimestampOutcome {
    pub fn is_closed(&self) -> bool {
        self.state == TimestampState::Closed
    }
}

#[derive(Tabled)]
struct FailureRow {
    #[tabled(rename = "Timestamp")]
    time: String,
    #[tabled(rename = "Failure")]
    kind: &'static str,
    #[tabled(rename = "Variable")]
    variable: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Cause")]
    message: String,
}

/// The outcome of every requested timestamp, in the order requested.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<TimestampOutcome>,
    /// Records each complete file contains.
    pub records_per_file: usize,
    pub cancelled: bool,
}

impl RunReport {
    /// `true` only if every requested timestamp produced its file.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.is_closed())
    }

    pub fn n_closed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_closed()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &TimestampOutcome> {
        self.outcomes.iter().filter(|o| !o.is_closed())
    }

    /// A table of the failed timestamps, or `None` if there were none.
    pub fn summary_table(&self) -> Option<String> {
        let rows: Vec<FailureRow> = self
            .failed()
            .map(|o| {
                let failure = o.failure.as_ref();
                FailureRow {
                    time: wps_hdate(&o.time),
                    kind: failure.map(|f| f.kind).unwrap_or("Unknown"),
                    variable: failure
                        .and_then(|f| f.variable.clone())
                        .unwrap_or_else(|| "-".to_string()),
                    level: failure
                        .and_then(|f| f.level)
                        .map(|l| l.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    message: failure.map(|f| f.message.clone()).unwrap_or_default(),
                }
            })
            .collect();

        if rows.is_empty() {
            return None;
        }

        let mut table = tabled::Table::new(rows);
        table.with(tabled::settings::Style::psql());
        Some(table.to_string())
    }

    pub fn write_json(&self, path: &Path) -> error_stack::Result<(), RunError> {
        let f = std::fs::File::create(path)
            .change_context_lazy(|| RunError::Summary(path.to_path_buf()))?;
        serde_json::to_writer_pretty(f, self)
            .change_context_lazy(|| RunError::Summary(path.to_path_buf()))?;
        Ok(())
    }
}

/// One record to write: which configuration entry, from where, and at which level.
struct PlannedRecord<'a> {
    spec: &'a VariableSpec,
    resolved: Resolved<'a>,
    xlvl: f64,
    level_index: Option<usize>,
}

/// Tracks one timestamp's state, logging each transition.
struct StateTracker {
    hdate: String,
    state: TimestampState,
}

impl StateTracker {
    fn new(hdate: String) -> Self {
        Self {
            hdate,
            state: TimestampState::Pending,
        }
    }

    fn advance(&mut self, to: TimestampState) {
        log::debug!("{}: {} -> {}", self.hdate, self.state, to);
        self.state = to;
    }
}

pub struct ConversionDriver<'a> {
    config: &'a ModelConfig,
    catalog: &'a Catalog,
    settings: &'a ConversionSettings,
    cancel: CancelFlag,
}

impl<'a> ConversionDriver<'a> {
    pub fn new(config: &'a ModelConfig, catalog: &'a Catalog, settings: &'a ConversionSettings) -> Self {
        Self {
            config,
            catalog,
            settings,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Write one file per timestamp, named `<prefix>:<date>`.
    ///
    /// `interval` is the spacing of `timestamps`; it decides how precise the dates in
    /// the file names must be. Failures of individual timestamps are reported in the
    /// returned [`RunReport`]; an `Err` means nothing could be attempted at all.
    pub fn run(
        &self,
        timestamps: &[NaiveDateTime],
        interval: TimeDelta,
        prefix: &str,
    ) -> error_stack::Result<RunReport, RunError> {
        preflight_output(prefix)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.workers)
            .build()
            .map_err(|e| error_stack::Report::new(RunError::WorkerPool(e.to_string())))?;

        log::info!(
            "Converting {} timestamps with {} records each using {} worker(s)",
            timestamps.len(),
            self.config.total_records(),
            self.settings.workers
        );

        let outcomes: Vec<TimestampOutcome> = pool.install(|| {
            timestamps
                .par_iter()
                .map(|t| self.convert_timestamp(t, interval, prefix))
                .collect()
        });

        let report = RunReport {
            outcomes,
            records_per_file: self.config.total_records(),
            cancelled: self.cancel.is_cancelled(),
        };

        let n_failed = report.outcomes.len() - report.n_closed();
        if n_failed == 0 {
            log::info!("All {} timestamps converted", report.outcomes.len());
        } else {
            log::error!(
                "{n_failed} of {} timestamps failed",
                report.outcomes.len()
            );
        }
        Ok(report)
    }

    fn convert_timestamp(&self, time: &NaiveDateTime, interval: TimeDelta, prefix: &str) -> TimestampOutcome {
        let path = PathBuf::from(output_file_name(
            prefix,
            time,
            interval,
            self.settings.file_naming,
        ));
        let mut tracker = StateTracker::new(wps_hdate(time));

        match self.try_convert(time, &path, &mut tracker) {
            Ok(records) => {
                tracker.advance(TimestampState::Closed);
                log::info!("Wrote {} ({records} records)", path.display());
                TimestampOutcome {
                    time: *time,
                    path,
                    state: tracker.state,
                    records,
                    failure: None,
                }
            }
            Err(e) => {
                tracker.advance(TimestampState::Failed);
                let failure = FailureInfo::from(&e);
                log::error!(
                    "{}: {} (variable {}, level {}): {e}",
                    tracker.hdate,
                    failure.kind,
                    failure.variable.as_deref().unwrap_or("-"),
                    failure
                        .level
                        .map(|l| l.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
                TimestampOutcome {
                    time: *time,
                    path,
                    state: tracker.state,
                    records: 0,
                    failure: Some(failure),
                }
            }
        }
    }

    fn try_convert(
        &self,
        time: &NaiveDateTime,
        path: &Path,
        tracker: &mut StateTracker,
    ) -> Result<usize, TimestampError> {
        self.check_cancelled()?;

        let plan = self.plan(time)?;
        let grid = self.validate_grids(&plan)?;
        tracker.advance(TimestampState::GridValidated);

        let mut out = OutputFile::create(path)
            .map_err(|e| TimestampError::io(io_action(e.current_context())))?;
        tracker.advance(TimestampState::Writing);

        for rec in plan.iter() {
            // Dropping `out` on any early return removes the partial file.
            self.check_cancelled()?;

            let raw = self
                .catalog
                .fetch_raw(&rec.resolved, rec.level_index)
                .map_err(|e| {
                    log::debug!("{e:?}");
                    e.current_context().to_timestamp_error()
                })?;
            let slice = apply_spec(raw, rec.spec, self.settings.fill_missing)?;
            let n_missing = slice.n_missing();
            if n_missing > 0 {
                log::warn!(
                    "{}: {} at level {} has {n_missing} missing values",
                    tracker.hdate,
                    rec.spec.wps_name,
                    rec.xlvl
                );
            }

            let meta = self.metadata(&tracker.hdate, rec, &slice.description, &grid);
            out.write_record(&slice, &meta).map_err(|e| {
                log::debug!("{e:?}");
                if e.current_context().is_io() {
                    TimestampError::io(format!("writing {}: {}", path.display(), io_action(e.current_context())))
                } else {
                    TimestampError::Serialization {
                        field: rec.spec.wps_name.clone(),
                        level: rec.xlvl,
                    }
                }
            })?;
        }

        let records = out.records();
        out.finalize()
            .map_err(|e| TimestampError::io(io_action(e.current_context())))?;
        Ok(records)
    }

    fn check_cancelled(&self) -> Result<(), TimestampError> {
        if self.cancel.is_cancelled() {
            Err(TimestampError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve every record of the file before anything is written.
    fn plan(&self, time: &NaiveDateTime) -> Result<Vec<PlannedRecord<'a>>, TimestampError> {
        let mut plan = Vec::with_capacity(self.config.total_records());
        for spec in self.config.variables() {
            let resolved = self
                .catalog
                .resolve(&spec.var_id, time)
                .map_err(|e| e.to_timestamp_error())?;

            for xlvl in spec.levels.ascending() {
                let requested = match spec.levels {
                    LevelSet::Pressure(_) => Some(xlvl),
                    LevelSet::Surface | LevelSet::SeaLevel => None,
                };
                let level_index = self
                    .catalog
                    .level_index(&resolved, requested)
                    .map_err(|e| e.to_timestamp_error())?;
                plan.push(PlannedRecord {
                    spec,
                    resolved,
                    xlvl,
                    level_index,
                });
            }
        }
        Ok(plan)
    }

    /// Check that every contributing source shares the first source's grid.
    fn validate_grids(&self, plan: &[PlannedRecord]) -> Result<GridDescriptor, TimestampError> {
        let first = plan
            .first()
            .map(|r| &r.resolved.source.inventory().grid)
            .ok_or_else(|| TimestampError::io("no records to write"))?;

        for rec in plan.iter().skip(1) {
            let grid = &rec.resolved.source.inventory().grid;
            if let Err(e) = first.check_compatible(grid, self.settings.grid_tolerance) {
                log::debug!("{e}");
                return Err(TimestampError::GridMismatch {
                    variable: rec.spec.var_id.clone(),
                    path: rec.resolved.source.path().to_path_buf(),
                });
            }
        }
        Ok(first.clone())
    }

    fn metadata(
        &self,
        hdate: &str,
        rec: &PlannedRecord,
        description: &str,
        grid: &GridDescriptor,
    ) -> RecordMetadata {
        RecordMetadata {
            hdate: hdate.to_string(),
            forecast_hour: self.settings.forecast_hour,
            map_source: self.settings.map_source.clone(),
            field: rec.spec.wps_name.clone(),
            units: rec.spec.units.clone(),
            description: description.to_string(),
            level: rec.xlvl as f32,
            grid: grid.clone(),
            earth_radius_km: self.settings.earth_radius_km,
            wind_earth_relative: self.settings.wind_earth_relative,
        }
    }
}

/// What was being attempted when an output file operation failed.
fn io_action(e: &SerializationError) -> String {
    match e {
        SerializationError::Io(action) => action.clone(),
        other => other.to_string(),
    }
}

/// Check that output files can be created in the directory `prefix` names them into.
fn preflight_output(prefix: &str) -> error_stack::Result<(), RunError> {
    // Every output file is `<prefix>:<date>` and dates never contain a separator, so
    // a prefix ending in `/` puts the files inside that directory.
    let first_name = format!("{prefix}:");
    let dir = match Path::new(&first_name).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    if !dir.is_dir() {
        return Err(error_stack::Report::new(RunError::OutputUnwritable(dir.clone())))
            .attach_printable("the directory does not exist");
    }

    let probe = dir.join(format!(".cmip6_wps_probe_{}", std::process::id()));
    std::fs::File::create(&probe).change_context_lazy(|| RunError::OutputUnwritable(dir.clone()))?;
    if let Err(e) = std::fs::remove_file(&probe) {
        log::warn!("Could not remove probe file {}: {e}", probe.display());
    }
    Ok(())
}
