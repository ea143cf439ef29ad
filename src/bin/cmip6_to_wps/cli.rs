//! Command line interface definitions
use std::path::PathBuf;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Convert CMIP6 NetCDF output into WPS intermediate files, one per timestamp.
///
/// Each output file holds, in the order of the model configuration table, every
/// configured variable at every configured level for one time. A timestamp that
/// cannot be fully converted produces no file; all such failures are summarized
/// at the end of the run and the program exits with a non-zero status.
#[derive(Debug, Parser)]
pub(crate) struct Cli {
    /// CSV table of the variables to write, with columns wps_name, var_id, units,
    /// levels and optionally scale, offset and description.
    #[clap(short = 'c', long, required_unless_present = "write_settings_template")]
    pub(crate) model_conf: Option<PathBuf>,

    /// First timestamp to convert, e.g. 2010-01-05 or 2010-01-05_06:00:00.
    #[clap(short = 's', long, required_unless_present = "write_settings_template")]
    pub(crate) start: Option<String>,

    /// Last timestamp to convert. It is only included if it falls on a multiple of
    /// --interval after --start.
    #[clap(short = 'e', long, required_unless_present = "write_settings_template")]
    pub(crate) end: Option<String>,

    /// Time between output files, e.g. "6 hours", 6h, 30min or "1 day".
    #[clap(short = 'I', long, default_value = "6 hours")]
    pub(crate) interval: String,

    /// Output path prefix; files are named PREFIX:YYYY-MM-DD_HH.
    #[clap(short = 'p', long, default_value = "CMIP6")]
    pub(crate) prefix: String,

    /// TOML file of run settings. Settings can also be given as environment
    /// variables prefixed with CMIP6_WPS_.
    #[clap(long)]
    pub(crate) settings: Option<PathBuf>,

    /// Number of timestamps to convert concurrently. Overrides the settings file.
    #[clap(short = 'j', long)]
    pub(crate) workers: Option<usize>,

    /// How far (in seconds) a source time may be from a requested time and still
    /// match it. Overrides the settings file.
    #[clap(long)]
    pub(crate) time_tolerance: Option<f64>,

    /// Always write the full date and time in output file names,
    /// i.e. PREFIX:YYYY-MM-DD_HH:MM:SS.
    #[clap(long)]
    pub(crate) full_date_names: bool,

    /// Leave missing values in the output instead of filling them by interpolation.
    #[clap(long)]
    pub(crate) no_fill: bool,

    /// Also write the log, at DEBUG level or more verbose, to this file.
    #[clap(long)]
    pub(crate) log_file: Option<PathBuf>,

    /// Write the outcome of every timestamp to this JSON file.
    #[clap(long)]
    pub(crate) summary_json: Option<PathBuf>,

    /// Glob pattern matching source files, e.g. 'data/ta_6hrLev_*.nc'. May be
    /// given more than once.
    #[clap(long)]
    pub(crate) nc_glob: Vec<String>,

    /// Write the default run settings, as a commented TOML file, to this path and exit.
    #[clap(long)]
    pub(crate) write_settings_template: Option<PathBuf>,

    /// Source NetCDF files. The order does not matter, except that when two files
    /// cover the same variable and time, the one given last is used.
    pub(crate) nc_files: Vec<PathBuf>,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,
}
