use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use error_stack::ResultExt;

use cmip6_wps::{
    driver::{CancelFlag, ConversionDriver, RunReport},
    error::RunError,
    logging::init_logging,
    model_config::ModelConfig,
    settings::{ConversionSettings, FileNaming},
    source::index_files,
    time_axis,
};

mod cli;

/// Exit status for a run stopped by SIGINT/SIGTERM, following the shell convention.
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let clargs = cli::Cli::parse();
    if let Err(e) = init_logging(clargs.verbosity.log_level_filter(), clargs.log_file.as_deref()) {
        eprintln!("ERROR: {e:?}");
        return ExitCode::FAILURE;
    }

    match main_inner(clargs) {
        Ok(None) => ExitCode::SUCCESS,
        Ok(Some(report)) if report.cancelled => ExitCode::from(EXIT_INTERRUPTED),
        Ok(Some(report)) if report.is_success() => ExitCode::SUCCESS,
        Ok(Some(_)) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("ERROR: {e:?}");
            ExitCode::FAILURE
        }
    }
}

/// Run the conversion, returning its report, or `None` if there was nothing to convert.
fn main_inner(clargs: cli::Cli) -> error_stack::Result<Option<RunReport>, RunError> {
    if let Some(template) = clargs.write_settings_template.as_deref() {
        ConversionSettings::write_template(template).change_context(RunError::Config)?;
        log::info!("Wrote default settings to {}", template.display());
        return Ok(None);
    }

    let settings = load_settings(&clargs)?;

    // The arguments are only optional when writing the settings template
    let model_conf = clargs
        .model_conf
        .as_deref()
        .ok_or(RunError::Config)
        .attach_printable("--model-conf is required")?;
    let config = ModelConfig::load(model_conf).change_context(RunError::Config)?;

    let timestamps = requested_times(&clargs)?;
    let interval = time_axis::parse_interval(&clargs.interval).change_context(RunError::TimeAxis)?;

    let files = source_files(&clargs)?;
    let catalog = index_files(&files, &settings);
    if catalog.sources().next().is_none() {
        return Err(RunError::NoSources).attach_printable_lazy(|| {
            format!("none of the {} source files could be used", files.len())
        });
    }

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Interrupted, discarding unfinished output files");
        handler_flag.cancel();
    }) {
        log::warn!("Could not install the interrupt handler: {e}");
    }

    let report = ConversionDriver::new(&config, &catalog, &settings)
        .with_cancel_flag(cancel)
        .run(&timestamps, interval, &clargs.prefix)?;

    if let Some(table) = report.summary_table() {
        eprintln!("\nFailed timestamps:\n{table}");
    }
    if let Some(json_path) = clargs.summary_json.as_deref() {
        report.write_json(json_path)?;
    }

    Ok(Some(report))
}

/// Load the run settings and apply the command line overrides.
fn load_settings(clargs: &cli::Cli) -> error_stack::Result<ConversionSettings, RunError> {
    let mut settings =
        ConversionSettings::load(clargs.settings.as_deref()).change_context(RunError::Config)?;

    if let Some(workers) = clargs.workers {
        settings.workers = workers;
    }
    if let Some(tolerance) = clargs.time_tolerance {
        settings.time_tolerance_seconds = tolerance;
    }
    if clargs.full_date_names {
        settings.file_naming = FileNaming::Full;
    }
    if clargs.no_fill {
        settings.fill_missing = false;
    }

    settings.validate().change_context(RunError::Config)?;
    log::debug!("Run settings: {settings:?}");
    Ok(settings)
}

fn requested_times(clargs: &cli::Cli) -> error_stack::Result<Vec<chrono::NaiveDateTime>, RunError> {
    let (Some(start), Some(end)) = (clargs.start.as_deref(), clargs.end.as_deref()) else {
        return Err(RunError::TimeAxis).attach_printable("--start and --end are required");
    };
    let start = time_axis::parse_datetime(start).change_context(RunError::TimeAxis)?;
    let end = time_axis::parse_datetime(end).change_context(RunError::TimeAxis)?;
    let interval = time_axis::parse_interval(&clargs.interval).change_context(RunError::TimeAxis)?;
    let times = time_axis::generate(start, end, interval).change_context(RunError::TimeAxis)?;
    log::info!(
        "Requested {} timestamps from {start} to {end}",
        times.len()
    );
    Ok(times)
}

/// The positional source files plus everything matched by the --nc-glob patterns.
fn source_files(clargs: &cli::Cli) -> error_stack::Result<Vec<PathBuf>, RunError> {
    let mut files = clargs.nc_files.clone();
    for pattern in clargs.nc_glob.iter() {
        let matches = glob::glob(pattern).change_context_lazy(|| RunError::BadGlob(pattern.clone()))?;
        let n_before = files.len();
        for entry in matches {
            match entry {
                Ok(path) => files.push(path),
                Err(e) => log::warn!("Skipping unreadable match of '{pattern}': {e}"),
            }
        }
        if files.len() == n_before {
            log::warn!("'{pattern}' did not match any files");
        }
    }

    if files.is_empty() {
        return Err(RunError::NoSources).attach_printable("give source files as arguments or with --nc-glob");
    }
    Ok(files)
}
