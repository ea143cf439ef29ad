//! Print the contents of WPS intermediate files, like WPS's `rd_intermediate.exe`.
use std::{fs::File, io::BufReader, path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use error_stack::ResultExt;

use cmip6_wps::{
    intermediate::{IntermediateReader, IntermediateRecord, SerializationError},
    logging::init_logging,
};

#[derive(Debug, Parser)]
struct Cli {
    /// Intermediate files to print
    #[clap(required = true)]
    files: Vec<PathBuf>,

    /// Also print every value of each slab
    #[clap(long)]
    values: bool,

    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

fn main() -> ExitCode {
    let clargs = Cli::parse();
    if let Err(e) = init_logging(clargs.verbosity.log_level_filter(), None) {
        eprintln!("ERROR: {e:?}");
        return ExitCode::FAILURE;
    }

    let mut status = ExitCode::SUCCESS;
    for path in clargs.files.iter() {
        if let Err(e) = print_file(path, clargs.values) {
            eprintln!("ERROR: {e:?}");
            status = ExitCode::FAILURE;
        }
    }
    status
}

fn print_file(path: &PathBuf, print_values: bool) -> error_stack::Result<(), SerializationError> {
    let f = File::open(path)
        .change_context_lazy(|| SerializationError::io(format!("opening {}", path.display())))?;
    println!("{}", path.display());

    let mut n = 0;
    for rec in IntermediateReader::new(BufReader::new(f)) {
        let rec = rec.attach_printable_lazy(|| format!("in field {} of {}", n + 1, path.display()))?;
        print_record(&rec, print_values);
        n += 1;
    }
    println!("{n} fields");
    Ok(())
}

fn print_record(rec: &IntermediateRecord, print_values: bool) {
    println!("================================================");
    println!("FIELD = {}", rec.field);
    println!("UNITS = {} DESCRIPTION = {}", rec.units, rec.description);
    println!("DATE = {} FCST = {:.6}", rec.hdate, rec.forecast_hour);
    println!("SOURCE = {}", rec.map_source);
    println!("LEVEL = {:.6}", rec.level);
    println!("I,J DIMS = {}, {}", rec.grid.nx, rec.grid.ny);
    println!(
        "IPROJ = {}  PROJECTION = {}",
        rec.grid.kind().iproj(),
        rec.grid.kind()
    );
    println!("  STARTLOC = {}", rec.startloc);
    for (name, value) in rec.grid.projection.params() {
        println!("  {name} = {value:.6}");
    }
    println!("  EARTH_RADIUS = {:.6}", rec.earth_radius_km);
    println!("  IS_WIND_EARTH_REL = {}", rec.wind_earth_relative);

    let (min, max, sum, n_valid) = rec.values.iter().filter(|v| !v.is_nan()).fold(
        (f32::INFINITY, f32::NEG_INFINITY, 0.0f64, 0usize),
        |(lo, hi, sum, n), &v| (lo.min(v), hi.max(v), sum + v as f64, n + 1),
    );
    if n_valid > 0 {
        println!(
            "DATA: min = {min:.6}  max = {max:.6}  mean = {:.6}",
            sum / n_valid as f64
        );
    } else {
        println!("DATA: no valid values");
    }
    let n_missing = rec.values.len() - n_valid;
    if n_missing > 0 {
        println!("      {n_missing} missing values");
    }

    if print_values {
        for (j, row) in rec.values.outer_iter().enumerate() {
            for (i, v) in row.iter().enumerate() {
                println!("DATA({},{}) = {v:.6}", i + 1, j + 1);
            }
        }
    }
}
