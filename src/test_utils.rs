//! Helpers shared by the unit tests.
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array2;

use crate::{
    cf_time::CfTimeAxis,
    grid::GridDescriptor,
    model_config::{LevelSet, VariableSpec},
    source::{MemorySource, VariableInfo},
};

pub(crate) const TEST_NX: usize = 4;
pub(crate) const TEST_NY: usize = 3;

pub(crate) fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, 0, 0)
        .unwrap()
}

/// A small global-ish lat/lon grid: 4 longitudes by 3 latitudes.
pub(crate) fn test_grid() -> GridDescriptor {
    GridDescriptor::lat_lon(-45.0, 0.0, 45.0, 90.0, TEST_NX, TEST_NY)
}

pub(crate) fn surface_spec(wps_name: &str, var_id: &str, units: &str) -> VariableSpec {
    VariableSpec {
        wps_name: wps_name.to_string(),
        var_id: var_id.to_string(),
        units: units.to_string(),
        levels: LevelSet::Surface,
        scale: None,
        offset: None,
        description: None,
    }
}

/// Builds in-memory sources on [`test_grid`] (unless another grid is given).
///
/// Every slab is constant: surface and time-invariant variables hold the value
/// given, and level `k` of a variable on levels holds that value plus `k`.
pub(crate) struct SourceBuilder {
    path: String,
    time_units: String,
    calendar: Option<String>,
    times: Vec<f64>,
    grid: GridDescriptor,
    variables: Vec<(VariableInfo, f64)>,
}

impl SourceBuilder {
    pub(crate) fn new(path: &str, time_units: &str) -> Self {
        Self {
            path: path.to_string(),
            time_units: time_units.to_string(),
            calendar: None,
            times: vec![],
            grid: test_grid(),
            variables: vec![],
        }
    }

    pub(crate) fn calendar(mut self, calendar: &str) -> Self {
        self.calendar = Some(calendar.to_string());
        self
    }

    pub(crate) fn times(mut self, times: &[f64]) -> Self {
        self.times = times.to_vec();
        self
    }

    pub(crate) fn grid(mut self, grid: GridDescriptor) -> Self {
        self.grid = grid;
        self
    }

    pub(crate) fn surface_variable(mut self, name: &str, units: &str, value: f64) -> Self {
        self.variables
            .push((VariableInfo::new(name, units, name), value));
        self
    }

    pub(crate) fn level_variable(mut self, name: &str, units: &str, levels: &[f64], value: f64) -> Self {
        self.variables.push((
            VariableInfo::new(name, units, name).with_levels(levels.to_vec()),
            value,
        ));
        self
    }

    pub(crate) fn static_variable(mut self, name: &str, units: &str, value: f64) -> Self {
        self.variables
            .push((VariableInfo::new(name, units, name).time_invariant(), value));
        self
    }

    pub(crate) fn build(self) -> MemorySource {
        let time = if self.times.is_empty() {
            None
        } else {
            Some(
                CfTimeAxis::new(&self.time_units, self.calendar.as_deref(), self.times.clone())
                    .expect("test time axis should be valid"),
            )
        };
        let shape = (self.grid.ny, self.grid.nx);
        let mut source = MemorySource::new(&self.path, self.grid, time);

        for (info, value) in self.variables {
            let time_indices: Vec<Option<usize>> = if info.time_dependent {
                (0..self.times.len()).map(Some).collect()
            } else {
                vec![None]
            };
            let level_indices: Vec<Option<usize>> = match &info.levels {
                Some(levels) => (0..levels.len()).map(Some).collect(),
                None => vec![None],
            };

            for &itime in time_indices.iter() {
                for &ilev in level_indices.iter() {
                    let v = value + ilev.unwrap_or(0) as f64;
                    source.insert_slab(&info.name, itime, ilev, Array2::from_elem(shape, v));
                }
            }
            source.declare_variable(info);
        }
        source
    }
}

pub(crate) fn assert_files_identical(a: &Path, b: &Path) {
    let bytes_a = std::fs::read(a).expect("should be able to read first file");
    let bytes_b = std::fs::read(b).expect("should be able to read second file");
    assert!(
        bytes_a == bytes_b,
        "{} and {} differ",
        a.display(),
        b.display()
    );
}
