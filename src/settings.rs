//! Run settings that are not part of the per-model variable table.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `CMIP6_WPS_` (e.g. `CMIP6_WPS_WORKERS=4`).
//! The command line applies its own overrides on top of the result.
use std::{io::Write, path::Path};

use error_stack::ResultExt;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_PREFIX: &str = "CMIP6_WPS_";

/// How output files are named, see [`crate::time_axis::file_date`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FileNaming {
    /// `<prefix>:YYYY-MM-DD_HH` (or finer if the interval requires it), as `ungrib.exe` does.
    Ungrib,
    /// Always `<prefix>:YYYY-MM-DD_HH:MM:SS`.
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
    /// Label written to the MAP_SOURCE field of every record.
    pub map_source: String,
    /// Earth radius (km) written to the projection block.
    pub earth_radius_km: f32,
    /// How far (in seconds) a source time may be from a requested time and still match it.
    pub time_tolerance_seconds: f64,
    /// Maximum difference between numeric grid parameters for two grids to be compatible.
    pub grid_tolerance: f64,
    /// Maximum difference (Pa) between a configured level and a source level.
    pub level_tolerance_pa: f64,
    /// Fill missing values by linear interpolation along latitude, then longitude.
    pub fill_missing: bool,
    /// Number of timestamps converted concurrently.
    pub workers: usize,
    pub file_naming: FileNaming,
    /// Value of the XFCST field.
    pub forecast_hour: f32,
    /// Value of the IS_WIND_EARTH_REL field.
    pub wind_earth_relative: bool,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            map_source: "CMIP6".to_string(),
            earth_radius_km: 6367.47,
            time_tolerance_seconds: 60.0,
            grid_tolerance: 1e-4,
            level_tolerance_pa: 0.5,
            fill_missing: true,
            workers: 1,
            file_naming: FileNaming::Ungrib,
            forecast_hour: 0.0,
            wind_earth_relative: false,
        }
    }
}

impl ConversionSettings {
    /// Load settings from the defaults, `settings_file` (if given) and the environment.
    pub fn load(settings_file: Option<&Path>) -> error_stack::Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = settings_file {
            // Figment treats a missing file as empty, but a missing file the user asked
            // for is almost certainly a mistake.
            if !path.is_file() {
                error_stack::bail!(ConfigError::CouldNotRead(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Load settings from a TOML string layered over the defaults, ignoring the environment.
    pub fn from_toml_str(toml_str: &str) -> error_stack::Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml_str)))
    }

    fn extract(figment: Figment) -> error_stack::Result<Self, ConfigError> {
        let settings: Self = figment
            .extract()
            .map_err(|e| error_stack::Report::new(ConfigError::invalid_settings(e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid_settings("workers must be at least 1"));
        }

        let tolerances = [
            ("time_tolerance_seconds", self.time_tolerance_seconds),
            ("grid_tolerance", self.grid_tolerance),
            ("level_tolerance_pa", self.level_tolerance_pa),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid_settings(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if !(self.earth_radius_km.is_finite() && self.earth_radius_km > 0.0) {
            return Err(ConfigError::invalid_settings(format!(
                "earth_radius_km must be positive, got {}",
                self.earth_radius_km
            )));
        }

        if !self.map_source.is_ascii() {
            return Err(ConfigError::invalid_settings("map_source must be ASCII"));
        }

        Ok(())
    }

    /// Write the default settings as a commented TOML file.
    pub fn write_template(path: &Path) -> error_stack::Result<(), ConfigError> {
        let comments = [
            "Run settings for cmip6_to_wps. Every key is optional; missing keys take the",
            "values shown here. Any key can also be set through an environment variable",
            "named CMIP6_WPS_<KEY>, e.g. CMIP6_WPS_WORKERS=4, which takes precedence over",
            "this file. Command line options take precedence over both.",
        ];
        let s = toml::to_string_pretty(&Self::default())
            .map_err(|e| error_stack::Report::new(ConfigError::invalid_settings(e)))?;

        let mut f = std::fs::File::create(path)
            .change_context_lazy(|| ConfigError::CouldNotRead(path.to_path_buf()))?;
        for line in comments {
            writeln!(f, "# {line}")
                .change_context_lazy(|| ConfigError::CouldNotRead(path.to_path_buf()))?;
        }
        write!(f, "{s}").change_context_lazy(|| ConfigError::CouldNotRead(path.to_path_buf()))?;
        Ok(())
    }
}
