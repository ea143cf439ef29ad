//! The per-model table mapping WPS fields to CMIP6 variables.
//!
//! The table is a CSV file with a header row. Column order does not matter,
//! and lines beginning with `#` are ignored. For example:
//!
//! ```text
//! wps_name,var_id,units,levels,scale
//! PSFC,ps,Pa,surface,
//! TT,ta,K,"100000,85000,70000,50000",
//! LANDSEA,sftlf,fraction,surface,0.01
//! ```
//!
//! Levels are given in Pa, separated by commas, semicolons or whitespace. Surface
//! fields use the sentinel `surface` and mean-sea-level fields `sealevel`.
use std::{
    fmt::Display,
    io::Read,
    path::{Path, PathBuf},
};

use error_stack::ResultExt;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;

use crate::error::ConfigError;

/// XLVL value WPS uses for surface fields.
pub const SURFACE_LEVEL: f64 = 200100.0;
/// XLVL value WPS uses for mean-sea-level fields.
pub const SEA_LEVEL_LEVEL: f64 = 201300.0;
/// Maximum length of the FIELD header string.
pub const MAX_FIELD_LEN: usize = 9;

/// The vertical levels at which one WPS field is written.
#[derive(Debug, Clone, PartialEq)]
pub enum LevelSet {
    Surface,
    SeaLevel,
    /// Pressure levels (Pa), in the order given in the configuration.
    Pressure(Vec<f64>),
}

impl LevelSet {
    pub fn len(&self) -> usize {
        match self {
            LevelSet::Surface | LevelSet::SeaLevel => 1,
            LevelSet::Pressure(levels) => levels.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pressure(&self) -> bool {
        matches!(self, LevelSet::Pressure(_))
    }

    /// The XLVL values to write, in ascending numeric order.
    pub fn ascending(&self) -> Vec<f64> {
        match self {
            LevelSet::Surface => vec![SURFACE_LEVEL],
            LevelSet::SeaLevel => vec![SEA_LEVEL_LEVEL],
            LevelSet::Pressure(levels) => {
                let mut levels = levels.clone();
                levels.sort_by(|a, b| a.total_cmp(b));
                levels
            }
        }
    }
}

impl Display for LevelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelSet::Surface => write!(f, "surface"),
            LevelSet::SeaLevel => write!(f, "sealevel"),
            LevelSet::Pressure(levels) => write!(f, "{}", levels.iter().join(",")),
        }
    }
}

/// One WPS field and where its data comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    /// FIELD name in the intermediate file, e.g. `TT`.
    pub wps_name: String,
    /// Variable name in the source netCDF files, e.g. `ta`.
    pub var_id: String,
    /// UNITS written to the intermediate file.
    pub units: String,
    pub levels: LevelSet,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    /// DESC override; by default the source variable's description is used.
    pub description: Option<String>,
}

impl VariableSpec {
    /// Whether the configuration converts the source values, in which case the
    /// source units are not checked against `units`.
    pub fn is_converted(&self) -> bool {
        self.scale.is_some() || self.offset.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct ConfigRow {
    wps_name: Option<String>,
    var_id: Option<String>,
    units: Option<String>,
    levels: Option<String>,
    scale: Option<String>,
    offset: Option<String>,
    description: Option<String>,
}

/// The ordered list of fields to write for one model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    path: PathBuf,
    variables: Vec<VariableSpec>,
}

impl ModelConfig {
    pub fn load(path: &Path) -> error_stack::Result<Self, ConfigError> {
        let f = std::fs::File::open(path)
            .change_context_lazy(|| ConfigError::CouldNotRead(path.to_path_buf()))?;
        Self::from_reader(f, path)
    }

    /// Parse a configuration table from `reader`; `path` is only used in error messages.
    pub fn from_reader<R: Read>(reader: R, path: &Path) -> error_stack::Result<Self, ConfigError> {
        let mut rdr = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(false)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .change_context_lazy(|| ConfigError::CouldNotRead(path.to_path_buf()))?
            .clone();
        for required in ["wps_name", "var_id", "units", "levels"] {
            if !headers.iter().any(|h| h == required) {
                error_stack::bail!(ConfigError::MissingField {
                    line: 1,
                    field: required
                });
            }
        }

        let mut variables = vec![];
        // FIELD name -> (line first defined, levels) for duplicate detection
        let mut seen: IndexMap<String, (u64, Vec<f64>)> = IndexMap::new();

        for record in rdr.records() {
            let record = record.map_err(|e| {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                error_stack::Report::new(ConfigError::invalid_row(line, e))
            })?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let row: ConfigRow = record
                .deserialize(Some(&headers))
                .map_err(|e| error_stack::Report::new(ConfigError::invalid_row(line, e)))?;
            let spec = parse_row(row, line)?;

            let new_levels = spec.levels.ascending();
            if let Some((first_line, levels)) = seen.get_mut(&spec.wps_name) {
                if let Some(dup) = new_levels.iter().find(|l| levels.contains(l)) {
                    error_stack::bail!(ConfigError::DuplicateField {
                        name: spec.wps_name.clone(),
                        level: *dup,
                        first_line: *first_line,
                        line,
                    });
                }
                levels.extend(new_levels);
            } else {
                seen.insert(spec.wps_name.clone(), (line, new_levels));
            }

            variables.push(spec);
        }

        if variables.is_empty() {
            error_stack::bail!(ConfigError::Empty(path.to_path_buf()));
        }

        log::debug!(
            "Loaded {} variables ({} records per timestamp) from {}",
            variables.len(),
            variables.iter().map(|v| v.levels.len()).sum::<usize>(),
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            variables,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn variables(&self) -> &[VariableSpec] {
        &self.variables
    }

    /// The number of records every complete output file contains.
    pub fn total_records(&self) -> usize {
        self.variables.iter().map(|v| v.levels.len()).sum()
    }
}

fn required(value: Option<String>, line: u64, field: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingField { line, field })
}

fn optional_number(value: Option<String>, line: u64, field: &str) -> Result<Option<f64>, ConfigError> {
    let Some(value) = value else { return Ok(None) };
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }

    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| ConfigError::invalid_row(line, format!("{field} '{value}' is not a number")))
}

fn parse_row(row: ConfigRow, line: u64) -> Result<VariableSpec, ConfigError> {
    let wps_name = required(row.wps_name, line, "wps_name")?;
    let var_id = required(row.var_id, line, "var_id")?;
    let units = required(row.units, line, "units")?;
    let levels = required(row.levels, line, "levels")?;

    if wps_name.len() > MAX_FIELD_LEN || !wps_name.is_ascii() {
        return Err(ConfigError::invalid_row(
            line,
            format!("wps_name '{wps_name}' must be ASCII and at most {MAX_FIELD_LEN} characters"),
        ));
    }

    let levels = parse_levels(&levels, line, &wps_name)?;
    let scale = optional_number(row.scale, line, "scale")?;
    let offset = optional_number(row.offset, line, "offset")?;
    let description = row.description.filter(|d| !d.is_empty());

    Ok(VariableSpec {
        wps_name,
        var_id,
        units,
        levels,
        scale,
        offset,
        description,
    })
}

fn parse_levels(s: &str, line: u64, name: &str) -> Result<LevelSet, ConfigError> {
    let tokens = s
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect_vec();

    let sentinel = |t: &str| match t.to_ascii_lowercase().as_str() {
        "surface" | "sfc" => Some(LevelSet::Surface),
        "sealevel" | "msl" => Some(LevelSet::SeaLevel),
        _ => None,
    };

    if let [single] = tokens.as_slice() {
        if let Some(set) = sentinel(single) {
            return Ok(set);
        }
    }

    let mut levels = Vec::with_capacity(tokens.len());
    for t in tokens.iter() {
        if sentinel(t).is_some() {
            return Err(ConfigError::invalid_row(
                line,
                format!("the '{t}' level for '{name}' must be the only level"),
            ));
        }
        let value = t
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ConfigError::invalid_row(line, format!("level '{t}' for '{name}' is not a number")))?;
        levels.push(value);
    }

    // The numeric forms of the sentinels are also accepted.
    match levels.as_slice() {
        [] => return Err(ConfigError::MissingField { line, field: "levels" }),
        [l] if *l == SURFACE_LEVEL => return Ok(LevelSet::Surface),
        [l] if *l == SEA_LEVEL_LEVEL => return Ok(LevelSet::SeaLevel),
        _ => (),
    }

    let increasing = levels.windows(2).all(|w| w[1] > w[0]);
    let decreasing = levels.windows(2).all(|w| w[1] < w[0]);
    if !increasing && !decreasing {
        return Err(ConfigError::LevelsNotOrdered {
            line,
            name: name.to_string(),
            levels: s.to_string(),
        });
    }

    Ok(LevelSet::Pressure(levels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(s: &str) -> error_stack::Result<ModelConfig, ConfigError> {
        ModelConfig::from_reader(s.as_bytes(), Path::new("test.csv"))
    }

    #[test]
    fn test_load_config() {
        let config = parse(
            "# MPI-ESM1-2-HR 6-hourly\n\
             wps_name,var_id,units,levels,scale,description\n\
             PSFC,ps,Pa,surface,,\n\
             PMSL,psl,Pa,sealevel,,\n\
             TT,ta,K,\"100000, 85000, 70000\",,\n\
             TT,tas,K,surface,,\n\
             LANDSEA,sftlf,fraction,surface,0.01,Land mask\n",
        )
        .unwrap();

        let names = config.variables().iter().map(|v| v.wps_name.as_str()).collect_vec();
        assert_eq!(names, ["PSFC", "PMSL", "TT", "TT", "LANDSEA"]);
        assert_eq!(config.total_records(), 7);

        let tt = &config.variables()[2];
        assert_eq!(tt.levels, LevelSet::Pressure(vec![100000.0, 85000.0, 70000.0]));
        assert_eq!(tt.levels.ascending(), vec![70000.0, 85000.0, 100000.0]);
        assert!(!tt.is_converted());

        let lsm = &config.variables()[4];
        assert_eq!(lsm.scale, Some(0.01));
        assert_eq!(lsm.description.as_deref(), Some("Land mask"));
        assert!(lsm.is_converted());
        assert_eq!(config.variables()[1].levels.ascending(), vec![SEA_LEVEL_LEVEL]);
    }

    #[test]
    fn test_example_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/example_cmip6.csv");
        let config = ModelConfig::load(&path).unwrap();
        // 5 variables on 17 levels plus 11 single level fields
        assert_eq!(config.total_records(), 96);
        let sst = config.variables().iter().find(|v| v.wps_name == "SST").unwrap();
        assert_eq!(sst.offset, Some(273.15));
    }

    #[test]
    fn test_column_order_free() {
        let config = parse("levels,units,var_id,wps_name\n200100,Pa,ps,PSFC\n").unwrap();
        assert_eq!(config.variables()[0].var_id, "ps");
        assert_eq!(config.variables()[0].levels, LevelSet::Surface);
    }

    #[rstest]
    #[case("100000 85000 50000", vec![100000.0, 85000.0, 50000.0])]
    #[case("100000;85000", vec![100000.0, 85000.0])]
    #[case("1000,5000,10000", vec![1000.0, 5000.0, 10000.0])]
    fn test_level_delimiters(#[case] s: &str, #[case] expected: Vec<f64>) {
        assert_eq!(parse_levels(s, 2, "TT").unwrap(), LevelSet::Pressure(expected));
    }

    #[rstest]
    #[case("100000,85000,85000")]
    #[case("100000,50000,85000")]
    fn test_levels_not_ordered(#[case] s: &str) {
        assert!(matches!(
            parse_levels(s, 2, "TT"),
            Err(ConfigError::LevelsNotOrdered { .. })
        ));
    }

    #[test]
    fn test_sentinel_must_be_alone() {
        assert!(matches!(
            parse_levels("surface,85000", 2, "TT"),
            Err(ConfigError::InvalidRow { .. })
        ));
    }

    #[test]
    fn test_missing_field() {
        let err = parse("wps_name,var_id,units,levels\nTT,,K,85000\n").unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::MissingField { line: 2, field: "var_id" }
        ));

        let err = parse("wps_name,var_id,units\nTT,ta,K\n").unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::MissingField { field: "levels", .. }
        ));
    }

    #[test]
    fn test_duplicate_field() {
        let err = parse("wps_name,var_id,units,levels\nTT,ta,K,\"100000,85000\"\nTT,ta2,K,85000\n")
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::DuplicateField { first_line: 2, line: 3, .. }
        ));

        let err = parse("wps_name,var_id,units,levels\nPSFC,ps,Pa,surface\nPSFC,ps,Pa,200100\n")
            .unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::DuplicateField { .. }));
    }

    #[test]
    fn test_same_field_disjoint_levels() {
        let config = parse(
            "wps_name,var_id,units,levels\n\
             TT,ta,K,\"100000,85000\"\n\
             TT,ta_upper,K,\"50000,25000\"\n\
             TT,tas,K,surface\n",
        )
        .unwrap();
        assert_eq!(config.total_records(), 5);

        let err = parse(
            "wps_name,var_id,units,levels\n\
             TT,ta,K,\"100000,85000\"\n\
             TT,tas,K,surface\n\
             TT,ta_upper,K,\"85000,50000\"\n",
        )
        .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::DuplicateField { first_line: 2, line: 4, level, .. } if *level == 85000.0
        ));
    }

    #[test]
    fn test_bad_rows() {
        let err = parse("wps_name,var_id,units,levels\nSOILMOIST010,mrsos,kg m-2,surface\n").unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::InvalidRow { .. }));

        let err = parse("wps_name,var_id,units,levels,scale\nLANDSEA,sftlf,1,surface,percent\n")
            .unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::InvalidRow { .. }));

        let err = parse("wps_name,var_id,units,levels\n# nothing here\n").unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Empty(_)));
    }
}
