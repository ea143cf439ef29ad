//! CF-convention NetCDF files as data sources.
use std::{
    collections::HashMap,
    fmt::Display,
    ops::Range,
    path::{Path, PathBuf},
    sync::Mutex,
};

use error_stack::ResultExt;
use indexmap::IndexMap;
use ndarray::{s, Array2};
use netcdf::{AttributeValue, Extents};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use super::{SourceError, SourceFile, SourceInventory, VariableInfo};
use crate::{
    catalog::Catalog,
    cf_time::CfTimeAxis,
    field::RawField,
    grid::{GridDescriptor, GridMapping},
    settings::ConversionSettings,
};

/// How to pull one horizontal slab of a variable out of its file.
#[derive(Debug, Clone)]
struct VarLayout {
    /// Length of each dimension of the variable
    dim_lens: Vec<usize>,
    time_dim: Option<usize>,
    level_dim: Option<usize>,
    scale: f64,
    offset: f64,
    fill_values: Vec<f64>,
}

/// The horizontal dimensions of a file and how its rows map onto the grid.
#[derive(Debug, Clone)]
struct HorizontalAxes {
    y_dim: String,
    x_dim: String,
    grid: GridDescriptor,
    /// Rows are stored north to south and must be reversed.
    flip_y: bool,
}

/// A NetCDF file following the CF conventions, as CMIP6 output does.
///
/// Variables are recognized if their last two dimensions are the file's horizontal
/// dimensions. Any other dimensions must be the time dimension, a pressure
/// coordinate, or have length 1.
pub struct NcSourceFile {
    path: PathBuf,
    file: Mutex<netcdf::File>,
    inventory: SourceInventory,
    layouts: HashMap<String, VarLayout>,
    flip_y: bool,
}

impl NcSourceFile {
    pub fn open(path: &Path) -> error_stack::Result<Self, SourceError> {
        let file = netcdf::open(path).change_context_lazy(|| SourceError::Open(path.to_path_buf()))?;

        let time = read_time_axis(&file, path)?;
        let axes = find_horizontal_axes(&file, path)?;
        let time_dim = time.as_ref().map(|(name, _)| name.clone());
        let vertical = find_vertical_axes(&file);

        let mut variables = IndexMap::new();
        let mut layouts = HashMap::new();
        for var in file.variables() {
            let name = var.name();
            match describe_variable(&var, &axes, time_dim.as_deref(), &vertical) {
                Some((info, layout)) => {
                    variables.insert(name.clone(), info);
                    layouts.insert(name, layout);
                }
                None => log::trace!("{}: skipping '{name}'", path.display()),
            }
        }

        if variables.is_empty() {
            error_stack::bail!(SourceError::NoVariables(path.to_path_buf()));
        }

        log::debug!(
            "{}: found variables {} on a {} grid",
            path.display(),
            variables.keys().map(|k| k.as_str()).collect::<Vec<_>>().join(", "),
            axes.grid.kind()
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            inventory: SourceInventory {
                time: time.map(|(_, axis)| axis),
                grid: axes.grid,
                variables,
            },
            layouts,
            flip_y: axes.flip_y,
        })
    }
}

impl Display for NcSourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl SourceFile for NcSourceFile {
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
        let info = self.inventory.variables.get(variable).ok_or_else(|| SourceError::MissingVariable {
            path: self.path.clone(),
            variable: variable.to_string(),
        })?;
        let layout = self
            .layouts
            .get(variable)
            .ok_or_else(|| SourceError::read(&self.path, variable))?;

        let ranges = layout.slab_ranges(time_index, level_index).ok_or_else(|| {
            error_stack::Report::new(SourceError::read(&self.path, variable)).attach_printable(format!(
                "time index {time_index:?} or level index {level_index:?} is out of range"
            ))
        })?;
        let extents = ranges_to_extents(&ranges).ok_or_else(|| {
            error_stack::Report::new(SourceError::read(&self.path, variable))
                .attach_printable(format!("unsupported number of dimensions ({})", ranges.len()))
        })?;

        let raw = {
            let file = self
                .file
                .lock()
                .map_err(|_| SourceError::read(&self.path, variable))
                .attach_printable("file handle lock was poisoned")?;
            let var = file
                .variable(variable)
                .ok_or_else(|| SourceError::read(&self.path, variable))?;
            var.get::<f64, _>(extents)
                .change_context_lazy(|| SourceError::read(&self.path, variable))?
        };

        let (ny, nx) = (self.inventory.grid.ny, self.inventory.grid.nx);
        let mut values = raw
            .into_shape((ny, nx))
            .change_context_lazy(|| SourceError::read(&self.path, variable))?;
        layout.unpack(&mut values);

        if self.flip_y {
            values = values.slice(s![..;-1, ..]).to_owned();
        }

        Ok(RawField {
            values,
            grid: self.inventory.grid.clone(),
            units: info.units.clone(),
            description: info.description.clone(),
        })
    }
}

impl VarLayout {
    fn slab_ranges(&self, time_index: Option<usize>, level_index: Option<usize>) -> Option<Vec<Range<usize>>> {
        let ndims = self.dim_lens.len();
        let mut ranges = Vec::with_capacity(ndims);
        for (idim, &len) in self.dim_lens.iter().enumerate() {
            let range = if idim + 2 >= ndims {
                0..len
            } else if Some(idim) == self.time_dim {
                let it = time_index?;
                it..it + 1
            } else if Some(idim) == self.level_dim {
                let ik = level_index.unwrap_or(0);
                ik..ik + 1
            } else {
                0..1
            };
            if range.end > len {
                return None;
            }
            ranges.push(range);
        }
        Some(ranges)
    }

    /// Replace fill and non-finite values with NaN and apply the packing attributes.
    fn unpack(&self, values: &mut Array2<f64>) {
        let fills = &self.fill_values;
        let (scale, offset) = (self.scale, self.offset);
        values.mapv_inplace(|v| {
            if !v.is_finite() || fills.iter().any(|&f| v == f || (f.abs() > 1e10 && (v - f).abs() <= 1e-6 * f.abs())) {
                f64::NAN
            } else {
                v * scale + offset
            }
        });
    }
}

fn ranges_to_extents(ranges: &[Range<usize>]) -> Option<Extents> {
    let extents = match ranges {
        [a, b] => [a.clone(), b.clone()].into(),
        [a, b, c] => [a.clone(), b.clone(), c.clone()].into(),
        [a, b, c, d] => [a.clone(), b.clone(), c.clone(), d.clone()].into(),
        [a, b, c, d, e] => [a.clone(), b.clone(), c.clone(), d.clone(), e.clone()].into(),
        _ => return None,
    };
    Some(extents)
}

/// Open every file in `paths` and index the ones that can be used.
///
/// Files that cannot be opened or described are logged and recorded in the
/// catalog's rejected list rather than stopping the run.
pub fn index_files(paths: &[PathBuf], settings: &ConversionSettings) -> Catalog {
    let opened: Vec<_> = paths
        .par_iter()
        .map(|p| (p, NcSourceFile::open(p)))
        .collect();

    let mut builder = Catalog::builder()
        .time_tolerance(settings.time_tolerance_seconds)
        .level_tolerance(settings.level_tolerance_pa);
    for (path, res) in opened {
        match res {
            Ok(source) => builder.add(Box::new(source)),
            Err(e) => {
                log::warn!("Ignoring {}: {e:?}", path.display());
                builder.reject(path.clone(), e.current_context());
            }
        }
    }

    let catalog = builder.build();
    log::info!(
        "Indexed {} source files ({} rejected)",
        catalog.sources().count(),
        catalog.rejected().len()
    );
    catalog
}

// ------------------------------------ //
// Coordinate detection                 //
// ------------------------------------ //

/// A pressure coordinate: its dimension name and levels in Pa.
type VerticalAxes = HashMap<String, Vec<f64>>;

fn is_coordinate_var(var: &netcdf::Variable) -> bool {
    let dims = var.dimensions();
    dims.len() == 1 && dims[0].name() == var.name()
}

fn read_time_axis(
    file: &netcdf::File,
    path: &Path,
) -> error_stack::Result<Option<(String, CfTimeAxis)>, SourceError> {
    let Some(var) = file.variables().find(|v| is_coordinate_var(v) && is_time_var(v)) else {
        return Ok(None);
    };

    let units = attr_string(&var, "units")
        .ok_or_else(|| SourceError::Time(path.to_path_buf()))
        .attach_printable("time coordinate has no units")?;
    let calendar = attr_string(&var, "calendar");
    let values = var
        .get_values::<f64, _>(Extents::All)
        .change_context_lazy(|| SourceError::Time(path.to_path_buf()))?;
    let axis = CfTimeAxis::new(&units, calendar.as_deref(), values)
        .change_context_lazy(|| SourceError::Time(path.to_path_buf()))?;
    Ok(Some((var.name(), axis)))
}

fn is_time_var(var: &netcdf::Variable) -> bool {
    attr_string(var, "axis").is_some_and(|a| a == "T")
        || attr_string(var, "standard_name").is_some_and(|s| s == "time")
        || var.name() == "time"
}

fn is_lat_var(var: &netcdf::Variable) -> bool {
    attr_string(var, "standard_name").is_some_and(|s| s == "latitude")
        || attr_string(var, "units").is_some_and(|u| {
            matches!(u.as_str(), "degrees_north" | "degree_north" | "degree_N" | "degrees_N")
        })
        || matches!(var.name().as_str(), "lat" | "latitude")
}

fn is_lon_var(var: &netcdf::Variable) -> bool {
    attr_string(var, "standard_name").is_some_and(|s| s == "longitude")
        || attr_string(var, "units").is_some_and(|u| {
            matches!(u.as_str(), "degrees_east" | "degree_east" | "degree_E" | "degrees_E")
        })
        || matches!(var.name().as_str(), "lon" | "longitude")
}

fn is_projection_coord(var: &netcdf::Variable, axis: &str) -> bool {
    let standard_name = format!("projection_{}_coordinate", axis.to_lowercase());
    attr_string(var, "standard_name").is_some_and(|s| s == standard_name)
        || attr_string(var, "axis").is_some_and(|a| a == axis)
}

fn find_horizontal_axes(file: &netcdf::File, path: &Path) -> error_stack::Result<HorizontalAxes, SourceError> {
    let grid_err = || SourceError::Grid(path.to_path_buf());

    // A grid mapping on any variable means the data are on projected x/y coordinates
    let mapping_name = file.variables().find_map(|v| attr_string(&v, "grid_mapping"));
    if let Some(mapping_name) = mapping_name {
        let mapping_var = file
            .variable(&mapping_name)
            .ok_or_else(grid_err)
            .attach_printable_lazy(|| format!("grid mapping variable '{mapping_name}' not found"))?;
        return projected_axes(file, &mapping_var, path);
    }

    let lat = file
        .variables()
        .find(|v| is_coordinate_var(v) && is_lat_var(v))
        .ok_or_else(grid_err)
        .attach_printable("no latitude coordinate")?;
    let lon = file
        .variables()
        .find(|v| is_coordinate_var(v) && is_lon_var(v))
        .ok_or_else(grid_err)
        .attach_printable("no longitude coordinate")?;

    let mut lats = lat.get_values::<f64, _>(Extents::All).change_context_lazy(grid_err)?;
    let lons = lon.get_values::<f64, _>(Extents::All).change_context_lazy(grid_err)?;

    let flip_y = lats.len() > 1 && lats[0] > lats[lats.len() - 1];
    if flip_y {
        lats.reverse();
    }

    let grid = GridDescriptor::from_coordinates(&lats, &lons).change_context_lazy(grid_err)?;
    Ok(HorizontalAxes {
        y_dim: lat.name(),
        x_dim: lon.name(),
        grid,
        flip_y,
    })
}

fn projected_axes(
    file: &netcdf::File,
    mapping_var: &netcdf::Variable,
    path: &Path,
) -> error_stack::Result<HorizontalAxes, SourceError> {
    let grid_err = || SourceError::Grid(path.to_path_buf());

    let name = attr_string(mapping_var, "grid_mapping_name")
        .ok_or_else(grid_err)
        .attach_printable("grid mapping has no grid_mapping_name")?;
    let mut mapping = GridMapping::new(&name);
    for attr in mapping_var.attributes() {
        if let Ok(value) = attr.value() {
            if let Some(values) = attr_value_as_f64s(value) {
                mapping = mapping.with_param(&attr.name(), &values);
            }
        }
    }

    let x = file
        .variables()
        .find(|v| is_coordinate_var(v) && is_projection_coord(v, "X"))
        .ok_or_else(grid_err)
        .attach_printable("no projection x coordinate")?;
    let y = file
        .variables()
        .find(|v| is_coordinate_var(v) && is_projection_coord(v, "Y"))
        .ok_or_else(grid_err)
        .attach_printable("no projection y coordinate")?;
    let xs = coordinate_in_meters(&x).change_context_lazy(grid_err)?;
    let ys = coordinate_in_meters(&y).change_context_lazy(grid_err)?;

    // The corner latitude and longitude come from the 2D auxiliary coordinates
    let corner = |is_var: fn(&netcdf::Variable) -> bool, what: &str| {
        let var = file
            .variables()
            .find(|v| v.dimensions().len() == 2 && is_var(v))
            .ok_or_else(grid_err)
            .attach_printable_lazy(|| format!("no 2D {what} variable"))?;
        let v = var
            .get_values::<f64, _>([0..1, 0..1])
            .change_context_lazy(grid_err)?;
        v.first()
            .copied()
            .ok_or_else(grid_err)
            .attach_printable_lazy(|| format!("{what} variable is empty"))
    };
    let start_lat = corner(is_lat_var, "latitude")?;
    let start_lon = corner(is_lon_var, "longitude")?;

    let grid = GridDescriptor::from_grid_mapping(&mapping, &xs, &ys, start_lat, start_lon)
        .change_context_lazy(grid_err)?;
    Ok(HorizontalAxes {
        y_dim: y.name(),
        x_dim: x.name(),
        grid,
        flip_y: false,
    })
}

fn coordinate_in_meters(var: &netcdf::Variable) -> netcdf::Result<Vec<f64>> {
    let mut values = var.get_values::<f64, _>(Extents::All)?;
    if attr_string(var, "units").is_some_and(|u| u == "km") {
        values.iter_mut().for_each(|v| *v *= 1000.0);
    }
    Ok(values)
}

/// Find pressure coordinates, converted to Pa.
fn find_vertical_axes(file: &netcdf::File) -> VerticalAxes {
    let mut axes = HashMap::new();
    for var in file.variables().filter(is_coordinate_var) {
        let is_vertical = attr_string(&var, "axis").is_some_and(|a| a == "Z")
            || attr_string(&var, "standard_name").is_some_and(|s| s == "air_pressure")
            || var.name() == "plev";
        if !is_vertical {
            continue;
        }

        let units = attr_string(&var, "units").unwrap_or_default();
        let Some(factor) = pressure_to_pa(&units) else {
            log::debug!("Vertical coordinate '{}' is not pressure (units '{units}')", var.name());
            continue;
        };
        match var.get_values::<f64, _>(Extents::All) {
            Ok(values) => {
                axes.insert(var.name(), values.into_iter().map(|v| v * factor).collect());
            }
            Err(e) => log::warn!("Could not read vertical coordinate '{}': {e}", var.name()),
        }
    }
    axes
}

fn pressure_to_pa(units: &str) -> Option<f64> {
    match units {
        "Pa" => Some(1.0),
        "hPa" | "mbar" | "mb" | "millibar" => Some(100.0),
        "kPa" => Some(1000.0),
        _ => None,
    }
}

fn describe_variable(
    var: &netcdf::Variable,
    axes: &HorizontalAxes,
    time_dim: Option<&str>,
    vertical: &VerticalAxes,
) -> Option<(VariableInfo, VarLayout)> {
    let dims = var.dimensions();
    let ndims = dims.len();
    if ndims < 2 || dims[ndims - 2].name() != axes.y_dim || dims[ndims - 1].name() != axes.x_dim {
        return None;
    }

    let mut time_idx = None;
    let mut level_idx = None;
    let mut levels = None;
    for (idim, dim) in dims[..ndims - 2].iter().enumerate() {
        let dim_name = dim.name();
        if Some(dim_name.as_str()) == time_dim {
            time_idx = Some(idim);
        } else if let Some(plevs) = vertical.get(&dim_name) {
            level_idx = Some(idim);
            levels = Some(plevs.clone());
        } else if dim.len() != 1 {
            log::debug!("'{}' has an unexpected dimension '{dim_name}'", var.name());
            return None;
        }
    }

    let units = attr_string(var, "units");
    let description = attr_string(var, "standard_name")
        .or_else(|| attr_string(var, "long_name"))
        .unwrap_or_else(|| var.name());

    let mut fill_values = vec![];
    for key in ["_FillValue", "missing_value"] {
        if let Some(v) = attr_f64s(var, key) {
            fill_values.extend(v);
        }
    }

    let info = VariableInfo {
        name: var.name(),
        units,
        description,
        time_dependent: time_idx.is_some(),
        levels,
    };
    let layout = VarLayout {
        dim_lens: dims.iter().map(|d| d.len()).collect(),
        time_dim: time_idx,
        level_dim: level_idx,
        scale: attr_f64s(var, "scale_factor").and_then(|v| v.first().copied()).unwrap_or(1.0),
        offset: attr_f64s(var, "add_offset").and_then(|v| v.first().copied()).unwrap_or(0.0),
        fill_values,
    };
    Some((info, layout))
}

// ------------------------------------ //
// Attribute helpers                    //
// ------------------------------------ //

fn attr_string(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute(name)?.value().ok()? {
        AttributeValue::Str(s) => Some(s.trim().to_string()),
        AttributeValue::Strs(s) => Some(s.join(" ").trim().to_string()),
        _ => None,
    }
}

fn attr_f64s(var: &netcdf::Variable, name: &str) -> Option<Vec<f64>> {
    attr_value_as_f64s(var.attribute(name)?.value().ok()?)
}

fn attr_value_as_f64s(value: AttributeValue) -> Option<Vec<f64>> {
    let values = match value {
        AttributeValue::Double(v) => vec![v],
        AttributeValue::Doubles(v) => v,
        AttributeValue::Float(v) => vec![v as f64],
        AttributeValue::Floats(v) => v.into_iter().map(|x| x as f64).collect(),
        AttributeValue::Int(v) => vec![v as f64],
        AttributeValue::Ints(v) => v.into_iter().map(|x| x as f64).collect(),
        AttributeValue::Short(v) => vec![v as f64],
        AttributeValue::Shorts(v) => v.into_iter().map(|x| x as f64).collect(),
        AttributeValue::Longlong(v) => vec![v as f64],
        AttributeValue::Longlongs(v) => v.into_iter().map(|x| x as f64).collect(),
        AttributeValue::Schar(v) => vec![v as f64],
        AttributeValue::Uchar(v) => vec![v as f64],
        _ => return None,
    };
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::dt;
    use approx::assert_abs_diff_eq;

    /// Writes a small CMIP6-like file: `ta(time, plev, lat, lon)` with packed values
    /// and a fill value, plus the time-invariant `orog(lat, lon)`.
    fn write_test_file(path: &Path) {
        let mut f = netcdf::create(path).unwrap();
        f.add_dimension("time", 2).unwrap();
        f.add_dimension("plev", 2).unwrap();
        f.add_dimension("lat", 3).unwrap();
        f.add_dimension("lon", 4).unwrap();

        let mut time = f.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "hours since 2010-01-05 00:00:00").unwrap();
        time.put_attribute("calendar", "noleap").unwrap();
        time.put_values(&[0.0, 6.0], Extents::All).unwrap();

        let mut plev = f.add_variable::<f64>("plev", &["plev"]).unwrap();
        plev.put_attribute("units", "hPa").unwrap();
        plev.put_attribute("axis", "Z").unwrap();
        plev.put_values(&[1000.0, 850.0], Extents::All).unwrap();

        // North to south, as some models store it
        let mut lat = f.add_variable::<f64>("lat", &["lat"]).unwrap();
        lat.put_attribute("units", "degrees_north").unwrap();
        lat.put_values(&[45.0, 0.0, -45.0], Extents::All).unwrap();

        let mut lon = f.add_variable::<f64>("lon", &["lon"]).unwrap();
        lon.put_attribute("units", "degrees_east").unwrap();
        lon.put_values(&[0.0, 90.0, 180.0, 270.0], Extents::All).unwrap();

        // Stored value = 1000 * t + 100 * k + 10 * j + i; j = 0 is the northern row
        let mut ta_values = vec![];
        for t in 0..2 {
            for k in 0..2 {
                for j in 0..3 {
                    for i in 0..4 {
                        ta_values.push((1000 * t + 100 * k + 10 * j + i) as f64);
                    }
                }
            }
        }
        ta_values[0] = -999.0;
        let mut ta = f
            .add_variable::<f64>("ta", &["time", "plev", "lat", "lon"])
            .unwrap();
        ta.set_fill_value(-999.0).unwrap();
        ta.put_attribute("units", "K").unwrap();
        ta.put_attribute("standard_name", "air_temperature").unwrap();
        ta.put_attribute("scale_factor", 0.5).unwrap();
        ta.put_attribute("add_offset", 200.0).unwrap();
        ta.put_values(&ta_values, Extents::All).unwrap();

        let mut orog = f.add_variable::<f64>("orog", &["lat", "lon"]).unwrap();
        orog.put_attribute("units", "m").unwrap();
        orog.put_attribute("standard_name", "surface_altitude").unwrap();
        orog.put_values(&[1.0; 12], Extents::All).unwrap();
    }

    #[test]
    fn test_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ta_test.nc");
        write_test_file(&path);

        let source = NcSourceFile::open(&path).unwrap();
        let inv = source.inventory();
        assert_eq!(inv.grid, GridDescriptor::lat_lon(-45.0, 0.0, 45.0, 90.0, 4, 3));
        assert_eq!(inv.time.as_ref().unwrap().len(), 2);
        assert_eq!(inv.variables.keys().collect::<Vec<_>>(), ["ta", "orog"]);

        let ta = &inv.variables["ta"];
        assert!(ta.time_dependent);
        assert_eq!(ta.levels.as_deref(), Some([100000.0, 85000.0].as_slice()));
        assert_eq!(ta.units.as_deref(), Some("K"));
        assert_eq!(ta.description, "air_temperature");

        let orog = &inv.variables["orog"];
        assert!(!orog.time_dependent);
        assert!(orog.levels.is_none());
    }

    #[test]
    fn test_read_slab() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ta_test.nc");
        write_test_file(&path);
        let source = NcSourceFile::open(&path).unwrap();

        let field = source.read_slab("ta", Some(1), Some(1)).unwrap();
        assert_eq!(field.values.dim(), (3, 4));
        // Row 0 is now the southern row, which was stored as j = 2
        assert_abs_diff_eq!(field.values[[0, 1]], 200.0 + 0.5 * 1121.0);
        assert_abs_diff_eq!(field.values[[2, 3]], 200.0 + 0.5 * 1103.0);

        let field = source.read_slab("ta", Some(0), Some(0)).unwrap();
        assert!(field.values[[2, 0]].is_nan());
        assert_eq!(field.values.iter().filter(|v| v.is_nan()).count(), 1);

        let orog = source.read_slab("orog", None, None).unwrap();
        assert!(orog.values.iter().all(|&v| v == 1.0));

        assert!(source.read_slab("ta", Some(2), Some(0)).is_err());
        assert!(source.read_slab("ta", None, Some(0)).is_err());
    }

    #[test]
    fn test_index_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("ta_test.nc");
        write_test_file(&good);
        let bad = dir.path().join("not_netcdf.nc");
        std::fs::write(&bad, "this is not a netCDF file").unwrap();

        let catalog = index_files(&[good.clone(), bad.clone()], &ConversionSettings::default());
        assert_eq!(catalog.sources().count(), 1);
        assert_eq!(catalog.rejected().len(), 1);
        assert_eq!(catalog.rejected()[0].path, bad);

        let resolved = catalog.resolve("ta", &dt(2010, 1, 5, 6)).unwrap();
        assert_eq!(resolved.time_index, Some(1));
        assert_eq!(resolved.source.path(), good);
        assert!(catalog.resolve("ta", &dt(2010, 1, 5, 12)).is_err());
    }
}
