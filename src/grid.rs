//! Horizontal grid descriptions and the checks that all fields written to one
//! output file share the same grid.
use std::collections::HashMap;

use itertools::Itertools;

/// Relative tolerance on the spacing of a coordinate for it to be considered uniform.
const UNIFORM_RTOL: f64 = 1e-3;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GridError {
    #[error("The {axis} coordinate has {n} point(s); at least 2 are needed to define a grid")]
    TooSmall { axis: &'static str, n: usize },
    #[error("Unsupported grid: {0}")]
    Unsupported(String),
    #[error("Grids differ: {0}")]
    Mismatch(String),
}

/// Projection kinds, numbered as the IPROJ header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ProjectionKind {
    #[strum(to_string = "lat/lon")]
    LatLon,
    #[strum(to_string = "Mercator")]
    Mercator,
    #[strum(to_string = "Lambert conformal")]
    LambertConformal,
    #[strum(to_string = "Gaussian")]
    Gaussian,
    #[strum(to_string = "polar stereographic")]
    PolarStereographic,
}

impl ProjectionKind {
    pub fn iproj(&self) -> i32 {
        match self {
            ProjectionKind::LatLon => 0,
            ProjectionKind::Mercator => 1,
            ProjectionKind::LambertConformal => 3,
            ProjectionKind::Gaussian => 4,
            ProjectionKind::PolarStereographic => 5,
        }
    }

    pub fn from_iproj(iproj: i32) -> Option<Self> {
        match iproj {
            0 => Some(Self::LatLon),
            1 => Some(Self::Mercator),
            3 => Some(Self::LambertConformal),
            4 => Some(Self::Gaussian),
            5 => Some(Self::PolarStereographic),
            _ => None,
        }
    }
}

/// Projection parameters as they appear in the intermediate format. Angles are
/// in degrees and distances in km; the start point is the first grid point
/// (written as the `SWCORNER`).
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    LatLon {
        start_lat: f64,
        start_lon: f64,
        dlat: f64,
        dlon: f64,
    },
    Mercator {
        start_lat: f64,
        start_lon: f64,
        dx: f64,
        dy: f64,
        truelat1: f64,
    },
    LambertConformal {
        start_lat: f64,
        start_lon: f64,
        dx: f64,
        dy: f64,
        xlonc: f64,
        truelat1: f64,
        truelat2: f64,
    },
    Gaussian {
        start_lat: f64,
        start_lon: f64,
        /// Number of latitudes between a pole and the equator.
        nlats: i32,
        dlon: f64,
    },
    PolarStereographic {
        start_lat: f64,
        start_lon: f64,
        dx: f64,
        dy: f64,
        xlonc: f64,
        truelat1: f64,
    },
}

impl Projection {
    pub fn kind(&self) -> ProjectionKind {
        match self {
            Projection::LatLon { .. } => ProjectionKind::LatLon,
            Projection::Mercator { .. } => ProjectionKind::Mercator,
            Projection::LambertConformal { .. } => ProjectionKind::LambertConformal,
            Projection::Gaussian { .. } => ProjectionKind::Gaussian,
            Projection::PolarStereographic { .. } => ProjectionKind::PolarStereographic,
        }
    }

    pub fn start(&self) -> (f64, f64) {
        match self {
            Projection::LatLon {
                start_lat,
                start_lon,
                ..
            }
            | Projection::Mercator {
                start_lat,
                start_lon,
                ..
            }
            | Projection::LambertConformal {
                start_lat,
                start_lon,
                ..
            }
            | Projection::Gaussian {
                start_lat,
                start_lon,
                ..
            }
            | Projection::PolarStereographic {
                start_lat,
                start_lon,
                ..
            } => (*start_lat, *start_lon),
        }
    }

    /// Named numeric parameters, in the order they are written after STARTLOC.
    pub fn params(&self) -> Vec<(&'static str, f64)> {
        match self {
            Projection::LatLon {
                start_lat,
                start_lon,
                dlat,
                dlon,
            } => vec![
                ("STARTLAT", *start_lat),
                ("STARTLON", *start_lon),
                ("DELTALAT", *dlat),
                ("DELTALON", *dlon),
            ],
            Projection::Mercator {
                start_lat,
                start_lon,
                dx,
                dy,
                truelat1,
            } => vec![
                ("STARTLAT", *start_lat),
                ("STARTLON", *start_lon),
                ("DX", *dx),
                ("DY", *dy),
                ("TRUELAT1", *truelat1),
            ],
            Projection::LambertConformal {
                start_lat,
                start_lon,
                dx,
                dy,
                xlonc,
                truelat1,
                truelat2,
            } => vec![
                ("STARTLAT", *start_lat),
                ("STARTLON", *start_lon),
                ("DX", *dx),
                ("DY", *dy),
                ("XLONC", *xlonc),
                ("TRUELAT1", *truelat1),
                ("TRUELAT2", *truelat2),
            ],
            Projection::Gaussian {
                start_lat,
                start_lon,
                nlats,
                dlon,
            } => vec![
                ("STARTLAT", *start_lat),
                ("STARTLON", *start_lon),
                ("NLATS", *nlats as f64),
                ("DELTALON", *dlon),
            ],
            Projection::PolarStereographic {
                start_lat,
                start_lon,
                dx,
                dy,
                xlonc,
                truelat1,
            } => vec![
                ("STARTLAT", *start_lat),
                ("STARTLON", *start_lon),
                ("DX", *dx),
                ("DY", *dy),
                ("XLONC", *xlonc),
                ("TRUELAT1", *truelat1),
            ],
        }
    }
}

/// A horizontal grid: the projection plus the number of points along x (NX) and y (NY).
#[derive(Debug, Clone, PartialEq)]
pub struct GridDescriptor {
    pub projection: Projection,
    pub nx: usize,
    pub ny: usize,
}

impl GridDescriptor {
    pub fn lat_lon(start_lat: f64, start_lon: f64, dlat: f64, dlon: f64, nx: usize, ny: usize) -> Self {
        Self {
            projection: Projection::LatLon {
                start_lat,
                start_lon,
                dlat,
                dlon,
            },
            nx,
            ny,
        }
    }

    pub fn kind(&self) -> ProjectionKind {
        self.projection.kind()
    }

    /// Describe a grid given by 1-D latitude and longitude coordinates.
    ///
    /// Uniformly spaced coordinates give a regular lat/lon grid. If the longitudes
    /// are uniform but the latitudes are not, the grid is taken to be Gaussian as
    /// long as the latitudes are symmetric about the equator.
    pub fn from_coordinates(lats: &[f64], lons: &[f64]) -> Result<Self, GridError> {
        let dlon = uniform_spacing(lons, "longitude")?.ok_or_else(|| {
            GridError::Unsupported("longitudes are not uniformly spaced".to_string())
        })?;

        let (nx, ny) = (lons.len(), lats.len());
        if let Some(dlat) = uniform_spacing(lats, "latitude")? {
            return Ok(Self::lat_lon(lats[0], lons[0], dlat, dlon, nx, ny));
        }

        if ny % 2 != 0 || !is_symmetric(lats) || !is_monotonic(lats) {
            return Err(GridError::Unsupported(
                "latitudes are neither uniformly spaced nor a Gaussian grid".to_string(),
            ));
        }

        Ok(Self {
            projection: Projection::Gaussian {
                start_lat: lats[0],
                start_lon: lons[0],
                nlats: (ny / 2) as i32,
                dlon,
            },
            nx,
            ny,
        })
    }

    /// Describe a grid on a map projection, given the CF `grid_mapping` variable's
    /// attributes, the projection coordinates (m) and the latitude/longitude of the
    /// first grid point.
    pub fn from_grid_mapping(
        mapping: &GridMapping,
        x: &[f64],
        y: &[f64],
        start_lat: f64,
        start_lon: f64,
    ) -> Result<Self, GridError> {
        let dx = uniform_spacing(x, "x")?
            .ok_or_else(|| GridError::Unsupported("x is not uniformly spaced".to_string()))?;
        let dy = uniform_spacing(y, "y")?
            .ok_or_else(|| GridError::Unsupported("y is not uniformly spaced".to_string()))?;
        if dx <= 0.0 || dy <= 0.0 {
            return Err(GridError::Unsupported(
                "projected grids must have increasing x and y coordinates".to_string(),
            ));
        }
        let (dx, dy) = (dx / 1000.0, dy / 1000.0);

        let projection = match mapping.name.as_str() {
            "lambert_conformal_conic" => {
                let parallels = mapping.require("standard_parallel")?;
                let truelat1 = parallels[0];
                let truelat2 = parallels.get(1).copied().unwrap_or(truelat1);
                Projection::LambertConformal {
                    start_lat,
                    start_lon,
                    dx,
                    dy,
                    xlonc: mapping.require("longitude_of_central_meridian")?[0],
                    truelat1,
                    truelat2,
                }
            }
            "polar_stereographic" => {
                let truelat1 = match mapping.get("standard_parallel") {
                    Some(v) => v[0],
                    None => mapping.require("latitude_of_projection_origin")?[0],
                };
                Projection::PolarStereographic {
                    start_lat,
                    start_lon,
                    dx,
                    dy,
                    xlonc: mapping.require("straight_vertical_longitude_from_pole")?[0],
                    truelat1,
                }
            }
            "mercator" => Projection::Mercator {
                start_lat,
                start_lon,
                dx,
                dy,
                truelat1: mapping.get("standard_parallel").map(|v| v[0]).unwrap_or(0.0),
            },
            other => {
                return Err(GridError::Unsupported(format!(
                    "grid mapping '{other}' has no intermediate format equivalent"
                )))
            }
        };

        Ok(Self {
            projection,
            nx: x.len(),
            ny: y.len(),
        })
    }

    /// Check that `self` and `other` describe the same grid, returning a description of
    /// the first difference found if not.
    pub fn check_compatible(&self, other: &Self, tolerance: f64) -> Result<(), GridError> {
        if self.kind() != other.kind() {
            return Err(GridError::Mismatch(format!(
                "projection {} vs {}",
                self.kind(),
                other.kind()
            )));
        }

        if (self.nx, self.ny) != (other.nx, other.ny) {
            return Err(GridError::Mismatch(format!(
                "dimensions {}x{} vs {}x{}",
                self.nx, self.ny, other.nx, other.ny
            )));
        }

        for ((name, a), (_, b)) in self
            .projection
            .params()
            .into_iter()
            .zip(other.projection.params())
        {
            // Written this way so that NaNs count as a difference.
            if !((a - b).abs() < tolerance) {
                return Err(GridError::Mismatch(format!("{name} {a} vs {b}")));
            }
        }

        Ok(())
    }

    pub fn compatible(&self, other: &Self, tolerance: f64) -> bool {
        self.check_compatible(other, tolerance).is_ok()
    }
}

/// Whether two grids match in projection kind, dimensions, and every numeric
/// parameter to within `tolerance`.
pub fn compatible(a: &GridDescriptor, b: &GridDescriptor, tolerance: f64) -> bool {
    a.compatible(b, tolerance)
}

/// The attributes of a CF grid mapping variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridMapping {
    pub name: String,
    pub params: HashMap<String, Vec<f64>>,
}

impl GridMapping {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, values: &[f64]) -> Self {
        self.params.insert(key.to_string(), values.to_vec());
        self
    }

    fn get(&self, key: &str) -> Option<&[f64]> {
        self.params
            .get(key)
            .map(|v| v.as_slice())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str) -> Result<&[f64], GridError> {
        self.get(key).ok_or_else(|| {
            GridError::Unsupported(format!(
                "{} grid mapping is missing the '{key}' attribute",
                self.name
            ))
        })
    }
}

/// The spacing of `values` if it is uniform (to a relative tolerance), `None` if not.
fn uniform_spacing(values: &[f64], axis: &'static str) -> Result<Option<f64>, GridError> {
    if values.len() < 2 {
        return Err(GridError::TooSmall {
            axis,
            n: values.len(),
        });
    }

    let d0 = values[1] - values[0];
    if d0 == 0.0 || !d0.is_finite() {
        return Ok(None);
    }

    let uniform = values
        .iter()
        .tuple_windows()
        .all(|(a, b)| ((b - a) - d0).abs() <= UNIFORM_RTOL * d0.abs());
    if !uniform {
        return Ok(None);
    }

    // Use the mean spacing so that round off in the first two values does not
    // accumulate across the grid.
    let mean = (values[values.len() - 1] - values[0]) / (values.len() - 1) as f64;
    Ok(Some(mean))
}

fn is_symmetric(lats: &[f64]) -> bool {
    lats.iter()
        .zip(lats.iter().rev())
        .all(|(a, b)| (a + b).abs() < 1e-3)
}

fn is_monotonic(values: &[f64]) -> bool {
    let increasing = values.iter().tuple_windows().all(|(a, b)| b > a);
    let decreasing = values.iter().tuple_windows().all(|(a, b)| b < a);
    increasing || decreasing
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn linspace(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn test_regular_grid() {
        let lats = linspace(-89.5, 1.0, 180);
        let lons = linspace(0.5, 1.0, 360);
        let grid = GridDescriptor::from_coordinates(&lats, &lons).unwrap();
        assert_eq!(grid.kind(), ProjectionKind::LatLon);
        assert_eq!((grid.nx, grid.ny), (360, 180));
        let Projection::LatLon { start_lat, start_lon, dlat, dlon } = grid.projection else {
            panic!("expected a lat/lon projection");
        };
        assert_abs_diff_eq!(start_lat, -89.5);
        assert_abs_diff_eq!(start_lon, 0.5);
        assert_abs_diff_eq!(dlat, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dlon, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_north_to_south_grid() {
        let lats = linspace(90.0, -2.5, 73);
        let lons = linspace(0.0, 2.5, 144);
        let grid = GridDescriptor::from_coordinates(&lats, &lons).unwrap();
        let params = grid.projection.params();
        assert_eq!(params[2].0, "DELTALAT");
        assert_abs_diff_eq!(params[2].1, -2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_gaussian_grid() {
        // The first few latitudes of an N48 Gaussian grid, mirrored
        let north = [88.572169, 86.722531, 84.861970, 82.998941, 81.134977];
        let lats: Vec<f64> = north
            .iter()
            .map(|l| -l)
            .chain(north.iter().rev().copied())
            .collect();
        let lons = linspace(0.0, 1.875, 192);
        let grid = GridDescriptor::from_coordinates(&lats, &lons).unwrap();
        assert_eq!(grid.kind(), ProjectionKind::Gaussian);
        assert_eq!(grid.kind().iproj(), 4);
        assert!(matches!(grid.projection, Projection::Gaussian { nlats: 5, .. }));
    }

    #[test]
    fn test_unsupported_grids() {
        let lons = vec![0.0, 1.0, 3.0, 4.0];
        let lats = linspace(0.0, 1.0, 4);
        assert!(matches!(
            GridDescriptor::from_coordinates(&lats, &lons),
            Err(GridError::Unsupported(_))
        ));

        let lats = vec![10.0, 11.0, 13.0, 14.0];
        assert!(matches!(
            GridDescriptor::from_coordinates(&lats, &linspace(0.0, 1.0, 4)),
            Err(GridError::Unsupported(_))
        ));

        assert_eq!(
            GridDescriptor::from_coordinates(&[10.0], &linspace(0.0, 1.0, 4)),
            Err(GridError::TooSmall { axis: "latitude", n: 1 })
        );
    }

    #[test]
    fn test_lambert_grid() {
        let mapping = GridMapping::new("lambert_conformal_conic")
            .with_param("standard_parallel", &[30.0, 60.0])
            .with_param("longitude_of_central_meridian", &[-100.0]);
        let x = linspace(-1_000_000.0, 25_000.0, 81);
        let y = linspace(-500_000.0, 25_000.0, 41);
        let grid = GridDescriptor::from_grid_mapping(&mapping, &x, &y, 20.0, -120.0).unwrap();
        assert_eq!(grid.kind().iproj(), 3);
        assert_eq!(
            grid.projection,
            Projection::LambertConformal {
                start_lat: 20.0,
                start_lon: -120.0,
                dx: 25.0,
                dy: 25.0,
                xlonc: -100.0,
                truelat1: 30.0,
                truelat2: 60.0,
            }
        );

        let rotated = GridMapping::new("rotated_latitude_longitude");
        assert!(GridDescriptor::from_grid_mapping(&rotated, &x, &y, 20.0, -120.0).is_err());
        let incomplete = GridMapping::new("polar_stereographic");
        assert!(GridDescriptor::from_grid_mapping(&incomplete, &x, &y, 20.0, -120.0).is_err());
    }

    #[test]
    fn test_compatible() {
        let a = GridDescriptor::lat_lon(-89.5, 0.5, 1.0, 1.0, 360, 180);
        let b = GridDescriptor::lat_lon(-89.5, 0.5 + 1e-6, 1.0, 1.0, 360, 180);
        assert!(compatible(&a, &b, 1e-4));

        let c = GridDescriptor::lat_lon(-89.5, 0.5, 1.0, 1.25, 360, 180);
        assert!(!compatible(&a, &c, 1e-4));
        let err = a.check_compatible(&c, 1e-4).unwrap_err();
        assert!(matches!(err, GridError::Mismatch(s) if s.starts_with("DELTALON")));

        let d = GridDescriptor::lat_lon(-89.5, 0.5, 1.0, 1.0, 360, 181);
        assert!(!compatible(&a, &d, 1e-4));

        let e = GridDescriptor {
            projection: Projection::Gaussian {
                start_lat: -89.5,
                start_lon: 0.5,
                nlats: 90,
                dlon: 1.0,
            },
            nx: 360,
            ny: 180,
        };
        assert!(!compatible(&a, &e, 1.0));
    }
}
