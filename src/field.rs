//! 2-D fields ready to be written, and the conversions applied to raw source data.
use ndarray::{Array2, ArrayViewMut1, Axis};
use num_traits::Float;

use crate::{error::TimestampError, grid::GridDescriptor, model_config::VariableSpec};

/// One horizontal slab as read from a source file.
///
/// Packing (`scale_factor`/`add_offset`) has already been applied and fill values
/// replaced with NaN, but no other conversion has been done.
#[derive(Debug, Clone)]
pub struct RawField {
    /// Values with shape `(ny, nx)`.
    pub values: Array2<f64>,
    pub grid: GridDescriptor,
    /// The `units` attribute of the source variable, if it had one.
    pub units: Option<String>,
    pub description: String,
}

/// One (timestamp, variable, level) slab, converted and ready for the record writer.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlice {
    /// Values with shape `(ny, nx)`, i.e. x varies fastest in memory.
    pub values: Array2<f32>,
    pub grid: GridDescriptor,
    pub units: String,
    pub description: String,
}

impl FieldSlice {
    /// The number of values that are NaN (i.e. missing and not filled).
    pub fn n_missing(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }
}

/// Convert a raw slab according to its configuration entry.
///
/// If the entry gives a scale or offset, they are applied (`value * scale + offset`)
/// and the result takes the configured units. Otherwise the source units must be
/// the configured units exactly. When `fill` is true, missing values are filled
/// with [`fill_missing_linear`].
pub fn apply_spec(raw: RawField, spec: &VariableSpec, fill: bool) -> Result<FieldSlice, TimestampError> {
    let RawField {
        mut values,
        grid,
        units,
        description,
    } = raw;

    if spec.is_converted() {
        let scale = spec.scale.unwrap_or(1.0);
        let offset = spec.offset.unwrap_or(0.0);
        values.mapv_inplace(|v| v * scale + offset);
    } else {
        let found = units.as_deref().map(|u| u.trim()).unwrap_or("");
        if found != spec.units {
            return Err(TimestampError::UnitsMismatch {
                variable: spec.var_id.clone(),
                found: found.to_string(),
                expected: spec.units.clone(),
            });
        }
    }

    if fill {
        fill_missing_linear(&mut values);
    }

    Ok(FieldSlice {
        values: values.mapv(|v| v as f32),
        grid,
        units: spec.units.clone(),
        description: spec.description.clone().unwrap_or(description),
    })
}

/// Fill NaNs in a `(ny, nx)` field by linear interpolation along y (latitude), then
/// along x (longitude), extrapolating linearly beyond the outermost valid values.
///
/// Lines with no valid values are left as they are; a line with a single valid value
/// is filled with that value.
pub fn fill_missing_linear<F: Float>(values: &mut Array2<F>) {
    for lane in values.lanes_mut(Axis(0)) {
        fill_line(lane);
    }
    for lane in values.lanes_mut(Axis(1)) {
        fill_line(lane);
    }
}

fn fill_line<F: Float>(mut line: ArrayViewMut1<F>) {
    let valid: Vec<usize> = line
        .iter()
        .enumerate()
        .filter_map(|(i, v)| if v.is_nan() { None } else { Some(i) })
        .collect();

    if valid.is_empty() || valid.len() == line.len() {
        return;
    }

    if let [only] = valid.as_slice() {
        let v = line[*only];
        line.fill(v);
        return;
    }

    // `valid` has at least two elements, so there is always a bracketing pair; before
    // the first and after the last valid point we use the outermost pair.
    let mut k = 0;
    for i in 0..line.len() {
        if !line[i].is_nan() {
            continue;
        }
        while k + 2 < valid.len() && valid[k + 1] < i {
            k += 1;
        }
        let (i0, i1) = (valid[k], valid[k + 1]);
        let (y0, y1) = (line[i0], line[i1]);
        let x = F::from(i as f64 - i0 as f64).unwrap_or_else(F::nan);
        let dx = F::from(i1 as f64 - i0 as f64).unwrap_or_else(F::nan);
        line[i] = y0 + (y1 - y0) * x / dx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_config::LevelSet;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    fn spec(units: &str, scale: Option<f64>) -> VariableSpec {
        VariableSpec {
            wps_name: "LANDSEA".to_string(),
            var_id: "sftlf".to_string(),
            units: units.to_string(),
            levels: LevelSet::Surface,
            scale,
            offset: None,
            description: None,
        }
    }

    fn raw(values: Array2<f64>, units: &str) -> RawField {
        let (ny, nx) = values.dim();
        RawField {
            values,
            grid: GridDescriptor::lat_lon(-45.0, 0.0, 90.0, 90.0, nx, ny),
            units: Some(units.to_string()),
            description: "land_area_fraction".to_string(),
        }
    }

    #[test]
    fn test_fill_interior_and_ends() {
        let mut line = Array1::from(vec![f64::NAN, 1.0, f64::NAN, 3.0, 4.0, f64::NAN]);
        fill_line(line.view_mut());
        let expected = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        for (a, b) in line.iter().zip(expected) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_fill_single_and_empty() {
        let mut line = Array1::from(vec![f32::NAN, 7.0, f32::NAN]);
        fill_line(line.view_mut());
        assert_eq!(line.to_vec(), vec![7.0, 7.0, 7.0]);

        let mut line = Array1::from(vec![f32::NAN, f32::NAN]);
        fill_line(line.view_mut());
        assert!(line.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_fill_lat_then_lon() {
        // The middle row cannot be filled along y because column 1 is entirely
        // missing, so it is filled along x afterwards.
        let mut values = array![
            [1.0, f64::NAN, 3.0],
            [f64::NAN, f64::NAN, f64::NAN],
            [5.0, f64::NAN, 7.0],
        ];
        fill_missing_linear(&mut values);
        let expected = array![[1.0, 2.0, 3.0], [3.0, 4.0, 5.0], [5.0, 6.0, 7.0]];
        for (a, b) in values.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_apply_scale() {
        let field = apply_spec(
            raw(array![[100.0, 50.0], [0.0, f64::NAN]], "%"),
            &spec("fraction", Some(0.01)),
            false,
        )
        .unwrap();
        assert_eq!(field.units, "fraction");
        assert_eq!(field.description, "land_area_fraction");
        assert_abs_diff_eq!(field.values[[0, 0]], 1.0);
        assert_abs_diff_eq!(field.values[[0, 1]], 0.5);
        assert_eq!(field.n_missing(), 1);
    }

    #[test]
    fn test_units_mismatch() {
        let err = apply_spec(raw(array![[1.0, 2.0], [3.0, 4.0]], "%"), &spec("fraction", None), true)
            .unwrap_err();
        assert_eq!(
            err,
            TimestampError::UnitsMismatch {
                variable: "sftlf".to_string(),
                found: "%".to_string(),
                expected: "fraction".to_string()
            }
        );

        let field = apply_spec(raw(array![[1.0, 2.0], [3.0, f64::NAN]], "%"), &spec("%", None), true)
            .unwrap();
        // Only one valid value in the second column, so it is propagated
        assert_eq!(field.n_missing(), 0);
        assert_abs_diff_eq!(field.values[[1, 1]], 2.0);
    }
}
