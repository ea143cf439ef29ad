use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use error_stack::ResultExt;

use super::{
    RecordMetadata, SerializationError, DESC_LEN, FIELD_LEN, HDATE_LEN, INTERMEDIATE_VERSION,
    MAP_SOURCE_LEN, STARTLOC, STARTLOC_LEN, UNITS_LEN,
};
use crate::field::FieldSlice;

/// Append one field (all five Fortran records) to `w`.
///
/// Fails with [`SerializationError::DimensionMismatch`] if the slab does not have the
/// shape `(NY, NX)` of the grid in `meta`, and with [`SerializationError::NonAscii`] if
/// a header string cannot be represented. Nothing is written in either case.
pub fn write_record<W: Write>(
    w: &mut W,
    slice: &FieldSlice,
    meta: &RecordMetadata,
) -> error_stack::Result<(), SerializationError> {
    let (values_ny, values_nx) = slice.values.dim();
    if (values_ny, values_nx) != (meta.grid.ny, meta.grid.nx) {
        error_stack::bail!(SerializationError::DimensionMismatch {
            field: meta.field.clone(),
            values_ny,
            values_nx,
            grid_ny: meta.grid.ny,
            grid_nx: meta.grid.nx,
        });
    }

    let nx = dimension_as_i32(meta.grid.nx, &meta.field)?;
    let ny = dimension_as_i32(meta.grid.ny, &meta.field)?;

    // Build every record before writing any of them, so that a bad string does not
    // leave a partial field in the stream.
    let mut header = vec![];
    put_string(&mut header, &meta.hdate, HDATE_LEN, "HDATE")?;
    put_f32(&mut header, meta.forecast_hour);
    put_string(&mut header, &meta.map_source, MAP_SOURCE_LEN, "MAP_SOURCE")?;
    put_string(&mut header, &meta.field, FIELD_LEN, "FIELD")?;
    put_string(&mut header, &meta.units, UNITS_LEN, "UNITS")?;
    put_string(&mut header, &meta.description, DESC_LEN, "DESC")?;
    put_f32(&mut header, meta.level);
    put_i32(&mut header, nx);
    put_i32(&mut header, ny);
    put_i32(&mut header, meta.grid.kind().iproj());

    let mut projection = vec![];
    put_string(&mut projection, STARTLOC, STARTLOC_LEN, "STARTLOC")?;
    for (_, value) in meta.grid.projection.params() {
        put_f32(&mut projection, value as f32);
    }
    put_f32(&mut projection, meta.earth_radius_km);

    let mut slab = Vec::with_capacity(4 * slice.values.len());
    for &v in slice.values.iter() {
        put_f32(&mut slab, v);
    }

    let records = [
        INTERMEDIATE_VERSION.to_be_bytes().to_vec(),
        header,
        projection,
        (meta.wind_earth_relative as i32).to_be_bytes().to_vec(),
        slab,
    ];
    for rec in records.iter() {
        write_fortran_record(w, rec).change_context_lazy(|| {
            SerializationError::io(format!("writing field '{}' at level {}", meta.field, meta.level))
        })?;
    }
    Ok(())
}

/// Write `data` as one Fortran sequential unformatted record.
pub fn write_fortran_record<W: Write>(w: &mut W, data: &[u8]) -> std::io::Result<()> {
    let nbytes = u32::try_from(data.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "record longer than 4 GiB"))?;
    w.write_u32::<BigEndian>(nbytes)?;
    w.write_all(data)?;
    w.write_u32::<BigEndian>(nbytes)?;
    Ok(())
}

fn dimension_as_i32(n: usize, field: &str) -> Result<i32, SerializationError> {
    i32::try_from(n).map_err(|_| SerializationError::DimensionTooLarge {
        field: field.to_string(),
        n,
    })
}

/// Append `s` padded with spaces (or truncated) to exactly `len` bytes.
fn put_string(buf: &mut Vec<u8>, s: &str, len: usize, what: &'static str) -> Result<(), SerializationError> {
    if !s.is_ascii() {
        return Err(SerializationError::NonAscii {
            what,
            value: s.to_string(),
        });
    }
    buf.extend(s.bytes().chain(std::iter::repeat(b' ')).take(len));
    Ok(())
}

fn put_f32(buf: &mut Vec<u8>, v: f32) {
    // Writing to a Vec cannot fail
    let _ = buf.write_f32::<BigEndian>(v);
}

fn put_i32(buf: &mut Vec<u8>, v: i32) {
    let _ = buf.write_i32::<BigEndian>(v);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intermediate::tests::slice_and_meta;
    use byteorder::ByteOrder;
    use ndarray::Array2;

    #[test]
    fn test_fortran_record_framing() {
        let mut buf = vec![];
        write_fortran_record(&mut buf, &[1, 2, 3]).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, 1, 2, 3, 0, 0, 0, 3]);
    }

    #[test]
    fn test_record_layout() {
        let (slice, meta) = slice_and_meta();
        let mut buf = vec![];
        write_record(&mut buf, &slice, &meta).unwrap();

        // IFV record
        assert_eq!(BigEndian::read_i32(&buf[0..4]), 4);
        assert_eq!(BigEndian::read_i32(&buf[4..8]), 5);
        assert_eq!(BigEndian::read_i32(&buf[8..12]), 4);

        // Header record: 24 + 4 + 32 + 9 + 25 + 46 + 4 + 3 * 4 = 156 bytes
        let header_len = BigEndian::read_i32(&buf[12..16]) as usize;
        assert_eq!(header_len, 156);
        let header = &buf[16..16 + header_len];
        assert_eq!(&header[0..24], b"2010-01-05_06:00:00     ");
        assert_eq!(BigEndian::read_f32(&header[24..28]), 0.0);
        assert_eq!(&header[28..60], format!("{:<32}", "CMIP6").as_bytes());
        assert_eq!(&header[60..69], b"TT       ");
        assert_eq!(BigEndian::read_f32(&header[140..144]), 85000.0);
        assert_eq!(BigEndian::read_i32(&header[144..148]), 4);
        assert_eq!(BigEndian::read_i32(&header[148..152]), 3);
        assert_eq!(BigEndian::read_i32(&header[152..156]), 0);

        // Lat/lon projection record: STARTLOC + 5 reals
        let proj_start = 16 + header_len + 4;
        assert_eq!(BigEndian::read_i32(&buf[proj_start..proj_start + 4]), 28);
        assert_eq!(&buf[proj_start + 4..proj_start + 12], b"SWCORNER");
        assert_eq!(BigEndian::read_f32(&buf[proj_start + 12..proj_start + 16]), -45.0);

        // IFV + header + projection + wind flag + slab, each with 8 bytes of framing
        let expected_len = (4 + 8) + (156 + 8) + (28 + 8) + (4 + 8) + (4 * 12 + 8);
        assert_eq!(buf.len(), expected_len);

        // The slab is x-fastest: the second value is (j = 0, i = 1)
        let slab = &buf[buf.len() - 4 - 48..buf.len() - 4];
        assert_eq!(BigEndian::read_f32(&slab[4..8]), 1.0);
        assert_eq!(BigEndian::read_f32(&slab[16..20]), 10.0);
    }

    #[test]
    fn test_string_truncation() {
        let (slice, mut meta) = slice_and_meta();
        meta.description = "x".repeat(60);
        let mut buf = vec![];
        write_record(&mut buf, &slice, &meta).unwrap();
        let header = &buf[16..16 + 156];
        assert_eq!(&header[94..140], "x".repeat(46).as_bytes());
    }

    #[test]
    fn test_dimension_mismatch() {
        let (mut slice, meta) = slice_and_meta();
        slice.values = Array2::zeros((3, 5));
        let mut buf = vec![];
        let err = write_record(&mut buf, &slice, &meta).unwrap_err();
        assert!(matches!(
            err.current_context(),
            SerializationError::DimensionMismatch { values_nx: 5, grid_nx: 4, .. }
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_dimension_too_large() {
        assert_eq!(dimension_as_i32(360, "TT").unwrap(), 360);
        let n = i32::MAX as usize + 1;
        assert!(matches!(
            dimension_as_i32(n, "TT"),
            Err(SerializationError::DimensionTooLarge { n: m, .. }) if m == n
        ));
    }

    #[test]
    fn test_non_ascii() {
        let (slice, mut meta) = slice_and_meta();
        meta.units = "°C".to_string();
        let mut buf = vec![];
        let err = write_record(&mut buf, &slice, &meta).unwrap_err();
        assert!(matches!(
            err.current_context(),
            SerializationError::NonAscii { what: "UNITS", .. }
        ));
        assert!(buf.is_empty());
    }
}
