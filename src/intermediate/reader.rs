use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read},
    path::Path,
};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use error_stack::ResultExt;
use ndarray::Array2;

use super::{
    SerializationError, DESC_LEN, FIELD_LEN, HDATE_LEN, INTERMEDIATE_VERSION, MAP_SOURCE_LEN,
    STARTLOC_LEN, UNITS_LEN,
};
use crate::grid::{GridDescriptor, Projection, ProjectionKind};

/// One field read back from an intermediate file.
#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateRecord {
    pub version: i32,
    pub hdate: String,
    pub forecast_hour: f32,
    pub map_source: String,
    pub field: String,
    pub units: String,
    pub description: String,
    pub level: f32,
    pub startloc: String,
    pub grid: GridDescriptor,
    pub earth_radius_km: f32,
    pub wind_earth_relative: bool,
    /// Values with shape `(NY, NX)`.
    pub values: Array2<f32>,
}

/// Iterates over the fields in an intermediate file.
pub struct IntermediateReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> IntermediateReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn read_field(&mut self) -> error_stack::Result<Option<IntermediateRecord>, SerializationError> {
        let Some(ifv) = read_fortran_record(&mut self.inner)? else {
            return Ok(None);
        };
        let version = Cursor::new(&ifv, "IFV").i32()?;
        if version != INTERMEDIATE_VERSION {
            error_stack::bail!(SerializationError::UnsupportedVersion(version));
        }

        let header = self.required_record("header")?;
        let mut c = Cursor::new(&header, "header");
        let hdate = c.string(HDATE_LEN)?;
        let forecast_hour = c.f32()?;
        let map_source = c.string(MAP_SOURCE_LEN)?;
        let field = c.string(FIELD_LEN)?;
        let units = c.string(UNITS_LEN)?;
        let description = c.string(DESC_LEN)?;
        let level = c.f32()?;
        let nx = c.i32()?;
        let ny = c.i32()?;
        let iproj = c.i32()?;

        let (nx, ny) = match (usize::try_from(nx), usize::try_from(ny)) {
            (Ok(nx), Ok(ny)) => (nx, ny),
            _ => error_stack::bail!(SerializationError::Malformed(format!(
                "negative dimensions NX = {nx}, NY = {ny} for field '{field}'"
            ))),
        };

        let proj_rec = self.required_record("projection")?;
        let mut c = Cursor::new(&proj_rec, "projection");
        let startloc = c.string(STARTLOC_LEN)?;
        let kind = ProjectionKind::from_iproj(iproj)
            .ok_or(SerializationError::UnsupportedProjection(iproj))?;
        let projection = read_projection(&mut c, kind)?;
        let earth_radius_km = c.f32()?;

        let wind = self.required_record("IS_WIND_EARTH_REL")?;
        let wind_earth_relative = Cursor::new(&wind, "IS_WIND_EARTH_REL").i32()? != 0;

        let slab = self.required_record("slab")?;
        if slab.len() != 4 * nx * ny {
            error_stack::bail!(SerializationError::Malformed(format!(
                "slab for field '{field}' has {} bytes, expected {} for {nx}x{ny} values",
                slab.len(),
                4 * nx * ny
            )));
        }
        let flat: Vec<f32> = slab.chunks_exact(4).map(BigEndian::read_f32).collect();
        let values = Array2::from_shape_vec((ny, nx), flat)
            .map_err(|e| SerializationError::Malformed(e.to_string()))?;

        Ok(Some(IntermediateRecord {
            version,
            hdate,
            forecast_hour,
            map_source,
            field,
            units,
            description,
            level,
            startloc,
            grid: GridDescriptor { projection, nx, ny },
            earth_radius_km,
            wind_earth_relative,
            values,
        }))
    }

    fn required_record(&mut self, what: &str) -> error_stack::Result<Vec<u8>, SerializationError> {
        read_fortran_record(&mut self.inner)?.ok_or_else(|| {
            error_stack::Report::new(SerializationError::Malformed(format!(
                "file ends before the {what} record"
            )))
        })
    }
}

impl<R: Read> Iterator for IntermediateReader<R> {
    type Item = error_stack::Result<IntermediateRecord, SerializationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let res = self.read_field();
        match res {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // The framing cannot be trusted after an error
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read every field in the intermediate file at `path`.
pub fn read_file(path: &Path) -> error_stack::Result<Vec<IntermediateRecord>, SerializationError> {
    let f = File::open(path)
        .change_context_lazy(|| SerializationError::io(format!("opening {}", path.display())))?;
    IntermediateReader::new(BufReader::new(f))
        .collect::<Result<Vec<_>, _>>()
        .attach_printable_lazy(|| format!("while reading {}", path.display()))
}

/// Read one Fortran sequential unformatted record, or `None` at a clean end of file.
pub fn read_fortran_record<R: Read>(r: &mut R) -> error_stack::Result<Option<Vec<u8>>, SerializationError> {
    let nbytes = match r.read_u32::<BigEndian>() {
        Ok(n) => n as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(error_stack::Report::new(e)
                .change_context(SerializationError::io("reading a record marker")))
        }
    };

    let mut buf = vec![0; nbytes];
    r.read_exact(&mut buf)
        .change_context_lazy(|| SerializationError::Malformed(format!("truncated record of {nbytes} bytes")))?;
    let trailing = r
        .read_u32::<BigEndian>()
        .change_context(SerializationError::Malformed("missing trailing record marker".to_string()))?;
    if trailing as usize != nbytes {
        error_stack::bail!(SerializationError::Malformed(format!(
            "record markers disagree: {nbytes} before, {trailing} after"
        )));
    }
    Ok(Some(buf))
}

fn read_projection(c: &mut Cursor, kind: ProjectionKind) -> Result<Projection, SerializationError> {
    let start_lat = c.f32()? as f64;
    let start_lon = c.f32()? as f64;
    let projection = match kind {
        ProjectionKind::LatLon => Projection::LatLon {
            start_lat,
            start_lon,
            dlat: c.f32()? as f64,
            dlon: c.f32()? as f64,
        },
        ProjectionKind::Mercator => Projection::Mercator {
            start_lat,
            start_lon,
            dx: c.f32()? as f64,
            dy: c.f32()? as f64,
            truelat1: c.f32()? as f64,
        },
        ProjectionKind::LambertConformal => Projection::LambertConformal {
            start_lat,
            start_lon,
            dx: c.f32()? as f64,
            dy: c.f32()? as f64,
            xlonc: c.f32()? as f64,
            truelat1: c.f32()? as f64,
            truelat2: c.f32()? as f64,
        },
        ProjectionKind::Gaussian => Projection::Gaussian {
            start_lat,
            start_lon,
            nlats: c.f32()?.round() as i32,
            dlon: c.f32()? as f64,
        },
        ProjectionKind::PolarStereographic => Projection::PolarStereographic {
            start_lat,
            start_lon,
            dx: c.f32()? as f64,
            dy: c.f32()? as f64,
            xlonc: c.f32()? as f64,
            truelat1: c.f32()? as f64,
        },
    };
    Ok(projection)
}

/// Reads big-endian values from the contents of one record.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    record: &'static str,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], record: &'static str) -> Self {
        Self { buf, pos: 0, record }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SerializationError> {
        let end = self.pos + n;
        let bytes = self.buf.get(self.pos..end).ok_or_else(|| {
            SerializationError::Malformed(format!(
                "{} record is {} bytes, too short",
                self.record,
                self.buf.len()
            ))
        })?;
        self.pos = end;
        Ok(bytes)
    }

    fn i32(&mut self) -> Result<i32, SerializationError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    fn f32(&mut self) -> Result<f32, SerializationError> {
        Ok(BigEndian::read_f32(self.take(4)?))
    }

    /// A fixed-length, space-padded string, with the padding removed.
    fn string(&mut self, len: usize) -> Result<String, SerializationError> {
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).trim_end().to_string())
    }
}
