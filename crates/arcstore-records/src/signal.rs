//! Loading of raw signal samples from NumPy `.npy` files.
//!
//! Each measurement is stored as a two-column array of shape
//! `[samples, 2]`: column 0 is the load voltage and column 1 the source
//! current. Only little-endian `f8`/`f4` data is accepted.

use std::path::{Component, Path};

use serde::Serialize;

const MAGIC: &[u8] = b"\x93NUMPY";

/// Samples of one measurement, split by channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalData {
    pub load_voltage: Vec<f64>,
    pub source_current: Vec<f64>,
}

impl SignalData {
    pub fn len(&self) -> usize {
        self.load_voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.load_voltage.is_empty()
    }
}

/// Errors from locating or decoding a signal file.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The stored path is absolute or leaves the data directory.
    #[error("binary path '{0}' is outside the data directory")]
    InvalidPath(String),

    #[error("signal file '{0}' does not exist")]
    Missing(String),

    #[error("failed to read signal file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed npy data: {0}")]
    Format(String),

    #[error("unsupported npy dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("expected an array of shape [samples, 2], found {0:?}")]
    Shape(Vec<usize>),
}

/// Reads the samples stored at `binary_path`, relative to `binary_dir`.
///
/// # Errors
///
/// Returns `SignalError::InvalidPath` for absolute paths or paths with
/// `..` components, `SignalError::Missing` if the file does not exist, and
/// a decoding error if the file is not a supported `.npy` array.
pub fn load_signal(binary_dir: &Path, binary_path: &str) -> Result<SignalData, SignalError> {
    let relative = Path::new(binary_path);
    let confined = !binary_path.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !confined {
        return Err(SignalError::InvalidPath(binary_path.to_string()));
    }

    let path = binary_dir.join(relative);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SignalError::Missing(binary_path.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let signal = parse_npy(&bytes)?;
    tracing::debug!(path = %path.display(), samples = signal.len(), "loaded signal data");
    Ok(signal)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F8,
    F4,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, SignalError> {
        match descr {
            "<f8" => Ok(Dtype::F8),
            "<f4" => Ok(Dtype::F4),
            other => Err(SignalError::UnsupportedDtype(other.to_string())),
        }
    }

    fn width(self) -> usize {
        match self {
            Dtype::F8 => 8,
            Dtype::F4 => 4,
        }
    }

    fn decode(self, chunk: &[u8]) -> f64 {
        match self {
            Dtype::F8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            }
            Dtype::F4 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(chunk);
                f64::from(f32::from_le_bytes(raw))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

/// Text following `'key':` in the header dictionary.
fn dict_value<'a>(header: &'a str, key: &str) -> Result<&'a str, SignalError> {
    let needle = format!("'{key}':");
    let start = header
        .find(&needle)
        .ok_or_else(|| SignalError::Format(format!("header has no '{key}' entry")))?;
    Ok(header[start + needle.len()..].trim_start())
}

impl Header {
    fn parse(header: &str) -> Result<Self, SignalError> {
        let descr = dict_value(header, "descr")?;
        let descr = descr
            .strip_prefix('\'')
            .and_then(|rest| rest.split('\'').next())
            .ok_or_else(|| SignalError::Format("descr is not a string".to_string()))?;

        let fortran_order = match dict_value(header, "fortran_order")? {
            v if v.starts_with("True") => true,
            v if v.starts_with("False") => false,
            _ => return Err(SignalError::Format("fortran_order is not a bool".to_string())),
        };

        let shape = dict_value(header, "shape")?;
        let shape = shape
            .strip_prefix('(')
            .and_then(|rest| rest.split(')').next())
            .ok_or_else(|| SignalError::Format("shape is not a tuple".to_string()))?;
        let shape = shape
            .split(',')
            .map(str::trim)
            .filter(|dim| !dim.is_empty())
            .map(|dim| {
                dim.parse::<usize>()
                    .map_err(|_| SignalError::Format(format!("invalid dimension '{dim}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dtype: Dtype::parse(descr)?,
            fortran_order,
            shape,
        })
    }
}

/// Decodes an in-memory `.npy` file (format versions 1 to 3).
///
/// # Errors
///
/// Returns `SignalError::Format` for a damaged header or truncated data,
/// `SignalError::UnsupportedDtype` for anything but `<f8`/`<f4`, and
/// `SignalError::Shape` unless the array has exactly two columns.
pub fn parse_npy(bytes: &[u8]) -> Result<SignalData, SignalError> {
    if bytes.len() < 10 || !bytes.starts_with(MAGIC) {
        return Err(SignalError::Format("missing npy magic string".to_string()));
    }

    let (header_len, header_start): (usize, usize) = match bytes[6] {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            let raw = bytes
                .get(8..12)
                .ok_or_else(|| SignalError::Format("truncated header length".to_string()))?;
            let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let len = usize::try_from(len)
                .map_err(|_| SignalError::Format("header length overflow".to_string()))?;
            (len, 12)
        }
        version => {
            return Err(SignalError::Format(format!(
                "unsupported format version {version}"
            )))
        }
    };

    let header_end = header_start
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| SignalError::Format("truncated header".to_string()))?;
    let header = std::str::from_utf8(&bytes[header_start..header_end])
        .map_err(|_| SignalError::Format("header is not valid text".to_string()))?;
    let header = Header::parse(header)?;

    let rows = match header.shape.as_slice() {
        [rows, 2] => *rows,
        other => return Err(SignalError::Shape(other.to_vec())),
    };

    let width = header.dtype.width();
    let expected = rows
        .checked_mul(2 * width)
        .ok_or_else(|| SignalError::Format("array too large".to_string()))?;
    let data = &bytes[header_end..];
    if data.len() < expected {
        return Err(SignalError::Format(format!(
            "expected {expected} bytes of samples, found {}",
            data.len()
        )));
    }

    let values: Vec<f64> = data[..expected]
        .chunks_exact(width)
        .map(|chunk| header.dtype.decode(chunk))
        .collect();

    let (load_voltage, source_current) = if header.fortran_order {
        let (voltage, current) = values.split_at(rows);
        (voltage.to_vec(), current.to_vec())
    } else {
        values
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .unzip()
    };

    Ok(SignalData {
        load_voltage,
        source_current,
    })
}
