//! Safetensors store for derived arrays (LFP, CSD, wavelet coefficients).
//!
//! ```text
//! [u64 LE header length][JSON header, space-padded to 8 bytes][tensor bytes …]
//! header: { name: { dtype, shape, data_offsets: [begin, end] }, "__metadata__": { str: str } }
//! ```
//!
//! Complex arrays are stored as two real tensors, `<name>.re` and `<name>.im`.
//! Reading memory-maps the file and decodes one tensor at a time, so a
//! session's derived arrays can be opened without loading all of them.
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use ndarray::{Array2, Array3, ArrayBase, ArrayD, Data, Dimension, Ix2, Ix3, IxDyn, Zip};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const METADATA_KEY: &str = "__metadata__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    F32,
    F64,
    I32,
}

impl Dtype {
    pub fn size(self) -> usize {
        match self {
            Dtype::F32 | Dtype::I32 => 4,
            Dtype::F64 => 8,
        }
    }
}

/// Header entry of one tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data_offsets: (usize, usize),
}

// ── Writer ──────────────────────────────────────────────────────────────────

/// Safetensors writer for F32, F64 and I32 tensors.
///
/// ```rust,no_run
/// use hippo_ephys::io::StWriter;
/// use ndarray::Array2;
/// let mut w = StWriter::new();
/// w.add_f32("signal", &[1.0f32, 2.0, 3.0], &[1, 3]);
/// w.add_f32_array("csd", &Array2::<f64>::zeros((4, 192)));
/// w.write("/tmp/out.safetensors").unwrap();
/// ```
#[derive(Debug, Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, Dtype, Vec<usize>)>,
    metadata: BTreeMap<String, String>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Free-form string metadata stored under `__metadata__`.
    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let mut bytes = vec![0u8; data.len() * 4];
        LittleEndian::write_f32_into(data, &mut bytes);
        self.entries.push((name.to_string(), bytes, Dtype::F32, shape.to_vec()));
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let mut bytes = vec![0u8; data.len() * 8];
        LittleEndian::write_f64_into(data, &mut bytes);
        self.entries.push((name.to_string(), bytes, Dtype::F64, shape.to_vec()));
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let mut bytes = vec![0u8; data.len() * 4];
        LittleEndian::write_i32_into(data, &mut bytes);
        self.entries.push((name.to_string(), bytes, Dtype::I32, shape.to_vec()));
    }

    /// Any-dimensional `f64` array, narrowed to F32.
    pub fn add_f32_array<S, D>(&mut self, name: &str, arr: &ArrayBase<S, D>)
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let data: Vec<f32> = arr.iter().map(|&v| v as f32).collect();
        self.add_f32(name, &data, arr.shape());
    }

    pub fn add_f64_array<S, D>(&mut self, name: &str, arr: &ArrayBase<S, D>)
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, arr.shape());
    }

    /// Raw samples, widened to I32.
    pub fn add_i16_array<S, D>(&mut self, name: &str, arr: &ArrayBase<S, D>)
    where
        S: Data<Elem = i16>,
        D: Dimension,
    {
        let data: Vec<i32> = arr.iter().map(|&v| v as i32).collect();
        self.add_i32(name, &data, arr.shape());
    }

    /// Complex array as `<name>.re` / `<name>.im` F32 tensors.
    pub fn add_complex_array<S, D>(&mut self, name: &str, arr: &ArrayBase<S, D>)
    where
        S: Data<Elem = Complex<f64>>,
        D: Dimension,
    {
        let re: Vec<f32> = arr.iter().map(|c| c.re as f32).collect();
        let im: Vec<f32> = arr.iter().map(|c| c.im as f32).collect();
        self.add_f32(&format!("{name}.re"), &re, arr.shape());
        self.add_f32(&format!("{name}.im"), &im, arr.shape());
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        use std::io::Write;
        let path = path.as_ref();

        let mut header_map = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header_map.insert(METADATA_KEY.to_string(), serde_json::to_value(&self.metadata)?);
        }
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            let info = TensorInfo {
                dtype: *dtype,
                shape: shape.clone(),
                data_offsets: (offset, offset + data.len()),
            };
            header_map.insert(name.clone(), serde_json::to_value(&info)?);
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes
            .into_iter()
            .chain(std::iter::repeat(b' ').take(pad))
            .collect();

        let mut f = std::io::BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        );
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        f.flush()?;
        info!(path = %path.display(), tensors = self.entries.len(), bytes = offset, "wrote derived arrays");
        Ok(())
    }
}

// ── Reader ──────────────────────────────────────────────────────────────────

/// A memory-mapped safetensors file; tensors are decoded on request.
#[derive(Debug)]
pub struct DerivedArrays {
    pub path: PathBuf,
    tensors: BTreeMap<String, TensorInfo>,
    metadata: BTreeMap<String, String>,
    data_start: usize,
    mmap: Mmap,
}

impl DerivedArrays {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        // SAFETY: read-only mapping of a file this process does not write.
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", path.display()))?;

        if mmap.len() < 8 {
            bail!("{}: safetensors file too small", path.display());
        }
        let n = LittleEndian::read_u64(&mmap[..8]) as usize;
        let data_start = 8usize.checked_add(n).filter(|&e| e <= mmap.len()).with_context(|| {
            format!("{}: header length {n} exceeds file size {}", path.display(), mmap.len())
        })?;
        let header: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&mmap[8..data_start])
            .with_context(|| format!("{}: failed to parse safetensors header", path.display()))?;

        let mut tensors = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for (name, value) in header {
            if name == METADATA_KEY {
                metadata = serde_json::from_value(value).context("parsing __metadata__")?;
                continue;
            }
            let info: TensorInfo = serde_json::from_value(value)
                .with_context(|| format!("tensor {name:?}: malformed header entry"))?;
            let (begin, end) = info.data_offsets;
            let expected = info.shape.iter().product::<usize>() * info.dtype.size();
            if begin > end || end - begin != expected || data_start + end > mmap.len() {
                bail!(
                    "tensor {name:?}: offsets {begin}..{end} do not fit shape {:?} ({expected} bytes) in a {}-byte file",
                    info.shape,
                    mmap.len()
                );
            }
            tensors.insert(name, info);
        }

        debug!(path = %path.display(), tensors = tensors.len(), "opened derived arrays");
        Ok(Self { path: path.to_path_buf(), tensors, metadata, data_start, mmap })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn info(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.get(name)
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    fn entry(&self, name: &str) -> Result<(&TensorInfo, &[u8])> {
        let info = self
            .tensors
            .get(name)
            .with_context(|| format!("{}: missing tensor {name:?}", self.path.display()))?;
        let (begin, end) = info.data_offsets;
        Ok((info, &self.mmap[self.data_start + begin..self.data_start + end]))
    }

    /// Decode an F32 tensor.
    pub fn array_f32(&self, name: &str) -> Result<ArrayD<f32>> {
        let (info, bytes) = self.entry(name)?;
        if info.dtype != Dtype::F32 {
            bail!("tensor {name:?} is {:?}, not F32", info.dtype);
        }
        let mut out = vec![0f32; bytes.len() / 4];
        LittleEndian::read_f32_into(bytes, &mut out);
        Ok(ArrayD::from_shape_vec(IxDyn(&info.shape), out)?)
    }

    /// Decode an I32 tensor.
    pub fn array_i32(&self, name: &str) -> Result<ArrayD<i32>> {
        let (info, bytes) = self.entry(name)?;
        if info.dtype != Dtype::I32 {
            bail!("tensor {name:?} is {:?}, not I32", info.dtype);
        }
        let mut out = vec![0i32; bytes.len() / 4];
        LittleEndian::read_i32_into(bytes, &mut out);
        Ok(ArrayD::from_shape_vec(IxDyn(&info.shape), out)?)
    }

    /// Decode an F32 or F64 tensor as `f64`.
    pub fn array_f64(&self, name: &str) -> Result<ArrayD<f64>> {
        let (info, bytes) = self.entry(name)?;
        let data = match info.dtype {
            Dtype::F64 => {
                let mut out = vec![0f64; bytes.len() / 8];
                LittleEndian::read_f64_into(bytes, &mut out);
                out
            }
            Dtype::F32 => {
                let mut out = vec![0f32; bytes.len() / 4];
                LittleEndian::read_f32_into(bytes, &mut out);
                out.into_iter().map(f64::from).collect()
            }
            Dtype::I32 => bail!("tensor {name:?} is I32, not floating point"),
        };
        Ok(ArrayD::from_shape_vec(IxDyn(&info.shape), data)?)
    }

    pub fn array2(&self, name: &str) -> Result<Array2<f64>> {
        self.array_f64(name)?
            .into_dimensionality::<Ix2>()
            .with_context(|| format!("tensor {name:?} is not 2-D"))
    }

    pub fn array3(&self, name: &str) -> Result<Array3<f64>> {
        self.array_f64(name)?
            .into_dimensionality::<Ix3>()
            .with_context(|| format!("tensor {name:?} is not 3-D"))
    }

    /// Reassemble a complex array written by [`StWriter::add_complex_array`].
    pub fn complex3(&self, name: &str) -> Result<Array3<Complex<f64>>> {
        let re = self.array3(&format!("{name}.re"))?;
        let im = self.array3(&format!("{name}.im"))?;
        if re.dim() != im.dim() {
            bail!("tensor {name:?}: real {:?} and imaginary {:?} parts differ", re.dim(), im.dim());
        }
        Ok(Zip::from(&re).and(&im).map_collect(|&r, &i| Complex::new(r, i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn header_is_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.safetensors");
        let mut w = StWriter::new();
        w.add_i32("n", &[7], &[1]);
        w.write(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let n = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        assert_eq!(n % 8, 0);
        assert_eq!(bytes.len(), 8 + n + 4);
    }

    #[test]
    fn dtype_mismatch_and_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.safetensors");
        let mut w = StWriter::new();
        w.add_f64_array("x", &array![[1.0, 2.0], [3.0, 4.0]]);
        w.set_metadata("session", "2020-03-13_14-00-04");
        w.write(&path).unwrap();

        let r = DerivedArrays::open(&path).unwrap();
        assert_eq!(r.metadata("session"), Some("2020-03-13_14-00-04"));
        assert!(r.array_f32("x").is_err());
        assert!(r.array3("x").is_err());
        assert!(r.array2("y").is_err());
        assert_eq!(r.array2("x").unwrap(), array![[1.0, 2.0], [3.0, 4.0]]);
    }

    #[test]
    fn truncated_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.safetensors");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(DerivedArrays::open(&path).is_err());
    }
}
