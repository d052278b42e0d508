//! Binary vector and truthset files.
//!
//! Vector files carry a `u32` point count and `u32` dimension followed by
//! the row-major little-endian elements; there is no magic number or
//! version, so the declared counts are validated against the file size.
//! Truthset files for recall evaluation hold `npts * k` `u32` neighbor ids
//! and, optionally, the matching `f32` distances; the two variants are told
//! apart by total size.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::distance::Element;
use crate::error::{IndexError, Result};

/// Element types with a little-endian file representation.
pub trait BinElement: Element {
    fn read_into(rdr: &mut dyn Read, out: &mut [Self]) -> io::Result<()>;
    fn write_slice(wtr: &mut dyn Write, data: &[Self]) -> io::Result<()>;
}

impl BinElement for f32 {
    fn read_into(rdr: &mut dyn Read, out: &mut [Self]) -> io::Result<()> {
        rdr.read_f32_into::<LittleEndian>(out)
    }

    fn write_slice(wtr: &mut dyn Write, data: &[Self]) -> io::Result<()> {
        for &v in data {
            wtr.write_f32::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

impl BinElement for i8 {
    fn read_into(rdr: &mut dyn Read, out: &mut [Self]) -> io::Result<()> {
        rdr.read_i8_into(out)
    }

    fn write_slice(wtr: &mut dyn Write, data: &[Self]) -> io::Result<()> {
        for &v in data {
            wtr.write_i8(v)?;
        }
        Ok(())
    }
}

impl BinElement for u8 {
    fn read_into(rdr: &mut dyn Read, out: &mut [Self]) -> io::Result<()> {
        rdr.read_exact(out)
    }

    fn write_slice(wtr: &mut dyn Write, data: &[Self]) -> io::Result<()> {
        wtr.write_all(data)
    }
}

/// Source of vector rows for the streaming driver.
///
/// `load_into` copies rows `[offset, offset + count)` into `out`, one
/// `padded_dim`-element row per point with the tail beyond `dim` zeroed.
pub trait VectorSource<T: Element> {
    fn num_points(&self) -> usize;
    fn dim(&self) -> usize;
    fn load_into(
        &mut self,
        offset: usize,
        count: usize,
        padded_dim: usize,
        out: &mut [T],
    ) -> Result<()>;
}

/// Size-validated reader over an on-disk vector file.
pub struct BinFile<T: BinElement> {
    file: File,
    path: PathBuf,
    npts: usize,
    dim: usize,
    _marker: PhantomData<T>,
}

impl<T: BinElement> BinFile<T> {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let npts = file.read_u32::<LittleEndian>()? as usize;
        let dim = file.read_u32::<LittleEndian>()? as usize;
        let expected = 8 + npts * dim * std::mem::size_of::<T>();
        let actual = file.metadata()?.len() as usize;
        if actual != expected {
            return Err(IndexError::FileFormat(format!(
                "{}: size is {actual} but npts={npts} dim={dim} elem={} implies {expected}",
                path.display(),
                T::NAME,
            )));
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            npts,
            dim,
            _marker: PhantomData,
        })
    }

    pub fn num_points(&self) -> usize {
        self.npts
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn load_rows(
        &mut self,
        offset: usize,
        count: usize,
        padded_dim: usize,
        out: &mut [T],
    ) -> Result<()> {
        if offset + count > self.npts {
            return Err(IndexError::FileFormat(format!(
                "{}: requested rows [{offset}, {}) but file has {} points",
                self.path.display(),
                offset + count,
                self.npts,
            )));
        }
        if padded_dim < self.dim || out.len() < count * padded_dim {
            return Err(IndexError::InvalidParameter(
                "load buffer is too small for the requested rows".into(),
            ));
        }
        let elem = std::mem::size_of::<T>();
        self.file
            .seek(SeekFrom::Start((8 + offset * self.dim * elem) as u64))?;
        let mut reader = BufReader::new(&mut self.file);
        for i in 0..count {
            let row = &mut out[i * padded_dim..i * padded_dim + self.dim];
            T::read_into(&mut reader, row)?;
            out[i * padded_dim + self.dim..(i + 1) * padded_dim].fill(T::default());
        }
        Ok(())
    }
}

impl<T: BinElement> VectorSource<T> for BinFile<T> {
    fn num_points(&self) -> usize {
        self.npts
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn load_into(
        &mut self,
        offset: usize,
        count: usize,
        padded_dim: usize,
        out: &mut [T],
    ) -> Result<()> {
        self.load_rows(offset, count, padded_dim, out)
    }
}

/// In-memory vector source, mainly for tests and synthetic data.
pub struct SliceSource<T> {
    data: Vec<T>,
    npts: usize,
    dim: usize,
}

impl<T: Element> SliceSource<T> {
    pub fn new(data: Vec<T>, npts: usize, dim: usize) -> Result<Self> {
        if data.len() != npts * dim {
            return Err(IndexError::FileFormat(format!(
                "slice of {} elements does not hold {npts} x {dim} points",
                data.len()
            )));
        }
        Ok(Self { data, npts, dim })
    }
}

impl<T: Element> VectorSource<T> for SliceSource<T> {
    fn num_points(&self) -> usize {
        self.npts
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn load_into(
        &mut self,
        offset: usize,
        count: usize,
        padded_dim: usize,
        out: &mut [T],
    ) -> Result<()> {
        if offset + count > self.npts {
            return Err(IndexError::FileFormat(format!(
                "requested rows [{offset}, {}) but source has {} points",
                offset + count,
                self.npts,
            )));
        }
        if padded_dim < self.dim || out.len() < count * padded_dim {
            return Err(IndexError::InvalidParameter(
                "load buffer is too small for the requested rows".into(),
            ));
        }
        for i in 0..count {
            let src = &self.data[(offset + i) * self.dim..(offset + i + 1) * self.dim];
            out[i * padded_dim..i * padded_dim + self.dim].copy_from_slice(src);
            out[i * padded_dim + self.dim..(i + 1) * padded_dim].fill(T::default());
        }
        Ok(())
    }
}

/// Read just the `(npts, dim)` header of a vector file.
pub fn bin_metadata(path: &Path) -> Result<(usize, usize)> {
    let mut file = File::open(path)?;
    let npts = file.read_u32::<LittleEndian>()? as usize;
    let dim = file.read_u32::<LittleEndian>()? as usize;
    Ok((npts, dim))
}

/// Write a vector file from rows. Rows longer than `dim` are truncated,
/// which lets aligned storage rows be written back without copying.
pub fn write_bin<'a, T: BinElement + 'a>(
    path: &Path,
    dim: usize,
    rows: &[&'a [T]],
) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u32::<LittleEndian>(rows.len() as u32)?;
    w.write_u32::<LittleEndian>(dim as u32)?;
    for row in rows {
        debug_assert!(row.len() >= dim);
        T::write_slice(&mut w, &row[..dim])?;
    }
    w.flush()?;
    Ok(())
}

/// Ground-truth neighbors for recall evaluation.
pub struct Truthset {
    npts: usize,
    k: usize,
    ids: Vec<u32>,
    dists: Option<Vec<f32>>,
}

impl Truthset {
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let npts = file.read_u32::<LittleEndian>()? as usize;
        let k = file.read_u32::<LittleEndian>()? as usize;
        let actual = file.metadata()?.len() as usize;
        let ids_only = 8 + npts * k * 4;
        let with_dists = 8 + 2 * npts * k * 4;
        let has_dists = if actual == ids_only {
            false
        } else if actual == with_dists {
            true
        } else {
            return Err(IndexError::FileFormat(format!(
                "{}: size {actual} matches neither ids-only ({ids_only}) nor ids+distances ({with_dists})",
                path.display(),
            )));
        };
        let mut reader = BufReader::new(file);
        let mut ids = vec![0u32; npts * k];
        reader.read_u32_into::<LittleEndian>(&mut ids)?;
        let dists = if has_dists {
            let mut d = vec![0f32; npts * k];
            reader.read_f32_into::<LittleEndian>(&mut d)?;
            Some(d)
        } else {
            None
        };
        Ok(Self { npts, k, ids, dists })
    }

    pub fn num_queries(&self) -> usize {
        self.npts
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn ids_for(&self, query: usize) -> &[u32] {
        &self.ids[query * self.k..(query + 1) * self.k]
    }

    pub fn distances_for(&self, query: usize) -> Option<&[f32]> {
        self.dists
            .as_ref()
            .map(|d| &d[query * self.k..(query + 1) * self.k])
    }
}

/// Rewrite a float vector file for inner-product search.
///
/// Block-wise version of [`crate::distance::augment_base`]: two passes over
/// the input, the first to find the largest norm, the second to write the
/// scaled rows with the norm-restoring extra coordinate. The output has
/// `dim + 1` columns. Returns the scaling norm.
pub fn prepare_inner_product_base(input: &Path, output: &Path) -> Result<f32> {
    const BLOCK: usize = 100_000;

    let mut src = BinFile::<f32>::open(input)?;
    let (npts, dim) = (src.num_points(), src.dim());
    if npts == 0 || dim == 0 {
        return Err(IndexError::FileFormat(format!(
            "{}: empty vector file",
            input.display()
        )));
    }

    let block = BLOCK.min(npts);
    let mut buf = vec![0f32; block * dim];
    let mut norms_sq = vec![0f32; npts];
    let mut max_sq = 0f32;
    let mut offset = 0;
    while offset < npts {
        let count = block.min(npts - offset);
        src.load_rows(offset, count, dim, &mut buf[..count * dim])?;
        for p in 0..count {
            let sq: f32 = buf[p * dim..(p + 1) * dim].iter().map(|x| x * x).sum();
            norms_sq[offset + p] = sq;
            max_sq = max_sq.max(sq);
        }
        offset += count;
    }
    let max_norm = max_sq.sqrt();
    let scale = if max_norm > 0.0 { max_norm } else { 1.0 };

    let mut w = BufWriter::new(File::create(output)?);
    w.write_u32::<LittleEndian>(npts as u32)?;
    w.write_u32::<LittleEndian>((dim + 1) as u32)?;
    let mut offset = 0;
    while offset < npts {
        let count = block.min(npts - offset);
        src.load_rows(offset, count, dim, &mut buf[..count * dim])?;
        for p in 0..count {
            for &x in &buf[p * dim..(p + 1) * dim] {
                w.write_f32::<LittleEndian>(x / scale)?;
            }
            let res = (1.0 - norms_sq[offset + p] / (scale * scale)).max(0.0);
            w.write_f32::<LittleEndian>(res.sqrt())?;
        }
        offset += count;
    }
    w.flush()?;
    Ok(max_norm)
}
