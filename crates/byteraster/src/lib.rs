//! BRST: dependency-light container for single-band byte rasters.
//!
//! - One `u8` value per cell, rows stored north to south, columns west to east.
//! - Extent is given in a projected CRS (metres): lower-left corner + square cell size.
//! - Payload is Raw, RLE or zlib (via `miniz_oxide`).
//!
//! File layout (little-endian):
//!   00  : [u8;4]  magic = b"BRST"
//!   04  : u32     version = 1
//!   08  : u32     width  (columns)
//!   0C  : u32     height (rows)
//!   10  : f64     min_x
//!   18  : f64     min_y
//!   20  : f64     cell_size
//!   28  : u8      nodata
//!   29  : u8      encoding (0 = Raw, 1 = RLE, 2 = zlib)
//!   2A  : u32     payload_size
//!   2E  : [payload_size bytes]
//!
//! RLE format: repeated [u16 run_len][u8 value] (little-endian)

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

pub const BRST_MAGIC: [u8; 4] = *b"BRST";
pub const BRST_VERSION: u32 = 1;

/// Largest raster `parse_bytes` accepts, in cells.
pub const MAX_CELLS: usize = 1 << 30;

/// Longest run one RLE triple can carry.
const RLE_MAX_RUN: usize = u16::MAX as usize;

/// Distinguishes concurrent `write_file_atomic` calls within one process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Compression level handed to `miniz_oxide` for zlib payloads.
const ZLIB_LEVEL: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    Raw = 0,
    Rle = 1,
    Zlib = 2,
}

impl TryFrom<u8> for Encoding {
    type Error = io::Error;

    fn try_from(value: u8) -> io::Result<Self> {
        match value {
            0 => Ok(Encoding::Raw),
            1 => Ok(Encoding::Rle),
            2 => Ok(Encoding::Zlib),
            x => Err(bad(&format!("unknown BRST encoding {}", x))),
        }
    }
}

/// A grid of byte values covering an axis-aligned projected extent.
///
/// The default raster is empty (`0 x 0`) and is what producers hand back when
/// they were asked to stop before doing any work.
#[derive(Debug, Clone, PartialEq)]
pub struct ByteRaster {
    pub width: u32,
    pub height: u32,
    /// Lower-left corner, metres.
    pub min_x: f64,
    pub min_y: f64,
    /// Edge length of one square cell, metres.
    pub cell_size: f64,
    pub nodata: u8,
    /// Row-major, `width * height` bytes, first row is the northernmost.
    pub data: Vec<u8>,
}

impl Default for ByteRaster {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            min_x: 0.0,
            min_y: 0.0,
            cell_size: 1.0,
            nodata: 0,
            data: Vec::new(),
        }
    }
}

impl ByteRaster {
    /// Creates a raster filled with `nodata`.
    pub fn filled(
        width: u32,
        height: u32,
        min_x: f64,
        min_y: f64,
        cell_size: f64,
        nodata: u8,
    ) -> Self {
        Self {
            width,
            height,
            min_x,
            min_y,
            cell_size,
            nodata,
            data: vec![nodata; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn max_x(&self) -> f64 {
        self.min_x + self.width as f64 * self.cell_size
    }

    #[inline]
    pub fn max_y(&self) -> f64 {
        self.min_y + self.height as f64 * self.cell_size
    }

    #[inline]
    pub fn get(&self, col: u32, row: u32) -> Option<u8> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.data.get(row as usize * self.width as usize + col as usize).copied()
    }

    #[inline]
    pub fn set(&mut self, col: u32, row: u32, value: u8) {
        if col < self.width && row < self.height {
            let idx = row as usize * self.width as usize + col as usize;
            self.data[idx] = value;
        }
    }

    /// Value of the cell containing the projected point, if inside the extent.
    pub fn value_at(&self, x: f64, y: f64) -> Option<u8> {
        if self.is_empty()
            || !(self.min_x..self.max_x()).contains(&x)
            || !(self.min_y..self.max_y()).contains(&y)
        {
            return None;
        }
        let col = ((x - self.min_x) / self.cell_size).floor() as u64;
        let row = ((self.max_y() - y) / self.cell_size).floor() as u64;
        if col >= self.width as u64 || row >= self.height as u64 {
            return None;
        }
        self.get(col as u32, row as u32)
    }

    /// Number of cells holding `value`.
    pub fn count(&self, value: u8) -> usize {
        self.data.iter().filter(|&&v| v == value).count()
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated BRST"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u8(buf: &mut &[u8]) -> io::Result<u8> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    let b = take(buf, 8)?;
    Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Parse BRST from a contiguous byte slice. This is the single source of truth for parsing.
pub fn parse_bytes(mut p: &[u8]) -> io::Result<ByteRaster> {
    if take(&mut p, 4)? != b"BRST" {
        return Err(bad("bad BRST magic"));
    }

    let version = le_u32(&mut p)?;
    if version != BRST_VERSION {
        return Err(bad("unsupported BRST version"));
    }

    let width = le_u32(&mut p)?;
    let height = le_u32(&mut p)?;
    let min_x = le_f64(&mut p)?;
    let min_y = le_f64(&mut p)?;
    let cell_size = le_f64(&mut p)?;

    if !(min_x.is_finite() && min_y.is_finite()) {
        return Err(bad("non-finite BRST origin"));
    }
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return Err(bad("cell_size must be > 0"));
    }

    let nodata = le_u8(&mut p)?;
    let encoding = Encoding::try_from(le_u8(&mut p)?)?;

    let cells = (width as usize)
        .checked_mul(height as usize)
        .filter(|&cells| cells <= MAX_CELLS)
        .ok_or_else(|| bad("raster size exceeds BRST limit"))?;

    let payload_size = le_u32(&mut p)? as usize;
    let payload = take(&mut p, payload_size)?;

    if !p.is_empty() {
        return Err(bad("trailing bytes after BRST payload"));
    }

    // The header must not promise more cells than the payload can hold.
    let plausible = match encoding {
        Encoding::Raw => payload_size == cells,
        Encoding::Rle => cells <= payload_size / 3 * RLE_MAX_RUN,
        Encoding::Zlib => true,
    };
    if !plausible {
        return Err(bad("payload does not match raster dimensions"));
    }

    let data = match encoding {
        Encoding::Raw => payload.to_vec(),
        Encoding::Rle => decode_rle(payload, cells)?,
        Encoding::Zlib => miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(payload, cells)
            .map_err(|_| bad("corrupt zlib payload"))?,
    };

    if data.len() != cells {
        return Err(bad("payload does not match raster dimensions"));
    }

    Ok(ByteRaster {
        width,
        height,
        min_x,
        min_y,
        cell_size,
        nodata,
        data,
    })
}

/// Serialize a raster into its BRST byte representation.
pub fn to_bytes(raster: &ByteRaster, encoding: Encoding) -> io::Result<Vec<u8>> {
    let cells = raster.width as usize * raster.height as usize;
    if raster.data.len() != cells {
        return Err(bad("data length != width * height"));
    }

    let payload = match encoding {
        Encoding::Raw => raster.data.clone(),
        Encoding::Rle => encode_rle(&raster.data),
        Encoding::Zlib => miniz_oxide::deflate::compress_to_vec_zlib(&raster.data, ZLIB_LEVEL),
    };

    let payload_size =
        u32::try_from(payload.len()).map_err(|_| bad("payload exceeds 4 GiB"))?;

    let mut out = Vec::with_capacity(46 + payload.len());

    out.extend_from_slice(&BRST_MAGIC);
    write_u32(&mut out, BRST_VERSION)?;
    write_u32(&mut out, raster.width)?;
    write_u32(&mut out, raster.height)?;
    write_f64(&mut out, raster.min_x)?;
    write_f64(&mut out, raster.min_y)?;
    write_f64(&mut out, raster.cell_size)?;
    out.write_all(&[raster.nodata, encoding as u8])?;
    write_u32(&mut out, payload_size)?;
    out.extend_from_slice(&payload);

    Ok(out)
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<ByteRaster> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<ByteRaster> {
    let bytes = fs::read(path)?;
    parse_bytes(&bytes)
}

pub fn write_file<P: AsRef<Path>>(path: P, raster: &ByteRaster, encoding: Encoding) -> io::Result<()> {
    let bytes = to_bytes(raster, encoding)?;

    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.flush()?;

    Ok(())
}

/// Writes next to `path` first and renames into place, so a concurrent reader
/// sees either no file or a complete one.
pub fn write_file_atomic<P: AsRef<Path>>(
    path: P,
    raster: &ByteRaster,
    encoding: Encoding,
) -> io::Result<()> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "path has no file name"))?;

    let mut tmp_name = file_name.to_os_string();
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    tmp_name.push(format!(".{}.{}.tmp", std::process::id(), seq));
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(e) = write_file(&tmp_path, raster, encoding) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp_path);
    })
}

pub fn encode_rle(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(raw.len() / 2);
    if raw.is_empty() {
        return out;
    }

    let mut i = 0usize;
    while i < raw.len() {
        let value = raw[i];
        let mut run_length = 1usize;

        while i + run_length < raw.len()
            && raw[i + run_length] == value
            && run_length < u16::MAX as usize
        {
            run_length += 1;
        }

        out.extend_from_slice(&(run_length as u16).to_le_bytes());
        out.push(value);
        i += run_length;
    }

    out
}

/// Decodes an RLE payload, refusing to expand beyond `limit` bytes.
pub fn decode_rle(rle: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::<u8>::with_capacity(limit.min(rle.len() / 3 * RLE_MAX_RUN));
    let mut i = 0usize;

    while i + 3 <= rle.len() {
        let run = u16::from_le_bytes([rle[i], rle[i + 1]]) as usize;
        let v = rle[i + 2];
        if out.len() + run > limit {
            return Err(bad("RLE payload expands past raster size"));
        }
        out.resize(out.len() + run, v);
        i += 3;
    }

    if i != rle.len() {
        return Err(bad("RLE payload truncated"));
    }

    Ok(out)
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
