//! PKZIP split archives.
//!
//! A finished single-file zip is re-laid into volumes `.z01`, `.z02`, ...
//! with the last one named `.zip`. The first volume opens with the spanning
//! signature; local headers, central directory records and the end records
//! never straddle a volume boundary; every offset in the central directory
//! and end records is relative to the volume (disk) it points into.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Smallest volume size accepted from configuration
pub const MIN_SPLIT_SIZE: u64 = 64 * 1024;

/// Volume-relative offsets are 32-bit
pub const MAX_SPLIT_SIZE: u64 = 0xFFFF_FFFF;

pub const SPANNING_SIGNATURE: u32 = 0x0807_4b50;
const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_EXTRA_ID: u16 = 0x0001;

const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const ZIP64_EOCD_LEN: usize = 56;
const ZIP64_LOCATOR_LEN: usize = 20;

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

pub(crate) fn read_u16(buf: &[u8], at: usize) -> io::Result<u16> {
    buf.get(at..at + 2)
        .and_then(|b| b.try_into().ok())
        .map(u16::from_le_bytes)
        .ok_or_else(|| invalid("truncated zip record"))
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> io::Result<u32> {
    buf.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| invalid("truncated zip record"))
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> io::Result<u64> {
    buf.get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| invalid("truncated zip record"))
}

fn write_at(buf: &mut [u8], at: usize, bytes: &[u8]) -> io::Result<()> {
    buf.get_mut(at..at + bytes.len())
        .ok_or_else(|| invalid("truncated zip record"))?
        .copy_from_slice(bytes);
    Ok(())
}

pub(crate) fn part_path(dir: &Path, stem: &str, number: usize) -> PathBuf {
    dir.join(format!("{}.z{:02}", stem, number))
}

pub(crate) fn final_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.zip", stem))
}

/// Sequential writer over numbered volumes of at most `split_size` bytes.
pub struct VolumeSink {
    dir: PathBuf,
    stem: String,
    split_size: u64,
    current: File,
    /// 0-based disk number of `current`
    disk: u32,
    written: u64,
}

impl VolumeSink {
    pub fn create(dir: &Path, stem: &str, split_size: u64) -> io::Result<Self> {
        if split_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "split size must be greater than 0",
            ));
        }
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            stem: stem.to_string(),
            split_size,
            current: File::create(part_path(dir, stem, 1))?,
            disk: 0,
            written: 0,
        })
    }

    /// Disk number and offset within that disk of the next byte.
    pub fn position(&self) -> (u32, u64) {
        (self.disk, self.written)
    }

    fn next_volume(&mut self) -> io::Result<()> {
        self.current.flush()?;
        self.current.sync_all()?;
        self.disk = self
            .disk
            .checked_add(1)
            .ok_or_else(|| invalid("too many volumes"))?;
        let number = usize::try_from(self.disk + 1).map_err(|e| invalid(e.to_string()))?;
        self.current = File::create(part_path(&self.dir, &self.stem, number))?;
        self.written = 0;
        Ok(())
    }

    /// Make sure the next `len` bytes land in a single volume.
    pub fn reserve(&mut self, len: u64) -> io::Result<()> {
        if len > self.split_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} byte zip record exceeds the {} byte volume size", len, self.split_size),
            ));
        }
        if self.written + len > self.split_size {
            self.next_volume()?;
        }
        Ok(())
    }

    /// Write `bytes` without crossing a volume boundary.
    pub fn write_unsplit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.reserve(bytes.len() as u64)?;
        self.write_all(bytes)
    }

    /// Close the last volume and rename it to `.zip`.
    pub fn finish(mut self) -> io::Result<Vec<PathBuf>> {
        self.current.flush()?;
        self.current.sync_all()?;
        let count = self.disk as usize + 1;
        drop(self.current);

        let mut paths: Vec<PathBuf> = (1..=count)
            .map(|n| part_path(&self.dir, &self.stem, n))
            .collect();
        if let Some(last) = paths.last_mut() {
            let final_path = final_path(&self.dir, &self.stem);
            fs::rename(&*last, &final_path)?;
            *last = final_path;
        }
        Ok(paths)
    }
}

impl Write for VolumeSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.written == self.split_size {
            self.next_volume()?;
        }
        let room = self.split_size - self.written;
        let len = buf.len().min(usize::try_from(room).unwrap_or(usize::MAX));
        self.current.write_all(&buf[..len])?;
        self.written += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current.flush()
    }
}

/// Where the central directory of a single-file zip lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Directory {
    pub entries: u64,
    pub size: u64,
    pub offset: u64,
}

/// Read the (zip64) end of central directory records from the tail of `file`.
pub(crate) fn read_directory(file: &mut File) -> io::Result<Directory> {
    let len = file.metadata()?.len();
    let tail_len = len.min((EOCD_LEN + 0xFFFF + ZIP64_LOCATOR_LEN) as u64);
    file.seek(SeekFrom::Start(len - tail_len))?;
    let mut tail = vec![0u8; tail_len as usize];
    file.read_exact(&mut tail)?;

    let eocd_at = (0..=tail.len().saturating_sub(EOCD_LEN))
        .rev()
        .find(|&i| read_u32(&tail, i).ok() == Some(EOCD_SIGNATURE))
        .ok_or_else(|| invalid("end of central directory not found"))?;

    let entries = read_u16(&tail, eocd_at + 10)?;
    let size = read_u32(&tail, eocd_at + 12)?;
    let offset = read_u32(&tail, eocd_at + 16)?;
    if entries != 0xFFFF && size != 0xFFFF_FFFF && offset != 0xFFFF_FFFF {
        return Ok(Directory {
            entries: u64::from(entries),
            size: u64::from(size),
            offset: u64::from(offset),
        });
    }

    let locator_at = eocd_at
        .checked_sub(ZIP64_LOCATOR_LEN)
        .ok_or_else(|| invalid("zip64 locator missing"))?;
    if read_u32(&tail, locator_at)? != ZIP64_LOCATOR_SIGNATURE {
        return Err(invalid("zip64 locator missing"));
    }
    let zip64_at = read_u64(&tail, locator_at + 8)?;

    let mut record = [0u8; ZIP64_EOCD_LEN];
    file.seek(SeekFrom::Start(zip64_at))?;
    file.read_exact(&mut record)?;
    if read_u32(&record, 0)? != ZIP64_EOCD_SIGNATURE {
        return Err(invalid("zip64 end of central directory not found"));
    }
    Ok(Directory {
        entries: read_u64(&record, 32)?,
        size: read_u64(&record, 40)?,
        offset: read_u64(&record, 48)?,
    })
}

/// One central directory record and where its local header offset is stored.
struct CentralRecord {
    bytes: Vec<u8>,
    local_offset: u64,
    /// Index of the zip64 offset slot in `bytes`, when the 32-bit field is saturated
    zip64_offset_at: Option<usize>,
}

fn parse_central_directory(raw: &[u8], entries: u64) -> io::Result<Vec<CentralRecord>> {
    let mut records = Vec::new();
    let mut at = 0;
    for _ in 0..entries {
        if read_u32(raw, at)? != CENTRAL_HEADER_SIGNATURE {
            return Err(invalid("bad central directory record"));
        }
        let name_len = read_u16(raw, at + 28)? as usize;
        let extra_len = read_u16(raw, at + 30)? as usize;
        let comment_len = read_u16(raw, at + 32)? as usize;
        let record_len = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
        let bytes = raw
            .get(at..at + record_len)
            .ok_or_else(|| invalid("truncated central directory"))?
            .to_vec();

        let compressed = read_u32(&bytes, 20)?;
        let uncompressed = read_u32(&bytes, 24)?;
        let offset32 = read_u32(&bytes, 42)?;

        let (local_offset, zip64_offset_at) = if offset32 == 0xFFFF_FFFF {
            let extra_start = CENTRAL_HEADER_LEN + name_len;
            let slot = zip64_offset_slot(&bytes, extra_start, extra_len, uncompressed, compressed)?;
            (read_u64(&bytes, slot)?, Some(slot))
        } else {
            (u64::from(offset32), None)
        };

        records.push(CentralRecord {
            bytes,
            local_offset,
            zip64_offset_at,
        });
        at += record_len;
    }
    Ok(records)
}

/// Position of the local header offset inside a zip64 extra field.
fn zip64_offset_slot(
    record: &[u8],
    extra_start: usize,
    extra_len: usize,
    uncompressed: u32,
    compressed: u32,
) -> io::Result<usize> {
    let mut at = extra_start;
    let end = extra_start + extra_len;
    while at + 4 <= end {
        let id = read_u16(record, at)?;
        let len = read_u16(record, at + 2)? as usize;
        if id == ZIP64_EXTRA_ID {
            let mut slot = at + 4;
            if uncompressed == 0xFFFF_FFFF {
                slot += 8;
            }
            if compressed == 0xFFFF_FFFF {
                slot += 8;
            }
            if slot + 8 > at + 4 + len {
                break;
            }
            return Ok(slot);
        }
        at += 4 + len;
    }
    Err(invalid("zip64 local header offset missing"))
}

fn end_records(
    disk: u32,
    offset: u64,
    cd_disk: u32,
    cd_offset: u64,
    entries_here: u64,
    directory: &Directory,
) -> Vec<u8> {
    let needs_zip64 = directory.entries >= 0xFFFF
        || entries_here >= 0xFFFF
        || directory.size >= 0xFFFF_FFFF
        || cd_offset >= 0xFFFF_FFFF
        || disk >= 0xFFFF;

    let mut out = Vec::with_capacity(ZIP64_EOCD_LEN + ZIP64_LOCATOR_LEN + EOCD_LEN);
    if needs_zip64 {
        out.extend_from_slice(&ZIP64_EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&((ZIP64_EOCD_LEN - 12) as u64).to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&disk.to_le_bytes());
        out.extend_from_slice(&cd_disk.to_le_bytes());
        out.extend_from_slice(&entries_here.to_le_bytes());
        out.extend_from_slice(&directory.entries.to_le_bytes());
        out.extend_from_slice(&directory.size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());

        out.extend_from_slice(&ZIP64_LOCATOR_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&disk.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&(disk + 1).to_le_bytes());
    }

    let clamp16 = |v: u64| u16::try_from(v).unwrap_or(0xFFFF);
    let clamp32 = |v: u64| u32::try_from(v).unwrap_or(0xFFFF_FFFF);
    out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
    out.extend_from_slice(&clamp16(u64::from(disk)).to_le_bytes());
    out.extend_from_slice(&clamp16(u64::from(cd_disk)).to_le_bytes());
    out.extend_from_slice(&clamp16(entries_here).to_le_bytes());
    out.extend_from_slice(&clamp16(directory.entries).to_le_bytes());
    out.extend_from_slice(&clamp32(directory.size).to_le_bytes());
    out.extend_from_slice(&clamp32(cd_offset).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Lay the single-file zip at `source` out as a split archive in `dir`.
///
/// A zip that fits in one volume is moved to `<stem>.zip` unchanged.
pub fn split_archive(source: &Path, dir: &Path, stem: &str, split_size: u64) -> io::Result<Vec<PathBuf>> {
    let mut file = File::open(source)?;
    let total = file.metadata()?.len();
    if total <= split_size {
        drop(file);
        let target = final_path(dir, stem);
        fs::rename(source, &target)?;
        return Ok(vec![target]);
    }

    let directory = read_directory(&mut file)?;
    let mut raw = vec![0u8; usize::try_from(directory.size).map_err(|e| invalid(e.to_string()))?];
    file.seek(SeekFrom::Start(directory.offset))?;
    file.read_exact(&mut raw)?;
    let mut records = parse_central_directory(&raw, directory.entries)?;

    // Local entries in file order; each runs up to the next one
    let mut starts: Vec<u64> = records.iter().map(|r| r.local_offset).collect();
    starts.sort_unstable();
    starts.dedup();

    let mut sink = VolumeSink::create(dir, stem, split_size)?;
    sink.write_unsplit(&SPANNING_SIGNATURE.to_le_bytes())?;

    let mut relocated = std::collections::HashMap::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(directory.offset);
        let mut header = [0u8; LOCAL_HEADER_LEN];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut header)?;
        if read_u32(&header, 0)? != LOCAL_HEADER_SIGNATURE {
            return Err(invalid("bad local file header"));
        }
        let header_len = (LOCAL_HEADER_LEN
            + read_u16(&header, 26)? as usize
            + read_u16(&header, 28)? as usize) as u64;

        sink.reserve(header_len)?;
        relocated.insert(start, sink.position());
        file.seek(SeekFrom::Start(start))?;
        let copied = io::copy(&mut (&mut file).take(end - start), &mut sink)?;
        if copied != end - start {
            return Err(invalid("zip entry shorter than its span"));
        }
    }

    let mut cd_start = None;
    let mut disks = Vec::with_capacity(records.len());
    for record in &mut records {
        let &(disk, offset) = relocated
            .get(&record.local_offset)
            .ok_or_else(|| invalid("central record without a local entry"))?;
        let disk16 = u16::try_from(disk).map_err(|_| invalid("too many volumes"))?;
        write_at(&mut record.bytes, 34, &disk16.to_le_bytes())?;
        match record.zip64_offset_at {
            Some(slot) => write_at(&mut record.bytes, slot, &offset.to_le_bytes())?,
            None => {
                let offset32 = u32::try_from(offset).map_err(|_| invalid("volume offset overflow"))?;
                write_at(&mut record.bytes, 42, &offset32.to_le_bytes())?;
            },
        }

        sink.reserve(record.bytes.len() as u64)?;
        let position = sink.position();
        cd_start.get_or_insert(position);
        disks.push(position.0);
        sink.write_all(&record.bytes)?;
    }

    let (cd_disk, cd_offset) = cd_start.unwrap_or_else(|| sink.position());
    // Reserve for the largest tail so the disk number is final before encoding
    sink.reserve((ZIP64_EOCD_LEN + ZIP64_LOCATOR_LEN + EOCD_LEN) as u64)?;
    let (disk, offset) = sink.position();
    let entries_here = disks.iter().filter(|&&d| d == disk).count() as u64;
    let tail = end_records(disk, offset, cd_disk, cd_offset, entries_here, &directory);
    sink.write_all(&tail)?;

    drop(file);
    let paths = sink.finish()?;
    fs::remove_file(source)?;
    Ok(paths)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sink_fills_volumes_and_keeps_records_whole() {
        let temp = TempDir::new().unwrap();
        let mut sink = VolumeSink::create(temp.path(), "vol", 4).unwrap();
        sink.write_all(b"abcdef").unwrap();
        assert_eq!(sink.position(), (1, 2));

        // Three bytes do not fit in the two left, so they start a new volume
        sink.write_unsplit(b"XYZ").unwrap();
        assert_eq!(sink.position(), (2, 3));

        let paths = sink.finish().unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(fs::read(&paths[0]).unwrap(), b"abcd");
        assert_eq!(fs::read(&paths[1]).unwrap(), b"ef");
        assert_eq!(fs::read(&paths[2]).unwrap(), b"XYZ");
        assert!(paths[0].to_string_lossy().ends_with("vol.z01"));
        assert!(paths[2].to_string_lossy().ends_with("vol.zip"));
    }

    #[test]
    fn test_record_larger_than_a_volume_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut sink = VolumeSink::create(temp.path(), "vol", 4).unwrap();
        assert!(sink.write_unsplit(b"too long").is_err());
    }

    #[test]
    fn test_small_zip_is_moved_unchanged() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("scratch.part");
        fs::write(&source, b"PK-not-really-a-zip").unwrap();

        let paths = split_archive(&source, temp.path(), "ST", 1024).unwrap();
        assert_eq!(paths, vec![temp.path().join("ST.zip")]);
        assert_eq!(fs::read(&paths[0]).unwrap(), b"PK-not-really-a-zip");
        assert!(!source.exists());
    }

    #[test]
    fn test_end_records_switch_to_zip64_for_many_entries() {
        let directory = Directory {
            entries: 70_000,
            size: 5_000_000,
            offset: 0,
        };
        let tail = end_records(3, 100, 2, 40, 1_000, &directory);
        assert_eq!(tail.len(), ZIP64_EOCD_LEN + ZIP64_LOCATOR_LEN + EOCD_LEN);
        assert_eq!(read_u32(&tail, 0).unwrap(), ZIP64_EOCD_SIGNATURE);
        assert_eq!(read_u64(&tail, 32).unwrap(), 70_000);
        let locator = ZIP64_EOCD_LEN;
        assert_eq!(read_u32(&tail, locator + 16).unwrap(), 4);
        let eocd = locator + ZIP64_LOCATOR_LEN;
        assert_eq!(read_u16(&tail, eocd + 10).unwrap(), 0xFFFF);
    }
}
