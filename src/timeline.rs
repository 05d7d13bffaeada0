//! Timeline files: append-only datagram streams with a sparse skip-index.
//!
//! ```text
//! [4B "UTLN"] [4B version=1] [4B sample_rate] [1B content_type] [3B reserved]
//! [4B index_stride] [8B num_datagrams] [8B total_samples] [4B num_index_entries]
//! num_index_entries x ([8B sample_offset] [8B byte_offset])
//! datagram stream: [4B duration] [4B payload_len] [payload] ...
//! ```
//!
//! Index entry `k` points at datagram `k * index_stride`, so a seek costs one
//! binary search over the index plus a linear scan of at most `index_stride`
//! records. Byte offsets are relative to the start of the datagram stream.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Seek, SeekFrom, Write},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Mutex,
};

use lru::LruCache;
use tracing::debug;

use crate::binio::{read_bytes, read_preamble, read_u32, read_u64, read_u8, write_preamble};
use crate::datagram::{read_record_header, Datagram, RECORD_HEADER_LEN};
use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"UTLN";

/// Fixed header size, magic through `num_index_entries`.
const HEADER_LEN: u64 = 4 + 4 + 4 + 1 + 3 + 4 + 8 + 8 + 4;
const INDEX_ENTRY_LEN: u64 = 16;

/// Default number of datagrams between skip-index entries.
pub const DEFAULT_INDEX_STRIDE: u32 = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Content type
// ─────────────────────────────────────────────────────────────────────────────

/// What the datagram payloads of a timeline hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Little-endian 16-bit PCM; payload length is `2 * duration`.
    Pcm16,
    /// One harmonic+noise analysis frame per datagram.
    Hnm,
}

impl ContentType {
    fn to_byte(self) -> u8 {
        match self {
            ContentType::Pcm16 => 0,
            ContentType::Hnm => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(ContentType::Pcm16),
            1 => Ok(ContentType::Hnm),
            other => Err(Error::corrupt(format!("timeline: unknown content type {other}"))),
        }
    }
}

/// One skip-index entry: where datagram `k * stride` starts, in samples and bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub sample_offset: u64,
    pub byte_offset: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a timeline file.
///
/// The index precedes the data on disk but is only complete once the last
/// datagram is known, so the stream is spooled to an anonymous temp file and
/// copied behind the header in [`finish`](Self::finish).
pub struct TimelineWriter {
    path: PathBuf,
    sample_rate: u32,
    content_type: ContentType,
    stride: u32,
    spool: BufWriter<File>,
    index: Vec<IndexEntry>,
    num_datagrams: u64,
    total_samples: u64,
    byte_pos: u64,
}

impl TimelineWriter {
    pub fn create(
        path: &Path,
        sample_rate: u32,
        content_type: ContentType,
        index_stride: u32,
    ) -> Result<Self> {
        if sample_rate == 0 || index_stride == 0 {
            return Err(Error::InvalidState(format!(
                "timeline needs a positive sample rate and index stride (got {sample_rate}, {index_stride})"
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            sample_rate,
            content_type,
            stride: index_stride,
            spool: BufWriter::new(tempfile::tempfile()?),
            index: Vec::new(),
            num_datagrams: 0,
            total_samples: 0,
            byte_pos: 0,
        })
    }

    /// Append one datagram at the current end of the timeline.
    pub fn append(&mut self, datagram: &Datagram) -> Result<()> {
        if self.content_type == ContentType::Pcm16
            && datagram.payload().len() != datagram.duration() as usize * 2
        {
            return Err(Error::InvalidState(format!(
                "PCM16 timeline: datagram of {} samples carries {} bytes",
                datagram.duration(),
                datagram.payload().len()
            )));
        }
        if self.num_datagrams % self.stride as u64 == 0 {
            self.index.push(IndexEntry {
                sample_offset: self.total_samples,
                byte_offset: self.byte_pos,
            });
        }
        datagram.write_to(&mut self.spool)?;
        self.byte_pos += datagram.record_len();
        self.total_samples += datagram.duration() as u64;
        self.num_datagrams += 1;
        Ok(())
    }

    /// Samples appended so far; this is the offset the next datagram starts at.
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Write header, index and datagram stream to the destination path.
    /// Returns the total number of samples.
    pub fn finish(mut self) -> Result<u64> {
        if self.index.is_empty() {
            self.index.push(IndexEntry { sample_offset: 0, byte_offset: 0 });
        }
        let mut spool = self.spool.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        spool.seek(SeekFrom::Start(0))?;

        let mut out = BufWriter::new(File::create(&self.path)?);
        write_preamble(&mut out, MAGIC)?;
        out.write_all(&self.sample_rate.to_le_bytes())?;
        out.write_all(&[self.content_type.to_byte(), 0, 0, 0])?;
        out.write_all(&self.stride.to_le_bytes())?;
        out.write_all(&self.num_datagrams.to_le_bytes())?;
        out.write_all(&self.total_samples.to_le_bytes())?;
        out.write_all(&(self.index.len() as u32).to_le_bytes())?;
        for e in &self.index {
            out.write_all(&e.sample_offset.to_le_bytes())?;
            out.write_all(&e.byte_offset.to_le_bytes())?;
        }
        io::copy(&mut spool, &mut out)?;
        out.flush()?;

        debug!(
            path = %self.path.display(),
            datagrams = self.num_datagrams,
            samples = self.total_samples,
            index_entries = self.index.len(),
            "timeline written"
        );
        Ok(self.total_samples)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader
// ─────────────────────────────────────────────────────────────────────────────

/// Read-side tuning.
#[derive(Debug, Clone, Default)]
pub struct TimelineOptions {
    /// Number of recently read datagrams kept in memory (0 disables the cache).
    pub cache_capacity: usize,
}

/// Read-only view of a timeline file.
///
/// One file handle is shared behind a mutex, so a reader can be used from
/// several synthesis sessions at once.
pub struct TimelineReader {
    path: PathBuf,
    sample_rate: u32,
    content_type: ContentType,
    stride: u32,
    num_datagrams: u64,
    total_samples: u64,
    index: Vec<IndexEntry>,
    data_start: u64,
    data_len: u64,
    file: Mutex<BufReader<File>>,
    cache: Option<Mutex<LruCache<u64, Datagram>>>,
}

impl std::fmt::Debug for TimelineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineReader")
            .field("path", &self.path)
            .field("sample_rate", &self.sample_rate)
            .field("content_type", &self.content_type)
            .field("num_datagrams", &self.num_datagrams)
            .field("total_samples", &self.total_samples)
            .finish()
    }
}

impl TimelineReader {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &TimelineOptions::default())
    }

    /// Parse and validate the header and skip-index.
    pub fn open_with(path: &Path, options: &TimelineOptions) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut r = BufReader::new(file);

        read_preamble(&mut r, MAGIC, "timeline header")?;
        let sample_rate = read_u32(&mut r, "timeline header")?;
        let content_type = ContentType::from_byte(read_u8(&mut r, "timeline header")?)?;
        read_bytes(&mut r, 3, "timeline header")?;
        let stride = read_u32(&mut r, "timeline header")?;
        let num_datagrams = read_u64(&mut r, "timeline header")?;
        let total_samples = read_u64(&mut r, "timeline header")?;
        let num_entries = read_u32(&mut r, "timeline header")? as u64;

        if sample_rate == 0 || stride == 0 {
            return Err(Error::corrupt("timeline: zero sample rate or index stride"));
        }
        let expected_entries = num_datagrams.div_ceil(stride as u64).max(1);
        if num_entries != expected_entries {
            return Err(Error::corrupt(format!(
                "timeline: {num_entries} index entries for {num_datagrams} datagrams at stride {stride}"
            )));
        }
        let data_start = HEADER_LEN + num_entries * INDEX_ENTRY_LEN;
        if data_start > file_len {
            return Err(Error::corrupt("timeline: skip-index runs past end of file"));
        }
        let data_len = file_len - data_start;

        let mut index = Vec::with_capacity(num_entries as usize);
        for _ in 0..num_entries {
            let sample_offset = read_u64(&mut r, "timeline index")?;
            let byte_offset = read_u64(&mut r, "timeline index")?;
            index.push(IndexEntry { sample_offset, byte_offset });
        }
        validate_index(&index, total_samples, data_len)?;

        debug!(
            path = %path.display(),
            sample_rate,
            ?content_type,
            datagrams = num_datagrams,
            samples = total_samples,
            stride,
            "timeline opened"
        );

        let cache = NonZeroUsize::new(options.cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)));

        Ok(Self {
            path: path.to_path_buf(),
            sample_rate,
            content_type,
            stride,
            num_datagrams,
            total_samples,
            index,
            data_start,
            data_len,
            file: Mutex::new(r),
            cache,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn index_stride(&self) -> u32 {
        self.stride
    }

    pub fn num_datagrams(&self) -> u64 {
        self.num_datagrams
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Return every datagram whose span overlaps
    /// `[start, start + duration)`, in timeline order.
    ///
    /// Payloads are returned whole: the first datagram may begin before
    /// `start` and the last may end after the window.
    pub fn read_datagrams(&self, start: u64, duration: u64) -> Result<Vec<Datagram>> {
        Ok(self.read_span(start, duration)?.1)
    }

    /// Like [`read_datagrams`](Self::read_datagrams), also returning the
    /// sample offset at which the first returned datagram begins.
    pub fn read_span(&self, start: u64, duration: u64) -> Result<(u64, Vec<Datagram>)> {
        let end = start.checked_add(duration).unwrap_or(u64::MAX);
        if duration == 0 || end > self.total_samples {
            return Err(Error::OutOfRange(format!(
                "window [{start}, {end}) outside timeline of {} samples",
                self.total_samples
            )));
        }

        // index[0] is (0, 0), so the partition point is at least 1.
        let entry = self.index[self.index.partition_point(|e| e.sample_offset <= start) - 1];
        let mut t = entry.sample_offset;
        let mut off = entry.byte_offset;

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let mut positioned_at: Option<u64> = None;
        let mut first_start = None;
        let mut out = Vec::new();

        while t < end {
            if off >= self.data_len {
                return Err(Error::corrupt(format!(
                    "timeline: datagram stream ends at sample {t}, header declares {}",
                    self.total_samples
                )));
            }

            if let Some(hit) = self.cached(off) {
                let dur = hit.duration() as u64;
                off += hit.record_len();
                if t + dur > start {
                    first_start.get_or_insert(t);
                    out.push(hit);
                }
                t += dur;
                continue;
            }

            if positioned_at != Some(off) {
                file.seek(SeekFrom::Start(self.data_start + off))?;
            }
            let (dur, len) = read_record_header(&mut *file)?;
            let record_off = off;
            off += RECORD_HEADER_LEN + len as u64;
            if off > self.data_len {
                return Err(Error::corrupt("timeline: datagram record runs past end of file"));
            }

            if t + dur as u64 > start {
                let payload = read_bytes(&mut *file, len as usize, "datagram payload")?;
                let datagram = Datagram::new(dur, payload)?;
                self.remember(record_off, &datagram);
                first_start.get_or_insert(t);
                out.push(datagram);
            } else {
                file.seek_relative(len as i64)?;
            }
            positioned_at = Some(off);
            t += dur as u64;
        }
        Ok((first_start.unwrap_or(start), out))
    }

    /// Sample offset of every datagram start, followed by `total_samples`.
    ///
    /// Walks the record headers only; payloads are skipped.
    pub fn datagram_boundaries(&self) -> Result<Vec<u64>> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(self.data_start))?;

        let mut bounds = Vec::with_capacity((self.num_datagrams as usize).min(1 << 20) + 1);
        let (mut t, mut off) = (0u64, 0u64);
        for _ in 0..self.num_datagrams {
            bounds.push(t);
            let (dur, len) = read_record_header(&mut *file)?;
            off += RECORD_HEADER_LEN + len as u64;
            if off > self.data_len {
                return Err(Error::corrupt("timeline: datagram record runs past end of file"));
            }
            file.seek_relative(len as i64)?;
            t += dur as u64;
        }
        if t != self.total_samples {
            return Err(Error::corrupt(format!(
                "timeline: datagrams sum to {t} samples, header declares {}",
                self.total_samples
            )));
        }
        bounds.push(t);
        Ok(bounds)
    }

    /// Read the whole timeline, in order.
    pub fn read_all(&self) -> Result<Vec<Datagram>> {
        if self.total_samples == 0 {
            return Ok(Vec::new());
        }
        self.read_datagrams(0, self.total_samples)
    }

    fn cached(&self, byte_offset: u64) -> Option<Datagram> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(&byte_offset).cloned()
    }

    fn remember(&self, byte_offset: u64, datagram: &Datagram) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.put(byte_offset, datagram.clone());
        }
    }
}

fn validate_index(index: &[IndexEntry], total_samples: u64, data_len: u64) -> Result<()> {
    match index.first() {
        Some(IndexEntry { sample_offset: 0, byte_offset: 0 }) => {}
        _ => return Err(Error::corrupt("timeline: skip-index must start at (0, 0)")),
    }
    for pair in index.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b.sample_offset <= a.sample_offset || b.byte_offset <= a.byte_offset {
            return Err(Error::corrupt("timeline: skip-index offsets are not increasing"));
        }
    }
    if let Some(last) = index.last() {
        if index.len() > 1 && (last.sample_offset >= total_samples || last.byte_offset >= data_len) {
            return Err(Error::corrupt("timeline: skip-index points past the datagram stream"));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Datagrams of varying length (1..=5 samples) with distinct sample values.
    fn sample_datagrams(n: usize) -> Vec<Datagram> {
        (0..n)
            .map(|i| {
                let len = 1 + i % 5;
                let samples: Vec<i16> = (0..len).map(|k| (i * 10 + k) as i16).collect();
                Datagram::from_pcm16(&samples).unwrap()
            })
            .collect()
    }

    fn write_timeline(path: &Path, datagrams: &[Datagram], stride: u32) -> u64 {
        let mut w = TimelineWriter::create(path, 16_000, ContentType::Pcm16, stride).unwrap();
        for d in datagrams {
            w.append(d).unwrap();
        }
        w.finish().unwrap()
    }

    #[test]
    fn test_roundtrip_full_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let datagrams = sample_datagrams(37);
        let total = write_timeline(&path, &datagrams, 4);

        let tl = TimelineReader::open(&path).unwrap();
        assert_eq!(tl.total_samples(), total);
        assert_eq!(tl.num_datagrams(), 37);
        assert_eq!(tl.sample_rate(), 16_000);
        assert_eq!(tl.content_type(), ContentType::Pcm16);
        assert_eq!(tl.read_all().unwrap(), datagrams);
    }

    #[test]
    fn test_seek_independent_of_stride() {
        let dir = tempfile::tempdir().unwrap();
        let datagrams = sample_datagrams(23);

        // Expected owner of every sample, by brute force.
        let mut owner = Vec::new();
        for (i, d) in datagrams.iter().enumerate() {
            owner.extend(std::iter::repeat(i).take(d.duration() as usize));
        }

        for stride in [1u32, 2, 3, 7, 100] {
            let path = dir.path().join(format!("t{stride}.bin"));
            write_timeline(&path, &datagrams, stride);
            let tl = TimelineReader::open(&path).unwrap();
            for (t, &i) in owner.iter().enumerate() {
                let got = tl.read_datagrams(t as u64, 1).unwrap();
                assert_eq!(got, vec![datagrams[i].clone()], "stride {stride}, sample {t}");
            }
        }
    }

    #[test]
    fn test_window_spanning_several_datagrams() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let datagrams = sample_datagrams(10); // durations 1,2,3,4,5,1,2,3,4,5
        write_timeline(&path, &datagrams, 3);
        let tl = TimelineReader::open(&path).unwrap();

        // Samples 2..9 touch datagrams 1 (1..3), 2 (3..6) and 3 (6..10).
        let got = tl.read_datagrams(2, 7).unwrap();
        assert_eq!(got, datagrams[1..4].to_vec());
    }

    #[test]
    fn test_window_past_end_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let total = write_timeline(&path, &sample_datagrams(8), 2);
        let tl = TimelineReader::open(&path).unwrap();

        assert!(matches!(tl.read_datagrams(total + 5, 3), Err(Error::OutOfRange(_))));
        assert!(matches!(tl.read_datagrams(total - 1, 2), Err(Error::OutOfRange(_))));
        assert!(matches!(tl.read_datagrams(0, 0), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn test_cache_gives_same_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let datagrams = sample_datagrams(30);
        write_timeline(&path, &datagrams, 5);

        let tl = TimelineReader::open_with(&path, &TimelineOptions { cache_capacity: 4 }).unwrap();
        let first = tl.read_datagrams(10, 20).unwrap();
        let second = tl.read_datagrams(10, 20).unwrap();
        assert_eq!(first, second);
        assert_eq!(tl.read_all().unwrap(), datagrams);
    }

    #[test]
    fn test_empty_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        assert_eq!(write_timeline(&path, &[], 8), 0);
        let tl = TimelineReader::open(&path).unwrap();
        assert!(tl.read_all().unwrap().is_empty());
        assert!(matches!(tl.read_datagrams(0, 1), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        std::fs::write(&path, b"NOPE\x01\x00\x00\x00").unwrap();
        assert!(matches!(TimelineReader::open(&path), Err(Error::CorruptDatabase(_))));
    }

    #[test]
    fn test_truncated_index_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        write_timeline(&path, &sample_datagrams(20), 2);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..HEADER_LEN as usize + 8]).unwrap();
        assert!(matches!(TimelineReader::open(&path), Err(Error::CorruptDatabase(_))));
    }

    #[test]
    fn test_unsupported_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        write_timeline(&path, &sample_datagrams(3), 2);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4] = 9;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(TimelineReader::open(&path), Err(Error::CorruptDatabase(_))));
    }

    #[test]
    fn test_read_span_reports_first_datagram_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let datagrams = sample_datagrams(10); // starts 0,1,3,6,10,15,16,18,21,25
        write_timeline(&path, &datagrams, 3);
        let tl = TimelineReader::open_with(&path, &TimelineOptions { cache_capacity: 4 }).unwrap();

        for _ in 0..2 {
            let (first, got) = tl.read_span(7, 9).unwrap();
            assert_eq!(first, 6);
            assert_eq!(got, datagrams[3..6].to_vec());
        }
    }

    #[test]
    fn test_datagram_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        write_timeline(&path, &sample_datagrams(7), 2);
        let tl = TimelineReader::open(&path).unwrap();
        assert_eq!(tl.datagram_boundaries().unwrap(), vec![0, 1, 3, 6, 10, 15, 16, 18]);
        // The scan leaves the reader usable.
        assert_eq!(tl.read_datagrams(3, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_pcm_payload_size_checked_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = TimelineWriter::create(&dir.path().join("t.bin"), 16_000, ContentType::Pcm16, 4).unwrap();
        let bad = Datagram::new(4, vec![0; 3]).unwrap();
        assert!(matches!(w.append(&bad), Err(Error::InvalidState(_))));
    }
}
