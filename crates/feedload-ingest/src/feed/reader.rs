//! Low-level feed record framing over a live decompression stream.
//!
//! The source file is never fully materialized: an in-process streaming
//! decoder (bzip2 or gzip, picked by extension) is read incrementally
//! through a `BufReader`. The format affords no random access; the only
//! way to reach record N is to replay the stream from the start.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use feedload_common::Result;
use tracing::debug;

/// Size of the archive container framing block discarded after open.
/// Exactly one filesystem block; it is framing overhead, not feed data.
const CONTAINER_BLOCK_SIZE: u64 = 512;

/// Default buffer size for the decompression stream.
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Presents a compressed, archive-wrapped feed file as a sequence of raw
/// record byte-strings, with forward-only positioning by record index.
pub struct FeedReader {
    path: PathBuf,
    stream: BufReader<Box<dyn Read + Send>>,
    record_delim: Vec<u8>,
    comment_char: u8,
    file_size: u64,
    latest_record_num: i64,
}

impl FeedReader {
    /// Open a feed file and position the stream at the first header line,
    /// just past the container framing block.
    ///
    /// # Arguments
    /// * `path` - Path to the feed archive (`.tbz`/`.bz2`, `.tgz`/`.gz`,
    ///   or uncompressed)
    /// * `record_delim` - Record delimiter bytes (may embed a newline)
    /// * `comment_char` - Byte that introduces a comment line
    pub fn open(path: impl AsRef<Path>, record_delim: &[u8], comment_char: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_size = std::fs::metadata(&path)?.len();
        let stream = Self::open_stream(&path)?;

        debug!(path = %path.display(), file_size, "Opened feed stream");

        Ok(Self {
            path,
            stream,
            record_delim: record_delim.to_vec(),
            comment_char,
            file_size,
            latest_record_num: 0,
        })
    }

    /// Compressed size of the source file on disk.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Index of the most recently read data record (1-based; 0 before
    /// the first record). Incremented by [`advance_one_record`] and by
    /// the parser after each decoded row, never by comment lines.
    ///
    /// [`advance_one_record`]: FeedReader::advance_one_record
    pub fn latest_record_num(&self) -> i64 {
        self.latest_record_num
    }

    pub(crate) fn bump_record_count(&mut self) {
        self.latest_record_num += 1;
    }

    fn open_stream(path: &Path) -> Result<BufReader<Box<dyn Read + Send>>> {
        let file = File::open(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        let decoder: Box<dyn Read + Send> = match ext.as_str() {
            "tbz" | "tbz2" | "bz2" => Box::new(bzip2::read::MultiBzDecoder::new(file)),
            "tgz" | "gz" => Box::new(flate2::read::MultiGzDecoder::new(file)),
            _ => Box::new(file),
        };

        let mut stream = BufReader::with_capacity(STREAM_BUFFER_SIZE, decoder);
        // Discard the container framing block unconditionally.
        io::copy(&mut stream.by_ref().take(CONTAINER_BLOCK_SIZE), &mut io::sink())?;
        Ok(stream)
    }

    /// Reset the stream to the position immediately after the container
    /// framing block, discarding all read state.
    pub fn reopen(&mut self) -> Result<()> {
        self.stream = Self::open_stream(&self.path)?;
        self.latest_record_num = 0;
        Ok(())
    }

    fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let n = self.stream.read_until(b'\n', &mut line)?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }

    /// Return the next raw record, or `None` at end of stream.
    ///
    /// A record may span multiple underlying lines; lines are
    /// concatenated until one ends with the record delimiter. End of
    /// stream with no delimiter yields the partial content as-is, and
    /// the NUL zero-fill at the end of the archive terminates the
    /// stream. Comment lines are skipped only when `skip_comments` is
    /// set and the record has not started yet; comment filtering never
    /// applies mid-record. Delimiters are left in place.
    pub fn next_raw_record(&mut self, skip_comments: bool) -> Result<Option<String>> {
        let mut record: Vec<u8> = Vec::new();
        let mut first_line = true;
        loop {
            let Some(line) = self.next_line()? else { break };
            if line[0] == 0 {
                // zero-fill padding at the end of the archive
                break;
            }
            if skip_comments && first_line && line[0] == self.comment_char {
                continue;
            }
            first_line = false;
            let at_boundary = line.ends_with(&self.record_delim);
            record.extend_from_slice(&line);
            if at_boundary {
                break;
            }
        }

        if record.is_empty() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&record).into_owned()))
        }
    }

    /// Scan forward exactly one record without building its content.
    ///
    /// Much cheaper than [`next_raw_record`] for bulk skip-ahead.
    /// Comment lines are always skipped and never counted. Returns
    /// `false` at end of stream (the counter is not incremented).
    ///
    /// The delimiter is matched anywhere in the line rather than as a
    /// suffix; the delimiter can embed a newline, so a line that
    /// contains it is the last line of its record.
    ///
    /// [`next_raw_record`]: FeedReader::next_raw_record
    pub fn advance_one_record(&mut self) -> Result<bool> {
        loop {
            let Some(line) = self.next_line()? else {
                return Ok(false);
            };
            if line.first() == Some(&self.comment_char) {
                continue;
            }
            if contains(&line, &self.record_delim) {
                break;
            }
        }
        self.latest_record_num += 1;
        Ok(true)
    }

    /// Reposition the stream to the start of logical record
    /// `record_num` by replaying from just past the framing block.
    ///
    /// O(n): the format affords nothing faster. `record_num <= 0` is a
    /// no-op ("already at start"). Seeking past the end leaves the
    /// stream at end-of-file.
    pub fn seek_to_record(&mut self, record_num: i64) -> Result<()> {
        if record_num <= 0 {
            return Ok(());
        }
        self.reopen()?;
        for _ in 0..record_num {
            if !self.advance_one_record()? {
                break;
            }
        }
        Ok(())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RECORD_DELIM: &[u8] = b"\x02\n";

    /// Build a raw feed payload: 512-byte container block followed by
    /// the given lines.
    fn feed_bytes(body: &[u8]) -> Vec<u8> {
        let mut data = vec![b'x'; CONTAINER_BLOCK_SIZE as usize];
        data.extend_from_slice(body);
        data
    }

    fn write_plain(body: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(&feed_bytes(body)).unwrap();
        file.flush().unwrap();
        file
    }

    fn open(file: &tempfile::NamedTempFile) -> FeedReader {
        FeedReader::open(file.path(), RECORD_DELIM, b'#').unwrap()
    }

    #[test]
    fn test_skips_container_block() {
        let file = write_plain(b"first\x02\nsecond\x02\n");
        let mut reader = open(&file);
        assert_eq!(
            reader.next_raw_record(true).unwrap().as_deref(),
            Some("first\x02\n")
        );
    }

    #[test]
    fn test_record_spanning_multiple_lines() {
        let file = write_plain(b"part one\npart two\x02\nnext\x02\n");
        let mut reader = open(&file);
        assert_eq!(
            reader.next_raw_record(true).unwrap().as_deref(),
            Some("part one\npart two\x02\n")
        );
        assert_eq!(
            reader.next_raw_record(true).unwrap().as_deref(),
            Some("next\x02\n")
        );
        assert_eq!(reader.next_raw_record(true).unwrap(), None);
    }

    #[test]
    fn test_comment_skipping_only_before_record_starts() {
        let file = write_plain(b"#header\x02\ndata\x02\n");
        let mut reader = open(&file);
        // Comments skipped when requested
        assert_eq!(
            reader.next_raw_record(true).unwrap().as_deref(),
            Some("data\x02\n")
        );

        let mut reader = open(&file);
        // Comments returned when not skipping
        assert_eq!(
            reader.next_raw_record(false).unwrap().as_deref(),
            Some("#header\x02\n")
        );
    }

    #[test]
    fn test_comment_not_filtered_mid_record() {
        // Second physical line starts with '#' but belongs to the first record.
        let file = write_plain(b"start\n#still the same record\x02\n");
        let mut reader = open(&file);
        assert_eq!(
            reader.next_raw_record(true).unwrap().as_deref(),
            Some("start\n#still the same record\x02\n")
        );
    }

    #[test]
    fn test_zero_fill_terminates_stream() {
        let mut body = b"data\x02\n".to_vec();
        body.extend_from_slice(&[0u8; 1024]);
        let file = write_plain(&body);
        let mut reader = open(&file);
        assert!(reader.next_raw_record(true).unwrap().is_some());
        assert_eq!(reader.next_raw_record(true).unwrap(), None);
    }

    #[test]
    fn test_truncated_final_record_returned_as_is() {
        let file = write_plain(b"complete\x02\ntruncated without delim");
        let mut reader = open(&file);
        assert!(reader.next_raw_record(true).unwrap().is_some());
        assert_eq!(
            reader.next_raw_record(true).unwrap().as_deref(),
            Some("truncated without delim")
        );
    }

    #[test]
    fn test_advance_counts_only_record_boundaries() {
        let file = write_plain(b"#comment\x02\na\x02\nb\x02\nc\x02\n");
        let mut reader = open(&file);
        assert!(reader.advance_one_record().unwrap());
        assert!(reader.advance_one_record().unwrap());
        assert_eq!(reader.latest_record_num(), 2);
        assert_eq!(reader.next_raw_record(true).unwrap().as_deref(), Some("c\x02\n"));
        // EOF: advance returns false without incrementing
        assert!(!reader.advance_one_record().unwrap());
        assert_eq!(reader.latest_record_num(), 2);
    }

    #[test]
    fn test_seek_to_record() {
        let file = write_plain(b"#names\x02\na\x02\nb\x02\nc\x02\n");
        let mut reader = open(&file);
        // consume everything, then seek back to record 2
        while reader.next_raw_record(true).unwrap().is_some() {}
        reader.seek_to_record(2).unwrap();
        assert_eq!(reader.latest_record_num(), 2);
        assert_eq!(reader.next_raw_record(true).unwrap().as_deref(), Some("c\x02\n"));
    }

    #[test]
    fn test_seek_to_zero_is_noop() {
        let file = write_plain(b"a\x02\nb\x02\n");
        let mut reader = open(&file);
        reader.next_raw_record(true).unwrap();
        reader.seek_to_record(0).unwrap();
        // position unchanged: next record is b
        assert_eq!(reader.next_raw_record(true).unwrap().as_deref(), Some("b\x02\n"));
    }

    #[test]
    fn test_bzip2_stream() {
        use bzip2::write::BzEncoder;
        use bzip2::Compression;

        let mut file = tempfile::Builder::new().suffix(".tbz").tempfile().unwrap();
        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&feed_bytes(b"hello\x02\nworld\x02\n")).unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();
        file.flush().unwrap();

        let mut reader = FeedReader::open(file.path(), RECORD_DELIM, b'#').unwrap();
        assert_eq!(reader.next_raw_record(true).unwrap().as_deref(), Some("hello\x02\n"));
        assert_eq!(reader.next_raw_record(true).unwrap().as_deref(), Some("world\x02\n"));
        assert_eq!(reader.next_raw_record(true).unwrap(), None);
    }

    #[test]
    fn test_gzip_stream() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut file = tempfile::Builder::new().suffix(".tgz").tempfile().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&feed_bytes(b"hello\x02\n")).unwrap();
        file.write_all(&encoder.finish().unwrap()).unwrap();
        file.flush().unwrap();

        let mut reader = FeedReader::open(file.path(), RECORD_DELIM, b'#').unwrap();
        assert_eq!(reader.next_raw_record(true).unwrap().as_deref(), Some("hello\x02\n"));
    }
}
