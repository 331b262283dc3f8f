//! Random-access reads out of a scar container.
//!
//! Nothing about a scar container announces itself at the front — the
//! file starts with ordinary compressed tar data. Discovery works from
//! the back: [`find_tail`] scans the last bytes for a codec magic,
//! trial-decompresses until it finds the tail marker, and comes back
//! with the offsets of the index and chunk-map streams. From there
//! [`read_index`] and [`read_chunks`] load the member list and the
//! stream boundaries, and [`cat`] extracts members by decompressing only
//! from the nearest preceding boundary.

use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};

use log::debug;
use thiserror::Error;

use crate::compression::Codec;
use crate::header::{round_block, truncate_null, Block, EntryType, Header, BLOCK_SIZE};
use crate::pax::{self, PaxError, PaxMap};
use crate::util::{parse_decimal, read_full, skip_exact};
use crate::{SeekPoint, CHUNKS_MAGIC, INDEX_MAGIC, OFFSET_KEY, TAIL_MAGIC};

/// How many trailing bytes of the container the tail search inspects.
const TAIL_WINDOW: usize = 512;

/// Longest accepted length prefix of an index entry.
const MAX_ENTRY_DIGITS: u32 = 32;

/// Errors from reading a container.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("pax error: {0}")]
    Pax(#[from] PaxError),

    /// No codec magic in the trailing window decompressed to a tail
    /// marker; this is not a scar container (or its tail is damaged).
    #[error("no scar tail found at the end of the archive")]
    TailNotFound,

    /// The index stream did not start with its magic line.
    #[error("invalid index stream magic")]
    IndexMagicMismatch,

    /// The chunk-map stream did not start with its magic line.
    #[error("invalid chunk map stream magic")]
    ChunksMagicMismatch,

    /// A framed index entry is unreadable.
    #[error("malformed index entry")]
    BadIndexEntry,

    /// A chunk-map line is not a pair of decimal offsets.
    #[error("malformed chunk map line: {0:?}")]
    BadChunkLine(String),

    /// The requested member is not in the index.
    #[error("{0}: not found in archive")]
    NotFound(String),

    /// A pax `size` attribute that should be a decimal number is not.
    #[error("pax size attribute is not a decimal number: {0:?}")]
    BadSizeAttribute(Vec<u8>),

    /// Decoding toward a member ran into an entry the format does not
    /// allow at that position.
    #[error("unexpected tar entry type {0:?}")]
    UnexpectedEntryType(char),
}

/// The discovered footer: where the index and chunk-map streams start,
/// and which codec the container uses.
#[derive(Clone, Copy, Debug)]
pub struct Tail {
    pub index_offset: u64,
    pub chunks_offset: u64,
    pub codec: Codec,
}

/// One member of the archive index.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    /// The attributes recorded for the member: at least `path` and
    /// `scar:offset`, plus whatever global pax attributes were in
    /// effect at the entry.
    pub pax: PaxMap,
}

impl IndexEntry {
    /// The member's path.
    #[must_use]
    pub fn path(&self) -> &[u8] {
        self.pax
            .get(b"path".as_slice())
            .map(|v| v.as_slice())
            .unwrap_or(b"")
    }

    /// The uncompressed offset at which the member's metadata run
    /// starts.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        self.pax.get(OFFSET_KEY).and_then(|v| parse_decimal(v))
    }
}

/// Locate the container's tail.
///
/// Reads the trailing window of the file and tries codec magics from the
/// rear: the candidate whose magic occurs last is trial-decompressed,
/// and accepted if it yields the tail marker followed by two decimal
/// offsets. A rejected candidate shortens the window to just before its
/// magic, so the scan moves backward until it runs out of candidates.
pub fn find_tail(r: &mut (impl Read + Seek)) -> Result<Tail, ReadError> {
    let end = r.seek(SeekFrom::End(0))?;
    r.seek(SeekFrom::Start(end.saturating_sub(TAIL_WINDOW as u64)))?;

    let mut window = [0u8; TAIL_WINDOW];
    let mut live = 0;
    loop {
        let n = r.read(&mut window[live..])?;
        if n == 0 {
            break;
        }
        live += n;
    }

    loop {
        let mut best: Option<(usize, Codec)> = None;
        for codec in Codec::ALL {
            if let Some(idx) = find_last(&window[..live], codec.magic()) {
                if best.map_or(true, |(b, _)| idx > b) {
                    best = Some((idx, codec));
                }
            }
        }

        let Some((idx, codec)) = best else {
            return Err(ReadError::TailNotFound);
        };

        match parse_tail(&window[idx..live], codec) {
            Some(tail) => return Ok(tail),
            None => {
                debug!(
                    "rejected {} tail candidate {} bytes before end",
                    codec.name(),
                    live - idx
                );
                live = idx + codec.magic().len() - 1;
            }
        }
    }
}

/// Trial-decompress a tail candidate and parse the marker and offsets.
fn parse_tail(candidate: &[u8], codec: Codec) -> Option<Tail> {
    let mut decoder = codec.new_decoder(Box::new(candidate)).ok()?;

    // The decompressed tail is tiny; read at most one block of it.
    let mut buf = [0u8; 512];
    let mut len = 0;
    while len < buf.len() {
        match decoder.read(&mut buf[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(_) => return None,
        }
    }

    let body = buf[..len].strip_prefix(TAIL_MAGIC)?;
    let mut lines = body.split(|&b| b == b'\n');
    let index_offset = parse_decimal(lines.next()?)?;
    let chunks_offset = parse_decimal(lines.next()?)?;

    Some(Tail {
        index_offset,
        chunks_offset,
        codec,
    })
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Load the member index.
pub fn read_index(r: &mut (impl Read + Seek), tail: &Tail) -> Result<Vec<IndexEntry>, ReadError> {
    r.seek(SeekFrom::Start(tail.index_offset))?;
    let mut decoder = BufReader::new(tail.codec.new_decoder(Box::new(r.by_ref()))?);

    let mut magic = [0u8; INDEX_MAGIC.len()];
    if !read_full(&mut decoder, &mut magic)? || &magic[..] != INDEX_MAGIC {
        return Err(ReadError::IndexMagicMismatch);
    }

    let mut entries = Vec::new();
    loop {
        // Entries start with a decimal length. The decoder reads right
        // across the stream boundary into the chunk map, whose magic
        // line starts with 'S'; that, or end of input, is the end of
        // the index.
        let at_end = {
            let buf = decoder.fill_buf()?;
            buf.is_empty() || !buf[0].is_ascii_digit()
        };
        if at_end {
            return Ok(entries);
        }

        let (length, digits) = read_length_prefix(&mut decoder)?;
        let body_len = length
            .checked_sub(digits as u64 + 1)
            .ok_or(ReadError::BadIndexEntry)?;

        let mut body = vec![0; body_len as usize];
        if !read_full(&mut decoder, &mut body)? {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        entries.push(IndexEntry {
            pax: pax::parse(&body)?,
        });
    }
}

/// Read a space-terminated decimal length prefix, returning the value
/// and how many digits spelled it.
fn read_length_prefix(r: &mut impl BufRead) -> Result<(u64, u32), ReadError> {
    let mut value: u64 = 0;
    let mut digits: u32 = 0;

    loop {
        let mut byte = [0u8; 1];
        if !read_full(r, &mut byte)? {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        match byte[0] {
            b' ' if digits > 0 => return Ok((value, digits)),
            b'0'..=b'9' if digits < MAX_ENTRY_DIGITS => {
                digits += 1;
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(u64::from(byte[0] - b'0')))
                    .ok_or(ReadError::BadIndexEntry)?;
            }
            _ => return Err(ReadError::BadIndexEntry),
        }
    }
}

/// Load the chunk map.
pub fn read_chunks(r: &mut (impl Read + Seek), tail: &Tail) -> Result<Vec<SeekPoint>, ReadError> {
    r.seek(SeekFrom::Start(tail.chunks_offset))?;
    let mut decoder = BufReader::new(tail.codec.new_decoder(Box::new(r.by_ref()))?);

    let mut line = Vec::new();
    decoder.read_until(b'\n', &mut line)?;
    if line != CHUNKS_MAGIC {
        return Err(ReadError::ChunksMagicMismatch);
    }

    let mut chunks = Vec::new();
    loop {
        line.clear();
        decoder.read_until(b'\n', &mut line)?;
        // The decoder runs on into the tail stream; its magic line (or
        // end of input) terminates the list.
        if line.is_empty() || line == TAIL_MAGIC {
            return Ok(chunks);
        }

        let text = line.strip_suffix(b"\n").unwrap_or(&line);
        let mut fields = text.split(|&b| b == b' ');
        let compressed = fields.next().and_then(parse_decimal);
        let raw = fields.next().and_then(parse_decimal);
        match (compressed, raw, fields.next()) {
            (Some(compressed), Some(raw), None) => chunks.push(SeekPoint { raw, compressed }),
            _ => {
                return Err(ReadError::BadChunkLine(
                    String::from_utf8_lossy(text).into_owned(),
                ))
            }
        }
    }
}

/// Write each index entry's path, one per line.
///
/// Only the footer streams are decompressed; tar data is never touched.
pub fn list(r: &mut (impl Read + Seek), out: &mut impl Write) -> Result<(), ReadError> {
    let tail = find_tail(r)?;
    for entry in read_index(r, &tail)? {
        out.write_all(entry.path())?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Extract the named members, concatenated in argument order.
pub fn cat(
    r: &mut (impl Read + Seek),
    out: &mut impl Write,
    paths: &[String],
) -> Result<(), ReadError> {
    let tail = find_tail(r)?;
    let index = read_index(r, &tail)?;
    let chunks = read_chunks(r, &tail)?;

    for path in paths {
        let entry = index
            .iter()
            .find(|e| e.path() == path.as_bytes())
            .ok_or_else(|| ReadError::NotFound(path.clone()))?;
        cat_member(r, out, &chunks, entry, tail.codec)?;
    }
    Ok(())
}

/// Stream one member's payload to `out`.
///
/// Decompression starts at the last stream boundary before the member's
/// metadata run and discards the gap. From there only tar headers can
/// legally appear: pax and GNU long-name headers are accumulated exactly
/// as during writing, and the first member entry is the target.
fn cat_member(
    r: &mut (impl Read + Seek),
    out: &mut impl Write,
    chunks: &[SeekPoint],
    entry: &IndexEntry,
    codec: Codec,
) -> Result<(), ReadError> {
    let target = entry.offset().ok_or(ReadError::BadIndexEntry)?;
    let chunk = chunks
        .iter()
        .rev()
        .find(|c| c.raw < target)
        .copied()
        .unwrap_or(SeekPoint {
            raw: 0,
            compressed: 0,
        });
    debug!(
        "member at raw offset {}: starting from stream boundary at compressed offset {}",
        target, chunk.compressed
    );

    r.seek(SeekFrom::Start(chunk.compressed))?;
    let mut decoder = codec.new_decoder(Box::new(r.by_ref()))?;
    skip_exact(&mut decoder, target - chunk.raw)?;

    let mut next = PaxMap::new();
    let mut global = entry.pax.clone();
    let mut block: Block = [0; BLOCK_SIZE];

    loop {
        if !read_full(&mut decoder, &mut block)? {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        let header = Header::from_block(&block);
        let size = match pax::effective(&next, &global, b"size") {
            Some(v) => parse_decimal(v).ok_or_else(|| ReadError::BadSizeAttribute(v.to_vec()))?,
            None => header.size(),
        };

        let entry_type = header.entry_type();
        if entry_type.is_member() {
            let copied = io::copy(&mut (&mut decoder).take(size), out)?;
            if copied != size {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            return Ok(());
        }

        match entry_type {
            EntryType::XGlobalHeader => {
                let payload = read_padded(&mut decoder, size)?;
                for (key, value) in pax::parse(&payload[..size as usize])? {
                    global.insert(key, value);
                }
            }

            EntryType::XHeader => {
                let payload = read_padded(&mut decoder, size)?;
                for (key, value) in pax::parse(&payload[..size as usize])? {
                    next.insert(key, value);
                }
            }

            EntryType::GnuLongName => {
                let payload = read_padded(&mut decoder, size)?;
                let path = truncate_null(&payload[..size as usize]);
                next.insert(b"path".to_vec(), path.to_vec());
            }

            EntryType::GnuLongLink => {
                let payload = read_padded(&mut decoder, size)?;
                let target = truncate_null(&payload[..size as usize]);
                next.insert(b"linkpath".to_vec(), target.to_vec());
            }

            EntryType::Other(b) => {
                return Err(ReadError::UnexpectedEntryType(b as char));
            }

            _ => unreachable!("member entry types are handled above"),
        }
    }
}

fn read_padded(decoder: &mut impl Read, size: u64) -> Result<Vec<u8>, ReadError> {
    let mut payload = vec![0; round_block(size) as usize];
    if !read_full(decoder, &mut payload)? {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_last() {
        assert_eq!(find_last(b"abcabc", b"abc"), Some(3));
        assert_eq!(find_last(b"abcabc", b"bc"), Some(4));
        assert_eq!(find_last(b"abc", b"abcd"), None);
        assert_eq!(find_last(b"", b"x"), None);
        assert_eq!(find_last(b"xxx", b"y"), None);
    }

    #[test]
    fn test_read_length_prefix() {
        let mut r = BufReader::new(b"123 rest" as &[u8]);
        assert_eq!(read_length_prefix(&mut r).unwrap(), (123, 3));

        // missing digits
        let mut r = BufReader::new(b" x" as &[u8]);
        assert!(read_length_prefix(&mut r).is_err());

        // a length longer than any sane entry
        let mut r = BufReader::new(b"111111111111111111111111111111111 " as &[u8]);
        assert!(read_length_prefix(&mut r).is_err());
    }

    #[test]
    fn test_parse_tail_rejects_garbage() {
        // valid gzip data that does not contain the tail marker
        let buf = SharedBuf::default();
        let mut enc = Codec::Gzip.new_encoder(Box::new(buf.clone())).unwrap();
        enc.write_all(b"not a tail").unwrap();
        enc.finish().unwrap();
        assert!(parse_tail(&buf.0.borrow(), Codec::Gzip).is_none());

        // not compressed data at all
        assert!(parse_tail(b"\x1f\x8bgarbage", Codec::Gzip).is_none());
    }

    #[test]
    fn test_parse_tail_accepts_valid() {
        let buf = SharedBuf::default();
        let mut enc = Codec::Gzip.new_encoder(Box::new(buf.clone())).unwrap();
        enc.write_all(b"SCAR-TAIL\n12345\n67890\n").unwrap();
        enc.finish().unwrap();

        let tail = parse_tail(&buf.0.borrow(), Codec::Gzip).unwrap();
        assert_eq!(tail.index_offset, 12345);
        assert_eq!(tail.chunks_offset, 67890);
    }

    #[derive(Clone, Default)]
    struct SharedBuf(std::rc::Rc<std::cell::RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
