//! The tar-to-scar transducer.
//!
//! [`create`] consumes a plain tar stream and re-emits it, byte for
//! byte, through a compressor that gets finalized and restarted whenever
//! enough compressed output has accumulated since the last restart. The
//! result is a container of independently-decodable compressed streams
//! whose boundaries always fall between two tar entries. While the tar
//! bytes pass through, an index record is collected per member; the
//! index, the table of stream boundaries, and a small tail marker are
//! appended as three more compressed streams once the tar data ends.

use std::cell::Cell;
use std::io::{self, Read, Write};
use std::rc::Rc;

use log::debug;
use thiserror::Error;

use crate::compression::{Codec, Encoder};
use crate::header::{round_block, truncate_null, Block, EntryType, Header, BLOCK_SIZE};
use crate::pax::{self, PaxError, PaxMap};
use crate::util::{parse_decimal, read_full, CountingWriter};
use crate::{SeekPoint, CHUNKS_MAGIC, INDEX_MAGIC, OFFSET_KEY, TAIL_MAGIC};

/// Default flush threshold: compressed bytes between seek points.
pub const DEFAULT_BLOCKSIZE: u64 = 4 * 1024 * 1024;

/// Errors from archive creation.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("pax error: {0}")]
    Pax(#[from] PaxError),

    /// The tar stream ended where a header block was expected.
    #[error("tar stream ended before the end-of-archive marker")]
    UnexpectedEof,

    /// Only one of the two all-zero end-of-archive blocks was present.
    #[error("tar stream ends with a partial end-of-archive marker")]
    PartialEndMarker,

    /// A pax `size` attribute that should be a decimal number is not.
    #[error("pax size attribute is not a decimal number: {0:?}")]
    BadSizeAttribute(Vec<u8>),
}

/// A compressing writer that can be flushed into independent streams.
///
/// Every [`flush_stream`] finalizes the current compressed stream,
/// records the boundary as a [`SeekPoint`], and starts a fresh stream at
/// the same position in the underlying output. The compressed counter
/// wraps the raw sink, not the encoder input, so recorded offsets are
/// exact stream boundaries in the output file.
///
/// [`flush_stream`]: ChunkedWriter::flush_stream
pub struct ChunkedWriter {
    // None only transiently while an encoder is being finished
    encoder: Option<Box<dyn Encoder>>,
    codec: Codec,
    raw_written: u64,
    compressed: Rc<Cell<u64>>,
    seek_points: Vec<SeekPoint>,
}

impl ChunkedWriter {
    pub fn new(out: impl Write + 'static, codec: Codec) -> io::Result<Self> {
        let counting = CountingWriter::new(out);
        let compressed = counting.counter();
        let encoder = codec.new_encoder(Box::new(counting))?;
        Ok(Self {
            encoder: Some(encoder),
            codec,
            raw_written: 0,
            compressed,
            seek_points: Vec::new(),
        })
    }

    /// Compressed bytes emitted to the output so far.
    pub fn compressed_written(&self) -> u64 {
        self.compressed.get()
    }

    /// Stream boundaries recorded so far.
    pub fn seek_points(&self) -> &[SeekPoint] {
        &self.seek_points
    }

    /// Finalize the current compressed stream, record the boundary, and
    /// start a new independent stream at the same output position.
    pub fn flush_stream(&mut self) -> io::Result<SeekPoint> {
        let encoder = self.encoder.take().expect("encoder present between calls");
        let sink = encoder.finish()?;

        let point = SeekPoint {
            raw: self.raw_written,
            compressed: self.compressed.get(),
        };
        debug!(
            "stream boundary at raw {} / compressed {}",
            point.raw, point.compressed
        );
        self.seek_points.push(point);

        self.encoder = Some(self.codec.new_encoder(sink)?);
        Ok(point)
    }

    /// Finalize the last stream without recording a boundary.
    pub fn finish(mut self) -> io::Result<Vec<SeekPoint>> {
        let encoder = self.encoder.take().expect("encoder present between calls");
        encoder.finish()?;
        Ok(self.seek_points)
    }
}

impl Write for ChunkedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let encoder = self.encoder.as_mut().expect("encoder present between calls");
        let n = encoder.write(buf)?;
        self.raw_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let encoder = self.encoder.as_mut().expect("encoder present between calls");
        encoder.flush()
    }
}

/// Turn a tar stream into a scar container.
///
/// Reads tar from `src` until its two-zero-block end marker, writes the
/// container to `out` compressed with `codec`, restarting the compressed
/// stream whenever more than `flush_threshold` compressed bytes have
/// accumulated since the last restart.
pub fn create(
    mut src: impl Read,
    out: impl Write + 'static,
    codec: Codec,
    flush_threshold: u64,
) -> Result<(), WriteError> {
    let mut w = ChunkedWriter::new(out, codec)?;
    let mut index = INDEX_MAGIC.to_vec();

    reemit_indexed_tar(&mut src, &mut w, &mut index, flush_threshold)?;

    // The index, chunk table, and tail each get a stream of their own.
    // The boundaries before the index and chunk streams are recorded
    // like any other, which is why the chunk table below excludes the
    // final two seek points: they locate the footer, not tar data.
    let index_start = w.flush_stream()?.compressed;
    w.write_all(&index)?;

    let chunks_start = w.flush_stream()?.compressed;
    w.write_all(CHUNKS_MAGIC)?;
    let body_points = w.seek_points()[..w.seek_points().len() - 2].to_vec();
    for point in body_points {
        writeln!(w, "{} {}", point.compressed, point.raw)?;
    }

    w.flush_stream()?;
    w.write_all(TAIL_MAGIC)?;
    writeln!(w, "{index_start}")?;
    writeln!(w, "{chunks_start}")?;

    w.finish()?;
    Ok(())
}

/// Pass a tar stream through `w` entry by entry, collecting one framed
/// index record per member into `index`.
fn reemit_indexed_tar(
    src: &mut impl Read,
    w: &mut ChunkedWriter,
    index: &mut Vec<u8>,
    flush_threshold: u64,
) -> Result<(), WriteError> {
    let mut block: Block = [0; BLOCK_SIZE];
    let mut next = PaxMap::new();
    let mut global = PaxMap::new();
    let mut offset: u64 = 0;
    let mut previous_flush: u64 = 0;
    let mut file_meta_start: u64 = 0;

    loop {
        // Between entries only, and based on compressed output already
        // emitted: a boundary must never split a tar entry.
        if w.compressed_written() - previous_flush > flush_threshold {
            previous_flush = w.flush_stream()?.compressed;
        }

        read_block(src, &mut block)?;

        if Header::from_block(&block).is_zero() {
            w.write_all(&block)?;
            read_block(src, &mut block)?;
            w.write_all(&block)?;
            if !Header::from_block(&block).is_zero() {
                return Err(WriteError::PartialEndMarker);
            }
            return Ok(());
        }

        let header = Header::from_block(&block);
        let size = match pax::effective(&next, &global, b"size") {
            Some(v) => parse_decimal(v).ok_or_else(|| WriteError::BadSizeAttribute(v.to_vec()))?,
            None => header.size(),
        };

        let entry_type = header.entry_type();
        let mut write_index_entry = false;
        let mut is_unknown = false;

        if entry_type.is_member() {
            w.write_all(&block)?;
            copy_blocks(src, w, size)?;
            write_index_entry = true;
        } else {
            match entry_type {
                EntryType::XGlobalHeader => {
                    let payload = read_padded(src, size)?;
                    for (key, value) in pax::parse(&payload[..size as usize])? {
                        global.insert(key, value);
                    }
                    w.write_all(&block)?;
                    w.write_all(&payload)?;
                }

                EntryType::XHeader => {
                    let payload = read_padded(src, size)?;
                    for (key, value) in pax::parse(&payload[..size as usize])? {
                        next.insert(key, value);
                    }
                    w.write_all(&block)?;
                    w.write_all(&payload)?;
                }

                EntryType::GnuLongName => {
                    let payload = read_padded(src, size)?;
                    let path = truncate_null(&payload[..size as usize]);
                    next.insert(b"path".to_vec(), path.to_vec());
                    w.write_all(&block)?;
                    w.write_all(&payload)?;
                }

                EntryType::GnuLongLink => {
                    let payload = read_padded(src, size)?;
                    let target = truncate_null(&payload[..size as usize]);
                    next.insert(b"linkpath".to_vec(), target.to_vec());
                    w.write_all(&block)?;
                    w.write_all(&payload)?;
                }

                EntryType::Other(_) => {
                    is_unknown = true;
                    w.write_all(&block)?;
                    copy_blocks(src, w, size)?;
                }

                _ => unreachable!("member entry types are handled above"),
            }
        }

        if write_index_entry {
            let path = match pax::effective(&next, &global, b"path") {
                Some(v) => v.to_vec(),
                None => header.full_path_bytes().into_owned(),
            };

            // Attributes in effect for this member: every global key not
            // shadowed by a next-header key, plus the path and offset.
            let mut entry = PaxMap::new();
            for (key, value) in &global {
                if !next.contains_key(key) {
                    entry.insert(key.clone(), value.clone());
                }
            }
            entry.insert(OFFSET_KEY.to_vec(), file_meta_start.to_string().into_bytes());
            entry.insert(b"path".to_vec(), path);

            append_index_record(index, &entry)?;
        }

        offset += 512 + round_block(size);
        if write_index_entry || is_unknown {
            // The member (or unrecognized entry) consumed its metadata
            // run; the next entry's run starts after it.
            next.clear();
            file_meta_start = offset;
        }
    }
}

/// Append one index record: pax records framed by a self-sizing
/// `<len> ` prefix, just like a pax record frames itself.
fn append_index_record(index: &mut Vec<u8>, entry: &PaxMap) -> io::Result<()> {
    let mut record = Vec::new();
    pax::write(&mut record, entry)?;

    // ' ' followed by the serialized records
    let framed = pax::self_sizing_len(1 + record.len() as u64);
    write!(index, "{framed} ")?;
    index.extend_from_slice(&record);
    Ok(())
}

fn read_block(src: &mut impl Read, block: &mut Block) -> Result<(), WriteError> {
    if !read_full(src, block)? {
        return Err(WriteError::UnexpectedEof);
    }
    Ok(())
}

/// Copy a payload of `size` bytes plus padding, block by block.
fn copy_blocks(src: &mut impl Read, w: &mut impl Write, size: u64) -> Result<(), WriteError> {
    let mut block: Block = [0; BLOCK_SIZE];
    let mut remaining = round_block(size);
    while remaining > 0 {
        read_block(src, &mut block)?;
        w.write_all(&block)?;
        remaining -= BLOCK_SIZE as u64;
    }
    Ok(())
}

/// Read a payload of `size` bytes plus its padding into memory.
fn read_padded(src: &mut impl Read, size: u64) -> Result<Vec<u8>, WriteError> {
    let mut payload = vec![0; round_block(size) as usize];
    if !read_full(src, &mut payload)? {
        return Err(WriteError::UnexpectedEof);
    }
    Ok(payload)
}
