//! Seekable compressed tar archives.
//!
//! A scar file is a compressed tarball that still decompresses with the
//! stock tools (`zcat archive.tgz | tar t` works), but is internally cut
//! into independently-decodable compressed streams and carries, appended
//! after the tar data, an index of member paths and a chunk map of
//! (raw offset, compressed offset) seek points. A reader can therefore
//! locate any member and decompress only the one chunk containing it
//! instead of the whole archive.
//!
//! The [`writer`] module turns a tar stream into a scar container; the
//! [`reader`] module discovers the footer, loads the index, and extracts
//! or lists members.

pub mod compression;
pub mod header;
pub mod pax;
pub mod reader;
pub mod util;
pub mod writer;

/// Magic line opening the index stream.
pub const INDEX_MAGIC: &[u8] = b"SCAR-INDEX\n";

/// Magic line opening the chunk-map stream.
pub const CHUNKS_MAGIC: &[u8] = b"SCAR-CHUNKS\n";

/// Magic line opening the tail stream.
pub const TAIL_MAGIC: &[u8] = b"SCAR-TAIL\n";

/// Pax key carrying a member's uncompressed start offset in the index.
pub const OFFSET_KEY: &[u8] = b"scar:offset";

/// A boundary between two independent compressed streams.
///
/// `raw` counts uncompressed bytes, `compressed` bytes of container
/// output; both refer to the same instant, right after one stream's
/// trailing bytes and before the next stream's first byte. A reader can
/// seek to `compressed` and start decompressing from a clean slate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekPoint {
    pub raw: u64,
    pub compressed: u64,
}
