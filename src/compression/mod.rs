//! Compression codecs.
//!
//! Scar containers are a concatenation of independently-decodable
//! compressed streams, so the writer needs an encoder it can finalize
//! and restart over the same sink, and the reader needs decoders that
//! keep going across stream boundaries (for gzip that means multiple
//! members per RFC 1952; the other codecs concatenate frames the same
//! way). Each codec also exposes the magic bytes its streams start
//! with — the footer locator identifies the codec of an unknown
//! container by scanning for them.

use std::io::{self, Read, Write};
use std::path::Path;

pub mod bzip2;
pub mod gzip;
pub mod xz;
pub mod zstd;

/// A compression encoder whose sink can be recovered.
///
/// `finish` finalizes the current stream, flushes its trailing bytes,
/// and hands the underlying sink back so the caller can start a fresh
/// independent stream at the same position.
pub trait Encoder: Write {
    fn finish(self: Box<Self>) -> io::Result<Box<dyn Write>>;
}

/// The supported compression codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Codec {
    pub const ALL: [Codec; 4] = [Codec::Gzip, Codec::Bzip2, Codec::Xz, Codec::Zstd];

    /// The bytes every stream of this codec starts with.
    #[must_use]
    pub fn magic(self) -> &'static [u8] {
        match self {
            Codec::Gzip => gzip::MAGIC,
            Codec::Bzip2 => bzip2::MAGIC,
            Codec::Xz => xz::MAGIC,
            Codec::Zstd => zstd::MAGIC,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Bzip2 => "bzip2",
            Codec::Xz => "xz",
            Codec::Zstd => "zstd",
        }
    }

    #[must_use]
    pub fn by_name(name: &str) -> Option<Codec> {
        Codec::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Guess the codec from a file name suffix, the way tar does.
    #[must_use]
    pub fn for_path(path: &Path) -> Option<Codec> {
        let name = path.to_string_lossy();
        let matches = |suffixes: &[&str]| suffixes.iter().any(|s| name.ends_with(s));

        if matches(&[".taz", ".tgz", ".gz"]) {
            Some(Codec::Gzip)
        } else if matches(&[".tb2", ".tbz", ".tbz2", ".tz2", "bz2"]) {
            Some(Codec::Bzip2)
        } else if matches(&[".txz", ".xz"]) {
            Some(Codec::Xz)
        } else if matches(&[".tzst", ".zst"]) {
            Some(Codec::Zstd)
        } else {
            None
        }
    }

    /// Start a new compressed stream writing into `sink`.
    pub fn new_encoder(self, sink: Box<dyn Write>) -> io::Result<Box<dyn Encoder>> {
        match self {
            Codec::Gzip => gzip::new_encoder(sink),
            Codec::Bzip2 => bzip2::new_encoder(sink),
            Codec::Xz => xz::new_encoder(sink),
            Codec::Zstd => zstd::new_encoder(sink),
        }
    }

    /// Open a decoder over `source`.
    ///
    /// The decoder decompresses concatenated streams as one and returns
    /// clean EOF when the source runs out.
    pub fn new_decoder<'r>(self, source: Box<dyn Read + 'r>) -> io::Result<Box<dyn Read + 'r>> {
        match self {
            Codec::Gzip => gzip::new_decoder(source),
            Codec::Bzip2 => bzip2::new_decoder(source),
            Codec::Xz => xz::new_decoder(source),
            Codec::Zstd => zstd::new_decoder(source),
        }
    }
}
