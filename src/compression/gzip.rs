use std::io::{self, Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::Encoder;

pub const MAGIC: &[u8] = &[0x1f, 0x8b];

struct GzipEncoder {
    inner: GzEncoder<Box<dyn Write>>,
}

impl Write for GzipEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Encoder for GzipEncoder {
    fn finish(self: Box<Self>) -> io::Result<Box<dyn Write>> {
        self.inner.finish()
    }
}

pub(super) fn new_encoder(sink: Box<dyn Write>) -> io::Result<Box<dyn Encoder>> {
    Ok(Box::new(GzipEncoder {
        inner: GzEncoder::new(sink, Compression::default()),
    }))
}

pub(super) fn new_decoder<'r>(source: Box<dyn Read + 'r>) -> io::Result<Box<dyn Read + 'r>> {
    Ok(Box::new(MultiGzDecoder::new(source)))
}
