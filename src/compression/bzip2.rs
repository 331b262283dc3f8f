use std::io::{self, Read, Write};

use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;

use super::Encoder;

pub const MAGIC: &[u8] = &[0x42, 0x5a, 0x68];

struct Bzip2Encoder {
    inner: BzEncoder<Box<dyn Write>>,
}

impl Write for Bzip2Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Encoder for Bzip2Encoder {
    fn finish(self: Box<Self>) -> io::Result<Box<dyn Write>> {
        self.inner.finish()
    }
}

pub(super) fn new_encoder(sink: Box<dyn Write>) -> io::Result<Box<dyn Encoder>> {
    Ok(Box::new(Bzip2Encoder {
        inner: BzEncoder::new(sink, Compression::default()),
    }))
}

pub(super) fn new_decoder<'r>(source: Box<dyn Read + 'r>) -> io::Result<Box<dyn Read + 'r>> {
    Ok(Box::new(MultiBzDecoder::new(source)))
}
