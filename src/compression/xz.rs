use std::io::{self, Read, Write};

use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use super::Encoder;

pub const MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];

const LEVEL: u32 = 6;

struct LzmaEncoder {
    inner: XzEncoder<Box<dyn Write>>,
}

impl Write for LzmaEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Encoder for LzmaEncoder {
    fn finish(self: Box<Self>) -> io::Result<Box<dyn Write>> {
        self.inner.finish()
    }
}

pub(super) fn new_encoder(sink: Box<dyn Write>) -> io::Result<Box<dyn Encoder>> {
    Ok(Box::new(LzmaEncoder {
        inner: XzEncoder::new(sink, LEVEL),
    }))
}

pub(super) fn new_decoder<'r>(source: Box<dyn Read + 'r>) -> io::Result<Box<dyn Read + 'r>> {
    Ok(Box::new(XzDecoder::new_multi_decoder(source)))
}
