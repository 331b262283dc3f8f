use std::io::{self, Read, Write};

use zstd::stream::read::Decoder;
use zstd::stream::write::Encoder as ZstdStreamEncoder;

use super::Encoder;

pub const MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

struct ZstdEncoder {
    inner: ZstdStreamEncoder<'static, Box<dyn Write>>,
}

impl Write for ZstdEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Encoder for ZstdEncoder {
    fn finish(self: Box<Self>) -> io::Result<Box<dyn Write>> {
        self.inner.finish()
    }
}

pub(super) fn new_encoder(sink: Box<dyn Write>) -> io::Result<Box<dyn Encoder>> {
    Ok(Box::new(ZstdEncoder {
        inner: ZstdStreamEncoder::new(sink, 0)?,
    }))
}

pub(super) fn new_decoder<'r>(source: Box<dyn Read + 'r>) -> io::Result<Box<dyn Read + 'r>> {
    Ok(Box::new(Decoder::new(source)?))
}
