//! Small I/O helpers shared by the writer and reader.

use std::cell::Cell;
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::rc::Rc;

/// Read exactly `buf.len()` bytes, retrying on short reads and EINTR.
///
/// Decompressors and pipes routinely return partial reads; tar blocks
/// must be consumed whole. Unlike `Read::read_exact`, a "clean" EOF that
/// occurs before any byte is read is reported as `Ok(false)` rather than
/// an error, so callers can tell a finished stream from a truncated one.
///
/// Returns `Ok(true)` when the buffer was filled, `Ok(false)` on clean
/// EOF, and `ErrorKind::UnexpectedEof` when the stream ends mid-buffer.
pub fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let buflen = buf.len();
    let mut todo: &mut [u8] = buf;

    while !todo.is_empty() {
        match reader.read(todo) {
            Ok(0) => {
                return match todo.len() {
                    s if s == buflen => Ok(false),
                    _ => Err(Error::from(ErrorKind::UnexpectedEof)),
                };
            }
            Ok(n) => todo = &mut todo[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(true)
}

/// Read and discard exactly `n` bytes.
pub fn skip_exact(reader: &mut impl Read, n: u64) -> Result<()> {
    let mut buf = [0u8; 8192];
    let mut remaining = n;
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        if !read_full(reader, &mut buf[..chunk])? {
            return Err(Error::from(ErrorKind::UnexpectedEof));
        }
        remaining -= chunk as u64;
    }
    Ok(())
}

/// Parse an ASCII decimal byte string.
#[must_use]
pub fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// A writer that counts the bytes passing through it.
///
/// The total lives behind a shared cell so it stays readable after the
/// writer has been boxed away inside a compression encoder.
pub struct CountingWriter<W> {
    inner: W,
    written: Rc<Cell<u64>>,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            written: Rc::new(Cell::new(0)),
        }
    }

    /// A handle on the running byte count.
    pub fn counter(&self) -> Rc<Cell<u64>> {
        self.written.clone()
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf)?;
        self.written.set(self.written.get() + n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}
