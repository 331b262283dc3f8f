//! PAX extended-header records.
//!
//! A pax header payload is a run of records, each of the form
//! `<len> <key>=<value>\n` where `<len>` is the decimal length of the
//! whole record *including the length digits themselves*, the space, the
//! `=`, the terminating newline, and everything in between. Values are
//! raw bytes; the length prefix is what delimits them, so a value may
//! even contain newlines.
//!
//! The same self-sizing length encoding also frames each entry of the
//! scar index stream, so the sizing helper lives here.

use std::collections::BTreeMap;
use std::io::{self, Write};

use thiserror::Error;

/// An attribute dictionary from pax extended headers.
///
/// Keys and values are byte strings; tar makes no promise of UTF-8.
pub type PaxMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Errors from decoding pax records.
#[derive(Debug, Error)]
pub enum PaxError {
    /// The length prefix is missing or contains non-digit bytes.
    #[error("pax record length prefix is not a decimal number")]
    BadLength,

    /// The declared record length runs past the end of the header.
    #[error("pax record length overruns the header")]
    Overrun,

    /// No `=` between the keyword and the value.
    #[error("pax record is missing the '=' separator")]
    MissingSeparator,

    /// The record does not end with a newline where its length says it
    /// should.
    #[error("pax record does not end in a newline")]
    MissingNewline,
}

/// Compute the value of a self-sizing length prefix.
///
/// Given the length of everything that follows the digits, returns the
/// number to actually print, i.e. `payload_len` plus the digits' own
/// width. Adding the digit count can push the total across an order of
/// magnitude (e.g. a payload of 98 plus 2 digits is 100, which needs 3
/// digits); when it does, one more is added.
#[must_use]
pub fn self_sizing_len(payload_len: u64) -> u64 {
    let digits = decimal_width(payload_len);
    let total = payload_len + digits;
    if decimal_width(total) == digits {
        total
    } else {
        payload_len + digits + 1
    }
}

/// Number of decimal digits needed to print `n`.
fn decimal_width(mut n: u64) -> u64 {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}

/// Look up an attribute with next-header-over-global precedence.
///
/// Pax semantics: an `x` header annotating the following entry beats a
/// `g` global header, which beats whatever the ustar header block says
/// (the caller's fallback when this returns `None`).
#[must_use]
pub fn effective<'a>(next: &'a PaxMap, global: &'a PaxMap, key: &[u8]) -> Option<&'a [u8]> {
    next.get(key).or_else(|| global.get(key)).map(Vec::as_slice)
}

/// Serialize a dictionary as pax records.
///
/// Records are emitted in key order, which is as good as any: the order
/// of pax attributes is not semantically observable.
pub fn write(w: &mut impl Write, pax: &PaxMap) -> io::Result<()> {
    for (key, value) in pax {
        // ' ' key '=' value '\n'
        let payload_len = (1 + key.len() + 1 + value.len() + 1) as u64;
        write!(w, "{} ", self_sizing_len(payload_len))?;
        w.write_all(key)?;
        w.write_all(b"=")?;
        w.write_all(value)?;
        w.write_all(b"\n")?;
    }
    Ok(())
}

/// Parse a pax header payload into a dictionary.
///
/// A keyword appearing more than once keeps its last value, which is
/// what pax semantics prescribe for overriding records.
pub fn parse(content: &[u8]) -> Result<PaxMap, PaxError> {
    let mut pax = PaxMap::new();
    let mut offset = 0;

    while offset < content.len() {
        let record_start = offset;

        let mut record_len: usize = 0;
        while offset < content.len() && content[offset] != b' ' {
            if !content[offset].is_ascii_digit() {
                return Err(PaxError::BadLength);
            }
            record_len = record_len
                .checked_mul(10)
                .and_then(|n| n.checked_add((content[offset] - b'0') as usize))
                .ok_or(PaxError::BadLength)?;
            offset += 1;
        }
        if offset == record_start {
            return Err(PaxError::BadLength);
        }

        offset += 1; // the space
        if offset >= content.len() {
            return Err(PaxError::Overrun);
        }
        let record_end = record_start
            .checked_add(record_len)
            .filter(|&end| end <= content.len())
            .ok_or(PaxError::Overrun)?;

        let key_start = offset;
        while offset < record_end && content[offset] != b'=' {
            offset += 1;
        }
        if offset == record_end {
            return Err(PaxError::MissingSeparator);
        }
        let key = &content[key_start..offset];
        offset += 1; // the '='

        // The value is everything up to the newline the length points at.
        let value_end = record_end.checked_sub(1).ok_or(PaxError::Overrun)?;
        if value_end < offset || content[value_end] != b'\n' {
            return Err(PaxError::MissingNewline);
        }
        let value = &content[offset..value_end];
        offset = record_end;

        pax.insert(key.to_vec(), value.to_vec());
    }

    Ok(pax)
}
