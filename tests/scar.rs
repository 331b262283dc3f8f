//! End-to-end container tests: create an archive from a tar stream,
//! then list and extract through the public reader API.

use std::cell::RefCell;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

use similar_asserts::assert_eq;

use scar::compression::Codec;
use scar::{reader, writer};

// =============================================================================
// Fixture helpers
// =============================================================================

/// Build a tar archive using the tar crate.
fn create_tar_with<F>(f: F) -> Vec<u8>
where
    F: FnOnce(&mut tar::Builder<&mut Vec<u8>>),
{
    let mut data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut data);
        f(&mut builder);
        builder.finish().unwrap();
    }
    data
}

fn append_file(builder: &mut tar::Builder<&mut Vec<u8>>, path: &str, content: &[u8]) {
    let mut header = tar::Header::new_ustar();
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_size(content.len() as u64);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, path, content).unwrap();
}

/// A hand-built ustar header block, for the exotic entries the tar
/// crate won't produce on demand.
fn raw_header(name: &[u8], typeflag: u8, size: u64) -> [u8; 512] {
    let mut block = [0u8; 512];
    block[..name.len()].copy_from_slice(name);
    block[100..107].copy_from_slice(b"0000644");
    block[124..135].copy_from_slice(format!("{size:011o}").as_bytes());
    block[156] = typeflag;
    block[257..263].copy_from_slice(b"ustar\0");
    block[263..265].copy_from_slice(b"00");
    set_checksum(&mut block);
    block
}

fn set_checksum(block: &mut [u8; 512]) {
    let sum: u64 = block
        .iter()
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { 32 } else { u64::from(b) })
        .sum();
    block[148..155].copy_from_slice(format!("{sum:06o}\0").as_bytes());
}

/// Append a payload padded up to a block boundary.
fn append_padded(tar: &mut Vec<u8>, payload: &[u8]) {
    tar.extend_from_slice(payload);
    let padding = (512 - payload.len() % 512) % 512;
    tar.extend_from_slice(&vec![0u8; padding]);
}

fn end_marker(tar: &mut Vec<u8>) {
    tar.extend_from_slice(&[0u8; 1024]);
}

/// Deterministic incompressible bytes, so compressed sizes track raw
/// sizes and flush thresholds actually trip.
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9e3779b97f4a7c15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// A sink that stays readable after `create` boxes it away.
#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn take(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn scar_create(tar: &[u8], codec: Codec, blocksize: u64) -> Vec<u8> {
    let out = SharedBuf::default();
    writer::create(tar, out.clone(), codec, blocksize).unwrap();
    out.take()
}

fn scar_list(container: &[u8]) -> Vec<String> {
    let mut cursor = Cursor::new(container);
    let mut out = Vec::new();
    reader::list(&mut cursor, &mut out).unwrap();
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect()
}

fn scar_cat(container: &[u8], paths: &[&str]) -> Result<Vec<u8>, reader::ReadError> {
    let mut cursor = Cursor::new(container);
    let mut out = Vec::new();
    let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
    reader::cat(&mut cursor, &mut out, &paths)?;
    Ok(out)
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_single_small_file() {
    let tar = create_tar_with(|b| append_file(b, "hello.txt", b"hi\n"));
    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);

    assert_eq!(scar_list(&container), vec!["hello.txt"]);
    assert_eq!(scar_cat(&container, &["hello.txt"]).unwrap(), b"hi\n");

    let tail = reader::find_tail(&mut Cursor::new(&container)).unwrap();
    assert!(tail.index_offset < tail.chunks_offset);
    assert!(tail.chunks_offset < container.len() as u64);
}

#[test]
fn test_every_codec_end_to_end() {
    let tar = create_tar_with(|b| {
        append_file(b, "a.txt", b"first file\n");
        append_file(b, "b/c.txt", &noise(2000, 7));
    });

    for codec in Codec::ALL {
        let container = scar_create(&tar, codec, 1024 * 1024);

        let tail = reader::find_tail(&mut Cursor::new(&container)).unwrap();
        assert_eq!(tail.codec, codec, "{}", codec.name());

        assert_eq!(scar_list(&container), vec!["a.txt", "b/c.txt"]);
        assert_eq!(
            scar_cat(&container, &["b/c.txt", "a.txt"]).unwrap(),
            [noise(2000, 7).as_slice(), b"first file\n".as_slice()].concat(),
            "{}",
            codec.name()
        );
    }
}

#[test]
fn test_body_streams_reconstruct_the_tar() {
    let tar = create_tar_with(|b| {
        for i in 0..20 {
            append_file(b, &format!("file_{i:02}"), &noise(3000, i));
        }
    });
    // small threshold: the body is split over many streams
    let container = scar_create(&tar, Codec::Gzip, 2048);

    let mut cursor = Cursor::new(&container);
    let tail = reader::find_tail(&mut cursor).unwrap();

    // everything before the index stream is re-emitted tar, and
    // concatenated streams decompress as one
    let body = &container[..tail.index_offset as usize];
    let mut decoder = Codec::Gzip.new_decoder(Box::new(body)).unwrap();
    let mut reconstructed = Vec::new();
    decoder.read_to_end(&mut reconstructed).unwrap();

    assert_eq!(reconstructed, tar);
}

#[test]
fn test_mid_stream_flushes_and_chunk_invariants() {
    let tar = create_tar_with(|b| {
        for i in 0..40 {
            append_file(b, &format!("file_{i:02}"), &noise(8192, i));
        }
    });
    let container = scar_create(&tar, Codec::Gzip, 4096);

    let mut cursor = Cursor::new(&container);
    let tail = reader::find_tail(&mut cursor).unwrap();
    let chunks = reader::read_chunks(&mut cursor, &tail).unwrap();

    // incompressible 8 KiB files against a 4 KiB threshold: a boundary
    // lands between most entries
    assert!(chunks.len() >= 10, "only {} chunks", chunks.len());

    for pair in chunks.windows(2) {
        assert!(pair[0].raw < pair[1].raw);
        assert!(pair[0].compressed < pair[1].compressed);
    }
    for chunk in &chunks {
        assert_eq!(chunk.raw % 512, 0, "misaligned chunk at {}", chunk.raw);
    }

    // a mid-archive member comes out intact
    assert_eq!(scar_cat(&container, &["file_20"]).unwrap(), noise(8192, 20));
}

#[test]
fn test_cat_reads_only_one_chunks_worth() {
    let tar = create_tar_with(|b| {
        for i in 0..40 {
            append_file(b, &format!("file_{i:02}"), &noise(8192, i));
        }
    });
    let container = scar_create(&tar, Codec::Gzip, 4096);
    let total = container.len();

    let mut counting = CountingReader {
        inner: Cursor::new(&container),
        read: 0,
    };
    let mut out = Vec::new();
    reader::cat(&mut counting, &mut out, &["file_20".to_string()]).unwrap();

    assert_eq!(out, noise(8192, 20));
    // one chunk plus the footer, not the whole container
    assert!(
        counting.read < total as u64 / 4,
        "read {} of {} bytes",
        counting.read,
        total
    );
}

struct CountingReader<R> {
    inner: R,
    read: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for CountingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

#[test]
fn test_pax_long_name_wins_over_header_name() {
    let mut tar = Vec::new();
    let pax = b"23 path=very/long/name\n";
    tar.extend_from_slice(&raw_header(b"ignored", b'x', pax.len() as u64));
    append_padded(&mut tar, pax);
    tar.extend_from_slice(&raw_header(b"SHORT", b'0', 4));
    append_padded(&mut tar, b"data");
    end_marker(&mut tar);

    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);
    assert_eq!(scar_list(&container), vec!["very/long/name"]);
    assert_eq!(scar_cat(&container, &["very/long/name"]).unwrap(), b"data");
    assert!(matches!(
        scar_cat(&container, &["SHORT"]),
        Err(reader::ReadError::NotFound(_))
    ));
}

#[test]
fn test_pax_size_override() {
    // the ustar size field says 0; a pax record carries the real size
    let mut tar = Vec::new();
    let pax = b"9 size=4\n";
    tar.extend_from_slice(&raw_header(b"meta", b'x', pax.len() as u64));
    append_padded(&mut tar, pax);
    tar.extend_from_slice(&raw_header(b"f", b'0', 0));
    append_padded(&mut tar, b"data");
    end_marker(&mut tar);

    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);
    assert_eq!(scar_cat(&container, &["f"]).unwrap(), b"data");
}

#[test]
fn test_gnu_long_link_reemitted() {
    let mut tar = Vec::new();
    tar.extend_from_slice(&raw_header(b"././@LongLink", b'K', 12));
    append_padded(&mut tar, b"target/path\0");
    tar.extend_from_slice(&raw_header(b"mylink", b'2', 0));
    end_marker(&mut tar);

    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);
    assert_eq!(scar_list(&container), vec!["mylink"]);

    // the K entry must survive byte-identically in the re-emitted tar
    let mut cursor = Cursor::new(&container);
    let tail = reader::find_tail(&mut cursor).unwrap();
    let body = &container[..tail.index_offset as usize];
    let mut decoder = Codec::Gzip.new_decoder(Box::new(body)).unwrap();
    let mut reconstructed = Vec::new();
    decoder.read_to_end(&mut reconstructed).unwrap();
    assert_eq!(reconstructed, tar);
}

#[test]
fn test_gnu_long_name_resolves_path() {
    let mut tar = Vec::new();
    tar.extend_from_slice(&raw_header(b"././@LongLink", b'L', 22));
    append_padded(&mut tar, b"a/rather/long/name.md\0");
    tar.extend_from_slice(&raw_header(b"a/rather/long/nam", b'0', 2));
    append_padded(&mut tar, b"ok");
    end_marker(&mut tar);

    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);
    assert_eq!(scar_list(&container), vec!["a/rather/long/name.md"]);
    assert_eq!(
        scar_cat(&container, &["a/rather/long/name.md"]).unwrap(),
        b"ok"
    );
}

#[test]
fn test_base256_size_field() {
    let mut big = raw_header(b"big", b'0', 0);
    big[124..136].fill(0);
    big[124] = 0x80;
    big[135] = 3; // base-256 for a 3-byte payload
    set_checksum(&mut big);

    let mut tar = Vec::new();
    tar.extend_from_slice(&big);
    append_padded(&mut tar, b"abc");
    tar.extend_from_slice(&raw_header(b"after", b'0', 0));
    end_marker(&mut tar);

    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);
    assert_eq!(scar_cat(&container, &["big"]).unwrap(), b"abc");

    // the offset accumulator advanced past header + padded payload
    let mut cursor = Cursor::new(&container);
    let tail = reader::find_tail(&mut cursor).unwrap();
    let index = reader::read_index(&mut cursor, &tail).unwrap();
    assert_eq!(index[0].path(), b"big");
    assert_eq!(index[0].offset(), Some(0));
    assert_eq!(index[1].path(), b"after");
    assert_eq!(index[1].offset(), Some(1024));
}

#[test]
fn test_global_pax_attrs_land_in_index() {
    let mut tar = Vec::new();
    let pax = b"12 owner=me\n";
    tar.extend_from_slice(&raw_header(b"g", b'g', pax.len() as u64));
    append_padded(&mut tar, pax);
    tar.extend_from_slice(&raw_header(b"file", b'0', 0));
    end_marker(&mut tar);

    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);

    let mut cursor = Cursor::new(&container);
    let tail = reader::find_tail(&mut cursor).unwrap();
    let index = reader::read_index(&mut cursor, &tail).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].path(), b"file");
    assert_eq!(
        index[0].pax.get(b"owner".as_slice()).map(Vec::as_slice),
        Some(b"me".as_slice())
    );
}

#[test]
fn test_empty_archive() {
    let mut tar = Vec::new();
    end_marker(&mut tar);

    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);
    assert!(scar_list(&container).is_empty());

    let mut cursor = Cursor::new(&container);
    let tail = reader::find_tail(&mut cursor).unwrap();
    let chunks = reader::read_chunks(&mut cursor, &tail).unwrap();
    assert!(chunks.is_empty());

    assert!(matches!(
        scar_cat(&container, &["anything"]),
        Err(reader::ReadError::NotFound(_))
    ));
}

#[test]
fn test_directories_links_and_order() {
    let tar = create_tar_with(|b| {
        let mut dir = tar::Header::new_ustar();
        dir.set_mode(0o755);
        dir.set_mtime(0);
        dir.set_size(0);
        dir.set_entry_type(tar::EntryType::Directory);
        b.append_data(&mut dir, "dir/", io::empty()).unwrap();

        append_file(b, "dir/file", b"x");

        let mut link = tar::Header::new_ustar();
        link.set_mode(0o777);
        link.set_mtime(0);
        link.set_size(0);
        link.set_entry_type(tar::EntryType::Symlink);
        b.append_link(&mut link, "dir/link", "file").unwrap();
    });

    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);
    // tar order, including non-file members
    assert_eq!(scar_list(&container), vec!["dir/", "dir/file", "dir/link"]);
    // a symlink has no payload
    assert_eq!(scar_cat(&container, &["dir/link"]).unwrap(), b"");
}

#[test]
fn test_truncated_tail_is_not_found() {
    let tar = create_tar_with(|b| append_file(b, "f", b"payload"));
    let container = scar_create(&tar, Codec::Gzip, 1024 * 1024);

    let truncated = &container[..container.len() - 1];
    let err = reader::find_tail(&mut Cursor::new(truncated)).unwrap_err();
    assert!(matches!(err, reader::ReadError::TailNotFound));

    // and a file of pure noise has no tail either
    let garbage = noise(2048, 99);
    let err = reader::find_tail(&mut Cursor::new(&garbage[..])).unwrap_err();
    assert!(matches!(err, reader::ReadError::TailNotFound));
}

#[test]
fn test_not_a_container() {
    // a plain compressed tarball has streams but no tail marker
    let tar = create_tar_with(|b| append_file(b, "f", b"payload"));
    let out = SharedBuf::default();
    let mut enc = Codec::Gzip.new_encoder(Box::new(out.clone())).unwrap();
    enc.write_all(&tar).unwrap();
    enc.finish().unwrap();

    let err = reader::find_tail(&mut Cursor::new(out.take())).unwrap_err();
    assert!(matches!(err, reader::ReadError::TailNotFound));
}
