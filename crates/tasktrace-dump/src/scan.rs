//! Bounded-memory scanning of report documents.
//!
//! Documents can hold hundreds of megabytes of image data, so lookups never
//! load a whole file: forward scans keep at most one chunk plus a needle's
//! worth of carry-over, and the dump block is located by reading backwards.

use crate::document::{
    BLOCK_CLOSE, DUMP_OPEN_PREFIX, DumpBlock, IMAGE_OPEN_PREFIX, image_open_tag,
    parse_attributes, unescape_block_content,
};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const CHUNK_SIZE: usize = 64 * 1024;

/// Forward scanner over a byte stream with a bounded carry-over buffer
pub struct ChunkReader<R> {
    inner: R,
    buf: Vec<u8>,
    scratch: Vec<u8>,
    eof: bool,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, CHUNK_SIZE)
    }

    pub fn with_chunk_size(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            scratch: vec![0; chunk_size.max(1)],
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        loop {
            match self.inner.read(&mut self.scratch) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&self.scratch[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Next unconsumed byte, without consuming it
    pub fn peek(&mut self) -> io::Result<Option<u8>> {
        while self.buf.is_empty() {
            if !self.fill()? {
                return Ok(None);
            }
        }
        Ok(self.buf.first().copied())
    }

    /// Consume input up to and including `needle`. False when it never appears.
    pub fn skip_past(&mut self, needle: &[u8]) -> io::Result<bool> {
        self.scan_until(needle, |_| Ok(()))
    }

    /// Collect input up to `needle`, consuming the needle itself.
    /// `None` when the stream ends first.
    pub fn read_until(&mut self, needle: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let mut out = Vec::new();
        let found = self.scan_until(needle, |bytes| {
            out.extend_from_slice(bytes);
            Ok(())
        })?;
        Ok(found.then_some(out))
    }

    /// Stream input up to `needle` into `out`, consuming the needle itself
    pub fn copy_until<W: Write>(&mut self, needle: &[u8], out: &mut W) -> io::Result<bool> {
        self.scan_until(needle, |bytes| out.write_all(bytes))
    }

    fn scan_until<F>(&mut self, needle: &[u8], mut emit: F) -> io::Result<bool>
    where
        F: FnMut(&[u8]) -> io::Result<()>,
    {
        loop {
            if let Some(pos) = find_bytes(&self.buf, needle) {
                emit(&self.buf[..pos])?;
                self.buf.drain(..pos + needle.len());
                return Ok(true);
            }
            let keep = needle.len().saturating_sub(1);
            if self.buf.len() > keep {
                let flushed = self.buf.len() - keep;
                emit(&self.buf[..flushed])?;
                self.buf.drain(..flushed);
            }
            if !self.fill()? {
                emit(&self.buf)?;
                self.buf.clear();
                return Ok(false);
            }
        }
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(haystack.len());
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn block_content(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\n') {
        raw.pop();
    }
    if raw.first() == Some(&b'\n') {
        raw.remove(0);
    }
    unescape_block_content(&String::from_utf8_lossy(&raw))
}

/// Find the payload of the image block with `id`
pub fn find_image_block<R: Read>(reader: R, id: &str) -> io::Result<Option<String>> {
    let mut scanner = ChunkReader::new(reader);
    if !scanner.skip_past(image_open_tag(id).as_bytes())? {
        return Ok(None);
    }
    Ok(scanner
        .read_until(BLOCK_CLOSE.as_bytes())?
        .map(block_content))
}

pub fn find_image_block_in_file(path: &Path, id: &str) -> io::Result<Option<String>> {
    find_image_block(File::open(path)?, id)
}

/// Copy every image block from `reader` to `out` verbatim, one per line.
/// Returns how many blocks were copied.
pub fn copy_image_blocks<R: Read, W: Write>(reader: R, out: &mut W) -> io::Result<usize> {
    let mut scanner = ChunkReader::new(reader);
    let mut copied = 0;
    while scanner.skip_past(IMAGE_OPEN_PREFIX.as_bytes())? {
        match scanner.peek()? {
            Some(b'>') => {}
            Some(b) if b.is_ascii_whitespace() => {}
            // another block type sharing the prefix
            Some(_) => {
                scanner.skip_past(BLOCK_CLOSE.as_bytes())?;
                continue;
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unterminated image block",
                ));
            }
        }
        out.write_all(b"\n")?;
        out.write_all(IMAGE_OPEN_PREFIX.as_bytes())?;
        if !scanner.copy_until(BLOCK_CLOSE.as_bytes(), out)? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unterminated image block",
            ));
        }
        out.write_all(BLOCK_CLOSE.as_bytes())?;
        copied += 1;
    }
    Ok(copied)
}

pub fn copy_image_blocks_from_file<W: Write>(path: &Path, out: &mut W) -> io::Result<usize> {
    let mut writer = BufWriter::new(out);
    let copied = copy_image_blocks(File::open(path)?, &mut writer)?;
    writer.flush()?;
    Ok(copied)
}

/// Offset of the last occurrence of `needle` that starts before `end`
fn rfind_before<R: Read + Seek>(reader: &mut R, needle: &[u8], end: u64) -> io::Result<Option<u64>> {
    let overlap = needle.len().saturating_sub(1);
    let mut window_end = end;
    let mut buf = vec![0u8; CHUNK_SIZE + overlap];
    while window_end > 0 {
        let start = window_end.saturating_sub(CHUNK_SIZE as u64);
        // overlap lets a needle straddle the window edge while every match still starts before it
        let want = (window_end - start) as usize + overlap;
        reader.seek(SeekFrom::Start(start))?;
        let mut filled = 0usize;
        while filled < want {
            let n = reader.read(&mut buf[filled..want])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if let Some(pos) = rfind_bytes(&buf[..filled], needle) {
            return Ok(Some(start + pos as u64));
        }
        window_end = start;
    }
    Ok(None)
}

/// Last complete dump block, read backwards from the end of the stream.
/// Memory use is bounded by the dump JSON, never by the image data before it.
pub fn last_dump_block<R: Read + Seek>(mut reader: R) -> io::Result<Option<DumpBlock>> {
    let mut end = reader.seek(SeekFrom::End(0))?;
    let prefix = DUMP_OPEN_PREFIX.as_bytes();
    while let Some(start) = rfind_before(&mut reader, prefix, end)? {
        reader.seek(SeekFrom::Start(start + prefix.len() as u64))?;
        let mut scanner = ChunkReader::new(&mut reader);
        if let Some(tag) = scanner.read_until(b">")?
            && let Some(body) = scanner.read_until(BLOCK_CLOSE.as_bytes())?
        {
            let mut attributes = parse_attributes(&String::from_utf8_lossy(&tag));
            attributes.remove("type");
            return Ok(Some(DumpBlock {
                attributes,
                json: block_content(body),
            }));
        }
        end = start;
    }
    Ok(None)
}

pub fn last_dump_block_in_file(path: &Path) -> io::Result<Option<DumpBlock>> {
    last_dump_block(File::open(path)?)
}
