//! Pattern buffer with tail-search optimization.
//!
//! Only the last N bytes of the buffer are searched for prompt patterns.
//! A full configuration dump can run to megabytes, and rescanning it on
//! every received chunk would be quadratic.

use std::fmt;

use bytes::{Buf, BytesMut};
use regex::bytes::Regex;
use vte::{Parser, Perform};

/// Buffer for accumulating terminal output and searching it for prompts.
///
/// Incoming bytes are run through a VT parser so ANSI escape sequences,
/// carriage returns and other control characters never reach the buffer.
/// Parser state survives across `extend` calls, so an escape sequence
/// split over two reads is still removed.
pub struct PatternBuffer {
    /// The accumulated, cleaned output.
    buffer: BytesMut,

    /// How many bytes from the end to search for patterns.
    search_depth: usize,

    parser: Parser,
}

/// Collects printable output from the VT parser.
struct Printable<'a> {
    out: &'a mut BytesMut,
}

impl Perform for Printable<'_> {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        // Keep line structure; drop \r, BEL, backspace and friends
        if byte == b'\n' || byte == b'\t' {
            self.out.extend_from_slice(&[byte]);
        }
    }
}

impl PatternBuffer {
    /// Create a new pattern buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            search_depth,
            parser: Parser::new(),
        }
    }

    /// Extend the buffer with raw terminal data.
    pub fn extend(&mut self, data: &[u8]) {
        let mut sink = Printable {
            out: &mut self.buffer,
        };
        self.parser.advance(&mut sink, data);
    }

    /// Search only the tail of the buffer for the pattern.
    ///
    /// Returns the absolute `(start, end)` byte offsets of the match.
    pub fn search_tail(&self, pattern: &Regex) -> Option<(usize, usize)> {
        let offset = self.tail_start();
        pattern
            .find(&self.buffer[offset..])
            .map(|m| (offset + m.start(), offset + m.end()))
    }

    /// Split off everything up to the first tail match of `pattern`.
    ///
    /// Returns the output preceding the match and the matched text; bytes
    /// after the match stay buffered for the next read.
    pub fn take_through(&mut self, pattern: &Regex) -> Option<(Vec<u8>, Vec<u8>)> {
        let (start, end) = self.search_tail(pattern)?;
        let mut head = self.buffer.split_to(end);
        let matched = head.split_off(start);
        Some((head.to_vec(), matched.to_vec()))
    }

    /// Drop everything currently buffered.
    pub fn clear(&mut self) {
        let len = self.buffer.len();
        self.buffer.advance(len);
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn tail_start(&self) -> usize {
        let start = self.buffer.len().saturating_sub(self.search_depth);
        // Back up to a line start so anchored prompt patterns still match
        memchr::memrchr(b'\n', &self.buffer[..start]).map_or(0, |pos| pos + 1)
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl fmt::Debug for PatternBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternBuffer")
            .field("len", &self.buffer.len())
            .field("search_depth", &self.search_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extend() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"Hello, world!");
        assert_eq!(buffer.as_slice(), b"Hello, world!");
    }

    #[test]
    fn test_ansi_and_carriage_return_stripping() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"\x1b[32mGreen text\x1b[0m\r\nnext");
        assert_eq!(buffer.as_slice(), b"Green text\nnext");
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"before\x1b[3");
        buffer.extend(b"2mafter");
        assert_eq!(buffer.as_slice(), b"beforeafter");
    }

    #[test]
    fn test_tail_search() {
        let mut buffer = PatternBuffer::new(20);
        buffer.extend(&[b'x'; 100]);
        buffer.extend(b"\nrouter#");

        let pattern = Regex::new(r"router#").unwrap();
        assert!(buffer.search_tail(&pattern).is_some());
    }

    #[test]
    fn test_tail_search_not_in_tail() {
        let mut buffer = PatternBuffer::new(10);
        buffer.extend(b"router#\n");
        buffer.extend(&[b'x'; 100]);

        let pattern = Regex::new(r"router#").unwrap();
        assert!(buffer.search_tail(&pattern).is_none());
        assert!(buffer.take_through(&pattern).is_none());
    }

    #[test]
    fn test_take_through_keeps_remainder() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"line one\nline two\nroot@pe0> trailing");

        let pattern = Regex::new(r"(?m)^root@pe0> ").unwrap();
        let (output, prompt) = buffer.take_through(&pattern).unwrap();
        assert_eq!(output, b"line one\nline two\n");
        assert_eq!(prompt, b"root@pe0> ");
        assert_eq!(buffer.as_slice(), b"trailing");
    }
}
