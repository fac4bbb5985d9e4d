//! Incremental parser and encoder for RESP2 frames.
//!
//! Parsing never consumes input by itself: [`parse`] only inspects the head
//! of a buffer and reports how many bytes make up the first complete frame,
//! so callers can keep partial frames buffered until the rest arrives.

use bytes::{Bytes, BytesMut};

/// Largest accepted bulk string payload, in bytes.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest accepted number of elements in an array.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Longest accepted line, for simple strings, errors, integers and headers.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// How many arrays may enclose one another.
pub const MAX_NESTING: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+OK\r\n`
    Simple(String),
    /// `-message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n`, or `$-1\r\n` when null.
    Bulk(Option<Bytes>),
    /// `*2\r\n...`, or `*-1\r\n` when null.
    Array(Option<Vec<Frame>>),
}

/// Declared length of a bulk string or an array, `None` when null, and the
/// size of its header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub len: Option<usize>,
    pub consumed: usize,
}

/// Malformed input, detected at byte offset `at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalid {
    pub reason: String,
    pub at: usize,
}

impl Invalid {
    fn new(reason: impl Into<String>, at: usize) -> Self {
        Self {
            reason: reason.into(),
            at,
        }
    }
}

impl From<Invalid> for Parse {
    fn from(invalid: Invalid) -> Self {
        Parse::Invalid {
            reason: invalid.reason,
            at: invalid.at,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Parse {
    /// A whole frame and the number of bytes it spans.
    Complete(Frame, usize),
    /// The buffer is a valid prefix of a frame.
    Incomplete,
    /// Malformed input, detected at byte offset `at`.
    Invalid { reason: String, at: usize },
}

impl Parse {
    fn shifted(self, offset: usize) -> Self {
        match self {
            Parse::Invalid { reason, at } => Parse::Invalid {
                reason,
                at: offset + at,
            },
            other => other,
        }
    }
}

/// Parses the first frame at the head of `buf`.
pub fn parse(buf: &[u8]) -> Parse {
    parse_nested(buf, 0)
}

/// Parses only the `*<len>\r\n` header of the array at the head of `buf`.
pub fn parse_array_header(buf: &[u8]) -> Result<Option<Header>, Invalid> {
    match buf.first() {
        None => Ok(None),
        Some(b'*') => parse_len(buf, MAX_ARRAY_LEN),
        Some(_) => Err(Invalid::new("expected an array", 0)),
    }
}

fn parse_nested(buf: &[u8], depth: usize) -> Parse {
    match buf.first() {
        None => Parse::Incomplete,
        Some(b'+') => parse_text(buf, Frame::Simple),
        Some(b'-') => parse_text(buf, Frame::Error),
        Some(b':') => parse_integer(buf),
        Some(b'$') => parse_bulk(buf),
        Some(b'*') => parse_array(buf, depth),
        Some(other) => Invalid::new(format!("unexpected byte {:?}", *other as char), 0).into(),
    }
}

/// Returns the line following the type byte and the offset right after its CRLF.
///
/// Lines longer than [`MAX_LINE_LEN`] are rejected as soon as that many bytes
/// are buffered, without waiting for their end.
fn line(buf: &[u8]) -> Result<Option<(&[u8], usize)>, Invalid> {
    let window = &buf[1..buf.len().min(MAX_LINE_LEN + 3)];
    match window.windows(2).position(|w| w == b"\r\n") {
        Some(i) => Ok(Some((&buf[1..1 + i], i + 3))),
        None if buf.len() >= MAX_LINE_LEN + 3 => Err(Invalid::new("line too long", 1)),
        None => Ok(None),
    }
}

fn parse_text(buf: &[u8], into_frame: fn(String) -> Frame) -> Parse {
    let (text, consumed) = match line(buf) {
        Ok(Some(line)) => line,
        Ok(None) => return Parse::Incomplete,
        Err(invalid) => return invalid.into(),
    };
    match std::str::from_utf8(text) {
        Ok(text) => Parse::Complete(into_frame(text.to_owned()), consumed),
        Err(_) => Invalid::new("invalid utf-8 in line", 1).into(),
    }
}

fn parse_number(text: &[u8]) -> Option<i64> {
    std::str::from_utf8(text).ok()?.parse().ok()
}

fn parse_integer(buf: &[u8]) -> Parse {
    let (text, consumed) = match line(buf) {
        Ok(Some(line)) => line,
        Ok(None) => return Parse::Incomplete,
        Err(invalid) => return invalid.into(),
    };
    match parse_number(text) {
        Some(n) => Parse::Complete(Frame::Integer(n), consumed),
        None => Invalid::new("invalid integer", 1).into(),
    }
}

/// Reads a length header, where `-1` stands for null.
fn parse_len(buf: &[u8], max: usize) -> Result<Option<Header>, Invalid> {
    let (text, consumed) = match line(buf)? {
        Some(line) => line,
        None => return Ok(None),
    };
    let len = match parse_number(text) {
        Some(-1) => None,
        Some(n) if n >= 0 && (n as u64) <= (max as u64) => Some(n as usize),
        Some(_) => return Err(Invalid::new("length out of range", 1)),
        None => return Err(Invalid::new("invalid length", 1)),
    };
    Ok(Some(Header { len, consumed }))
}

fn parse_bulk(buf: &[u8]) -> Parse {
    let (len, start) = match parse_len(buf, MAX_BULK_LEN) {
        Ok(Some(Header {
            len: Some(len),
            consumed,
        })) => (len, consumed),
        Ok(Some(Header { len: None, consumed })) => {
            return Parse::Complete(Frame::Bulk(None), consumed)
        }
        Ok(None) => return Parse::Incomplete,
        Err(invalid) => return invalid.into(),
    };

    let end = start + len;
    if buf.len() < end + 2 {
        return Parse::Incomplete;
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Invalid::new("bulk string missing trailing CRLF", end).into();
    }

    let data = Bytes::copy_from_slice(&buf[start..end]);
    Parse::Complete(Frame::Bulk(Some(data)), end + 2)
}

fn parse_array(buf: &[u8], depth: usize) -> Parse {
    if depth >= MAX_NESTING {
        return Invalid::new("arrays nested too deep", 0).into();
    }

    let (len, mut offset) = match parse_len(buf, MAX_ARRAY_LEN) {
        Ok(Some(Header {
            len: Some(len),
            consumed,
        })) => (len, consumed),
        Ok(Some(Header { len: None, consumed })) => {
            return Parse::Complete(Frame::Array(None), consumed)
        }
        Ok(None) => return Parse::Incomplete,
        Err(invalid) => return invalid.into(),
    };

    // The declared length is untrusted until the elements actually arrive.
    let mut elements = Vec::with_capacity(len.min(16));
    for _ in 0..len {
        match parse_nested(&buf[offset..], depth + 1) {
            Parse::Complete(element, consumed) => {
                elements.push(element);
                offset += consumed;
            }
            other => return other.shifted(offset),
        }
    }

    Parse::Complete(Frame::Array(Some(elements)), offset)
}

impl Frame {
    pub fn encode_into(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(text) => put_line(dst, b'+', text),
            Frame::Error(text) => put_line(dst, b'-', text),
            Frame::Integer(n) => put_line(dst, b':', &n.to_string()),
            Frame::Bulk(None) => dst.extend_from_slice(b"$-1\r\n"),
            Frame::Bulk(Some(data)) => {
                put_line(dst, b'$', &data.len().to_string());
                dst.reserve(data.len() + 2);
                dst.extend_from_slice(data);
                dst.extend_from_slice(b"\r\n");
            }
            Frame::Array(None) => dst.extend_from_slice(b"*-1\r\n"),
            Frame::Array(Some(elements)) => {
                put_line(dst, b'*', &elements.len().to_string());
                elements.iter().for_each(|element| element.encode_into(dst));
            }
        }
    }
}

/// Writes a single-line frame; CR and LF would break framing, so they become spaces.
fn put_line(dst: &mut BytesMut, prefix: u8, text: &str) {
    dst.reserve(text.len() + 3);
    dst.extend_from_slice(&[prefix]);
    dst.extend(text.bytes().map(|b| match b {
        b'\r' | b'\n' => b' ',
        b => b,
    }));
    dst.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> Frame {
        Frame::Bulk(Some(Bytes::copy_from_slice(text.as_bytes())))
    }

    #[test]
    fn succeeds_to_parse_complete_frames() {
        let cases = vec![
            (b"+OK\r\n".as_ref(), Frame::Simple("OK".into()), 5, "simple string"),
            (b"-oops\r\n".as_ref(), Frame::Error("oops".into()), 7, "error"),
            (b":-42\r\n".as_ref(), Frame::Integer(-42), 6, "integer"),
            (b"$3\r\nbar\r\n".as_ref(), bulk("bar"), 9, "bulk string"),
            (b"$0\r\n\r\n".as_ref(), bulk(""), 6, "empty bulk string"),
            (b"$-1\r\n".as_ref(), Frame::Bulk(None), 5, "null bulk string"),
            (b"*-1\r\n".as_ref(), Frame::Array(None), 5, "null array"),
            (b"*0\r\n".as_ref(), Frame::Array(Some(vec![])), 4, "empty array"),
            (
                b"*2\r\n$3\r\nget\r\n+foo\r\n".as_ref(),
                Frame::Array(Some(vec![bulk("get"), Frame::Simple("foo".into())])),
                19,
                "array of strings",
            ),
        ];

        cases
            .into_iter()
            .for_each(|(message, expected_frame, expected_consumed, reason)| {
                // Pre-condition.
                // Action.
                let parsed = parse(message);

                // Post-condition.
                assert_eq!(
                    parsed,
                    Parse::Complete(expected_frame, expected_consumed),
                    "{}",
                    reason
                );
            });
    }

    #[test]
    fn leaves_trailing_bytes_out_of_the_frame() {
        // Pre-condition.
        let message = b"+first\r\n+second\r\n";

        // Action.
        let parsed = parse(message);

        // Post-condition.
        assert_eq!(parsed, Parse::Complete(Frame::Simple("first".into()), 8));
    }

    #[test]
    fn waits_for_incomplete_frames() {
        let cases = vec![
            (b"".as_ref(), "empty buffer"),
            (b"+OK".as_ref(), "simple string without CRLF"),
            (b"+OK\r".as_ref(), "simple string with half a CRLF"),
            (b"$3\r\nba".as_ref(), "truncated bulk payload"),
            (b"$3\r\nbar".as_ref(), "bulk payload without CRLF"),
            (b"*2\r\n$3\r\nget\r\n".as_ref(), "array missing an element"),
            (b"*2\r\n".as_ref(), "array header only"),
        ];

        cases.into_iter().for_each(|(message, reason)| {
            // Pre-condition.
            // Action.
            let parsed = parse(message);

            // Post-condition.
            assert_eq!(parsed, Parse::Incomplete, "{}", reason);
        });
    }

    #[test]
    fn reports_where_malformed_input_starts() {
        let cases = vec![
            (b"hello\r\n".as_ref(), 0, "unknown type byte"),
            (b":abc\r\n".as_ref(), 1, "non numeric integer"),
            (b"$x\r\n".as_ref(), 1, "non numeric length"),
            (b"$-2\r\n".as_ref(), 1, "negative length"),
            (b"$3\r\nbarXX\r\n".as_ref(), 7, "bulk payload longer than declared"),
            (b"*2\r\n$3\r\nget\r\n?\r\n".as_ref(), 13, "bad element inside an array"),
            (b"*1\r\n*1\r\n*1\r\n+x\r\n".as_ref(), 8, "arrays nested too deep"),
        ];

        cases.into_iter().for_each(|(message, expected_at, reason)| {
            // Pre-condition.
            // Action.
            let parsed = parse(message);

            // Post-condition.
            match parsed {
                Parse::Invalid { at, .. } => assert_eq!(at, expected_at, "{}", reason),
                other => panic!("{}: expected invalid, got {:?}", reason, other),
            }
        });
    }

    #[test]
    fn rejects_oversized_lengths() {
        // Pre-condition.
        let bulk = format!("${}\r\n", MAX_BULK_LEN + 1);
        let array = format!("*{}\r\n", MAX_ARRAY_LEN + 1);

        // Action.
        // Post-condition.
        assert!(matches!(parse(bulk.as_bytes()), Parse::Invalid { .. }));
        assert!(matches!(parse(array.as_bytes()), Parse::Invalid { .. }));
    }

    #[test]
    fn accepts_one_level_of_nesting() {
        // Pre-condition.
        let message = b"*1\r\n*1\r\n+x\r\n";

        // Action.
        let parsed = parse(message);

        // Post-condition.
        assert_eq!(
            parsed,
            Parse::Complete(
                Frame::Array(Some(vec![Frame::Array(Some(vec![Frame::Simple("x".into())]))])),
                12
            )
        );
    }

    #[test]
    fn rejects_deep_nesting_without_recursing_into_it() {
        // Pre-condition.
        let mut message = "*1\r\n".repeat(200_000);
        message.push_str("+x\r\n");

        // Action.
        let parsed = parse(message.as_bytes());

        // Post-condition.
        assert_eq!(
            parsed,
            Parse::Invalid {
                reason: "arrays nested too deep".into(),
                at: 4 * MAX_NESTING
            }
        );
    }

    #[test]
    fn rejects_lines_longer_than_the_limit() {
        let long = "a".repeat(MAX_LINE_LEN + 2);
        let digits = "9".repeat(MAX_LINE_LEN + 2);
        let cases = vec![
            (format!("+{}", long), "unterminated simple string"),
            (format!("-{}", long), "unterminated error"),
            (format!(":{}", digits), "unterminated integer"),
            (format!("${}", digits), "unterminated bulk header"),
            (format!("*{}", digits), "unterminated array header"),
            (format!("+{}\r\n", long), "terminated but too long"),
        ];

        cases.into_iter().for_each(|(message, reason)| {
            // Pre-condition.
            // Action.
            let parsed = parse(message.as_bytes());

            // Post-condition.
            assert_eq!(
                parsed,
                Parse::Invalid {
                    reason: "line too long".into(),
                    at: 1
                },
                "{}",
                reason
            );
        });
    }

    #[test]
    fn accepts_lines_right_at_the_limit() {
        // Pre-condition.
        let text = "a".repeat(MAX_LINE_LEN);
        let message = format!("+{}\r\n", text);

        // Action.
        let parsed = parse(message.as_bytes());

        // Post-condition.
        assert_eq!(parsed, Parse::Complete(Frame::Simple(text), MAX_LINE_LEN + 3));
    }

    #[test]
    fn reads_array_headers_alone() {
        let cases = vec![
            (
                b"*3\r\n$3\r\nSET".as_ref(),
                Ok(Some(Header {
                    len: Some(3),
                    consumed: 4,
                })),
                "header followed by a partial element",
            ),
            (
                b"*-1\r\n".as_ref(),
                Ok(Some(Header {
                    len: None,
                    consumed: 5,
                })),
                "null array",
            ),
            (b"*3".as_ref(), Ok(None), "unterminated header"),
            (
                b"+OK\r\n".as_ref(),
                Err(Invalid::new("expected an array", 0)),
                "not an array",
            ),
        ];

        cases.into_iter().for_each(|(message, expected, reason)| {
            // Pre-condition.
            // Action.
            let header = parse_array_header(message);

            // Post-condition.
            assert_eq!(header, expected, "{}", reason);
        });
    }

    #[test]
    fn succeeds_to_encode_frames() {
        let cases = vec![
            (Frame::Simple("ok".into()), b"+ok\r\n".as_ref(), "simple string"),
            (Frame::Error("invalid syntax".into()), b"-invalid syntax\r\n".as_ref(), "error"),
            (Frame::Integer(3), b":3\r\n".as_ref(), "integer"),
            (bulk("bar"), b"$3\r\nbar\r\n".as_ref(), "bulk string"),
            (Frame::Bulk(None), b"$-1\r\n".as_ref(), "null bulk string"),
            (
                Frame::Array(Some(vec![bulk("get"), bulk("k")])),
                b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n".as_ref(),
                "array",
            ),
            (
                Frame::Error("line\r\nbreak".into()),
                b"-line  break\r\n".as_ref(),
                "error with line break",
            ),
        ];

        cases
            .into_iter()
            .for_each(|(frame, expected_message, reason)| {
                // Pre-condition.
                let mut message = BytesMut::new();

                // Action.
                frame.encode_into(&mut message);

                // Post-condition.
                assert_eq!(message, expected_message, "{}", reason);
            });
    }
}
