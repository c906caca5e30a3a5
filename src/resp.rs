use bytes::{Buf, BytesMut};

const MAX_BULK_LEN: usize = 64 * 1024 * 1024;
const MAX_ARRAY_LEN: usize = 1024 * 1024;
const MAX_INLINE_LEN: usize = 64 * 1024;

/// A RESP2 frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string.
    Bulk(Option<Vec<u8>>),
    /// `None` is the null array.
    Array(Option<Vec<Frame>>),
}

impl Frame {
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    pub fn simple(s: impl Into<String>) -> Self {
        Frame::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Frame::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Frame::Integer(n)
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Frame::Bulk(Some(data.into()))
    }

    pub fn nil() -> Self {
        Frame::Bulk(None)
    }

    pub fn array(items: Vec<Frame>) -> Self {
        Frame::Array(Some(items))
    }

    /// Bulk string for `Some`, nil for `None`.
    pub fn optional(data: Option<impl Into<Vec<u8>>>) -> Self {
        Frame::Bulk(data.map(Into::into))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => line(out, b'+', s.as_bytes()),
            Frame::Error(s) => line(out, b'-', s.as_bytes()),
            Frame::Integer(n) => line(out, b':', n.to_string().as_bytes()),
            Frame::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Frame::Bulk(Some(data)) => {
                line(out, b'$', data.len().to_string().as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Frame::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            Frame::Array(Some(items)) => {
                line(out, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Bulk(Some(data)) => Some(data),
            Frame::Simple(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn to_text(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

fn line(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
    out.push(tag);
    out.extend_from_slice(body);
    out.extend_from_slice(b"\r\n");
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unexpected type byte '{}'", *.0 as char)]
    InvalidByte(u8),

    #[error("{0}")]
    Invalid(String),
}

/// Incremental RESP parser.
///
/// `parse` consumes one complete frame from the front of the buffer, or
/// leaves the buffer untouched and returns `Ok(None)` if more bytes are needed.
/// Lines not starting with a type byte are read as inline commands.
pub struct FrameParser;

impl FrameParser {
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        let parsed = match first {
            b'+' | b'-' | b':' | b'$' | b'*' => Self::frame_at(buf, 0)?,
            _ => Self::inline(buf)?,
        };
        Ok(parsed.map(|(frame, used)| {
            buf.advance(used);
            frame
        }))
    }

    /// Parse the frame starting at `pos`; returns it with the index just past it.
    fn frame_at(buf: &[u8], pos: usize) -> Result<Option<(Frame, usize)>, FrameError> {
        let Some(&tag) = buf.get(pos) else {
            return Ok(None);
        };
        let Some(end) = find_crlf(buf, pos + 1) else {
            return Ok(None);
        };
        let header = &buf[pos + 1..end];
        let next = end + 2;

        let frame = match tag {
            b'+' => (Frame::Simple(String::from_utf8_lossy(header).into_owned()), next),
            b'-' => (Frame::Error(String::from_utf8_lossy(header).into_owned()), next),
            b':' => (Frame::Integer(parse_len(header, "integer")?), next),
            b'$' => {
                let len = parse_len(header, "bulk length")?;
                if len < 0 {
                    (Frame::Bulk(None), next)
                } else {
                    let len = len as usize;
                    if len > MAX_BULK_LEN {
                        return Err(FrameError::Invalid("invalid bulk length".into()));
                    }
                    if buf.len() < next + len + 2 {
                        return Ok(None);
                    }
                    if &buf[next + len..next + len + 2] != b"\r\n" {
                        return Err(FrameError::Invalid("missing CRLF after bulk string".into()));
                    }
                    (Frame::Bulk(Some(buf[next..next + len].to_vec())), next + len + 2)
                }
            }
            b'*' => {
                let len = parse_len(header, "multibulk length")?;
                if len < 0 {
                    (Frame::Array(None), next)
                } else {
                    let len = len as usize;
                    if len > MAX_ARRAY_LEN {
                        return Err(FrameError::Invalid("invalid multibulk length".into()));
                    }
                    let mut items = Vec::with_capacity(len.min(64));
                    let mut cursor = next;
                    for _ in 0..len {
                        match Self::frame_at(buf, cursor)? {
                            Some((item, after)) => {
                                items.push(item);
                                cursor = after;
                            }
                            None => return Ok(None),
                        }
                    }
                    (Frame::Array(Some(items)), cursor)
                }
            }
            other => return Err(FrameError::InvalidByte(other)),
        };
        Ok(Some(frame))
    }

    fn inline(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        let Some(end) = find_crlf(buf, 0) else {
            if buf.len() > MAX_INLINE_LEN {
                return Err(FrameError::Invalid("inline command too long".into()));
            }
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&buf[..end]);
        let items = split_inline(&text)?
            .into_iter()
            .map(|word| Frame::bulk(word.into_bytes()))
            .collect();
        Ok(Some((Frame::Array(Some(items)), end + 2)))
    }
}

fn parse_len(header: &[u8], what: &str) -> Result<i64, FrameError> {
    std::str::from_utf8(header)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FrameError::Invalid(format!("invalid {what}")))
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

/// Whitespace-separated words; double quotes group words and honour `\"`.
fn split_inline(text: &str) -> Result<Vec<String>, FrameError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quoted = false;
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted => {
                if let Some(escaped) = chars.next() {
                    word.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                word.push(c);
                in_word = true;
            }
        }
    }

    if quoted {
        return Err(FrameError::Invalid("unbalanced quotes in request".into()));
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Frame> {
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = FrameParser::parse(&mut buf).unwrap() {
            frames.push(frame);
        }
        assert!(buf.is_empty());
        frames
    }

    #[test]
    fn test_command_array() {
        let frames = parse_all(b"*3\r\n$17\r\nNOTIFICATION.POLL\r\n$2\r\nd1\r\n$0\r\n\r\n");
        assert_eq!(
            frames,
            vec![Frame::array(vec![
                Frame::bulk("NOTIFICATION.POLL"),
                Frame::bulk("d1"),
                Frame::bulk(""),
            ])]
        );
    }

    #[test]
    fn test_scalars_and_nulls() {
        let frames = parse_all(b"+OK\r\n-ERR boom\r\n:-42\r\n$-1\r\n*-1\r\n");
        assert_eq!(
            frames,
            vec![
                Frame::ok(),
                Frame::error("ERR boom"),
                Frame::integer(-42),
                Frame::nil(),
                Frame::Array(None),
            ]
        );
    }

    #[test]
    fn test_partial_input_left_untouched() {
        let full = b"*2\r\n$4\r\nPING\r\n$5\r\nhello\r\n";
        for cut in 1..full.len() {
            let mut buf = BytesMut::from(&full[..cut]);
            assert!(FrameParser::parse(&mut buf).unwrap().is_none(), "cut at {cut}");
            assert_eq!(buf.len(), cut);
        }
    }

    #[test]
    fn test_pipelined() {
        let frames = parse_all(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nTIME\r\n");
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_inline() {
        let frames = parse_all(b"NOTIFICATION.INSERT d1 temp \"{\\\"v\\\": 1}\"\r\n");
        assert_eq!(
            frames,
            vec![Frame::array(vec![
                Frame::bulk("NOTIFICATION.INSERT"),
                Frame::bulk("d1"),
                Frame::bulk("temp"),
                Frame::bulk("{\"v\": 1}"),
            ])]
        );
        assert_eq!(parse_all(b"\r\n"), vec![Frame::array(vec![])]);
        assert_eq!(parse_all(b"X \"\"\r\n"), vec![Frame::array(vec![Frame::bulk("X"), Frame::bulk("")])]);
    }

    #[test]
    fn test_errors() {
        let mut buf = BytesMut::from(&b"$abc\r\n"[..]);
        assert!(FrameParser::parse(&mut buf).is_err());
        let mut buf = BytesMut::from(&b"$3\r\nabcXY"[..]);
        assert!(FrameParser::parse(&mut buf).is_err());
        let mut buf = BytesMut::from(&b"PING \"open\r\n"[..]);
        assert!(FrameParser::parse(&mut buf).is_err());
    }

    #[test]
    fn test_encode() {
        let frame = Frame::array(vec![
            Frame::simple("PONG"),
            Frame::integer(7),
            Frame::bulk("hi"),
            Frame::nil(),
            Frame::optional(None::<String>),
        ]);
        assert_eq!(frame.encode(), b"*5\r\n+PONG\r\n:7\r\n$2\r\nhi\r\n$-1\r\n$-1\r\n".to_vec());
        assert_eq!(parse_all(&frame.encode()), vec![frame]);
    }
}
