//! Wire protocol framing for talking to cluster nodes.
//!
//! Requests are always arrays of bulk strings. Replies are decoded into the
//! tagged [`Reply`] union; the decoder reports "incomplete" until a whole frame,
//! including every declared bulk byte and its trailing CRLF, is buffered.

use std::borrow::Cow;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Record separator used by the protocol.
const CRLF: &[u8] = b"\r\n";

/// Largest bulk payload accepted from a node.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Deepest array nesting accepted from a node. Cluster replies nest at most
/// three levels.
const MAX_DEPTH: usize = 32;

/// Errors raised while framing replies.
#[derive(Error, Debug)]
pub enum RespError {
    #[error("Unknown reply type tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("Invalid length header: {0}")]
    InvalidLength(String),

    #[error("Invalid integer reply: {0}")]
    InvalidInteger(String),

    #[error("Bulk payload not terminated by CRLF")]
    MissingTerminator,

    #[error("Arrays nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+` status line.
    Simple(String),
    /// `-` error line, without the tag.
    Error(String),
    /// `:` integer.
    Integer(i64),
    /// `$` bulk string.
    Bulk(Bytes),
    /// `*` multi-bulk.
    Array(Vec<Reply>),
    /// Null bulk (`$-1`) or null array (`*-1`).
    Nil,
}

impl Reply {
    /// Check for the `+OK` status.
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Simple(s) if s == "OK")
    }

    /// Error text, if this is an error reply.
    pub fn as_error(&self) -> Option<&str> {
        match self {
            Reply::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Textual content of status and bulk replies.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Reply::Simple(s) => Some(Cow::Borrowed(s)),
            Reply::Bulk(b) => Some(String::from_utf8_lossy(b)),
            _ => None,
        }
    }

    /// Integer content; numeric status or bulk text is accepted too.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            Reply::Simple(_) | Reply::Bulk(_) => self.as_text()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Elements of an array reply.
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Consume the reply and return its array elements.
    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(items) => Some(items),
            Reply::Nil => Some(Vec::new()),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "{}", s),
            Reply::Error(e) => write!(f, "(error) {}", e),
            Reply::Integer(i) => write!(f, "{}", i),
            Reply::Bulk(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Reply::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Reply::Nil => write!(f, "(nil)"),
        }
    }
}

/// Conversion into a binary-safe command argument.
pub trait IntoArg {
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for &Bytes {
    fn into_arg(self) -> Bytes {
        self.clone()
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

macro_rules! numeric_arg {
    ($($t:ty),*) => {
        $(impl IntoArg for $t {
            fn into_arg(self) -> Bytes {
                Bytes::from(self.to_string())
            }
        })*
    };
}

numeric_arg!(u16, u32, u64, i64, usize);

/// An ordered list of binary-safe arguments, verb first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Start a command with its verb.
    pub fn new(verb: impl IntoArg) -> Self {
        Self {
            args: vec![verb.into_arg()],
        }
    }

    /// Build a command from already split arguments.
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        Self {
            args: args.into_iter().map(IntoArg::into_arg).collect(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl IntoArg) -> Self {
        self.args.push(arg.into_arg());
        self
    }

    /// Append several arguments.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.args.extend(args.into_iter().map(IntoArg::into_arg));
        self
    }

    /// Arguments in order.
    pub fn as_args(&self) -> &[Bytes] {
        &self.args
    }

    /// Serialize as an array of bulk strings.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(16 + self.args.iter().map(|a| a.len() + 16).sum::<usize>());
        dst.put_u8(b'*');
        dst.put_slice(self.args.len().to_string().as_bytes());
        dst.put_slice(CRLF);
        for arg in &self.args {
            dst.put_u8(b'$');
            dst.put_slice(arg.len().to_string().as_bytes());
            dst.put_slice(CRLF);
            dst.put_slice(arg);
            dst.put_slice(CRLF);
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

/// Codec framing commands out and replies in.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

impl Encoder<&Command> for RespCodec {
    type Error = RespError;

    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

impl Decoder for RespCodec {
    type Item = Reply;
    type Error = RespError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_reply(src, 0, 0)? {
            Some((reply, consumed)) => {
                src.advance(consumed);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }
}

/// Find the next CRLF-terminated line starting at `pos`.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let end = rest.windows(2).position(|w| w == CRLF)?;
    Some((rest.get(..end)?, pos + end + 2))
}

fn parse_length(line: &[u8]) -> Result<i64, RespError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| RespError::InvalidLength(String::from_utf8_lossy(line).into_owned()))?;
    let len: i64 = text
        .trim()
        .parse()
        .map_err(|_| RespError::InvalidLength(text.to_string()))?;
    if !(-1..=MAX_BULK_LEN).contains(&len) {
        return Err(RespError::InvalidLength(text.to_string()));
    }
    Ok(len)
}

/// Parse one reply starting at `pos`, `depth` arrays deep. `Ok(None)` means
/// more bytes are needed.
fn parse_reply(
    buf: &[u8],
    pos: usize,
    depth: usize,
) -> Result<Option<(Reply, usize)>, RespError> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match tag {
        b'+' => Ok(Some((
            Reply::Simple(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b'-' => Ok(Some((
            Reply::Error(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b':' => {
            let text = String::from_utf8_lossy(line);
            let value = text
                .trim()
                .parse()
                .map_err(|_| RespError::InvalidInteger(text.to_string()))?;
            Ok(Some((Reply::Integer(value), next)))
        }
        b'$' => {
            let len = parse_length(line)?;
            if len < 0 {
                return Ok(Some((Reply::Nil, next)));
            }
            let len = len as usize;
            let end = next + len;
            if buf.len() < end + CRLF.len() {
                return Ok(None);
            }
            if buf.get(end..end + CRLF.len()) != Some(CRLF) {
                return Err(RespError::MissingTerminator);
            }
            let payload = buf.get(next..end).unwrap_or_default();
            Ok(Some((
                Reply::Bulk(Bytes::copy_from_slice(payload)),
                end + CRLF.len(),
            )))
        }
        b'*' => {
            let count = parse_length(line)?;
            if count < 0 {
                return Ok(Some((Reply::Nil, next)));
            }
            if depth >= MAX_DEPTH {
                return Err(RespError::TooDeep(MAX_DEPTH));
            }
            let mut items = Vec::with_capacity((count as usize).min(1024));
            let mut cursor = next;
            for _ in 0..count {
                match parse_reply(buf, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(items), cursor)))
        }
        other => Err(RespError::UnknownTag(other)),
    }
}
