//! Wire encoding of handler results
//!
//! A [`Response`] is one encoded element of a reply: text in a chosen
//! [`Encoding`], an IEEE-488.2 definite-length binary block, or raw bytes
//! passed through untouched.  A [`Reply`] is what a handler returns, either
//! a single response or several that the transport writes as separate
//! lines.
use std::fmt;
use thiserror::Error;
use zerocopy::{
    byteorder::{BigEndian, LittleEndian, F32, I16},
    FromBytes, IntoBytes,
};

/// Marker byte that opens a definite-length block
pub const BLOCK_MARKER: u8 = b'#';

/// Largest payload whose length fits in a single-digit length-of-length
pub const MAX_BLOCK_PAYLOAD: usize = 999_999_999;

/// Character encoding used for text responses
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// 7-bit ASCII
    #[default]
    Ascii,
    /// ISO 8859-1, one byte per code point below 256
    Latin1,
    /// UTF-8
    Utf8,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Encoding::Ascii => "ascii",
            Encoding::Latin1 => "latin-1",
            Encoding::Utf8 => "utf-8",
        };
        f.write_str(s)
    }
}

/// Errors raised while encoding or decoding a response
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A character has no representation in the target encoding
    #[error("{c:?} cannot be encoded as {encoding}")]
    Unencodable {
        /// Offending character
        c: char,
        /// Target encoding
        encoding: Encoding,
    },
    /// A byte is not valid in the source encoding
    #[error("byte {byte:#04x} is not valid {encoding}")]
    Undecodable {
        /// Offending byte
        byte: u8,
        /// Source encoding
        encoding: Encoding,
    },
    /// Input is not valid UTF-8
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    /// Payload is too large for a definite-length block header
    #[error("{0} byte payload does not fit in a definite-length block")]
    BlockTooLarge(usize),
}

impl Encoding {
    /// Encodes a string, failing on characters outside the encoding
    pub fn encode(self, s: &str) -> Result<Vec<u8>, EncodeError> {
        let max = match self {
            Encoding::Utf8 => return Ok(s.as_bytes().to_vec()),
            Encoding::Ascii => 0x7F,
            Encoding::Latin1 => 0xFF,
        };
        s.chars()
            .map(|c| match u8::try_from(u32::from(c)) {
                Ok(b) if b <= max => Ok(b),
                _ => Err(EncodeError::Unencodable { c, encoding: self }),
            })
            .collect()
    }

    /// Decodes bytes that were produced by [`Encoding::encode`]
    pub fn decode(self, bytes: &[u8]) -> Result<String, EncodeError> {
        match self {
            Encoding::Utf8 => Ok(String::from_utf8(bytes.to_vec())?),
            Encoding::Latin1 => {
                Ok(bytes.iter().map(|&b| char::from(b)).collect())
            }
            Encoding::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        Ok(char::from(b))
                    } else {
                        Err(EncodeError::Undecodable {
                            byte: b,
                            encoding: self,
                        })
                    }
                })
                .collect(),
        }
    }
}

/// Byte order for packed numeric payloads
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Most significant byte first (SCPI `NORMal`)
    #[default]
    Big,
    /// Least significant byte first (SCPI `SWAPped`)
    Little,
}

/// A text reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextResponse {
    text: String,
    encoding: Encoding,
}

impl TextResponse {
    /// Builds a text response from anything printable
    pub fn new(value: impl fmt::Display, encoding: Encoding) -> Self {
        Self {
            text: value.to_string(),
            encoding,
        }
    }

    /// Builds an ASCII text response
    pub fn ascii(value: impl fmt::Display) -> Self {
        Self::new(value, Encoding::Ascii)
    }

    /// Returns the unencoded text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the encoding applied on the wire
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encodes the text
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        self.encoding.encode(&self.text)
    }
}

/// Errors raised while parsing a definite-length block
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    /// Input does not start with [`BLOCK_MARKER`]
    #[error("block does not start with '#'")]
    MissingMarker,
    /// The length-of-length byte is not a digit in `1..=9`
    #[error("invalid length-of-length byte {0:#04x}")]
    BadDigitCount(u8),
    /// The length field contains a non-digit
    #[error("invalid length field {0:?}")]
    BadLength(String),
    /// Fewer bytes are available than the header promises
    #[error("block truncated: expected {expected} bytes, got {got}")]
    Truncated {
        /// Bytes promised by the header
        expected: usize,
        /// Bytes actually present
        got: usize,
    },
}

/// A binary reply, framed as a definite-length block on the wire
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryResponse {
    payload: Vec<u8>,
}

impl BinaryResponse {
    /// Wraps an arbitrary payload
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Packs a sequence of 32-bit floats
    pub fn from_f32(values: &[f32], order: ByteOrder) -> Self {
        let payload = match order {
            ByteOrder::Big => values
                .iter()
                .map(|&v| F32::<BigEndian>::new(v))
                .collect::<Vec<_>>()
                .as_bytes()
                .to_vec(),
            ByteOrder::Little => values
                .iter()
                .map(|&v| F32::<LittleEndian>::new(v))
                .collect::<Vec<_>>()
                .as_bytes()
                .to_vec(),
        };
        Self { payload }
    }

    /// Packs a sequence of 16-bit signed integers
    pub fn from_i16(values: &[i16], order: ByteOrder) -> Self {
        let payload = match order {
            ByteOrder::Big => values
                .iter()
                .map(|&v| I16::<BigEndian>::new(v))
                .collect::<Vec<_>>()
                .as_bytes()
                .to_vec(),
            ByteOrder::Little => values
                .iter()
                .map(|&v| I16::<LittleEndian>::new(v))
                .collect::<Vec<_>>()
                .as_bytes()
                .to_vec(),
        };
        Self { payload }
    }

    /// Unpacks the payload as 32-bit floats
    ///
    /// Returns `None` if the payload length is not a multiple of four.
    pub fn to_f32(&self, order: ByteOrder) -> Option<Vec<f32>> {
        match order {
            ByteOrder::Big => <[F32<BigEndian>]>::ref_from_bytes(&self.payload)
                .ok()
                .map(|v| v.iter().map(|f| f.get()).collect()),
            ByteOrder::Little => {
                <[F32<LittleEndian>]>::ref_from_bytes(&self.payload)
                    .ok()
                    .map(|v| v.iter().map(|f| f.get()).collect())
            }
        }
    }

    /// Returns the unframed payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serializes the payload with its `#<n><len>` header
    pub fn to_block(&self) -> Result<Vec<u8>, EncodeError> {
        let n = self.payload.len();
        if n > MAX_BLOCK_PAYLOAD {
            return Err(EncodeError::BlockTooLarge(n));
        }
        let len = n.to_string();
        let mut out = Vec::with_capacity(2 + len.len() + n);
        out.push(BLOCK_MARKER);
        out.push(b'0' + len.len() as u8);
        out.extend_from_slice(len.as_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parses a definite-length block from the front of `data`
    ///
    /// Returns the block and any bytes that follow it.
    pub fn parse_block(data: &[u8]) -> Result<(Self, &[u8]), BlockError> {
        let Some((&BLOCK_MARKER, rest)) = data.split_first() else {
            return Err(BlockError::MissingMarker);
        };
        let Some((&digits, rest)) = rest.split_first() else {
            return Err(BlockError::Truncated {
                expected: 1,
                got: 0,
            });
        };
        if !(b'1'..=b'9').contains(&digits) {
            return Err(BlockError::BadDigitCount(digits));
        }
        let digits = usize::from(digits - b'0');
        if rest.len() < digits {
            return Err(BlockError::Truncated {
                expected: digits,
                got: rest.len(),
            });
        }
        let (len, rest) = rest.split_at(digits);
        let len_str = String::from_utf8_lossy(len);
        let n = if len.iter().all(u8::is_ascii_digit) {
            len_str.parse::<usize>().ok()
        } else {
            None
        }
        .ok_or_else(|| BlockError::BadLength(len_str.into_owned()))?;
        if rest.len() < n {
            return Err(BlockError::Truncated {
                expected: n,
                got: rest.len(),
            });
        }
        let (payload, rest) = rest.split_at(n);
        Ok((Self::new(payload), rest))
    }
}

/// Bytes written to the wire exactly as given, without block framing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResponse {
    payload: Vec<u8>,
}

impl RawResponse {
    /// Wraps a payload
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Returns the payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// A single wire-ready reply element
#[derive(Clone, Debug)]
pub enum Response {
    /// Encoded text
    Text(TextResponse),
    /// Definite-length binary block
    Binary(BinaryResponse),
    /// Passthrough bytes
    Raw(RawResponse),
}

impl Response {
    /// Encodes this response into the bytes written on the wire
    ///
    /// The termination sequence is not included; see [`Reply::encode`].
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Response::Text(t) => t.encode(),
            Response::Binary(b) => b.to_block(),
            Response::Raw(r) => Ok(r.payload.clone()),
        }
    }

    /// Returns the text of a text response
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Response::Text(t) => Some(t.text()),
            _ => None,
        }
    }
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        match (self.encode(), other.encode()) {
            (Ok(a), Ok(b)) => a == b,
            // Unencodable values compare by content
            (Err(_), Err(_)) => match (self, other) {
                (Response::Text(a), Response::Text(b)) => a == b,
                (Response::Binary(a), Response::Binary(b)) => a == b,
                _ => false,
            },
            _ => false,
        }
    }
}

impl PartialEq<str> for Response {
    fn eq(&self, other: &str) -> bool {
        match self {
            Response::Text(t) => t.text == other,
            _ => self.eq(other.as_bytes()),
        }
    }
}

impl PartialEq<&str> for Response {
    fn eq(&self, other: &&str) -> bool {
        self.eq(*other)
    }
}

impl PartialEq<[u8]> for Response {
    fn eq(&self, other: &[u8]) -> bool {
        self.encode().is_ok_and(|b| b == other)
    }
}

impl PartialEq<&[u8]> for Response {
    fn eq(&self, other: &&[u8]) -> bool {
        self.eq(*other)
    }
}

impl From<TextResponse> for Response {
    fn from(t: TextResponse) -> Self {
        Response::Text(t)
    }
}

impl From<BinaryResponse> for Response {
    fn from(b: BinaryResponse) -> Self {
        Response::Binary(b)
    }
}

impl From<RawResponse> for Response {
    fn from(r: RawResponse) -> Self {
        Response::Raw(r)
    }
}

impl From<&str> for Response {
    fn from(s: &str) -> Self {
        Response::Text(TextResponse::ascii(s))
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Response::Text(TextResponse {
            text,
            encoding: Encoding::Ascii,
        })
    }
}

/// SCPI booleans are reported as `1` and `0`
impl From<bool> for Response {
    fn from(b: bool) -> Self {
        Response::from(if b { "1" } else { "0" })
    }
}

/// Byte vectors become binary blocks
impl From<Vec<u8>> for Response {
    fn from(payload: Vec<u8>) -> Self {
        Response::Binary(BinaryResponse { payload })
    }
}

macro_rules! numeric_response {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Response {
                fn from(v: $t) -> Self {
                    Response::Text(TextResponse::ascii(v))
                }
            }
        )*
    };
}
numeric_response!(f32, f64, i8, i16, i32, i64, u8, u16, u32, u64, usize);

/// Normalizes a handler value into a [`Response`]
pub fn make_response(value: impl Into<Response>) -> Response {
    value.into()
}

/// Everything a handler sends back for one line
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// A single response
    One(Response),
    /// Several responses, each written as its own line
    Lines(Vec<Response>),
}

impl Reply {
    /// Returns the responses in wire order
    pub fn responses(&self) -> &[Response] {
        match self {
            Reply::One(r) => std::slice::from_ref(r),
            Reply::Lines(v) => v,
        }
    }

    /// Encodes every response, appending `termination` after each one
    pub fn encode(&self, termination: &[u8]) -> Result<Vec<u8>, EncodeError> {
        let mut out = vec![];
        for r in self.responses() {
            out.extend(r.encode()?);
            out.extend_from_slice(termination);
        }
        Ok(out)
    }
}

impl From<Response> for Reply {
    fn from(r: Response) -> Self {
        Reply::One(r)
    }
}

impl From<Vec<Response>> for Reply {
    fn from(v: Vec<Response>) -> Self {
        Reply::Lines(v)
    }
}

/// Shorthand for handlers: wraps a value as `Some(Reply::One(..))`
pub fn reply(value: impl Into<Response>) -> Option<Reply> {
    Some(Reply::One(value.into()))
}
