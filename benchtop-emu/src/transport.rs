//! Line framing and per-message latency
use log::warn;
use rand::Rng;
use std::{collections::VecDeque, fmt, str::FromStr, time::Duration};
use thiserror::Error;

/// Largest number of bytes buffered while waiting for a terminator
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Byte sequence that separates protocol lines
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum Termination {
    /// Carriage return (`\r`)
    Cr,
    /// Line feed (`\n`)
    #[default]
    Lf,
    /// Carriage return followed by line feed (`\r\n`)
    #[cfg_attr(feature = "clap", value(name = "crlf"))]
    CrLf,
}

impl Termination {
    /// Returns the terminator bytes
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Termination::Cr => b"\r",
            Termination::Lf => b"\n",
            Termination::CrLf => b"\r\n",
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::Cr => "cr",
            Termination::Lf => "lf",
            Termination::CrLf => "crlf",
        };
        f.write_str(s)
    }
}

/// Error returned when parsing an unknown termination name
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown termination {0:?} (expected cr, lf or crlf)")]
pub struct UnknownTermination(pub String);

impl FromStr for Termination {
    type Err = UnknownTermination;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cr" | "\r" | "\\r" => Ok(Termination::Cr),
            "lf" | "\n" | "\\n" => Ok(Termination::Lf),
            "crlf" | "cr-lf" | "\r\n" | "\\r\\n" => Ok(Termination::CrLf),
            _ => Err(UnknownTermination(s.to_owned())),
        }
    }
}

/// Artificial latency applied before each message is handled
///
/// The actual delay is `fixed` plus a uniformly distributed amount between
/// zero and `jitter`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Delay {
    /// Constant part of the delay
    pub fixed: Duration,
    /// Upper bound of the random part of the delay
    pub jitter: Duration,
}

impl Delay {
    /// No delay at all
    pub const NONE: Self = Self {
        fixed: Duration::ZERO,
        jitter: Duration::ZERO,
    };

    /// A constant delay
    pub fn fixed(fixed: Duration) -> Self {
        Self {
            fixed,
            jitter: Duration::ZERO,
        }
    }

    /// A constant delay plus up to `jitter` of random delay
    pub fn jittered(fixed: Duration, jitter: Duration) -> Self {
        Self { fixed, jitter }
    }

    /// Checks whether this delay never sleeps
    pub fn is_zero(&self) -> bool {
        self.fixed.is_zero() && self.jitter.is_zero()
    }

    /// Picks a delay
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.jitter.is_zero() {
            self.fixed
        } else {
            let j = rng.random_range(0.0..=self.jitter.as_secs_f64());
            self.fixed + Duration::from_secs_f64(j)
        }
    }

    /// Sleeps for a sampled delay
    pub fn wait(&self) {
        if !self.is_zero() {
            std::thread::sleep(self.sample(&mut rand::rng()));
        }
    }
}

/// Splits a byte stream into protocol lines
///
/// Lines are yielded without their terminator and with surrounding ASCII
/// whitespace trimmed; empty lines are skipped.  Bytes after the last
/// terminator stay buffered until more data arrives.  A line longer than
/// the buffer limit is discarded in full, up to and including its
/// terminator, however it is split across reads.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    lines: VecDeque<String>,
    termination: Termination,
    limit: usize,
    discarding: bool,
}

impl LineBuffer {
    /// Builds an empty buffer with the default limit
    pub fn new(termination: Termination) -> Self {
        Self::with_limit(termination, MAX_LINE_BYTES)
    }

    /// Builds an empty buffer that accepts lines of at most `limit` bytes
    pub fn with_limit(termination: Termination, limit: usize) -> Self {
        Self {
            buf: vec![],
            lines: VecDeque::new(),
            termination,
            limit,
            discarding: false,
        }
    }

    /// Appends newly received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        let term = self.termination.as_bytes();

        let mut start = 0;
        while let Some(i) = find(&self.buf[start..], term) {
            let line = &self.buf[start..start + i];
            if self.discarding {
                self.discarding = false;
            } else if line.len() > self.limit {
                warn!("discarding {} byte line", line.len());
            } else {
                let line = line.trim_ascii();
                if !line.is_empty() {
                    self.lines
                        .push_back(String::from_utf8_lossy(line).into_owned());
                }
            }
            start += i + term.len();
        }
        self.buf.drain(..start);

        // A partial terminator may sit at the end of the buffer
        let keep = term.len() - 1;
        if self.buf.len() > self.limit + keep {
            if !self.discarding {
                warn!("discarding oversized line");
                self.discarding = true;
            }
            self.buf.drain(..self.buf.len() - keep);
        }
    }

    /// Returns the number of bytes not yet framed into lines
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete, non-empty line
    pub fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
