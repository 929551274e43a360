//! Relay switch box
//!
//! Channels are addressed by row letter and column number (`A1`, `C12`)
//! and are given in SCPI channel lists such as `(@A1,B2)` or `(@A1:B3)`.
use crate::common::{self, fail, Ieee488};
use emu::{
    errors, reply, Args, Emulator, ErrorQueue, InstrumentError, Options,
    Reply, RouteBuilder,
};
use std::{collections::BTreeSet, fmt};

/// Default number of rows
pub const DEFAULT_ROWS: u8 = 8;
/// Default number of columns
pub const DEFAULT_COLUMNS: u16 = 12;

/// One relay, by zero-based row and one-based column
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel {
    /// Row index, where 0 is `A`
    pub row: u8,
    /// Column number, starting at 1
    pub column: u16,
}

impl Channel {
    /// Builds a channel from a row index and column number
    pub fn new(row: u8, column: u16) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", char::from(b'A' + self.row), self.column)
    }
}

/// An emulated relay matrix
pub struct Relay {
    options: Options,
    rows: u8,
    columns: u16,
    closed: BTreeSet<Channel>,
    errors: ErrorQueue,
}

impl Relay {
    /// Builds a relay box, reading its geometry from `options`
    pub fn new(options: Options) -> Self {
        let rows = options.u64_or("rows", u64::from(DEFAULT_ROWS)).clamp(1, 26);
        let columns = options
            .u64_or("columns", u64::from(DEFAULT_COLUMNS))
            .clamp(1, 999);
        Self {
            rows: rows as u8,
            columns: columns as u16,
            options,
            closed: BTreeSet::new(),
            errors: ErrorQueue::new(),
        }
    }

    /// Returns the matrix size as `(rows, columns)`
    pub fn geometry(&self) -> (u8, u16) {
        (self.rows, self.columns)
    }

    /// Iterates over closed channels in sorted order
    pub fn closed(&self) -> impl Iterator<Item = Channel> + '_ {
        self.closed.iter().copied()
    }

    fn parse_channel(&self, s: &str) -> Result<Channel, InstrumentError> {
        let s = s.trim();
        let malformed = || errors::DATA_TYPE_ERROR.detail(s);
        let mut chars = s.chars();
        let row = chars
            .next()
            .filter(char::is_ascii_alphabetic)
            .ok_or_else(malformed)?;
        let column: u16 = chars.as_str().parse().map_err(|_| malformed())?;
        let row = row.to_ascii_uppercase() as u8 - b'A';
        if row >= self.rows || column == 0 || column > self.columns {
            return Err(errors::DATA_OUT_OF_RANGE.detail(s));
        }
        Ok(Channel::new(row, column))
    }

    /// Parses a channel list, expanding `A1:B2` ranges
    pub fn parse_list(&self, s: &str) -> Result<Vec<Channel>, InstrumentError> {
        let inner = s
            .trim()
            .strip_prefix("(@")
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| errors::DATA_TYPE_ERROR.detail(s.trim()))?;
        if inner.trim().is_empty() {
            return Ok(vec![]);
        }
        let mut out = vec![];
        for item in inner.split(',') {
            match item.split_once(':') {
                Some((a, b)) => {
                    let a = self.parse_channel(a)?;
                    let b = self.parse_channel(b)?;
                    for row in a.row.min(b.row)..=a.row.max(b.row) {
                        let cols = a.column.min(b.column)..=a.column.max(b.column);
                        out.extend(cols.map(|c| Channel::new(row, c)));
                    }
                }
                None => out.push(self.parse_channel(item)?),
            }
        }
        Ok(out)
    }

    fn with_list(
        &mut self,
        args: &Args<'_>,
        f: fn(&mut Self, Vec<Channel>) -> Option<Reply>,
    ) -> Option<Reply> {
        match self.parse_list(args.str(0).unwrap_or("")) {
            Ok(list) => f(self, list),
            Err(e) => fail(self, e),
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(Options::new())
    }
}

fn list_reply(channels: impl IntoIterator<Item = Channel>) -> Option<Reply> {
    let names: Vec<String> =
        channels.into_iter().map(|c| c.to_string()).collect();
    reply(format!("(@{})", names.join(",")))
}

impl Emulator for Relay {
    const NAME: &'static str = "relay";

    fn declare(routes: RouteBuilder<Self>) -> RouteBuilder<Self> {
        routes
            .case_insensitive()
            .route(r":?ROUT(?:E)?:CLOS(?:E)?\s+(.+)", |s, args| {
                s.with_list(args, |s, list| {
                    s.closed.extend(list);
                    None
                })
            })
            .route(r":?ROUT(?:E)?:OPEN\s+(.+)", |s, args| {
                s.with_list(args, |s, list| {
                    for c in list {
                        s.closed.remove(&c);
                    }
                    None
                })
            })
            .route(r":?ROUT(?:E)?:OPEN:ALL", |s, _| {
                s.closed.clear();
                None
            })
            .route(r":?ROUT(?:E)?:CLOS(?:E)?\?", |s, _| list_reply(s.closed()))
            .route(r":?ROUT(?:E)?:CLOS(?:E)?\?\s+(.+)", |s, args| {
                s.with_list(args, |s, list| {
                    let states: Vec<&str> = list
                        .iter()
                        .map(|c| if s.closed.contains(c) { "1" } else { "0" })
                        .collect();
                    reply(states.join(","))
                })
            })
            .route(r":?ROUT(?:E)?:OPEN\?\s+(.+)", |s, args| {
                s.with_list(args, |s, list| {
                    let states: Vec<&str> = list
                        .iter()
                        .map(|c| if s.closed.contains(c) { "0" } else { "1" })
                        .collect();
                    reply(states.join(","))
                })
            })
            .include(common::NAME, common::routes)
            .fallback(common::unknown_command)
    }

    fn reset(&mut self) {
        self.closed.clear();
        self.errors.clear();
    }

    fn options(&self) -> &Options {
        &self.options
    }
}

impl Ieee488 for Relay {
    const IDENTITY: &'static str = "BENCHTOP,RELAY-8x12,EMU00002,1.0";

    fn errors(&mut self) -> &mut ErrorQueue {
        &mut self.errors
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_names() {
        assert_eq!(Channel::new(0, 1).to_string(), "A1");
        assert_eq!(Channel::new(7, 12).to_string(), "H12");
    }

    #[test]
    fn channel_lists() {
        let r = Relay::default();
        assert_eq!(
            r.parse_list("(@a1, B2)").unwrap(),
            [Channel::new(0, 1), Channel::new(1, 2)]
        );
        assert_eq!(r.parse_list("(@A1:B2)").unwrap().len(), 4);
        assert!(r.parse_list("(@)").unwrap().is_empty());
        assert_eq!(r.parse_list("A1").unwrap_err().code, -104);
        assert_eq!(r.parse_list("(@1A)").unwrap_err().code, -104);
        assert_eq!(r.parse_list("(@A13)").unwrap_err().code, -222);
        assert_eq!(r.parse_list("(@Z1)").unwrap_err().code, -222);
        assert_eq!(r.parse_list("(@A0)").unwrap_err().code, -222);
    }

    #[test]
    fn geometry_options() {
        let r = Relay::new(Options::new().with("rows", 2).with("columns", 4));
        assert_eq!(r.geometry(), (2, 4));
        assert_eq!(r.parse_list("(@C1)").unwrap_err().code, -222);
        assert!(r.parse_list("(@B4)").is_ok());
    }
}
