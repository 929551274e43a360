//! IEEE-488.2 common commands, shared by every device
//!
//! Devices implement [`Ieee488`] and pull the routes in with
//! `routes.include(common::NAME, common::routes)`.  The module also holds
//! the argument helpers used by device handlers, which convert bad input
//! into queued instrument errors instead of failing the request.
use chrono::Local;
use emu::{
    errors, reply, ArgError, Args, Emulator, ErrorQueue, InstrumentError,
    Reply, RouteBuilder,
};
use log::debug;
use std::ops::RangeInclusive;

/// Name under which the capability is included
pub const NAME: &str = "ieee488";

/// Value reported for readings that cannot be taken (SCPI "not a number")
pub const OVERFLOW: f64 = 9.91e37;

/// Device-side hooks needed by the common commands
pub trait Ieee488: Emulator {
    /// Identity string reported by `*IDN?` unless overridden by options
    const IDENTITY: &'static str;

    /// Returns the device's error queue
    fn errors(&mut self) -> &mut ErrorQueue;

    /// Returns the identity string, honoring the `identity` option
    fn identity(&self) -> &str {
        self.options().str_or("identity", Self::IDENTITY)
    }
}

/// Declares the common command routes
pub fn routes<E: Ieee488>(routes: RouteBuilder<E>) -> RouteBuilder<E> {
    routes
        .route(r"\*IDN\?", |s, _| reply(s.identity().to_owned()))
        .route(r"\*RST", |s, _| {
            s.reset();
            None
        })
        .route(r"\*CLS", |s, _| {
            s.errors().clear();
            None
        })
        .route(r"\*OPC\?", |_, _| reply(1))
        .route(r"\*OPC", |_, _| None)
        .route(r"\*WAI", |_, _| None)
        .route(r"\*TST\?", |_, _| reply(0))
        .route(r"\*(?:IDN\?|RST|CLS|OPC\??|WAI|TST\?)\s+.*", |s, args| {
            fail(s, errors::PARAMETER_NOT_ALLOWED.detail(args.line()))
        })
        .route(r":?SYST(?:EM)?:ERR(?:OR)?(?::NEXT)?\?", |s, _| {
            reply(s.errors().next().to_string())
        })
        .route(r":?SYST(?:EM)?:ERR(?:OR)?:COUN(?:T)?\?", |s, _| {
            reply(s.errors().len())
        })
        .route(r":?SYST(?:EM)?:DATE\?", |_, _| {
            reply(Local::now().format("%Y,%m,%d").to_string())
        })
        .route(r":?SYST(?:EM)?:TIME\?", |_, _| {
            reply(Local::now().format("%H,%M,%S").to_string())
        })
}

/// Catch-all handler: queues an "undefined header" error
pub fn unknown_command<E: Ieee488>(
    s: &mut E,
    args: &Args<'_>,
) -> Option<Reply> {
    debug!("{}: unknown command {:?}", E::NAME, args.line());
    fail(s, errors::UNDEFINED_HEADER.detail(args.line()))
}

/// Queues an error and sends nothing back
pub fn fail<E: Ieee488>(s: &mut E, e: InstrumentError) -> Option<Reply> {
    s.errors().push(e);
    None
}

/// Parses an SCPI boolean (`ON`, `OFF`, `1`, `0`)
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_uppercase().as_str() {
        "ON" | "1" => Some(true),
        "OFF" | "0" => Some(false),
        _ => None,
    }
}

/// Reads numeric argument `i`, queuing an error if it is absent, malformed
/// or outside `range`
pub fn number<E: Ieee488>(
    s: &mut E,
    args: &Args<'_>,
    i: usize,
    range: RangeInclusive<f64>,
) -> Option<f64> {
    let e = match args.parse::<f64>(i) {
        Ok(v) if v.is_finite() && range.contains(&v) => return Some(v),
        Ok(_) => errors::DATA_OUT_OF_RANGE,
        Err(ArgError::Missing(_)) => errors::MISSING_PARAMETER,
        Err(ArgError::Invalid { .. }) => errors::DATA_TYPE_ERROR,
    };
    fail(s, e.detail(args.line()));
    None
}

/// Reads boolean argument `i`, queuing an error if it is not recognized
pub fn boolean<E: Ieee488>(
    s: &mut E,
    args: &Args<'_>,
    i: usize,
) -> Option<bool> {
    let v = args.get(i).and_then(parse_bool);
    if v.is_none() {
        fail(s, errors::ILLEGAL_PARAMETER.detail(args.line()));
    }
    v
}

/// Formats a number in `%+.6E` style (`+1.234560E+03`)
///
/// Non-finite values are reported as [`OVERFLOW`].
pub fn scientific(v: f64) -> String {
    let v = if v.is_finite() { v } else { OVERFLOW };
    let s = format!("{v:+.6E}");
    let (mantissa, exp) = s.split_once('E').unwrap_or((s.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}E{sign}{:02}", exp.unsigned_abs())
}
