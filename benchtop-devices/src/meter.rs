//! Source-measure unit with randomized readings
use crate::common::{self, number, scientific, Ieee488, OVERFLOW};
use emu::{reply, Emulator, ErrorQueue, Options, RouteBuilder};
use rand::Rng;
use std::ops::RangeInclusive;

/// Legal source voltages, in V
pub const VOLTAGE_RANGE: RangeInclusive<f64> = -210.0..=210.0;
/// Legal current ranges, in A
pub const CURRENT_RANGE: RangeInclusive<f64> = 1e-9..=1.05;

/// An emulated source-measure unit
///
/// `READ?` returns a uniformly distributed value between the
/// `min_reading` and `max_reading` options.  The `MEAS` queries follow
/// Ohm's law across a resistive load of `load_resistance` ohms.
pub struct Meter {
    options: Options,
    errors: ErrorQueue,
    voltage: f64,
    current_range: f64,
    output: bool,
}

impl Meter {
    /// Builds a meter with the given options
    pub fn new(options: Options) -> Self {
        Self {
            options,
            errors: ErrorQueue::new(),
            voltage: 0.0,
            current_range: 0.1,
            output: false,
        }
    }

    /// Returns the programmed source voltage
    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    /// Returns the current measurement range
    pub fn current_range(&self) -> f64 {
        self.current_range
    }

    /// Checks whether the output is enabled
    pub fn output(&self) -> bool {
        self.output
    }

    /// Takes a randomized reading
    pub fn read(&self) -> f64 {
        if !self.output {
            return OVERFLOW;
        }
        let a = self.options.f64_or("min_reading", 0.0);
        let b = self.options.f64_or("max_reading", 1.0);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        if (hi - lo).is_finite() {
            rand::rng().random_range(lo..=hi)
        } else {
            // Interpolate so the span itself is never computed
            let t: f64 = rand::rng().random();
            (lo * (1.0 - t) + hi * t).clamp(lo, hi)
        }
    }

    fn measured_voltage(&self) -> f64 {
        if self.output {
            self.voltage
        } else {
            0.0
        }
    }

    fn measured_current(&self) -> f64 {
        let load = self.options.f64_or("load_resistance", 1e3);
        if !self.output || load <= 0.0 {
            return 0.0;
        }
        let i = self.voltage / load;
        if i.abs() > self.current_range {
            OVERFLOW
        } else {
            i
        }
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new(Options::new())
    }
}

impl Emulator for Meter {
    const NAME: &'static str = "meter";

    fn declare(routes: RouteBuilder<Self>) -> RouteBuilder<Self> {
        routes
            .case_insensitive()
            .route(r":?SOUR(?:CE)?:VOLT(?:AGE)?(?::LEV(?:EL)?)?\s+(.+)", |s, args| {
                if let Some(v) = number(s, args, 0, VOLTAGE_RANGE) {
                    s.voltage = v;
                }
                None
            })
            .route(r":?SOUR(?:CE)?:VOLT(?:AGE)?(?::LEV(?:EL)?)?\?", |s, _| {
                reply(scientific(s.voltage))
            })
            .route(r":?SENS(?:E)?:CURR(?:ENT)?:RANG(?:E)?\s+(.+)", |s, args| {
                if let Some(v) = number(s, args, 0, CURRENT_RANGE) {
                    s.current_range = v;
                }
                None
            })
            .route(r":?SENS(?:E)?:CURR(?:ENT)?:RANG(?:E)?\?", |s, _| {
                reply(scientific(s.current_range))
            })
            .route(r":?OUTP(?:UT)?(?::STAT(?:E)?)?\s+(.+)", |s, args| {
                if let Some(on) = common::boolean(s, args, 0) {
                    s.output = on;
                }
                None
            })
            .route(r":?OUTP(?:UT)?(?::STAT(?:E)?)?\?", |s, _| reply(s.output))
            .route(r":?READ\?", |s, _| reply(scientific(s.read())))
            .route(r":?MEAS(?:URE)?:VOLT(?:AGE)?(?::DC)?\?", |s, _| {
                reply(scientific(s.measured_voltage()))
            })
            .route(r":?MEAS(?:URE)?:CURR(?:ENT)?(?::DC)?\?", |s, _| {
                reply(scientific(s.measured_current()))
            })
            .include(common::NAME, common::routes)
            .fallback(common::unknown_command)
    }

    fn reset(&mut self) {
        let d = Self::default();
        self.voltage = d.voltage;
        self.current_range = d.current_range;
        self.output = d.output;
        self.errors.clear();
    }

    fn options(&self) -> &Options {
        &self.options
    }
}

impl Ieee488 for Meter {
    const IDENTITY: &'static str = "BENCHTOP,SMU-200,EMU00003,1.0";

    fn errors(&mut self) -> &mut ErrorQueue {
        &mut self.errors
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_bounds() {
        let mut m = Meter::new(
            Options::new()
                .with("min_reading", 2.0)
                .with("max_reading", 3.0),
        );
        assert_eq!(m.read(), OVERFLOW);
        m.output = true;
        for _ in 0..100 {
            let v = m.read();
            assert!((2.0..=3.0).contains(&v), "{v}");
        }
    }

    #[test]
    fn read_extreme_bounds() {
        let mut m = Meter::new(
            Options::new()
                .with("min_reading", -1e308)
                .with("max_reading", 1e308),
        );
        m.output = true;
        for _ in 0..100 {
            let v = m.read();
            assert!(v.is_finite() && (-1e308..=1e308).contains(&v), "{v}");
        }

        let mut m = Meter::new(
            Options::new()
                .with("min_reading", 4.0)
                .with("max_reading", 4.0),
        );
        m.output = true;
        assert_eq!(m.read(), 4.0);
    }

    #[test]
    fn ohms_law() {
        let mut m = Meter::new(Options::new().with("load_resistance", 100.0));
        m.voltage = 5.0;
        assert_eq!(m.measured_current(), 0.0);
        m.output = true;
        assert_eq!(m.measured_voltage(), 5.0);
        assert!((m.measured_current() - 0.05).abs() < 1e-12);
        m.current_range = 1e-3;
        assert_eq!(m.measured_current(), OVERFLOW);
    }
}
