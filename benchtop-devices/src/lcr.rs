//! Impedance (LCR) meter with an analog device-under-test model
//!
//! The simulated part is a capacitor with bias- and frequency-dependent
//! capacitance, a dielectric loss term and a little series inductance.
//! Every measurement is computed on demand from the current settings; the
//! only time dependence is a slow sinusoidal drift tied to the wall clock.
use crate::common::{self, fail, number, scientific, Ieee488};
use emu::{
    errors, reply, Args, BinaryResponse, ByteOrder, Emulator, ErrorQueue,
    Options, Reply, Response, RouteBuilder,
};
use rand::Rng;
use std::{
    f64::consts::TAU,
    fmt,
    ops::RangeInclusive,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

/// Legal stimulus frequencies, in Hz
pub const FREQUENCY_RANGE: RangeInclusive<f64> = 20.0..=2e6;
/// Legal stimulus amplitudes, in V
pub const AMPLITUDE_RANGE: RangeInclusive<f64> = 0.005..=20.0;
/// Legal DC bias and offset commands, in V
pub const BIAS_RANGE: RangeInclusive<f64> = -40.0..=40.0;
/// Supported cable length corrections, in m
pub const CABLE_LENGTHS: [u8; 4] = [0, 1, 2, 4];
/// Largest number of points in a sweep
pub const MAX_SWEEP_POINTS: usize = 1601;

/// Denominators smaller than this are treated as zero
const NEAR_ZERO: f64 = 1e-18;

/// Divides, returning zero when the denominator is near zero
fn div(n: f64, d: f64) -> f64 {
    if d.abs() < NEAR_ZERO {
        0.0
    } else {
        n / d
    }
}

/// Draws a normally distributed value, clamped to three standard deviations
fn gaussian<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random();
    let z = (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos();
    z.clamp(-3.0, 3.0) * sigma
}

/// Display model: how a raw `(R, X)` pair is reported
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Function {
    /// |Z| and phase in degrees
    Ztd,
    /// |Z| and phase in radians
    Ztr,
    /// |Y| and phase in degrees
    Ytd,
    /// |Y| and phase in radians
    Ytr,
    /// Parallel capacitance and parallel resistance
    #[default]
    Cprp,
    /// Series capacitance and series resistance
    Csrs,
    /// Parallel capacitance and dissipation factor
    Cpd,
    /// Series capacitance and dissipation factor
    Csd,
    /// Parallel inductance and parallel resistance
    Lprp,
    /// Series inductance and series resistance
    Lsrs,
    /// Resistance and reactance
    Rx,
}

impl Function {
    /// Every display model, in code order
    pub const ALL: [Function; 11] = [
        Function::Ztd,
        Function::Ztr,
        Function::Ytd,
        Function::Ytr,
        Function::Cprp,
        Function::Csrs,
        Function::Cpd,
        Function::Csd,
        Function::Lprp,
        Function::Lsrs,
        Function::Rx,
    ];

    /// Returns the command code for this model
    pub fn code(self) -> &'static str {
        match self {
            Function::Ztd => "ZTD",
            Function::Ztr => "ZTR",
            Function::Ytd => "YTD",
            Function::Ytr => "YTR",
            Function::Cprp => "CPRP",
            Function::Csrs => "CSRS",
            Function::Cpd => "CPD",
            Function::Csd => "CSD",
            Function::Lprp => "LPRP",
            Function::Lsrs => "LSRS",
            Function::Rx => "RX",
        }
    }

    /// Converts resistance and reactance at angular frequency `omega`
    pub fn transform(self, r: f64, x: f64, omega: f64) -> (f64, f64) {
        let z2 = r * r + x * x;
        let z = z2.sqrt();
        let theta = x.atan2(r);
        // Admittance Y = 1/Z = G + jB
        let g = div(r, z2);
        let b = div(-x, z2);
        match self {
            Function::Ztd => (z, theta.to_degrees()),
            Function::Ztr => (z, theta),
            Function::Ytd => (div(1.0, z), -theta.to_degrees()),
            Function::Ytr => (div(1.0, z), -theta),
            Function::Cprp => (div(b, omega), div(1.0, g)),
            Function::Csrs => (div(-1.0, omega * x), r),
            Function::Cpd => (div(b, omega), div(g, b.abs())),
            Function::Csd => (div(-1.0, omega * x), div(r, x.abs())),
            Function::Lprp => (div(-1.0, omega * b), div(1.0, g)),
            Function::Lsrs => (div(x, omega), r),
            Function::Rx => (r, x),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Function {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.code().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Measurement speed, which trades noise for time
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Aperture {
    /// Fast and noisy
    Short,
    /// Default integration time
    #[default]
    Medium,
    /// Slow and quiet
    Long,
}

impl Aperture {
    fn code(self) -> &'static str {
        match self {
            Aperture::Short => "SHOR",
            Aperture::Medium => "MED",
            Aperture::Long => "LONG",
        }
    }

    fn noise_scale(self) -> f64 {
        match self {
            Aperture::Short => 2.0,
            Aperture::Medium => 1.0,
            Aperture::Long => 0.5,
        }
    }
}

impl FromStr for Aperture {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHOR" | "SHORT" => Ok(Aperture::Short),
            "MED" | "MEDIUM" => Ok(Aperture::Medium),
            "LONG" => Ok(Aperture::Long),
            _ => Err(()),
        }
    }
}

/// Encoding used for sweep replies
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DataFormat {
    /// One text line per point
    #[default]
    Ascii,
    /// A binary block of 32-bit floats
    Real,
}

/// Open, short and load correction flags
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Correction {
    /// Open-circuit correction
    pub open: bool,
    /// Short-circuit correction
    pub short: bool,
    /// Load correction
    pub load: bool,
}

impl Correction {
    /// Returns the number of enabled corrections
    pub fn count(&self) -> u8 {
        u8::from(self.open) + u8::from(self.short) + u8::from(self.load)
    }
}

/// User-adjustable instrument settings, restored by `*RST`
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Stimulus frequency, in Hz
    pub frequency: f64,
    /// Stimulus amplitude, in V
    pub amplitude: f64,
    /// DC bias, in V
    pub bias: f64,
    /// DC offset added to the bias, in V
    pub offset: f64,
    /// Whether the stimulus is applied
    pub output: bool,
    /// Correction flags
    pub correction: Correction,
    /// Cable length correction, in m
    pub cable_length: u8,
    /// Measurement speed
    pub aperture: Aperture,
    /// Number of readings averaged per measurement
    pub averaging: u16,
    /// Selected display model
    pub function: Function,
    /// Sweep reply encoding
    pub format: DataFormat,
    /// Byte order for binary sweep replies
    pub byte_order: ByteOrder,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frequency: 1e3,
            amplitude: 1.0,
            bias: 0.0,
            offset: 0.0,
            output: false,
            correction: Correction::default(),
            cable_length: 0,
            aperture: Aperture::default(),
            averaging: 1,
            function: Function::default(),
            format: DataFormat::default(),
            byte_order: ByteOrder::Big,
        }
    }
}

/// Physical constants of the simulated part, read from options
#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    /// Nominal capacitance at zero bias and 1 kHz, in F
    pub capacitance: f64,
    /// Relative capacitance change per volt of bias
    pub bias_coefficient: f64,
    /// Bias magnitude beyond which the part no longer responds, in V
    pub bias_limit: f64,
    /// Relative capacitance change per decade above 1 kHz
    pub frequency_coefficient: f64,
    /// Dissipation factor at zero bias
    pub dissipation: f64,
    /// Extra dissipation factor per volt of bias
    pub dissipation_per_volt: f64,
    /// Fixture inductance without cable, in H
    pub inductance: f64,
    /// Relative noise at 1 V stimulus
    pub noise: f64,
    /// Relative drift amplitude
    pub drift: f64,
    /// Drift period, in seconds
    pub drift_period: f64,
    /// Relative error with no corrections enabled
    pub systematic_error: f64,
    /// Absolute noise of an idle measurement
    pub idle_noise: f64,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            capacitance: 100e-12,
            bias_coefficient: -0.004,
            bias_limit: 40.0,
            frequency_coefficient: -0.005,
            dissipation: 0.001,
            dissipation_per_volt: 0.0002,
            inductance: 10e-9,
            noise: 1e-5,
            drift: 5e-4,
            drift_period: 60.0,
            systematic_error: 0.01,
            idle_noise: 1e-6,
        }
    }
}

impl Model {
    /// Builds a model, overriding defaults with any numeric options
    pub fn from_options(options: &Options) -> Self {
        let d = Self::default();
        Self {
            capacitance: options.f64_or("capacitance", d.capacitance),
            bias_coefficient: options
                .f64_or("bias_coefficient", d.bias_coefficient),
            bias_limit: options.f64_or("bias_limit", d.bias_limit).abs(),
            frequency_coefficient: options
                .f64_or("frequency_coefficient", d.frequency_coefficient),
            dissipation: options.f64_or("dissipation", d.dissipation),
            dissipation_per_volt: options
                .f64_or("dissipation_per_volt", d.dissipation_per_volt),
            inductance: options.f64_or("inductance", d.inductance),
            noise: options.f64_or("noise", d.noise),
            drift: options.f64_or("drift", d.drift),
            drift_period: options.f64_or("drift_period", d.drift_period),
            systematic_error: options
                .f64_or("systematic_error", d.systematic_error),
            idle_noise: options.f64_or("idle_noise", d.idle_noise),
        }
    }

    /// Computes raw `(R, X)` in ohms
    ///
    /// `t` is the wall-clock time in seconds, which sets the drift phase.
    pub fn impedance<R: Rng + ?Sized>(
        &self,
        s: &Settings,
        frequency: f64,
        t: f64,
        rng: &mut R,
    ) -> (f64, f64) {
        let omega = TAU * frequency;
        let bias = (s.bias + s.offset).clamp(-self.bias_limit, self.bias_limit);

        let c = self.capacitance
            * (1.0 + self.bias_coefficient * bias)
            * (1.0 + self.frequency_coefficient * (frequency / 1e3).log10());
        let c = c.max(0.0);
        let d = self.dissipation + self.dissipation_per_volt * bias.abs();
        let esr = div(d, omega * c);
        let l = self.inductance * (1.0 + f64::from(s.cable_length));

        let r = esr;
        let x = omega * l - div(1.0, omega * c);

        let sigma = div(self.noise, s.amplitude) * s.aperture.noise_scale()
            / f64::from(s.averaging.max(1)).sqrt();
        let drift = if self.drift_period > 0.0 {
            1.0 + self.drift * (TAU * t / self.drift_period).sin()
        } else {
            1.0
        };
        let systematic = 1.0
            + self.systematic_error
                * (1.0 - f64::from(s.correction.count()) / 3.0);
        let scale = drift * systematic;
        (
            r * (1.0 + gaussian(rng, sigma)) * scale,
            x * (1.0 + gaussian(rng, sigma)) * scale,
        )
    }

    /// Computes one reading in the selected display model
    pub fn measure<R: Rng + ?Sized>(
        &self,
        s: &Settings,
        frequency: f64,
        t: f64,
        rng: &mut R,
    ) -> (f64, f64) {
        if !s.output {
            return (
                gaussian(rng, self.idle_noise),
                gaussian(rng, self.idle_noise),
            );
        }
        let (r, x) = self.impedance(s, frequency, t, rng);
        s.function.transform(r, x, TAU * frequency)
    }
}

/// Seconds since the Unix epoch, as a float
fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Returns `n` logarithmically spaced points from `start` to `stop`
pub fn log_space(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let ratio = (stop / start).ln();
            (0..n)
                .map(|i| start * (ratio * i as f64 / (n - 1) as f64).exp())
                .collect()
        }
    }
}

/// An emulated LCR meter
pub struct Lcr {
    options: Options,
    model: Model,
    settings: Settings,
    errors: ErrorQueue,
}

impl Lcr {
    /// Builds a meter, reading model constants from `options`
    pub fn new(options: Options) -> Self {
        Self {
            model: Model::from_options(&options),
            options,
            settings: Settings::default(),
            errors: ErrorQueue::new(),
        }
    }

    /// Returns the current settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the device model
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Borrows the error queue
    pub fn error_queue(&self) -> &ErrorQueue {
        &self.errors
    }

    /// Takes one reading at the configured frequency
    pub fn measure(&self) -> (f64, f64) {
        self.model.measure(
            &self.settings,
            self.settings.frequency,
            wall_clock(),
            &mut rand::rng(),
        )
    }

    fn reading(&self) -> Option<Reply> {
        let (a, b) = self.measure();
        reply(format!("{},{}", scientific(a), scientific(b)))
    }

    fn sweep(&mut self, args: &Args<'_>) -> Option<Reply> {
        let parts: Vec<&str> = args.str(0).unwrap_or("").split(',').collect();
        let [start, stop, points] = parts[..] else {
            return fail(self, errors::MISSING_PARAMETER.detail(args.line()));
        };
        let (Ok(start), Ok(stop), Ok(points)) = (
            start.trim().parse::<f64>(),
            stop.trim().parse::<f64>(),
            points.trim().parse::<usize>(),
        ) else {
            return fail(self, errors::DATA_TYPE_ERROR.detail(args.line()));
        };
        if !FREQUENCY_RANGE.contains(&start)
            || !FREQUENCY_RANGE.contains(&stop)
            || !(1..=MAX_SWEEP_POINTS).contains(&points)
        {
            return fail(self, errors::DATA_OUT_OF_RANGE.detail(args.line()));
        }

        let t = wall_clock();
        let mut rng = rand::rng();
        let values: Vec<(f64, f64)> = log_space(start, stop, points)
            .into_iter()
            .map(|f| self.model.measure(&self.settings, f, t, &mut rng))
            .collect();
        match self.settings.format {
            DataFormat::Ascii => Some(Reply::Lines(
                values
                    .iter()
                    .map(|(a, b)| {
                        Response::from(format!(
                            "{},{}",
                            scientific(*a),
                            scientific(*b)
                        ))
                    })
                    .collect(),
            )),
            DataFormat::Real => {
                let flat: Vec<f32> = values
                    .iter()
                    .flat_map(|&(a, b)| [a as f32, b as f32])
                    .collect();
                reply(BinaryResponse::from_f32(
                    &flat,
                    self.settings.byte_order,
                ))
            }
        }
    }

    fn set_correction(&mut self, args: &Args<'_>) -> Option<Reply> {
        let on = common::boolean(self, args, 1)?;
        if let Some(flag) = self.correction_flag(args) {
            *flag = on;
        }
        None
    }

    fn correction_flag(&mut self, args: &Args<'_>) -> Option<&mut bool> {
        let c = &mut self.settings.correction;
        match args.get(0)?.to_ascii_uppercase().as_str() {
            "OPEN" => Some(&mut c.open),
            "SHOR" | "SHORT" => Some(&mut c.short),
            "LOAD" => Some(&mut c.load),
            _ => None,
        }
    }

    fn set_aperture(&mut self, args: &Args<'_>) -> Option<Reply> {
        let Ok(aperture) = args.str(0).unwrap_or("").parse::<Aperture>() else {
            return fail(self, errors::ILLEGAL_PARAMETER.detail(args.line()));
        };
        let averaging = match args.get(1) {
            None => self.settings.averaging,
            Some(_) => match args.parse::<u16>(1) {
                Ok(n @ 1..=256) => n,
                Ok(_) => {
                    return fail(
                        self,
                        errors::DATA_OUT_OF_RANGE.detail(args.line()),
                    )
                }
                Err(_) => {
                    return fail(
                        self,
                        errors::DATA_TYPE_ERROR.detail(args.line()),
                    )
                }
            },
        };
        self.settings.aperture = aperture;
        self.settings.averaging = averaging;
        None
    }

    fn set_cable_length(&mut self, args: &Args<'_>) -> Option<Reply> {
        let v = number(self, args, 0, 0.0..=4.0)?;
        match CABLE_LENGTHS.into_iter().find(|&n| f64::from(n) == v) {
            Some(n) => self.settings.cable_length = n,
            None => {
                fail(self, errors::ILLEGAL_PARAMETER.detail(args.line()));
            }
        }
        None
    }
}

impl Default for Lcr {
    fn default() -> Self {
        Self::new(Options::new())
    }
}

impl Emulator for Lcr {
    const NAME: &'static str = "lcr";

    fn declare(routes: RouteBuilder<Self>) -> RouteBuilder<Self> {
        routes
            .case_insensitive()
            .route(r":?FREQ(?:UENCY)?(?::CW)?\s+(.+)", |s, args| {
                if let Some(v) = number(s, args, 0, FREQUENCY_RANGE) {
                    s.settings.frequency = v;
                }
                None
            })
            .route(r":?FREQ(?:UENCY)?(?::CW)?\?", |s, _| {
                reply(scientific(s.settings.frequency))
            })
            .route(r":?VOLT(?:AGE)?(?::LEV(?:EL)?)?\s+(.+)", |s, args| {
                if let Some(v) = number(s, args, 0, AMPLITUDE_RANGE) {
                    s.settings.amplitude = v;
                }
                None
            })
            .route(r":?VOLT(?:AGE)?(?::LEV(?:EL)?)?\?", |s, _| {
                reply(scientific(s.settings.amplitude))
            })
            .route(r":?BIAS:VOLT(?:AGE)?(?::LEV(?:EL)?)?\s+(.+)", |s, args| {
                if let Some(v) = number(s, args, 0, BIAS_RANGE) {
                    s.settings.bias = v;
                }
                None
            })
            .route(r":?BIAS:VOLT(?:AGE)?(?::LEV(?:EL)?)?\?", |s, _| {
                reply(scientific(s.settings.bias))
            })
            .route(r":?BIAS:OFFS(?:ET)?\s+(.+)", |s, args| {
                if let Some(v) = number(s, args, 0, BIAS_RANGE) {
                    s.settings.offset = v;
                }
                None
            })
            .route(r":?BIAS:OFFS(?:ET)?\?", |s, _| {
                reply(scientific(s.settings.offset))
            })
            .route(r":?OUTP(?:UT)?(?::STAT(?:E)?)?\s+(.+)", |s, args| {
                if let Some(on) = common::boolean(s, args, 0) {
                    s.settings.output = on;
                }
                None
            })
            .route(r":?OUTP(?:UT)?(?::STAT(?:E)?)?\?", |s, _| {
                reply(s.settings.output)
            })
            .route(
                r":?CORR(?:ECTION)?:(OPEN|SHOR(?:T)?|LOAD)(?::STAT(?:E)?)?\s+(.+)",
                Lcr::set_correction,
            )
            .route(
                r":?CORR(?:ECTION)?:(OPEN|SHOR(?:T)?|LOAD)(?::STAT(?:E)?)?\?",
                |s, args| reply(s.correction_flag(args).is_some_and(|f| *f)),
            )
            .route(r":?CORR(?:ECTION)?:LENG(?:TH)?\s+(.+)", Lcr::set_cable_length)
            .route(r":?CORR(?:ECTION)?:LENG(?:TH)?\?", |s, _| {
                reply(s.settings.cable_length)
            })
            .route(r":?APER(?:TURE)?\s+(\w+)(?:\s*,\s*(.+))?", Lcr::set_aperture)
            .route(r":?APER(?:TURE)?\?", |s, _| {
                let a = s.settings.aperture.code();
                reply(format!("{a},{}", s.settings.averaging))
            })
            .route(r":?FUNC(?:TION)?:IMP(?:EDANCE)?(?::TYPE)?\s+(.+)", |s, args| {
                match args.str(0).unwrap_or("").parse::<Function>() {
                    Ok(f) => s.settings.function = f,
                    Err(()) => {
                        fail(s, errors::ILLEGAL_PARAMETER.detail(args.line()));
                    }
                }
                None
            })
            .route(r":?FUNC(?:TION)?:IMP(?:EDANCE)?(?::TYPE)?\?", |s, _| {
                reply(s.settings.function.code())
            })
            .route(r":?FETC(?:H)?(?::IMP(?:EDANCE)?)?\?", |s, _| s.reading())
            .route(r":?MEAS(?:URE)?(?::IMP(?:EDANCE)?)?\?", |s, _| {
                s.reading()
            })
            .route(r":?SWE(?:EP)?:DATA\?\s+(.+)", Lcr::sweep)
            .route(r":?FORM(?:AT)?(?::DATA)?\s+(\w+)", |s, args| {
                match args.str(0).unwrap_or("").to_ascii_uppercase().as_str() {
                    "ASC" | "ASCII" => s.settings.format = DataFormat::Ascii,
                    "REAL" => s.settings.format = DataFormat::Real,
                    _ => {
                        fail(s, errors::ILLEGAL_PARAMETER.detail(args.line()));
                    }
                }
                None
            })
            .route(r":?FORM(?:AT)?(?::DATA)?\?", |s, _| {
                reply(match s.settings.format {
                    DataFormat::Ascii => "ASC",
                    DataFormat::Real => "REAL",
                })
            })
            .route(r":?FORM(?:AT)?:BORD(?:ER)?\s+(\w+)", |s, args| {
                match args.str(0).unwrap_or("").to_ascii_uppercase().as_str() {
                    "NORM" | "NORMAL" => s.settings.byte_order = ByteOrder::Big,
                    "SWAP" | "SWAPPED" => {
                        s.settings.byte_order = ByteOrder::Little
                    }
                    _ => {
                        fail(s, errors::ILLEGAL_PARAMETER.detail(args.line()));
                    }
                }
                None
            })
            .route(r":?FORM(?:AT)?:BORD(?:ER)?\?", |s, _| {
                reply(match s.settings.byte_order {
                    ByteOrder::Big => "NORM",
                    ByteOrder::Little => "SWAP",
                })
            })
            .include(common::NAME, common::routes)
            .fallback(common::unknown_command)
    }

    fn reset(&mut self) {
        self.settings = Settings::default();
        self.errors.clear();
    }

    fn options(&self) -> &Options {
        &self.options
    }
}

impl Ieee488 for Lcr {
    const IDENTITY: &'static str = "BENCHTOP,LCR-2000,EMU00001,1.0";

    fn errors(&mut self) -> &mut ErrorQueue {
        &mut self.errors
    }
}
