use benchtop_devices::lcr::{Aperture, DataFormat, Function, Lcr, Settings};
use emu::{BinaryResponse, ByteOrder, Instrument, Options, Reply, Response};

fn lcr() -> Instrument<Lcr> {
    Instrument::new(Lcr::default()).unwrap()
}

fn query(dev: &mut Instrument<Lcr>, line: &str) -> String {
    match dev.handle(line) {
        Some(Reply::One(r)) => r.as_text().unwrap().to_owned(),
        other => panic!("unexpected reply to {line:?}: {other:?}"),
    }
}

fn pair(s: &str) -> (f64, f64) {
    let (a, b) = s.split_once(',').unwrap();
    (a.parse().unwrap(), b.parse().unwrap())
}

fn next_error(dev: &mut Instrument<Lcr>) -> i32 {
    let e = query(dev, "SYST:ERR?");
    e.split_once(',').unwrap().0.parse().unwrap()
}

#[test]
fn output_disabled_reads_near_zero() {
    let mut dev = lcr();
    dev.handle("OUTP OFF");
    for _ in 0..20 {
        let (a, b) = pair(&query(&mut dev, "FETC?"));
        assert!(a.is_finite() && b.is_finite());
        assert!(a.abs() <= 0.01 && b.abs() <= 0.01, "{a} {b}");
    }
}

#[test]
fn parallel_cp_rp_at_100khz() {
    let mut dev = lcr();
    for cmd in ["OUTP ON", "FREQ 100000", "BIAS:VOLT 0", "FUNC:IMP CPRP"] {
        assert!(dev.handle(cmd).is_none());
    }
    assert_eq!(next_error(&mut dev), 0);

    let (cp1, rp1) = pair(&query(&mut dev, "MEAS?"));
    let (cp2, rp2) = pair(&query(&mut dev, "FETC?"));
    for v in [cp1, rp1, cp2, rp2] {
        assert!(v.is_finite() && v > 0.0, "{v}");
    }
    // Close to the nominal 100 pF, give or take the systematic error
    assert!((cp1 / 100e-12 - 1.0).abs() < 0.05, "{cp1}");
    assert!((cp1 / cp2 - 1.0).abs() < 1e-3, "{cp1} {cp2}");
    assert!((rp1 / rp2 - 1.0).abs() < 1e-2, "{rp1} {rp2}");
}

#[test]
fn reply_formatting() {
    let mut dev = lcr();
    dev.handle("FREQ 2.5e3");
    assert_eq!(query(&mut dev, "FREQ?"), "+2.500000E+03");
    assert_eq!(query(&mut dev, ":frequency?"), "+2.500000E+03");
    dev.handle("OUTP 1");
    assert_eq!(query(&mut dev, "OUTP?"), "1");
    let r = query(&mut dev, "FETC?");
    let (a, b) = r.split_once(',').unwrap();
    for part in [a, b] {
        assert_eq!(part.len(), "+1.000000E-10".len(), "{r}");
        assert!(part.starts_with(['+', '-']), "{r}");
    }
}

#[test]
fn range_and_type_errors() {
    let mut dev = lcr();
    dev.handle("FREQ 10");
    assert_eq!(next_error(&mut dev), -222);
    dev.handle("FREQ fast");
    assert_eq!(next_error(&mut dev), -104);
    dev.handle("VOLT 25");
    assert_eq!(next_error(&mut dev), -222);
    dev.handle("BIAS:VOLT -41");
    assert_eq!(next_error(&mut dev), -222);
    dev.handle("OUTP maybe");
    assert_eq!(next_error(&mut dev), -224);
    dev.handle("CORR:LENG 3");
    assert_eq!(next_error(&mut dev), -224);
    dev.handle("APER FAST");
    assert_eq!(next_error(&mut dev), -224);
    dev.handle("APER LONG,300");
    assert_eq!(next_error(&mut dev), -222);
    dev.handle("TRIG:SOUR BUS");
    assert_eq!(next_error(&mut dev), -113);
    assert_eq!(next_error(&mut dev), 0);

    assert_eq!(dev.state().settings(), &Settings::default());
}

#[test]
fn unknown_display_model() {
    let mut dev = lcr();
    dev.handle("FUNC:IMP LSD");
    assert_eq!(next_error(&mut dev), -224);
    assert_eq!(query(&mut dev, "FUNC:IMP?"), "CPRP");
    dev.handle("func:imp ztd");
    assert_eq!(query(&mut dev, "FUNC:IMP?"), "ZTD");
    dev.handle("OUTP ON");
    let (z, theta) = pair(&query(&mut dev, "FETC?"));
    assert!(z > 1e6, "{z}");
    assert!((theta + 90.0).abs() < 1.0, "{theta}");
}

#[test]
fn reset_is_total() {
    let mut dev = lcr();
    for cmd in [
        "FREQ 1e5",
        "VOLT 2",
        "BIAS:VOLT 5",
        "BIAS:OFFS 1",
        "OUTP ON",
        "CORR:OPEN:STAT ON",
        "CORR:SHOR ON",
        "CORR:LOAD:STAT 1",
        "CORR:LENG 2",
        "APER LONG,16",
        "FUNC:IMP CSD",
        "FORM:DATA REAL",
        "FORM:BORD SWAP",
        "NOT:A:COMMAND",
    ] {
        dev.handle(cmd);
    }
    let s = dev.state().settings().clone();
    assert_eq!(s.frequency, 1e5);
    assert_eq!(s.cable_length, 2);
    assert_eq!(s.aperture, Aperture::Long);
    assert_eq!(s.averaging, 16);
    assert_eq!(s.function, Function::Csd);
    assert_eq!(s.format, DataFormat::Real);
    assert_eq!(s.byte_order, ByteOrder::Little);
    assert_eq!(s.correction.count(), 3);
    assert_eq!(query(&mut dev, "CORR:SHOR?"), "1");
    assert_eq!(query(&mut dev, "APER?"), "LONG,16");

    dev.handle("*RST");
    assert_eq!(dev.state().settings(), &Settings::default());
    assert!(dev.state().error_queue().is_empty());
    assert_eq!(query(&mut dev, "FORM:BORD?"), "NORM");
    assert_eq!(query(&mut dev, "CORR:LENG?"), "0");
}

#[test]
fn ascii_sweep() {
    let mut dev = lcr();
    dev.handle("OUTP ON");
    let Some(Reply::Lines(lines)) = dev.handle("SWE:DATA? 1e3,1e5,3") else {
        panic!("expected a multi-line reply");
    };
    assert_eq!(lines.len(), 3);
    for l in &lines {
        let (cp, rp) = pair(l.as_text().unwrap());
        assert!(cp > 0.0 && rp > 0.0);
    }
}

#[test]
fn binary_sweep() {
    let mut dev = lcr();
    dev.handle("OUTP ON");
    dev.handle("FORM:DATA REAL");
    dev.handle("FORM:BORD SWAP");
    let Some(Reply::One(Response::Binary(b))) =
        dev.handle("SWE:DATA? 100,1000,5")
    else {
        panic!("expected a binary reply");
    };
    assert_eq!(b.payload().len(), 5 * 2 * 4);
    let values = b.to_f32(ByteOrder::Little).unwrap();
    assert!(values.iter().all(|v| *v > 0.0));

    let block = b.to_block().unwrap();
    assert_eq!(&block[..4], b"#240");
    let (parsed, rest) = BinaryResponse::parse_block(&block).unwrap();
    assert_eq!(parsed, b);
    assert!(rest.is_empty());
}

#[test]
fn sweep_errors() {
    let mut dev = lcr();
    assert!(dev.handle("SWE:DATA? 1e3,1e5").is_none());
    assert_eq!(next_error(&mut dev), -109);
    assert!(dev.handle("SWE:DATA? a,b,c").is_none());
    assert_eq!(next_error(&mut dev), -104);
    assert!(dev.handle("SWE:DATA? 1,1e5,3").is_none());
    assert_eq!(next_error(&mut dev), -222);
    assert!(dev.handle("SWE:DATA? 1e3,1e5,0").is_none());
    assert_eq!(next_error(&mut dev), -222);
}

#[test]
fn identity_from_options() {
    let dev = Lcr::new(Options::new().with("identity", "ACME,E4980A,1,2"));
    let mut dev = Instrument::new(dev).unwrap();
    assert_eq!(query(&mut dev, "*IDN?"), "ACME,E4980A,1,2");
    assert!(query(&mut lcr(), "*IDN?").contains("LCR"));
}
