use benchtop_devices::Registry;
use emu::{Dispatch, Options, Reply, Response};
use proptest::prelude::*;

fn next_error(dev: &mut dyn Dispatch) -> String {
    match dev.handle("SYST:ERR?") {
        Some(Reply::One(Response::Text(t))) => t.text().to_owned(),
        other => panic!("unexpected reply {other:?}"),
    }
}

proptest! {
    #[test]
    fn unmatched_lines_reach_fallback(line in "ZZ[A-Z:?]{0,20}( [0-9.]{1,8})?") {
        for entry in Registry::default().iter() {
            let mut dev = entry.build(Options::new()).unwrap();
            prop_assert!(dev.handle(&line).is_none());
            let e = next_error(dev.as_mut());
            prop_assert!(e.starts_with("-113,"), "{}: {}", entry.name, e);
            prop_assert_eq!(next_error(dev.as_mut()), "0,\"No error\"");
        }
    }
}

#[test]
fn every_device_speaks_ieee488() {
    for entry in Registry::default().iter() {
        let mut dev = entry.build(Options::new()).unwrap();
        for q in ["*IDN?", "*OPC?", "*TST?", "SYST:ERR:COUN?", "SYST:TIME?"] {
            assert!(
                matches!(dev.handle(q), Some(Reply::One(_))),
                "{} did not answer {q}",
                entry.name
            );
        }
        assert!(dev.handle("*RST").is_none());
        assert!(dev.handle("*CLS").is_none());
    }
}

#[test]
fn error_queue_overflows() {
    let registry = Registry::default();
    let entry = registry.resolve("meter").unwrap();
    let mut dev = entry.build(Options::new()).unwrap();
    for _ in 0..15 {
        dev.handle("BOGUS");
    }
    let mut codes = vec![];
    loop {
        let e = next_error(dev.as_mut());
        if e.starts_with("0,") {
            break;
        }
        codes.push(e.split_once(',').unwrap().0.to_owned());
    }
    assert_eq!(codes.len(), 10);
    assert!(codes[..9].iter().all(|c| c == "-113"));
    assert_eq!(codes[9], "-350");
}
