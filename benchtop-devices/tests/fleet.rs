use benchtop_devices::{Fleet, FleetConfig, FleetError, Registry};
use std::{
    io::{BufRead, BufReader, Write},
    net::{TcpListener, TcpStream},
    time::Duration,
};

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(text.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn ask(port: u16, request: &[u8], terminator: u8) -> String {
    let mut s = TcpStream::connect(("127.0.0.1", port)).unwrap();
    s.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    s.write_all(request).unwrap();
    let mut out = vec![];
    BufReader::new(s).read_until(terminator, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn start_query_and_shutdown() {
    let (lcr_port, relay_port) = (free_port(), free_port());
    let file = write_config(&format!(
        r#"{{
            "version": 1,
            "emulators": {{
                "lcr": {{ "type": "lcr", "port": {lcr_port},
                          "options": {{ "identity": "ACME,LCR,1,1" }} }},
                "relay": {{ "type": "urn:benchtop:emulator:benchtop:relay-8x12",
                            "port": {relay_port} }}
            }}
        }}"#
    ));
    let config = FleetConfig::load(file.path()).unwrap();
    let plans = config.resolve(&Registry::default()).unwrap();
    let fleet = Fleet::start(plans).unwrap();
    assert_eq!(fleet.servers().len(), 2);
    assert_eq!(fleet.get("relay").unwrap().local_addr().port(), relay_port);

    assert_eq!(ask(lcr_port, b"*IDN?\n", b'\n'), "ACME,LCR,1,1\n");
    // The relay family uses CRLF
    assert_eq!(
        ask(relay_port, b"ROUT:CLOS (@A1)\r\nROUT:CLOS?\r\n", b'\n'),
        "(@A1)\r\n"
    );

    fleet.shutdown();
    assert!(TcpStream::connect(("127.0.0.1", lcr_port)).is_err());
    TcpListener::bind(("127.0.0.1", relay_port)).unwrap();
}

#[test]
fn unknown_type_fails_before_binding() {
    let port = free_port();
    let file = write_config(&format!(
        r#"{{"version": 1, "emulators": {{
            "a": {{ "type": "lcr", "port": {port} }},
            "b": {{ "type": "oscilloscope", "port": 1 }}
        }}}}"#
    ));
    let config = FleetConfig::load(file.path()).unwrap();
    let err = config.resolve(&Registry::default()).err().unwrap();
    assert!(matches!(err, FleetError::UnknownType { ref name, .. } if name == "b"));
    // Nothing was bound
    TcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[test]
fn bind_failure_rolls_back() {
    let busy = TcpListener::bind("127.0.0.1:0").unwrap();
    let busy_port = busy.local_addr().unwrap().port();
    let free = free_port();
    // Entries start in name order, so "a" is running when "b" fails
    let file = write_config(&format!(
        r#"{{"version": 1, "emulators": {{
            "a": {{ "type": "meter", "port": {free} }},
            "b": {{ "type": "meter", "port": {busy_port} }}
        }}}}"#
    ));
    let config = FleetConfig::load(file.path()).unwrap();
    let plans = config.resolve(&Registry::default()).unwrap();
    let err = Fleet::start(plans).err().unwrap();
    assert!(matches!(err, FleetError::Bind { port, .. } if port == busy_port));
    TcpListener::bind(("127.0.0.1", free)).unwrap();
}

#[test]
fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = FleetConfig::load(dir.path().join("fleet.json")).unwrap_err();
    assert!(matches!(err, FleetError::Io { .. }));
    assert!(err.to_string().contains("fleet.json"));
}

#[test]
fn config_round_trip() {
    let text = r#"{"version": 1, "emulators": {"m": {
        "type": "smu", "port": 5025, "delay": 0.25,
        "options": {"max_reading": 5.0}
    }}}"#;
    let config: FleetConfig = text.parse().unwrap();
    let again: FleetConfig =
        serde_json::to_string(&config).unwrap().parse().unwrap();
    assert_eq!(config, again);
}
