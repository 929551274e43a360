//! Launching a set of emulators from one configuration file
//!
//! A fleet file is a JSON document:
//!
//! ```json
//! {
//!     "version": 1,
//!     "emulators": {
//!         "bench-lcr": { "type": "lcr", "port": 5025 },
//!         "switch": {
//!             "type": "urn:benchtop:emulator:benchtop:relay-8x12",
//!             "hostname": "0.0.0.0",
//!             "port": 5026,
//!             "termination": "crlf",
//!             "delay": 0.01,
//!             "options": { "rows": 4 }
//!         }
//!     }
//! }
//! ```
use crate::registry::{Constructor, Registry, RegistryError};
use emu::{
    transport::UnknownTermination, Delay, Options, RouteError, Server,
    ServerConfig, ServerHandle, Target, Termination,
};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

/// Fleet file format version understood by this crate
pub const FLEET_VERSION: u32 = 1;

/// Interface used when an entry gives no hostname
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Errors from loading or starting a fleet
#[derive(Debug, Error)]
pub enum FleetError {
    /// The file could not be read
    #[error("could not read {}", .path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// The document is not valid
    #[error("invalid fleet file")]
    Parse(#[from] serde_json::Error),
    /// The version stamp is not supported
    #[error("unsupported fleet version {0} (expected {FLEET_VERSION})")]
    Version(u32),
    /// An entry names an unknown type
    #[error("emulator {name:?} has an unknown type")]
    UnknownType {
        /// Entry name
        name: String,
        /// Lookup failure
        #[source]
        source: RegistryError,
    },
    /// An entry has a bad termination
    #[error("emulator {name:?} has an invalid termination")]
    Termination {
        /// Entry name
        name: String,
        /// Parse failure
        #[source]
        source: UnknownTermination,
    },
    /// An entry has a negative or non-finite delay
    #[error("emulator {name:?} has an invalid delay ({value} s)")]
    Delay {
        /// Entry name
        name: String,
        /// Offending value
        value: f64,
    },
    /// An emulator could not be constructed
    #[error("could not build emulator {name:?}")]
    Build {
        /// Entry name
        name: String,
        /// Route table failure
        #[source]
        source: RouteError,
    },
    /// A listener could not be started
    #[error("could not start emulator {name:?} on {host}:{port}")]
    Bind {
        /// Entry name
        name: String,
        /// Requested interface
        host: String,
        /// Requested port
        port: u16,
        /// Socket failure
        #[source]
        source: io::Error,
    },
}

/// One emulator in a fleet file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmulatorSpec {
    /// Type name, alias or URN
    #[serde(rename = "type")]
    pub kind: String,
    /// Interface to bind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Port to bind
    pub port: u16,
    /// `cr`, `lf` or `crlf`; defaults to the type's family terminator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<String>,
    /// Fixed delay before each message, in seconds
    #[serde(default)]
    pub delay: f64,
    /// Random extra delay before each message, in seconds
    #[serde(default)]
    pub jitter: f64,
    /// Builds a separate instance for every connection
    #[serde(default)]
    pub per_connection: bool,
    /// Construction options
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// A parsed fleet file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    /// Format version
    pub version: u32,
    /// Emulators by name
    pub emulators: BTreeMap<String, EmulatorSpec>,
}

impl FromStr for FleetConfig {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = serde_json::from_str(s)?;
        if config.version != FLEET_VERSION {
            return Err(FleetError::Version(config.version));
        }
        Ok(config)
    }
}

/// A fleet entry whose type has been resolved, ready to start
pub struct Planned {
    /// Entry name
    pub name: String,
    /// Canonical type name
    pub urn: String,
    /// Listener settings
    pub config: ServerConfig,
    /// Instance constructor
    pub constructor: Constructor,
    /// Construction options
    pub options: Options,
    /// Whether each connection gets its own instance
    pub per_connection: bool,
}

fn seconds(name: &str, value: f64) -> Result<Duration, FleetError> {
    Duration::try_from_secs_f64(value).map_err(|_| FleetError::Delay {
        name: name.to_owned(),
        value,
    })
}

impl FleetConfig {
    /// Reads and parses a fleet file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FleetError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|source| FleetError::Io {
                path: path.to_owned(),
                source,
            })?;
        text.parse()
    }

    /// Resolves every entry against the registry
    ///
    /// Nothing is bound here, so an unknown type fails before any socket
    /// is opened.
    pub fn resolve(
        &self,
        registry: &Registry,
    ) -> Result<Vec<Planned>, FleetError> {
        self.emulators
            .iter()
            .map(|(name, spec)| {
                let entry = registry.resolve(&spec.kind).map_err(|source| {
                    FleetError::UnknownType {
                        name: name.clone(),
                        source,
                    }
                })?;
                let termination = match &spec.termination {
                    Some(t) => t.parse::<Termination>().map_err(|source| {
                        FleetError::Termination {
                            name: name.clone(),
                            source,
                        }
                    })?,
                    None => entry.termination,
                };
                let delay = Delay::jittered(
                    seconds(name, spec.delay)?,
                    seconds(name, spec.jitter)?,
                );
                Ok(Planned {
                    name: name.clone(),
                    urn: entry.urn(),
                    config: ServerConfig {
                        name: name.clone(),
                        host: spec
                            .hostname
                            .clone()
                            .unwrap_or_else(|| DEFAULT_HOST.to_owned()),
                        port: spec.port,
                        termination,
                        delay,
                    },
                    constructor: entry.constructor,
                    options: spec.options.clone().into(),
                    per_connection: spec.per_connection,
                })
            })
            .collect()
    }
}

/// A set of running emulators
pub struct Fleet {
    servers: Vec<ServerHandle>,
}

impl Fleet {
    /// Starts one server per planned entry
    ///
    /// If any server fails to start, those already running are shut down
    /// before the error is returned.
    pub fn start(plans: Vec<Planned>) -> Result<Self, FleetError> {
        let mut servers = vec![];
        for p in plans {
            match Self::start_one(p) {
                Ok(h) => servers.push(h),
                Err(e) => {
                    for h in servers {
                        h.shutdown();
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { servers })
    }

    fn start_one(p: Planned) -> Result<ServerHandle, FleetError> {
        let target = if p.per_connection {
            let (ctor, options) = (p.constructor, p.options);
            Target::per_connection(move || ctor(options.clone()))
        } else {
            let dev = (p.constructor)(p.options).map_err(|source| {
                FleetError::Build {
                    name: p.name.clone(),
                    source,
                }
            })?;
            Target::shared(dev)
        };
        let bind_error = |source| FleetError::Bind {
            name: p.name.clone(),
            host: p.config.host.clone(),
            port: p.config.port,
            source,
        };
        let h = Server::bind(p.config.clone(), target)
            .and_then(Server::spawn)
            .map_err(bind_error)?;
        info!("{} ({}) on {}", p.name, p.urn, h.local_addr());
        Ok(h)
    }

    /// Returns the running servers, ordered by entry name
    pub fn servers(&self) -> &[ServerHandle] {
        &self.servers
    }

    /// Finds a running server by entry name
    pub fn get(&self, name: &str) -> Option<&ServerHandle> {
        self.servers.iter().find(|s| s.name() == name)
    }

    /// Stops every server
    pub fn shutdown(self) {
        for h in self.servers {
            h.shutdown();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_minimal() {
        let c: FleetConfig = r#"{"version": 1, "emulators": {
            "a": {"type": "lcr", "port": 0}
        }}"#
        .parse()
        .unwrap();
        let a = &c.emulators["a"];
        assert_eq!(a.kind, "lcr");
        assert_eq!(a.hostname, None);
        assert_eq!(a.delay, 0.0);
        assert!(a.options.is_empty());
    }

    #[test]
    fn reject_bad_documents() {
        let r = r#"{"version": 2, "emulators": {}}"#.parse::<FleetConfig>();
        assert!(matches!(r, Err(FleetError::Version(2))));
        let r = r#"{"version": 1, "emulators": {"a": {"port": 1}}}"#
            .parse::<FleetConfig>();
        assert!(matches!(r, Err(FleetError::Parse(_))));
        let r = r#"{"version": 1, "emulators": {}, "extra": 1}"#
            .parse::<FleetConfig>();
        assert!(matches!(r, Err(FleetError::Parse(_))));
    }

    #[test]
    fn resolve_defaults() {
        let c: FleetConfig = r#"{"version": 1, "emulators": {
            "a": {"type": "relay", "port": 7000, "options": {"rows": 2}},
            "b": {"type": "CVU", "port": 7001, "hostname": "0.0.0.0",
                  "termination": "cr", "delay": 0.5}
        }}"#
        .parse()
        .unwrap();
        let plans = c.resolve(&Registry::default()).unwrap();
        assert_eq!(plans.len(), 2);
        let (a, b) = (&plans[0], &plans[1]);
        assert_eq!(a.config.host, DEFAULT_HOST);
        assert_eq!(a.config.termination, Termination::CrLf);
        assert_eq!(a.options.u64_or("rows", 0), 2);
        assert_eq!(b.urn, "urn:benchtop:emulator:benchtop:lcr-2000");
        assert_eq!(b.config.host, "0.0.0.0");
        assert_eq!(b.config.termination, Termination::Cr);
        assert_eq!(b.config.delay.fixed, Duration::from_millis(500));
    }

    #[test]
    fn resolve_errors() {
        let reg = Registry::default();
        let c: FleetConfig = r#"{"version": 1, "emulators": {
            "x": {"type": "nope", "port": 1}
        }}"#
        .parse()
        .unwrap();
        assert!(matches!(
            c.resolve(&reg),
            Err(FleetError::UnknownType { name, .. }) if name == "x"
        ));

        let c: FleetConfig = r#"{"version": 1, "emulators": {
            "x": {"type": "lcr", "port": 1, "termination": "tab"}
        }}"#
        .parse()
        .unwrap();
        assert!(matches!(
            c.resolve(&reg),
            Err(FleetError::Termination { .. })
        ));

        let c: FleetConfig = r#"{"version": 1, "emulators": {
            "x": {"type": "lcr", "port": 1, "delay": -1.0}
        }}"#
        .parse()
        .unwrap();
        assert!(matches!(c.resolve(&reg), Err(FleetError::Delay { .. })));
    }
}
