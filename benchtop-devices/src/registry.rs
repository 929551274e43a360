//! Lookup from type names to emulator constructors
use crate::{lcr::Lcr, meter::Meter, relay::Relay};
use emu::{Dispatch, Emulator, Instrument, Options, RouteError, Termination};
use thiserror::Error;

/// Builds a boxed emulator from its options
pub type Constructor = fn(Options) -> Result<Box<dyn Dispatch>, RouteError>;

/// Prefix of every canonical type name
pub const URN_PREFIX: &str = "urn:benchtop:emulator";

/// Errors from registry lookups
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No entry has the given name, alias or URN
    #[error("unknown emulator type {name:?} (known types: {known})")]
    UnknownType {
        /// Name as given
        name: String,
        /// Comma-separated list of short names
        known: String,
    },
}

/// One emulator type
pub struct Entry {
    /// Short legacy name
    pub name: &'static str,
    /// Vendor part of the canonical name
    pub vendor: &'static str,
    /// Model part of the canonical name
    pub model: &'static str,
    /// Other accepted names
    pub aliases: &'static [&'static str],
    /// One-line description
    pub description: &'static str,
    /// Line terminator used by this instrument family
    pub termination: Termination,
    /// Builds an instance
    pub constructor: Constructor,
}

impl Entry {
    /// Returns the canonical name, `urn:benchtop:emulator:<vendor>:<model>`
    pub fn urn(&self) -> String {
        format!("{URN_PREFIX}:{}:{}", self.vendor, self.model)
    }

    /// Checks whether `name` refers to this entry, ignoring case
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim();
        name.eq_ignore_ascii_case(self.name)
            || self.aliases.iter().any(|a| name.eq_ignore_ascii_case(a))
            || name.eq_ignore_ascii_case(&self.urn())
    }

    /// Builds an instance with the given options
    pub fn build(
        &self,
        options: Options,
    ) -> Result<Box<dyn Dispatch>, RouteError> {
        (self.constructor)(options)
    }
}

/// Boxes an emulator state behind its route table
pub fn boxed<E: Emulator>(state: E) -> Result<Box<dyn Dispatch>, RouteError> {
    Ok(Box::new(Instrument::new(state)?))
}

/// The set of known emulator types
///
/// The default registry holds every bundled device.
pub struct Registry {
    entries: Vec<Entry>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    /// Builds an empty registry
    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// Builds a registry holding every bundled device
    pub fn builtin() -> Self {
        let mut r = Self::empty();
        r.register(Entry {
            name: "lcr",
            vendor: "benchtop",
            model: "lcr-2000",
            aliases: &["lcr-meter", "cvu"],
            description: "LCR meter with a bias-dependent capacitor model",
            termination: Termination::Lf,
            constructor: |o| boxed(Lcr::new(o)),
        });
        r.register(Entry {
            name: "relay",
            vendor: "benchtop",
            model: "relay-8x12",
            aliases: &["switch", "matrix"],
            description: "Relay switch matrix",
            termination: Termination::CrLf,
            constructor: |o| boxed(Relay::new(o)),
        });
        r.register(Entry {
            name: "meter",
            vendor: "benchtop",
            model: "smu-200",
            aliases: &["smu", "sourcemeter"],
            description: "Source-measure unit with randomized readings",
            termination: Termination::Cr,
            constructor: |o| boxed(Meter::new(o)),
        });
        r
    }

    /// Adds an entry
    ///
    /// Earlier entries win when names collide.
    pub fn register(&mut self, entry: Entry) {
        if let Some(e) = self.entries.iter().find(|e| e.matches(entry.name)) {
            log::warn!("{} is shadowed by {}", entry.name, e.urn());
        }
        self.entries.push(entry);
    }

    /// Finds an entry by short name, alias or URN
    pub fn resolve(&self, name: &str) -> Result<&Entry, RegistryError> {
        self.entries.iter().find(|e| e.matches(name)).ok_or_else(|| {
            RegistryError::UnknownType {
                name: name.to_owned(),
                known: self
                    .entries
                    .iter()
                    .map(|e| e.name)
                    .collect::<Vec<_>>()
                    .join(", "),
            }
        })
    }

    /// Iterates over entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_names() {
        let r = Registry::default();
        assert_eq!(r.resolve("lcr").unwrap().name, "lcr");
        assert_eq!(r.resolve("CVU").unwrap().name, "lcr");
        assert_eq!(
            r.resolve("URN:benchtop:emulator:benchtop:relay-8x12")
                .unwrap()
                .name,
            "relay"
        );
        let e = r.resolve("oscilloscope").err().unwrap();
        let msg = e.to_string();
        assert!(msg.contains("oscilloscope"), "{msg}");
        assert!(msg.contains("lcr, relay, meter"), "{msg}");
    }

    #[test]
    fn urns_are_unique() {
        let r = Registry::default();
        let mut urns: Vec<_> = r.iter().map(Entry::urn).collect();
        urns.sort();
        urns.dedup();
        assert_eq!(urns.len(), r.iter().count());
    }

    #[test]
    fn build_every_entry() {
        for e in Registry::default().iter() {
            let dev = e.build(Options::new()).unwrap();
            assert_eq!(dev.name(), e.name);
        }
    }
}
