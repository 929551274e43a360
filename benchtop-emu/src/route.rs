//! Declarative routing from protocol lines to handlers
//!
//! Routes are matched against the whole line.  Specific routes are tried
//! longest pattern first, on the assumption that a longer pattern is more
//! specific; routes with equal pattern length keep their registration
//! order.  Every table ends with a catch-all fallback route, which sees any
//! line that nothing else matched.
use crate::response::Reply;
use log::trace;
use regex::{Captures, Regex, RegexBuilder};
use std::{cmp::Reverse, str::FromStr};
use thiserror::Error;

/// Handler invoked with the device state and the captured groups
pub type Handler<E> = fn(&mut E, &Args<'_>) -> Option<Reply>;

/// Pattern used by the catch-all route
pub const FALLBACK_PATTERN: &str = "(?s:.*)";

/// Errors raised while building a route table
#[derive(Debug, Error)]
pub enum RouteError {
    /// A pattern failed to compile
    #[error("invalid pattern {pattern:?} declared by {owner}")]
    Pattern {
        /// Pattern text as declared
        pattern: String,
        /// Type or capability that declared it
        owner: &'static str,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },
    /// No catch-all route was declared
    #[error("{0} does not declare a fallback route")]
    MissingFallback(&'static str),
}

/// Errors from reading a captured argument
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArgError {
    /// The group did not participate in the match
    #[error("argument {0} is missing")]
    Missing(usize),
    /// The group text could not be parsed
    #[error("argument {index} ({value:?}) is invalid")]
    Invalid {
        /// Group index, starting at zero
        index: usize,
        /// Captured text
        value: String,
    },
}

/// Captured groups for a matched line
///
/// Group indices start at zero for the first capture group; the whole
/// line is available through [`Args::line`].
pub struct Args<'a> {
    line: &'a str,
    caps: Option<Captures<'a>>,
}

impl<'a> Args<'a> {
    fn new(line: &'a str, caps: Captures<'a>) -> Self {
        Self {
            line,
            caps: Some(caps),
        }
    }

    /// Builds arguments with no captures, for calling handlers directly
    pub fn empty(line: &'a str) -> Self {
        Self { line, caps: None }
    }

    /// Returns the complete input line
    pub fn line(&self) -> &'a str {
        self.line
    }

    /// Returns the number of capture groups in the matched pattern
    pub fn len(&self) -> usize {
        self.caps.as_ref().map_or(0, |c| c.len() - 1)
    }

    /// Checks whether the matched pattern has no capture groups
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the text of capture group `i`, if it participated
    pub fn get(&self, i: usize) -> Option<&'a str> {
        self.caps.as_ref()?.get(i + 1).map(|m| m.as_str())
    }

    /// Returns the text of a named capture group, if it participated
    pub fn name(&self, name: &str) -> Option<&'a str> {
        self.caps.as_ref()?.name(name).map(|m| m.as_str())
    }

    /// Returns the text of capture group `i`, or an error if it is absent
    pub fn str(&self, i: usize) -> Result<&'a str, ArgError> {
        self.get(i).ok_or(ArgError::Missing(i))
    }

    /// Parses capture group `i`, ignoring surrounding whitespace
    pub fn parse<T: FromStr>(&self, i: usize) -> Result<T, ArgError> {
        let s = self.str(i)?;
        s.trim().parse().map_err(|_| ArgError::Invalid {
            index: i,
            value: s.to_owned(),
        })
    }

    /// Iterates over every capture group in order
    pub fn iter(&self) -> impl Iterator<Item = Option<&'a str>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// A compiled pattern bound to its handler
pub struct Route<E> {
    pattern: String,
    regex: Regex,
    handler: Handler<E>,
    owner: &'static str,
}

impl<E> Route<E> {
    /// Returns the pattern as declared
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the type or capability that declared this route
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// Checks whether this route matches the whole line
    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// Returns the bound handler
    pub fn handler(&self) -> Handler<E> {
        self.handler
    }
}

struct Pending<E> {
    pattern: String,
    handler: Handler<E>,
    owner: &'static str,
}

impl<E> Pending<E> {
    fn compile(self, case_insensitive: bool) -> Result<Route<E>, RouteError> {
        let regex = RegexBuilder::new(&format!("^(?:{})$", self.pattern))
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|source| RouteError::Pattern {
                pattern: self.pattern.clone(),
                owner: self.owner,
                source,
            })?;
        Ok(Route {
            pattern: self.pattern,
            regex,
            handler: self.handler,
            owner: self.owner,
        })
    }
}

/// Collects routes for one emulator type
///
/// The first registration of a given pattern text wins, so a type
/// overrides a capability's route by declaring the same pattern before
/// including the capability.
pub struct RouteBuilder<E> {
    name: &'static str,
    owner: &'static str,
    pending: Vec<Pending<E>>,
    fallback: Option<Pending<E>>,
    included: Vec<&'static str>,
    case_insensitive: bool,
}

impl<E> RouteBuilder<E> {
    /// Starts an empty table for the named type
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            owner: name,
            pending: vec![],
            fallback: None,
            included: vec![],
            case_insensitive: false,
        }
    }

    /// Matches every pattern in this table without regard to case
    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Associates a pattern with a handler
    #[must_use]
    pub fn route(
        mut self,
        pattern: impl Into<String>,
        handler: Handler<E>,
    ) -> Self {
        let pattern = pattern.into();
        if self.pending.iter().any(|r| r.pattern == pattern) {
            trace!("{}: {pattern:?} is already routed", self.owner);
        } else {
            self.pending.push(Pending {
                pattern,
                handler,
                owner: self.owner,
            });
        }
        self
    }

    /// Registers the catch-all route, used when nothing else matches
    #[must_use]
    pub fn fallback(mut self, handler: Handler<E>) -> Self {
        if self.fallback.is_none() {
            self.fallback = Some(Pending {
                pattern: FALLBACK_PATTERN.to_owned(),
                handler,
                owner: self.owner,
            });
        }
        self
    }

    /// Pulls in the routes declared by a named capability
    ///
    /// Each capability is included at most once, however many times it is
    /// requested.
    #[must_use]
    pub fn include(
        mut self,
        capability: &'static str,
        declare: fn(RouteBuilder<E>) -> RouteBuilder<E>,
    ) -> Self {
        if self.included.contains(&capability) {
            return self;
        }
        self.included.push(capability);
        let owner = std::mem::replace(&mut self.owner, capability);
        let mut out = declare(self);
        out.owner = owner;
        out
    }

    /// Compiles every pattern and sorts the table
    pub fn build(self) -> Result<RouteTable<E>, RouteError> {
        let ci = self.case_insensitive;
        let fallback = self
            .fallback
            .ok_or(RouteError::MissingFallback(self.name))?
            .compile(ci)?;
        let mut routes = self
            .pending
            .into_iter()
            .map(|p| p.compile(ci))
            .collect::<Result<Vec<_>, _>>()?;
        routes.sort_by_key(|r| Reverse(r.pattern.len()));
        Ok(RouteTable {
            name: self.name,
            routes,
            fallback,
        })
    }
}

/// The ordered, immutable set of routes for one emulator type
pub struct RouteTable<E> {
    name: &'static str,
    routes: Vec<Route<E>>,
    fallback: Route<E>,
}

impl<E> RouteTable<E> {
    /// Returns the name of the type this table belongs to
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Iterates over routes in match order, ending with the fallback
    pub fn routes(&self) -> impl Iterator<Item = &Route<E>> {
        self.routes.iter().chain(std::iter::once(&self.fallback))
    }

    /// Returns the catch-all route
    pub fn fallback(&self) -> &Route<E> {
        &self.fallback
    }

    /// Returns the number of routes, including the fallback
    pub fn len(&self) -> usize {
        self.routes.len() + 1
    }

    /// Always false, since every table has a fallback
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns the route that would handle `line`
    pub fn lookup(&self, line: &str) -> &Route<E> {
        self.routes
            .iter()
            .find(|r| r.is_match(line))
            .unwrap_or(&self.fallback)
    }

    /// Dispatches one line to the first matching route
    ///
    /// Returns whatever the handler returns; `None` means the device sends
    /// nothing back.  Handler panics are not caught.
    pub fn dispatch(&self, state: &mut E, line: &str) -> Option<Reply> {
        for route in self.routes() {
            if let Some(caps) = route.regex.captures(line) {
                trace!("{}: {line:?} -> {:?}", self.name, route.pattern);
                return (route.handler)(state, &Args::new(line, caps));
            }
        }
        // The fallback pattern matches any input, so this is unreachable
        log::warn!("{}: no route for {line:?}", self.name);
        None
    }
}
