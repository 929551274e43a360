//! Instrument protocol emulation engine
//!
//! An emulated instrument is a plain state struct implementing [`Emulator`].
//! The type declares its commands once as a [`RouteTable`], which is built
//! on first use and shared by every instance of that type.  Incoming lines
//! are dispatched to the first matching route; the handler mutates the
//! state and may return a [`Reply`], which the [`transport`] encodes and
//! writes back to the client.
#![warn(missing_docs)]
#![forbid(unsafe_code)]
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

pub mod errors;
pub mod options;
pub mod response;
pub mod route;
pub mod server;
pub mod transport;

pub use errors::{ErrorQueue, InstrumentError};
pub use options::Options;
pub use response::{
    make_response, reply, BinaryResponse, ByteOrder, Encoding, RawResponse,
    Reply, Response, TextResponse,
};
pub use route::{ArgError, Args, Handler, Route, RouteBuilder, RouteError};
pub use route::RouteTable;
pub use server::{Factory, Server, ServerConfig, ServerHandle, Target};
pub use transport::{Delay, LineBuffer, Termination};

/// A simulated device with typed state and a declared command set
pub trait Emulator: Send + Sized + 'static {
    /// Name used for route ownership and in logs
    const NAME: &'static str;

    /// Declares every route understood by this type
    ///
    /// This is called once per process, the first time the type is used.
    /// Capabilities shared between devices are pulled in with
    /// [`RouteBuilder::include`].  The builder must end up with a
    /// [fallback](RouteBuilder::fallback) route.
    fn declare(routes: RouteBuilder<Self>) -> RouteBuilder<Self>;

    /// Restores every mutable field to its documented default
    fn reset(&mut self);

    /// Returns the read-only options this instance was built with
    fn options(&self) -> &Options;
}

/// Object-safe handle to a running emulator, used by the transport
pub trait Dispatch: Send {
    /// Name of the emulated device type
    fn name(&self) -> &'static str;

    /// Handles a single protocol line, returning an optional reply
    fn handle(&mut self, line: &str) -> Option<Reply>;

    /// Resets the device to its power-on state
    fn reset(&mut self);
}

type TableCache = Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;
static TABLES: OnceLock<TableCache> = OnceLock::new();

/// Returns the route table for `E`, building it on first use
///
/// Tables are cached per concrete type for the lifetime of the process and
/// are shared read-only between instances and threads.
pub fn routes_for<E: Emulator>() -> Result<Arc<RouteTable<E>>, RouteError> {
    let tables = TABLES.get_or_init(TableCache::default);
    let mut tables = tables.lock().unwrap_or_else(PoisonError::into_inner);
    let key = TypeId::of::<E>();
    if let Some(t) = tables.get(&key) {
        if let Ok(t) = Arc::clone(t).downcast::<RouteTable<E>>() {
            return Ok(t);
        }
    }
    let table = Arc::new(E::declare(RouteBuilder::new(E::NAME)).build()?);
    log::debug!("built {} routes for {}", table.len(), E::NAME);
    tables.insert(key, table.clone());
    Ok(table)
}

/// An emulator state bound to its route table
pub struct Instrument<E> {
    state: E,
    routes: Arc<RouteTable<E>>,
}

impl<E: Emulator> Instrument<E> {
    /// Binds the given state to the (cached) route table for its type
    pub fn new(state: E) -> Result<Self, RouteError> {
        Ok(Self {
            state,
            routes: routes_for::<E>()?,
        })
    }

    /// Dispatches one line against this instrument's state
    pub fn handle(&mut self, line: &str) -> Option<Reply> {
        self.routes.dispatch(&mut self.state, line)
    }

    /// Borrows the device state
    pub fn state(&self) -> &E {
        &self.state
    }

    /// Mutably borrows the device state
    pub fn state_mut(&mut self) -> &mut E {
        &mut self.state
    }

    /// Returns the shared route table
    pub fn routes(&self) -> &RouteTable<E> {
        &self.routes
    }

    /// Unwraps the device state
    pub fn into_inner(self) -> E {
        self.state
    }
}

impl<E: Emulator> Dispatch for Instrument<E> {
    fn name(&self) -> &'static str {
        E::NAME
    }
    fn handle(&mut self, line: &str) -> Option<Reply> {
        Instrument::handle(self, line)
    }
    fn reset(&mut self) {
        self.state.reset();
    }
}

static_assertions::assert_impl_all!(RouteTable<()>: Send, Sync);
static_assertions::assert_impl_all!(Response: Send, Sync, Clone);

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Counter {
        count: u32,
        options: Options,
    }

    impl Emulator for Counter {
        const NAME: &'static str = "counter";

        fn declare(routes: RouteBuilder<Self>) -> RouteBuilder<Self> {
            routes
                .route("INC", |s, _| {
                    s.count += 1;
                    None
                })
                .route(r"COUNT\?", |s, _| reply(s.count))
                .fallback(|_, _| reply("ERR"))
        }

        fn reset(&mut self) {
            self.count = 0;
        }

        fn options(&self) -> &Options {
            &self.options
        }
    }

    #[test]
    fn instrument_dispatch() {
        let mut dev = Instrument::new(Counter::default()).unwrap();
        assert!(dev.handle("INC").is_none());
        assert!(dev.handle("INC").is_none());
        assert_eq!(dev.handle("COUNT?"), Some(Reply::from(Response::from(2))));
        assert_eq!(dev.handle("nope"), Some(Reply::from(Response::from("ERR"))));
        Dispatch::reset(&mut dev);
        assert_eq!(dev.state().count, 0);

        dev.state_mut().count = 41;
        dev.handle("INC");
        assert_eq!(dev.into_inner().count, 42);
    }

    #[test]
    fn tables_are_cached() {
        let a = routes_for::<Counter>().unwrap();
        let b = routes_for::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
