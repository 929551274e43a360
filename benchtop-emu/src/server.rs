//! TCP line server
//!
//! Each server owns one listening socket.  An accept thread polls the
//! listener and spawns one worker thread per connection; workers read
//! lines, dispatch them and write replies until the peer disconnects or the
//! server is shut down.
use crate::{
    transport::{Delay, LineBuffer, Termination},
    Dispatch, Reply, RouteError,
};
use log::{debug, error, info, trace, warn};
use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

/// Size of the buffer used for each socket read
pub const READ_CHUNK: usize = 4096;

/// How often idle threads check for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Listening address and framing for one emulator
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Label used in log messages
    pub name: String,
    /// Interface to bind
    pub host: String,
    /// Port to bind, or 0 for an ephemeral port
    pub port: u16,
    /// Line terminator for requests and replies
    pub termination: Termination,
    /// Latency added before each line is handled
    pub delay: Delay,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "emulator".to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 0,
            termination: Termination::default(),
            delay: Delay::NONE,
        }
    }
}

/// Builds a fresh emulator instance
pub type Factory =
    Arc<dyn Fn() -> Result<Box<dyn Dispatch>, RouteError> + Send + Sync>;

/// Which emulator instance serves a connection
///
/// A shared instance is locked for the duration of each line, so
/// concurrent clients interleave at line granularity.  The devices are
/// written for a single client, and interleaved clients will see each
/// other's state changes.
#[derive(Clone)]
pub enum Target {
    /// Every connection talks to the same instance
    Shared(Arc<Mutex<Box<dyn Dispatch>>>),
    /// Each accepted connection gets its own instance
    PerConnection(Factory),
}

impl Target {
    /// Shares a single instance between connections
    pub fn shared(dev: Box<dyn Dispatch>) -> Self {
        Target::Shared(Arc::new(Mutex::new(dev)))
    }

    /// Builds a new instance for every connection
    pub fn per_connection<F>(f: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Dispatch>, RouteError> + Send + Sync + 'static,
    {
        Target::PerConnection(Arc::new(f))
    }

    fn connect(&self) -> Result<Session, RouteError> {
        Ok(match self {
            Target::Shared(d) => Session::Shared(d.clone()),
            Target::PerConnection(f) => Session::Owned(f()?),
        })
    }
}

enum Session {
    Shared(Arc<Mutex<Box<dyn Dispatch>>>),
    Owned(Box<dyn Dispatch>),
}

impl Session {
    fn handle(&mut self, line: &str) -> Option<Reply> {
        match self {
            Session::Shared(d) => d
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handle(line),
            Session::Owned(d) => d.handle(line),
        }
    }
}

/// A bound listener, ready to be spawned
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    target: Target,
}

impl Server {
    /// Binds the listening socket
    pub fn bind(config: ServerConfig, target: Target) -> io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            config,
            listener,
            target,
        })
    }

    /// Returns the bound address, which reports the actual ephemeral port
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts the accept thread
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let name = self.config.name.clone();
        let s = stop.clone();
        let thread = std::thread::Builder::new()
            .name(format!("{name}-accept"))
            .spawn(move || self.run(&s))?;
        info!("{name}: listening on {addr}");
        Ok(ServerHandle {
            name,
            addr,
            stop,
            thread: Some(thread),
        })
    }

    fn run(self, stop: &Arc<AtomicBool>) {
        let mut workers: Vec<JoinHandle<()>> = vec![];
        while !stop.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.start_worker(stream, peer, stop)
                {
                    Ok(w) => workers.push(w),
                    Err(e) => error!("{}: {peer}: {e}", self.config.name),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL_INTERVAL)
                }
                Err(e) => {
                    warn!("{}: accept failed: {e}", self.config.name);
                    std::thread::sleep(POLL_INTERVAL)
                }
            }
            let (done, running): (Vec<_>, Vec<_>) =
                workers.into_iter().partition(|w| w.is_finished());
            workers = running;
            for w in done {
                join_worker(&self.config.name, w);
            }
        }
        let Server { config, listener, .. } = self;
        drop(listener);
        for w in workers {
            join_worker(&config.name, w);
        }
        info!("{}: stopped", config.name);
    }

    fn start_worker(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        stop: &Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        let session = self
            .target
            .connect()
            .map_err(io::Error::other)?;
        let conn = Connection {
            name: self.config.name.clone(),
            peer,
            termination: self.config.termination,
            delay: self.config.delay,
            stop: stop.clone(),
        };
        std::thread::Builder::new()
            .name(format!("{}-{peer}", self.config.name))
            .spawn(move || {
                info!("{}: {peer} connected", conn.name);
                match conn.serve(stream, session) {
                    Ok(()) => info!("{}: {peer} disconnected", conn.name),
                    Err(e) => error!("{}: {peer}: {e}", conn.name),
                }
            })
    }
}

fn join_worker(name: &str, w: JoinHandle<()>) {
    if w.join().is_err() {
        error!("{name}: connection thread panicked");
    }
}

struct Connection {
    name: String,
    peer: SocketAddr,
    termination: Termination,
    delay: Delay,
    stop: Arc<AtomicBool>,
}

impl Connection {
    fn serve(&self, mut stream: TcpStream, mut dev: Session) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_nodelay(true)?;
        let term = self.termination.as_bytes();
        let mut lines = LineBuffer::new(self.termination);
        let mut chunk = [0u8; READ_CHUNK];
        while !self.stop.load(Ordering::Acquire) {
            let n = match stream.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            };
            lines.extend(&chunk[..n]);
            while let Some(line) = lines.next_line() {
                debug!("{}: {} <- {line:?}", self.name, self.peer);
                self.delay.wait();
                let Some(reply) = dev.handle(&line) else {
                    continue;
                };
                match reply.encode(term) {
                    Ok(bytes) => {
                        trace!("{}: {} -> {bytes:?}", self.name, self.peer);
                        stream.write_all(&bytes)?;
                    }
                    Err(e) => {
                        error!("{}: reply to {line:?} dropped: {e}", self.name)
                    }
                }
            }
        }
        Ok(())
    }
}

/// A running server
///
/// Dropping the handle shuts the server down.
pub struct ServerHandle {
    name: String,
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Returns the name given in the server's configuration
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting, waits for every connection thread and releases the
    /// listening socket
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                error!("{}: accept thread panicked", self.name);
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
