//! Engine process supervision.
//!
//! This module:
//! - Spawns one engine process per session:
//!   `program [args...] <port> <config file>` in the engine directory.
//! - Scans its stdout and stderr line by line through a [`ConsoleProbe`]
//!   for the ready and end markers.
//! - Reports the process's end (end marker, exit, console I/O error) once,
//!   through the `exit` receiver of [`SpawnedEngine`].
//! - Connects clients to a running engine's port ([`attach`]).
//!
//! [`ProcessHandle::terminate`] is idempotent: the first call kills the
//! process, later calls (and calls after the process ended on its own) do
//! nothing.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::SpawnError;
use crate::types::INBOUND_CAPACITY;

/// How long to wait for each leftover console line once the engine exited.
const CONSOLE_DRAIN: Duration = Duration::from_millis(200);

/// What a console line means for the process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleSignal {
    /// The engine accepted its socket and can take clients.
    Ready,
    /// The duel is over; the process should go away.
    Ended,
}

/// Classifies engine console lines.
pub trait ConsoleProbe: Send + Sync + 'static {
    fn classify(&self, line: &str) -> Option<ConsoleSignal>;
}

/// Substring markers; the ready marker is checked first.
#[derive(Debug, Clone)]
pub struct MarkerProbe {
    ready: String,
    ended: String,
}

impl MarkerProbe {
    pub fn new(ready: impl Into<String>, ended: impl Into<String>) -> Self {
        MarkerProbe {
            ready: ready.into(),
            ended: ended.into(),
        }
    }
}

impl Default for MarkerProbe {
    fn default() -> Self {
        MarkerProbe::new("Start", "End")
    }
}

impl ConsoleProbe for MarkerProbe {
    fn classify(&self, line: &str) -> Option<ConsoleSignal> {
        if line.contains(&self.ready) {
            Some(ConsoleSignal::Ready)
        } else if line.contains(&self.ended) {
            Some(ConsoleSignal::Ended)
        } else {
            None
        }
    }
}

/// Why an engine process went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineExit {
    /// The end marker was seen; the process was then killed.
    EndMarker,
    /// The process exited by itself.
    Exited(Option<i32>),
    /// Reading its console failed; the process was then killed.
    ConsoleError(String),
    /// [`ProcessHandle::terminate`] was called.
    Terminated,
}

#[derive(Debug)]
struct Shared {
    terminated: AtomicBool,
    kill: Notify,
}

/// Handle to a running engine process. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    shared: Arc<Shared>,
    port: u16,
    pid: Option<u32>,
}

impl ProcessHandle {
    fn new(port: u16, pid: Option<u32>) -> Self {
        ProcessHandle {
            shared: Arc::new(Shared {
                terminated: AtomicBool::new(false),
                kill: Notify::new(),
            }),
            port,
            pid,
        }
    }

    /// A handle with no process behind it.
    #[cfg(test)]
    pub(crate) fn detached(port: u16) -> Self {
        ProcessHandle::new(port, None)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Kill the process. Returns `true` only for the call that did it.
    pub fn terminate(&self) -> bool {
        if self.shared.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shared.kill.notify_one();
        true
    }

    /// Whether the process was terminated or has ended.
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }
}

/// A ready engine.
#[derive(Debug)]
pub struct SpawnedEngine {
    pub handle: ProcessHandle,
    /// Resolves once, when the process is gone.
    pub exit: oneshot::Receiver<EngineExit>,
}

pub struct Supervisor {
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    ready_timeout: Duration,
    probe: Arc<dyn ConsoleProbe>,
}

impl Supervisor {
    pub fn new(config: &EngineConfig) -> Self {
        Supervisor {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            ready_timeout: config.ready_timeout(),
            probe: Arc::new(MarkerProbe::default()),
        }
    }

    pub fn with_probe(mut self, probe: impl ConsoleProbe) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Start an engine on `port` and wait until it reports ready.
    ///
    /// On any failure the process is killed before returning, so the
    /// caller only has to release the port.
    pub async fn spawn(&self, port: u16, config_file: &str) -> Result<SpawnedEngine, SpawnError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(port.to_string())
            .arg(config_file)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Launch {
                program: self.program.display().to_string(),
                source,
            })?;

        let handle = ProcessHandle::new(port, child.id());
        info!(port, pid = ?handle.pid(), config_file, "engine spawned");

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(supervise(
            child,
            port,
            line_rx,
            self.probe.clone(),
            handle.shared.clone(),
            ready_tx,
            exit_tx,
        ));

        let outcome = match timeout(self.ready_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(SpawnError::ExitedBeforeReady(None)),
            Err(_) => Err(SpawnError::ReadyTimeout(self.ready_timeout)),
        };

        match outcome {
            Ok(()) => Ok(SpawnedEngine {
                handle,
                exit: exit_rx,
            }),
            Err(err) => {
                handle.terminate();
                warn!(port, error = %err, "engine did not become ready");
                Err(err)
            }
        }
    }
}

/// Forward console lines until EOF. Bytes that are not UTF-8 are replaced.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<io::Result<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    port: u16,
    mut lines: mpsc::UnboundedReceiver<io::Result<String>>,
    probe: Arc<dyn ConsoleProbe>,
    shared: Arc<Shared>,
    ready_tx: oneshot::Sender<Result<(), SpawnError>>,
    exit_tx: oneshot::Sender<EngineExit>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut console_open = true;

    let exit = loop {
        tokio::select! {
            _ = shared.kill.notified() => {
                kill(&mut child, port).await;
                break EngineExit::Terminated;
            }
            line = lines.recv(), if console_open => match line {
                Some(Ok(line)) => {
                    debug!(port, %line, "engine console");
                    match probe.classify(&line) {
                        Some(ConsoleSignal::Ready) => {
                            if let Some(tx) = ready_tx.take() {
                                info!(port, "engine ready");
                                let _ = tx.send(Ok(()));
                            }
                        }
                        Some(ConsoleSignal::Ended) => {
                            info!(port, "engine reported end");
                            kill(&mut child, port).await;
                            break EngineExit::EndMarker;
                        }
                        None => {}
                    }
                }
                Some(Err(e)) => {
                    warn!(port, error = %e, "engine console read failed");
                    kill(&mut child, port).await;
                    break EngineExit::ConsoleError(e.to_string());
                }
                None => console_open = false,
            },
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                info!(port, ?code, "engine exited");
                // Lines printed right before the exit may still be queued.
                if console_open {
                    drain_console(&mut lines, port, probe.as_ref(), &mut ready_tx).await;
                }
                break EngineExit::Exited(code);
            }
        }
    };

    shared.terminated.store(true, Ordering::SeqCst);

    if let Some(tx) = ready_tx.take() {
        let code = match &exit {
            EngineExit::Exited(code) => *code,
            _ => None,
        };
        let _ = tx.send(Err(SpawnError::ExitedBeforeReady(code)));
    }
    let _ = exit_tx.send(exit);
}

/// Read what is left of the console of an exited engine. Only the ready
/// marker still matters.
async fn drain_console(
    lines: &mut mpsc::UnboundedReceiver<io::Result<String>>,
    port: u16,
    probe: &dyn ConsoleProbe,
    ready_tx: &mut Option<oneshot::Sender<Result<(), SpawnError>>>,
) {
    while let Ok(Some(Ok(line))) = timeout(CONSOLE_DRAIN, lines.recv()).await {
        debug!(port, %line, "engine console");
        if probe.classify(&line) == Some(ConsoleSignal::Ready) {
            if let Some(tx) = ready_tx.take() {
                info!(port, "engine ready");
                let _ = tx.send(Ok(()));
            }
        }
    }
}

async fn kill(child: &mut Child, port: u16) {
    if let Err(e) = child.kill().await {
        debug!(port, error = %e, "engine kill failed (already gone?)");
    }
}

/// Open connection to an engine's port.
///
/// Reader and writer run as their own tasks; dropping the link aborts
/// both.
#[derive(Debug)]
pub struct EngineLink {
    port: u16,
    inbound: mpsc::Receiver<Bytes>,
    outbound: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl EngineLink {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Queue bytes for the engine. `false` once the link is down.
    pub fn send(&self, bytes: Bytes) -> bool {
        self.outbound.send(bytes).is_ok()
    }

    /// Next chunk from the engine; `None` once the engine closed the link.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }
}

impl Drop for EngineLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Connect to the engine on `port` (loopback) and send `initial` first.
pub async fn attach(port: u16, initial: &[u8]) -> io::Result<EngineLink> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    stream.set_nodelay(true)?;
    if !initial.is_empty() {
        stream.write_all(initial).await?;
    }
    debug!(port, flushed = initial.len(), "attached to engine");

    let (mut read_half, mut write_half) = stream.into_split();
    let (in_tx, in_rx) = mpsc::channel::<Bytes>(INBOUND_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();

    let reader = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match read_half.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if in_tx.send(buf.split().freeze()).await.is_err() {
                        break;
                    }
                    buf.reserve(4096);
                }
                Err(e) => {
                    debug!(port, error = %e, "engine link read failed");
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if let Err(e) = write_half.write_all(&bytes).await {
                debug!(port, error = %e, "engine link write failed");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    Ok(EngineLink {
        port,
        inbound: in_rx,
        outbound: out_tx,
        reader,
        writer,
    })
}
