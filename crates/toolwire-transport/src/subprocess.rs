//! Subprocess transport.
//!
//! Runs an MCP server as a child process and speaks line-delimited JSON-RPC
//! over its stdin/stdout.
//!
//! # Structure
//!
//! Every transport owns one worker task. The worker is the only code that
//! touches the line buffer, the stderr tail and the pending-request table; all
//! other tasks talk to it through a command channel:
//!
//! - callers send requests and notifications, then await a oneshot reply
//! - two reader tasks forward raw stdout and stderr chunks
//! - a writer task drains an outbound queue into the child's stdin, so lines
//!   never interleave and a child that stops reading cannot stall the worker
//! - an exit watcher owns the [`Child`], reports its exit status, and kills it
//!   as soon as the worker drops the kill handle
//!
//! When the process exits, the worker keeps reading until both pipes reach
//! EOF (or [`EXIT_GRACE`] elapses), then fails every pending request with
//! [`ClientError::ProcessTerminated`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{Level, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use toolwire_core::logging::{is_enabled, targets};
use toolwire_core::{ClientError, ClientResult, log_transport};
use toolwire_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};

use crate::codec::{Codec, DEFAULT_MAX_MESSAGE_SIZE};
use crate::launch::ServerLaunch;
use crate::stderr::{DEFAULT_STDERR_CAPACITY, StderrTail};
use crate::traffic::{TrafficEvent, TrafficObserver};

/// Bytes requested per pipe read.
const READ_CHUNK: usize = 8 * 1024;

/// How long an exited server's pipes may keep delivering buffered output.
pub const EXIT_GRACE: Duration = Duration::from_millis(250);

/// Observable lifecycle of a [`SubprocessTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// Never started, or stopped by the caller.
    Stopped,
    /// The server process is running.
    Running,
    /// The server process exited on its own.
    Exited {
        /// Exit code, absent when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Trimmed tail of stderr, absent when it wrote nothing.
        stderr: Option<String>,
    },
}

impl TransportState {
    /// Returns true while the server process is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, TransportState::Running)
    }
}

enum Lifecycle {
    Stopped,
    Running {
        generation: u64,
        commands: mpsc::UnboundedSender<Command>,
    },
    Exited {
        exit_code: Option<i32>,
        stderr: Option<String>,
    },
}

fn lock(lifecycle: &Mutex<Lifecycle>) -> MutexGuard<'_, Lifecycle> {
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
}

type Reply = oneshot::Sender<ClientResult<JsonRpcResponse>>;
type Ack = oneshot::Sender<ClientResult<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        })
    }
}

/// Everything the worker reacts to.
enum Command {
    Request {
        request: JsonRpcRequest,
        reply: Reply,
    },
    Notify {
        notification: JsonRpcNotification,
        ack: Ack,
    },
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    WriteFailed {
        id: RequestId,
        error: String,
    },
    Closed(Stream),
    Exited(Option<i32>),
    Stop {
        done: oneshot::Sender<()>,
    },
}

/// One line queued for the child's stdin.
struct Outgoing {
    bytes: Vec<u8>,
    ack: WriteAck,
}

enum WriteAck {
    Request(RequestId),
    Notification(Ack),
}

/// A running (or runnable) MCP server subprocess.
///
/// [`start`](Self::start), [`send`](Self::send) and [`stop`](Self::stop) take
/// `&self`, so one transport can be shared between concurrent callers.
/// Starting requires a Tokio runtime.
///
/// ```ignore
/// let transport = SubprocessTransport::new(ServerLaunch::new("/usr/local/bin/server"));
/// transport.start()?;
/// let response = transport.send(JsonRpcRequest::new("tools/list", None, 1)).await?;
/// transport.stop().await;
/// ```
pub struct SubprocessTransport {
    launch: ServerLaunch,
    observer: Option<TrafficObserver>,
    max_message_size: usize,
    stderr_capacity: usize,
    lifecycle: Arc<Mutex<Lifecycle>>,
    generation: AtomicU64,
}

impl fmt::Debug for SubprocessTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubprocessTransport")
            .field("launch", &self.launch)
            .field("state", &self.state())
            .field("observed", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl SubprocessTransport {
    /// Creates a stopped transport for `launch`.
    #[must_use]
    pub fn new(launch: ServerLaunch) -> Self {
        Self {
            launch,
            observer: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            stderr_capacity: DEFAULT_STDERR_CAPACITY,
            lifecycle: Arc::new(Mutex::new(Lifecycle::Stopped)),
            generation: AtomicU64::new(0),
        }
    }

    /// Reports all traffic to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: TrafficObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Overrides the inbound line size limit.
    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Overrides how many characters of stderr are retained.
    #[must_use]
    pub fn with_stderr_capacity(mut self, chars: usize) -> Self {
        self.stderr_capacity = chars;
        self
    }

    /// The launch definition this transport runs.
    #[must_use]
    pub fn launch(&self) -> &ServerLaunch {
        &self.launch
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        match &*lock(&self.lifecycle) {
            Lifecycle::Stopped => TransportState::Stopped,
            Lifecycle::Running { .. } => TransportState::Running,
            Lifecycle::Exited { exit_code, stderr } => TransportState::Exited {
                exit_code: *exit_code,
                stderr: stderr.clone(),
            },
        }
    }

    /// Returns true while the server process is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Spawns the server process. Does nothing if it is already running.
    ///
    /// On failure the transport stays stopped and the error is
    /// [`ClientError::ConnectionFailed`].
    pub fn start(&self) -> ClientResult<()> {
        let mut lifecycle = lock(&self.lifecycle);
        if matches!(*lifecycle, Lifecycle::Running { .. }) {
            log_transport!("start ignored: already running");
            return Ok(());
        }
        if self.launch.command.trim().is_empty() {
            return Err(ClientError::ConnectionFailed(
                "no server command configured".to_owned(),
            ));
        }

        let command_line = self.launch.command_line();
        let mut child = self.launch.to_command().spawn().map_err(|err| {
            ClientError::ConnectionFailed(format!("failed to start `{command_line}`: {err}"))
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(ClientError::ConnectionFailed(
                "server stdio was not captured".to_owned(),
            ));
        };
        let pid = child.id();

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (commands, inbox) = mpsc::unbounded_channel();
        let (outgoing, queue) = mpsc::unbounded_channel();
        let tasks = vec![
            spawn_writer(stdin, queue, commands.clone()),
            spawn_reader(stdout, Stream::Stdout, commands.clone()),
            spawn_reader(stderr, Stream::Stderr, commands.clone()),
        ];
        let kill = spawn_exit_watcher(child, commands.clone());

        let worker = Worker {
            codec: Codec::with_max_message_size(self.max_message_size),
            stderr: StderrTail::new(self.stderr_capacity),
            pending: HashMap::new(),
            outgoing: Some(outgoing),
            tasks,
            kill: Some(kill),
            observer: self.observer.clone(),
            open_streams: 2,
            exit: None,
            lifecycle: Arc::clone(&self.lifecycle),
            generation,
        };
        tokio::spawn(worker.run(inbox));

        *lifecycle = Lifecycle::Running {
            generation,
            commands,
        };
        match pid {
            Some(pid) => info!(target: targets::TRANSPORT, "started `{command_line}` (pid {pid})"),
            None => info!(target: targets::TRANSPORT, "started `{command_line}`"),
        }
        Ok(())
    }

    /// Sends a request and waits for the response carrying the same id.
    ///
    /// Error responses are returned as responses; interpreting them is up to
    /// the caller. Fails with [`ClientError::NotConnected`] when not running,
    /// [`ClientError::ProcessTerminated`] when the server exits first, and
    /// [`ClientError::Encoding`] when the id is already in flight.
    ///
    /// Dropping the returned future abandons the request: its pending entry is
    /// pruned on the next send and a late response is discarded.
    pub async fn send(&self, request: JsonRpcRequest) -> ClientResult<JsonRpcResponse> {
        let commands = self.commands()?;
        let (reply, response) = oneshot::channel();
        commands
            .send(Command::Request { request, reply })
            .map_err(|_| ClientError::NotConnected)?;
        response.await.unwrap_or(Err(ClientError::NotConnected))
    }

    /// Writes a notification. Resolves once it has been written to stdin.
    pub async fn send_notification(&self, notification: JsonRpcNotification) -> ClientResult<()> {
        let commands = self.commands()?;
        let (ack, written) = oneshot::channel();
        commands
            .send(Command::Notify { notification, ack })
            .map_err(|_| ClientError::NotConnected)?;
        written.await.unwrap_or(Err(ClientError::NotConnected))
    }

    /// Stops the server.
    ///
    /// Pending requests fail with [`ClientError::NotConnected`], the pipes are
    /// detached, the process is killed and all buffers are cleared. Returns
    /// once the worker has done so; it does not wait for the process to be
    /// reaped. Calling it again is a no-op.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *lock(&self.lifecycle), Lifecycle::Stopped);
        match previous {
            Lifecycle::Running { commands, .. } => {
                let (done, stopped) = oneshot::channel();
                if commands.send(Command::Stop { done }).is_ok() {
                    let _ = stopped.await;
                }
                info!(target: targets::TRANSPORT, "stopped `{}`", self.launch.command);
            }
            Lifecycle::Exited { .. } | Lifecycle::Stopped => {
                log_transport!("stop ignored: not running");
            }
        }
    }

    fn commands(&self) -> ClientResult<mpsc::UnboundedSender<Command>> {
        match &*lock(&self.lifecycle) {
            Lifecycle::Running { commands, .. } => Ok(commands.clone()),
            Lifecycle::Stopped | Lifecycle::Exited { .. } => Err(ClientError::NotConnected),
        }
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        let previous = std::mem::replace(&mut *lock(&self.lifecycle), Lifecycle::Stopped);
        if let Lifecycle::Running { commands, .. } = previous {
            let (done, _) = oneshot::channel();
            let _ = commands.send(Command::Stop { done });
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    /// The process exited but a pipe is still open.
    Draining,
    Done,
}

enum Next {
    Command(Command),
    Closed,
    GraceElapsed,
}

struct Worker {
    codec: Codec,
    stderr: StderrTail,
    pending: HashMap<RequestId, Reply>,
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    tasks: Vec<JoinHandle<()>>,
    kill: Option<oneshot::Sender<()>>,
    observer: Option<TrafficObserver>,
    open_streams: usize,
    /// Exit status once the process has exited.
    exit: Option<Option<i32>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    generation: u64,
}

impl Worker {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        let mut deadline: Option<Instant> = None;

        loop {
            let next = match deadline {
                Some(at) => tokio::select! {
                    command = inbox.recv() => command.map_or(Next::Closed, Next::Command),
                    () = tokio::time::sleep_until(at) => Next::GraceElapsed,
                },
                None => inbox.recv().await.map_or(Next::Closed, Next::Command),
            };

            match next {
                Next::Command(command) => match self.handle(command) {
                    Step::Continue => {}
                    Step::Draining => {
                        deadline.get_or_insert_with(|| Instant::now() + EXIT_GRACE);
                    }
                    Step::Done => break,
                },
                Next::GraceElapsed => {
                    log_transport!("pipes still open {EXIT_GRACE:?} after exit");
                    self.terminate();
                    break;
                }
                Next::Closed => {
                    self.shutdown();
                    break;
                }
            }
        }

        inbox.close();
        while let Ok(command) = inbox.try_recv() {
            reject(command);
        }
    }

    fn handle(&mut self, command: Command) -> Step {
        match command {
            Command::Request { request, reply } => self.send_request(request, reply),
            Command::Notify { notification, ack } => self.send_notification(notification, ack),
            Command::Stdout(chunk) => self.read_stdout(&chunk),
            Command::Stderr(chunk) => self.read_stderr(&chunk),
            Command::WriteFailed { id, error } => self.fail_write(&id, &error),
            Command::Closed(stream) => {
                self.open_streams = self.open_streams.saturating_sub(1);
                if stream == Stream::Stderr {
                    self.stderr.finish();
                }
                log_transport!("server {stream} closed");
                if self.exit.is_some() && self.open_streams == 0 {
                    self.terminate();
                    return Step::Done;
                }
            }
            Command::Exited(code) => {
                self.exit = Some(code);
                if self.open_streams == 0 {
                    self.terminate();
                    return Step::Done;
                }
                return Step::Draining;
            }
            Command::Stop { done } => {
                self.shutdown();
                let _ = done.send(());
                return Step::Done;
            }
        }
        Step::Continue
    }

    fn send_request(&mut self, request: JsonRpcRequest, reply: Reply) {
        if self.exit.is_some() {
            let _ = reply.send(Err(ClientError::NotConnected));
            return;
        }
        let Some(outgoing) = &self.outgoing else {
            let _ = reply.send(Err(ClientError::NotConnected));
            return;
        };
        if self
            .pending
            .get(&request.id)
            .is_some_and(|pending| !pending.is_closed())
        {
            let _ = reply.send(Err(ClientError::Encoding(format!(
                "request id {} is already in flight",
                request.id
            ))));
            return;
        }
        let bytes = match self.codec.encode(&request) {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = reply.send(Err(ClientError::Encoding(err.to_string())));
                return;
            }
        };

        trace_outgoing(&bytes);
        self.pending.retain(|_, reply| !reply.is_closed());
        let id = request.id.clone();
        self.pending.insert(id.clone(), reply);
        let queued = outgoing.send(Outgoing {
            bytes,
            ack: WriteAck::Request(id.clone()),
        });
        if queued.is_err() {
            self.fail_write(&id, "stdin writer has shut down");
            return;
        }

        log_transport!(
            "sent {} id={id} ({} pending)",
            request.method,
            self.pending.len()
        );
        self.observe(TrafficEvent::Request(request));
    }

    fn send_notification(&mut self, notification: JsonRpcNotification, ack: Ack) {
        let Some(outgoing) = self.outgoing.as_ref().filter(|_| self.exit.is_none()) else {
            let _ = ack.send(Err(ClientError::NotConnected));
            return;
        };
        let bytes = match self.codec.encode(&notification) {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = ack.send(Err(ClientError::Encoding(err.to_string())));
                return;
            }
        };

        trace_outgoing(&bytes);
        let queued = outgoing.send(Outgoing {
            bytes,
            ack: WriteAck::Notification(ack),
        });
        if let Err(mpsc::error::SendError(Outgoing {
            ack: WriteAck::Notification(ack),
            ..
        })) = queued
        {
            let _ = ack.send(Err(ClientError::ConnectionFailed(
                "stdin writer has shut down".to_owned(),
            )));
            return;
        }

        log_transport!("sent notification {}", notification.method);
        self.observe(TrafficEvent::Notification(notification));
    }

    fn fail_write(&mut self, id: &RequestId, reason: &str) {
        if let Some(reply) = self.pending.remove(id) {
            warn!(target: targets::TRANSPORT, "failed to write request {id}: {reason}");
            let _ = reply.send(Err(ClientError::ConnectionFailed(format!(
                "failed to write request {id}: {reason}"
            ))));
        }
    }

    fn read_stdout(&mut self, chunk: &[u8]) {
        for decoded in self.codec.decode(chunk) {
            match decoded {
                Ok(JsonRpcMessage::Response(response)) => self.dispatch(response),
                Ok(JsonRpcMessage::Request(request)) => log_transport!(
                    "ignoring server request {} id={}",
                    request.method,
                    request.id
                ),
                Ok(JsonRpcMessage::Notification(notification)) => {
                    log_transport!("ignoring server notification {}", notification.method);
                }
                Err(err) => warn!(target: targets::CODEC, "dropping server output: {err}"),
            }
        }
    }

    fn dispatch(&mut self, response: JsonRpcResponse) {
        if let Some(observer) = &self.observer {
            observer(&TrafficEvent::Response(response.clone()));
        }
        let Some(id) = response.id.clone() else {
            log_transport!("dropping unsolicited response without id");
            return;
        };
        match self.pending.remove(&id) {
            Some(reply) => {
                trace!(target: targets::TRAFFIC, "<- id={id}");
                if reply.send(Ok(response)).is_err() {
                    log_transport!("caller for id={id} is gone");
                }
            }
            None => warn!(
                target: targets::TRANSPORT,
                "dropping response for unknown request id={id}"
            ),
        }
    }

    /// Every chunk reaches the observer as it arrived; only the tail
    /// reassembles sequences split across reads.
    fn read_stderr(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.stderr.push(chunk);
        let text = String::from_utf8_lossy(chunk).into_owned();
        trace!(target: targets::TRAFFIC, "stderr: {}", text.trim_end());
        self.observe(TrafficEvent::Stderr(text));
    }

    fn observe(&self, event: TrafficEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    /// The process exited: fail everything in flight and publish the exit.
    fn terminate(&mut self) {
        let exit_code = self.exit.flatten();
        let stderr = self.stderr.tail();
        match exit_code {
            Some(code) => info!(
                target: targets::TRANSPORT,
                "server exited with code {code}; failing {} pending request(s)",
                self.pending.len()
            ),
            None => info!(
                target: targets::TRANSPORT,
                "server terminated by a signal; failing {} pending request(s)",
                self.pending.len()
            ),
        }

        let error = ClientError::ProcessTerminated {
            exit_code,
            stderr: stderr.clone(),
        };
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(error.clone()));
        }
        self.release();

        let mut lifecycle = lock(&self.lifecycle);
        if matches!(*lifecycle, Lifecycle::Running { generation, .. } if generation == self.generation)
        {
            *lifecycle = Lifecycle::Exited { exit_code, stderr };
        }
    }

    /// The caller stopped the transport.
    fn shutdown(&mut self) {
        if !self.pending.is_empty() {
            log_transport!("stopping with {} pending request(s)", self.pending.len());
        }
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(ClientError::NotConnected));
        }
        self.release();
        self.codec.clear();
        self.stderr.clear();
    }

    /// Detaches the pipes and drops the kill handle, which kills a live child.
    fn release(&mut self) {
        self.outgoing = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.kill = None;
    }
}

fn trace_outgoing(bytes: &[u8]) {
    if is_enabled(Level::Trace, targets::TRAFFIC) {
        trace!(target: targets::TRAFFIC, "-> {}", String::from_utf8_lossy(bytes).trim_end());
    }
}

fn reject(command: Command) {
    match command {
        Command::Request { reply, .. } => {
            let _ = reply.send(Err(ClientError::NotConnected));
        }
        Command::Notify { ack, .. } => {
            let _ = ack.send(Err(ClientError::NotConnected));
        }
        Command::Stop { done } => {
            let _ = done.send(());
        }
        Command::Stdout(_)
        | Command::Stderr(_)
        | Command::WriteFailed { .. }
        | Command::Closed(_)
        | Command::Exited(_) => {}
    }
}

// ============================================================================
// I/O tasks
// ============================================================================

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

fn spawn_writer<W>(
    mut stdin: W,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<Command>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(Outgoing { bytes, ack }) = queue.recv().await {
            let written = write_line(&mut stdin, &bytes).await;
            match (ack, written) {
                (WriteAck::Notification(ack), written) => {
                    let _ = ack.send(written.map_err(|err| {
                        ClientError::ConnectionFailed(format!("failed to write notification: {err}"))
                    }));
                }
                (WriteAck::Request(_), Ok(())) => {}
                (WriteAck::Request(id), Err(err)) => {
                    let _ = events.send(Command::WriteFailed {
                        id,
                        error: err.to_string(),
                    });
                }
            }
        }
    })
}

fn spawn_reader<R>(
    mut pipe: R,
    stream: Stream,
    events: mpsc::UnboundedSender<Command>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = buf[..n].to_vec();
                    let command = match stream {
                        Stream::Stdout => Command::Stdout(chunk),
                        Stream::Stderr => Command::Stderr(chunk),
                    };
                    if events.send(command).is_err() {
                        return;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    log_transport!("reading server {stream} failed: {err}");
                    break;
                }
            }
        }
        let _ = events.send(Command::Closed(stream));
    })
}

/// Waits for the child to exit, killing it once the returned handle is used
/// or dropped.
fn spawn_exit_watcher(
    mut child: Child,
    events: mpsc::UnboundedSender<Command>,
) -> oneshot::Sender<()> {
    let (kill, killed) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = killed => None,
        };
        let status = match exited {
            Some(status) => status,
            None => {
                if let Err(err) = child.start_kill() {
                    log_transport!("kill failed: {err}");
                }
                child.wait().await
            }
        };
        let code = match status {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(target: targets::TRANSPORT, "waiting for server failed: {err}");
                None
            }
        };
        let _ = events.send(Command::Exited(code));
    });
    kill
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::AsyncBufReadExt;
    use tokio::sync::oneshot::error::TryRecvError;
    use toolwire_core::StructuredValue;

    use super::*;

    struct Harness {
        worker: Worker,
        queue: mpsc::UnboundedReceiver<Outgoing>,
        lifecycle: Arc<Mutex<Lifecycle>>,
    }

    fn harness() -> Harness {
        harness_with(None)
    }

    fn harness_with(observer: Option<TrafficObserver>) -> Harness {
        let (outgoing, queue) = mpsc::unbounded_channel();
        let (commands, _inbox) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(Mutex::new(Lifecycle::Running {
            generation: 1,
            commands,
        }));
        let worker = Worker {
            codec: Codec::new(),
            stderr: StderrTail::default(),
            pending: HashMap::new(),
            outgoing: Some(outgoing),
            tasks: Vec::new(),
            kill: None,
            observer,
            open_streams: 2,
            exit: None,
            lifecycle: Arc::clone(&lifecycle),
            generation: 1,
        };
        Harness {
            worker,
            queue,
            lifecycle,
        }
    }

    fn request(
        worker: &mut Worker,
        id: impl Into<RequestId>,
    ) -> oneshot::Receiver<ClientResult<JsonRpcResponse>> {
        let (reply, rx) = oneshot::channel();
        worker.handle(Command::Request {
            request: JsonRpcRequest::new("echo", None, id),
            reply,
        });
        rx
    }

    fn stdout(worker: &mut Worker, text: &str) {
        worker.handle(Command::Stdout(text.as_bytes().to_vec()));
    }

    fn response_line(id: i64) -> String {
        format!("{{\"jsonrpc\":\"2.0\",\"id\":{id},\"result\":{{\"n\":{id}}}}}\n")
    }

    #[test]
    fn responses_reach_their_callers_in_any_order() {
        let orders: [[i64; 4]; 5] = [
            [1, 2, 3, 4],
            [4, 3, 2, 1],
            [2, 4, 1, 3],
            [3, 1, 4, 2],
            [1, 3, 2, 4],
        ];
        for order in orders {
            let mut h = harness();
            let receivers: Vec<_> = (1..=4).map(|id| (id, request(&mut h.worker, id))).collect();
            assert_eq!(h.worker.pending.len(), 4);

            let output: String = order.iter().map(|&id| response_line(id)).collect();
            let (first, rest) = output.as_bytes().split_at(output.len() / 3);
            h.worker.handle(Command::Stdout(first.to_vec()));
            h.worker.handle(Command::Stdout(rest.to_vec()));

            for (id, mut rx) in receivers {
                let response = rx.try_recv().unwrap().unwrap();
                assert_eq!(response.id, Some(RequestId::Number(id)));
                let result = response.into_result().unwrap();
                assert_eq!(result.get("n").and_then(StructuredValue::as_i64), Some(id));
            }
            assert!(h.worker.pending.is_empty());
        }
    }

    #[test]
    fn each_request_is_written_as_one_line() {
        let mut h = harness();
        let _a = request(&mut h.worker, 1i64);
        let _b = request(&mut h.worker, "b");

        let first = h.queue.try_recv().unwrap();
        let second = h.queue.try_recv().unwrap();
        assert!(h.queue.try_recv().is_err());
        assert_eq!(
            first.bytes,
            b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"echo\"}\n".to_vec()
        );
        assert!(matches!(second.ack, WriteAck::Request(RequestId::String(ref s)) if s == "b"));
    }

    #[test]
    fn unknown_and_mistyped_ids_are_dropped() {
        let mut h = harness();
        let mut rx = request(&mut h.worker, 1i64);

        stdout(&mut h.worker, &response_line(99));
        stdout(&mut h.worker, "{\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":{}}\n");
        stdout(&mut h.worker, "{\"jsonrpc\":\"2.0\",\"result\":{}}\n");
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(h.worker.pending.len(), 1);

        stdout(&mut h.worker, &response_line(1));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn malformed_lines_do_not_disturb_later_ones() {
        let mut h = harness();
        let mut rx = request(&mut h.worker, 1i64);

        stdout(&mut h.worker, "this is not json\n{\"jsonrpc\":\"2.0\",\"id\":1,");
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
        stdout(&mut h.worker, "\"result\":{\"ok\":true}}\n");

        let result = rx.try_recv().unwrap().unwrap().into_result().unwrap();
        assert_eq!(result.get("ok").and_then(StructuredValue::as_bool), Some(true));
    }

    #[test]
    fn server_messages_are_not_correlated() {
        let mut h = harness();
        let mut rx = request(&mut h.worker, 1i64);

        stdout(&mut h.worker, "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"roots/list\"}\n");
        stdout(&mut h.worker, "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n");
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(h.worker.pending.len(), 1);
    }

    #[test]
    fn duplicate_in_flight_id_is_rejected() {
        let mut h = harness();
        let mut first = request(&mut h.worker, 7i64);
        let mut second = request(&mut h.worker, 7i64);

        assert!(matches!(
            second.try_recv().unwrap(),
            Err(ClientError::Encoding(msg)) if msg.contains("already in flight")
        ));
        assert_eq!(first.try_recv().unwrap_err(), TryRecvError::Empty);
        assert!(h.queue.try_recv().is_ok());
        assert!(h.queue.try_recv().is_err());
    }

    #[test]
    fn write_failure_fails_only_that_request() {
        let mut h = harness();
        let mut rx = request(&mut h.worker, 1i64);
        let mut other = request(&mut h.worker, 2i64);

        h.worker.handle(Command::WriteFailed {
            id: RequestId::Number(1),
            error: "Broken pipe".into(),
        });
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ClientError::ConnectionFailed(msg)) if msg.contains("Broken pipe")
        ));
        assert_eq!(other.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(h.worker.pending.len(), 1);
    }

    #[test]
    fn exit_fails_pending_with_code_and_stderr() {
        let mut h = harness();
        h.worker.handle(Command::Stderr(b"boom\n".to_vec()));
        let mut rx = request(&mut h.worker, 1i64);

        assert_eq!(h.worker.handle(Command::Exited(Some(7))), Step::Draining);
        assert_eq!(h.worker.handle(Command::Closed(Stream::Stdout)), Step::Continue);
        assert_eq!(h.worker.handle(Command::Closed(Stream::Stderr)), Step::Done);

        assert_eq!(
            rx.try_recv().unwrap(),
            Err(ClientError::ProcessTerminated {
                exit_code: Some(7),
                stderr: Some("boom".into()),
            })
        );
        assert!(matches!(
            &*lock(&h.lifecycle),
            Lifecycle::Exited { exit_code: Some(7), stderr: Some(s) } if s == "boom"
        ));
    }

    #[test]
    fn output_after_exit_is_delivered_before_flush() {
        let mut h = harness();
        let mut rx = request(&mut h.worker, 1i64);

        h.worker.handle(Command::Closed(Stream::Stderr));
        assert_eq!(h.worker.handle(Command::Exited(Some(0))), Step::Draining);
        stdout(&mut h.worker, &response_line(1));
        assert_eq!(h.worker.handle(Command::Closed(Stream::Stdout)), Step::Done);

        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn requests_after_exit_are_refused() {
        let mut h = harness();
        h.worker.handle(Command::Exited(None));
        let mut rx = request(&mut h.worker, 1i64);
        assert_eq!(rx.try_recv().unwrap(), Err(ClientError::NotConnected));
        assert!(h.worker.pending.is_empty());
    }

    #[test]
    fn exit_of_an_older_generation_does_not_touch_the_new_one() {
        let mut h = harness();
        h.worker.generation = 0;
        h.worker.handle(Command::Closed(Stream::Stdout));
        h.worker.handle(Command::Closed(Stream::Stderr));
        assert_eq!(h.worker.handle(Command::Exited(Some(1))), Step::Done);
        assert!(matches!(&*lock(&h.lifecycle), Lifecycle::Running { .. }));
    }

    #[test]
    fn stop_leaves_nothing_behind() {
        let mut h = harness();
        let mut rx = request(&mut h.worker, 1i64);
        stdout(&mut h.worker, "{\"jsonrpc\":\"2.0\",\"id\":");
        h.worker.handle(Command::Stderr(b"warming up".to_vec()));

        let (done, mut stopped) = oneshot::channel();
        assert_eq!(h.worker.handle(Command::Stop { done }), Step::Done);

        assert_eq!(rx.try_recv().unwrap(), Err(ClientError::NotConnected));
        assert!(stopped.try_recv().is_ok());
        assert!(h.worker.pending.is_empty());
        assert!(h.worker.codec.is_empty());
        assert!(h.worker.stderr.is_empty());
        assert!(h.worker.outgoing.is_none());
    }

    #[test]
    fn notifications_are_queued_with_their_ack() {
        let mut h = harness();
        let (ack, _written) = oneshot::channel();
        h.worker.handle(Command::Notify {
            notification: JsonRpcNotification::new("notifications/initialized", None),
            ack,
        });
        let queued = h.queue.try_recv().unwrap();
        assert!(matches!(queued.ack, WriteAck::Notification(_)));
        assert!(queued.bytes.ends_with(b"}\n"));
        assert!(h.worker.pending.is_empty());
    }

    #[test]
    fn observer_sees_all_traffic() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: TrafficObserver = Arc::new(move |event: &TrafficEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        let mut h = harness_with(Some(observer));

        let _rx = request(&mut h.worker, 1i64);
        let (ack, _written) = oneshot::channel();
        h.worker.handle(Command::Notify {
            notification: JsonRpcNotification::new("notifications/initialized", None),
            ack,
        });
        stdout(&mut h.worker, &response_line(1));
        stdout(&mut h.worker, &response_line(42));
        h.worker.handle(Command::Stderr(b"log line\n".to_vec()));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert!(matches!(&seen[0], TrafficEvent::Request(r) if r.method == "echo"));
        assert!(matches!(&seen[1], TrafficEvent::Notification(_)));
        assert!(matches!(&seen[2], TrafficEvent::Response(r) if r.id == Some(RequestId::Number(1))));
        assert!(matches!(&seen[3], TrafficEvent::Response(r) if r.id == Some(RequestId::Number(42))));
        assert_eq!(seen[4], TrafficEvent::Stderr("log line\n".into()));
    }

    #[test]
    fn every_stderr_chunk_reaches_the_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: TrafficObserver = Arc::new(move |event: &TrafficEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        let mut h = harness_with(Some(observer));

        h.worker.handle(Command::Stderr(b"bad \xff byte".to_vec()));
        h.worker.handle(Command::Stderr(b"\xc3".to_vec()));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                TrafficEvent::Stderr("bad \u{FFFD} byte".into()),
                TrafficEvent::Stderr("\u{FFFD}".into()),
            ]
        );

        h.worker.handle(Command::Exited(Some(1)));
        h.worker.handle(Command::Closed(Stream::Stdout));
        assert_eq!(h.worker.handle(Command::Closed(Stream::Stderr)), Step::Done);
        assert!(matches!(
            &*lock(&h.lifecycle),
            Lifecycle::Exited { stderr: Some(s), .. } if s == "bad \u{FFFD} byte\u{FFFD}"
        ));
    }

    #[test]
    fn abandoned_requests_are_pruned_on_next_send() {
        let mut h = harness();
        let abandoned: Vec<_> = (0..1000i64).map(|id| request(&mut h.worker, id)).collect();
        assert_eq!(h.worker.pending.len(), 1000);
        drop(abandoned);

        let mut live = request(&mut h.worker, 5i64);
        assert_eq!(h.worker.pending.len(), 1);
        assert_eq!(live.try_recv().unwrap_err(), TryRecvError::Empty);

        stdout(&mut h.worker, &response_line(5));
        assert!(live.try_recv().unwrap().is_ok());
        assert!(h.worker.pending.is_empty());
    }

    #[tokio::test]
    async fn worker_flushes_after_grace_when_pipes_stay_open() {
        let h = harness();
        let (commands, inbox) = mpsc::unbounded_channel();
        let worker = tokio::spawn(h.worker.run(inbox));

        let (reply, rx) = oneshot::channel();
        commands
            .send(Command::Request {
                request: JsonRpcRequest::new("echo", None, 1i64),
                reply,
            })
            .unwrap();
        commands.send(Command::Exited(Some(3))).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(ClientError::ProcessTerminated { exit_code: Some(3), stderr: None })
        ));

        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        let (reply, _rx) = oneshot::channel();
        assert!(
            commands
                .send(Command::Request {
                    request: JsonRpcRequest::new("echo", None, 2i64),
                    reply,
                })
                .is_err()
        );
    }

    #[tokio::test]
    async fn writer_writes_lines_in_order_and_acks_notifications() {
        let (client, server) = tokio::io::duplex(1024);
        let (queue_tx, queue) = mpsc::unbounded_channel();
        let (events, _inbox) = mpsc::unbounded_channel();
        let writer = spawn_writer(client, queue, events);

        queue_tx
            .send(Outgoing {
                bytes: b"first\n".to_vec(),
                ack: WriteAck::Request(RequestId::Number(1)),
            })
            .unwrap();
        let (ack, written) = oneshot::channel();
        queue_tx
            .send(Outgoing {
                bytes: b"second\n".to_vec(),
                ack: WriteAck::Notification(ack),
            })
            .unwrap();

        assert_eq!(written.await.unwrap(), Ok(()));
        let mut lines = tokio::io::BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("second"));

        drop(queue_tx);
        writer.await.unwrap();
    }

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn writer_reports_failed_request_writes() {
        let (queue_tx, queue) = mpsc::unbounded_channel();
        let (events, mut inbox) = mpsc::unbounded_channel();
        let _writer = spawn_writer(BrokenPipe, queue, events);

        queue_tx
            .send(Outgoing {
                bytes: b"{}\n".to_vec(),
                ack: WriteAck::Request(RequestId::Number(5)),
            })
            .unwrap();
        match inbox.recv().await {
            Some(Command::WriteFailed { id, .. }) => assert_eq!(id, RequestId::Number(5)),
            _ => panic!("expected a write failure"),
        }

        let (ack, written) = oneshot::channel();
        queue_tx
            .send(Outgoing {
                bytes: b"{}\n".to_vec(),
                ack: WriteAck::Notification(ack),
            })
            .unwrap();
        assert!(matches!(
            written.await.unwrap(),
            Err(ClientError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn transport_state_starts_stopped() {
        let transport = SubprocessTransport::new(ServerLaunch::new("/bin/true"));
        assert_eq!(transport.state(), TransportState::Stopped);
        assert!(!transport.is_running());
    }
}
