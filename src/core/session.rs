//! Interactive session controller.
//!
//! Runs one long-lived external command on a dedicated worker thread and
//! watches its output for the confirmation prompt. The worker reports back
//! through an ordered event channel (`Progress`, `ConfirmationNeeded`,
//! `Finished`); the interface answers through [`SessionHandle::decide`] and
//! may abort at any time through [`SessionHandle::cancel`].
//!
//! Phases of the worker:
//!
//! ```text
//! Spawned -> AwaitingPromptOrEof --prompt--> AwaitingDecision --yes--> AwaitingPromptOrEof
//!                 |        \                        \--no/cancel--> Terminated (Aborted)
//!                 |         \--timeout--> Terminated (Failure)
//!                 \--stream closed--> Draining --all closed--> Terminated
//! ```

use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::{debug, info, warn};

use super::RaidError;

/// Literal text mdadm prints when it finds residual metadata on a member
pub const CONFIRMATION_MARKER: &str = "Continue creating array?";

const READ_CHUNK: usize = 1024;
const REAP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long the session waits for any output before giving up
    pub prompt_timeout: Duration,
    /// Time a stopped process gets to exit before it is killed
    pub stop_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Spawned,
    AwaitingPromptOrEof,
    AwaitingDecision,
    Draining,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Exit status was non-zero or missing; the array may be half-built
    Ambiguous,
    TimedOut,
    /// Spawning, reading or writing the process failed
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure(FailureCause),
    Aborted,
}

/// Final record of a session. Produced exactly once, after the process is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub command: String,
    pub verdict: Verdict,
    pub message: String,
    pub exit_code: Option<i32>,
    pub decision: Option<bool>,
    pub output_lines: Vec<String>,
}

impl SessionOutcome {
    pub fn succeeded(&self) -> bool {
        self.verdict == Verdict::Success
    }

    /// The error to surface for this outcome, if any.
    ///
    /// A "no" at the prompt is a clean abort. A process stopped after the
    /// user said yes may have written superblocks already, so its outcome
    /// is unknown.
    pub fn error(&self) -> Option<RaidError> {
        match &self.verdict {
            Verdict::Success => None,
            Verdict::Aborted if self.decision == Some(true) => {
                Some(RaidError::AmbiguousOutcome(self.message.clone()))
            }
            Verdict::Aborted => None,
            Verdict::Failure(FailureCause::Ambiguous) => {
                Some(RaidError::AmbiguousOutcome(self.message.clone()))
            }
            Verdict::Failure(FailureCause::TimedOut | FailureCause::Session) => {
                Some(RaidError::Session(self.message.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Progress(String),
    ConfirmationNeeded,
    Finished(SessionOutcome),
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Everything the worker can be woken up by
#[derive(Debug)]
enum Feed {
    Line(String),
    Prompt(String),
    Closed(Stream),
    ReadFailed(Stream, String),
    Cancel,
}

#[derive(Debug, Default)]
struct GateSlot {
    awaiting: bool,
    decision: Option<bool>,
    cancelled: bool,
}

/// One-writer/one-reader slot carrying the yes/no answer across threads
#[derive(Debug, Default)]
struct DecisionGate {
    slot: Mutex<GateSlot>,
    ready: Condvar,
}

impl DecisionGate {
    fn lock(&self) -> std::sync::MutexGuard<'_, GateSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the gate for a decision. Returns false if already cancelled.
    fn open(&self) -> bool {
        let mut slot = self.lock();
        slot.awaiting = !slot.cancelled;
        slot.decision = if slot.cancelled { Some(false) } else { None };
        !slot.cancelled
    }

    fn decide(&self, proceed: bool) -> bool {
        let mut slot = self.lock();
        if !slot.awaiting || slot.decision.is_some() {
            return false;
        }
        slot.decision = Some(proceed);
        self.ready.notify_all();
        true
    }

    fn cancel(&self) {
        let mut slot = self.lock();
        slot.cancelled = true;
        if slot.awaiting && slot.decision.is_none() {
            slot.decision = Some(false);
        }
        self.ready.notify_all();
    }

    /// Blocks until the interface writes a decision (or cancels)
    fn wait(&self) -> bool {
        let mut slot = self.lock();
        while slot.decision.is_none() {
            slot = self.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
        slot.awaiting = false;
        slot.decision.take().unwrap_or(false)
    }

    fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }
}

/// Interface-side handle of a running session.
///
/// Dropping the handle cancels the session.
pub struct SessionHandle {
    command: String,
    gate: Arc<DecisionGate>,
    feed: mpsc::Sender<Feed>,
    events: UnboundedReceiver<SessionEvent>,
    worker: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Answers a pending confirmation. Returns false when nothing is awaiting one.
    pub fn decide(&self, proceed: bool) -> bool {
        let accepted = self.gate.decide(proceed);
        if accepted {
            info!(proceed, "confirmation answered");
        }
        accepted
    }

    /// Resolves a pending confirmation to "no", or stops the process if it is
    /// already past the decision point. Either way the verdict becomes Aborted.
    pub fn cancel(&self) {
        info!(command = %self.command, "cancelling session");
        self.gate.cancel();
        let _ = self.feed.send(Feed::Cancel);
    }

    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Blocking variant for callers outside the async runtime
    pub fn blocking_next_event(&mut self) -> Option<SessionEvent> {
        self.events.blocking_recv()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                self.gate.cancel();
                let _ = self.feed.send(Feed::Cancel);
            }
        }
    }
}

/// Starts `argv` on a worker thread and returns the interface handle.
///
/// `on_exit` runs on the worker right before `Finished` is emitted.
pub fn spawn_session(
    argv: Vec<String>,
    config: SessionConfig,
    on_exit: Option<Box<dyn FnOnce() + Send>>,
) -> SessionHandle {
    let command = argv.join(" ");
    let gate = Arc::new(DecisionGate::default());
    let (feed_tx, feed_rx) = mpsc::channel();
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();

    let spawn_failed = events_tx.clone();
    let worker = {
        let gate = gate.clone();
        let feed_tx = feed_tx.clone();
        let command = command.clone();
        thread::Builder::new()
            .name("raidie-session".to_string())
            .spawn(move || {
                let mut worker = Worker {
                    command: command.clone(),
                    config,
                    gate,
                    feed_tx,
                    feed_rx,
                    events: events_tx.clone(),
                    transcript: Vec::new(),
                    decision: None,
                    phase: Phase::Spawned,
                };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run(&argv)))
                    .unwrap_or_else(|_| SessionOutcome {
                        command,
                        verdict: Verdict::Failure(FailureCause::Session),
                        message: "Error: session worker panicked".to_string(),
                        exit_code: None,
                        decision: None,
                        output_lines: Vec::new(),
                    });

                info!(verdict = ?outcome.verdict, exit_code = ?outcome.exit_code, "session finished");
                if let Some(on_exit) = on_exit {
                    on_exit();
                }
                let _ = events_tx.send(SessionEvent::Finished(outcome));
            })
    };

    let worker = match worker {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "could not start session worker");
            let _ = spawn_failed.send(SessionEvent::Finished(SessionOutcome {
                command: command.clone(),
                verdict: Verdict::Failure(FailureCause::Session),
                message: format!("Error: {e}"),
                exit_code: None,
                decision: None,
                output_lines: Vec::new(),
            }));
            None
        }
    };

    SessionHandle {
        command,
        gate,
        feed: feed_tx,
        events: events_rx,
        worker,
    }
}

struct Worker {
    command: String,
    config: SessionConfig,
    gate: Arc<DecisionGate>,
    feed_tx: mpsc::Sender<Feed>,
    feed_rx: mpsc::Receiver<Feed>,
    events: UnboundedSender<SessionEvent>,
    transcript: Vec<String>,
    decision: Option<bool>,
    phase: Phase,
}

impl Worker {
    fn run(&mut self, argv: &[String]) -> SessionOutcome {
        let Some((program, args)) = argv.split_first() else {
            return self.finish(Verdict::Failure(FailureCause::Session), "Error: empty command line".to_string(), None);
        };

        debug!(command = %self.command, "spawning interactive session");
        let child = match Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return self.finish(Verdict::Failure(FailureCause::Session), format!("Error: {e}"), None);
            }
        };
        let mut child = ChildGuard::new(child, self.config.stop_grace);

        let mut stdin = child.process.stdin.take();
        if let Some(stdout) = child.process.stdout.take() {
            spawn_reader(stdout, Stream::Stdout, self.feed_tx.clone());
        }
        if let Some(stderr) = child.process.stderr.take() {
            spawn_reader(stderr, Stream::Stderr, self.feed_tx.clone());
        }

        let mut open_streams = 2;
        self.enter(Phase::AwaitingPromptOrEof);

        loop {
            let next = match self.phase {
                Phase::Draining => self.feed_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                _ => self.feed_rx.recv_timeout(self.config.prompt_timeout),
            };

            match next {
                Ok(Feed::Line(line)) => self.emit_line(line),
                Ok(Feed::Prompt(text)) => {
                    self.emit_line(text);
                    self.enter(Phase::AwaitingDecision);
                    let proceed = self.gate.open() && {
                        let _ = self.events.send(SessionEvent::ConfirmationNeeded);
                        self.gate.wait()
                    };

                    if proceed && !self.gate.is_cancelled() {
                        self.decision = Some(true);
                        if let Err(e) = answer(stdin.as_mut(), "y") {
                            let stopped = self.stop(&mut child.process, &mut stdin);
                            return self.finish_stopped(
                                stopped,
                                Verdict::Failure(FailureCause::Session),
                                format!("Error: {e}"),
                            );
                        }
                        self.enter(Phase::AwaitingPromptOrEof);
                    } else {
                        self.decision = Some(false);
                        let _ = answer(stdin.as_mut(), "n");
                        let stopped = self.stop(&mut child.process, &mut stdin);
                        return self.finish_stopped(stopped, Verdict::Aborted, "RAID creation aborted by user.".to_string());
                    }
                }
                Ok(Feed::Closed(stream)) => {
                    debug!(?stream, "output stream closed");
                    open_streams -= 1;
                    if open_streams == 0 {
                        break;
                    }
                    self.enter(Phase::Draining);
                }
                Ok(Feed::ReadFailed(stream, e)) => {
                    warn!(?stream, error = %e, "reading session output failed");
                    let stopped = self.stop(&mut child.process, &mut stdin);
                    let verdict = self.interrupted_verdict(FailureCause::Session);
                    return self.finish_stopped(stopped, verdict, format!("Error: {e}"));
                }
                Ok(Feed::Cancel) => {
                    let stopped = self.stop(&mut child.process, &mut stdin);
                    let message = if self.decision == Some(true) {
                        "RAID creation cancelled after it was confirmed. The array may be partially built; please check the output."
                    } else {
                        "RAID creation cancelled."
                    };
                    return self.finish_stopped(stopped, Verdict::Aborted, message.to_string());
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout = ?self.config.prompt_timeout, "session produced no output in time");
                    let stopped = self.stop(&mut child.process, &mut stdin);
                    let seconds = self.config.prompt_timeout.as_secs_f32();
                    let (verdict, message) = if self.decision == Some(true) {
                        (
                            Verdict::Failure(FailureCause::Ambiguous),
                            format!(
                                "RAID creation stopped after {seconds}s without output, after it was confirmed. The array may be partially built; please check the output."
                            ),
                        )
                    } else {
                        (
                            Verdict::Failure(FailureCause::TimedOut),
                            format!("RAID creation timed out after {seconds}s without output."),
                        )
                    };
                    return self.finish_stopped(stopped, verdict, message);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        drop(stdin);
        let status = child.process.wait();
        match status {
            Ok(status) if status.success() => {
                self.finish(Verdict::Success, "RAID creation completed successfully.".to_string(), status.code())
            }
            Ok(status) => self.finish(
                Verdict::Failure(FailureCause::Ambiguous),
                "RAID creation may have failed. Please check the output.".to_string(),
                status.code(),
            ),
            Err(e) => self.finish(Verdict::Failure(FailureCause::Ambiguous), format!("Error: {e}"), None),
        }
    }

    /// Once the user said yes, mdadm may already be writing, so any failure is of unknown outcome
    fn interrupted_verdict(&self, cause: FailureCause) -> Verdict {
        if self.decision == Some(true) {
            Verdict::Failure(FailureCause::Ambiguous)
        } else {
            Verdict::Failure(cause)
        }
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "session phase");
            self.phase = phase;
        }
    }

    fn emit_line(&mut self, line: String) {
        self.transcript.push(line.clone());
        let _ = self.events.send(SessionEvent::Progress(line));
    }

    /// Asks the process to exit, escalating to SIGKILL after the grace period.
    ///
    /// Stdin is closed first so a process blocked reading its answer sees EOF.
    /// Every wait is bounded: a process that cannot be signalled is reported,
    /// never waited on forever.
    fn stop(&mut self, child: &mut Child, stdin: &mut Option<ChildStdin>) -> std::io::Result<Option<i32>> {
        drop(stdin.take());

        if let Some(status) = child.try_wait()? {
            return Ok(status.code());
        }

        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: `pid` belongs to a child we have not reaped yet, so it cannot have been recycled.
            if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
                warn!(command = %self.command, error = %std::io::Error::last_os_error(), "SIGTERM not delivered");
            }
        }
        if let Some(status) = reap_within(child, self.config.stop_grace)? {
            return Ok(status.code());
        }

        warn!(command = %self.command, "process ignored SIGTERM, killing");
        child.kill()?;
        match reap_within(child, self.config.stop_grace)? {
            Some(status) => Ok(status.code()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "process did not exit after SIGKILL",
            )),
        }
    }

    /// Finishes a session whose process was stopped by the worker
    fn finish_stopped(
        &mut self,
        stopped: std::io::Result<Option<i32>>,
        verdict: Verdict,
        message: String,
    ) -> SessionOutcome {
        match stopped {
            Ok(exit_code) => self.finish(verdict, message, exit_code),
            Err(e) => {
                warn!(command = %self.command, error = %e, "could not stop process");
                self.finish(
                    Verdict::Failure(FailureCause::Ambiguous),
                    format!("{message} Could not stop `{}`: {e}; it may still be running.", self.command),
                    None,
                )
            }
        }
    }

    fn finish(&mut self, verdict: Verdict, message: String, exit_code: Option<i32>) -> SessionOutcome {
        self.enter(Phase::Terminated);
        SessionOutcome {
            command: self.command.clone(),
            verdict,
            message,
            exit_code,
            decision: self.decision,
            output_lines: std::mem::take(&mut self.transcript),
        }
    }
}

/// Polls until the process has exited or `grace` runs out
fn reap_within(child: &mut Child, grace: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(REAP_POLL);
    }
}

/// Owns the spawned process. If the worker unwinds with the process still
/// running, it is killed and reaped before the panic verdict goes out.
struct ChildGuard {
    process: Child,
    grace: Duration,
}

impl ChildGuard {
    fn new(process: Child, grace: Duration) -> Self {
        Self { process, grace }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.process.try_wait() {
            warn!(pid = self.process.id(), "session process still running, killing");
            drop(self.process.stdin.take());
            if self.process.kill().is_ok() {
                let _ = reap_within(&mut self.process, self.grace);
            }
        }
    }
}

fn answer(stdin: Option<&mut ChildStdin>, reply: &str) -> std::io::Result<()> {
    let stdin = stdin.ok_or_else(|| std::io::Error::other("process stdin is closed"))?;
    writeln!(stdin, "{reply}")?;
    stdin.flush()
}

fn spawn_reader<R: Read + Send + 'static>(source: R, stream: Stream, feed: mpsc::Sender<Feed>) {
    thread::spawn(move || read_stream(source, stream, &feed));
}

/// Splits a byte stream into lines, surfacing an unterminated prompt as soon as it shows up
fn read_stream<R: Read>(mut source: R, stream: Stream, feed: &mpsc::Sender<Feed>) {
    let mut buffer = [0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = feed.send(Feed::ReadFailed(stream, e.to_string()));
                return;
            }
        };
        pending.extend_from_slice(&buffer[..read]);

        while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=newline).collect();
            if let Some(feed_item) = classify(&raw) {
                if feed.send(feed_item).is_err() {
                    return;
                }
            }
        }

        if String::from_utf8_lossy(&pending).contains(CONFIRMATION_MARKER) {
            let raw = std::mem::take(&mut pending);
            if let Some(feed_item) = classify(&raw) {
                if feed.send(feed_item).is_err() {
                    return;
                }
            }
        }
    }

    if let Some(feed_item) = classify(&pending) {
        let _ = feed.send(feed_item);
    }
    let _ = feed.send(Feed::Closed(stream));
}

fn classify(raw: &[u8]) -> Option<Feed> {
    let text = String::from_utf8_lossy(raw).trim().to_string();
    if text.is_empty() {
        None
    } else if text.contains(CONFIRMATION_MARKER) {
        Some(Feed::Prompt(text))
    } else {
        Some(Feed::Line(text))
    }
}

/// Allows at most one creation session per application instance.
#[derive(Debug, Clone, Default)]
pub struct CreationSlot {
    busy: Arc<AtomicBool>,
}

impl CreationSlot {
    /// Claims the slot; the returned guard frees it again when dropped.
    pub fn try_claim(&self) -> Option<SlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

pub struct SlotGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
