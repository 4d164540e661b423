//! Async controller that owns the session state machine and drives the recolor provider.
//!
//! The session lives inside a single tokio task. User commands and call
//! completions arrive over channels and are applied one at a time, so no
//! locking is involved. Every change is published on a watch channel.

use crate::error::{RecolorError, Result};
use crate::image::{RecolorProvider, RecolorResult, UploadedImage};
use crate::session::machine::{Session, Ticket, DEFAULT_COOLDOWN};
use crate::session::state::{ProcessingState, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::Instant;

const COMMAND_BUFFER: usize = 16;

enum Command {
    Upload {
        image: UploadedImage,
        reply: oneshot::Sender<()>,
    },
    Start {
        reply: oneshot::Sender<Result<()>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

struct Completion {
    generation: u64,
    outcome: Result<RecolorResult>,
}

/// The provider call runs in its own task; a watcher awaits it so that a
/// panic still produces a [`Completion`].
struct InFlight {
    call: AbortHandle,
    watcher: JoinHandle<()>,
}

/// Builder for [`RecolorController`].
#[derive(Debug, Clone)]
pub struct RecolorControllerBuilder {
    cooldown: Duration,
}

impl Default for RecolorControllerBuilder {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

impl RecolorControllerBuilder {
    /// Creates a new builder with the default cooldown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum interval between accepted `start` calls.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Spawns the controller task on the current tokio runtime.
    pub fn spawn(self, provider: Arc<dyn RecolorProvider>) -> RecolorController {
        let session = Session::new(self.cooldown);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot(Instant::now()));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            session,
            provider,
            completion_tx,
            in_flight: None,
            snapshots: snapshot_tx,
        };
        tokio::spawn(actor.run(command_rx, completion_rx));

        RecolorController {
            commands: command_tx,
            snapshots: snapshot_rx,
        }
    }
}

/// Handle used by the presentation layer.
///
/// State can only change through [`upload`](Self::upload),
/// [`start`](Self::start) and [`reset`](Self::reset). Dropping every handle
/// stops the controller and aborts any in-flight call.
#[derive(Debug, Clone)]
pub struct RecolorController {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl RecolorController {
    /// Creates a new `RecolorControllerBuilder`.
    pub fn builder() -> RecolorControllerBuilder {
        RecolorControllerBuilder::new()
    }

    /// Spawns a controller with the default cooldown.
    pub fn spawn(provider: Arc<dyn RecolorProvider>) -> Self {
        Self::builder().spawn(provider)
    }

    /// Replaces the held image. Valid in any state.
    pub async fn upload(&self, image: UploadedImage) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Upload { image, reply }).await?;
        rx.await.map_err(|_| RecolorError::ControllerClosed)
    }

    /// Starts processing the held image.
    ///
    /// Returns once the call has been dispatched, not when it finishes; use
    /// [`settled`](Self::settled) or [`subscribe`](Self::subscribe) to observe
    /// the outcome. Rejections are returned as errors and, except for
    /// [`RecolorError::AlreadyProcessing`], are also reflected in the state.
    pub async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { reply }).await?;
        rx.await.map_err(|_| RecolorError::ControllerClosed)?
    }

    /// Clears the session, including the cooldown. Valid in any state.
    pub async fn reset(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reset { reply }).await?;
        rx.await.map_err(|_| RecolorError::ControllerClosed)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Waits until no call is in flight and returns that snapshot.
    pub async fn settled(&self) -> Result<Snapshot> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|s| s.state != ProcessingState::Processing)
            .await
            .map_err(|_| RecolorError::ControllerClosed)?;
        Ok(snapshot.clone())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RecolorError::ControllerClosed)
    }
}

struct Actor {
    session: Session,
    provider: Arc<dyn RecolorProvider>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    in_flight: Option<InFlight>,
    snapshots: watch::Sender<Snapshot>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(done) = completions.recv() => self.handle_completion(done),
            }
        }

        self.abort_in_flight();
        tracing::debug!("recolor controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Upload { image, reply } => {
                self.abort_in_flight();
                self.session.upload(image);
                self.publish();
                let _ = reply.send(());
            }
            Command::Start { reply } => {
                let outcome = self
                    .session
                    .start(Instant::now())
                    .map(|ticket| self.dispatch(ticket));
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::Reset { reply } => {
                self.abort_in_flight();
                self.session.reset();
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        if self.session.complete(done.generation, done.outcome) {
            self.in_flight = None;
            self.publish();
        }
    }

    fn dispatch(&mut self, ticket: Ticket) {
        let provider = Arc::clone(&self.provider);
        let completions = self.completion_tx.clone();

        let image = ticket.image;
        let call = tokio::spawn(async move { provider.recolor(&image).await });
        let abort = call.abort_handle();

        let watcher = tokio::spawn(async move {
            let outcome = call.await.unwrap_or_else(|e| Err(task_failure(e)));
            let _ = completions.send(Completion {
                generation: ticket.generation,
                outcome,
            });
        });

        self.in_flight = Some(InFlight {
            call: abort,
            watcher,
        });
    }

    fn abort_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.watcher.abort();
            in_flight.call.abort();
        }
    }

    fn publish(&self) {
        self.snapshots
            .send_replace(self.session.snapshot(Instant::now()));
    }
}

fn task_failure(err: JoinError) -> RecolorError {
    if !err.is_panic() {
        return RecolorError::ProviderTask("cancelled".into());
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".into());
    tracing::error!(%message, "recolor provider panicked");
    RecolorError::ProviderTask(format!("panicked: {message}"))
}
