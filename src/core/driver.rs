//! Driving loop
//!
//! The [`Driver`] owns the [`Bench`] (and through it the transport, session
//! and sample buffer) and is the only code that mutates them. Front ends talk
//! to it through a [`DriverHandle`]:
//! - commands go in over an mpsc channel, each with an optional responder
//! - a [`BenchView`] comes out over a watch channel, refreshed every tick
//!
//! Per tick the loop publishes the view, handles at most one command, then
//! runs one pipeline step if a test is running.
//!
//! Discovery runs on the blocking pool. While it is in flight the loop keeps
//! reading the queue: Shutdown and Disconnect cancel the search, anything
//! else is refused as not allowed while Connecting.

use super::bench::{Bench, BenchCommand, BenchError, BenchView, CommandOutcome};
use super::discovery::DiscoveryTask;
use super::session::SessionState;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 32;

/// Errors seen by a [`DriverHandle`]
#[derive(Error, Debug)]
pub enum DriverError {
    /// The loop has ended
    #[error("driver stopped")]
    Stopped,

    /// The command itself failed
    #[error(transparent)]
    Command(#[from] BenchError),
}

type Responder = oneshot::Sender<Result<CommandOutcome, BenchError>>;

struct Request {
    command: BenchCommand,
    responder: Option<Responder>,
}

/// Cloneable front-end handle to a running [`Driver`]
#[derive(Clone)]
pub struct DriverHandle {
    cmd_tx: mpsc::Sender<Request>,
    view_rx: watch::Receiver<BenchView>,
}

impl DriverHandle {
    /// Queue a command and wait for its result
    pub async fn send_command(&self, command: BenchCommand) -> Result<CommandOutcome, DriverError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Request {
                command,
                responder: Some(tx),
            })
            .await
            .map_err(|_| DriverError::Stopped)?;
        Ok(rx.await.map_err(|_| DriverError::Stopped)??)
    }

    /// Queue a command without waiting; usable from non-async contexts such
    /// as a signal handler. Returns false if the queue is full or closed.
    pub fn notify(&self, command: BenchCommand) -> bool {
        self.cmd_tx
            .try_send(Request {
                command,
                responder: None,
            })
            .is_ok()
    }

    /// Latest published view
    pub fn view(&self) -> BenchView {
        self.view_rx.borrow().clone()
    }

    /// Subscribe to view updates
    pub fn view_receiver(&self) -> watch::Receiver<BenchView> {
        self.view_rx.clone()
    }

    /// Resolves once the driving loop has ended
    pub async fn closed(&self) {
        self.cmd_tx.closed().await;
    }
}

/// Tick-driven owner of a [`Bench`]
pub struct Driver {
    bench: Bench,
    tick: Duration,
    cmd_rx: mpsc::Receiver<Request>,
    view_tx: watch::Sender<BenchView>,
}

impl Driver {
    /// Wrap a bench; `tick` bounds how often commands and telemetry are serviced
    pub fn new(bench: Bench, tick: Duration) -> (Self, DriverHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (view_tx, view_rx) = watch::channel(bench.view());
        let driver = Self {
            bench,
            tick,
            cmd_rx,
            view_tx,
        };
        (driver, DriverHandle { cmd_tx, view_rx })
    }

    /// Run until a Shutdown command arrives or every handle is gone.
    /// The bench is always torn down before this returns.
    pub async fn run(mut self) -> BenchView {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Driver started ({:?} tick)", self.tick);

        loop {
            ticker.tick().await;
            self.publish();

            match self.cmd_rx.try_recv() {
                Ok(request) => {
                    if !self.handle(request).await {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    info!("All driver handles dropped");
                    break;
                }
            }

            self.bench.tick();
        }

        self.bench.shutdown();
        self.publish();
        info!("Driver stopped");
        self.view_tx.borrow().clone()
    }

    /// Returns false when the loop should end
    async fn handle(&mut self, request: Request) -> bool {
        let Request { command, responder } = request;
        debug!("Command: {}", command);
        let label = command.to_string();

        let (result, keep_running) = match command {
            BenchCommand::Shutdown => {
                respond(responder, Ok(CommandOutcome::Done));
                return false;
            }
            BenchCommand::Connect => match self.bench.begin_connect() {
                Ok(search) => {
                    // let consumers see Connecting while discovery runs
                    self.publish();
                    self.await_discovery(search).await
                }
                Err(e) => (Err(e), true),
            },
            other => (self.bench.apply(other).await, true),
        };

        if let Err(e) = &result {
            warn!("{} failed: {}", label, e);
        }
        self.publish();
        respond(responder, result);
        keep_running
    }

    /// Wait for a search while still draining the queue. The flag is false
    /// when a shutdown arrived (or every handle went away) meanwhile.
    async fn await_discovery(&mut self, search: DiscoveryTask) -> (Result<CommandOutcome, BenchError>, bool) {
        let canceller = search.clone();
        let running = search.run();
        tokio::pin!(running);

        let mut keep_running = true;
        let mut disconnect = false;
        let mut waiting = Vec::new();

        let result = loop {
            tokio::select! {
                result = &mut running => break result,
                request = self.cmd_rx.recv(), if keep_running => match request {
                    Some(Request { command: BenchCommand::Shutdown, responder }) => {
                        info!("Shutdown during discovery, cancelling the search");
                        canceller.cancel();
                        keep_running = false;
                        waiting.extend(responder);
                    }
                    Some(Request { command: BenchCommand::Disconnect, responder }) => {
                        info!("Disconnect during discovery, cancelling the search");
                        canceller.cancel();
                        disconnect = true;
                        waiting.extend(responder);
                    }
                    Some(Request { command, responder }) => {
                        debug!("Refusing {} during discovery", command);
                        respond(responder, Err(BenchError::rejected(command.name(), SessionState::Connecting)));
                    }
                    None => {
                        info!("All driver handles dropped during discovery");
                        canceller.cancel();
                        keep_running = false;
                    }
                },
            }
        };

        let outcome = self.bench.finish_connect(result).map(|()| CommandOutcome::Done);
        // the search may have finished before it saw the cancel
        if disconnect && self.bench.state() == SessionState::Idle {
            let _ = self.bench.disconnect();
        }
        self.publish();
        for tx in waiting {
            let _ = tx.send(Ok(CommandOutcome::Done));
        }
        (outcome, keep_running)
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.bench.view());
    }
}

fn respond(responder: Option<Responder>, result: Result<CommandOutcome, BenchError>) {
    if let Some(tx) = responder {
        // the caller may have stopped waiting
        let _ = tx.send(result);
    }
}
