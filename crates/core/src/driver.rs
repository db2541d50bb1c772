//! Runs a [`Session`] on its own Tokio task.
//!
//! The task owns the session outright. Front ends talk to it through a
//! [`SessionHandle`]: every call is queued on a single-consumer channel and
//! answered over a oneshot, so calls and ticks are applied one at a time in
//! arrival order. Between calls the task sleeps until the clock's next
//! deadline. The committed step is published on a watch channel for
//! step indicators.

use std::path::PathBuf;

use beatgrid_transport::{SampleId, TrackId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::session::{Session, SessionEvent};
use crate::snapshot::{PlaybackState, SessionSnapshot};

const INBOX_CAPACITY: usize = 64;

type Job = Box<dyn FnOnce(&mut Session) + Send>;

enum Message {
    Run(Job),
    Close,
}

/// Published after every committed tick and every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepUpdate {
    pub step: usize,
    pub state: PlaybackState,
    /// Ticks committed since the driver started.
    pub ticks: u64,
}

/// Cheap, cloneable access to a driven session.
#[derive(Clone)]
pub struct SessionHandle {
    inbox: mpsc::Sender<Message>,
    steps: watch::Receiver<StepUpdate>,
}

/// Owner of the driver task.
pub struct SessionDriver {
    handle: SessionHandle,
    join: JoinHandle<()>,
}

/// Move `session` onto a new task on the current runtime.
pub fn spawn(session: Session) -> SessionDriver {
    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let (steps_tx, steps_rx) = watch::channel(StepUpdate {
        step: session.current_step(),
        state: session.state().into(),
        ticks: 0,
    });

    let join = tokio::spawn(run(session, inbox_rx, steps_tx));
    SessionDriver {
        handle: SessionHandle {
            inbox: inbox_tx,
            steps: steps_rx,
        },
        join,
    }
}

impl SessionDriver {
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Close the session and wait for the task to finish.
    pub async fn shutdown(self) {
        // already gone if the send fails
        let _ = self.handle.inbox.send(Message::Close).await;
        if let Err(err) = self.join.await {
            warn!(error = %err, "Session driver ended abnormally");
        }
    }
}

async fn run(
    mut session: Session,
    mut inbox: mpsc::Receiver<Message>,
    steps: watch::Sender<StepUpdate>,
) {
    info!(project = %session.project().id, "Session driver started");
    let mut ticks = 0u64;

    loop {
        let deadline = session.next_deadline();
        tokio::select! {
            biased;
            message = inbox.recv() => match message {
                Some(Message::Run(job)) => job(&mut session),
                Some(Message::Close) | None => break,
            },
            _ = sleep_until(deadline) => {
                for report in session.poll(now()) {
                    ticks += 1;
                    debug!(step = report.step, triggers = report.triggers.len(), "Step");
                }
            }
        }
        publish(&session, &steps, ticks);
    }

    session.close();
    info!("Session driver stopped");
}

fn publish(session: &Session, steps: &watch::Sender<StepUpdate>, ticks: u64) {
    let update = StepUpdate {
        step: session.current_step(),
        state: session.state().into(),
        ticks,
    };
    steps.send_if_modified(|current| {
        if *current == update {
            return false;
        }
        *current = update;
        true
    });
}

/// Tokio's clock, so paused-time tests drive the schedule.
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

impl SessionHandle {
    /// Run `f` on the driver task and return its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |session| {
            // the caller may have stopped waiting
            let _ = reply_tx.send(f(session));
        });
        self.inbox
            .send(Message::Run(job))
            .await
            .map_err(|_| CoreError::Closed)?;
        reply_rx.await.map_err(|_| CoreError::Closed)
    }

    /// Latest committed step and transport state.
    pub fn steps(&self) -> watch::Receiver<StepUpdate> {
        self.steps.clone()
    }

    pub async fn start(&self) -> Result<bool, CoreError> {
        self.call(|session| session.start(now())).await
    }

    pub async fn pause(&self) -> Result<bool, CoreError> {
        self.call(|session| session.pause()).await
    }

    pub async fn stop(&self) -> Result<(), CoreError> {
        self.call(|session| session.stop()).await
    }

    pub async fn set_tempo(&self, bpm: u32) -> Result<(), CoreError> {
        self.call(move |session| session.set_tempo(bpm)).await?
    }

    pub async fn set_step_count(&self, steps: usize) -> Result<(), CoreError> {
        self.call(move |session| session.set_step_count(steps)).await?
    }

    pub async fn toggle_step(&self, track: TrackId, step: usize) -> Result<Option<bool>, CoreError> {
        self.call(move |session| session.toggle_step(track, step))
            .await?
    }

    pub async fn add_track(&self, name: Option<String>) -> Result<TrackId, CoreError> {
        self.call(move |session| session.add_track(name)).await?
    }

    pub async fn remove_track(&self, track: TrackId) -> Result<bool, CoreError> {
        self.call(move |session| session.remove_track(track)).await
    }

    pub async fn set_volume(&self, track: TrackId, volume: u8) -> Result<bool, CoreError> {
        self.call(move |session| session.set_volume(track, volume))
            .await?
    }

    pub async fn set_pan(&self, track: TrackId, pan: u8) -> Result<bool, CoreError> {
        self.call(move |session| session.set_pan(track, pan)).await?
    }

    pub async fn set_mute(&self, track: TrackId, muted: bool) -> Result<bool, CoreError> {
        self.call(move |session| session.set_mute(track, muted))
            .await?
    }

    pub async fn set_solo(&self, track: TrackId, soloed: bool) -> Result<bool, CoreError> {
        self.call(move |session| session.set_solo(track, soloed))
            .await?
    }

    pub async fn set_master_volume(&self, volume: u8) -> Result<(), CoreError> {
        self.call(move |session| session.set_master_volume(volume))
            .await?
    }

    pub async fn bind_sample(
        &self,
        track: TrackId,
        sample: Option<SampleId>,
    ) -> Result<bool, CoreError> {
        self.call(move |session| session.bind_sample(track, sample))
            .await?
    }

    pub async fn set_effect(&self, track: TrackId, name: String, value: f32) -> Result<bool, CoreError> {
        self.call(move |session| session.set_effect(track, &name, value))
            .await?
    }

    pub async fn rename_track(&self, track: TrackId, name: String) -> Result<bool, CoreError> {
        self.call(move |session| session.rename_track(track, name))
            .await?
    }

    pub async fn rename(&self, name: String) -> Result<(), CoreError> {
        self.call(move |session| session.rename(name)).await
    }

    /// Returns the library size after the reload.
    pub async fn reload_library(&self) -> Result<usize, CoreError> {
        self.call(|session| session.reload_library()).await?
    }

    /// Start a preview on its own task; the load never holds up ticks.
    pub async fn preview(
        &self,
        sample: SampleId,
    ) -> Result<JoinHandle<Result<(), CoreError>>, CoreError> {
        let task = self.call(move |session| session.preview(sample)).await??;
        Ok(tokio::spawn(task.run()))
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, CoreError> {
        self.call(|session| session.snapshot()).await
    }

    pub async fn take_events(&self) -> Result<Vec<SessionEvent>, CoreError> {
        self.call(|session| session.take_events()).await
    }

    /// Bounce the pattern as it is now to `path`. Loading and mixing run
    /// off the driver task, so playback keeps ticking.
    pub async fn render_to_file(&self, path: PathBuf, loops: u32) -> anyhow::Result<()> {
        let job = self.call(move |session| session.render_job(loops)).await?;
        job.write(path).await
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.inbox.is_closed())
            .field("step", &*self.steps.borrow())
            .finish()
    }
}
