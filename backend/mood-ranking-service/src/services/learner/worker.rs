// Per-user single-writer feedback workers.
//
// Each user with pending feedback owns one task draining an unbounded
// channel, so acknowledgements never wait on learning. Idle workers
// unregister themselves, then drain and exit; the next message spawns a
// replacement. Workers for one user hold that user's lane for their whole
// lifetime, so a replacement starts only after its predecessor has drained.

use super::{LearnerError, LearningJob, OnlineLearner, Result};
use crate::models::StrategyKind;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

#[derive(Debug)]
pub enum WorkerMessage {
    Learn(Box<LearningJob>),
    SessionReward { strategy: StrategyKind, reward: f64 },
    /// Acknowledged once every earlier message has been processed
    Flush(oneshot::Sender<()>),
}

struct WorkerEntry {
    id: u64,
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

type Registry = Arc<DashMap<String, WorkerEntry>>;

pub struct FeedbackWorkers {
    learner: Arc<OnlineLearner>,
    senders: Registry,
    lanes: DashMap<String, Arc<Mutex<()>>>,
    next_id: AtomicU64,
    idle_timeout: Duration,
}

impl FeedbackWorkers {
    pub fn new(learner: Arc<OnlineLearner>, idle_timeout: Duration) -> Self {
        Self {
            learner,
            senders: Arc::new(DashMap::new()),
            lanes: DashMap::new(),
            next_id: AtomicU64::new(0),
            idle_timeout,
        }
    }

    pub fn learner(&self) -> &OnlineLearner {
        &self.learner
    }

    pub fn active(&self) -> usize {
        self.senders.len()
    }

    /// Queue a message for `user_id`, spawning the worker if needed
    pub fn dispatch(&self, user_id: &str, message: WorkerMessage) -> Result<()> {
        let mut message = message;
        for _ in 0..2 {
            let (id, sender) = {
                let entry = self
                    .senders
                    .entry(user_id.to_string())
                    .or_insert_with(|| self.spawn(user_id));
                (entry.id, entry.sender.clone())
            };

            match sender.send(message) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    // Worker closed between lookup and send
                    self.senders.remove_if(user_id, |_, e| e.id == id);
                    message = returned;
                }
            }
        }
        Err(LearnerError::WorkerUnavailable(user_id.to_string()))
    }

    /// Wait until everything queued for `user_id` so far has been applied
    pub async fn flush(&self, user_id: &str) -> Result<()> {
        if self.senders.contains_key(user_id) {
            let (tx, rx) = oneshot::channel();
            self.dispatch(user_id, WorkerMessage::Flush(tx))?;
            return rx
                .await
                .map_err(|_| LearnerError::WorkerUnavailable(user_id.to_string()));
        }
        // No live worker, but one may still be draining
        let lane = self.lanes.get(user_id).map(|l| Arc::clone(l.value()));
        if let Some(lane) = lane {
            let _drained = lane.lock().await;
        }
        Ok(())
    }

    fn spawn(&self, user_id: &str) -> WorkerEntry {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let lane = Arc::clone(self.lanes.entry(user_id.to_string()).or_default().value());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(
            user_id.to_string(),
            id,
            Arc::clone(&self.learner),
            rx,
            Arc::clone(&self.senders),
            lane,
            self.idle_timeout,
        ));
        debug!(user_id = %user_id, worker_id = id, "Spawned feedback worker");
        WorkerEntry { id, sender: tx }
    }
}

async fn run_worker(
    user_id: String,
    id: u64,
    learner: Arc<OnlineLearner>,
    mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
    registry: Registry,
    lane: Arc<Mutex<()>>,
    idle_timeout: Duration,
) {
    let _lane = lane.lock_owned().await;
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(message)) => handle(&user_id, &learner, message).await,
            Ok(None) => break,
            Err(_) => {
                // Unregister before closing so later messages go to a new worker
                registry.remove_if(&user_id, |_, e| e.id == id);
                rx.close();
                while let Ok(message) = rx.try_recv() {
                    handle(&user_id, &learner, message).await;
                }
                debug!(user_id = %user_id, worker_id = id, "Feedback worker idle, exiting");
                break;
            }
        }
    }
}

async fn handle(user_id: &str, learner: &OnlineLearner, message: WorkerMessage) {
    match message {
        WorkerMessage::Learn(job) => {
            if let Err(first) = learner.apply(&job).await {
                warn!(user_id = %user_id, error = %first, "Feedback application failed, retrying");
                if let Err(second) = learner.apply(&job).await {
                    error!(
                        user_id = %user_id,
                        song_id = %job.event.song_id,
                        error = %second,
                        "Feedback application failed twice, dropping event"
                    );
                }
            }
        }
        WorkerMessage::SessionReward { strategy, reward } => {
            if let Err(e) = learner.apply_session_reward(user_id, strategy, reward).await {
                warn!(user_id = %user_id, error = %e, "Session reward not applied");
            }
        }
        WorkerMessage::Flush(done) => {
            let _ = done.send(());
        }
    }
}
