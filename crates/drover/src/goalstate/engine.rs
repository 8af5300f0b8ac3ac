use crate::goalstate::entity::{ActionPlan, Entity};
use crate::Map;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::time::delay_queue::{self, DelayQueue};

/// Retry and concurrency knobs of the goal-state engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Delay before re-evaluating an entity whose action succeeded.
    pub success_retry_delay: Duration,
    /// Delay before retrying an entity whose action failed.
    pub failure_retry_delay: Duration,
    /// Cap applied to the growing delay of a repeating action.
    pub max_retry_delay: Duration,
    /// Short retry when current or goal state could not be loaded.
    pub unknown_retry_delay: Duration,
    /// Bound on concurrently reconciling entities.
    pub max_parallel_actions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            success_retry_delay: Duration::from_secs(5),
            failure_retry_delay: Duration::from_secs(10),
            max_retry_delay: Duration::from_secs(60),
            unknown_retry_delay: Duration::from_secs(1),
            max_parallel_actions: 16,
        }
    }
}

enum Command {
    Schedule { id: String, delay: Duration },
    Stop,
}

struct Completion<A> {
    id: String,
    outcome: ReconcileOutcome<A>,
}

enum ReconcileOutcome<A> {
    /// Nothing to do; not rescheduled.
    Noop,
    /// State could not be loaded; retried shortly.
    Unknown,
    /// Entity reached its terminal goal and left the engine.
    Untracked,
    /// An action batch ran; reschedule with backoff.
    Acted { action: A, success: bool },
}

struct Tracked<E: Entity> {
    entity: Arc<E>,
    running: bool,
    last_action: Option<E::Action>,
    last_action_time: Instant,
}

/// Converges tracked entities toward their goal states.
///
/// Entities are re-evaluated at deadlines kept in a timer queue; each
/// evaluation loads state, asks the entity for a plan and executes it under
/// a per-action timeout. Per entity everything is serial (a second firing
/// while a batch is in flight is a no-op); across entities reconciles run
/// concurrently under a semaphore.
pub struct Engine<E: Entity> {
    trackers: Arc<Mutex<Map<String, Tracked<E>>>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    config: Arc<EngineConfig>,
}

impl<E: Entity> Clone for Engine<E> {
    fn clone(&self) -> Self {
        Self {
            trackers: self.trackers.clone(),
            cmd_tx: self.cmd_tx.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: Entity> Engine<E> {
    /// Starts the engine loop on the current runtime.
    pub fn start(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let trackers: Arc<Mutex<Map<String, Tracked<E>>>> = Arc::new(Mutex::new(Map::default()));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(trackers.clone(), config.clone(), cmd_rx));
        Self {
            trackers,
            cmd_tx,
            config,
        }
    }

    /// Tracks the entity (if new) and schedules its next evaluation.
    /// Scheduling an entity whose batch is in flight, or whose next
    /// deadline is already armed, is a no-op.
    pub fn enqueue(&self, entity: Arc<E>, delay: Duration) {
        let id = entity.id();
        {
            let mut trackers = self.trackers.lock().unwrap();
            trackers.entry(id.clone()).or_insert_with(|| Tracked {
                entity,
                running: false,
                last_action: None,
                last_action_time: Instant::now(),
            });
        }
        let _ = self.cmd_tx.send(Command::Schedule { id, delay });
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.trackers.lock().unwrap().contains_key(id)
    }

    pub fn tracked_count(&self) -> usize {
        self.trackers.lock().unwrap().len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }
}

async fn run_loop<E: Entity>(
    trackers: Arc<Mutex<Map<String, Tracked<E>>>>,
    config: Arc<EngineConfig>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut timer: DelayQueue<String> = DelayQueue::new();
    let mut keys: Map<String, delay_queue::Key> = Map::default();
    let semaphore = Arc::new(Semaphore::new(config.max_parallel_actions));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion<E::Action>>();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Schedule { id, delay }) => {
                    // External scheduling never preempts a running batch or
                    // an armed backoff deadline; it only wakes parked
                    // entities.
                    let running = trackers
                        .lock()
                        .unwrap()
                        .get(&id)
                        .map(|t| t.running)
                        .unwrap_or(true);
                    if !running && !keys.contains_key(&id) {
                        schedule(&mut timer, &mut keys, id, delay);
                    }
                }
                Some(Command::Stop) | None => break,
            },
            Some(done) = done_rx.recv() => {
                handle_completion(&trackers, &config, &mut timer, &mut keys, done);
            }
            Some(expired) = timer.next(), if !timer.is_empty() => {
                let id = expired.into_inner();
                keys.remove(&id);
                fire(&trackers, &semaphore, &done_tx, id);
            }
        }
    }
}

fn schedule(
    timer: &mut DelayQueue<String>,
    keys: &mut Map<String, delay_queue::Key>,
    id: String,
    delay: Duration,
) {
    if let Some(key) = keys.get(&id) {
        timer.reset(key, delay);
    } else {
        let key = timer.insert(id.clone(), delay);
        keys.insert(id, key);
    }
}

fn fire<E: Entity>(
    trackers: &Arc<Mutex<Map<String, Tracked<E>>>>,
    semaphore: &Arc<Semaphore>,
    done_tx: &mpsc::UnboundedSender<Completion<E::Action>>,
    id: String,
) {
    let entity = {
        let mut trackers = trackers.lock().unwrap();
        match trackers.get_mut(&id) {
            Some(tracked) if !tracked.running => {
                tracked.running = true;
                tracked.entity.clone()
            }
            _ => return,
        }
    };
    let semaphore = semaphore.clone();
    let done_tx = done_tx.clone();
    tokio::spawn(async move {
        let _permit = semaphore
            .acquire_owned()
            .await
            .expect("engine semaphore closed");
        let outcome = reconcile(&*entity).await;
        let _ = done_tx.send(Completion { id, outcome });
    });
}

async fn reconcile<E: Entity>(entity: &E) -> ReconcileOutcome<E::Action> {
    let id = entity.id();
    let state = entity.current_state().await;
    let goal = entity.goal_state().await;
    if E::is_unknown(&state) || E::is_unknown(&goal) {
        log::info!("entity {id}: state could not be loaded, scheduling a short retry");
        return ReconcileOutcome::Unknown;
    }

    let plan = entity.plan(&state, &goal);
    if plan.is_noop() {
        return ReconcileOutcome::Noop;
    }
    let success = run_plan(entity, &id, &plan).await;
    if plan.untrack && success {
        log::debug!("entity {id}: reached terminal goal, untracking");
        return ReconcileOutcome::Untracked;
    }
    match plan.actions.into_iter().next() {
        Some(action) => ReconcileOutcome::Acted { action, success },
        None => ReconcileOutcome::Noop,
    }
}

async fn run_plan<E: Entity>(entity: &E, id: &str, plan: &ActionPlan<E::Action>) -> bool {
    for action in &plan.actions {
        log::info!("entity {id}: running action {action}");
        match tokio::time::timeout(plan.timeout, entity.execute(action)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("entity {id}: action {action} failed: {e}");
                return false;
            }
            Err(_) => {
                // The I/O was cancelled, but the attempt still counts for
                // backoff accounting.
                log::error!("entity {id}: action {action} timed out");
                return false;
            }
        }
    }
    true
}

fn handle_completion<E: Entity>(
    trackers: &Arc<Mutex<Map<String, Tracked<E>>>>,
    config: &EngineConfig,
    timer: &mut DelayQueue<String>,
    keys: &mut Map<String, delay_queue::Key>,
    done: Completion<E::Action>,
) {
    let mut trackers = trackers.lock().unwrap();
    let Some(tracked) = trackers.get_mut(&done.id) else {
        return;
    };
    tracked.running = false;
    match done.outcome {
        ReconcileOutcome::Untracked => {
            trackers.remove(&done.id);
        }
        ReconcileOutcome::Noop => {}
        ReconcileOutcome::Unknown => {
            schedule(timer, keys, done.id, config.unknown_retry_delay);
        }
        ReconcileOutcome::Acted { action, success } => {
            let now = Instant::now();
            let last = tracked
                .last_action
                .as_ref()
                .map(|a| (a, tracked.last_action_time));
            let delay = next_delay(config, last, &action, success, now);
            tracked.last_action = Some(action);
            tracked.last_action_time = now;
            schedule(timer, keys, done.id, delay);
        }
    }
}

/// Backoff schedule: a first-seen action waits the base delay, a repeating
/// action waits the time since its last run plus the base delay, capped.
fn next_delay<A: PartialEq>(
    config: &EngineConfig,
    last: Option<(&A, Instant)>,
    action: &A,
    success: bool,
    now: Instant,
) -> Duration {
    let base = if success {
        config.success_retry_delay
    } else {
        config.failure_retry_delay
    };
    let delay = match last {
        Some((last_action, last_time)) if last_action == action => {
            now.duration_since(last_time) + base
        }
        _ => base,
    };
    delay.min(config.max_retry_delay)
}
