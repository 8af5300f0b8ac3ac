use async_trait::async_trait;
use smallvec::SmallVec;
use std::fmt::{Debug, Display};
use std::time::Duration;

/// Per-action deadline applied when a plan does not set one.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// What one reconcile pass should do for an entity.
///
/// The engine runs the actions in order and stops at the first failure; the
/// batch is the run-to-completion boundary of the entity.
#[derive(Clone, Debug)]
pub struct ActionPlan<A> {
    pub actions: SmallVec<[A; 2]>,
    pub timeout: Duration,
    /// Drop the entity from the engine once the batch succeeds.
    pub untrack: bool,
}

impl<A> ActionPlan<A> {
    /// Nothing to do; the entity is not rescheduled.
    pub fn noop() -> Self {
        Self {
            actions: SmallVec::new(),
            timeout: DEFAULT_ACTION_TIMEOUT,
            untrack: false,
        }
    }

    /// Stop tracking the entity, optionally after cleanup actions.
    pub fn untrack(actions: impl IntoIterator<Item = A>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            timeout: DEFAULT_ACTION_TIMEOUT,
            untrack: true,
        }
    }

    pub fn run(actions: impl IntoIterator<Item = A>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            timeout: DEFAULT_ACTION_TIMEOUT,
            untrack: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_noop(&self) -> bool {
        self.actions.is_empty() && !self.untrack
    }
}

/// An entity the goal-state engine converges.
///
/// State loading may hit storage and is allowed to fail softly by returning
/// a state for which `is_unknown` holds; the engine then retries shortly
/// instead of running a plan against bad data.
#[async_trait]
pub trait Entity: Send + Sync + 'static {
    type State: Clone + Debug + Send + Sync;
    type Action: Clone + PartialEq + Debug + Display + Send + Sync;

    fn id(&self) -> String;

    async fn current_state(&self) -> Self::State;

    async fn goal_state(&self) -> Self::State;

    /// True when the loader could not produce the state.
    fn is_unknown(state: &Self::State) -> bool;

    /// Chooses the actions that move `state` toward `goal`.
    fn plan(&self, state: &Self::State, goal: &Self::State) -> ActionPlan<Self::Action>;

    /// Runs a single action. Failures are recorded for backoff, never
    /// propagated out of the engine.
    async fn execute(&self, action: &Self::Action) -> crate::Result<()>;
}
