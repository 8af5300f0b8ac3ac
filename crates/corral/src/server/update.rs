use crate::server::jobs::JobManager;
use crate::storage::{ObjectStore, StoreKey};
use crate::transfer::messages::{UpdateInfo, UpdateOptions, UpdateState};
use crate::{Map, Result};
use chrono::Utc;
use drover::{Error as CoreError, InstanceId, JobId};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Rolling-update operations for jobs.
///
/// At most one non-terminal update exists per job; the update record walks
/// `Initialized -> RollingForward -> Succeeded` with pause/resume, rollback
/// and abort branching off.
pub struct UpdateService {
    jobs: Arc<JobManager>,
    store: Arc<dyn ObjectStore>,
    cache: RwLock<Map<String, UpdateInfo>>,
}

impl UpdateService {
    pub fn new(jobs: Arc<JobManager>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            jobs,
            store,
            cache: RwLock::new(Map::default()),
        }
    }

    /// Starts an update of a job to `config_version`.
    pub fn create(
        &self,
        job_id: JobId,
        config_version: u64,
        options: UpdateOptions,
    ) -> Result<String> {
        let runtime = self
            .jobs
            .job_runtime(job_id)
            .ok_or_else(|| CoreError::not_found(format!("job {job_id} not tracked")))?;
        if config_version <= runtime.config_version {
            return Err(CoreError::invalid_argument(format!(
                "config version {config_version} is not newer than {}",
                runtime.config_version
            ))
            .into());
        }
        {
            let cache = self.cache.read().unwrap();
            if let Some(active) = cache
                .values()
                .find(|update| update.job_id == job_id && !update.state.is_terminal())
            {
                return Err(CoreError::invalid_argument(format!(
                    "update {} is already running for job {job_id}",
                    active.id
                ))
                .into());
            }
        }

        let spec = self
            .jobs
            .spec(job_id)
            .ok_or_else(|| CoreError::not_found(format!("job {job_id} not tracked")))?;
        let state = if options.start_paused {
            UpdateState::Paused
        } else {
            UpdateState::RollingForward
        };
        let now = Utc::now();
        let info = UpdateInfo {
            id: Uuid::new_v4().to_string(),
            job_id,
            state,
            config_version,
            options,
            instances_total: spec.instance_count,
            instances_done: 0,
            instances_failed: 0,
            instances_current: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.jobs.set_goal_config_version(job_id, config_version)?;
        self.persist(&info)?;
        let id = info.id.clone();
        self.cache.write().unwrap().insert(id.clone(), info);
        log::info!("update {id} created for job {job_id} at version {config_version}");
        Ok(id)
    }

    pub fn get(&self, id: &str, status_only: bool) -> Result<UpdateInfo> {
        let info = self.fetch(id)?;
        Ok(if status_only {
            info.status_only()
        } else {
            info
        })
    }

    /// Updates of a job, newest first.
    pub fn list(&self, job_id: JobId) -> Vec<UpdateInfo> {
        let cache = self.cache.read().unwrap();
        let mut updates: Vec<_> = cache
            .values()
            .filter(|update| update.job_id == job_id)
            .cloned()
            .collect();
        updates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        updates
    }

    pub fn pause(&self, id: &str) -> Result<()> {
        self.transition(id, |state| match state {
            state if state.is_rolling() => Ok(UpdateState::Paused),
            state => Err(CoreError::unavailable(format!(
                "update in state {state} cannot be paused"
            ))),
        })
    }

    pub fn resume(&self, id: &str) -> Result<()> {
        self.transition(id, |state| match state {
            UpdateState::Paused => Ok(UpdateState::RollingForward),
            state => Err(CoreError::unavailable(format!(
                "update in state {state} cannot be resumed"
            ))),
        })
    }

    /// Reverses an in-flight update to the previous configuration.
    pub fn rollback(&self, id: &str) -> Result<()> {
        let job_id = self.fetch(id)?.job_id;
        self.transition(id, |state| match state {
            UpdateState::RollingBackward => Err(CoreError::invalid_argument(
                "update is already rolling back",
            )),
            state if state.is_terminal() => Err(CoreError::failed_precondition(format!(
                "update in terminal state {state} cannot be rolled back"
            ))),
            _ => Ok(UpdateState::RollingBackward),
        })?;
        let previous = self
            .jobs
            .job_runtime(job_id)
            .map(|runtime| runtime.config_version)
            .unwrap_or(0);
        self.jobs.set_goal_config_version(job_id, previous)?;
        Ok(())
    }

    /// Stops an update. A hard abort also drops the in-flight instances; a
    /// soft abort lets them finish their current transition.
    pub fn abort(&self, id: &str, hard: bool) -> Result<()> {
        self.transition(id, |state| match state {
            state if state.is_terminal() => Err(CoreError::failed_precondition(format!(
                "update in terminal state {state} cannot be aborted"
            ))),
            _ => Ok(UpdateState::Aborted),
        })?;
        if hard {
            let mut cache = self.cache.write().unwrap();
            if let Some(info) = cache.get_mut(id) {
                info.instances_current.clear();
                info.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    /// Serves the cached record without touching storage.
    pub fn get_cache(&self, id: &str) -> Result<UpdateInfo> {
        self.fetch(id)
    }

    /// Marks instances as picked up by the current rollout batch.
    pub fn mark_instances_rolling(&self, id: &str, instances: Vec<InstanceId>) -> Result<()> {
        self.mutate(id, |info| {
            info.instances_current = instances;
            Ok(())
        })
    }

    /// Records the outcome of one rolled instance and completes the update
    /// once every instance is accounted for.
    pub fn record_instance_outcome(&self, id: &str, instance: InstanceId, ok: bool) -> Result<()> {
        self.mutate(id, |info| {
            info.instances_current.retain(|i| *i != instance);
            if ok {
                info.instances_done += 1;
            } else {
                info.instances_failed += 1;
            }
            if info.instances_done + info.instances_failed >= info.instances_total {
                info.state = match info.state {
                    UpdateState::RollingBackward => UpdateState::RolledBack,
                    _ if info.instances_failed > info.options.max_failure_instances => {
                        UpdateState::Failed
                    }
                    _ => UpdateState::Succeeded,
                };
            }
            Ok(())
        })
    }

    fn fetch(&self, id: &str) -> Result<UpdateInfo> {
        self.cache
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("update {id} not found")).into())
    }

    fn transition(
        &self,
        id: &str,
        next: impl FnOnce(UpdateState) -> drover::Result<UpdateState>,
    ) -> Result<()> {
        self.mutate(id, |info| {
            let new_state = next(info.state)?;
            log::info!("update {id}: {} -> {new_state}", info.state);
            info.state = new_state;
            Ok(())
        })
    }

    fn mutate(
        &self,
        id: &str,
        apply: impl FnOnce(&mut UpdateInfo) -> drover::Result<()>,
    ) -> Result<()> {
        let info = {
            let mut cache = self.cache.write().unwrap();
            let info = cache
                .get_mut(id)
                .ok_or_else(|| CoreError::not_found(format!("update {id} not found")))?;
            apply(info)?;
            info.updated_at = Utc::now();
            info.clone()
        };
        self.persist(&info)
    }

    fn persist(&self, info: &UpdateInfo) -> Result<()> {
        self.store.create(
            StoreKey::update(&info.id),
            serde_json::to_value(info)?,
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::jobs::tests::{fixture, test_spec};
    use crate::Error;

    struct Setup {
        service: UpdateService,
        job_id: JobId,
    }

    fn setup() -> Setup {
        let f = fixture();
        let job_id = f.jobs.create_job(test_spec(3)).unwrap();
        f.jobs.create_tasks(job_id).unwrap();
        let service = UpdateService::new(f.jobs.clone(), f.store.clone());
        Setup { service, job_id }
    }

    #[test]
    fn test_single_active_update_per_job() {
        let s = setup();
        let id = s
            .service
            .create(s.job_id, 1, UpdateOptions::default())
            .unwrap();
        assert!(matches!(
            s.service.create(s.job_id, 2, UpdateOptions::default()),
            Err(Error::Core(CoreError::InvalidArgument(_)))
        ));
        s.service.abort(&id, false).unwrap();
        // A terminal update no longer blocks a new one.
        s.service
            .create(s.job_id, 2, UpdateOptions::default())
            .unwrap();
    }

    #[test]
    fn test_stale_config_version_rejected() {
        let s = setup();
        assert!(matches!(
            s.service.create(s.job_id, 0, UpdateOptions::default()),
            Err(Error::Core(CoreError::InvalidArgument(_)))
        ));
    }

    #[test]
    fn test_pause_resume_legality() {
        let s = setup();
        let id = s
            .service
            .create(s.job_id, 1, UpdateOptions::default())
            .unwrap();
        // Resuming a rolling update is unavailable.
        assert!(matches!(
            s.service.resume(&id),
            Err(Error::Core(CoreError::Unavailable(_)))
        ));
        s.service.pause(&id).unwrap();
        assert_eq!(
            s.service.get(&id, true).unwrap().state,
            UpdateState::Paused
        );
        // Pausing twice is unavailable.
        assert!(matches!(
            s.service.pause(&id),
            Err(Error::Core(CoreError::Unavailable(_)))
        ));
        s.service.resume(&id).unwrap();
        assert_eq!(
            s.service.get(&id, true).unwrap().state,
            UpdateState::RollingForward
        );
    }

    #[test]
    fn test_start_paused() {
        let s = setup();
        let options = UpdateOptions {
            start_paused: true,
            ..Default::default()
        };
        let id = s.service.create(s.job_id, 1, options).unwrap();
        assert_eq!(
            s.service.get_cache(&id).unwrap().state,
            UpdateState::Paused
        );
    }

    #[test]
    fn test_abort_terminal_fails() {
        let s = setup();
        let id = s
            .service
            .create(s.job_id, 1, UpdateOptions::default())
            .unwrap();
        s.service.abort(&id, false).unwrap();
        assert!(matches!(
            s.service.abort(&id, true),
            Err(Error::Core(CoreError::FailedPrecondition(_)))
        ));
    }

    #[test]
    fn test_hard_abort_clears_current_instances() {
        let s = setup();
        let id = s
            .service
            .create(s.job_id, 1, UpdateOptions::default())
            .unwrap();
        s.service
            .mark_instances_rolling(&id, vec![InstanceId::new(0), InstanceId::new(1)])
            .unwrap();
        s.service.abort(&id, true).unwrap();
        let info = s.service.get(&id, false).unwrap();
        assert_eq!(info.state, UpdateState::Aborted);
        assert!(info.instances_current.is_empty());
    }

    #[test]
    fn test_rollout_completion() {
        let s = setup();
        let id = s
            .service
            .create(s.job_id, 1, UpdateOptions::default())
            .unwrap();
        for instance in 0..3 {
            s.service
                .record_instance_outcome(&id, InstanceId::new(instance), true)
                .unwrap();
        }
        assert_eq!(
            s.service.get(&id, true).unwrap().state,
            UpdateState::Succeeded
        );
    }

    #[test]
    fn test_rollback_completion() {
        let s = setup();
        let id = s
            .service
            .create(s.job_id, 1, UpdateOptions::default())
            .unwrap();
        s.service.rollback(&id).unwrap();
        assert!(matches!(
            s.service.rollback(&id),
            Err(Error::Core(CoreError::InvalidArgument(_)))
        ));
        for instance in 0..3 {
            s.service
                .record_instance_outcome(&id, InstanceId::new(instance), true)
                .unwrap();
        }
        assert_eq!(
            s.service.get(&id, true).unwrap().state,
            UpdateState::RolledBack
        );
    }

    #[test]
    fn test_failure_budget() {
        let s = setup();
        let id = s
            .service
            .create(s.job_id, 1, UpdateOptions::default())
            .unwrap();
        s.service
            .record_instance_outcome(&id, InstanceId::new(0), true)
            .unwrap();
        s.service
            .record_instance_outcome(&id, InstanceId::new(1), false)
            .unwrap();
        s.service
            .record_instance_outcome(&id, InstanceId::new(2), true)
            .unwrap();
        // max_failure_instances defaults to 0, one failure sinks the update.
        assert_eq!(
            s.service.get(&id, true).unwrap().state,
            UpdateState::Failed
        );
    }

    #[test]
    fn test_status_only_strips_instances() {
        let s = setup();
        let id = s
            .service
            .create(s.job_id, 1, UpdateOptions::default())
            .unwrap();
        s.service
            .mark_instances_rolling(&id, vec![InstanceId::new(2)])
            .unwrap();
        assert!(s.service.get(&id, true).unwrap().instances_current.is_empty());
        assert_eq!(
            s.service.get(&id, false).unwrap().instances_current,
            vec![InstanceId::new(2)]
        );
    }
}
