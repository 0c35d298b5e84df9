//! Task polling.
//!
//! Every mutating vCenter call returns a task. [`TaskPoller`] observes the
//! task until it reaches `success` or `error`, sleeping with exponential
//! backoff between polls. Each wait is bounded by a deadline and can be
//! aborted through a [`CancellationToken`]; a poll call that is still in
//! flight when the deadline passes is abandoned.

use crate::client::ControlPlane;
use crate::error::{VsphereError, VsphereResult};
use crate::types::*;

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Drives task handles to a terminal state.
pub struct TaskPoller<'a> {
    client: &'a dyn ControlPlane,
    config: PollConfig,
}

impl<'a> TaskPoller<'a> {
    pub fn new(client: &'a dyn ControlPlane, config: PollConfig) -> Self {
        Self { client, config }
    }

    /// Deadline for a task submitted now, at most
    /// [`MAX_TASK_TIMEOUT_SECS`] away.
    pub fn deadline_from_now(&self) -> Instant {
        let now = Instant::now();
        let timeout = self.config.task_timeout_secs.min(MAX_TASK_TIMEOUT_SECS);
        now.checked_add(Duration::from_secs(timeout)).unwrap_or(now)
    }

    /// Wait for `handle` to finish.
    ///
    /// Returns the task result (the new VM for clone tasks, `None` for
    /// reconfigure tasks). Errors:
    /// - `TaskFailed` with the remote message when the task ends in `error`
    /// - `Timeout` once `deadline` passes
    /// - `Cancelled` when `cancel` fires
    ///
    /// Failed tasks are never resubmitted.
    pub async fn wait_for_task(
        &self,
        handle: &TaskHandle,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> VsphereResult<Option<InventoryRef>> {
        let mut delay = Duration::from_millis(self.config.initial_interval_ms.max(1));
        let max_delay = Duration::from_millis(self.config.max_interval_ms.clamp(1, MAX_POLL_INTERVAL_MS));
        let factor = self.config.backoff_factor.max(1);

        loop {
            let info = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(handle)),
                polled = tokio::time::timeout_at(deadline, self.client.poll_task(handle)) => match polled {
                    Ok(info) => info?,
                    Err(_) => return Err(self.timed_out(handle)),
                },
            };

            match info.state {
                TaskState::Success => {
                    log::debug!("Task {} ({}) succeeded", handle.id, handle.description);
                    return Ok(info.result);
                }
                TaskState::Error => {
                    let msg = info
                        .error
                        .unwrap_or_else(|| format!("Task {} failed without a fault message", handle.id));
                    log::warn!("Task {} ({}) failed: {}", handle.id, handle.description, msg);
                    return Err(VsphereError::task_failed(msg));
                }
                TaskState::Queued | TaskState::Running | TaskState::Unknown => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(handle));
            }
            let wake = now.checked_add(delay).map_or(deadline, |w| w.min(deadline));
            log::trace!(
                "Task {} is {:?} ({}%), next poll in {:?}",
                handle.id,
                info.state,
                info.progress.unwrap_or(0),
                wake - now
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(handle)),
                _ = tokio::time::sleep_until(wake) => {}
            }

            delay = delay.saturating_mul(factor).min(max_delay);
        }
    }

    fn timed_out(&self, handle: &TaskHandle) -> VsphereError {
        VsphereError::timeout(format!(
            "Timed out waiting for task {} ({})",
            handle.id, handle.description
        ))
    }

    fn cancelled(&self, handle: &TaskHandle) -> VsphereError {
        VsphereError::cancelled(format!(
            "Stopped waiting for task {} ({})",
            handle.id, handle.description
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VsphereErrorKind;
    use crate::simulator::{SimulatedControlPlane, TaskBehavior, TaskOutcome};

    fn config() -> PollConfig {
        PollConfig {
            initial_interval_ms: 100,
            max_interval_ms: 1_000,
            backoff_factor: 2,
            task_timeout_secs: 60,
        }
    }

    async fn submit(sim: &SimulatedControlPlane) -> TaskHandle {
        let dc = sim.add_datacenter("DC1");
        let vm = sim.add_vm(&dc, None, "web01", &[]);
        let patch = ConfigPatch { memory_mb: Some(8192), device_change: vec![] };
        sim.submit_reconfigure(&vm, &patch).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_task_succeeds() {
        let sim = SimulatedControlPlane::new();
        sim.set_task_behavior(0, TaskBehavior { pending_polls: 4, outcome: TaskOutcome::Success });
        let h = submit(&sim).await;
        let poller = TaskPoller::new(&sim, config());

        let res = poller
            .wait_for_task(&h, poller.deadline_from_now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(res, None);
        // Four pending answers, then the terminal one; no extra polls.
        assert_eq!(sim.poll_count(&h), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn error_state_carries_remote_message() {
        let sim = SimulatedControlPlane::new();
        sim.fail_task(0, "Insufficient disk space on datastore 'ds1'.");
        let h = submit(&sim).await;
        let poller = TaskPoller::new(&sim, config());

        let err = poller
            .wait_for_task(&h, poller.deadline_from_now(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_kind(VsphereErrorKind::TaskFailed));
        assert_eq!(err.message, "Insufficient disk space on datastore 'ds1'.");
        assert_eq!(sim.poll_count(&h), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_passing_deadline() {
        let sim = SimulatedControlPlane::new();
        sim.set_task_behavior(0, TaskBehavior { pending_polls: 0, outcome: TaskOutcome::Never });
        let h = submit(&sim).await;
        let poller = TaskPoller::new(&sim, config());

        let start = Instant::now();
        let deadline = start + Duration::from_secs(3);
        let err = poller
            .wait_for_task(&h, deadline, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_kind(VsphereErrorKind::Timeout));
        assert!(Instant::now() <= deadline);
        assert!(Instant::now() >= deadline - Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_poll_call_is_bounded_by_deadline() {
        let sim = SimulatedControlPlane::new();
        let h = submit(&sim).await;
        sim.set_poll_latency(Duration::from_secs(30));
        let poller = TaskPoller::new(&sim, config());

        let deadline = Instant::now() + Duration::from_secs(2);
        let err = poller
            .wait_for_task(&h, deadline, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_kind(VsphereErrorKind::Timeout));
        assert_eq!(Instant::now(), deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_up_to_max_interval() {
        let sim = SimulatedControlPlane::new();
        sim.set_task_behavior(0, TaskBehavior { pending_polls: 6, outcome: TaskOutcome::Success });
        let h = submit(&sim).await;
        let poller = TaskPoller::new(&sim, config());

        let start = Instant::now();
        poller
            .wait_for_task(&h, poller.deadline_from_now(), &CancellationToken::new())
            .await
            .unwrap();
        // 100 + 200 + 400 + 800 + 1000 + 1000 ms of sleeping.
        assert_eq!(Instant::now() - start, Duration::from_millis(3_500));
    }

    #[tokio::test(start_paused = true)]
    async fn extreme_poll_settings_are_clamped() {
        let sim = SimulatedControlPlane::new();
        sim.set_task_behavior(0, TaskBehavior { pending_polls: 3, outcome: TaskOutcome::Success });
        let h = submit(&sim).await;
        let poller = TaskPoller::new(
            &sim,
            PollConfig {
                initial_interval_ms: 100,
                max_interval_ms: u64::MAX,
                backoff_factor: u32::MAX,
                task_timeout_secs: u64::MAX,
            },
        );

        let start = Instant::now();
        let deadline = poller.deadline_from_now();
        assert_eq!(deadline - start, Duration::from_secs(MAX_TASK_TIMEOUT_SECS));

        poller
            .wait_for_task(&h, deadline, &CancellationToken::new())
            .await
            .unwrap();
        // 100 ms, then the delay saturates and is held at the interval cap.
        assert_eq!(
            Instant::now() - start,
            Duration::from_millis(100 + 2 * MAX_POLL_INTERVAL_MS)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait() {
        let sim = SimulatedControlPlane::new();
        sim.set_task_behavior(0, TaskBehavior { pending_polls: 0, outcome: TaskOutcome::Never });
        let h = submit(&sim).await;
        let poller = TaskPoller::new(&sim, config());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let err = poller
            .wait_for_task(&h, poller.deadline_from_now(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_kind(VsphereErrorKind::Cancelled));
    }
}
