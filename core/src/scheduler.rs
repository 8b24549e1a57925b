//! Per-client task scheduler
//!
//! Every client owns one `Scheduler`. It wraps a dedicated tokio runtime whose
//! single async worker drives timers, while the blocking pool executes all
//! user-visible work (message handlers, completion callbacks, periodic device
//! reports). Nothing scheduled here ever runs on a transport I/O thread.
//!
//! Three kinds of work are supported:
//! - `execute`: run a task as soon as a pool thread is free
//! - `schedule`: run a short task on the timer worker after a delay,
//!   cancellable
//! - `schedule_periodic`: run a task on the pool at a fixed period,
//!   cancellable
//!
//! Delayed tasks release blocked pool threads (timeouts) and restart the
//! connection, so they must not wait for a pool thread themselves.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a delayed or periodic task.
///
/// Cancellation is best-effort: a task that has already started runs to
/// completion, but it will not fire again.
#[derive(Debug, Clone)]
pub struct TaskHandle {
	token: CancellationToken,
}

impl TaskHandle {
	/// Cancels the task if it has not fired yet.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Returns true once `cancel` has been called.
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}
}

struct SchedulerInner {
	runtime: Mutex<Option<Runtime>>,
	handle: Handle,
}

impl Drop for SchedulerInner {
	fn drop(&mut self) {
		if let Some(runtime) = self.runtime.lock().take() {
			// Must not block: the last handle may be dropped on a pool thread.
			runtime.shutdown_background();
		}
	}
}

/// Shared, cloneable scheduler backed by a client-owned tokio runtime.
#[derive(Clone)]
pub struct Scheduler {
	inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Scheduler").finish_non_exhaustive()
	}
}

impl Scheduler {
	/// Starts a scheduler with `pool_size` callback threads.
	pub fn new(pool_size: usize) -> std::io::Result<Self> {
		let runtime = Builder::new_multi_thread()
			.worker_threads(1)
			.max_blocking_threads(pool_size.max(1))
			.thread_name("shadow-client-worker")
			.enable_time()
			.build()?;
		let handle = runtime.handle().clone();
		debug!(pool_size, "Scheduler started");
		Ok(Self {
			inner: Arc::new(SchedulerInner {
				runtime: Mutex::new(Some(runtime)),
				handle,
			}),
		})
	}

	/// Runtime handle for transports that need to spawn their own I/O tasks.
	pub fn handle(&self) -> &Handle {
		&self.inner.handle
	}

	/// Runs `task` on the callback pool.
	pub fn execute<F>(&self, task: F)
	where F: FnOnce() + Send + 'static {
		drop(self.inner.handle.spawn_blocking(task));
	}

	/// Runs `task` once after `delay` unless cancelled first.
	///
	/// The task runs on the timer worker and must not block. Anything slow
	/// belongs in `execute`.
	pub fn schedule<F>(&self, delay: Duration, task: F) -> TaskHandle
	where F: FnOnce() + Send + 'static {
		let token = CancellationToken::new();
		let task_token = token.clone();
		self.inner.handle.spawn(async move {
			tokio::select! {
				biased;
				_ = task_token.cancelled() => {}
				_ = time::sleep(delay) => {
					if !task_token.is_cancelled() {
						task();
					}
				}
			}
		});
		TaskHandle { token }
	}

	/// Runs `task` every `period`, first tick one period from now.
	///
	/// Ticks never overlap: a slow tick delays the next one.
	pub fn schedule_periodic<F>(&self, period: Duration, task: F) -> TaskHandle
	where F: Fn() + Send + Sync + 'static {
		let token = CancellationToken::new();
		let task_token = token.clone();
		let handle = self.inner.handle.clone();
		let task = Arc::new(task);
		self.inner.handle.spawn(async move {
			let mut ticker =
				time::interval_at(time::Instant::now() + period, period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					biased;
					_ = task_token.cancelled() => break,
					_ = ticker.tick() => {
						let tick = Arc::clone(&task);
						if let Err(err) = handle.spawn_blocking(move || tick()).await {
							warn!(error = %err, "Periodic task failed");
						}
					}
				}
			}
			debug!("Periodic task stopped");
		});
		TaskHandle { token }
	}
}
