//! Single-use result cell for one outstanding request
//!
//! A `Completion` is created per publish, subscribe, unsubscribe, connect,
//! disconnect or shadow command. Exactly one of `succeed`, `fail` or `expire`
//! moves it into a terminal outcome; whichever runs first wins and every later
//! call is ignored. The outcome transition and the wake-up of a blocked
//! caller are guarded by one mutex.
//!
//! Blocking completions park the caller in [`Completion::wait`] until the
//! outcome is terminal. Callback completions return from `wait` immediately
//! and deliver the outcome to their [`RequestListener`] on the scheduler's
//! callback pool, never on the thread that reported it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::client::error::{RequestFailure, ShadowClientError};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::shadow::{ShadowErrorCode, ShadowVerb};

/// Kind of request a completion tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
	Connect,
	Disconnect,
	Publish,
	Subscribe,
	Unsubscribe,
	Shadow(ShadowVerb),
}

impl fmt::Display for RequestKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| RequestKind::Connect => f.write_str("connect"),
			| RequestKind::Disconnect => f.write_str("disconnect"),
			| RequestKind::Publish => f.write_str("publish"),
			| RequestKind::Subscribe => f.write_str("subscribe"),
			| RequestKind::Unsubscribe => f.write_str("unsubscribe"),
			| RequestKind::Shadow(verb) => write!(f, "shadow {verb}"),
		}
	}
}

/// Receives the outcome of a non-blocking request.
///
/// Exactly one method is called, exactly once, on a callback pool thread.
/// All methods default to doing nothing.
pub trait RequestListener: Send + Sync + 'static {
	/// The request was acknowledged. Shadow commands carry the response
	/// document.
	#[allow(unused_variables)]
	fn on_success(&self, response: Option<&str>) {}

	/// The request was rejected or could not be delivered.
	#[allow(unused_variables)]
	fn on_failure(&self, failure: &RequestFailure) {}

	/// No acknowledgement arrived within the request timeout.
	fn on_timeout(&self) {}
}

/// Terminal (or pending) state of a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Pending,
	Success,
	Failure(RequestFailure),
	Timeout,
}

impl Outcome {
	/// Returns true for every state except `Pending`.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, Outcome::Pending)
	}
}

type SettleHook = Box<dyn Fn(&Outcome) + Send + Sync>;

struct CompletionState {
	outcome: Outcome,
	response: Option<String>,
	timeout_task: Option<TaskHandle>,
	/// Set once the settle hook has run; blocking waiters wait for this.
	released: bool,
}

/// Thread-safe, single-use result cell for one request.
pub struct Completion {
	kind: RequestKind,
	target: String,
	timeout: Option<Duration>,
	blocking: bool,
	listener: Option<Arc<dyn RequestListener>>,
	scheduler: Scheduler,
	on_settle: Option<SettleHook>,
	state: Mutex<CompletionState>,
	settled: Condvar,
}

impl fmt::Debug for Completion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Completion")
			.field("kind", &self.kind)
			.field("target", &self.target)
			.field("timeout", &self.timeout)
			.field("blocking", &self.blocking)
			.field("outcome", &self.state.lock().outcome)
			.finish()
	}
}

impl Completion {
	/// Completion whose caller blocks in `wait`.
	///
	/// A `timeout` of `None` or zero never times out.
	pub fn blocking(
		kind: RequestKind,
		target: impl Into<String>,
		timeout: Option<Duration>,
		scheduler: Scheduler,
	) -> Self {
		Self::new(kind, target.into(), timeout, true, None, scheduler)
	}

	/// Completion that reports to `listener` instead of blocking.
	pub fn callback(
		kind: RequestKind,
		target: impl Into<String>,
		timeout: Option<Duration>,
		listener: Option<Arc<dyn RequestListener>>,
		scheduler: Scheduler,
	) -> Self {
		Self::new(kind, target.into(), timeout, false, listener, scheduler)
	}

	fn new(
		kind: RequestKind,
		target: String,
		timeout: Option<Duration>,
		blocking: bool,
		listener: Option<Arc<dyn RequestListener>>,
		scheduler: Scheduler,
	) -> Self {
		Self {
			kind,
			target,
			timeout: timeout.filter(|t| !t.is_zero()),
			blocking,
			listener,
			scheduler,
			on_settle: None,
			state: Mutex::new(CompletionState {
				outcome: Outcome::Pending,
				response: None,
				timeout_task: None,
				released: false,
			}),
			settled: Condvar::new(),
		}
	}

	/// Installs an internal hook run once, on the settling thread, right after
	/// the outcome becomes terminal.
	pub(crate) fn on_settle<F>(mut self, hook: F) -> Self
	where F: Fn(&Outcome) + Send + Sync + 'static {
		self.on_settle = Some(Box::new(hook));
		self
	}

	pub fn kind(&self) -> RequestKind {
		self.kind
	}

	/// Topic, filter or command this completion belongs to.
	pub fn target(&self) -> &str {
		&self.target
	}

	pub fn timeout(&self) -> Option<Duration> {
		self.timeout
	}

	pub fn is_blocking(&self) -> bool {
		self.blocking
	}

	/// Snapshot of the current outcome.
	pub fn outcome(&self) -> Outcome {
		self.state.lock().outcome.clone()
	}

	/// Response attached by a successful shadow command.
	pub fn response(&self) -> Option<String> {
		self.state.lock().response.clone()
	}

	/// Marks the request acknowledged.
	pub fn succeed(&self) {
		self.settle(Outcome::Success, None);
	}

	/// Marks the request acknowledged with a response document.
	pub fn succeed_with(&self, response: impl Into<String>) {
		self.settle(Outcome::Success, Some(response.into()));
	}

	/// Marks the request failed.
	pub fn fail(&self, code: Option<ShadowErrorCode>, message: impl Into<String>) {
		self.settle(
			Outcome::Failure(RequestFailure {
				code,
				message: message.into(),
			}),
			None,
		);
	}

	/// Marks the request timed out.
	pub fn expire(&self) {
		self.settle(Outcome::Timeout, None);
	}

	fn settle(&self, outcome: Outcome, response: Option<String>) {
		{
			let mut state = self.state.lock();
			if state.outcome.is_terminal() {
				trace!(
					kind = %self.kind,
					target = %self.target,
					ignored = ?outcome,
					"Completion already settled"
				);
				return;
			}
			state.outcome = outcome.clone();
			if response.is_some() {
				state.response = response;
			}
			if let Some(task) = state.timeout_task.take() {
				task.cancel();
			}
		}

		debug!(kind = %self.kind, target = %self.target, outcome = ?outcome, "Request settled");
		if let Some(hook) = &self.on_settle {
			hook(&outcome);
		}
		self.state.lock().released = true;
		self.settled.notify_all();
		if !self.blocking {
			self.notify_listener(outcome);
		}
	}

	fn notify_listener(&self, outcome: Outcome) {
		let Some(listener) = self.listener.clone() else {
			return;
		};
		let response = self.response();
		self.scheduler.execute(move || match outcome {
			| Outcome::Success => listener.on_success(response.as_deref()),
			| Outcome::Failure(failure) => listener.on_failure(&failure),
			| Outcome::Timeout => listener.on_timeout(),
			| Outcome::Pending => {}
		});
	}

	/// Waits for the outcome according to the completion mode.
	///
	/// Arms the timeout if one is configured. Blocking completions park the
	/// caller until the outcome is terminal and convert it into a result;
	/// callback completions return `Ok(None)` immediately. Calling `wait` on
	/// a settled completion returns its result without blocking.
	pub fn wait(self: &Arc<Self>) -> Result<Option<String>, ShadowClientError> {
		let mut state = self.state.lock();
		if state.released {
			return self.result(&state);
		}

		if let Some(timeout) = self.timeout {
			if state.timeout_task.is_none() && !state.outcome.is_terminal() {
				let weak = Arc::downgrade(self);
				state.timeout_task =
					Some(self.scheduler.schedule(timeout, move || {
						if let Some(completion) = weak.upgrade() {
							completion.expire();
						}
					}));
			}
		}

		if !self.blocking {
			return Ok(None);
		}

		while !state.released {
			self.settled.wait(&mut state);
		}
		if let Some(task) = state.timeout_task.take() {
			task.cancel();
		}
		self.result(&state)
	}

	fn result(
		&self,
		state: &CompletionState,
	) -> Result<Option<String>, ShadowClientError> {
		match &state.outcome {
			| Outcome::Success => Ok(state.response.clone()),
			| Outcome::Failure(failure) => {
				Err(ShadowClientError::Request(failure.clone()))
			}
			| Outcome::Timeout => Err(ShadowClientError::Timeout {
				target: self.target.clone(),
			}),
			| Outcome::Pending => Ok(None),
		}
	}
}
