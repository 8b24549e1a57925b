//! Connection lifecycle, reconnect scheduling and offline queues
//!
//! The manager drives the transport and reacts to its notifications. All
//! notifications pass through one ordered event lane: the transport's
//! listener only posts events into an unbounded channel, and a single task on
//! the client's runtime hands each event to the worker pool and waits for it
//! to finish before taking the next one. State transitions, queue drains and
//! observer callbacks therefore never run on a transport I/O thread and never
//! overlap each other.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::offline_queue::OfflineQueue;
use super::state::ConnectionState;
use crate::client::config::ClientSettings;
use crate::client::error::ShadowClientError;
use crate::completion::{Completion, RequestKind};
use crate::message::Message;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::transport::{Request, Transport, TransportError, TransportListener};

/// Reactions of the connection's owner to lifecycle events.
///
/// Called on the worker pool, one event at a time.
pub(crate) trait ConnectionObserver: Send + Sync {
	/// The connection is up and the offline queues are drained. An error
	/// closes the connection.
	fn on_connection_success(&self) -> Result<(), ShadowClientError>;

	/// The connection was lost and a reconnect is scheduled.
	fn on_connection_failure(&self);

	/// The connection is closed for good.
	fn on_connection_closed(&self);

	/// A message arrived from the broker.
	fn on_message(&self, message: Message);
}

#[derive(Debug)]
enum TransportEvent {
	ConnectSuccess,
	ConnectFailure,
	ConnectionClosed,
	Message(Message),
}

struct EventLane {
	events: mpsc::UnboundedSender<TransportEvent>,
}

impl EventLane {
	fn post(&self, event: TransportEvent) {
		if let Err(err) = self.events.send(event) {
			debug!(event = ?err.0, "Event lane closed, dropping transport event");
		}
	}
}

impl TransportListener for EventLane {
	fn on_connect_success(&self) {
		self.post(TransportEvent::ConnectSuccess);
	}

	fn on_connect_failure(&self) {
		self.post(TransportEvent::ConnectFailure);
	}

	fn on_connection_closed(&self) {
		self.post(TransportEvent::ConnectionClosed);
	}

	fn on_message(&self, message: Message) {
		self.post(TransportEvent::Message(message));
	}
}

#[derive(Default)]
struct RetryState {
	attempts: u32,
	user_disconnect: bool,
	task: Option<TaskHandle>,
}

impl RetryState {
	fn cancel(&mut self) {
		if let Some(task) = self.task.take() {
			debug!("Pending reconnect cancelled");
			task.cancel();
		}
	}
}

/// Owns the transport session and everything needed to keep it alive.
pub struct ConnectionManager {
	transport: Arc<dyn Transport>,
	scheduler: Scheduler,
	backoff: Backoff,
	max_retries: u32,
	state: RwLock<ConnectionState>,
	retry: Mutex<RetryState>,
	connect_completion: Mutex<Option<Arc<Completion>>>,
	disconnect_completion: Mutex<Option<Arc<Completion>>>,
	subscribe_queue: OfflineQueue,
	unsubscribe_queue: OfflineQueue,
	publish_queue: OfflineQueue,
	observer: Weak<dyn ConnectionObserver>,
	lane: Arc<EventLane>,
}

impl ConnectionManager {
	pub(crate) fn new(
		transport: Arc<dyn Transport>,
		scheduler: Scheduler,
		settings: &ClientSettings,
		observer: Weak<dyn ConnectionObserver>,
	) -> Arc<Self> {
		let (events, mut receiver) = mpsc::unbounded_channel();
		let capacity = settings.max_offline_queue_size;
		let manager = Arc::new(Self {
			transport,
			backoff: Backoff::new(
				settings.base_retry_delay(),
				settings.max_retry_delay(),
			),
			max_retries: settings.max_connection_retries,
			state: RwLock::new(ConnectionState::Disconnected),
			retry: Mutex::new(RetryState::default()),
			connect_completion: Mutex::new(None),
			disconnect_completion: Mutex::new(None),
			subscribe_queue: OfflineQueue::new(RequestKind::Subscribe, capacity),
			unsubscribe_queue: OfflineQueue::new(
				RequestKind::Unsubscribe,
				capacity,
			),
			publish_queue: OfflineQueue::new(RequestKind::Publish, capacity),
			observer,
			lane: Arc::new(EventLane { events }),
			scheduler,
		});

		let weak = Arc::downgrade(&manager);
		let handle = manager.scheduler.handle().clone();
		manager.scheduler.handle().spawn(async move {
			while let Some(event) = receiver.recv().await {
				let Some(manager) = weak.upgrade() else {
					break;
				};
				let processed =
					handle.spawn_blocking(move || manager.handle_event(event));
				if let Err(err) = processed.await {
					error!(error = %err, "Transport event handler panicked");
				}
			}
			debug!("Event lane stopped");
		});
		manager
	}

	/// Current connection state.
	pub fn state(&self) -> ConnectionState {
		*self.state.read()
	}

	fn set_state(&self, state: ConnectionState) {
		let previous = std::mem::replace(&mut *self.state.write(), state);
		if previous != state {
			info!(from = %previous, to = %state, "Connection state changed");
		}
	}

	/// Number of requests waiting in the offline queue of `kind`.
	pub fn offline_queue_len(&self, kind: RequestKind) -> usize {
		self.queue_for(kind).map_or(0, OfflineQueue::len)
	}

	/// Starts connecting. `completion` settles when the connection is up or
	/// the attempt is given up.
	pub(crate) fn connect(&self, completion: Arc<Completion>) {
		if self.state().is_connected() {
			debug!("Already connected");
			completion.succeed();
			return;
		}
		{
			let mut retry = self.retry.lock();
			retry.cancel();
			retry.attempts = 0;
			retry.user_disconnect = false;
		}
		if let Some(previous) =
			self.connect_completion.lock().replace(completion)
		{
			previous.fail(None, "Superseded by a new connect request");
		}
		info!("Opening connection");
		let listener: Arc<dyn TransportListener> = self.lane.clone();
		self.transport.open(listener, self.scheduler.handle());
	}

	/// Closes the connection. `completion` settles once the transport
	/// reports the closure.
	pub(crate) fn disconnect(&self, completion: Arc<Completion>) {
		let idle = {
			let mut retry = self.retry.lock();
			let idle = retry.task.is_none()
				&& self.state() == ConnectionState::Disconnected;
			retry.cancel();
			retry.user_disconnect = true;
			idle
		};
		if let Some(previous) =
			self.disconnect_completion.lock().replace(completion)
		{
			previous.succeed();
		}
		info!("Closing connection");
		self.transport.close();
		if idle {
			// Nothing is open, so the transport may have no one to report to.
			self.lane.on_connection_closed();
		}
	}

	/// Hands a request to the transport, or queues it while disconnected.
	pub(crate) fn submit(&self, request: Request) -> Result<(), ShadowClientError> {
		let queue = self.queue_for(request.kind).ok_or_else(|| {
			ShadowClientError::Transport(TransportError::Rejected(format!(
				"{} is not a transport request",
				request.kind
			)))
		})?;
		if !self.state().is_connected() {
			return queue.push(request);
		}
		match self.send(&request) {
			| Ok(()) => Ok(()),
			| Err(err) if err.is_retryable() => queue.push(request),
			| Err(err) => Err(err.into()),
		}
	}

	fn queue_for(&self, kind: RequestKind) -> Option<&OfflineQueue> {
		match kind {
			| RequestKind::Publish => Some(&self.publish_queue),
			| RequestKind::Subscribe => Some(&self.subscribe_queue),
			| RequestKind::Unsubscribe => Some(&self.unsubscribe_queue),
			| _ => None,
		}
	}

	fn send(&self, request: &Request) -> Result<(), TransportError> {
		match request.kind {
			| RequestKind::Publish => self.transport.publish(request),
			| RequestKind::Subscribe => self.transport.subscribe(request),
			| RequestKind::Unsubscribe => self.transport.unsubscribe(request),
			| kind => Err(TransportError::Rejected(format!(
				"{kind} is not a transport request"
			))),
		}
	}

	fn handle_event(self: Arc<Self>, event: TransportEvent) {
		match event {
			| TransportEvent::ConnectSuccess => self.handle_connect_success(),
			| TransportEvent::ConnectFailure => self.handle_connect_failure(),
			| TransportEvent::ConnectionClosed => {
				self.handle_connection_closed()
			}
			| TransportEvent::Message(message) => {
				if let Some(observer) = self.observer.upgrade() {
					observer.on_message(message);
				}
			}
		}
	}

	fn handle_connect_success(&self) {
		self.set_state(ConnectionState::Connected);
		{
			let mut retry = self.retry.lock();
			retry.attempts = 0;
			retry.cancel();
		}

		if let Err(err) = self.drain_offline_queues() {
			error!(error = %err, "Offline request replay failed, closing connection");
			self.transport.close();
			return;
		}

		if let Some(observer) = self.observer.upgrade() {
			if let Err(err) = observer.on_connection_success() {
				error!(error = %err, "Connection setup failed, closing connection");
				self.transport.close();
				return;
			}
		}

		if let Some(completion) = self.connect_completion.lock().take() {
			completion.succeed();
		}
	}

	/// Replays queued requests, subscribe before unsubscribe before publish,
	/// each queue oldest first.
	///
	/// Stops quietly if the connection drops again meanwhile; the unsent rest
	/// stays queued for the next connection.
	fn drain_offline_queues(&self) -> Result<(), ShadowClientError> {
		for queue in [
			&self.subscribe_queue,
			&self.unsubscribe_queue,
			&self.publish_queue,
		] {
			let mut pending = queue.take_all();
			if pending.is_empty() {
				continue;
			}
			info!(kind = %queue.kind(), count = pending.len(), "Replaying offline requests");
			while let Some(request) = pending.pop_front() {
				match self.send(&request) {
					| Ok(()) => {}
					| Err(err) if err.is_retryable() => {
						warn!(kind = %queue.kind(), remaining = pending.len() + 1, "Connection lost during replay");
						pending.push_front(request);
						queue.restore(pending);
						return Ok(());
					}
					| Err(err) => {
						request.completion.fail(None, err.to_string());
						queue.restore(pending);
						return Err(err.into());
					}
				}
			}
		}
		Ok(())
	}

	fn handle_connect_failure(self: &Arc<Self>) {
		self.set_state(ConnectionState::Disconnected);
		if self.schedule_retry() {
			if let Some(observer) = self.observer.upgrade() {
				observer.on_connection_failure();
			}
		} else {
			self.handle_connection_closed();
		}
	}

	/// Schedules a reconnect if one is allowed. Returns true if a reconnect
	/// is pending afterwards.
	fn schedule_retry(self: &Arc<Self>) -> bool {
		let mut retry = self.retry.lock();
		if retry.task.is_some() {
			warn!("Reconnect already scheduled");
			return true;
		}
		if retry.user_disconnect {
			debug!("Connection closed by user, not reconnecting");
			return false;
		}
		if self.max_retries == 0 || retry.attempts >= self.max_retries {
			warn!(
				attempts = retry.attempts,
				max_retries = self.max_retries,
				"Reconnect attempts exhausted"
			);
			return false;
		}

		let delay = self.backoff.delay(retry.attempts);
		let weak = Arc::downgrade(self);
		retry.task = Some(self.scheduler.schedule(delay, move || {
			if let Some(manager) = weak.upgrade() {
				manager.reconnect();
			}
		}));
		info!(
			attempt = retry.attempts + 1,
			delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
			"Reconnect scheduled"
		);
		true
	}

	fn reconnect(&self) {
		{
			let mut retry = self.retry.lock();
			match retry.task.take() {
				| Some(task) if !task.is_cancelled() => {}
				| _ => return,
			}
			retry.attempts += 1;
			info!(attempt = retry.attempts, "Reconnecting");
		}
		self.set_state(ConnectionState::Reconnecting);
		let listener: Arc<dyn TransportListener> = self.lane.clone();
		self.transport.open(listener, self.scheduler.handle());
	}

	fn handle_connection_closed(&self) {
		self.set_state(ConnectionState::Disconnected);
		self.retry.lock().cancel();
		if let Some(completion) = self.connect_completion.lock().take() {
			completion.fail(None, "Connection closed");
		}
		if let Some(observer) = self.observer.upgrade() {
			observer.on_connection_closed();
		}
		if let Some(completion) = self.disconnect_completion.lock().take() {
			completion.succeed();
		}
	}
}

impl std::fmt::Debug for ConnectionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionManager")
			.field("state", &self.state())
			.field("publish_queue", &self.publish_queue.len())
			.field("subscribe_queue", &self.subscribe_queue.len())
			.field("unsubscribe_queue", &self.unsubscribe_queue.len())
			.finish_non_exhaustive()
	}
}
