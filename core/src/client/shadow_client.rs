use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::config::{ClientSettings, ShadowClientConfig};
use super::error::ShadowClientError;
use super::handler::Subscription;
use crate::completion::{Completion, Outcome, RequestKind, RequestListener};
use crate::connection::{ConnectionManager, ConnectionObserver, ConnectionState};
use crate::message::Message;
use crate::scheduler::Scheduler;
use crate::shadow::{ShadowDevice, ShadowState, ShadowSync};
use crate::transport::{Request, Transport};

/// Device-side client with automatic reconnect, offline queueing and shadow
/// synchronization.
///
/// Every operation exists in two forms: a blocking one that waits for the
/// broker's acknowledgement (bounded by the given timeout, if any) and an
/// `_async` one that returns immediately and reports the outcome to an
/// optional [`RequestListener`] on the client's worker pool.
///
/// Cloning yields another handle to the same client.
#[derive(Clone)]
pub struct ShadowClient {
	inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ShadowClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ShadowClient")
			.field("client_id", &self.inner.config.client_id)
			.field("state", &self.connection_state())
			.field("subscriptions", &self.inner.subscriptions.len())
			.field("devices", &self.inner.devices.len())
			.finish()
	}
}

pub(crate) struct ClientInner {
	config: ShadowClientConfig,
	scheduler: Scheduler,
	connection: Arc<ConnectionManager>,
	subscriptions: DashMap<String, Subscription>,
	devices: DashMap<String, Arc<dyn ShadowSync>>,
	this: Weak<ClientInner>,
}

impl ShadowClient {
	/// Creates a disconnected client driving `transport`.
	pub fn new(
		config: ShadowClientConfig,
		transport: Arc<dyn Transport>,
	) -> Result<Self, ShadowClientError> {
		config.settings.validate()?;
		let scheduler = Scheduler::new(config.settings.num_worker_threads)?;
		let inner = Arc::new_cyclic(|this: &Weak<ClientInner>| {
			let observer: Weak<dyn ConnectionObserver> = this.clone();
			ClientInner {
				connection: ConnectionManager::new(
					transport,
					scheduler.clone(),
					&config.settings,
					observer,
				),
				config,
				scheduler,
				subscriptions: DashMap::new(),
				devices: DashMap::new(),
				this: this.clone(),
			}
		});
		info!(client_id = %inner.config.client_id, "Shadow client created");
		Ok(Self { inner })
	}

	pub fn client_id(&self) -> &str {
		&self.inner.config.client_id
	}

	pub fn settings(&self) -> &ClientSettings {
		&self.inner.config.settings
	}

	pub fn connection_state(&self) -> ConnectionState {
		self.inner.connection.state()
	}

	/// Filters currently in the subscription registry.
	pub fn subscriptions(&self) -> Vec<String> {
		self.inner
			.subscriptions
			.iter()
			.map(|entry| entry.key().clone())
			.collect()
	}

	/// Number of requests of `kind` waiting for the connection.
	pub fn offline_queue_len(&self, kind: RequestKind) -> usize {
		self.inner.connection.offline_queue_len(kind)
	}

	/// Connects and waits for the connection. `None` waits at most the
	/// configured connection timeout.
	pub fn connect(&self, timeout: Option<Duration>) -> Result<(), ShadowClientError> {
		let timeout = timeout.or(Some(self.settings().connection_timeout()));
		self.inner.connect(timeout, true, None)
	}

	pub fn connect_async(
		&self,
		timeout: Option<Duration>,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		self.inner.connect(timeout, false, listener)
	}

	/// Disconnects and waits for the transport to report the closure.
	pub fn disconnect(&self, timeout: Option<Duration>) -> Result<(), ShadowClientError> {
		self.inner.disconnect(timeout, true, None)
	}

	pub fn disconnect_async(
		&self,
		timeout: Option<Duration>,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		self.inner.disconnect(timeout, false, listener)
	}

	/// Publishes and waits for the broker's acknowledgement.
	pub fn publish(
		&self,
		message: Message,
		timeout: Option<Duration>,
	) -> Result<(), ShadowClientError> {
		self.inner.publish_with(message, timeout, true, None)
	}

	pub fn publish_async(
		&self,
		message: Message,
		timeout: Option<Duration>,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		self.inner.publish_with(message, timeout, false, listener)
	}

	/// Subscribes and waits for the broker's acknowledgement. The filter is
	/// added to the registry once confirmed.
	pub fn subscribe(
		&self,
		subscription: Subscription,
		timeout: Option<Duration>,
	) -> Result<(), ShadowClientError> {
		self.inner.subscribe_with(subscription, timeout, true, None)
	}

	pub fn subscribe_async(
		&self,
		subscription: Subscription,
		timeout: Option<Duration>,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		self.inner.subscribe_with(subscription, timeout, false, listener)
	}

	/// Unsubscribes a registered filter. Unknown filters return immediately
	/// without contacting the broker.
	pub fn unsubscribe(
		&self,
		filter: &str,
		timeout: Option<Duration>,
	) -> Result<(), ShadowClientError> {
		self.inner.unsubscribe_with(filter, timeout, true, None)
	}

	pub fn unsubscribe_async(
		&self,
		filter: &str,
		timeout: Option<Duration>,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		self.inner.unsubscribe_with(filter, timeout, false, listener)
	}

	/// Registers a shadow device. Sync starts right away when connected,
	/// otherwise on the next successful connect.
	pub fn attach<D: ShadowState>(&self, device: &ShadowDevice<D>) {
		let sync = device.sync_handle();
		sync.bind(Arc::downgrade(&self.inner));
		if let Some(previous) = self
			.inner
			.devices
			.insert(device.thing_name().to_string(), Arc::clone(&sync))
		{
			if !Arc::ptr_eq(&previous, &sync) {
				warn!(thing = %device.thing_name(), "Replacing attached device with the same thing name");
				previous.deactivate(&self.inner);
				previous.bind(Weak::new());
			}
		}
		info!(thing = %device.thing_name(), "Device attached");
		if self.connection_state().is_connected() {
			sync.activate(&self.inner);
		}
	}

	/// Stops a device's sync and removes it from the client.
	pub fn detach<D: ShadowState>(&self, device: &ShadowDevice<D>) {
		let Some((_, sync)) = self.inner.devices.remove(device.thing_name()) else {
			debug!(thing = %device.thing_name(), "Device was not attached");
			return;
		};
		sync.deactivate(&self.inner);
		sync.bind(Weak::new());
		info!(thing = %device.thing_name(), "Device detached");
	}

	/// Hands an inbound message to every matching subscription handler.
	pub fn dispatch(&self, message: Message) {
		self.inner.dispatch(message);
	}

	#[cfg(test)]
	pub(crate) fn inner(&self) -> &Arc<ClientInner> {
		&self.inner
	}
}

impl ClientInner {
	pub(crate) fn scheduler(&self) -> &Scheduler {
		&self.scheduler
	}

	pub(crate) fn server_ack_timeout(&self) -> Duration {
		self.config.settings.server_ack_timeout()
	}

	pub(crate) fn is_connected(&self) -> bool {
		self.connection.state().is_connected()
	}

	pub(crate) fn submit(&self, request: Request) -> Result<(), ShadowClientError> {
		self.connection.submit(request)
	}

	fn completion(
		&self,
		kind: RequestKind,
		target: &str,
		timeout: Option<Duration>,
		blocking: bool,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Completion {
		if blocking {
			Completion::blocking(kind, target, timeout, self.scheduler.clone())
		} else {
			Completion::callback(kind, target, timeout, listener, self.scheduler.clone())
		}
	}

	fn connect(
		&self,
		timeout: Option<Duration>,
		blocking: bool,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		let completion = Arc::new(self.completion(
			RequestKind::Connect,
			&self.config.client_id,
			timeout,
			blocking,
			listener,
		));
		self.connection.connect(Arc::clone(&completion));
		completion.wait().map(drop)
	}

	fn disconnect(
		&self,
		timeout: Option<Duration>,
		blocking: bool,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		let completion = Arc::new(self.completion(
			RequestKind::Disconnect,
			&self.config.client_id,
			timeout,
			blocking,
			listener,
		));
		self.connection.disconnect(Arc::clone(&completion));
		completion.wait().map(drop)
	}

	fn publish_with(
		&self,
		message: Message,
		timeout: Option<Duration>,
		blocking: bool,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		let completion = Arc::new(self.completion(
			RequestKind::Publish,
			&message.topic,
			timeout,
			blocking,
			listener,
		));
		self.submit(Request::publish(message, Arc::clone(&completion)))?;
		completion.wait().map(drop)
	}

	pub(crate) fn subscribe_with(
		&self,
		subscription: Subscription,
		timeout: Option<Duration>,
		blocking: bool,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		let filter = subscription.filter().as_str().to_string();
		let qos = subscription.qos();
		let client = self.this.clone();
		let registered = subscription.clone();
		let completion = self
			.completion(RequestKind::Subscribe, &filter, timeout, blocking, listener)
			.on_settle(move |outcome| {
				if matches!(outcome, Outcome::Success) {
					if let Some(client) = client.upgrade() {
						let filter = registered.filter().as_str().to_string();
						debug!(filter = %filter, "Subscription confirmed");
						client.subscriptions.insert(filter, registered.clone());
					}
				}
			});
		let completion = Arc::new(completion);
		self.submit(Request::subscribe(filter, qos, Arc::clone(&completion)))?;
		completion.wait().map(drop)
	}

	pub(crate) fn unsubscribe_with(
		&self,
		filter: &str,
		timeout: Option<Duration>,
		blocking: bool,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		if !self.subscriptions.contains_key(filter) {
			debug!(filter = %filter, "Unsubscribe of unknown filter ignored");
			return Ok(());
		}
		let client = self.this.clone();
		let registered = filter.to_string();
		let completion = self
			.completion(RequestKind::Unsubscribe, filter, timeout, blocking, listener)
			.on_settle(move |outcome| {
				if matches!(outcome, Outcome::Success) {
					if let Some(client) = client.upgrade() {
						debug!(filter = %registered, "Unsubscription confirmed");
						client.subscriptions.remove(&registered);
					}
				}
			});
		let completion = Arc::new(completion);
		self.submit(Request::unsubscribe(filter, Arc::clone(&completion)))?;
		completion.wait().map(drop)
	}

	/// Drops a filter from the registry without contacting the broker.
	pub(crate) fn forget_subscription(&self, filter: &str) {
		self.subscriptions.remove(filter);
	}

	fn dispatch(&self, message: Message) {
		let handlers: Vec<_> = self
			.subscriptions
			.iter()
			.filter(|entry| entry.filter().matches(&message.topic))
			.map(|entry| Arc::clone(entry.handler()))
			.collect();
		if handlers.is_empty() {
			warn!(topic = %message.topic, "No subscription matches inbound message");
			return;
		}
		debug!(topic = %message.topic, handlers = handlers.len(), "Dispatching message");
		for handler in handlers {
			let message = message.clone();
			self.scheduler.execute(move || handler.on_message(&message));
		}
	}

	fn devices(&self) -> Vec<Arc<dyn ShadowSync>> {
		self.devices
			.iter()
			.map(|entry| Arc::clone(entry.value()))
			.collect()
	}

	/// Resubscribes every registered filter, one at a time, each bounded by
	/// the server-ack timeout.
	fn resubscribe_all(&self) -> Result<(), ShadowClientError> {
		let registered: Vec<Subscription> = self
			.subscriptions
			.iter()
			.map(|entry| entry.value().clone())
			.collect();
		if registered.is_empty() {
			return Ok(());
		}
		info!(count = registered.len(), "Resubscribing registered filters");
		for subscription in registered {
			let filter = subscription.filter().as_str();
			let completion = Arc::new(Completion::blocking(
				RequestKind::Subscribe,
				filter,
				Some(self.server_ack_timeout()),
				self.scheduler.clone(),
			));
			self.submit(Request::subscribe(
				filter,
				subscription.qos(),
				Arc::clone(&completion),
			))?;
			completion.wait()?;
		}
		Ok(())
	}
}

impl ConnectionObserver for ClientInner {
	fn on_connection_success(&self) -> Result<(), ShadowClientError> {
		self.resubscribe_all()?;
		for device in self.devices() {
			device.activate(self);
		}
		Ok(())
	}

	fn on_connection_failure(&self) {
		for device in self.devices() {
			device.deactivate(self);
		}
	}

	fn on_connection_closed(&self) {
		let devices = self.devices();
		for device in &devices {
			device.deactivate(self);
			device.bind(Weak::new());
		}
		self.devices.clear();
		self.subscriptions.clear();
		info!(devices = devices.len(), "Connection closed, registry cleared");
	}

	fn on_message(&self, message: Message) {
		self.dispatch(message);
	}
}
