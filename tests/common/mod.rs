//! Shared fixtures for the integration tests
//!
//! `MockTransport` stands in for a broker: it acknowledges requests on the
//! calling thread, records everything it is handed and lets a test inject
//! connection events and inbound messages.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mqtt_device_shadow::completion::RequestKind;
use mqtt_device_shadow::{
	ClientSettings, Message, Request, ShadowClient, ShadowClientConfig,
	Transport, TransportError, TransportListener,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;

type Responder = Arc<dyn Fn(&Message) -> Option<Message> + Send + Sync>;

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
	pub kind: RequestKind,
	pub topic: String,
	pub payload: Vec<u8>,
}

impl Recorded {
	pub fn json(&self) -> Value {
		serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
	}
}

#[derive(Default)]
pub struct MockTransport {
	listener: Mutex<Option<Arc<dyn TransportListener>>>,
	connected: AtomicBool,
	opens: AtomicUsize,
	closes: AtomicUsize,
	failing_opens: AtomicUsize,
	always_fail: AtomicBool,
	silent: AtomicBool,
	rejected_filters: Mutex<HashSet<String>>,
	requests: Mutex<Vec<Recorded>>,
	responder: Mutex<Option<Responder>>,
}

impl MockTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// The next `count` opens fail.
	pub fn fail_next_opens(&self, count: usize) {
		self.failing_opens.store(count, Ordering::SeqCst);
	}

	/// Every open fails.
	pub fn fail_all_opens(&self) {
		self.always_fail.store(true, Ordering::SeqCst);
	}

	/// Requests are accepted but never acknowledged.
	pub fn stay_silent(&self) {
		self.silent.store(true, Ordering::SeqCst);
	}

	/// Subscribes to `filter` are refused by the broker.
	pub fn reject_filter(&self, filter: &str) {
		self.rejected_filters.lock().insert(filter.to_string());
	}

	/// Replies to publishes, e.g. a shadow service answering commands.
	pub fn respond_with<F>(&self, responder: F)
	where F: Fn(&Message) -> Option<Message> + Send + Sync + 'static {
		*self.responder.lock() = Some(Arc::new(responder));
	}

	pub fn opens(&self) -> usize {
		self.opens.load(Ordering::SeqCst)
	}

	pub fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}

	pub fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	pub fn requests(&self) -> Vec<Recorded> {
		self.requests.lock().clone()
	}

	pub fn requests_to(&self, kind: RequestKind, topic: &str) -> Vec<Recorded> {
		self.requests()
			.into_iter()
			.filter(|r| r.kind == kind && r.topic == topic)
			.collect()
	}

	pub fn clear_requests(&self) {
		self.requests.lock().clear();
	}

	/// Simulates the broker dropping the session.
	pub fn drop_connection(&self) {
		self.connected.store(false, Ordering::SeqCst);
		if let Some(listener) = self.listener() {
			listener.on_connect_failure();
		}
	}

	/// Delivers an inbound message.
	pub fn deliver(&self, message: Message) {
		if let Some(listener) = self.listener() {
			listener.on_message(message);
		}
	}

	fn listener(&self) -> Option<Arc<dyn TransportListener>> {
		self.listener.lock().clone()
	}

	fn record(&self, request: &Request) {
		self.requests.lock().push(Recorded {
			kind: request.kind,
			topic: request.topic().to_string(),
			payload: request.message.payload.to_vec(),
		});
	}

	fn accept(&self, request: &Request) -> Result<(), TransportError> {
		if !self.is_connected() {
			return Err(TransportError::NotConnected);
		}
		self.record(request);
		Ok(())
	}
}

impl Transport for MockTransport {
	fn open(&self, listener: Arc<dyn TransportListener>, _runtime: &Handle) {
		self.opens.fetch_add(1, Ordering::SeqCst);
		*self.listener.lock() = Some(Arc::clone(&listener));
		let failing = self
			.failing_opens
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if failing || self.always_fail.load(Ordering::SeqCst) {
			listener.on_connect_failure();
		} else {
			self.connected.store(true, Ordering::SeqCst);
			listener.on_connect_success();
		}
	}

	fn close(&self) {
		self.closes.fetch_add(1, Ordering::SeqCst);
		self.connected.store(false, Ordering::SeqCst);
		if let Some(listener) = self.listener() {
			listener.on_connection_closed();
		}
	}

	fn publish(&self, request: &Request) -> Result<(), TransportError> {
		self.accept(request)?;
		if self.silent.load(Ordering::SeqCst) {
			return Ok(());
		}
		request.completion.succeed();
		let responder = self.responder.lock().clone();
		if let Some(reply) = responder.and_then(|respond| respond(&request.message)) {
			self.deliver(reply);
		}
		Ok(())
	}

	fn subscribe(&self, request: &Request) -> Result<(), TransportError> {
		self.accept(request)?;
		if self.silent.load(Ordering::SeqCst) {
			return Ok(());
		}
		if self.rejected_filters.lock().contains(request.topic()) {
			request
				.completion
				.fail(None, format!("Subscription to '{}' refused", request.topic()));
		} else {
			request.completion.succeed();
		}
		Ok(())
	}

	fn unsubscribe(&self, request: &Request) -> Result<(), TransportError> {
		self.accept(request)?;
		if !self.silent.load(Ordering::SeqCst) {
			request.completion.succeed();
		}
		Ok(())
	}
}

/// Settings with short delays suited to tests.
pub fn settings() -> ClientSettings {
	ClientSettings {
		num_worker_threads: 4,
		connection_timeout_millis: 2_000,
		server_ack_timeout_millis: 1_000,
		base_retry_delay_millis: 20,
		max_retry_delay_millis: 100,
		max_connection_retries: 3,
		..ClientSettings::default()
	}
}

pub fn client(transport: &Arc<MockTransport>) -> ShadowClient {
	client_with(transport, settings())
}

pub fn client_with(
	transport: &Arc<MockTransport>,
	settings: ClientSettings,
) -> ShadowClient {
	init_tracing();
	let config = ShadowClientConfig::new("test-device").with_settings(settings);
	let transport: Arc<dyn Transport> = transport.clone();
	ShadowClient::new(config, transport).unwrap()
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until<F>(timeout: Duration, condition: F) -> bool
where F: Fn() -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		thread::sleep(Duration::from_millis(5));
	}
	condition()
}

/// Reply on `{command}/{status}` echoing the command's client token.
pub fn shadow_ack(command: &Message, status: &str, mut body: Value) -> Message {
	let request: Value = serde_json::from_slice(&command.payload).unwrap_or(Value::Null);
	if let (Some(token), Some(object)) = (request.get("clientToken"), body.as_object_mut()) {
		object.insert("clientToken".to_string(), token.clone());
	}
	Message::new(format!("{}/{status}", command.topic), body.to_string())
}

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "warn".into()),
		)
		.with_test_writer()
		.try_init();
}
