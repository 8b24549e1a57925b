//! Loopback transport for unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::client::{ClientSettings, ShadowClient, ShadowClientConfig};
use crate::message::Message;
use crate::transport::{Request, Transport, TransportError, TransportListener};

/// Opens and acknowledges everything on the calling thread.
#[derive(Default)]
pub(crate) struct LoopbackTransport {
	listener: Mutex<Option<Arc<dyn TransportListener>>>,
	opens: AtomicUsize,
	published: Mutex<Vec<Message>>,
}

impl LoopbackTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn opens(&self) -> usize {
		self.opens.load(Ordering::SeqCst)
	}

	pub fn published(&self) -> Vec<Message> {
		self.published.lock().clone()
	}
}

impl Transport for LoopbackTransport {
	fn open(&self, listener: Arc<dyn TransportListener>, _runtime: &Handle) {
		self.opens.fetch_add(1, Ordering::SeqCst);
		*self.listener.lock() = Some(Arc::clone(&listener));
		listener.on_connect_success();
	}

	fn close(&self) {
		if let Some(listener) = self.listener.lock().clone() {
			listener.on_connection_closed();
		}
	}

	fn publish(&self, request: &Request) -> Result<(), TransportError> {
		self.published.lock().push(request.message.clone());
		request.completion.succeed();
		Ok(())
	}

	fn subscribe(&self, request: &Request) -> Result<(), TransportError> {
		request.completion.succeed();
		Ok(())
	}

	fn unsubscribe(&self, request: &Request) -> Result<(), TransportError> {
		request.completion.succeed();
		Ok(())
	}
}

pub(crate) fn connected_client(transport: &Arc<LoopbackTransport>) -> ShadowClient {
	let settings = ClientSettings {
		num_worker_threads: 2,
		..ClientSettings::default()
	};
	let config = ShadowClientConfig::new("unit-test").with_settings(settings);
	let transport: Arc<dyn Transport> = transport.clone();
	let client = ShadowClient::new(config, transport).unwrap();
	client.connect(None).unwrap();
	client
}

pub(crate) fn wait_until<F>(timeout: Duration, condition: F) -> bool
where F: Fn() -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		std::thread::sleep(Duration::from_millis(5));
	}
	condition()
}
