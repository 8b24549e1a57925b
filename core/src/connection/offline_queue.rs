//! Bounded FIFO of requests deferred while the connection is down.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::client::error::ShadowClientError;
use crate::completion::RequestKind;
use crate::transport::Request;

/// Offline queue for one request kind.
///
/// A capacity of 0 disables queueing: every enqueue is rejected.
#[derive(Debug)]
pub struct OfflineQueue {
	kind: RequestKind,
	capacity: usize,
	requests: Mutex<VecDeque<Request>>,
}

impl OfflineQueue {
	pub fn new(kind: RequestKind, capacity: usize) -> Self {
		Self {
			kind,
			capacity,
			requests: Mutex::new(VecDeque::new()),
		}
	}

	pub fn kind(&self) -> RequestKind {
		self.kind
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn len(&self) -> usize {
		self.requests.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.requests.lock().is_empty()
	}

	/// Appends a request, failing with `QueueFull` at capacity.
	///
	/// With queueing disabled the caller receives `NotConnected` instead.
	pub fn push(&self, request: Request) -> Result<(), ShadowClientError> {
		if self.capacity == 0 {
			debug!(kind = %self.kind, topic = %request.topic(), "Offline queueing disabled");
			return Err(ShadowClientError::NotConnected);
		}
		let mut requests = self.requests.lock();
		if requests.len() >= self.capacity {
			warn!(
				kind = %self.kind,
				topic = %request.topic(),
				capacity = self.capacity,
				"Offline queue is full, dropping request"
			);
			return Err(ShadowClientError::QueueFull {
				kind: self.kind,
				capacity: self.capacity,
			});
		}
		debug!(kind = %self.kind, topic = %request.topic(), queued = requests.len() + 1, "Request queued offline");
		requests.push_back(request);
		Ok(())
	}

	/// Takes every queued request, oldest first.
	pub fn take_all(&self) -> VecDeque<Request> {
		std::mem::take(&mut *self.requests.lock())
	}

	/// Puts unsent requests back in front of anything queued meanwhile,
	/// keeping their original order.
	pub fn restore(&self, mut unsent: VecDeque<Request>) {
		if unsent.is_empty() {
			return;
		}
		let mut requests = self.requests.lock();
		unsent.append(&mut requests);
		*requests = unsent;
	}
}
