//! Boundary with the wire-level MQTT transport
//!
//! The connection manager drives a [`Transport`] and receives its
//! notifications through a [`TransportListener`]. Implementations may call
//! the listener from any thread, including their own I/O tasks; the client
//! re-posts every notification onto its worker pool before acting on it.

use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;

use crate::completion::{Completion, RequestKind};
use crate::message::{Message, QoS};

#[cfg(feature = "rumqtt")]
pub mod rumqtt;

#[cfg(feature = "rumqtt")]
pub use rumqtt::RumqttTransport;

/// Errors a transport reports when handed a request
#[derive(Error, Debug)]
pub enum TransportError {
	/// No session is currently open; the request may be retried later
	#[error("Transport is not connected")]
	NotConnected,

	/// The transport refused the request outright
	#[error("Request rejected by transport: {0}")]
	Rejected(String),

	/// rumqttc request channel error
	#[cfg(feature = "rumqtt")]
	#[error("MQTT client error: {0}")]
	Client(#[from] rumqttc::ClientError),
}

impl TransportError {
	/// Returns true for the "connection currently down" condition.
	pub fn is_retryable(&self) -> bool {
		matches!(self, TransportError::NotConnected)
	}
}

/// An outbound publish, subscribe or unsubscribe request.
///
/// For subscribe and unsubscribe requests, `message.topic` holds the filter
/// and the payload is empty. The transport settles `completion` once the
/// broker acknowledges the request.
#[derive(Debug, Clone)]
pub struct Request {
	pub kind: RequestKind,
	pub message: Message,
	pub completion: Arc<Completion>,
}

impl Request {
	pub fn publish(message: Message, completion: Arc<Completion>) -> Self {
		Self {
			kind: RequestKind::Publish,
			message,
			completion,
		}
	}

	pub fn subscribe(
		filter: impl Into<String>,
		qos: QoS,
		completion: Arc<Completion>,
	) -> Self {
		Self {
			kind: RequestKind::Subscribe,
			message: Message::new(filter, bytes::Bytes::new()).qos(qos),
			completion,
		}
	}

	pub fn unsubscribe(
		filter: impl Into<String>,
		completion: Arc<Completion>,
	) -> Self {
		Self {
			kind: RequestKind::Unsubscribe,
			message: Message::new(filter, bytes::Bytes::new()),
			completion,
		}
	}

	/// Topic of a publish, filter of a subscribe or unsubscribe.
	pub fn topic(&self) -> &str {
		&self.message.topic
	}
}

/// Notifications from the transport to its owner.
pub trait TransportListener: Send + Sync + 'static {
	/// A session was established.
	fn on_connect_success(&self);

	/// Opening a session failed, or an open session was lost.
	fn on_connect_failure(&self);

	/// The session ended because it was closed on request.
	fn on_connection_closed(&self);

	/// A message arrived on a subscribed topic.
	fn on_message(&self, message: Message);
}

/// Wire-level MQTT session.
pub trait Transport: Send + Sync + 'static {
	/// Starts opening a session. The outcome is reported through `listener`.
	///
	/// `runtime` is the client's runtime, for transports that drive their I/O
	/// with tokio tasks.
	fn open(&self, listener: Arc<dyn TransportListener>, runtime: &Handle);

	/// Closes the session. Must report `on_connection_closed` even when no
	/// session is open.
	fn close(&self);

	/// Hands a publish to the broker.
	fn publish(&self, request: &Request) -> Result<(), TransportError>;

	/// Hands a subscribe to the broker.
	fn subscribe(&self, request: &Request) -> Result<(), TransportError>;

	/// Hands an unsubscribe to the broker.
	fn unsubscribe(&self, request: &Request) -> Result<(), TransportError>;
}
