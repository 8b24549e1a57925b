use crate::completion::RequestKind;
use crate::shadow::ShadowErrorCode;
use crate::topic::TopicFilterError;
use crate::transport::TransportError;

/// Hard failure reported for a single request.
///
/// Carries the shadow error code when the failure came from a rejected
/// shadow acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RequestFailure {
	/// Shadow error code, if the service supplied one
	pub code: Option<ShadowErrorCode>,
	/// Human readable reason
	pub message: String,
}

impl RequestFailure {
	/// Failure without a shadow error code.
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			code: None,
			message: message.into(),
		}
	}

	/// Failure carrying a shadow error code.
	pub fn with_code(code: ShadowErrorCode, message: impl Into<String>) -> Self {
		Self {
			code: Some(code),
			message: message.into(),
		}
	}
}

/// Errors returned by client and device operations
#[derive(Debug, thiserror::Error)]
pub enum ShadowClientError {
	/// The server rejected the request or the request could not be delivered
	#[error("Request failed: {0}")]
	Request(RequestFailure),

	/// No acknowledgement arrived within the caller's bound
	#[error("Request '{target}' timed out")]
	Timeout { target: String },

	/// The connection is down and the matching offline queue is full
	#[error("Offline {kind} queue is full ({capacity} requests)")]
	QueueFull { kind: RequestKind, capacity: usize },

	/// The connection is down and offline queueing is disabled
	#[error("Client is not connected")]
	NotConnected,

	/// Non-retryable transport error
	#[error("Transport error: {0}")]
	Transport(#[from] TransportError),

	/// Invalid topic filter
	#[error("Topic filter error: {0}")]
	Topic(#[from] TopicFilterError),

	/// Payload is not the JSON document the operation expects
	#[error("Invalid JSON payload: {0}")]
	Payload(#[from] serde_json::Error),

	/// Invalid configuration parameter values
	#[error("Invalid configuration value: {0}")]
	Configuration(String),

	/// Shadow operation on a device that is not attached to a live client
	#[error("Device '{0}' is not attached to a client")]
	DeviceNotAttached(String),

	/// The worker pool could not be started
	#[error("Failed to start worker pool: {0}")]
	Runtime(#[from] std::io::Error),
}

impl ShadowClientError {
	/// Returns true for the timeout outcome.
	pub fn is_timeout(&self) -> bool {
		matches!(self, ShadowClientError::Timeout { .. })
	}

	/// Shadow error code of a rejected shadow command, if any.
	pub fn shadow_code(&self) -> Option<ShadowErrorCode> {
		match self {
			| ShadowClientError::Request(failure) => failure.code,
			| _ => None,
		}
	}
}

impl From<RequestFailure> for ShadowClientError {
	fn from(failure: RequestFailure) -> Self {
		ShadowClientError::Request(failure)
	}
}
