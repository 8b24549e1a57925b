//! Messages and quality-of-service levels exchanged with the transport.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Delivery guarantee requested for a published or subscribed message.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
	/// Fire and forget
	#[default]
	AtMostOnce,
	/// Acknowledged delivery, duplicates possible
	AtLeastOnce,
	/// Assured single delivery
	ExactlyOnce,
}

impl QoS {
	/// Numeric level as carried on the wire.
	pub fn level(self) -> u8 {
		match self {
			| QoS::AtMostOnce => 0,
			| QoS::AtLeastOnce => 1,
			| QoS::ExactlyOnce => 2,
		}
	}
}

impl TryFrom<u8> for QoS {
	type Error = u8;

	fn try_from(level: u8) -> Result<Self, Self::Error> {
		match level {
			| 0 => Ok(QoS::AtMostOnce),
			| 1 => Ok(QoS::AtLeastOnce),
			| 2 => Ok(QoS::ExactlyOnce),
			| other => Err(other),
		}
	}
}

/// A message travelling in either direction.
///
/// Payloads are `Bytes`, so cloning a message for several handlers is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	/// Topic the message is published to (or was received on)
	pub topic: String,
	/// Requested delivery guarantee
	pub qos: QoS,
	/// Raw payload
	pub payload: Bytes,
	/// Retain flag
	pub retain: bool,
}

impl Message {
	/// Creates an at-most-once, non-retained message.
	pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
		Self {
			topic: topic.into(),
			qos: QoS::AtMostOnce,
			payload: payload.into(),
			retain: false,
		}
	}

	/// Sets the QoS level.
	pub fn qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	/// Sets the retain flag.
	pub fn retain(mut self, retain: bool) -> Self {
		self.retain = retain;
		self
	}

	/// Payload as UTF-8, if it is valid UTF-8.
	pub fn payload_str(&self) -> Option<&str> {
		std::str::from_utf8(&self.payload).ok()
	}
}
