//! Last Will and Testament message

use serde::Deserialize;

use crate::message::QoS;

/// Message the broker publishes on the client's behalf if the client
/// disconnects unexpectedly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LastWill {
	/// The topic to which the LWT message will be published.
	pub topic: String,
	/// The payload of the LWT message.
	pub payload: String,
	/// The Quality of Service level for the LWT message.
	#[serde(default = "LastWill::default_qos")]
	pub qos: QoS,
	/// Whether the LWT message should be retained by the broker.
	#[serde(default)]
	pub retain: bool,
}

impl LastWill {
	/// Creates a new at-least-once, non-retained Last Will message.
	pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
		Self {
			topic: topic.into(),
			payload: payload.into(),
			qos: Self::default_qos(),
			retain: false,
		}
	}

	fn default_qos() -> QoS {
		QoS::AtLeastOnce
	}

	/// Sets the QoS level for the LWT message.
	pub fn qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	/// Sets the retain flag for the LWT message.
	pub fn retain(mut self, retain: bool) -> Self {
		self.retain = retain;
		self
	}
}

#[cfg(feature = "rumqtt")]
impl From<&LastWill> for rumqttc::LastWill {
	fn from(will: &LastWill) -> Self {
		rumqttc::LastWill::new(
			will.topic.clone(),
			will.payload.clone(),
			crate::transport::rumqtt::to_rumqtt_qos(will.qos),
			will.retain,
		)
	}
}
