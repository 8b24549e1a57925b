//! Configuration for client and shadow device initialization

use std::time::Duration;

use serde::Deserialize;

use super::last_will::LastWill;
use crate::ShadowClientError;
use crate::message::QoS;

/// Client-level behavior settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
	/// Size of the callback worker pool (must be > 0)
	pub num_worker_threads: usize,
	/// Bound applied to `connect(None)`
	pub connection_timeout_millis: u64,
	/// Bound for acknowledgements the client waits on internally
	pub server_ack_timeout_millis: u64,
	/// MQTT keep-alive interval
	pub keep_alive_secs: u64,
	/// Automatic reconnect attempts after a lost connection, 0 disables
	pub max_connection_retries: u32,
	/// Delay before the first reconnect attempt
	pub base_retry_delay_millis: u64,
	/// Upper bound of the exponential reconnect delay
	pub max_retry_delay_millis: u64,
	/// Capacity of each offline queue, 0 disables offline queueing
	pub max_offline_queue_size: usize,
	/// Start every session without broker-side state
	pub clean_session: bool,
	/// Optional Last Will and Testament
	pub last_will: Option<LastWill>,
}

impl Default for ClientSettings {
	fn default() -> Self {
		Self {
			num_worker_threads: 4,
			connection_timeout_millis: 30_000,
			server_ack_timeout_millis: 3_000,
			keep_alive_secs: 600,
			max_connection_retries: 5,
			base_retry_delay_millis: 3_000,
			max_retry_delay_millis: 30_000,
			max_offline_queue_size: 64,
			clean_session: true,
			last_will: None,
		}
	}
}

impl ClientSettings {
	pub fn connection_timeout(&self) -> Duration {
		Duration::from_millis(self.connection_timeout_millis)
	}

	pub fn server_ack_timeout(&self) -> Duration {
		Duration::from_millis(self.server_ack_timeout_millis)
	}

	pub fn keep_alive(&self) -> Duration {
		Duration::from_secs(self.keep_alive_secs)
	}

	pub fn base_retry_delay(&self) -> Duration {
		Duration::from_millis(self.base_retry_delay_millis)
	}

	pub fn max_retry_delay(&self) -> Duration {
		Duration::from_millis(self.max_retry_delay_millis)
	}

	/// Rejects values the client cannot run with.
	pub fn validate(&self) -> Result<(), ShadowClientError> {
		if self.num_worker_threads == 0 {
			return Err(ShadowClientError::Configuration(
				"num_worker_threads must be greater than 0".to_string(),
			));
		}
		if self.base_retry_delay_millis > self.max_retry_delay_millis {
			return Err(ShadowClientError::Configuration(format!(
				"base_retry_delay_millis ({}) exceeds max_retry_delay_millis \
				 ({})",
				self.base_retry_delay_millis, self.max_retry_delay_millis
			)));
		}
		Ok(())
	}
}

/// Configuration for client creation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShadowClientConfig {
	/// MQTT client identifier
	pub client_id: String,
	/// Client-level behavior settings
	#[serde(default)]
	pub settings: ClientSettings,
}

impl ShadowClientConfig {
	/// Create config with default settings
	pub fn new(client_id: impl Into<String>) -> Self {
		Self {
			client_id: client_id.into(),
			settings: ClientSettings::default(),
		}
	}

	/// Replaces the client settings.
	pub fn with_settings(mut self, settings: ClientSettings) -> Self {
		self.settings = settings;
		self
	}

	/// Pushes keep-alive, clean session and Last Will into rumqttc options.
	#[cfg(feature = "rumqtt")]
	pub fn apply_to(&self, options: &mut rumqttc::MqttOptions) {
		options.set_keep_alive(self.settings.keep_alive());
		options.set_clean_session(self.settings.clean_session);
		if let Some(will) = &self.settings.last_will {
			options.set_last_will(will.into());
		}
	}

	/// Builds rumqttc options for `host:port` from this configuration.
	#[cfg(feature = "rumqtt")]
	pub fn mqtt_options(
		&self,
		host: impl Into<String>,
		port: u16,
	) -> rumqttc::MqttOptions {
		let mut options =
			rumqttc::MqttOptions::new(self.client_id.clone(), host, port);
		self.apply_to(&mut options);
		options
	}
}

/// Per-device shadow synchronization settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
	/// Period of the reported-state update, 0 disables periodic reporting
	pub report_interval_millis: u64,
	/// Send and check document versions (optimistic locking)
	pub enable_versioning: bool,
	/// QoS of periodic reports
	pub report_qos: QoS,
	/// QoS of the delta subscription
	pub shadow_update_qos: QoS,
	/// QoS of get/update/delete command publishes
	pub method_qos: QoS,
	/// QoS of the accepted/rejected subscriptions
	pub method_ack_qos: QoS,
}

impl Default for DeviceSettings {
	fn default() -> Self {
		Self {
			report_interval_millis: 3_000,
			enable_versioning: false,
			report_qos: QoS::AtMostOnce,
			shadow_update_qos: QoS::AtMostOnce,
			method_qos: QoS::AtMostOnce,
			method_ack_qos: QoS::AtMostOnce,
		}
	}
}

impl DeviceSettings {
	/// Report period, `None` when periodic reporting is disabled.
	pub fn report_interval(&self) -> Option<Duration> {
		(self.report_interval_millis > 0)
			.then(|| Duration::from_millis(self.report_interval_millis))
	}
}
