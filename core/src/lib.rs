//! # MQTT Device Shadow
//!
//! Device-side MQTT client with resilient connection management and device
//! shadow synchronization.
//!
//! ## Features
//!
//! - **Blocking and callback requests**: every operation can wait for the
//!   broker's acknowledgement or report it to a [`RequestListener`]
//! - **Offline queueing**: publish, subscribe and unsubscribe requests issued
//!   while disconnected are replayed once the connection is back
//! - **Automatic reconnect** with exponential backoff and resubscription
//! - **Device shadows**: correlated get/update/delete commands, delta
//!   handling and periodic state reports, optionally version checked
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use mqtt_device_shadow_core::{
//! 	PropertyMap, RumqttTransport, ShadowClient, ShadowClientConfig,
//! 	ShadowDevice, ShadowState,
//! };
//!
//! struct Lamp {
//! 	on: bool,
//! }
//!
//! impl ShadowState for Lamp {
//! 	fn shadow_properties() -> PropertyMap<Self> {
//! 		PropertyMap::builder()
//! 			.property("on", |lamp: &Lamp| lamp.on, |lamp: &mut Lamp, on| lamp.on = on)
//! 			.build()
//! 	}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//! 	let config = ShadowClientConfig::new("lamp-1");
//! 	let transport = RumqttTransport::new(config.mqtt_options("localhost", 1883));
//! 	let client = ShadowClient::new(config, Arc::new(transport))?;
//!
//! 	let lamp = ShadowDevice::new("lamp-1", Lamp { on: false });
//! 	client.attach(&lamp);
//! 	client.connect(None)?;
//!
//! 	let document = lamp.get(Some(Duration::from_secs(3)))?;
//! 	println!("shadow: {document}");
//!
//! 	client.disconnect(None)?;
//! 	Ok(())
//! }
//! ```

pub mod client;
pub mod completion;
pub mod connection;
pub mod message;
pub mod scheduler;
pub mod shadow;
pub mod topic;
pub mod transport;

#[cfg(test)]
mod test_support;

// === Core Public API ===
pub use client::{
	ClientSettings, DeviceSettings, LastWill, MessageHandler, RequestFailure,
	ShadowClient, ShadowClientConfig, ShadowClientError, Subscription,
};
pub use completion::{Completion, Outcome, RequestKind, RequestListener};
pub use connection::ConnectionState;
pub use message::{Message, QoS};
// Device shadows
pub use shadow::{
	AckStatus, PropertyMap, PropertyMapBuilder, ShadowDevice,
	ShadowDeviceBuilder, ShadowErrorCode, ShadowState, ShadowTopics,
	ShadowVerb,
};
pub use topic::{TopicFilter, TopicFilterError};
// Transport seam
pub use transport::{Request, Transport, TransportError, TransportListener};
#[cfg(feature = "rumqtt")]
pub use transport::RumqttTransport;
#[cfg(feature = "rumqtt")]
pub use rumqttc::MqttOptions;

/// Result type alias for operations that may fail with ShadowClientError
pub type Result<T> = std::result::Result<T, ShadowClientError>;

/// Commonly used types in one import.
///
/// ```rust
/// use mqtt_device_shadow_core::prelude::*;
/// ```
pub mod prelude {
	pub use crate::{
		ClientSettings, ConnectionState, DeviceSettings, Message,
		MessageHandler, PropertyMap, QoS, RequestListener, Result,
		ShadowClient, ShadowClientConfig, ShadowClientError, ShadowDevice,
		ShadowState, Subscription, Transport,
	};
	#[cfg(feature = "rumqtt")]
	pub use crate::{MqttOptions, RumqttTransport};
}
