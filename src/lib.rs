//! # MQTT Device Shadow
//!
//! Device-side MQTT client with resilient connection management, offline
//! request queueing and device shadow synchronization.
//!
//! This crate re-exports [`mqtt_device_shadow_core`] together with
//! `#[derive(ShadowState)]`:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mqtt_device_shadow::prelude::*;
//!
//! #[derive(ShadowState)]
//! struct Thermostat {
//! 	#[shadow(name = "targetTemp")]
//! 	target: f64,
//! 	#[shadow(update = false)]
//! 	current: f64,
//! }
//!
//! fn main() -> Result<()> {
//! 	let config = ShadowClientConfig::new("thermostat-7");
//! 	let transport = RumqttTransport::new(config.mqtt_options("localhost", 1883));
//! 	let client = ShadowClient::new(config, Arc::new(transport))?;
//!
//! 	let device = ShadowDevice::builder(
//! 		"thermostat-7",
//! 		Thermostat { target: 21.0, current: 19.5 },
//! 	)
//! 	.versioning(true)
//! 	.build();
//! 	client.attach(&device);
//! 	client.connect(None)?;
//! 	Ok(())
//! }
//! ```

pub use mqtt_device_shadow_core::*;
pub use mqtt_device_shadow_macros::ShadowState;

/// Commonly used types and the derive macro in one import.
///
/// ```rust
/// use mqtt_device_shadow::prelude::*;
/// ```
pub mod prelude {
	pub use mqtt_device_shadow_core::prelude::*;

	pub use crate::ShadowState;
}
