//! Client facade
//!
//! The [`ShadowClient`] owns the connection manager, the subscription
//! registry and the attached shadow devices.

pub mod config;
/// Client error types
pub mod error;
pub mod handler;
pub mod last_will;
pub(crate) mod shadow_client;

pub use config::{ClientSettings, DeviceSettings, ShadowClientConfig};
pub use error::{RequestFailure, ShadowClientError};
pub use handler::{MessageHandler, Subscription};
pub use last_will::LastWill;
pub use shadow_client::ShadowClient;
