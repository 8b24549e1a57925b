//! Device shadow synchronization
//!
//! Keeps a local state object mirrored with a remote, versioned JSON
//! document through correlated get/update/delete commands and delta
//! notifications.

pub(crate) mod command;
pub mod device;
pub mod error_code;
pub mod property;
pub mod topics;

pub(crate) use device::ShadowSync;
pub use device::{ShadowDevice, ShadowDeviceBuilder};
pub use error_code::ShadowErrorCode;
pub use property::{PropertyMap, PropertyMapBuilder, ShadowState};
pub use topics::{AckStatus, CLIENT_TOKEN_FIELD, ShadowTopics, ShadowVerb};
