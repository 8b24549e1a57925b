//! Topic filter handling
//!
//! Parsing and matching of MQTT-style topic filters used by the subscription
//! registry to dispatch inbound messages.

pub mod error;
pub mod filter_level;
/// Topic filter parsing and matching
pub mod topic_filter;


pub use error::{TopicFilterError, limits};
pub use filter_level::FilterLevel;
pub use topic_filter::TopicFilter;
