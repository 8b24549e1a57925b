//! Error type and limits for topic filters

use thiserror::Error;

/// Error types for topic filter parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicFilterError {
	/// Hash wildcard (#) used anywhere but the last level
	#[error(
		"Invalid topic filter '{filter}': # wildcard can only be the last \
		 level"
	)]
	HashPosition {
		/// The invalid filter
		filter: String,
	},

	/// Wildcard character mixed with other characters inside one level
	#[error("Invalid wildcard usage in level '{level}'")]
	WildcardUsage {
		/// The offending level
		level: String,
	},

	/// Empty filter is not valid
	#[error("Topic filter cannot be empty")]
	EmptyFilter,

	/// Filter exceeds one of the configured limits
	#[error("Topic filter too large: {reason}")]
	TooLarge {
		/// Which limit was exceeded
		reason: String,
	},
}

impl TopicFilterError {
	/// Creates a new HashPosition error
	pub fn hash_position(filter: impl Into<String>) -> Self {
		Self::HashPosition {
			filter: filter.into(),
		}
	}

	/// Creates a new WildcardUsage error
	pub fn wildcard_usage(level: impl Into<String>) -> Self {
		Self::WildcardUsage {
			level: level.into(),
		}
	}

	/// Creates a new TooLarge error
	pub fn too_large(reason: impl Into<String>) -> Self {
		Self::TooLarge {
			reason: reason.into(),
		}
	}
}

/// Topic processing limits
pub mod limits {
	/// Maximum number of levels in a filter
	pub const MAX_TOPIC_DEPTH: usize = 32;

	/// Maximum total filter length in bytes
	pub const MAX_TOPIC_LENGTH: usize = 1024;
}
