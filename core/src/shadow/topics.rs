//! Shadow topic layout for one thing
//!
//! ```text
//! $aws/things/{thing}/shadow/{get,update,delete}
//! $aws/things/{thing}/shadow/{get,update,delete}/{accepted,rejected}
//! $aws/things/{thing}/shadow/update/delta
//! ```

use std::fmt;

/// Field carrying the correlation token in commands and acknowledgements.
pub const CLIENT_TOKEN_FIELD: &str = "clientToken";

/// Shadow command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowVerb {
	Get,
	Update,
	Delete,
}

impl ShadowVerb {
	pub const ALL: [ShadowVerb; 3] =
		[ShadowVerb::Get, ShadowVerb::Update, ShadowVerb::Delete];

	pub fn as_str(self) -> &'static str {
		match self {
			| ShadowVerb::Get => "get",
			| ShadowVerb::Update => "update",
			| ShadowVerb::Delete => "delete",
		}
	}

	pub(crate) fn index(self) -> usize {
		match self {
			| ShadowVerb::Get => 0,
			| ShadowVerb::Update => 1,
			| ShadowVerb::Delete => 2,
		}
	}

	fn parse(raw: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|verb| verb.as_str() == raw)
	}
}

impl fmt::Display for ShadowVerb {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Which acknowledgement topic a response arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckStatus {
	Accepted,
	Rejected,
}

impl AckStatus {
	pub const ALL: [AckStatus; 2] = [AckStatus::Accepted, AckStatus::Rejected];

	pub fn as_str(self) -> &'static str {
		match self {
			| AckStatus::Accepted => "accepted",
			| AckStatus::Rejected => "rejected",
		}
	}

	fn parse(raw: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|status| status.as_str() == raw)
	}
}

/// Topic names of one thing's shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
	prefix: String,
}

impl ShadowTopics {
	pub fn new(thing_name: &str) -> Self {
		Self {
			prefix: format!("$aws/things/{thing_name}/shadow"),
		}
	}

	/// Topic a command is published to.
	pub fn command(&self, verb: ShadowVerb) -> String {
		format!("{}/{}", self.prefix, verb)
	}

	/// Acknowledgement topic of a command.
	pub fn ack(&self, verb: ShadowVerb, status: AckStatus) -> String {
		format!("{}/{}/{}", self.prefix, verb, status.as_str())
	}

	/// Topic delta notifications arrive on.
	pub fn delta(&self) -> String {
		format!("{}/update/delta", self.prefix)
	}

	/// All six acknowledgement topics.
	pub fn ack_topics(&self) -> impl Iterator<Item = (ShadowVerb, AckStatus, String)> + '_ {
		ShadowVerb::ALL.into_iter().flat_map(move |verb| {
			AckStatus::ALL
				.into_iter()
				.map(move |status| (verb, status, self.ack(verb, status)))
		})
	}

	/// Verb and status of an acknowledgement topic of this thing.
	pub fn parse_ack(&self, topic: &str) -> Option<(ShadowVerb, AckStatus)> {
		let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
		let (verb, status) = rest.split_once('/')?;
		Some((ShadowVerb::parse(verb)?, AckStatus::parse(status)?))
	}
}
