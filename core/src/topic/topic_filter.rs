use std::convert::TryFrom;
use std::fmt::{self, Display};

use arcstr::ArcStr;

use super::error::{TopicFilterError, limits};
use super::filter_level::FilterLevel;

/// Parsed MQTT topic filter with wildcard support
///
/// Matching rules:
/// - `+` matches exactly one topic level
/// - `#` matches the remainder of the topic, including its parent level
///   (`a/#` matches `a`), and is only valid as the final level
/// - every other level must be equal to the topic level, case-sensitive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
	filter: ArcStr,
	levels: Vec<FilterLevel>,
}

impl TopicFilter {
	/// Parses and validates a topic filter.
	pub fn new(filter: impl Into<ArcStr>) -> Result<Self, TopicFilterError> {
		let filter = filter.into();
		if filter.is_empty() {
			return Err(TopicFilterError::EmptyFilter);
		}
		if filter.len() > limits::MAX_TOPIC_LENGTH {
			return Err(TopicFilterError::too_large(format!(
				"length {} > {}",
				filter.len(),
				limits::MAX_TOPIC_LENGTH
			)));
		}

		let levels: Vec<FilterLevel> = filter
			.split('/')
			.map(|s| filter.substr_from(s))
			.map(FilterLevel::try_from)
			.collect::<Result<_, _>>()?;

		if levels.len() > limits::MAX_TOPIC_DEPTH {
			return Err(TopicFilterError::too_large(format!(
				"depth {} > {}",
				levels.len(),
				limits::MAX_TOPIC_DEPTH
			)));
		}

		if let Some(hash_pos) =
			levels.iter().position(|l| matches!(l, FilterLevel::Hash))
		{
			if hash_pos != levels.len() - 1 {
				return Err(TopicFilterError::hash_position(filter.as_str()));
			}
		}

		Ok(Self { filter, levels })
	}

	/// Original filter string, as sent to the broker.
	pub fn as_str(&self) -> &str {
		&self.filter
	}

	/// Parsed levels.
	pub fn levels(&self) -> &[FilterLevel] {
		&self.levels
	}

	/// Returns true if the filter contains `+` or `#`.
	pub fn has_wildcards(&self) -> bool {
		self.levels.iter().any(FilterLevel::is_wildcard)
	}

	/// Checks whether a concrete topic matches this filter.
	pub fn matches(&self, topic: &str) -> bool {
		let mut topic_levels = topic.split('/');
		for level in &self.levels {
			if matches!(level, FilterLevel::Hash) {
				return true;
			}
			match topic_levels.next() {
				| Some(topic_level) if level.accepts(topic_level) => {}
				| _ => return false,
			}
		}
		topic_levels.next().is_none()
	}
}

impl Display for TopicFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.filter)
	}
}

impl TryFrom<&str> for TopicFilter {
	type Error = TopicFilterError;
	fn try_from(filter: &str) -> Result<Self, Self::Error> {
		Self::new(filter)
	}
}

impl TryFrom<String> for TopicFilter {
	type Error = TopicFilterError;
	fn try_from(filter: String) -> Result<Self, Self::Error> {
		Self::new(filter)
	}
}
