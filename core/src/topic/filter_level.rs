//! A single level of a topic filter

use std::convert::TryFrom;

use arcstr::Substr;

use super::error::TopicFilterError;

/// Topic filter level: literal string or wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterLevel {
	/// Literal level, matched by exact (case-sensitive) equality
	Str(Substr),
	/// Single-level wildcard `+`
	Plus,
	/// Multi-level wildcard `#`
	Hash,
}

impl FilterLevel {
	/// Returns string representation of the level.
	pub fn as_str(&self) -> &str {
		match self {
			| FilterLevel::Str(s) => s,
			| FilterLevel::Plus => "+",
			| FilterLevel::Hash => "#",
		}
	}

	/// Returns true if this level is a wildcard (+ or #).
	pub fn is_wildcard(&self) -> bool {
		matches!(self, FilterLevel::Plus | FilterLevel::Hash)
	}

	/// Returns true if this level accepts `level` as the topic level in the
	/// same position.
	pub fn accepts(&self, level: &str) -> bool {
		match self {
			| FilterLevel::Str(s) => s.as_str() == level,
			| FilterLevel::Plus | FilterLevel::Hash => true,
		}
	}
}

impl std::fmt::Display for FilterLevel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

impl TryFrom<Substr> for FilterLevel {
	type Error = TopicFilterError;
	fn try_from(level: Substr) -> Result<Self, Self::Error> {
		let res = match level.as_str() {
			| "+" => FilterLevel::Plus,
			| "#" => FilterLevel::Hash,
			| _ if level.contains(['+', '#']) => {
				return Err(TopicFilterError::wildcard_usage(level.as_str()));
			}
			| _ => FilterLevel::Str(level),
		};
		Ok(res)
	}
}
