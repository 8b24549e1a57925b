//! Connection state reported to applications.

use std::fmt;

/// Current state of the client's connection.
///
/// - `Disconnected` -> `Connected` (transport reported a session)
/// - `Connected` -> `Disconnected` (session lost or closed)
/// - `Disconnected` -> `Reconnecting` (a scheduled retry fired and a new open
///   attempt was issued) -> `Connected` | `Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
	/// A session is up; requests go straight to the transport.
	Connected,
	/// No session. Requests are queued offline, if queueing is enabled.
	#[default]
	Disconnected,
	/// An automatic reconnect attempt is in progress.
	Reconnecting,
}

impl ConnectionState {
	/// Returns a short string identifier for the current state.
	pub fn as_str(&self) -> &'static str {
		match self {
			| ConnectionState::Connected => "Connected",
			| ConnectionState::Disconnected => "Disconnected",
			| ConnectionState::Reconnecting => "Reconnecting",
		}
	}

	pub fn is_connected(&self) -> bool {
		matches!(self, ConnectionState::Connected)
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
