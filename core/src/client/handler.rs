//! Inbound message handlers and subscriptions

use std::fmt;
use std::sync::Arc;

use arcstr::ArcStr;

use crate::message::{Message, QoS};
use crate::topic::{TopicFilter, TopicFilterError};

/// Receives messages published to a subscribed filter.
///
/// Called on the client's worker pool, never on a transport thread.
pub trait MessageHandler: Send + Sync + 'static {
	fn on_message(&self, message: &Message);
}

impl<F> MessageHandler for F
where F: Fn(&Message) + Send + Sync + 'static
{
	fn on_message(&self, message: &Message) {
		self(message)
	}
}

/// A topic filter together with the handler that owns it.
#[derive(Clone)]
pub struct Subscription {
	filter: TopicFilter,
	qos: QoS,
	handler: Arc<dyn MessageHandler>,
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("filter", &self.filter.as_str())
			.field("qos", &self.qos)
			.finish_non_exhaustive()
	}
}

impl Subscription {
	/// Validates `filter` and binds it to `handler`.
	pub fn new<H>(
		filter: impl Into<ArcStr>,
		qos: QoS,
		handler: H,
	) -> Result<Self, TopicFilterError>
	where H: MessageHandler {
		Ok(Self {
			filter: TopicFilter::new(filter)?,
			qos,
			handler: Arc::new(handler),
		})
	}

	/// Same as `new` for an already shared handler.
	pub fn with_handler(
		filter: impl Into<ArcStr>,
		qos: QoS,
		handler: Arc<dyn MessageHandler>,
	) -> Result<Self, TopicFilterError> {
		Ok(Self {
			filter: TopicFilter::new(filter)?,
			qos,
			handler,
		})
	}

	pub fn filter(&self) -> &TopicFilter {
		&self.filter
	}

	pub fn qos(&self) -> QoS {
		self.qos
	}

	pub fn handler(&self) -> &Arc<dyn MessageHandler> {
		&self.handler
	}
}
