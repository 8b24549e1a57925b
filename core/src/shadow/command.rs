//! Correlated shadow commands
//!
//! Every get/update/delete is published with a fresh `clientToken` and kept
//! in the pending map until an acknowledgement carrying the same token
//! arrives on one of the verb's accepted/rejected topics. Commands issued
//! before both acknowledgement topics of their verb are subscribed stay in
//! the map unsent and are flushed as soon as the subscriptions are
//! confirmed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error_code::ShadowErrorCode;
use super::topics::{AckStatus, CLIENT_TOKEN_FIELD, ShadowTopics, ShadowVerb};
use crate::client::error::ShadowClientError;
use crate::client::shadow_client::ClientInner;
use crate::completion::{Completion, Outcome, RequestKind, RequestListener};
use crate::message::{Message, QoS};
use crate::scheduler::Scheduler;
use crate::transport::Request;

struct PendingCommand {
	token: String,
	verb: ShadowVerb,
	message: Message,
	completion: Arc<Completion>,
	sent: AtomicBool,
}

#[derive(Default)]
struct VerbReadiness {
	accepted: AtomicBool,
	rejected: AtomicBool,
}

impl VerbReadiness {
	fn flag(&self, status: AckStatus) -> &AtomicBool {
		match status {
			| AckStatus::Accepted => &self.accepted,
			| AckStatus::Rejected => &self.rejected,
		}
	}

	fn is_ready(&self) -> bool {
		self.accepted.load(Ordering::Acquire)
			&& self.rejected.load(Ordering::Acquire)
	}

	fn reset(&self) {
		self.accepted.store(false, Ordering::Release);
		self.rejected.store(false, Ordering::Release);
	}
}

/// Options of a single command.
pub(crate) struct CommandOptions {
	pub timeout: Option<Duration>,
	pub blocking: bool,
	pub listener: Option<Arc<dyn RequestListener>>,
}

/// Per-device tracker of outstanding shadow commands.
pub(crate) struct ShadowCommandManager {
	thing: String,
	topics: ShadowTopics,
	method_qos: QoS,
	pending: Arc<DashMap<String, Arc<PendingCommand>>>,
	readiness: [VerbReadiness; 3],
}

impl ShadowCommandManager {
	pub fn new(thing: &str, topics: ShadowTopics, method_qos: QoS) -> Self {
		Self {
			thing: thing.to_string(),
			topics,
			method_qos,
			pending: Arc::new(DashMap::new()),
			readiness: Default::default(),
		}
	}

	/// Returns true once both acknowledgement topics of `verb` are
	/// subscribed.
	pub fn is_ready(&self, verb: ShadowVerb) -> bool {
		self.readiness[verb.index()].is_ready()
	}

	pub fn pending_count(&self) -> usize {
		self.pending.len()
	}

	/// Issues a command and waits for it according to `options`.
	///
	/// `document` is the request JSON object; `None` or an empty string sends
	/// an empty object. Returns the acknowledgement document for blocking
	/// commands.
	pub fn run_command(
		&self,
		client: &ClientInner,
		verb: ShadowVerb,
		document: Option<&str>,
		options: CommandOptions,
	) -> Result<Option<String>, ShadowClientError> {
		let mut request: Map<String, Value> = match document {
			| Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)?,
			| _ => Map::new(),
		};
		let token = Uuid::new_v4().to_string();
		request.insert(CLIENT_TOKEN_FIELD.to_string(), Value::String(token.clone()));

		let topic = self.topics.command(verb);
		let message = Message::new(topic.clone(), serde_json::to_vec(&request)?)
			.qos(self.method_qos);

		let pending = Arc::downgrade(&self.pending);
		let hook_token = token.clone();
		let completion = new_completion(
			client.scheduler(),
			RequestKind::Shadow(verb),
			topic,
			options,
		)
		.on_settle(move |outcome| {
			if !matches!(outcome, Outcome::Success) {
				if let Some(pending) = pending.upgrade() {
					pending.remove(&hook_token);
				}
			}
		});
		let completion = Arc::new(completion);

		let command = Arc::new(PendingCommand {
			token: token.clone(),
			verb,
			message,
			completion: Arc::clone(&completion),
			sent: AtomicBool::new(false),
		});
		self.pending.insert(token.clone(), Arc::clone(&command));

		if self.is_ready(verb) {
			if let Err(err) = self.publish(client, &command) {
				self.pending.remove(&token);
				return Err(err);
			}
		} else {
			debug!(thing = %self.thing, verb = %verb, token = %token, "Acknowledgement topics not ready, command queued");
		}

		completion.wait()
	}

	fn publish(
		&self,
		client: &ClientInner,
		command: &Arc<PendingCommand>,
	) -> Result<(), ShadowClientError> {
		if command.sent.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		debug!(thing = %self.thing, verb = %command.verb, token = %command.token, "Publishing shadow command");

		let acknowledged = Arc::clone(&command.completion);
		let publish = Completion::callback(
			RequestKind::Publish,
			command.message.topic.clone(),
			None,
			None,
			client.scheduler().clone(),
		)
		.on_settle(move |outcome| match outcome {
			| Outcome::Failure(failure) => {
				acknowledged.fail(failure.code, failure.message.clone())
			}
			| Outcome::Timeout => acknowledged.expire(),
			| _ => {}
		});
		client.submit(Request::publish(command.message.clone(), Arc::new(publish)))
	}

	/// Settles the command an acknowledgement belongs to.
	///
	/// Returns the verb, status and document of a matched acknowledgement.
	pub fn on_command_ack(
		&self,
		message: &Message,
	) -> Option<(ShadowVerb, AckStatus, Value)> {
		let (verb, status) = self.topics.parse_ack(&message.topic)?;
		let document: Value = match serde_json::from_slice(&message.payload) {
			| Ok(document) => document,
			| Err(err) => {
				warn!(topic = %message.topic, error = %err, "Malformed shadow acknowledgement");
				return None;
			}
		};
		let Some(token) = document.get(CLIENT_TOKEN_FIELD).and_then(Value::as_str)
		else {
			debug!(topic = %message.topic, "Acknowledgement without client token");
			return None;
		};
		let Some((_, command)) = self.pending.remove(token) else {
			debug!(topic = %message.topic, token = %token, "Acknowledgement for unknown or handled command");
			return None;
		};

		let code = document
			.get("code")
			.and_then(Value::as_u64)
			.and_then(|code| u16::try_from(code).ok())
			.map(ShadowErrorCode::from);
		let accepted = status == AckStatus::Accepted
			|| (verb == ShadowVerb::Delete && code == Some(ShadowErrorCode::NotFound));

		if accepted {
			let response = message
				.payload_str()
				.map(str::to_string)
				.unwrap_or_else(|| document.to_string());
			command.completion.succeed_with(response);
		} else {
			let reason = document
				.get("message")
				.and_then(Value::as_str)
				.map(str::to_string)
				.unwrap_or_else(|| format!("Shadow {verb} rejected"));
			command.completion.fail(code, reason);
		}
		Some((verb, status, document))
	}

	/// Records the outcome of an acknowledgement-topic subscription.
	///
	/// Once both topics of a verb are subscribed, every queued command of
	/// that verb is published. A failed subscription fails them instead.
	pub fn on_subscription_ack(&self, client: &ClientInner, topic: &str, subscribed: bool) {
		let Some((verb, status)) = self.topics.parse_ack(topic) else {
			return;
		};
		let readiness = &self.readiness[verb.index()];

		if !subscribed {
			readiness.flag(status).store(false, Ordering::Release);
			let failed = self.take_unsent(verb);
			if !failed.is_empty() {
				warn!(thing = %self.thing, verb = %verb, count = failed.len(), "Acknowledgement subscription failed, failing queued commands");
			}
			for command in failed {
				command
					.completion
					.fail(None, format!("Subscription to '{topic}' failed"));
			}
			return;
		}

		readiness.flag(status).store(true, Ordering::Release);
		if !readiness.is_ready() {
			return;
		}
		info!(thing = %self.thing, verb = %verb, "Shadow acknowledgement topics ready");

		let queued: Vec<Arc<PendingCommand>> = self
			.pending
			.iter()
			.filter(|entry| {
				entry.verb == verb && !entry.sent.load(Ordering::Acquire)
			})
			.map(|entry| Arc::clone(entry.value()))
			.collect();
		for command in queued {
			if let Err(err) = self.publish(client, &command) {
				warn!(token = %command.token, error = %err, "Failed to publish queued shadow command");
				self.pending.remove(&command.token);
				command.completion.fail(None, err.to_string());
			}
		}
	}

	fn take_unsent(&self, verb: ShadowVerb) -> Vec<Arc<PendingCommand>> {
		let tokens: Vec<String> = self
			.pending
			.iter()
			.filter(|entry| {
				entry.verb == verb && !entry.sent.load(Ordering::Acquire)
			})
			.map(|entry| entry.key().clone())
			.collect();
		tokens
			.iter()
			.filter_map(|token| self.pending.remove(token).map(|(_, c)| c))
			.collect()
	}

	/// Fails every pending command off the calling thread and forgets
	/// acknowledgement readiness.
	pub fn on_deactivate(&self, scheduler: &Scheduler) {
		for readiness in &self.readiness {
			readiness.reset();
		}
		let tokens: Vec<String> =
			self.pending.iter().map(|entry| entry.key().clone()).collect();
		let dropped: Vec<Arc<PendingCommand>> = tokens
			.iter()
			.filter_map(|token| self.pending.remove(token).map(|(_, c)| c))
			.collect();
		if dropped.is_empty() {
			return;
		}
		debug!(thing = %self.thing, count = dropped.len(), "Failing pending shadow commands");
		scheduler.execute(move || {
			for command in dropped {
				command.completion.fail(None, "Shadow device deactivated");
			}
		});
	}
}

fn new_completion(
	scheduler: &Scheduler,
	kind: RequestKind,
	target: String,
	options: CommandOptions,
) -> Completion {
	if options.blocking {
		Completion::blocking(kind, target, options.timeout, scheduler.clone())
	} else {
		Completion::callback(
			kind,
			target,
			options.timeout,
			options.listener,
			scheduler.clone(),
		)
	}
}
