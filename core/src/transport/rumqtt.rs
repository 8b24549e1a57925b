//! [`Transport`] implementation over `rumqttc`
//!
//! Every `open` creates a fresh `AsyncClient`/`EventLoop` pair and polls the
//! event loop on the client's runtime. Requests are correlated with broker
//! acknowledgements in two steps: the request is queued per kind before it is
//! handed to the rumqttc request channel, and the matching
//! `Outgoing::{Publish,Subscribe,Unsubscribe}(pkid)` event (emitted in the
//! same order) moves it into the packet-id table until its ack arrives.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rumqttc::Event::{Incoming, Outgoing};
use rumqttc::{
	AsyncClient, ConnAck, ConnectReturnCode, EventLoop, MqttOptions, Packet,
	SubscribeReasonCode,
};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Request, Transport, TransportError, TransportListener};
use crate::completion::{Completion, RequestKind};
use crate::message::{Message, QoS};

/// Converts a client QoS into the rumqttc representation.
pub(crate) fn to_rumqtt_qos(qos: QoS) -> rumqttc::QoS {
	match qos {
		| QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
		| QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
		| QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
	}
}

fn from_rumqtt_qos(qos: rumqttc::QoS) -> QoS {
	match qos {
		| rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
		| rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
		| rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AckKind {
	Publish,
	Subscribe,
	Unsubscribe,
}

#[derive(Default)]
struct Inflight {
	/// Handed to rumqttc, packet id not yet known
	queued: HashMap<AckKind, VecDeque<(QoS, Arc<Completion>)>>,
	/// Written to the wire, waiting for the broker's ack
	by_pkid: HashMap<(AckKind, u16), Arc<Completion>>,
}

impl Inflight {
	fn on_outgoing(&mut self, kind: AckKind, pkid: u16) {
		let Some((qos, completion)) =
			self.queued.get_mut(&kind).and_then(VecDeque::pop_front)
		else {
			debug!(kind = ?kind, pkid, "Outgoing packet without a tracked request");
			return;
		};
		if kind == AckKind::Publish && qos == QoS::AtMostOnce {
			completion.succeed();
		} else {
			self.by_pkid.insert((kind, pkid), completion);
		}
	}

	fn take(&mut self, kind: AckKind, pkid: u16) -> Option<Arc<Completion>> {
		let completion = self.by_pkid.remove(&(kind, pkid));
		if completion.is_none() {
			debug!(kind = ?kind, pkid, "Acknowledgement for an untracked packet");
		}
		completion
	}

	fn fail_all(&mut self, reason: &str) {
		let queued = self.queued.drain().flat_map(|(_, q)| q).map(|(_, c)| c);
		let acked = self.by_pkid.drain().map(|(_, c)| c);
		for completion in queued.chain(acked).collect::<Vec<_>>() {
			completion.fail(None, reason);
		}
	}
}

struct Session {
	client: AsyncClient,
	connected: AtomicBool,
	user_close: AtomicBool,
	detached: AtomicBool,
	inflight: Mutex<Inflight>,
	cancel: CancellationToken,
}

enum SessionEnd {
	Closed,
	Failed,
}

/// MQTT transport backed by a `rumqttc` event loop.
pub struct RumqttTransport {
	options: MqttOptions,
	channel_capacity: usize,
	session: Mutex<Option<Arc<Session>>>,
	listener: Mutex<Option<Arc<dyn TransportListener>>>,
}

impl RumqttTransport {
	/// Creates a transport from rumqttc options, see
	/// [`ShadowClientConfig::mqtt_options`](crate::ShadowClientConfig::mqtt_options).
	pub fn new(options: MqttOptions) -> Self {
		Self {
			options,
			channel_capacity: 64,
			session: Mutex::new(None),
			listener: Mutex::new(None),
		}
	}

	/// Sets the capacity of the rumqttc request channel.
	pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
		self.channel_capacity = capacity.max(1);
		self
	}

	fn connected_session(&self) -> Result<Arc<Session>, TransportError> {
		match self.session.lock().as_ref() {
			| Some(session) if session.connected.load(Ordering::Acquire) => {
				Ok(Arc::clone(session))
			}
			| _ => Err(TransportError::NotConnected),
		}
	}

	fn send<F>(
		&self,
		kind: AckKind,
		request: &Request,
		send: F,
	) -> Result<(), TransportError>
	where F: FnOnce(&AsyncClient) -> Result<(), rumqttc::ClientError> {
		let session = self.connected_session()?;
		let mut inflight = session.inflight.lock();
		let queue = inflight.queued.entry(kind).or_default();
		queue.push_back((request.message.qos, Arc::clone(&request.completion)));
		if let Err(err) = send(&session.client) {
			queue.pop_back();
			return Err(err.into());
		}
		Ok(())
	}

	async fn run(
		mut event_loop: EventLoop,
		session: Arc<Session>,
		listener: Arc<dyn TransportListener>,
	) {
		let end = loop {
			let event = tokio::select! {
				_ = session.cancel.cancelled() => break SessionEnd::Closed,
				event = event_loop.poll() => event,
			};
			match event {
				| Ok(Incoming(Packet::ConnAck(ConnAck { code, .. }))) => {
					if code == ConnectReturnCode::Success {
						info!("MQTT session established");
						session.connected.store(true, Ordering::Release);
						listener.on_connect_success();
					} else {
						warn!(code = ?code, "MQTT connection rejected by broker");
						break SessionEnd::Failed;
					}
				}
				| Ok(Incoming(Packet::Publish(p))) => {
					debug!(topic = %p.topic, payload_size = p.payload.len(), "Received MQTT message");
					listener.on_message(Message {
						topic: p.topic,
						qos: from_rumqtt_qos(p.qos),
						payload: p.payload,
						retain: p.retain,
					});
				}
				| Ok(Incoming(Packet::PubAck(ack))) => {
					let completion =
						session.inflight.lock().take(AckKind::Publish, ack.pkid);
					if let Some(completion) = completion {
						completion.succeed();
					}
				}
				| Ok(Incoming(Packet::PubComp(ack))) => {
					let completion =
						session.inflight.lock().take(AckKind::Publish, ack.pkid);
					if let Some(completion) = completion {
						completion.succeed();
					}
				}
				| Ok(Incoming(Packet::SubAck(ack))) => {
					let completion =
						session.inflight.lock().take(AckKind::Subscribe, ack.pkid);
					if let Some(completion) = completion {
						if ack
							.return_codes
							.iter()
							.any(|code| matches!(code, SubscribeReasonCode::Failure))
						{
							completion.fail(None, "Subscription rejected by broker");
						} else {
							completion.succeed();
						}
					}
				}
				| Ok(Incoming(Packet::UnsubAck(ack))) => {
					let completion = session
						.inflight
						.lock()
						.take(AckKind::Unsubscribe, ack.pkid);
					if let Some(completion) = completion {
						completion.succeed();
					}
				}
				| Ok(Incoming(Packet::Disconnect)) => {
					info!("Received MQTT Disconnect packet from server");
					break SessionEnd::Failed;
				}
				| Ok(Outgoing(rumqttc::Outgoing::Publish(pkid))) => {
					session.inflight.lock().on_outgoing(AckKind::Publish, pkid);
				}
				| Ok(Outgoing(rumqttc::Outgoing::Subscribe(pkid))) => {
					session.inflight.lock().on_outgoing(AckKind::Subscribe, pkid);
				}
				| Ok(Outgoing(rumqttc::Outgoing::Unsubscribe(pkid))) => {
					session
						.inflight
						.lock()
						.on_outgoing(AckKind::Unsubscribe, pkid);
				}
				| Ok(Outgoing(rumqttc::Outgoing::Disconnect)) => {
					info!("Sent MQTT Disconnect packet to server");
					break SessionEnd::Closed;
				}
				| Ok(notification) => {
					debug!(notification = ?notification, "MQTT notification");
				}
				| Err(err) => {
					warn!(error = %err, "MQTT event loop error");
					if session.user_close.load(Ordering::Acquire) {
						break SessionEnd::Closed;
					}
					break SessionEnd::Failed;
				}
			}
		};

		session.connected.store(false, Ordering::Release);
		session.inflight.lock().fail_all("MQTT session ended");
		if session.detached.load(Ordering::Acquire) {
			debug!("Superseded MQTT session ended");
			return;
		}
		match end {
			| SessionEnd::Closed => listener.on_connection_closed(),
			| SessionEnd::Failed => listener.on_connect_failure(),
		}
	}
}

impl Transport for RumqttTransport {
	fn open(&self, listener: Arc<dyn TransportListener>, runtime: &Handle) {
		let (client, event_loop) =
			AsyncClient::new(self.options.clone(), self.channel_capacity);
		let session = Arc::new(Session {
			client,
			connected: AtomicBool::new(false),
			user_close: AtomicBool::new(false),
			detached: AtomicBool::new(false),
			inflight: Mutex::new(Inflight::default()),
			cancel: CancellationToken::new(),
		});

		if let Some(previous) = self.session.lock().replace(Arc::clone(&session))
		{
			previous.detached.store(true, Ordering::Release);
			previous.cancel.cancel();
		}
		*self.listener.lock() = Some(Arc::clone(&listener));

		debug!(
			broker = ?self.options.broker_address(),
			client_id = %self.options.client_id(),
			"Opening MQTT session"
		);
		runtime.spawn(Self::run(event_loop, session, listener));
	}

	fn close(&self) {
		let Some(session) = self.session.lock().take() else {
			debug!("Close requested without an open MQTT session");
			if let Some(listener) = self.listener.lock().clone() {
				listener.on_connection_closed();
			}
			return;
		};
		session.user_close.store(true, Ordering::Release);
		let disconnected = session.connected.load(Ordering::Acquire)
			&& session.client.try_disconnect().is_ok();
		if !disconnected {
			session.cancel.cancel();
		}
	}

	fn publish(&self, request: &Request) -> Result<(), TransportError> {
		debug_assert_eq!(request.kind, RequestKind::Publish);
		let message = &request.message;
		self.send(AckKind::Publish, request, |client| {
			client.try_publish(
				message.topic.clone(),
				to_rumqtt_qos(message.qos),
				message.retain,
				message.payload.to_vec(),
			)
		})
	}

	fn subscribe(&self, request: &Request) -> Result<(), TransportError> {
		let message = &request.message;
		self.send(AckKind::Subscribe, request, |client| {
			client.try_subscribe(message.topic.clone(), to_rumqtt_qos(message.qos))
		})
	}

	fn unsubscribe(&self, request: &Request) -> Result<(), TransportError> {
		let filter = request.topic().to_string();
		self.send(AckKind::Unsubscribe, request, |client| {
			client.try_unsubscribe(filter)
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::completion::Outcome;
	use crate::scheduler::Scheduler;

	fn completion(scheduler: &Scheduler, kind: RequestKind) -> Arc<Completion> {
		Arc::new(Completion::blocking(kind, "t", None, scheduler.clone()))
	}

	#[test]
	fn test_qos_conversion() {
		for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
			assert_eq!(from_rumqtt_qos(to_rumqtt_qos(qos)), qos);
		}
	}

	#[test]
	fn test_inflight_correlates_in_order() {
		let scheduler = Scheduler::new(1).unwrap();
		let mut inflight = Inflight::default();
		let fire_and_forget = completion(&scheduler, RequestKind::Publish);
		let acked = completion(&scheduler, RequestKind::Publish);
		let queue = inflight.queued.entry(AckKind::Publish).or_default();
		queue.push_back((QoS::AtMostOnce, Arc::clone(&fire_and_forget)));
		queue.push_back((QoS::AtLeastOnce, Arc::clone(&acked)));

		inflight.on_outgoing(AckKind::Publish, 0);
		assert_eq!(fire_and_forget.outcome(), Outcome::Success);

		inflight.on_outgoing(AckKind::Publish, 7);
		assert_eq!(acked.outcome(), Outcome::Pending);
		let taken = inflight.take(AckKind::Publish, 7).unwrap();
		assert!(Arc::ptr_eq(&taken, &acked));
		assert!(inflight.take(AckKind::Publish, 7).is_none());
	}

	#[test]
	fn test_fail_all_fails_every_request() {
		let scheduler = Scheduler::new(1).unwrap();
		let mut inflight = Inflight::default();
		let queued = completion(&scheduler, RequestKind::Subscribe);
		let sent = completion(&scheduler, RequestKind::Unsubscribe);
		inflight
			.queued
			.entry(AckKind::Subscribe)
			.or_default()
			.push_back((QoS::AtMostOnce, Arc::clone(&queued)));
		inflight
			.by_pkid
			.insert((AckKind::Unsubscribe, 3), Arc::clone(&sent));

		inflight.fail_all("gone");
		assert!(matches!(queued.outcome(), Outcome::Failure(_)));
		assert!(matches!(sent.outcome(), Outcome::Failure(_)));
		assert!(inflight.by_pkid.is_empty());
	}

	#[test]
	fn test_requests_rejected_without_session() {
		let scheduler = Scheduler::new(1).unwrap();
		let transport =
			RumqttTransport::new(MqttOptions::new("test", "localhost", 1883));
		let request = Request::subscribe(
			"a/b",
			QoS::AtLeastOnce,
			completion(&scheduler, RequestKind::Subscribe),
		);
		assert!(matches!(
			transport.subscribe(&request),
			Err(TransportError::NotConnected)
		));
	}
}
