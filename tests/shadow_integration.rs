//! Shadow commands, deltas and periodic reports against a mock shadow service

mod common;

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use common::{MockTransport, client, shadow_ack, wait_until};
use mqtt_device_shadow::prelude::*;
use mqtt_device_shadow::{RequestFailure, RequestKind, ShadowErrorCode};
use parking_lot::Mutex;
use serde_json::{Value, json};

const THING: &str = "lamp-1";
const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, ShadowState)]
struct Lamp {
	on: bool,
	#[shadow(name = "brightness")]
	level: u8,
	#[shadow(update = false)]
	watts: f64,
	#[shadow(skip)]
	toggles: u32,
}

impl Lamp {
	fn new() -> Self {
		Self {
			on: false,
			level: 50,
			watts: 4.5,
			toggles: 0,
		}
	}
}

fn topic(suffix: &str) -> String {
	format!("$aws/things/{THING}/shadow/{suffix}")
}

fn verb_of(message: &Message) -> Option<&str> {
	message
		.topic
		.strip_prefix(&format!("$aws/things/{THING}/shadow/"))
		.filter(|verb| ["get", "update", "delete"].contains(verb))
}

fn quiet_device() -> ShadowDevice<Lamp> {
	ShadowDevice::builder(THING, Lamp::new())
		.report_interval(Duration::ZERO)
		.build()
}

/// Forwards listener callbacks into a channel.
struct ChannelListener(Mutex<mpsc::Sender<std::result::Result<String, RequestFailure>>>);

impl ChannelListener {
	fn new() -> (Arc<Self>, mpsc::Receiver<std::result::Result<String, RequestFailure>>) {
		let (tx, rx) = mpsc::channel();
		(Arc::new(Self(Mutex::new(tx))), rx)
	}
}

impl RequestListener for ChannelListener {
	fn on_success(&self, response: Option<&str>) {
		let _ = self.0.lock().send(Ok(response.unwrap_or_default().to_string()));
	}

	fn on_failure(&self, failure: &RequestFailure) {
		let _ = self.0.lock().send(Err(failure.clone()));
	}

	fn on_timeout(&self) {
		let _ = self.0.lock().send(Err(RequestFailure::new("timeout")));
	}
}

fn updates(transport: &MockTransport) -> Vec<Value> {
	transport
		.requests_to(RequestKind::Publish, &topic("update"))
		.iter()
		.map(|r| r.json())
		.collect()
}

fn gets(transport: &MockTransport) -> usize {
	transport.requests_to(RequestKind::Publish, &topic("get")).len()
}

#[test]
fn test_command_queued_until_ack_topics_ready() {
	let transport = MockTransport::new();
	transport.respond_with(|message| match verb_of(message)? {
		| "get" => Some(shadow_ack(message, "accepted", json!({
			"state": { "reported": { "on": true } },
			"version": 12
		}))),
		| _ => None,
	});
	let client = client(&transport);
	let device = quiet_device();
	client.attach(&device);

	let (listener, rx) = ChannelListener::new();
	device.get_async(Some(WAIT), Some(listener)).unwrap();
	assert_eq!(device.pending_commands(), 1);
	assert!(transport.requests().is_empty());

	client.connect(None).unwrap();

	let document: Value = serde_json::from_str(&rx.recv_timeout(WAIT).unwrap().unwrap()).unwrap();
	assert_eq!(document["version"], 12);
	assert_eq!(gets(&transport), 1);
	assert_eq!(device.pending_commands(), 0);
}

#[test]
fn test_blocking_commands() {
	let transport = MockTransport::new();
	transport.respond_with(|message| match verb_of(message)? {
		| "get" => Some(shadow_ack(message, "accepted", json!({ "version": 3 }))),
		| "update" => Some(shadow_ack(message, "accepted", json!({ "version": 4 }))),
		| "delete" => Some(shadow_ack(message, "accepted", json!({ "version": 4 }))),
		| _ => None,
	});
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = quiet_device();
	client.attach(&device);
	assert!(device.is_active());

	let document = device.get(Some(WAIT)).unwrap();
	assert!(document.contains("\"version\":3"));

	device
		.update(r#"{"state":{"desired":{"on":true}}}"#, Some(WAIT))
		.unwrap();
	let sent = updates(&transport);
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0]["state"]["desired"]["on"], true);
	assert!(sent[0]["clientToken"].is_string());

	device.delete(Some(WAIT)).unwrap();
	assert_eq!(
		transport.requests_to(RequestKind::Publish, &topic("delete")).len(),
		1
	);
}

#[test]
fn test_delete_of_missing_shadow_succeeds() {
	let transport = MockTransport::new();
	transport.respond_with(|message| match verb_of(message)? {
		| "delete" => Some(shadow_ack(message, "rejected", json!({
			"code": 404,
			"message": "No shadow exists with name: 'lamp-1'"
		}))),
		| _ => None,
	});
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = quiet_device();
	client.attach(&device);

	device.delete(Some(WAIT)).unwrap();
}

#[test]
fn test_rejected_update_carries_error_code() {
	let transport = MockTransport::new();
	transport.respond_with(|message| match verb_of(message)? {
		| "update" => Some(shadow_ack(message, "rejected", json!({
			"code": 400,
			"message": "Missing required node: state"
		}))),
		| _ => None,
	});
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = quiet_device();
	client.attach(&device);

	let err = device.update("{}", Some(WAIT)).unwrap_err();
	assert_eq!(err.shadow_code(), Some(ShadowErrorCode::BadRequest));
	assert!(err.to_string().contains("Missing required node"));
}

#[test]
fn test_unanswered_command_times_out() {
	let transport = MockTransport::new();
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = quiet_device();
	client.attach(&device);

	let err = device.get(Some(Duration::from_millis(100))).unwrap_err();
	assert!(err.is_timeout());
	assert_eq!(device.pending_commands(), 0);
}

#[test]
fn test_command_on_detached_device_fails() {
	let device = quiet_device();
	let err = device.get(Some(WAIT)).unwrap_err();
	assert!(matches!(err, ShadowClientError::DeviceNotAttached(thing) if thing == THING));
}

#[test]
fn test_malformed_update_document_is_rejected() {
	let transport = MockTransport::new();
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = quiet_device();
	client.attach(&device);

	let err = device.update("not json", Some(WAIT)).unwrap_err();
	assert!(matches!(err, ShadowClientError::Payload(_)));
	assert_eq!(device.pending_commands(), 0);
}

#[test]
fn test_delta_updates_writable_properties() {
	let transport = MockTransport::new();
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = quiet_device();
	client.attach(&device);
	assert!(wait_until(WAIT, || client.subscriptions().contains(&topic("update/delta"))));

	transport.deliver(Message::new(
		topic("update/delta"),
		json!({
			"version": 4,
			"state": { "on": true, "brightness": 80, "watts": 99.0, "color": "red" }
		})
		.to_string(),
	));

	assert!(wait_until(WAIT, || device.state().on));
	let lamp = device.state();
	assert_eq!(lamp.level, 80);
	assert_eq!(lamp.watts, 4.5);
	assert_eq!(lamp.toggles, 0);
	drop(lamp);
	assert_eq!(device.local_version(), 4);
}

#[test]
fn test_stale_and_unversioned_deltas_are_discarded() {
	let transport = MockTransport::new();
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = ShadowDevice::builder(THING, Lamp::new())
		.report_interval(Duration::ZERO)
		.versioning(true)
		.build();
	client.attach(&device);
	assert!(wait_until(WAIT, || client.subscriptions().contains(&topic("update/delta"))));

	let delta = |body: Value| Message::new(topic("update/delta"), body.to_string());
	transport.deliver(delta(json!({ "version": 5, "state": { "on": true } })));
	assert!(wait_until(WAIT, || device.local_version() == 5));

	transport.deliver(delta(json!({ "version": 3, "state": { "on": false } })));
	transport.deliver(delta(json!({ "state": { "brightness": 1 } })));
	transport.deliver(delta(json!({ "version": 6, "state": { "brightness": 90 } })));

	assert!(wait_until(WAIT, || device.state().level == 90));
	std::thread::sleep(Duration::from_millis(50));
	let lamp = device.state();
	assert!(lamp.on);
	assert_eq!(lamp.level, 90);
	drop(lamp);
	assert_eq!(device.local_version(), 6);
}

#[test]
fn test_report_without_versioning() {
	let transport = MockTransport::new();
	transport.respond_with(|message| match verb_of(message)? {
		| "update" => Some(shadow_ack(message, "accepted", json!({ "version": 2 }))),
		| _ => None,
	});
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = ShadowDevice::builder(THING, Lamp::new())
		.report_interval(Duration::from_millis(100))
		.build();
	client.attach(&device);

	assert!(wait_until(WAIT, || !updates(&transport).is_empty()));
	let report = &updates(&transport)[0];
	assert!(report.get("version").is_none());
	assert_eq!(report["state"]["reported"], json!({
		"on": false,
		"brightness": 50,
		"watts": 4.5
	}));
	assert!(report["clientToken"].is_string());
	assert_eq!(gets(&transport), 0);
	assert_eq!(device.local_version(), -1);

	// one report per interval
	let before = updates(&transport).len();
	std::thread::sleep(Duration::from_millis(500));
	let sent = updates(&transport).len() - before;
	assert!((3..=6).contains(&sent), "expected about 5 reports, saw {sent}");
}

#[test]
fn test_versioned_reports_track_the_document_version() {
	let transport = MockTransport::new();
	transport.respond_with(|message| match verb_of(message)? {
		| "get" => Some(shadow_ack(message, "accepted", json!({ "version": 7 }))),
		| "update" => Some(shadow_ack(message, "accepted", json!({}))),
		| _ => None,
	});
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = ShadowDevice::builder(THING, Lamp::new())
		.report_interval(Duration::from_millis(30))
		.versioning(true)
		.build();
	client.attach(&device);

	let reported = |version: i64| {
		updates(&transport)
			.iter()
			.any(|report| report["version"] == version)
	};
	assert!(wait_until(WAIT, || reported(7)));
	assert!(wait_until(WAIT, || reported(8)));
	assert!(device.local_version() >= 8);
	assert_eq!(gets(&transport), 1);
}

#[test]
fn test_report_ack_does_not_clobber_newer_delta_version() {
	let transport = MockTransport::new();
	let (seen_tx, seen_rx) = mpsc::channel::<()>();
	let (release_tx, release_rx) = mpsc::channel::<()>();
	let seen_tx = Mutex::new(seen_tx);
	let release_rx = Mutex::new(release_rx);
	transport.respond_with(move |message| match verb_of(message)? {
		| "get" => Some(shadow_ack(message, "accepted", json!({ "version": 7 }))),
		| "update" => {
			let request: Value = serde_json::from_slice(&message.payload).ok()?;
			if request["version"] != 7 {
				return None;
			}
			let _ = seen_tx.lock().send(());
			// hold the acknowledgement until the test has applied a delta
			let _ = release_rx.lock().recv_timeout(WAIT);
			Some(shadow_ack(message, "accepted", json!({})))
		}
		| _ => None,
	});
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = ShadowDevice::builder(THING, Lamp::new())
		.report_interval(Duration::from_millis(30))
		.versioning(true)
		.build();
	client.attach(&device);

	seen_rx.recv_timeout(WAIT).unwrap();
	transport.deliver(Message::new(
		topic("update/delta"),
		json!({ "version": 12, "state": { "on": true } }).to_string(),
	));
	assert!(wait_until(WAIT, || device.local_version() == 12));

	release_tx.send(()).unwrap();
	std::thread::sleep(Duration::from_millis(200));
	assert_eq!(device.local_version(), 12);
	assert!(device.state().on);
	assert!(updates(&transport).iter().any(|report| report["version"] == 12));
}

#[test]
fn test_version_conflict_triggers_resync() {
	let transport = MockTransport::new();
	transport.respond_with(|message| match verb_of(message)? {
		| "get" => Some(shadow_ack(message, "accepted", json!({ "version": 3 }))),
		| "update" => Some(shadow_ack(message, "rejected", json!({
			"code": 409,
			"message": "Version conflict"
		}))),
		| _ => None,
	});
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = ShadowDevice::builder(THING, Lamp::new())
		.report_interval(Duration::from_millis(30))
		.versioning(true)
		.build();
	client.attach(&device);

	assert!(wait_until(WAIT, || gets(&transport) >= 2));
	assert!(!updates(&transport).is_empty());
}

#[test]
fn test_missing_document_reports_from_version_zero() {
	let transport = MockTransport::new();
	transport.respond_with(|message| match verb_of(message)? {
		| "get" => Some(shadow_ack(message, "rejected", json!({
			"code": 404,
			"message": "No shadow exists"
		}))),
		| "update" => Some(shadow_ack(message, "accepted", json!({}))),
		| _ => None,
	});
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = ShadowDevice::builder(THING, Lamp::new())
		.report_interval(Duration::from_millis(30))
		.versioning(true)
		.build();
	client.attach(&device);

	assert!(wait_until(WAIT, || {
		updates(&transport).first().map(|report| report["version"].clone()) == Some(json!(0))
	}));
}

#[test]
fn test_detach_stops_sync() {
	let transport = MockTransport::new();
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = quiet_device();
	client.attach(&device);
	assert!(device.is_active());
	assert!(wait_until(WAIT, || client.subscriptions().contains(&topic("update/delta"))));

	client.detach(&device);
	assert!(!device.is_active());
	assert!(wait_until(WAIT, || client.subscriptions().is_empty()));
	assert_eq!(
		transport
			.requests_to(RequestKind::Unsubscribe, &topic("update/delta"))
			.len(),
		1
	);
	assert!(matches!(
		device.get(Some(WAIT)),
		Err(ShadowClientError::DeviceNotAttached(_))
	));
}

#[test]
fn test_disconnect_fails_pending_commands() {
	let transport = MockTransport::new();
	let client = client(&transport);
	client.connect(None).unwrap();
	let device = quiet_device();
	client.attach(&device);

	let (listener, rx) = ChannelListener::new();
	device.get_async(Some(Duration::from_secs(10)), Some(listener)).unwrap();
	assert!(wait_until(WAIT, || gets(&transport) == 1));

	client.disconnect(Some(WAIT)).unwrap();
	assert!(rx.recv_timeout(WAIT).unwrap().is_err());
	assert!(!device.is_active());
}

#[test]
fn test_shadow_update_and_report_without_client() {
	let device = quiet_device();

	let applied = device
		.on_shadow_update(r#"{"on":true,"brightness":7,"watts":100.0,"bogus":1}"#)
		.unwrap();
	assert_eq!(applied, 2);
	assert_eq!(device.on_shadow_update(r#"{"on":"yes"}"#).unwrap(), 0);
	assert!(device.on_shadow_update("[1,2]").is_err());

	let report: Value = serde_json::from_str(&device.on_device_report().unwrap()).unwrap();
	assert_eq!(report, json!({ "on": true, "brightness": 7, "watts": 4.5 }));
}
