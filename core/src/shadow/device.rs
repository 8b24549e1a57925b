//! Shadow-synchronized device
//!
//! A [`ShadowDevice`] wraps an application state object and keeps it in sync
//! with the thing's shadow document while it is attached to a connected
//! client:
//! - inbound deltas are written onto the updatable properties
//! - the reported properties are published periodically
//! - get/update/delete commands are correlated with their acknowledgements
//!
//! The local document version is `-1` while unknown. With versioning enabled
//! every report carries the version and stale deltas are discarded.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, error, info, trace, warn};

use super::command::{CommandOptions, ShadowCommandManager};
use super::error_code::ShadowErrorCode;
use super::property::{PropertyMap, ShadowState};
use super::topics::{ShadowTopics, ShadowVerb};
use crate::client::config::DeviceSettings;
use crate::client::error::{RequestFailure, ShadowClientError};
use crate::client::handler::{MessageHandler, Subscription};
use crate::client::shadow_client::ClientInner;
use crate::completion::RequestListener;
use crate::message::Message;
use crate::scheduler::TaskHandle;

const UNKNOWN_VERSION: i64 = -1;

/// Lifecycle hooks the client drives on attached devices.
pub(crate) trait ShadowSync: Send + Sync {
	fn thing_name(&self) -> &str;

	fn bind(&self, client: Weak<ClientInner>);

	/// Subscribes the shadow topics and starts periodic reporting.
	fn activate(&self, client: &ClientInner);

	/// Stops reporting, fails pending commands and drops the shadow topics.
	fn deactivate(&self, client: &ClientInner);
}

pub(crate) struct DeviceInner<D: ShadowState> {
	thing: String,
	topics: ShadowTopics,
	settings: DeviceSettings,
	properties: PropertyMap<D>,
	state: Mutex<D>,
	version: AtomicI64,
	commands: ShadowCommandManager,
	client: RwLock<Weak<ClientInner>>,
	report_task: Mutex<Option<TaskHandle>>,
	active: AtomicBool,
	version_sync_in_flight: AtomicBool,
	this: Weak<DeviceInner<D>>,
}

/// Device state mirrored to a shadow document.
///
/// Cloning yields another handle to the same device.
pub struct ShadowDevice<D: ShadowState> {
	inner: Arc<DeviceInner<D>>,
}

impl<D: ShadowState> Clone for ShadowDevice<D> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<D: ShadowState> std::fmt::Debug for ShadowDevice<D> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ShadowDevice")
			.field("thing", &self.inner.thing)
			.field("version", &self.local_version())
			.field("active", &self.is_active())
			.finish_non_exhaustive()
	}
}

/// Builder for [`ShadowDevice`].
pub struct ShadowDeviceBuilder<D: ShadowState> {
	thing: String,
	state: D,
	settings: DeviceSettings,
	properties: Option<PropertyMap<D>>,
}

impl<D: ShadowState> ShadowDeviceBuilder<D> {
	pub fn settings(mut self, settings: DeviceSettings) -> Self {
		self.settings = settings;
		self
	}

	/// Report period; zero disables periodic reporting.
	pub fn report_interval(mut self, interval: Duration) -> Self {
		self.settings.report_interval_millis =
			u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
		self
	}

	pub fn versioning(mut self, enabled: bool) -> Self {
		self.settings.enable_versioning = enabled;
		self
	}

	/// Uses `properties` instead of `D::shadow_properties()`.
	pub fn properties(mut self, properties: PropertyMap<D>) -> Self {
		self.properties = Some(properties);
		self
	}

	pub fn build(self) -> ShadowDevice<D> {
		let properties = self.properties.unwrap_or_else(D::shadow_properties);
		let topics = ShadowTopics::new(&self.thing);
		let commands = ShadowCommandManager::new(
			&self.thing,
			topics.clone(),
			self.settings.method_qos,
		);
		let inner = Arc::new_cyclic(|this| DeviceInner {
			thing: self.thing,
			topics,
			settings: self.settings,
			properties,
			state: Mutex::new(self.state),
			version: AtomicI64::new(UNKNOWN_VERSION),
			commands,
			client: RwLock::new(Weak::new()),
			report_task: Mutex::new(None),
			active: AtomicBool::new(false),
			version_sync_in_flight: AtomicBool::new(false),
			this: this.clone(),
		});
		ShadowDevice { inner }
	}
}

impl<D: ShadowState> ShadowDevice<D> {
	/// Device with default settings and `D`'s declared properties.
	pub fn new(thing_name: impl Into<String>, state: D) -> Self {
		Self::builder(thing_name, state).build()
	}

	pub fn builder(thing_name: impl Into<String>, state: D) -> ShadowDeviceBuilder<D> {
		ShadowDeviceBuilder {
			thing: thing_name.into(),
			state,
			settings: DeviceSettings::default(),
			properties: None,
		}
	}

	pub fn thing_name(&self) -> &str {
		&self.inner.thing
	}

	/// Local document version, `-1` while unknown.
	pub fn local_version(&self) -> i64 {
		self.inner.version.load(Ordering::Acquire)
	}

	pub fn settings(&self) -> &DeviceSettings {
		&self.inner.settings
	}

	pub fn properties(&self) -> &PropertyMap<D> {
		&self.inner.properties
	}

	/// Locks the device state. Deltas are applied under the same lock.
	pub fn state(&self) -> MutexGuard<'_, D> {
		self.inner.state.lock()
	}

	/// Returns true while shadow sync is running.
	pub fn is_active(&self) -> bool {
		self.inner.active.load(Ordering::Acquire)
	}

	/// Number of commands waiting for an acknowledgement.
	pub fn pending_commands(&self) -> usize {
		self.inner.commands.pending_count()
	}

	pub(crate) fn sync_handle(&self) -> Arc<dyn ShadowSync> {
		self.inner.clone()
	}

	/// Fetches the shadow document.
	pub fn get(&self, timeout: Option<Duration>) -> Result<String, ShadowClientError> {
		self.inner
			.command(ShadowVerb::Get, None, blocking(timeout))
			.map(Option::unwrap_or_default)
	}

	pub fn get_async(
		&self,
		timeout: Option<Duration>,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		self.inner
			.command(ShadowVerb::Get, None, callback(timeout, listener))
			.map(drop)
	}

	/// Sends an update document, e.g. `{"state":{"desired":{...}}}`.
	pub fn update(
		&self,
		document: &str,
		timeout: Option<Duration>,
	) -> Result<String, ShadowClientError> {
		self.inner
			.command(ShadowVerb::Update, Some(document), blocking(timeout))
			.map(Option::unwrap_or_default)
	}

	pub fn update_async(
		&self,
		document: &str,
		timeout: Option<Duration>,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		self.inner
			.command(ShadowVerb::Update, Some(document), callback(timeout, listener))
			.map(drop)
	}

	/// Deletes the shadow document. Deleting a missing document succeeds.
	pub fn delete(&self, timeout: Option<Duration>) -> Result<String, ShadowClientError> {
		self.inner
			.command(ShadowVerb::Delete, None, blocking(timeout))
			.map(Option::unwrap_or_default)
	}

	pub fn delete_async(
		&self,
		timeout: Option<Duration>,
		listener: Option<Arc<dyn RequestListener>>,
	) -> Result<(), ShadowClientError> {
		self.inner
			.command(ShadowVerb::Delete, None, callback(timeout, listener))
			.map(drop)
	}

	/// Writes the fields of a shadow `state` object onto the device.
	///
	/// Returns the number of properties written.
	pub fn on_shadow_update(&self, state: &str) -> Result<usize, ShadowClientError> {
		let state: Map<String, Value> = serde_json::from_str(state)?;
		Ok(self.inner.apply_state(&state))
	}

	/// Reported properties as one flat JSON object, `None` if any of them
	/// fails to serialize.
	pub fn on_device_report(&self) -> Option<String> {
		self.inner.report_state().map(|state| Value::Object(state).to_string())
	}
}

fn blocking(timeout: Option<Duration>) -> CommandOptions {
	CommandOptions {
		timeout,
		blocking: true,
		listener: None,
	}
}

fn callback(
	timeout: Option<Duration>,
	listener: Option<Arc<dyn RequestListener>>,
) -> CommandOptions {
	CommandOptions {
		timeout,
		blocking: false,
		listener,
	}
}

impl<D: ShadowState> DeviceInner<D> {
	fn client(&self) -> Option<Arc<ClientInner>> {
		self.client.read().upgrade()
	}

	fn command(
		&self,
		verb: ShadowVerb,
		document: Option<&str>,
		options: CommandOptions,
	) -> Result<Option<String>, ShadowClientError> {
		let client = self
			.client()
			.ok_or_else(|| ShadowClientError::DeviceNotAttached(self.thing.clone()))?;
		self.commands.run_command(&client, verb, document, options)
	}

	fn apply_state(&self, state: &Map<String, Value>) -> usize {
		let mut device = self.state.lock();
		let applied = self.properties.apply(&mut device, state);
		debug!(thing = %self.thing, applied, "Shadow state applied");
		applied
	}

	fn report_state(&self) -> Option<Map<String, Value>> {
		let device = self.state.lock();
		match self.properties.report(&device) {
			| Ok(state) => Some(state),
			| Err(err) => {
				error!(thing = %self.thing, error = %err, "Failed to serialize device report");
				None
			}
		}
	}

	fn on_delta(&self, message: &Message) {
		let document: Value = match serde_json::from_slice(&message.payload) {
			| Ok(document) => document,
			| Err(err) => {
				warn!(thing = %self.thing, error = %err, "Malformed shadow delta");
				return;
			}
		};
		let version = document.get("version").and_then(Value::as_i64);
		if self.settings.enable_versioning {
			let Some(version) = version else {
				warn!(thing = %self.thing, "Shadow delta without version discarded");
				return;
			};
			let local = self.version.load(Ordering::Acquire);
			if version < local {
				info!(thing = %self.thing, version, local, "Stale shadow delta discarded");
				return;
			}
		}
		if let Some(version) = version {
			self.version.fetch_max(version, Ordering::AcqRel);
		}
		let Some(state) = document.get("state").and_then(Value::as_object) else {
			warn!(thing = %self.thing, "Shadow delta without state object");
			return;
		};
		self.apply_state(state);
	}

	fn report_tick(&self) {
		let Some(client) = self.client() else {
			return;
		};
		if !self.commands.is_ready(ShadowVerb::Update) {
			trace!(thing = %self.thing, "Update topics not ready, skipping report");
			return;
		}
		let version = self.version.load(Ordering::Acquire);
		if self.settings.enable_versioning && version == UNKNOWN_VERSION {
			self.sync_version(&client);
			return;
		}
		let Some(reported) = self.report_state() else {
			return;
		};

		let mut state = Map::new();
		state.insert("reported".to_string(), Value::Object(reported));
		let mut document = Map::new();
		if self.settings.enable_versioning {
			document.insert("version".to_string(), Value::from(version));
		}
		document.insert("state".to_string(), Value::Object(state));

		let listener = ReportListener {
			device: self.this.clone(),
			version,
		};
		let options = CommandOptions {
			timeout: Some(client.server_ack_timeout()),
			blocking: false,
			listener: Some(Arc::new(listener)),
		};
		let document = Value::Object(document).to_string();
		if let Err(err) =
			self.commands
				.run_command(&client, ShadowVerb::Update, Some(&document), options)
		{
			warn!(thing = %self.thing, error = %err, "Failed to send device report");
		}
	}

	fn sync_version(&self, client: &ClientInner) {
		if !self.commands.is_ready(ShadowVerb::Get) {
			trace!(thing = %self.thing, "Get topics not ready, postponing version sync");
			return;
		}
		if self.version_sync_in_flight.swap(true, Ordering::AcqRel) {
			return;
		}
		debug!(thing = %self.thing, "Fetching shadow version");
		let options = CommandOptions {
			timeout: Some(client.server_ack_timeout()),
			blocking: false,
			listener: Some(Arc::new(VersionSyncListener {
				device: self.this.clone(),
			})),
		};
		if let Err(err) = self.commands.run_command(client, ShadowVerb::Get, None, options) {
			warn!(thing = %self.thing, error = %err, "Failed to fetch shadow version");
			self.version_sync_in_flight.store(false, Ordering::Release);
		}
	}

	fn start_reporting(&self, client: &ClientInner) {
		let Some(interval) = self.settings.report_interval() else {
			debug!(thing = %self.thing, "Periodic reporting disabled");
			return;
		};
		if !self.properties.has_reported() {
			debug!(thing = %self.thing, "No reported properties, periodic reporting disabled");
			return;
		}
		let device = self.this.clone();
		let task = client.scheduler().schedule_periodic(interval, move || {
			if let Some(device) = device.upgrade() {
				device.report_tick();
			}
		});
		if let Some(previous) = self.report_task.lock().replace(task) {
			previous.cancel();
		}
	}

	fn shadow_topics(&self) -> Vec<String> {
		std::iter::once(self.topics.delta())
			.chain(self.topics.ack_topics().map(|(_, _, topic)| topic))
			.collect()
	}
}

impl<D: ShadowState> ShadowSync for DeviceInner<D> {
	fn thing_name(&self) -> &str {
		&self.thing
	}

	fn bind(&self, client: Weak<ClientInner>) {
		*self.client.write() = client;
	}

	fn activate(&self, client: &ClientInner) {
		if self.active.swap(true, Ordering::AcqRel) {
			return;
		}
		info!(thing = %self.thing, "Activating shadow sync");
		let timeout = Some(client.server_ack_timeout());

		let delta = Subscription::new(
			self.topics.delta(),
			self.settings.shadow_update_qos,
			DeltaHandler {
				device: self.this.clone(),
			},
		);
		match delta {
			| Ok(subscription) => {
				if let Err(err) = client.subscribe_with(subscription, timeout, false, None) {
					warn!(thing = %self.thing, error = %err, "Failed to subscribe shadow delta topic");
				}
			}
			| Err(err) => {
				error!(thing = %self.thing, error = %err, "Invalid shadow delta topic");
			}
		}

		for (_, _, topic) in self.topics.ack_topics() {
			let subscription = Subscription::new(
				topic.clone(),
				self.settings.method_ack_qos,
				AckHandler {
					device: self.this.clone(),
				},
			);
			let listener: Arc<dyn RequestListener> = Arc::new(AckSubscriptionListener {
				device: self.this.clone(),
				topic: topic.clone(),
			});
			let subscribed = subscription
				.map_err(ShadowClientError::from)
				.and_then(|subscription| {
					client.subscribe_with(subscription, timeout, false, Some(listener))
				});
			if let Err(err) = subscribed {
				warn!(thing = %self.thing, topic = %topic, error = %err, "Failed to subscribe shadow acknowledgement topic");
				self.commands.on_subscription_ack(client, &topic, false);
			}
		}

		self.start_reporting(client);
	}

	fn deactivate(&self, client: &ClientInner) {
		if !self.active.swap(false, Ordering::AcqRel) {
			return;
		}
		info!(thing = %self.thing, "Deactivating shadow sync");
		if let Some(task) = self.report_task.lock().take() {
			task.cancel();
		}
		self.commands.on_deactivate(client.scheduler());

		let connected = client.is_connected();
		for topic in self.shadow_topics() {
			if !connected {
				client.forget_subscription(&topic);
				continue;
			}
			let timeout = Some(client.server_ack_timeout());
			if let Err(err) = client.unsubscribe_with(&topic, timeout, false, None) {
				debug!(thing = %self.thing, topic = %topic, error = %err, "Failed to unsubscribe shadow topic");
			}
		}
		self.version.store(UNKNOWN_VERSION, Ordering::Release);
		self.version_sync_in_flight.store(false, Ordering::Release);
	}
}

struct DeltaHandler<D: ShadowState> {
	device: Weak<DeviceInner<D>>,
}

impl<D: ShadowState> MessageHandler for DeltaHandler<D> {
	fn on_message(&self, message: &Message) {
		if let Some(device) = self.device.upgrade() {
			device.on_delta(message);
		}
	}
}

struct AckHandler<D: ShadowState> {
	device: Weak<DeviceInner<D>>,
}

impl<D: ShadowState> MessageHandler for AckHandler<D> {
	fn on_message(&self, message: &Message) {
		if let Some(device) = self.device.upgrade() {
			if let Some((verb, status, _)) = device.commands.on_command_ack(message) {
				trace!(thing = %device.thing, verb = %verb, status = status.as_str(), "Shadow command acknowledged");
			}
		}
	}
}

struct AckSubscriptionListener<D: ShadowState> {
	device: Weak<DeviceInner<D>>,
	topic: String,
}

impl<D: ShadowState> AckSubscriptionListener<D> {
	fn notify(&self, subscribed: bool) {
		let Some(device) = self.device.upgrade() else {
			return;
		};
		if let Some(client) = device.client() {
			device.commands.on_subscription_ack(&client, &self.topic, subscribed);
		}
	}
}

impl<D: ShadowState> RequestListener for AckSubscriptionListener<D> {
	fn on_success(&self, _response: Option<&str>) {
		self.notify(true);
	}

	fn on_failure(&self, _failure: &RequestFailure) {
		self.notify(false);
	}

	fn on_timeout(&self) {
		self.notify(false);
	}
}

struct ReportListener<D: ShadowState> {
	device: Weak<DeviceInner<D>>,
	version: i64,
}

impl<D: ShadowState> RequestListener for ReportListener<D> {
	fn on_success(&self, _response: Option<&str>) {
		let Some(device) = self.device.upgrade() else {
			return;
		};
		if self.version == UNKNOWN_VERSION {
			return;
		}
		// A concurrent delta may already have moved the version past us.
		if device
			.version
			.compare_exchange(
				self.version,
				self.version + 1,
				Ordering::AcqRel,
				Ordering::Acquire,
			)
			.is_err()
		{
			debug!(thing = %device.thing, reported = self.version, "Local version moved during report");
		}
	}

	fn on_failure(&self, failure: &RequestFailure) {
		let Some(device) = self.device.upgrade() else {
			return;
		};
		if failure.code == Some(ShadowErrorCode::Conflict) {
			info!(thing = %device.thing, "Version conflict, resynchronizing");
			device.version.store(UNKNOWN_VERSION, Ordering::Release);
		} else {
			warn!(thing = %device.thing, error = %failure, "Device report rejected");
		}
	}

	fn on_timeout(&self) {
		if let Some(device) = self.device.upgrade() {
			debug!(thing = %device.thing, "Device report timed out");
		}
	}
}

struct VersionSyncListener<D: ShadowState> {
	device: Weak<DeviceInner<D>>,
}

impl<D: ShadowState> VersionSyncListener<D> {
	fn settle(&self, version: Option<i64>) {
		let Some(device) = self.device.upgrade() else {
			return;
		};
		device.version_sync_in_flight.store(false, Ordering::Release);
		if let Some(version) = version {
			if device
				.version
				.compare_exchange(UNKNOWN_VERSION, version, Ordering::AcqRel, Ordering::Acquire)
				.is_ok()
			{
				info!(thing = %device.thing, version, "Shadow version synchronized");
			}
		}
	}
}

impl<D: ShadowState> RequestListener for VersionSyncListener<D> {
	fn on_success(&self, response: Option<&str>) {
		let version = response
			.and_then(|raw| serde_json::from_str::<Value>(raw).ok())
			.and_then(|document| document.get("version").and_then(Value::as_i64));
		if version.is_none() {
			warn!("Shadow get response without version");
		}
		self.settle(version);
	}

	fn on_failure(&self, failure: &RequestFailure) {
		if failure.code == Some(ShadowErrorCode::NotFound) {
			// No document yet: the first report creates version 1.
			self.settle(Some(0));
		} else {
			warn!(error = %failure, "Shadow version fetch failed");
			self.settle(None);
		}
	}

	fn on_timeout(&self) {
		self.settle(None);
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[derive(Default)]
	struct Fan {
		speed: u8,
	}

	impl ShadowState for Fan {
		fn shadow_properties() -> PropertyMap<Self> {
			PropertyMap::builder()
				.property("speed", |f: &Fan| f.speed, |f, v| f.speed = v)
				.build()
		}
	}

	fn delta(device: &ShadowDevice<Fan>, body: Value) -> Message {
		Message::new(device.inner.topics.delta(), body.to_string())
	}

	#[test]
	fn test_report_interval_saturates() {
		let device = ShadowDevice::builder("fan", Fan::default())
			.report_interval(Duration::from_millis(250))
			.build();
		assert_eq!(device.settings().report_interval_millis, 250);

		let device = ShadowDevice::builder("fan", Fan::default())
			.report_interval(Duration::MAX)
			.build();
		assert_eq!(device.settings().report_interval_millis, u64::MAX);

		let device = ShadowDevice::builder("fan", Fan::default())
			.report_interval(Duration::ZERO)
			.build();
		assert_eq!(device.settings().report_interval(), None);
	}

	#[test]
	fn test_versioned_delta_rules() {
		let device = ShadowDevice::builder("fan", Fan::default())
			.versioning(true)
			.build();
		device.inner.on_delta(&delta(&device, json!({ "version": 4, "state": { "speed": 2 } })));
		assert_eq!(device.local_version(), 4);
		assert_eq!(device.state().speed, 2);

		device.inner.on_delta(&delta(&device, json!({ "version": 3, "state": { "speed": 9 } })));
		device.inner.on_delta(&delta(&device, json!({ "state": { "speed": 9 } })));
		device
			.inner
			.on_delta(&Message::new(device.inner.topics.delta(), "{not json"));
		assert_eq!(device.state().speed, 2);
		assert_eq!(device.local_version(), 4);

		// same version is not stale
		device.inner.on_delta(&delta(&device, json!({ "version": 4, "state": { "speed": 5 } })));
		assert_eq!(device.state().speed, 5);
	}

	#[test]
	fn test_unversioned_delta_applies_and_tracks_version() {
		let device = ShadowDevice::new("fan", Fan::default());
		device.inner.on_delta(&delta(&device, json!({ "state": { "speed": 3 } })));
		assert_eq!(device.state().speed, 3);
		assert_eq!(device.local_version(), UNKNOWN_VERSION);

		device.inner.on_delta(&delta(&device, json!({ "version": 9, "state": {} })));
		device.inner.on_delta(&delta(&device, json!({ "version": 2, "state": { "speed": 1 } })));
		assert_eq!(device.state().speed, 1);
		assert_eq!(device.local_version(), 9);
	}

	#[test]
	fn test_report_ack_advances_only_from_reported_version() {
		let device = ShadowDevice::new("fan", Fan::default());
		let listener = ReportListener {
			device: Arc::downgrade(&device.inner),
			version: 7,
		};

		device.inner.version.store(7, Ordering::Release);
		listener.on_success(None);
		assert_eq!(device.local_version(), 8);

		// a delta moved the version while the report was in flight
		device.inner.version.store(12, Ordering::Release);
		listener.on_success(None);
		assert_eq!(device.local_version(), 12);

		listener.on_failure(&RequestFailure::with_code(
			ShadowErrorCode::Conflict,
			"Version conflict",
		));
		assert_eq!(device.local_version(), UNKNOWN_VERSION);
	}

	#[test]
	fn test_version_sync_sets_only_unknown_version() {
		let device = ShadowDevice::new("fan", Fan::default());
		let listener = VersionSyncListener {
			device: Arc::downgrade(&device.inner),
		};
		listener.on_failure(&RequestFailure::with_code(
			ShadowErrorCode::NotFound,
			"No shadow exists",
		));
		assert_eq!(device.local_version(), 0);

		listener.on_success(Some(r#"{"version":5}"#));
		assert_eq!(device.local_version(), 0);
	}
}
