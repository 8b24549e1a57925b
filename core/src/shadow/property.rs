//! Statically declared device properties
//!
//! A [`PropertyMap`] lists, per wire-level name, how to read a property for
//! reports and how to write it from a delta. It is built once per device,
//! either by hand with [`PropertyMap::builder`] or by `#[derive(ShadowState)]`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{trace, warn};

type Getter<D> = Box<dyn Fn(&D) -> Result<Value, serde_json::Error> + Send + Sync>;
type Setter<D> =
	Box<dyn Fn(&mut D, Value) -> Result<(), serde_json::Error> + Send + Sync>;

/// Device state types that expose shadow properties.
pub trait ShadowState: Send + 'static {
	/// Property map for this type, built once per device.
	fn shadow_properties() -> PropertyMap<Self>
	where Self: Sized;
}

/// Serializes a property value into its wire representation.
pub fn to_value<T>(value: &T) -> Result<Value, serde_json::Error>
where T: Serialize + ?Sized {
	serde_json::to_value(value)
}

/// Converts a wire value into a property's native type.
pub fn from_value<T>(value: Value) -> Result<T, serde_json::Error>
where T: DeserializeOwned {
	serde_json::from_value(value)
}

/// Reported and updatable properties of a device state type.
pub struct PropertyMap<D> {
	reported: BTreeMap<String, Getter<D>>,
	updatable: BTreeMap<String, Setter<D>>,
}

impl<D> fmt::Debug for PropertyMap<D> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PropertyMap")
			.field("reported", &self.reported.keys().collect::<Vec<_>>())
			.field("updatable", &self.updatable.keys().collect::<Vec<_>>())
			.finish()
	}
}

impl<D> PropertyMap<D> {
	pub fn builder() -> PropertyMapBuilder<D> {
		PropertyMapBuilder {
			map: PropertyMap {
				reported: BTreeMap::new(),
				updatable: BTreeMap::new(),
			},
		}
	}

	/// Names included in reports.
	pub fn reported_names(&self) -> impl Iterator<Item = &str> {
		self.reported.keys().map(String::as_str)
	}

	/// Names a delta may write.
	pub fn updatable_names(&self) -> impl Iterator<Item = &str> {
		self.updatable.keys().map(String::as_str)
	}

	pub fn has_reported(&self) -> bool {
		!self.reported.is_empty()
	}

	pub fn is_updatable(&self, name: &str) -> bool {
		self.updatable.contains_key(name)
	}

	/// Reads every reported property into one flat JSON object.
	///
	/// Fails as a whole if any single property fails to serialize.
	pub fn report(&self, state: &D) -> Result<Map<String, Value>, serde_json::Error> {
		self.reported
			.iter()
			.map(|(name, getter)| Ok((name.clone(), getter(state)?)))
			.collect()
	}

	/// Writes every updatable field of `delta` onto `state`.
	///
	/// Unknown fields are skipped. A value that does not convert to the
	/// property's type is logged and skipped. Returns the number of
	/// properties written.
	pub fn apply(&self, state: &mut D, delta: &Map<String, Value>) -> usize {
		let mut applied = 0;
		for (name, value) in delta {
			let Some(setter) = self.updatable.get(name) else {
				trace!(property = %name, "Skipping field without a setter");
				continue;
			};
			match setter(state, value.clone()) {
				| Ok(()) => applied += 1,
				| Err(err) => {
					warn!(property = %name, error = %err, "Failed to apply delta value");
				}
			}
		}
		applied
	}
}

/// Builder for [`PropertyMap`].
pub struct PropertyMapBuilder<D> {
	map: PropertyMap<D>,
}

impl<D> PropertyMapBuilder<D> {
	/// Property that is both reported and updatable.
	pub fn property<T, G, S>(self, name: impl Into<String>, getter: G, setter: S) -> Self
	where
		T: Serialize + DeserializeOwned,
		G: Fn(&D) -> T + Send + Sync + 'static,
		S: Fn(&mut D, T) + Send + Sync + 'static,
	{
		let name = name.into();
		self.reported(name.clone(), getter).updatable(name, setter)
	}

	/// Property included in reports.
	pub fn reported<T, G>(self, name: impl Into<String>, getter: G) -> Self
	where
		T: Serialize,
		G: Fn(&D) -> T + Send + Sync + 'static,
	{
		self.reported_with(name, move |state: &D| to_value(&getter(state)))
	}

	/// Property a delta may write.
	pub fn updatable<T, S>(self, name: impl Into<String>, setter: S) -> Self
	where
		T: DeserializeOwned,
		S: Fn(&mut D, T) + Send + Sync + 'static,
	{
		self.updatable_with(name, move |state: &mut D, value| {
			setter(state, from_value(value)?);
			Ok(())
		})
	}

	/// Reported property with a raw JSON getter.
	pub fn reported_with<G>(mut self, name: impl Into<String>, getter: G) -> Self
	where G: Fn(&D) -> Result<Value, serde_json::Error> + Send + Sync + 'static {
		self.map.reported.insert(name.into(), Box::new(getter));
		self
	}

	/// Updatable property with a raw JSON setter.
	pub fn updatable_with<S>(mut self, name: impl Into<String>, setter: S) -> Self
	where S: Fn(&mut D, Value) -> Result<(), serde_json::Error> + Send + Sync + 'static
	{
		self.map.updatable.insert(name.into(), Box::new(setter));
		self
	}

	pub fn build(self) -> PropertyMap<D> {
		self.map
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[derive(Default)]
	struct Lamp {
		brightness: u8,
		color: String,
		uptime: u64,
	}

	fn lamp_properties() -> PropertyMap<Lamp> {
		PropertyMap::builder()
			.property("brightness", |l: &Lamp| l.brightness, |l, v| l.brightness = v)
			.updatable("color", |l: &mut Lamp, v: String| l.color = v)
			.reported("uptime", |l: &Lamp| l.uptime)
			.build()
	}

	#[test]
	fn test_report_contains_reported_properties_only() {
		let map = lamp_properties();
		let lamp = Lamp {
			brightness: 80,
			color: "red".into(),
			uptime: 12,
		};
		let report = map.report(&lamp).unwrap();
		assert_eq!(Value::Object(report), json!({ "brightness": 80, "uptime": 12 }));
		assert_eq!(map.reported_names().collect::<Vec<_>>(), ["brightness", "uptime"]);
	}

	#[test]
	fn test_apply_skips_unknown_and_invalid_fields() {
		let map = lamp_properties();
		let mut lamp = Lamp::default();
		let delta = json!({
			"brightness": 40,
			"color": "blue",
			"uptime": 99,
			"unknown": true,
		});
		let applied = map.apply(&mut lamp, delta.as_object().unwrap());
		assert_eq!(applied, 2);
		assert_eq!(lamp.brightness, 40);
		assert_eq!(lamp.color, "blue");
		assert_eq!(lamp.uptime, 0);

		let invalid = json!({ "brightness": "very bright" });
		assert_eq!(map.apply(&mut lamp, invalid.as_object().unwrap()), 0);
		assert_eq!(lamp.brightness, 40);
	}

	#[test]
	fn test_report_failure_is_reported_as_error() {
		let map = PropertyMap::<Lamp>::builder()
			.reported_with("broken", |_| {
				Err(serde::ser::Error::custom("sensor offline"))
			})
			.build();
		assert!(map.report(&Lamp::default()).is_err());
	}
}
