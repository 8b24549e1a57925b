//! Struct analysis and validation logic
//!
//! Walks the named fields of a `#[derive(ShadowState)]` struct, reads their
//! `#[shadow(...)]` attributes and produces one [`PropertyDef`] per shadow
//! property.

use std::collections::HashSet;

use syn::{Data, DataStruct, Fields, LitBool, LitStr};

/// A single shadow property declared by a struct field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
	/// Rust field the property is backed by
	pub field: syn::Ident,
	/// Property name inside the shadow document
	pub wire_name: String,
	/// Included in periodic reports
	pub report: bool,
	/// Writable from a delta
	pub update: bool,
	/// `fn(&self) -> T` used instead of reading the field
	pub getter: Option<syn::Ident>,
	/// `fn(&mut self, T)` used instead of assigning the field
	pub setter: Option<syn::Ident>,
}

/// Validated properties of a device state struct
#[derive(Debug)]
pub struct StateAnalysis {
	pub properties: Vec<PropertyDef>,
}

impl StateAnalysis {
	/// Analyze the struct and its field attributes
	/// # Validation Rules
	/// 1. Must be a struct with named fields
	/// 2. `#[shadow(skip)]` excludes a field, every other field is a property
	/// 3. A property must be reported, updatable or both
	/// 4. `getter` requires `report`, `setter` requires `update`
	/// 5. Wire names are unique
	pub fn analyze(input: &syn::DeriveInput) -> Result<Self, syn::Error> {
		let fields = Self::extract_struct_fields(input)?;
		let mut properties = Vec::new();
		let mut seen = HashSet::new();

		for field in fields {
			let Some(ident) = field.ident.clone() else {
				continue;
			};
			let Some(property) = Self::analyze_field(ident, field)? else {
				continue;
			};
			if !seen.insert(property.wire_name.clone()) {
				return Err(syn::Error::new_spanned(
					field,
					format!(
						"Duplicate shadow property name '{}'",
						property.wire_name
					),
				));
			}
			properties.push(property);
		}

		Ok(Self { properties })
	}

	fn extract_struct_fields(
		input: &syn::DeriveInput,
	) -> Result<
		&syn::punctuated::Punctuated<syn::Field, syn::Token![,]>,
		syn::Error,
	> {
		match &input.data {
			| Data::Struct(DataStruct {
				fields: Fields::Named(fields),
				..
			}) => Ok(&fields.named),
			| _ => Err(syn::Error::new_spanned(
				input,
				"ShadowState can only be derived for structs with named fields",
			)),
		}
	}

	/// Returns `None` for skipped fields.
	fn analyze_field(
		ident: syn::Ident,
		field: &syn::Field,
	) -> Result<Option<PropertyDef>, syn::Error> {
		let mut property = PropertyDef {
			wire_name: ident.to_string(),
			field: ident,
			report: true,
			update: true,
			getter: None,
			setter: None,
		};
		let mut skip = false;

		for attr in field.attrs.iter().filter(|a| a.path().is_ident("shadow")) {
			attr.parse_nested_meta(|meta| {
				if meta.path.is_ident("skip") {
					skip = true;
				} else if meta.path.is_ident("name") {
					let name: LitStr = meta.value()?.parse()?;
					if name.value().is_empty() {
						return Err(meta.error("shadow property name must not be empty"));
					}
					property.wire_name = name.value();
				} else if meta.path.is_ident("report") {
					let value: LitBool = meta.value()?.parse()?;
					property.report = value.value;
				} else if meta.path.is_ident("update") {
					let value: LitBool = meta.value()?.parse()?;
					property.update = value.value;
				} else if meta.path.is_ident("getter") {
					let method: LitStr = meta.value()?.parse()?;
					property.getter = Some(method.parse()?);
				} else if meta.path.is_ident("setter") {
					let method: LitStr = meta.value()?.parse()?;
					property.setter = Some(method.parse()?);
				} else {
					return Err(meta.error(
						"unsupported shadow attribute, expected one of: skip, \
						 name, report, update, getter, setter",
					));
				}
				Ok(())
			})?;
		}

		if skip {
			return Ok(None);
		}
		if !property.report && !property.update {
			return Err(syn::Error::new_spanned(
				field,
				"Property is neither reported nor updatable, use \
				 #[shadow(skip)] instead",
			));
		}
		if property.getter.is_some() && !property.report {
			return Err(syn::Error::new_spanned(
				field,
				"`getter` has no effect on a property with report = false",
			));
		}
		if property.setter.is_some() && !property.update {
			return Err(syn::Error::new_spanned(
				field,
				"`setter` has no effect on a property with update = false",
			));
		}
		Ok(Some(property))
	}
}
