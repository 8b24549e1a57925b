//! Code generation logic
//!
//! Turns a [`StateAnalysis`] into a `ShadowState` implementation that builds
//! the property map through the raw JSON accessors of `PropertyMapBuilder`.

use quote::quote;

use crate::analysis::{PropertyDef, StateAnalysis};

/// Generates the `ShadowState` implementation of one struct
pub struct CodeGenerator {
	analysis: StateAnalysis,
}

impl CodeGenerator {
	pub fn new(analysis: StateAnalysis) -> Self {
		Self { analysis }
	}

	pub fn generate(&self, input: &syn::DeriveInput) -> proc_macro2::TokenStream {
		let name = &input.ident;
		let (impl_generics, ty_generics, where_clause) =
			input.generics.split_for_impl();
		let reported = self
			.analysis
			.properties
			.iter()
			.filter(|p| p.report)
			.map(Self::generate_reported);
		let updatable = self
			.analysis
			.properties
			.iter()
			.filter(|p| p.update)
			.map(Self::generate_updatable);

		quote! {
			impl #impl_generics ::mqtt_device_shadow::ShadowState for #name #ty_generics #where_clause {
				fn shadow_properties() -> ::mqtt_device_shadow::PropertyMap<Self> {
					::mqtt_device_shadow::PropertyMap::<Self>::builder()
						#(#reported)*
						#(#updatable)*
						.build()
				}
			}
		}
	}

	fn generate_reported(property: &PropertyDef) -> proc_macro2::TokenStream {
		let wire_name = &property.wire_name;
		let read = match &property.getter {
			| Some(getter) => quote! { &state.#getter() },
			| None => {
				let field = &property.field;
				quote! { &state.#field }
			}
		};
		quote! {
			.reported_with(#wire_name, |state: &Self| {
				::mqtt_device_shadow::shadow::property::to_value(#read)
			})
		}
	}

	fn generate_updatable(property: &PropertyDef) -> proc_macro2::TokenStream {
		let wire_name = &property.wire_name;
		let write = match &property.setter {
			| Some(setter) => quote! {
				state.#setter(::mqtt_device_shadow::shadow::property::from_value(value)?);
			},
			| None => {
				let field = &property.field;
				quote! {
					state.#field = ::mqtt_device_shadow::shadow::property::from_value(value)?;
				}
			}
		};
		quote! {
			.updatable_with(#wire_name, |state: &mut Self, value| {
				#write
				::core::result::Result::Ok(())
			})
		}
	}
}
