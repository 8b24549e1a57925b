//! Derive macro for device shadow state types
//!
//! `#[derive(ShadowState)]` declares every named field of a struct as a
//! shadow property, reported and updatable by default. Field attributes
//! adjust a property:
//!
//! - `#[shadow(skip)]`: not a property
//! - `#[shadow(name = "...")]`: property name in the shadow document
//! - `#[shadow(report = false)]` / `#[shadow(update = false)]`
//! - `#[shadow(getter = "method")]`: read through `fn(&self) -> T`
//! - `#[shadow(setter = "method")]`: write through `fn(&mut self, T)`
//!
//! ```rust,ignore
//! use mqtt_device_shadow::ShadowState;
//!
//! #[derive(ShadowState)]
//! struct Thermostat {
//! 	#[shadow(name = "targetTemp")]
//! 	target: f64,
//! 	#[shadow(update = false)]
//! 	current: f64,
//! 	#[shadow(skip)]
//! 	calibration: f64,
//! }
//! ```

mod analysis;
mod codegen;


use proc_macro::TokenStream;
use syn::parse_macro_input;

use crate::analysis::StateAnalysis;
use crate::codegen::CodeGenerator;

#[proc_macro_derive(ShadowState, attributes(shadow))]
pub fn derive_shadow_state(input: TokenStream) -> TokenStream {
	let input = parse_macro_input!(input as syn::DeriveInput);
	match StateAnalysis::analyze(&input) {
		| Ok(analysis) => CodeGenerator::new(analysis).generate(&input).into(),
		| Err(err) => err.to_compile_error().into(),
	}
}
