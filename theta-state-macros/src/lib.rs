// lib.rs - Root of macro crate
use proc_macro::TokenStream;

mod persistence;

/// Implement `theta_state::PersistentState` for a struct or enum.
///
/// The type discriminator defaults to `module_path!()::TypeName`. Pin it with
/// `#[state(type_name = "...")]` to keep stored documents valid across renames.
#[proc_macro_derive(PersistentState, attributes(state))]
pub fn derive_persistent_state(input: TokenStream) -> TokenStream {
    persistence::derive_persistent_state_impl(input)
}
