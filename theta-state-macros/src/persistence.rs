// persistence.rs - Implementation module
use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, parse_macro_input};

/// Internal implementation of the PersistentState derive macro.
pub(crate) fn derive_persistent_state_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match generate_persistent_state_impl(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

/// Generates the implementation tokens for the PersistentState trait.
fn generate_persistent_state_impl(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "PersistentState can not be derived for generic types, implement it by hand",
        ));
    }

    let type_name = match find_type_name(input)? {
        Some(lit) => quote! { #lit },
        None => quote! {
            ::core::concat!(::core::module_path!(), "::", ::core::stringify!(#name))
        },
    };

    let expanded = quote! {
        impl ::theta_state::PersistentState for #name {
            const TYPE_NAME: &'static str = #type_name;
        }
    };

    Ok(expanded)
}

/// Finds the discriminator from the `#[state(type_name = "...")]` attribute.
fn find_type_name(input: &DeriveInput) -> syn::Result<Option<LitStr>> {
    let mut type_name = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("state") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("type_name") {
                let lit: LitStr = meta.value()?.parse()?;
                if lit.value().trim().is_empty() {
                    return Err(meta.error("type_name can not be empty"));
                }
                type_name = Some(lit);
                Ok(())
            } else {
                Err(meta.error("unsupported state attribute, expected `type_name`"))
            }
        })?;
    }

    Ok(type_name)
}
