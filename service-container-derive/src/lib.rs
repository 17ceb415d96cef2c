//! Derive macros for service-container
//!
//! `#[derive(Constructible)]` generates the constructor metadata the
//! container uses to build a struct:
//!
//! - Fields marked `#[inject]` become constructor parameters, in field order.
//!   Their types must be injectable parameters: `Arc<T>`, `Options<T>` or
//!   `Option<Scope>`.
//! - All other fields are filled with `Default::default()`.
//! - `#[constructible(hint)]` on the struct marks the generated constructor
//!   with the injection hint.
//!
//! # Example
//!
//! ```rust,ignore
//! use service_container::{Constructible, Container, Options};
//! use std::sync::Arc;
//!
//! struct Database;
//!
//! #[derive(Default)]
//! struct CacheSettings {
//!     size: usize,
//! }
//!
//! #[derive(Constructible)]
//! struct UserService {
//!     #[inject]
//!     db: Arc<Database>,
//!     #[inject]
//!     cache: Options<CacheSettings>,
//!     // Non-injected fields use Default
//!     request_count: u64,
//! }
//!
//! // Generated:
//! // impl Constructible for UserService {
//! //     fn constructors() -> Vec<Constructor<Self>> {
//! //         vec![Constructor::new(|(db, cache): (Arc<Database>, Options<CacheSettings>)| {
//! //             UserService { db, cache, request_count: Default::default() }
//! //         })]
//! //     }
//! // }
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, parse_macro_input};

/// Derive macro for the `Constructible` trait.
///
/// # Attributes
///
/// - `#[inject]` - Resolve this field from the container.
/// - `#[constructible(hint)]` - Mark the generated constructor as the
///   designated injection constructor.
#[proc_macro_derive(Constructible, attributes(inject, constructible))]
pub fn derive_constructible(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_constructible(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_constructible(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            Fields::Unit => {
                return Ok(quote! {
                    impl #impl_generics ::service_container::Constructible for #name #ty_generics #where_clause {
                        fn constructors() -> ::std::vec::Vec<::service_container::Constructor<Self>> {
                            ::std::vec![::service_container::Constructor::new(|(): ()| #name)]
                        }
                    }
                });
            }
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Constructible can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Constructible can only be derived for structs",
            ));
        }
    };

    let hinted = parse_hint(&input.attrs)?;

    let mut param_types = Vec::new();
    let mut param_names = Vec::new();
    let mut field_inits = Vec::new();

    for (index, field) in fields.iter().enumerate() {
        let Some(field_name) = field.ident.as_ref() else {
            return Err(syn::Error::new_spanned(field, "expected a named field"));
        };

        if is_injected(&field.attrs)? {
            let binding = format_ident!("__param_{}", index);
            let field_type = &field.ty;
            param_types.push(quote! { #field_type });
            field_inits.push(quote! { #field_name: #binding });
            param_names.push(binding);
        } else {
            field_inits.push(quote! {
                #field_name: ::std::default::Default::default()
            });
        }
    }

    if param_types.len() > 12 {
        return Err(syn::Error::new_spanned(
            input,
            "Constructible supports at most 12 #[inject] fields",
        ));
    }

    let hint = if hinted {
        quote! { .hinted() }
    } else {
        quote! {}
    };

    Ok(quote! {
        impl #impl_generics ::service_container::Constructible for #name #ty_generics #where_clause {
            fn constructors() -> ::std::vec::Vec<::service_container::Constructor<Self>> {
                ::std::vec![
                    ::service_container::Constructor::new(
                        |(#(#param_names,)*): (#(#param_types,)*)| #name {
                            #(#field_inits),*
                        }
                    )
                    #hint
                ]
            }
        }
    })
}

/// Whether a field carries `#[inject]`
fn is_injected(attrs: &[Attribute]) -> syn::Result<bool> {
    for attr in attrs {
        if attr.path().is_ident("inject") {
            attr.meta.require_path_only()?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Parse `#[constructible(hint)]`
fn parse_hint(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut hinted = false;
    for attr in attrs {
        if !attr.path().is_ident("constructible") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("hint") {
                hinted = true;
                Ok(())
            } else {
                Err(meta.error("unsupported constructible attribute, expected `hint`"))
            }
        })?;
    }
    Ok(hinted)
}
