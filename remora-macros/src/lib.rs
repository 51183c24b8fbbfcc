//! Procedural macros for the remora introspection transport.
//!
//! - `#[derive(Label)]`: Implements `remora::Label` for an enum, returning the
//!   variant name. Wire enums use it to show up readably in `tracing` output.
//!
//! Usage:
//! ```rust,ignore
//! use remora::Label;
//!
//! #[derive(Clone, Copy, Debug, Label)]
//! enum Direction { Inbound, Outbound(u8) }
//!
//! assert_eq!(Direction::Inbound.label(), "Inbound");
//! ```
use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

#[proc_macro_derive(Label)]
pub fn derive_label(input: TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ident = input.ident.clone();
    let generics = input.generics.clone();

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data_enum) => {
            let match_arms = data_enum.variants.iter().map(|variant| {
                let variant_ident = &variant.ident;
                let variant_name = variant_ident.to_string();

                let pattern = match &variant.fields {
                    Fields::Unit => quote! { Self::#variant_ident },
                    Fields::Unnamed(_) => quote! { Self::#variant_ident(..) },
                    Fields::Named(_) => quote! { Self::#variant_ident { .. } },
                };

                quote! {
                    #pattern => ::std::borrow::Cow::Borrowed(#variant_name)
                }
            });

            quote! {
                match self {
                    #(#match_arms),*
                }
            }
        }
        _ => {
            let name = ident.to_string();
            quote! { ::std::borrow::Cow::Borrowed(#name) }
        }
    };

    let expanded = quote! {
        impl #impl_generics remora::Label for #ident #ty_generics #where_clause {
            fn label(&self) -> ::std::borrow::Cow<'static, str> {
                #body
            }
        }
    };
    TokenStream::from(expanded)
}
