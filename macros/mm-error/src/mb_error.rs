//
// Copyright 2025 Tabs Data Inc.
//

extern crate proc_macro;

use proc_macro::TokenStream;

use quote::{format_ident, quote};
use syn::{ItemEnum, parse_macro_input};

pub fn mb_error_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as ItemEnum);

    let name = &input.ident;

    let discriminant_enum = format_ident!("{}Discriminants", name);

    let expanded = quote! {

        #[repr(u16)]
        #[derive(Debug, thiserror::Error, strum_macros::EnumDiscriminants)]
        #input

        impl #name {
            fn variant_index(&self) -> u16 {
               let discriminant: #discriminant_enum =  self.into();
                discriminant as u16
            }
        }

        impl mb_error::MbDomainError for #name {
            fn domain(&self) -> &'static str {
                stringify!(#name)
            }

            fn code(&self) -> String {
                format!("{}::{:04}", self.domain(), self.variant_index())
            }

            fn api_error(&self) -> mb_error::ApiError {
                mb_error::ApiError::from(self.variant_index())
            }
        }

        impl From<#name> for mb_error::MbError {
            fn from(error: #name) -> Self {
                Self::new(error)
            }
        }
    };
    expanded.into()
}
