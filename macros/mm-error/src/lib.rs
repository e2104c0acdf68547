//
// Copyright 2025 Tabs Data Inc.
//

extern crate proc_macro;
use crate::mb_error::mb_error_impl;
use proc_macro::TokenStream;

mod mb_error;

/// Macro that generates required impls for a minibase error enum.
#[proc_macro_attribute]
pub fn mb_error(_args: TokenStream, item: TokenStream) -> TokenStream {
    mb_error_impl(item)
}
