// Copyright (C) Microsoft Corporation. All rights reserved.

//! `#[test]` attribute that initializes tracing and runs the test body inside
//! a span named after the test.

use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::*;

/// Replacement for `#[test]`.
///
/// The wrapped function keeps its signature (including any `Result` return
/// type) and its other attributes such as `#[should_panic]` or `#[ignore]`.
///
/// # Errors
///
/// Emits a compile error if the function is `async` or takes arguments.
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);
    make_test(item)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn make_test(item: ItemFn) -> syn::Result<proc_macro2::TokenStream> {
    if item.sig.asyncness.is_some() {
        return Err(Error::new(
            item.sig.fn_token.span(),
            "test function must not be async",
        ));
    }
    if !item.sig.inputs.is_empty() {
        return Err(Error::new(item.sig.inputs.span(), "expected 0 arguments"));
    }

    let name = &item.sig.ident;
    let return_type = &item.sig.output;
    let attrs = &item.attrs;
    let body = &item.block;

    Ok(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        fn #name() #return_type {
            ::test_with_tracing::init();
            let span = ::tracing::span!(::tracing::Level::INFO, stringify!(#name));
            let _span_guard = span.enter();
            #body
        }
    })
}
