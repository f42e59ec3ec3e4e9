// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! <div class="warning">This crate is a private dependency of <b>corio_rt</b>. You should never
//! add this as a direct dependency.</div>

#![doc(hidden)]
#![doc(html_no_source)]

use proc_macro::TokenStream;

/// Wraps an async `fn main` in a fresh [`EventLoop`](../corio_rt/struct.EventLoop.html) and
/// blocks on it.
#[proc_macro_attribute]
pub fn main(_attr: TokenStream, item: TokenStream) -> TokenStream {
    corio_macros_impl::runtime::impl_main(item.into()).into()
}

/// Wraps an async test function in a fresh [`EventLoop`](../corio_rt/struct.EventLoop.html) and
/// registers it as a `#[test]`.
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    corio_macros_impl::runtime::impl_test(item.into()).into()
}
