// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{ItemFn, parse2};

use crate::syn_helpers::bail;

/// Shared codegen for `#[corio_rt::main]` and `#[corio_rt::test]`: wraps the body of an async fn
/// in a blocking call to a fresh `EventLoop`, since spec §4.1 gives every thread at most one loop
/// and that loop is created, not inherited from an ambient runtime.
pub fn common_codegen(item: TokenStream, test: bool) -> TokenStream {
    let mut input: ItemFn = match parse2(item.clone()) {
        Ok(v) => v,
        Err(e) => {
            return e.to_compile_error();
        }
    };

    let mut attrs = input.attrs;
    let vis = &input.vis;
    let sig = &mut input.sig;
    let body = &input.block;

    if sig.asyncness.is_none() {
        bail!(
            item,
            sig.fn_token,
            "function must be async to use this attribute"
        );
    }

    if !sig.inputs.is_empty() {
        bail!(
            item,
            &sig.inputs,
            "function annotated with this attribute must take no arguments"
        );
    }

    if test {
        attrs.push(syn::parse_quote!(#[::core::prelude::v1::test]));
    }

    sig.asyncness = None;

    quote! {
        #(#attrs)*
        #vis #sig {
            ::corio_rt::EventLoop::new().block_on(async move #body)
        }
    }
}

#[cfg(test)]
mod tests {
    use quote::quote;

    use super::*;
    use crate::syn_helpers::contains_compile_error;

    #[test]
    fn smoke_test_main() {
        let input = quote! {
            async fn main() {
                println!("Hello, world!");
            }
        };
        let output = common_codegen(input, false);
        assert!(!contains_compile_error(&output), "{output}");
    }

    #[test]
    fn smoke_test_test() {
        let input = quote! {
            async fn it_works() {
                assert_eq!(1 + 1, 2);
            }
        };
        let output = common_codegen(input, true);
        assert!(!contains_compile_error(&output), "{output}");
    }

    #[test]
    fn rejects_non_async_fn() {
        let input = quote! {
            fn main() {}
        };
        let output = common_codegen(input, false);
        assert!(contains_compile_error(&output));
    }

    #[test]
    fn rejects_arguments() {
        let input = quote! {
            async fn main(cx: SomeContext) {}
        };
        let output = common_codegen(input, false);
        assert!(contains_compile_error(&output));
    }
}
