// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use proc_macro2::TokenStream;

use super::entrypoint_common::common_codegen;

#[must_use]
#[cfg_attr(test, mutants::skip)] // Thin delegation, covered by entrypoint_common's own tests.
pub fn impl_test(item: TokenStream) -> TokenStream {
    common_codegen(item, true)
}

#[cfg(not(miri))] // Insta does not work under Miri.
#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use quote::quote;

    use super::*;

    #[test]
    fn test() {
        let input = quote! {
            async fn it_works() {
                assert_eq!(1 + 1, 2);
            }
        };
        let result = impl_test(input);
        let result_file = syn::parse_file(&result.to_string()).unwrap();
        assert_snapshot!(prettyplease::unparse(&result_file), @r#"
        #[::core::prelude::v1::test]
        fn it_works() {
            ::corio_rt::EventLoop::new()
                .block_on(async move { assert_eq!(1 + 1, 2); })
        }
        "#);
    }
}
