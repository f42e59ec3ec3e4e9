// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

use proc_macro2::TokenStream;

use super::entrypoint_common::common_codegen;

#[must_use]
#[cfg_attr(test, mutants::skip)] // Thin delegation, covered by entrypoint_common's own tests.
pub fn impl_main(item: TokenStream) -> TokenStream {
    common_codegen(item, false)
}
