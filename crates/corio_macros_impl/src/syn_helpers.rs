// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! Helper functions for consuming and producing Rust syntax elements.

use proc_macro2::TokenStream;

/// Return compiler error with a message at the specified span.
/// Use this macro to return a compiler error from a function that returns `TokenStream`.
/// If there is an input token stream that you want to return as is
/// (for example, when mutating existing code by attribute macro), add it as a first macro argument.
///
/// ## Examples
/// ```ignore
/// # use proc_macro2::TokenStream;
/// use syn::Stmt;
/// # use corio_macros_impl::bail;
///
/// fn example() -> proc_macro2::TokenStream {
///     let span: Stmt = syn::parse_quote! { let x = 5; };
///     bail!(span, "This is a test error message.");
/// }
///
/// fn example2() -> proc_macro2::TokenStream {
///     let input_code = TokenStream::new();
///     let span: Stmt = syn::parse_quote! { let x = 5; };
///     bail!(input_code, span, "This is a test error message.");
///  }
///
/// # let result = example();
/// # let result = example2();
/// ```
///
macro_rules! bail {
    ($input:expr_2021, $span:expr_2021, $msg:expr_2021) => {{
        let error = ::syn::Error::new_spanned($span, $msg).to_compile_error();
        let input = $input;
        return ::quote::quote! {
            #input
            #error
        };
    }};
    ($span:expr_2021, $msg:expr_2021) => {{
        bail! { ::proc_macro2::TokenStream::new(), $span, $msg }
    }};
}
pub(crate) use bail;

/// Attempts to identify any compile-time error in the token stream. This is useful for unit
/// testing macros - if the macro is expected to produce a compile-time error, we can check
/// whether one exists.
///
/// We deliberately do not take an error message as input here. Testing for error messages is
/// fragile and creates maintenance headaches - be satisfied with OK/NOK testing and keep it simple.
#[cfg(test)]
#[must_use]
pub fn contains_compile_error(tokens: &TokenStream) -> bool {
    // String-based implementation, so vulnerable to false positives in very unlikely cases.
    tokens.to_string().contains(":: core :: compile_error ! {")
}

#[cfg(test)]
mod tests {
    use proc_macro2::Span;
    use quote::quote;

    use super::*;

    #[test]
    fn contains_compile_error_yes_raw() {
        let tokens = quote! {
            let foo = "Some random stuff may also be here";
            blah! { blah }
            ::core::compile_error! { "This is a test error message." };
            let bar = "More random stuff here"
        };

        assert!(contains_compile_error(&tokens));
    }

    #[test]
    fn contains_compile_error_no() {
        let tokens = quote! {
            let foo = "No compile error here!"
        };

        assert!(!contains_compile_error(&tokens));
    }

    #[cfg(not(miri))] // Miri is not compatible with insta, used by `bail!`.
    #[test]
    fn bail_snapshot_simple() {
        fn bail_simple() -> TokenStream {
            let span: syn::Stmt = syn::parse_quote! { let x = 5; };
            bail!(span, "This is a test error message.");
        }
        insta::assert_snapshot!(bail_simple(), @r#":: core :: compile_error ! { "This is a test error message." }"#);
    }

    #[cfg(not(miri))] // Miri is not compatible with insta, used by `bail!`.
    #[test]
    fn bail_snapshot_input() {
        fn bail_with_input() -> TokenStream {
            let input_code = quote! { let y = 10; };
            let span: syn::Stmt = syn::parse_quote! { let x = 5; };
            bail!(input_code, span, "This is a test error message.");
        }
        insta::assert_snapshot!(bail_with_input(), @r#"let y = 10 ; :: core :: compile_error ! { "This is a test error message." }"#);
    }

    #[test]
    fn span_placeholder_unused_import_guard() {
        // Keeps `Span` imported for the doc-comment example above without triggering an unused
        // warning if the bail! snapshots above are ever trimmed further.
        let _ = Span::call_site();
    }
}
