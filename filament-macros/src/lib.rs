//! Entry-point attributes for the filament runtime.
//!
//! Both attributes turn an `async fn` into a plain function that builds a
//! runtime and blocks on the body:
//!
//! ```rust,ignore
//! #[filament::main(worker_threads = 4)]
//! async fn main() {
//!     filament::spawn(async { /* ... */ }).await;
//! }
//! ```

mod args;
use args::RuntimeArgs;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Error, ItemFn, parse_macro_input};

#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as RuntimeArgs);
    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return Error::new_spanned(
            input.sig.fn_token,
            "#[filament::main] must be used on an async function",
        )
        .to_compile_error()
        .into();
    }

    if input.sig.ident != "main" {
        return Error::new_spanned(&input.sig.ident, "#[filament::main] must be used on fn main")
            .to_compile_error()
            .into();
    }

    expand(args, input, quote!()).into()
}

#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as RuntimeArgs);
    let input = parse_macro_input!(item as ItemFn);

    if input.sig.asyncness.is_none() {
        return Error::new_spanned(
            input.sig.fn_token,
            "#[filament::test] must be used on an async function",
        )
        .to_compile_error()
        .into();
    }

    if !input.sig.inputs.is_empty() {
        return Error::new_spanned(&input.sig.inputs, "test functions take no arguments")
            .to_compile_error()
            .into();
    }

    expand(args, input, quote!(#[::core::prelude::v1::test])).into()
}

fn expand(args: RuntimeArgs, input: ItemFn, marker: TokenStream2) -> TokenStream2 {
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = input;
    sig.asyncness = None;

    let worker_threads = args
        .worker_threads
        .map(|n| quote!(.worker_threads(#n)));

    quote! {
        #marker
        #(#attrs)*
        #vis #sig {
            ::filament::RuntimeBuilder::new()
                #worker_threads
                .build()
                .expect("failed to build filament runtime")
                .block_on(async move #block)
        }
    }
}
