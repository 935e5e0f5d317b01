//! Test attributes that fail a test instead of letting it hang.
//!
//! The body runs on a helper thread; the test thread waits for it with a
//! deadline and re-raises its panic, so a wedged negotiation shows up as a
//! failure naming the test.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// `async fn` run on a fresh current-thread tokio runtime.
    Tokio,
    /// Plain synchronous test.
    Sync,
}

/// Replaces `#[tokio::test]` on an async test: `#[tokio_timeout_test]` or
/// `#[tokio_timeout_test(10)]` for a ten second budget.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);
    expand(attr.into(), item, Flavor::Tokio)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Replaces `#[test]` on a synchronous test.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as ItemFn);
    expand(attr.into(), item, Flavor::Sync)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn parse_timeout(attr: TokenStream2) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse2(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(secs)
}

fn expand(attr: TokenStream2, item: ItemFn, flavor: Flavor) -> syn::Result<TokenStream2> {
    let secs = parse_timeout(attr)?;
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = item;

    match (flavor, sig.asyncness.is_some()) {
        (Flavor::Tokio, false) => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "tokio_timeout_test can only be applied to async functions",
            ));
        }
        (Flavor::Sync, true) => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "timeout attribute expects a synchronous test function",
            ));
        }
        _ => {}
    }
    sig.asyncness = None;

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_marker(attr))
        .collect();

    let run = match flavor {
        Flavor::Tokio => quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(deadline, async move #block)
                    .await
                    .expect("test timed out");
            });
        },
        Flavor::Sync => quote! { #block },
    };
    let name = sig.ident.to_string();

    Ok(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let deadline = std::time::Duration::from_secs(#secs);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::Builder::new()
                .name(#name.to_string())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        #run
                    }));
                    let _ = sender.send(result);
                })
                .expect("failed to spawn test thread");
            match receiver.recv_timeout(deadline) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test {} timed out after {:?}", #name, deadline)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

/// `#[test]` and `#[tokio::test]` are dropped; the expansion adds its own.
fn is_test_marker(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
