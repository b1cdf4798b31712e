use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, FnArg, ItemFn, Pat, Type};

fn require_async(input: &ItemFn, attr: &str) -> syn::Result<()> {
    if input.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            input.sig.fn_token,
            format!("#[act_timing::{attr}] requires an async fn"),
        ));
    }
    Ok(())
}

/// The optional single argument that receives a fresh `ManualScheduler`.
fn scheduler_binding(input: &ItemFn) -> syn::Result<Option<(&Pat, &Type)>> {
    let mut inputs = input.sig.inputs.iter();
    let Some(arg) = inputs.next() else {
        return Ok(None);
    };
    if let Some(extra) = inputs.next() {
        return Err(syn::Error::new_spanned(
            extra,
            "expected at most one argument, the ManualScheduler",
        ));
    }
    match arg {
        FnArg::Typed(pat_type) => Ok(Some((&*pat_type.pat, &*pat_type.ty))),
        FnArg::Receiver(receiver) => Err(syn::Error::new_spanned(
            receiver,
            "test functions cannot take self",
        )),
    }
}

fn expand_test(input: &ItemFn) -> syn::Result<TokenStream2> {
    require_async(input, "test")?;
    let binding = scheduler_binding(input)?;

    let attrs = &input.attrs;
    let fn_name = &input.sig.ident;
    let output = &input.sig.output;
    let fn_block = &input.block;
    let setup = binding.map(|(pat, ty)| {
        quote! { let #pat: #ty = ::act_timing::ManualScheduler::new(); }
    });

    Ok(quote! {
        #[test]
        #(#attrs)*
        fn #fn_name() #output {
            ::act_timing::init_runtime();
            #setup
            ::act_timing::block_on(async move #fn_block)
        }
    })
}

fn expand_harness_test(input: &ItemFn) -> syn::Result<TokenStream2> {
    require_async(input, "harness_test")?;
    let binding = scheduler_binding(input)?;

    let fn_name = &input.sig.ident;
    let entry = format_ident!("__act_timing_entry_{}", fn_name);
    let call = if binding.is_some() {
        quote! { #fn_name(scheduler) }
    } else {
        quote! {{
            ::std::mem::drop(scheduler);
            #fn_name()
        }}
    };

    Ok(quote! {
        #input

        #[doc(hidden)]
        fn #entry(
            scheduler: ::act_timing::ManualScheduler,
        ) -> ::std::pin::Pin<::std::boxed::Box<dyn ::std::future::Future<Output = ()>>> {
            ::std::boxed::Box::pin(#call)
        }

        ::act_timing::inventory::submit! {
            ::act_timing::TestCase {
                name: ::std::stringify!(#fn_name),
                func: #entry,
            }
        }
    })
}

/// Attribute macro for async tests.
///
/// Expands to a `#[test]` that runs the body on the process runtime. A test
/// that takes one argument gets a `ManualScheduler` of its own:
///
/// ```ignore
/// #[act_timing::test]
/// async fn drains(scheduler: act_timing::ManualScheduler) {
///     scheduler.run_until_stalled();
/// }
/// ```
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    expand_test(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Attribute macro registering an async test with the custom harness.
///
/// Use in test targets with `harness = false` that end with
/// `act_timing::test_main!()`.
#[proc_macro_attribute]
pub fn harness_test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    expand_harness_test(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
