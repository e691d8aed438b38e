use proc_macro::TokenStream;
use quote::quote_spanned;
use syn::{Expr, ItemFn, LitByteStr, Path, parse_macro_input, parse_quote, spanned::Spanned};

/// Turns a function into a test that runs its body as the first thread of a
/// freshly booted kernel.
///
/// The machine comes from `grading::TestDriver::new()`, or from the driver
/// function named in the attribute: `#[kernel_test(my_driver)]`. Attributes
/// below this one apply to the body.
#[proc_macro_attribute]
pub fn kernel_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let driver: Expr = if attr.is_empty() {
        parse_quote!(grading::TestDriver::new())
    } else {
        let path = parse_macro_input!(attr as Path);
        parse_quote!(#path())
    };
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let (outer, inner): (Vec<_>, Vec<_>) = std::mem::take(&mut input_fn.attrs)
        .into_iter()
        .partition(|a| a.path.is_ident("should_panic") || a.path.is_ident("ignore"));
    let block = *input_fn.block;
    *input_fn.block = parse_quote! {
        {
            #(#inner)*
            fn _body() #block
            #driver.run(_body).assert_halted();
        }
    };
    input_fn.attrs = outer;
    input_fn.attrs.insert(0, parse_quote!(#[test]));
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

#[proc_macro_attribute]
pub fn stdin(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(attr as LitByteStr);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = parse_quote! {
        {
            kmips::thread::Current::kernel().machine().console().push_input(#input);
            {
                #block
            }
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

#[proc_macro_attribute]
pub fn assert_output(attr: TokenStream, item: TokenStream) -> TokenStream {
    let output = parse_macro_input!(attr as LitByteStr);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = parse_quote! {
        {
            let _return_val = (move || { #block })();
            let output = kmips::thread::Current::kernel().machine().console().output();
            assert_eq!(
                String::from_utf8_lossy(&output),
                String::from_utf8_lossy(#output)
            );
            _return_val
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

/// Checks that the body gives back every physical frame it took.
#[proc_macro_attribute]
pub fn validate_frames(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = parse_quote! {
        {
            let _frames = kmips_userprog::UserKernel::current()
                .expect("No user-process layer is attached to the kernel.");
            let _free = _frames.frames().free_count();
            let _return_val = (move || { #block })();
            assert_eq!(_frames.frames().free_count(), _free, "physical frames leaked");
            _return_val
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}
