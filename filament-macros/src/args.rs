use proc_macro2::Span;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Error, Expr, ExprLit, Lit, LitInt, MetaNameValue, Token};

/// Arguments of `#[filament::main(...)]` and `#[filament::test(...)]`.
#[derive(Default)]
pub(crate) struct RuntimeArgs {
    pub(crate) worker_threads: Option<LitInt>,
}

impl Parse for RuntimeArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = RuntimeArgs::default();

        let pairs = Punctuated::<MetaNameValue, Token![,]>::parse_terminated(input)?;
        for pair in pairs {
            let Some(name) = pair.path.get_ident() else {
                return Err(Error::new_spanned(&pair.path, "expected `worker_threads = N`"));
            };

            match name.to_string().as_str() {
                "worker_threads" => {
                    let Expr::Lit(ExprLit {
                        lit: Lit::Int(value),
                        ..
                    }) = &pair.value
                    else {
                        return Err(Error::new_spanned(
                            &pair.value,
                            "worker_threads must be an integer literal",
                        ));
                    };

                    if value.base10_parse::<usize>()? == 0 {
                        return Err(Error::new_spanned(value, "worker_threads must be > 0"));
                    }
                    if args.worker_threads.is_some() {
                        return Err(Error::new(Span::call_site(), "worker_threads given twice"));
                    }

                    args.worker_threads = Some(value.clone());
                }
                other => {
                    return Err(Error::new_spanned(
                        name,
                        format!("unknown argument `{other}`, expected `worker_threads`"),
                    ));
                }
            }
        }

        Ok(args)
    }
}
