use proc_macro::TokenStream;
use quote::quote;

#[proc_macro_derive(AccountData)]
pub fn account_data_derive(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    impl_account_data_derive(&ast)
}

fn impl_account_data_derive(ast: &syn::DeriveInput) -> TokenStream {
    let name = &ast.ident;
    let name_str = name.to_string();
    let quoted = quote! {
        impl AccountData for #name {
            const NAME: &'static str = #name_str;
        }
    };
    quoted.into()
}
