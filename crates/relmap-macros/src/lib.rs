//! Procedural macros for relmap.
//!
//! `relmap-macros` is the **compile-time codegen layer**. `#[derive(Record)]`
//! turns a plain struct into a mapped type by generating its key-value
//! accessor table, so the session layer can read and assign properties by
//! name without reflection.
//!
//! These macros are used by application crates via the `relmap` facade.

use proc_macro::TokenStream;
use quote::quote;

mod parse;
mod validate;

use parse::{FieldRole, RecordDef, parse_record};

/// Derive macro for the `FieldAccess` trait (and, by default, an empty
/// `RecordEvents` impl), which together make the type a `Record`.
///
/// # Attributes
///
/// - `#[relmap(key = "name")]` - Property key (defaults to the field name)
/// - `#[relmap(to_one)]` - Field is a to-one relationship slot
/// - `#[relmap(to_many)]` - Field is a to-many relationship slot
/// - `#[relmap(skip)]` - Field is invisible to the mapping layer
/// - `#[relmap(custom_events)]` on the struct - Do not generate
///   `RecordEvents`; the type implements its hooks by hand
///
/// Unannotated fields of type `Faulting` are to-many slots and fields of
/// type `Option<ObjectRef>` are to-one slots. Every other field is a scalar
/// and must convert to and from `Value`.
///
/// # Example
///
/// ```ignore
/// use relmap::prelude::*;
///
/// #[derive(Record, Default)]
/// struct Team {
///     id: i64,
///     #[relmap(key = "teamName")]
///     name: Option<String>,
///     members: Faulting,
///     leader: Option<ObjectRef>,
/// }
/// ```
#[proc_macro_derive(Record, attributes(relmap))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let record = match parse_record(&input) {
        Ok(r) => r,
        Err(e) => return e.to_compile_error().into(),
    };

    if let Err(e) = validate::validate_record(&record) {
        return e.to_compile_error().into();
    }

    generate_record_impl(&record).into()
}

fn generate_record_impl(record: &RecordDef) -> proc_macro2::TokenStream {
    let name = &record.name;
    let (impl_generics, ty_generics, where_clause) = record.generics.split_for_impl();

    let keys: Vec<&str> = record.scalars().map(|f| f.key.as_str()).collect();
    let get_value = generate_get_value(record);
    let set_value = generate_set_value(record);
    let relations = generate_relations(record);

    let events = if record.custom_events {
        quote! {}
    } else {
        quote! {
            impl #impl_generics ::relmap_core::RecordEvents for #name #ty_generics #where_clause {}
        }
    };

    quote! {
        impl #impl_generics ::relmap_core::FieldAccess for #name #ty_generics #where_clause {
            fn field_keys(&self) -> &'static [&'static str] {
                &[#(#keys),*]
            }

            #get_value

            #set_value

            #relations
        }

        #events
    }
}

fn generate_get_value(record: &RecordDef) -> proc_macro2::TokenStream {
    let arms = record.scalars().map(|f| {
        let ident = &f.name;
        let key = &f.key;
        quote! {
            #key => ::core::option::Option::Some(::relmap_core::Value::from(
                ::core::clone::Clone::clone(&self.#ident),
            )),
        }
    });
    quote! {
        fn get_value(&self, key: &str) -> ::core::option::Option<::relmap_core::Value> {
            match key {
                #(#arms)*
                _ => ::core::option::Option::None,
            }
        }
    }
}

fn generate_set_value(record: &RecordDef) -> proc_macro2::TokenStream {
    let arms = record.scalars().map(|f| {
        let ident = &f.name;
        let key = &f.key;
        let ty = &f.ty;
        quote! {
            #key => <#ty as ::core::convert::TryFrom<::relmap_core::Value>>::try_from(value)
                .map(|v| self.#ident = v)
                .map_err(::core::convert::Into::into),
        }
    });
    quote! {
        fn set_value(&mut self, key: &str, value: ::relmap_core::Value) -> ::relmap_core::Assign {
            let result: ::core::result::Result<(), ::relmap_core::Error> = match key {
                #(#arms)*
                _ => return ::relmap_core::Assign::UnknownKey,
            };
            match result {
                ::core::result::Result::Ok(()) => ::relmap_core::Assign::Applied,
                ::core::result::Result::Err(e) => ::relmap_core::Assign::Rejected(e),
            }
        }
    }
}

fn generate_relations(record: &RecordDef) -> proc_macro2::TokenStream {
    if record.relations().next().is_none() {
        return quote! {};
    }

    let value_arms = record.relations().map(|f| {
        let ident = &f.name;
        let key = &f.key;
        let variant = relation_variant(f.role);
        quote! {
            #key => ::core::option::Option::Some(::relmap_core::RelationValue::#variant(
                ::core::clone::Clone::clone(&self.#ident),
            )),
        }
    });
    let slot_arms = record.relations().map(|f| {
        let ident = &f.name;
        let key = &f.key;
        let variant = relation_variant(f.role);
        quote! {
            #key => ::core::option::Option::Some(::relmap_core::RelationSlot::#variant(&mut self.#ident)),
        }
    });

    quote! {
        fn relation(&self, name: &str) -> ::core::option::Option<::relmap_core::RelationValue> {
            match name {
                #(#value_arms)*
                _ => ::core::option::Option::None,
            }
        }

        fn relation_slot(
            &mut self,
            name: &str,
        ) -> ::core::option::Option<::relmap_core::RelationSlot<'_>> {
            match name {
                #(#slot_arms)*
                _ => ::core::option::Option::None,
            }
        }
    }
}

fn relation_variant(role: FieldRole) -> proc_macro2::TokenStream {
    match role {
        FieldRole::ToMany => quote! { ToMany },
        _ => quote! { ToOne },
    }
}
