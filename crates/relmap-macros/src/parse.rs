//! Parsing logic for the Record derive macro.
//!
//! This module extracts struct-level and field-level `#[relmap(...)]`
//! attributes from the derive input to build the `RecordDef` and `FieldDef`
//! structures used for code generation.

use proc_macro2::Span;
use syn::{Attribute, Data, DeriveInput, Error, Field, Fields, Generics, Ident, Lit, Result, Type};

/// Parsed struct definition.
#[derive(Debug)]
pub struct RecordDef {
    pub name: Ident,
    pub generics: Generics,
    pub fields: Vec<FieldDef>,
    /// The user writes `impl RecordEvents` by hand.
    pub custom_events: bool,
}

/// How a struct field takes part in key-value access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Scalar property converted through `Value`.
    Scalar,
    /// `Option<ObjectRef>` holding the destination of a to-one relationship.
    ToOne,
    /// `Faulting` holding the destinations of a to-many relationship.
    ToMany,
    /// Invisible to the mapping layer.
    Skip,
}

#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    /// Property key; defaults to the field name.
    pub key: String,
    pub ty: Type,
    pub role: FieldRole,
}

impl RecordDef {
    pub fn scalars(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.role == FieldRole::Scalar)
    }

    pub fn relations(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| matches!(f.role, FieldRole::ToOne | FieldRole::ToMany))
    }
}

/// Parse a `DeriveInput` into a `RecordDef`.
pub fn parse_record(input: &DeriveInput) -> Result<RecordDef> {
    let custom_events = parse_struct_attrs(&input.attrs)?;
    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Record can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Record can only be derived for structs, not unions",
            ));
        }
    };

    Ok(RecordDef {
        name: input.ident.clone(),
        generics: input.generics.clone(),
        fields,
        custom_events,
    })
}

/// Parse struct-level `#[relmap(...)]` attributes. Only `custom_events` is
/// recognized.
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<bool> {
    let mut custom_events = false;
    for attr in attrs {
        if !attr.path().is_ident("relmap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("custom_events") {
                custom_events = true;
                Ok(())
            } else {
                Err(meta.error("unknown relmap attribute; expected `custom_events`"))
            }
        })?;
    }
    Ok(custom_events)
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Record requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Record requires a struct with fields, not a unit struct",
        )),
    }
}

#[derive(Default)]
struct FieldAttrs {
    key: Option<String>,
    to_one: bool,
    to_many: bool,
    skip: bool,
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let attrs = parse_field_attrs(&field.attrs)?;

    let role = if attrs.skip {
        if attrs.to_one || attrs.to_many || attrs.key.is_some() {
            return Err(Error::new_spanned(
                &name,
                "`skip` cannot be combined with other relmap attributes",
            ));
        }
        FieldRole::Skip
    } else {
        match (attrs.to_one, attrs.to_many) {
            (true, true) => {
                return Err(Error::new_spanned(
                    &name,
                    "a field cannot be both `to_one` and `to_many`",
                ));
            }
            (true, false) => FieldRole::ToOne,
            (false, true) => FieldRole::ToMany,
            (false, false) => detect_role(&field.ty),
        }
    };

    Ok(FieldDef {
        key: attrs.key.unwrap_or_else(|| name.to_string()),
        name,
        ty: field.ty.clone(),
        role,
    })
}

fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut result = FieldAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("relmap") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("to_one") {
                result.to_one = true;
            } else if path.is_ident("to_many") {
                result.to_many = true;
            } else if path.is_ident("skip") {
                result.skip = true;
            } else if path.is_ident("key") {
                let value: Lit = meta.value()?.parse()?;
                if let Lit::Str(lit_str) = value {
                    result.key = Some(lit_str.value());
                } else {
                    return Err(Error::new_spanned(
                        value,
                        "expected string literal for property key",
                    ));
                }
            } else {
                return Err(meta.error(
                    "unknown relmap attribute; expected `key`, `to_one`, `to_many` or `skip`",
                ));
            }
            Ok(())
        })?;
    }
    Ok(result)
}

/// Infer the role of an unannotated field from its type: `Faulting` is a
/// to-many slot, `Option<ObjectRef>` a to-one slot, anything else a scalar.
pub fn detect_role(ty: &Type) -> FieldRole {
    match last_segment(ty) {
        Some(segment) if segment.ident == "Faulting" => FieldRole::ToMany,
        Some(segment) if segment.ident == "Option" => match option_inner(segment) {
            Some(inner) if last_segment(inner).is_some_and(|s| s.ident == "ObjectRef") => {
                FieldRole::ToOne
            }
            _ => FieldRole::Scalar,
        },
        _ => FieldRole::Scalar,
    }
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(type_path) => type_path.path.segments.last(),
        _ => None,
    }
}

fn option_inner(segment: &syn::PathSegment) -> Option<&Type> {
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        syn::GenericArgument::Type(ty) => Some(ty),
        _ => None,
    })
}
