//! Compile-time validation for the Record derive macro.

use std::collections::HashSet;

use syn::Error;

use crate::parse::{FieldRole, RecordDef};

/// Validate a parsed record definition.
///
/// Every problem is reported at once rather than failing on the first.
pub fn validate_record(record: &RecordDef) -> Result<(), Error> {
    let mut errors = Vec::new();

    if record.scalars().next().is_none() {
        errors.push(Error::new_spanned(
            &record.name,
            "Record needs at least one scalar property",
        ));
    }

    let mut seen = HashSet::new();
    for field in record.fields.iter().filter(|f| f.role != FieldRole::Skip) {
        if field.key.is_empty() {
            errors.push(Error::new_spanned(&field.name, "property key cannot be empty"));
        } else if !seen.insert(field.key.as_str()) {
            errors.push(Error::new_spanned(
                &field.name,
                format!("duplicate property key `{}`", field.key),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let mut combined = errors.remove(0);
        for err in errors {
            combined.combine(err);
        }
        Err(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_record;
    use syn::{DeriveInput, parse_quote};

    #[test]
    fn test_duplicate_keys() {
        let input: DeriveInput = parse_quote! {
            struct Dup {
                id: i64,
                #[relmap(key = "id")]
                other: i64,
            }
        };
        let err = validate_record(&parse_record(&input).unwrap()).unwrap_err();
        assert!(err.to_string().contains("duplicate property key `id`"));
    }

    #[test]
    fn test_needs_a_scalar() {
        let input: DeriveInput = parse_quote! {
            struct OnlyLinks {
                children: Faulting,
            }
        };
        assert!(validate_record(&parse_record(&input).unwrap()).is_err());
    }

    #[test]
    fn test_skipped_keys_ignored() {
        let input: DeriveInput = parse_quote! {
            struct Fine {
                id: i64,
                #[relmap(skip)]
                cache: Vec<u8>,
            }
        };
        assert!(validate_record(&parse_record(&input).unwrap()).is_ok());
    }
}
