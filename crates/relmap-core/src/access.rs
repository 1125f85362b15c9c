//! Field accessor capability for mapped objects.
//!
//! Every mapped type implements [`FieldAccess`], usually through
//! `#[derive(Record)]`, plus [`RecordEvents`] for its lifecycle hooks.
//! Live objects are shared as [`ObjectRef`] handles so the identity cache,
//! relationship values and pending operations all point at the same
//! instance.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, ValidationError};
use crate::lazy::Faulting;
use crate::value::Value;

/// Outcome of assigning a property by key.
#[derive(Debug)]
pub enum Assign {
    /// The value was stored.
    Applied,
    /// The type has no property with that key.
    UnknownKey,
    /// The property exists but the value could not be converted.
    Rejected(Error),
}

impl Assign {
    pub const fn is_applied(&self) -> bool {
        matches!(self, Assign::Applied)
    }
}

/// A relationship property read by value.
#[derive(Debug, Clone)]
pub enum RelationValue {
    ToOne(Option<ObjectRef>),
    ToMany(Faulting),
}

/// A relationship property borrowed for mutation.
pub enum RelationSlot<'a> {
    ToOne(&'a mut Option<ObjectRef>),
    ToMany(&'a mut Faulting),
}

/// Get/set named properties on a mapped object.
///
/// Unknown keys are reported, never panicked on: `get_value` returns
/// `None` and `set_value` returns [`Assign::UnknownKey`].
pub trait FieldAccess {
    /// Scalar property keys in declaration order.
    fn field_keys(&self) -> &'static [&'static str];

    fn get_value(&self, key: &str) -> Option<Value>;

    fn set_value(&mut self, key: &str, value: Value) -> Assign;

    /// Current value of a relationship property.
    fn relation(&self, name: &str) -> Option<RelationValue> {
        let _ = name;
        None
    }

    /// Mutable access to a relationship property.
    fn relation_slot(&mut self, name: &str) -> Option<RelationSlot<'_>> {
        let _ = name;
        None
    }
}

/// Object-level lifecycle hooks. Every method defaults to a no-op.
///
/// ```ignore
/// impl RecordEvents for User {
///     fn validate_for_save(&self) -> Result<(), ValidationError> {
///         if self.name.is_empty() {
///             return Err(ValidationError::new("name is required"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait RecordEvents {
    /// Called once the insert statement for this object succeeded.
    fn awake_from_insert(&mut self) {}

    /// Called after the object was populated from a fetched row.
    fn awake_from_fetch(&mut self) {}

    /// Checked before each insert and update.
    fn validate_for_save(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Checked before each delete.
    fn validate_for_delete(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// A mapped domain object.
pub trait Record: FieldAccess + RecordEvents + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> Record for T
where
    T: FieldAccess + RecordEvents + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl fmt::Debug for dyn Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for key in self.field_keys() {
            map.entry(key, &self.get_value(key).unwrap_or(Value::Null));
        }
        map.finish()
    }
}

/// Shared handle to a live object.
pub type ObjectRef = Arc<RwLock<dyn Record>>;

/// Wrap a value in a shared handle.
pub fn object_ref<T: Record>(value: T) -> ObjectRef {
    Arc::new(RwLock::new(value))
}

pub fn read(object: &ObjectRef) -> RwLockReadGuard<'_, dyn Record> {
    object.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write(object: &ObjectRef) -> RwLockWriteGuard<'_, dyn Record> {
    object.write().unwrap_or_else(PoisonError::into_inner)
}

/// Borrow the object as its concrete type.
pub fn read_as<T: Record, R>(object: &ObjectRef, f: impl FnOnce(&T) -> R) -> Option<R> {
    let guard = read(object);
    guard.as_any().downcast_ref::<T>().map(f)
}

/// Mutably borrow the object as its concrete type.
pub fn write_as<T: Record, R>(object: &ObjectRef, f: impl FnOnce(&mut T) -> R) -> Option<R> {
    let mut guard = write(object);
    guard.as_any_mut().downcast_mut::<T>().map(f)
}

/// Read one property; unknown keys yield `None`.
pub fn get_value(object: &ObjectRef, key: &str) -> Option<Value> {
    read(object).get_value(key)
}

/// Assign one property, logging unknown keys and rejected values.
pub fn set_value(object: &ObjectRef, key: &str, value: Value) -> bool {
    match write(object).set_value(key, value) {
        Assign::Applied => true,
        Assign::UnknownKey => {
            tracing::warn!(key = key, "object has no property with this key");
            false
        }
        Assign::Rejected(e) => {
            tracing::warn!(key = key, error = %e, "property rejected value");
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Hand-written accessor used by tests inside this crate.
    #[derive(Default)]
    pub(crate) struct Probe {
        pub id: i64,
        pub name: Option<String>,
        pub parent: Option<ObjectRef>,
        pub children: Faulting,
    }

    impl FieldAccess for Probe {
        fn field_keys(&self) -> &'static [&'static str] {
            &["id", "name"]
        }

        fn get_value(&self, key: &str) -> Option<Value> {
            match key {
                "id" => Some(Value::from(self.id)),
                "name" => Some(Value::from(self.name.clone())),
                _ => None,
            }
        }

        fn set_value(&mut self, key: &str, value: Value) -> Assign {
            let result = match key {
                "id" => i64::try_from(value).map(|v| self.id = v),
                "name" => Option::<String>::try_from(value).map(|v| self.name = v),
                _ => return Assign::UnknownKey,
            };
            match result {
                Ok(()) => Assign::Applied,
                Err(e) => Assign::Rejected(e),
            }
        }

        fn relation(&self, name: &str) -> Option<RelationValue> {
            match name {
                "parent" => Some(RelationValue::ToOne(self.parent.clone())),
                "children" => Some(RelationValue::ToMany(self.children.clone())),
                _ => None,
            }
        }

        fn relation_slot(&mut self, name: &str) -> Option<RelationSlot<'_>> {
            match name {
                "parent" => Some(RelationSlot::ToOne(&mut self.parent)),
                "children" => Some(RelationSlot::ToMany(&mut self.children)),
                _ => None,
            }
        }
    }

    impl RecordEvents for Probe {}

    #[test]
    fn test_get_and_set_by_key() {
        let obj = object_ref(Probe::default());
        assert!(set_value(&obj, "id", Value::BigInt(9)));
        assert!(set_value(&obj, "name", Value::Text("n".into())));
        assert!(!set_value(&obj, "missing", Value::Null));
        assert!(!set_value(&obj, "id", Value::Text("x".into())));

        assert_eq!(get_value(&obj, "id"), Some(Value::BigInt(9)));
        assert_eq!(get_value(&obj, "missing"), None);
        assert_eq!(read_as::<Probe, _>(&obj, |p| p.name.clone()), Some(Some("n".into())));
    }

    #[test]
    fn test_downcast_and_debug() {
        let obj = object_ref(Probe {
            id: 3,
            ..Probe::default()
        });
        write_as::<Probe, _>(&obj, |p| p.id = 4);
        assert_eq!(read_as::<Probe, _>(&obj, |p| p.id), Some(4));

        let shown = format!("{:?}", &*read(&obj));
        assert!(shown.contains("\"id\": BigInt(4)"));
    }

    #[test]
    fn test_relation_slots() {
        let parent = object_ref(Probe::default());
        let child = object_ref(Probe::default());
        if let Some(RelationSlot::ToOne(slot)) = write(&child).relation_slot("parent") {
            *slot = Some(parent.clone());
        }
        match read(&child).relation("parent") {
            Some(RelationValue::ToOne(Some(p))) => assert!(Arc::ptr_eq(&p, &parent)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(read(&child).relation("nope").is_none());
    }
}
