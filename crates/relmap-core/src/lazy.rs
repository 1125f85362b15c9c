//! Lazy to-many relationship values.
//!
//! A to-many property starts out as [`Faulting::Unloaded`] and becomes
//! [`Faulting::Loaded`] the first time somebody asks for its contents via
//! [`Faulting::resolve`]. Construction never runs a query.
//!
//! ```ignore
//! let members = team.members.resolve(|| ctx.fetch_members(&team))?;
//! for member in members { /* ... */ }
//! ```

use std::fmt;

use crate::Result;
use crate::access::ObjectRef;

/// A to-many relationship value: unresolved placeholder or loaded list.
#[derive(Clone, Default)]
pub enum Faulting {
    /// Nothing fetched yet.
    #[default]
    Unloaded,
    /// Destination objects, in fetch order.
    Loaded(Vec<ObjectRef>),
}

impl Faulting {
    /// Is this still an unresolved placeholder?
    pub const fn is_fault(&self) -> bool {
        matches!(self, Faulting::Unloaded)
    }

    /// Run `loader` if unresolved, then return the contents.
    ///
    /// The loader runs at most once: a loaded value is returned as is. On
    /// loader failure the value stays unresolved.
    pub fn resolve<F>(&mut self, loader: F) -> Result<&[ObjectRef]>
    where
        F: FnOnce() -> Result<Vec<ObjectRef>>,
    {
        if self.is_fault() {
            *self = Faulting::Loaded(loader()?);
        }
        Ok(self.loaded().unwrap_or_default())
    }

    /// Contents if already resolved.
    pub fn loaded(&self) -> Option<&[ObjectRef]> {
        match self {
            Faulting::Loaded(objects) => Some(objects),
            Faulting::Unloaded => None,
        }
    }

    pub fn set_loaded(&mut self, objects: Vec<ObjectRef>) {
        *self = Faulting::Loaded(objects);
    }

    /// Drop loaded contents so the next `resolve` queries again.
    pub fn turn_into_fault(&mut self) {
        *self = Faulting::Unloaded;
    }

    /// Append to loaded contents. An unresolved value is left alone; the
    /// object shows up once the relationship is resolved.
    pub fn push(&mut self, object: ObjectRef) {
        if let Faulting::Loaded(objects) = self {
            objects.push(object);
        }
    }

    /// Remove `object` (by identity) from loaded contents.
    pub fn remove(&mut self, object: &ObjectRef) -> bool {
        if let Faulting::Loaded(objects) = self {
            if let Some(pos) = objects.iter().position(|o| std::sync::Arc::ptr_eq(o, object)) {
                objects.remove(pos);
                return true;
            }
        }
        false
    }
}

impl fmt::Debug for Faulting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Faulting::Unloaded => write!(f, "Faulting::Unloaded"),
            Faulting::Loaded(objects) => write!(f, "Faulting::Loaded({} objects)", objects.len()),
        }
    }
}
