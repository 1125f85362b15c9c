//! Named groups of contexts.
//!
//! A context joins a group through [`ContextGroups::join`] and holds the
//! returned [`GroupMembership`] for its lifetime. Dropping the membership
//! unregisters the context; [`ContextGroups::gc`] drops groups nobody is a
//! member of any more.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

static NEXT_MEMBER: AtomicU64 = AtomicU64::new(1);

/// One named group and its live members.
#[derive(Debug)]
pub struct ContextGroup {
    name: Option<String>,
    members: Mutex<HashSet<u64>>,
    save_count: AtomicU64,
}

impl ContextGroup {
    fn new(name: Option<String>) -> Self {
        Self {
            name,
            members: Mutex::new(HashSet::new()),
            save_count: AtomicU64::new(0),
        }
    }

    /// `None` for an anonymous group.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Successful saves by any member.
    pub fn save_count(&self) -> u64 {
        self.save_count.load(Ordering::Relaxed)
    }

    fn add_member(&self, member: u64) {
        self.members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member);
    }

    pub(crate) fn record_save(&self) {
        self.save_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Registry of named context groups.
#[derive(Debug, Default)]
pub struct ContextGroups {
    groups: Mutex<HashMap<String, Arc<ContextGroup>>>,
}

impl ContextGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new member of the group `name`, creating the group on
    /// first use. `None` gives a private group that is not registered.
    pub fn join(&self, name: Option<&str>) -> GroupMembership {
        self.gc();
        let member = NEXT_MEMBER.fetch_add(1, Ordering::Relaxed);
        let group = match name {
            Some(name) => {
                // The member goes in under the registry lock, so `gc` never
                // sees the group empty in between.
                let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
                let group = groups
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(ContextGroup::new(Some(name.to_string()))));
                group.add_member(member);
                Arc::clone(group)
            }
            None => {
                let group = Arc::new(ContextGroup::new(None));
                group.add_member(member);
                group
            }
        };
        tracing::debug!(group = ?group.name(), member = member, "joined context group");
        GroupMembership { group, member }
    }

    pub fn group(&self, name: &str) -> Option<Arc<ContextGroup>> {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Drop every group without members. Returns how many were dropped.
    pub fn gc(&self) -> usize {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let before = groups.len();
        groups.retain(|_, group| group.member_count() > 0);
        let dropped = before - groups.len();
        if dropped > 0 {
            tracing::debug!(dropped = dropped, "empty context groups dropped");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A context's place in a group. Unregisters on drop.
#[derive(Debug)]
pub struct GroupMembership {
    group: Arc<ContextGroup>,
    member: u64,
}

impl GroupMembership {
    pub fn group(&self) -> &Arc<ContextGroup> {
        &self.group
    }
}

impl Drop for GroupMembership {
    fn drop(&mut self) {
        self.group
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.member);
        tracing::debug!(group = ?self.group.name(), member = self.member, "left context group");
    }
}
