//! Identity, caching, fetching and the unit of work for relmap.
//!
//! `relmap-session` is the **runtime layer**. It keeps one live object per
//! row, remembers the last row seen for every identity, materializes query
//! results, and drains recorded changes in native transactions.
//!
//! # Role In The Architecture
//!
//! - **Identity**: [`EntityId`] is the canonical per-session identity of a
//!   row; equal key material yields the same allocation.
//! - **Snapshots and cache**: [`Snapshot`] keeps raw rows, [`EntityCache`]
//!   keeps live objects with per-entity expiry.
//! - **Ledgers**: a [`Session`] plus an [`Updater`] per model, driven
//!   through a [`Context`].
//! - **Hooks**: [`ContextDelegate`] observes fetches and commits and may veto
//!   deletes or reorder a batch.
//!
//! # Example
//!
//! ```ignore
//! let mut ctx = Context::builder(registry, |model: &Model| {
//!     Ok(Box::new(MemoryDatabase::new().connect()) as Box<dyn Connection>)
//! })
//! .config(ContextConfig::default())
//! .build();
//!
//! let team = ctx.find("Team", 1)?.expect("team 1");
//! let members = ctx.resolve_to_many(&team, "members")?;
//! ctx.delete(&members[0])?;
//! let summary = ctx.save_changes()?;
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod delegate;
pub mod entity_id;
pub mod groups;
pub mod operation;
mod query;
pub mod session;
pub mod snapshot;
pub mod updater;

pub use cache::{CacheConfig, Clock, EntityCache, ManualClock, SystemClock};
pub use config::{ConflictPolicy, ContextConfig};
pub use context::{Connector, Context, ContextBuilder};
pub use delegate::{ContextDelegate, NoDelegate};
pub use entity_id::{EntityId, IdentityKind};
pub use groups::{ContextGroup, ContextGroups, GroupMembership};
pub use operation::{Operation, OperationKind};
pub use session::{IsolationGuard, Session};
pub use snapshot::Snapshot;
pub use updater::{CommitSummary, Updater};
