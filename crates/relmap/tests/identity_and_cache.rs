//! Identity de-duplication, object cache expiry and snapshot lookups.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use relmap::prelude::*;
use relmap::{ConflictPolicy, ManualClock, QuerySpecification};

#[test]
fn test_primary_key_round_trip() {
    let registry = registry(Schema::default());
    let entity = registry.entity_named("Book").unwrap();

    let mut book = Book::default();
    let pk = RowId::single("id", 77i64);
    assert!(entity.set_primary_key_for_object(&pk, &mut book));
    assert_eq!(book.id, Some(77));
    assert_eq!(entity.primary_key_for_object(&book), pk);
}

#[test]
fn test_repeated_fetches_share_identity_and_instance() {
    let db = database();
    seed_library(&db);
    let mut ctx = context(&db);

    let first = ctx.execute_query(&QuerySpecification::all("Book")).unwrap();
    let second = ctx
        .execute_query(&QuerySpecification::filter("Book", Predicate::gte("pages", 200)))
        .unwrap();
    assert_eq!(book_ids(&second), [10, 12]);
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert!(Arc::ptr_eq(&first[2], &second[1]));

    let a = ctx.entity_id_for_object(&first[0]).unwrap();
    let b = ctx.entity_id_for_object(&second[0]).unwrap();
    let other = ctx.entity_id_for_object(&first[1]).unwrap();
    assert!(a.ptr_eq(&b));
    assert_ne!(a, other);
    assert_eq!(ctx.session("library").unwrap().identity_count(), 4);
}

#[test]
fn test_insert_then_fetch_returns_inserted_instance() {
    let db = database();
    let mut ctx = context(&db);

    let book = object_ref(Book {
        title: "Roadside Picnic".into(),
        pages: 224,
        ..Book::default()
    });
    ctx.insert(&book).unwrap();
    let summary = ctx.save_changes().unwrap();
    assert_eq!(summary.inserted, 1);

    // The sequence assigned the key.
    assert_eq!(read_as::<Book, _>(&book, |b| b.id), Some(Some(100)));
    assert_eq!(
        dml(&db),
        [
            "select nextval('books_seq')",
            "INSERT INTO books (ID,TITLE,PAGES,AUTHOR_ID) values (100,'Roadside Picnic',224,NULL)",
        ]
    );

    let found = ctx.find("Book", 100i64).unwrap().unwrap();
    assert!(Arc::ptr_eq(&found, &book));

    // A fresh context sees a value-equal copy from the database.
    let mut fresh = context(&db);
    let copy = fresh.find("Book", 100i64).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&copy, &book));
    let values = |o: &ObjectRef| read_as::<Book, _>(o, |b| (b.id, b.title.clone(), b.pages, b.author_id));
    assert_eq!(values(&copy), values(&book));
}

fn same_instance_after(strategy: CacheStrategy, wait: Duration) -> bool {
    let db = database();
    seed_gadgets(&db);
    let clock = Arc::new(ManualClock::new());
    let schema = Schema {
        gadget_cache: strategy,
        ..Schema::default()
    };
    let mut ctx = builder(&db, schema, &clock).build();

    let first = ctx.find("Gadget", 1i64).unwrap().unwrap();
    clock.advance(wait);
    let second = ctx.find("Gadget", 1i64).unwrap().unwrap();
    Arc::ptr_eq(&first, &second)
}

#[test]
fn test_cache_strategies_expire_in_order() {
    assert!(same_instance_after(CacheStrategy::Normal, Duration::from_secs(10)));
    assert!(!same_instance_after(CacheStrategy::Normal, Duration::from_secs(60)));
    assert!(same_instance_after(CacheStrategy::DistantFuture, Duration::from_secs(60)));
    assert!(same_instance_after(CacheStrategy::DistantFuture, Duration::from_secs(3600)));
    assert!(!same_instance_after(CacheStrategy::None, Duration::ZERO));
}

#[test]
fn test_uncached_entity_is_never_served_from_cache() {
    let db = database();
    seed_gadgets(&db);
    let clock = Arc::new(ManualClock::new());
    let schema = Schema {
        gadget_cache: CacheStrategy::None,
        ..Schema::default()
    };
    let mut ctx = builder(&db, schema, &clock).build();

    let gadget = ctx.find("Gadget", 2i64).unwrap().unwrap();
    let id = ctx.cache(&gadget).unwrap().unwrap();
    let session = ctx.session("library").unwrap();
    assert!(session.cached_object(&id).is_none());
    assert!(session.cache().is_empty());
}

#[test]
fn test_expired_entries_are_swept() {
    let db = database();
    seed_gadgets(&db);
    let clock = Arc::new(ManualClock::new());
    let mut ctx = builder(&db, Schema::default(), &clock).build();

    assert_eq!(ctx.execute_query(&QuerySpecification::all("Gadget")).unwrap().len(), 5);
    let cache = ctx.cache_for("library").unwrap();
    assert_eq!(cache.len(), 5);
    assert_eq!(cache.clear_expired_records(), 0);

    clock.advance(Duration::from_secs(31));
    assert_eq!(cache.clear_expired_records(), 5);
    assert!(cache.is_empty());
}

#[test]
fn test_cached_object_avoids_a_query() {
    let db = database();
    seed_gadgets(&db);
    let mut ctx = context(&db);

    let fetched = ctx.find("Gadget", 3i64).unwrap().unwrap();
    let queries = db.statements().len();
    let cached = ctx
        .cached_object("Gadget", &RowId::single("id", 3i64))
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&fetched, &cached));
    assert_eq!(db.statements().len(), queries);

    // A miss goes to the database.
    let missed = ctx
        .cached_object("Gadget", &RowId::single("id", 4i64))
        .unwrap()
        .unwrap();
    assert_eq!(read_as::<Gadget, _>(&missed, |g| g.stock), Some(Some(12)));
    assert_eq!(db.statements().len(), queries + 1);
}

#[test]
fn test_reload_refreshes_in_place() {
    let db = database();
    seed_gadgets(&db);
    let mut ctx = context(&db);

    let anvil = ctx.find("Gadget", 1i64).unwrap().unwrap();
    db.execute_raw("UPDATE gadgets SET NAME='heavy anvil' WHERE ID=1").unwrap();

    // The cached instance is served unchanged until reloaded.
    let again = ctx.find("Gadget", 1i64).unwrap().unwrap();
    assert_eq!(read_as::<Gadget, _>(&again, |g| g.name.clone()), Some(Some("anvil".into())));

    assert!(ctx.reload(&anvil).unwrap());
    assert_eq!(
        read_as::<Gadget, _>(&anvil, |g| g.name.clone()),
        Some(Some("heavy anvil".into()))
    );
    let snapshot = ctx
        .snapshot_for_values("Gadget", [("id", Value::BigInt(1))])
        .unwrap();
    assert_eq!(snapshot.get("NAME"), Some(&Value::Text("heavy anvil".into())));

    db.execute_raw("DELETE FROM gadgets WHERE ID=1").unwrap();
    assert!(!ctx.reload(&anvil).unwrap());
    let id = ctx.entity_id_for_object(&anvil).unwrap();
    assert!(ctx.session("library").unwrap().cached_object(&id).is_none());
}

#[test]
fn test_objects_rebuilt_from_snapshots() {
    let db = database();
    seed_gadgets(&db);
    let mut ctx = context(&db);

    let rows = ctx.raw_rows(&QuerySpecification::all("Gadget")).unwrap();
    assert_eq!(rows.len(), 5);
    assert!(ctx.session("library").unwrap().cache().is_empty());

    let snapshot = ctx
        .snapshot_for_predicate("Gadget", &Predicate::starts_with("name", "giant"))
        .unwrap();
    let queries = db.statements().len();
    let magnet = ctx.object_from_snapshot(&snapshot).unwrap().unwrap();
    assert_eq!(db.statements().len(), queries);
    assert_eq!(
        read_as::<Gadget, _>(&magnet, Gadget::clone),
        Some(gadgets()[3].clone())
    );

    // The rebuilt object is now the cached one.
    let found = ctx.find("Gadget", 4i64).unwrap().unwrap();
    assert!(Arc::ptr_eq(&found, &magnet));

    assert!(ctx.snapshot_for_values("Gadget", [("stock", Value::Int(99))]).is_none());
}

#[test]
fn test_context_config_from_json() {
    let config: ContextConfig = serde_json::from_str(
        r#"{
            "auto_commit": true,
            "conflict_policy": "Raise",
            "cache": { "short_life": { "secs": 5, "nanos": 0 } }
        }"#,
    )
    .unwrap();
    assert!(config.auto_commit);
    assert_eq!(config.conflict_policy, ConflictPolicy::Raise);
    assert_eq!(config.cache.short_life, Duration::from_secs(5));
    assert_eq!(config.cache.distant_future, Duration::from_secs(24 * 60 * 60));

    let db = database();
    seed_gadgets(&db);
    let clock = Arc::new(ManualClock::new());
    let mut ctx = builder(&db, Schema::default(), &clock).config(config).build();
    let first = ctx.find("Gadget", 5i64).unwrap().unwrap();
    clock.advance(Duration::from_secs(6));
    let second = ctx.find("Gadget", 5i64).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}
