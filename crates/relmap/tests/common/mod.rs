//! Shared fixture for the end-to-end tests: a small library schema, a
//! vehicle hierarchy and a gadget table, all served by a memory database.

#![allow(dead_code)]

use std::sync::Arc;

use relmap::prelude::*;
use relmap::{ContextBuilder, ManualClock, SequenceKeyGenerator};

// ============================================================================
// Records
// ============================================================================

#[derive(Record, Default)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub version: i32,
    pub books: Faulting,
}

#[derive(Record, Default)]
pub struct Book {
    pub id: Option<i64>,
    pub title: String,
    pub pages: i32,
    pub author_id: Option<i64>,
    pub author: Option<ObjectRef>,
}

#[derive(Record, Default)]
pub struct Car {
    pub id: i64,
    pub kind: String,
    pub wheels: i32,
    pub seats: i32,
}

#[derive(Record, Default)]
pub struct Truck {
    pub id: i64,
    pub kind: String,
    pub wheels: i32,
    pub payload: i32,
}

#[derive(Record, Default, Debug, Clone, PartialEq)]
pub struct Gadget {
    pub id: i64,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i32>,
    pub active: Option<bool>,
}

// ============================================================================
// Schema
// ============================================================================

/// Options that vary between tests.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub owns_books: bool,
    pub author_locking: LockingStrategy,
    pub gadget_cache: CacheStrategy,
    /// Declare the gadget key `Integer` although the property is an `i64`.
    pub narrow_gadget_ids: bool,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            owns_books: true,
            author_locking: LockingStrategy::Optimistic,
            gadget_cache: CacheStrategy::Normal,
            narrow_gadget_ids: false,
        }
    }
}

pub fn author_entity(schema: Schema) -> Entity {
    Entity::new::<Author>("Author", "authors")
        .locking(schema.author_locking)
        .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
        .field(Field::new("name", "NAME", ValueType::Text))
        .field(Field::new("version", "VERSION", ValueType::Integer).lock(true))
        .relationship(
            Relationship::to_many("books", "Book", "id", "author_id")
                .owns_destination(schema.owns_books),
        )
}

pub fn book_entity() -> Entity {
    Entity::new::<Book>("Book", "books")
        .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
        .field(Field::new("title", "TITLE", ValueType::Text))
        .field(Field::new("pages", "PAGES", ValueType::Integer))
        .field(Field::new("author_id", "AUTHOR_ID", ValueType::BigInt))
        .relationship(
            Relationship::to_one("author", "Author", "author_id", "id").cache_destination(true),
        )
        .key_generator(SequenceKeyGenerator::new("books_seq"))
}

pub fn vehicle_entities() -> Vec<Entity> {
    vec![
        Entity::abstract_entity("Vehicle", "vehicles")
            .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
            .field(Field::new("kind", "KIND", ValueType::Text))
            .field(Field::new("wheels", "WHEELS", ValueType::Integer)),
        Entity::new::<Car>("Car", "vehicles")
            .inheritance(Inheritance::single_table("Vehicle", "kind", "car"))
            .field(Field::new("seats", "SEATS", ValueType::Integer)),
        Entity::new::<Truck>("Truck", "vehicles")
            .inheritance(Inheritance::single_table("Vehicle", "kind", "truck"))
            .field(Field::new("payload", "PAYLOAD", ValueType::Integer)),
    ]
}

pub fn gadget_entity(schema: Schema) -> Entity {
    let id_type = if schema.narrow_gadget_ids {
        ValueType::Integer
    } else {
        ValueType::BigInt
    };
    Entity::new::<Gadget>("Gadget", "gadgets")
        .cache_strategy(schema.gadget_cache)
        .field(Field::new("id", "ID", id_type).primary_key(true))
        .field(Field::new("name", "NAME", ValueType::Text))
        .field(Field::new("price", "PRICE", ValueType::Double))
        .field(Field::new("stock", "STOCK", ValueType::Integer))
        .field(Field::new("active", "ACTIVE", ValueType::Boolean))
}

pub fn registry(schema: Schema) -> Arc<Registry> {
    let mut model = Model::new("library")
        .entity(author_entity(schema))
        .entity(book_entity())
        .entity(gadget_entity(schema));
    for entity in vehicle_entities() {
        model = model.entity(entity);
    }
    Arc::new(
        Registry::builder()
            .model(model)
            .build()
            .expect("fixture registry is valid"),
    )
}

// ============================================================================
// Database and context
// ============================================================================

/// A database with every fixture table and the book sequence, all empty.
pub fn database() -> MemoryDatabase {
    let db = MemoryDatabase::new();
    for ddl in [
        "CREATE TABLE authors (ID, NAME, VERSION)",
        "CREATE TABLE books (ID, TITLE, PAGES, AUTHOR_ID)",
        "CREATE TABLE vehicles (ID, KIND, WHEELS, SEATS, PAYLOAD)",
        "CREATE TABLE gadgets (ID, NAME, PRICE, STOCK, ACTIVE)",
        "CREATE SEQUENCE books_seq START WITH 100",
    ] {
        db.execute_raw(ddl).expect("fixture DDL runs");
    }
    db
}

/// Context builder over `db` with a manual clock.
pub fn builder(db: &MemoryDatabase, schema: Schema, clock: &Arc<ManualClock>) -> ContextBuilder {
    let db = db.clone();
    Context::builder(registry(schema), move |_: &Model| {
        Ok(Box::new(db.connect()) as Box<dyn Connection>)
    })
    .clock(clock.clone())
}

pub fn context(db: &MemoryDatabase) -> Context {
    builder(db, Schema::default(), &Arc::new(ManualClock::new())).build()
}

/// Statements other than transaction control.
pub fn dml(db: &MemoryDatabase) -> Vec<String> {
    db.statements()
        .into_iter()
        .filter(|sql| !matches!(sql.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
        .collect()
}

// ============================================================================
// Seed data
// ============================================================================

pub fn seed_library(db: &MemoryDatabase) {
    for (id, name) in [(1, "Le Guin"), (2, "Lem")] {
        db.insert_row(
            "authors",
            [
                ("ID", Value::BigInt(id)),
                ("NAME", Value::Text(name.into())),
                ("VERSION", Value::BigInt(1)),
            ],
        )
        .expect("seed author");
    }
    for (id, title, pages, author) in [
        (10, "The Dispossessed", 387, Some(1)),
        (11, "The Lathe of Heaven", 184, Some(1)),
        (12, "Solaris", 204, Some(2)),
        (13, "Anonymous Pamphlet", 12, None),
    ] {
        db.insert_row(
            "books",
            [
                ("ID", Value::BigInt(id)),
                ("TITLE", Value::Text(title.into())),
                ("PAGES", Value::BigInt(pages)),
                ("AUTHOR_ID", Value::from(author)),
            ],
        )
        .expect("seed book");
    }
}

pub fn seed_vehicles(db: &MemoryDatabase) {
    db.insert_row(
        "vehicles",
        [
            ("ID", Value::BigInt(1)),
            ("KIND", Value::Text("car".into())),
            ("WHEELS", Value::BigInt(4)),
            ("SEATS", Value::BigInt(5)),
        ],
    )
    .expect("seed car");
    db.insert_row(
        "vehicles",
        [
            ("ID", Value::BigInt(2)),
            ("KIND", Value::Text("truck".into())),
            ("WHEELS", Value::BigInt(6)),
            ("PAYLOAD", Value::BigInt(12)),
        ],
    )
    .expect("seed truck");
    db.insert_row(
        "vehicles",
        [
            ("ID", Value::BigInt(3)),
            ("KIND", Value::Text("car".into())),
            ("WHEELS", Value::BigInt(3)),
            ("SEATS", Value::BigInt(2)),
        ],
    )
    .expect("seed three-wheeler");
}

pub fn gadgets() -> Vec<Gadget> {
    vec![
        Gadget {
            id: 1,
            name: Some("anvil".into()),
            price: Some(99.5),
            stock: Some(3),
            active: Some(true),
        },
        Gadget {
            id: 2,
            name: Some("rocket skates".into()),
            price: Some(250.0),
            stock: Some(0),
            active: Some(false),
        },
        Gadget {
            id: 3,
            name: None,
            price: Some(5.0),
            stock: None,
            active: Some(true),
        },
        Gadget {
            id: 4,
            name: Some("giant magnet".into()),
            price: None,
            stock: Some(12),
            active: None,
        },
        Gadget {
            id: 5,
            name: Some("bird seed".into()),
            price: Some(5.0),
            stock: Some(12),
            active: Some(true),
        },
    ]
}

pub fn seed_gadgets(db: &MemoryDatabase) {
    for gadget in gadgets() {
        db.insert_row(
            "gadgets",
            [
                ("ID", Value::BigInt(gadget.id)),
                ("NAME", Value::from(gadget.name)),
                ("PRICE", Value::from(gadget.price)),
                ("STOCK", Value::from(gadget.stock)),
                ("ACTIVE", Value::from(gadget.active)),
            ],
        )
        .expect("seed gadget");
    }
}

pub fn book_ids(books: &[ObjectRef]) -> Vec<i64> {
    books
        .iter()
        .filter_map(|b| read_as::<Book, _>(b, |b| b.id).flatten())
        .collect()
}
