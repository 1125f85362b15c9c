//! In-memory database and its [`Connection`] implementation.
//!
//! A [`MemoryDatabase`] is a cheap handle to shared state: every clone and
//! every [`MemoryConnection`] opened from it see the same tables. The
//! database keeps a log of the statements connections execute, which makes
//! it a convenient oracle for the SQL the session layer emits.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relmap_core::error::{ConnectionErrorKind, QueryErrorKind};
use relmap_core::{Connection, Error, IsolationLevel, Result, Row, Value};

use crate::sql;
use crate::store::{Outcome, Store};

/// Configuration for a memory database.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Name used in log output.
    pub name: String,
    /// Level connections start at and return to after a locking statement.
    pub default_isolation: IsolationLevel,
    /// Levels connections accept in `set_isolation_level`.
    pub supported_isolation: Vec<IsolationLevel>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            default_isolation: IsolationLevel::ReadCommitted,
            supported_isolation: vec![
                IsolationLevel::ReadUncommitted,
                IsolationLevel::ReadCommitted,
                IsolationLevel::RepeatableRead,
                IsolationLevel::Serializable,
            ],
        }
    }
}

impl MemoryConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the default isolation level.
    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    /// Restrict the isolation levels connections accept.
    pub fn supported_isolation(mut self, levels: impl IntoIterator<Item = IsolationLevel>) -> Self {
        self.supported_isolation = levels.into_iter().collect();
        self
    }
}

/// Shared state behind every handle of one database.
#[derive(Debug, Default)]
struct DatabaseInner {
    store: Store,
    statements: Vec<String>,
    fail_on: Option<String>,
    refuse_connections: bool,
    isolation_changes: Vec<IsolationLevel>,
}

/// An in-memory SQL database.
///
/// # Example
///
/// ```rust,ignore
/// let db = MemoryDatabase::new();
/// db.execute_raw("CREATE TABLE items (ID, LABEL)")?;
/// db.execute_raw("INSERT INTO items (ID,LABEL) values (1,'first')")?;
///
/// let mut conn = db.connect();
/// conn.connect()?;
/// let rows = conn.query("SELECT Item_0.ID FROM items Item_0")?;
/// ```
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<DatabaseInner>>,
    config: Arc<MemoryConfig>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    /// Create an empty database with the default configuration.
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DatabaseInner::default())),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, DatabaseInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new, not yet connected, connection.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            db: self.clone(),
            connected: false,
            transaction: None,
            isolation: self.config.default_isolation,
        }
    }

    /// Run a statement directly against the store. Nothing is logged and
    /// failure injection does not apply; meant for fixtures.
    pub fn execute_raw(&self, sql: &str) -> Result<u64> {
        let statement = sql::parse(sql)?;
        match self.lock().store.run(&statement, sql)? {
            Outcome::Affected(n) => Ok(n),
            Outcome::Rows(rows) => Ok(rows.len() as u64),
        }
    }

    /// Query the store directly, outside any connection.
    pub fn query_raw(&self, sql: &str) -> Result<Vec<Row>> {
        let statement = sql::parse(sql)?;
        match self.lock().store.run(&statement, sql)? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Affected(_) => Err(Error::query(
                QueryErrorKind::Shape,
                sql,
                "statement does not return rows",
            )),
        }
    }

    /// Insert one row given as `(column, value)` pairs.
    pub fn insert_row<'a>(
        &self,
        table: &str,
        row: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<()> {
        let (columns, values): (Vec<&str>, Vec<String>) = row
            .into_iter()
            .map(|(column, value)| (column, value.to_sql_literal()))
            .unzip();
        let sql = format!(
            "INSERT INTO {} ({}) values ({})",
            table,
            columns.join(","),
            values.join(",")
        );
        self.execute_raw(&sql).map(|_| ())
    }

    /// Every row of `table`, with all of its columns.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        self.query_raw(&format!("SELECT * FROM {}", table))
    }

    /// Number of rows in `table`; zero for an unknown table.
    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .store
            .table(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Statements executed through connections, oldest first, including
    /// `BEGIN`, `COMMIT` and `ROLLBACK`.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn clear_statements(&self) {
        self.lock().statements.clear();
    }

    /// Make every statement containing `fragment` fail. `None` clears it.
    pub fn fail_on(&self, fragment: Option<&str>) {
        self.lock().fail_on = fragment.map(str::to_string);
    }

    /// Make `connect` report failure while `refuse` is set.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Isolation levels set on connections, in order.
    pub fn isolation_changes(&self) -> Vec<IsolationLevel> {
        self.lock().isolation_changes.clone()
    }
}

/// A connection to a [`MemoryDatabase`].
///
/// `begin` copies the tables; `rollback` puts the copy back. Rolling back
/// therefore also undoes changes other connections committed in between.
#[derive(Debug)]
pub struct MemoryConnection {
    db: MemoryDatabase,
    connected: bool,
    transaction: Option<Store>,
    isolation: IsolationLevel,
}

impl MemoryConnection {
    /// The database this connection talks to.
    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn require_live(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::connection(
                ConnectionErrorKind::Disconnected,
                format!("connection to {} is not open", self.db.config.name),
            ))
        }
    }

    /// Log `sql` and fail it if it matches the injected failure.
    fn record(inner: &mut DatabaseInner, sql: &str) -> Result<()> {
        inner.statements.push(sql.to_string());
        if let Some(fragment) = &inner.fail_on {
            if sql.contains(fragment.as_str()) {
                tracing::debug!(sql = sql, "injected statement failure");
                return Err(Error::query(
                    QueryErrorKind::Database,
                    sql,
                    format!("injected failure on \"{}\"", fragment),
                ));
            }
        }
        Ok(())
    }

    fn run(&mut self, sql: &str) -> Result<Outcome> {
        self.require_live()?;
        let statement = sql::parse(sql)?;
        let mut inner = self.db.lock();
        Self::record(&mut inner, sql)?;
        tracing::trace!(sql = sql, "memory statement");
        inner.store.run(&statement, sql)
    }
}

impl Connection for MemoryConnection {
    fn connect(&mut self) -> Result<bool> {
        if self.db.lock().refuse_connections {
            tracing::debug!(database = %self.db.config.name, "connection refused");
            self.connected = false;
            return Ok(false);
        }
        self.connected = true;
        Ok(true)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(saved) = self.transaction.take() {
            tracing::warn!(database = %self.db.config.name, "disconnecting inside a transaction; rolling back");
            self.db.lock().store = saved;
        }
        self.connected = false;
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.require_live()?;
        if self.transaction.is_some() {
            return Err(Error::query(
                QueryErrorKind::Database,
                "BEGIN",
                "Already in a transaction",
            ));
        }
        let mut inner = self.db.lock();
        Self::record(&mut inner, "BEGIN")?;
        self.transaction = Some(inner.store.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.require_live()?;
        let Some(saved) = self.transaction.take() else {
            return Err(Error::query(
                QueryErrorKind::Database,
                "COMMIT",
                "Not in a transaction",
            ));
        };
        let mut inner = self.db.lock();
        if let Err(e) = Self::record(&mut inner, "COMMIT") {
            inner.store = saved;
            return Err(e);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut inner = self.db.lock();
        inner.statements.push("ROLLBACK".to_string());
        match self.transaction.take() {
            Some(saved) => inner.store = saved,
            None => tracing::warn!(database = %self.db.config.name, "rollback outside a transaction"),
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        match self.run(sql)? {
            Outcome::Affected(n) => Ok(n),
            Outcome::Rows(_) => Err(Error::query(
                QueryErrorKind::Shape,
                sql,
                "statement returns rows; use query",
            )),
        }
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        match self.run(sql)? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Affected(_) => Err(Error::query(
                QueryErrorKind::Shape,
                sql,
                "statement does not return rows",
            )),
        }
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        if !self.supports_isolation_level(level) {
            return Err(Error::query(
                QueryErrorKind::Database,
                format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()),
                "isolation level not supported",
            ));
        }
        self.db.lock().isolation_changes.push(level);
        self.isolation = level;
        Ok(())
    }

    fn supports_isolation_level(&self, level: IsolationLevel) -> bool {
        self.db.config.supported_isolation.contains(&level)
    }

    fn default_isolation_level(&self) -> IsolationLevel {
        self.db.config.default_isolation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.execute_raw("CREATE TABLE test (ID, NAME)").unwrap();
        db
    }

    fn live(db: &MemoryDatabase) -> MemoryConnection {
        let mut conn = db.connect();
        assert!(conn.connect().unwrap());
        conn
    }

    #[test]
    fn test_execute_and_query() {
        let db = database();
        let mut conn = live(&db);
        assert_eq!(conn.execute("INSERT INTO test (ID,NAME) values (1,'Alice')").unwrap(), 1);
        assert_eq!(conn.execute("INSERT INTO test (ID,NAME) values (2,'Bob')").unwrap(), 1);

        let rows = conn.query("SELECT T_0.ID, T_0.NAME FROM test T_0 ORDER BY T_0.ID").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_named::<i64>("ID").unwrap(), 1);
        assert_eq!(rows[1].get_named::<String>("NAME").unwrap(), "Bob");
        assert_eq!(db.statements().len(), 3);
    }

    #[test]
    fn test_null_handling() {
        let db = database();
        db.insert_row("test", [("ID", Value::BigInt(1)), ("NAME", Value::Null)])
            .unwrap();
        let rows = db.rows("test").unwrap();
        assert_eq!(rows[0].get_named::<Option<String>>("NAME").unwrap(), None);
    }

    #[test]
    fn test_transaction_rollback() {
        let db = database();
        let mut conn = live(&db);
        conn.begin().unwrap();
        conn.execute("INSERT INTO test (ID,NAME) values (1,'Alice')").unwrap();
        assert_eq!(db.row_count("test"), 1);
        conn.rollback().unwrap();
        assert_eq!(db.row_count("test"), 0);
        assert_eq!(
            db.statements(),
            vec!["BEGIN", "INSERT INTO test (ID,NAME) values (1,'Alice')", "ROLLBACK"]
        );
    }

    #[test]
    fn test_transaction_commit() {
        let db = database();
        let mut conn = live(&db);
        conn.begin().unwrap();
        conn.execute("INSERT INTO test (ID,NAME) values (1,'Alice')").unwrap();
        conn.commit().unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(db.row_count("test"), 1);
    }

    #[test]
    fn test_nested_begin_fails() {
        let db = database();
        let mut conn = live(&db);
        conn.begin().unwrap();
        let err = conn.begin().unwrap_err();
        assert!(err.to_string().contains("Already in a transaction"));
        assert!(conn.commit().is_ok());
        assert!(conn.commit().is_err());
    }

    #[test]
    fn test_injected_failure() {
        let db = database();
        let mut conn = live(&db);
        db.fail_on(Some("NAME"));
        let err = conn.execute("INSERT INTO test (ID,NAME) values (1,'x')").unwrap_err();
        assert_eq!(err.sql(), Some("INSERT INTO test (ID,NAME) values (1,'x')"));
        assert_eq!(db.row_count("test"), 0);

        db.fail_on(None);
        conn.execute("INSERT INTO test (ID,NAME) values (1,'x')").unwrap();
    }

    #[test]
    fn test_failed_commit_restores() {
        let db = database();
        let mut conn = live(&db);
        conn.begin().unwrap();
        conn.execute("INSERT INTO test (ID) values (1)").unwrap();
        db.fail_on(Some("COMMIT"));
        assert!(conn.commit().is_err());
        assert_eq!(db.row_count("test"), 0);
    }

    #[test]
    fn test_refused_and_closed_connections() {
        let db = database();
        db.refuse_connections(true);
        let mut conn = db.connect();
        assert!(!conn.connect().unwrap());
        assert!(conn.ensure_connected().unwrap_err().is_connection_error());
        assert!(conn.query("SELECT * FROM test").unwrap_err().is_connection_error());

        db.refuse_connections(false);
        conn.ensure_connected().unwrap();
        conn.disconnect().unwrap();
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_isolation_levels() {
        let db = MemoryDatabase::with_config(
            MemoryConfig::named("strict")
                .supported_isolation([IsolationLevel::ReadCommitted, IsolationLevel::RepeatableRead]),
        );
        let mut conn = db.connect();
        assert_eq!(
            conn.locking_isolation_level(),
            Some(IsolationLevel::RepeatableRead)
        );
        assert!(conn.set_isolation_level(IsolationLevel::Serializable).is_err());
        conn.set_isolation_level(IsolationLevel::RepeatableRead).unwrap();
        assert_eq!(conn.isolation_level(), IsolationLevel::RepeatableRead);
        assert_eq!(db.isolation_changes(), vec![IsolationLevel::RepeatableRead]);
    }

    #[test]
    fn test_execute_rejects_queries() {
        let db = database();
        let mut conn = live(&db);
        let err = conn.execute("SELECT * FROM test").unwrap_err();
        assert!(err.to_string().contains("use query"));
    }
}
