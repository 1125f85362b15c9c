//! Database connection capability.
//!
//! - [`Connection`] - execute statements and manage the native transaction
//! - [`IsolationLevel`] - SQL transaction isolation levels
//!
//! The core never speaks a wire protocol itself. Drivers implement
//! [`Connection`] and the session layer drives it synchronously on the
//! caller's thread.

use crate::error::{ConnectionErrorKind, Error, Result};
use crate::row::Row;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum IsolationLevel {
    /// Dirty reads, non-repeatable reads and phantoms are possible.
    ReadUncommitted,

    /// Only committed changes from others are visible.
    #[default]
    ReadCommitted,

    /// A consistent snapshot for the life of the transaction.
    RepeatableRead,

    /// Transactions appear to execute one after another.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Levels tried, strongest first, when a statement needs exclusive access.
    pub const LOCKING_PREFERENCE: [IsolationLevel; 3] = [
        IsolationLevel::Serializable,
        IsolationLevel::RepeatableRead,
        IsolationLevel::ReadCommitted,
    ];
}

/// A database connection capable of executing SQL text.
///
/// Statements arrive fully rendered; there are no bind parameters at this
/// layer. Isolation level is a session-wide property of the connection.
///
/// # Example
///
/// ```rust,ignore
/// conn.begin()?;
/// conn.execute("UPDATE users SET name='x' WHERE id=1")?;
/// let rows = conn.query("SELECT users_0.id FROM users users_0")?;
/// conn.commit()?;
/// ```
pub trait Connection: Send {
    /// Open the underlying connection. Returns whether it is now live.
    fn connect(&mut self) -> Result<bool>;

    /// Is the connection currently live?
    fn is_connected(&self) -> bool;

    /// Close the underlying connection.
    fn disconnect(&mut self) -> Result<()>;

    /// Begin a native transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Execute an INSERT, UPDATE or DELETE and return rows affected.
    fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Execute a query and return all rows.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Current isolation level of the connection.
    fn isolation_level(&self) -> IsolationLevel;

    /// Change the isolation level of the connection.
    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()>;

    /// Can the driver run at `level`?
    fn supports_isolation_level(&self, level: IsolationLevel) -> bool {
        let _ = level;
        true
    }

    /// Level the connection returns to after a locking statement.
    fn default_isolation_level(&self) -> IsolationLevel {
        IsolationLevel::ReadCommitted
    }

    /// Fail with a connection error unless the connection is live,
    /// connecting first if needed.
    fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() || self.connect()? {
            Ok(())
        } else {
            Err(Error::connection(
                ConnectionErrorKind::Disconnected,
                "no live database connection",
            ))
        }
    }

    /// Strongest supported level from [`IsolationLevel::LOCKING_PREFERENCE`].
    fn locking_isolation_level(&self) -> Option<IsolationLevel> {
        IsolationLevel::LOCKING_PREFERENCE
            .into_iter()
            .find(|level| self.supports_isolation_level(*level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub {
        live: bool,
        can_connect: bool,
    }

    impl Connection for Stub {
        fn connect(&mut self) -> Result<bool> {
            self.live = self.can_connect;
            Ok(self.live)
        }
        fn is_connected(&self) -> bool {
            self.live
        }
        fn disconnect(&mut self) -> Result<()> {
            self.live = false;
            Ok(())
        }
        fn begin(&mut self) -> Result<()> {
            Ok(())
        }
        fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, _sql: &str) -> Result<u64> {
            Ok(0)
        }
        fn query(&mut self, _sql: &str) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }
        fn isolation_level(&self) -> IsolationLevel {
            IsolationLevel::ReadCommitted
        }
        fn set_isolation_level(&mut self, _level: IsolationLevel) -> Result<()> {
            Ok(())
        }
        fn supports_isolation_level(&self, level: IsolationLevel) -> bool {
            level != IsolationLevel::Serializable
        }
    }

    #[test]
    fn test_isolation_level_default() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_isolation_level_as_sql() {
        assert_eq!(IsolationLevel::ReadUncommitted.as_sql(), "READ UNCOMMITTED");
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_locking_level_skips_unsupported() {
        let conn = Stub {
            live: true,
            can_connect: true,
        };
        assert_eq!(
            conn.locking_isolation_level(),
            Some(IsolationLevel::RepeatableRead)
        );
    }

    #[test]
    fn test_ensure_connected() {
        let mut ok = Stub {
            live: false,
            can_connect: true,
        };
        assert!(ok.ensure_connected().is_ok());

        let mut down = Stub {
            live: false,
            can_connect: false,
        };
        assert!(down.ensure_connected().unwrap_err().is_connection_error());
    }
}
