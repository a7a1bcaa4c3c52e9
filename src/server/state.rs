//! Per-session prepared-statement and portal stores.
//!
//! Both stores are owned exclusively by the connection task; the factory
//! options exist so a consumer can swap the default mapping for e.g. a
//! bounded store, not to share state across sessions. The empty string
//! names the "unnamed" slot in both stores.

use std::collections::HashMap;
use std::sync::Arc;

use crate::datum::Oid;
use crate::options::StatementFn;
use crate::protocol::FormatCode;
use crate::writer::Columns;

/// A parsed SQL template cached by name.
pub struct PreparedStatement {
    /// Statement name; "" is the unnamed statement.
    pub name: String,
    /// The (placeholder-normalised) SQL text.
    pub query: String,
    /// Parameter type OIDs; zero means the type was never inferred.
    pub parameter_oids: Vec<Oid>,
    /// The callback executing this statement.
    pub handler: StatementFn,
    /// Result columns, when the parse callback could determine them.
    pub columns: Option<Columns>,
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("name", &self.name)
            .field("query", &self.query)
            .field("parameter_oids", &self.parameter_oids)
            .finish_non_exhaustive()
    }
}

/// A bound, executable instance of a prepared statement.
#[derive(Clone)]
pub struct Portal {
    /// Portal name; "" is the unnamed portal.
    pub name: String,
    /// The statement this portal was bound from.
    pub statement: Arc<PreparedStatement>,
    /// Bound parameter values, delivered to callbacks as text.
    pub parameters: Vec<Option<String>>,
    /// Requested result column formats.
    pub result_formats: Vec<FormatCode>,
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("name", &self.name)
            .field("statement", &self.statement.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// Store lifecycle violations.
#[derive(Debug, PartialEq, Eq)]
pub enum StoreError {
    /// A non-empty statement name was prepared twice without being closed.
    DuplicateStatement(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DuplicateStatement(name) => {
                write!(f, "prepared statement \"{}\" already exists", name)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Cache of named prepared statements for one session.
pub trait StatementStore: Send {
    /// Stores a statement under its name. The unnamed slot is always
    /// overwritten; storing a duplicate non-empty name is rejected.
    fn put(&mut self, stmt: Arc<PreparedStatement>) -> Result<(), StoreError>;

    /// Looks up a statement by name.
    fn get(&self, name: &str) -> Option<Arc<PreparedStatement>>;

    /// Removes a statement. Absent entries are a no-op; returns whether an
    /// entry existed.
    fn remove(&mut self, name: &str) -> bool;

    /// Drops every entry; called on session termination.
    fn clear(&mut self);
}

/// Cache of portals for one session.
pub trait PortalStore: Send {
    /// Stores a portal under its name, replacing any existing portal with
    /// the same name.
    fn put(&mut self, portal: Portal);

    /// Looks up a portal by name.
    fn get(&self, name: &str) -> Option<&Portal>;

    /// Removes a portal. Absent entries are a no-op; returns whether an
    /// entry existed.
    fn remove(&mut self, name: &str) -> bool;

    /// Removes every portal bound from the named statement.
    fn remove_for_statement(&mut self, statement: &str);

    /// Drops every entry; called on session termination.
    fn clear(&mut self);
}

/// Default in-memory statement store.
#[derive(Default)]
pub struct MemoryStatements {
    statements: HashMap<String, Arc<PreparedStatement>>,
}

impl MemoryStatements {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatementStore for MemoryStatements {
    fn put(&mut self, stmt: Arc<PreparedStatement>) -> Result<(), StoreError> {
        if !stmt.name.is_empty() && self.statements.contains_key(&stmt.name) {
            return Err(StoreError::DuplicateStatement(stmt.name.clone()));
        }
        self.statements.insert(stmt.name.clone(), stmt);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<Arc<PreparedStatement>> {
        self.statements.get(name).cloned()
    }

    fn remove(&mut self, name: &str) -> bool {
        self.statements.remove(name).is_some()
    }

    fn clear(&mut self) {
        self.statements.clear();
    }
}

/// Default in-memory portal store.
#[derive(Default)]
pub struct MemoryPortals {
    portals: HashMap<String, Portal>,
}

impl MemoryPortals {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PortalStore for MemoryPortals {
    fn put(&mut self, portal: Portal) {
        self.portals.insert(portal.name.clone(), portal);
    }

    fn get(&self, name: &str) -> Option<&Portal> {
        self.portals.get(name)
    }

    fn remove(&mut self, name: &str) -> bool {
        self.portals.remove(name).is_some()
    }

    fn remove_for_statement(&mut self, statement: &str) {
        self.portals.retain(|_, p| p.statement.name != statement);
    }

    fn clear(&mut self) {
        self.portals.clear();
    }
}
