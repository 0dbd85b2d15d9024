//! Role registry.
//!
//! Holds at most one live connection per role. The registry is an explicit
//! service object shared as `Arc<Registry>` by the router and every session
//! for as long as the relay runs.
//!
//! # Invariants
//!
//! - Each role slot holds zero or one connection.
//! - A connection occupies at most one slot.
//! - Replacing a holder closes it before the new binding becomes visible.
//! - A closing connection is never bound, so an evicted connection cannot
//!   take its slot back.
//! - [`Registry::unbind`] only clears slots held by that exact connection,
//!   so a late teardown of an evicted connection never removes its successor.
//!
//! All operations are short synchronous critical sections; the lock is never
//! held across an await.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::identifiers::ConnectionId;
use crate::protocol::Role;
use crate::transport::Connection;

// ============================================================================
// Registration
// ============================================================================

/// Result of [`Registry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The slot was empty.
    Bound,
    /// The connection already held this role. Nothing changed.
    AlreadyBound,
    /// A previous holder was closed and evicted.
    Replaced(ConnectionId),
    /// The connection is already closing. Nothing changed.
    Refused,
}

// ============================================================================
// Registry
// ============================================================================

/// Mapping from role to its current connection.
#[derive(Debug, Default)]
pub struct Registry {
    /// One slot per role, indexed by [`Role::index`].
    slots: RwLock<[Option<Connection>; 2]>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `role` to `connection`.
    ///
    /// A different current holder is closed and evicted first. If the
    /// connection held the other role, that slot is released. A connection
    /// that is already closing is refused.
    pub fn register(&self, role: Role, connection: &Connection) -> Registration {
        let mut slots = self.slots.write();

        // Eviction marks the loser closed under this lock
        if !connection.is_open() {
            debug!(%role, connection = %connection.id(), "Refusing registration from closing connection");
            return Registration::Refused;
        }

        let other = &mut slots[role.peer().index()];
        if other.as_ref() == Some(connection) {
            *other = None;
            debug!(connection = %connection.id(), released = %role.peer(), "Released previous role");
        }

        let slot = &mut slots[role.index()];
        match slot.take() {
            Some(current) if current == *connection => {
                *slot = Some(current);
                Registration::AlreadyBound
            }
            Some(previous) => {
                info!(
                    %role,
                    evicted = %previous.id(),
                    connection = %connection.id(),
                    "Replacing existing connection"
                );
                previous.close();
                *slot = Some(connection.clone());
                Registration::Replaced(previous.id())
            }
            None => {
                *slot = Some(connection.clone());
                Registration::Bound
            }
        }
    }

    /// Returns the current holder of `role`.
    #[inline]
    #[must_use]
    pub fn lookup(&self, role: Role) -> Option<Connection> {
        self.slots.read()[role.index()].clone()
    }

    /// Returns the role `id` currently holds, if any.
    #[must_use]
    pub fn role_of(&self, id: ConnectionId) -> Option<Role> {
        let slots = self.slots.read();
        Role::ALL
            .into_iter()
            .find(|role| slots[role.index()].as_ref().is_some_and(|c| c.id() == id))
    }

    /// Removes `connection` from any slot it currently holds.
    ///
    /// Returns the role that was released, `None` if the connection held
    /// nothing (never registered, already unbound, or already replaced).
    pub fn unbind(&self, connection: &Connection) -> Option<Role> {
        let mut slots = self.slots.write();
        for role in Role::ALL {
            let slot = &mut slots[role.index()];
            if slot.as_ref() == Some(connection) {
                *slot = None;
                debug!(%role, connection = %connection.id(), "Connection unbound");
                return Some(role);
            }
        }
        None
    }

    /// Closes and removes every bound connection. Returns how many there were.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Connection> = {
            let mut slots = self.slots.write();
            slots.iter_mut().filter_map(Option::take).collect()
        };

        for connection in &drained {
            connection.close();
        }

        drained.len()
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns `true` if no role is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
