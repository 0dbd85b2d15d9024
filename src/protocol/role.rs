//! Peer roles.
//!
//! The relay knows exactly two roles. Role names arrive as strings in
//! `register` frames and are validated here, at the boundary.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Role
// ============================================================================

/// Role a peer declares when it registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Browser-side agent that detects content and performs saves.
    Extension,
    /// Remote controller that issues save requests.
    Controller,
}

impl Role {
    /// Both roles, in registry slot order.
    pub const ALL: [Role; 2] = [Role::Extension, Role::Controller];

    /// Returns the wire name of the role.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Controller => "controller",
        }
    }

    /// Returns the opposite role.
    #[inline]
    #[must_use]
    pub const fn peer(&self) -> Role {
        match self {
            Self::Extension => Self::Controller,
            Self::Controller => Self::Extension,
        }
    }

    /// Registry slot index.
    #[inline]
    pub(crate) const fn index(&self) -> usize {
        match self {
            Self::Extension => 0,
            Self::Controller => 1,
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "extension" => Ok(Self::Extension),
            "controller" => Ok(Self::Controller),
            other => Err(Error::invalid_role(other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
