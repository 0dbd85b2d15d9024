//! Wire message types.
//!
//! Every frame is a single JSON object with a mandatory `type` tag.
//!
//! Two views exist over the same format:
//!
//! - [`Envelope`] is what the relay works with. It keeps the original text so
//!   forwarded frames reach the peer byte-for-byte, and only looks at the
//!   fields routing needs.
//! - [`Message`] is the typed form used by peers and for frames the relay
//!   originates (`registered`).
//!
//! # Format
//!
//! ```json
//! { "type": "content-update", "url": "https://instagram.com/p/ABC", "platform": "instagram", "title": "t" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::platform::Platform;
use super::role::Role;

// ============================================================================
// Constants
// ============================================================================

/// Human-readable text carried by `registered` acknowledgments.
pub const REGISTERED_TEXT: &str = "Successfully registered";

// ============================================================================
// MessageKind
// ============================================================================

/// Classification of a frame by its `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `register` - peer declares its role.
    Register,
    /// `registered` - relay acknowledges a registration.
    Registered,
    /// `content-update` - extension reports the page it is on.
    ContentUpdate,
    /// `save-request` - controller asks for the current page to be saved.
    SaveRequest,
    /// `save-confirmation` - extension reports the outcome of a save.
    SaveConfirmation,
    /// Anything else.
    Unknown(String),
}

/// Who may send a routed message type and where it goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRule {
    /// The only role allowed to send this type.
    pub source: Role,
    /// The role the message is forwarded to.
    pub destination: Role,
}

impl MessageKind {
    /// Classifies a `type` tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "register" => Self::Register,
            "registered" => Self::Registered,
            "content-update" => Self::ContentUpdate,
            "save-request" => Self::SaveRequest,
            "save-confirmation" => Self::SaveConfirmation,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns the wire tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Register => "register",
            Self::Registered => "registered",
            Self::ContentUpdate => "content-update",
            Self::SaveRequest => "save-request",
            Self::SaveConfirmation => "save-confirmation",
            Self::Unknown(tag) => tag,
        }
    }

    /// Returns the routing rule for relayed types, `None` for everything
    /// the relay does not forward.
    #[must_use]
    pub const fn route(&self) -> Option<RouteRule> {
        match self {
            Self::ContentUpdate | Self::SaveConfirmation => Some(RouteRule {
                source: Role::Extension,
                destination: Role::Controller,
            }),
            Self::SaveRequest => Some(RouteRule {
                source: Role::Controller,
                destination: Role::Extension,
            }),
            Self::Register | Self::Registered | Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A parsed inbound frame, as seen by the relay.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Classified `type` tag.
    kind: MessageKind,
    /// Parsed object, for field lookups.
    body: Map<String, Value>,
    /// Original frame text, forwarded unchanged.
    raw: String,
}

impl Envelope {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the frame is not JSON
    /// - [`Error::MalformedMessage`] if it is not an object with a string `type`
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        let Value::Object(body) = value else {
            return Err(Error::malformed("frame is not a JSON object"));
        };

        let kind = match body.get("type") {
            Some(Value::String(tag)) => MessageKind::from_tag(tag),
            Some(_) => return Err(Error::malformed("`type` is not a string")),
            None => return Err(Error::malformed("missing `type`")),
        };

        Ok(Self {
            kind,
            body,
            raw: text.to_string(),
        })
    }

    /// Returns the message classification.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Returns the original frame text.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns a string field, if present and a string.
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(Value::as_str)
    }

    /// Returns a boolean field, if present and a boolean.
    #[must_use]
    pub fn bool_field(&self, name: &str) -> Option<bool> {
        self.body.get(name).and_then(Value::as_bool)
    }

    /// Returns the role named by a `register` frame's `client` field.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRole`] if `client` is missing, not a string, or not a
    /// known role.
    pub fn requested_role(&self) -> Result<Role> {
        match self.body.get("client") {
            Some(Value::String(name)) => name.parse(),
            Some(other) => Err(Error::invalid_role(other.to_string())),
            None => Err(Error::invalid_role("")),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Typed wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Peer declares its role.
    Register {
        /// Role being claimed.
        client: Role,
    },

    /// Relay acknowledges a registration.
    Registered {
        /// Role that was bound.
        client: Role,
        /// Human-readable status.
        message: String,
    },

    /// Extension reports the page it is on.
    ContentUpdate {
        /// Page URL.
        url: String,
        /// Platform name (see [`Platform`]).
        platform: String,
        /// Page title, empty when unknown.
        #[serde(default)]
        title: String,
    },

    /// Controller asks for a page to be saved into a collection.
    SaveRequest {
        /// Collection name.
        tag: String,
        /// Page URL.
        url: String,
    },

    /// Extension reports the outcome of a save.
    SaveConfirmation {
        /// Collection name.
        tag: String,
        /// Whether the save succeeded.
        success: bool,
        /// Failure description, `null` on success.
        #[serde(default)]
        error: Option<String>,
    },
}

impl Message {
    /// Creates a `register` message.
    #[inline]
    #[must_use]
    pub fn register(role: Role) -> Self {
        Self::Register { client: role }
    }

    /// Creates the `registered` acknowledgment for `role`.
    #[inline]
    #[must_use]
    pub fn registered(role: Role) -> Self {
        Self::Registered {
            client: role,
            message: REGISTERED_TEXT.to_string(),
        }
    }

    /// Creates a `content-update` for `url` if it points at recognised
    /// content, `None` otherwise.
    #[must_use]
    pub fn content_update_for(url: impl Into<String>, title: impl Into<String>) -> Option<Self> {
        let url = url.into();
        let platform = Platform::detect(&url)?;
        Some(Self::ContentUpdate {
            url,
            platform: platform.as_str().to_string(),
            title: title.into(),
        })
    }

    /// Creates a `save-request`.
    #[inline]
    #[must_use]
    pub fn save_request(tag: impl Into<String>, url: impl Into<String>) -> Self {
        Self::SaveRequest {
            tag: tag.into(),
            url: url.into(),
        }
    }

    /// Creates a successful `save-confirmation`.
    #[inline]
    #[must_use]
    pub fn saved(tag: impl Into<String>) -> Self {
        Self::SaveConfirmation {
            tag: tag.into(),
            success: true,
            error: None,
        }
    }

    /// Creates a failed `save-confirmation`.
    #[inline]
    #[must_use]
    pub fn save_failed(tag: impl Into<String>, error: impl Into<String>) -> Self {
        Self::SaveConfirmation {
            tag: tag.into(),
            success: false,
            error: Some(error.into()),
        }
    }

    /// Returns the classification of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Register { .. } => MessageKind::Register,
            Self::Registered { .. } => MessageKind::Registered,
            Self::ContentUpdate { .. } => MessageKind::ContentUpdate,
            Self::SaveRequest { .. } => MessageKind::SaveRequest,
            Self::SaveConfirmation { .. } => MessageKind::SaveConfirmation,
        }
    }

    /// Serializes to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for non-JSON input, unknown types, or missing
    /// fields.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
