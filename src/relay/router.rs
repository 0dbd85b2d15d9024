//! Message router.
//!
//! Decides what happens to every parsed frame based on the sender's role and
//! the frame's `type`:
//!
//! | type | valid source | forwarded to |
//! |------|--------------|--------------|
//! | `register` | any | (handled by the relay) |
//! | `content-update` | extension | controller |
//! | `save-request` | controller | extension |
//! | `save-confirmation` | extension | controller |
//!
//! Routing is best-effort and at-most-once. Nothing is queued and nothing is
//! reported back to the sender: every failure is logged and the frame is
//! dropped, so a misbehaving peer can never disturb the other one.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::identifiers::ConnectionId;
use crate::protocol::{Envelope, Message, MessageKind, Role};
use crate::transport::Connection;

use super::registry::{Registration, Registry};

// ============================================================================
// RouteOutcome
// ============================================================================

/// What the router did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The sender is now bound to `role`.
    Registered {
        /// Role that was bound.
        role: Role,
        /// Previous holder that was evicted, if any.
        replaced: Option<ConnectionId>,
    },

    /// The frame was queued on the destination connection.
    Forwarded {
        /// Frame type.
        kind: MessageKind,
        /// Destination role.
        to: Role,
        /// Destination connection.
        destination: ConnectionId,
    },

    /// The frame was dropped.
    Dropped(DropReason),
}

/// Why a frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Sender has not registered yet and the frame is not a registration.
    Unregistered(MessageKind),
    /// Registration named an unknown role.
    InvalidRole(String),
    /// Sender's role may not send this type.
    WrongRole {
        /// Frame type.
        kind: MessageKind,
        /// Role allowed to send it.
        expected: Role,
        /// Role that sent it.
        actual: Role,
    },
    /// Destination role has no connection.
    PeerAbsent(Role),
    /// Destination connection is closing.
    PeerClosed(Role),
    /// Type the relay does not forward.
    Unroutable(MessageKind),
    /// Sender is closing (evicted or shutting down).
    SourceClosed(MessageKind),
}

// ============================================================================
// Router
// ============================================================================

/// Routes frames between the two roles through the shared [`Registry`].
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    /// Creates a router over `registry`.
    #[inline]
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Returns the registry this router resolves destinations in.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handles one frame from `source`, whose bound role is `role`.
    ///
    /// Never fails: the outcome only describes what happened.
    pub fn route(
        &self,
        source: &Connection,
        role: Option<Role>,
        envelope: &Envelope,
    ) -> RouteOutcome {
        let kind = envelope.kind();

        // Frames still buffered on an evicted socket
        if !source.is_open() {
            debug!(connection = %source.id(), %kind, "Message from closing connection");
            return RouteOutcome::Dropped(DropReason::SourceClosed(kind.clone()));
        }

        if *kind == MessageKind::Register {
            return self.register(source, envelope);
        }

        let Some(role) = role else {
            warn!(connection = %source.id(), %kind, "Message from unregistered client");
            return RouteOutcome::Dropped(DropReason::Unregistered(kind.clone()));
        };

        let Some(rule) = kind.route() else {
            debug!(connection = %source.id(), %role, %kind, "Unknown message type");
            return RouteOutcome::Dropped(DropReason::Unroutable(kind.clone()));
        };

        if rule.source != role {
            warn!(
                connection = %source.id(),
                %role,
                %kind,
                expected = %rule.source,
                "Message from wrong role"
            );
            return RouteOutcome::Dropped(DropReason::WrongRole {
                kind: kind.clone(),
                expected: rule.source,
                actual: role,
            });
        }

        Self::log_relayed(envelope);
        self.forward(rule.destination, envelope)
    }

    /// Binds the sender to its requested role and acknowledges.
    fn register(&self, source: &Connection, envelope: &Envelope) -> RouteOutcome {
        let role = match envelope.requested_role() {
            Ok(role) => role,
            Err(e) => {
                warn!(connection = %source.id(), error = %e, "Unknown client type");
                let requested = envelope.str_field("client").unwrap_or_default();
                return RouteOutcome::Dropped(DropReason::InvalidRole(requested.to_string()));
            }
        };

        let replaced = match self.registry.register(role, source) {
            Registration::Replaced(previous) => Some(previous),
            Registration::Bound | Registration::AlreadyBound => None,
            Registration::Refused => {
                debug!(connection = %source.id(), %role, "Registration from closing connection");
                return RouteOutcome::Dropped(DropReason::SourceClosed(MessageKind::Register));
            }
        };

        info!(connection = %source.id(), %role, "Client registered");

        if let Err(e) = source.send_message(&Message::registered(role)) {
            warn!(connection = %source.id(), error = %e, "Failed to acknowledge registration");
        }

        RouteOutcome::Registered { role, replaced }
    }

    /// Queues the original frame on the destination's connection.
    fn forward(&self, to: Role, envelope: &Envelope) -> RouteOutcome {
        let kind = envelope.kind();

        let Some(destination) = self.registry.lookup(to) else {
            warn!(%kind, %to, "Peer not connected, dropping message");
            return RouteOutcome::Dropped(DropReason::PeerAbsent(to));
        };

        if let Err(e) = destination.send_text(envelope.raw()) {
            warn!(%kind, %to, destination = %destination.id(), error = %e, "Peer closing, dropping message");
            return RouteOutcome::Dropped(DropReason::PeerClosed(to));
        }

        debug!(%kind, %to, destination = %destination.id(), "Message forwarded");

        RouteOutcome::Forwarded {
            kind: kind.clone(),
            to,
            destination: destination.id(),
        }
    }

    fn log_relayed(envelope: &Envelope) {
        match envelope.kind() {
            MessageKind::ContentUpdate => info!(
                platform = envelope.str_field("platform").unwrap_or_default(),
                url = envelope.str_field("url").unwrap_or_default(),
                "Content detected"
            ),
            MessageKind::SaveRequest => info!(
                tag = envelope.str_field("tag").unwrap_or_default(),
                url = envelope.str_field("url").unwrap_or_default(),
                "Save requested"
            ),
            MessageKind::SaveConfirmation => info!(
                tag = envelope.str_field("tag").unwrap_or_default(),
                success = envelope.bool_field("success").unwrap_or(false),
                error = envelope.str_field("error"),
                "Save confirmation"
            ),
            _ => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::transport::connection::Outbound;

    fn setup() -> (Router, Arc<Registry>) {
        let registry = Arc::new(Registry::new());
        (Router::new(Arc::clone(&registry)), registry)
    }

    fn envelope(text: &str) -> Envelope {
        Envelope::parse(text).unwrap()
    }

    fn registered(
        router: &Router,
        role: Role,
    ) -> (Connection, UnboundedReceiver<Outbound>) {
        let (conn, mut rx) = Connection::new();
        let text = format!(r#"{{"type":"register","client":"{role}"}}"#);
        let outcome = router.route(&conn, None, &envelope(&text));
        assert!(matches!(outcome, RouteOutcome::Registered { .. }));
        // Drain the acknowledgment
        assert!(matches!(rx.try_recv(), Ok(Outbound::Text(_))));
        (conn, rx)
    }

    #[test]
    fn test_register_sends_ack() {
        let (router, registry) = setup();
        let (conn, mut rx) = Connection::new();

        let outcome = router.route(
            &conn,
            None,
            &envelope(r#"{"type":"register","client":"extension"}"#),
        );

        assert_eq!(
            outcome,
            RouteOutcome::Registered {
                role: Role::Extension,
                replaced: None
            }
        );
        assert_eq!(registry.lookup(Role::Extension), Some(conn));

        let Ok(Outbound::Text(ack)) = rx.try_recv() else {
            panic!("expected acknowledgment");
        };
        assert_eq!(
            Message::from_json(&ack).unwrap(),
            Message::registered(Role::Extension)
        );
    }

    #[test]
    fn test_register_invalid_role() {
        let (router, registry) = setup();
        let (conn, mut rx) = Connection::new();

        let outcome = router.route(
            &conn,
            None,
            &envelope(r#"{"type":"register","client":"ipad"}"#),
        );

        assert_eq!(
            outcome,
            RouteOutcome::Dropped(DropReason::InvalidRole("ipad".into()))
        );
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
        assert!(conn.is_open());
    }

    #[test]
    fn test_unregistered_sender_is_dropped() {
        let (router, _registry) = setup();
        let (_controller, mut controller_rx) = registered(&router, Role::Controller);
        let (conn, _rx) = Connection::new();

        let outcome = router.route(
            &conn,
            None,
            &envelope(r#"{"type":"content-update","url":"u","platform":"p","title":"t"}"#),
        );

        assert_eq!(
            outcome,
            RouteOutcome::Dropped(DropReason::Unregistered(MessageKind::ContentUpdate))
        );
        assert!(controller_rx.try_recv().is_err());
        assert!(conn.is_open());
    }

    #[test]
    fn test_content_update_forwarded_verbatim() {
        let (router, _registry) = setup();
        let (extension, _ext_rx) = registered(&router, Role::Extension);
        let (controller, mut controller_rx) = registered(&router, Role::Controller);

        let text = r#"{"type":"content-update","url":"https://instagram.com/p/ABC","platform":"instagram","title":"t"}"#;
        let outcome = router.route(&extension, Some(Role::Extension), &envelope(text));

        assert_eq!(
            outcome,
            RouteOutcome::Forwarded {
                kind: MessageKind::ContentUpdate,
                to: Role::Controller,
                destination: controller.id(),
            }
        );
        assert_eq!(controller_rx.try_recv().unwrap(), Outbound::Text(text.into()));
    }

    #[test]
    fn test_save_request_from_extension_is_never_forwarded() {
        let (router, _registry) = setup();
        let (extension, mut ext_rx) = registered(&router, Role::Extension);
        let (_controller, mut controller_rx) = registered(&router, Role::Controller);

        let outcome = router.route(
            &extension,
            Some(Role::Extension),
            &envelope(r#"{"type":"save-request","tag":"Favorites","url":"https://x.com/1"}"#),
        );

        assert_eq!(
            outcome,
            RouteOutcome::Dropped(DropReason::WrongRole {
                kind: MessageKind::SaveRequest,
                expected: Role::Controller,
                actual: Role::Extension,
            })
        );
        assert!(ext_rx.try_recv().is_err());
        assert!(controller_rx.try_recv().is_err());
    }

    #[test]
    fn test_content_update_without_controller() {
        let (router, _registry) = setup();
        let (extension, mut ext_rx) = registered(&router, Role::Extension);

        let outcome = router.route(
            &extension,
            Some(Role::Extension),
            &envelope(r#"{"type":"content-update","url":"u","platform":"p","title":"t"}"#),
        );

        assert_eq!(
            outcome,
            RouteOutcome::Dropped(DropReason::PeerAbsent(Role::Controller))
        );
        assert!(ext_rx.try_recv().is_err());
        assert!(extension.is_open());
    }

    #[test]
    fn test_save_request_and_confirmation_round() {
        let (router, _registry) = setup();
        let (extension, mut ext_rx) = registered(&router, Role::Extension);
        let (controller, mut controller_rx) = registered(&router, Role::Controller);

        let request = r#"{"type":"save-request","tag":"Favorites","url":"https://x.com/1"}"#;
        router.route(&controller, Some(Role::Controller), &envelope(request));
        assert_eq!(ext_rx.try_recv().unwrap(), Outbound::Text(request.into()));

        let confirmation = r#"{"type":"save-confirmation","tag":"Favorites","success":false,"error":"Save button not found"}"#;
        router.route(&extension, Some(Role::Extension), &envelope(confirmation));
        assert_eq!(
            controller_rx.try_recv().unwrap(),
            Outbound::Text(confirmation.into())
        );
    }

    #[test]
    fn test_unknown_and_registered_types_are_dropped() {
        let (router, _registry) = setup();
        let (extension, _ext_rx) = registered(&router, Role::Extension);
        let (_controller, mut controller_rx) = registered(&router, Role::Controller);

        for (text, kind) in [
            (r#"{"type":"current_content"}"#, MessageKind::Unknown("current_content".into())),
            (r#"{"type":"registered","client":"extension"}"#, MessageKind::Registered),
        ] {
            let outcome = router.route(&extension, Some(Role::Extension), &envelope(text));
            assert_eq!(outcome, RouteOutcome::Dropped(DropReason::Unroutable(kind)));
        }
        assert!(controller_rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_to_closing_peer() {
        let (router, _registry) = setup();
        let (extension, _ext_rx) = registered(&router, Role::Extension);
        let (controller, _controller_rx) = registered(&router, Role::Controller);
        controller.close();

        let outcome = router.route(
            &extension,
            Some(Role::Extension),
            &envelope(r#"{"type":"save-confirmation","tag":"A","success":true,"error":null}"#),
        );

        assert_eq!(
            outcome,
            RouteOutcome::Dropped(DropReason::PeerClosed(Role::Controller))
        );
    }

    #[test]
    fn test_reregistration_replaces_holder() {
        let (router, registry) = setup();
        let (first, mut first_rx) = registered(&router, Role::Extension);
        let (second, mut second_rx) = Connection::new();

        let outcome = router.route(
            &second,
            None,
            &envelope(r#"{"type":"register","client":"extension"}"#),
        );

        assert_eq!(
            outcome,
            RouteOutcome::Registered {
                role: Role::Extension,
                replaced: Some(first.id()),
            }
        );
        assert_eq!(first_rx.try_recv().unwrap(), Outbound::Close);
        assert!(matches!(second_rx.try_recv(), Ok(Outbound::Text(_))));
        assert_eq!(registry.lookup(Role::Extension), Some(second));
    }

    #[test]
    fn test_evicted_connection_cannot_register_again() {
        let (router, registry) = setup();
        let (old, mut old_rx) = registered(&router, Role::Extension);
        let (new, mut new_rx) = registered(&router, Role::Extension);
        assert_eq!(old_rx.try_recv().unwrap(), Outbound::Close);

        // A register frame read from the old socket before its close is handled
        let outcome = router.route(
            &old,
            Some(Role::Extension),
            &envelope(r#"{"type":"register","client":"extension"}"#),
        );

        assert_eq!(
            outcome,
            RouteOutcome::Dropped(DropReason::SourceClosed(MessageKind::Register))
        );
        assert_eq!(registry.lookup(Role::Extension), Some(new.clone()));
        assert!(new.is_open());
        assert!(new_rx.try_recv().is_err());

        // The old loop's teardown leaves the newcomer bound
        assert_eq!(registry.unbind(&old), None);
        assert_eq!(registry.lookup(Role::Extension), Some(new));
    }

    #[test]
    fn test_evicted_connection_frames_are_not_forwarded() {
        let (router, _registry) = setup();
        let (old, _old_rx) = registered(&router, Role::Extension);
        let (_new, _new_rx) = registered(&router, Role::Extension);
        let (_controller, mut controller_rx) = registered(&router, Role::Controller);

        let outcome = router.route(
            &old,
            Some(Role::Extension),
            &envelope(r#"{"type":"content-update","url":"u","platform":"p","title":"stale"}"#),
        );

        assert_eq!(
            outcome,
            RouteOutcome::Dropped(DropReason::SourceClosed(MessageKind::ContentUpdate))
        );
        assert!(controller_rx.try_recv().is_err());
    }
}
