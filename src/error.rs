//! Structured error types for the kernel.
//!
//! All fallible public APIs return `Result<T, KernelError>`. Errors that
//! must not stop the dispatch loop (unknown destinations, rejected
//! transitions, unresolved acknowledgements) are stored in the run report
//! as diagnostics instead of being propagated.

use thiserror::Error;

use crate::ack::AckId;
use crate::entity::{EntityId, Role};
use crate::event::EventId;
use crate::payload::Subject;
use crate::tag::Tag;
use crate::time::VirtualTime;

/// The top-level error type for the dispatch kernel.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum KernelError {
    // ── Scheduling ────────────────────────────────────────
    /// A delay was negative, NaN or infinite.
    #[error("invalid delay {delay}: delays must be finite and non-negative")]
    InvalidDelay { delay: f64 },

    /// An event reached a destination that is not registered.
    #[error("event {event} ({tag}) addressed to unknown entity {destination}")]
    UnknownDestination {
        event: EventId,
        tag: Tag,
        destination: EntityId,
    },

    /// A delivered event arrived with a receiver role that the tag forbids.
    #[error("{tag} is not addressed to a {role:?} entity ({destination})")]
    RoleMismatch {
        tag: Tag,
        destination: EntityId,
        role: Role,
    },

    // ── Lifecycle ─────────────────────────────────────────
    /// A lifecycle event was delivered in a state that does not permit it.
    #[error("{tag} rejected for {subject}: not allowed from state {from}")]
    InvalidTransition {
        subject: Subject,
        from: String,
        tag: Tag,
    },

    /// A request named a VM, cloudlet or file the receiver does not hold.
    #[error("{tag} names unknown {subject}")]
    UnknownSubject { subject: Subject, tag: Tag },

    /// The payload shape does not match what the tag requires.
    #[error("{tag} carried an unexpected payload ({found})")]
    PayloadMismatch { tag: Tag, found: String },

    // ── Acknowledgements ──────────────────────────────────
    /// An acknowledgement was resolved a second time.
    #[error("acknowledgement {ack} was already resolved")]
    DuplicateResolution { ack: AckId },

    /// An acknowledgement id that the correlator never issued.
    #[error("acknowledgement {ack} is unknown")]
    UnknownAck { ack: AckId },

    /// An acknowledgement was still outstanding when the run ended.
    #[error(
        "{tag} acknowledgement {ack} from {requester} to {target} unresolved since {waiting_since}"
    )]
    UnresolvedAckAtShutdown {
        ack: AckId,
        tag: Tag,
        requester: EntityId,
        target: EntityId,
        waiting_since: VirtualTime,
    },

    // ── Registry ──────────────────────────────────────────
    /// Attempted to register an entity under a name already in use.
    #[error("entity name {name:?} is already registered")]
    NameTaken { name: String },

    /// The queue drained while an entity still reported pending work.
    #[error("entity {entity} still reports pending work with an empty queue")]
    IdleWithPendingWork { entity: EntityId },

    // ── Catalog / config ──────────────────────────────────
    /// A collaborator tag collides with the kernel's reserved namespace.
    #[error("tag code {code} lies in the reserved kernel namespace")]
    ReservedTag { code: i32 },

    /// A configuration value failed validation or could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias for `Result<T, KernelError>`.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::VmId;

    #[test]
    fn test_error_display_invalid_delay() {
        let e = KernelError::InvalidDelay { delay: -2.5 };
        assert!(e.to_string().contains("-2.5"));
    }

    #[test]
    fn test_error_display_unknown_destination() {
        let e = KernelError::UnknownDestination {
            event: EventId::new(7),
            tag: Tag::VmCreate,
            destination: EntityId::new(9),
        };
        assert_eq!(
            e.to_string(),
            "event E#7 (VM_CREATE) addressed to unknown entity #9"
        );
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let e = KernelError::InvalidTransition {
            subject: Subject::Vm(VmId::new(3)),
            from: "Destroyed".into(),
            tag: Tag::VmMigrate,
        };
        let s = e.to_string();
        assert!(s.contains("VM_MIGRATE"));
        assert!(s.contains("vm-3"));
        assert!(s.contains("Destroyed"));
    }

    #[test]
    fn test_error_is_std_error() {
        let e: Box<dyn std::error::Error> =
            Box::new(KernelError::DuplicateResolution { ack: AckId::new(1) });
        assert!(!e.to_string().is_empty());
    }

    #[test]
    fn test_kernel_result_err() {
        let r: KernelResult<u32> = Err(KernelError::ReservedTag { code: 4 });
        assert!(r.is_err());
    }
}
