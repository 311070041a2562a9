//! Post-run report: how the run ended and everything that went wrong.

use crate::entity::EntityId;
use crate::error::KernelError;
use crate::time::VirtualTime;

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum EndReason {
    /// END_OF_SIMULATION was delivered and the instant drained.
    EndOfSimulation,
    /// ABRUPT_END_OF_SIMULATION was delivered.
    AbruptEnd,
    /// No events were left.
    QueueExhausted,
    /// The configured delivery limit was reached.
    EventLimit,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndReason::EndOfSimulation => "end of simulation",
            EndReason::AbruptEnd => "abrupt end",
            EndReason::QueueExhausted => "queue exhausted",
            EndReason::EventLimit => "event limit",
        };
        f.write_str(s)
    }
}

/// A non-fatal error recorded during the run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostic {
    pub at: VirtualTime,
    /// Entity that reported it; [`EntityId::KERNEL`] for dispatch errors.
    pub reporter: EntityId,
    pub error: KernelError,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {}] {}", self.at, self.reporter, self.error)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct RunReport {
    pub end_reason: EndReason,
    pub final_time: VirtualTime,
    /// Events handed to an entity handler.
    pub events_delivered: u64,
    /// Events dropped because their destination was not registered.
    pub events_dropped: u64,
    /// Events still queued when the loop stopped.
    pub events_undelivered: usize,
    pub diagnostics: Vec<Diagnostic>,
    /// Digest of the dispatch trace, when tracing was on.
    pub trace_digest: Option<u64>,
}

impl RunReport {
    /// `true` when nothing was diagnosed.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn rejected_transitions(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d.error, KernelError::InvalidTransition { .. }))
    }

    pub fn dispatch_errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d.error, KernelError::UnknownDestination { .. }))
    }

    pub fn unresolved_acks(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d.error, KernelError::UnresolvedAckAtShutdown { .. }))
    }

    /// Serialize the report as pretty JSON.
    #[cfg(feature = "serialize")]
    pub fn to_json(&self) -> crate::error::KernelResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| KernelError::InvalidConfig(format!("report serialization: {}", e)))
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "run ended ({}) at {}: {} delivered, {} dropped, {} undelivered",
            self.end_reason,
            self.final_time,
            self.events_delivered,
            self.events_dropped,
            self.events_undelivered
        )?;
        if let Some(digest) = self.trace_digest {
            writeln!(f, "trace digest {:016x}", digest)?;
        }
        for d in &self.diagnostics {
            writeln!(f, "  {}", d)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::AckId;
    use crate::tag::Tag;

    fn report(diagnostics: Vec<Diagnostic>) -> RunReport {
        RunReport {
            end_reason: EndReason::QueueExhausted,
            final_time: VirtualTime::new(4.0),
            events_delivered: 3,
            events_dropped: 0,
            events_undelivered: 0,
            diagnostics,
            trace_digest: Some(0xabc),
        }
    }

    #[test]
    fn test_filters() {
        let unresolved = Diagnostic {
            at: VirtualTime::new(4.0),
            reporter: EntityId::KERNEL,
            error: KernelError::UnresolvedAckAtShutdown {
                ack: AckId::new(0),
                tag: Tag::VmCreate,
                requester: EntityId::new(1),
                target: EntityId::new(2),
                waiting_since: VirtualTime::ZERO,
            },
        };
        let r = report(vec![unresolved]);
        assert!(!r.is_clean());
        assert_eq!(r.unresolved_acks().count(), 1);
        assert_eq!(r.rejected_transitions().count(), 0);
        assert_eq!(r.dispatch_errors().count(), 0);
    }

    #[test]
    fn test_display() {
        let s = report(vec![]).to_string();
        assert!(s.contains("queue exhausted"));
        assert!(s.contains("0000000000000abc"));
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn test_to_json() {
        let json = report(vec![]).to_json().unwrap();
        assert!(json.contains("QueueExhausted"));
    }
}
