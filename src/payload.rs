//! Payload shapes carried by events.
//!
//! Instead of a hierarchy of message classes, every event carries one
//! [`Payload`] variant whose shape is selected by the event's tag. The
//! kernel routes payloads and reads correlation keys; it never interprets
//! anything else.

use crate::entity::EntityId;
use crate::lifecycle::CloudletState;
use crate::time::VirtualTime;

// ── Identifiers ───────────────────────────────────────────────────────

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(u32);

        impl $name {
            #[inline]
            pub fn new(raw: u32) -> Self {
                $name(raw)
            }

            #[inline]
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

id_newtype!(
    /// Identifier of a virtual machine, chosen by the requesting broker.
    VmId,
    "vm"
);
id_newtype!(
    /// Identifier of a cloudlet (job), chosen by the requesting broker.
    CloudletId,
    "cloudlet"
);
id_newtype!(
    /// Identifier of a physical host inside a datacenter.
    HostId,
    "host"
);

/// The thing a request or an acknowledgement is about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Subject {
    Vm(VmId),
    Cloudlet(CloudletId),
    File(String),
    Resource(EntityId),
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Vm(id) => write!(f, "{}", id),
            Subject::Cloudlet(id) => write!(f, "{}", id),
            Subject::File(name) => write!(f, "file {:?}", name),
            Subject::Resource(id) => write!(f, "resource {}", id),
        }
    }
}

// ── Specs ─────────────────────────────────────────────────────────────

/// What a broker asks for when it requests a VM.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct VmSpec {
    pub id: VmId,
    pub owner: EntityId,
    /// Processing speed of each PE, in million instructions per second.
    pub mips: f64,
    pub pes: u32,
    pub ram_mb: u64,
}

/// A unit of work submitted to a VM.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CloudletSpec {
    pub id: CloudletId,
    pub owner: EntityId,
    /// Work size in million instructions.
    pub length: f64,
    pub pes: u32,
}

/// A named file held in datacenter storage.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DataFile {
    pub name: String,
    pub size_mb: u64,
}

/// Sent by a datacenter to the information service on start.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceRegistration {
    pub resource: EntityId,
    pub name: String,
}

/// A datacenter's answer to `RESOURCE_CHARACTERISTICS_REQUEST`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceCharacteristics {
    pub resource: EntityId,
    pub name: String,
    pub hosts: usize,
    pub total_pes: u32,
    pub free_pes: u32,
    pub vms: usize,
}

// ── Replies ───────────────────────────────────────────────────────────

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum FailureReason {
    /// The subject was in a state that does not allow the request.
    InvalidState(String),
    /// The receiver does not hold the subject.
    UnknownSubject,
    /// The allocation policy found no room.
    NoResources,
    /// The target VM of a submission or move cannot take work.
    VmUnavailable(VmId),
    /// A file with that name is already stored.
    AlreadyExists,
    /// The payload did not match the tag.
    MalformedRequest,
    /// The destination entity was not registered when the request arrived.
    UnknownDestination,
    /// The requester gave up waiting.
    TimedOut,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::InvalidState(state) => write!(f, "invalid state {}", state),
            FailureReason::UnknownSubject => write!(f, "unknown subject"),
            FailureReason::NoResources => write!(f, "no resources"),
            FailureReason::VmUnavailable(vm) => write!(f, "{} unavailable", vm),
            FailureReason::AlreadyExists => write!(f, "already exists"),
            FailureReason::MalformedRequest => write!(f, "malformed request"),
            FailureReason::UnknownDestination => write!(f, "unknown destination"),
            FailureReason::TimedOut => write!(f, "timed out"),
        }
    }
}

/// The result carried by an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum AckOutcome {
    Success,
    Failure(FailureReason),
}

impl AckOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AckOutcome::Success)
    }
}

impl std::fmt::Display for AckOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckOutcome::Success => write!(f, "ok"),
            AckOutcome::Failure(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Payload of every `_ACK` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct AckReply {
    pub subject: Subject,
    pub outcome: AckOutcome,
}

impl AckReply {
    pub fn success(subject: Subject) -> Self {
        AckReply {
            subject,
            outcome: AckOutcome::Success,
        }
    }

    pub fn failure(subject: Subject, reason: FailureReason) -> Self {
        AckReply {
            subject,
            outcome: AckOutcome::Failure(reason),
        }
    }
}

/// Read-only view of a cloudlet, answered to `CLOUDLET_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CloudletSnapshot {
    pub cloudlet: CloudletId,
    /// `None` when the datacenter does not know the cloudlet.
    pub state: Option<CloudletState>,
    pub vm: Option<VmId>,
}

/// Final status of a cloudlet, delivered with `CLOUDLET_RETURN`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CloudletResult {
    pub cloudlet: CloudletId,
    pub state: CloudletState,
    pub vm: Option<VmId>,
    pub finished_at: VirtualTime,
    /// Simulated time actually spent executing.
    pub execution_time: f64,
}

// ── Internal events ───────────────────────────────────────────────────

/// Follow-ups a datacenter schedules for itself under `VM_DATACENTER_EVENT`.
/// Each names the owning broker, since ids are only unique per owner.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum DatacenterEvent {
    VmBooted(EntityId, VmId),
    MigrationComplete(EntityId, VmId),
    CloudletStart(EntityId, CloudletId),
    CloudletFinish(EntityId, CloudletId),
    CloudletRebound(EntityId, CloudletId),
}

/// Follow-ups a broker schedules for itself under `VM_BROKER_EVENT`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum BrokerEvent {
    /// Fires when an acknowledgement should have arrived by now.
    AckDeadline(crate::ack::AckId),
}

// ── Payload ───────────────────────────────────────────────────────────

/// The closed set of payload shapes.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Payload {
    /// No content (control tags, heartbeats).
    #[default]
    Empty,
    /// Human-readable text, convenient for tests and custom tags.
    Text(String),
    /// Opaque bytes for collaborator-defined tags.
    Data(Vec<u8>),

    Registration(ResourceRegistration),
    ResourceList(Vec<EntityId>),
    Characteristics(ResourceCharacteristics),

    VmCreate(VmSpec),
    Vm(VmId),
    VmMigrate { vm: VmId, host: HostId },
    File(DataFile),
    FileName(String),

    CloudletSubmit { cloudlet: CloudletSpec, vm: VmId },
    Cloudlet(CloudletId),
    CloudletMove { cloudlet: CloudletId, vm: VmId },
    CloudletStatus(CloudletSnapshot),
    CloudletReturn(CloudletResult),

    Ack(AckReply),

    Datacenter(DatacenterEvent),
    Broker(BrokerEvent),
}

impl Payload {
    /// Short variant name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Empty => "Empty",
            Payload::Text(_) => "Text",
            Payload::Data(_) => "Data",
            Payload::Registration(_) => "Registration",
            Payload::ResourceList(_) => "ResourceList",
            Payload::Characteristics(_) => "Characteristics",
            Payload::VmCreate(_) => "VmCreate",
            Payload::Vm(_) => "Vm",
            Payload::VmMigrate { .. } => "VmMigrate",
            Payload::File(_) => "File",
            Payload::FileName(_) => "FileName",
            Payload::CloudletSubmit { .. } => "CloudletSubmit",
            Payload::Cloudlet(_) => "Cloudlet",
            Payload::CloudletMove { .. } => "CloudletMove",
            Payload::CloudletStatus(_) => "CloudletStatus",
            Payload::CloudletReturn(_) => "CloudletReturn",
            Payload::Ack(_) => "Ack",
            Payload::Datacenter(_) => "Datacenter",
            Payload::Broker(_) => "Broker",
        }
    }

    /// The subject this payload is about, if it names one.
    pub fn subject(&self) -> Option<Subject> {
        match self {
            Payload::VmCreate(spec) => Some(Subject::Vm(spec.id)),
            Payload::Vm(vm) | Payload::VmMigrate { vm, .. } => Some(Subject::Vm(*vm)),
            Payload::File(file) => Some(Subject::File(file.name.clone())),
            Payload::FileName(name) => Some(Subject::File(name.clone())),
            Payload::CloudletSubmit { cloudlet, .. } => Some(Subject::Cloudlet(cloudlet.id)),
            Payload::Cloudlet(id) | Payload::CloudletMove { cloudlet: id, .. } => {
                Some(Subject::Cloudlet(*id))
            }
            Payload::CloudletStatus(snap) => Some(Subject::Cloudlet(snap.cloudlet)),
            Payload::CloudletReturn(res) => Some(Subject::Cloudlet(res.cloudlet)),
            Payload::Ack(reply) => Some(reply.subject.clone()),
            Payload::Registration(reg) => Some(Subject::Resource(reg.resource)),
            Payload::Characteristics(c) => Some(Subject::Resource(c.resource)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Text(s) if s.len() > 32 => write!(f, "Text({:?}…)", &s[..32]),
            Payload::Text(s) => write!(f, "Text({:?})", s),
            Payload::Data(d) => write!(f, "Data({} bytes)", d.len()),
            Payload::Ack(reply) => write!(f, "Ack({}, {})", reply.subject, reply.outcome),
            other => match other.subject() {
                Some(subject) => write!(f, "{}({})", other.kind(), subject),
                None => f.write_str(other.kind()),
            },
        }
    }
}
