//! The message catalog: the closed set of event tags.
//!
//! Kernel tags occupy a reserved integer namespace (negative numbers,
//! `0..=299` and the legacy baud-rate constant `9600`). Anything a
//! collaborator defines for itself must live outside that namespace and is
//! carried as [`Tag::Custom`].

use crate::entity::Role;
use crate::error::{KernelError, KernelResult};

/// Legacy constant kept in the reserved namespace.
pub const DEFAULT_BAUD_RATE: i32 = 9600;

/// Every tag the kernel knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum Tag {
    // ── Kernel control ────────────────────────────────────
    EndOfSimulation,
    AbruptEndOfSimulation,

    // ── Resource discovery ────────────────────────────────
    RegisterResource,
    RegisterResourceAr,
    ResourceList,
    ResourceArList,
    ResourceCharacteristics,
    ResourceCharacteristicsRequest,

    // ── Cloudlets ─────────────────────────────────────────
    CloudletReturn,
    CloudletSubmit,
    CloudletSubmitAck,
    CloudletCancel,
    CloudletStatus,
    CloudletPause,
    CloudletPauseAck,
    CloudletResume,
    CloudletResumeAck,
    CloudletMove,
    CloudletMoveAck,

    // ── Virtual machines ──────────────────────────────────
    VmCreate,
    VmCreateAck,
    VmDestroy,
    VmDestroyAck,
    VmMigrate,
    VmMigrateAck,
    VmDataAdd,
    VmDataAddAck,
    VmDataDel,
    VmDataDelAck,

    // ── Internal ──────────────────────────────────────────
    VmDatacenterEvent,
    VmBrokerEvent,

    /// A collaborator-defined tag outside the reserved namespace.
    Custom(CustomTag),
}

/// Code of a collaborator-defined tag.
///
/// The field is private: [`Tag::custom`] and [`Tag::from_code`] are the only
/// ways to build one, so a custom code never shadows a kernel tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serialize",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "i32", into = "i32")
)]
pub struct CustomTag(i32);

impl CustomTag {
    pub fn code(self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for CustomTag {
    type Error = KernelError;

    fn try_from(code: i32) -> KernelResult<Self> {
        if is_reserved(code) {
            return Err(KernelError::ReservedTag { code });
        }
        Ok(CustomTag(code))
    }
}

impl From<CustomTag> for i32 {
    fn from(tag: CustomTag) -> i32 {
        tag.0
    }
}

/// All kernel-defined tags, in code order. Used for reverse lookup.
const CATALOG: [Tag; 31] = [
    Tag::AbruptEndOfSimulation,
    Tag::EndOfSimulation,
    Tag::RegisterResource,
    Tag::RegisterResourceAr,
    Tag::ResourceList,
    Tag::ResourceArList,
    Tag::ResourceCharacteristics,
    Tag::ResourceCharacteristicsRequest,
    Tag::CloudletReturn,
    Tag::CloudletSubmit,
    Tag::CloudletSubmitAck,
    Tag::CloudletCancel,
    Tag::CloudletStatus,
    Tag::CloudletPause,
    Tag::CloudletPauseAck,
    Tag::CloudletResume,
    Tag::CloudletResumeAck,
    Tag::CloudletMove,
    Tag::CloudletMoveAck,
    Tag::VmCreate,
    Tag::VmCreateAck,
    Tag::VmDestroy,
    Tag::VmDestroyAck,
    Tag::VmMigrate,
    Tag::VmMigrateAck,
    Tag::VmDataAdd,
    Tag::VmDataAddAck,
    Tag::VmDataDel,
    Tag::VmDataDelAck,
    Tag::VmDatacenterEvent,
    Tag::VmBrokerEvent,
];

/// Whether `code` falls in the namespace reserved for kernel tags.
pub fn is_reserved(code: i32) -> bool {
    code < 0 || (0..=299).contains(&code) || code == DEFAULT_BAUD_RATE
}

impl Tag {
    /// Build a collaborator-defined tag.
    ///
    /// Fails with [`KernelError::ReservedTag`] when `code` collides with the
    /// kernel's reserved namespace.
    pub fn custom(code: i32) -> KernelResult<Tag> {
        CustomTag::try_from(code).map(Tag::Custom)
    }

    /// The wire integer for this tag.
    pub fn code(self) -> i32 {
        match self {
            Tag::EndOfSimulation => -1,
            Tag::AbruptEndOfSimulation => -2,
            Tag::RegisterResource => 2,
            Tag::RegisterResourceAr => 3,
            Tag::ResourceList => 4,
            Tag::ResourceArList => 5,
            Tag::ResourceCharacteristics => 6,
            Tag::ResourceCharacteristicsRequest => 15,
            Tag::CloudletReturn => 20,
            Tag::CloudletSubmit => 21,
            Tag::CloudletSubmitAck => 22,
            Tag::CloudletCancel => 23,
            Tag::CloudletStatus => 24,
            Tag::CloudletPause => 25,
            Tag::CloudletPauseAck => 26,
            Tag::CloudletResume => 27,
            Tag::CloudletResumeAck => 28,
            Tag::CloudletMove => 29,
            Tag::CloudletMoveAck => 30,
            Tag::VmCreate => 31,
            Tag::VmCreateAck => 32,
            Tag::VmDestroy => 33,
            Tag::VmDestroyAck => 34,
            Tag::VmMigrate => 35,
            Tag::VmMigrateAck => 36,
            Tag::VmDataAdd => 37,
            Tag::VmDataAddAck => 38,
            Tag::VmDataDel => 39,
            Tag::VmDataDelAck => 40,
            Tag::VmDatacenterEvent => 41,
            Tag::VmBrokerEvent => 42,
            Tag::Custom(custom) => custom.code(),
        }
    }

    /// Reverse of [`Tag::code`].
    ///
    /// Reserved codes with no kernel meaning (for instance the legacy
    /// network-event codes) yield `None`; collaborators must remap those
    /// into the custom range.
    pub fn from_code(code: i32) -> Option<Tag> {
        match CustomTag::try_from(code) {
            Ok(custom) => Some(Tag::Custom(custom)),
            Err(_) => CATALOG.iter().copied().find(|t| t.code() == code),
        }
    }

    /// Canonical upper-snake name.
    pub fn name(self) -> &'static str {
        match self {
            Tag::EndOfSimulation => "END_OF_SIMULATION",
            Tag::AbruptEndOfSimulation => "ABRUPT_END_OF_SIMULATION",
            Tag::RegisterResource => "REGISTER_RESOURCE",
            Tag::RegisterResourceAr => "REGISTER_RESOURCE_AR",
            Tag::ResourceList => "RESOURCE_LIST",
            Tag::ResourceArList => "RESOURCE_AR_LIST",
            Tag::ResourceCharacteristics => "RESOURCE_CHARACTERISTICS",
            Tag::ResourceCharacteristicsRequest => "RESOURCE_CHARACTERISTICS_REQUEST",
            Tag::CloudletReturn => "CLOUDLET_RETURN",
            Tag::CloudletSubmit => "CLOUDLET_SUBMIT",
            Tag::CloudletSubmitAck => "CLOUDLET_SUBMIT_ACK",
            Tag::CloudletCancel => "CLOUDLET_CANCEL",
            Tag::CloudletStatus => "CLOUDLET_STATUS",
            Tag::CloudletPause => "CLOUDLET_PAUSE",
            Tag::CloudletPauseAck => "CLOUDLET_PAUSE_ACK",
            Tag::CloudletResume => "CLOUDLET_RESUME",
            Tag::CloudletResumeAck => "CLOUDLET_RESUME_ACK",
            Tag::CloudletMove => "CLOUDLET_MOVE",
            Tag::CloudletMoveAck => "CLOUDLET_MOVE_ACK",
            Tag::VmCreate => "VM_CREATE",
            Tag::VmCreateAck => "VM_CREATE_ACK",
            Tag::VmDestroy => "VM_DESTROY",
            Tag::VmDestroyAck => "VM_DESTROY_ACK",
            Tag::VmMigrate => "VM_MIGRATE",
            Tag::VmMigrateAck => "VM_MIGRATE_ACK",
            Tag::VmDataAdd => "VM_DATA_ADD",
            Tag::VmDataAddAck => "VM_DATA_ADD_ACK",
            Tag::VmDataDel => "VM_DATA_DEL",
            Tag::VmDataDelAck => "VM_DATA_DEL_ACK",
            Tag::VmDatacenterEvent => "VM_DATACENTER_EVENT",
            Tag::VmBrokerEvent => "VM_BROKER_EVENT",
            Tag::Custom(_) => "CUSTOM",
        }
    }

    /// The tag a reply to this request travels under.
    ///
    /// Acknowledgeable requests answer with their `_ACK` twin. Queries that
    /// have no twin answer with their own tag. `None` means the tag is not a
    /// request.
    pub fn reply_tag(self) -> Option<Tag> {
        match self {
            Tag::CloudletSubmit => Some(Tag::CloudletSubmitAck),
            Tag::CloudletPause => Some(Tag::CloudletPauseAck),
            Tag::CloudletResume => Some(Tag::CloudletResumeAck),
            Tag::CloudletMove => Some(Tag::CloudletMoveAck),
            Tag::VmCreate => Some(Tag::VmCreateAck),
            Tag::VmDestroy => Some(Tag::VmDestroyAck),
            Tag::VmMigrate => Some(Tag::VmMigrateAck),
            Tag::VmDataAdd => Some(Tag::VmDataAddAck),
            Tag::VmDataDel => Some(Tag::VmDataDelAck),
            Tag::CloudletCancel | Tag::CloudletStatus => Some(self),
            Tag::ResourceList | Tag::ResourceArList => Some(self),
            Tag::ResourceCharacteristicsRequest => Some(Tag::ResourceCharacteristics),
            Tag::RegisterResource | Tag::RegisterResourceAr => Some(self),
            Tag::Custom(_) => Some(self),
            _ => None,
        }
    }

    /// Returns `true` for the `_ACK` half of a request/acknowledgement pair.
    pub fn is_ack(self) -> bool {
        matches!(
            self,
            Tag::CloudletSubmitAck
                | Tag::CloudletPauseAck
                | Tag::CloudletResumeAck
                | Tag::CloudletMoveAck
                | Tag::VmCreateAck
                | Tag::VmDestroyAck
                | Tag::VmMigrateAck
                | Tag::VmDataAddAck
                | Tag::VmDataDelAck
        )
    }

    /// The request an `_ACK` tag answers.
    pub fn request_of(self) -> Option<Tag> {
        match self {
            Tag::CloudletSubmitAck => Some(Tag::CloudletSubmit),
            Tag::CloudletPauseAck => Some(Tag::CloudletPause),
            Tag::CloudletResumeAck => Some(Tag::CloudletResume),
            Tag::CloudletMoveAck => Some(Tag::CloudletMove),
            Tag::VmCreateAck => Some(Tag::VmCreate),
            Tag::VmDestroyAck => Some(Tag::VmDestroy),
            Tag::VmMigrateAck => Some(Tag::VmMigrate),
            Tag::VmDataAddAck => Some(Tag::VmDataAdd),
            Tag::VmDataDelAck => Some(Tag::VmDataDel),
            _ => None,
        }
    }

    /// Whether this tag ends the run when it reaches the kernel.
    pub fn is_end_of_simulation(self) -> bool {
        matches!(self, Tag::EndOfSimulation | Tag::AbruptEndOfSimulation)
    }

    /// Roles allowed to receive this tag.
    pub fn receivers(self) -> &'static [Role] {
        use Role::*;
        match self {
            Tag::EndOfSimulation | Tag::AbruptEndOfSimulation => &[Kernel],
            Tag::RegisterResource | Tag::RegisterResourceAr => &[InformationService, Datacenter],
            Tag::ResourceList | Tag::ResourceArList => &[InformationService, Broker],
            Tag::ResourceCharacteristicsRequest => &[Datacenter],
            Tag::ResourceCharacteristics => &[Broker],
            Tag::CloudletSubmit
            | Tag::CloudletPause
            | Tag::CloudletResume
            | Tag::CloudletMove
            | Tag::VmCreate
            | Tag::VmDestroy
            | Tag::VmMigrate
            | Tag::VmDataAdd
            | Tag::VmDataDel
            | Tag::VmDatacenterEvent => &[Datacenter],
            Tag::CloudletCancel | Tag::CloudletStatus => &[Datacenter, Broker],
            Tag::CloudletReturn
            | Tag::CloudletSubmitAck
            | Tag::CloudletPauseAck
            | Tag::CloudletResumeAck
            | Tag::CloudletMoveAck
            | Tag::VmCreateAck
            | Tag::VmDestroyAck
            | Tag::VmMigrateAck
            | Tag::VmDataAddAck
            | Tag::VmDataDelAck
            | Tag::VmBrokerEvent => &[Broker],
            Tag::Custom(_) => &[Any],
        }
    }

    /// Roles allowed to send this tag.
    pub fn senders(self) -> &'static [Role] {
        use Role::*;
        match self {
            Tag::EndOfSimulation | Tag::AbruptEndOfSimulation => &[Any],
            Tag::RegisterResource | Tag::RegisterResourceAr => &[Datacenter, InformationService],
            Tag::ResourceList | Tag::ResourceArList => &[Broker, InformationService],
            Tag::ResourceCharacteristicsRequest => &[Broker],
            Tag::ResourceCharacteristics => &[Datacenter],
            Tag::CloudletSubmit
            | Tag::CloudletPause
            | Tag::CloudletResume
            | Tag::CloudletMove
            | Tag::VmCreate
            | Tag::VmDestroy
            | Tag::VmMigrate
            | Tag::VmDataAdd
            | Tag::VmDataDel
            | Tag::VmBrokerEvent => &[Broker],
            Tag::CloudletCancel | Tag::CloudletStatus => &[Broker, Datacenter],
            Tag::CloudletReturn
            | Tag::CloudletSubmitAck
            | Tag::CloudletPauseAck
            | Tag::CloudletResumeAck
            | Tag::CloudletMoveAck
            | Tag::VmCreateAck
            | Tag::VmDestroyAck
            | Tag::VmMigrateAck
            | Tag::VmDataAddAck
            | Tag::VmDataDelAck
            | Tag::VmDatacenterEvent => &[Datacenter],
            Tag::Custom(_) => &[Any],
        }
    }

    /// Whether an entity with `role` may legally receive this tag.
    pub fn accepts_receiver(self, role: Role) -> bool {
        role == Role::Any || self.receivers().iter().any(|r| *r == Role::Any || *r == role)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tag::Custom(custom) => write!(f, "CUSTOM({})", custom.code()),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_catalog() {
        for tag in CATALOG {
            assert_eq!(Tag::from_code(tag.code()), Some(tag), "{}", tag);
        }
    }

    #[test]
    fn test_codes_are_distinct_and_reserved() {
        let mut codes: Vec<i32> = CATALOG.iter().map(|t| t.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), CATALOG.len());
        assert!(codes.iter().all(|c| is_reserved(*c)));
    }

    #[test]
    fn test_original_code_values() {
        assert_eq!(Tag::EndOfSimulation.code(), -1);
        assert_eq!(Tag::AbruptEndOfSimulation.code(), -2);
        assert_eq!(Tag::CloudletSubmit.code(), 21);
        assert_eq!(Tag::VmCreateAck.code(), 32);
        assert_eq!(Tag::VmBrokerEvent.code(), 42);
    }

    #[test]
    fn test_custom_rejects_reserved_namespace() {
        assert_eq!(Tag::custom(-7), Err(KernelError::ReservedTag { code: -7 }));
        assert_eq!(Tag::custom(150), Err(KernelError::ReservedTag { code: 150 }));
        assert_eq!(Tag::custom(9600), Err(KernelError::ReservedTag { code: 9600 }));
        assert_eq!(Tag::custom(300).map(Tag::code), Ok(300));
        assert_eq!(Tag::from_code(1000), Tag::custom(1000).ok());
    }

    #[test]
    fn test_custom_codes_never_shadow_kernel_tags() {
        for tag in CATALOG {
            assert!(CustomTag::try_from(tag.code()).is_err(), "{}", tag);
            assert_eq!(Tag::from_code(tag.code()), Some(tag));
        }
        assert!(CustomTag::try_from(-1).is_err());
        let custom = CustomTag::try_from(7000).unwrap();
        assert_eq!(i32::from(custom), 7000);
        assert_eq!(Tag::Custom(custom).code(), 7000);
        assert_ne!(Tag::Custom(custom), Tag::EndOfSimulation);
    }

    #[test]
    fn test_unassigned_reserved_codes_have_no_tag() {
        // Legacy network-event codes 43..=48 carry no kernel semantics.
        for code in 43..=48 {
            assert_eq!(Tag::from_code(code), None);
        }
    }

    #[test]
    fn test_reply_tags() {
        assert_eq!(Tag::VmCreate.reply_tag(), Some(Tag::VmCreateAck));
        assert_eq!(Tag::CloudletMove.reply_tag(), Some(Tag::CloudletMoveAck));
        assert_eq!(Tag::CloudletCancel.reply_tag(), Some(Tag::CloudletCancel));
        assert_eq!(
            Tag::ResourceCharacteristicsRequest.reply_tag(),
            Some(Tag::ResourceCharacteristics)
        );
        assert_eq!(Tag::VmCreateAck.reply_tag(), None);
        assert_eq!(Tag::EndOfSimulation.reply_tag(), None);
    }

    #[test]
    fn test_ack_pairs_are_consistent() {
        for tag in CATALOG {
            if let Some(req) = tag.request_of() {
                assert!(tag.is_ack());
                assert_eq!(req.reply_tag(), Some(tag));
            }
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(Tag::CloudletStatus.name(), "CLOUDLET_STATUS");
        assert_eq!(Tag::VmDataDelAck.to_string(), "VM_DATA_DEL_ACK");
        assert_eq!(Tag::custom(512).unwrap().to_string(), "CUSTOM(512)");
    }

    #[test]
    fn test_receiver_roles() {
        assert!(Tag::VmCreate.accepts_receiver(Role::Datacenter));
        assert!(!Tag::VmCreate.accepts_receiver(Role::Broker));
        assert!(Tag::VmCreateAck.accepts_receiver(Role::Broker));
        assert!(Tag::custom(500).unwrap().accepts_receiver(Role::Broker));
        assert!(Tag::VmCreate.accepts_receiver(Role::Any));
    }
}
