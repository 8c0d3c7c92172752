//! Error types for the OpenSwitch core

use thiserror::Error;

/// OpenFlow protocol error category, as carried in OFPT_ERROR messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum OfpErrorType {
    BadRequest = 1,
    BadAction = 2,
    BadInstruction = 3,
    BadMatch = 4,
    FlowModFailed = 5,
    GroupModFailed = 6,
    PortModFailed = 7,
    TableModFailed = 8,
    QueueOpFailed = 9,
    SwitchConfigFailed = 10,
    RoleRequestFailed = 11,
    MeterModFailed = 12,
    TableFeaturesFailed = 13,
}

/// OFPET_BAD_REQUEST codes used by the core.
pub mod bad_request {
    /// Bad table id in a stats request.
    pub const BAD_TABLE_ID: u16 = 13;
}

/// OFPET_BAD_ACTION codes used by the core.
pub mod bad_action {
    /// Output port does not exist and is not reserved.
    pub const BAD_OUT_PORT: u16 = 4;
    /// Referenced group does not exist.
    pub const BAD_OUT_GROUP: u16 = 9;
    /// Encap/decap header type not handled.
    pub const BAD_HEADER_TYPE: u16 = 16;
}

/// OFPET_BAD_INSTRUCTION codes used by the core.
pub mod bad_instruction {
    /// Unknown instruction kind.
    pub const UNKNOWN_INST: u16 = 0;
    /// Goto-table target beyond OFPTT_MAX.
    pub const BAD_TABLE_ID: u16 = 3;
}

/// OFPET_BAD_MATCH codes used by the core.
pub mod bad_match {
    /// Masked value has bits outside the mask.
    pub const BAD_WILDCARDS: u16 = 5;
    /// OXM field appears twice in one match list.
    pub const DUP_FIELD: u16 = 7;
    /// OXM prerequisite not satisfied.
    pub const BAD_PREREQ: u16 = 6;
}

/// OFPET_FLOW_MOD_FAILED codes used by the core.
pub mod flow_mod_failed {
    /// Unspecified failure (duplicate instruction kind).
    pub const UNKNOWN: u16 = 0;
    /// Table does not exist or OFPTT_ALL on add/modify.
    pub const BAD_TABLE_ID: u16 = 2;
    /// CHECK_OVERLAP set and an overlapping flow exists.
    pub const OVERLAP: u16 = 1;
}

/// OFPET_GROUP_MOD_FAILED codes used by the core.
pub mod group_mod_failed {
    /// Group id already present.
    pub const GROUP_EXISTS: u16 = 0;
    /// Group id not present.
    pub const UNKNOWN_GROUP: u16 = 8;
    /// Adding the group would close a forwarding loop.
    pub const LOOP: u16 = 2;
    /// Malformed group, e.g. an INDIRECT group without exactly one bucket.
    pub const INVALID_GROUP: u16 = 5;
}

/// OFPET_METER_MOD_FAILED codes used by the core.
pub mod meter_mod_failed {
    /// Meter id already present.
    pub const METER_EXISTS: u16 = 1;
    /// Meter id not present.
    pub const UNKNOWN_METER: u16 = 3;
}

/// A protocol-level `(type, code)` error pair, surfaced verbatim to the
/// controller by the wire layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpError {
    /// Error category.
    pub etype: OfpErrorType,
    /// Category-specific code.
    pub code: u16,
}

impl OfpError {
    /// Build an error pair.
    pub const fn new(etype: OfpErrorType, code: u16) -> Self {
        OfpError { etype, code }
    }
}

impl std::fmt::Display for OfpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.etype, self.code)
    }
}

/// Process-level error taxonomy for the switch core.
#[derive(Error, Debug)]
pub enum SwitchError {
    /// dpid, bridge, port, queue, meter or group not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// Name or id collision on create.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Structural problem in the request.
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    /// OpenFlow validation failure, forwarded to the controller.
    #[error("openflow error {0}")]
    Ofp(OfpError),

    /// Collaborator I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwitchError {
    /// Shorthand for building an OpenFlow error result.
    pub fn ofp(etype: OfpErrorType, code: u16) -> Self {
        SwitchError::Ofp(OfpError::new(etype, code))
    }

    /// The protocol error pair, when this is a protocol error.
    pub fn as_ofp(&self) -> Option<OfpError> {
        match self {
            SwitchError::Ofp(e) => Some(*e),
            _ => None,
        }
    }
}

/// Result type for the switch core.
pub type SwitchResult<T> = Result<T, SwitchError>;
