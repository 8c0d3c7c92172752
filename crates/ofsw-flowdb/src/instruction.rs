//! Flow instructions
//!
//! A flow carries at most one instruction of each kind; execution follows
//! the fixed order METER, APPLY_ACTIONS, CLEAR_ACTIONS, WRITE_ACTIONS,
//! WRITE_METADATA, GOTO_TABLE.

use ofsw_common::error::{bad_instruction, flow_mod_failed, OfpErrorType};
use ofsw_common::{SwitchError, SwitchResult};
use serde::{Deserialize, Serialize};

use crate::action::ActionList;

/// A decoded flow instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Apply a meter before anything else.
    Meter(u32),
    /// Execute an action list immediately.
    ApplyActions(ActionList),
    /// Clear the accumulated action set.
    ClearActions,
    /// Merge actions into the action set.
    WriteActions(ActionList),
    /// Update the metadata register through a mask.
    WriteMetadata {
        /// New metadata bits.
        metadata: u64,
        /// Bits to replace.
        mask: u64,
    },
    /// Continue the pipeline at another table.
    GotoTable(u8),
    /// Experimenter hook.
    Experimenter(u32),
}

/// Per-flow instruction storage: at most one of each kind, pre-sorted into
/// execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionSet {
    /// OFPIT_METER.
    pub meter: Option<u32>,
    /// OFPIT_APPLY_ACTIONS.
    pub apply_actions: Option<ActionList>,
    /// OFPIT_CLEAR_ACTIONS.
    pub clear_actions: bool,
    /// OFPIT_WRITE_ACTIONS.
    pub write_actions: Option<ActionList>,
    /// OFPIT_WRITE_METADATA as (metadata, mask).
    pub write_metadata: Option<(u64, u64)>,
    /// OFPIT_GOTO_TABLE.
    pub goto_table: Option<u8>,
    /// OFPIT_EXPERIMENTER.
    pub experimenter: Option<u32>,
}

impl InstructionSet {
    /// Map an instruction list into the per-kind array. A repeated kind is
    /// FLOW_MOD_FAILED/UNKNOWN, mirroring the table-mod validation path.
    pub fn from_list(list: Vec<Instruction>) -> SwitchResult<Self> {
        let mut set = InstructionSet::default();
        for inst in list {
            let dup = match inst {
                Instruction::Meter(id) => set.meter.replace(id).is_some(),
                Instruction::ApplyActions(actions) => {
                    set.apply_actions.replace(actions).is_some()
                }
                Instruction::ClearActions => {
                    let dup = set.clear_actions;
                    set.clear_actions = true;
                    dup
                }
                Instruction::WriteActions(actions) => {
                    set.write_actions.replace(actions).is_some()
                }
                Instruction::WriteMetadata { metadata, mask } => {
                    set.write_metadata.replace((metadata, mask)).is_some()
                }
                Instruction::GotoTable(table_id) => set.goto_table.replace(table_id).is_some(),
                Instruction::Experimenter(id) => set.experimenter.replace(id).is_some(),
            };
            if dup {
                tracing::info!("duplicate instruction kind");
                return Err(SwitchError::ofp(
                    OfpErrorType::FlowModFailed,
                    flow_mod_failed::UNKNOWN,
                ));
            }
        }
        Ok(set)
    }

    /// Rebuild the list form, in execution order, for stats replies.
    pub fn to_list(&self) -> Vec<Instruction> {
        let mut list = Vec::new();
        if let Some(id) = self.meter {
            list.push(Instruction::Meter(id));
        }
        if let Some(actions) = &self.apply_actions {
            list.push(Instruction::ApplyActions(actions.clone()));
        }
        if self.clear_actions {
            list.push(Instruction::ClearActions);
        }
        if let Some(actions) = &self.write_actions {
            list.push(Instruction::WriteActions(actions.clone()));
        }
        if let Some((metadata, mask)) = self.write_metadata {
            list.push(Instruction::WriteMetadata { metadata, mask });
        }
        if let Some(table_id) = self.goto_table {
            list.push(Instruction::GotoTable(table_id));
        }
        if let Some(id) = self.experimenter {
            list.push(Instruction::Experimenter(id));
        }
        list
    }

    /// Action lists of both WRITE_ACTIONS and APPLY_ACTIONS.
    pub fn action_lists(&self) -> impl Iterator<Item = &ActionList> {
        self.apply_actions.iter().chain(self.write_actions.iter())
    }

    /// Mutable action lists of both WRITE_ACTIONS and APPLY_ACTIONS.
    pub fn action_lists_mut(&mut self) -> impl Iterator<Item = &mut ActionList> {
        self.apply_actions
            .iter_mut()
            .chain(self.write_actions.iter_mut())
    }
}

/// Validate a goto-table target against OFPTT_MAX.
pub fn check_goto_table(table_id: u8) -> SwitchResult<()> {
    if table_id > ofsw_common::openflow::OFPTT_MAX {
        tracing::info!(table_id, "goto-table target out of range");
        return Err(SwitchError::ofp(
            OfpErrorType::BadInstruction,
            bad_instruction::BAD_TABLE_ID,
        ));
    }
    Ok(())
}
