//! The flow database and cross-table control operations
//!
//! [`SwitchTables`] bundles the flow tables with the group and meter tables
//! because flow-mod validation reaches across all three: meters count their
//! referencing flows, groups hold back-references for OFPRR_GROUP_DELETE,
//! and deletes filter on referenced ports and groups.
//!
//! Every method here runs under the owning bridge's write barrier; packet
//! workers only touch the atomic counters.

use std::collections::HashMap;
use std::sync::Arc;

use ofsw_common::error::{bad_action, bad_request, flow_mod_failed, meter_mod_failed, OfpErrorType};
use ofsw_common::openflow::{
    FlowModCommand, FlowRemovedReason, OFPFF_CHECK_OVERLAP, OFPFF_RESET_COUNTS,
    OFPFF_SEND_FLOW_REM, OFPG_ANY, OFPP_ALL, OFPP_ANY, OFPP_CONTROLLER, OFPP_FLOOD, OFPP_LOCAL,
    OFPP_NORMAL, OFPP_TABLE, OFPTT_ALL,
};
use ofsw_common::{SwitchError, SwitchResult, Timestamp};
use serde::{Deserialize, Serialize};

use crate::action::ActionBody;
use crate::flow::{Flow, FlowId, FlowRemoved, FlowStats};
use crate::group::{Bucket, GroupTable};
use crate::instruction::{check_goto_table, Instruction, InstructionSet};
use crate::meter::{MeterBand, MeterTable};
use crate::msgs::{FlowMod, FlowStatsRequest, GroupMod, MeterMod};
use crate::oxm::{check_masks, check_prerequisites, match_subsumes, Match};
use crate::table::{Table, TableStats};

/// Port existence oracle, implemented by the port layer.
pub trait PortLookup {
    /// `true` when a non-reserved port number is configured.
    fn port_exists(&self, port_no: u32) -> bool;
}

/// Aggregate stats multipart reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Sum of packet counters.
    pub packet_count: u64,
    /// Sum of byte counters.
    pub byte_count: u64,
    /// Matching flows.
    pub flow_count: u32,
}

/// Tables indexed by table id. Tables are created on first use and stay for
/// the life of the bridge.
#[derive(Debug, Default)]
pub struct FlowDb {
    tables: HashMap<u8, Table>,
    next_flow_id: FlowId,
    /// One live entry per flow with a non-zero timeout.
    timer_entries: HashMap<FlowId, u8>,
}

impl FlowDb {
    /// Empty database.
    pub fn new() -> Self {
        FlowDb::default()
    }

    /// Table by id, if it has ever been used.
    pub fn table(&self, table_id: u8) -> Option<&Table> {
        self.tables.get(&table_id)
    }

    /// Mutable table by id.
    pub fn table_mut(&mut self, table_id: u8) -> Option<&mut Table> {
        self.tables.get_mut(&table_id)
    }

    fn get_or_create(&mut self, table_id: u8) -> &mut Table {
        self.tables.entry(table_id).or_insert_with(Table::new)
    }

    fn next_id(&mut self) -> FlowId {
        self.next_flow_id += 1;
        self.next_flow_id
    }

    /// Table ids in ascending order.
    pub fn table_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.tables.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Timer entries (flow id to table id) for flows with timeouts.
    pub fn timer_entries(&self) -> &HashMap<FlowId, u8> {
        &self.timer_entries
    }

    /// Flow count across all tables.
    pub fn flow_count(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }
}

/// Flow, group and meter tables of one bridge.
#[derive(Debug, Default)]
pub struct SwitchTables {
    /// The flow tables.
    pub flowdb: FlowDb,
    /// The group table.
    pub groups: GroupTable,
    /// The meter table.
    pub meters: MeterTable,
}

fn flow_mod_err(code: u16) -> SwitchError {
    SwitchError::ofp(OfpErrorType::FlowModFailed, code)
}

impl SwitchTables {
    /// Empty tables.
    pub fn new() -> Self {
        SwitchTables::default()
    }

    /// Validate every action an instruction set carries, without touching
    /// reference counts: output ports must be reserved or configured,
    /// groups and meters must exist, goto targets must be in range.
    fn validate_actions(
        &self,
        ports: &dyn PortLookup,
        instructions: &InstructionSet,
    ) -> SwitchResult<()> {
        if let Some(meter_id) = instructions.meter {
            if self.meters.get(meter_id).is_none() {
                tracing::info!(meter_id, "flow mod: no such meter");
                return Err(SwitchError::ofp(
                    OfpErrorType::MeterModFailed,
                    meter_mod_failed::UNKNOWN_METER,
                ));
            }
        }
        if let Some(table_id) = instructions.goto_table {
            check_goto_table(table_id)?;
        }
        for list in instructions.action_lists() {
            for action in list {
                match action.body {
                    ActionBody::Output { port, .. } => match port {
                        OFPP_TABLE | OFPP_NORMAL | OFPP_FLOOD | OFPP_ALL | OFPP_CONTROLLER
                        | OFPP_LOCAL => {}
                        _ => {
                            if !ports.port_exists(port) {
                                tracing::info!(port, "flow mod: no such port");
                                return Err(SwitchError::ofp(
                                    OfpErrorType::BadAction,
                                    bad_action::BAD_OUT_PORT,
                                ));
                            }
                        }
                    },
                    ActionBody::Group(group_id) => {
                        if !self.groups.contains(group_id) {
                            tracing::info!(group_id, "flow mod: no such group");
                            return Err(SwitchError::ofp(
                                OfpErrorType::BadAction,
                                bad_action::BAD_OUT_GROUP,
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Register meter and group back-references for an installed flow and
    /// propagate its cookie onto referenced buckets' outputs.
    fn register_refs(&mut self, flow: &Flow) {
        if let Some(meter_id) = flow.meter_ref() {
            if let Some(meter) = self.meters.get_mut(meter_id) {
                meter.flow_count += 1;
            }
        }
        for group_id in flow.group_refs() {
            self.groups.add_flow_ref(group_id, flow.id, flow.table_id);
            if let Some(group) = self.groups.get_mut(group_id) {
                for bucket in &mut group.buckets {
                    bucket.set_output_cookies(flow.cookie);
                }
            }
        }
    }

    /// Drop the back-references `register_refs` created.
    fn release_refs(&mut self, flow: &Flow) {
        if let Some(meter_id) = flow.meter_ref() {
            if let Some(meter) = self.meters.get_mut(meter_id) {
                meter.flow_count = meter.flow_count.saturating_sub(1);
            }
        }
        for group_id in flow.group_refs() {
            self.groups.remove_flow_ref(group_id, flow.id);
        }
    }

    /// OFPFC_ADD.
    pub fn flow_add(
        &mut self,
        ports: &dyn PortLookup,
        flow_mod: &FlowMod,
        match_list: Vec<Match>,
        instruction_list: Vec<Instruction>,
        now: Timestamp,
    ) -> SwitchResult<()> {
        if flow_mod.table_id == OFPTT_ALL {
            tracing::info!("flow add: OFPTT_ALL is not a valid table");
            return Err(flow_mod_err(flow_mod_failed::BAD_TABLE_ID));
        }
        let field_bits = check_prerequisites(&match_list)?;
        check_masks(&match_list)?;
        let instructions = InstructionSet::from_list(instruction_list)?;
        self.validate_actions(ports, &instructions)?;

        let identical = self
            .flowdb
            .table(flow_mod.table_id)
            .and_then(|t| t.find_identical(flow_mod.priority, field_bits, &match_list))
            .cloned();

        match identical {
            Some(old) => {
                // See 6.4 Flow Table Modification Messages: an identical
                // entry is overwritten unless overlap checking is on.
                if flow_mod.flags & OFPFF_CHECK_OVERLAP != 0 {
                    tracing::info!("flow add: overlapping entry");
                    return Err(flow_mod_err(flow_mod_failed::OVERLAP));
                }
                self.release_refs(&old);
                let mut replacement = Flow::new(
                    old.id,
                    &FlowMod {
                        priority: old.priority,
                        cookie: old.cookie,
                        flags: old.flags,
                        idle_timeout: old.idle_timeout,
                        hard_timeout: old.hard_timeout,
                        ..flow_mod.clone()
                    },
                    match_list,
                    field_bits,
                    instructions,
                    now,
                );
                replacement.create_time = old.create_time;
                if flow_mod.flags & OFPFF_RESET_COUNTS == 0 {
                    replacement.adopt_counters(old.packet_count(), old.byte_count());
                }
                replacement.examine();
                self.register_refs(&replacement);
                self.flowdb
                    .get_or_create(flow_mod.table_id)
                    .replace(old.id, Arc::new(replacement));
            }
            None => {
                let id = self.flowdb.next_id();
                let mut flow = Flow::new(id, flow_mod, match_list, field_bits, instructions, now);
                flow.examine();
                self.register_refs(&flow);
                if flow.idle_timeout > 0 || flow.hard_timeout > 0 {
                    self.flowdb.timer_entries.insert(id, flow_mod.table_id);
                }
                self.flowdb
                    .get_or_create(flow_mod.table_id)
                    .insert(Arc::new(flow));
            }
        }
        Ok(())
    }

    /// OFPFC_MODIFY / OFPFC_MODIFY_STRICT.
    pub fn flow_modify(
        &mut self,
        ports: &dyn PortLookup,
        flow_mod: &FlowMod,
        match_list: Vec<Match>,
        instruction_list: Vec<Instruction>,
        now: Timestamp,
    ) -> SwitchResult<()> {
        if flow_mod.table_id == OFPTT_ALL {
            tracing::info!("flow modify: OFPTT_ALL is not a valid table");
            return Err(flow_mod_err(flow_mod_failed::BAD_TABLE_ID));
        }
        let field_bits = check_prerequisites(&match_list)?;
        check_masks(&match_list)?;
        let instructions = InstructionSet::from_list(instruction_list)?;
        self.validate_actions(ports, &instructions)?;
        let strict = flow_mod.command == FlowModCommand::ModifyStrict;

        let targets: Vec<Arc<Flow>> = match self.flowdb.table(flow_mod.table_id) {
            Some(table) => {
                if strict {
                    table
                        .find_identical(flow_mod.priority, field_bits, &match_list)
                        .cloned()
                        .into_iter()
                        .collect()
                } else {
                    table
                        .flows()
                        .iter()
                        .filter(|flow| {
                            if flow_mod.cookie_mask != 0
                                && flow.cookie & flow_mod.cookie_mask
                                    != flow_mod.cookie & flow_mod.cookie_mask
                            {
                                return false;
                            }
                            match_subsumes(&flow.match_list, &match_list)
                        })
                        .cloned()
                        .collect()
                }
            }
            None => Vec::new(),
        };

        for old in targets {
            self.release_refs(&old);
            let mut replacement = Flow::new(
                old.id,
                &FlowMod {
                    table_id: old.table_id,
                    priority: old.priority,
                    cookie: old.cookie,
                    flags: old.flags,
                    idle_timeout: old.idle_timeout,
                    hard_timeout: old.hard_timeout,
                    ..flow_mod.clone()
                },
                old.match_list.clone(),
                old.field_bits,
                instructions.clone(),
                now,
            );
            replacement.create_time = old.create_time;
            if flow_mod.flags & OFPFF_RESET_COUNTS == 0 {
                replacement.adopt_counters(old.packet_count(), old.byte_count());
            }
            replacement.examine();
            self.register_refs(&replacement);
            if let Some(table) = self.flowdb.table_mut(old.table_id) {
                table.replace(old.id, Arc::new(replacement));
            }
        }
        Ok(())
    }

    /// OFPFC_DELETE / OFPFC_DELETE_STRICT. Returns OFPT_FLOW_REMOVED
    /// payloads for flows that requested them.
    pub fn flow_delete(
        &mut self,
        flow_mod: &FlowMod,
        match_list: Vec<Match>,
        now: Timestamp,
    ) -> SwitchResult<Vec<FlowRemoved>> {
        let field_bits = check_prerequisites(&match_list)?;
        let strict = flow_mod.command == FlowModCommand::DeleteStrict;

        let table_ids = if flow_mod.table_id == OFPTT_ALL {
            self.flowdb.table_ids()
        } else {
            vec![flow_mod.table_id]
        };

        let mut removed_records = Vec::new();
        for table_id in table_ids {
            let removed = match self.flowdb.table_mut(table_id) {
                Some(table) => table.extract_if(|flow| {
                    if strict {
                        return flow.same_identity(flow_mod.priority, field_bits, &match_list);
                    }
                    if flow_mod.cookie_mask != 0
                        && flow.cookie & flow_mod.cookie_mask
                            != flow_mod.cookie & flow_mod.cookie_mask
                    {
                        return false;
                    }
                    if flow_mod.out_port != OFPP_ANY && !flow.references_out_port(flow_mod.out_port)
                    {
                        return false;
                    }
                    if flow_mod.out_group != OFPG_ANY
                        && !flow.references_out_group(flow_mod.out_group)
                    {
                        return false;
                    }
                    match_subsumes(&flow.match_list, &match_list)
                }),
                None => Vec::new(),
            };
            for flow in removed {
                self.release_refs(&flow);
                self.flowdb.timer_entries.remove(&flow.id);
                if flow.flags & OFPFF_SEND_FLOW_REM != 0 {
                    removed_records.push(FlowRemoved::from_flow(
                        &flow,
                        FlowRemovedReason::Delete,
                        now,
                    ));
                }
            }
        }
        Ok(removed_records)
    }

    /// Remove one flow by id, for group deletion and timer expiry. Returns
    /// the OFPT_FLOW_REMOVED payload when the flow requested one.
    pub fn remove_flow_by_id(
        &mut self,
        flow_id: FlowId,
        table_id: u8,
        reason: FlowRemovedReason,
        now: Timestamp,
    ) -> Option<FlowRemoved> {
        let flow = self.flowdb.table_mut(table_id)?.remove(flow_id)?;
        self.release_refs(&flow);
        self.flowdb.timer_entries.remove(&flow.id);
        if flow.flags & OFPFF_SEND_FLOW_REM != 0 {
            Some(FlowRemoved::from_flow(&flow, reason, now))
        } else {
            None
        }
    }

    /// Flows whose idle or hard timeout has elapsed at `now`.
    pub fn expired_flows(&self, now: Timestamp) -> Vec<(FlowId, u8, FlowRemovedReason)> {
        let now_ns = now.sec * 1_000_000_000 + now.nsec as u64;
        let mut expired = Vec::new();
        for (&flow_id, &table_id) in &self.flowdb.timer_entries {
            let flow = match self
                .flowdb
                .table(table_id)
                .and_then(|t| t.flows().iter().find(|f| f.id == flow_id))
            {
                Some(flow) => flow,
                None => continue,
            };
            if flow.hard_timeout > 0 {
                let (elapsed, _) = now.duration_since(flow.create_time);
                if elapsed >= flow.hard_timeout as u32 {
                    expired.push((flow_id, table_id, FlowRemovedReason::HardTimeout));
                    continue;
                }
            }
            if flow.idle_timeout > 0 {
                let idle_ns = flow.idle_timeout as u64 * 1_000_000_000;
                if now_ns.saturating_sub(flow.update_time_ns()) >= idle_ns {
                    expired.push((flow_id, table_id, FlowRemovedReason::IdleTimeout));
                }
            }
        }
        expired.sort_unstable_by_key(|(id, _, _)| *id);
        expired
    }

    /// OFPGC_ADD.
    pub fn group_add(
        &mut self,
        group_mod: &GroupMod,
        buckets: Vec<Bucket>,
        now: Timestamp,
    ) -> SwitchResult<()> {
        self.groups.add(group_mod, buckets, now)
    }

    /// OFPGC_MODIFY.
    pub fn group_modify(&mut self, group_mod: &GroupMod, buckets: Vec<Bucket>) -> SwitchResult<()> {
        self.groups.modify(group_mod, buckets)
    }

    /// OFPGC_DELETE: removes the group(s) and every referent flow with
    /// reason OFPRR_GROUP_DELETE. Returns the flow-removed payloads.
    pub fn group_delete(&mut self, group_id: u32, now: Timestamp) -> Vec<FlowRemoved> {
        let referents = self.groups.delete(group_id);
        let mut records = Vec::new();
        for (flow_id, table_id) in referents {
            if let Some(record) =
                self.remove_flow_by_id(flow_id, table_id, FlowRemovedReason::GroupDelete, now)
            {
                records.push(record);
            }
        }
        records
    }

    /// OFPMC_ADD.
    pub fn meter_add(
        &mut self,
        meter_mod: &MeterMod,
        bands: Vec<MeterBand>,
        now: Timestamp,
    ) -> SwitchResult<()> {
        self.meters.add(meter_mod, bands, now)
    }

    /// OFPMC_MODIFY.
    pub fn meter_modify(&mut self, meter_mod: &MeterMod, bands: Vec<MeterBand>) -> SwitchResult<()> {
        self.meters.modify(meter_mod, bands)
    }

    /// OFPMC_DELETE.
    pub fn meter_delete(&mut self, meter_id: u32) -> SwitchResult<()> {
        self.meters.delete(meter_id)
    }

    /// Flow stats over one table or OFPTT_ALL.
    pub fn flow_stats(
        &self,
        request: &FlowStatsRequest,
        match_list: &[Match],
        now: Timestamp,
    ) -> SwitchResult<Vec<FlowStats>> {
        let table_ids = if request.table_id == OFPTT_ALL {
            self.flowdb.table_ids()
        } else {
            if self.flowdb.table(request.table_id).is_none() {
                tracing::info!(table_id = request.table_id, "flow stats: table not found");
                return Err(SwitchError::ofp(
                    OfpErrorType::BadRequest,
                    bad_request::BAD_TABLE_ID,
                ));
            }
            vec![request.table_id]
        };

        let mut stats = Vec::new();
        for table_id in table_ids {
            if let Some(table) = self.flowdb.table(table_id) {
                for flow in table.flows() {
                    if request.cookie_mask != 0
                        && flow.cookie & request.cookie_mask
                            != request.cookie & request.cookie_mask
                    {
                        continue;
                    }
                    if !match_subsumes(&flow.match_list, match_list) {
                        continue;
                    }
                    stats.push(FlowStats::from_flow(flow, now));
                }
            }
        }
        Ok(stats)
    }

    /// Aggregate stats over one table or OFPTT_ALL.
    pub fn aggregate_stats(
        &self,
        request: &FlowStatsRequest,
        match_list: &[Match],
    ) -> SwitchResult<AggregateStats> {
        use ofsw_common::openflow::{OFPFF_NO_BYT_COUNTS, OFPFF_NO_PKT_COUNTS};

        let table_ids = if request.table_id == OFPTT_ALL {
            self.flowdb.table_ids()
        } else {
            if self.flowdb.table(request.table_id).is_none() {
                return Err(SwitchError::ofp(
                    OfpErrorType::BadRequest,
                    bad_request::BAD_TABLE_ID,
                ));
            }
            vec![request.table_id]
        };

        let mut reply = AggregateStats::default();
        for table_id in table_ids {
            if let Some(table) = self.flowdb.table(table_id) {
                for flow in table.flows() {
                    if request.cookie_mask != 0
                        && flow.cookie & request.cookie_mask
                            != request.cookie & request.cookie_mask
                    {
                        continue;
                    }
                    if !match_subsumes(&flow.match_list, match_list) {
                        continue;
                    }
                    if flow.flags & OFPFF_NO_PKT_COUNTS == 0 {
                        reply.packet_count += flow.packet_count();
                    }
                    if flow.flags & OFPFF_NO_BYT_COUNTS == 0 {
                        reply.byte_count += flow.byte_count();
                    }
                    reply.flow_count += 1;
                }
            }
        }
        Ok(reply)
    }

    /// Table stats for every table ever used.
    pub fn table_stats(&self) -> Vec<TableStats> {
        self.flowdb
            .table_ids()
            .into_iter()
            .filter_map(|id| self.flowdb.table(id).map(|t| t.stats(id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use ofsw_common::openflow::{GroupModCommand, GroupType, MeterModCommand, OxmField};

    struct NoPorts;
    impl PortLookup for NoPorts {
        fn port_exists(&self, _p: u32) -> bool {
            false
        }
    }

    struct AllPorts;
    impl PortLookup for AllPorts {
        fn port_exists(&self, _p: u32) -> bool {
            true
        }
    }

    fn now() -> Timestamp {
        Timestamp::ZERO
    }

    fn add_simple_flow(tables: &mut SwitchTables, priority: u16, in_port: u32, out: u32) {
        tables
            .flow_add(
                &AllPorts,
                &FlowMod::add(0, priority),
                vec![Match::in_port(in_port)],
                vec![Instruction::ApplyActions(vec![Action::output(out)])],
                now(),
            )
            .unwrap();
    }

    #[test]
    fn test_add_rejects_ofptt_all() {
        let mut t = SwitchTables::new();
        let err = t
            .flow_add(&AllPorts, &FlowMod::add(OFPTT_ALL, 1), vec![], vec![], now())
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, flow_mod_failed::BAD_TABLE_ID);
    }

    #[test]
    fn test_add_unknown_out_port() {
        let mut t = SwitchTables::new();
        let err = t
            .flow_add(
                &NoPorts,
                &FlowMod::add(0, 1),
                vec![Match::in_port(1)],
                vec![Instruction::ApplyActions(vec![Action::output(7)])],
                now(),
            )
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, bad_action::BAD_OUT_PORT);
    }

    #[test]
    fn test_add_reserved_ports_without_config() {
        let mut t = SwitchTables::new();
        t.flow_add(
            &NoPorts,
            &FlowMod::add(0, 1),
            vec![Match::in_port(1)],
            vec![Instruction::ApplyActions(vec![Action::output(
                OFPP_CONTROLLER,
            )])],
            now(),
        )
        .unwrap();
    }

    #[test]
    fn test_add_unknown_group() {
        let mut t = SwitchTables::new();
        let err = t
            .flow_add(
                &AllPorts,
                &FlowMod::add(0, 1),
                vec![Match::in_port(1)],
                vec![Instruction::ApplyActions(vec![Action::new(
                    ActionBody::Group(5),
                )])],
                now(),
            )
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, bad_action::BAD_OUT_GROUP);
    }

    #[test]
    fn test_add_unknown_meter() {
        let mut t = SwitchTables::new();
        let err = t
            .flow_add(
                &AllPorts,
                &FlowMod::add(0, 1),
                vec![Match::in_port(1)],
                vec![Instruction::Meter(3)],
                now(),
            )
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, meter_mod_failed::UNKNOWN_METER);
    }

    #[test]
    fn test_overlap_detection() {
        let mut t = SwitchTables::new();
        add_simple_flow(&mut t, 10, 1, 2);
        let mut fm = FlowMod::add(0, 10);
        fm.flags = OFPFF_CHECK_OVERLAP;
        let err = t
            .flow_add(
                &AllPorts,
                &fm,
                vec![Match::in_port(1)],
                vec![Instruction::ApplyActions(vec![Action::output(3)])],
                now(),
            )
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, flow_mod_failed::OVERLAP);
    }

    #[test]
    fn test_identical_add_overwrites_instructions() {
        let mut t = SwitchTables::new();
        add_simple_flow(&mut t, 10, 1, 2);
        add_simple_flow(&mut t, 10, 1, 3);
        let table = t.flowdb.table(0).unwrap();
        assert_eq!(table.len(), 1);
        let flow = &table.flows()[0];
        let apply = flow.instructions.apply_actions.as_ref().unwrap();
        assert!(matches!(
            apply[0].body,
            ActionBody::Output { port: 3, .. }
        ));
    }

    #[test]
    fn test_meter_flow_count_tracking() {
        let mut t = SwitchTables::new();
        t.meter_add(
            &MeterMod {
                command: MeterModCommand::Add,
                flags: 0,
                meter_id: 9,
            },
            vec![MeterBand::Drop {
                rate: 1,
                burst_size: 1,
            }],
            now(),
        )
        .unwrap();
        t.flow_add(
            &AllPorts,
            &FlowMod::add(0, 5),
            vec![Match::in_port(1)],
            vec![
                Instruction::Meter(9),
                Instruction::ApplyActions(vec![Action::output(2)]),
            ],
            now(),
        )
        .unwrap();
        assert_eq!(t.meters.get(9).unwrap().flow_count, 1);

        t.flow_delete(&FlowMod::delete(0), vec![], now()).unwrap();
        assert_eq!(t.meters.get(9).unwrap().flow_count, 0);
    }

    #[test]
    fn test_group_delete_removes_referent_flows() {
        let mut t = SwitchTables::new();
        t.group_add(
            &GroupMod {
                command: GroupModCommand::Add,
                gtype: GroupType::All,
                group_id: 4,
            },
            vec![Bucket::with_actions(vec![Action::output(2)])],
            now(),
        )
        .unwrap();
        let mut fm = FlowMod::add(0, 5);
        fm.flags = OFPFF_SEND_FLOW_REM;
        t.flow_add(
            &AllPorts,
            &fm,
            vec![Match::in_port(1)],
            vec![Instruction::ApplyActions(vec![Action::new(
                ActionBody::Group(4),
            )])],
            now(),
        )
        .unwrap();
        assert_eq!(t.groups.get(4).unwrap().flows.len(), 1);

        let records = t.group_delete(4, Timestamp { sec: 2, nsec: 0 });
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, FlowRemovedReason::GroupDelete);
        assert_eq!(t.flowdb.table(0).unwrap().len(), 0);
    }

    #[test]
    fn test_delete_filters_by_out_port_and_group() {
        let mut t = SwitchTables::new();
        add_simple_flow(&mut t, 10, 1, 2);
        add_simple_flow(&mut t, 10, 2, 3);

        let mut fm = FlowMod::delete(0);
        fm.out_port = 2;
        t.flow_delete(&fm, vec![], now()).unwrap();
        let table = t.flowdb.table(0).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.flows()[0].references_out_port(3));
    }

    #[test]
    fn test_delete_strict_only_identity() {
        let mut t = SwitchTables::new();
        add_simple_flow(&mut t, 10, 1, 2);
        add_simple_flow(&mut t, 20, 1, 2);

        let mut fm = FlowMod::delete(0);
        fm.command = FlowModCommand::DeleteStrict;
        fm.priority = 10;
        t.flow_delete(&fm, vec![Match::in_port(1)], now()).unwrap();
        let table = t.flowdb.table(0).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.flows()[0].priority, 20);
    }

    #[test]
    fn test_delete_all_tables() {
        let mut t = SwitchTables::new();
        add_simple_flow(&mut t, 10, 1, 2);
        t.flow_add(
            &AllPorts,
            &FlowMod::add(3, 10),
            vec![Match::in_port(1)],
            vec![],
            now(),
        )
        .unwrap();
        t.flow_delete(&FlowMod::delete(OFPTT_ALL), vec![], now())
            .unwrap();
        assert_eq!(t.flowdb.flow_count(), 0);
    }

    #[test]
    fn test_cookie_mask_filtering() {
        let mut t = SwitchTables::new();
        let mut fm = FlowMod::add(0, 10);
        fm.cookie = 0xaa00;
        t.flow_add(&AllPorts, &fm, vec![Match::in_port(1)], vec![], now())
            .unwrap();
        let mut fm2 = FlowMod::add(0, 10);
        fm2.cookie = 0xbb00;
        t.flow_add(&AllPorts, &fm2, vec![Match::in_port(2)], vec![], now())
            .unwrap();

        let mut del = FlowMod::delete(0);
        del.cookie = 0xaa00;
        del.cookie_mask = 0xff00;
        t.flow_delete(&del, vec![], now()).unwrap();
        let table = t.flowdb.table(0).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.flows()[0].cookie, 0xbb00);
    }

    #[test]
    fn test_timer_entries_lifecycle() {
        let mut t = SwitchTables::new();
        let mut fm = FlowMod::add(0, 10);
        fm.idle_timeout = 5;
        t.flow_add(&AllPorts, &fm, vec![Match::in_port(1)], vec![], now())
            .unwrap();
        assert_eq!(t.flowdb.timer_entries().len(), 1);

        // Not yet expired.
        assert!(t.expired_flows(Timestamp { sec: 2, nsec: 0 }).is_empty());
        // Idle for >= 5 seconds.
        let expired = t.expired_flows(Timestamp { sec: 6, nsec: 0 });
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].2, FlowRemovedReason::IdleTimeout);

        let (flow_id, table_id, reason) = expired[0];
        t.remove_flow_by_id(flow_id, table_id, reason, Timestamp { sec: 6, nsec: 0 });
        assert!(t.flowdb.timer_entries().is_empty());
        assert_eq!(t.flowdb.flow_count(), 0);
    }

    #[test]
    fn test_hard_timeout_beats_idle() {
        let mut t = SwitchTables::new();
        let mut fm = FlowMod::add(0, 10);
        fm.idle_timeout = 1;
        fm.hard_timeout = 1;
        t.flow_add(&AllPorts, &fm, vec![Match::in_port(1)], vec![], now())
            .unwrap();
        let expired = t.expired_flows(Timestamp { sec: 2, nsec: 0 });
        assert_eq!(expired[0].2, FlowRemovedReason::HardTimeout);
    }

    #[test]
    fn test_flow_stats_roundtrip() {
        let mut t = SwitchTables::new();
        let mut fm = FlowMod::add(0, 10);
        fm.cookie = 7;
        let ml = vec![Match::eth_type(0x0800), Match::ip_proto(6)];
        let il = vec![
            Instruction::ApplyActions(vec![Action::output(2)]),
            Instruction::GotoTable(1),
        ];
        t.flow_add(&AllPorts, &fm, ml.clone(), il.clone(), now())
            .unwrap();

        let stats = t
            .flow_stats(&FlowStatsRequest::all(), &[], Timestamp { sec: 1, nsec: 0 })
            .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].match_list, ml);
        // Examination annotated the output cookie; compare bodies.
        match (&stats[0].instructions[0], &il[0]) {
            (Instruction::ApplyActions(a), Instruction::ApplyActions(b)) => {
                assert_eq!(a[0].body, b[0].body);
            }
            _ => panic!("instruction shape changed"),
        }
        assert_eq!(stats[0].instructions[1], il[1]);

        // Re-adding the stats reply reproduces an equal flow.
        let mut t2 = SwitchTables::new();
        let mut fm2 = FlowMod::add(stats[0].table_id, stats[0].priority);
        fm2.cookie = stats[0].cookie;
        t2.flow_add(
            &AllPorts,
            &fm2,
            stats[0].match_list.clone(),
            stats[0].instructions.clone(),
            now(),
        )
        .unwrap();
        let again = t2
            .flow_stats(&FlowStatsRequest::all(), &[], Timestamp { sec: 1, nsec: 0 })
            .unwrap();
        assert_eq!(again[0].match_list, stats[0].match_list);
        assert_eq!(again[0].priority, stats[0].priority);
        assert_eq!(again[0].cookie, stats[0].cookie);
    }

    #[test]
    fn test_aggregate_stats() {
        let mut t = SwitchTables::new();
        add_simple_flow(&mut t, 10, 1, 2);
        add_simple_flow(&mut t, 20, 2, 2);
        let table = t.flowdb.table(0).unwrap();
        table.flows()[0].hit(100, now());
        table.flows()[1].hit(50, now());

        let agg = t
            .aggregate_stats(&FlowStatsRequest::all(), &[])
            .unwrap();
        assert_eq!(agg.flow_count, 2);
        assert_eq!(agg.packet_count, 2);
        assert_eq!(agg.byte_count, 150);
    }

    #[test]
    fn test_stats_unknown_table() {
        let t = SwitchTables::new();
        let mut req = FlowStatsRequest::all();
        req.table_id = 9;
        assert!(t.flow_stats(&req, &[], now()).is_err());
    }

    #[test]
    fn test_modify_checks_masks() {
        use ofsw_common::error::bad_match;

        let mut t = SwitchTables::new();
        add_simple_flow(&mut t, 10, 1, 2);

        let mut fm = FlowMod::add(0, 10);
        fm.command = FlowModCommand::Modify;
        let bad = Match::with_mask(
            OxmField::Ipv4Src,
            vec![10, 0, 0, 1],
            vec![255, 255, 0, 0],
        );
        let err = t
            .flow_modify(
                &AllPorts,
                &fm,
                vec![Match::eth_type(0x0800), bad],
                vec![],
                now(),
            )
            .unwrap_err();
        assert_eq!(err.as_ofp().unwrap().code, bad_match::BAD_WILDCARDS);
    }

    #[test]
    fn test_modify_keeps_match_and_counters() {
        let mut t = SwitchTables::new();
        add_simple_flow(&mut t, 10, 1, 2);
        t.flowdb.table(0).unwrap().flows()[0].hit(64, now());

        let mut fm = FlowMod::add(0, 10);
        fm.command = FlowModCommand::Modify;
        t.flow_modify(
            &AllPorts,
            &fm,
            vec![Match::in_port(1)],
            vec![Instruction::ApplyActions(vec![Action::output(9)])],
            now(),
        )
        .unwrap();

        let table = t.flowdb.table(0).unwrap();
        assert_eq!(table.len(), 1);
        let flow = &table.flows()[0];
        assert_eq!(flow.packet_count(), 1);
        assert_eq!(flow.match_list, vec![Match::in_port(1)]);
        assert!(flow.references_out_port(9));
    }

    #[test]
    fn test_priority_sorted_after_mutations() {
        let mut t = SwitchTables::new();
        for (p, port) in [(5u16, 1u32), (50, 2), (20, 3), (20, 4), (90, 5)] {
            add_simple_flow(&mut t, p, port, 2);
        }
        let mut del = FlowMod::delete(0);
        del.out_port = OFPP_ANY;
        t.flow_delete(&del, vec![Match::in_port(3)], now()).unwrap();
        assert!(t.flowdb.table(0).unwrap().is_priority_sorted());
    }

    #[test]
    fn test_field_bits_match_list_consistency() {
        let mut t = SwitchTables::new();
        let ml = vec![Match::eth_type(0x0800), Match::ipv4_dst([10, 0, 0, 1])];
        t.flow_add(&AllPorts, &FlowMod::add(0, 1), ml, vec![], now())
            .unwrap();
        let flow = &t.flowdb.table(0).unwrap().flows()[0];
        let expected = OxmField::EthType.bit() | OxmField::Ipv4Dst.bit();
        assert_eq!(flow.field_bits, expected);
    }
}
