//! Capability traits toward the surrounding process
//!
//! Packet I/O back-ends, the event queues toward the controller channel and
//! the monotonic clock are collaborators; the core consumes them through
//! these seams.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crossbeam::channel::{bounded, Receiver, Sender};
use ofsw_common::openflow::{PacketInReason, PortStatusReason};
use ofsw_common::{MacAddr, SwitchError, SwitchResult, Timestamp};
use ofsw_flowdb::FlowRemoved;
use serde::{Deserialize, Serialize};

/// Interface counters as reported by the packet I/O layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterfaceStats {
    /// Frames received.
    pub rx_packets: u64,
    /// Frames transmitted.
    pub tx_packets: u64,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes transmitted.
    pub tx_bytes: u64,
    /// Receive drops.
    pub rx_dropped: u64,
    /// Transmit drops.
    pub tx_dropped: u64,
    /// Receive errors.
    pub rx_errors: u64,
    /// Transmit errors.
    pub tx_errors: u64,
}

/// Egress queue configuration handed to the back-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue id referenced by OFPAT_SET_QUEUE.
    pub queue_id: u32,
    /// Guaranteed rate in 1/10 percent.
    pub min_rate: u16,
    /// Cap rate in 1/10 percent.
    pub max_rate: u16,
}

/// Packet I/O back-end (DPDK, raw socket, vdev...).
pub trait PacketIo: Send + Sync {
    /// Receive up to `max` frames from an interface.
    fn rx_burst(&self, interface: &str, max: usize) -> Vec<Vec<u8>>;
    /// Transmit one frame on an interface.
    fn tx(&self, interface: &str, frame: &[u8]);
    /// Interface counters.
    fn stats(&self, interface: &str) -> InterfaceStats;
    /// Interface hardware address.
    fn hw_addr(&self, interface: &str) -> MacAddr;
    /// Whether the physical link is up.
    fn link_up(&self, interface: &str) -> bool;
    /// Configure egress queues.
    fn queue_configure(&self, interface: &str, queues: &[QueueConfig]);
}

/// OFPT_PACKET_IN payload.
#[derive(Debug, Clone)]
pub struct PacketIn {
    /// Why the packet was punted.
    pub reason: PacketInReason,
    /// Table that matched, when any.
    pub table_id: u8,
    /// Cookie of the triggering flow.
    pub cookie: u64,
    /// Ingress port.
    pub in_port: u32,
    /// Frame bytes, truncated to miss_send_len.
    pub frame: Vec<u8>,
}

/// Port-status change notification.
#[derive(Debug, Clone)]
pub struct PortStatus {
    /// Add, delete or modify.
    pub reason: PortStatusReason,
    /// Port number.
    pub port_no: u32,
    /// Port name.
    pub name: String,
    /// OFPPC_* config bits.
    pub config: u32,
    /// OFPPS_* state bits.
    pub state: u32,
}

/// Asynchronous events toward the controller channel.
#[derive(Debug, Clone)]
pub enum Event {
    /// OFPT_FLOW_REMOVED.
    FlowRemoved(FlowRemoved),
    /// OFPT_PORT_STATUS.
    PortStatus(PortStatus),
}

/// Bounded enqueue toward the controller channel; expired puts are dropped
/// with a log, never blocking the dataplane indefinitely.
pub trait EventQueue: Send + Sync {
    /// Enqueue a packet-in on the data queue.
    fn put_packet_in(&self, dpid: u64, packet_in: PacketIn, timeout: Duration)
        -> SwitchResult<()>;
    /// Enqueue a flow-removed or port-status event.
    fn put_event(&self, dpid: u64, event: Event, timeout: Duration) -> SwitchResult<()>;
}

/// Timeout for packet-in puts.
pub const PACKET_IN_PUT_TIMEOUT: Duration = Duration::from_millis(2);
/// Timeout for flow-removed and port-status puts.
pub const EVENT_PUT_TIMEOUT: Duration = Duration::from_millis(100);

/// Crossbeam-channel event queue, one pair of bounded queues per process.
pub struct ChannelEventQueue {
    dataq_tx: Sender<(u64, PacketIn)>,
    dataq_rx: Receiver<(u64, PacketIn)>,
    eventq_tx: Sender<(u64, Event)>,
    eventq_rx: Receiver<(u64, Event)>,
}

impl ChannelEventQueue {
    /// Queues bounded at `capacity` entries each.
    pub fn new(capacity: usize) -> Self {
        let (dataq_tx, dataq_rx) = bounded(capacity);
        let (eventq_tx, eventq_rx) = bounded(capacity);
        ChannelEventQueue {
            dataq_tx,
            dataq_rx,
            eventq_tx,
            eventq_rx,
        }
    }

    /// Drain one packet-in, for the agent side and tests.
    pub fn pop_packet_in(&self) -> Option<(u64, PacketIn)> {
        self.dataq_rx.try_recv().ok()
    }

    /// Drain one event, for the agent side and tests.
    pub fn pop_event(&self) -> Option<(u64, Event)> {
        self.eventq_rx.try_recv().ok()
    }
}

impl Default for ChannelEventQueue {
    fn default() -> Self {
        ChannelEventQueue::new(1024)
    }
}

impl EventQueue for ChannelEventQueue {
    fn put_packet_in(
        &self,
        dpid: u64,
        packet_in: PacketIn,
        timeout: Duration,
    ) -> SwitchResult<()> {
        self.dataq_tx
            .send_timeout((dpid, packet_in), timeout)
            .map_err(|_| {
                tracing::warn!(dpid, "packet-in queue full, dropping");
                SwitchError::InvalidArgs("packet-in queue full".into())
            })
    }

    fn put_event(&self, dpid: u64, event: Event, timeout: Duration) -> SwitchResult<()> {
        self.eventq_tx.send_timeout((dpid, event), timeout).map_err(|_| {
            tracing::warn!(dpid, "event queue full, dropping");
            SwitchError::InvalidArgs("event queue full".into())
        })
    }
}

/// Monotonic time source.
pub trait MonotonicClock: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Timestamp;
}

/// Clock over `Instant`, anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Anchor the clock now.
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_origin(self.origin, Instant::now())
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Clock starting at zero.
    pub fn new() -> Self {
        ManualClock::default()
    }

    /// Advance to an absolute time.
    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }

    /// Advance by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.now.lock().sec += secs;
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
