//! OpenSwitch dataplane
//!
//! The per-packet engine of the switch core: match evaluation over
//! classified packets, the action executors, group and meter execution,
//! the flow cache, and the bridge/datapath composition that routes
//! control requests by dpid and guards everything with the update-barrier
//! lock discipline.
//!
//! ```text
//! PacketIo.rx -> classify -> pipeline -> (cache | table walk
//!     -> instructions -> groups/meters) -> action set -> PacketIo.tx
//! ```

#![warn(missing_docs)]

pub mod actions;
pub mod bridge;
pub mod cache;
pub mod csum;
pub mod dp;
pub mod fields;
pub mod io;
pub mod lock;
pub mod pipeline;
pub mod policer;
pub mod port;
pub mod rib;
pub mod testutil;

pub use actions::Exec;
pub use bridge::{Bridge, BridgeInfo, FailMode, SwitchConfig, SwitchFeatures};
pub use cache::FlowCache;
pub use dp::{Datapath, RX_BURST_SIZE};
pub use io::{
    ChannelEventQueue, Event, EventQueue, InterfaceStats, ManualClock, MonotonicClock, PacketIn,
    PacketIo, PortStatus, QueueConfig, SystemClock,
};
pub use lock::FlowLock;
pub use pipeline::{PacketContext, PipelineEnv, PIPELINE_MAX};
pub use policer::TokenBucketPolicer;
pub use port::{Port, PortMap, PortMapLookup, PortStats};
pub use rib::{HybridRouter, NextHop};
