//! In-memory packet I/O for tests and simulations
//!
//! Captures transmitted frames per interface and replays queued receive
//! bursts, standing in for the DPDK/rawsock back-ends.

use std::collections::{HashMap, HashSet, VecDeque};

use ofsw_common::MacAddr;
use parking_lot::Mutex;

use crate::io::{InterfaceStats, PacketIo, QueueConfig};

/// Capturing mock of the packet I/O capability.
#[derive(Default)]
pub struct MockIo {
    tx: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    rx: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    link_down: Mutex<HashSet<String>>,
}

impl MockIo {
    /// Fresh mock with every link up.
    pub fn new() -> Self {
        MockIo::default()
    }

    /// Frames transmitted on an interface so far.
    pub fn tx_frames(&self, interface: &str) -> Vec<Vec<u8>> {
        self.tx
            .lock()
            .get(interface)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of frames transmitted on an interface.
    pub fn tx_count(&self, interface: &str) -> usize {
        self.tx.lock().get(interface).map(|v| v.len()).unwrap_or(0)
    }

    /// Queue a frame for the next receive burst.
    pub fn push_rx(&self, interface: &str, frame: Vec<u8>) {
        self.rx
            .lock()
            .entry(interface.to_string())
            .or_default()
            .push_back(frame);
    }

    /// Flip an interface's link state.
    pub fn set_link(&self, interface: &str, up: bool) {
        let mut down = self.link_down.lock();
        if up {
            down.remove(interface);
        } else {
            down.insert(interface.to_string());
        }
    }

    /// Forget every captured frame.
    pub fn clear(&self) {
        self.tx.lock().clear();
    }
}

impl PacketIo for MockIo {
    fn rx_burst(&self, interface: &str, max: usize) -> Vec<Vec<u8>> {
        let mut rx = self.rx.lock();
        let queue = match rx.get_mut(interface) {
            Some(queue) => queue,
            None => return Vec::new(),
        };
        let n = queue.len().min(max);
        queue.drain(..n).collect()
    }

    fn tx(&self, interface: &str, frame: &[u8]) {
        self.tx
            .lock()
            .entry(interface.to_string())
            .or_default()
            .push(frame.to_vec());
    }

    fn stats(&self, interface: &str) -> InterfaceStats {
        let tx = self.tx.lock();
        InterfaceStats {
            tx_packets: tx.get(interface).map(|v| v.len() as u64).unwrap_or(0),
            tx_bytes: tx
                .get(interface)
                .map(|v| v.iter().map(|f| f.len() as u64).sum())
                .unwrap_or(0),
            ..InterfaceStats::default()
        }
    }

    fn hw_addr(&self, interface: &str) -> MacAddr {
        let mut mac = [0u8; 6];
        mac[0] = 0x02;
        let bytes = interface.as_bytes();
        for (i, b) in bytes.iter().take(5).enumerate() {
            mac[i + 1] = *b;
        }
        MacAddr(mac)
    }

    fn link_up(&self, interface: &str) -> bool {
        !self.link_down.lock().contains(interface)
    }

    fn queue_configure(&self, _interface: &str, _queues: &[QueueConfig]) {}
}
