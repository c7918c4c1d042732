//! Contained failures.
//!
//! Components never abort the driver loop on a per-slot failure. They log
//! it and push a [`Fault`] into a [`FaultSink`]; the driver drains the
//! matching [`FaultInbox`] once per iteration and prints the faults as
//! warnings in its status report.

use std::fmt;

use tokio::sync::mpsc;

use crate::types::SlotId;

/// Kind of contained failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Region allocation failed; the slot stays usable but reads empty.
    RegionCreation,
    /// Worker launch failed; the slot was marked inactive.
    ProcessSpawn,
    /// Graceful stop exceeded its bound; the process was abandoned.
    TerminationTimeout,
    /// Region unreadable at refresh time; retried next cycle.
    CoverageRead,
    /// No distinct alternative configuration; the slot was restarted as-is.
    DegenerateCandidate,
    /// Region could not be removed at shutdown.
    RegionRemoval,
}

impl FaultKind {
    pub fn label(&self) -> &'static str {
        match self {
            FaultKind::RegionCreation => "region-creation",
            FaultKind::ProcessSpawn => "process-spawn",
            FaultKind::TerminationTimeout => "termination-timeout",
            FaultKind::CoverageRead => "coverage-read",
            FaultKind::DegenerateCandidate => "degenerate-candidate",
            FaultKind::RegionRemoval => "region-removal",
        }
    }
}

/// A failure that was contained at a component boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub slot: SlotId,
    pub kind: FaultKind,
    pub detail: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {} [{}]: {}", self.slot, self.kind.label(), self.detail)
    }
}

/// Sending half of the fault channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FaultSink {
    tx: mpsc::UnboundedSender<Fault>,
}

impl FaultSink {
    /// Record a fault. Dropped silently once the inbox is gone.
    pub fn record(&self, slot: SlotId, kind: FaultKind, detail: impl Into<String>) {
        let _ = self.tx.send(Fault {
            slot,
            kind,
            detail: detail.into(),
        });
    }

    /// A sink whose faults go nowhere, for components used standalone.
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Receiving half of the fault channel.
#[derive(Debug)]
pub struct FaultInbox {
    rx: mpsc::UnboundedReceiver<Fault>,
}

impl FaultInbox {
    /// Take every fault recorded so far without waiting.
    pub fn drain(&mut self) -> Vec<Fault> {
        let mut faults = Vec::new();
        while let Ok(fault) = self.rx.try_recv() {
            faults.push(fault);
        }
        faults
    }
}

/// Create a connected sink/inbox pair.
pub fn fault_channel() -> (FaultSink, FaultInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FaultSink { tx }, FaultInbox { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_recorded_faults_in_order() {
        let (sink, mut inbox) = fault_channel();
        sink.record(SlotId(1), FaultKind::ProcessSpawn, "no such file");
        sink.clone()
            .record(SlotId(2), FaultKind::CoverageRead, "permission denied");

        let faults = inbox.drain();
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0].slot, SlotId(1));
        assert_eq!(faults[1].kind, FaultKind::CoverageRead);
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn detached_sink_accepts_faults() {
        let sink = FaultSink::detached();
        sink.record(SlotId(9), FaultKind::RegionRemoval, "gone");
    }

    #[test]
    fn fault_display_includes_kind() {
        let fault = Fault {
            slot: SlotId(4),
            kind: FaultKind::TerminationTimeout,
            detail: "still running after 5s".to_string(),
        };
        assert_eq!(
            fault.to_string(),
            "slot 4 [termination-timeout]: still running after 5s"
        );
    }
}
