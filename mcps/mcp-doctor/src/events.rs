//! Repair events
//!
//! Emitted by the engine as fixes are applied, skipped or discarded. A CLI
//! prints them, the MCP server logs them, tests collect them.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::{Fix, FixResult};

// ============================================================================
// Repair Events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepairEvent {
    /// A fix was executed. One per executed fix, in application order.
    FixApplied { fix: Fix, result: FixResult },

    /// A manual fix was left out of an unattended run
    FixSkipped { fix: Fix, reason: String },

    /// The user declined a fix awaiting confirmation
    FixDiscarded { fix: Fix },

    /// Background config repair finished
    AutoRepairCompleted { clients: usize, repaired: bool },
}

// ============================================================================
// Event Channel
// ============================================================================

pub type EventSender = mpsc::UnboundedSender<RepairEvent>;

pub type EventReceiver = mpsc::UnboundedReceiver<RepairEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Optional sender; events go nowhere when no one listens
#[derive(Debug, Clone, Default)]
pub struct RepairEventSender {
    sender: Option<EventSender>,
}

impl RepairEventSender {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn none() -> Self {
        Self { sender: None }
    }

    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    pub fn send(&self, event: RepairEvent) {
        if let Some(ref sender) = self.sender {
            // Receiver may have dropped
            let _ = sender.send(event);
        }
    }

    pub fn fix_applied(&self, fix: &Fix, result: &FixResult) {
        self.send(RepairEvent::FixApplied {
            fix: fix.clone(),
            result: result.clone(),
        });
    }

    pub fn fix_skipped(&self, fix: &Fix, reason: &str) {
        self.send(RepairEvent::FixSkipped {
            fix: fix.clone(),
            reason: reason.to_string(),
        });
    }

    pub fn fix_discarded(&self, fix: &Fix) {
        self.send(RepairEvent::FixDiscarded { fix: fix.clone() });
    }

    pub fn auto_repair_completed(&self, clients: usize, repaired: bool) {
        self.send(RepairEvent::AutoRepairCompleted { clients, repaired });
    }
}
