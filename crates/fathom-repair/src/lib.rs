//! Background remediation for Fathom.
//!
//! This crate provides:
//!
//! - [`copy_object`]: the single node-to-node copy used by every service here.
//! - [`ConsistencyRepair`]: scheduled cross-domain audits and immediate,
//!   retried point-to-point repairs requested by the write path.
//! - [`DegradedWriteTracker`]: persistent records of writes that landed in
//!   fewer domains than required.
//! - [`RecoveryListener`]: drains degraded-write records once their missing
//!   domains have a healthy node again, on events and on a timer.
//! - [`RebalanceService`]: moves data after topology changes, one task at a
//!   time cluster-wide.
//! - [`StandbyPoolManager`]: promotes standby nodes into domains that fell
//!   below their minimum size.
//! - [`Throttle`]: token bucket limiting copies per second.

mod consistency;
mod context;
mod copy;
mod degraded;
mod error;
mod rebalance;
mod recovery;
mod standby;
mod throttle;

pub use consistency::{AUDIT_LOCK_KEY, ConsistencyRepair, RepairStats};
pub use context::RepairContext;
pub use copy::{CopyLimits, DEFAULT_MAX_OBJECT_BYTES, copy_object, list_objects, object_exists};
pub use degraded::DegradedWriteTracker;
pub use error::RepairError;
pub use rebalance::{
    ManualRebalanceError, REBALANCE_LOCK_KEY, RebalanceService, RebalanceStatus, RebalanceType,
};
pub use recovery::{RECOVERY_LOCK_KEY, RecoveryListener, SyncReport, TriggerSource};
pub use standby::{Promotion, StandbyPoolManager};
pub use throttle::Throttle;
