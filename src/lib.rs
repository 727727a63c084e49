//! unitd - transactional service manager
//!
//! A small init-style daemon that:
//! - Parses .service and .target unit files
//! - Expands start/stop/restart/reload requests over Requires/Wants/Conflicts
//! - Merges, orders and dispatches the resulting jobs concurrently
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                     unitd                        │
//! ├─────────────────────────────────────────────────┤
//! │  Unit Parser  │  Transactions   │  IPC protocol  │
//! ├─────────────────────────────────────────────────┤
//! │   Registry  │  Ordering Graph  │  Readiness      │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod manager;
pub mod protocol;
pub mod signals;
pub mod units;

pub use manager::{JobReport, JobType, Manager, ManagerError};
pub use units::{Service, ServiceType, Target, UnitDefinition, UnitSection};
