// Pump RFID Verification - Core Library
// Exposes all modules for use in the API server, the admin CLI, and tests

pub mod analytics;
pub mod audit;
pub mod config;
pub mod context;
pub mod db;
pub mod entities;
pub mod envelope;
pub mod error;
pub mod import;
pub mod pagination;
pub mod reconciliation;
pub mod service;
pub mod tags;
pub mod verification;

#[cfg(feature = "server")]
pub mod api;

#[cfg(feature = "client")]
pub mod client;

// Re-export commonly used types
pub use analytics::{DashboardStats, StationActivity};
pub use audit::{AuditAction, AuditFilter, AuditLogEntry, EntityType};
pub use config::Config;
pub use context::SessionContext;
pub use entities::{
    ChildTagSpec, ExpectedChildTag, GasStation, IssuedUser, LoginRequest, LoginResponse, NewPump,
    NewStation, NewUser, Pump, PumpStatus, PumpUpdate, Role, StationStatus, StationUpdate, User,
};
pub use envelope::{ApiResponse, Deleted, ErrorBody, LoggedOut};
pub use error::{Error, Result};
pub use import::{ImportRow, ImportSummary};
pub use pagination::{PageMeta, PageRequest, PageSettings};
pub use reconciliation::{
    Discrepancy, DiscrepancyCategory, ReconciliationEngine, ReconciliationReport, Verdict,
    VerificationDetails,
};
pub use service::{Listing, Service};
pub use tags::{TagId, TagSet};
pub use verification::{VerificationFilter, VerificationRequest, VerificationSession};

#[cfg(feature = "server")]
pub use api::{build_router, AppState};

#[cfg(feature = "client")]
pub use client::ApiClient;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
