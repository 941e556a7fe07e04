// homeconnect-core: Schema validation, drift reporting and typed appliance
// access on top of homeconnect-api.

pub mod catalogue;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod registry;
pub mod reporter;
pub mod validator;

// ── Primary re-exports ──────────────────────────────────────────────
pub use catalogue::{Catalogue, Group, KeySpec, ValueKind};
pub use client::{ConnectionState, HomeConnectClient};
pub use config::{ClientConfig, EventsConfig};
pub use error::CoreError;
pub use events::{ApplianceEvent, EventKind};
pub use registry::{InferredType, KeyRecord, KeyRegistry};
pub use reporter::{DriftReport, Reporter, ReporterConfig, Signature};
pub use validator::{Drift, DriftKind, Validator};

pub use model::{
    Appliance, CommandInfo, Constraints, Item, Program, ProgramDefinition, ProgramSummary,
};

// Re-exported so consumers need only one dependency for common setup.
pub use homeconnect_api::{
    AuthConfig, AuthFlow, AuthStatus, Endpoint, JsonFileTokenStore, MemoryTokenStore, TokenStore,
};
