//! Infrastructure layer: stores, configuration and the ledger services.

pub mod config;
pub mod error;
pub mod reports;
pub mod service;
pub mod store;

pub use config::LedgerConfig;
pub use error::{ServiceError, ServiceResult, StoreError, StoreResult};
pub use reports::ReportService;
pub use service::{LedgerEnvelope, LedgerService, SettingsUpdate};
pub use store::{EntryFilter, LedgerStores, Pagination};
