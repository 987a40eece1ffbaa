pub mod chat;
pub mod db;
pub mod error;
pub mod meta;
pub mod records;
pub mod settings;
pub mod types;
pub mod usage;

pub use chat::ChatStore;
pub use error::{Result, StoreError};
pub use records::RecordStore;
pub use settings::SettingsStore;
pub use usage::UsageLedger;
