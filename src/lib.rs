pub mod bank;
pub mod codec;
pub mod config;
pub mod error;
pub mod expand;
pub mod id_generator;
pub mod pools;
pub mod query;
pub mod record;
pub mod store;
pub mod usage_type;

pub use bank::{BatchOutcome, SearchResults, TnuBank, UsageUpload, UsageView, WriteStep};
pub use codec::CompositeUsageId;
pub use config::TnuConfig;
pub use error::{Result, TnuError};
pub use query::{PrimaryRank, TextCombine, UsageQuery};
