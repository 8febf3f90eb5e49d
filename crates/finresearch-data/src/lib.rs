pub mod error;
pub mod ledger;
pub mod market_data;
pub mod memory;
pub mod metrics;
pub mod search;

pub use error::DataError;
pub use ledger::RunLedger;
pub use market_data::{DataRequest, FmpClient, MarketData, StatementQuery};
pub use memory::MemoryCache;
pub use metrics::{compute_metrics, market_snapshot};
pub use search::{SearchOutcome, SerpApiClient, WebSearch};
