pub mod schema;
pub mod store;

mod baselines;
mod defects;
mod queue;
mod results;

pub use results::{QueuePlacement, RecordedScriptResult, RecordedStep, StoredRegression};
pub use store::{new_id, now_rfc3339, Store, StoreStats};
