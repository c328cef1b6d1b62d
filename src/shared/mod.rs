pub mod errors;
pub mod fs_atomic;
pub mod ids;
pub mod logging;

pub use errors::{FaultCategory, WorkerFault};
pub use fs_atomic::{append_line, atomic_write_file};
pub use ids::{next_opaque_id, validate_identifier_value, RecipeId};
pub use logging::append_log_event;

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
