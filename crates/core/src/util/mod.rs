pub mod clock;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use retry::{is_http_retryable, RetryPolicy};
