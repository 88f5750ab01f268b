//! Run coordination primitives: per-conversation exclusivity, the inflight
//! registry, domain errors, and the cancellable retry driver.

mod error;
mod lock;
mod registry;
mod retry;

pub use error::{DomainError, DomainErrorCode, RunError};
pub use lock::{ConversationLocks, RunLockGuard};
pub use registry::{
    CancelFn, CancelOutcome, InflightRegistry, Registration, DEFAULT_FINALIZED_MEMORY,
    DEFAULT_MAX_TOOL_CALLS,
};
pub use retry::{run_with_retry, run_with_retry_and_sleep, RetryError, RetryPolicy};
