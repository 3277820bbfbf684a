//! Interceptors composed into a client's call pipeline.
//!
//! | Interceptor | Applies to |
//! |---|---|
//! | [`LoggingInterceptor`] | every call |
//! | [`MutationRetrier`] | mutating verbs |
//! | [`ReadRetrier`] | verbs safe to retry |
//! | [`ErrorWrapper`] | every call |
//! | [`ProxyBouncer`] | RPC calls |

mod ban;
mod classify;
mod logging;
mod retry;

pub use ban::ProxyBouncer;
pub use classify::{is_ban_worthy, is_retryable, ErrorWrapper};
pub use logging::LoggingInterceptor;
pub use retry::{MutationRetrier, ReadRetrier};
