//! Windgate - Distributed Windowed Rate Limiting
//!
//! This crate decides whether a request identified by a [`RateLimitKey`] may
//! proceed, counting requests in fixed, sliding or multiple simultaneous
//! windows held in a shared store. Consistency under concurrent callers comes
//! entirely from the store's conditional writes; the limiter itself holds no
//! locks.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod ratelimit;

pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::config::{default_config, Limit, LimiterConfig, ServiceConfig};
pub use crate::context::{CancelHandle, Context};
pub use crate::error::{ErrorKind, LimiterError, Result, StoreError};
pub use crate::ratelimit::{LimitDecision, RateLimitKey, RateLimiter, UsageStats};
