//! Rate limiting logic: windows, strategies, stores and the limiter itself.

mod backend;
mod counter;
mod decision;
mod descriptor;
mod limiter;
mod memory;
mod rules;
mod strategy;

pub use backend::{Condition, CounterUpdate, TransactionalStore, WindowStore};
pub use counter::{align_window_start, EntryKey, RateLimitEntry, TimeWindow, WindowType};
pub use decision::{LimitDecision, UsageStats, WindowUsage};
pub use descriptor::RateLimitKey;
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use memory::MemoryStore;
pub use rules::{StrategyConfig, WindowRule};
pub use strategy::{
    FixedWindowStrategy, MultiWindowStrategy, SlidingWindowStrategy, WindowConfig, WindowStrategy,
};
