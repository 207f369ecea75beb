// src/domain/services/clock.rs
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Time source seam so reconciliation and stall detection are testable.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
