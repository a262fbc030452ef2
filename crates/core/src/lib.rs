// crates/core/src/lib.rs
pub mod api;
pub mod clock;
pub mod display;
pub mod error;
pub mod job;
pub mod paths;
pub mod poller;
pub mod schedule;
pub mod tokens;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use display::{Palette, Tone};
pub use error::*;
pub use job::*;
pub use poller::{PollInterval, PollPolicy, Pollable, StatePoller};
pub use schedule::*;
pub use tokens::SessionTokenRegistry;
