// 10.0: the engine. coordinates order matching, margin calls, feed medians,
// forced settlement, global settlement and revival.
// deterministic and event-driven with no external I/O.

mod core;
mod feeds;
mod margin;
mod matching;
mod results;
mod settling;
mod swan;

pub use core::Engine;
pub use results::{EngineError, ErrorKind, OrderOutcome, SettleOutcome};
