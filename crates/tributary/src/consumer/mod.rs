//! Drain-then-idle consumption of a topic subscription.

pub mod assignment;
pub mod consume_loop;
pub mod handler;
pub mod shutdown;

pub use assignment::{AssignmentState, AssignmentTracker, effective_assignment};
pub use consume_loop::{ConsumeLoop, LoopMonitor, LoopPhase, LoopStats, PollOutcome};
pub use handler::MessageHandler;
pub use shutdown::{Shutdown, ShutdownTrigger, shutdown_channel};
