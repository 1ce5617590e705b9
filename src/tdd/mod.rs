pub mod cycle;
pub mod executor;

pub use cycle::{CycleError, CycleResult, CycleState, GreenResult, RedResult, RefactorResult, TddCycle};
pub use executor::{is_cycle_done, new_retry_policy, TddCycleExecutor};
