//! Pipeline engine: runs an ordered step list with conditions, session
//! chaining, rate-limit pauses and manual pause/resume.

pub mod attempt;
pub mod condition;
pub mod events;
pub mod rate_limit;
pub mod runner;
pub mod scheduler;

pub use attempt::{attempt_step, StepAttempt};
pub use condition::ConditionOutcome;
pub use events::{ChannelObserver, LoggingObserver, NoopObserver, PipelineEvent, PipelineObserver};
pub use rate_limit::RateLimitInfo;
pub use runner::{PipelineRunner, RunOutcome};
pub use scheduler::ResumeScheduler;
