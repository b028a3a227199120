pub mod config;
pub mod runner;
pub mod stream;

pub use config::AgentLoopConfig;
pub use runner::{run_agent_loop, TurnOutcome, TurnStatus};
