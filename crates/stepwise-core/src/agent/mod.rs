//! Agent invocation: the boundary between the engine and the external
//! coding-agent process.
//!
//! ```text
//! Step ──► CommandBuilder ──► argv ──► ProcessExecutor ──► ExecOutput
//!                                                              │
//!                                          parse_agent_output ◄┘
//! ```

pub mod command;
pub mod output;
pub mod process;

pub use command::{AgentInvocation, ClaudeCommandBuilder, CommandBuilder};
pub use output::{parse_agent_output, AgentOutput};
pub use process::{run_check, ExecOutput, ExecRequest, ProcessExecutor, ShellExecutor};
