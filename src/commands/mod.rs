//! One module per subcommand. Each returns the process exit code; errors are
//! reserved for failures that stop the command outright.

pub mod enqueue;
pub mod mutate;
pub mod purge;
pub mod run;
pub mod status;
