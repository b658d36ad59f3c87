//! Allow-listed shell command execution with interactive session tracking
//!
//! Commands run as `<shell> -ic <line>` in their own process group. Output is
//! classified as it arrives (prompt, ready server, error) and processes that
//! keep running stay addressable by pid.

mod classifier;
mod engine;
mod session;
mod wrapped_child;

pub use classifier::{
    WaitingForInput, detect_error, detect_server_ready, detect_waiting_for_input,
};
pub use engine::{
    CommandError, CommandExecutionEngine, CommandOutput, EXECUTE_TIMEOUT, SEND_INPUT_TIMEOUT,
    STOP_GRACE,
};
pub use session::{
    EVENT_CAPACITY, ProcessEvent, ProcessInfo, ProcessSession, ProcessState, SessionTable,
};
pub use wrapped_child::{ChildPipes, SHELL_FLAGS, WrappedChild, kill_group, terminate_group};
