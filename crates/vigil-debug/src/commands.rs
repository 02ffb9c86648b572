//! Command-id registry.
//!
//! Execution-control ids live in 100..=151, status ids in 501..=502,
//! and 901 is the error frame. Ids outside the registry are preserved
//! by the codec and answered with an error frame by the dispatcher.

/// Resume all threads.
pub const CMD_RUN: u32 = 101;
/// List registered threads.
pub const CMD_LIST_THREADS: u32 = 102;
/// Daemon notification: a thread was created.
pub const CMD_THREAD_CREATE: u32 = 103;
/// Daemon notification: a thread exited.
pub const CMD_THREAD_KILL: u32 = 104;
/// Suspend a thread; also the daemon's suspend notification.
pub const CMD_THREAD_SUSPEND: u32 = 105;
/// Resume one thread; also the daemon's resume notification.
pub const CMD_THREAD_RUN: u32 = 106;
/// Step into.
pub const CMD_STEP_INTO: u32 = 107;
/// Step over.
pub const CMD_STEP_OVER: u32 = 108;
/// Step out of the current frame.
pub const CMD_STEP_RETURN: u32 = 109;
/// Fetch one variable's children.
pub const CMD_GET_VARIABLE: u32 = 110;
/// Add a breakpoint.
pub const CMD_SET_BREAK: u32 = 111;
/// Remove a breakpoint.
pub const CMD_REMOVE_BREAK: u32 = 112;
/// Evaluate an expression in a suspended frame.
pub const CMD_EVALUATE: u32 = 113;
/// Dump a suspended thread's frame.
pub const CMD_GET_FRAME: u32 = 114;
/// Inject instrumentation into a function ahead of a line.
pub const CMD_SET_NEXT_STATEMENT: u32 = 121;
/// Suspend threads on unhandled errors.
pub const CMD_ADD_EXCEPTION_BREAK: u32 = 122;
/// Stop suspending on unhandled errors.
pub const CMD_REMOVE_EXCEPTION_BREAK: u32 = 123;
/// Version handshake.
pub const CMD_VERSION: u32 = 501;
/// Generic success/return frame.
pub const CMD_RETURN: u32 = 502;
/// Error frame; payload carries the escaped message.
pub const CMD_ERROR: u32 = 901;

/// Whether an id belongs to the known registry.
#[must_use]
pub fn is_known(command: u32) -> bool {
    matches!(command, 100..=151 | 501..=502 | 901)
}

/// Registry name for logging; `"unknown"` for ids outside it.
#[must_use]
pub fn command_name(command: u32) -> &'static str {
    match command {
        CMD_RUN => "run",
        CMD_LIST_THREADS => "list-threads",
        CMD_THREAD_CREATE => "thread-create",
        CMD_THREAD_KILL => "thread-kill",
        CMD_THREAD_SUSPEND => "thread-suspend",
        CMD_THREAD_RUN => "thread-run",
        CMD_STEP_INTO => "step-into",
        CMD_STEP_OVER => "step-over",
        CMD_STEP_RETURN => "step-return",
        CMD_GET_VARIABLE => "get-variable",
        CMD_SET_BREAK => "set-break",
        CMD_REMOVE_BREAK => "remove-break",
        CMD_EVALUATE => "evaluate",
        CMD_GET_FRAME => "get-frame",
        CMD_SET_NEXT_STATEMENT => "set-next-statement",
        CMD_ADD_EXCEPTION_BREAK => "add-exception-break",
        CMD_REMOVE_EXCEPTION_BREAK => "remove-exception-break",
        CMD_VERSION => "version",
        CMD_RETURN => "return",
        CMD_ERROR => "error",
        _ => "unknown",
    }
}
