use std::io::Write;

/// An error returned from the `proc_exit` host call.
///
/// Embedders can test if an error returned from wasm is this error, in which
/// case it may signal a non-fatal way the guest exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Exited with i32 exit status {0}")]
pub struct I32Exit(pub i32);

impl I32Exit {
    /// Accessor for an exit code appropriate for calling `std::process::exit`
    /// with, when interpreting this `I32Exit` as an exit for the parent
    /// process.
    ///
    /// Unix only keeps the low 8 bits of an exit status. Windows keeps all 32.
    pub fn process_exit_code(&self) -> i32 {
        if cfg!(windows) && self.0 >= 3 {
            // 3 and above are reserved by abort() and exception codes.
            1
        } else {
            self.0
        }
    }

    /// Terminate the host process with this status, after flushing the
    /// host's stdout and stderr.
    pub fn process_exit(self) -> ! {
        tracing::debug!(code = self.0, "guest requested exit");
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        std::process::exit(self.process_exit_code())
    }
}

/// The host exit status for a finished guest run.
///
/// A normal return is 0 and a `proc_exit` carries its own code. Anything
/// else is a trap and reports like an abort: `128 + SIGABRT` on Unix, 3 on
/// Windows.
pub fn exit_status(result: &anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => match e.downcast_ref::<I32Exit>() {
            Some(exit) => exit.process_exit_code(),
            None => abort_status(),
        },
    }
}

#[cfg(unix)]
fn abort_status() -> i32 {
    128 + libc::SIGABRT
}

#[cfg(not(unix))]
fn abort_status() -> i32 {
    // https://docs.microsoft.com/en-us/cpp/c-runtime-library/reference/abort?view=vs-2019
    3
}
