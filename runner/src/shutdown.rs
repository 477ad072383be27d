use nix::{
    errno::Errno,
    sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
};
use std::{
    os::raw::c_int,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::debug;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Tells the run loop that the operator wants the run to end
#[derive(Debug, Clone)]
pub enum ShutdownSignal {
    /// set by the SIGINT/SIGTERM handler of this process
    Process,
    /// set by hand, independent of signals
    Manual(Arc<AtomicBool>),
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::Manual(Arc::new(AtomicBool::new(false)))
    }
}

impl ShutdownSignal {
    /// Install SIGINT and SIGTERM handlers that raise the process wide shutdown flag.
    ///
    /// The handlers are installed without `SA_RESTART`, so blocking calls return early with
    /// `EINTR`. The reaper also polls the flag between its non-blocking waits.
    pub fn install() -> Result<Self, Errno> {
        let action = SigAction::new(
            SigHandler::Handler(request_shutdown),
            SaFlags::empty(),
            SigSet::empty(),
        );

        for signal in [Signal::SIGINT, Signal::SIGTERM] {
            // SAFETY: the handler only stores to an atomic, which is async-signal-safe
            unsafe { sigaction(signal, &action) }?;
            debug!(signal = ?signal, "Installed shutdown handler");
        }

        Ok(Self::Process)
    }

    pub fn request(&self) {
        match self {
            Self::Process => SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst),
            Self::Manual(flag) => flag.store(true, Ordering::SeqCst),
        }
    }

    pub fn is_requested(&self) -> bool {
        match self {
            Self::Process => SHUTDOWN_REQUESTED.load(Ordering::SeqCst),
            Self::Manual(flag) => flag.load(Ordering::SeqCst),
        }
    }
}
