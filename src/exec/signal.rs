use log::info;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
/// Async-safe signal handling and cancellation for supervised runs
///
/// The installed handler only stores the signal number; the supervisor's
/// poll loop observes it through a [`CancellationToken`] and does the actual
/// teardown outside signal context.
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

/// Last signal received by this process (0 when none)
static SIGNAL_RECEIVED: AtomicI32 = AtomicI32::new(0);

static HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Signals that cancel a running child
pub const CANCEL_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// Installs the process-wide handler for [`CANCEL_SIGNALS`]
pub struct SignalHandler;

impl SignalHandler {
    /// Install handlers; repeated calls are no-ops
    pub fn install() -> Result<Self, String> {
        if HANDLERS_INSTALLED.swap(true, Ordering::SeqCst) {
            return Ok(Self);
        }

        let action = SigAction::new(
            SigHandler::Handler(Self::signal_handler),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for sig in CANCEL_SIGNALS {
            unsafe {
                signal::sigaction(sig, &action)
                    .map_err(|e| format!("Failed to install {} handler: {}", sig, e))?;
            }
        }

        info!("Signal handlers installed (SIGINT, SIGTERM, SIGHUP)");
        Ok(Self)
    }

    /// Only atomic stores: no allocation, locks or I/O
    extern "C" fn signal_handler(signal: libc::c_int) {
        SIGNAL_RECEIVED.store(signal, Ordering::SeqCst);
    }

    /// Token that fires when one of the handled signals arrives
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            local: Arc::new(AtomicI32::new(0)),
            watch_process_signals: true,
        }
    }
}

/// Cooperative cancellation carrying the signal number that caused it
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    local: Arc<AtomicI32>,
    watch_process_signals: bool,
}

impl CancellationToken {
    /// Token that only fires through [`CancellationToken::cancel`]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, signal: i32) {
        self.local.store(signal, Ordering::SeqCst);
    }

    /// The signal that cancelled this run, if any
    pub fn cancelled_by(&self) -> Option<i32> {
        let local = self.local.load(Ordering::SeqCst);
        if local != 0 {
            return Some(local);
        }
        if self.watch_process_signals {
            let global = SIGNAL_RECEIVED.load(Ordering::SeqCst);
            if global != 0 {
                return Some(global);
            }
        }
        None
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_by().is_some()
    }
}
