//! Cooperative interruption flag for the interpreter process.
//!
//! The host delivers SIGINT; the handler only raises a flag. The interactive
//! loop, the evaluator and the RPC client poll the flag at points where
//! abandoning work is safe and turn it into an interruption condition there.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared, cloneable interruption flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Whether the flag is currently raised.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Lower the flag and report whether it was raised.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }

    /// Lower the flag.
    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// Route SIGINT for this process into the flag instead of the default
    /// terminate action.
    #[cfg(unix)]
    pub fn install_sigint_handler(&self) -> std::io::Result<()> {
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&self.raised))?;
        Ok(())
    }

    /// SIGINT routing is unavailable on this platform; the flag can still be
    /// raised programmatically.
    #[cfg(not(unix))]
    pub fn install_sigint_handler(&self) -> std::io::Result<()> {
        Ok(())
    }
}
