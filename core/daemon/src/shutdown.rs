//! SIGINT/SIGTERM handling.
//!
//! Signals only flip a shared flag; the main thread polls it and runs the
//! orderly shutdown.

use signal_hook::consts::{SIGINT, SIGTERM};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn install_handlers() -> io::Result<ShutdownFlag> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))?;
    }
    Ok(ShutdownFlag(flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigterm_sets_flag() {
        let flag = install_handlers().expect("install handlers");
        assert!(!flag.requested());

        signal_hook::low_level::raise(SIGTERM).expect("raise SIGTERM");

        assert!(flag.requested());
    }
}
