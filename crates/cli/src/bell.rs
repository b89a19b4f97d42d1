//! Terminal bell notification sink.

use std::io::Write;
use std::sync::Mutex;

use session::{NotificationKind, NotificationSink};
use tracing::debug;

const BELL: &[u8] = b"\x07";

/// Rings the terminal bell by writing BEL to the wrapped writer.
pub struct TerminalBell<W> {
    out: Mutex<W>,
}

impl TerminalBell<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> TerminalBell<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> NotificationSink for TerminalBell<W> {
    fn notify(&self, kind: NotificationKind) {
        debug!(kind = %kind, "Ringing terminal bell");
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        // Write failures are ignored; a missing bell never affects the session.
        let _ = out.write_all(BELL).and_then(|_| out.flush());
    }
}
