//! Einfache Thread-Timer
//!
//! Ein Timer laeuft in einem eigenen Thread und wartet per
//! `recv_timeout` auf ein Abbruchsignal. `cancel()` wartet nicht auf den
//! Thread, darf also auch aus dem Timer-Callback selbst aufgerufen werden.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::warn;

/// Laufender Timer; beim Drop wird er abgebrochen
pub struct Timer {
    abbruch: Mutex<Option<Sender<()>>>,
}

impl Timer {
    /// Ruft `aktion` einmal nach `verzoegerung` auf
    pub fn einmalig(
        name: &str,
        verzoegerung: Duration,
        aktion: impl FnOnce() + Send + 'static,
    ) -> Self {
        let (tx, rx) = bounded::<()>(1);
        let ergebnis = thread::Builder::new()
            .name(format!("meshcall-timer-{name}"))
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(verzoegerung) {
                    aktion();
                }
            });
        if let Err(e) = ergebnis {
            warn!(timer = name, "Timer-Thread konnte nicht gestartet werden: {}", e);
        }
        Self {
            abbruch: Mutex::new(Some(tx)),
        }
    }

    /// Ruft `aktion` alle `intervall` auf, bis abgebrochen wird oder
    /// `aktion` `false` liefert
    pub fn periodisch(
        name: &str,
        intervall: Duration,
        mut aktion: impl FnMut() -> bool + Send + 'static,
    ) -> Self {
        let (tx, rx) = bounded::<()>(1);
        let ergebnis = thread::Builder::new()
            .name(format!("meshcall-timer-{name}"))
            .spawn(move || loop {
                match rx.recv_timeout(intervall) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !aktion() {
                            break;
                        }
                    }
                    _ => break,
                }
            });
        if let Err(e) = ergebnis {
            warn!(timer = name, "Timer-Thread konnte nicht gestartet werden: {}", e);
        }
        Self {
            abbruch: Mutex::new(Some(tx)),
        }
    }

    /// Bricht den Timer ab. Ein bereits laufender Callback wird nicht
    /// unterbrochen.
    pub fn cancel(&self) {
        if let Some(tx) = self.abbruch.lock().take() {
            let _ = tx.try_send(());
        }
    }

    pub fn ist_abgebrochen(&self) -> bool {
        self.abbruch.lock().is_none()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn einmaliger_timer_feuert() {
        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = zaehler.clone();
        let _timer = Timer::einmalig("test", Duration::from_millis(10), move || {
            z.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(200));
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abgebrochener_timer_feuert_nicht() {
        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = zaehler.clone();
        let timer = Timer::einmalig("test", Duration::from_millis(100), move || {
            z.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        timer.cancel();
        assert!(timer.ist_abgebrochen());
        thread::sleep(Duration::from_millis(250));
        assert_eq!(zaehler.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn periodischer_timer_endet_auf_wunsch() {
        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = zaehler.clone();
        let _timer = Timer::periodisch("test", Duration::from_millis(5), move || {
            z.fetch_add(1, Ordering::SeqCst) < 2
        });
        thread::sleep(Duration::from_millis(300));
        assert_eq!(zaehler.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn drop_bricht_ab() {
        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = zaehler.clone();
        drop(Timer::periodisch("test", Duration::from_millis(50), move || {
            z.fetch_add(1, Ordering::SeqCst);
            true
        }));
        thread::sleep(Duration::from_millis(150));
        assert_eq!(zaehler.load(Ordering::SeqCst), 0);
    }
}
