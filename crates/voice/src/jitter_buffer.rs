//! Zeitbasierter Jitter Buffer
//!
//! Puffert dekodierte Audio-Frames und gibt sie erst frei, wenn der aelteste
//! Frame mindestens die Ziel-Verzoegerung im Buffer verbracht hat. Die
//! Freigabe haengt also von der verstrichenen Zeit ab, nicht vom Fuellstand.
//!
//! - FIFO: Frames werden in Einfuege-Reihenfolge ausgegeben
//! - Begrenzt: bei vollem Buffer wird der aelteste Frame verworfen
//!
//! Der Buffer selbst ist nicht thread-safe. Empfangs-Callback und
//! Playback-Thread teilen ihn ueber einen Mutex.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Standard-Kapazitaet in Frames
pub const STANDARD_MAX_FRAMES: usize = 50;

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterBufferStatistik {
    /// Anzahl eingefuegter Frames gesamt
    pub eingefuegt: u64,
    /// Anzahl ausgegebener Frames
    pub ausgegeben: u64,
    /// Anzahl wegen Ueberlauf verworfener Frames
    pub verworfen: u64,
    /// Aktueller Fuellstand in Frames
    pub fuellstand: usize,
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

/// Begrenzte, zeitgesteuerte FIFO-Warteschlange
pub struct JitterBuffer<T> {
    max_frames: usize,
    frames: VecDeque<(Instant, T)>,
    statistik: JitterBufferStatistik,
}

impl<T> JitterBuffer<T> {
    /// Erstellt einen Buffer mit der gegebenen Kapazitaet (mindestens 1)
    pub fn neu(max_frames: usize) -> Self {
        let max_frames = max_frames.max(1);
        Self {
            max_frames,
            frames: VecDeque::with_capacity(max_frames),
            statistik: JitterBufferStatistik::default(),
        }
    }

    /// Buffer mit Standard-Kapazitaet
    pub fn standard() -> Self {
        Self::neu(STANDARD_MAX_FRAMES)
    }

    /// Fuegt einen Frame mit aktuellem Zeitstempel ein
    pub fn push(&mut self, frame: T) {
        self.push_at(frame, Instant::now());
    }

    /// Fuegt einen Frame mit explizitem Einfuege-Zeitpunkt ein
    pub fn push_at(&mut self, frame: T, jetzt: Instant) {
        if self.frames.len() >= self.max_frames {
            self.frames.pop_front();
            self.statistik.verworfen += 1;
            tracing::trace!(max = self.max_frames, "Jitter Buffer voll, aeltester Frame verworfen");
        }
        self.frames.push_back((jetzt, frame));
        self.statistik.eingefuegt += 1;
    }

    /// Gibt den aeltesten Frame zurueck, sobald er mindestens `ziel_ms`
    /// im Buffer lag
    pub fn pop_ready(&mut self, ziel_ms: u64) -> Option<T> {
        self.pop_ready_at(Duration::from_millis(ziel_ms), Instant::now())
    }

    /// Wie [`pop_ready`](Self::pop_ready), mit explizitem Zeitpunkt
    pub fn pop_ready_at(&mut self, ziel: Duration, jetzt: Instant) -> Option<T> {
        let (eingefuegt, _) = self.frames.front()?;
        if jetzt.saturating_duration_since(*eingefuegt) < ziel {
            return None;
        }
        let (_, frame) = self.frames.pop_front()?;
        self.statistik.ausgegeben += 1;
        Some(frame)
    }

    /// Aktueller Fuellstand in Frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn kapazitaet(&self) -> usize {
        self.max_frames
    }

    /// Verwirft alle gepufferten Frames
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn statistik(&self) -> JitterBufferStatistik {
        JitterBufferStatistik {
            fuellstand: self.frames.len(),
            ..self.statistik.clone()
        }
    }
}

impl<T> Default for JitterBuffer<T> {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
