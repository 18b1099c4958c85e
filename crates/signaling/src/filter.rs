//! Zulassungsfilter fuer eingehende Signalisierungsnachrichten
//!
//! Prueft Empfaenger, Duplikate und Anrufzugehoerigkeit, bevor eine
//! Nachricht den Zustandsautomaten erreicht. Duplikate werden ueber das
//! Paar (Anruf-ID, Nachrichtentyp) innerhalb eines kurzen Fensters erkannt.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meshcall_core::{CallId, PeerId};
use meshcall_protocol::{CallMessage, MessageType};
use parking_lot::Mutex;

/// Einstellungen des Filters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterKonfig {
    /// Zeitfenster in dem eine Wiederholung als Duplikat gilt
    pub dedup_fenster: Duration,
    /// Mindestabstand zwischen zwei Bereinigungslaeufen
    pub bereinigungs_intervall: Duration,
}

impl Default for FilterKonfig {
    fn default() -> Self {
        Self {
            dedup_fenster: Duration::from_secs(1),
            bereinigungs_intervall: Duration::from_secs(60),
        }
    }
}

/// Ergebnis einer Filterpruefung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterGrund {
    PresenceAnnounce,
    Ok,
    NotForUs,
    Duplicate,
    UnknownCallIdle,
    ForeignCall,
}

impl FilterGrund {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PresenceAnnounce => "presence_announce",
            Self::Ok => "ok",
            Self::NotForUs => "not_for_us",
            Self::Duplicate => "duplicate",
            Self::UnknownCallIdle => "unknown_call_idle",
            Self::ForeignCall => "foreign_call",
        }
    }
}

impl std::fmt::Display for FilterGrund {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type DedupSchluessel = (CallId, MessageType);

/// Filter fuer eingehende Anrufnachrichten einer lokalen Identitaet
pub struct CallMessageFilter {
    local_id: PeerId,
    konfig: FilterKonfig,
    gesehen: DashMap<DedupSchluessel, Instant>,
    letzte_bereinigung: Mutex<Instant>,
}

impl CallMessageFilter {
    pub fn neu(local_id: PeerId, konfig: FilterKonfig) -> Self {
        Self {
            local_id,
            konfig,
            gesehen: DashMap::new(),
            letzte_bereinigung: Mutex::new(Instant::now()),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Bewertet eine Nachricht gegen den aktuellen Anruf
    pub fn evaluate(
        &self,
        msg: &CallMessage,
        current_call_id: Option<&CallId>,
    ) -> (bool, FilterGrund) {
        self.evaluate_at(msg, current_call_id, Instant::now())
    }

    /// Wie [`evaluate`](Self::evaluate), mit explizitem Zeitpunkt
    pub fn evaluate_at(
        &self,
        msg: &CallMessage,
        current_call_id: Option<&CallId>,
        jetzt: Instant,
    ) -> (bool, FilterGrund) {
        if msg.msg_type == MessageType::PresenceAnnounce {
            return (true, FilterGrund::PresenceAnnounce);
        }

        if msg.to != self.local_id {
            return (false, FilterGrund::NotForUs);
        }

        self.bereinigen_falls_faellig(jetzt);

        match self.gesehen.entry((msg.call_id.clone(), msg.msg_type)) {
            Entry::Occupied(mut eintrag) => {
                let alter = jetzt.saturating_duration_since(*eintrag.get());
                if alter < self.konfig.dedup_fenster {
                    return (false, FilterGrund::Duplicate);
                }
                eintrag.insert(jetzt);
            }
            Entry::Vacant(eintrag) => {
                eintrag.insert(jetzt);
            }
        }

        if msg.msg_type != MessageType::CallInvite {
            match current_call_id {
                None => return (false, FilterGrund::UnknownCallIdle),
                Some(aktuell) if *aktuell != msg.call_id => {
                    return (false, FilterGrund::ForeignCall)
                }
                Some(_) => {}
            }
        }

        (true, FilterGrund::Ok)
    }

    /// Entfernt abgelaufene Dedup-Eintraege. Gibt die Anzahl entfernter
    /// Eintraege zurueck.
    pub fn bereinigen(&self) -> usize {
        self.bereinigen_at(Instant::now())
    }

    pub fn bereinigen_at(&self, jetzt: Instant) -> usize {
        let vorher = self.gesehen.len();
        let fenster = self.konfig.dedup_fenster;
        self.gesehen
            .retain(|_, gesehen| jetzt.saturating_duration_since(*gesehen) < fenster);
        *self.letzte_bereinigung.lock() = jetzt;

        let entfernt = vorher.saturating_sub(self.gesehen.len());
        if entfernt > 0 {
            tracing::debug!(entfernt, verbleibend = self.gesehen.len(), "Dedup-Eintraege bereinigt");
        }
        entfernt
    }

    /// Anzahl gespeicherter Dedup-Eintraege
    pub fn eintraege(&self) -> usize {
        self.gesehen.len()
    }

    fn bereinigen_falls_faellig(&self, jetzt: Instant) {
        let faellig = {
            let letzte = self.letzte_bereinigung.lock();
            jetzt.saturating_duration_since(*letzte) >= self.konfig.bereinigungs_intervall
        };
        if faellig {
            self.bereinigen_at(jetzt);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use meshcall_protocol::{build_accept, build_announce, build_end, build_invite};

    fn lokal() -> PeerId {
        PeerId::from("b0b0")
    }

    fn fern() -> PeerId {
        PeerId::from("a1a1")
    }

    fn filter() -> CallMessageFilter {
        CallMessageFilter::neu(lokal(), FilterKonfig::default())
    }

    #[test]
    fn ankuendigung_immer_erlaubt() {
        let f = filter();
        let msg = build_announce(&fern(), Some("Alice"), None);
        assert_eq!(f.evaluate(&msg, None), (true, FilterGrund::PresenceAnnounce));
        assert_eq!(f.evaluate(&msg, None), (true, FilterGrund::PresenceAnnounce));
        assert_eq!(f.eintraege(), 0);
    }

    #[test]
    fn fremder_empfaenger_wird_abgewiesen() {
        let f = filter();
        let msg = build_invite(&fern(), &PeerId::from("cafe"), None, None, None);
        assert_eq!(f.evaluate(&msg, None), (false, FilterGrund::NotForUs));
    }

    #[test]
    fn duplikat_innerhalb_des_fensters() {
        let f = filter();
        let t0 = Instant::now();
        let msg = build_invite(&fern(), &lokal(), Some(CallId::from("c1")), None, None);

        assert_eq!(f.evaluate_at(&msg, None, t0), (true, FilterGrund::Ok));
        assert_eq!(
            f.evaluate_at(&msg, None, t0 + Duration::from_millis(500)),
            (false, FilterGrund::Duplicate)
        );
        assert_eq!(
            f.evaluate_at(&msg, None, t0 + Duration::from_millis(1_100)),
            (true, FilterGrund::Ok)
        );
    }

    #[test]
    fn anderer_typ_ist_kein_duplikat() {
        let f = filter();
        let t0 = Instant::now();
        let id = CallId::from("c1");
        let invite = build_invite(&fern(), &lokal(), Some(id.clone()), None, None);
        let end = build_end(&fern(), &lokal(), &id);
        assert!(f.evaluate_at(&invite, None, t0).0);
        assert_eq!(f.evaluate_at(&end, Some(&id), t0), (true, FilterGrund::Ok));
    }

    #[test]
    fn folgenachricht_ohne_anruf() {
        let f = filter();
        let msg = build_end(&fern(), &lokal(), &CallId::from("c1"));
        assert_eq!(f.evaluate(&msg, None), (false, FilterGrund::UnknownCallIdle));
    }

    #[test]
    fn folgenachricht_fuer_fremden_anruf() {
        let f = filter();
        let msg = build_accept(&fern(), &lokal(), &CallId::from("c1"), None, None);
        assert_eq!(
            f.evaluate(&msg, Some(&CallId::from("c2"))),
            (false, FilterGrund::ForeignCall)
        );
    }

    #[test]
    fn einladung_waehrend_anruf_wird_durchgelassen() {
        // Besetzt-Entscheidung trifft der Zustandsautomat
        let f = filter();
        let msg = build_invite(&fern(), &lokal(), Some(CallId::from("c9")), None, None);
        assert_eq!(
            f.evaluate(&msg, Some(&CallId::from("c1"))),
            (true, FilterGrund::Ok)
        );
    }

    #[test]
    fn bereinigung_entfernt_alte_eintraege() {
        let f = filter();
        let t0 = Instant::now();
        for i in 0..5 {
            let msg = build_invite(&fern(), &lokal(), Some(CallId::from(format!("c{i}"))), None, None);
            f.evaluate_at(&msg, None, t0);
        }
        assert_eq!(f.eintraege(), 5);
        assert_eq!(f.bereinigen_at(t0 + Duration::from_millis(200)), 0);
        assert_eq!(f.bereinigen_at(t0 + Duration::from_secs(2)), 5);
        assert_eq!(f.eintraege(), 0);
    }

    #[test]
    fn bereinigung_laeuft_inline() {
        let f = CallMessageFilter::neu(
            lokal(),
            FilterKonfig {
                dedup_fenster: Duration::from_secs(1),
                bereinigungs_intervall: Duration::from_secs(10),
            },
        );
        let t0 = Instant::now();
        let alt = build_invite(&fern(), &lokal(), Some(CallId::from("alt")), None, None);
        f.evaluate_at(&alt, None, t0);

        let neu = build_invite(&fern(), &lokal(), Some(CallId::from("neu")), None, None);
        f.evaluate_at(&neu, None, t0 + Duration::from_secs(11));
        assert_eq!(f.eintraege(), 1);
    }

    #[test]
    fn grund_texte() {
        assert_eq!(FilterGrund::UnknownCallIdle.to_string(), "unknown_call_idle");
        assert_eq!(FilterGrund::ForeignCall.as_str(), "foreign_call");
    }
}
