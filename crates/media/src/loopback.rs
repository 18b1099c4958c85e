//! Prozessinterner Mesh-Transport
//!
//! Verbindet mehrere Knoten im selben Prozess, z.B. fuer die Demo und fuer
//! Tests. Links kennen ein gemeinsames Zufallsgeheimnis, gelten als
//! verschluesselt und werden nach einer kurzen Verzoegerung aktiv.
//! Unbekannte Ziele bleiben dauerhaft im Zustand `Pending`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use meshcall_core::{MeshcallError, Result};
use meshcall_protocol::MediaEndpoint;
use parking_lot::Mutex;
use rand::RngCore;
use tracing::{debug, warn};

use crate::address::{IdentityKey, MediaDestination};
use crate::link::{
    DatenCallback, LinkCallback, LinkStatus, MediaLink, MediaTransport, SchliessCallback,
};

static LINK_ZAEHLER: AtomicU64 = AtomicU64::new(1);

type GeteilterDatenCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;
type GeteilterSchliessCallback = Arc<dyn Fn() + Send + Sync>;
type GeteilterLinkCallback = Arc<dyn Fn(Arc<dyn MediaLink>) + Send + Sync>;

// ---------------------------------------------------------------------------
// Netz
// ---------------------------------------------------------------------------

/// Registry aller Loopback-Transporte, adressiert ueber die Zieladresse
pub struct LoopbackNetz {
    transporte: Mutex<HashMap<String, Weak<LoopbackTransport>>>,
    handshake_verzoegerung: Duration,
}

impl LoopbackNetz {
    pub fn neu() -> Arc<Self> {
        Self::mit_verzoegerung(Duration::from_millis(20))
    }

    /// Netz mit eigener Handshake-Dauer
    pub fn mit_verzoegerung(handshake_verzoegerung: Duration) -> Arc<Self> {
        Arc::new(Self {
            transporte: Mutex::new(HashMap::new()),
            handshake_verzoegerung,
        })
    }

    /// Meldet einen Knoten mit seiner Identitaet am Netz an
    pub fn transport(self: &Arc<Self>, key: IdentityKey) -> Arc<LoopbackTransport> {
        let ziel = MediaDestination::aus_identitaet(&key);
        let transport = Arc::new(LoopbackTransport {
            key,
            ziel,
            netz: Arc::downgrade(self),
            eingang: Mutex::new(None),
        });
        let mut transporte = self.transporte.lock();
        transporte.retain(|_, t| t.strong_count() > 0);
        transporte.insert(ziel.to_hex(), Arc::downgrade(&transport));
        debug!(ziel = %ziel, "Loopback-Transport angemeldet");
        transport
    }

    fn finden(&self, ziel: &MediaDestination) -> Option<Arc<LoopbackTransport>> {
        self.transporte.lock().get(&ziel.to_hex()).and_then(Weak::upgrade)
    }

    pub fn anzahl(&self) -> usize {
        self.transporte
            .lock()
            .values()
            .filter(|t| t.strong_count() > 0)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Transport eines Knotens im Loopback-Netz
pub struct LoopbackTransport {
    key: IdentityKey,
    ziel: MediaDestination,
    netz: Weak<LoopbackNetz>,
    eingang: Mutex<Option<GeteilterLinkCallback>>,
}

impl LoopbackTransport {
    pub fn identitaet(&self) -> &IdentityKey {
        &self.key
    }

    pub fn ziel(&self) -> MediaDestination {
        self.ziel
    }
}

impl MediaTransport for LoopbackTransport {
    fn local_endpoint(&self) -> MediaEndpoint {
        MediaEndpoint::neu(self.ziel.to_hex(), self.key.to_base64())
    }

    fn create_outbound_link(
        &self,
        ziel: &str,
        _identity_key: &str,
        on_established: LinkCallback,
        on_closed: SchliessCallback,
    ) -> Result<Arc<dyn MediaLink>> {
        let ziel = MediaDestination::from_hex(ziel)?;
        let netz = self
            .netz
            .upgrade()
            .ok_or_else(|| MeshcallError::link("Loopback-Netz existiert nicht mehr"))?;

        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let (lokal, fern) = LoopbackLink::paar_mit_status(secret, true, LinkStatus::Pending);
        *lokal.schliess_cb.lock() = Some(Arc::from(on_closed));

        let Some(gegenueber) = netz.finden(&ziel) else {
            debug!(ziel = %ziel, link = %lokal.id, "Ziel unbekannt, Link bleibt ausstehend");
            return Ok(lokal);
        };

        let verzoegerung = netz.handshake_verzoegerung;
        let lokal_thread = lokal.clone();
        thread::Builder::new()
            .name("meshcall-loopback-handshake".into())
            .spawn(move || {
                thread::sleep(verzoegerung);
                if lokal_thread.status() == LinkStatus::Closed {
                    fern.status_setzen(LinkStatus::Closed);
                    return;
                }
                lokal_thread.status_setzen(LinkStatus::Active);
                fern.status_setzen(LinkStatus::Active);

                let handler = gegenueber.eingang.lock().clone();
                match handler {
                    Some(handler) => handler(fern),
                    None => warn!(ziel = %gegenueber.ziel, "Kein Empfaenger fuer eingehende Links"),
                }
                on_established(lokal_thread);
            })
            .map_err(|e| MeshcallError::link(format!("Handshake-Thread: {e}")))?;

        Ok(lokal)
    }

    fn set_inbound_link_handler(&self, handler: LinkCallback) {
        *self.eingang.lock() = Some(Arc::from(handler));
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Eine Seite eines Loopback-Links
pub struct LoopbackLink {
    id: String,
    secret: Vec<u8>,
    encrypted: bool,
    status: Mutex<LinkStatus>,
    gegenstelle: Mutex<Weak<LoopbackLink>>,
    daten_cb: Mutex<Option<GeteilterDatenCallback>>,
    schliess_cb: Mutex<Option<GeteilterSchliessCallback>>,
}

impl LoopbackLink {
    /// Zwei direkt verbundene, bereits aktive Link-Enden
    pub fn paar(secret: Vec<u8>, encrypted: bool) -> (Arc<Self>, Arc<Self>) {
        Self::paar_mit_status(secret, encrypted, LinkStatus::Active)
    }

    fn paar_mit_status(
        secret: Vec<u8>,
        encrypted: bool,
        status: LinkStatus,
    ) -> (Arc<Self>, Arc<Self>) {
        let nummer = LINK_ZAEHLER.fetch_add(1, Ordering::Relaxed);
        let ende = |seite: &str| {
            Arc::new(Self {
                id: format!("loop-{nummer}{seite}"),
                secret: secret.clone(),
                encrypted,
                status: Mutex::new(status),
                gegenstelle: Mutex::new(Weak::new()),
                daten_cb: Mutex::new(None),
                schliess_cb: Mutex::new(None),
            })
        };
        let a = ende("a");
        let b = ende("b");
        *a.gegenstelle.lock() = Arc::downgrade(&b);
        *b.gegenstelle.lock() = Arc::downgrade(&a);
        (a, b)
    }

    fn status_setzen(&self, status: LinkStatus) {
        *self.status.lock() = status;
    }

    /// Gegenseite hat abgebaut
    fn fern_geschlossen(&self) {
        {
            let mut status = self.status.lock();
            if *status == LinkStatus::Closed {
                return;
            }
            *status = LinkStatus::Closed;
        }
        let cb = self.schliess_cb.lock().clone();
        if let Some(cb) = cb {
            cb();
        }
    }
}

impl MediaLink for LoopbackLink {
    fn link_id(&self) -> String {
        self.id.clone()
    }

    fn send(&self, daten: &[u8]) -> Result<()> {
        if self.status() != LinkStatus::Active {
            return Err(MeshcallError::link(format!("Link {} ist nicht aktiv", self.id)));
        }
        let gegenstelle = self
            .gegenstelle
            .lock()
            .upgrade()
            .ok_or_else(|| MeshcallError::link(format!("Gegenstelle von {} fehlt", self.id)))?;
        let cb = gegenstelle.daten_cb.lock().clone();
        if let Some(cb) = cb {
            cb(daten);
        }
        Ok(())
    }

    fn on_data(&self, callback: DatenCallback) {
        *self.daten_cb.lock() = Some(Arc::from(callback));
    }

    fn on_closed(&self, callback: SchliessCallback) {
        *self.schliess_cb.lock() = Some(Arc::from(callback));
    }

    fn status(&self) -> LinkStatus {
        *self.status.lock()
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn secret(&self) -> Vec<u8> {
        self.secret.clone()
    }

    fn teardown(&self) {
        {
            let mut status = self.status.lock();
            if *status == LinkStatus::Closed {
                return;
            }
            *status = LinkStatus::Closed;
        }
        debug!(link = %self.id, "Link abgebaut");

        let Some(gegenstelle) = self.gegenstelle.lock().upgrade() else {
            return;
        };
        // Gegenseite asynchron benachrichtigen, ihr Callback darf zurueck
        // in den Aufrufer laufen
        let ergebnis = thread::Builder::new()
            .name("meshcall-loopback-close".into())
            .spawn(move || gegenstelle.fern_geschlossen());
        if let Err(e) = ergebnis {
            warn!(link = %self.id, "Gegenseite nicht benachrichtigt: {}", e);
        }
    }
}
