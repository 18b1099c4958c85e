//! Ende-zu-Ende-Test ueber Loopback-Transport und Signalisierungsnetz:
//! A ruft B an, B nimmt an, beide telefonieren mit gleichem SAS, eine
//! Seite legt auf und beide sind wieder frei.

use std::sync::Arc;
use std::time::Duration;

use meshcall_media::{HandshakeZustand, IdentityKey, LoopbackNetz};
use meshcall_node::demo::Knoten;
use meshcall_node::{CallEngine, NodeConfig, SignalNetz};
use meshcall_signaling::CallPhase;
use tokio::time::{sleep, Instant};

fn config(name: &str) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.identitaet.display_name = name.into();
    config.audio.aktiviert = false;
    config.audio.handshake_timeout_s = 5;
    config
}

async fn warte_bis(beschreibung: &str, bedingung: impl Fn() -> bool) {
    let ende = Instant::now() + Duration::from_secs(5);
    while Instant::now() < ende {
        if bedingung() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("Zeitueberschreitung: {beschreibung}");
}

fn media_aktiv(engine: &CallEngine) -> bool {
    engine
        .media()
        .aktive_session()
        .is_some_and(|s| s.zustand() == HandshakeZustand::Active)
}

struct Paar {
    a: Knoten,
    b: Knoten,
    _media_netz: Arc<LoopbackNetz>,
    _signal_netz: Arc<SignalNetz>,
}

async fn paar_aufbauen() -> Paar {
    let media_netz = LoopbackNetz::neu();
    let signal_netz = SignalNetz::neu();
    let a = Knoten::starten(&config("Alice"), IdentityKey::zufaellig(), &media_netz, &signal_netz);
    let mut b = Knoten::starten(&config("Bob"), IdentityKey::zufaellig(), &media_netz, &signal_netz);
    b.automatisch_annehmen();

    a.engine.ankuendigen().unwrap();
    b.engine.ankuendigen().unwrap();
    let (ea, eb) = (a.engine.clone(), b.engine.clone());
    let (ida, idb) = (a.local_id().clone(), b.local_id().clone());
    warte_bis("Announces", move || {
        ea.peers().media_endpoint(&idb).is_some() && eb.peers().media_endpoint(&ida).is_some()
    })
    .await;
    Paar { a, b, _media_netz: media_netz, _signal_netz: signal_netz }
}

async fn gespraech_herstellen(paar: &Paar) {
    let call_id = paar.a.engine.anrufen(paar.b.local_id()).unwrap();

    let (ea, eb) = (paar.a.engine.clone(), paar.b.engine.clone());
    warte_bis("beide IN_CALL mit aktiver Media Session", move || {
        ea.phase() == CallPhase::InCall
            && eb.phase() == CallPhase::InCall
            && media_aktiv(&ea)
            && media_aktiv(&eb)
    })
    .await;

    assert_eq!(paar.b.engine.current_call().unwrap().call_id, call_id);
    assert_eq!(
        paar.b.engine.current_call().unwrap().display_name.as_deref(),
        Some("Alice")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn anruf_annehmen_und_auflegen() {
    let paar = paar_aufbauen().await;
    let mut phasen_a = paar.a.engine.phasen_abonnieren();
    gespraech_herstellen(&paar).await;

    let sas_a = paar.a.engine.get_security_info().unwrap();
    let sas_b = paar.b.engine.get_security_info().unwrap();
    assert!(sas_a.encrypted);
    assert!(sas_a.sas_code.is_some());
    assert_eq!(sas_a.sas_code, sas_b.sas_code);

    assert!(paar.a.engine.verify_sas());
    assert!(paar.a.engine.peers().ist_verifiziert(paar.b.local_id()));

    // Ping-Antwort liefert eine RTT
    let ea = paar.a.engine.clone();
    warte_bis("RTT gemessen", move || {
        ea.get_metrics().is_some_and(|m| m.rtt_avg_ms.is_some())
    })
    .await;

    paar.b.engine.auflegen().unwrap();
    let (ea, eb) = (paar.a.engine.clone(), paar.b.engine.clone());
    warte_bis("beide IDLE", move || {
        ea.phase() == CallPhase::Idle
            && eb.phase() == CallPhase::Idle
            && ea.media().aktive_session().is_none()
            && eb.media().aktive_session().is_none()
    })
    .await;

    let mut gesehen = Vec::new();
    while let Ok(wechsel) = phasen_a.try_recv() {
        gesehen.push(wechsel.phase);
    }
    assert_eq!(gesehen.first(), Some(&CallPhase::OutgoingCall));
    assert!(gesehen.contains(&CallPhase::InCall));
    assert_eq!(&gesehen[gesehen.len() - 2..], &[CallPhase::Ended, CallPhase::Idle]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn anrufer_legt_auf() {
    let paar = paar_aufbauen().await;
    gespraech_herstellen(&paar).await;

    let beendet = paar.a.engine.auflegen().unwrap();
    assert_eq!(paar.a.engine.phase(), CallPhase::Idle);

    let eb = paar.b.engine.clone();
    warte_bis("B wieder IDLE", move || eb.phase() == CallPhase::Idle).await;
    assert!(paar.b.engine.media().aktive_session().is_none());

    // Danach ist ein neuer Anruf moeglich
    let neu = paar.a.engine.anrufen(paar.b.local_id()).unwrap();
    assert_ne!(neu, beendet.call_id);
    let (ea, eb) = (paar.a.engine.clone(), paar.b.engine.clone());
    warte_bis("zweiter Anruf aktiv", move || {
        ea.phase() == CallPhase::InCall && eb.phase() == CallPhase::InCall
    })
    .await;
    paar.a.engine.auflegen();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abgelehnter_anruf() {
    let media_netz = LoopbackNetz::neu();
    let signal_netz = SignalNetz::neu();
    let a = Knoten::starten(&config("Alice"), IdentityKey::zufaellig(), &media_netz, &signal_netz);
    let b = Knoten::starten(&config("Bob"), IdentityKey::zufaellig(), &media_netz, &signal_netz);

    paar_ohne_annahme_anrufen(&a, &b).await;
    b.engine.ablehnen().unwrap();

    let ea = a.engine.clone();
    warte_bis("A nach Ablehnung IDLE", move || ea.phase() == CallPhase::Idle).await;
    assert!(a.engine.media().aktive_session().is_none());
}

async fn paar_ohne_annahme_anrufen(a: &Knoten, b: &Knoten) {
    a.engine.anrufen(b.local_id()).unwrap();
    let (ea, eb) = (a.engine.clone(), b.engine.clone());
    warte_bis("A klingelt bei B", move || {
        ea.phase() == CallPhase::Ringing && eb.phase() == CallPhase::IncomingCall
    })
    .await;
}
