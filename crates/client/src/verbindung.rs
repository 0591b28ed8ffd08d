//! Verbindungs-Aktor
//!
//! Jede Verbindung laeuft als eigener Task der den kompletten
//! Lebenszyklus besitzt: Namensaufloesung, TCP-Connect, optionaler
//! TLS-Handshake, Protokoll-Handshake (Version + Authenticate), die
//! Hauptschleife mit Lese-, Schreib- und Keepalive-Pfad, und den
//! Abbau. Der Client-Handle spricht mit dem Aktor ausschliesslich
//! ueber den Kommando-Kanal.
//!
//! ## Zustandsmodell
//!
//! ```text
//! Neu -> Aufloesen -> TlsHandshake -> ProtokollHandshake -> Authentifiziert
//!   \________________________________________________________/
//!                            |
//!                            v
//!                        Getrennt
//! ```
//!
//! Jeder Zustand kann nach `Getrennt` abbrechen. Eine Verbindung wird
//! nie wiederverwendet; fuer einen neuen Versuch startet der Handle
//! einen frischen Aktor.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;

use murmel_core::{ChannelId, ClientEvent, MurmelError, Result, SessionId};
use murmel_crypto::CryptState;
use murmel_protocol::nachrichten::{
    self, version_packen, Authenticate, MessageType, Ping, UserState, Version,
};
use murmel_protocol::{Frame, FrameCodec};

use crate::dispatcher::Verteiler;
use crate::einstellungen::Einstellungen;
use crate::tls;
use crate::warteschlange::SendeWarteschlange;

/// Intervall fuer die Keepalive-Pings nach der Authentifizierung
const KEEPALIVE_INTERVALL: std::time::Duration = std::time::Duration::from_secs(5);

/// Puffergroesse fuer eingehende UDP-Pakete
const UDP_PUFFER_GROESSE: usize = 1500;

/// Freitext-Kennung die in der Versions-Nachricht mitgesendet wird
const CLIENT_RELEASE: &str = concat!("murmel-client-", env!("CARGO_PKG_VERSION"));

/// Unterstuetzte Codec-Version (CELT-Bitstream-Kennung)
const CELT_VERSION: i32 = 0x8000_000bu32 as i32;

// ---------------------------------------------------------------------------
// Zustand & Kommandos
// ---------------------------------------------------------------------------

/// Lebenszyklus-Zustand einer Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbindungszustand {
    /// Noch kein Verbindungsversuch gestartet
    Neu,
    /// Namensaufloesung laeuft
    Aufloesen,
    /// TCP steht, TLS-Handshake laeuft
    TlsHandshake,
    /// Transport steht, Version/Authenticate gesendet
    ProtokollHandshake,
    /// Server hat die Session-ID zugewiesen
    Authentifiziert,
    /// Verbindung beendet (regulaer oder durch Fehler)
    Getrennt,
}

impl Verbindungszustand {
    /// Control-Nachrichten duerfen ab dem Protokoll-Handshake gesendet werden
    pub fn ist_verbunden(self) -> bool {
        matches!(self, Self::ProtokollHandshake | Self::Authentifiziert)
    }
}

impl std::fmt::Display for Verbindungszustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Neu => "neu",
            Self::Aufloesen => "aufloesen",
            Self::TlsHandshake => "tls-handshake",
            Self::ProtokollHandshake => "protokoll-handshake",
            Self::Authentifiziert => "authentifiziert",
            Self::Getrennt => "getrennt",
        };
        f.write_str(name)
    }
}

/// Kommandos vom Client-Handle an den Aktor
#[derive(Debug)]
pub(crate) enum Kommando {
    /// Frame in die Sende-Warteschlange einreihen
    Senden(Frame),
    /// Eigenen Benutzer in einen anderen Kanal verschieben
    KanalBeitreten(ChannelId),
    /// Eigenen Kommentar setzen
    KommentarSetzen(String),
    /// Verbindung beenden
    Trennen,
}

/// Vom Handle und Aktor gemeinsam genutzte Anschlusspunkte
pub(crate) struct Geteilt {
    pub zustand: Arc<watch::Sender<Verbindungszustand>>,
    pub ereignisse: mpsc::UnboundedSender<ClientEvent>,
    pub crypt: Arc<Mutex<CryptState>>,
    pub udp: Arc<Mutex<Option<Arc<UdpSocket>>>>,
    pub verbindungs_aufbau: Arc<AtomicBool>,
    pub abbruch: watch::Receiver<bool>,
}

impl Geteilt {
    fn zustand_setzen(&self, zustand: Verbindungszustand) {
        self.zustand.send_replace(zustand);
    }

    fn abgebrochen(&self) -> bool {
        *self.abbruch.borrow()
    }

    fn fehler_melden(&self, fehler: &MurmelError) {
        tracing::warn!(fehler = %fehler, "Verbindungsfehler");
        let _ = self.ereignisse.send(ClientEvent::Fehler(fehler.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Gemeinsamer Typ fuer TLS- und Klartext-Transport
trait Strom: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin> Strom for T {}

type Transportstrom = Framed<Box<dyn Strom>, FrameCodec>;
type Schreibsenke = SplitSink<Transportstrom, Frame>;

struct Aufbau {
    strom: Transportstrom,
    udp: Arc<UdpSocket>,
}

// ---------------------------------------------------------------------------
// Aktor
// ---------------------------------------------------------------------------

/// Kompletter Lebenslauf einer Verbindung, vom Handle als Task gestartet
pub(crate) async fn verbindung_ausfuehren(
    einstellungen: Einstellungen,
    geteilt: Geteilt,
    kommando_rx: mpsc::UnboundedReceiver<Kommando>,
) {
    // Aufbau gegen das Abbruchsignal rennen lassen, damit Trennen auch
    // mitten in Connect oder TLS-Handshake sofort greift
    let mut abbruch_rx = geteilt.abbruch.clone();
    let ergebnis = tokio::select! {
        ergebnis = aufbauen(&einstellungen, &geteilt) => ergebnis,
        _ = abbruch_rx.wait_for(|&abgebrochen| abgebrochen) => {
            Err(MurmelError::Verbindung("Verbindungsaufbau abgebrochen".into()))
        }
    };
    geteilt.verbindungs_aufbau.store(false, Ordering::SeqCst);

    match ergebnis {
        Ok(aufbau) => {
            let _ = geteilt.ereignisse.send(ClientEvent::VerbindungsErgebnis {
                erfolgreich: true,
                fehler: None,
            });
            hauptschleife(&einstellungen, &geteilt, kommando_rx, aufbau).await;
        }
        Err(fehler) => {
            if geteilt.abgebrochen() {
                tracing::debug!("Verbindungsaufbau abgebrochen");
            } else {
                tracing::warn!(fehler = %fehler, "Verbindungsaufbau fehlgeschlagen");
                let _ = geteilt.ereignisse.send(ClientEvent::VerbindungsErgebnis {
                    erfolgreich: false,
                    fehler: Some(fehler.to_string()),
                });
            }
        }
    }

    geteilt.udp.lock().take();
    geteilt.zustand_setzen(Verbindungszustand::Getrennt);
    let _ = geteilt.ereignisse.send(ClientEvent::Getrennt);
}

/// Namensaufloesung, TCP-Connect, optionaler TLS-Handshake, UDP-Socket
async fn aufbauen(einstellungen: &Einstellungen, geteilt: &Geteilt) -> Result<Aufbau> {
    geteilt.zustand_setzen(Verbindungszustand::Aufloesen);
    let ziel = einstellungen.zieladresse();

    let adressen: Vec<SocketAddr> = lookup_host(&ziel)
        .await
        .map_err(|e| MurmelError::Aufloesung(format!("{ziel}: {e}")))?
        .collect();

    // Endpunkte der Reihe nach probieren, der erste Treffer gewinnt
    let mut letzter_fehler: Option<std::io::Error> = None;
    let mut tcp: Option<TcpStream> = None;
    for adresse in adressen {
        match TcpStream::connect(adresse).await {
            Ok(s) => {
                tracing::debug!(adresse = %adresse, "TCP-Verbindung hergestellt");
                tcp = Some(s);
                break;
            }
            Err(e) => {
                tracing::debug!(adresse = %adresse, fehler = %e, "Endpunkt nicht erreichbar");
                letzter_fehler = Some(e);
            }
        }
    }
    let tcp = tcp.ok_or_else(|| {
        MurmelError::Verbindung(match letzter_fehler {
            Some(e) => format!("{ziel}: {e}"),
            None => format!("{ziel}: keine Adressen aufgeloest"),
        })
    })?;

    tcp.set_nodelay(true)
        .map_err(|e| MurmelError::Verbindung(format!("TCP_NODELAY: {e}")))?;
    let peer = tcp
        .peer_addr()
        .map_err(|e| MurmelError::Verbindung(e.to_string()))?;

    let strom: Box<dyn Strom> = if einstellungen.tls.aktiv {
        geteilt.zustand_setzen(Verbindungszustand::TlsHandshake);
        let name = ServerName::try_from(einstellungen.server.host.clone())
            .map_err(|e| MurmelError::TlsHandshake(format!("ungueltiger Servername: {e}")))?;
        let connector =
            TlsConnector::from(tls::client_config(einstellungen.tls.zertifikat_pruefen));
        let tls_strom = connector
            .connect(name, tcp)
            .await
            .map_err(|e| MurmelError::TlsHandshake(e.to_string()))?;
        tracing::debug!("TLS-Handshake abgeschlossen");
        Box::new(tls_strom)
    } else {
        Box::new(tcp)
    };

    // UDP-Socket fuer den Audio-Pfad, verbunden mit demselben Endpunkt
    let lokal = if peer.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let udp = UdpSocket::bind(lokal)
        .await
        .map_err(|e| MurmelError::Verbindung(format!("UDP-Bind: {e}")))?;
    udp.connect(peer)
        .await
        .map_err(|e| MurmelError::Verbindung(format!("UDP-Connect: {e}")))?;

    geteilt.zustand_setzen(Verbindungszustand::ProtokollHandshake);
    Ok(Aufbau {
        strom: Framed::new(strom, FrameCodec::new()),
        udp: Arc::new(udp),
    })
}

/// Lese-, Schreib- und Keepalive-Pfad einer stehenden Verbindung
async fn hauptschleife(
    einstellungen: &Einstellungen,
    geteilt: &Geteilt,
    mut kommando_rx: mpsc::UnboundedReceiver<Kommando>,
    aufbau: Aufbau,
) {
    let Aufbau { strom, udp } = aufbau;
    let (senke, mut strom) = strom.split();
    let (schreiber, mut schreib_ergebnisse) = schreiber_starten(senke);
    let udp_task = udp_empfang_starten(
        udp.clone(),
        geteilt.crypt.clone(),
        geteilt.ereignisse.clone(),
    );
    *geteilt.udp.lock() = Some(udp);

    let mut warteschlange = SendeWarteschlange::neu();
    let mut verteiler = Verteiler::neu(
        geteilt.crypt.clone(),
        geteilt.ereignisse.clone(),
        einstellungen.verhalten.kanal_updates_anwenden,
    );
    let mut keepalive: Option<tokio::time::Interval> = None;
    let mut session: Option<SessionId> = None;

    // Version und Authenticate sind die ersten beiden Nachrichten
    match handshake_frames(einstellungen) {
        Ok((version, auth)) => {
            warteschlange.einreihen(version);
            warteschlange.einreihen(auth);
            anstossen(&mut warteschlange, &schreiber).await;
        }
        Err(e) => {
            geteilt.fehler_melden(&e);
            udp_task.abort();
            return;
        }
    }

    loop {
        tokio::select! {
            kommando = kommando_rx.recv() => match kommando {
                // Alle Handles weg oder explizites Trennen
                None | Some(Kommando::Trennen) => break,
                Some(Kommando::Senden(frame)) => {
                    warteschlange.einreihen(frame);
                    anstossen(&mut warteschlange, &schreiber).await;
                }
                Some(Kommando::KanalBeitreten(kanal)) => {
                    eigenen_zustand_senden(
                        geteilt,
                        &mut warteschlange,
                        &schreiber,
                        session,
                        UserState { kanal_id: Some(kanal), ..Default::default() },
                    )
                    .await;
                }
                Some(Kommando::KommentarSetzen(text)) => {
                    eigenen_zustand_senden(
                        geteilt,
                        &mut warteschlange,
                        &schreiber,
                        session,
                        UserState { kommentar: Some(text), ..Default::default() },
                    )
                    .await;
                }
            },

            ergebnis = schreib_ergebnisse.recv() => match ergebnis {
                Some(Ok(())) => {
                    if let Some(frame) = warteschlange.schreiben_abgeschlossen(true) {
                        let _ = schreiber.send(frame).await;
                    }
                }
                Some(Err(e)) => {
                    warteschlange.schreiben_abgeschlossen(false);
                    geteilt.fehler_melden(&MurmelError::Schreiben(e.to_string()));
                }
                None => break,
            },

            frame = strom.next() => match frame {
                Some(Ok(frame)) => {
                    tracing::trace!(
                        typ = frame.typ,
                        laenge = frame.nutzdaten.len(),
                        "Frame empfangen"
                    );
                    match verteiler.verarbeiten(&frame) {
                        Ok(ausgang) => {
                            if let Some(antwort) = ausgang.antwort {
                                warteschlange.einreihen(antwort);
                                anstossen(&mut warteschlange, &schreiber).await;
                            }
                            if let Some(neue_session) = ausgang.authentifiziert {
                                session = Some(neue_session);
                                geteilt.zustand_setzen(Verbindungszustand::Authentifiziert);
                                if keepalive.is_none() {
                                    // Erster Tick feuert sofort: der erste Ping
                                    // geht direkt nach dem ServerSync raus
                                    keepalive =
                                        Some(tokio::time::interval(KEEPALIVE_INTERVALL));
                                }
                            }
                        }
                        Err(e) => {
                            geteilt.fehler_melden(&e);
                            if e.ist_fatal() {
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    geteilt.fehler_melden(&MurmelError::Lesen(e.to_string()));
                    break;
                }
                None => {
                    tracing::info!("Server hat die Verbindung beendet");
                    break;
                }
            },

            _ = keepalive_tick(&mut keepalive) => {
                match nachrichten::kodieren(
                    MessageType::Ping,
                    &Ping { zeitstempel: unix_sekunden() },
                ) {
                    Ok(frame) => {
                        warteschlange.einreihen(frame);
                        anstossen(&mut warteschlange, &schreiber).await;
                    }
                    Err(e) => geteilt.fehler_melden(&e),
                }
            }
        }
    }

    udp_task.abort();
    warteschlange.leeren();
    verteiler.verzeichnis.debug_ausgeben();
    verteiler.verzeichnis.leeren();
    // Kanal schliessen beendet den Schreib-Task
    drop(schreiber);
}

/// Reiht ein partielles UserState-Update fuer die eigene Session ein
async fn eigenen_zustand_senden(
    geteilt: &Geteilt,
    warteschlange: &mut SendeWarteschlange,
    schreiber: &mpsc::Sender<Frame>,
    session: Option<SessionId>,
    vorlage: UserState,
) {
    let Some(session) = session else {
        tracing::warn!("UserState-Update vor Abschluss der Authentifizierung verworfen");
        return;
    };
    match nachrichten::kodieren(MessageType::UserState, &UserState { session, ..vorlage }) {
        Ok(frame) => {
            warteschlange.einreihen(frame);
            anstossen(warteschlange, schreiber).await;
        }
        Err(e) => geteilt.fehler_melden(&e),
    }
}

fn handshake_frames(einstellungen: &Einstellungen) -> Result<(Frame, Frame)> {
    let version = nachrichten::kodieren(
        MessageType::Version,
        &Version {
            version: version_packen(1, 2, 2),
            release: CLIENT_RELEASE.into(),
        },
    )?;
    let auth = nachrichten::kodieren(
        MessageType::Authenticate,
        &Authenticate {
            benutzername: einstellungen.benutzer.name.clone(),
            passwort: einstellungen.benutzer.passwort.clone(),
            celt_versionen: vec![CELT_VERSION],
        },
    )?;
    Ok((version, auth))
}

/// Stoesst den naechsten Schreibvorgang an, falls keiner laeuft
async fn anstossen(warteschlange: &mut SendeWarteschlange, schreiber: &mpsc::Sender<Frame>) {
    if let Some(frame) = warteschlange.naechste_starten() {
        let _ = schreiber.send(frame).await;
    }
}

async fn keepalive_tick(keepalive: &mut Option<tokio::time::Interval>) {
    match keepalive {
        Some(intervall) => {
            intervall.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn unix_sekunden() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Schreib-Task
// ---------------------------------------------------------------------------

/// Eigener Task fuer den Schreibpfad: nimmt Frames entgegen und meldet
/// den Abschluss jedes Schreibvorgangs zurueck. Die Warteschlangen-
/// Disziplin stellt sicher dass hoechstens ein Frame unterwegs ist.
fn schreiber_starten(
    mut senke: Schreibsenke,
) -> (mpsc::Sender<Frame>, mpsc::Receiver<std::io::Result<()>>) {
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(1);
    let (ergebnis_tx, ergebnis_rx) = mpsc::channel::<std::io::Result<()>>(1);
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let ergebnis = senke.send(frame).await;
            if ergebnis_tx.send(ergebnis).await.is_err() {
                break;
            }
        }
    });
    (frame_tx, ergebnis_rx)
}

// ---------------------------------------------------------------------------
// UDP-Empfang
// ---------------------------------------------------------------------------

/// Empfangsschleife fuer den UDP-Audio-Pfad. Pakete die das Gateway
/// nicht entschluesseln kann werden verworfen und gezaehlt, nie an die
/// Anwendung weitergereicht.
fn udp_empfang_starten(
    socket: Arc<UdpSocket>,
    crypt: Arc<Mutex<CryptState>>,
    ereignisse: mpsc::UnboundedSender<ClientEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut puffer = [0u8; UDP_PUFFER_GROESSE];
        loop {
            let laenge = match socket.recv(&mut puffer).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::debug!(fehler = %e, "UDP-Empfang beendet");
                    break;
                }
            };
            let klartext = crypt.lock().entschluesseln(&puffer[..laenge]);
            match klartext {
                Ok(daten) => {
                    let _ = ereignisse.send(ClientEvent::UdpAudio(daten));
                }
                Err(e) => tracing::debug!(fehler = %e, laenge, "UDP-Paket verworfen"),
            }
        }
    })
}
