//! murmel-client – Asynchroner Client fuer den Sprachchat-Control-Kanal
//!
//! Der [`Client`] ist ein klonbarer Handle auf einen Verbindungs-Aktor:
//! alle Methoden reihen Kommandos ein und kehren sofort zurueck, die
//! eigentliche Arbeit (Namensaufloesung, TLS, Protokoll, Keepalive)
//! erledigt ein eigener Task. Beobachtbare Zustandsaenderungen kommen
//! als [`ClientEvent`]-Strom bei der Anwendung an.
//!
//! ## Aufbau
//! - [`verbindung`]: Verbindungs-Aktor und Zustandsmodell
//! - [`dispatcher`]: Verarbeitung eingehender Frames
//! - [`verzeichnis`]: lokales Abbild der Benutzer und Kanaele
//! - [`warteschlange`]: Sende-Warteschlange mit Ein-Frame-Disziplin
//! - [`einstellungen`]: Verbindungs-Einstellungen (TOML-ladbar)
//! - [`tls`]: rustls-Konfiguration fuer beide Betriebsarten
//!
//! ## Beispiel
//!
//! ```no_run
//! use murmel_client::{Client, Einstellungen};
//!
//! # async fn beispiel() -> murmel_client::Result<()> {
//! let (client, mut ereignisse) = Client::neu();
//! let mut einstellungen = Einstellungen::default();
//! einstellungen.server.host = "voip.example.org".into();
//! einstellungen.benutzer.name = "alice".into();
//! client.verbinden(einstellungen)?;
//!
//! while let Some(ereignis) = ereignisse.recv().await {
//!     println!("{ereignis:?}");
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use murmel_crypto::{CryptState, KryptoStatistik};
use murmel_protocol::nachrichten;
use murmel_protocol::Frame;

pub mod dispatcher;
pub mod einstellungen;
pub mod tls;
pub mod verbindung;
pub mod verzeichnis;
pub mod warteschlange;

pub use einstellungen::Einstellungen;
pub use verbindung::Verbindungszustand;

pub use murmel_core::{
    Channel, ChannelId, ClientEvent, MurmelError, Result, SessionId, User,
};
pub use murmel_protocol::nachrichten::MessageType;

use verbindung::{verbindung_ausfuehren, Geteilt, Kommando};

/// Klonbarer Handle auf einen Verbindungs-Aktor
///
/// Muss innerhalb einer Tokio-Runtime verwendet werden; `verbinden`
/// startet den Aktor mit `tokio::spawn`.
#[derive(Clone)]
pub struct Client {
    zustand_tx: Arc<watch::Sender<Verbindungszustand>>,
    zustand_rx: watch::Receiver<Verbindungszustand>,
    ereignisse_tx: mpsc::UnboundedSender<ClientEvent>,
    crypt: Arc<Mutex<CryptState>>,
    udp: Arc<Mutex<Option<Arc<UdpSocket>>>>,
    verbindungs_aufbau: Arc<AtomicBool>,
    abbruch_tx: Arc<watch::Sender<bool>>,
    abbruch_rx: watch::Receiver<bool>,
    kommando_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Kommando>>>>,
    einstellungen: Arc<Mutex<Option<Einstellungen>>>,
}

impl Client {
    /// Erstellt einen neuen Client samt Ereignis-Empfaenger
    pub fn neu() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (zustand_tx, zustand_rx) = watch::channel(Verbindungszustand::Neu);
        let (abbruch_tx, abbruch_rx) = watch::channel(false);
        let (ereignisse_tx, ereignisse_rx) = mpsc::unbounded_channel();
        let client = Self {
            zustand_tx: Arc::new(zustand_tx),
            zustand_rx,
            ereignisse_tx,
            crypt: Arc::new(Mutex::new(CryptState::neu())),
            udp: Arc::new(Mutex::new(None)),
            verbindungs_aufbau: Arc::new(AtomicBool::new(false)),
            abbruch_tx: Arc::new(abbruch_tx),
            abbruch_rx,
            kommando_tx: Arc::new(Mutex::new(None)),
            einstellungen: Arc::new(Mutex::new(None)),
        };
        (client, ereignisse_rx)
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Startet einen Verbindungsversuch mit den uebergebenen
    /// Einstellungen. Schlaegt fehl wenn bereits ein Aufbau laeuft oder
    /// eine Verbindung steht; das Ergebnis des Versuchs kommt als
    /// [`ClientEvent::VerbindungsErgebnis`] an.
    pub fn verbinden(&self, einstellungen: Einstellungen) -> Result<()> {
        if self.verbindungs_aufbau.swap(true, Ordering::SeqCst) {
            return Err(MurmelError::Vorbedingung(
                "Verbindungsaufbau laeuft bereits".into(),
            ));
        }
        let zustand = *self.zustand_rx.borrow();
        if zustand != Verbindungszustand::Neu && zustand != Verbindungszustand::Getrennt {
            self.verbindungs_aufbau.store(false, Ordering::SeqCst);
            return Err(MurmelError::Vorbedingung(format!(
                "bereits verbunden (Zustand: {zustand})"
            )));
        }

        self.abbruch_tx.send_replace(false);
        self.zustand_tx.send_replace(Verbindungszustand::Neu);
        *self.einstellungen.lock() = Some(einstellungen.clone());

        let (kommando_tx, kommando_rx) = mpsc::unbounded_channel();
        *self.kommando_tx.lock() = Some(kommando_tx);

        let geteilt = Geteilt {
            zustand: self.zustand_tx.clone(),
            ereignisse: self.ereignisse_tx.clone(),
            crypt: self.crypt.clone(),
            udp: self.udp.clone(),
            verbindungs_aufbau: self.verbindungs_aufbau.clone(),
            abbruch: self.abbruch_rx.clone(),
        };
        tracing::info!(ziel = %einstellungen.zieladresse(), "Verbindungsaufbau gestartet");
        tokio::spawn(verbindung_ausfuehren(einstellungen, geteilt, kommando_rx));
        Ok(())
    }

    /// Beendet die Verbindung. Idempotent und in jedem Zustand erlaubt,
    /// auch mitten im Aufbau oder Handshake.
    pub fn trennen(&self) {
        self.abbruch_tx.send_replace(true);
        let laufender_aktor = self.kommando_tx.lock().take();
        if let Some(tx) = laufender_aktor {
            let _ = tx.send(Kommando::Trennen);
        } else if !self.verbindungs_aufbau.load(Ordering::SeqCst) {
            // Kein Aktor unterwegs, der Zustand wechselt direkt
            self.zustand_tx.send_replace(Verbindungszustand::Getrennt);
        }
    }

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> Verbindungszustand {
        *self.zustand_rx.borrow()
    }

    /// Empfaenger fuer Zustandsaenderungen (z.B. zum Abwarten der
    /// Authentifizierung)
    pub fn zustand_beobachten(&self) -> watch::Receiver<Verbindungszustand> {
        self.zustand_rx.clone()
    }

    /// Einstellungen des letzten Verbindungsversuchs
    pub fn aktuelle_einstellungen(&self) -> Option<Einstellungen> {
        self.einstellungen.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Control-Kanal
    // -----------------------------------------------------------------------

    /// Serialisiert eine Nachricht und reiht sie in die Sende-
    /// Warteschlange ein. Kehrt sofort zurueck; der Schreibvorgang
    /// laeuft im Hintergrund.
    pub fn nachricht_senden<T: Serialize>(
        &self,
        typ: MessageType,
        nachricht: &T,
        protokollieren: bool,
    ) -> Result<()> {
        self.verbunden_pruefen()?;
        let frame = nachrichten::kodieren(typ, nachricht)?;
        if protokollieren {
            tracing::debug!(typ = %typ, laenge = frame.nutzdaten.len(), "Nachricht eingereiht");
        }
        self.kommando(Kommando::Senden(frame))
    }

    /// Setzt den eigenen Benutzer-Kommentar (erst nach der
    /// Authentifizierung moeglich)
    pub fn kommentar_setzen(&self, text: impl Into<String>) -> Result<()> {
        self.authentifiziert_pruefen()?;
        self.kommando(Kommando::KommentarSetzen(text.into()))
    }

    /// Verschiebt den eigenen Benutzer in den angegebenen Kanal (erst
    /// nach der Authentifizierung moeglich)
    pub fn kanal_beitreten(&self, kanal: ChannelId) -> Result<()> {
        self.authentifiziert_pruefen()?;
        self.kommando(Kommando::KanalBeitreten(kanal))
    }

    /// Sendet rohe Audio-Daten als getunnelte Nachricht ueber den
    /// TCP-Control-Kanal (Ausweichpfad wenn UDP nicht verfuegbar ist)
    pub fn roh_tunnel_senden(&self, daten: Vec<u8>) -> Result<()> {
        self.verbunden_pruefen()?;
        self.kommando(Kommando::Senden(Frame::neu(
            MessageType::UdpTunnel.code(),
            daten,
        )))
    }

    // -----------------------------------------------------------------------
    // UDP-Audio-Pfad
    // -----------------------------------------------------------------------

    /// Verschluesselt Audio-Daten und sendet sie ueber den UDP-Socket.
    /// Erfordert eine stehende Verbindung und empfangenes
    /// Schluesselmaterial (CryptSetup).
    pub async fn udp_senden(&self, daten: &[u8]) -> Result<()> {
        let socket = self.udp.lock().clone().ok_or_else(|| {
            MurmelError::Vorbedingung("nicht verbunden".into())
        })?;
        let paket = {
            let mut crypt = self.crypt.lock();
            if !crypt.ist_bereit() {
                return Err(MurmelError::Vorbedingung(
                    "Schluesselmaterial noch nicht empfangen".into(),
                ));
            }
            crypt
                .verschluesseln(daten)
                .map_err(|e| MurmelError::Schreiben(format!("Verschluesselung: {e}")))?
        };
        socket
            .send(&paket)
            .await
            .map_err(|e| MurmelError::Schreiben(e.to_string()))?;
        Ok(())
    }

    /// Zaehler des Krypto-Gateways (gute, verspaetete, verlorene und
    /// fehlgeschlagene Pakete)
    pub fn krypto_statistik(&self) -> KryptoStatistik {
        self.crypt.lock().statistik()
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    fn verbunden_pruefen(&self) -> Result<()> {
        if self.zustand().ist_verbunden() {
            Ok(())
        } else {
            Err(MurmelError::Vorbedingung("nicht verbunden".into()))
        }
    }

    fn authentifiziert_pruefen(&self) -> Result<()> {
        if self.zustand() == Verbindungszustand::Authentifiziert {
            Ok(())
        } else {
            Err(MurmelError::Vorbedingung(
                "noch nicht authentifiziert".into(),
            ))
        }
    }

    fn kommando(&self, kommando: Kommando) -> Result<()> {
        let guard = self.kommando_tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| MurmelError::Vorbedingung("nicht verbunden".into()))?;
        tx.send(kommando)
            .map_err(|_| MurmelError::Vorbedingung("nicht verbunden".into()))
    }
}
