//! Nachrichten-Verteiler
//!
//! Nimmt vollstaendige Frames des Control-Kanals entgegen, dekodiert
//! sie anhand des Typ-Codes und wendet sie auf das Sitzungs-Verzeichnis
//! und das Krypto-Gateway an. Beobachtbare Zustandsaenderungen werden
//! als [`ClientEvent`] an die Anwendung gemeldet.
//!
//! Der Verteiler selbst schreibt nie auf den Socket: wenn ein Frame
//! eine Antwort erfordert (CryptSetup-Resync), wird sie im [`Ausgang`]
//! zurueckgegeben und vom Verbindungs-Aktor eingereiht.
//!
//! Unbekannte Typ-Codes werden geloggt und ignoriert. Semantisch
//! unmoegliche Nachrichten (Update fuer unbekannte IDs, fehlende
//! Pflichtfelder) sind Protokollverletzungen und beenden die Verbindung.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use murmel_core::{ClientEvent, MurmelError, Result, SessionId};
use murmel_crypto::CryptState;
use murmel_protocol::nachrichten::{
    self, ChannelRemove, ChannelState, CodecVersion, CryptSetup, MessageType, Ping, ServerSync,
    TextMessage, UserRemove, UserState, Version,
};
use murmel_protocol::Frame;

use crate::verzeichnis::Verzeichnis;

/// Ergebnis der Verarbeitung eines Frames
#[derive(Debug, Default)]
pub struct Ausgang {
    /// Antwort-Frame das eingereiht werden muss
    pub antwort: Option<Frame>,
    /// Gesetzt wenn der Server die Authentifizierung abgeschlossen hat
    pub authentifiziert: Option<SessionId>,
}

/// Verteilt eingehende Frames auf Verzeichnis, Krypto-Gateway und Events
pub struct Verteiler {
    pub verzeichnis: Verzeichnis,
    crypt: Arc<Mutex<CryptState>>,
    ereignisse: mpsc::UnboundedSender<ClientEvent>,
    kanal_updates_anwenden: bool,
}

impl Verteiler {
    pub fn neu(
        crypt: Arc<Mutex<CryptState>>,
        ereignisse: mpsc::UnboundedSender<ClientEvent>,
        kanal_updates_anwenden: bool,
    ) -> Self {
        Self {
            verzeichnis: Verzeichnis::neu(),
            crypt,
            ereignisse,
            kanal_updates_anwenden,
        }
    }

    fn melden(&self, ereignis: ClientEvent) {
        // Empfaenger weg = Anwendung beendet sich, nichts mehr zu melden
        let _ = self.ereignisse.send(ereignis);
    }

    /// Verarbeitet ein vollstaendiges Frame des Control-Kanals
    pub fn verarbeiten(&mut self, frame: &Frame) -> Result<Ausgang> {
        let Some(typ) = MessageType::from_code(frame.typ) else {
            tracing::warn!(typ = frame.typ, "Unbekannter Nachrichtentyp, ignoriert");
            return Ok(Ausgang::default());
        };

        match typ {
            MessageType::Version => self.version(frame),
            MessageType::UdpTunnel => self.udp_tunnel(frame),
            MessageType::Ping => self.ping(frame),
            MessageType::ServerSync => self.server_sync(frame),
            MessageType::ChannelState => self.kanal_zustand(frame),
            MessageType::ChannelRemove => self.kanal_entfernt(frame),
            MessageType::UserState => self.benutzer_zustand(frame),
            MessageType::UserRemove => self.benutzer_entfernt(frame),
            MessageType::TextMessage => self.text_nachricht(frame),
            MessageType::CryptSetup => self.crypt_setup(frame),
            MessageType::CodecVersion => self.codec_version(frame),
            // Authenticate sendet nur der Client
            MessageType::Authenticate => {
                tracing::warn!("Authenticate vom Server erhalten, ignoriert");
                Ok(Ausgang::default())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Informative Nachrichten
    // -----------------------------------------------------------------------

    fn version(&self, frame: &Frame) -> Result<Ausgang> {
        let v: Version = nachrichten::dekodieren(&frame.nutzdaten)?;
        tracing::debug!(version = v.version, release = %v.release, "Server-Version");
        Ok(Ausgang::default())
    }

    fn ping(&self, frame: &Frame) -> Result<Ausgang> {
        let p: Ping = nachrichten::dekodieren(&frame.nutzdaten)?;
        tracing::trace!(zeitstempel = p.zeitstempel, "Ping-Antwort vom Server");
        Ok(Ausgang::default())
    }

    fn codec_version(&self, frame: &Frame) -> Result<Ausgang> {
        let cv: CodecVersion = nachrichten::dekodieren(&frame.nutzdaten)?;
        tracing::debug!(
            alpha = cv.alpha,
            beta = cv.beta,
            bevorzugt_alpha = cv.bevorzugt_alpha,
            "Codec-Version des Servers"
        );
        Ok(Ausgang::default())
    }

    // -----------------------------------------------------------------------
    // Sitzung
    // -----------------------------------------------------------------------

    fn server_sync(&mut self, frame: &Frame) -> Result<Ausgang> {
        let sync: ServerSync = nachrichten::dekodieren(&frame.nutzdaten)?;
        if let Some(willkommen) = &sync.willkommen {
            tracing::info!(text = %willkommen, "Willkommensnachricht");
        }
        self.melden(ClientEvent::Authentifiziert {
            session: sync.session,
        });
        Ok(Ausgang {
            antwort: None,
            authentifiziert: Some(sync.session),
        })
    }

    fn crypt_setup(&mut self, frame: &Frame) -> Result<Ausgang> {
        let cs: CryptSetup = nachrichten::dekodieren(&frame.nutzdaten)?;
        let mut crypt = self.crypt.lock();

        if let (Some(schluessel), Some(client_nonce), Some(server_nonce)) =
            (&cs.schluessel, &cs.client_nonce, &cs.server_nonce)
        {
            // Vollstaendige Initialisierung des Gateways
            crypt
                .set_key(schluessel, client_nonce, server_nonce)
                .map_err(|e| {
                    MurmelError::protokoll(format!("Unbrauchbares Schluesselmaterial: {e}"))
                })?;
            tracing::debug!("Krypto-Gateway initialisiert");
            Ok(Ausgang::default())
        } else if let Some(server_nonce) = &cs.server_nonce {
            // Server resynchronisiert die Entschluessel-IV
            crypt.set_decrypt_iv(server_nonce).map_err(|e| {
                MurmelError::protokoll(format!("Unbrauchbare Server-Nonce: {e}"))
            })?;
            tracing::warn!("Krypto-Resync: Entschluessel-IV vom Server gesetzt");
            Ok(Ausgang::default())
        } else {
            // Resync-Anforderung: mit der aktuellen Verschluessel-IV antworten
            let antwort = nachrichten::kodieren(
                MessageType::CryptSetup,
                &CryptSetup {
                    client_nonce: Some(crypt.encrypt_iv().to_vec()),
                    ..Default::default()
                },
            )?;
            tracing::warn!("Krypto-Resync: Verschluessel-IV an Server gemeldet");
            Ok(Ausgang {
                antwort: Some(antwort),
                authentifiziert: None,
            })
        }
    }

    // -----------------------------------------------------------------------
    // Verzeichnis
    // -----------------------------------------------------------------------

    fn kanal_zustand(&mut self, frame: &Frame) -> Result<Ausgang> {
        let cs: ChannelState = nachrichten::dekodieren(&frame.nutzdaten)?;
        // Eltern-ID 0 bedeutet "Wurzel", kein Verweis
        let eltern = cs.eltern.filter(|id| id.0 != 0);

        if !self.verzeichnis.enthaelt_kanal(cs.kanal_id) {
            let kanal = self.verzeichnis.kanal_anlegen(
                cs.kanal_id,
                cs.name.unwrap_or_default(),
                eltern,
            )?;
            self.melden(ClientEvent::KanalHinzugefuegt(kanal));
        } else if self.kanal_updates_anwenden {
            self.verzeichnis
                .kanal_aktualisieren(cs.kanal_id, cs.name, eltern)?;
        } else {
            tracing::debug!(
                kanal = %cs.kanal_id,
                "Update fuer bestehenden Kanal wird ignoriert"
            );
        }
        Ok(Ausgang::default())
    }

    fn kanal_entfernt(&mut self, frame: &Frame) -> Result<Ausgang> {
        let cr: ChannelRemove = nachrichten::dekodieren(&frame.nutzdaten)?;
        let kanal = self.verzeichnis.kanal_entfernen(cr.kanal_id)?;
        self.melden(ClientEvent::KanalEntfernt(kanal));
        Ok(Ausgang::default())
    }

    fn benutzer_zustand(&mut self, frame: &Frame) -> Result<Ausgang> {
        let us: UserState = nachrichten::dekodieren(&frame.nutzdaten)?;

        if !self.verzeichnis.enthaelt_benutzer(us.session) {
            // Neuer Benutzer: der Kanal ist Pflichtfeld
            let kanal = us.kanal_id.ok_or_else(|| {
                MurmelError::protokoll(format!(
                    "Neuer Benutzer {} ohne Kanal-Zuordnung",
                    us.session
                ))
            })?;
            let benutzer = self.verzeichnis.benutzer_anlegen(
                us.session,
                us.name.unwrap_or_default(),
                kanal,
                us.kommentar,
                us.hash,
            )?;
            self.melden(ClientEvent::BenutzerBeigetreten(benutzer));
            return Ok(Ausgang::default());
        }

        // Partielles Update: nur gesetzte Felder anwenden
        if let Some(kanal) = us.kanal_id {
            let (benutzer, alter_kanal) = self.verzeichnis.benutzer_verschieben(us.session, kanal)?;
            self.melden(ClientEvent::BenutzerGewechselt {
                benutzer,
                alter_kanal,
            });
        }
        if let Some(kommentar) = us.kommentar {
            self.verzeichnis
                .benutzer_kommentar_setzen(us.session, kommentar)?;
        }
        Ok(Ausgang::default())
    }

    fn benutzer_entfernt(&mut self, frame: &Frame) -> Result<Ausgang> {
        let ur: UserRemove = nachrichten::dekodieren(&frame.nutzdaten)?;
        let benutzer = self.verzeichnis.benutzer_entfernen(ur.session)?;
        self.melden(ClientEvent::BenutzerGegangen(benutzer));
        Ok(Ausgang::default())
    }

    // -----------------------------------------------------------------------
    // Durchgereichte Nutzdaten
    // -----------------------------------------------------------------------

    fn text_nachricht(&self, frame: &Frame) -> Result<Ausgang> {
        let tm: TextMessage = nachrichten::dekodieren(&frame.nutzdaten)?;
        self.melden(ClientEvent::TextNachricht(tm.nachricht));
        Ok(Ausgang::default())
    }

    fn udp_tunnel(&self, frame: &Frame) -> Result<Ausgang> {
        // Getunnelte Audio-Daten werden unveraendert weitergereicht
        self.melden(ClientEvent::RohTunnel(frame.nutzdaten.to_vec()));
        Ok(Ausgang::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmel_core::ChannelId;
    use serde::Serialize;

    fn verteiler() -> (
        Verteiler,
        Arc<Mutex<CryptState>>,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        let crypt = Arc::new(Mutex::new(CryptState::neu()));
        let (tx, rx) = mpsc::unbounded_channel();
        (Verteiler::neu(crypt.clone(), tx, false), crypt, rx)
    }

    fn frame<T: Serialize>(typ: MessageType, nachricht: &T) -> Frame {
        nachrichten::kodieren(typ, nachricht).expect("kodierbar")
    }

    fn kanal_frame(id: u32, name: &str, eltern: Option<u32>) -> Frame {
        frame(
            MessageType::ChannelState,
            &ChannelState {
                kanal_id: ChannelId(id),
                eltern: eltern.map(ChannelId),
                name: Some(name.into()),
            },
        )
    }

    #[test]
    fn lebenszyklus_ereignisse_in_reihenfolge() {
        let (mut v, _crypt, mut rx) = verteiler();

        v.verarbeiten(&kanal_frame(1, "Root", None)).expect("Kanal");
        v.verarbeiten(&frame(
            MessageType::UserState,
            &UserState {
                session: SessionId(5),
                name: Some("Alice".into()),
                kanal_id: Some(ChannelId(1)),
                ..Default::default()
            },
        ))
        .expect("Beitritt");

        // Kommentar-Update erzeugt kein Ereignis
        v.verarbeiten(&frame(
            MessageType::UserState,
            &UserState {
                session: SessionId(5),
                kommentar: Some("hi".into()),
                ..Default::default()
            },
        ))
        .expect("Kommentar");

        v.verarbeiten(&frame(
            MessageType::UserRemove,
            &UserRemove { session: SessionId(5) },
        ))
        .expect("Austritt");

        assert!(matches!(
            rx.try_recv().expect("Ereignis"),
            ClientEvent::KanalHinzugefuegt(k) if k.id == ChannelId(1)
        ));
        assert!(matches!(
            rx.try_recv().expect("Ereignis"),
            ClientEvent::BenutzerBeigetreten(b) if b.name == "Alice"
        ));
        assert!(matches!(
            rx.try_recv().expect("Ereignis"),
            ClientEvent::BenutzerGegangen(b) if b.kommentar.as_deref() == Some("hi")
        ));
        assert!(rx.try_recv().is_err());
        assert_eq!(v.verzeichnis.benutzer_anzahl(), 0);
    }

    #[test]
    fn kanalwechsel_meldet_alten_kanal() {
        let (mut v, _crypt, mut rx) = verteiler();
        v.verarbeiten(&kanal_frame(1, "Lobby", None)).expect("Kanal");
        v.verarbeiten(&kanal_frame(2, "Arbeit", Some(1))).expect("Kanal");
        v.verarbeiten(&frame(
            MessageType::UserState,
            &UserState {
                session: SessionId(9),
                name: Some("Bob".into()),
                kanal_id: Some(ChannelId(1)),
                ..Default::default()
            },
        ))
        .expect("Beitritt");

        v.verarbeiten(&frame(
            MessageType::UserState,
            &UserState {
                session: SessionId(9),
                kanal_id: Some(ChannelId(2)),
                ..Default::default()
            },
        ))
        .expect("Wechsel");

        // KanalHinzugefuegt x2, BenutzerBeigetreten ueberspringen
        rx.try_recv().expect("Ereignis");
        rx.try_recv().expect("Ereignis");
        rx.try_recv().expect("Ereignis");
        match rx.try_recv().expect("Ereignis") {
            ClientEvent::BenutzerGewechselt {
                benutzer,
                alter_kanal,
            } => {
                assert_eq!(benutzer.kanal, ChannelId(2));
                assert_eq!(alter_kanal.id, ChannelId(1));
            }
            anderes => panic!("Unerwartetes Ereignis: {anderes:?}"),
        }
    }

    #[test]
    fn kanal_update_wird_standardmaessig_ignoriert() {
        let (mut v, _crypt, mut rx) = verteiler();
        v.verarbeiten(&kanal_frame(1, "Lobby", None)).expect("Kanal");
        rx.try_recv().expect("Ereignis");

        v.verarbeiten(&kanal_frame(1, "Umbenannt", None)).expect("Update");
        assert!(rx.try_recv().is_err());
        assert_eq!(
            v.verzeichnis.kanal(ChannelId(1)).map(|k| k.name.clone()),
            Some("Lobby".to_string())
        );
    }

    #[test]
    fn kanal_update_anwenden_wenn_konfiguriert() {
        let crypt = Arc::new(Mutex::new(CryptState::neu()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut v = Verteiler::neu(crypt, tx, true);

        v.verarbeiten(&kanal_frame(1, "Lobby", None)).expect("Kanal");
        v.verarbeiten(&kanal_frame(1, "Umbenannt", None)).expect("Update");
        assert_eq!(
            v.verzeichnis.kanal(ChannelId(1)).map(|k| k.name.clone()),
            Some("Umbenannt".to_string())
        );
    }

    #[test]
    fn kanal_update_mit_zyklus_ist_protokollfehler() {
        let crypt = Arc::new(Mutex::new(CryptState::neu()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut v = Verteiler::neu(crypt, tx, true);

        v.verarbeiten(&kanal_frame(1, "Oben", None)).expect("Kanal");
        v.verarbeiten(&kanal_frame(2, "Unten", Some(1))).expect("Kanal");

        // Update das Kanal 1 unter seinen eigenen Kindkanal haengen will
        let e = v.verarbeiten(&frame(
            MessageType::ChannelState,
            &ChannelState {
                kanal_id: ChannelId(1),
                eltern: Some(ChannelId(2)),
                name: None,
            },
        ));
        assert!(matches!(e, Err(MurmelError::ProtokollVerletzung(_))));
        assert!(v.verzeichnis.ist_konsistent());
    }

    #[test]
    fn server_sync_liefert_session() {
        let (mut v, _crypt, mut rx) = verteiler();
        let ausgang = v
            .verarbeiten(&frame(
                MessageType::ServerSync,
                &ServerSync {
                    session: SessionId(7),
                    willkommen: Some("Willkommen".into()),
                },
            ))
            .expect("Sync");
        assert_eq!(ausgang.authentifiziert, Some(SessionId(7)));
        assert!(matches!(
            rx.try_recv().expect("Ereignis"),
            ClientEvent::Authentifiziert {
                session: SessionId(7)
            }
        ));
    }

    #[test]
    fn crypt_setup_vollstaendig_initialisiert_gateway() {
        let (mut v, crypt, _rx) = verteiler();
        assert!(!crypt.lock().ist_bereit());

        let ausgang = v
            .verarbeiten(&frame(
                MessageType::CryptSetup,
                &CryptSetup {
                    schluessel: Some(vec![7u8; 32]),
                    client_nonce: Some(vec![1u8; 12]),
                    server_nonce: Some(vec![2u8; 12]),
                },
            ))
            .expect("Setup");
        assert!(ausgang.antwort.is_none());
        assert!(crypt.lock().ist_bereit());
    }

    #[test]
    fn crypt_setup_nur_server_nonce_resynct() {
        let (mut v, crypt, _rx) = verteiler();
        crypt
            .lock()
            .set_key(&[7u8; 32], &[1u8; 12], &[2u8; 12])
            .expect("Schluessel");

        let ausgang = v
            .verarbeiten(&frame(
                MessageType::CryptSetup,
                &CryptSetup {
                    server_nonce: Some(vec![9u8; 12]),
                    ..Default::default()
                },
            ))
            .expect("Resync");
        assert!(ausgang.antwort.is_none());
        // Das Gateway bleibt einsatzbereit
        assert!(crypt.lock().ist_bereit());
    }

    #[test]
    fn crypt_setup_leer_fordert_antwort_mit_verschluessel_iv() {
        let (mut v, crypt, _rx) = verteiler();
        crypt
            .lock()
            .set_key(&[7u8; 32], &[1u8; 12], &[2u8; 12])
            .expect("Schluessel");

        let ausgang = v
            .verarbeiten(&frame(MessageType::CryptSetup, &CryptSetup::default()))
            .expect("Anforderung");
        let antwort = ausgang.antwort.expect("Antwort-Frame");
        assert_eq!(antwort.typ, MessageType::CryptSetup.code());

        let cs: CryptSetup = nachrichten::dekodieren(&antwort.nutzdaten).expect("dekodierbar");
        assert_eq!(cs.client_nonce.as_deref(), Some(&[1u8; 12][..]));
        assert!(cs.schluessel.is_none());
        assert!(cs.server_nonce.is_none());
    }

    #[test]
    fn crypt_setup_mit_kurzem_schluessel_ist_protokollfehler() {
        let (mut v, _crypt, _rx) = verteiler();
        let e = v.verarbeiten(&frame(
            MessageType::CryptSetup,
            &CryptSetup {
                schluessel: Some(vec![7u8; 16]),
                client_nonce: Some(vec![1u8; 12]),
                server_nonce: Some(vec![2u8; 12]),
            },
        ));
        assert!(matches!(e, Err(MurmelError::ProtokollVerletzung(_))));
    }

    #[test]
    fn unbekannter_typ_wird_ignoriert() {
        let (mut v, _crypt, mut rx) = verteiler();
        let ausgang = v
            .verarbeiten(&Frame::neu(999, bytes::Bytes::from_static(b"{}")))
            .expect("ignoriert");
        assert!(ausgang.antwort.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn neuer_benutzer_ohne_kanal_ist_protokollfehler() {
        let (mut v, _crypt, _rx) = verteiler();
        let e = v.verarbeiten(&frame(
            MessageType::UserState,
            &UserState {
                session: SessionId(3),
                name: Some("X".into()),
                ..Default::default()
            },
        ));
        assert!(matches!(e, Err(MurmelError::ProtokollVerletzung(_))));
    }

    #[test]
    fn text_und_tunnel_werden_durchgereicht() {
        let (mut v, _crypt, mut rx) = verteiler();
        v.verarbeiten(&frame(
            MessageType::TextMessage,
            &TextMessage {
                nachricht: "Hallo".into(),
            },
        ))
        .expect("Text");
        v.verarbeiten(&Frame::neu(
            MessageType::UdpTunnel.code(),
            bytes::Bytes::from_static(&[1, 2, 3]),
        ))
        .expect("Tunnel");

        assert!(matches!(
            rx.try_recv().expect("Ereignis"),
            ClientEvent::TextNachricht(t) if t == "Hallo"
        ));
        assert!(matches!(
            rx.try_recv().expect("Ereignis"),
            ClientEvent::RohTunnel(d) if d == vec![1, 2, 3]
        ));
    }
}
