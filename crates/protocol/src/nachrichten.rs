//! Nachrichten-Schema des Control-Kanals
//!
//! Definiert die Typ-Codes und die serialisierten Nachrichtentypen die
//! als Nutzdaten in den Frames des Control-Kanals transportiert werden.
//!
//! ## Design
//! - Die numerischen Typ-Codes sind durch das Server-Protokoll vorgegeben
//!   und werden hier nicht neu interpretiert
//! - JSON-Serialisierung via serde (TCP, nicht zeitkritisch)
//! - Optionale Felder tragen die Partial-Update-Semantik: ein fehlendes
//!   Feld laesst den bestehenden Wert unangetastet
//! - Binaere Felder (CryptSetup-Schluesselmaterial) als Base64-Strings

use serde::{Deserialize, Serialize};

use murmel_core::error::{MurmelError, Result};
use murmel_core::types::{ChannelId, SessionId};

use crate::wire::Frame;

// ---------------------------------------------------------------------------
// Typ-Codes
// ---------------------------------------------------------------------------

/// Nachrichtentyp-Codes des Control-Kanals
///
/// Die Werte sind durch das Server-Protokoll festgelegt. Der Client
/// behandelt nur eine Teilmenge; unbekannte Codes werden geloggt und
/// ignoriert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    Version = 0,
    UdpTunnel = 1,
    Authenticate = 2,
    Ping = 3,
    ServerSync = 5,
    ChannelRemove = 6,
    ChannelState = 7,
    UserRemove = 8,
    UserState = 9,
    TextMessage = 11,
    CryptSetup = 15,
    CodecVersion = 21,
}

impl MessageType {
    /// Numerischer Typ-Code fuer den Frame-Header
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Konvertiert einen Typ-Code in einen `MessageType`
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Version),
            1 => Some(Self::UdpTunnel),
            2 => Some(Self::Authenticate),
            3 => Some(Self::Ping),
            5 => Some(Self::ServerSync),
            6 => Some(Self::ChannelRemove),
            7 => Some(Self::ChannelState),
            8 => Some(Self::UserRemove),
            9 => Some(Self::UserState),
            11 => Some(Self::TextMessage),
            15 => Some(Self::CryptSetup),
            21 => Some(Self::CodecVersion),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ---------------------------------------------------------------------------
// Versions-Nachricht
// ---------------------------------------------------------------------------

/// Packt eine dreiteilige Versionsnummer in das Drahtformat
/// `(major << 16) | (minor << 8) | patch`
pub fn version_packen(major: u16, minor: u16, patch: u16) -> u32 {
    ((major as u32) << 16) | ((minor as u32) << 8) | (patch as u32 & 0xFF)
}

/// Versions-Ankuendigung (erstes gesendetes Frame nach dem Handshake)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    /// Gepackte Protokollversion (siehe `version_packen`)
    pub version: u32,
    /// Freitext-Kennung des Clients
    pub release: String,
}

// ---------------------------------------------------------------------------
// Authentifizierung & Keepalive
// ---------------------------------------------------------------------------

/// Authentifizierung mit den Zugangsdaten aus den Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authenticate {
    pub benutzername: String,
    pub passwort: String,
    /// Vom Client unterstuetzte Codec-Versionen
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub celt_versionen: Vec<i32>,
}

/// Leichtgewichtige Keepalive-Nachricht (alle 5 Sekunden)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    /// Unix-Zeitstempel in Sekunden
    pub zeitstempel: u64,
}

/// Abschluss der Authentifizierung: Server weist die Session-ID zu
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSync {
    pub session: SessionId,
    /// Optionale Willkommensnachricht
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub willkommen: Option<String>,
}

// ---------------------------------------------------------------------------
// Verzeichnis-Nachrichten
// ---------------------------------------------------------------------------

/// Kanal anlegen oder aktualisieren
///
/// Fehlende Felder bleiben beim bestehenden Kanal unangetastet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub kanal_id: ChannelId,
    /// Eltern-Kanal; 0 bedeutet "kein Eltern-Kanal" (Wurzel)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eltern: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Kanal entfernen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRemove {
    pub kanal_id: ChannelId,
}

/// Benutzer anlegen oder partiell aktualisieren
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserState {
    pub session: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kanal_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kommentar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Benutzer entfernen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRemove {
    pub session: SessionId,
}

/// Textnachricht (wird unveraendert an die Anwendung weitergereicht)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextMessage {
    pub nachricht: String,
}

// ---------------------------------------------------------------------------
// Krypto-Setup
// ---------------------------------------------------------------------------

/// Schluesselmaterial fuer das UDP-Audio-Gateway
///
/// Drei Auspraegungen:
/// - Schluessel + beide Nonces: vollstaendige Initialisierung
/// - nur Server-Nonce: Resynchronisation der Entschluessel-IV
/// - leer: Resync-Anforderung des Servers, der Client antwortet mit
///   seiner aktuellen Verschluessel-IV als `client_nonce`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptSetup {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt"
    )]
    pub schluessel: Option<Vec<u8>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt"
    )]
    pub client_nonce: Option<Vec<u8>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt"
    )]
    pub server_nonce: Option<Vec<u8>>,
}

/// Codec-Versionsabgleich (in diesem Client rein informativ)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecVersion {
    pub alpha: i32,
    pub beta: i32,
    pub bevorzugt_alpha: bool,
}

// ---------------------------------------------------------------------------
// Kodierung
// ---------------------------------------------------------------------------

/// Serialisiert eine Nachricht in ein sendefertiges Frame
pub fn kodieren<T: Serialize>(typ: MessageType, nachricht: &T) -> Result<Frame> {
    let nutzdaten = serde_json::to_vec(nachricht)
        .map_err(|e| MurmelError::protokoll(format!("Serialisierung fehlgeschlagen: {}", e)))?;
    Ok(Frame::neu(typ.code(), nutzdaten))
}

/// Deserialisiert Frame-Nutzdaten in einen Nachrichtentyp
pub fn dekodieren<'a, T: Deserialize<'a>>(nutzdaten: &'a [u8]) -> Result<T> {
    serde_json::from_slice(nutzdaten)
        .map_err(|e| MurmelError::protokoll(format!("Deserialisierung fehlgeschlagen: {}", e)))
}

/// Serde-Adapter: `Option<Vec<u8>>` als Base64-String
mod base64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        wert: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match wert {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let wert: Option<String> = Option::deserialize(deserializer)?;
        match wert {
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typ_codes_round_trip() {
        for typ in [
            MessageType::Version,
            MessageType::UdpTunnel,
            MessageType::Authenticate,
            MessageType::Ping,
            MessageType::ServerSync,
            MessageType::ChannelRemove,
            MessageType::ChannelState,
            MessageType::UserRemove,
            MessageType::UserState,
            MessageType::TextMessage,
            MessageType::CryptSetup,
            MessageType::CodecVersion,
        ] {
            assert_eq!(MessageType::from_code(typ.code()), Some(typ));
        }
        assert_eq!(MessageType::from_code(999), None);
    }

    #[test]
    fn version_packen_drahtformat() {
        assert_eq!(version_packen(1, 2, 2), 0x0001_0202);
        assert_eq!(version_packen(1, 0, 0), 0x0001_0000);
    }

    #[test]
    fn user_state_partielle_felder() {
        // Nur Kommentar gesetzt: andere Felder fehlen im JSON
        let us = UserState {
            session: SessionId(5),
            kommentar: Some("hi".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&us).unwrap();
        assert!(!json.contains("kanal_id"));
        assert!(!json.contains("name"));

        let us2: UserState = serde_json::from_str(&json).unwrap();
        assert_eq!(us2.session, SessionId(5));
        assert_eq!(us2.kommentar.as_deref(), Some("hi"));
        assert!(us2.kanal_id.is_none());
    }

    #[test]
    fn crypt_setup_base64_round_trip() {
        let cs = CryptSetup {
            schluessel: Some(vec![1u8; 32]),
            client_nonce: Some(vec![2u8; 12]),
            server_nonce: Some(vec![3u8; 12]),
        };
        let json = serde_json::to_string(&cs).unwrap();
        let cs2: CryptSetup = serde_json::from_str(&json).unwrap();
        assert_eq!(cs2.schluessel.as_deref(), Some(&[1u8; 32][..]));
        assert_eq!(cs2.client_nonce.as_deref(), Some(&[2u8; 12][..]));
        assert_eq!(cs2.server_nonce.as_deref(), Some(&[3u8; 12][..]));
    }

    #[test]
    fn crypt_setup_leer() {
        let cs: CryptSetup = serde_json::from_str("{}").unwrap();
        assert!(cs.schluessel.is_none());
        assert!(cs.client_nonce.is_none());
        assert!(cs.server_nonce.is_none());
    }

    #[test]
    fn kodieren_dekodieren_frame() {
        let ping = Ping { zeitstempel: 1234 };
        let frame = kodieren(MessageType::Ping, &ping).unwrap();
        assert_eq!(frame.typ, MessageType::Ping.code());

        let zurueck: Ping = dekodieren(&frame.nutzdaten).unwrap();
        assert_eq!(zurueck.zeitstempel, 1234);
    }
}
