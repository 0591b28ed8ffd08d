//! Gemeinsame Identifikations- und Verzeichnistypen fuer Murmel
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Session- und
//! Kanal-IDs werden vom Server vergeben und sind nur fuer die Dauer einer
//! Verbindung gueltig.

use serde::{Deserialize, Serialize};

/// Server-vergebene Session-ID eines verbundenen Benutzers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl Default for SessionId {
    /// Session 0 ist nie vom Server vergeben (Platzhalter vor ServerSync)
    fn default() -> Self {
        SessionId(0)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Server-vergebene Kanal-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kanal:{}", self.0)
    }
}

/// Ein Benutzer im Sitzungsverzeichnis
///
/// Der Kanal wird als ID und nicht als Referenz gehalten – alle Lookups
/// laufen ueber das Verzeichnis, das die Kanal-Lebensdauer besitzt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Session-ID (eindeutig pro Verbindung)
    pub session: SessionId,
    /// Anzeigename
    pub name: String,
    /// Kanal in dem sich der Benutzer befindet
    pub kanal: ChannelId,
    /// Optionaler Benutzer-Kommentar
    pub kommentar: Option<String>,
    /// Optionaler Zertifikats-Hash
    pub hash: Option<String>,
}

/// Ein Kanal im Sitzungsverzeichnis
///
/// Eltern-Referenzen bilden einen Baum; der Wurzelkanal hat keine Eltern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Kanal-ID (eindeutig pro Verbindung)
    pub id: ChannelId,
    /// Anzeigename
    pub name: String,
    /// Eltern-Kanal (None beim Wurzelkanal)
    pub eltern: Option<ChannelId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_display() {
        assert_eq!(SessionId(7).to_string(), "session:7");
    }

    #[test]
    fn channel_id_display() {
        assert_eq!(ChannelId(1).to_string(), "kanal:1");
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let id = SessionId(42);
        let json = serde_json::to_string(&id).unwrap();
        let id2: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn benutzer_serde_round_trip() {
        let u = User {
            session: SessionId(5),
            name: "Alice".into(),
            kanal: ChannelId(1),
            kommentar: None,
            hash: None,
        };
        let json = serde_json::to_string(&u).unwrap();
        let u2: User = serde_json::from_str(&json).unwrap();
        assert_eq!(u, u2);
    }
}
