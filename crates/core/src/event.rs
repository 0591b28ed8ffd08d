//! Client-Ereignisse
//!
//! Anstelle einzelner Callback-Funktionen liefert der Client alle
//! anwendungsrelevanten Ereignisse als typisierte Werte ueber einen
//! mpsc-Kanal aus. Events tragen eigene Kopien der Verzeichnis-Eintraege,
//! weil das Verzeichnis beim naechsten empfangenen Frame bereits mutiert
//! oder Eintraege entfernt haben kann.

use crate::types::{Channel, SessionId, User};

/// Alle Ereignisse die der Client an die Anwendung meldet
#[derive(Debug, Clone)]
pub enum ClientEvent {
    // --- Verbindungs-Ereignisse ---
    /// Ergebnis eines Verbindungsaufbaus (genau einmal pro `verbinden`)
    VerbindungsErgebnis {
        erfolgreich: bool,
        /// Transportfehler-Beschreibung bei Misserfolg
        fehler: Option<String>,
    },
    /// Authentifizierung abgeschlossen, Session-ID vom Server zugewiesen
    Authentifiziert { session: SessionId },
    /// Verbindung wurde getrennt
    Getrennt,

    // --- Verzeichnis-Ereignisse ---
    /// Ein Benutzer ist dem Server beigetreten
    BenutzerBeigetreten(User),
    /// Ein Benutzer hat den Server verlassen
    BenutzerGegangen(User),
    /// Ein Benutzer hat den Kanal gewechselt
    BenutzerGewechselt {
        benutzer: User,
        alter_kanal: Channel,
    },
    /// Ein neuer Kanal wurde angelegt
    KanalHinzugefuegt(Channel),
    /// Ein Kanal wurde entfernt
    KanalEntfernt(Channel),

    // --- Nachrichten-Ereignisse ---
    /// Textnachricht vom Server (unveraendert weitergereicht)
    TextNachricht(String),
    /// Rohe UDP-Tunnel-Nutzdaten (Audio ueber TCP als NAT-Fallback)
    RohTunnel(Vec<u8>),
    /// Entschluesseltes Audio-Datagramm vom UDP-Socket
    UdpAudio(Vec<u8>),

    // --- Fehler ---
    /// Genereller Fehler nach abgeschlossenem Verbindungsaufbau
    Fehler(String),
}
