//! Fehlertypen fuer Murmel
//!
//! Zentraler Fehler-Enum der alle Fehlerzustaende des Protokoll-Kerns
//! abdeckt. Untermodule koennen eigene Fehler definieren und via `#[from]`
//! konvertieren. Jeder Fehler wird genau einmal ueber den Ereigniskanal
//! sichtbar – ein automatischer Wiederholungsversuch findet nicht statt.

use thiserror::Error;

/// Globaler Result-Alias fuer Murmel
pub type Result<T> = std::result::Result<T, MurmelError>;

/// Alle moeglichen Fehler im Murmel-Protokoll-Kern
#[derive(Debug, Error)]
pub enum MurmelError {
    // --- Verbindungsaufbau ---
    #[error("Namensaufloesung fehlgeschlagen: {0}")]
    Aufloesung(String),

    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("TLS-Handshake fehlgeschlagen: {0}")]
    TlsHandshake(String),

    // --- Transport ---
    #[error("Lesefehler: {0}")]
    Lesen(String),

    #[error("Schreibfehler: {0}")]
    Schreiben(String),

    // --- Protokoll ---
    #[error("Protokollverletzung: {0}")]
    ProtokollVerletzung(String),

    // --- API-Verwendung ---
    #[error("Vorbedingung verletzt: {0}")]
    Vorbedingung(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MurmelError {
    /// Erstellt eine Protokollverletzung aus einer beliebigen Nachricht
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::ProtokollVerletzung(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler die Verbindung beenden muss
    ///
    /// Protokollverletzungen stammen aus nicht vertrauenswuerdigem
    /// Server-Input und werden nicht mit teilweise angewendetem Zustand
    /// weiterverarbeitet.
    pub fn ist_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtokollVerletzung(_) | Self::Lesen(_) | Self::TlsHandshake(_)
        )
    }
}
