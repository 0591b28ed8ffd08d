//! Client-Einstellungen
//!
//! Werden dem Client bei `verbinden()` uebergeben und koennen aus einer
//! TOML-Datei geladen werden. Alle Felder haben sinnvolle Standardwerte,
//! sodass nur Host und Zugangsdaten gesetzt werden muessen.

use murmel_core::{MurmelError, Result};
use serde::{Deserialize, Serialize};

/// Vollstaendige Client-Einstellungen fuer eine Verbindung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Einstellungen {
    /// Server-Verbindungsdaten
    pub server: ServerEinstellungen,
    /// Zugangsdaten des Benutzers
    pub benutzer: BenutzerEinstellungen,
    /// TLS-Einstellungen
    pub tls: TlsEinstellungen,
    /// Verhaltens-Einstellungen
    pub verhalten: VerhaltenEinstellungen,
}

/// Server-Verbindungsdaten
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Hostname oder IP-Adresse des Servers
    pub host: String,
    /// Port der TCP/TLS-Verbindung (Control-Protokoll und UDP-Audio)
    pub port: u16,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 64738,
        }
    }
}

/// Zugangsdaten des Benutzers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenutzerEinstellungen {
    /// Anzeigename fuer die Anmeldung
    pub name: String,
    /// Server-Passwort (leer = kein Passwort)
    pub passwort: String,
}

impl Default for BenutzerEinstellungen {
    fn default() -> Self {
        Self {
            name: "murmel".into(),
            passwort: String::new(),
        }
    }
}

/// TLS-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsEinstellungen {
    /// Aktiviert TLS fuer die Control-Verbindung
    pub aktiv: bool,
    /// Prueft das Server-Zertifikat gegen die Webpki-Wurzeln.
    /// Viele Server laufen mit selbstsignierten Zertifikaten, daher
    /// ist die Pruefung standardmaessig abgeschaltet.
    pub zertifikat_pruefen: bool,
}

impl Default for TlsEinstellungen {
    fn default() -> Self {
        Self {
            aktiv: true,
            zertifikat_pruefen: false,
        }
    }
}

/// Verhaltens-Einstellungen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerhaltenEinstellungen {
    /// Wendet Kanal-Updates fuer bereits bekannte Kanaele an
    /// (Umbenennung, Verschiebung). Standardmaessig werden solche
    /// Updates nur protokolliert und ignoriert.
    pub kanal_updates_anwenden: bool,
}

impl Einstellungen {
    /// Laedt die Einstellungen aus einer TOML-Datei.
    /// Gibt die Standardeinstellungen zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let einstellungen: Self = toml::from_str(&inhalt).map_err(|e| {
                    MurmelError::Konfiguration(format!("Fehler in '{pfad}': {e}"))
                })?;
                Ok(einstellungen)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Einstellungsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(MurmelError::Konfiguration(format!(
                "Einstellungsdatei '{pfad}' nicht lesbar: {e}"
            ))),
        }
    }

    /// Gibt die Zieladresse als `host:port` zurueck
    pub fn zieladresse(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte_sind_valide() {
        let e = Einstellungen::default();
        assert_eq!(e.server.port, 64738);
        assert_eq!(e.benutzer.name, "murmel");
        assert!(e.tls.aktiv);
        assert!(!e.tls.zertifikat_pruefen);
        assert!(!e.verhalten.kanal_updates_anwenden);
    }

    #[test]
    fn zieladresse_format() {
        let e = Einstellungen::default();
        assert_eq!(e.zieladresse(), "localhost:64738");
    }

    #[test]
    fn einstellungen_aus_toml_string() {
        let toml = r#"
            [server]
            host = "voip.example.org"

            [benutzer]
            name = "alice"

            [tls]
            zertifikat_pruefen = true
        "#;
        let e: Einstellungen = toml::from_str(toml).unwrap();
        assert_eq!(e.server.host, "voip.example.org");
        assert_eq!(e.benutzer.name, "alice");
        assert!(e.tls.zertifikat_pruefen);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(e.server.port, 64738);
        assert!(e.tls.aktiv);
    }
}
