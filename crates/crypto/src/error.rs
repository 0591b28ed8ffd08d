//! Fehlertypen des Krypto-Gateways

use thiserror::Error;

/// Result-Alias fuer das Krypto-Gateway
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;

/// Fehler bei der paketweisen Ver-/Entschluesselung
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Kein Schluesselmaterial vorhanden (CryptSetup ausstehend)")]
    NichtBereit,

    #[error("Ungueltige Schluessel-Laenge: erwartet={erwartet}, erhalten={erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Ungueltige IV-Laenge: erwartet={erwartet}, erhalten={erhalten}")]
    UngueltigeIvLaenge { erwartet: usize, erhalten: usize },

    #[error("Paket zu kurz fuer IV-Byte und Auth-Tag: {0} Bytes")]
    PaketZuKurz(usize),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Entschluesselung fehlgeschlagen (Auth-Tag ungueltig)")]
    Entschluesselung,

    #[error("Nonce-Desynchronisation ausserhalb des Toleranzfensters")]
    Desynchronisiert,
}
