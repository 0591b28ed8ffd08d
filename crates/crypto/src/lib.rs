//! murmel-crypto – Krypto-Gateway fuer den UDP-Audio-Kanal
//!
//! Haelt das vom Server via CryptSetup gelieferte Schluesselmaterial und
//! fuehrt die paketweise Ver- und Entschluesselung der Audio-Datagramme
//! durch. Erkennt und repariert Nonce-Desynchronisation.

pub mod error;
pub mod schluessel;

pub use error::{CryptoError, CryptoResult};
pub use schluessel::{CryptState, KryptoStatistik, IV_LAENGE, SCHLUESSEL_LAENGE, TAG_LAENGE};
