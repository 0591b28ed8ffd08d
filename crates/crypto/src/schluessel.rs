//! Paketweise Ver-/Entschluesselung mit rollenden IVs
//!
//! ## Drahtformat eines Datagramms
//! ```text
//! [iv_byte(1)] [ciphertext + auth_tag(16)]
//! ```
//!
//! Beide Seiten fuehren eine 12-Byte-IV als Zaehler (Byte 0 ist das
//! niederwertigste). Der Sender inkrementiert seine Verschluessel-IV vor
//! jedem Paket und uebertraegt nur das niederwertigste Byte. Der
//! Empfaenger rekonstruiert daraus die vollstaendige IV:
//! - naechstes Byte in Folge: Normalfall
//! - Sprung nach vorn (< 128 Schritte): verlorene Pakete, IV nachziehen
//! - Sprung nach hinten (< 32 Schritte): verspaetetes Paket, temporaere
//!   IV ohne Zustandsaenderung
//! - alles andere: Desynchronisation – Reparatur erfolgt ueber eine
//!   CryptSetup-Resynchronisation durch die Gegenseite

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::{CryptoError, CryptoResult};

/// Schluessel-Laenge in Bytes (AES-256)
pub const SCHLUESSEL_LAENGE: usize = 32;

/// IV-Laenge in Bytes (GCM-Nonce)
pub const IV_LAENGE: usize = 12;

/// Auth-Tag-Laenge in Bytes
pub const TAG_LAENGE: usize = 16;

/// Toleranzfenster fuer verspaetete Pakete (Schritte rueckwaerts)
const SPAET_FENSTER: u8 = 32;

// ---------------------------------------------------------------------------
// Statistik
// ---------------------------------------------------------------------------

/// Zaehler ueber die Entschluessel-Historie einer Verbindung
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KryptoStatistik {
    /// In Reihenfolge entschluesselte Pakete
    pub gute: u32,
    /// Ausserhalb der Reihenfolge angekommene, dennoch entschluesselte Pakete
    pub verspaetete: u32,
    /// Aus IV-Spruengen abgeleitete verlorene Pakete
    pub verlorene: u32,
    /// Pakete mit ungueltigem Auth-Tag
    pub fehlgeschlagene: u32,
}

// ---------------------------------------------------------------------------
// CryptState
// ---------------------------------------------------------------------------

/// Zustand des Krypto-Gateways
///
/// Wird durch `set_key` aus einer vollstaendigen CryptSetup-Nachricht
/// initialisiert; `set_decrypt_iv` resynchronisiert nur die
/// Entschluessel-Seite, der eigene Verschluessel-Strom laeuft weiter.
pub struct CryptState {
    cipher: Option<Aes256Gcm>,
    encrypt_iv: [u8; IV_LAENGE],
    decrypt_iv: [u8; IV_LAENGE],
    statistik: KryptoStatistik,
}

impl CryptState {
    /// Erstellt ein Gateway ohne Schluesselmaterial (nicht bereit)
    pub fn neu() -> Self {
        Self {
            cipher: None,
            encrypt_iv: [0u8; IV_LAENGE],
            decrypt_iv: [0u8; IV_LAENGE],
            statistik: KryptoStatistik::default(),
        }
    }

    /// Gibt true zurueck sobald Schluesselmaterial etabliert ist
    pub fn ist_bereit(&self) -> bool {
        self.cipher.is_some()
    }

    /// Initialisiert Schluessel und beide IVs aus einer vollstaendigen
    /// CryptSetup-Nachricht
    pub fn set_key(
        &mut self,
        schluessel: &[u8],
        encrypt_iv: &[u8],
        decrypt_iv: &[u8],
    ) -> CryptoResult<()> {
        if schluessel.len() != SCHLUESSEL_LAENGE {
            return Err(CryptoError::UngueltigeSchluesselLaenge {
                erwartet: SCHLUESSEL_LAENGE,
                erhalten: schluessel.len(),
            });
        }
        self.encrypt_iv = iv_aus_slice(encrypt_iv)?;
        self.decrypt_iv = iv_aus_slice(decrypt_iv)?;
        self.cipher = Some(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(schluessel)));
        self.statistik = KryptoStatistik::default();
        tracing::debug!("Schluesselmaterial gesetzt, Statistik zurueckgesetzt");
        Ok(())
    }

    /// Resynchronisiert nur die Entschluessel-IV (Server-Nonce)
    pub fn set_decrypt_iv(&mut self, iv: &[u8]) -> CryptoResult<()> {
        self.decrypt_iv = iv_aus_slice(iv)?;
        Ok(())
    }

    /// Aktuelle Verschluessel-IV (fuer die CryptSetup-Resync-Antwort)
    pub fn encrypt_iv(&self) -> [u8; IV_LAENGE] {
        self.encrypt_iv
    }

    /// Entschluessel-Statistik der Verbindung
    pub fn statistik(&self) -> KryptoStatistik {
        self.statistik
    }

    /// Verschluesselt ein Audio-Datagramm
    ///
    /// Inkrementiert die Verschluessel-IV und haengt das niederwertigste
    /// IV-Byte als ersten Byte an das Chiffrat samt Auth-Tag an.
    pub fn verschluesseln(&mut self, klartext: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::NichtBereit)?;

        iv_inkrementieren(&mut self.encrypt_iv);
        let chiffrat = cipher
            .encrypt(Nonce::from_slice(&self.encrypt_iv), klartext)
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

        let mut paket = Vec::with_capacity(1 + chiffrat.len());
        paket.push(self.encrypt_iv[0]);
        paket.extend_from_slice(&chiffrat);
        Ok(paket)
    }

    /// Entschluesselt ein Audio-Datagramm
    ///
    /// Rekonstruiert die vollstaendige IV aus dem uebertragenen Byte,
    /// toleriert verlorene und verspaetete Pakete innerhalb des Fensters
    /// und meldet alles andere als Desynchronisation.
    pub fn entschluesseln(&mut self, daten: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = self.cipher.as_ref().ok_or(CryptoError::NichtBereit)?;
        if daten.len() < 1 + TAG_LAENGE {
            return Err(CryptoError::PaketZuKurz(daten.len()));
        }

        let iv_byte = daten[0];
        let erwartet = self.decrypt_iv[0].wrapping_add(1);
        let vor = iv_byte.wrapping_sub(self.decrypt_iv[0]);

        let mut kandidat = self.decrypt_iv;
        let verspaetet;
        let uebersprungen: u32;

        if iv_byte == erwartet {
            // Normalfall: direkt das naechste Paket
            iv_inkrementieren(&mut kandidat);
            verspaetet = false;
            uebersprungen = 0;
        } else if vor > 1 && vor < 128 {
            // Sprung nach vorn: (vor - 1) Pakete verloren
            for _ in 0..vor {
                iv_inkrementieren(&mut kandidat);
            }
            verspaetet = false;
            uebersprungen = (vor - 1) as u32;
        } else {
            // Sprung nach hinten: verspaetetes oder dupliziertes Paket
            let rueck = self.decrypt_iv[0].wrapping_sub(iv_byte);
            if rueck >= SPAET_FENSTER {
                tracing::warn!(
                    vor,
                    rueck,
                    "IV-Sprung ausserhalb des Fensters, Gateway desynchronisiert"
                );
                return Err(CryptoError::Desynchronisiert);
            }
            for _ in 0..rueck {
                iv_dekrementieren(&mut kandidat);
            }
            verspaetet = true;
            uebersprungen = 0;
        }

        let klartext = cipher
            .decrypt(Nonce::from_slice(&kandidat), &daten[1..])
            .map_err(|_| {
                self.statistik.fehlgeschlagene += 1;
                CryptoError::Entschluesselung
            })?;

        if verspaetet {
            // Zustand unveraendert lassen – die Folge laeuft weiter
            self.statistik.verspaetete += 1;
        } else {
            self.decrypt_iv = kandidat;
            self.statistik.gute += 1;
            self.statistik.verlorene += uebersprungen;
        }

        Ok(klartext)
    }
}

impl Default for CryptState {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Debug for CryptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Kein Schluesselmaterial ausgeben
        f.debug_struct("CryptState")
            .field("bereit", &self.ist_bereit())
            .field("statistik", &self.statistik)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// IV-Arithmetik (Byte 0 niederwertigst)
// ---------------------------------------------------------------------------

fn iv_aus_slice(iv: &[u8]) -> CryptoResult<[u8; IV_LAENGE]> {
    iv.try_into().map_err(|_| CryptoError::UngueltigeIvLaenge {
        erwartet: IV_LAENGE,
        erhalten: iv.len(),
    })
}

fn iv_inkrementieren(iv: &mut [u8; IV_LAENGE]) {
    for byte in iv.iter_mut() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

fn iv_dekrementieren(iv: &mut [u8; IV_LAENGE]) {
    for byte in iv.iter_mut() {
        *byte = byte.wrapping_sub(1);
        if *byte != 0xFF {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    /// Zwei gespiegelte Gateways wie nach einem vollstaendigen CryptSetup
    fn paar() -> (CryptState, CryptState) {
        let mut schluessel = [0u8; SCHLUESSEL_LAENGE];
        rand::thread_rng().fill_bytes(&mut schluessel);
        let client_nonce = [7u8; IV_LAENGE];
        let server_nonce = [9u8; IV_LAENGE];

        let mut sender = CryptState::neu();
        sender
            .set_key(&schluessel, &client_nonce, &server_nonce)
            .unwrap();
        let mut empfaenger = CryptState::neu();
        empfaenger
            .set_key(&schluessel, &server_nonce, &client_nonce)
            .unwrap();
        (sender, empfaenger)
    }

    #[test]
    fn nicht_bereit_ohne_schluessel() {
        let mut cs = CryptState::neu();
        assert!(!cs.ist_bereit());
        assert!(matches!(
            cs.verschluesseln(b"audio"),
            Err(CryptoError::NichtBereit)
        ));
        assert!(matches!(
            cs.entschluesseln(&[0u8; 32]),
            Err(CryptoError::NichtBereit)
        ));
    }

    #[test]
    fn set_key_validiert_laengen() {
        let mut cs = CryptState::neu();
        assert!(matches!(
            cs.set_key(&[0u8; 16], &[0u8; 12], &[0u8; 12]),
            Err(CryptoError::UngueltigeSchluesselLaenge { .. })
        ));
        assert!(matches!(
            cs.set_key(&[0u8; 32], &[0u8; 8], &[0u8; 12]),
            Err(CryptoError::UngueltigeIvLaenge { .. })
        ));
        assert!(cs.set_key(&[0u8; 32], &[0u8; 12], &[0u8; 12]).is_ok());
        assert!(cs.ist_bereit());
    }

    #[test]
    fn round_trip_in_reihenfolge() {
        let (mut sender, mut empfaenger) = paar();
        for i in 0..300u32 {
            let klartext = format!("paket-{}", i).into_bytes();
            let paket = sender.verschluesseln(&klartext).unwrap();
            let zurueck = empfaenger.entschluesseln(&paket).unwrap();
            assert_eq!(zurueck, klartext);
        }
        assert_eq!(empfaenger.statistik().gute, 300);
        assert_eq!(empfaenger.statistik().verlorene, 0);
    }

    #[test]
    fn verlorene_pakete_ziehen_iv_nach() {
        let (mut sender, mut empfaenger) = paar();

        let p1 = sender.verschluesseln(b"eins").unwrap();
        let _verloren = sender.verschluesseln(b"zwei").unwrap();
        let p3 = sender.verschluesseln(b"drei").unwrap();

        assert_eq!(empfaenger.entschluesseln(&p1).unwrap(), b"eins");
        assert_eq!(empfaenger.entschluesseln(&p3).unwrap(), b"drei");
        assert_eq!(empfaenger.statistik().verlorene, 1);

        // Die Folge laeuft nach dem Sprung normal weiter
        let p4 = sender.verschluesseln(b"vier").unwrap();
        assert_eq!(empfaenger.entschluesseln(&p4).unwrap(), b"vier");
    }

    #[test]
    fn verspaetetes_paket_ohne_zustandsaenderung() {
        let (mut sender, mut empfaenger) = paar();

        let p1 = sender.verschluesseln(b"eins").unwrap();
        let p2 = sender.verschluesseln(b"zwei").unwrap();
        let p3 = sender.verschluesseln(b"drei").unwrap();

        assert_eq!(empfaenger.entschluesseln(&p1).unwrap(), b"eins");
        assert_eq!(empfaenger.entschluesseln(&p3).unwrap(), b"drei");
        // p2 kommt zu spaet, muss aber noch entschluesselbar sein
        assert_eq!(empfaenger.entschluesseln(&p2).unwrap(), b"zwei");
        assert_eq!(empfaenger.statistik().verspaetete, 1);

        let p4 = sender.verschluesseln(b"vier").unwrap();
        assert_eq!(empfaenger.entschluesseln(&p4).unwrap(), b"vier");
    }

    #[test]
    fn desynchronisation_ausserhalb_des_fensters() {
        let (mut sender, mut empfaenger) = paar();

        // 200 Pakete ohne Empfaenger senden: Sprung > 128 Schritte
        let mut letztes = Vec::new();
        for _ in 0..200 {
            letztes = sender.verschluesseln(b"weg").unwrap();
        }
        assert!(matches!(
            empfaenger.entschluesseln(&letztes),
            Err(CryptoError::Desynchronisiert)
        ));
    }

    #[test]
    fn resync_ueber_set_decrypt_iv() {
        let (mut sender, mut empfaenger) = paar();

        for _ in 0..200 {
            sender.verschluesseln(b"weg").unwrap();
        }
        let paket = sender.verschluesseln(b"wieder da").unwrap();
        assert!(empfaenger.entschluesseln(&paket).is_err());

        // Reparatur wie bei CryptSetup mit Server-Nonce: IV der Gegenseite,
        // um ein Paket zurueckgedreht, damit das naechste in Folge passt
        let mut iv = sender.encrypt_iv();
        super::iv_dekrementieren(&mut iv);
        empfaenger.set_decrypt_iv(&iv).unwrap();

        let paket = sender.verschluesseln(b"wieder da").unwrap();
        assert_eq!(empfaenger.entschluesseln(&paket).unwrap(), b"wieder da");
    }

    #[test]
    fn manipuliertes_paket_wird_abgelehnt() {
        let (mut sender, mut empfaenger) = paar();
        let mut paket = sender.verschluesseln(b"audio").unwrap();
        let letzte = paket.len() - 1;
        paket[letzte] ^= 0x01;
        assert!(matches!(
            empfaenger.entschluesseln(&paket),
            Err(CryptoError::Entschluesselung)
        ));
        assert_eq!(empfaenger.statistik().fehlgeschlagene, 1);
    }

    #[test]
    fn zu_kurzes_paket() {
        let (_, mut empfaenger) = paar();
        assert!(matches!(
            empfaenger.entschluesseln(&[1, 2, 3]),
            Err(CryptoError::PaketZuKurz(3))
        ));
    }

    #[test]
    fn encrypt_iv_getter_folgt_dem_zaehler() {
        let (mut sender, _) = paar();
        let vorher = sender.encrypt_iv();
        sender.verschluesseln(b"x").unwrap();
        let nachher = sender.encrypt_iv();
        assert_ne!(vorher, nachher);
        assert_eq!(nachher[0], vorher[0].wrapping_add(1));
    }

    #[test]
    fn iv_uebertrag_ueber_byte_grenze() {
        let mut iv = [0xFFu8; IV_LAENGE];
        iv_inkrementieren(&mut iv);
        assert_eq!(iv, [0u8; IV_LAENGE]);

        let mut iv = [0u8; IV_LAENGE];
        iv[0] = 0xFF;
        iv_inkrementieren(&mut iv);
        assert_eq!(iv[0], 0);
        assert_eq!(iv[1], 1);

        iv_dekrementieren(&mut iv);
        assert_eq!(iv[0], 0xFF);
        assert_eq!(iv[1], 0);
    }
}
