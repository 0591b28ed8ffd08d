//! Wire-Format fuer den TCP-Control-Kanal
//!
//! Frame-basiertes Protokoll: 6-Byte-Header + serialisierte Nutzdaten.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+----...----+
//! | Typ (u16 BE)    | Laenge (u32 BE)                   | Nutzdaten |
//! +--------+--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Nutzdaten-Bytes an (ohne die 6
//! Header-Bytes). Byte-Reihenfolge ist big-endian, unabhaengig von der
//! Host-Architektur. Ein Laengen-Feld oberhalb des harten Limits ist eine
//! Protokollverletzung – dem Feld kann nicht mehr vertraut werden, die
//! Verbindung wird beendet statt eine Wiederaufnahme zu versuchen.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Groesse des Frame-Headers in Bytes (Typ u16 + Laenge u32)
pub const HEADER_LAENGE: usize = 6;

/// Hartes Limit fuer das Laengen-Feld (exklusiv)
pub const MAX_NUTZDATEN_LAENGE: usize = 0x7FFFF;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ein vollstaendiges Frame des Control-Kanals
///
/// Die Nutzdaten sind genau so lang wie das Laengen-Feld des Headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Nachrichtentyp-Code (siehe `nachrichten::MessageType`)
    pub typ: u16,
    /// Serialisierte Nutzdaten
    pub nutzdaten: Bytes,
}

impl Frame {
    /// Erstellt ein Frame aus Typ-Code und Nutzdaten
    pub fn neu(typ: u16, nutzdaten: impl Into<Bytes>) -> Self {
        Self {
            typ,
            nutzdaten: nutzdaten.into(),
        }
    }

    /// Gesamtgroesse auf dem Draht (Header + Nutzdaten)
    pub fn draht_groesse(&self) -> usize {
        HEADER_LAENGE + self.nutzdaten.len()
    }
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer den frame-basierten TCP-Control-Kanal
///
/// Implementiert `Decoder` und `Encoder<Frame>` fuer die Integration mit
/// `tokio_util::codec::Framed`. Der Decoder ist der Reassembler: ein
/// einzelner Read kann mehrere vollstaendige Frames enthalten, ein Frame
/// kann sich ueber beliebig viele Reads verteilen. Bereits geparste
/// Header-Bytes bleiben im Puffer bis die Nutzdaten vollstaendig sind –
/// kein Header wird doppelt konsumiert, kein Frame doppelt ausgeliefert.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Hartes Limit fuer das Laengen-Feld (exklusiv)
    max_nutzdaten: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit dem Protokoll-Limit
    pub fn new() -> Self {
        Self {
            max_nutzdaten: MAX_NUTZDATEN_LAENGE,
        }
    }

    /// Erstellt einen `FrameCodec` mit eigenem Limit (Tests)
    pub fn mit_limit(max_nutzdaten: usize) -> Self {
        Self { max_nutzdaten }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf den vollstaendigen Header
        if src.len() < HEADER_LAENGE {
            return Ok(None);
        }

        // Header lesen ohne den Puffer zu veraendern
        let typ = u16::from_be_bytes([src[0], src[1]]);
        let laenge = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;

        // Laengen-Pruefung: Verletzung ist fatal, nicht wiederherstellbar
        if laenge >= self.max_nutzdaten {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame-Laenge {} ueberschreitet das Limit {}",
                    laenge, self.max_nutzdaten
                ),
            ));
        }

        // Pruefen ob die Nutzdaten vollstaendig im Puffer sind
        let gesamt = HEADER_LAENGE + laenge;
        if src.len() < gesamt {
            // Speicher vorbelegen um Reallocations zu vermeiden
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        // Header + Nutzdaten konsumieren
        src.advance(HEADER_LAENGE);
        let nutzdaten = src.split_to(laenge).freeze();

        Ok(Some(Frame { typ, nutzdaten }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.nutzdaten.len() >= self.max_nutzdaten {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Limit: {})",
                    frame.nutzdaten.len(),
                    self.max_nutzdaten
                ),
            ));
        }

        dst.reserve(HEADER_LAENGE + frame.nutzdaten.len());
        dst.put_u16(frame.typ);
        dst.put_u32(frame.nutzdaten.len() as u32);
        dst.put_slice(&frame.nutzdaten);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
