//! Sende-Warteschlange
//!
//! FIFO-Puffer fuer ausgehende Control-Nachrichten. Es ist immer
//! hoechstens eine Nachricht gleichzeitig "im Flug" (wird gerade auf
//! den Socket geschrieben); erst wenn deren Schreibvorgang abgeschlossen
//! ist, wird die naechste Nachricht gestartet.
//!
//! Die Nachricht bleibt waehrend des Schreibens an der Spitze der
//! Warteschlange und wird erst bei erfolgreichem Abschluss entnommen.
//! Schlaegt der Schreibvorgang fehl, wird die Nachricht verworfen und
//! die Verarbeitung gestoppt; es gibt keinen Wiederholungsversuch.

use std::collections::VecDeque;

use murmel_protocol::Frame;

/// FIFO-Warteschlange mit Ein-Nachricht-im-Flug-Disziplin
#[derive(Debug, Default)]
pub struct SendeWarteschlange {
    schlange: VecDeque<Frame>,
    im_flug: bool,
}

impl SendeWarteschlange {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Haengt eine Nachricht ans Ende der Warteschlange an
    pub fn einreihen(&mut self, frame: Frame) {
        self.schlange.push_back(frame);
    }

    /// Startet den naechsten Schreibvorgang, falls keiner laeuft.
    /// Gibt die zu schreibende Nachricht zurueck; sie bleibt bis zum
    /// Abschluss an der Spitze der Warteschlange.
    pub fn naechste_starten(&mut self) -> Option<Frame> {
        if self.im_flug {
            return None;
        }
        let frame = self.schlange.front()?.clone();
        self.im_flug = true;
        Some(frame)
    }

    /// Meldet den Abschluss des laufenden Schreibvorgangs.
    ///
    /// Bei Erfolg wird die abgeschlossene Nachricht entnommen und die
    /// naechste (falls vorhanden) direkt gestartet und zurueckgegeben.
    /// Bei Fehlschlag wird die Nachricht verworfen und die Verarbeitung
    /// gestoppt; ein spaeteres `einreihen` plus `naechste_starten`
    /// nimmt sie wieder auf.
    pub fn schreiben_abgeschlossen(&mut self, erfolg: bool) -> Option<Frame> {
        self.im_flug = false;
        if erfolg {
            self.schlange.pop_front();
            self.naechste_starten()
        } else {
            self.schlange.pop_front();
            None
        }
    }

    /// Verwirft alle wartenden Nachrichten (beim Verbindungsabbau)
    pub fn leeren(&mut self) {
        self.schlange.clear();
        self.im_flug = false;
    }

    pub fn laenge(&self) -> usize {
        self.schlange.len()
    }

    pub fn ist_leer(&self) -> bool {
        self.schlange.is_empty()
    }

    pub fn im_flug(&self) -> bool {
        self.im_flug
    }
}
