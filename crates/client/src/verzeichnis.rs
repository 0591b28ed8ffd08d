//! Sitzungs-Verzeichnis
//!
//! Haelt das lokale Abbild des Server-Zustands: alle bekannten Benutzer
//! und Kanaele, adressiert ueber ihre IDs. Das Verzeichnis ist die
//! alleinige Quelle fuer Nachschlage-Operationen; Benutzer verweisen
//! nur ueber `ChannelId` auf ihren Kanal, nie ueber Referenzen.
//!
//! Jede Mutation prueft ihre Vorbedingungen: ein Update fuer eine
//! unbekannte ID oder ein Verweis auf einen unbekannten Kanal ist eine
//! Protokollverletzung des Servers und wird als Fehler gemeldet statt
//! den Prozess abzubrechen.

use std::collections::HashMap;

use murmel_core::{Channel, ChannelId, MurmelError, Result, SessionId, User};

/// Lokales Abbild der Benutzer und Kanaele des Servers
#[derive(Debug, Default)]
pub struct Verzeichnis {
    benutzer: HashMap<SessionId, User>,
    kanaele: HashMap<ChannelId, Channel>,
}

impl Verzeichnis {
    pub fn neu() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Nachschlagen
    // -----------------------------------------------------------------------

    pub fn benutzer(&self, session: SessionId) -> Option<&User> {
        self.benutzer.get(&session)
    }

    pub fn kanal(&self, id: ChannelId) -> Option<&Channel> {
        self.kanaele.get(&id)
    }

    pub fn enthaelt_benutzer(&self, session: SessionId) -> bool {
        self.benutzer.contains_key(&session)
    }

    pub fn enthaelt_kanal(&self, id: ChannelId) -> bool {
        self.kanaele.contains_key(&id)
    }

    pub fn benutzer_anzahl(&self) -> usize {
        self.benutzer.len()
    }

    pub fn kanal_anzahl(&self) -> usize {
        self.kanaele.len()
    }

    // -----------------------------------------------------------------------
    // Kanal-Mutationen
    // -----------------------------------------------------------------------

    /// Legt einen neuen Kanal an. Der Elternkanal muss bereits bekannt
    /// sein, die ID darf noch nicht vergeben sein.
    pub fn kanal_anlegen(
        &mut self,
        id: ChannelId,
        name: String,
        eltern: Option<ChannelId>,
    ) -> Result<Channel> {
        if self.kanaele.contains_key(&id) {
            return Err(MurmelError::protokoll(format!(
                "Kanal {id} existiert bereits"
            )));
        }
        if let Some(eltern_id) = eltern {
            if !self.kanaele.contains_key(&eltern_id) {
                return Err(MurmelError::protokoll(format!(
                    "Elternkanal {eltern_id} fuer neuen Kanal {id} unbekannt"
                )));
            }
        }
        let kanal = Channel { id, name, eltern };
        self.kanaele.insert(id, kanal.clone());
        Ok(kanal)
    }

    /// Aktualisiert Name und/oder Elternkanal eines bekannten Kanals.
    /// Nicht gesetzte Felder bleiben unveraendert. Eine Verschiebung
    /// unter sich selbst oder einen eigenen Nachfahren wuerde die
    /// Eltern-Kette zyklisch machen und wird abgelehnt.
    pub fn kanal_aktualisieren(
        &mut self,
        id: ChannelId,
        name: Option<String>,
        eltern: Option<ChannelId>,
    ) -> Result<Channel> {
        if let Some(eltern_id) = eltern {
            if !self.kanaele.contains_key(&eltern_id) {
                return Err(MurmelError::protokoll(format!(
                    "Elternkanal {eltern_id} fuer Kanal {id} unbekannt"
                )));
            }
            if eltern_id == id || self.ist_nachfahre(eltern_id, id) {
                return Err(MurmelError::protokoll(format!(
                    "Kanal {id} wuerde unter Kanal {eltern_id} sein eigener Vorfahre"
                )));
            }
        }
        let kanal = self.kanaele.get_mut(&id).ok_or_else(|| {
            MurmelError::protokoll(format!("Update fuer unbekannten Kanal {id}"))
        })?;
        if let Some(name) = name {
            kanal.name = name;
        }
        if let Some(eltern_id) = eltern {
            kanal.eltern = Some(eltern_id);
        }
        Ok(kanal.clone())
    }

    /// Entfernt einen Kanal. Der Kanal darf weder Mitglieder noch
    /// Kindkanaele haben; der Server raeumt vor dem Entfernen auf.
    pub fn kanal_entfernen(&mut self, id: ChannelId) -> Result<Channel> {
        if self.benutzer.values().any(|b| b.kanal == id) {
            return Err(MurmelError::protokoll(format!(
                "Kanal {id} wird entfernt obwohl noch Benutzer darin sind"
            )));
        }
        if self.kanaele.values().any(|k| k.eltern == Some(id)) {
            return Err(MurmelError::protokoll(format!(
                "Kanal {id} wird entfernt obwohl noch Kindkanaele existieren"
            )));
        }
        self.kanaele.remove(&id).ok_or_else(|| {
            MurmelError::protokoll(format!("Entfernen eines unbekannten Kanals {id}"))
        })
    }

    // -----------------------------------------------------------------------
    // Benutzer-Mutationen
    // -----------------------------------------------------------------------

    /// Legt einen neuen Benutzer an. Der Zielkanal muss bekannt sein.
    pub fn benutzer_anlegen(
        &mut self,
        session: SessionId,
        name: String,
        kanal: ChannelId,
        kommentar: Option<String>,
        hash: Option<String>,
    ) -> Result<User> {
        if self.benutzer.contains_key(&session) {
            return Err(MurmelError::protokoll(format!(
                "Benutzer {session} existiert bereits"
            )));
        }
        if !self.kanaele.contains_key(&kanal) {
            return Err(MurmelError::protokoll(format!(
                "Benutzer {session} tritt unbekanntem Kanal {kanal} bei"
            )));
        }
        let benutzer = User {
            session,
            name,
            kanal,
            kommentar,
            hash,
        };
        self.benutzer.insert(session, benutzer.clone());
        Ok(benutzer)
    }

    /// Verschiebt einen Benutzer in einen anderen Kanal und gibt den
    /// neuen Benutzer-Zustand samt dem bisherigen Kanal zurueck.
    pub fn benutzer_verschieben(
        &mut self,
        session: SessionId,
        kanal: ChannelId,
    ) -> Result<(User, Channel)> {
        if !self.kanaele.contains_key(&kanal) {
            return Err(MurmelError::protokoll(format!(
                "Benutzer {session} wechselt in unbekannten Kanal {kanal}"
            )));
        }
        let benutzer = self.benutzer.get_mut(&session).ok_or_else(|| {
            MurmelError::protokoll(format!("Kanalwechsel fuer unbekannten Benutzer {session}"))
        })?;
        let alter_kanal_id = benutzer.kanal;
        benutzer.kanal = kanal;
        let benutzer = benutzer.clone();
        let alter_kanal = self.kanaele.get(&alter_kanal_id).cloned().ok_or_else(|| {
            MurmelError::protokoll(format!(
                "Bisheriger Kanal {alter_kanal_id} von Benutzer {session} unbekannt"
            ))
        })?;
        Ok((benutzer, alter_kanal))
    }

    /// Setzt den Kommentar eines bekannten Benutzers
    pub fn benutzer_kommentar_setzen(
        &mut self,
        session: SessionId,
        kommentar: String,
    ) -> Result<()> {
        let benutzer = self.benutzer.get_mut(&session).ok_or_else(|| {
            MurmelError::protokoll(format!("Kommentar fuer unbekannten Benutzer {session}"))
        })?;
        benutzer.kommentar = Some(kommentar);
        Ok(())
    }

    /// Entfernt einen Benutzer und gibt seinen letzten Zustand zurueck
    pub fn benutzer_entfernen(&mut self, session: SessionId) -> Result<User> {
        self.benutzer.remove(&session).ok_or_else(|| {
            MurmelError::protokoll(format!("Entfernen eines unbekannten Benutzers {session}"))
        })
    }

    /// Prueft ob `kandidat` in der Eltern-Kette den Kanal `vorfahre`
    /// erreicht
    fn ist_nachfahre(&self, kandidat: ChannelId, vorfahre: ChannelId) -> bool {
        let mut aktuell = self.kanaele.get(&kandidat).and_then(|k| k.eltern);
        let mut schritte = 0usize;
        while let Some(id) = aktuell {
            if id == vorfahre {
                return true;
            }
            aktuell = self.kanaele.get(&id).and_then(|k| k.eltern);
            schritte += 1;
            if schritte > self.kanaele.len() {
                // Kette laenger als die Kanalanzahl: bereits zyklisch
                return true;
            }
        }
        false
    }

    // -----------------------------------------------------------------------
    // Verwaltung
    // -----------------------------------------------------------------------

    /// Verwirft alle Benutzer und Kanaele (beim Verbindungsabbau)
    pub fn leeren(&mut self) {
        self.benutzer.clear();
        self.kanaele.clear();
    }

    /// Prueft die Verzeichnis-Invarianten: jeder Benutzer-Kanal und
    /// jeder Elternkanal ist aufloesbar, die Eltern-Kette ist zyklenfrei.
    pub fn ist_konsistent(&self) -> bool {
        if self.benutzer.values().any(|b| !self.kanaele.contains_key(&b.kanal)) {
            return false;
        }
        for kanal in self.kanaele.values() {
            let mut aktuell = kanal.eltern;
            let mut schritte = 0usize;
            while let Some(id) = aktuell {
                match self.kanaele.get(&id) {
                    Some(eltern) => aktuell = eltern.eltern,
                    None => return false,
                }
                schritte += 1;
                if schritte > self.kanaele.len() {
                    // Eltern-Kette laenger als die Kanalanzahl: Zyklus
                    return false;
                }
            }
        }
        true
    }

    /// Schreibt den kompletten Verzeichnis-Inhalt ins Debug-Log
    pub fn debug_ausgeben(&self) {
        for kanal in self.kanaele.values() {
            tracing::debug!(
                kanal = %kanal.id,
                name = %kanal.name,
                eltern = ?kanal.eltern,
                "Verzeichnis-Kanal"
            );
        }
        for benutzer in self.benutzer.values() {
            tracing::debug!(
                session = %benutzer.session,
                name = %benutzer.name,
                kanal = %benutzer.kanal,
                "Verzeichnis-Benutzer"
            );
        }
    }
}
