// ─── Control de acceso por tarjeta RFID ───
//
// Ciclo completo por cada tarjeta presentada (no se atiende otra tarjeta
// hasta terminar):
//   1. normalizar el UID ("DE AD BE EF")
//   2. feedback inmediato de detección (indicador + beep corto)
//   3. si hay red: GET de la allow-list remota (siempre fresca, sin cache)
//   4. buscar el UID en los slots 1→4, gana el primero que coincide
//   5. slot 1 energiza la salida, slot 2 la desenergiza, 3 y 4 solo autorizan
//   6. match: feedback de éxito + un único PUT consolidado con el resultado
//   7. sin match o sin red: nada más; el loop restaura el patrón ambiente

use std::fmt::{self, Write as _};

use log::{info, warn};
use serde::{Deserialize, Deserializer};

use crate::config::DeviceConfig;
use crate::error::{Interrupt, ProtocolError};
use crate::json::ObjectWriter;
use crate::ports::Effectors;
use crate::remote::Network;
use crate::runtime::Runtime;
use crate::settings::Timings;

pub const ALLOW_LIST_DOC: &str = "rfid_data";
/// UIDs ISO 14443 llegan hasta 10 bytes: 10 pares + 9 espacios.
pub const MAX_UID_BYTES: usize = 10;

// ─── Identificador normalizado ───

/// UID en hex mayúscula, pares separados por un espacio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardId(heapless::String<32>);

impl CardId {
    /// `None` si no hay bytes o si el UID excede el largo máximo.
    pub fn from_uid(uid: &[u8]) -> Option<Self> {
        if uid.is_empty() || uid.len() > MAX_UID_BYTES {
            return None;
        }
        let mut out = heapless::String::<32>::new();
        for (i, byte) in uid.iter().enumerate() {
            if i > 0 {
                out.push(' ').ok()?;
            }
            write!(out, "{byte:02X}").ok()?;
        }
        Some(Self(out))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Comparación tolerante contra lo que haya escrito un humano remoto.
    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        !candidate.is_empty() && candidate.eq_ignore_ascii_case(self.as_str())
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Allow-list remota ───

/// Documento `rfid_data`. `current` y `status` los escribe el propio
/// dispositivo; solo los slots deciden.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AllowList {
    #[serde(default, deserialize_with = "lenient_slot")]
    pub uid1: String,
    #[serde(default, deserialize_with = "lenient_slot")]
    pub uid2: String,
    #[serde(default, deserialize_with = "lenient_slot")]
    pub uid3: String,
    #[serde(default, deserialize_with = "lenient_slot")]
    pub uid4: String,
}

/// Un slot que no es string (`null`, número) cuenta como vacío.
fn lenient_slot<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_str().map(str::to_string).unwrap_or_default())
}

impl AllowList {
    /// Parsea el body del GET. `null` es el centinela de "no existe".
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let doc: Option<AllowList> = serde_json::from_str(body)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        doc.ok_or(ProtocolError::Absent)
    }

    pub fn slots(&self) -> [&str; 4] {
        [&self.uid1, &self.uid2, &self.uid3, &self.uid4]
    }

    /// Primer slot (1..=4) que coincide; los siguientes no se miran.
    pub fn match_slot(&self, card: &CardId) -> Option<Slot> {
        self.slots()
            .iter()
            .position(|candidate| card.matches(candidate))
            .and_then(|idx| Slot::from_index(idx + 1))
    }

    /// Documento consolidado que se escribe de vuelta tras un match.
    pub fn result_document(&self, card: &CardId, slot: Slot) -> String {
        ObjectWriter::new()
            .field("uid1", &self.uid1)
            .field("uid2", &self.uid2)
            .field("uid3", &self.uid3)
            .field("uid4", &self.uid4)
            .field("current", card.as_str())
            .field("status", &slot.number().to_string())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    One,
    Two,
    Three,
    Four,
}

impl Slot {
    fn from_index(n: usize) -> Option<Self> {
        match n {
            1 => Some(Slot::One),
            2 => Some(Slot::Two),
            3 => Some(Slot::Three),
            4 => Some(Slot::Four),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Slot::One => 1,
            Slot::Two => 2,
            Slot::Three => 3,
            Slot::Four => 4,
        }
    }

    /// Nivel al que se lleva la salida conmutada, si corresponde.
    pub fn actuation(self) -> Option<bool> {
        match self {
            Slot::One => Some(true),
            Slot::Two => Some(false),
            Slot::Three | Slot::Four => None,
        }
    }
}

// ─── Motor ───

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardOutcome {
    /// UID inválido (vacío o demasiado largo).
    Rejected,
    /// Sin red o fallo del GET.
    Unreachable,
    /// Documento ausente o malformado.
    NoAllowList,
    NoMatch(CardId),
    Matched { card: CardId, slot: Slot },
}

#[derive(Debug)]
pub struct AccessControlEngine {
    timings: Timings,
    last_card: Option<CardId>,
}

impl AccessControlEngine {
    pub fn new(timings: Timings) -> Self {
        Self {
            timings,
            last_card: None,
        }
    }

    /// Última tarjeta vista en esta sesión (para la telemetría).
    pub fn last_card(&self) -> Option<&CardId> {
        self.last_card.as_ref()
    }

    pub fn handle_card(
        &mut self,
        uid: &[u8],
        rt: &mut Runtime,
        net: &mut Network,
        fx: &mut dyn Effectors,
        config: &DeviceConfig,
    ) -> Result<CardOutcome, Interrupt> {
        let Some(card) = CardId::from_uid(uid) else {
            warn!("Ignoring card with {} byte UID", uid.len());
            return Ok(CardOutcome::Rejected);
        };
        info!("Card detected: {}", card);
        self.last_card = Some(card.clone());

        // Feedback de detección, independiente de la red
        fx.set_indicators(false, true);
        fx.set_buzzer(true);
        let pulse = rt.wait(self.timings.ack_pulse_ms);
        fx.set_buzzer(false);
        pulse?;

        if !net.is_connected() {
            warn!("No network, card {} not checked", card);
            return Ok(CardOutcome::Unreachable);
        }

        rt.poll()?;
        let body = match net.get(&config.vehicle, ALLOW_LIST_DOC) {
            Ok(body) => body,
            Err(e) => {
                warn!("Allow-list fetch failed: {}", e);
                return Ok(CardOutcome::Unreachable);
            }
        };

        let allow = match AllowList::parse(&body) {
            Ok(allow) => allow,
            Err(e) => {
                warn!("Allow-list unusable: {}", e);
                return Ok(CardOutcome::NoAllowList);
            }
        };

        let Some(slot) = allow.match_slot(&card) else {
            info!("Card {} not authorized", card);
            return Ok(CardOutcome::NoMatch(card));
        };

        info!("Card {} authorized at slot {}", card, slot.number());
        if let Some(energized) = slot.actuation() {
            fx.set_output(energized);
            info!("Output {}", if energized { "ON" } else { "OFF" });
        }

        self.success_feedback(rt, fx)?;

        rt.poll()?;
        let result = allow.result_document(&card, slot);
        if let Err(e) = net.put(&config.vehicle, ALLOW_LIST_DOC, &result) {
            warn!("Could not publish card result: {}", e);
        }

        Ok(CardOutcome::Matched { card, slot })
    }

    fn success_feedback(&self, rt: &mut Runtime, fx: &mut dyn Effectors) -> Result<(), Interrupt> {
        let beep = self.timings.success_buzzer_ms.min(self.timings.success_indicator_ms);
        fx.set_indicators(false, true);
        fx.set_buzzer(true);
        let first = rt.wait(beep);
        fx.set_buzzer(false);
        first?;
        rt.wait(self.timings.success_indicator_ms - beep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample;
    use crate::config_store::{ConfigStore, REGION_CAPACITY};
    use crate::ports::HttpMethod;
    use crate::provisioning::SetupSurface;
    use crate::sim::{
        ManualClock, MemRegion, NoDns, QueuedInbox, RecordingEffectors, ScriptedButton,
        ScriptedTransport, SimLink,
    };

    const RFID_URL: &str = "https://db.test/data/GJ-01-1234/rfid_data.json";
    const CARD: [u8; 4] = [0xDE, 0xAD, 0x0B, 0xEF];

    struct Rig {
        rt: Runtime,
        net: Network,
        link: SimLink,
        http: ScriptedTransport,
        fx: RecordingEffectors,
        engine: AccessControlEngine,
    }

    impl Rig {
        fn present(&mut self, uid: &[u8]) -> CardOutcome {
            let mut fx = self.fx.clone();
            self.engine
                .handle_card(uid, &mut self.rt, &mut self.net, &mut fx, &sample())
                .unwrap()
        }
    }

    fn rig() -> Rig {
        let clock = ManualClock::new();
        let store = ConfigStore::new(Box::new(MemRegion::new(REGION_CAPACITY)));
        let rt = Runtime::new(
            Box::new(clock.clone()),
            Box::new(ScriptedButton::new(&clock)),
            Box::new(QueuedInbox::new()),
            Box::new(NoDns),
            SetupSurface::new(store),
        );
        let link = SimLink::new(true);
        let http = ScriptedTransport::new();
        let net = Network::new(Box::new(link.clone()), Box::new(http.clone()), "https://db.test", 1_000);
        Rig {
            rt,
            net,
            link,
            http,
            fx: RecordingEffectors::new(&clock),
            engine: AccessControlEngine::new(Timings::default()),
        }
    }

    #[test]
    fn uid_is_normalized_to_spaced_uppercase_pairs() {
        assert_eq!(CardId::from_uid(&CARD).unwrap().as_str(), "DE AD 0B EF");
        assert_eq!(CardId::from_uid(&[0x01]).unwrap().as_str(), "01");
        assert!(CardId::from_uid(&[]).is_none());
        assert!(CardId::from_uid(&[0u8; 11]).is_none());
        let longest = CardId::from_uid(&[0xFF; 10]).unwrap();
        assert_eq!(longest.as_str().len(), 29);
    }

    #[test]
    fn candidate_match_is_trimmed_and_case_insensitive() {
        let card = CardId::from_uid(&CARD).unwrap();
        assert!(card.matches("  de ad 0b ef \n"));
        assert!(!card.matches(""));
        assert!(!card.matches("DE AD 0B"));
    }

    #[test]
    fn allow_list_parsing() {
        assert_eq!(AllowList::parse("null"), Err(ProtocolError::Absent));
        assert!(matches!(AllowList::parse("[1,2]"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(AllowList::parse("{oops"), Err(ProtocolError::Malformed(_))));
        let list = AllowList::parse(r#"{"uid2":"AA","current":"x","status":"2"}"#).unwrap();
        assert_eq!(list.slots(), ["", "AA", "", ""]);
    }

    #[test]
    fn non_string_slots_are_empty_not_fatal() {
        let list =
            AllowList::parse(r#"{"uid1":"DE AD 0B EF","uid2":null,"uid3":42,"uid4":{"x":1}}"#)
                .unwrap();
        assert_eq!(list.slots(), ["DE AD 0B EF", "", "", ""]);
        let card = CardId::from_uid(&CARD).unwrap();
        assert_eq!(list.match_slot(&card), Some(Slot::One));
    }

    #[test]
    fn slot_one_wins_over_slot_two_and_energizes() {
        let mut r = rig();
        r.http.set_document(
            RFID_URL,
            r#"{"uid1":"DE AD 0B EF","uid2":"de ad 0b ef","uid3":"","uid4":""}"#,
        );
        let outcome = r.present(&CARD);
        assert!(matches!(outcome, CardOutcome::Matched { slot: Slot::One, .. }));
        assert_eq!(r.fx.output_changes(), vec![true]);
    }

    #[test]
    fn slot_two_de_energizes_and_empty_slot_one_is_skipped() {
        let mut r = rig();
        r.http.set_document(RFID_URL, r#"{"uid1":"","uid2":"DE AD 0B EF"}"#);
        let outcome = r.present(&CARD);
        assert!(matches!(outcome, CardOutcome::Matched { slot: Slot::Two, .. }));
        assert_eq!(r.fx.output_changes(), vec![false]);
    }

    #[test]
    fn slots_three_and_four_authorize_without_actuation() {
        let mut r = rig();
        r.http.set_document(RFID_URL, r#"{"uid1":"11","uid2":"22","uid4":"DE AD 0B EF"}"#);
        let outcome = r.present(&CARD);
        assert!(matches!(outcome, CardOutcome::Matched { slot: Slot::Four, .. }));
        assert!(r.fx.output_changes().is_empty());
        // Feedback de éxito: beep corto de detección + beep largo
        assert_eq!(r.fx.buzzer_pulses(), vec![100, 600]);
    }

    #[test]
    fn match_writes_back_one_consolidated_document() {
        let mut r = rig();
        r.http.set_document(RFID_URL, r#"{"uid1":"A\"B","uid2":"DE AD 0B EF"}"#);
        r.present(&CARD);

        let puts: Vec<_> = r
            .http
            .requests()
            .into_iter()
            .filter(|q| q.method == HttpMethod::Put)
            .collect();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].url, RFID_URL);
        assert_eq!(
            puts[0].body.as_deref(),
            Some(r#"{"uid1":"A\"B","uid2":"DE AD 0B EF","uid3":"","uid4":"","current":"DE AD 0B EF","status":"2"}"#)
        );
    }

    #[test]
    fn unknown_card_never_actuates_nor_celebrates() {
        let mut r = rig();
        r.http.set_document(RFID_URL, r#"{"uid1":"11 22","uid2":"33 44","uid3":"55","uid4":"66"}"#);
        let outcome = r.present(&CARD);
        assert_eq!(outcome, CardOutcome::NoMatch(CardId::from_uid(&CARD).unwrap()));
        assert!(r.fx.output_changes().is_empty());
        assert_eq!(r.fx.buzzer_pulses(), vec![100]);
        assert!(r.http.requests().iter().all(|q| q.method == HttpMethod::Get));
    }

    #[test]
    fn absent_list_or_offline_is_no_match() {
        let mut r = rig();
        assert_eq!(r.present(&CARD), CardOutcome::NoAllowList);

        r.link.set_connected(false);
        r.http.clear_requests();
        r.fx.clear();
        assert_eq!(r.present(&CARD), CardOutcome::Unreachable);
        assert!(r.http.requests().is_empty());
        // La detección se anuncia igual, sin red de por medio
        assert_eq!(r.fx.buzzer_pulses(), vec![100]);
        assert_eq!(r.fx.last_indicators(), Some((false, true)));
        assert!(r.fx.output_changes().is_empty());
        // Aun sin red la tarjeta queda registrada para la telemetría
        assert_eq!(r.engine.last_card().map(CardId::as_str), Some("DE AD 0B EF"));
    }

    #[test]
    fn allow_list_is_fetched_fresh_for_every_card() {
        let mut r = rig();
        r.http.set_document(RFID_URL, r#"{"uid1":"DE AD 0B EF"}"#);
        assert!(matches!(r.present(&CARD), CardOutcome::Matched { .. }));

        r.http.set_document(RFID_URL, r#"{"uid1":"00"}"#);
        assert!(matches!(r.present(&CARD), CardOutcome::NoMatch(_)));
        let gets = r
            .http
            .requests()
            .iter()
            .filter(|q| q.method == HttpMethod::Get)
            .count();
        assert_eq!(gets, 2);
    }
}
