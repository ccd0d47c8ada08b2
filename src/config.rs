// ─── Configuración del dispositivo ───
//
// La única entidad persistida. Se crea en el setup, se lee en cada boot
// y solo se destruye con factory reset. Se serializa como objeto JSON plano.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::StorageError;
use crate::json::{self, ObjectWriter};

// ─── Claves del formulario y del blob persistido ───

pub const KEY_VEHICLE: &str = "veh";
pub const KEY_IMEI: &str = "imei";
pub const KEY_STREAMS: [&str; 4] = ["rtmp1", "rtmp2", "rtmp3", "rtmp4"];
pub const KEY_WIFI_SSID: &str = "wifi_ssid";
pub const KEY_WIFI_PASS: &str = "wifi_pass";

/// Campos sin los cuales la configuración no existe.
pub const REQUIRED_KEYS: [&str; 6] = [
    KEY_VEHICLE,
    KEY_IMEI,
    KEY_STREAMS[0],
    KEY_STREAMS[1],
    KEY_WIFI_SSID,
    KEY_WIFI_PASS,
];

/// Límites del driver WiFi (bytes, no caracteres).
pub const MAX_SSID_BYTES: usize = 32;
pub const MAX_PASS_BYTES: usize = 64;

/// Configuración completa del dispositivo.
///
/// Igual que las credenciales del paso 2, se borra de memoria al salir de
/// scope: contiene el password WiFi.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DeviceConfig {
    pub vehicle: String,
    pub imei: String,
    /// rtmp1..rtmp4; los dos primeros obligatorios, los otros pueden ser "".
    pub streams: [String; 4],
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

// Debug manual: nunca imprimir el password
impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("vehicle", &self.vehicle)
            .field("imei", &self.imei)
            .field("streams", &self.streams)
            .field("wifi_ssid", &self.wifi_ssid)
            .field("wifi_pass", &format_args!("<{} bytes>", self.wifi_pass.len()))
            .finish()
    }
}

impl DeviceConfig {
    /// Valor de un campo por su clave de formulario.
    pub fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            KEY_VEHICLE => &self.vehicle,
            KEY_IMEI => &self.imei,
            KEY_WIFI_SSID => &self.wifi_ssid,
            KEY_WIFI_PASS => &self.wifi_pass,
            _ => {
                let idx = KEY_STREAMS.iter().position(|k| *k == key)?;
                &self.streams[idx]
            }
        };
        Some(value.as_str())
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut String> {
        match key {
            KEY_VEHICLE => Some(&mut self.vehicle),
            KEY_IMEI => Some(&mut self.imei),
            KEY_WIFI_SSID => Some(&mut self.wifi_ssid),
            KEY_WIFI_PASS => Some(&mut self.wifi_pass),
            _ => {
                let idx = KEY_STREAMS.iter().position(|k| *k == key)?;
                Some(&mut self.streams[idx])
            }
        }
    }

    /// Asigna un campo por clave. Claves desconocidas se ignoran.
    pub fn set(&mut self, key: &str, value: String) -> bool {
        match self.slot_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Claves obligatorias vacías, en el orden del formulario.
    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| self.get(key).map_or(true, str::is_empty))
            .collect()
    }

    /// Credenciales WiFi que el driver no podría aceptar.
    pub fn oversized(&self) -> Vec<&'static str> {
        [
            (KEY_WIFI_SSID, &self.wifi_ssid, MAX_SSID_BYTES),
            (KEY_WIFI_PASS, &self.wifi_pass, MAX_PASS_BYTES),
        ]
        .into_iter()
        .filter(|(_, value, max)| value.len() > *max)
        .map(|(key, _, _)| key)
        .collect()
    }

    /// Serializa al blob que guarda el ConfigStore.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut w = ObjectWriter::new()
            .field(KEY_VEHICLE, &self.vehicle)
            .field(KEY_IMEI, &self.imei);
        for (key, value) in KEY_STREAMS.iter().zip(&self.streams) {
            w = w.field(key, value);
        }
        w.field(KEY_WIFI_SSID, &self.wifi_ssid)
            .field(KEY_WIFI_PASS, &self.wifi_pass)
            .finish()
            .into_bytes()
    }

    /// Reconstruye la configuración desde el blob persistido.
    ///
    /// Un blob sin campos obligatorios es corrupción, no "sin config".
    pub fn from_blob(blob: &[u8]) -> Result<Self, StorageError> {
        let text = std::str::from_utf8(blob)
            .map_err(|e| StorageError::Malformed(format!("not UTF-8: {e}")))?;
        let pairs = json::parse_flat_object(text)
            .map_err(|e| StorageError::Malformed(e.to_string()))?;

        let mut config = DeviceConfig::default();
        // Ante claves repetidas gana la primera
        let mut seen: Vec<&'static str> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            if seen.iter().any(|k| *k == key) {
                continue;
            }
            if let Some(slot) = config.slot_mut(&key) {
                *slot = value;
                if let Some(known) = all_keys().find(|k| *k == key) {
                    seen.push(known);
                }
            }
        }

        let missing = config.missing_required();
        if !missing.is_empty() {
            return Err(StorageError::Malformed(format!(
                "empty required fields: {}",
                missing.join(", ")
            )));
        }
        Ok(config)
    }
}

fn all_keys() -> impl Iterator<Item = &'static str> {
    [KEY_VEHICLE, KEY_IMEI]
        .into_iter()
        .chain(KEY_STREAMS)
        .chain([KEY_WIFI_SSID, KEY_WIFI_PASS])
}

#[cfg(test)]
pub(crate) fn sample() -> DeviceConfig {
    DeviceConfig {
        vehicle: "GJ-01-1234".into(),
        imei: "IMEI123456789".into(),
        streams: [
            "rtmp://a/1".into(),
            "rtmp://a/2".into(),
            String::new(),
            String::new(),
        ],
        wifi_ssid: "home".into(),
        wifi_pass: "secret12".into(),
    }
}
