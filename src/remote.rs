// ─── Cliente del document store remoto ───
//
// Semántica documento-por-path sobre HTTPS:
//   PUT <base>/data/<vehículo>/<doc>.json   body = JSON
//   GET <base>/data/<vehículo>/<doc>.json   → JSON o `null` si no existe
//
// Network agrupa el link WiFi y el transporte HTTP. La reconexión es
// cooperativa: el intento se arranca sin bloquear y se espera con
// Runtime::wait, que sigue atendiendo setup y botón.

use log::{info, warn};

use crate::config::DeviceConfig;
use crate::error::{Interrupt, NetworkError};
use crate::ports::{HttpMethod, HttpTransport, NetworkLink};
use crate::runtime::Runtime;

pub const UNKNOWN_VEHICLE: &str = "unknown";

/// Segmento de path del vehículo: `unknown` si está vacío, percent-encoded.
pub fn vehicle_segment(vehicle: &str) -> String {
    let vehicle = vehicle.trim();
    if vehicle.is_empty() {
        return UNKNOWN_VEHICLE.to_string();
    }
    percent_encode(vehicle)
}

/// Percent-encoding de todo lo que no sea "unreserved" (RFC 3986).
pub fn percent_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

pub fn document_url(base: &str, vehicle: &str, doc: &str) -> String {
    format!(
        "{}/data/{}/{}.json",
        base.trim_end_matches('/'),
        vehicle_segment(vehicle),
        doc
    )
}

pub struct Network {
    link: Box<dyn NetworkLink>,
    http: Box<dyn HttpTransport>,
    base_url: String,
    connect_timeout_ms: u64,
}

impl Network {
    pub fn new(
        link: Box<dyn NetworkLink>,
        http: Box<dyn HttpTransport>,
        base_url: impl Into<String>,
        connect_timeout_ms: u64,
    ) -> Self {
        Self {
            link,
            http,
            base_url: base_url.into(),
            connect_timeout_ms,
        }
    }

    pub fn is_connected(&mut self) -> bool {
        self.link.is_connected()
    }

    /// Si no hay conexión, intenta reconectar con las credenciales guardadas
    /// durante como mucho `connect_timeout_ms`. Devuelve el estado final.
    pub fn ensure_connected(
        &mut self,
        rt: &mut Runtime,
        config: &DeviceConfig,
    ) -> Result<bool, Interrupt> {
        if self.link.is_connected() {
            return Ok(true);
        }

        info!("Connecting to WiFi '{}'...", config.wifi_ssid);
        if let Err(e) = self.link.begin_connect(&config.wifi_ssid, &config.wifi_pass) {
            warn!("WiFi connect could not start: {}", e);
            return Ok(false);
        }

        let started = rt.now_ms();
        while rt.now_ms().saturating_sub(started) < self.connect_timeout_ms {
            rt.wait(rt.slice_ms())?;
            if self.link.is_connected() {
                info!("WiFi connected!");
                return Ok(true);
            }
        }

        warn!("WiFi connect timed out after {} ms", self.connect_timeout_ms);
        Ok(false)
    }

    pub fn url(&self, vehicle: &str, doc: &str) -> String {
        document_url(&self.base_url, vehicle, doc)
    }

    /// PUT de un documento; solo 2xx cuenta como escrito.
    pub fn put(&mut self, vehicle: &str, doc: &str, body: &str) -> Result<(), NetworkError> {
        if !self.link.is_connected() {
            return Err(NetworkError::NotConnected);
        }
        let url = self.url(vehicle, doc);
        let reply = self
            .http
            .request(HttpMethod::Put, &url, Some(body.as_bytes()))?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(NetworkError::Status(reply.status))
        }
    }

    /// GET de un documento; devuelve el body crudo en 2xx.
    pub fn get(&mut self, vehicle: &str, doc: &str) -> Result<String, NetworkError> {
        if !self.link.is_connected() {
            return Err(NetworkError::NotConnected);
        }
        let url = self.url(vehicle, doc);
        let reply = self.http.request(HttpMethod::Get, &url, None)?;
        if reply.is_success() {
            Ok(reply.body)
        } else {
            Err(NetworkError::Status(reply.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_segment_encodes_and_falls_back() {
        assert_eq!(vehicle_segment("GJ-01-1234"), "GJ-01-1234");
        assert_eq!(vehicle_segment("GJ 01/12"), "GJ%2001%2F12");
        assert_eq!(vehicle_segment("  "), "unknown");
        assert_eq!(vehicle_segment("ñ"), "%C3%B1");
    }

    #[test]
    fn document_url_joins_base_vehicle_and_doc() {
        assert_eq!(
            document_url("https://db.example.com/", "GJ-01-1234", "rtmp1"),
            "https://db.example.com/data/GJ-01-1234/rtmp1.json"
        );
        assert_eq!(
            document_url("https://db.example.com", "", "location"),
            "https://db.example.com/data/unknown/location.json"
        );
    }
}
