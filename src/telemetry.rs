// ─── Telemetría: último fix + última tarjeta ───
//
// Best-effort: si el PUT falla se loguea y se reintenta en el próximo
// intervalo. No hay cola local ni backoff propio.

use log::{debug, warn};

use crate::access::CardId;
use crate::config::DeviceConfig;
use crate::error::Interrupt;
use crate::gnss::PositioningFix;
use crate::json::ObjectWriter;
use crate::remote::Network;
use crate::runtime::Runtime;

pub const LOCATION_DOC: &str = "location";

/// Registro `{UID,lat,lon,alt,speed,sat,time,date}`.
///
/// Todo campo va siempre presente; desconocido = string vacío, nunca 0.
pub fn location_record(fix: &PositioningFix, last_card: Option<&CardId>) -> String {
    let (lat, lon) = fix
        .location
        .map(|l| (format!("{:.6}", l.lat), format!("{:.6}", l.lon)))
        .unwrap_or_default();
    let alt = fix.altitude_m.map(|a| format!("{a:.2}")).unwrap_or_default();
    let speed = fix.speed_kmh.map(|s| format!("{s:.2}")).unwrap_or_default();
    let sat = fix.satellites.map(|s| s.to_string()).unwrap_or_default();
    let time = fix
        .time
        .map(|t| format!("{:02}:{:02}:{:02}", t.hour, t.minute, t.second))
        .unwrap_or_default();
    let date = fix
        .date
        .map(|d| format!("{:02}/{:02}/{:04}", d.day, d.month, d.year))
        .unwrap_or_default();

    ObjectWriter::new()
        .field("UID", last_card.map(CardId::as_str).unwrap_or_default())
        .field("lat", &lat)
        .field("lon", &lon)
        .field("alt", &alt)
        .field("speed", &speed)
        .field("sat", &sat)
        .field("time", &time)
        .field("date", &date)
        .finish()
}

#[derive(Debug, Default)]
pub struct TelemetryPublisher {
    published: u32,
    failed: u32,
}

impl TelemetryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> u32 {
        self.published
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    /// Publica el registro; devuelve si el PUT fue confirmado.
    pub fn publish(
        &mut self,
        rt: &mut Runtime,
        net: &mut Network,
        config: &DeviceConfig,
        fix: &PositioningFix,
        last_card: Option<&CardId>,
    ) -> Result<bool, Interrupt> {
        if !net.ensure_connected(rt, config)? {
            self.failed += 1;
            return Ok(false);
        }

        rt.poll()?;
        let record = location_record(fix, last_card);
        match net.put(&config.vehicle, LOCATION_DOC, &record) {
            Ok(()) => {
                self.published += 1;
                debug!("Location published: {}", record);
                Ok(true)
            }
            Err(e) => {
                self.failed += 1;
                warn!("Location publish failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnss::{FixDate, FixTime, Location};

    #[test]
    fn unknown_fields_render_as_empty_strings() {
        let record = location_record(&PositioningFix::default(), None);
        assert_eq!(
            record,
            r#"{"UID":"","lat":"","lon":"","alt":"","speed":"","sat":"","time":"","date":""}"#
        );
    }

    #[test]
    fn each_field_is_rendered_independently() {
        let fix = PositioningFix {
            location: Some(Location { lat: -34.6, lon: -58.381_56 }),
            altitude_m: None,
            speed_kmh: Some(0.0),
            satellites: Some(0),
            time: Some(FixTime { hour: 9, minute: 5, second: 7 }),
            date: Some(FixDate { day: 1, month: 2, year: 2026 }),
        };
        let card = CardId::from_uid(&[0xAB, 0x01]).unwrap();
        let record = location_record(&fix, Some(&card));
        assert_eq!(
            record,
            r#"{"UID":"AB 01","lat":"-34.600000","lon":"-58.381560","alt":"","speed":"0.00","sat":"0","time":"09:05:07","date":"01/02/2026"}"#
        );
    }
}
