// ─── Upload inicial de la configuración ───
//
// Cada campo es un PUT independiente e idempotente. El progreso vive en
// memoria (no se persiste): un flag por item, que solo pasa a true con
// una respuesta 2xx. Un ciclo reintenta únicamente lo pendiente, así que
// el progreso parcial sobrevive cualquier cantidad de reintentos sin
// reenviar lo ya confirmado.

use chrono::{DateTime, SecondsFormat, Utc};
use log::{info, warn};

use crate::config::DeviceConfig;
use crate::error::Interrupt;
use crate::json;
use crate::remote::Network;
use crate::runtime::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadItem {
    Stream1,
    Stream2,
    Stream3,
    Stream4,
    Imei,
    Vehicle,
    Timestamp,
}

impl UploadItem {
    pub const ALL: [UploadItem; 7] = [
        UploadItem::Stream1,
        UploadItem::Stream2,
        UploadItem::Stream3,
        UploadItem::Stream4,
        UploadItem::Imei,
        UploadItem::Vehicle,
        UploadItem::Timestamp,
    ];

    /// Nombre del documento remoto (`<doc>.json`).
    pub fn document(self) -> &'static str {
        match self {
            UploadItem::Stream1 => "rtmp1",
            UploadItem::Stream2 => "rtmp2",
            UploadItem::Stream3 => "rtmp3",
            UploadItem::Stream4 => "rtmp4",
            UploadItem::Imei => "imei",
            UploadItem::Vehicle => "vehnum",
            UploadItem::Timestamp => "timestampz",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn value<'a>(self, config: &'a DeviceConfig, timestamp: &'a str) -> &'a str {
        match self {
            UploadItem::Stream1 => &config.streams[0],
            UploadItem::Stream2 => &config.streams[1],
            UploadItem::Stream3 => &config.streams[2],
            UploadItem::Stream4 => &config.streams[3],
            UploadItem::Imei => &config.imei,
            UploadItem::Vehicle => &config.vehicle,
            UploadItem::Timestamp => timestamp,
        }
    }
}

/// Siete flags de completitud, uno por item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadProgress {
    done: [bool; 7],
}

impl UploadProgress {
    pub fn is_done(&self, item: UploadItem) -> bool {
        self.done[item.index()]
    }

    pub fn mark_done(&mut self, item: UploadItem) {
        self.done[item.index()] = true;
    }

    pub fn is_complete(&self) -> bool {
        self.done.iter().all(|d| *d)
    }

    pub fn pending(&self) -> impl Iterator<Item = UploadItem> + '_ {
        UploadItem::ALL.into_iter().filter(|i| !self.is_done(*i))
    }

    pub fn completed_count(&self) -> usize {
        self.done.iter().filter(|d| **d).count()
    }

    pub fn clear(&mut self) {
        self.done = [false; 7];
    }
}

/// Timestamp del upload: RFC 3339 si hay hora de pared, si no uptime.
pub fn upload_timestamp(epoch_secs: Option<u64>, uptime_ms: u64) -> String {
    epoch_secs
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| format!("uptime+{uptime_ms}ms"))
}

#[derive(Debug, Default)]
pub struct UploadManager {
    progress: UploadProgress,
}

impl UploadManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self) -> &UploadProgress {
        &self.progress
    }

    pub fn is_complete(&self) -> bool {
        self.progress.is_complete()
    }

    /// Olvida todo el progreso (factory reset / nuevo boot).
    pub fn reset(&mut self) {
        self.progress.clear();
    }

    /// Un ciclo: reconectar si hace falta y escribir cada item pendiente.
    ///
    /// Devuelve `true` cuando los siete items quedaron confirmados.
    pub fn run_cycle(
        &mut self,
        rt: &mut Runtime,
        net: &mut Network,
        config: &DeviceConfig,
    ) -> Result<bool, Interrupt> {
        if self.progress.is_complete() {
            return Ok(true);
        }

        // El resultado no importa: sin conexión los PUT fallan y se reintentan
        net.ensure_connected(rt, config)?;

        // Timestamp fresco en cada ciclo
        let timestamp = upload_timestamp(rt.epoch_secs(), rt.now_ms());
        let pending: Vec<UploadItem> = self.progress.pending().collect();

        for item in pending {
            rt.poll()?;
            let body = json::quote(item.value(config, &timestamp));
            match net.put(&config.vehicle, item.document(), &body) {
                Ok(()) => {
                    self.progress.mark_done(item);
                    info!("Uploaded {}.json", item.document());
                }
                Err(e) => warn!("Upload of {}.json failed: {}", item.document(), e),
            }
        }

        info!(
            "Upload progress: {}/{}",
            self.progress.completed_count(),
            UploadItem::ALL.len()
        );
        Ok(self.progress.is_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample;
    use crate::config_store::{ConfigStore, REGION_CAPACITY};
    use crate::ports::HttpMethod;
    use crate::provisioning::SetupSurface;
    use crate::sim::{ManualClock, MemRegion, NoDns, QueuedInbox, ScriptedButton, ScriptedTransport, SimLink};

    const BASE: &str = "https://db.test";

    struct Rig {
        rt: Runtime,
        net: Network,
        link: SimLink,
        http: ScriptedTransport,
    }

    fn rig(connected: bool) -> Rig {
        let clock = ManualClock::new();
        let store = ConfigStore::new(Box::new(MemRegion::new(REGION_CAPACITY)));
        let rt = Runtime::new(
            Box::new(clock.clone()),
            Box::new(ScriptedButton::new(&clock)),
            Box::new(QueuedInbox::new()),
            Box::new(NoDns),
            SetupSurface::new(store),
        );
        let link = SimLink::new(connected);
        let http = ScriptedTransport::new();
        let net = Network::new(Box::new(link.clone()), Box::new(http.clone()), BASE, 1_000);
        Rig { rt, net, link, http }
    }

    #[test]
    fn one_connected_cycle_writes_all_seven_items() {
        let mut r = rig(true);
        let mut up = UploadManager::new();
        assert!(up.run_cycle(&mut r.rt, &mut r.net, &sample()).unwrap());

        let reqs = r.http.requests();
        assert_eq!(reqs.len(), 7);
        assert!(reqs.iter().all(|q| q.method == HttpMethod::Put));
        assert_eq!(
            r.http.document("https://db.test/data/GJ-01-1234/imei.json").as_deref(),
            Some("\"IMEI123456789\"")
        );
        assert_eq!(
            r.http.document("https://db.test/data/GJ-01-1234/rtmp3.json").as_deref(),
            Some("\"\"")
        );
    }

    #[test]
    fn retry_cycle_only_resends_pending_items() {
        let mut r = rig(true);
        r.http.fail_matching("/rtmp2.json");
        r.http.fail_matching("/vehnum.json");
        let mut up = UploadManager::new();

        assert!(!up.run_cycle(&mut r.rt, &mut r.net, &sample()).unwrap());
        assert_eq!(up.progress().completed_count(), 5);

        r.http.clear_failures();
        r.http.clear_requests();
        assert!(up.run_cycle(&mut r.rt, &mut r.net, &sample()).unwrap());
        let urls: Vec<String> = r.http.requests().into_iter().map(|q| q.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://db.test/data/GJ-01-1234/rtmp2.json",
                "https://db.test/data/GJ-01-1234/vehnum.json",
            ]
        );
    }

    #[test]
    fn offline_cycle_tries_to_connect_and_marks_nothing() {
        let mut r = rig(false);
        let mut up = UploadManager::new();
        assert!(!up.run_cycle(&mut r.rt, &mut r.net, &sample()).unwrap());
        assert_eq!(r.link.attempts(), 1);
        assert_eq!(r.link.last_ssid(), "home");
        assert_eq!(up.progress().completed_count(), 0);
        // Sin link no se llega a tocar el transporte
        assert!(r.http.requests().is_empty());

        r.link.accept_connects(true);
        assert!(up.run_cycle(&mut r.rt, &mut r.net, &sample()).unwrap());
        assert_eq!(r.link.attempts(), 2);
    }

    #[test]
    fn timestamp_is_regenerated_every_cycle() {
        let mut r = rig(true);
        r.http.fail_matching("/timestampz.json");
        let mut up = UploadManager::new();
        up.run_cycle(&mut r.rt, &mut r.net, &sample()).unwrap();
        r.rt.wait(5_000).unwrap();
        up.run_cycle(&mut r.rt, &mut r.net, &sample()).unwrap();

        let bodies: Vec<String> = r
            .http
            .requests()
            .into_iter()
            .filter(|q| q.url.ends_with("/timestampz.json"))
            .filter_map(|q| q.body)
            .collect();
        assert_eq!(bodies.len(), 2);
        assert_ne!(bodies[0], bodies[1]);
    }

    #[test]
    fn empty_vehicle_uploads_under_unknown() {
        let mut r = rig(true);
        let mut cfg = sample();
        cfg.vehicle.clear();
        UploadManager::new().run_cycle(&mut r.rt, &mut r.net, &cfg).unwrap();
        assert!(r
            .http
            .requests()
            .iter()
            .all(|q| q.url.starts_with("https://db.test/data/unknown/")));
    }

    #[test]
    fn timestamp_format() {
        assert_eq!(upload_timestamp(Some(0), 5), "1970-01-01T00:00:00Z");
        assert_eq!(upload_timestamp(None, 1234), "uptime+1234ms");
    }
}
