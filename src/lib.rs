//! Núcleo portable del tracker vehicular con control de acceso RFID.
//!
//! Todo lo que decide (máquina de estados, storage, upload, RFID,
//! telemetría, superficie de setup) vive acá y habla con el hardware a
//! través de los traits de [`ports`]. El firmware (`src/main.rs` + `src/esp/`)
//! implementa esos traits sobre ESP-IDF; `sim` (feature `sim`) los implementa en memoria
//! para los tests del host.

pub mod access;
pub mod button;
pub mod config;
pub mod config_store;
pub mod dns;
pub mod error;
pub mod gnss;
pub mod indicator;
pub mod json;
pub mod ports;
pub mod provisioning;
pub mod remote;
pub mod runtime;
pub mod settings;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod supervisor;
pub mod telemetry;
pub mod upload;
