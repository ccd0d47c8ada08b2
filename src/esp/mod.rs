//! Adaptadores ESP-IDF de los ports del núcleo.

pub mod board;
pub mod http_client;
pub mod nvs_region;
pub mod setup_server;
pub mod wifi;
