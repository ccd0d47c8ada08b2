// ─── Configuración de build y tiempos ───
//
// Los valores de red se pueden sobreescribir al compilar:
//   RTDB_BASE_URL=https://mi-db.firebaseio.com cargo build --release

/// Base del document store remoto (sin `/` final).
pub const RTDB_BASE_URL: &str = match option_env!("RTDB_BASE_URL") {
    Some(url) => url,
    None => "https://vehicle-tracker-default-rtdb.firebaseio.com",
};

// ─── Access Point de setup (solo sin configuración) ───

pub const AP_SSID: &str = match option_env!("AP_SSID") {
    Some(ssid) => ssid,
    None => "Tracker-Setup",
};

pub const AP_PASSWORD: &str = match option_env!("AP_PASSWORD") {
    Some(pass) => pass,
    None => "setup1234", // Mínimo 8 chars para WPA2
};

pub const AP_ADDRESS: &str = "192.168.4.1";

/// Tiempos del ciclo de vida. `Default` trae los valores de producción.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Tope de un intento de conexión WiFi.
    pub connect_timeout_ms: u64,
    /// Espera fija entre ciclos del upload (sin crecimiento exponencial).
    pub upload_backoff_ms: u64,
    pub telemetry_interval_ms: u64,
    /// Pausa de cada vuelta del loop en RUNNING / PROVISIONING.
    pub loop_pause_ms: u64,
    /// Sleep máximo dentro de una espera cooperativa.
    pub slice_ms: u64,
    pub reset_hold_ms: u64,
    /// Pulso corto al detectar una tarjeta.
    pub ack_pulse_ms: u64,
    /// Indicador sostenido tras un match.
    pub success_indicator_ms: u64,
    /// Buzzer largo tras un match (dentro del indicador sostenido).
    pub success_buzzer_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            upload_backoff_ms: 5_000,
            telemetry_interval_ms: 5_000,
            loop_pause_ms: 50,
            slice_ms: 20,
            reset_hold_ms: 3_000,
            ack_pulse_ms: 100,
            success_indicator_ms: 1_500,
            success_buzzer_ms: 600,
        }
    }
}
