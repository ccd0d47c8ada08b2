// ─── Provisioning: la superficie de setup HTTP ───
//
// El servidor HTTP del firmware no toca el storage: reenvía cada request
// al loop principal, que responde con SetupSurface::handle(). Así la
// configuración solo se muta en un único contexto de ejecución.
//
// Rutas:
// - GET  /      → formulario pre-cargado con lo guardado (o redirect captive)
// - POST /save  → valida, persiste y pide reinicio
// - cualquier otra → igual que GET /

use log::{error, info, warn};

use crate::config::{DeviceConfig, KEY_STREAMS, REQUIRED_KEYS};
use crate::config_store::ConfigStore;
use crate::error::ValidationError;
use crate::json;

/// Tope del body de `POST /save`. El servidor HTTP entrega como mucho un
/// byte más; un body por encima del tope llegó incompleto y no se parsea.
pub const MAX_FORM_BYTES: usize = 2048;

// ─── Tipos de request / response ───

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    pub method: Method,
    pub path: String,
    /// Header `Host` tal como llegó (puede traer puerto).
    pub host: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub location: Option<String>,
    pub body: String,
}

impl SetupResponse {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            location: None,
            body,
        }
    }

    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            location: None,
            body,
        }
    }

    fn redirect(location: String) -> Self {
        Self {
            status: 302,
            content_type: "text/plain",
            location: Some(location),
            body: String::new(),
        }
    }
}

/// Qué pasó con el request, para el loop principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    Served,
    /// Configuración persistida: hay que reiniciar.
    Saved,
}

// ─── HTML del formulario de setup ───

const HTML_FORM: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Vehicle Tracker Setup</title>
    <style>
        body { font-family: -apple-system, sans-serif; max-width: 400px; margin: 50px auto; padding: 20px; background: #1a1a2e; color: #eee; }
        h1 { color: #00d4ff; text-align: center; }
        form { background: #16213e; padding: 20px; border-radius: 10px; }
        label { display: block; margin: 15px 0 5px; color: #00d4ff; }
        input { width: 100%; padding: 12px; border: 1px solid #0f3460; border-radius: 5px; background: #1a1a2e; color: #fff; box-sizing: border-box; }
        button { width: 100%; padding: 15px; margin-top: 20px; background: #00d4ff; color: #1a1a2e; border: none; border-radius: 5px; font-weight: bold; cursor: pointer; }
        .info { font-size: 12px; color: #888; margin-top: 5px; }
    </style>
</head>
<body>
    <h1>Vehicle Tracker</h1>
    <form method="POST" action="/save">
        <label>Vehicle Number</label>
        <input type="text" name="veh" value="{{veh}}" required>

        <label>IMEI</label>
        <input type="text" name="imei" value="{{imei}}" required>

        <label>Stream URL 1</label>
        <input type="text" name="rtmp1" value="{{rtmp1}}" required>

        <label>Stream URL 2</label>
        <input type="text" name="rtmp2" value="{{rtmp2}}" required>

        <label>Stream URL 3</label>
        <input type="text" name="rtmp3" value="{{rtmp3}}">

        <label>Stream URL 4</label>
        <input type="text" name="rtmp4" value="{{rtmp4}}">
        <div class="info">Streams 3 and 4 are optional</div>

        <label>WiFi Network (SSID)</label>
        <input type="text" name="wifi_ssid" value="{{wifi_ssid}}" required maxlength="32">

        <label>WiFi Password</label>
        <input type="password" name="wifi_pass" value="{{wifi_pass}}" required maxlength="64">

        <button type="submit">Save &amp; Restart</button>
    </form>
</body>
</html>"#;

const HTML_SUCCESS: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Setup Complete</title>
    <style>
        body { font-family: -apple-system, sans-serif; max-width: 400px; margin: 50px auto; padding: 20px; background: #1a1a2e; color: #eee; text-align: center; }
        h1 { color: #00ff88; }
        p { color: #888; }
    </style>
</head>
<body>
    <h1>Setup Complete!</h1>
    <p>Device will restart and connect to your WiFi network.</p>
    <p>This access point will disappear.</p>
</body>
</html>"#;

// ─── ProvisioningController ───

/// Arma la configuración a partir de los campos del formulario.
///
/// Nunca devuelve una configuración parcial: o están todos los
/// obligatorios (y las credenciales WiFi entran en el driver) o es un
/// ValidationError con lo que falta y lo que sobra.
pub fn build_config(fields: &[(String, String)]) -> Result<DeviceConfig, ValidationError> {
    let mut config = DeviceConfig::default();
    let mut assigned: Vec<&str> = Vec::new();

    for (key, value) in fields {
        // Primer valor gana si la clave viene repetida
        if assigned.contains(&key.as_str()) {
            continue;
        }
        if config.set(key, value.clone()) {
            assigned.push(key.as_str());
        }
    }

    let missing = config.missing_required();
    let too_long = config.oversized();
    if missing.is_empty() && too_long.is_empty() {
        Ok(config)
    } else {
        Err(ValidationError { missing, too_long })
    }
}

/// Modo de red en el que corre la superficie de setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceMode {
    /// Access Point propio: dirección a la que redirigir hosts ajenos.
    AccessPoint { address: String },
    Station,
}

pub struct SetupSurface {
    store: ConfigStore,
    mode: SurfaceMode,
}

impl SetupSurface {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store,
            mode: SurfaceMode::Station,
        }
    }

    pub fn set_mode(&mut self, mode: SurfaceMode) {
        self.mode = mode;
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConfigStore {
        &mut self.store
    }

    fn stored_config(&self) -> Option<DeviceConfig> {
        match self.store.load() {
            Ok(Some(blob)) => DeviceConfig::from_blob(&blob).ok(),
            _ => None,
        }
    }

    pub fn handle(&mut self, request: &SetupRequest) -> (SetupResponse, SetupOutcome) {
        match (request.method, request.path.as_str()) {
            (Method::Post, "/save") => self.save(request),
            (Method::Get, _) => (self.root(request), SetupOutcome::Served),
            // POST a rutas desconocidas: mismo fallback que GET
            (Method::Post, _) => (self.root(request), SetupOutcome::Served),
        }
    }

    fn root(&self, request: &SetupRequest) -> SetupResponse {
        if let SurfaceMode::AccessPoint { address } = &self.mode {
            if let Some(host) = request.host.as_deref() {
                let bare = host.split(':').next().unwrap_or_default();
                if !bare.is_empty() && bare != address.as_str() {
                    info!("Captive redirect: host '{}' → {}", host, address);
                    return SetupResponse::redirect(format!("http://{}/", address));
                }
            }
        }
        SetupResponse::html(200, render_form(self.stored_config().as_ref()))
    }

    fn save(&mut self, request: &SetupRequest) -> (SetupResponse, SetupOutcome) {
        // La configuración es inmutable hasta un factory reset
        if self.stored_config().is_some() {
            warn!("Rejecting /save: device already configured");
            let body = json::ObjectWriter::new()
                .field("status", "error")
                .field("message", "already configured; hold reset button to clear")
                .finish();
            return (SetupResponse::json(409, body), SetupOutcome::Served);
        }

        if request.body.len() > MAX_FORM_BYTES {
            warn!(
                "Rejecting /save: body over {} bytes ({} received)",
                MAX_FORM_BYTES,
                request.body.len()
            );
            let body = json::ObjectWriter::new()
                .field("status", "error")
                .field("message", "form too large")
                .finish();
            return (SetupResponse::json(413, body), SetupOutcome::Served);
        }

        let fields = parse_form(&request.body);
        let config = match build_config(&fields) {
            Ok(config) => config,
            Err(e) => {
                error!("Setup form rejected: {}", e);
                return (
                    SetupResponse::json(400, validation_body(&e)),
                    SetupOutcome::Served,
                );
            }
        };

        info!(
            "Setup received: vehicle '{}', WiFi '{}' (password {} bytes)",
            config.vehicle,
            config.wifi_ssid,
            config.wifi_pass.len()
        );

        if let Err(e) = self.store.save(&config.to_blob()) {
            error!("Failed to store configuration: {}", e);
            let body = json::ObjectWriter::new()
                .field("status", "error")
                .field("message", &e.to_string())
                .finish();
            return (SetupResponse::json(500, body), SetupOutcome::Served);
        }

        info!("Provisioning complete! Device will restart.");
        (
            SetupResponse::html(200, HTML_SUCCESS.to_string()),
            SetupOutcome::Saved,
        )
    }
}

fn validation_body(e: &ValidationError) -> String {
    let message = if e.missing.is_empty() {
        "fields too long"
    } else {
        "missing required fields"
    };
    format!(
        "{{\"status\":\"error\",\"message\":{},\"missing\":[{}],\"too_long\":[{}]}}",
        json::quote(message),
        quoted_list(&e.missing),
        quoted_list(&e.too_long)
    )
}

fn quoted_list(keys: &[&str]) -> String {
    keys.iter().map(|k| json::quote(k)).collect::<Vec<_>>().join(",")
}

/// Formulario con los valores guardados (vacío si no hay configuración).
pub fn render_form(config: Option<&DeviceConfig>) -> String {
    let keys = REQUIRED_KEYS.into_iter().chain(KEY_STREAMS.into_iter().skip(2));
    let mut page = HTML_FORM.to_string();
    for key in keys {
        let value = config.and_then(|c| c.get(key)).unwrap_or_default();
        page = page.replace(&format!("{{{{{key}}}}}"), &html_escape(value));
    }
    page
}

fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ─── Form URL decoding ───

/// Parsea `application/x-www-form-urlencoded` en pares (clave, valor).
///
/// Cada valor se decodifica exactamente una vez.
pub fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    let body = String::from_utf8_lossy(body);
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (urlencoding_decode(key), urlencoding_decode(value)),
            None => (urlencoding_decode(pair), String::new()),
        })
        .collect()
}

/// Decodifica URL encoding (maneja %XX y + como espacio).
///
/// Trabaja sobre bytes: "%C3%B1" vuelve a ser "ñ". Un '%' sin dos
/// dígitos hex válidos se deja literal.
fn urlencoding_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let decoded = input
                    .get(i + 1..i + 3)
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
