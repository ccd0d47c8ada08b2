// ─── Cliente HTTPS del document store ───
//
// Una conexión nueva por request. El store remoto se usa sin verificación
// de certificado (ver sdkconfig.defaults).

use std::time::Duration;

use embedded_svc::{
    http::{client::Client, Method, Status},
    io::{Read, Write},
};
use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};
use log::{debug, warn};

use rfid_tracker::error::NetworkError;
use rfid_tracker::ports::{HttpMethod, HttpReply, HttpTransport};

/// Tope de body que aceptamos de vuelta (la allow-list es chica).
const MAX_REPLY_BYTES: usize = 4096;

pub struct EspHttpTransport {
    timeout: Duration,
}

impl EspHttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn transport_err(e: impl core::fmt::Debug) -> NetworkError {
    NetworkError::Transport(format!("{e:?}"))
}

impl HttpTransport for EspHttpTransport {
    fn request(
        &mut self,
        method: HttpMethod,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpReply, NetworkError> {
        let connection = EspHttpConnection::new(&HttpConfig {
            timeout: Some(self.timeout),
            use_global_ca_store: false,
            crt_bundle_attach: None,
            ..Default::default()
        })
        .map_err(transport_err)?;
        let mut client = Client::wrap(connection);

        let verb = match method {
            HttpMethod::Get => Method::Get,
            HttpMethod::Put => Method::Put,
        };
        let payload = body.unwrap_or_default();
        let content_length = payload.len().to_string();
        let headers = [
            ("content-type", "application/json"),
            ("content-length", content_length.as_str()),
        ];

        let mut request = client
            .request(verb, url, &headers)
            .map_err(transport_err)?;
        if !payload.is_empty() {
            request.write_all(payload).map_err(transport_err)?;
        }
        request.flush().map_err(transport_err)?;

        let mut response = request.submit().map_err(transport_err)?;
        let status = response.status();

        let mut out = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = response.read(&mut buf).map_err(transport_err)?;
            if n == 0 {
                break;
            }
            if out.len() + n > MAX_REPLY_BYTES {
                warn!(
                    "{:?} {}: reply truncated at {} bytes",
                    method, url, MAX_REPLY_BYTES
                );
                out.extend_from_slice(&buf[..MAX_REPLY_BYTES - out.len()]);
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }

        debug!("{:?} {} → {}", method, url, status);
        Ok(HttpReply {
            status,
            body: String::from_utf8_lossy(&out).into_owned(),
        })
    }
}
