// ─── Servidor HTTP de setup + DNS captive ───
//
// Los handlers de EspHttpServer corren en el thread del servidor. No tocan
// el storage: empaquetan el request, lo mandan por un canal al loop
// principal y esperan la respuesta que arma SetupSurface.
//
//   browser ──HTTP──▶ handler ──canal──▶ Runtime::poll() ──▶ SetupSurface
//           ◀────────         ◀──canal──
//
// Si el loop no contesta a tiempo (está en medio de un PUT), el browser
// recibe 503 y puede reintentar.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use anyhow::Result;
use embedded_svc::{
    http::{server::Request, Headers, Method as HttpVerb, Query},
    io::{Read, Write},
};
use esp_idf_svc::http::server::{Configuration as HttpConfig, EspHttpConnection, EspHttpServer};
use log::{info, warn};

use rfid_tracker::dns;
use rfid_tracker::ports::{CaptiveDns, SetupExchange, SetupInbox};
use rfid_tracker::provisioning::{Method, SetupRequest, SetupResponse, MAX_FORM_BYTES};
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const QUEUE_DEPTH: usize = 4;

/// Request en tránsito hacia el loop principal.
struct Forwarded {
    request: SetupRequest,
    reply: SyncSender<SetupResponse>,
}

/// Extremo del loop principal.
pub struct ChannelInbox {
    rx: Receiver<Forwarded>,
}

impl SetupInbox for ChannelInbox {
    fn next(&mut self) -> Option<SetupExchange> {
        let forwarded = self.rx.try_recv().ok()?;
        let reply = forwarded.reply;
        Some(SetupExchange {
            request: forwarded.request,
            reply: Box::new(move |response| {
                // El handler pudo haber abandonado la espera
                let _ = reply.send(response);
            }),
        })
    }
}

/// Mientras exista, el servidor sigue escuchando (RAII).
pub struct SetupServer {
    _server: EspHttpServer<'static>,
}

/// Arranca el servidor en :80. Toda ruta (GET o POST) va al loop principal.
pub fn start() -> Result<(SetupServer, ChannelInbox)> {
    let (tx, rx) = mpsc::sync_channel::<Forwarded>(QUEUE_DEPTH);

    // uri_match_wildcard: "/*" captura también las URLs de chequeo de
    // conectividad de Android/iOS
    let mut server = EspHttpServer::new(&HttpConfig {
        uri_match_wildcard: true,
        ..Default::default()
    })?;

    for (verb, method) in [(HttpVerb::Get, Method::Get), (HttpVerb::Post, Method::Post)] {
        let tx = tx.clone();
        server.fn_handler(
            "/*",
            verb,
            move |req| -> core::result::Result<(), esp_idf_svc::io::EspIOError> {
                forward(req, method, &tx)
            },
        )?;
    }

    info!("Setup server listening on port 80");
    Ok((SetupServer { _server: server }, ChannelInbox { rx }))
}

fn forward(
    mut req: Request<&mut EspHttpConnection<'_>>,
    method: Method,
    tx: &SyncSender<Forwarded>,
) -> core::result::Result<(), esp_idf_svc::io::EspIOError> {
    let path = req.uri().split('?').next().unwrap_or("/").to_string();
    let host = req.header("Host").map(str::to_string);

    let mut body = Vec::new();
    if method == Method::Post {
        // Content-Length declarado por encima del tope: ni se lee
        if let Some(len) = req.content_len().filter(|len| *len > MAX_FORM_BYTES as u64) {
            warn!("Setup body of {} bytes refused", len);
            let mut refused = req.into_status_response(413)?;
            refused.write_all(b"Form too large")?;
            return Ok(());
        }

        // Se lee hasta pasar el tope por un byte: SetupSurface rechaza ese
        // body en vez de parsear un formulario cortado
        let mut buf = [0u8; 256];
        while body.len() <= MAX_FORM_BYTES {
            let n = req.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let room = MAX_FORM_BYTES + 1 - body.len();
            body.extend_from_slice(&buf[..n.min(room)]);
        }
    }

    let (reply_tx, reply_rx) = mpsc::sync_channel(1);
    let forwarded = Forwarded {
        request: SetupRequest {
            method,
            path,
            host,
            body,
        },
        reply: reply_tx,
    };

    let response = match tx.try_send(forwarded) {
        Ok(()) => match reply_rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(response) => Some(response),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        },
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => None,
    };

    let Some(response) = response else {
        warn!("Setup request not answered by main loop");
        let mut busy = req.into_status_response(503)?;
        busy.write_all(b"Device busy, retry")?;
        return Ok(());
    };

    let mut headers = vec![("Content-Type", response.content_type)];
    if let Some(location) = response.location.as_deref() {
        headers.push(("Location", location));
    }
    let mut out = req.into_response(response.status, None, &headers)?;
    out.write_all(response.body.as_bytes())?;
    Ok(())
}

// ─── DNS captive ───

/// Socket UDP :53 no bloqueante; cada query se contesta con la IP del AP.
pub struct CaptiveDnsServer {
    socket: UdpSocket,
    address: Ipv4Addr,
}

impl CaptiveDnsServer {
    pub fn bind(address: Ipv4Addr) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 53))?;
        socket.set_nonblocking(true)?;
        info!("Captive DNS answering with {}", address);
        Ok(Self { socket, address })
    }
}

impl CaptiveDns for CaptiveDnsServer {
    fn service(&mut self) {
        let mut buf = [0u8; 512];
        // Vaciar lo que haya llegado; WouldBlock = no hay más
        while let Ok((len, peer)) = self.socket.recv_from(&mut buf) {
            if let Some(reply) = dns::answer(&buf[..len], self.address) {
                if let Err(e) = self.socket.send_to(&reply, peer) {
                    warn!("DNS reply to {} failed: {}", peer, e);
                }
            }
        }
    }
}

/// Sin access point (modo Station) no hay nada que atender.
pub struct NoCaptiveDns;

impl CaptiveDns for NoCaptiveDns {
    fn service(&mut self) {}
}
