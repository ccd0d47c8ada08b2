// ─── Taxonomía de errores del núcleo ───
//
// Cuatro familias, cada una con su política:
// - ValidationError: setup incompleto o inválido → se rechaza, nunca se persiste
// - StorageError: capacidad o integridad → fatal para esa operación
// - NetworkError: timeout, fallo HTTP → siempre se reintenta, nunca fatal
// - ProtocolError: documento remoto ausente o malformado → "no match"
//
// Interrupt NO es un error: es la señal que sale de cualquier espera
// cooperativa cuando hay que reiniciar (factory reset o setup guardado).

use thiserror::Error;

/// Formulario de `POST /save` que no se puede persistir.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid setup form: missing [{}], too long [{}]", missing.join(", "), too_long.join(", "))]
pub struct ValidationError {
    /// Obligatorios ausentes o vacíos.
    pub missing: Vec<&'static str>,
    /// Credenciales WiFi por encima del límite del driver.
    pub too_long: Vec<&'static str>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("configuration blob is empty")]
    Empty,

    #[error("configuration blob too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("stored record is corrupt: recorded length {len}")]
    Corrupt { len: usize },

    #[error("stored configuration is malformed: {0}")]
    Malformed(String),

    #[error("region access out of bounds: offset {offset} + {len} > {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("storage device error: {0}")]
    Device(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("network not connected")]
    NotConnected,

    #[error("connect attempt failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("remote document is absent")]
    Absent,

    #[error("remote document is malformed: {0}")]
    Malformed(String),
}

/// Señal de reinicio que corta cualquier fase en curso.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Botón mantenido ≥ 3 s.
    FactoryReset,
    /// `POST /save` persistió una configuración nueva.
    Provisioned,
}
