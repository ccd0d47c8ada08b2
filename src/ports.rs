// ─── Ports: la frontera entre el núcleo y el hardware ───
//
// El núcleo solo habla con estos traits. El firmware (src/esp/) los
// implementa sobre ESP-IDF; `sim` los implementa en memoria para tests.
//
// | Port            | Firmware                     | sim                 |
// |-----------------|------------------------------|---------------------|
// | Region          | NVS raw blob                 | MemRegion           |
// | Clock           | Instant + FreeRtos + SNTP    | ManualClock         |
// | ResetButton     | GPIO input (pull-up)         | ScriptedButton      |
// | Effectors       | GPIO outputs                 | RecordingEffectors  |
// | NetworkLink     | EspWifi (STA)                | SimLink             |
// | HttpTransport   | EspHttpConnection (TLS)      | ScriptedTransport   |
// | SetupInbox      | canal desde EspHttpServer    | QueuedInbox         |
// | CaptiveDns      | UdpSocket :53                | NoDns               |
// | FixSource       | UART + NmeaParser            | FixedFix            |
// | CardReader      | MFRC522 por SPI              | QueuedCards         |

use crate::error::{NetworkError, StorageError};
use crate::gnss::PositioningFix;
use crate::provisioning::{SetupRequest, SetupResponse};

/// Región de bytes de capacidad fija (semántica EEPROM).
///
/// Las escrituras quedan pendientes hasta `commit`. Si `commit` falla,
/// las escrituras pendientes se descartan.
pub trait Region {
    fn capacity(&self) -> usize;
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;
    fn commit(&mut self) -> Result<(), StorageError>;
}

pub trait Clock {
    /// Milisegundos desde el boot (monótono).
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u32);
    /// Segundos Unix si el reloj de pared está sincronizado.
    fn epoch_secs(&self) -> Option<u64>;
}

pub trait ResetButton {
    fn is_pressed(&mut self) -> bool;
}

/// Salidas digitales: relay, dos indicadores y buzzer.
pub trait Effectors {
    fn set_output(&mut self, energized: bool);
    fn set_indicators(&mut self, red: bool, green: bool);
    fn set_buzzer(&mut self, on: bool);
}

pub trait NetworkLink {
    fn is_connected(&mut self) -> bool;
    /// Arranca un intento de conexión sin bloquear.
    fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait HttpTransport {
    fn request(
        &mut self,
        method: HttpMethod,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpReply, NetworkError>;
}

/// Un request del setup con su canal de respuesta.
pub struct SetupExchange {
    pub request: SetupRequest,
    pub reply: Box<dyn FnOnce(SetupResponse)>,
}

pub trait SetupInbox {
    fn next(&mut self) -> Option<SetupExchange>;
}

pub trait CaptiveDns {
    fn service(&mut self);
}

pub trait FixSource {
    fn latest(&mut self) -> PositioningFix;
}

pub trait CardReader {
    /// Bytes crudos del UID si hay una tarjeta nueva presentada.
    fn poll_card(&mut self) -> Option<Vec<u8>>;
}
