// ─── Periféricos de la placa ───
//
// Pinout (ESP32-C3):
//   GPIO4  → relay de salida
//   GPIO5  → indicador rojo
//   GPIO6  → indicador verde
//   GPIO7  → buzzer
//   GPIO9  ← botón de reset (BOOT, activo en bajo, pull-up interno)
//   GPIO8  ← GNSS TX  (UART1 RX, 9600 baud)
//   GPIO0  → GNSS RX  (UART1 TX)
//   GPIO20/21 quedan para UART0: consola de EspLogger y flasheo
//   (GPIO8 es strapping: el TX del GNSS en reposo alto no molesta al boot)
//   SPI2: SCK GPIO2, MOSI GPIO3, MISO GPIO10, CS GPIO1 → MFRC522

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use esp_idf_hal::delay::{FreeRtos, NON_BLOCK};
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Input, Level, Output, PinDriver, Pull};
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver};
use esp_idf_hal::uart::UartDriver;
use log::{info, warn};
use mfrc522::comm::blocking::spi::SpiInterface;
use mfrc522::{Initialized, Mfrc522};

use rfid_tracker::gnss::{NmeaParser, PositioningFix};
use rfid_tracker::ports::{CardReader, Clock, Effectors, FixSource, ResetButton};

// ─── Salidas ───

pub struct BoardOutputs {
    relay: PinDriver<'static, AnyOutputPin, Output>,
    red: PinDriver<'static, AnyOutputPin, Output>,
    green: PinDriver<'static, AnyOutputPin, Output>,
    buzzer: PinDriver<'static, AnyOutputPin, Output>,
}

impl BoardOutputs {
    pub fn new(relay: AnyOutputPin, red: AnyOutputPin, green: AnyOutputPin, buzzer: AnyOutputPin) -> Result<Self> {
        let mut outputs = Self {
            relay: PinDriver::output(relay)?,
            red: PinDriver::output(red)?,
            green: PinDriver::output(green)?,
            buzzer: PinDriver::output(buzzer)?,
        };
        // Arranque con todo apagado
        outputs.set_output(false);
        outputs.set_indicators(false, false);
        outputs.set_buzzer(false);
        Ok(outputs)
    }
}

fn drive(pin: &mut PinDriver<'static, AnyOutputPin, Output>, name: &str, on: bool) {
    if let Err(e) = pin.set_level(Level::from(on)) {
        warn!("GPIO {} write failed: {:?}", name, e);
    }
}

impl Effectors for BoardOutputs {
    fn set_output(&mut self, energized: bool) {
        drive(&mut self.relay, "relay", energized);
    }

    fn set_indicators(&mut self, red: bool, green: bool) {
        drive(&mut self.red, "red", red);
        drive(&mut self.green, "green", green);
    }

    fn set_buzzer(&mut self, on: bool) {
        drive(&mut self.buzzer, "buzzer", on);
    }
}

// ─── Botón de reset ───

pub struct BootButton {
    pin: PinDriver<'static, AnyIOPin, Input>,
}

impl BootButton {
    pub fn new(pin: AnyIOPin) -> Result<Self> {
        let mut pin = PinDriver::input(pin)?;
        pin.set_pull(Pull::Up)?;
        Ok(Self { pin })
    }
}

impl ResetButton for BootButton {
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low()
    }
}

// ─── GNSS por UART ───

/// Lee lo que haya en el buffer del UART sin bloquear y lo pasa al parser.
pub struct UartGnss {
    uart: UartDriver<'static>,
    parser: NmeaParser,
}

impl UartGnss {
    pub fn new(uart: UartDriver<'static>) -> Self {
        Self {
            uart,
            parser: NmeaParser::new(),
        }
    }
}

impl FixSource for UartGnss {
    fn latest(&mut self) -> PositioningFix {
        let mut buf = [0u8; 128];
        loop {
            match self.uart.read(&mut buf, NON_BLOCK) {
                Ok(0) => break,
                Ok(n) => self.parser.feed(&buf[..n]),
                Err(e) => {
                    warn!("GNSS UART read failed: {:?}", e);
                    break;
                }
            }
        }
        self.parser.fix()
    }
}

// ─── Lector RFID MFRC522 ───

type RfidSpi = SpiDeviceDriver<'static, SpiDriver<'static>>;

pub struct Mfrc522Reader {
    reader: Mfrc522<SpiInterface<RfidSpi>, Initialized>,
}

impl Mfrc522Reader {
    pub fn new(spi: RfidSpi) -> Result<Self> {
        let mut reader = Mfrc522::new(SpiInterface::new(spi))
            .init()
            .map_err(|e| anyhow::anyhow!("MFRC522 init failed: {:?}", e))?;
        match reader.version() {
            Ok(v) => info!("MFRC522 version 0x{:02X}", v),
            Err(e) => warn!("MFRC522 version read failed: {:?}", e),
        }
        Ok(Self { reader })
    }
}

impl CardReader for Mfrc522Reader {
    fn poll_card(&mut self) -> Option<Vec<u8>> {
        // REQA solo despierta tarjetas en estado IDLE: una tarjeta que sigue
        // en el campo tras HLTA no se vuelve a leer hasta que la retiran
        let atqa = self.reader.reqa().ok()?;
        let uid = match self.reader.select(&atqa) {
            Ok(uid) => uid,
            Err(e) => {
                warn!("Card select failed: {:?}", e);
                return None;
            }
        };
        let bytes = uid.as_bytes().to_vec();
        if let Err(e) = self.reader.hlta() {
            warn!("Card halt failed: {:?}", e);
        }
        Some(bytes)
    }
}

// ─── Reloj ───

/// Reloj de pared válido recién después de la primera sincronización SNTP.
const EPOCH_PLAUSIBLE_SECS: u64 = 1_704_067_200; // 2024-01-01

pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }

    fn epoch_secs(&self) -> Option<u64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs())
            .filter(|secs| *secs >= EPOCH_PLAUSIBLE_SECS)
    }
}
