// ─── Paso 3: Tracker vehicular con control de acceso RFID ───
//
// El ESP32 ya sabe conectarse a WiFi (paso 2). Ahora además:
// - guarda una configuración completa (vehículo, IMEI, streams, WiFi)
// - la sube una vez al document store remoto
// - controla un relay con tarjetas RFID autorizadas remotamente
// - publica la posición GNSS periódicamente
//
// Este archivo solo arma el hardware. Toda la lógica vive en la lib
// (rfid_tracker) y se testea en el host con `cargo test`.
//
// Módulos nuevos: esp/ (adaptadores de hardware para los ports del núcleo)

#[cfg(target_os = "espidf")]
mod esp;

// ─── Punto de entrada ───
//
// Patrón main() → run(): main() no retorna Result, así que no puede usar ?.
// Delegamos toda la lógica a run() que sí retorna Result.
// run() vuelve cuando hay que reiniciar (setup guardado o factory reset);
// si falla, logueamos el error, esperamos 10s y reiniciamos el chip.

#[cfg(target_os = "espidf")]
fn main() {
    use log::{error, info};
    use std::time::Duration;

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("paso-03-rfid-tracker");

    match firmware::run() {
        Ok(reason) => {
            info!("Restarting ({:?})...", reason);
            // Dar tiempo a que el servidor termine de enviar la respuesta
            std::thread::sleep(Duration::from_secs(1));
        }
        Err(e) => {
            error!("Error fatal: {:?}", e);
            error!("Reiniciando en 10 segundos...");
            std::thread::sleep(Duration::from_secs(10));
        }
    }

    unsafe {
        esp_idf_svc::sys::esp_restart();
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("paso-03-rfid-tracker is ESP-IDF firmware; run `cargo test` for the host-side core");
}

#[cfg(target_os = "espidf")]
mod firmware {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin};
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_hal::spi::{self, SpiDeviceDriver, SpiDriverConfig};
    use esp_idf_hal::uart::{self, UartDriver};
    use esp_idf_hal::units::Hertz;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sntp::EspSntp;
    use log::{info, warn};

    use rfid_tracker::config::DeviceConfig;
    use rfid_tracker::config_store::{ConfigStore, REGION_CAPACITY};
    use rfid_tracker::ports::CaptiveDns;
    use rfid_tracker::provisioning::{SetupSurface, SurfaceMode};
    use rfid_tracker::remote::Network;
    use rfid_tracker::runtime::Runtime;
    use rfid_tracker::settings::{Timings, AP_ADDRESS, AP_PASSWORD, AP_SSID, RTDB_BASE_URL};
    use rfid_tracker::supervisor::{Devices, RestartReason, Supervisor};

    use crate::esp::board::{BoardOutputs, BootButton, Mfrc522Reader, SystemClock, UartGnss};
    use crate::esp::http_client::EspHttpTransport;
    use crate::esp::nvs_region::NvsRegion;
    use crate::esp::setup_server::{self, CaptiveDnsServer, NoCaptiveDns};
    use crate::esp::wifi::WifiLink;

    const GNSS_BAUD: u32 = 9_600;
    const RFID_SPI_HZ: u32 = 1_000_000;
    const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn run() -> anyhow::Result<RestartReason> {
        // ─── Inicialización del sistema ───

        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs_partition = EspDefaultNvsPartition::take()?;
        let pins = peripherals.pins;
        let timings = Timings::default();

        // ─── Storage: ¿hay configuración? ───

        let region = NvsRegion::new(nvs_partition, REGION_CAPACITY)?;
        let store = ConfigStore::new(Box::new(region));
        let configured = matches!(
            store.load(),
            Ok(Some(blob)) if DeviceConfig::from_blob(&blob).is_ok()
        );
        let mut setup = SetupSurface::new(store);

        // ─── Radio: Station si hay configuración, Access Point si no ───

        let ap_address: Ipv4Addr = AP_ADDRESS.parse()?;
        let (link, dns): (WifiLink, Box<dyn CaptiveDns>) = if configured {
            let link = WifiLink::station(peripherals.modem, sysloop.clone())?;
            (link, Box::new(NoCaptiveDns))
        } else {
            warn!("Device not configured!");
            info!("Connect to WiFi: '{}' / Password: '{}'", AP_SSID, AP_PASSWORD);
            info!("Then open http://{} in your browser", AP_ADDRESS);

            let link = WifiLink::access_point(
                peripherals.modem,
                sysloop.clone(),
                AP_SSID,
                AP_PASSWORD,
                ap_address,
            )?;
            setup.set_mode(SurfaceMode::AccessPoint {
                address: AP_ADDRESS.to_string(),
            });
            (link, Box::new(CaptiveDnsServer::bind(ap_address)?))
        };

        // _server y _sntp deben vivir hasta el reinicio (RAII)
        let (_server, inbox) = setup_server::start()?;
        let _sntp = if configured {
            Some(EspSntp::new_default()?)
        } else {
            None
        };

        // ─── Periféricos ───

        let outputs = BoardOutputs::new(
            pins.gpio4.into(),
            pins.gpio5.into(),
            pins.gpio6.into(),
            pins.gpio7.into(),
        )?;
        let button = BootButton::new(pins.gpio9.into())?;

        let uart_config = uart::config::Config::new().baudrate(Hertz(GNSS_BAUD));
        let uart = UartDriver::new(
            peripherals.uart1,
            pins.gpio0,
            pins.gpio8,
            AnyInputPin::none(),
            AnyOutputPin::none(),
            &uart_config,
        )?;
        info!("GNSS UART configured at {} baud", GNSS_BAUD);

        let spi_config = spi::config::Config::new().baudrate(Hertz(RFID_SPI_HZ));
        let spi = SpiDeviceDriver::new_single(
            peripherals.spi2,
            pins.gpio2,
            pins.gpio3,
            Some(pins.gpio10),
            Some(pins.gpio1),
            &SpiDriverConfig::default(),
            &spi_config,
        )?;
        let reader = Mfrc522Reader::new(spi)?;

        // ─── Núcleo ───

        let rt = Runtime::new(
            Box::new(SystemClock::new()),
            Box::new(button),
            Box::new(inbox),
            dns,
            setup,
        )
        .with_hold_ms(timings.reset_hold_ms)
        .with_slice_ms(timings.slice_ms);

        let net = Network::new(
            Box::new(link),
            Box::new(EspHttpTransport::new(HTTP_TIMEOUT)),
            RTDB_BASE_URL,
            timings.connect_timeout_ms,
        );

        let devices = Devices {
            effectors: Box::new(outputs),
            gnss: Box::new(UartGnss::new(uart)),
            reader: Box::new(reader),
        };

        info!("Entering main loop...");
        let mut supervisor = Supervisor::new(rt, net, devices, timings);
        Ok(supervisor.run())
    }
}
