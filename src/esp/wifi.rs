// ─── WiFi: Station para operar, Access Point para el setup ───
//
// Un solo radio, un solo modo por boot:
// - sin configuración → Access Point propio en 192.168.4.1
// - con configuración → Station contra la red del usuario
//
// En Station la conexión NO bloquea: begin_connect() arranca el intento
// y el núcleo consulta is_connected() mientras sigue atendiendo el botón.

use std::net::Ipv4Addr;

use anyhow::Result;
use embedded_svc::ipv4 as embedded_ipv4;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::peripheral,
    netif::{EspNetif, NetifConfiguration, NetifStack},
    wifi::{
        AccessPointConfiguration, AuthMethod, BlockingWifi, ClientConfiguration, Configuration,
        EspWifi, WifiDriver,
    },
};
use log::{info, warn};

use rfid_tracker::error::NetworkError;
use rfid_tracker::ports::NetworkLink;

// ─── Configuración del Access Point ───

const AP_CHANNEL: u8 = 1;
const AP_MAX_CONNECTIONS: u16 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Station,
    AccessPoint,
}

/// Driver WiFi vivo. Mientras el Box exista el radio sigue arriba (RAII).
pub struct WifiLink {
    wifi: Box<EspWifi<'static>>,
    mode: Mode,
}

impl WifiLink {
    /// Driver en modo Station, arrancado pero sin conectar.
    pub fn station(
        modem: impl peripheral::Peripheral<P = esp_idf_svc::hal::modem::Modem> + 'static,
        sysloop: EspSystemEventLoop,
    ) -> Result<Self> {
        // None = sin NVS partition (no persistimos config WiFi en flash)
        let mut wifi = Box::new(EspWifi::new(modem, sysloop, None)?);
        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;

        info!("Starting WiFi (station)...");
        wifi.start()?;

        Ok(Self {
            wifi,
            mode: Mode::Station,
        })
    }

    /// Crea la red de setup con IP estática y DHCP server.
    pub fn access_point(
        modem: impl peripheral::Peripheral<P = esp_idf_svc::hal::modem::Modem> + 'static,
        sysloop: EspSystemEventLoop,
        ssid: &str,
        password: &str,
        address: Ipv4Addr,
    ) -> Result<Self> {
        // WifiDriver es el driver de bajo nivel (más control que EspWifi directo)
        let driver = WifiDriver::new(modem, sysloop.clone(), None)?;

        // STA es necesaria internamente aunque no la usemos
        let sta_netif = EspNetif::new(NetifStack::Sta)?;

        let ap_netif_config = NetifConfiguration {
            flags: 0,
            got_ip_event_id: None,
            lost_ip_event_id: None,
            key: "WIFI_AP_DEF"
                .try_into()
                .map_err(|_| anyhow::anyhow!("netif key too long"))?,
            description: "ap"
                .try_into()
                .map_err(|_| anyhow::anyhow!("netif description too long"))?,
            route_priority: 10,
            ip_configuration: Some(embedded_ipv4::Configuration::Router(
                embedded_ipv4::RouterConfiguration {
                    subnet: embedded_ipv4::Subnet {
                        gateway: address,
                        mask: embedded_ipv4::Mask(24),
                    },
                    dhcp_enabled: true,
                    // Los clientes usan nuestro DNS captive
                    dns: Some(address),
                    secondary_dns: None,
                },
            )),
            stack: NetifStack::Ap,
            custom_mac: None,
        };
        let ap_netif = EspNetif::new_with_conf(&ap_netif_config)?;

        let mut wifi = Box::new(EspWifi::wrap_all(driver, sta_netif, ap_netif)?);
        let mut blocking_wifi = BlockingWifi::wrap(wifi.as_mut(), sysloop)?;

        let ap_config = AccessPointConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| anyhow::anyhow!("AP SSID too long"))?,
            password: password
                .try_into()
                .map_err(|_| anyhow::anyhow!("AP password too long"))?,
            channel: AP_CHANNEL,
            auth_method: AuthMethod::WPA2Personal,
            max_connections: AP_MAX_CONNECTIONS,
            ..Default::default()
        };

        blocking_wifi.set_configuration(&Configuration::AccessPoint(ap_config))?;
        blocking_wifi.start()?;
        blocking_wifi.wait_netif_up()?;
        drop(blocking_wifi);

        info!("Access point '{}' up at {}", ssid, address);
        Ok(Self {
            wifi,
            mode: Mode::AccessPoint,
        })
    }
}

impl NetworkLink for WifiLink {
    fn is_connected(&mut self) -> bool {
        self.mode == Mode::Station && self.wifi.is_up().unwrap_or(false)
    }

    fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        if self.mode != Mode::Station {
            return Err(NetworkError::Connect("radio is in access point mode".into()));
        }
        if ssid.is_empty() {
            return Err(NetworkError::Connect("WiFi SSID not configured".into()));
        }

        // Loguear longitud del password (nunca el password en sí)
        info!("WiFi password length: {} bytes", password.len());
        let auth_method = if password.is_empty() {
            info!("WiFi password empty, using open network");
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let client = ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| NetworkError::Connect("SSID too long".into()))?,
            password: password
                .try_into()
                .map_err(|_| NetworkError::Connect("password too long".into()))?,
            auth_method,
            ..Default::default()
        };

        // Cortar un intento anterior que haya quedado a medias
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi disconnect before retry failed: {:?}", e);
        }
        self.wifi
            .set_configuration(&Configuration::Client(client))
            .map_err(|e| NetworkError::Connect(format!("{e:?}")))?;
        // connect() de EspWifi solo dispara el intento; no espera DHCP
        self.wifi
            .connect()
            .map_err(|e| NetworkError::Connect(format!("{e:?}")))?;
        Ok(())
    }
}
