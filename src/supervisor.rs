// ─── Supervisor: la máquina de estados del dispositivo ───
//
//   BOOTING ──sin config──▶ UNCONFIGURED ──setup arriba──▶ PROVISIONING
//      │                                                      │ save ok
//      │                                                      ▼
//      └──config válida──▶ UPLOADING ──7/7 items──▶ RUNNING   reinicio
//
//   cualquier estado ──botón ≥3 s──▶ RESETTING ──storage borrado──▶ reinicio
//
// Las transiciones son una función total de (estado, evento). La exclusión
// entre fases (UPLOADING vs RUNNING, setup vs reset) la da el estado, no
// un lock: hay un solo contexto de ejecución.

use log::{error, info, warn};

use crate::access::AccessControlEngine;
use crate::config::DeviceConfig;
use crate::error::Interrupt;
use crate::indicator::AmbientPattern;
use crate::ports::{CardReader, Effectors, FixSource};
use crate::remote::Network;
use crate::runtime::Runtime;
use crate::settings::Timings;
use crate::telemetry::TelemetryPublisher;
use crate::upload::{UploadManager, UploadProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Booting,
    Unconfigured,
    /// Subestado de UNCONFIGURED con la superficie de setup expuesta.
    Provisioning,
    Uploading,
    Running,
    Resetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    NoConfiguration,
    ConfigurationLoaded,
    SetupSurfaceUp,
    UploadComplete,
    Saved,
    ResetHeld,
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enter(State),
    Restart,
    Stay,
}

impl State {
    pub fn on(self, event: Event) -> Transition {
        use Event::*;
        use State::*;

        match (self, event) {
            (Resetting, Cleared) => Transition::Restart,
            (Resetting, _) => Transition::Stay,
            (_, ResetHeld) => Transition::Enter(Resetting),
            (Booting, NoConfiguration) => Transition::Enter(Unconfigured),
            (Booting, ConfigurationLoaded) => Transition::Enter(Uploading),
            (Unconfigured, SetupSurfaceUp) => Transition::Enter(Provisioning),
            (Provisioning, Saved) => Transition::Restart,
            (Uploading, UploadComplete) => Transition::Enter(Running),
            _ => Transition::Stay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Provisioned,
    FactoryReset,
}

/// Periféricos que solo usa el estado RUNNING.
pub struct Devices {
    pub effectors: Box<dyn Effectors>,
    pub gnss: Box<dyn FixSource>,
    pub reader: Box<dyn CardReader>,
}

pub struct Supervisor {
    state: State,
    rt: Runtime,
    net: Network,
    devices: Devices,
    timings: Timings,
    config: Option<DeviceConfig>,
    upload: UploadManager,
    access: AccessControlEngine,
    telemetry: TelemetryPublisher,
    next_telemetry_ms: u64,
}

impl Supervisor {
    pub fn new(rt: Runtime, net: Network, devices: Devices, timings: Timings) -> Self {
        Self {
            state: State::Booting,
            rt,
            net,
            devices,
            access: AccessControlEngine::new(timings.clone()),
            timings,
            config: None,
            upload: UploadManager::new(),
            telemetry: TelemetryPublisher::new(),
            next_telemetry_ms: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> Option<&DeviceConfig> {
        self.config.as_ref()
    }

    pub fn upload_progress(&self) -> &UploadProgress {
        self.upload.progress()
    }

    pub fn telemetry(&self) -> &TelemetryPublisher {
        &self.telemetry
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.rt
    }

    fn apply(&mut self, event: Event) -> Transition {
        let transition = self.state.on(event);
        match transition {
            Transition::Enter(next) => {
                info!("State {:?} → {:?} ({:?})", self.state, next, event);
                self.state = next;
            }
            Transition::Restart => info!("State {:?}: restart ({:?})", self.state, event),
            Transition::Stay => {}
        }
        transition
    }

    /// Lee la configuración y decide la fase de este boot.
    pub fn boot(&mut self) -> State {
        self.upload.reset();
        self.config = match self.rt.setup().store().load() {
            Ok(Some(blob)) => match DeviceConfig::from_blob(&blob) {
                Ok(config) => Some(config),
                Err(e) => {
                    error!("Stored configuration unusable: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!("Configuration storage error: {}", e);
                None
            }
        };

        match &self.config {
            Some(config) => {
                info!("Device is configured, vehicle '{}'", config.vehicle);
                self.apply(Event::ConfigurationLoaded);
            }
            None => {
                warn!("Device not configured!");
                self.apply(Event::NoConfiguration);
                self.apply(Event::SetupSurfaceUp);
            }
        }
        self.state
    }

    /// Una pasada del estado actual. `Some` = hay que reiniciar.
    pub fn tick(&mut self) -> Option<RestartReason> {
        let result = match self.state {
            State::Booting => {
                self.boot();
                Ok(())
            }
            State::Unconfigured => {
                self.apply(Event::SetupSurfaceUp);
                Ok(())
            }
            State::Provisioning => self.rt.wait(self.timings.loop_pause_ms),
            State::Uploading => self.upload_step(),
            State::Running => self.running_step(),
            State::Resetting => return Some(self.factory_reset()),
        };

        match result {
            Ok(()) => None,
            Err(Interrupt::FactoryReset) => {
                self.apply(Event::ResetHeld);
                Some(self.factory_reset())
            }
            Err(Interrupt::Provisioned) => match self.apply(Event::Saved) {
                Transition::Restart => Some(RestartReason::Provisioned),
                _ => {
                    warn!("Configuration saved outside provisioning, ignoring");
                    None
                }
            },
        }
    }

    /// Corre hasta que haga falta reiniciar.
    pub fn run(&mut self) -> RestartReason {
        loop {
            if let Some(reason) = self.tick() {
                return reason;
            }
        }
    }

    fn upload_step(&mut self) -> Result<(), Interrupt> {
        let Some(config) = self.config.as_ref() else {
            error!("Uploading without configuration");
            return self.rt.wait(self.timings.upload_backoff_ms);
        };

        if self.upload.run_cycle(&mut self.rt, &mut self.net, config)? {
            info!("One-time upload complete");
            self.apply(Event::UploadComplete);
            return Ok(());
        }

        self.rt.wait(self.timings.upload_backoff_ms)
    }

    fn running_step(&mut self) -> Result<(), Interrupt> {
        let Some(config) = self.config.as_ref() else {
            error!("Running without configuration");
            return self.rt.wait(self.timings.loop_pause_ms);
        };

        if let Some(uid) = self.devices.reader.poll_card() {
            self.access.handle_card(
                &uid,
                &mut self.rt,
                &mut self.net,
                self.devices.effectors.as_mut(),
                config,
            )?;
        }

        let fix = self.devices.gnss.latest();
        if self.rt.now_ms() >= self.next_telemetry_ms {
            self.telemetry.publish(
                &mut self.rt,
                &mut self.net,
                config,
                &fix,
                self.access.last_card(),
            )?;
            self.next_telemetry_ms = self.rt.now_ms() + self.timings.telemetry_interval_ms;
        }

        let (red, green) = AmbientPattern::for_fix(fix.has_location()).levels(self.rt.now_ms());
        self.devices.effectors.set_indicators(red, green);

        self.rt.wait(self.timings.loop_pause_ms)
    }

    fn factory_reset(&mut self) -> RestartReason {
        warn!("Factory reset: clearing configuration");
        if let Err(e) = self.rt.setup_mut().store_mut().clear() {
            error!("Failed to clear configuration: {}", e);
        }
        self.upload.reset();
        self.config = None;
        self.devices.effectors.set_indicators(false, false);
        self.devices.effectors.set_buzzer(false);
        self.apply(Event::Cleared);
        RestartReason::FactoryReset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table() {
        use Event::*;
        use State::*;

        assert_eq!(Booting.on(NoConfiguration), Transition::Enter(Unconfigured));
        assert_eq!(Booting.on(ConfigurationLoaded), Transition::Enter(Uploading));
        assert_eq!(Unconfigured.on(SetupSurfaceUp), Transition::Enter(Provisioning));
        assert_eq!(Provisioning.on(Saved), Transition::Restart);
        assert_eq!(Uploading.on(UploadComplete), Transition::Enter(Running));
        assert_eq!(Resetting.on(Cleared), Transition::Restart);
    }

    #[test]
    fn reset_is_reachable_from_every_state() {
        for s in [State::Booting, State::Unconfigured, State::Provisioning, State::Uploading, State::Running] {
            assert_eq!(s.on(Event::ResetHeld), Transition::Enter(State::Resetting));
        }
        assert_eq!(State::Resetting.on(Event::ResetHeld), Transition::Stay);
    }

    #[test]
    fn running_never_goes_back_to_uploading() {
        let all = [
            Event::NoConfiguration,
            Event::ConfigurationLoaded,
            Event::SetupSurfaceUp,
            Event::UploadComplete,
            Event::Saved,
            Event::Cleared,
        ];
        for e in all {
            assert_eq!(State::Running.on(e), Transition::Stay, "{e:?}");
        }
        assert_eq!(State::Uploading.on(Event::Saved), Transition::Stay);
    }
}
