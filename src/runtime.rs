// ─── Runtime cooperativo ───
//
// Un solo contexto de ejecución. Toda espera del sistema (conexión WiFi,
// backoff del upload, pulsos de feedback) pasa por Runtime::wait(), que
// en cada vuelta:
//   1. atiende el DNS captive
//   2. responde los requests de setup encolados
//   3. consulta el botón de reset
//
// Si hay que reiniciar (reset mantenido o setup guardado) wait() retorna
// Err(Interrupt) y el `?` lo propaga hasta el Supervisor.

use log::warn;

use crate::button::HoldDetector;
use crate::error::Interrupt;
use crate::ports::{CaptiveDns, Clock, ResetButton, SetupInbox};
use crate::provisioning::{SetupOutcome, SetupSurface};

/// Duración máxima de un sleep dentro de una espera.
pub const DEFAULT_SLICE_MS: u64 = 20;

pub struct Runtime {
    clock: Box<dyn Clock>,
    button: Box<dyn ResetButton>,
    hold: HoldDetector,
    inbox: Box<dyn SetupInbox>,
    dns: Box<dyn CaptiveDns>,
    setup: SetupSurface,
    slice_ms: u64,
}

impl Runtime {
    pub fn new(
        clock: Box<dyn Clock>,
        button: Box<dyn ResetButton>,
        inbox: Box<dyn SetupInbox>,
        dns: Box<dyn CaptiveDns>,
        setup: SetupSurface,
    ) -> Self {
        Self {
            clock,
            button,
            hold: HoldDetector::default(),
            inbox,
            dns,
            setup,
            slice_ms: DEFAULT_SLICE_MS,
        }
    }

    pub fn with_hold_ms(mut self, hold_ms: u64) -> Self {
        self.hold = HoldDetector::new(hold_ms);
        self
    }

    pub fn with_slice_ms(mut self, slice_ms: u64) -> Self {
        self.slice_ms = slice_ms.max(1);
        self
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn epoch_secs(&self) -> Option<u64> {
        self.clock.epoch_secs()
    }

    pub fn slice_ms(&self) -> u64 {
        self.slice_ms
    }

    pub fn setup(&self) -> &SetupSurface {
        &self.setup
    }

    pub fn setup_mut(&mut self) -> &mut SetupSurface {
        &mut self.setup
    }

    /// Una pasada de las tareas de fondo.
    pub fn poll(&mut self) -> Result<(), Interrupt> {
        self.dns.service();

        while let Some(exchange) = self.inbox.next() {
            let (response, outcome) = self.setup.handle(&exchange.request);
            // Responder antes de reiniciar: el navegador ve la página de éxito
            (exchange.reply)(response);
            if outcome == SetupOutcome::Saved {
                return Err(Interrupt::Provisioned);
            }
        }

        let pressed = self.button.is_pressed();
        if self.hold.update(pressed, self.clock.now_ms()) {
            warn!("Reset button held, factory reset requested");
            return Err(Interrupt::FactoryReset);
        }
        Ok(())
    }

    /// Espera acotada que sigue atendiendo setup, DNS y botón.
    pub fn wait(&mut self, duration_ms: u64) -> Result<(), Interrupt> {
        let start = self.clock.now_ms();
        loop {
            self.poll()?;
            let elapsed = self.clock.now_ms().saturating_sub(start);
            if elapsed >= duration_ms {
                return Ok(());
            }
            let nap = (duration_ms - elapsed).min(self.slice_ms);
            // nap ≤ slice_ms, que es chico
            self.clock.sleep_ms(nap as u32);
        }
    }
}
