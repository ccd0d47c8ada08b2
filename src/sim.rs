//! Implementaciones en memoria de los ports.
//!
//! Sirven para los tests del núcleo y para correr la máquina de estados en
//! el host. Cada tipo es un handle barato de clonar (`Rc` adentro): el test
//! se queda con un clon para inspeccionar lo que el núcleo hizo con el otro.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::error::{NetworkError, StorageError};
use crate::gnss::PositioningFix;
use crate::ports::{
    CaptiveDns, CardReader, Clock, Effectors, FixSource, HttpMethod, HttpReply, HttpTransport,
    NetworkLink, Region, ResetButton, SetupExchange, SetupInbox,
};
use crate::provisioning::{SetupRequest, SetupResponse};

// ─── Region ───

#[derive(Debug, Default)]
struct RegionState {
    pending: Vec<u8>,
    committed: Vec<u8>,
    fail_commits: bool,
    commits: u32,
}

/// Región tipo EEPROM: buffer en RAM + imagen "en flash" tras commit.
#[derive(Debug, Clone, Default)]
pub struct MemRegion {
    state: Rc<RefCell<RegionState>>,
}

impl MemRegion {
    pub fn new(capacity: usize) -> Self {
        let state = RegionState {
            pending: vec![0; capacity],
            committed: vec![0; capacity],
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn committed(&self) -> Vec<u8> {
        self.state.borrow().committed.clone()
    }

    pub fn set_committed(&self, image: &[u8]) {
        let mut s = self.state.borrow_mut();
        s.committed = image.to_vec();
        s.pending = image.to_vec();
    }

    pub fn fail_commits(&self, fail: bool) {
        self.state.borrow_mut().fail_commits = fail;
    }

    pub fn commits(&self) -> u32 {
        self.state.borrow().commits
    }

    fn bounds(&self, offset: usize, len: usize) -> Result<(), StorageError> {
        let capacity = self.capacity();
        if offset.checked_add(len).map_or(true, |end| end > capacity) {
            return Err(StorageError::OutOfBounds {
                offset,
                len,
                capacity,
            });
        }
        Ok(())
    }
}

impl Region for MemRegion {
    fn capacity(&self) -> usize {
        self.state.borrow().pending.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.bounds(offset, buf.len())?;
        buf.copy_from_slice(&self.state.borrow().pending[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        self.bounds(offset, data.len())?;
        self.state.borrow_mut().pending[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let mut s = self.state.borrow_mut();
        if s.fail_commits {
            s.pending = s.committed.clone();
            return Err(StorageError::Device("simulated commit failure".into()));
        }
        s.committed = s.pending.clone();
        s.commits += 1;
        Ok(())
    }
}

// ─── Clock ───

/// Reloj manual: `sleep_ms` avanza el tiempo en vez de dormir.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
    epoch_at_boot: Rc<Cell<Option<u64>>>,
    sleeps: Rc<RefCell<Vec<u32>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    /// Sincroniza el reloj de pared: `epoch` es la hora Unix en el boot.
    pub fn set_epoch_at_boot(&self, epoch: Option<u64>) {
        self.epoch_at_boot.set(epoch);
    }

    pub fn sleeps(&self) -> Vec<u32> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn sleep_ms(&self, ms: u32) {
        self.sleeps.borrow_mut().push(ms);
        self.advance(u64::from(ms));
    }

    fn epoch_secs(&self) -> Option<u64> {
        self.epoch_at_boot.get().map(|base| base + self.now.get() / 1_000)
    }
}

// ─── Botón ───

/// Botón presionado dentro de una ventana de tiempo del reloj manual.
#[derive(Debug, Clone)]
pub struct ScriptedButton {
    clock: ManualClock,
    window: Rc<Cell<Option<(u64, u64)>>>,
}

impl ScriptedButton {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            window: Rc::new(Cell::new(None)),
        }
    }

    pub fn press_from(&self, from_ms: u64) {
        self.window.set(Some((from_ms, u64::MAX)));
    }

    pub fn press_between(&self, from_ms: u64, until_ms: u64) {
        self.window.set(Some((from_ms, until_ms)));
    }

    pub fn release(&self) {
        self.window.set(None);
    }
}

impl ResetButton for ScriptedButton {
    fn is_pressed(&mut self) -> bool {
        let now = self.clock.now();
        self.window
            .get()
            .map_or(false, |(from, until)| now >= from && now < until)
    }
}

// ─── Efectores ───

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectorEvent {
    Output(bool),
    Indicators { red: bool, green: bool },
    Buzzer(bool),
}

/// Graba cada cambio de salida con su timestamp.
#[derive(Debug, Clone)]
pub struct RecordingEffectors {
    clock: ManualClock,
    events: Rc<RefCell<Vec<(u64, EffectorEvent)>>>,
}

impl RecordingEffectors {
    pub fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            events: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<(u64, EffectorEvent)> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// Todos los cambios del relay, en orden.
    pub fn output_changes(&self) -> Vec<bool> {
        self.events
            .borrow()
            .iter()
            .filter_map(|(_, e)| match e {
                EffectorEvent::Output(on) => Some(*on),
                _ => None,
            })
            .collect()
    }

    /// Duración de cada pulso del buzzer (encendido → apagado).
    pub fn buzzer_pulses(&self) -> Vec<u64> {
        let mut pulses = Vec::new();
        let mut on_since = None;
        for (at, e) in self.events.borrow().iter() {
            match (e, on_since) {
                (EffectorEvent::Buzzer(true), None) => on_since = Some(*at),
                (EffectorEvent::Buzzer(false), Some(since)) => {
                    pulses.push(at - since);
                    on_since = None;
                }
                _ => {}
            }
        }
        pulses
    }

    pub fn last_indicators(&self) -> Option<(bool, bool)> {
        self.events.borrow().iter().rev().find_map(|(_, e)| match e {
            EffectorEvent::Indicators { red, green } => Some((*red, *green)),
            _ => None,
        })
    }

    fn record(&self, event: EffectorEvent) {
        self.events.borrow_mut().push((self.clock.now(), event));
    }
}

impl Effectors for RecordingEffectors {
    fn set_output(&mut self, energized: bool) {
        self.record(EffectorEvent::Output(energized));
    }

    fn set_indicators(&mut self, red: bool, green: bool) {
        self.record(EffectorEvent::Indicators { red, green });
    }

    fn set_buzzer(&mut self, on: bool) {
        self.record(EffectorEvent::Buzzer(on));
    }
}

// ─── Red ───

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    accept_connects: bool,
    attempts: u32,
    last_ssid: String,
}

/// Link WiFi simulado: conecta al instante si `accept_connects`.
#[derive(Debug, Clone, Default)]
pub struct SimLink {
    state: Rc<RefCell<LinkState>>,
}

impl SimLink {
    pub fn new(connected: bool) -> Self {
        let link = Self::default();
        link.state.borrow_mut().connected = connected;
        link
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.borrow_mut().connected = connected;
    }

    pub fn accept_connects(&self, accept: bool) {
        self.state.borrow_mut().accept_connects = accept;
    }

    pub fn attempts(&self) -> u32 {
        self.state.borrow().attempts
    }

    pub fn last_ssid(&self) -> String {
        self.state.borrow().last_ssid.clone()
    }
}

impl NetworkLink for SimLink {
    fn is_connected(&mut self) -> bool {
        self.state.borrow().connected
    }

    fn begin_connect(&mut self, ssid: &str, _password: &str) -> Result<(), NetworkError> {
        let mut s = self.state.borrow_mut();
        s.attempts += 1;
        s.last_ssid = ssid.to_string();
        if s.accept_connects {
            s.connected = true;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<String>,
}

#[derive(Debug, Default)]
struct TransportState {
    docs: HashMap<String, String>,
    failing: Vec<String>,
    offline: bool,
    requests: Vec<RecordedRequest>,
}

/// Document store en memoria: PUT guarda, GET devuelve o `null`.
///
/// URLs que contienen alguno de los patrones de `fail_matching`
/// responden 500.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Rc<RefCell<TransportState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_document(&self, url: &str, body: &str) {
        self.state
            .borrow_mut()
            .docs
            .insert(url.to_string(), body.to_string());
    }

    pub fn document(&self, url: &str) -> Option<String> {
        self.state.borrow().docs.get(url).cloned()
    }

    pub fn fail_matching(&self, pattern: &str) {
        self.state.borrow_mut().failing.push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failing.clear();
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.borrow_mut().offline = offline;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.borrow().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.borrow_mut().requests.clear();
    }
}

impl HttpTransport for ScriptedTransport {
    fn request(
        &mut self,
        method: HttpMethod,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpReply, NetworkError> {
        let mut s = self.state.borrow_mut();
        let body = body.map(|b| String::from_utf8_lossy(b).into_owned());
        s.requests.push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.clone(),
        });

        if s.offline {
            return Err(NetworkError::Transport("simulated offline".into()));
        }
        if s.failing.iter().any(|p| url.contains(p.as_str())) {
            return Ok(HttpReply {
                status: 500,
                body: "{\"error\":\"simulated\"}".into(),
            });
        }

        match method {
            HttpMethod::Put => {
                let body = body.unwrap_or_default();
                s.docs.insert(url.to_string(), body.clone());
                Ok(HttpReply { status: 200, body })
            }
            HttpMethod::Get => Ok(HttpReply {
                status: 200,
                body: s.docs.get(url).cloned().unwrap_or_else(|| "null".into()),
            }),
        }
    }
}

// ─── Setup inbox y DNS ───

pub type ReplySlot = Rc<RefCell<Option<SetupResponse>>>;

#[derive(Clone, Default)]
pub struct QueuedInbox {
    queue: Rc<RefCell<VecDeque<SetupExchange>>>,
}

impl QueuedInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encola un request; la respuesta aparece en el slot devuelto.
    pub fn push(&self, request: SetupRequest) -> ReplySlot {
        let slot: ReplySlot = Rc::new(RefCell::new(None));
        let out = slot.clone();
        self.queue.borrow_mut().push_back(SetupExchange {
            request,
            reply: Box::new(move |response| *out.borrow_mut() = Some(response)),
        });
        slot
    }
}

impl SetupInbox for QueuedInbox {
    fn next(&mut self) -> Option<SetupExchange> {
        self.queue.borrow_mut().pop_front()
    }
}

/// Sin access point no hay DNS captive que atender.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDns;

impl CaptiveDns for NoDns {
    fn service(&mut self) {}
}

// ─── GNSS y lector RFID ───

#[derive(Debug, Clone, Default)]
pub struct FixedFix {
    fix: Rc<Cell<PositioningFix>>,
}

impl FixedFix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, fix: PositioningFix) {
        self.fix.set(fix);
    }
}

impl FixSource for FixedFix {
    fn latest(&mut self) -> PositioningFix {
        self.fix.get()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueuedCards {
    queue: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

impl QueuedCards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(&self, uid: &[u8]) {
        self.queue.borrow_mut().push_back(uid.to_vec());
    }
}

impl CardReader for QueuedCards {
    fn poll_card(&mut self) -> Option<Vec<u8>> {
        self.queue.borrow_mut().pop_front()
    }
}
