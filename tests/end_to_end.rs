// Ciclo de vida completo contra los ports en memoria: setup → reinicio →
// upload → RUNNING, y factory reset desde cualquier fase.

use rfid_tracker::config::DeviceConfig;
use rfid_tracker::config_store::{ConfigStore, REGION_CAPACITY};
use rfid_tracker::gnss::{Location, PositioningFix};
use rfid_tracker::ports::HttpMethod;
use rfid_tracker::sim::EffectorEvent;
use rfid_tracker::provisioning::{Method, SetupRequest, SetupSurface};
use rfid_tracker::runtime::Runtime;
use rfid_tracker::settings::Timings;
use rfid_tracker::sim::{
    FixedFix, ManualClock, MemRegion, NoDns, QueuedCards, QueuedInbox, RecordingEffectors,
    ScriptedButton, ScriptedTransport, SimLink,
};
use rfid_tracker::remote::Network;
use rfid_tracker::supervisor::{Devices, RestartReason, State, Supervisor};

const BASE: &str = "https://db.test";
const VEHICLE_PREFIX: &str = "https://db.test/data/GJ-01-1234/";

const SETUP_FORM: &str = "veh=GJ-01-1234&imei=IMEI123456789&rtmp1=rtmp%3A%2F%2Fa%2F1\
    &rtmp2=rtmp%3A%2F%2Fa%2F2&rtmp3=&rtmp4=&wifi_ssid=home&wifi_pass=secret12";

/// Hardware simulado que sobrevive a los "reinicios".
struct Board {
    region: MemRegion,
    clock: ManualClock,
    button: ScriptedButton,
    inbox: QueuedInbox,
    link: SimLink,
    http: ScriptedTransport,
    fx: RecordingEffectors,
    gnss: FixedFix,
    cards: QueuedCards,
}

impl Board {
    fn new(connected: bool) -> Self {
        let clock = ManualClock::new();
        Self {
            region: MemRegion::new(REGION_CAPACITY),
            button: ScriptedButton::new(&clock),
            fx: RecordingEffectors::new(&clock),
            clock,
            inbox: QueuedInbox::new(),
            link: SimLink::new(connected),
            http: ScriptedTransport::new(),
            gnss: FixedFix::new(),
            cards: QueuedCards::new(),
        }
    }

    /// Equivalente a un boot: supervisor nuevo sobre el mismo hardware.
    fn power_on(&self) -> Supervisor {
        let timings = Timings::default();
        let store = ConfigStore::new(Box::new(self.region.clone()));
        let rt = Runtime::new(
            Box::new(self.clock.clone()),
            Box::new(self.button.clone()),
            Box::new(self.inbox.clone()),
            Box::new(NoDns),
            SetupSurface::new(store),
        )
        .with_hold_ms(timings.reset_hold_ms)
        .with_slice_ms(timings.slice_ms);
        let net = Network::new(
            Box::new(self.link.clone()),
            Box::new(self.http.clone()),
            BASE,
            timings.connect_timeout_ms,
        );
        let devices = Devices {
            effectors: Box::new(self.fx.clone()),
            gnss: Box::new(self.gnss.clone()),
            reader: Box::new(self.cards.clone()),
        };
        Supervisor::new(rt, net, devices, timings)
    }

    fn store_config(&self, config: &DeviceConfig) {
        let mut store = ConfigStore::new(Box::new(self.region.clone()));
        store.save(&config.to_blob()).unwrap();
    }
}

fn example_config() -> DeviceConfig {
    DeviceConfig {
        vehicle: "GJ-01-1234".into(),
        imei: "IMEI123456789".into(),
        streams: [
            "rtmp://a/1".into(),
            "rtmp://a/2".into(),
            String::new(),
            String::new(),
        ],
        wifi_ssid: "home".into(),
        wifi_pass: "secret12".into(),
    }
}

fn post_save(body: &str) -> SetupRequest {
    SetupRequest {
        method: Method::Post,
        path: "/save".into(),
        host: Some("192.168.4.1".into()),
        body: body.as_bytes().to_vec(),
    }
}

fn tick_until(sup: &mut Supervisor, state: State, max_ticks: usize) {
    for _ in 0..max_ticks {
        if sup.state() == state {
            return;
        }
        assert_eq!(sup.tick(), None);
    }
    assert_eq!(sup.state(), state);
}

#[test]
fn setup_then_restart_uploads_seven_documents_and_runs() {
    let board = Board::new(true);

    let mut sup = board.power_on();
    assert_eq!(sup.boot(), State::Provisioning);

    let reply = board.inbox.push(post_save(SETUP_FORM));
    assert_eq!(sup.run(), RestartReason::Provisioned);
    assert_eq!(reply.borrow().as_ref().map(|r| r.status), Some(200));
    // Nada sale a la red durante el setup
    assert!(board.http.requests().is_empty());

    let mut sup = board.power_on();
    assert_eq!(sup.boot(), State::Uploading);
    assert_eq!(sup.config(), Some(&example_config()));

    assert_eq!(sup.tick(), None);
    assert_eq!(sup.state(), State::Running);
    assert!(sup.upload_progress().is_complete());

    let puts = board.http.requests();
    assert_eq!(puts.len(), 7);
    assert!(puts.iter().all(|q| q.method == HttpMethod::Put));
    assert!(puts.iter().all(|q| q.url.starts_with(VEHICLE_PREFIX)));
    let doc = |name: &str| board.http.document(&format!("{VEHICLE_PREFIX}{name}.json"));
    assert_eq!(doc("vehnum").as_deref(), Some("\"GJ-01-1234\""));
    assert_eq!(doc("imei").as_deref(), Some("\"IMEI123456789\""));
    assert_eq!(doc("rtmp1").as_deref(), Some("\"rtmp://a/1\""));
    assert_eq!(doc("rtmp4").as_deref(), Some("\"\""));
    assert!(doc("timestampz").is_some());

    // Primera vuelta de RUNNING: telemetría inmediata
    board.http.clear_requests();
    assert_eq!(sup.tick(), None);
    let location = doc("location").unwrap();
    assert!(location.contains("\"lat\":\"\""));
    assert_eq!(sup.telemetry().published(), 1);
}

#[test]
fn upload_retries_until_network_comes_back() {
    let board = Board::new(false);
    board.store_config(&example_config());

    let mut sup = board.power_on();
    assert_eq!(sup.boot(), State::Uploading);

    assert_eq!(sup.tick(), None);
    assert_eq!(sup.state(), State::Uploading);
    assert_eq!(sup.upload_progress().completed_count(), 0);
    assert_eq!(board.link.attempts(), 1);

    board.link.accept_connects(true);
    tick_until(&mut sup, State::Running, 3);
    assert_eq!(board.http.requests().len(), 7);
}

#[test]
fn running_state_never_uploads_again() {
    let board = Board::new(true);
    board.store_config(&example_config());

    let mut sup = board.power_on();
    sup.boot();
    tick_until(&mut sup, State::Running, 2);
    board.http.clear_requests();

    for _ in 0..200 {
        assert_eq!(sup.tick(), None);
    }
    assert_eq!(sup.state(), State::Running);
    assert!(board
        .http
        .requests()
        .iter()
        .all(|q| q.url.ends_with("/location.json")));
}

#[test]
fn authorized_card_energizes_output_while_running() {
    let board = Board::new(true);
    board.store_config(&example_config());
    board.http.set_document(
        &format!("{VEHICLE_PREFIX}rfid_data.json"),
        r#"{"uid1":"DE AD BE EF","uid2":"","uid3":"","uid4":""}"#,
    );

    let mut sup = board.power_on();
    sup.boot();
    tick_until(&mut sup, State::Running, 2);

    board.cards.present(&[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(sup.tick(), None);
    assert_eq!(board.fx.output_changes(), vec![true]);

    let result = board
        .http
        .document(&format!("{VEHICLE_PREFIX}rfid_data.json"))
        .unwrap();
    assert!(result.contains("\"current\":\"DE AD BE EF\""));
    assert!(result.contains("\"status\":\"1\""));

    // La telemetría siguiente lleva la tarjeta
    board.clock.advance(Timings::default().telemetry_interval_ms);
    assert_eq!(sup.tick(), None);
    let location = board
        .http
        .document(&format!("{VEHICLE_PREFIX}location.json"))
        .unwrap();
    assert!(location.contains("\"UID\":\"DE AD BE EF\""));
}

#[test]
fn ambient_indicators_follow_the_fix() {
    let board = Board::new(true);
    board.store_config(&example_config());
    let mut sup = board.power_on();
    sup.boot();
    tick_until(&mut sup, State::Running, 2);

    board.gnss.set(PositioningFix {
        location: Some(Location { lat: 1.0, lon: 2.0 }),
        ..Default::default()
    });
    assert_eq!(sup.tick(), None);
    let (red, green) = board.fx.last_indicators().unwrap();
    assert_ne!(red, green);
}

#[test]
fn card_feedback_gives_way_to_the_ambient_pattern() {
    let board = Board::new(true);
    board.store_config(&example_config());
    board.http.set_document(
        &format!("{VEHICLE_PREFIX}rfid_data.json"),
        r#"{"uid1":"DE AD BE EF","uid2":"","uid3":"","uid4":""}"#,
    );
    let mut sup = board.power_on();
    sup.boot();
    tick_until(&mut sup, State::Running, 2);

    // Sin fix el patrón ambiente enciende ambos juntos; el feedback de
    // tarjeta es solo verde
    for uid in [[0xDE, 0xAD, 0xBE, 0xEF], [0x01, 0x02, 0x03, 0x04]] {
        board.fx.clear();
        board.cards.present(&uid);
        assert_eq!(sup.tick(), None);

        let feedback = EffectorEvent::Indicators {
            red: false,
            green: true,
        };
        assert!(board.fx.events().iter().any(|(_, e)| *e == feedback));
        let (red, green) = board.fx.last_indicators().unwrap();
        assert_eq!(red, green);
    }
}

#[test]
fn upload_retries_on_a_fixed_backoff() {
    let board = Board::new(true);
    board.store_config(&example_config());
    board.http.fail_matching("rtmp3");
    let backoff = Timings::default().upload_backoff_ms;

    let mut sup = board.power_on();
    sup.boot();
    let mut attempts_at = Vec::new();
    for _ in 0..4 {
        let before = board.http.requests().len();
        assert_eq!(sup.tick(), None);
        assert_eq!(sup.state(), State::Uploading);
        assert!(board.http.requests().len() > before);
        attempts_at.push(board.clock.now());
    }

    let gaps: Vec<u64> = attempts_at.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps, vec![backoff; 3]);
    // Solo lo pendiente se reintenta
    assert_eq!(sup.upload_progress().completed_count(), 6);
    assert_eq!(board.http.requests().len(), 7 + 3);
}

#[test]
fn factory_reset_while_running_clears_everything() {
    let board = Board::new(true);
    board.store_config(&example_config());

    let mut sup = board.power_on();
    sup.boot();
    tick_until(&mut sup, State::Running, 2);

    board.button.press_from(board.clock.now());
    assert_eq!(sup.run(), RestartReason::FactoryReset);
    assert!(board.region.committed().iter().all(|b| *b == 0));
    assert!(!sup.upload_progress().is_complete());
    assert!(sup.config().is_none());

    board.button.release();
    let mut sup = board.power_on();
    assert_eq!(sup.boot(), State::Provisioning);
}

#[test]
fn factory_reset_interrupts_upload_backoff() {
    let board = Board::new(false);
    board.store_config(&example_config());

    let mut sup = board.power_on();
    sup.boot();
    board.button.press_from(board.clock.now() + 500);
    assert_eq!(sup.run(), RestartReason::FactoryReset);
    // Se detecta dentro de la espera, no al final de un ciclo
    assert!(board.clock.now() < 500 + 3_000 + 100);
}

#[test]
fn short_press_does_not_reset() {
    let board = Board::new(true);
    board.store_config(&example_config());

    let mut sup = board.power_on();
    sup.boot();
    tick_until(&mut sup, State::Running, 2);

    let now = board.clock.now();
    board.button.press_between(now, now + 2_000);
    for _ in 0..100 {
        assert_eq!(sup.tick(), None);
    }
    assert_eq!(sup.state(), State::Running);
    assert!(ConfigStore::new(Box::new(board.region.clone()))
        .load()
        .unwrap()
        .is_some());
}

#[test]
fn setup_form_is_refused_once_configured() {
    let board = Board::new(true);
    board.store_config(&example_config());

    let mut sup = board.power_on();
    sup.boot();
    let reply = board.inbox.push(post_save(SETUP_FORM));
    assert_eq!(sup.tick(), None);
    assert_eq!(reply.borrow().as_ref().map(|r| r.status), Some(409));
}
