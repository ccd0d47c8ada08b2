// ─── Detector de pulsación larga del botón de reset ───
//
// IDLE → PRESSED(desde) → FIRED (enganchado hasta soltar)
//
// Solo depende de los timestamps que recibe, no de cada cuánto lo
// llamen: un loop lento igual dispara a los 3 s de mantenerlo.

pub const RESET_HOLD_MS: u64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldState {
    Idle,
    Pressed { since_ms: u64 },
    Fired,
}

#[derive(Debug, Clone)]
pub struct HoldDetector {
    hold_ms: u64,
    state: HoldState,
}

impl HoldDetector {
    pub fn new(hold_ms: u64) -> Self {
        Self {
            hold_ms,
            state: HoldState::Idle,
        }
    }

    /// Devuelve `true` una sola vez por pulsación, al cumplirse el tiempo.
    pub fn update(&mut self, pressed: bool, now_ms: u64) -> bool {
        match (self.state, pressed) {
            (_, false) => {
                self.state = HoldState::Idle;
                false
            }
            (HoldState::Idle, true) => {
                self.state = HoldState::Pressed { since_ms: now_ms };
                self.hold_ms == 0
            }
            (HoldState::Pressed { since_ms }, true) => {
                if now_ms.saturating_sub(since_ms) >= self.hold_ms {
                    self.state = HoldState::Fired;
                    true
                } else {
                    false
                }
            }
            (HoldState::Fired, true) => false,
        }
    }
}

impl Default for HoldDetector {
    fn default() -> Self {
        Self::new(RESET_HOLD_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_after_hold_time() {
        let mut d = HoldDetector::default();
        assert!(!d.update(true, 1_000));
        assert!(!d.update(true, 3_999));
        assert!(d.update(true, 4_000));
        assert!(!d.update(true, 9_000));
    }

    #[test]
    fn release_resets_the_timer() {
        let mut d = HoldDetector::default();
        d.update(true, 0);
        d.update(true, 2_900);
        d.update(false, 2_950);
        assert!(!d.update(true, 3_100));
        assert!(!d.update(true, 6_000));
        assert!(d.update(true, 6_100));
    }

    #[test]
    fn sparse_polling_still_fires() {
        let mut d = HoldDetector::default();
        d.update(true, 10);
        assert!(d.update(true, 60_000));
    }
}
