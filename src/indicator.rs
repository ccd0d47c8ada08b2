// ─── Patrón ambiente de los indicadores ───
//
// Con posición válida: rojo y verde alternan.
// Sin posición: ambos parpadean juntos (alerta).
//
// Se recalcula en cada vuelta del loop a partir del reloj, así que el
// feedback transitorio de una tarjeta siempre queda pisado por el patrón
// que corresponde apenas termina.

pub const BLINK_PERIOD_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientPattern {
    /// Fix válido: alternado rojo/verde.
    Alternate,
    /// Sin fix: ambos indicadores en alerta.
    Alert,
}

impl AmbientPattern {
    pub fn for_fix(has_location: bool) -> Self {
        if has_location {
            Self::Alternate
        } else {
            Self::Alert
        }
    }

    /// Estado (rojo, verde) en el instante `now_ms`.
    pub fn levels(self, now_ms: u64) -> (bool, bool) {
        let phase = (now_ms / BLINK_PERIOD_MS) % 2 == 0;
        match self {
            Self::Alternate => (phase, !phase),
            Self::Alert => (phase, phase),
        }
    }
}
