// ─── Fix de posicionamiento + parser NMEA ───
//
// Cada campo del fix tiene su propia validez: un receptor puede tener
// hora y fecha sin posición, o satélites sin altitud. No existe un
// "fix válido" global.
//
// El parser entiende GGA (posición, altitud, satélites, hora) y RMC
// (posición, velocidad, fecha, hora). Sentencias con checksum inválido
// se descartan enteras.

use log::debug;

const KNOTS_TO_KMH: f64 = 1.852;
const MAX_SENTENCE_LEN: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixDate {
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositioningFix {
    pub location: Option<Location>,
    pub altitude_m: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub satellites: Option<u32>,
    pub time: Option<FixTime>,
    pub date: Option<FixDate>,
}

impl PositioningFix {
    pub fn has_location(&self) -> bool {
        self.location.is_some()
    }
}

/// Acumula bytes del UART y actualiza el fix por cada línea completa.
#[derive(Debug, Default)]
pub struct NmeaParser {
    line: String,
    overflow: bool,
    fix: PositioningFix,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fix(&self) -> PositioningFix {
        self.fix
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                b'\n' => {
                    if !self.overflow {
                        let line = std::mem::take(&mut self.line);
                        self.parse_sentence(line.trim_end_matches('\r'));
                    }
                    self.line.clear();
                    self.overflow = false;
                }
                b'$' => {
                    // Inicio de sentencia: descarta basura previa
                    self.line.clear();
                    self.overflow = false;
                    self.line.push('$');
                }
                _ if self.line.len() >= MAX_SENTENCE_LEN => self.overflow = true,
                _ if b.is_ascii() => self.line.push(b as char),
                _ => self.overflow = true,
            }
        }
    }

    fn parse_sentence(&mut self, sentence: &str) {
        let Some(payload) = verify_checksum(sentence) else {
            if !sentence.is_empty() {
                debug!("NMEA: dropping sentence with bad checksum");
            }
            return;
        };

        let fields: Vec<&str> = payload.split(',').collect();
        let kind = fields[0];
        if kind.len() != 5 {
            return;
        }
        match &kind[2..] {
            "GGA" => self.apply_gga(&fields),
            "RMC" => self.apply_rmc(&fields),
            _ => {}
        }
    }

    fn apply_gga(&mut self, f: &[&str]) {
        // $xxGGA,time,lat,N,lon,E,quality,sats,hdop,alt,M,...
        if f.len() < 10 {
            return;
        }
        if let Some(t) = parse_time(f[1]) {
            self.fix.time = Some(t);
        }
        let quality: u8 = f[6].parse().unwrap_or(0);
        self.fix.satellites = f[7].parse().ok();
        if quality == 0 {
            self.fix.location = None;
            self.fix.altitude_m = None;
            return;
        }
        self.fix.location = parse_location(f[2], f[3], f[4], f[5]);
        self.fix.altitude_m = f[9].parse().ok();
    }

    fn apply_rmc(&mut self, f: &[&str]) {
        // $xxRMC,time,status,lat,N,lon,E,knots,course,ddmmyy,...
        if f.len() < 10 {
            return;
        }
        if let Some(t) = parse_time(f[1]) {
            self.fix.time = Some(t);
        }
        self.fix.date = parse_date(f[9]);
        if f[2] != "A" {
            self.fix.location = None;
            self.fix.speed_kmh = None;
            return;
        }
        self.fix.location = parse_location(f[3], f[4], f[5], f[6]);
        self.fix.speed_kmh = f[7].parse::<f64>().ok().map(|knots| knots * KNOTS_TO_KMH);
    }
}

/// Devuelve el contenido entre '$' y '*' si el checksum XOR coincide.
fn verify_checksum(sentence: &str) -> Option<&str> {
    let body = sentence.strip_prefix('$')?;
    let (payload, checksum) = body.split_once('*')?;
    let expected = u8::from_str_radix(checksum.get(..2)?, 16).ok()?;
    let actual = payload.bytes().fold(0u8, |acc, b| acc ^ b);
    (actual == expected).then_some(payload)
}

fn parse_time(field: &str) -> Option<FixTime> {
    let hour = field.get(0..2)?.parse().ok()?;
    let minute = field.get(2..4)?.parse().ok()?;
    let second = field.get(4..6)?.parse().ok()?;
    (hour < 24 && minute < 60 && second < 61).then_some(FixTime {
        hour,
        minute,
        second,
    })
}

fn parse_date(field: &str) -> Option<FixDate> {
    if field.len() != 6 {
        return None;
    }
    let day = field.get(0..2)?.parse().ok()?;
    let month = field.get(2..4)?.parse().ok()?;
    let yy: u16 = field.get(4..6)?.parse().ok()?;
    ((1..=31).contains(&day) && (1..=12).contains(&month)).then_some(FixDate {
        day,
        month,
        year: 2000 + yy,
    })
}

/// "ddmm.mmmm" / "dddmm.mmmm" + hemisferio → grados decimales.
fn parse_coordinate(value: &str, hemisphere: &str, deg_digits: usize) -> Option<f64> {
    let degrees: f64 = value.get(..deg_digits)?.parse().ok()?;
    let minutes: f64 = value.get(deg_digits..)?.parse().ok()?;
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Some(decimal),
        "S" | "W" => Some(-decimal),
        _ => None,
    }
}

fn parse_location(lat: &str, ns: &str, lon: &str, ew: &str) -> Option<Location> {
    Some(Location {
        lat: parse_coordinate(lat, ns, 2)?,
        lon: parse_coordinate(lon, ew, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(payload: &str) -> String {
        let sum = payload.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${payload}*{sum:02X}\r\n")
    }

    #[test]
    fn gga_sets_position_altitude_and_satellites() {
        let mut p = NmeaParser::new();
        p.feed(with_checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,").as_bytes());
        let fix = p.fix();
        let loc = fix.location.unwrap();
        assert!((loc.lat - 48.1173).abs() < 1e-4);
        assert!((loc.lon - 11.516_667).abs() < 1e-4);
        assert_eq!(fix.altitude_m, Some(545.4));
        assert_eq!(fix.satellites, Some(8));
        assert_eq!(fix.time, Some(FixTime { hour: 12, minute: 35, second: 19 }));
        assert_eq!(fix.date, None);
        assert_eq!(fix.speed_kmh, None);
    }

    #[test]
    fn rmc_void_keeps_time_and_date_but_drops_position() {
        let mut p = NmeaParser::new();
        p.feed(with_checksum("GNRMC,081836,V,,,,,,,130998,,,N").as_bytes());
        let fix = p.fix();
        assert!(!fix.has_location());
        assert_eq!(fix.date, Some(FixDate { day: 13, month: 9, year: 2098 }));
        assert_eq!(fix.time.map(|t| t.hour), Some(8));
    }

    #[test]
    fn rmc_active_converts_knots_and_southern_hemisphere() {
        let mut p = NmeaParser::new();
        p.feed(with_checksum("GPRMC,225446,A,3436.000,S,05822.000,W,10.0,0.0,191194,,").as_bytes());
        let fix = p.fix();
        let loc = fix.location.unwrap();
        assert!((loc.lat + 34.6).abs() < 1e-6);
        assert!((loc.lon + 58.366_667).abs() < 1e-4);
        assert!((fix.speed_kmh.unwrap() - 18.52).abs() < 1e-9);
    }

    #[test]
    fn bad_checksum_and_split_feeds() {
        let mut p = NmeaParser::new();
        p.feed(b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*00\r\n");
        assert_eq!(p.fix(), PositioningFix::default());

        let line = with_checksum("GPGGA,000001,0000.000,N,00000.000,E,1,04,1.0,10.0,M,,M,,");
        let (a, b) = line.as_bytes().split_at(20);
        p.feed(b"garbage");
        p.feed(a);
        p.feed(b);
        assert_eq!(p.fix().satellites, Some(4));
    }
}
