// ─── JSON mínimo para los esquemas fijos del dispositivo ───
//
// Contrato de escape: SOLO se escapan backslash y comilla doble.
// Ley de ida y vuelta: parse_flat_object(write(x)) devuelve exactamente x.
//
// Se usa para el blob persistido y para los bodies que enviamos al
// document store. Los documentos que LEEMOS del remoto van por serde_json.

use std::fmt;

/// Escapa un valor para meterlo entre comillas JSON.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

/// Escalar JSON string: `"valor"` con el escape de arriba.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", escape(value))
}

/// Builder de objetos planos `{"k":"v",...}` con valores string.
#[derive(Debug)]
pub struct ObjectWriter {
    buf: String,
}

impl ObjectWriter {
    pub fn new() -> Self {
        Self {
            buf: String::from("{"),
        }
    }

    pub fn field(mut self, key: &str, value: &str) -> Self {
        if self.buf.len() > 1 {
            self.buf.push(',');
        }
        self.buf.push_str(&quote(key));
        self.buf.push(':');
        self.buf.push_str(&quote(value));
        self
    }

    pub fn finish(mut self) -> String {
        self.buf.push('}');
        self.buf
    }
}

impl Default for ObjectWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub offset: usize,
    pub reason: &'static str,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.reason, self.offset)
    }
}

impl std::error::Error for ParseError {}

/// Parsea un objeto plano cuyos valores son todos strings.
///
/// Devuelve los pares en el orden del documento. Claves repetidas se
/// conservan tal cual; el llamador decide (nosotros tomamos la primera).
pub fn parse_flat_object(input: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut p = Parser {
        bytes: input.as_bytes(),
        src: input,
        pos: 0,
    };
    let mut pairs = Vec::new();

    p.skip_ws();
    p.expect(b'{', "expected '{'")?;
    p.skip_ws();
    if p.peek() == Some(b'}') {
        p.pos += 1;
        return p.finish(pairs);
    }

    loop {
        p.skip_ws();
        let key = p.string()?;
        p.skip_ws();
        p.expect(b':', "expected ':'")?;
        p.skip_ws();
        let value = p.string()?;
        pairs.push((key, value));
        p.skip_ws();
        match p.next() {
            Some(b',') => continue,
            Some(b'}') => break,
            _ => return Err(p.error("expected ',' or '}'")),
        }
    }

    p.finish(pairs)
}

struct Parser<'a> {
    bytes: &'a [u8],
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn error(&self, reason: &'static str) -> ParseError {
        ParseError {
            offset: self.pos,
            reason,
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8, reason: &'static str) -> Result<(), ParseError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn finish(mut self, pairs: Vec<(String, String)>) -> Result<Vec<(String, String)>, ParseError> {
        self.skip_ws();
        if self.pos != self.bytes.len() {
            return Err(self.error("trailing characters"));
        }
        Ok(pairs)
    }

    fn string(&mut self) -> Result<String, ParseError> {
        self.expect(b'"', "expected string")?;
        let mut out = String::new();
        let mut run_start = self.pos;

        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => {
                    out.push_str(&self.src[run_start..self.pos]);
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    out.push_str(&self.src[run_start..self.pos]);
                    self.pos += 1;
                    let escaped = self.next().ok_or_else(|| self.error("unterminated escape"))?;
                    match escaped {
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        b'/' => out.push('/'),
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'r' => out.push('\r'),
                        b'b' => out.push('\u{8}'),
                        b'f' => out.push('\u{c}'),
                        b'u' => out.push(self.unicode_escape()?),
                        _ => return Err(self.error("unknown escape")),
                    }
                    run_start = self.pos;
                }
                // Multi-byte UTF-8 se copia en bloque con el resto del run
                Some(_) => self.pos += 1,
            }
        }
    }

    fn unicode_escape(&mut self) -> Result<char, ParseError> {
        let hex = self
            .src
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| self.error("short \\u escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("bad \\u escape"))?;
        self.pos += 4;
        // Sin soporte de surrogate pairs: nuestros esquemas no los usan
        char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
    }
}
