//! Relaxed object-literal reader for option payloads.
//!
//! Accepts strict JSON plus the usual hand-written relaxations: unquoted keys,
//! single-quoted strings, comments, trailing commas, `undefined` and inline
//! `function` values (kept as their source text).

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct LiteralError {
    pub message: String,
    pub offset: usize,
}

pub fn parse(text: &str) -> Result<Value, LiteralError> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    let mut reader = Reader::new(text);
    reader.skip_trivia();
    let value = reader.value()?;
    reader.skip_trivia();
    if reader.eat(b';') {
        reader.skip_trivia();
    }
    if !reader.at_end() {
        return Err(reader.error("unexpected trailing input"));
    }
    Ok(value)
}

/// Whether `code` could be a script: non-empty with balanced brackets outside strings and comments.
pub fn is_balanced_script(code: &str) -> bool {
    let code = code.trim();
    if code.is_empty() {
        return false;
    }

    let mut reader = Reader::new(code);
    let mut stack = Vec::new();
    while let Some(byte) = reader.peek() {
        match byte {
            b'"' | b'\'' | b'`' => {
                if reader.string().is_err() {
                    return false;
                }
                continue;
            }
            b'/' if matches!(reader.peek_at(1), Some(b'/' | b'*')) => {
                reader.skip_trivia();
                continue;
            }
            b'(' | b'[' | b'{' => stack.push(byte),
            b')' | b']' | b'}' => {
                let open = match byte {
                    b')' => b'(',
                    b']' => b'[',
                    _ => b'{',
                };
                if stack.pop() != Some(open) {
                    return false;
                }
            }
            _ => {}
        }
        reader.pos += 1;
    }
    stack.is_empty()
}

/// A callback must read as a function expression.
pub fn is_function_source(code: &str) -> bool {
    let code = code.trim();
    (code.starts_with("function") || code.contains("=>")) && is_balanced_script(code)
}

struct Reader<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> LiteralError {
        LiteralError {
            message: message.into(),
            offset: self.pos,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(byte), _) if byte.is_ascii_whitespace() => self.pos += 1,
                (Some(b'/'), Some(b'/')) => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    self.pos += 2;
                    match self.src[self.pos..].find("*/") {
                        Some(end) => self.pos += end + 2,
                        None => self.pos = self.bytes.len(),
                    }
                }
                _ => return,
            }
        }
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        match self.peek() {
            Some(b'{') => self.object(),
            Some(b'[') => self.array(),
            Some(b'"' | b'\'' | b'`') => self.string().map(Value::String),
            Some(b'-' | b'+' | b'.' | b'0'..=b'9') => self.number(),
            Some(_) => {
                let word = self.identifier();
                match word {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" | "undefined" => Ok(Value::Null),
                    "function" => self.function(),
                    "" => Err(self.error("expected a value")),
                    other => Err(self.error(format!("`{other}` is not defined"))),
                }
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn object(&mut self) -> Result<Value, LiteralError> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_trivia();
            if self.eat(b'}') {
                return Ok(Value::Object(map));
            }

            let key = match self.peek() {
                Some(b'"' | b'\'') => self.string()?,
                Some(b'0'..=b'9') => self.identifier().to_string(),
                _ => {
                    let key = self.identifier();
                    if key.is_empty() {
                        return Err(self.error("expected a property name"));
                    }
                    key.to_string()
                }
            };

            self.skip_trivia();
            if !self.eat(b':') {
                return Err(self.error("expected `:` after property name"));
            }
            self.skip_trivia();
            let value = self.value()?;
            map.insert(key, value);

            self.skip_trivia();
            if self.eat(b',') {
                continue;
            }
            if self.eat(b'}') {
                return Ok(Value::Object(map));
            }
            return Err(self.error("expected `,` or `}`"));
        }
    }

    fn array(&mut self) -> Result<Value, LiteralError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.eat(b']') {
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_trivia();
            if self.eat(b',') {
                continue;
            }
            if self.eat(b']') {
                return Ok(Value::Array(items));
            }
            return Err(self.error("expected `,` or `]`"));
        }
    }

    fn string(&mut self) -> Result<String, LiteralError> {
        let quote = self.bytes[self.pos];
        self.pos += 1;
        let src = self.src;
        let mut out = String::new();
        let mut chars = src[self.pos..].char_indices();

        while let Some((offset, ch)) = chars.next() {
            match ch {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'u' => {
                            let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                            let decoded = u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.error("invalid unicode escape"))?;
                            out.push(decoded);
                        }
                        '\n' => {}
                        other => out.push(other),
                    }
                }
                ch if ch as u32 == quote as u32 => {
                    self.pos += offset + 1;
                    return Ok(out);
                }
                other => out.push(other),
            }
        }
        Err(self.error("unterminated string"))
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        while let Some(byte) = self.peek() {
            let exponent_sign = matches!(byte, b'-' | b'+')
                && matches!(self.bytes.get(self.pos - 1), Some(b'e' | b'E'));
            if byte.is_ascii_digit() || matches!(byte, b'.' | b'e' | b'E') || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }

        let raw = self.src[start..self.pos].trim_start_matches('+');
        raw.parse::<f64>()
            .ok()
            .and_then(|parsed| {
                if parsed.fract() == 0.0 && parsed.abs() < 9.0e15 && !raw.contains(['.', 'e', 'E']) {
                    Some(Number::from(parsed as i64))
                } else {
                    Number::from_f64(parsed)
                }
            })
            .map(Value::Number)
            .ok_or_else(|| self.error(format!("invalid number `{raw}`")))
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let src = self.src;
        &src[start..self.pos]
    }

    /// The word `function` was consumed; capture through the matching close brace.
    fn function(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos - "function".len();
        let Some(open) = self.src[self.pos..].find('{') else {
            return Err(self.error("function without a body"));
        };
        self.pos += open;

        let mut depth = 0usize;
        while let Some(byte) = self.peek() {
            match byte {
                b'"' | b'\'' | b'`' => {
                    self.string()?;
                    continue;
                }
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += 1;
                        return Ok(Value::String(self.src[start..self.pos].to_string()));
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(self.error("unterminated function body"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strict_json_passes_through() {
        assert_eq!(
            parse(r#"{"series":[{"data":[1,2.5]}]}"#).expect("json"),
            json!({"series": [{"data": [1, 2.5]}]})
        );
    }

    #[test]
    fn relaxed_object_literals_parse() {
        let text = r#"
            // hand written
            {
                chart: { type: 'column', width: 300, },
                title: { text: "It's \"quoted\"" },
                /* ignored */
                series: [{ data: [1, -2, .5, 1e3], visible: undefined }],
            };
        "#;
        assert_eq!(
            parse(text).expect("literal"),
            json!({
                "chart": {"type": "column", "width": 300},
                "title": {"text": "It's \"quoted\""},
                "series": [{"data": [1, -2, 0.5, 1000.0], "visible": null}]
            })
        );
    }

    #[test]
    fn functions_are_kept_as_source() {
        let value = parse("{formatter: function () { return '}' + this.y; }, y: 1}").expect("fn");
        assert_eq!(
            value["formatter"],
            json!("function () { return '}' + this.y; }")
        );
        assert_eq!(value["y"], json!(1));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(parse("{chart: {type: 'line'}").is_err());
        assert!(parse("{chart: Highcharts.theme}").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn scripts_must_balance() {
        assert!(is_balanced_script("function (chart) { chart.redraw(); }"));
        assert!(is_balanced_script("var s = '(('; // )"));
        assert!(!is_balanced_script("function (chart) { chart.redraw(; }"));
        assert!(!is_balanced_script("   "));
    }

    #[test]
    fn callbacks_must_be_functions() {
        assert!(is_function_source("function (chart) {}"));
        assert!(is_function_source("(chart) => { }"));
        assert!(!is_function_source("chart.redraw()"));
    }
}
