//! Response decoding: model text → [`ManifestFieldSet`].
//!
//! ## Why two tiers?
//!
//! Even at temperature 0 and with an explicit "JSON only" instruction, vision
//! models sometimes wrap the object in a ```` ```json ```` fence or prefix it
//! with "Aquí está el JSON:". The lenient decoder first tries the whole
//! answer as JSON and, failing that, scans for the first balanced `{…}`
//! block. The scan tracks string literals and escapes, so a `}` inside a
//! value (e.g. an address) does not end the object early.
//!
//! Decoding is isolated behind [`ResponseDecoder`] so a stricter parser can
//! be swapped in without touching the normaliser.

use crate::error::{truncate_chars, ManifestError};
use crate::record::ManifestFieldSet;
use serde_json::{Map, Value};
use tracing::debug;

/// Characters of model output quoted in a [`ManifestError::Decode`].
const SNIPPET_CHARS: usize = 120;

/// Turns raw model output into a field set.
pub trait ResponseDecoder: Send + Sync {
    fn decode(&self, output: &str) -> Result<ManifestFieldSet, ManifestError>;
}

/// Direct parse, then first-balanced-object fallback. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientJsonDecoder;

impl ResponseDecoder for LenientJsonDecoder {
    fn decode(&self, output: &str) -> Result<ManifestFieldSet, ManifestError> {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Err(decode_error("model returned an empty answer", output));
        }

        if let Some(object) = parse_object(trimmed) {
            return Ok(field_set_from_object(&object));
        }

        debug!("Direct JSON parse failed; scanning for an embedded object");
        let candidate = first_balanced_object(trimmed)
            .ok_or_else(|| decode_error("no JSON object found", output))?;
        let object = parse_object(candidate)
            .ok_or_else(|| decode_error("embedded object is not valid JSON", output))?;
        Ok(field_set_from_object(&object))
    }
}

/// Accepts only output that is exactly one JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictJsonDecoder;

impl ResponseDecoder for StrictJsonDecoder {
    fn decode(&self, output: &str) -> Result<ManifestFieldSet, ManifestError> {
        parse_object(output.trim())
            .map(|object| field_set_from_object(&object))
            .ok_or_else(|| decode_error("output is not a single JSON object", output))
    }
}

fn decode_error(detail: &str, output: &str) -> ManifestError {
    ManifestError::Decode {
        detail: detail.to_string(),
        snippet: truncate_chars(output.trim(), SNIPPET_CHARS),
    }
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Read the 14 expected keys; anything missing becomes `""`.
pub fn field_set_from_object(object: &Map<String, Value>) -> ManifestFieldSet {
    ManifestFieldSet::from_lookup(|name| object.get(name).map(value_to_string))
}

/// String view of a JSON value: strings as-is, `null` as `""`, everything
/// else as compact JSON text.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Locate the first balanced `{…}` substring, honouring JSON string
/// literals. Returns `None` when no opening brace is ever closed.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(&text[start..]) {
            return Some(&text[start..start + end + 1]);
        }
        search_from = start + 1;
    }
    None
}

/// Byte index of the `}` closing the `{` at index 0 of `text`.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pure_json() {
        let set = LenientJsonDecoder
            .decode(r#"{"manifiesto_n":"A-1","cantidad":"3","unidad":"kg"}"#)
            .unwrap();
        assert_eq!(set.manifiesto_n, "A-1");
        assert_eq!(set.unidad, "kg");
        assert_eq!(set.generador, "");
    }

    #[test]
    fn extracts_embedded_object() {
        let set = LenientJsonDecoder
            .decode(r#"Here you go: {"manifiesto_n":"TEST-123","cantidad":"5"}"#)
            .unwrap();
        assert_eq!(set.manifiesto_n, "TEST-123");
        assert_eq!(set.cantidad, "5");
        let empty = set.to_row().iter().filter(|v| v.is_empty()).count();
        assert_eq!(empty, 12);
    }

    #[test]
    fn extracts_from_markdown_fence() {
        let out = "```json\n{\"estado\": \"Sólido\"}\n```";
        assert_eq!(LenientJsonDecoder.decode(out).unwrap().estado, "Sólido");
    }

    #[test]
    fn brace_inside_string_does_not_end_object() {
        let out = r#"Resultado: {"domicilio_generador":"Ruta 9 km 3 {galpón}","operador":"Eco \"SRL\""} gracias"#;
        let set = LenientJsonDecoder.decode(out).unwrap();
        assert_eq!(set.domicilio_generador, "Ruta 9 km 3 {galpón}");
        assert_eq!(set.operador, "Eco \"SRL\"");
    }

    #[test]
    fn skips_to_next_balanced_object() {
        let out = r#"{ oops  then {"manifiesto_n":"X"}"#;
        assert_eq!(first_balanced_object(out), Some(r#"{"manifiesto_n":"X"}"#));
        assert_eq!(first_balanced_object("{ never closed"), None);
        let out = r#"a } b {"manifiesto_n":"X"}"#;
        assert_eq!(first_balanced_object(out), Some(r#"{"manifiesto_n":"X"}"#));
    }

    #[test]
    fn non_string_values_are_stringified() {
        let set = LenientJsonDecoder
            .decode(r#"{"cantidad": 12.5, "unidad": null, "estado": true, "composicion": ["a","b"]}"#)
            .unwrap();
        assert_eq!(set.cantidad, "12.5");
        assert_eq!(set.unidad, "");
        assert_eq!(set.estado, "true");
        assert_eq!(set.composicion, r#"["a","b"]"#);
    }

    #[test]
    fn unparsable_output_is_decode_error() {
        for out in ["", "   ", "No pude leer la imagen.", "{not json}", "[1,2,3]"] {
            let err = LenientJsonDecoder.decode(out).unwrap_err();
            assert!(matches!(err, ManifestError::Decode { .. }), "{out:?} → {err:?}");
        }
    }

    #[test]
    fn strict_decoder_rejects_commentary() {
        assert!(StrictJsonDecoder.decode(r#"{"manifiesto_n":"1"}"#).is_ok());
        assert!(StrictJsonDecoder.decode(r#"ok: {"manifiesto_n":"1"}"#).is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let set = LenientJsonDecoder
            .decode(r#"{"patente":"AB123CD","manifiesto_n":"9"}"#)
            .unwrap();
        assert_eq!(set.manifiesto_n, "9");
    }
}
