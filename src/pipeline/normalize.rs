//! Field normalisation: canonicalise the 14 extracted values.
//!
//! ## Why normalise after a well-prompted model?
//!
//! The prompt asks for canonical values, but handwritten manifests defeat it
//! regularly: quantities come back as `"aprox 12,5 kg"`, units as
//! `"Kilogramos"`, dates as `"3-5-25"`. The spreadsheet downstream is
//! filtered and summed by humans, so every row must use the same spellings.
//!
//! These rules are deliberately permissive. An unrecognised unit or a date
//! that doesn't parse is kept as the (whitespace-cleaned) original so a
//! person can fix it in the sheet; nothing is ever blanked for being odd.
//! [`normalize`] is total and idempotent.
//!
//! ## Rule Order
//!
//! Whitespace collapsing runs first on every field so the type-specific
//! patterns never have to account for line breaks or double spaces.

use crate::record::{ManifestFieldSet, NormalizedRecord};
use once_cell::sync::Lazy;
use regex::Regex;

/// Canonical value for hazardous waste.
pub const ESPECIALES: &str = "Especiales";

/// Canonical value for non-hazardous waste.
pub const NO_ESPECIALES: &str = "No Especiales";

/// Normalise every field of `fields`.
///
/// Rules (applied in order):
/// 1. Collapse whitespace runs and trim, on all 14 fields
/// 2. `tipo_residuo` → `Especiales` / `No Especiales` when recognisable
/// 3. `cantidad` → first decimal number, comma decimals converted
/// 4. `unidad` → `kg` / `tn` / `m3` / `L` when recognisable
/// 5. `fecha_programacion`, `fecha_transporte` → `YYYY-MM-DD` when parseable
pub fn normalize(mut fields: ManifestFieldSet) -> NormalizedRecord {
    for name in ManifestFieldSet::FIELD_NAMES {
        if let Some(value) = fields.get_mut(name) {
            *value = collapse_whitespace(value);
        }
    }

    fields.tipo_residuo = normalize_tipo_residuo(&fields.tipo_residuo);
    fields.cantidad = normalize_cantidad(&fields.cantidad);
    fields.unidad = normalize_unidad(&fields.unidad);
    fields.fecha_programacion = normalize_date(&fields.fecha_programacion);
    fields.fecha_transporte = normalize_date(&fields.fecha_transporte);

    NormalizedRecord::from_normalized(fields)
}

// ── Rule 1: Whitespace ───────────────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

pub fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input, " ").trim().to_string()
}

// ── Rule 2: tipo_residuo ─────────────────────────────────────────────────────

static RE_NO_ESPECIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bno\W*esp").unwrap());
static RE_ESPECIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\besp").unwrap());

/// `"no especiales"`, `"NO ESP."`, `"No-Esp"` → `No Especiales`;
/// `"especial"`, `"ESP"` → `Especiales`; anything else unchanged.
pub fn normalize_tipo_residuo(input: &str) -> String {
    if RE_NO_ESPECIAL.is_match(input) {
        NO_ESPECIALES.to_string()
    } else if RE_ESPECIAL.is_match(input) {
        ESPECIALES.to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 3: cantidad ─────────────────────────────────────────────────────────

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)?").unwrap());

/// First number in the text, with `,` read as the decimal separator.
/// No number → `""`.
pub fn normalize_cantidad(input: &str) -> String {
    let dotted = input.replace(',', ".");
    RE_NUMBER
        .find(&dotted)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

// ── Rule 4: unidad ───────────────────────────────────────────────────────────

static RE_UNIT_KG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:kgs?|kilo)").unwrap());

static RE_UNIT_M3: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:m|mt|mts|metros?)\.?\s*(?:3|³)|\bmetros?\s+c[uú]bicos?|\bm\.?\s*c[uú]b").unwrap()
});

static RE_UNIT_TN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:t|tn|tns)\b|\bton").unwrap());

static RE_UNIT_L: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^l\.?$|\b(?:lt|lts|ltr|ltrs)\b|\blitro").unwrap());

/// Map unit spellings to `kg`, `tn`, `m3` or `L`. Unknown units pass through.
pub fn normalize_unidad(input: &str) -> String {
    let canonical = if input.is_empty() {
        None
    } else if RE_UNIT_KG.is_match(input) {
        Some("kg")
    } else if RE_UNIT_M3.is_match(input) {
        Some("m3")
    } else if RE_UNIT_TN.is_match(input) {
        Some("tn")
    } else if RE_UNIT_L.is_match(input) {
        Some("L")
    } else {
        None
    };

    canonical
        .map(str::to_string)
        .unwrap_or_else(|| input.to_string())
}

// ── Rule 5: dates ────────────────────────────────────────────────────────────

static RE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([0-9]{1,2})[/.\-]([0-9]{1,2})[/.\-]([0-9]{4}|[0-9]{2})\b").unwrap()
});

/// `D/M/Y`, `D-M-Y` or `D.M.Y` (1–2 digit day/month, 2 or 4 digit year) →
/// `YYYY-MM-DD`. Two-digit years get a `20` prefix. Anything else is
/// returned unchanged.
pub fn normalize_date(input: &str) -> String {
    let Some(caps) = RE_DATE.captures(input) else {
        return input.to_string();
    };

    let day = &caps[1];
    let month = &caps[2];
    let year = &caps[3];
    let year = if year.len() == 2 {
        format!("20{year}")
    } else {
        year.to_string()
    };

    format!("{year}-{month:0>2}-{day:0>2}")
}
