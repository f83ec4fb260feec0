//! Request-scoped data types flowing through the pipeline.
//!
//! ```text
//! MediaReference ──acquire──▶ RawImageBytes ──enhance──▶ RawImageBytes
//!                                                          │
//!               NormalizedRecord ◀──normalize── ManifestFieldSet ◀──decode── model text
//! ```
//!
//! [`ManifestFieldSet`] is a plain struct of 14 `String`s rather than a map:
//! a missing key cannot exist and `null` is unrepresentable, so the
//! "all 14 keys always present" rule is enforced by the type itself.

use serde::{Deserialize, Serialize};

/// Where a [`MediaReference`] points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    /// An HTTP(S) URL on a media host.
    #[default]
    Remote,
    /// A file on this machine. Only the CLI builds these.
    LocalFile,
}

/// Locator for one inbound image: a URL (or, for the CLI, a local path)
/// plus the content type announced by the sender, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub url: String,
    pub content_type_hint: Option<String>,
    #[serde(default)]
    pub source: MediaSource,
}

impl MediaReference {
    /// A remote media URL. Values that are not `http(s)://` URLs are
    /// rejected at fetch time, never read from disk.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type_hint: None,
            source: MediaSource::Remote,
        }
    }

    /// A local file path.
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            url: path.into(),
            content_type_hint: None,
            source: MediaSource::LocalFile,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        let ct = content_type.into();
        self.content_type_hint = if ct.trim().is_empty() { None } else { Some(ct) };
        self
    }
}

/// Binary image payload with its declared content type.
///
/// Not `Clone`: each stage takes it by value and hands a new one on.
#[derive(Debug, PartialEq, Eq)]
pub struct RawImageBytes {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl RawImageBytes {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The 14 fields extracted from one manifest, in sink column order.
///
/// Every field defaults to `""`; deserialising a partial JSON object fills
/// the rest with empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestFieldSet {
    pub fecha_programacion: String,
    pub fecha_transporte: String,
    pub generador: String,
    pub domicilio_generador: String,
    pub operador: String,
    pub domicilio_operador: String,
    pub estado: String,
    pub tipo_transporte: String,
    pub cantidad: String,
    pub unidad: String,
    pub manifiesto_n: String,
    pub tipo_residuo: String,
    pub composicion: String,
    pub categoria_desecho: String,
}

impl ManifestFieldSet {
    /// Field names in the fixed column order of the sink (columns 1–14).
    pub const FIELD_NAMES: [&'static str; 14] = [
        "fecha_programacion",
        "fecha_transporte",
        "generador",
        "domicilio_generador",
        "operador",
        "domicilio_operador",
        "estado",
        "tipo_transporte",
        "cantidad",
        "unidad",
        "manifiesto_n",
        "tipo_residuo",
        "composicion",
        "categoria_desecho",
    ];

    /// Build a field set by looking up each name; missing names become `""`.
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut set = Self::default();
        for name in Self::FIELD_NAMES {
            if let (Some(value), Some(slot)) = (lookup(name), set.get_mut(name)) {
                *slot = value;
            }
        }
        set
    }

    /// Value of the field called `name`, or `None` for an unknown name.
    pub fn get(&self, name: &str) -> Option<&str> {
        let value = match name {
            "fecha_programacion" => &self.fecha_programacion,
            "fecha_transporte" => &self.fecha_transporte,
            "generador" => &self.generador,
            "domicilio_generador" => &self.domicilio_generador,
            "operador" => &self.operador,
            "domicilio_operador" => &self.domicilio_operador,
            "estado" => &self.estado,
            "tipo_transporte" => &self.tipo_transporte,
            "cantidad" => &self.cantidad,
            "unidad" => &self.unidad,
            "manifiesto_n" => &self.manifiesto_n,
            "tipo_residuo" => &self.tipo_residuo,
            "composicion" => &self.composicion,
            "categoria_desecho" => &self.categoria_desecho,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Mutable access to the field called `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut String> {
        let slot = match name {
            "fecha_programacion" => &mut self.fecha_programacion,
            "fecha_transporte" => &mut self.fecha_transporte,
            "generador" => &mut self.generador,
            "domicilio_generador" => &mut self.domicilio_generador,
            "operador" => &mut self.operador,
            "domicilio_operador" => &mut self.domicilio_operador,
            "estado" => &mut self.estado,
            "tipo_transporte" => &mut self.tipo_transporte,
            "cantidad" => &mut self.cantidad,
            "unidad" => &mut self.unidad,
            "manifiesto_n" => &mut self.manifiesto_n,
            "tipo_residuo" => &mut self.tipo_residuo,
            "composicion" => &mut self.composicion,
            "categoria_desecho" => &mut self.categoria_desecho,
            _ => return None,
        };
        Some(slot)
    }

    /// The 14 values in column order.
    pub fn to_row(&self) -> Vec<String> {
        Self::FIELD_NAMES
            .iter()
            .map(|name| self.get(name).unwrap_or_default().to_string())
            .collect()
    }
}

/// A [`ManifestFieldSet`] whose values have been canonicalised.
///
/// Only [`crate::pipeline::normalize::normalize`] constructs one, so holding
/// a `NormalizedRecord` means the value-domain rules have been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NormalizedRecord {
    fields: ManifestFieldSet,
}

impl NormalizedRecord {
    pub(crate) fn from_normalized(fields: ManifestFieldSet) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &ManifestFieldSet {
        &self.fields
    }

    pub fn into_fields(self) -> ManifestFieldSet {
        self.fields
    }

    /// Sink row: 14 values in the fixed column order.
    pub fn to_row(&self) -> Vec<String> {
        self.fields.to_row()
    }
}

impl std::ops::Deref for NormalizedRecord {
    type Target = ManifestFieldSet;

    fn deref(&self) -> &Self::Target {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_match_struct_order() {
        let set = ManifestFieldSet::from_lookup(|name| Some(name.to_uppercase()));
        let row = set.to_row();
        assert_eq!(row.len(), 14);
        for (value, name) in row.iter().zip(ManifestFieldSet::FIELD_NAMES) {
            assert_eq!(value, &name.to_uppercase());
        }
        // serde must serialise in the same order
        let json = serde_json::to_value(&set).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 14);
    }

    #[test]
    fn from_lookup_defaults_to_empty() {
        let set = ManifestFieldSet::from_lookup(|name| {
            (name == "manifiesto_n").then(|| "TEST-123".to_string())
        });
        assert_eq!(set.manifiesto_n, "TEST-123");
        assert_eq!(set.generador, "");
        assert_eq!(set.to_row().iter().filter(|v| v.is_empty()).count(), 13);
    }

    #[test]
    fn partial_json_deserialises_with_defaults() {
        let set: ManifestFieldSet = serde_json::from_str(r#"{"cantidad":"5"}"#).unwrap();
        assert_eq!(set.cantidad, "5");
        assert_eq!(set.unidad, "");
    }

    #[test]
    fn unknown_field_name() {
        let mut set = ManifestFieldSet::default();
        assert!(set.get("patente").is_none());
        assert!(set.get_mut("patente").is_none());
    }

    #[test]
    fn media_reference_ignores_blank_content_type() {
        let m = MediaReference::new("https://x/y").with_content_type("  ");
        assert_eq!(m.content_type_hint, None);
        let m = MediaReference::new("https://x/y").with_content_type("image/jpeg");
        assert_eq!(m.content_type_hint.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn media_source_defaults_to_remote() {
        assert_eq!(MediaReference::new("/etc/hosts").source, MediaSource::Remote);
        assert_eq!(MediaReference::local("foto.jpg").source, MediaSource::LocalFile);

        let m: MediaReference =
            serde_json::from_str(r#"{"url":"/etc/hosts","content_type_hint":null}"#).unwrap();
        assert_eq!(m.source, MediaSource::Remote);
    }
}
