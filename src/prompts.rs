//! Extraction prompt for the manifest vision model.
//!
//! Keeping the prompt here (rather than inline in the model client) lets the
//! retry and transport code change without touching prompt wording, and lets
//! tests assert that every schema key is mentioned.
//!
//! Callers can override it via [`crate::config::ExtractorConfig::prompt`].

/// Default instruction sent alongside the manifest photo.
///
/// The key list must stay in sync with
/// [`crate::record::ManifestFieldSet::FIELD_NAMES`].
pub const EXTRACTION_PROMPT: &str = r#"Sos un asistente que transcribe manifiestos de transporte de residuos a partir de una foto.

Devolvé UN ÚNICO objeto JSON con exactamente estas 14 claves, todas con valores de tipo string:

{
  "fecha_programacion": "",
  "fecha_transporte": "",
  "generador": "",
  "domicilio_generador": "",
  "operador": "",
  "domicilio_operador": "",
  "estado": "",
  "tipo_transporte": "",
  "cantidad": "",
  "unidad": "",
  "manifiesto_n": "",
  "tipo_residuo": "",
  "composicion": "",
  "categoria_desecho": ""
}

Reglas:
1. FECHAS: si podés leerlas completas, escribilas como DD/MM/AAAA.
2. CANTIDAD: sólo el número tal como figura (por ejemplo "12,5"), sin la unidad.
3. UNIDAD: la unidad de la cantidad (kg, tn, m3, litros).
4. TIPO_RESIDUO: sólo "Especiales" o "No Especiales".
5. MANIFIESTO_N: el número de manifiesto exactamente como aparece, con letras y guiones.
6. Si un campo está vacío, ilegible o no existe en el documento, dejá "" (string vacío). No inventes datos.
7. SALIDA: respondé SOLAMENTE con el objeto JSON. Sin texto antes ni después, sin bloques ```json, sin comentarios."#;
