//! Pipeline stages for manifest extraction.
//!
//! Each submodule implements exactly one transformation step, so every
//! stage can be tested on its own and swapped (another decoder, another
//! enhancement chain) without touching its neighbours.
//!
//! ## Data Flow
//!
//! ```text
//! acquire ──▶ enhance ──▶ encode ──▶ invoke ──▶ decode ──▶ normalize
//! (HTTP GET)  (image ops) (base64)   (VLM+retry) (JSON)    (regex rules)
//! ```
//!
//! 1. [`acquire`]: download the media (basic auth) or read a local file
//! 2. [`enhance`]: orientation, grayscale, levels, sharpen, resize, PNG;
//!    runs in `spawn_blocking`
//! 3. [`encode`]: base64-wrap the PNG for an inline image part
//! 4. [`invoke`]: call the VLM; the only stage that retries, via [`retry`]
//! 5. [`decode`]: pull the JSON object out of the model's answer
//! 6. [`normalize`]: deterministic canonicalisation of the 14 fields

pub mod acquire;
pub mod decode;
pub mod encode;
pub mod enhance;
pub mod invoke;
pub mod normalize;
pub mod retry;
