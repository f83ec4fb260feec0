//! Image encoding: enhanced PNG bytes → base64 payload for the VLM request.
//!
//! Media URLs from the messaging provider are private (basic-auth), so the
//! model can never fetch them itself. The enhanced image travels inline as a
//! base64 data URI instead. `detail: "high"` asks GPT-4-class models for the
//! full tile budget; without it the small handwritten boxes of a manifest are
//! downsampled into a single 512 px overview and lost.

use crate::record::RawImageBytes;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Detail level requested for the inline image.
pub const IMAGE_DETAIL: &str = "high";

/// A base64-encoded image ready to embed in a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub base64: String,
}

impl EncodedImage {
    /// `data:<mime>;base64,<payload>` for OpenAI-style `image_url` parts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    /// Convert to the `edgequake_llm` attachment type.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.base64.clone(), self.mime_type.as_str()).with_detail(IMAGE_DETAIL)
    }
}

/// Base64-encode an enhanced image, consuming it.
pub fn encode_image(image: RawImageBytes) -> EncodedImage {
    let b64 = STANDARD.encode(&image.bytes);
    debug!("Encoded image → {} bytes base64", b64.len());

    EncodedImage {
        mime_type: image.content_type,
        base64: b64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_small_payload() {
        let img = RawImageBytes::new(vec![0x89, b'P', b'N', b'G'], "image/png");
        let encoded = encode_image(img);
        assert_eq!(encoded.mime_type, "image/png");
        let decoded = STANDARD.decode(&encoded.base64).expect("valid base64");
        assert_eq!(decoded, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn data_url_format() {
        let encoded = EncodedImage {
            mime_type: "image/png".into(),
            base64: "AAAA".into(),
        };
        assert_eq!(encoded.data_url(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn image_data_carries_payload() {
        let encoded = EncodedImage {
            mime_type: "image/png".into(),
            base64: "AAAA".into(),
        };
        let data = encoded.to_image_data();
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(data.data, "AAAA");
    }
}
