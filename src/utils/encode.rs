//! Data-URI encoding for attachment payloads
//!
//! Attachments travel to the API as raw base64 inline data, but are carried
//! on turns as `data:` URIs so the presentation layer has the MIME type in
//! band. These helpers convert between the two forms.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode raw bytes as a `data:<mime>;base64,<payload>` URI.
pub fn encode_data_uri(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Recover the bare base64 payload from a data URI, for the API's
/// `inlineData.data` field. A string without a comma is assumed to already
/// be a bare payload and is returned unchanged.
pub fn strip_data_uri(data_uri: &str) -> &str {
    match data_uri.split_once(',') {
        Some((_, payload)) => payload,
        None => data_uri,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_a_well_formed_data_uri() {
        let uri = encode_data_uri(b"hello", "audio/mp3");
        assert_eq!(uri, "data:audio/mp3;base64,aGVsbG8=");
    }

    #[test]
    fn strip_recovers_the_bare_payload() {
        assert_eq!(strip_data_uri("data:image/png;base64,aGVsbG8="), "aGVsbG8=");
    }

    #[test]
    fn strip_passes_bare_payloads_through() {
        assert_eq!(strip_data_uri("aGVsbG8="), "aGVsbG8=");
    }

    #[test]
    fn round_trip_preserves_payload() {
        let bytes = [0u8, 159, 146, 150];
        let uri = encode_data_uri(&bytes, "application/octet-stream");
        let payload = strip_data_uri(&uri);
        assert_eq!(STANDARD.decode(payload).unwrap(), bytes);
    }
}
