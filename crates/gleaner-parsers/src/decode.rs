//! Charset-hint decoding shared by the text-based plugins.

use encoding_rs::Encoding;

/// Decode bytes using the transport-level charset hint, falling back to
/// UTF-8. BOM sniffing takes precedence over the hint. Returns the text
/// and the name of the encoding actually used.
pub(crate) fn decode_text(bytes: &[u8], charset_hint: Option<&str>) -> (String, String) {
    let encoding = charset_hint
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, used, _had_errors) = encoding.decode(bytes);
    (text.into_owned(), used.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_without_hint() {
        let (text, used) = decode_text("grüße".as_bytes(), None);
        assert_eq!(text, "grüße");
        assert_eq!(used, "UTF-8");
    }

    #[test]
    fn latin1_hint_is_honored() {
        let bytes = [b'g', b'r', 0xFC, b'n'];
        let (text, used) = decode_text(&bytes, Some("ISO-8859-1"));
        assert_eq!(text, "grün");
        // encoding_rs folds latin1 into its windows-1252 decoder
        assert_eq!(used, "windows-1252");
    }

    #[test]
    fn unknown_label_falls_back_to_utf8() {
        let (text, _) = decode_text(b"plain", Some("no-such-charset"));
        assert_eq!(text, "plain");
    }
}
