//! Byte-level MIME detection and file-kind classification.
//!
//! Detection order: magic bytes (`infer`), then the declared MIME, then the
//! filename extension. Classification is a pure function over
//! (bytes, filename, declared MIME) — no dispatch on type hierarchies.

use quill_store::types::FileKind;

/// Detect MIME from content with declared/extension fallbacks.
pub fn detect_mime(bytes: &[u8], filename: &str, declared: Option<&str>) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    if let Some(declared) = declared {
        if !declared.is_empty() && declared != "application/octet-stream" {
            return declared.to_string();
        }
    }
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Classify into the tagged variant the rest of the system dispatches on.
///
/// `voice` and `video_note` can't be told apart from plain audio/video by
/// content — the platform flags them, so the caller passes `platform_hint`
/// when it knows better.
pub fn classify(
    bytes: &[u8],
    filename: &str,
    declared: Option<&str>,
    platform_hint: Option<FileKind>,
) -> (FileKind, String) {
    let mime = detect_mime(bytes, filename, declared);

    if let Some(hint) = platform_hint {
        return (hint, mime);
    }

    let kind = match mime.as_str() {
        "application/pdf" => FileKind::Pdf,
        m if m.starts_with("image/") => FileKind::Image,
        m if m.starts_with("audio/") => FileKind::Audio,
        m if m.starts_with("video/") => FileKind::Video,
        _ => FileKind::Document,
    };
    (kind, mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal valid magic prefixes.
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const PDF: &[u8] = b"%PDF-1.7 rest";

    #[test]
    fn magic_bytes_win_over_declared() {
        let mime = detect_mime(PNG, "photo.jpg", Some("image/jpeg"));
        assert_eq!(mime, "image/png");
    }

    #[test]
    fn declared_wins_over_extension_when_no_magic() {
        let mime = detect_mime(b"plain text", "notes.bin", Some("text/markdown"));
        assert_eq!(mime, "text/markdown");
    }

    #[test]
    fn extension_fallback() {
        let mime = detect_mime(b"a,b,c\n1,2,3", "data.csv", None);
        assert_eq!(mime, "text/csv");
    }

    #[test]
    fn octet_stream_declared_is_ignored() {
        let mime = detect_mime(b"x", "report.txt", Some("application/octet-stream"));
        assert_eq!(mime, "text/plain");
    }

    #[test]
    fn pdf_classified_as_pdf_not_document() {
        let (kind, mime) = classify(PDF, "paper.pdf", None, None);
        assert_eq!(kind, FileKind::Pdf);
        assert_eq!(mime, "application/pdf");
    }

    #[test]
    fn platform_hint_overrides_content() {
        let ogg = [b'O', b'g', b'g', b'S', 0, 0, 0, 0];
        let (kind, _) = classify(&ogg, "voice.ogg", None, Some(FileKind::Voice));
        assert_eq!(kind, FileKind::Voice);
    }

    #[test]
    fn unknown_bytes_default_to_document() {
        let (kind, mime) = classify(&[0x00, 0x01], "mystery", None, None);
        assert_eq!(kind, FileKind::Document);
        assert_eq!(mime, "application/octet-stream");
    }
}
