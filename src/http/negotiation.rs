//! Content negotiation between the four body formats the engine can produce,
//! and file-extension to MIME type lookup for static resources.

use std::path::Path;

/// The body formats the engine renders on its own (error bodies, default
/// not-found bodies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Json,
    Xml,
    Html,
    Text,
}

impl ContentKind {
    /// The main media type, e.g. `application/json`.
    pub fn media_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
            Self::Html => "text/html",
            Self::Text => "text/plain",
        }
    }

    /// The media type with an explicit UTF-8 charset, as sent in `Content-Type`.
    pub fn with_utf8_charset(self) -> String {
        format!("{}; charset=UTF-8", self.media_type())
    }

    fn accepts(self, media_range: &str) -> bool {
        match self {
            Self::Json => matches!(media_range, "application/json" | "text/json"),
            Self::Xml => matches!(media_range, "application/xml" | "text/xml"),
            Self::Html => matches!(media_range, "text/html" | "application/xhtml+xml"),
            Self::Text => matches!(media_range, "text/plain"),
        }
    }

    /// Picks the best format for an `Accept` header value.
    ///
    /// Media ranges are ranked by their `q` parameter, ties keep header order.
    /// Wildcards, unknown types, a missing header or a malformed one all fall
    /// back to [`ContentKind::Text`].
    ///
    /// ```
    /// use frontline::http::ContentKind;
    ///
    /// assert_eq!(ContentKind::best_match(Some("application/json")), ContentKind::Json);
    /// assert_eq!(
    ///     ContentKind::best_match(Some("text/html;q=0.4, application/xml;q=0.9")),
    ///     ContentKind::Xml
    /// );
    /// assert_eq!(ContentKind::best_match(None), ContentKind::Text);
    /// ```
    pub fn best_match(accept: Option<&str>) -> ContentKind {
        let Some(accept) = accept else {
            return ContentKind::Text;
        };

        let mut best: Option<(f32, ContentKind)> = None;
        for range in accept.split(',') {
            let mut parts = range.split(';');
            let media = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            let quality = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            if quality <= 0.0 {
                continue;
            }

            let kind = [
                ContentKind::Json,
                ContentKind::Xml,
                ContentKind::Html,
                ContentKind::Text,
            ]
            .into_iter()
            .find(|kind| kind.accepts(&media));

            if let Some(kind) = kind {
                match best {
                    Some((best_q, _)) if best_q >= quality => {}
                    _ => best = Some((quality, kind)),
                }
            }
        }

        best.map(|(_, kind)| kind).unwrap_or(ContentKind::Text)
    }
}

/// MIME type for a file, guessed from its extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
