//! Manifest rewriting
//!
//! Rewrites every URI reference in an HLS/M3U playlist so the player fetches
//! it back through the relay. Works line by line: lines are never reordered,
//! dropped or merged, and each line keeps its original terminator.

use std::borrow::Cow;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

/// Everything except RFC 3986 unreserved characters is escaped.
const RELAY_QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const URI_ATTRIBUTE: &str = "URI=\"";

/// Percent-encode a value for use inside the relay's `url=` query parameter.
#[must_use]
pub fn percent_encode(input: &str) -> String {
    utf8_percent_encode(input, RELAY_QUERY_VALUE).to_string()
}

/// Where the text of a manifest comes from
#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// Stored manifest URL, fetched through the relay
    Remote(Url),
    /// Manifest text supplied directly (e.g. an uploaded playlist). Without a
    /// base URL, relative references cannot be resolved and are left alone.
    Inline { text: String, base_url: Option<Url> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `#EXT…` tag carrying at least one quoted `URI="…"` attribute
    Directive,
    /// Segment or variant playlist reference
    Uri,
    /// Comments, blank lines and tags without URI attributes
    Passthrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine<'a> {
    pub text: &'a str,
    /// `"\n"`, `"\r\n"` or `""` for an unterminated last line
    pub terminator: &'a str,
    pub kind: LineKind,
}

/// A parsed manifest; borrows the original text.
#[derive(Debug, Clone)]
pub struct ManifestDocument<'a> {
    lines: Vec<ManifestLine<'a>>,
}

impl<'a> ManifestDocument<'a> {
    #[must_use]
    pub fn parse(text: &'a str) -> Self {
        let lines = text
            .split_inclusive('\n')
            .map(|raw| {
                let (body, terminator) = if let Some(body) = raw.strip_suffix("\r\n") {
                    (body, "\r\n")
                } else if let Some(body) = raw.strip_suffix('\n') {
                    (body, "\n")
                } else {
                    (raw, "")
                };
                ManifestLine {
                    text: body,
                    terminator,
                    kind: classify_line(body),
                }
            })
            .collect();

        Self { lines }
    }

    #[must_use]
    pub fn lines(&self) -> &[ManifestLine<'a>] {
        &self.lines
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines the rewriter will look at.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind != LineKind::Passthrough)
            .count()
    }

    #[must_use]
    pub fn rewrite(&self, rewriter: &ManifestRewriter<'_>) -> String {
        let capacity = self
            .lines
            .iter()
            .map(|l| l.text.len() * 2 + l.terminator.len())
            .sum();
        let mut output = String::with_capacity(capacity);

        for line in &self.lines {
            let rewritten = match line.kind {
                LineKind::Directive => rewriter.rewrite_uri_attributes(line.text),
                LineKind::Uri => rewriter
                    .wrap(line.text.trim())
                    .map_or(Cow::Borrowed(line.text), Cow::Owned),
                LineKind::Passthrough => Cow::Borrowed(line.text),
            };
            output.push_str(&rewritten);
            output.push_str(line.terminator);
        }

        output
    }
}

fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        LineKind::Passthrough
    } else if trimmed.starts_with('#') {
        if trimmed.starts_with("#EXT") && find_uri_attribute(trimmed).is_some() {
            LineKind::Directive
        } else {
            LineKind::Passthrough
        }
    } else {
        LineKind::Uri
    }
}

/// Byte offset just past the next `URI="` that is a real attribute (preceded
/// by `:` or `,`), so `XURI="` or a quoted value containing it is skipped.
fn find_uri_attribute(line: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = line[offset..].find(URI_ATTRIBUTE) {
        let start = offset + pos;
        if matches!(line[..start].chars().last(), Some(':' | ',')) {
            return Some(start + URI_ATTRIBUTE.len());
        }
        offset = start + URI_ATTRIBUTE.len();
    }
    None
}

/// Resolves references against the manifest's own location and wraps them
/// in the relay base.
#[derive(Debug, Clone)]
pub struct ManifestRewriter<'a> {
    base: Option<Url>,
    relay_base: &'a str,
}

impl<'a> ManifestRewriter<'a> {
    /// `base_url` is where the manifest was actually served from (after
    /// redirects); `relay_base` ends with `url=`.
    #[must_use]
    pub fn new(base_url: Option<&Url>, relay_base: &'a str) -> Self {
        Self {
            base: base_url.cloned(),
            relay_base,
        }
    }

    /// Relay URL for one reference, or `None` when it must stay as written
    /// (non-http scheme, unresolvable, or already relayed).
    #[must_use]
    pub fn wrap(&self, raw: &str) -> Option<String> {
        if raw.is_empty() || raw.starts_with(self.relay_base) {
            return None;
        }

        let target = match Url::parse(raw) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) => self.base.as_ref()?.join(raw).ok()?,
            Err(_) => return None,
        };

        if !matches!(target.scheme(), "http" | "https") {
            return None;
        }

        Some(format!("{}{}", self.relay_base, percent_encode(target.as_str())))
    }

    fn rewrite_uri_attributes<'l>(&self, line: &'l str) -> Cow<'l, str> {
        let mut result = String::with_capacity(line.len() * 2);
        let mut remaining = line;
        let mut changed = false;

        while let Some(value_start) = find_uri_attribute(remaining) {
            result.push_str(&remaining[..value_start]);
            remaining = &remaining[value_start..];

            let Some(end) = remaining.find('"') else {
                break;
            };

            let uri = &remaining[..end];
            match self.wrap(uri) {
                Some(wrapped) => {
                    result.push_str(&wrapped);
                    changed = true;
                }
                None => result.push_str(uri),
            }
            result.push('"');
            remaining = &remaining[end + 1..];
        }

        if !changed {
            return Cow::Borrowed(line);
        }

        result.push_str(remaining);
        Cow::Owned(result)
    }
}

/// Rewrite a whole manifest fetched from `base_url`.
#[must_use]
pub fn rewrite(manifest_text: &str, base_url: &Url, relay_base: &str) -> String {
    let rewriter = ManifestRewriter::new(Some(base_url), relay_base);
    ManifestDocument::parse(manifest_text).rewrite(&rewriter)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELAY: &str = "https://relay.example/proxy?url=";

    fn base() -> Url {
        Url::parse("https://origin.example/path/playlist.m3u8").unwrap()
    }

    #[test]
    fn test_channel_list_example() {
        let manifest = "#EXTM3U\n#EXTINF:-1,Channel A\n/live/chA/index.m3u8";
        let output = rewrite(manifest, &base(), RELAY);
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXTINF:-1,Channel A");
        assert_eq!(
            lines[2],
            "https://relay.example/proxy?url=https%3A%2F%2Forigin.example%2Flive%2FchA%2Findex.m3u8"
        );
    }

    #[test]
    fn test_absolute_segments_are_prefixed_once() {
        let manifest = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nhttps://cdn.example/a/1.ts\n#EXTINF:6.0,\nhttp://cdn.example/a/2.ts?token=x&y=1\n#EXT-X-ENDLIST\n";
        let output = rewrite(manifest, &base(), RELAY);

        assert_eq!(output.lines().count(), manifest.lines().count());
        for line in output.lines().filter(|l| !l.starts_with('#')) {
            assert!(line.starts_with(RELAY));
            assert_eq!(line.matches(RELAY).count(), 1);
            assert!(!line.contains("%25"), "double encoded: {line}");
        }
        assert!(output.contains("url=http%3A%2F%2Fcdn.example%2Fa%2F2.ts%3Ftoken%3Dx%26y%3D1"));
        assert!(output.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn test_relative_segments_resolve_against_manifest_directory() {
        let manifest = "#EXTM3U\n#EXTINF:6.0,\nseg-1.ts\n#EXTINF:6.0,\n../other/seg-2.ts\n#EXTINF:6.0,\n//cdn2.example/seg-3.ts\n";
        let rewriter = ManifestRewriter::new(Some(&base()), RELAY);
        let output = ManifestDocument::parse(manifest).rewrite(&rewriter);
        let uris: Vec<&str> = output.lines().filter(|l| !l.starts_with('#')).collect();

        let expected = [
            base().join("seg-1.ts").unwrap(),
            base().join("../other/seg-2.ts").unwrap(),
            base().join("//cdn2.example/seg-3.ts").unwrap(),
        ];
        assert_eq!(expected[0].as_str(), "https://origin.example/path/seg-1.ts");
        assert_eq!(expected[1].as_str(), "https://origin.example/other/seg-2.ts");
        assert_eq!(expected[2].as_str(), "https://cdn2.example/seg-3.ts");

        for (uri, target) in uris.iter().zip(expected.iter()) {
            assert_eq!(*uri, format!("{RELAY}{}", percent_encode(target.as_str())));
        }
    }

    #[test]
    fn test_uri_attributes_in_directives() {
        let manifest = concat!(
            "#EXTM3U\n",
            "#EXT-X-KEY:METHOD=AES-128,URI=\"keys/k1.bin\",IV=0x1234\n",
            "#EXT-X-MAP:URI=\"init.mp4\"\n",
            "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\",URI=\"https://cdn.example/audio/en.m3u8\"\n",
        );
        let output = rewrite(manifest, &base(), RELAY);
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(
            lines[1],
            format!(
                "#EXT-X-KEY:METHOD=AES-128,URI=\"{RELAY}{}\",IV=0x1234",
                percent_encode("https://origin.example/path/keys/k1.bin")
            )
        );
        assert_eq!(
            lines[2],
            format!(
                "#EXT-X-MAP:URI=\"{RELAY}{}\"",
                percent_encode("https://origin.example/path/init.mp4")
            )
        );
        assert!(lines[3].starts_with("#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\",URI=\""));
        assert!(lines[3].contains(&percent_encode("https://cdn.example/audio/en.m3u8")));
    }

    #[test]
    fn test_non_http_key_uri_passes_through() {
        let line = "#EXT-X-SESSION-KEY:METHOD=SAMPLE-AES,URI=\"skd://key-id\",KEYFORMAT=\"com.apple\"";
        let output = rewrite(line, &base(), RELAY);
        assert_eq!(output, line);
    }

    #[test]
    fn test_attribute_like_text_is_not_rewritten() {
        let line = "#EXT-X-DATERANGE:ID=\"a\",X-URI=\"https://ads.example/x\"";
        assert_eq!(classify_line(line), LineKind::Passthrough);
        assert_eq!(rewrite(line, &base(), RELAY), line);
    }

    #[test]
    fn test_extinf_attributes_are_left_alone() {
        let line = "#EXTINF:-1 tvg-logo=\"https://logos.example/a.png\" group-title=\"News\",News 24";
        assert_eq!(rewrite(line, &base(), RELAY), line);
    }

    #[test]
    fn test_already_relayed_reference_is_not_wrapped_again() {
        let wrapped = format!("{RELAY}{}", percent_encode("https://cdn.example/1.ts"));
        let manifest = format!("#EXTM3U\n{wrapped}\n");
        let output = rewrite(&manifest, &base(), RELAY);
        assert_eq!(output, manifest);
    }

    #[test]
    fn test_crlf_and_blank_lines_are_preserved() {
        let manifest = "#EXTM3U\r\n\r\n# comment\r\nseg.ts\r\n";
        let output = rewrite(manifest, &base(), RELAY);

        assert_eq!(output.matches("\r\n").count(), 4);
        assert_eq!(output.split("\r\n").nth(1), Some(""));
        assert_eq!(output.split("\r\n").nth(2), Some("# comment"));
        assert!(output.split("\r\n").nth(3).unwrap().starts_with(RELAY));
    }

    #[test]
    fn test_inline_manifest_without_base_keeps_relative_uris() {
        let manifest = "#EXTM3U\nseg.ts\nhttps://cdn.example/2.ts\n";
        let rewriter = ManifestRewriter::new(None, RELAY);
        let output = ManifestDocument::parse(manifest).rewrite(&rewriter);
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines[1], "seg.ts");
        assert!(lines[2].starts_with(RELAY));
    }

    #[test]
    fn test_document_classification() {
        let doc = ManifestDocument::parse("#EXTM3U\n#EXT-X-MAP:URI=\"i.mp4\"\n\nseg.ts");
        let kinds: Vec<LineKind> = doc.lines().iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![
                LineKind::Passthrough,
                LineKind::Directive,
                LineKind::Passthrough,
                LineKind::Uri
            ]
        );
        assert_eq!(doc.len(), 4);
        assert_eq!(doc.reference_count(), 2);
        assert_eq!(doc.lines()[3].terminator, "");
    }

    #[test]
    fn test_empty_manifest() {
        let doc = ManifestDocument::parse("");
        assert!(doc.is_empty());
        assert_eq!(rewrite("", &base(), RELAY), "");
    }

    #[test]
    fn test_percent_encode_keeps_unreserved() {
        assert_eq!(percent_encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(percent_encode("a b/c?d=e&f"), "a%20b%2Fc%3Fd%3De%26f");
        assert_eq!(percent_encode("ü"), "%C3%BC");
    }
}
