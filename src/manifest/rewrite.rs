use std::borrow::Cow;

/// Classification of one playlist line, decided on its trimmed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    /// `#EXTM3U`, `#EXTINF:...`, `#EXT-X-KEY:...` and plain comments.
    Tag,
    /// Media reference resolved against the playlist's base URL.
    Relative,
    /// Media reference that already carries a scheme.
    Absolute,
}

/// Classify a playlist line.
pub fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        LineKind::Blank
    } else if trimmed.starts_with('#') {
        LineKind::Tag
    } else if trimmed.starts_with("http") {
        LineKind::Absolute
    } else {
        LineKind::Relative
    }
}

/// Prefix of `target` up to and including its final `/`.
/// Empty when `target` contains no slash at all.
pub fn base_url(target: &str) -> &str {
    match target.rfind('/') {
        Some(idx) => &target[..=idx],
        None => "",
    }
}

/// Build a self-referential relay URL for `resolved`, carrying `referer` along
/// so the follow-up fetch impersonates the same page.
pub fn relay_url(relay_path: &str, resolved: &str, referer: &str) -> String {
    format!(
        "{}?url={}&referer={}",
        relay_path,
        urlencoding::encode(resolved),
        urlencoding::encode(referer)
    )
}

/// Rewrites every media reference of a playlist to route through the relay.
///
/// Tag lines are emitted verbatim, including tags with a `URI=` attribute such
/// as `#EXT-X-KEY`, so key fetches go straight to the origin. Relative
/// references are joined to the base URL by plain concatenation; `.` and `..`
/// segments are left for the origin to interpret.
#[derive(Debug, Clone)]
pub struct ManifestRewriter<'a> {
    relay_path: &'a str,
    base_url: &'a str,
    referer: &'a str,
}

impl<'a> ManifestRewriter<'a> {
    pub fn new(relay_path: &'a str, target: &'a str, referer: &'a str) -> Self {
        Self {
            relay_path,
            base_url: base_url(target),
            referer,
        }
    }

    /// Rewrite a single line; non-media lines are borrowed unchanged.
    pub fn rewrite_line<'l>(&self, line: &'l str) -> Cow<'l, str> {
        let trimmed = line.trim();
        match classify_line(line) {
            LineKind::Blank | LineKind::Tag => Cow::Borrowed(line),
            LineKind::Absolute => Cow::Owned(relay_url(self.relay_path, trimmed, self.referer)),
            LineKind::Relative => {
                let resolved = format!("{}{}", self.base_url, trimmed);
                Cow::Owned(relay_url(self.relay_path, &resolved, self.referer))
            }
        }
    }

    /// Rewrite a whole playlist. Lines are split and re-joined on `\n`, so a
    /// trailing newline survives and `\r` stays on untouched lines.
    pub fn rewrite(&self, manifest: &str) -> String {
        let mut out = String::with_capacity(manifest.len() * 2);
        for (idx, line) in manifest.split('\n').enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            out.push_str(&self.rewrite_line(line));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERER: &str = "https://megacloud.tv/";

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line(""), LineKind::Blank);
        assert_eq!(classify_line("   \t"), LineKind::Blank);
        assert_eq!(classify_line("#EXTM3U"), LineKind::Tag);
        assert_eq!(classify_line("  #EXTINF:10.0,"), LineKind::Tag);
        assert_eq!(classify_line("seg1.ts"), LineKind::Relative);
        assert_eq!(classify_line("../low/seg1.ts"), LineKind::Relative);
        assert_eq!(classify_line("https://cdn.example/seg.ts"), LineKind::Absolute);
        assert_eq!(classify_line("http://cdn.example/seg.ts"), LineKind::Absolute);
    }

    #[test]
    fn test_base_url() {
        assert_eq!(
            base_url("https://host/path/a/video.m3u8"),
            "https://host/path/a/"
        );
        assert_eq!(base_url("https://host/"), "https://host/");
        assert_eq!(base_url("video.m3u8"), "");
    }

    #[test]
    fn test_relative_line_resolved_against_base() {
        let rewriter =
            ManifestRewriter::new("/api/proxy", "https://host/path/a/video.m3u8", REFERER);
        assert_eq!(
            rewriter.rewrite_line("seg1.ts"),
            "/api/proxy?url=https%3A%2F%2Fhost%2Fpath%2Fa%2Fseg1.ts&referer=https%3A%2F%2Fmegacloud.tv%2F"
        );
    }

    #[test]
    fn test_absolute_line_wrapped_unchanged() {
        let rewriter =
            ManifestRewriter::new("/api/proxy", "https://host/path/a/video.m3u8", REFERER);
        let out = rewriter.rewrite_line("  https://other/seg2.ts  ");
        let encoded = out
            .strip_prefix("/api/proxy?url=")
            .and_then(|rest| rest.split('&').next())
            .unwrap();
        assert_eq!(
            urlencoding::decode(encoded).unwrap(),
            "https://other/seg2.ts"
        );
    }

    #[test]
    fn test_dot_segments_not_normalized() {
        let rewriter = ManifestRewriter::new("/r", "https://host/a/b/index.m3u8", REFERER);
        let out = rewriter.rewrite_line("../c/seg.ts");
        assert!(out.starts_with("/r?url=https%3A%2F%2Fhost%2Fa%2Fb%2F..%2Fc%2Fseg.ts&"));
    }

    #[test]
    fn test_tags_and_blanks_untouched() {
        let manifest = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\n#EXTINF:4.0,\nseg0.ts\n";
        let rewriter = ManifestRewriter::new("/api/proxy", "https://h/x/index.m3u8", REFERER);
        let out = rewriter.rewrite(manifest);
        let lines: Vec<&str> = out.split('\n').collect();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "#EXTINF:4.0,");
        assert!(lines[4].starts_with("/api/proxy?url="));
        assert_eq!(lines[5], "");
    }

    #[test]
    fn test_crlf_tag_lines_kept_verbatim() {
        let rewriter = ManifestRewriter::new("/api/proxy", "https://h/x/index.m3u8", REFERER);
        let out = rewriter.rewrite("#EXTM3U\r\nseg0.ts\r\n");
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(lines[0], "#EXTM3U\r");
        assert!(lines[1].contains("url=https%3A%2F%2Fh%2Fx%2Fseg0.ts&"));
        assert!(!lines[1].ends_with('\r'));
    }

    #[test]
    fn test_rewrite_is_deterministic() {
        let manifest = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\nhttps://cdn/high.m3u8";
        let rewriter = ManifestRewriter::new("/api/proxy", "https://h/master.m3u8", REFERER);
        assert_eq!(rewriter.rewrite(manifest), rewriter.rewrite(manifest));
    }
}
