//! A tolerant parser for the tiny subset of M3U8 (RFC 8216) this tool
//! needs: `#EXT-X-STREAM-INF` variant lists and `#EXTINF` media
//! playlists. Ill-formed documents are accepted as far as possible;
//! a document may even be classified as master and media at once.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::HlsgetError;

const EXTM3U: &str = "#EXTM3U";
const ENDLIST: &str = "#EXT-X-ENDLIST";

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z]{3,5}://").unwrap());
static BASE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z]{3,5}://[^/]+)/.*$").unwrap());

/// A playlist entry: the URI line plus the attributes collected from the
/// `#EXT-X-STREAM-INF:` / `#EXTINF:` lines preceding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlProperties {
    pub url: String,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Playlist {
    pub urls: Vec<UrlProperties>,
    pub is_master: bool,
    pub is_media: bool,
    pub error: Option<HlsgetError>,
}

impl Playlist {
    pub fn from_buffer(buffer: &[u8]) -> Self {
        let text = String::from_utf8_lossy(buffer);
        let mut playlist = Playlist::default();
        playlist.parse(&text);
        playlist
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Self {
        let mut playlist = Playlist::default();
        match std::fs::read(path) {
            Ok(buffer) => playlist.parse(&String::from_utf8_lossy(&buffer)),
            Err(err) => playlist.error = Some(err.into()),
        }
        playlist
    }

    fn parse(&mut self, text: &str) {
        let mut lines = text.lines();

        // The first non-empty line decides whether this is m3u8 at all.
        match lines.by_ref().find(|line| !line.is_empty()) {
            Some(EXTM3U) => {}
            _ => {
                self.error = Some(HlsgetError::WrongFileFormat);
                return;
            }
        }

        let mut pending: HashMap<String, String> = HashMap::new();

        for line in lines {
            if line == ENDLIST {
                break;
            } else if let Some(info) = line.strip_prefix("#EXT-X-STREAM-INF:") {
                merge_properties(&mut pending, parse_stream_inf(info));
                self.is_master = true;
            } else if let Some(info) = line.strip_prefix("#EXTINF:") {
                merge_properties(&mut pending, parse_extinf(info));
                self.is_media = true;
            } else if !line.starts_with('#') && !line.is_empty() {
                self.urls.push(UrlProperties {
                    url: line.to_string(),
                    properties: std::mem::take(&mut pending),
                });
            } else if line.is_empty() {
                pending.clear();
            }
            // any other #-line is unsupported and ignored
        }
    }

    pub fn contains_absolute_urls(&self) -> bool {
        self.urls.iter().any(|u| is_absolute_url(&u.url))
    }

    pub fn contains_relative_urls(&self) -> bool {
        self.urls.iter().any(|u| !is_absolute_url(&u.url))
    }

    /// Rewrite every relative url as `<base>/<url>`, normalizing the
    /// slashes at the seam. Absolute urls are left untouched.
    pub fn set_base_url(&mut self, base: &str) {
        let base = base.trim_end_matches('/');
        for entry in &mut self.urls {
            if !is_absolute_url(&entry.url) {
                let relative = entry.url.trim_start_matches('/');
                entry.url = format!("{base}/{relative}");
            }
        }
    }
}

/// True iff the first line of the buffer is exactly `#EXTM3U`.
pub fn is_m3u8(buffer: &[u8]) -> bool {
    String::from_utf8_lossy(buffer).lines().next() == Some(EXTM3U)
}

/// File variant of [`is_m3u8`]. Unreadable files report the io error.
pub fn is_m3u8_file<P: AsRef<Path>>(path: P) -> Result<bool, std::io::Error> {
    let buffer = std::fs::read(path)?;
    Ok(is_m3u8(&buffer))
}

pub fn is_absolute_url(url: &str) -> bool {
    ABSOLUTE_URL.is_match(url)
}

/// The scheme + authority part of `url`, or an empty string when the url
/// has no authority to extract.
pub fn base_url(url: &str) -> String {
    BASE_URL
        .captures(url)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}

fn merge_properties(pending: &mut HashMap<String, String>, props: HashMap<String, String>) {
    for (key, value) in props {
        pending.insert(key, value);
    }
}

/// `#EXT-X-STREAM-INF:` payload: a plain `KEY=VALUE,...` attribute list.
fn parse_stream_inf(info: &str) -> HashMap<String, String> {
    parse_properties(&tokenize_properties(info))
}

/// `#EXTINF:` payload: `RUNTIME(,KEY=VALUE)*(,DISPLAY-TITLE)?`.
///
/// The first token carries no `=` when well-formed and is stored under
/// `RUNTIME`; the optional trailing token without `=` is the display
/// title. Either one that does contain `=` is treated as an ordinary
/// attribute instead.
fn parse_extinf(info: &str) -> HashMap<String, String> {
    let mut tokens = tokenize_properties(info);
    if tokens.is_empty() {
        return HashMap::new();
    }

    let first = tokens.remove(0).trim().to_string();
    let last = if tokens.is_empty() {
        String::new()
    } else {
        tokens.pop().unwrap().trim().to_string()
    };

    let mut properties = parse_properties(&tokens);

    if !first.contains('=') {
        properties.insert("RUNTIME".to_string(), first);
    } else {
        let (key, value) = parse_property(&first);
        properties.insert(key, value);
    }

    if !last.is_empty() {
        if !last.contains('=') {
            properties.insert("DISPLAY-TITLE".to_string(), last);
        } else {
            let (key, value) = parse_property(&last);
            properties.insert(key, value);
        }
    }

    properties
}

/// Split an attribute list on commas, then re-join the pieces of
/// double-quoted values that contained commas themselves
/// (e.g. `CODECS="mp4a.40.2,avc1.42c01e"`).
fn tokenize_properties(info: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut quoted = String::new();

    for piece in info.split(',') {
        if !quoted.is_empty() {
            quoted.push(',');
            quoted.push_str(piece);
            if piece.ends_with('"') {
                tokens.push(std::mem::take(&mut quoted));
            }
        } else if piece.matches('"').count() == 1 && !piece.ends_with('"') {
            quoted = piece.to_string();
        } else {
            tokens.push(piece.to_string());
        }
    }

    // an unterminated quoted run is kept as-is, garbage in garbage out
    if !quoted.is_empty() {
        tokens.push(quoted);
    }

    tokens
}

/// Parse `KEY=VALUE` tokens; the first occurrence of a key wins.
fn parse_properties(tokens: &[String]) -> HashMap<String, String> {
    let mut properties = HashMap::new();

    for token in tokens {
        if token.contains('=') {
            let (key, value) = parse_property(token);
            properties.entry(key).or_insert(value);
        }
        // tokens without `=` are not properties, skip them
    }

    properties
}

/// Split one `KEY=VALUE` token, trimming both sides and stripping one
/// pair of outer double quotes from the value.
fn parse_property(token: &str) -> (String, String) {
    let (key, value) = match token.split_once('=') {
        Some((key, value)) => (key, value),
        None => ("", token),
    };

    let key = key.trim().to_string();
    let mut value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value = &value[1..value.len() - 1];
    }

    (key, value.to_string())
}
