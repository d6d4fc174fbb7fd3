use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{path::PathBuf, process::Stdio, sync::OnceLock, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use super::{CatalogExpander, PlaylistExpansion, ResolveError, TrackMetadata, TrackRef, TrackResolver};
use crate::{audio::track::StreamRef, config::Config};

/// Resolver and playlist expander backed by the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlpClient {
    binary: String,
    cookies: Option<PathBuf>,
    timeout: Duration,
    max_playlist: usize,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            cookies: None,
            timeout: Duration::from_secs(30),
            max_playlist: 100,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut client = Self::new(config.ytdlp_path.clone())
            .with_timeout(config.resolve_timeout)
            .with_max_playlist(config.max_playlist_size);
        if let Some(cookies) = &config.ytdlp_cookies {
            client = client.with_cookies(cookies.clone());
        }
        client
    }

    pub fn with_cookies(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_playlist(mut self, max: usize) -> Self {
        self.max_playlist = max;
        self
    }

    /// Runs yt-dlp with `args` and returns its stdout.
    async fn run(&self, args: &[&str]) -> Result<String, ResolveError> {
        let mut cmd = Command::new(&self.binary);
        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("🔧 {} {}", self.binary, args.join(" "));
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ResolveError::NetworkFailure(format!("yt-dlp timed out after {:?}", self.timeout)))?
            .map_err(|e| ResolveError::NetworkFailure(format!("could not run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("⚠️ yt-dlp exited with {}: {}", output.status, stderr.trim());
            return Err(classify_stderr(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TrackResolver for YtDlpClient {
    async fn resolve(&self, query: &str) -> Result<Vec<TrackMetadata>, ResolveError> {
        let target = search_target(query);
        let stdout = self.run(&["-j", "--no-playlist", &target]).await?;
        let tracks = parse_entries(&stdout);

        info!("🔍 '{}' resolved to {} track(s)", query, tracks.len());
        Ok(tracks)
    }

    async fn resolve_stream(&self, reference: &str) -> Result<String, ResolveError> {
        let stdout = self
            .run(&["-f", "bestaudio/best", "-g", "--no-playlist", reference])
            .await?;

        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or(ResolveError::NotFound)
    }
}

#[async_trait]
impl CatalogExpander for YtDlpClient {
    fn handles(&self, query: &str) -> bool {
        is_playlist_url(query)
    }

    async fn expand_playlist(&self, url: &str, eager: usize) -> Result<PlaylistExpansion, ResolveError> {
        let stdout = self.run(&["--flat-playlist", "-J", url]).await?;
        let playlist: FlatPlaylist =
            serde_json::from_str(&stdout).map_err(|e| ResolveError::NetworkFailure(format!("bad playlist json: {e}")))?;

        let refs: Vec<TrackRef> = playlist
            .entries
            .into_iter()
            .filter_map(|entry| entry.reference())
            .take(self.max_playlist)
            .map(TrackRef)
            .collect();

        info!(
            "📜 Playlist '{}' has {} entries",
            playlist.title.as_deref().unwrap_or(url),
            refs.len()
        );
        Ok(PlaylistExpansion::split(refs, eager))
    }
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    entries: Vec<VideoInfo>,
}

impl VideoInfo {
    fn flatten(self, out: &mut Vec<TrackMetadata>) {
        if !self.entries.is_empty() {
            for entry in self.entries {
                entry.flatten(out);
            }
            return;
        }

        // Entries without a direct url are not playable.
        let Some(url) = self.url.filter(|u| !u.is_empty()) else {
            return;
        };
        let canonical_url = self.webpage_url.unwrap_or_else(|| url.clone());
        out.push(TrackMetadata {
            title: self.title.unwrap_or_default(),
            stream: StreamRef::Deferred(canonical_url.clone()),
            canonical_url,
            // Out-of-range values count as unknown.
            duration: self
                .duration
                .filter(|d| *d > 0.0)
                .and_then(|d| Duration::try_from_secs_f64(d).ok()),
            thumbnail: self.thumbnail,
        });
    }
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    title: Option<String>,
    #[serde(default)]
    entries: Vec<FlatEntry>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
}

impl FlatEntry {
    fn reference(self) -> Option<String> {
        self.url
            .or(self.webpage_url)
            .or_else(|| self.id.map(|id| format!("https://www.youtube.com/watch?v={id}")))
            .filter(|r| !r.is_empty())
    }
}

/// Parses `-j` output: one JSON object per line.
fn parse_entries(stdout: &str) -> Vec<TrackMetadata> {
    let mut tracks = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<VideoInfo>(line) {
            Ok(info) => info.flatten(&mut tracks),
            Err(e) => debug!("Skipping unparsable yt-dlp line: {}", e),
        }
    }
    tracks
}

fn search_target(query: &str) -> String {
    if Url::parse(query).is_ok_and(|u| matches!(u.scheme(), "http" | "https")) {
        query.to_string()
    } else {
        format!("ytsearch1:{query}")
    }
}

fn is_playlist_url(query: &str) -> bool {
    let Ok(url) = Url::parse(query) else {
        return false;
    };
    if url.host_str() == Some("open.spotify.com") {
        return false;
    }
    url.path().contains("/playlist") || url.query_pairs().any(|(key, _)| key == "list")
}

fn classify_stderr(stderr: &str) -> ResolveError {
    static RATE_LIMITED: OnceLock<Option<Regex>> = OnceLock::new();
    static NOT_FOUND: OnceLock<Option<Regex>> = OnceLock::new();

    let rate_limited = RATE_LIMITED.get_or_init(|| Regex::new(r"(?i)\b429\b|too many requests").ok());
    let not_found = NOT_FOUND
        .get_or_init(|| Regex::new(r"(?i)unavailable|not found|no video results|private video|is private").ok());

    if rate_limited.as_ref().is_some_and(|re| re.is_match(stderr)) {
        ResolveError::RateLimited
    } else if not_found.as_ref().is_some_and(|re| re.is_match(stderr)) {
        ResolveError::NotFound
    } else {
        let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("unknown error");
        ResolveError::NetworkFailure(last.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_entries_skips_lines_without_url() {
        let stdout = concat!(
            r#"{"title":"First","url":"https://cdn/1","webpage_url":"https://yt/1","duration":61.5,"thumbnail":"https://img/1"}"#,
            "\n",
            r#"{"title":"No stream"}"#,
            "\n",
            "not json\n",
            r#"{"title":"Second","url":"https://cdn/2"}"#,
        );

        let tracks = parse_entries(stdout);

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "First");
        assert_eq!(tracks[0].canonical_url, "https://yt/1");
        assert_eq!(tracks[0].stream, StreamRef::Deferred("https://yt/1".to_string()));
        assert_eq!(tracks[0].duration, Some(Duration::from_secs_f64(61.5)));
        assert_eq!(tracks[1].canonical_url, "https://cdn/2");
        assert_eq!(tracks[1].duration, None);
    }

    #[test]
    fn test_parse_entries_treats_unrepresentable_duration_as_unknown() {
        let stdout = concat!(
            r#"{"title":"Live","url":"https://cdn/x","duration":1e30}"#,
            "\n",
            r#"{"title":"Odd","url":"https://cdn/y","duration":-3}"#,
        );

        let tracks = parse_entries(stdout);

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].duration, None);
        assert_eq!(tracks[1].duration, None);
    }

    #[test]
    fn test_parse_entries_flattens_nested_entries() {
        let stdout = r#"{"title":"Mix","entries":[{"title":"A","url":"https://cdn/a"},{"title":"B","url":"https://cdn/b"}]}"#;

        let titles: Vec<_> = parse_entries(stdout).into_iter().map(|t| t.title).collect();

        assert_eq!(titles, vec!["A", "B"]);
    }

    #[test]
    fn test_classify_stderr() {
        assert_eq!(classify_stderr("ERROR: HTTP Error 429: Too Many Requests"), ResolveError::RateLimited);
        assert_eq!(classify_stderr("ERROR: [youtube] abc: Video unavailable"), ResolveError::NotFound);
        assert_eq!(classify_stderr("ERROR: No video results"), ResolveError::NotFound);
        assert_eq!(
            classify_stderr("WARNING: retrying\nERROR: connection reset\n"),
            ResolveError::NetworkFailure("ERROR: connection reset".to_string())
        );
    }

    #[test]
    fn test_playlist_detection() {
        assert!(is_playlist_url("https://www.youtube.com/playlist?list=PL123"));
        assert!(is_playlist_url("https://www.youtube.com/watch?v=abc&list=PL123"));
        assert!(!is_playlist_url("https://www.youtube.com/watch?v=abc"));
        assert!(!is_playlist_url("never gonna give you up"));
        assert!(!is_playlist_url("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M"));
    }

    #[test]
    fn test_search_target() {
        assert_eq!(search_target("lofi beats"), "ytsearch1:lofi beats");
        assert_eq!(search_target("https://youtu.be/abc"), "https://youtu.be/abc");
    }

    #[test]
    fn test_flat_entry_reference_fallbacks() {
        let entry = FlatEntry {
            id: Some("xyz".to_string()),
            url: None,
            webpage_url: None,
        };
        assert_eq!(entry.reference().as_deref(), Some("https://www.youtube.com/watch?v=xyz"));
    }
}
