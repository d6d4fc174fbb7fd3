use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::{CatalogExpander, PlaylistExpansion, ResolveError, TrackRef};
use crate::config::Config;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
const PLAYLIST_PAGE: usize = 100;
const ALBUM_PAGE: usize = 50;

/// Expands Spotify track, album and playlist links into `"artist - title"`
/// search terms for the regular resolver.
///
/// Uses the client-credentials flow; the access token is cached until
/// shortly before it expires.
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    max_items: usize,
    token: Mutex<Option<AccessToken>>,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    Track,
    Album,
    Playlist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SpotifyLink {
    kind: LinkKind,
    id: String,
}

impl SpotifyClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            max_items: 100,
            token: Mutex::new(None),
        }
    }

    /// Client built from the configured credentials, if both are present.
    pub fn from_config(config: &Config) -> Option<Self> {
        let (id, secret) = config.spotify_credentials()?;
        Some(Self::new(id, secret).with_max_items(config.max_playlist_size))
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = max;
        self
    }

    async fn access_token(&self) -> Result<String, ResolveError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(network)?;
        let grant: TokenGrant = decode(response).await?;

        debug!("🔑 Spotify token refreshed, valid for {}s", grant.expires_in);
        let lifetime = Duration::from_secs(grant.expires_in.saturating_sub(60));
        let value = grant.access_token;
        *cached = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ResolveError> {
        let token = self.access_token().await?;
        let response = self.http.get(url).bearer_auth(&token).send().await.map_err(network)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.token.lock().await.take();
        }
        decode(response).await
    }

    async fn track_terms(&self, link: &SpotifyLink) -> Result<Vec<String>, ResolveError> {
        match link.kind {
            LinkKind::Track => {
                let track: SpotifyTrack = self.get(&format!("{API_BASE}/tracks/{}", link.id)).await?;
                Ok(track.search_term().into_iter().collect())
            }
            LinkKind::Album => {
                let first = format!("{API_BASE}/albums/{}/tracks?limit={ALBUM_PAGE}", link.id);
                self.collect_pages(first, |item: SpotifyTrack| item.search_term()).await
            }
            LinkKind::Playlist => {
                let first = format!("{API_BASE}/playlists/{}/tracks?limit={PLAYLIST_PAGE}", link.id);
                self.collect_pages(first, |item: PlaylistItem| item.track.and_then(|t| t.search_term()))
                    .await
            }
        }
    }

    /// Follows `next` links until the listing ends or `max_items` is reached.
    async fn collect_pages<I, F>(&self, first: String, term: F) -> Result<Vec<String>, ResolveError>
    where
        I: DeserializeOwned,
        F: Fn(I) -> Option<String>,
    {
        let mut terms = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            let page: Page<I> = self.get(&url).await?;
            terms.extend(page.items.into_iter().filter_map(&term));
            if terms.len() >= self.max_items {
                terms.truncate(self.max_items);
                break;
            }
            next = page.next;
        }
        Ok(terms)
    }
}

#[async_trait]
impl CatalogExpander for SpotifyClient {
    fn handles(&self, query: &str) -> bool {
        parse_link(query).is_some()
    }

    async fn expand_playlist(&self, url: &str, eager: usize) -> Result<PlaylistExpansion, ResolveError> {
        let link = parse_link(url).ok_or(ResolveError::NotFound)?;
        let terms = self.track_terms(&link).await?;
        if terms.is_empty() {
            warn!("🟢 Spotify {:?} {} has no playable tracks", link.kind, link.id);
            return Err(ResolveError::NotFound);
        }

        info!("🟢 Spotify {:?} {}: {} tracks", link.kind, link.id, terms.len());
        Ok(PlaylistExpansion::split(terms.into_iter().map(TrackRef).collect(), eager))
    }
}

/// Recognizes `https://open.spotify.com/{track,album,playlist}/<id>` (with an
/// optional `intl-xx` segment) and `spotify:<kind>:<id>` URIs.
fn parse_link(query: &str) -> Option<SpotifyLink> {
    let query = query.trim();
    let (kind, id) = if let Some(uri) = query.strip_prefix("spotify:") {
        let (kind, id) = uri.split_once(':')?;
        (kind.to_string(), id.to_string())
    } else {
        let url = Url::parse(query).ok()?;
        if url.host_str() != Some("open.spotify.com") {
            return None;
        }
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty() && !s.starts_with("intl-"));
        (segments.next()?.to_string(), segments.next()?.to_string())
    };

    let kind = match kind.as_str() {
        "track" => LinkKind::Track,
        "album" => LinkKind::Album,
        "playlist" => LinkKind::Playlist,
        _ => return None,
    };
    let id = id.split(['?', '&', '/']).next().filter(|id| !id.is_empty())?;
    Some(SpotifyLink {
        kind,
        id: id.to_string(),
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ResolveError> {
    match response.status() {
        status if status.is_success() => response.json().await.map_err(network),
        StatusCode::TOO_MANY_REQUESTS => Err(ResolveError::RateLimited),
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Err(ResolveError::NotFound),
        status => Err(ResolveError::NetworkFailure(format!("spotify answered {status}"))),
    }
}

fn network(error: reqwest::Error) -> ResolveError {
    ResolveError::NetworkFailure(format!("spotify: {error}"))
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    /// `null` for removed or local tracks.
    track: Option<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

impl SpotifyTrack {
    /// `"artist - title"` with the first credited artist.
    fn search_term(self) -> Option<String> {
        let name = self.name.trim();
        if name.is_empty() {
            return None;
        }
        match self.artists.first().map(|a| a.name.trim()).filter(|a| !a.is_empty()) {
            Some(artist) => Some(format!("{artist} - {name}")),
            None => Some(name.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn link(kind: LinkKind, id: &str) -> Option<SpotifyLink> {
        Some(SpotifyLink {
            kind,
            id: id.to_string(),
        })
    }

    #[test]
    fn test_parse_link_forms() {
        assert_eq!(
            parse_link("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc"),
            link(LinkKind::Track, "4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            parse_link("https://open.spotify.com/intl-nl/album/1DFixLWuPkv3KT3TnV35m3"),
            link(LinkKind::Album, "1DFixLWuPkv3KT3TnV35m3")
        );
        assert_eq!(
            parse_link("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M"),
            link(LinkKind::Playlist, "37i9dQZF1DXcBWIGoYBM5M")
        );
        assert_eq!(parse_link("https://open.spotify.com/artist/0OdUWJ0sBjDrqHygGUXeCF"), None);
        assert_eq!(parse_link("https://www.youtube.com/playlist?list=PL1"), None);
        assert_eq!(parse_link("daft punk - one more time"), None);
    }

    #[test]
    fn test_handles_only_spotify_links() {
        let client = SpotifyClient::new("id", "secret");

        assert!(client.handles("https://open.spotify.com/playlist/abc"));
        assert!(!client.handles("https://www.youtube.com/watch?v=abc&list=PL1"));
    }

    #[test]
    fn test_playlist_page_skips_missing_tracks() {
        let json = r#"{
            "items": [
                {"track": {"name": "One More Time", "artists": [{"name": "Daft Punk"}, {"name": "Romanthony"}]}},
                {"track": null},
                {"track": {"name": "  ", "artists": [{"name": "Nobody"}]}},
                {"track": {"name": "Untitled", "artists": []}}
            ],
            "next": "https://api.spotify.com/v1/playlists/x/tracks?offset=100&limit=100"
        }"#;

        let page: Page<PlaylistItem> = serde_json::from_str(json).unwrap();
        assert!(page.next.is_some());

        let terms: Vec<String> = page
            .items
            .into_iter()
            .filter_map(|item| item.track.and_then(SpotifyTrack::search_term))
            .collect();
        assert_eq!(terms, vec!["Daft Punk - One More Time", "Untitled"]);
    }

    #[test]
    fn test_album_page_ends_without_next() {
        let json = r#"{"items": [{"name": "Aerodynamic", "artists": [{"name": "Daft Punk"}]}], "next": null}"#;

        let page: Page<SpotifyTrack> = serde_json::from_str(json).unwrap();

        assert!(page.next.is_none());
        assert_eq!(
            page.items.into_iter().filter_map(SpotifyTrack::search_term).collect::<Vec<_>>(),
            vec!["Daft Punk - Aerodynamic"]
        );
    }
}
