use crate::catalog::{Catalog, Job, Link, LinkKind, Store, Track, TrackStream};
use crate::config::Quality;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Login state shared by the Beatport and Beatsource handles of one account.
pub struct Session {
    username: String,
    password: String,
    token: RwLock<Option<String>>,
    /// Serializes logins so a burst of rejected requests logs in once.
    login: Mutex<()>,
}

impl Session {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            username: username.into(),
            password: password.into(),
            token: RwLock::new(None),
            login: Mutex::new(()),
        })
    }

    async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct Page<T> {
    results: Vec<T>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct DownloadLocation {
    location: String,
}

/// Catalog client speaking the stores' JSON API over `reqwest`.
pub struct HttpCatalog {
    store: Store,
    base: String,
    client: Client,
    session: Arc<Session>,
}

impl HttpCatalog {
    pub fn new(store: Store, proxy: Option<&str>, session: Arc<Session>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90));
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            store,
            base: store.api_base().to_string(),
            client: builder.build()?,
            session,
        })
    }

    /// Points the client at another API root.
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn classify(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Auth {
                store: self.store.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited {
                store: self.store.to_string(),
            }),
            _ => Err(Error::Api {
                status: status.as_u16(),
                url: response.url().to_string(),
            }),
        }
    }

    async fn bearer(&self) -> Result<String> {
        match self.session.token().await {
            Some(token) => Ok(token),
            None => self.relogin(None).await,
        }
    }

    /// Logs in again unless another task already replaced `stale`.
    async fn relogin(&self, stale: Option<&str>) -> Result<String> {
        let _login = self.session.login.lock().await;
        if let Some(current) = self.session.token().await {
            if Some(current.as_str()) != stale {
                return Ok(current);
            }
        }
        self.authenticate().await?;
        self.session.token().await.ok_or_else(|| Error::Auth {
            store: self.store.to_string(),
            message: "login returned no token".into(),
        })
    }

    /// GETs `url` with the session token. A rejected token gets one fresh
    /// login and one more attempt.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.bearer().await?;
        match self.fetch_json(url, &token).await {
            Err(Error::Auth { .. }) => {
                debug!(url, "token rejected, logging in again");
                let token = self.relogin(Some(token.as_str())).await?;
                self.fetch_json(url, &token).await
            }
            other => other,
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str, token: &str) -> Result<T> {
        debug!(url, "GET");
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let response = self.classify(response)?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn all_tracks(&self, first_page: String) -> Result<Vec<Track>> {
        let mut tracks = Vec::new();
        let mut next = Some(first_page);
        while let Some(url) = next {
            let page: Page<Track> = self.get_json(&url).await?;
            tracks.extend(page.results);
            next = page.next;
        }
        // Playlists and charts have no track numbers of their own.
        for (position, track) in tracks.iter_mut().enumerate() {
            if track.number == 0 {
                track.number = position as u32 + 1;
            }
        }
        Ok(tracks)
    }

    fn collection_path(kind: LinkKind) -> &'static str {
        match kind {
            LinkKind::Track => "tracks",
            LinkKind::Release => "releases",
            LinkKind::Playlist => "playlists",
            LinkKind::Chart => "charts",
        }
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    fn store(&self) -> Store {
        self.store
    }

    async fn authenticate(&self) -> Result<()> {
        let url = format!("{}/auth/login/", self.base);
        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                username: &self.session.username,
                password: &self.session.password,
            })
            .send()
            .await?;
        let login: LoginResponse = self.classify(response)?.json().await?;
        *self.session.token.write().await = Some(login.access_token);
        Ok(())
    }

    async fn resolve(&self, link: &Link) -> Result<Job> {
        let collection = Self::collection_path(link.kind);
        let item_url = format!("{}/catalog/{}/{}/", self.base, collection, link.id);

        if link.kind == LinkKind::Track {
            let mut track: Track = self.get_json(&item_url).await?;
            if track.number == 0 {
                track.number = 1;
            }
            return Ok(Job {
                store: self.store,
                kind: link.kind,
                title: track.name.clone(),
                tracks: vec![track],
            });
        }

        let header: Named = self.get_json(&item_url).await?;
        let tracks = self
            .all_tracks(format!("{}tracks/?per_page=100", item_url))
            .await?;
        Ok(Job {
            store: self.store,
            kind: link.kind,
            title: header.name,
            tracks,
        })
    }

    async fn download(&self, track: &Track, quality: Quality) -> Result<TrackStream> {
        let url = format!(
            "{}/catalog/tracks/{}/download/?quality={}",
            self.base,
            track.id,
            quality.as_param()
        );
        let location: DownloadLocation = self.get_json(&url).await?;

        let response = self.client.get(&location.location).send().await?;
        let response = self.classify(response)?;
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from))
            .boxed();
        Ok(TrackStream {
            content_length,
            body,
        })
    }
}
