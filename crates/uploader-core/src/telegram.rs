//! Bot API upload client.
//!
//! Sends each episode with `sendAudio` (or `sendVoice`) to the chat recorded
//! in the session file and returns the message the platform stored.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::multipart::{Form, Part};
use serde::Deserialize;

use crate::client::{Peer, UploadClient, UploadRequest};
use crate::error::{ClientError, ConfigError};
use crate::result::SentMessage;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_SESSION_PATH: &str = "session.json";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

static API_HASH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{32}$").unwrap());

/// Credentials and endpoint, loaded once at startup.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_id: i64,
    pub api_hash: String,
    pub session_path: PathBuf,
    pub api_url: String,
    pub timeout: Duration,
}

impl TelegramConfig {
    pub fn new(api_id: i64, api_hash: impl Into<String>, session_path: impl Into<PathBuf>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
            session_path: session_path.into(),
            api_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_id <= 0 {
            return Err(ConfigError::ApiId(self.api_id));
        }
        if !API_HASH_RE.is_match(&self.api_hash) {
            return Err(ConfigError::ApiHash);
        }
        Ok(())
    }
}

/// Authorized identity stored at `session_path`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Session {
    /// Application the session was issued for
    pub api_id: i64,
    pub bot_token: String,
    /// Chat used for [`Peer::SelfChat`]
    pub chat_id: i64,
}

impl Session {
    /// Load the session file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::SessionIo {
            path: path.to_path_buf(),
            source,
        })?;
        let session: Session = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            ConfigError::SessionFormat {
                path: path.to_path_buf(),
                source,
            }
        })?;

        if session.bot_token.trim().is_empty() {
            return Err(ConfigError::Session {
                path: path.to_path_buf(),
                reason: "bot_token is empty".to_string(),
            });
        }
        Ok(session)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, ClientError> {
        if !self.ok {
            return Err(ClientError::Api {
                code: self.error_code.unwrap_or_default(),
                description: self.description.unwrap_or_default(),
            });
        }
        self.result
            .ok_or_else(|| ClientError::Response("ok response without result".to_string()))
    }
}

/// Decode a Bot API reply to a send call.
pub fn decode_send_response(body: &str) -> Result<SentMessage, ClientError> {
    let response: ApiResponse<SentMessage> =
        serde_json::from_str(body).map_err(|e| ClientError::Response(e.to_string()))?;
    response.into_result()
}

pub struct TelegramClient {
    http: reqwest::blocking::Client,
    api_url: String,
    session: Session,
}

impl TelegramClient {
    /// Validate `config`, load its session and build the HTTP client.
    pub fn new(config: &TelegramConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let session = Session::load(&config.session_path)?;
        if session.api_id != config.api_id {
            return Err(ConfigError::Session {
                path: config.session_path.clone(),
                reason: format!(
                    "issued for api_id {}, configured api_id is {}",
                    session.api_id, config.api_id
                ),
            });
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    fn chat_id(&self, peer: Peer) -> i64 {
        match peer {
            Peer::SelfChat => self.session.chat_id,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.session.bot_token, method)
    }
}

fn file_part(path: &Path) -> Result<Part, ClientError> {
    let file_error = |source| ClientError::File {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(file_error)?;
    let len = file.metadata().map_err(file_error)?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    Part::reader_with_length(file, len)
        .file_name(name)
        .mime_str(mime.essence_str())
        .map_err(ClientError::Http)
}

impl UploadClient for TelegramClient {
    fn upload(&self, request: &UploadRequest) -> Result<SentMessage, ClientError> {
        let (method, field) = if request.voice {
            ("sendVoice", "voice")
        } else {
            ("sendAudio", "audio")
        };

        let mut form = Form::new()
            .text("chat_id", self.chat_id(request.peer).to_string())
            .text("title", request.title.clone())
            .text("performer", request.performer.clone())
            .part(field, file_part(&request.file_path)?);

        let thumbnail = Path::new(&request.thumbnail_ref);
        if !request.thumbnail_ref.is_empty() && thumbnail.is_file() {
            form = form.part("thumbnail", file_part(thumbnail)?);
        } else if !request.thumbnail_ref.is_empty() {
            tracing::debug!(
                thumbnail = %request.thumbnail_ref,
                "Thumbnail reference is not a local file, sending without it"
            );
        }

        tracing::debug!(method, file = %request.file_path.display(), "Sending upload request");
        let body = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .and_then(|response| response.text())
            // the request URL embeds the bot token
            .map_err(|e| ClientError::Http(e.without_url()))?;

        decode_send_response(&body)
    }
}
