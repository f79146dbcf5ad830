//! Concrete [`Transport`] backed by `grammers-client`, the only MTProto
//! client in the retrieval pack's dependency universe. The core engine never
//! depends on this module directly — it is wired in at the CLI boundary,
//! exactly the way the [`Transport`] trait is meant to be consumed.
//!
//! `FileRef::access_hash` carries more than its name suggests: since the
//! engine's domain type only has room for two opaque strings, this adapter
//! packs the document's real access hash and file reference bytes into it as
//! `"<access_hash>:<file_reference_hex>"`, and keeps a side table from
//! `file_id` back to the owning chat/message for [`Transport::refresh_file_ref`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use grammers_client::types::{Chat, Media};
use grammers_client::{Client, Config as ClientConfig, InitParams, SignInError};
use grammers_session::Session;
use grammers_tl_types as tl;

use tgaudio_core::transport::{AudioInfo, ChunkResult, Direction, FileRef, Message, Transport, TransportError};

/// Where the authorized session blob lives between runs.
pub fn session_path() -> anyhow::Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("tgaudio")?;
    Ok(xdg_dirs.place_state_file("session.bin")?)
}

fn api_credentials() -> anyhow::Result<(i32, String)> {
    let api_id: i32 = std::env::var("TGAUDIO_API_ID")
        .map_err(|_| anyhow::anyhow!("TGAUDIO_API_ID is not set (see .env.example)"))?
        .parse()?;
    let api_hash = std::env::var("TGAUDIO_API_HASH")
        .map_err(|_| anyhow::anyhow!("TGAUDIO_API_HASH is not set (see .env.example)"))?;
    Ok((api_id, api_hash))
}

/// Connects using a previously-authorized session. Used by `download` and
/// the read-only commands; callers should direct the user to `tgaudio login`
/// first if this returns an auth error.
pub async fn connect() -> anyhow::Result<Client> {
    let (api_id, api_hash) = api_credentials()?;
    let session_path = session_path()?;
    let session = Session::load_file_or_create(&session_path)?;

    let client = Client::connect(ClientConfig {
        session,
        api_id,
        api_hash,
        params: InitParams::default(),
    })
    .await?;

    if !client.is_authorized().await? {
        anyhow::bail!("no authorized Telegram session; run `tgaudio login` first");
    }

    Ok(client)
}

/// Runs the interactive phone-code / 2FA flow and persists the resulting
/// session, mirroring the teacher's pattern of a CLI command owning
/// interactive prompts while the core stays prompt-free.
pub async fn login(phone: Option<String>) -> anyhow::Result<()> {
    let (api_id, api_hash) = api_credentials()?;
    let session_path = session_path()?;
    let session = Session::load_file_or_create(&session_path)?;

    let client = Client::connect(ClientConfig {
        session,
        api_id,
        api_hash,
        params: InitParams::default(),
    })
    .await?;

    if client.is_authorized().await? {
        println!("already logged in");
        return Ok(());
    }

    let phone = match phone {
        Some(p) => p,
        None => prompt("phone number (international format): ")?,
    };

    let token = client.request_login_code(&phone).await?;
    let code = prompt("login code: ")?;

    match client.sign_in(&token, &code).await {
        Ok(_user) => {}
        Err(SignInError::PasswordRequired(password_token)) => {
            let password = rpassword::prompt_password("two-factor password: ")?;
            client.check_password(password_token, password.trim()).await?;
        }
        Err(err) => return Err(err.into()),
    }

    client.session().save_to_file(&session_path)?;
    println!("logged in, session saved to {}", session_path.display());
    Ok(())
}

fn prompt(label: &str) -> anyhow::Result<String> {
    use std::io::Write;
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Adapts a connected [`Client`] to the engine's [`Transport`] contract.
pub struct GrammersTransport {
    client: Client,
    /// file_id -> (chat, message_id), used by `refresh_file_ref`.
    origins: Mutex<HashMap<String, (Chat, i32)>>,
}

impl GrammersTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            origins: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a peer identifier (username or invite-link slug) to a chat.
    /// Numeric chat ids are not resolvable this way; the spec's peer
    /// identifiers are expected to be usernames, matching the CLI's
    /// `download <peer...>` argument documentation.
    async fn resolve_chat(&self, peer_id: &str) -> Result<Chat, TransportError> {
        self.client
            .resolve_username(peer_id)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?
            .ok_or_else(|| TransportError::Other(format!("unknown peer '{peer_id}'")))
    }

    fn decode_location(file_ref: &FileRef) -> Result<tl::enums::InputFileLocation, TransportError> {
        let (access_hash_str, file_reference_hex) = file_ref
            .access_hash
            .split_once(':')
            .ok_or_else(|| TransportError::Other("malformed file reference".into()))?;
        let access_hash: i64 = access_hash_str
            .parse()
            .map_err(|_| TransportError::Other("malformed access hash".into()))?;
        let file_reference =
            hex::decode(file_reference_hex).map_err(|_| TransportError::Other("malformed file reference hex".into()))?;
        let id: i64 = file_ref
            .file_id
            .parse()
            .map_err(|_| TransportError::Other("malformed document id".into()))?;

        Ok(tl::enums::InputFileLocation::InputDocumentFileLocation(
            tl::types::InputDocumentFileLocation {
                id,
                access_hash,
                file_reference,
                thumb_size: String::new(),
            },
        ))
    }
}

#[async_trait]
impl Transport for GrammersTransport {
    async fn fetch_chunk(&self, file_ref: &FileRef, offset: u64, length: u64) -> Result<ChunkResult, TransportError> {
        let location = Self::decode_location(file_ref)?;
        let request = tl::functions::upload::GetFile {
            precise: false,
            cdn_supported: false,
            location,
            offset: offset as i64,
            limit: length as i32,
        };

        match self.client.invoke(&request).await {
            Ok(tl::enums::upload::File::File(file)) => Ok(ChunkResult {
                bytes: file.bytes,
                is_last: (file.bytes.len() as u64) < length,
                observed_size: None,
            }),
            Ok(tl::enums::upload::File::CdnRedirect(_)) => {
                Err(TransportError::Other("CDN redirect downloads are not supported".into()))
            }
            Err(err) if err.to_string().contains("FILE_REFERENCE_EXPIRED") => Err(TransportError::FileReferenceExpired),
            Err(err) if err.to_string().contains("FLOOD_WAIT") => {
                let wait = parse_flood_wait_seconds(&err.to_string()).unwrap_or(30);
                Err(TransportError::FloodWait(wait))
            }
            Err(err) if err.to_string().contains("AUTH_KEY") => Err(TransportError::Unauthorized),
            Err(err) => Err(TransportError::Other(err.to_string())),
        }
    }

    async fn next_messages(
        &self,
        peer_id: &str,
        cursor: Option<i64>,
        direction: Direction,
        page_size: u32,
    ) -> Result<Vec<Message>, TransportError> {
        let chat = self.resolve_chat(peer_id).await?;
        let mut iter = self.client.iter_messages(&chat).limit(page_size as usize);
        iter = match (direction, cursor) {
            (Direction::NewestFirst, Some(c)) => iter.max_id((c as i32).saturating_sub(1)),
            (Direction::NewestFirst, None) => iter,
            (Direction::OldestFirst, Some(c)) => iter.min_id((c as i32).saturating_add(1)),
            (Direction::OldestFirst, None) => iter.min_id(0),
        };

        let mut out = Vec::new();
        loop {
            let item = iter.next().await.map_err(|e| TransportError::Other(e.to_string()))?;
            let Some(message) = item else { break };

            let audio = match message.media() {
                Some(Media::Document(doc)) if doc.mime_type().map(|m| m.starts_with("audio/")).unwrap_or(false) => {
                    let file_ref = FileRef {
                        file_id: doc.id().to_string(),
                        access_hash: format!("{}:{}", doc.access_hash(), hex::encode(doc.file_reference())),
                    };
                    {
                        let mut origins = self.origins.lock().unwrap();
                        origins.insert(file_ref.file_id.clone(), (chat.clone(), message.id()));
                    }
                    Some(AudioInfo {
                        file_ref,
                        declared_size: doc.size() as u64,
                        mime: doc.mime_type().unwrap_or("application/octet-stream").to_string(),
                        suggested_name: doc.name().unwrap_or_else(|| format!("{}.bin", doc.id())),
                    })
                }
                _ => None,
            };

            out.push(Message {
                message_id: message.id() as i64,
                audio,
            });
            if out.len() >= page_size as usize {
                break;
            }
        }
        Ok(out)
    }

    async fn refresh_file_ref(&self, peer_id: &str, message_id: i64) -> Result<FileRef, TransportError> {
        let chat = self.resolve_chat(peer_id).await?;
        let messages = self
            .client
            .get_messages_by_id(&chat, &[message_id as i32])
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let message = messages
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| TransportError::Other("message vanished".into()))?;

        match message.media() {
            Some(Media::Document(doc)) => Ok(FileRef {
                file_id: doc.id().to_string(),
                access_hash: format!("{}:{}", doc.access_hash(), hex::encode(doc.file_reference())),
            }),
            _ => Err(TransportError::Other("message no longer carries a document".into())),
        }
    }
}

fn parse_flood_wait_seconds(message: &str) -> Option<u64> {
    message
        .rsplit('_')
        .next()
        .and_then(|tail| tail.trim_end_matches(|c: char| !c.is_ascii_digit()).parse().ok())
}
