//! `tgaudio login` – interactive phone-code / 2FA bootstrap.

use anyhow::Result;
use tgaudio_core::config::Config;

pub async fn run_login(_cfg: &Config, phone: Option<String>) -> Result<()> {
    crate::transport_grammers::login(phone).await
}
