//! `tgaudio groups` – distinct peers seen, with per-peer counts and cursor.

use anyhow::Result;
use tgaudio_core::store::Store;

pub async fn run_groups(store: &Store) -> Result<()> {
    let peers = store.all_peers().await?;
    if peers.is_empty() {
        println!("No peers tracked yet.");
        return Ok(());
    }

    println!("{:<20} {:>8} {:>14}", "PEER", "FILES", "CURSOR");
    for peer_id in peers {
        let files = store.list_for_peer(&peer_id).await?;
        let cursor = store
            .get_peer_cursor(&peer_id)
            .await?
            .map(|c| c.last_scanned_message_id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<20} {:>8} {:>14}", peer_id, files.len(), cursor);
    }
    Ok(())
}
