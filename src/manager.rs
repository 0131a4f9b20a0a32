use std::sync::{Arc, LazyLock};

use codec_pump::{Handle, RawCodec, Session, SessionTable};
use tokio::sync::RwLock;

pub(crate) type RawSession = Arc<Session<RawCodec>>;

static SESSION_MANAGER: LazyLock<RwLock<SessionTable<RawSession>>> =
    LazyLock::new(|| RwLock::new(SessionTable::new()));

pub(crate) async fn add_session(session: RawSession) -> Handle {
    SESSION_MANAGER.write().await.insert(session)
}

pub(crate) async fn get_session(handle: Handle) -> Option<RawSession> {
    SESSION_MANAGER.read().await.get(handle).cloned()
}

pub(crate) async fn session_count() -> usize {
    SESSION_MANAGER.read().await.len()
}

/// Removes the session and closes it off the async runtime.
pub(crate) async fn remove_session(handle: Handle) -> anyhow::Result<()> {
    let session = SESSION_MANAGER
        .write()
        .await
        .remove(handle)
        .ok_or_else(|| anyhow::anyhow!("session {} not found", handle))?;
    tokio::task::spawn_blocking(move || session.close()).await?
}

pub(crate) async fn close_all() {
    let sessions = SESSION_MANAGER.write().await.drain();
    for (handle, session) in sessions {
        let closed = tokio::task::spawn_blocking(move || session.close()).await;
        match closed {
            Ok(Ok(())) => log::info!("session {} closed", handle),
            Ok(Err(e)) => log::error!("session {} close error: {:#}", handle, e),
            Err(e) => log::error!("session {} close task failed: {}", handle, e),
        }
    }
}
