use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use super::feeds::StoneFeeds;
use super::remote_traits::StoneRemoteTrait;
use crate::errors::Result;
use crate::offline::WritePerformer;
use crate::stones::NewStone;

/// Replays a queued create against the remote and folds the result into the
/// feeds, exactly as an online create would.
pub struct CreateReplayer {
    remote: Arc<dyn StoneRemoteTrait>,
    feeds: Arc<StoneFeeds>,
}

impl CreateReplayer {
    pub fn new(remote: Arc<dyn StoneRemoteTrait>, feeds: Arc<StoneFeeds>) -> Self {
        Self { remote, feeds }
    }
}

#[async_trait]
impl WritePerformer for CreateReplayer {
    async fn perform_create(
        &self,
        request_payload: &[u8],
        attachment_payload: Option<&[u8]>,
    ) -> Result<()> {
        let request: NewStone = serde_json::from_slice(request_payload)?;
        let generation = self.feeds.generation();
        let created = self
            .remote
            .create(request, attachment_payload.map(<[u8]>::to_vec))
            .await?;
        debug!("[Sync] Replayed queued create as {}", created.id);
        self.feeds.apply_created(&created, generation).await;
        Ok(())
    }
}
