//! Stone endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Method;
use uuid::Uuid;

use cairn_core::stones::{NewStone, Region, Stone};
use cairn_core::sync::StoneRemoteTrait;

use crate::client::{ApiClient, RequestBody};

const STONES_PATH: &str = "/v1/stones";

/// [`StoneRemoteTrait`] over the cairn REST API.
pub struct StoneApi {
    client: Arc<ApiClient>,
}

impl StoneApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    fn nearby_path(region: &Region) -> String {
        format!(
            "{}/nearby?lat={}&lon={}&radius={}",
            STONES_PATH, region.latitude, region.longitude, region.radius_m
        )
    }
}

#[async_trait]
impl StoneRemoteTrait for StoneApi {
    /// GET /v1/stones/mine
    async fn fetch_own(&self) -> cairn_core::Result<Vec<Stone>> {
        let path = format!("{}/mine", STONES_PATH);
        Ok(self.client.request(Method::GET, &path, None, true).await?)
    }

    /// GET /v1/stones/public
    async fn fetch_public(&self) -> cairn_core::Result<Vec<Stone>> {
        let path = format!("{}/public", STONES_PATH);
        Ok(self.client.request(Method::GET, &path, None, true).await?)
    }

    /// GET /v1/stones/nearby
    async fn fetch_nearby(&self, region: Region) -> cairn_core::Result<Vec<Stone>> {
        let path = Self::nearby_path(&region);
        Ok(self.client.request(Method::GET, &path, None, true).await?)
    }

    /// POST /v1/stones, then PUT /v1/stones/{id}/image when an image is given.
    ///
    /// `client_id` makes the create idempotent server-side, so a replay after
    /// a lost response does not duplicate the stone.
    async fn create(&self, stone: NewStone, image: Option<Vec<u8>>) -> cairn_core::Result<Stone> {
        let body = RequestBody::Json(serde_json::to_value(&stone)?);
        let created: Stone = self
            .client
            .request(Method::POST, STONES_PATH, Some(body), true)
            .await?;
        debug!("Created stone {} (client id {})", created.id, stone.client_id);

        let Some(data) = image else {
            return Ok(created);
        };
        let path = format!("{}/{}/image", STONES_PATH, created.id);
        let upload = RequestBody::Bytes {
            content_type: "image/jpeg",
            data,
        };
        match self.client.request(Method::PUT, &path, Some(upload), true).await {
            Ok(with_image) => Ok(with_image),
            Err(e) => {
                warn!("Image upload for stone {} failed: {}", created.id, e);
                Ok(created)
            }
        }
    }

    /// PUT /v1/stones/{id}
    async fn update(&self, stone: Stone) -> cairn_core::Result<Stone> {
        let path = format!("{}/{}", STONES_PATH, stone.id);
        let body = RequestBody::Json(serde_json::to_value(&stone)?);
        Ok(self
            .client
            .request(Method::PUT, &path, Some(body), true)
            .await?)
    }

    /// DELETE /v1/stones/{id}
    async fn delete(&self, id: Uuid) -> cairn_core::Result<()> {
        let path = format!("{}/{}", STONES_PATH, id);
        self.client
            .request_text(Method::DELETE, &path, None, true)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_path_carries_region() {
        let path = StoneApi::nearby_path(&Region::new(46.5, 7.25, 750.0));
        assert_eq!(path, "/v1/stones/nearby?lat=46.5&lon=7.25&radius=750");
    }
}
