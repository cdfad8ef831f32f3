use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::stones::{NewStone, Region, Stone};

/// Remote stone endpoints.
///
/// Implementations report connectivity problems as
/// [`Error::NetworkUnreachable`](crate::Error::NetworkUnreachable) and a dead
/// session as [`Error::Unauthorized`](crate::Error::Unauthorized).
#[async_trait]
pub trait StoneRemoteTrait: Send + Sync {
    async fn fetch_own(&self) -> Result<Vec<Stone>>;
    async fn fetch_public(&self) -> Result<Vec<Stone>>;
    async fn fetch_nearby(&self, region: Region) -> Result<Vec<Stone>>;
    async fn create(&self, stone: NewStone, image: Option<Vec<u8>>) -> Result<Stone>;
    async fn update(&self, stone: Stone) -> Result<Stone>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// The authenticated session behind the remote.
#[async_trait]
pub trait SessionTrait: Send + Sync {
    fn is_authenticated(&self) -> bool;
    /// Drop both tokens, in memory and in secure storage.
    async fn clear_session(&self) -> Result<()>;
}
