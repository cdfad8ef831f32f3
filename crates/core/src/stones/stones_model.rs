use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record the cache can hold.
///
/// The cache only needs a stable identity and the "public" flag that decides
/// whether a record also belongs in the public feed.
pub trait DomainRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn record_id(&self) -> Uuid;
    fn is_public(&self) -> bool;
}

/// A user-recorded stone as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stone {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub weight_kg: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub is_public: bool,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DomainRecord for Stone {
    fn record_id(&self) -> Uuid {
        self.id
    }

    fn is_public(&self) -> bool {
        self.is_public
    }
}

/// Create request for a stone. Serialized verbatim into a pending record
/// when the device is offline; the image travels separately as the attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStone {
    /// Client-generated id so a replayed create is recognisable server side.
    pub client_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub weight_kg: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub is_public: bool,
}

impl NewStone {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64, is_public: bool) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            weight_kg: None,
            latitude,
            longitude,
            is_public,
        }
    }
}

/// Viewport used for "nearby" queries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

impl Region {
    pub fn new(latitude: f64, longitude: f64, radius_m: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stone_serialization_matches_api_contract() {
        let stone = Stone {
            id: Uuid::nil(),
            name: "Atlas".to_string(),
            description: None,
            weight_kg: Some(120.5),
            latitude: 64.1,
            longitude: -21.9,
            is_public: true,
            image_url: None,
            created_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            updated_at: None,
        };

        let value = serde_json::to_value(&stone).unwrap();
        assert_eq!(value["weightKg"], 120.5);
        assert_eq!(value["isPublic"], true);
        assert_eq!(value["createdAt"], "2026-01-01T00:00:00Z");
        assert_eq!(stone.record_id(), Uuid::nil());
    }

    #[test]
    fn new_stone_gets_fresh_client_id() {
        let a = NewStone::new("a", 0.0, 0.0, false);
        let b = NewStone::new("b", 0.0, 0.0, false);
        assert_ne!(a.client_id, b.client_id);
    }
}
