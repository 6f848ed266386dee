//! Represents an object (file) stored in a bucket of the remote store.

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

/// A finalized object as the store reports it after an upload or a details lookup.
///
/// The store owns these values; the client only reads them back to address the
/// object in later calls (delete, translation).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    /// Container the object lives in.
    pub bucket_key: String,

    /// Store-assigned identifier, e.g. `urn:adsk.objects:os.object:bucket/key`.
    pub object_id: String,

    /// Object key (name) within the bucket.
    pub object_key: String,

    /// Size in bytes.
    #[serde(default)]
    pub size: u64,

    /// Download location of the payload.
    #[serde(default)]
    pub location: Option<String>,

    /// Content hash reported by the store.
    #[serde(default)]
    pub sha1: Option<String>,
}

impl StoredObject {
    /// The source URN handed to the translation service: URL-safe base64 of the
    /// object id, without padding.
    pub fn urn(&self) -> String {
        general_purpose::URL_SAFE_NO_PAD.encode(self.object_id.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_payload() {
        let json = r#"{
            "bucketKey": "models",
            "objectId": "urn:adsk.objects:os.object:models/house.rvt",
            "objectKey": "house.rvt",
            "size": 12582912,
            "location": "https://example.test/oss/v2/buckets/models/objects/house.rvt"
        }"#;
        let obj: StoredObject = serde_json::from_str(json).unwrap();
        assert_eq!(obj.bucket_key, "models");
        assert_eq!(obj.size, 12_582_912);
        assert!(obj.sha1.is_none());
    }

    #[test]
    fn urn_is_url_safe_without_padding() {
        let obj = StoredObject {
            bucket_key: "models".into(),
            object_id: "urn:adsk.objects:os.object:models/house.rvt".into(),
            object_key: "house.rvt".into(),
            size: 1,
            location: None,
            sha1: None,
        };
        let urn = obj.urn();
        assert_eq!(
            urn,
            "dXJuOmFkc2sub2JqZWN0czpvcy5vYmplY3Q6bW9kZWxzL2hvdXNlLnJ2dA"
        );
        assert!(!urn.contains('='));
        assert!(!urn.contains('+') && !urn.contains('/'));
    }
}
