use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;
use crate::StoreError;

/// Position of the next page of a paginated list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ContinueToken {
    /// RV every page is served at
    pub rv: u64,
    /// Last key returned; the next page starts strictly after it
    pub start: String,
}

impl ContinueToken {
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(token: &str) -> Result<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| StoreError::InvalidContinueToken(e.to_string()))?;
        let token: Self = serde_json::from_slice(&json)
            .map_err(|e| StoreError::InvalidContinueToken(e.to_string()))?;
        if token.rv == 0 {
            return Err(StoreError::InvalidContinueToken(
                "resource version must be set".to_string(),
            )
            .into());
        }
        Ok(token)
    }
}
