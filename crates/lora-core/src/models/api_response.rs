//! Outcome wrapper returned by mutating operations of the composition root.

use serde::{Deserialize, Serialize};

/// Mutation outcome with the payload flattened next to `success`/`error`.
///
/// ```ignore
/// use lora_core::models::ApiResponse;
///
/// let moved = ApiResponse::success(MovedModel { new_path: "/loras/a/b.safetensors".into() });
/// let failed: ApiResponse<MovedModel> = ApiResponse::error("source does not exist");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: None,
        }
    }

    /// Successful outcome with no payload.
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

impl<T> From<crate::error::Result<T>> for ApiResponse<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        Self::from_result(result)
    }
}

/// Response for operations that only report success or failure.
pub type UnitResponse = ApiResponse<()>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoraError;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Moved {
        new_path: String,
    }

    #[test]
    fn test_success_flattens_payload() {
        let response = ApiResponse::success(Moved {
            new_path: "/loras/x.safetensors".into(),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["new_path"], "/loras/x.safetensors");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_from_error_result() {
        let result: crate::error::Result<Moved> = Err(LoraError::ModelNotFound {
            path: "/loras/missing.safetensors".into(),
        });
        let response: ApiResponse<Moved> = result.into();
        assert!(!response.is_success());
        assert_eq!(
            response.error_message(),
            Some("Model not found: /loras/missing.safetensors")
        );
        assert!(response.data().is_none());
    }

    #[test]
    fn test_unit_ok() {
        let response = UnitResponse::ok();
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
    }
}
