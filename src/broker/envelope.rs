use crate::error::Error;
use crate::store::{Blob, NewSound, SoundId, SoundKind, SoundRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    SaveSound,
    GetSounds,
    GetSoundById,
    DeleteSound,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SaveSound => "saveSound",
            Action::GetSounds => "getSounds",
            Action::GetSoundById => "getSoundById",
            Action::DeleteSound => "deleteSound",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate(action: Action) -> Self {
        Self(format!("{}-{}", action, uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload of a request, one variant per action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestData {
    SaveSound(NewSound),
    GetSounds {
        #[serde(rename = "type")]
        kind: SoundKind,
    },
    GetSoundById {
        id: SoundId,
    },
    DeleteSound {
        id: SoundId,
    },
}

impl RequestData {
    pub fn action(&self) -> Action {
        match self {
            RequestData::SaveSound(_) => Action::SaveSound,
            RequestData::GetSounds { .. } => Action::GetSounds,
            RequestData::GetSoundById { .. } => Action::GetSoundById,
            RequestData::DeleteSound { .. } => Action::DeleteSound,
        }
    }

    pub fn blob(&self) -> Option<&Blob> {
        match self {
            RequestData::SaveSound(sound) => sound.blob.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub action: Action,
    pub data: RequestData,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    Saved { id: SoundId },
    Sounds(Vec<SoundRecord>),
    Sound(Option<SoundRecord>),
}

/// Error category carried next to the message so the caller can rebuild a
/// typed [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidPayload,
    StoreUnavailable,
    NotFound,
    OperationFailed,
}

impl ErrorKind {
    fn of(error: &Error) -> Self {
        match error {
            Error::InvalidPayload(_) => ErrorKind::InvalidPayload,
            Error::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Error::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::OperationFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub action: Action,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub correlation_id: CorrelationId,
}

impl Response {
    pub fn success(action: Action, correlation_id: CorrelationId, data: Option<ResponseData>) -> Self {
        Self {
            action,
            status: Status::Success,
            data,
            error: None,
            error_kind: None,
            correlation_id,
        }
    }

    pub fn failure(action: Action, correlation_id: CorrelationId, error: &Error) -> Self {
        let message = match error {
            Error::InvalidPayload(m)
            | Error::StoreUnavailable(m)
            | Error::NotFound(m)
            | Error::OperationFailed(m) => m.clone(),
            other => other.to_string(),
        };
        Self {
            action,
            status: Status::Error,
            data: None,
            error: Some(message),
            error_kind: Some(ErrorKind::of(error)),
            correlation_id,
        }
    }

    /// The caller-side outcome of this response.
    pub fn into_result(self) -> Result<Option<ResponseData>, Error> {
        match self.status {
            Status::Success => Ok(self.data),
            Status::Error => {
                let message = self.error.unwrap_or_else(|| "Unknown worker error".to_string());
                Err(match self.error_kind.unwrap_or(ErrorKind::OperationFailed) {
                    ErrorKind::InvalidPayload => Error::InvalidPayload(message),
                    ErrorKind::StoreUnavailable => Error::StoreUnavailable(message),
                    ErrorKind::NotFound => Error::NotFound(message),
                    ErrorKind::OperationFailed => Error::OperationFailed(message),
                })
            }
        }
    }
}

/// Everything the worker sends back across the boundary.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The store is open and requests will be served.
    Ready,
    Response(Response),
    /// The worker cannot continue; all pending calls are failed.
    Fault(Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_correlation_ids_are_unique_and_tagged() {
        let a = CorrelationId::generate(Action::GetSounds);
        let b = CorrelationId::generate(Action::GetSounds);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("getSounds-"));
    }

    #[test]
    fn test_request_wire_shape() {
        let request = Request {
            action: Action::GetSounds,
            data: RequestData::GetSounds {
                kind: SoundKind::Recorded,
            },
            correlation_id: CorrelationId("getSounds-1".to_string()),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "getSounds",
                "data": { "type": "recorded" },
                "correlationId": "getSounds-1",
            })
        );
    }

    #[test]
    fn test_error_response_wire_shape() {
        let response = Response::failure(
            Action::SaveSound,
            CorrelationId("saveSound-1".to_string()),
            &Error::InvalidPayload("blob is empty".to_string()),
        );

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "blob is empty");
        assert_eq!(value["errorKind"], "invalidPayload");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_failure_round_trips_error_kind() {
        let response = Response::failure(
            Action::SaveSound,
            CorrelationId("saveSound-2".to_string()),
            &Error::InvalidPayload("blob is missing".to_string()),
        );

        assert_eq!(
            response.into_result(),
            Err(Error::InvalidPayload("blob is missing".to_string()))
        );
    }
}
