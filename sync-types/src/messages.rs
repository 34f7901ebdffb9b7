//! Point-to-point messages for Tandem.
//!
//! The only protocol carried over the messaging channel is the remote
//! directory listing used by directory views to reconcile against the
//! paired node. Transfer records travel through the replicated store, not
//! through these messages.

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// Topic for listing requests.
pub const TOPIC_LIST_FILES_REQUEST: &str = "/tandem/list_files/request";

/// Topic for listing responses.
pub const TOPIC_LIST_FILES_RESPONSE: &str = "/tandem/list_files/response";

/// All point-to-point messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Ask a peer to list one of its directories
    ListFilesRequest(ListFilesRequest),
    /// Answer to a listing request
    ListFilesResponse(ListFilesResponse),
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Deserialization)
    }

    /// The topic this message is sent under.
    pub fn topic(&self) -> &'static str {
        match self {
            Message::ListFilesRequest(_) => TOPIC_LIST_FILES_REQUEST,
            Message::ListFilesResponse(_) => TOPIC_LIST_FILES_RESPONSE,
        }
    }
}

/// Request for the contents of a logical directory.
///
/// The directory is sent unexpanded (it may start with a path alias) so the
/// responder resolves it in its own filesystem namespace. `None` asks for the
/// responder's default directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilesRequest {
    /// Logical directory to list
    pub directory: Option<String>,
}

/// Outcome of a listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListOutcome {
    /// The directory was listed
    Success,
    /// The directory is missing or not a directory
    DirectoryNotFound,
}

/// One row of a remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// File name within the listed directory
    pub name: String,
    /// Whether the row is a directory
    pub is_directory: bool,
}

/// Answer to a [`ListFilesRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilesResponse {
    /// The directory exactly as it was requested
    pub directory: Option<String>,
    /// Whether the listing succeeded
    pub outcome: ListOutcome,
    /// Directory contents (empty unless `outcome` is `Success`)
    pub files: Vec<RemoteFile>,
}

impl ListFilesResponse {
    /// A successful response.
    pub fn success(directory: Option<String>, files: Vec<RemoteFile>) -> Self {
        Self {
            directory,
            outcome: ListOutcome::Success,
            files,
        }
    }

    /// A response for a directory that does not exist on the responder.
    pub fn not_found(directory: Option<String>) -> Self {
        Self {
            directory,
            outcome: ListOutcome::DirectoryNotFound,
            files: Vec::new(),
        }
    }

    /// Whether the listing succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome == ListOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let msg = Message::ListFilesRequest(ListFilesRequest {
            directory: Some("~/Music".into()),
        });
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn response_carries_files_and_flags() {
        let msg = Message::ListFilesResponse(ListFilesResponse::success(
            Some("*".into()),
            vec![
                RemoteFile {
                    name: "a.txt".into(),
                    is_directory: false,
                },
                RemoteFile {
                    name: "B".into(),
                    is_directory: true,
                },
            ],
        ));
        let restored = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        match restored {
            Message::ListFilesResponse(resp) => {
                assert!(resp.is_success());
                assert_eq!(resp.files.len(), 2);
                assert!(resp.files[1].is_directory);
            }
            other => panic!("Expected ListFilesResponse, got {:?}", other),
        }
    }

    #[test]
    fn not_found_response_has_no_files() {
        let resp = ListFilesResponse::not_found(None);
        assert!(!resp.is_success());
        assert!(resp.files.is_empty());
    }

    #[test]
    fn topics_differ_per_direction() {
        let req = Message::ListFilesRequest(ListFilesRequest { directory: None });
        let resp = Message::ListFilesResponse(ListFilesResponse::not_found(None));
        assert_ne!(req.topic(), resp.topic());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(Message::from_bytes(&[0xC1, 0x00]).is_err());
    }
}
