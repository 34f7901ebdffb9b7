//! Overall status of a transfer record.

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// Overall status of a replicated transfer record.
///
/// `InProgress` is the only non-terminal state. Failures are dead ends:
/// a retry is a new record. The numeric codes are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum TransferStatus {
    /// Items remain to be processed.
    InProgress = 0,
    /// Every item has been processed.
    Complete = 1,
    /// Canceled by a participant.
    Canceled = 3,
    /// Source item missing or is a directory.
    FailedFileNotFound = 4,
    /// Destination directory path is occupied by a non-directory.
    FailedBadDestination = 5,
    /// Destination already holds a different file with the same name.
    FailedFileAlreadyExists = 6,
    /// Unexpected I/O failure.
    FailedUnknown = 7,
    /// Source item exists but cannot be read.
    FailedNoReadPermission = 8,
    /// Source item could not be deleted.
    FailedNoDeletePermission = 9,
}

impl TransferStatus {
    /// Whether the record can no longer advance.
    pub fn is_terminal(self) -> bool {
        self != Self::InProgress
    }

    /// Whether this is one of the `Failed*` states.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::InProgress | Self::Complete | Self::Canceled)
    }
}

impl TryFrom<u8> for TransferStatus {
    type Error = TypesError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::InProgress),
            1 => Ok(Self::Complete),
            3 => Ok(Self::Canceled),
            4 => Ok(Self::FailedFileNotFound),
            5 => Ok(Self::FailedBadDestination),
            6 => Ok(Self::FailedFileAlreadyExists),
            7 => Ok(Self::FailedUnknown),
            8 => Ok(Self::FailedNoReadPermission),
            9 => Ok(Self::FailedNoDeletePermission),
            _ => Err(TypesError::InvalidStatus(value)),
        }
    }
}

impl From<TransferStatus> for u8 {
    fn from(status: TransferStatus) -> Self {
        status as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_roundtrip() {
        for val in [0u8, 1, 3, 4, 5, 6, 7, 8, 9] {
            let status = TransferStatus::try_from(val).unwrap();
            assert_eq!(u8::from(status), val);
        }
    }

    #[test]
    fn unused_codes_are_rejected() {
        assert!(TransferStatus::try_from(2).is_err());
        assert!(TransferStatus::try_from(10).is_err());
    }

    #[test]
    fn only_in_progress_is_non_terminal() {
        assert!(!TransferStatus::InProgress.is_terminal());
        assert!(TransferStatus::Complete.is_terminal());
        assert!(TransferStatus::Canceled.is_terminal());
        assert!(TransferStatus::FailedUnknown.is_terminal());
    }

    #[test]
    fn cancel_and_complete_are_not_failures() {
        assert!(!TransferStatus::Complete.is_failure());
        assert!(!TransferStatus::Canceled.is_failure());
        assert!(TransferStatus::FailedFileAlreadyExists.is_failure());
    }

    #[test]
    fn status_serializes_as_code() {
        let json = serde_json::to_string(&TransferStatus::FailedBadDestination).unwrap();
        assert_eq!(json, "5");
        let back: TransferStatus = serde_json::from_str("6").unwrap();
        assert_eq!(back, TransferStatus::FailedFileAlreadyExists);
    }
}
