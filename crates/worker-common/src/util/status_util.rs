// Terminal build status and its translation to process return codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Offset added to status values to produce process return codes.
const RETURN_CODE_OFFSET: i32 = 100;

/// Terminal status of an action or of a whole action tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum BuildStatus {
    Success = 0,
    Fail = 1,
    Disabled = 2,
}

impl BuildStatus {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(BuildStatus::Success),
            1 => Some(BuildStatus::Fail),
            2 => Some(BuildStatus::Disabled),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == BuildStatus::Success
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Success => write!(f, "Success"),
            BuildStatus::Fail => write!(f, "Fail"),
            BuildStatus::Disabled => write!(f, "Disabled"),
        }
    }
}

pub struct StatusUtil;

impl StatusUtil {
    /// Translate a status to the worker's process return code.
    pub fn translate_to_return_code(status: BuildStatus) -> i32 {
        RETURN_CODE_OFFSET + status as i32
    }

    /// Translate a return code back; unknown codes are `Fail`.
    pub fn translate_from_return_code(return_code: i32) -> BuildStatus {
        BuildStatus::from_i32(return_code - RETURN_CODE_OFFSET).unwrap_or(BuildStatus::Fail)
    }
}
