use std::fmt;

// Messages pushed to the host's UI channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateNotice {
    UpdateAvailable {
        current: Option<String>,
        latest: String,
    },
}

impl fmt::Display for UpdateNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateNotice::UpdateAvailable {
                current: Some(current),
                latest,
            } => write!(f, "Updating youtube-dl from {current} to {latest}"),
            UpdateNotice::UpdateAvailable {
                current: None,
                latest,
            } => write!(f, "Installing youtube-dl {latest}"),
        }
    }
}

// Terminal states of a single update check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    NoRemoteInfo,
    UpToDate {
        version: String,
    },
    Updated {
        previous: Option<String>,
        version: String,
    },
}

impl CheckOutcome {
    pub fn updated(&self) -> bool {
        matches!(self, CheckOutcome::Updated { .. })
    }
}
