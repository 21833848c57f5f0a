use chrono::Utc;
use std::fmt::Display;
use uuid::Uuid;

const SUFFIX_LENGTH: usize = 6;

/// Correlation id for one invocation. Only ever written to logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "req_{}_{}",
            Utc::now().timestamp_millis(),
            &suffix[..SUFFIX_LENGTH]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
