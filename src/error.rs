use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown database or metric.
    #[error("not found: {0}")]
    NotFound(String),
    /// Malformed request input (names, JSON bodies).
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Corrupt record in a data or side file. `line` is 1-based, 0 for side files.
    #[error("corrupt record at line {line}: {reason}")]
    Parse { line: u64, reason: String },
    #[error("metric has no samples")]
    EmptyMetric,
    #[error("insufficient data: {0}")]
    InsufficientData(&'static str),
}

impl Error {
    pub(crate) fn parse(line: u64, reason: impl Into<String>) -> Self {
        Error::Parse {
            line,
            reason: reason.into(),
        }
    }

    /// HTTP status a routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::NotFound(_) => 404,
            Error::Io(_) | Error::Parse { .. } | Error::EmptyMetric | Error::InsufficientData(_) => {
                500
            }
        }
    }

    /// `{"error": "<message>"}` as served on failed requests.
    pub fn to_json_body(&self) -> String {
        serde_json::json!({ "error": self.to_string() }).to_string()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(Error::BadRequest("x".into()).status_code(), 400);
        assert_eq!(Error::NotFound("db".into()).status_code(), 404);
        assert_eq!(Error::EmptyMetric.status_code(), 500);
        assert_eq!(Error::parse(3, "bad value").status_code(), 500);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(Error::from(io).status_code(), 500);
    }

    #[test]
    fn json_body_carries_message() {
        let body = Error::NotFound("database mydb".into()).to_json_body();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["error"], "not found: database mydb");
    }
}
