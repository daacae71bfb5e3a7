//! Result value returned by every engine operation.

use serde::Serialize;

use crate::backend::Viz;
use crate::error::KycError;

/// Code carried by successful synchronous operations.
pub const CODE_OK: i32 = 0;
/// Code carried by the acknowledgement of a parallel-mode `process` call.
pub const CODE_ACCEPTED: i32 = 1;

/// Outcome of an engine operation.
///
/// Plain value type: every clone owns its own text buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KycResult {
    code: i32,
    phrase: String,
    json: String,
    num_vizs: usize,
}

impl KycResult {
    pub fn new(
        code: i32,
        phrase: impl Into<String>,
        json: impl Into<String>,
        num_vizs: usize,
    ) -> Self {
        Self {
            code,
            phrase: phrase.into(),
            json: json.into(),
            num_vizs,
        }
    }

    /// Result without a JSON body.
    pub fn bodyless(code: i32, phrase: impl Into<String>) -> Self {
        Self::new(code, phrase, "", 0)
    }

    pub fn bodyless_ok() -> Self {
        Self::bodyless(CODE_OK, "OK")
    }

    /// Acknowledgement returned by `process` in parallel mode.
    pub fn accepted() -> Self {
        Self::bodyless(CODE_ACCEPTED, "Accepted")
    }

    /// Successful result carrying the given targets as a JSON array.
    ///
    /// No targets yields an empty body.
    pub fn from_vizs(vizs: &[Viz]) -> Result<Self, KycError> {
        if vizs.is_empty() {
            return Ok(Self::bodyless_ok());
        }
        let json = serde_json::to_string(vizs)
            .map_err(|e| KycError::Backend(format!("failed to serialize targets: {}", e)))?;
        Ok(Self::new(CODE_OK, "OK", json, vizs.len()))
    }

    /// The result code. `>= 0` on success.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Short description of [`code`](Self::code).
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// JSON body. Empty when no target was found.
    pub fn json(&self) -> &str {
        &self.json
    }

    /// Number of top-level entries in [`json`](Self::json).
    pub fn num_vizs(&self) -> usize {
        self.num_vizs
    }

    pub fn is_ok(&self) -> bool {
        self.code >= 0
    }

    pub fn into_json(self) -> String {
        self.json
    }
}

impl From<KycError> for KycResult {
    fn from(err: KycError) -> Self {
        Self::bodyless(err.code(), err.to_string())
    }
}

impl From<crate::error::Result<KycResult>> for KycResult {
    fn from(outcome: crate::error::Result<KycResult>) -> Self {
        outcome.unwrap_or_else(KycResult::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BoundingBox;

    #[test]
    fn test_is_ok_matches_code_sign() {
        for code in [-10, -1, 0, 1, 42] {
            let result = KycResult::bodyless(code, "x");
            assert_eq!(result.is_ok(), result.code() >= 0);
        }
    }

    #[test]
    fn test_clone_owns_storage() {
        let original = KycResult::new(0, "OK", r#"[{"kind":"passport"}]"#, 1);
        let copy = original.clone();
        let json = original.into_json();
        assert_eq!(json, r#"[{"kind":"passport"}]"#);
        assert_eq!(copy.json(), r#"[{"kind":"passport"}]"#);
        assert_eq!(copy.num_vizs(), 1);
    }

    #[test]
    fn test_error_conversion_keeps_phrase() {
        let result = KycResult::from(KycError::NotInitialized);
        assert!(!result.is_ok());
        assert_eq!(result.code(), -1);
        assert_eq!(result.phrase(), "engine not initialized");
        assert!(result.json().is_empty());
    }

    #[test]
    fn test_from_vizs_counts_entries() {
        let vizs = vec![
            Viz::new("passport", 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            Viz::new("face", 0.8, BoundingBox::new(2.0, 2.0, 3.0, 3.0)),
        ];
        let result = KycResult::from_vizs(&vizs).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.num_vizs(), 2);

        let parsed: serde_json::Value = serde_json::from_str(result.json()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_from_vizs_empty_is_bodyless() {
        let result = KycResult::from_vizs(&[]).unwrap();
        assert_eq!(result, KycResult::bodyless_ok());
    }

    #[test]
    fn test_accepted_is_ok() {
        assert!(KycResult::accepted().is_ok());
        assert_eq!(KycResult::accepted().num_vizs(), 0);
    }
}
