//! Request bodies for the job endpoints.
//!
//! Bodies are validated with [`validator`] before they reach the engine,
//! which repeats the bounds checks for non-HTTP callers.

use pagebench_core::options::TestOptions;
use pagebench_db::models::SeriesSpec;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// `POST /api/v1/series` and one entry of a batch.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSeries {
    #[validate(url)]
    pub url: String,
    #[validate(range(min = 1, max = 50))]
    pub repetitions: u32,
    #[serde(default)]
    pub options: Option<TestOptions>,
}

impl CreateSeries {
    pub fn into_spec(self, defaults: &TestOptions) -> SeriesSpec {
        SeriesSpec {
            url: self.url,
            repetitions: self.repetitions,
            options: self.options.unwrap_or_else(|| defaults.clone()),
        }
    }
}

/// `POST /api/v1/batches`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBatch {
    #[validate(length(min = 1, max = 100), nested)]
    pub specs: Vec<CreateSeries>,
}

/// `POST /api/v1/comparisons`: one baseline/variant pair for one URL.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateComparison {
    #[validate(url)]
    pub url: String,
    #[serde(default)]
    pub options: Option<TestOptions>,
}

/// Webhook body sent by the benchmark service.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingbackBody {
    pub submission_id: String,
}

/// Webhook query string (`GET /pingback?id=...`).
#[derive(Debug, Clone, Deserialize)]
pub struct PingbackQuery {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn series(body: serde_json::Value) -> CreateSeries {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn valid_series_passes() {
        let input = series(json!({"url": "https://example.com", "repetitions": 3}));
        assert!(input.validate().is_ok());
    }

    #[test]
    fn bad_url_and_repetitions_are_rejected() {
        let input = series(json!({"url": "example", "repetitions": 0}));
        let errors = input.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("url"));
        assert!(fields.contains_key("repetitions"));
    }

    #[test]
    fn batch_validates_each_spec() {
        let batch: CreateBatch = serde_json::from_value(json!({
            "specs": [
                {"url": "https://a.example", "repetitions": 1},
                {"url": "https://b.example", "repetitions": 51},
            ]
        }))
        .unwrap();
        assert!(batch.validate().is_err());

        let empty: CreateBatch = serde_json::from_value(json!({"specs": []})).unwrap();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn missing_options_fall_back_to_defaults() {
        let defaults = TestOptions {
            location: "London:Firefox".into(),
            ..TestOptions::default()
        };
        let spec = series(json!({"url": "https://example.com", "repetitions": 1}))
            .into_spec(&defaults);
        assert_eq!(spec.options.location, "London:Firefox");
    }

    #[test]
    fn pingback_body_uses_camel_case() {
        let body: PingbackBody =
            serde_json::from_value(json!({"submissionId": "sub-1"})).unwrap();
        assert_eq!(body.submission_id, "sub-1");
    }
}
