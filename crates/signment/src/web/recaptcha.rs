//! reCAPTCHA verification for the public track endpoint.

use serde::Deserialize;

use crate::core::config;

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    score: Option<f64>,
    #[serde(rename = "error-codes")]
    error_codes: Option<Vec<String>>,
}

/// Verifies a reCAPTCHA response token.
///
/// Verification is skipped (always passes) when the secret key is not
/// configured. A network failure counts as a failed verification.
pub async fn verify_recaptcha(http: &reqwest::Client, token: &str) -> bool {
    if !config::recaptcha::is_enabled() {
        log::debug!("reCAPTCHA disabled, skipping verification");
        return true;
    }

    let params = [
        ("secret", config::recaptcha::SECRET_KEY.as_str()),
        ("response", token),
    ];

    let response = match http.post(config::recaptcha::VERIFY_URL).form(&params).send().await {
        Ok(response) => response,
        Err(e) => {
            log::error!("reCAPTCHA verification error: {}", e);
            return false;
        }
    };

    let verdict: VerifyResponse = match response.json().await {
        Ok(verdict) => verdict,
        Err(e) => {
            log::error!("Unreadable reCAPTCHA response: {}", e);
            return false;
        }
    };

    if verdict.success && verdict.score.unwrap_or(1.0) >= config::recaptcha::MIN_SCORE {
        log::debug!("reCAPTCHA verification successful (score={:?})", verdict.score);
        true
    } else {
        log::warn!(
            "reCAPTCHA verification failed (score={:?}, errors={:?})",
            verdict.score,
            verdict.error_codes
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_recaptcha_passes() {
        // RECAPTCHA_SECRET_KEY defaults to empty in the test environment,
        // which disables verification entirely.
        let http = reqwest::Client::new();
        assert!(verify_recaptcha(&http, "any-token").await);
    }

    #[test]
    fn test_verify_response_parsing() {
        let raw = r#"{"success": true, "score": 0.9}"#;
        let parsed: VerifyResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.score, Some(0.9));

        let raw = r#"{"success": false, "error-codes": ["invalid-input-response"]}"#;
        let parsed: VerifyResponse = serde_json::from_str(raw).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.error_codes.unwrap(), vec!["invalid-input-response"]);
    }
}
