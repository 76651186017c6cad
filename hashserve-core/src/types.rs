//! The wire data model: [`ScanRequest`] envelopes, the [`HashRequest`]/
//! [`ImageHashResponse`] pair exchanged with the hashing microservice, and
//! the [`ImageFingerprintRequest`]/[`Fingerprints`] wrapper published
//! downstream.
//!
//! JSON field names intentionally match the original Go service's struct
//! tags (mixed case, e.g. `photoDNA`, `accountIdentifiers`) so that
//! downstream consumers written against it keep working unmodified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Account identifiers carried through from the scan request to the
/// published fingerprint, untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountIdentifiers {
    /// Shopper account id.
    #[serde(rename = "shopperID", default)]
    pub shopper_id: String,
    /// Container id.
    #[serde(rename = "containerID", default)]
    pub container_id: String,
    /// Domain name associated with the account.
    #[serde(default)]
    pub domain: String,
    /// GUID of the account.
    #[serde(rename = "GUID", default)]
    pub guid: String,
    /// XID of the account.
    #[serde(rename = "XID", default)]
    pub xid: String,
}

/// The envelope consumed from the ingress queue and republished (with an
/// incremented `retry_count`) to the DLQ exchange on transient failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Absolute URI identifying the content to scan.
    pub url: String,
    /// Upstream product tag.
    pub product: String,
    /// Optional client-auth hint forwarded to the hasher.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cert: Option<String>,
    /// Number of times this envelope has been republished to the DLQ.
    #[serde(rename = "retryCount", default)]
    pub retry_count: u32,
    /// Stamped on DLQ republish; absent on the original ingress message.
    #[serde(rename = "publishTime", skip_serializing_if = "Option::is_none", default)]
    pub publish_time: Option<DateTime<Utc>>,
    /// Account identifiers associated with the scan.
    #[serde(rename = "accountIdentifiers", default)]
    pub identifiers: AccountIdentifiers,
}

/// Errors that make a [`ScanRequest`] or [`ImageFingerprintRequest`]
/// unfit to process further. Both are terminal (reject-no-requeue): a
/// malformed envelope cannot be fixed by redelivery.
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ValidationError {
    /// `url` does not parse as an absolute URI.
    #[error("url {0:?} does not parse as an absolute URI")]
    InvalidUrl(String),
    /// `path` was empty.
    #[error("fingerprint path is empty")]
    EmptyPath,
    /// Neither `pdna` nor `md5` was present.
    #[error("fingerprint has neither photoDNA nor MD5")]
    MissingHash,
}

impl ScanRequest {
    /// Validates that `url` parses as an absolute URI.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidUrl`] if it does not.
    pub fn validate(&self) -> Result<(), ValidationError> {
        url::Url::parse(&self.url)
            .map(|_| ())
            .map_err(|_| ValidationError::InvalidUrl(self.url.clone()))
    }

    /// Returns a republish copy of this envelope with `retry_count`
    /// incremented by one and `publish_time` stamped to `now`.
    #[must_use]
    pub fn for_retry(&self, now: DateTime<Utc>) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            publish_time: Some(now),
            ..self.clone()
        }
    }
}

/// The request sent to the hashing microservice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashRequest {
    /// Absolute URI of the content to hash.
    pub url: String,
    /// Optional client-auth hint.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cert: Option<String>,
}

impl HashRequest {
    /// Builds a hash request for `scan`, validating that its `url` is an
    /// absolute URI.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidUrl`] if it is not.
    pub fn from_scan(scan: &ScanRequest) -> Result<Self, ValidationError> {
        scan.validate()?;
        Ok(Self {
            url: scan.url.clone(),
            cert: scan.cert.clone(),
        })
    }
}

/// The `statusCode` value the hasher uses to indicate success.
pub const HASHER_STATUS_SUCCESS: i32 = 1;
/// The `statusCode` value the hasher uses to indicate the content could
/// not be downloaded (terminal, not worth retrying).
pub const HASHER_STATUS_FILE_NOT_FOUND: i32 = 4;

/// The `{ pdna, md5, sha1 }` triple returned by the hasher on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hashes {
    /// PhotoDNA perceptual hash.
    #[serde(rename = "PDNA", skip_serializing_if = "Option::is_none", default)]
    pub pdna: Option<String>,
    /// MD5 cryptographic hash.
    #[serde(rename = "MD5", skip_serializing_if = "Option::is_none", default)]
    pub md5: Option<String>,
    /// SHA1 cryptographic hash.
    #[serde(rename = "SHA1", skip_serializing_if = "Option::is_none", default)]
    pub sha1: Option<String>,
}

/// The response returned by the hashing microservice for an image hash
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageHashResponse {
    /// The URL echoed back from the request.
    #[serde(rename = "URL", default)]
    pub url: String,
    /// `1` = success, `4` = download-failed-file-not-found, anything else
    /// is a transient/unknown error. See [`HASHER_STATUS_SUCCESS`] and
    /// [`HASHER_STATUS_FILE_NOT_FOUND`].
    #[serde(rename = "statusCode")]
    pub status_code: i32,
    /// Human-readable status.
    #[serde(rename = "statusMessage", default)]
    pub status_message: String,
    /// Populated on success.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hashes: Option<Hashes>,
    /// Opaque payload forwarded downstream untouched.
    #[serde(rename = "mlScores", skip_serializing_if = "Option::is_none", default)]
    pub ml_scores: Option<serde_json::Value>,
}

impl ImageHashResponse {
    /// `true` if `status_code == `[`HASHER_STATUS_SUCCESS`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code == HASHER_STATUS_SUCCESS
    }

    /// `true` if `status_code == `[`HASHER_STATUS_FILE_NOT_FOUND`].
    #[must_use]
    pub fn is_file_not_found(&self) -> bool {
        self.status_code == HASHER_STATUS_FILE_NOT_FOUND
    }
}

/// The fingerprint record published to the image exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFingerprintRequest {
    /// The original content URL.
    pub path: String,
    /// PhotoDNA hash, if present.
    #[serde(rename = "photoDNA", skip_serializing_if = "Option::is_none", default)]
    pub pdna: Option<String>,
    /// MD5 hash, if present.
    #[serde(rename = "MD5", skip_serializing_if = "Option::is_none", default)]
    pub md5: Option<String>,
    /// SHA1 hash, if present.
    #[serde(rename = "SHA1", skip_serializing_if = "Option::is_none", default)]
    pub sha1: Option<String>,
    /// Upstream product tag, carried over from the scan request.
    pub product: String,
    /// Always `"scan"` in this pipeline.
    pub source: String,
    /// Opaque payload forwarded downstream untouched.
    #[serde(rename = "mlScores", skip_serializing_if = "Option::is_none", default)]
    pub ml_scores: Option<serde_json::Value>,
    /// Account identifiers, carried over from the scan request.
    #[serde(rename = "accountIdentifiers", default)]
    pub identifiers: AccountIdentifiers,
}

impl ImageFingerprintRequest {
    /// The value always used for [`ImageFingerprintRequest::source`].
    pub const SOURCE: &'static str = "scan";

    /// Builds a fingerprint request from a successful hasher response and
    /// the scan request that produced it.
    #[must_use]
    pub fn from_hash_response(scan: &ScanRequest, response: &ImageHashResponse) -> Self {
        let hashes = response.hashes.clone().unwrap_or_default();
        Self {
            path: response.url.clone(),
            pdna: hashes.pdna,
            md5: hashes.md5,
            sha1: hashes.sha1,
            product: scan.product.clone(),
            source: Self::SOURCE.to_string(),
            ml_scores: response.ml_scores.clone(),
            identifiers: scan.identifiers.clone(),
        }
    }

    /// Validates that `path` is non-empty and at least one of `pdna`/`md5`
    /// is present.
    ///
    /// # Errors
    /// Returns [`ValidationError::EmptyPath`] or
    /// [`ValidationError::MissingHash`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.path.is_empty() {
            return Err(ValidationError::EmptyPath);
        }
        if self.pdna.is_none() && self.md5.is_none() {
            return Err(ValidationError::MissingHash);
        }
        Ok(())
    }
}

/// The downstream publish payload: always a single-element list in this
/// core (see spec's Open Questions — downstream consumers should not
/// assume batching).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprints {
    /// The fingerprint(s) being published.
    pub fingerprints: Vec<ImageFingerprintRequest>,
}

impl Fingerprints {
    /// Wraps a single fingerprint, as every publish in this core does.
    #[must_use]
    pub fn single(fingerprint: ImageFingerprintRequest) -> Self {
        Self {
            fingerprints: vec![fingerprint],
        }
    }
}

/// Content type, derived from the scan URL's suffix. A closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// Routed to the image worker pool.
    Image,
    /// Routed to the placeholder video worker.
    Video,
    /// Routed to the placeholder misc worker.
    Misc,
}

/// File extensions (compared case-insensitively) that classify as
/// miscellaneous content.
const MISC_SUFFIXES: &[&str] = &[".pdf", ".svg", ".doc", ".docx"];
/// File extensions (compared case-insensitively) that classify as video
/// content.
const VIDEO_SUFFIXES: &[&str] = &[".mp4", ".wav"];

/// Classifies a URL by its suffix. Unknown suffixes (including none at
/// all) default to [`ContentType::Image`].
///
/// This is a pure function of `url` alone (spec invariant 5 / E6).
#[must_use]
pub fn classify(url: &str) -> ContentType {
    let lower = url.to_ascii_lowercase();
    if VIDEO_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        ContentType::Video
    } else if MISC_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        ContentType::Misc
    } else {
        ContentType::Image
    }
}

/// The outcome of a hasher call, already classified against the retry
/// policy. A closed set: `success ⇔ statusCode == 1`; `terminal ⇔
/// statusCode == 4` (handled separately, see
/// [`crate::hasher::HasherOutcome`]); everything else is `transient`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    /// The hasher call succeeded and the fingerprint validated.
    Success,
    /// The failure is not worth retrying (exhausted retries, or malformed
    /// in a way redelivery can't fix).
    Terminal,
    /// The failure may succeed on a later attempt.
    Transient,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_suffix() {
        let cases = [
            ("x.mp4", ContentType::Video),
            ("y.wav", ContentType::Video),
            ("z.pdf", ContentType::Misc),
            ("w.docx", ContentType::Misc),
            ("k.jpeg", ContentType::Image),
            ("m", ContentType::Image),
        ];
        for (url, expected) in cases {
            assert_eq!(classify(url), expected, "classifying {url:?}");
        }
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify("https://example.com/clip.MP4"), ContentType::Video);
        assert_eq!(classify("https://example.com/doc.PDF"), ContentType::Misc);
    }

    #[test]
    fn scan_request_round_trips_through_json() {
        let scan = ScanRequest {
            url: "https://example.com/a.jpg".to_string(),
            product: "p1".to_string(),
            cert: Some("cert-hint".to_string()),
            retry_count: 2,
            publish_time: Some(Utc::now()),
            identifiers: AccountIdentifiers {
                shopper_id: "shopper".to_string(),
                container_id: "container".to_string(),
                domain: "example.com".to_string(),
                guid: "guid".to_string(),
                xid: "xid".to_string(),
            },
        };

        let json = serde_json::to_string(&scan).unwrap();
        let round_tripped: ScanRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(scan, round_tripped);
    }

    #[test]
    fn scan_request_rejects_relative_urls() {
        let scan = ScanRequest {
            url: "/not/absolute".to_string(),
            product: "p1".to_string(),
            cert: None,
            retry_count: 0,
            publish_time: None,
            identifiers: AccountIdentifiers::default(),
        };
        assert_eq!(
            scan.validate(),
            Err(ValidationError::InvalidUrl("/not/absolute".to_string()))
        );
    }

    #[test]
    fn for_retry_increments_count_and_stamps_time() {
        let scan = ScanRequest {
            url: "https://example.com/a.jpg".to_string(),
            product: "p1".to_string(),
            cert: None,
            retry_count: 2,
            publish_time: None,
            identifiers: AccountIdentifiers::default(),
        };
        let now = Utc::now();
        let retried = scan.for_retry(now);
        assert_eq!(retried.retry_count, 3);
        assert_eq!(retried.publish_time, Some(now));
        assert_eq!(retried.url, scan.url);
        assert_eq!(retried.product, scan.product);
    }

    #[test]
    fn fingerprint_requires_path_and_a_hash() {
        let mut fp = ImageFingerprintRequest {
            path: String::new(),
            pdna: None,
            md5: None,
            sha1: None,
            product: "p1".to_string(),
            source: ImageFingerprintRequest::SOURCE.to_string(),
            ml_scores: None,
            identifiers: AccountIdentifiers::default(),
        };
        assert_eq!(fp.validate(), Err(ValidationError::EmptyPath));

        fp.path = "https://example.com/a.jpg".to_string();
        assert_eq!(fp.validate(), Err(ValidationError::MissingHash));

        fp.md5 = Some("abc".to_string());
        assert_eq!(fp.validate(), Ok(()));
    }

    #[test]
    fn wire_field_names_match_the_original_service() {
        let fp = ImageFingerprintRequest {
            path: "https://ex/a.jpg".to_string(),
            pdna: Some("PD".to_string()),
            md5: Some("M".to_string()),
            sha1: Some("S".to_string()),
            product: "p1".to_string(),
            source: "scan".to_string(),
            ml_scores: None,
            identifiers: AccountIdentifiers::default(),
        };
        let wrapped = Fingerprints::single(fp);
        let json: serde_json::Value = serde_json::to_value(&wrapped).unwrap();
        let first = &json["fingerprints"][0];
        assert_eq!(first["path"], "https://ex/a.jpg");
        assert_eq!(first["photoDNA"], "PD");
        assert_eq!(first["MD5"], "M");
        assert_eq!(first["SHA1"], "S");
        assert_eq!(first["source"], "scan");
    }
}
