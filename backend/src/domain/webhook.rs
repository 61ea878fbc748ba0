//! Webhook aggregate and its value types.
//!
//! A webhook binds a public ingestion hash to one destination table, one
//! Storage API credential and one flush policy. Buffered rows are owned by the
//! batch store; the aggregate only carries the accounting fields.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Conditions;

/// Characters used for generated hashes (URL safe).
const HASH_ALPHABET: &[u8] = b"_-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// Length of generated hashes.
pub const HASH_LENGTH: usize = 21;
const MAX_HASH_LENGTH: usize = 64;
/// Length of the credential fingerprint in bytes before hex encoding.
const FINGERPRINT_BYTES: usize = 8;

/// Validation errors for webhook value types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookValidationError {
    /// Hash was empty, too long, or contained characters outside the alphabet.
    #[error("webhook hash \"{value}\" is malformed")]
    MalformedHash { value: String },
    /// Table identifier did not have exactly three segments.
    #[error("table id \"{value}\" must have the form <stage>.<bucket>.<table>, got {segments} segment(s)")]
    TableIdSegments { value: String, segments: usize },
    /// Table identifier had an empty segment.
    #[error("table id \"{value}\" contains an empty segment")]
    TableIdEmptySegment { value: String },
    /// Credential was blank.
    #[error("storage token must not be empty")]
    EmptyCredential,
}

/// Opaque public identifier of a webhook.
///
/// ```
/// use webhook_batcher::domain::WebhookHash;
///
/// let hash = WebhookHash::generate();
/// assert_eq!(hash.as_str().len(), 21);
/// assert_eq!(WebhookHash::new(hash.as_str()), Ok(hash));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WebhookHash(String);

impl WebhookHash {
    /// Validate an externally supplied hash.
    pub fn new(value: impl Into<String>) -> Result<Self, WebhookValidationError> {
        let value = value.into();
        let well_formed = !value.is_empty()
            && value.len() <= MAX_HASH_LENGTH
            && value.bytes().all(|byte| HASH_ALPHABET.contains(&byte));
        if well_formed {
            Ok(Self(value))
        } else {
            Err(WebhookValidationError::MalformedHash { value })
        }
    }

    /// Generate a fresh random hash from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let value = (0..HASH_LENGTH)
            .map(|_| char::from(HASH_ALPHABET[rng.gen_range(0..HASH_ALPHABET.len())]))
            .collect();
        Self(value)
    }

    /// Borrow the hash as text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for WebhookHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WebhookHash {
    type Error = WebhookValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WebhookHash> for String {
    fn from(value: WebhookHash) -> Self {
        value.0
    }
}

/// Fully qualified destination table, `<stage>.<bucket>.<table>`.
///
/// ## Invariants
/// - Exactly three non-empty dot-separated segments.
///
/// ```
/// use webhook_batcher::domain::TableId;
///
/// let table: TableId = "in.c-sales.orders".parse().expect("valid table id");
/// assert_eq!(table.bucket_id(), "in.c-sales");
/// assert_eq!(table.bucket_display_name(), "sales");
/// assert!("in.orders".parse::<TableId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    raw: String,
    stage_end: usize,
    bucket_end: usize,
}

impl TableId {
    /// Prefix Storage API bucket names carry that display names omit.
    const BUCKET_PREFIX: &'static str = "c-";

    /// Destination stage, e.g. `in`.
    pub fn stage(&self) -> &str {
        &self.raw[..self.stage_end]
    }

    /// Bucket segment, e.g. `c-sales`.
    pub fn bucket(&self) -> &str {
        &self.raw[self.stage_end + 1..self.bucket_end]
    }

    /// Table name segment, e.g. `orders`.
    pub fn table(&self) -> &str {
        &self.raw[self.bucket_end + 1..]
    }

    /// Bucket identifier, `<stage>.<bucket>`.
    pub fn bucket_id(&self) -> &str {
        &self.raw[..self.bucket_end]
    }

    /// Bucket name without the `c-` prefix, used as name and display name on
    /// creation.
    pub fn bucket_display_name(&self) -> &str {
        let bucket = self.bucket();
        bucket.strip_prefix(Self::BUCKET_PREFIX).unwrap_or(bucket)
    }

    /// Full identifier text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for TableId {
    type Err = WebhookValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = value.split('.').collect();
        let [stage, bucket, table] = segments.as_slice() else {
            return Err(WebhookValidationError::TableIdSegments {
                value: value.to_owned(),
                segments: segments.len(),
            });
        };
        if [stage, bucket, table].iter().any(|segment| segment.is_empty()) {
            return Err(WebhookValidationError::TableIdEmptySegment {
                value: value.to_owned(),
            });
        }
        let stage_end = stage.len();
        Ok(Self {
            raw: value.to_owned(),
            stage_end,
            bucket_end: stage_end + 1 + bucket.len(),
        })
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Storage API token supplied by the webhook owner.
///
/// `Debug` output never includes the token; use [`Credential::fingerprint`]
/// to correlate it in logs and messages.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a non-blank token.
    pub fn new(token: impl Into<String>) -> Result<Self, WebhookValidationError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(WebhookValidationError::EmptyCredential);
        }
        Ok(Self(token))
    }

    /// Raw token for Storage API requests.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Truncated SHA-256 fingerprint as 16 lowercase hex characters.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// Registered webhook with its accounting state.
#[derive(Debug, Clone, PartialEq)]
pub struct Webhook {
    /// Internal numeric identifier.
    pub id: i64,
    /// Public hash used in ingestion URLs.
    pub hash: WebhookHash,
    /// Storage API project owning the destination table.
    pub project_id: i64,
    /// Credential used for every Storage API call made for this webhook.
    pub credential: Credential,
    /// Destination table.
    pub table_id: TableId,
    /// Cumulative buffered bytes since the last export.
    pub size_bytes: u64,
    /// Time of the last successful export (registration time initially).
    pub imported_at: DateTime<Utc>,
    /// Flush policy.
    pub conditions: Conditions,
}

impl Webhook {
    /// Public ingestion URL on `host`.
    ///
    /// ```
    /// # use chrono::Utc;
    /// # use webhook_batcher::domain::{Conditions, Credential, Webhook, WebhookHash};
    /// let webhook = Webhook {
    ///     id: 1,
    ///     hash: WebhookHash::new("abc").expect("valid hash"),
    ///     project_id: 7,
    ///     credential: Credential::new("token").expect("valid token"),
    ///     table_id: "in.c-sales.orders".parse().expect("valid table id"),
    ///     size_bytes: 0,
    ///     imported_at: Utc::now(),
    ///     conditions: Conditions::new(),
    /// };
    /// assert_eq!(webhook.url("hooks.example.com"), "https://hooks.example.com/import/abc");
    /// ```
    pub fn url(&self, host: &str) -> String {
        format!("https://{host}/import/{}", self.hash)
    }

    /// Time elapsed since the last export, clamped to zero for clock skew.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.imported_at).to_std().unwrap_or_default()
    }
}

/// Data needed to persist a new webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhook {
    /// Storage API project owning the destination table.
    pub project_id: i64,
    /// Verified credential.
    pub credential: Credential,
    /// Destination table.
    pub table_id: TableId,
    /// Flush policy.
    pub conditions: Conditions,
}

/// One buffered inbound payload in export order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedRow {
    /// Monotonic row identifier, the tie-breaker for equal timestamps.
    pub id: i64,
    /// Arrival time.
    pub time: DateTime<Utc>,
    /// Request metadata serialised as a JSON object.
    pub headers: String,
    /// Raw payload body.
    pub body: String,
}

impl BufferedRow {
    /// Bytes the row contributes to the webhook's cumulative size.
    pub fn size_bytes(&self) -> u64 {
        (self.headers.len() + self.body.len()) as u64
    }
}
