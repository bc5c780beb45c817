use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::DirectoryConfig;
use crate::services::tenant_error::TenantError;

/// Longest upstream body kept on a `DirectoryError::Status`
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Invalid accounts service URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Accounts service request failed: {0}")]
    Transport(String),

    #[error("Accounts responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Accounts response is not valid JSON: {0}")]
    InvalidPayload(String),

    #[error("Missing key '{0}' in Accounts response")]
    MissingField(&'static str),

    #[error("Invalid value for '{field}' in Accounts response: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DirectoryError {
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            DirectoryError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// How a tenant is looked up in the accounts directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TenantLookup {
    ClientId(i64),
    Username(String),
}

impl TenantLookup {
    /// Exactly one of the two identifiers must be given
    pub fn from_parts(client_id: Option<i64>, username: Option<String>) -> Result<Self, TenantError> {
        let username = username.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        match (client_id, username) {
            (Some(id), None) => Ok(TenantLookup::ClientId(id)),
            (None, Some(name)) => Ok(TenantLookup::Username(name)),
            (None, None) => Err(TenantError::InvalidArgument(
                "Provide client_id or client_username".to_string(),
            )),
            (Some(_), Some(_)) => Err(TenantError::InvalidArgument(
                "Provide only one of client_id or client_username".to_string(),
            )),
        }
    }

    fn endpoint(&self) -> (&'static str, &'static str, String) {
        match self {
            TenantLookup::ClientId(id) => ("by-client-id", "client_id", id.to_string()),
            TenantLookup::Username(name) => ("by-username", "username", name.clone()),
        }
    }
}

impl fmt::Display for TenantLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantLookup::ClientId(id) => write!(f, "client_id={}", id),
            TenantLookup::Username(name) => write!(f, "username={}", name),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Password {
    Encrypted(String),
    Plain(String),
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Password::Encrypted(token) => write!(f, "Encrypted(<{} bytes>)", token.len()),
            Password::Plain(_) => f.write_str("Plain(<redacted>)"),
        }
    }
}

/// Database credentials for one tenant as returned by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub alias: String,
    pub db_name: String,
    pub db_user: String,
    pub db_host: String,
    pub db_port: u16,
    pub password: Password,
}

/// Wire shape of the directory payload; every field is checked in `validate`
#[derive(Debug, Default, Deserialize)]
struct RawCredentialRecord {
    alias: Option<String>,
    db_name: Option<String>,
    db_user: Option<String>,
    db_host: Option<String>,
    db_port: Option<Value>,
    /// Outer `None`: key absent. `Some(None)`: key present with `null`.
    #[serde(default, deserialize_with = "present")]
    db_password_encrypted: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    db_password: Option<Option<String>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DirectoryError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(DirectoryError::MissingField(field))
}

fn parse_port(value: Option<Value>) -> Result<u16, DirectoryError> {
    let invalid = |reason: String| DirectoryError::InvalidField { field: "db_port", reason };
    match value {
        None | Some(Value::Null) => Err(DirectoryError::MissingField("db_port")),
        Some(Value::String(s)) if s.trim().is_empty() => Err(DirectoryError::MissingField("db_port")),
        Some(Value::String(s)) => s.trim().parse::<u16>().map_err(|e| invalid(e.to_string())),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| invalid(format!("{} is not a port number", n))),
        Some(other) => Err(invalid(format!("unexpected type: {}", other))),
    }
}

impl RawCredentialRecord {
    fn validate(self) -> Result<CredentialRecord, DirectoryError> {
        let alias = required(self.alias, "alias")?;
        let db_name = required(self.db_name, "db_name")?;
        let db_user = required(self.db_user, "db_user")?;
        let db_host = required(self.db_host, "db_host")?;
        let db_port = parse_port(self.db_port)?;

        // Key presence decides: the encrypted key wins when both are present,
        // and a null plain password means the tenant has none.
        let password = match (self.db_password_encrypted, self.db_password) {
            (Some(Some(token)), _) => Password::Encrypted(token),
            (Some(None), _) => {
                return Err(DirectoryError::InvalidField {
                    field: "db_password_encrypted",
                    reason: "null".to_string(),
                })
            }
            (None, Some(plain)) => Password::Plain(plain.unwrap_or_default()),
            (None, None) => return Err(DirectoryError::MissingField("db_password or db_password_encrypted")),
        };

        Ok(CredentialRecord { alias, db_name, db_user, db_host, db_port, password })
    }
}

/// Parse and validate a directory response body
pub fn parse_credential_record(body: &str) -> Result<CredentialRecord, DirectoryError> {
    let raw: RawCredentialRecord =
        serde_json::from_str(body).map_err(|e| DirectoryError::InvalidPayload(e.to_string()))?;
    raw.validate()
}

/// Directory service holding tenant database credentials
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn fetch(&self, lookup: &TenantLookup) -> Result<CredentialRecord, DirectoryError>;
}

/// `DirectoryClient` backed by the central accounts service over HTTP
pub struct HttpDirectoryClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpDirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        Self::with_timeout(&config.base_url, config.token.clone(), config.timeout())
    }

    pub fn with_timeout(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(base_url).map_err(|e| DirectoryError::InvalidBaseUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::InvalidBaseUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Ok(Self { client, base_url, token })
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["client-db-info", endpoint]);
        Ok(url)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn fetch(&self, lookup: &TenantLookup) -> Result<CredentialRecord, DirectoryError> {
        let (endpoint, param, value) = lookup.endpoint();
        let url = self.endpoint_url(endpoint)?;
        debug!("Fetching tenant DB info ({}) from {}", lookup, url);

        let mut request = self
            .client
            .get(url)
            .query(&[(param, value.as_str())])
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        if status != StatusCode::OK {
            warn!("Accounts service responded {} for {}", status.as_u16(), lookup);
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        parse_credential_record(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full() -> Value {
        json!({
            "alias": "client_1845",
            "db_name": "assets_1845",
            "db_user": "asset_user",
            "db_host": "db.internal",
            "db_port": "5432",
            "db_password_encrypted": "gAAAAAB-token"
        })
    }

    #[test]
    fn parses_full_record() {
        let record = parse_credential_record(&full().to_string()).unwrap();
        assert_eq!(record.alias, "client_1845");
        assert_eq!(record.db_port, 5432);
        assert_eq!(record.password, Password::Encrypted("gAAAAAB-token".to_string()));
    }

    #[test]
    fn numeric_port_is_accepted() {
        let mut body = full();
        body["db_port"] = json!(6432);
        assert_eq!(parse_credential_record(&body.to_string()).unwrap().db_port, 6432);
    }

    #[test]
    fn every_required_field_is_checked() {
        for field in ["alias", "db_name", "db_user", "db_host", "db_port"] {
            let mut missing = full();
            missing.as_object_mut().unwrap().remove(field);
            let err = parse_credential_record(&missing.to_string()).unwrap_err();
            assert!(matches!(err, DirectoryError::MissingField(f) if f == field), "{}: {:?}", field, err);

            let mut empty = full();
            empty[field] = json!("");
            let err = parse_credential_record(&empty.to_string()).unwrap_err();
            assert!(matches!(err, DirectoryError::MissingField(f) if f == field), "{}: {:?}", field, err);
        }
    }

    #[test]
    fn password_variants() {
        let mut plain = full();
        plain.as_object_mut().unwrap().remove("db_password_encrypted");
        plain["db_password"] = json!("plain-pw");
        assert_eq!(
            parse_credential_record(&plain.to_string()).unwrap().password,
            Password::Plain("plain-pw".to_string())
        );

        let mut both = full();
        both["db_password"] = json!("plain-pw");
        assert!(matches!(
            parse_credential_record(&both.to_string()).unwrap().password,
            Password::Encrypted(_)
        ));

        let mut neither = full();
        neither.as_object_mut().unwrap().remove("db_password_encrypted");
        assert!(matches!(
            parse_credential_record(&neither.to_string()),
            Err(DirectoryError::MissingField(_))
        ));
    }

    #[test]
    fn null_passwords_follow_key_presence() {
        let mut plain_null = full();
        plain_null.as_object_mut().unwrap().remove("db_password_encrypted");
        plain_null["db_password"] = Value::Null;
        assert_eq!(
            parse_credential_record(&plain_null.to_string()).unwrap().password,
            Password::Plain(String::new())
        );

        let mut encrypted_null = full();
        encrypted_null["db_password_encrypted"] = Value::Null;
        encrypted_null["db_password"] = json!("plain-pw");
        assert!(matches!(
            parse_credential_record(&encrypted_null.to_string()),
            Err(DirectoryError::InvalidField { field: "db_password_encrypted", .. })
        ));
    }

    #[test]
    fn bad_port_is_invalid_field() {
        let mut body = full();
        body["db_port"] = json!("not-a-port");
        assert!(matches!(
            parse_credential_record(&body.to_string()),
            Err(DirectoryError::InvalidField { field: "db_port", .. })
        ));

        body["db_port"] = json!(70000);
        assert!(matches!(
            parse_credential_record(&body.to_string()),
            Err(DirectoryError::InvalidField { field: "db_port", .. })
        ));
    }

    #[test]
    fn non_json_body_is_invalid_payload() {
        assert!(matches!(
            parse_credential_record("<html>oops</html>"),
            Err(DirectoryError::InvalidPayload(_))
        ));
    }

    #[test]
    fn lookup_requires_exactly_one_identifier() {
        assert_eq!(TenantLookup::from_parts(Some(7), None).unwrap(), TenantLookup::ClientId(7));
        assert_eq!(
            TenantLookup::from_parts(None, Some("acme".into())).unwrap(),
            TenantLookup::Username("acme".into())
        );
        assert!(matches!(TenantLookup::from_parts(None, None), Err(TenantError::InvalidArgument(_))));
        assert!(matches!(
            TenantLookup::from_parts(None, Some("  ".into())),
            Err(TenantError::InvalidArgument(_))
        ));
        assert!(matches!(
            TenantLookup::from_parts(Some(1), Some("acme".into())),
            Err(TenantError::InvalidArgument(_))
        ));
    }

    #[test]
    fn endpoint_urls_keep_base_path() {
        let client =
            HttpDirectoryClient::with_timeout("http://accounts.local/api/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint_url("by-client-id").unwrap().as_str(),
            "http://accounts.local/api/client-db-info/by-client-id"
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            HttpDirectoryClient::with_timeout("not a url", None, Duration::from_secs(1)),
            Err(DirectoryError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            HttpDirectoryClient::with_timeout("mailto:ops@example.com", None, Duration::from_secs(1)),
            Err(DirectoryError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn record_debug_hides_password() {
        let mut body = full();
        body.as_object_mut().unwrap().remove("db_password_encrypted");
        body["db_password"] = json!("plain-pw");
        let record = parse_credential_record(&body.to_string()).unwrap();
        assert!(!format!("{:?}", record).contains("plain-pw"));
    }
}
