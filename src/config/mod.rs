//! Construction-time configuration.
//!
//! Validated once when a [`Harness`](crate::testing::Harness) is built.
//! Unknown keys are rejected so typos in a config file fail loudly instead
//! of silently disabling a feature.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    /// Base URL every test case `url` is appended to.
    #[serde(default)]
    pub endpoint: String,
    /// Storage connection group; all four keys or none.
    #[serde(default)]
    pub db: Option<DbSection>,
    /// Directory the API under test writes uploads to.
    #[serde(default, alias = "uploadDir")]
    pub upload_dir: Option<PathBuf>,
    /// Directory for upload-mismatch diagnostics.
    #[serde(default, alias = "logDir")]
    pub log_dir: Option<PathBuf>,
}

/// Raw `db` group as written in configuration.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbSection {
    pub host: Option<String>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// A complete storage connection group.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub host: String,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DbSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSection")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl DbSection {
    /// Resolves the group: all four keys present yields a connection config,
    /// none yields `None`, anything in between is a configuration error.
    pub fn resolve(&self) -> Result<Option<DbConfig>> {
        match (&self.host, &self.name, &self.user, &self.password) {
            (Some(host), Some(name), Some(user), Some(password)) => Ok(Some(DbConfig {
                host: host.clone(),
                name: name.clone(),
                user: user.clone(),
                password: password.clone(),
            })),
            (None, None, None, None) => Ok(None),
            _ => {
                let missing: Vec<&str> = [
                    ("host", self.host.is_none()),
                    ("name", self.name.is_none()),
                    ("user", self.user.is_none()),
                    ("password", self.password.is_none()),
                ]
                .into_iter()
                .filter_map(|(key, absent)| absent.then_some(key))
                .collect();
                Err(Error::configuration(format!(
                    "db settings must be given together; missing: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

impl HarnessConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_db(mut self, db: DbSection) -> Self {
        self.db = Some(db);
        self
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&raw)
            .map_err(|e| Error::configuration(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::configuration(format!("invalid config: {e}")))
    }

    /// Checks the endpoint and the `db` group. Directory requirements depend
    /// on the test cases and are checked per case.
    pub fn validate(&self) -> Result<Option<DbConfig>> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::configuration("endpoint is required"));
        }
        reqwest::Url::parse(endpoint)
            .map_err(|e| Error::configuration(format!("invalid endpoint `{endpoint}`: {e}")))?;

        match &self.db {
            Some(section) => section.resolve(),
            None => Ok(None),
        }
    }

    /// Full request URL for a test case path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim(), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_with_camel_case_aliases() {
        let config = HarnessConfig::from_toml_str(
            r#"
            endpoint = "http://localhost:8080/api"
            uploadDir = "/tmp/uploads"
            log_dir = "/tmp/logs"

            [db]
            host = "localhost"
            name = "test.db"
            user = "root"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.upload_dir, Some(PathBuf::from("/tmp/uploads")));
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/logs")));
        let db = config.validate().unwrap().unwrap();
        assert_eq!(db.name, "test.db");
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = HarnessConfig::from_toml_str("endpoint = \"http://x\"\nuploads = \"/tmp\"").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn missing_endpoint_is_rejected() {
        let err = HarnessConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("endpoint is required"));
    }

    #[test]
    fn relative_endpoint_is_rejected() {
        assert!(HarnessConfig::new("/api").validate().is_err());
    }

    #[test]
    fn partial_db_group_names_missing_keys() {
        let config = HarnessConfig::new("http://localhost").with_db(DbSection {
            host: Some("localhost".into()),
            name: Some("app".into()),
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("missing: user, password"));
    }

    #[test]
    fn empty_db_group_means_no_storage() {
        let config = HarnessConfig::new("http://localhost").with_db(DbSection::default());
        assert!(config.validate().unwrap().is_none());
    }

    #[test]
    fn debug_output_redacts_password() {
        let db = DbConfig {
            host: "h".into(),
            name: "n".into(),
            user: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{db:?}").contains("hunter2"));
    }

    #[test]
    fn url_for_appends_path() {
        let config = HarnessConfig::new("http://localhost:3000/api");
        assert_eq!(config.url_for("/items"), "http://localhost:3000/api/items");
    }
}
