//! Redacted wrappers for sensitive configuration values.
//!
//! The database connection string embeds credentials, so it is carried as a
//! [`SecretString`]. Its `Debug` output is `[REDACTED]`, which keeps it out of
//! `{:?}` formatting and `tracing` fields, and the value is zeroized on drop.
//! Reading it requires an explicit [`ExposeSecret::expose_secret`] call.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let url = SecretString::from("postgresql://ingest:pw@db/telemetry");
//! assert!(!format!("{url:?}").contains("pw@"));
//! assert!(url.expose_secret().starts_with("postgresql://"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_containing_struct_debug_hides_connection_string() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct StoreSettings {
            pool_name: String,
            database_url: SecretString,
        }

        let settings = StoreSettings {
            pool_name: "ingest".to_string(),
            database_url: SecretString::from("postgres://user:pw@db/telemetry"),
        };

        let debug_str = format!("{settings:?}");
        assert!(debug_str.contains("ingest"));
        assert!(!debug_str.contains("postgres://"));
    }

    #[test]
    fn test_deserialize_keeps_value_behind_expose() {
        #[derive(Debug, Deserialize)]
        struct BrokerLogin {
            password: SecretString,
        }

        let json = r#"{"password": "my-secret-value"}"#;
        let login: BrokerLogin = serde_json::from_str(json).unwrap();

        assert_eq!(login.password.expose_secret(), "my-secret-value");
        assert!(!format!("{login:?}").contains("my-secret-value"));
    }
}
