pub mod config {
    use serde::Deserialize;

    /// Longest task title accepted when none is configured.
    pub const DEFAULT_MAX_TITLE_LENGTH: usize = 32;

    #[derive(Deserialize, Debug, Clone)]
    pub struct Config {
        pub db_url: String,
        #[serde(default = "default_port")]
        pub port: u16,
        /// Shared secret of the identity provider that signs session tokens.
        pub jwt_secret: String,
        /// Where anonymous visitors of protected pages are sent to sign in.
        #[serde(default = "default_sign_in_url")]
        pub sign_in_url: String,
        #[serde(default = "default_max_title_length")]
        pub max_title_length: usize,
    }

    impl Config {
        /// Loads configuration from environment variables.
        pub fn from_env() -> anyhow::Result<Self> {
            let settings = config::Config::builder()
                .add_source(config::Environment::default())
                .build()?;

            let config: Config = settings.try_deserialize()?;
            Ok(config)
        }
    }

    fn default_port() -> u16 {
        8080
    }

    fn default_sign_in_url() -> String {
        "/auth/sign-in".to_string()
    }

    fn default_max_title_length() -> usize {
        DEFAULT_MAX_TITLE_LENGTH
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn can_fill_in_defaults_for_optional_settings() {
            let settings = config::Config::builder()
                .set_override("db_url", "postgres://localhost/tasks")
                .unwrap()
                .set_override("jwt_secret", "secret")
                .unwrap()
                .build()
                .unwrap();

            let config: Config = settings.try_deserialize().unwrap();

            assert_eq!(config.port, 8080);
            assert_eq!(config.sign_in_url, "/auth/sign-in");
            assert_eq!(config.max_title_length, DEFAULT_MAX_TITLE_LENGTH);
        }
    }
}

pub mod auth;
pub mod board;
pub mod entities;
pub mod task;
pub mod web;
