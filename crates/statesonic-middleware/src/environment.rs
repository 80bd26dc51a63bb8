//! Build environment detection.

use std::str::FromStr;

/// Environment variable that overrides the detected environment.
pub const ENV_VAR: &str = "STATESONIC_ENV";

/// Whether the host runs as a development or a production build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Read [`ENV_VAR`], falling back to the build profile.
    pub fn detect() -> Self {
        match std::env::var(ENV_VAR) {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                log::warn!("[MIDDLEWARE] Ignoring unknown {}={:?}", ENV_VAR, value);
                Self::from_build()
            }),
            Err(_) => Self::from_build(),
        }
    }

    fn from_build() -> Self {
        if cfg!(debug_assertions) {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environment() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(" dev ".parse::<Environment>().unwrap(), Environment::Development);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_is_production() {
        assert!(Environment::Production.is_production());
        assert!(!Environment::Development.is_production());
    }
}
