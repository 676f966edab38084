// Agent token sources
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const TOKEN_ENV_VAR: &str = "SPACETRADERS_TOKEN";

/// Supplies the bearer token attached to every API call.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<String, ConfigError>;
}

/// A token known up front.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Result<String, ConfigError> {
        Ok(self.0.clone())
    }
}

// Tokens are long opaque strings; never print them.
impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

/// A token read once from a file when the provider is built, so calls never touch the disk.
#[derive(Clone)]
pub struct FileToken {
    path: PathBuf,
    token: String,
}

impl FileToken {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let token = load_agent_token(&path)?;
        Ok(Self { path, token })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenProvider for FileToken {
    fn token(&self) -> Result<String, ConfigError> {
        Ok(self.token.clone())
    }
}

impl std::fmt::Debug for FileToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileToken").field("path", &self.path).finish_non_exhaustive()
    }
}

/// `SPACETRADERS_TOKEN` when set, otherwise the token file. Resolved once at load.
#[derive(Debug, Clone)]
pub enum EnvOrFileToken {
    Env(StaticToken),
    File(FileToken),
}

impl EnvOrFileToken {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        match std::env::var(TOKEN_ENV_VAR) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::Env(StaticToken::new(token.trim()))),
            _ => FileToken::load(path).map(Self::File),
        }
    }
}

impl TokenProvider for EnvOrFileToken {
    fn token(&self) -> Result<String, ConfigError> {
        match self {
            Self::Env(token) => token.token(),
            Self::File(token) => token.token(),
        }
    }
}

pub fn load_agent_token(path: impl Into<PathBuf>) -> Result<String, ConfigError> {
    let path = path.into();
    let token = std::fs::read_to_string(&path)
        .map_err(|e| ConfigError::io(&path, e))?
        .trim()
        .to_string();
    if token.is_empty() {
        return Err(ConfigError::EmptyToken(path));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_token_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  eyJhbGciOi.token  ").unwrap();
        let provider = FileToken::load(file.path()).unwrap();
        assert_eq!(provider.token().unwrap(), "eyJhbGciOi.token");
        assert_eq!(provider.path(), file.path());
    }

    #[test]
    fn file_token_is_read_once() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "first-token\n").unwrap();
        let provider = FileToken::load(file.path()).unwrap();

        std::fs::write(file.path(), "").unwrap();
        assert_eq!(provider.token().unwrap(), "first-token");
        assert!(!format!("{:?}", provider).contains("first-token"));
    }

    #[test]
    fn empty_or_missing_file_is_an_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            FileToken::load(file.path()),
            Err(ConfigError::EmptyToken(_))
        ));
        assert!(matches!(
            FileToken::load("/definitely/not/here/AGENT_TOKEN"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn static_token_debug_hides_secret() {
        let token = StaticToken::new("secret-value");
        assert!(!format!("{:?}", token).contains("secret"));
    }
}
