use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

use super::id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ProtocolVersion {
    #[default]
    #[serde(rename = "v311")]
    V311,
    #[serde(rename = "v5")]
    V5,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    pub protocol: ProtocolVersion,
    /// Keep-alive interval in seconds, `0` disables it.
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::V311,
            keep_alive: 60,
            username: None,
            password: None,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ClientOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        validate_keep_alive(self.keep_alive)?;

        match (&self.username, &self.password) {
            (Some(username), _) => id::validate_utf8(username)?,
            (None, Some(_)) => {
                return Err(Error::InvalidArgument(
                    "password given without a username".to_owned(),
                ))
            }
            (None, None) => (),
        }

        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidArgument(
                "connect timeout must be positive".to_owned(),
            ));
        }

        Ok(())
    }
}

pub(crate) fn validate_keep_alive(keep_alive: u16) -> Result<()> {
    if keep_alive != 0 && keep_alive < 5 {
        return Err(Error::InvalidArgument(format!(
            "keep-alive of {keep_alive}s is below the 5s minimum"
        )));
    }
    Ok(())
}
