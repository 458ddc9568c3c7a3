use rand::{distributions::Alphanumeric, Rng};

use crate::error::{Error, Result};

pub(crate) const DEFAULT_PREFIX: &str = "mqh-";

/// Longest client identifier every MQTT 3.1.1 broker must accept.
pub(crate) const GENERATED_LEN: usize = 23;

const MAX_STRING_LEN: usize = u16::MAX as usize;

pub(crate) fn generate(prefix: &str) -> String {
    let random_len = GENERATED_LEN.saturating_sub(prefix.len());
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(random_len)
        .map(char::from)
        .collect();

    format!("{prefix}{suffix}")
}

/// Checks that `value` can be carried as an MQTT UTF-8 encoded string.
pub(crate) fn validate_utf8(value: &str) -> Result<()> {
    if value.len() > MAX_STRING_LEN {
        return Err(Error::MalformedUtf8);
    }

    if value.chars().any(is_disallowed) {
        return Err(Error::MalformedUtf8);
    }

    Ok(())
}

fn is_disallowed(c: char) -> bool {
    let code = c as u32;
    c.is_control() || (0xFDD0..=0xFDEF).contains(&code) || code & 0xFFFE == 0xFFFE
}
