//! Time-based one-time passwords (RFC 6238)
//!
//! Just enough of TOTP to act as the user's authenticator app: HMAC-SHA1,
//! 30 second steps, 6 digits, secrets in unpadded base32.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::errors::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

const STEP_SECONDS: u64 = 30;
const DIGITS: u32 = 6;

/// Code generator for one shared secret
#[derive(Clone)]
pub struct Totp {
    secret: Vec<u8>,
}

impl std::fmt::Debug for Totp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Totp").field("secret", &"<redacted>").finish()
    }
}

impl Totp {
    /// Generator for a base32 encoded secret
    pub fn from_base32(secret: &str) -> Result<Self> {
        let secret = decode_base32(secret)?;
        if secret.is_empty() {
            return Err(Error::assertion("TOTP secret is empty"));
        }
        Ok(Self { secret })
    }

    /// Generator for the `secret` query parameter of an `otpauth://` URI
    pub fn from_uri(uri: &str) -> Result<Self> {
        let parsed = url::Url::parse(uri)
            .map_err(|e| Error::assertion(format!("invalid otpauth URI: {e}")))?;
        if parsed.scheme() != "otpauth" {
            return Err(Error::assertion(format!("not an otpauth URI: {uri}")));
        }
        let secret = parsed
            .query_pairs()
            .find(|(key, _)| key == "secret")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| Error::assertion("otpauth URI has no secret"))?;
        Self::from_base32(&secret)
    }

    /// Code for the step containing `unix_seconds`
    pub fn at(&self, unix_seconds: u64) -> Result<String> {
        let counter = unix_seconds / STEP_SECONDS;
        let mut mac = HmacSha1::new_from_slice(&self.secret)
            .map_err(|e| Error::assertion(format!("invalid TOTP secret: {e}")))?;
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        // Dynamic truncation
        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let binary = u32::from_be_bytes([
            digest[offset] & 0x7f,
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]);
        Ok(format!("{:0width$}", binary % 10u32.pow(DIGITS), width = DIGITS as usize))
    }

    /// Code for the current time
    pub fn now(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::config(format!("system clock before epoch: {e}")))?;
        self.at(now.as_secs())
    }
}

/// RFC 4648 base32, case-insensitive, padding and spaces ignored
fn decode_base32(input: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;

    for c in input.chars().filter(|c| !c.is_whitespace() && *c != '=') {
        let value = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u64 - 'A' as u64,
            c @ '2'..='7' => c as u64 - '2' as u64 + 26,
            other => {
                return Err(Error::assertion(format!("invalid base32 character '{other}'")));
            }
        };
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    Ok(out)
}
