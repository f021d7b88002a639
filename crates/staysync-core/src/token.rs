//! Signed feed tokens bound to a channel link.
//!
//! A token is the URL-safe base64 encoding of the link's 16 UUID bytes
//! followed by an HMAC-SHA256 tag over those bytes. Tokens carry no expiry;
//! revocation is the link's active flag, checked on every feed request.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::models::ChannelLinkId;

type HmacSha256 = Hmac<Sha256>;

/// Minimum secret length accepted for signing
pub const MIN_SECRET_LEN: usize = 32;

/// Separates feed-token tags from any other use of the same secret
const DOMAIN_TAG: &[u8] = b"staysync-feed-token-v1";

const ID_LEN: usize = 16;
const TAG_LEN: usize = 32;

/// Produces and verifies feed tokens with a server-held secret
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TokenSigner")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::validation(format!(
                "token secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| Error::validation("token secret rejected by HMAC"))?;
        Ok(Self { mac })
    }

    /// Issue the token for a channel link
    #[must_use]
    pub fn sign(&self, link_id: ChannelLinkId) -> String {
        let tag = self.tag(link_id.as_bytes());
        let mut raw = Vec::with_capacity(ID_LEN + TAG_LEN);
        raw.extend_from_slice(link_id.as_bytes());
        raw.extend_from_slice(&tag);
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Recover the channel link a token was issued for
    ///
    /// Only authenticity is checked here; callers must still confirm the
    /// link is active.
    pub fn verify(&self, token: &str) -> Result<ChannelLinkId> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| Error::auth("malformed token"))?;
        if raw.len() != ID_LEN + TAG_LEN {
            return Err(Error::auth("malformed token"));
        }
        let (id_bytes, tag) = raw.split_at(ID_LEN);

        self.keyed(id_bytes)
            .verify_slice(tag)
            .map_err(|_| Error::auth("token signature mismatch"))?;

        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(id_bytes);
        Ok(ChannelLinkId::from_bytes(id))
    }

    fn keyed(&self, id_bytes: &[u8]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(DOMAIN_TAG);
        mac.update(id_bytes);
        mac
    }

    fn tag(&self, id_bytes: &[u8]) -> Vec<u8> {
        self.keyed(id_bytes).finalize().into_bytes().to_vec()
    }
}
