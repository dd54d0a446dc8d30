//! Client-side store: the whole session travels in the cookie value.
//!
//! Wire format: `u.<b64>` or `c.<b64>`, where `<b64>` is URL-safe base64 (no padding) of an
//! AES-256-GCM-SIV sealed payload and `c.` marks a gzip-compressed payload. The prefix is bound
//! into the seal as associated data. The expiry timestamp rides inside the sealed map, so the
//! cookie cannot outlive its max-age even if the browser keeps it.

use std::{
    io::{Read as _, Write as _},
    sync::Arc,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use time::Duration;

use crate::{
    cipher::Cipher,
    clock::{self, Clock},
    codec::{Codec, SessionMap, Value},
    error::{Error, Result},
    key::SecretKey,
    session::EXPIRES_AT_KEY,
    store::SessionStore,
};

const COMPRESSED_PREFIX: &str = "c.";
const UNCOMPRESSED_PREFIX: &str = "u.";

pub const DEFAULT_COMPRESS_THRESHOLD: usize = 1024;

/// Upper bound on an inflated payload.
const MAX_INFLATED_BYTES: u64 = 1 << 20;

#[derive(Debug, Clone)]
pub struct CookieStore {
    cipher: Cipher,
    codec: Codec,
    clock: Arc<dyn Clock>,
    compress_threshold: usize,
}

impl CookieStore {
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: Cipher::new(key),
            codec: Codec::new(),
            clock: clock::system(),
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Payloads larger than this many encoded bytes are gzipped before sealing.
    #[must_use]
    pub fn with_compress_threshold(mut self, bytes: usize) -> Self {
        self.compress_threshold = bytes;
        self
    }

    fn seal(&self, encoded: &[u8]) -> Result<String> {
        let (prefix, payload) = if encoded.len() > self.compress_threshold {
            (COMPRESSED_PREFIX, gzip(encoded)?)
        } else {
            (UNCOMPRESSED_PREFIX, encoded.to_vec())
        };

        let sealed = self.cipher.encrypt(&payload, prefix.as_bytes())?;
        Ok(format!("{prefix}{}", URL_SAFE_NO_PAD.encode(sealed)))
    }

    fn open(&self, value: &str) -> Result<Vec<u8>> {
        let (prefix, compressed) = if value.starts_with(COMPRESSED_PREFIX) {
            (COMPRESSED_PREFIX, true)
        } else if value.starts_with(UNCOMPRESSED_PREFIX) {
            (UNCOMPRESSED_PREFIX, false)
        } else {
            return Err(Error::Decode("unknown cookie format".into()));
        };

        let sealed = URL_SAFE_NO_PAD
            .decode(&value[prefix.len()..])
            .map_err(|_| Error::Decode("cannot decode session".into()))?;
        let payload = self.cipher.decrypt(&sealed, prefix.as_bytes())?;

        if compressed {
            gunzip(&payload)
        } else {
            Ok(payload)
        }
    }
}

#[async_trait]
impl SessionStore for CookieStore {
    async fn write(&self, _key: &str, session: &SessionMap, max_age: Duration) -> Result<String> {
        let mut stamped = session.clone();
        stamped.insert(
            EXPIRES_AT_KEY.to_string(),
            Value::Time(self.clock.now() + max_age),
        );

        let encoded = self.codec.encode(&stamped)?;
        self.seal(&encoded)
    }

    async fn read(&self, key: &str) -> Result<SessionMap> {
        if key.is_empty() {
            return Err(Error::NotFound);
        }

        let mut session = self.codec.decode(&self.open(key)?)?;

        let expires_at = match session.remove(EXPIRES_AT_KEY) {
            Some(Value::Time(at)) => at,
            Some(_) => return Err(Error::Decode("session expiry is not a time".into())),
            None => return Err(Error::Decode("session has no expiry".into())),
        };

        if expires_at <= self.clock.now() {
            return Err(Error::Expired);
        }

        Ok(session)
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let compress_err = |err: std::io::Error| Error::Encode(format!("compress session: {err}"));

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(compress_err)?;
    encoder.finish().map_err(compress_err)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_INFLATED_BYTES + 1)
        .read_to_end(&mut out)
        .map_err(|_| Error::Decode("cannot decode session".into()))?;

    if out.len() as u64 > MAX_INFLATED_BYTES {
        return Err(Error::Decode("session payload too large".into()));
    }
    Ok(out)
}
