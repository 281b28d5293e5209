use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// A type with the ability to generate session ids.
///
/// Generated ids are used as cookie values and as storage keys,
/// so they must only contain characters of the url-safe base64 alphabet.
pub trait SessionIdGenerator: Debug + Send + Sync {
    /// Generate a fresh session id.
    fn generate(&self) -> String;
}

/// The default session id generator.
/// It encodes a time-ordered 128-bit UUID (version 7) as url-safe base64 without padding,
/// which gives 22 characters with 74 random bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionIdGenerator;

impl SessionIdGenerator for DefaultSessionIdGenerator {
    fn generate(&self) -> String {
        URL_SAFE_NO_PAD.encode(Uuid::now_v7().as_bytes())
    }
}

/// A session id generator drawing all 128 bits from [rand::thread_rng].
/// The encoding is the same as for [DefaultSessionIdGenerator].
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSessionIdGenerator;

impl SessionIdGenerator for RandomSessionIdGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// A debug session id generator that generates an ascending sequence of integers, formatted as strings padded with zeroes.
#[derive(Debug, Default)]
pub struct DebugSessionIdGenerator {
    next_index: AtomicUsize,
}

impl SessionIdGenerator for DebugSessionIdGenerator {
    fn generate(&self) -> String {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        format!("{index:022}")
    }
}

/// Returns true if `id` is non-empty and made of url-safe base64 characters only.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_')
}
