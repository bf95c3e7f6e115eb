//! Various utilities.

use data_encoding::HEXLOWER;
use ring::digest::{Context, SHA256};

/// Hex-encoded SHA-256 over the given chunks, in order.
pub fn sha256_hex(chunks: &[&str]) -> String {
    let mut context = Context::new(&SHA256);
    for chunk in chunks {
        context.update(chunk.as_bytes());
    }
    HEXLOWER.encode(context.finish().as_ref())
}
