//! Resolution key codec.
//!
//! Maps raw drive keys to the externally visible keys used in bundle
//! resolution and source maps. The codec percent-encodes each path segment,
//! prefixes the configured mount, and marks directory keys with a trailing
//! slash so file keys and directory keys for the same path never collide.
//!
//! The codec is pure: the output is a deterministic function of
//! `(mount, raw_key, is_directory)` and two distinct raw keys never encode
//! to the same output key.

use std::path::Path;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters percent-encoded inside a key path segment.
///
/// `/` is the segment separator and is never encoded. `%` must be encoded so
/// decoding stays unambiguous; the rest are characters that would make keys
/// ambiguous in URL-like mounts.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encode every `/`-separated segment of a key path.
///
/// Separators are preserved as-is, so `encode_path("/a b/c")` yields
/// `/a%20b/c`.
pub fn encode_path(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut first = true;

    for segment in raw.split('/') {
        if !first {
            out.push('/');
        }
        first = false;
        out.extend(utf8_percent_encode(segment, SEGMENT));
    }

    out
}

/// Compute the externally visible resolution key for a raw drive key.
///
/// The mount's trailing slash (if any) is stripped before prefixing, so a
/// mount of `/` leaves keys rooted at `/...` and `pear://dev/` prefixes as
/// `pear://dev`. Directory keys always end with exactly one `/`; file keys
/// end with one only if the raw key itself did.
pub fn resolution_key(mount: &str, raw_key: &str, is_directory: bool) -> String {
    let mut key = String::with_capacity(mount.len() + raw_key.len() + 1);
    key.push_str(mount.trim_end_matches('/'));
    key.push_str(&encode_path(raw_key));

    if is_directory && !key.ends_with('/') {
        key.push('/');
    }

    key
}

/// Render a local filesystem path as a `file://` reference.
///
/// Segments are percent-encoded with the same set as resolution keys, so a
/// prebuild at `/tmp/my cache/abc.node` becomes
/// `file:///tmp/my%20cache/abc.node`.
pub fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("file://{}", encode_path(&raw))
}
