//! Cache keys and sharded destination paths.
//!
//! Keys are SHA-256 hex digests over an ordered list of parts. Each part is
//! length-prefixed before hashing, so `["ab", "c"]` and `["a", "bc"]` never
//! collide and reordering the parts changes the key.

use crate::imaging::{Operation, TransformOptions};
use crate::image_file::extension_for;
use sha2::{Digest, Sha256};

/// Suffix marking the parent→children set of a source path.
pub const CHILDREN_SUFFIX: &str = ":children";

/// Deterministic key for an ordered list of parts.
pub fn tokey<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref().as_bytes();
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

/// Key of the set holding every derived key of `source_path`.
pub fn children_key(source_path: &str) -> String {
    format!("{}{}", tokey(&[source_path]), CHILDREN_SUFFIX)
}

/// Key for a (source, operation, options) request.
///
/// Every field that changes the output bytes is part of the digest input.
pub fn request_key(path: &str, operation: Operation, opts: &TransformOptions) -> String {
    tokey(&[
        path.to_string(),
        operation.to_string(),
        format!("{}x{}", opts.width, opts.height),
        format!("upscale={}", opts.upscale),
        extension_for(opts.format).to_string(),
        format!("q={}", opts.quality.value()),
        format!("degree={}", opts.degree),
        format!("pos={}", opts.position),
        format!("sigma={}", opts.sigma),
    ])
}

/// Split `key` into `depth` prefix segments of `width` chars, followed by
/// either the remainder (`rest_only`) or the whole key.
///
/// Segments that would run past the end of the key are truncated.
///
/// # Examples
/// ```
/// # use imgfit::hash::shard;
/// assert_eq!(shard("abcdef", 2, 2, false), vec!["ab", "cd", "abcdef"]);
/// assert_eq!(shard("abcdef", 2, 2, true), vec!["ab", "cd", "ef"]);
/// ```
pub fn shard(key: &str, width: usize, depth: usize, rest_only: bool) -> Vec<String> {
    let chars: Vec<char> = key.chars().collect();
    let take = |from: usize, to: usize| -> String {
        chars[from.min(chars.len())..to.min(chars.len())]
            .iter()
            .collect()
    };

    let mut segments: Vec<String> = (0..depth)
        .map(|i| take(width * i, width * (i + 1)))
        .filter(|s| !s.is_empty())
        .collect();

    if rest_only {
        segments.push(take(width * depth, chars.len()));
    } else {
        segments.push(key.to_string());
    }
    segments
}

/// Destination path for a derived file: shard segments joined by `/`, plus
/// the format extension.
pub fn shard_path(key: &str, width: usize, depth: usize, rest_only: bool, ext: &str) -> String {
    format!("{}.{}", shard(key, width, depth, rest_only).join("/"), ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    #[test]
    fn tokey_is_deterministic() {
        assert_eq!(tokey(&["a", "b"]), tokey(&["a", "b"]));
        assert_eq!(tokey(&["a", "b"]).len(), 64);
    }

    #[test]
    fn tokey_is_order_sensitive() {
        assert_ne!(tokey(&["a", "b"]), tokey(&["b", "a"]));
    }

    #[test]
    fn tokey_is_unambiguous_across_boundaries() {
        assert_ne!(tokey(&["ab", "c"]), tokey(&["a", "bc"]));
        assert_ne!(tokey(&["a||b"]), tokey(&["a", "b"]));
    }

    #[test]
    fn children_key_has_suffix() {
        let key = children_key("photos/cat.jpg");
        assert!(key.ends_with(":children"));
        assert!(key.starts_with(&tokey(&["photos/cat.jpg"])));
    }

    #[test]
    fn request_key_varies_with_every_field() {
        let base = TransformOptions::sized(300, 200, ImageFormat::Jpeg);
        let k = request_key("a.jpg", Operation::Thumbnail, &base);
        assert_eq!(k, request_key("a.jpg", Operation::Thumbnail, &base));

        assert_ne!(k, request_key("b.jpg", Operation::Thumbnail, &base));
        assert_ne!(k, request_key("a.jpg", Operation::Resize, &base));

        let mut other = base.clone();
        other.format = ImageFormat::Png;
        assert_ne!(k, request_key("a.jpg", Operation::Thumbnail, &other));

        let mut other = base.clone();
        other.upscale = true;
        assert_ne!(k, request_key("a.jpg", Operation::Thumbnail, &other));
    }

    #[test]
    fn shard_without_depth_is_the_key() {
        assert_eq!(shard("abcdef", 0, 0, false), vec!["abcdef"]);
        assert_eq!(shard("abcdef", 0, 0, true), vec!["abcdef"]);
    }

    #[test]
    fn shard_with_depth() {
        assert_eq!(shard("abcdef", 1, 3, false), vec!["a", "b", "c", "abcdef"]);
        assert_eq!(shard("abcdef", 1, 3, true), vec!["a", "b", "c", "def"]);
    }

    #[test]
    fn shard_truncates_past_the_end() {
        assert_eq!(shard("abc", 2, 3, true), vec!["ab", "c", ""]);
    }

    #[test]
    fn shard_path_appends_extension() {
        assert_eq!(shard_path("abcdef", 2, 1, true, "png"), "ab/cdef.png");
        assert_eq!(shard_path("abcdef", 0, 0, false, "jpg"), "abcdef.jpg");
    }
}
