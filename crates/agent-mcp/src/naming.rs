use sha2::{Digest, Sha256};

pub const MAX_TOOL_NAME_LEN: usize = 64;
const TRUNCATED_LEN: usize = 55;
const HASH_HEX_LEN: usize = 8;

/// Registry name for a remote tool: `mcp_<server>_<tool>`.
///
/// Segments are lower-cased and every run of characters outside `[a-z0-9]`
/// becomes a single `_`. Names longer than 64 characters are cut down and
/// suffixed with a hash of the full candidate so they stay unique.
pub fn build_mcp_tool_name(server: &str, tool: &str) -> String {
    let candidate = format!("mcp_{}_{}", sanitize_segment(server), sanitize_segment(tool));
    if candidate.len() <= MAX_TOOL_NAME_LEN {
        return candidate;
    }

    let digest = Sha256::digest(candidate.as_bytes());
    let hash = hex::encode(digest);
    let prefix = candidate[..TRUNCATED_LEN].trim_end_matches('_');
    format!("{}_{}", prefix, &hash[..HASH_HEX_LEN])
}

fn sanitize_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for ch in raw.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch);
        } else {
            pending_separator = true;
        }
    }

    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}
