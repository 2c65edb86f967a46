// dedup.rs - Identity fingerprints and dedup passes
// Purpose: URL normalization, cache-header fingerprints, content hashing.
//          Every function here is pure; passes are idempotent.

use crate::error::{ReconError, Result};
use crate::model::{CacheFingerprint, CacheHeaders, ContentHash, LiveUrl, UrlRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

// ═══════════════════════════════════════════════════════════════════════════
// URL NORMALIZATION
// ═══════════════════════════════════════════════════════════════════════════

/// Canonical form of a URL: lowercase scheme and host, default port and
/// fragment dropped, trailing slashes trimmed. Scheme-less input is https.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ReconError::Data("empty URL".to_string()));
    }

    let candidate = if trimmed.starts_with("//") {
        format!("https:{}", trimmed)
    } else if !trimmed.contains("://") {
        format!("https://{}", trimmed)
    } else {
        trimmed.to_string()
    };

    let mut url = Url::parse(&candidate)
        .map_err(|e| ReconError::Data(format!("unparsable URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ReconError::Data(format!("unsupported scheme in '{}'", raw)));
    }
    if url.host_str().is_none() {
        return Err(ReconError::Data(format!("URL without host: '{}'", raw)));
    }

    url.set_fragment(None);
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

/// Identity-merge by normalized URL: earliest discovery timestamp wins (with
/// its raw form), contributing tools are unioned. Output is sorted.
pub fn merge_url_records<I>(records: I) -> Vec<UrlRecord>
where
    I: IntoIterator<Item = UrlRecord>,
{
    let mut merged: BTreeMap<String, UrlRecord> = BTreeMap::new();

    for record in records {
        match merged.get_mut(&record.normalized) {
            Some(existing) => {
                existing.sources.extend(record.sources.iter().cloned());
                if record.discovered_at < existing.discovered_at {
                    existing.discovered_at = record.discovered_at;
                    existing.raw = record.raw;
                }
            }
            None => {
                merged.insert(record.normalized.clone(), record);
            }
        }
    }

    merged.into_values().collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE FINGERPRINTS
// ═══════════════════════════════════════════════════════════════════════════

/// Derive a fingerprint from cache headers. An ETag alone is comparable;
/// otherwise both Content-Length and Last-Modified are required.
pub fn cache_fingerprint(headers: &CacheHeaders) -> CacheFingerprint {
    let etag = headers
        .etag
        .as_deref()
        .map(|e| e.trim().trim_matches('"').to_string())
        .filter(|e| !e.is_empty());
    let last_modified = headers
        .last_modified
        .as_deref()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    let content_length = headers.content_length;

    if etag.is_none() && (content_length.is_none() || last_modified.is_none()) {
        return CacheFingerprint::Unknown;
    }

    CacheFingerprint::Known {
        etag,
        content_length,
        last_modified,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapsedUrl {
    pub url: String,
    pub kept: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintDedup {
    pub retained: Vec<LiveUrl>,
    pub collapsed: Vec<CollapsedUrl>,
}

/// Collapse live URLs sharing a known fingerprint on the same host. The
/// survivor is the earliest discovered, ties broken by normalized URL.
/// Unknown or missing fingerprints are always retained.
pub fn dedup_by_fingerprint(live: Vec<LiveUrl>) -> FingerprintDedup {
    let mut groups: BTreeMap<(String, CacheFingerprint), Vec<LiveUrl>> = BTreeMap::new();
    let mut retained = Vec::new();

    for entry in live {
        match &entry.fingerprint {
            Some(fp) if fp.is_known() => {
                groups
                    .entry((entry.record.host(), fp.clone()))
                    .or_default()
                    .push(entry);
            }
            _ => retained.push(entry),
        }
    }

    let mut collapsed = Vec::new();
    for (_, mut members) in groups {
        members.sort_by(|a, b| {
            a.record
                .discovered_at
                .cmp(&b.record.discovered_at)
                .then_with(|| a.record.normalized.cmp(&b.record.normalized))
        });
        let mut members = members.into_iter();
        if let Some(keeper) = members.next() {
            for dropped in members {
                collapsed.push(CollapsedUrl {
                    url: dropped.record.normalized,
                    kept: keeper.record.normalized.clone(),
                });
            }
            retained.push(keeper);
        }
    }

    retained.sort_by(|a, b| a.record.normalized.cmp(&b.record.normalized));
    collapsed.sort_by(|a, b| a.url.cmp(&b.url));

    FingerprintDedup {
        retained,
        collapsed,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONTENT HASHING
// ═══════════════════════════════════════════════════════════════════════════

pub fn content_hash(bytes: &[u8]) -> ContentHash {
    ContentHash(format!("{:x}", Sha256::digest(bytes)))
}

/// Group URLs by the hash of the body they served.
pub fn group_by_content<I>(fetched: I) -> BTreeMap<ContentHash, BTreeSet<String>>
where
    I: IntoIterator<Item = (String, ContentHash)>,
{
    let mut groups: BTreeMap<ContentHash, BTreeSet<String>> = BTreeMap::new();
    for (url, hash) in fetched {
        groups.entry(hash).or_default().insert(url);
    }
    groups
}
