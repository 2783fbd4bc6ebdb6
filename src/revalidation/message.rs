//! Revalidation messages and their shard assignment.

use serde::{Deserialize, Serialize};

use crate::cache::control::md5_hex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub host: String,
    pub url: String,
    #[serde(rename = "eTag")]
    pub etag: String,
    /// Epoch milliseconds of the stale entry.
    pub last_modified: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalidationMessage {
    #[serde(rename = "MessageBody")]
    pub body: MessageBody,
    #[serde(rename = "MessageDeduplicationId")]
    pub deduplication_id: String,
    #[serde(rename = "MessageGroupId")]
    pub group_id: String,
}

impl RevalidationMessage {
    /// `path` is the cache path (no base path, no trailing slash); `url` is what the origin serves.
    pub fn new(
        host: &str,
        url: &str,
        path: &str,
        etag: &str,
        last_modified: i64,
        max_concurrency: u32,
    ) -> Self {
        Self {
            body: MessageBody {
                host: host.to_string(),
                url: url.to_string(),
                etag: etag.to_string(),
                last_modified,
            },
            deduplication_id: md5_hex(format!("{path}-{last_modified}-{etag}").as_bytes()),
            group_id: message_group_id(path, max_concurrency),
        }
    }

    /// Key of the sync table row.
    pub fn sync_id(&self) -> String {
        format!("{}{}", self.body.host, self.body.url)
    }
}

/// 128-bit mixing hash of the UTF-16 code units of `s`, folded to 32 bits.
pub fn cyrb128(s: &str) -> u32 {
    let mut h1: u32 = 1_779_033_703;
    let mut h2: u32 = 3_144_134_277;
    let mut h3: u32 = 1_013_904_242;
    let mut h4: u32 = 2_773_480_762;
    for k in s.encode_utf16().map(u32::from) {
        h1 = h2 ^ (h1 ^ k).wrapping_mul(597_399_067);
        h2 = h3 ^ (h2 ^ k).wrapping_mul(2_869_860_233);
        h3 = h4 ^ (h3 ^ k).wrapping_mul(951_274_213);
        h4 = h1 ^ (h4 ^ k).wrapping_mul(2_716_044_179);
    }
    h1 = (h3 ^ (h1 >> 18)).wrapping_mul(597_399_067);
    h2 = (h4 ^ (h2 >> 22)).wrapping_mul(2_869_860_233);
    h3 = (h1 ^ (h3 >> 17)).wrapping_mul(951_274_213);
    h4 = (h2 ^ (h4 >> 19)).wrapping_mul(2_716_044_179);
    h1 ^ h2 ^ h3 ^ h4
}

/// First output of a mulberry32 generator seeded with `seed`, in `[0, 1)`.
fn mulberry32(seed: u32) -> f64 {
    let mut t = seed.wrapping_add(0x6d2b_79f5);
    t = (t ^ (t >> 15)).wrapping_mul(t | 1);
    t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
    f64::from(t ^ (t >> 14)) / 4_294_967_296.0
}

/// `revalidate-<n>` with `n` in `0..max_concurrency`.
pub fn message_group_id(path: &str, max_concurrency: u32) -> String {
    let n = (mulberry32(cyrb128(path)) * f64::from(max_concurrency.max(1))).floor() as u32;
    format!("revalidate-{n}")
}
