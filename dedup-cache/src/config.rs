use crate::cloudflare_kv::DEFAULT_API_URL;
use serde::Deserialize;
use url::Url;

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum DurableStoreConfig {
    Filesystem {
        path: String,
    },
    CloudflareKv {
        account_id: String,
        namespace_id: String,
        api_token: String,
        #[serde(default = "default_kv_api_url")]
        api_url: Url,
    },
}

fn default_kv_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("default KV API url is valid")
}

fn default_durable_timeout_ms() -> u64 {
    2000
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct DedupConfig {
    /// Optional durable tier. Without it dedup is in-process only.
    #[serde(default)]
    pub durable_store: Option<DurableStoreConfig>,
    /// Upper bound for each durable tier call. A timeout counts as the tier
    /// being unavailable.
    #[serde(default = "default_durable_timeout_ms")]
    pub durable_timeout_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            durable_store: None,
            durable_timeout_ms: default_durable_timeout_ms(),
        }
    }
}
