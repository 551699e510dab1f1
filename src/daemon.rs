use {
    super::{AuxBlock, BlockTemplate, DaemonSettings, Deserialize, Serialize, debug},
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    snafu::{ResultExt, Snafu},
    std::sync::atomic::{AtomicU64, Ordering},
};

/// Returned by `getblocktemplate` while the node is still syncing.
pub(crate) const RPC_IN_INITIAL_DOWNLOAD: i64 = -10;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DaemonError {
    #[snafu(display("request `{method}` failed: {source}"))]
    Transport {
        method: String,
        source: reqwest::Error,
    },

    #[snafu(display("`{method}` returned error {code}: {message}"))]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[snafu(display("failed to decode `{method}` response: {source}"))]
    Decode {
        method: String,
        source: serde_json::Error,
    },

    #[snafu(display("`{method}` returned no result"))]
    MissingResult { method: String },
}

impl DaemonError {
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct BlockchainInfo {
    pub(crate) chain: String,
    pub(crate) blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub(crate) best_block_hash: String,
    pub(crate) difficulty: f64,
    #[serde(default, rename = "verificationprogress")]
    pub(crate) verification_progress: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct MiningInfo {
    pub(crate) blocks: u64,
    pub(crate) difficulty: f64,
    #[serde(default, rename = "networkhashps")]
    pub(crate) network_hash_ps: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct BlockInfo {
    pub(crate) hash: String,
    pub(crate) confirmations: i64,
    #[serde(default)]
    pub(crate) tx: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AddressValidation {
    #[serde(rename = "isvalid")]
    is_valid: bool,
}

/// JSON-RPC 1.0 client for a bitcoind style node.
#[derive(Debug)]
pub(crate) struct Daemon {
    client: reqwest::Client,
    id: AtomicU64,
    password: String,
    url: String,
    username: String,
}

impl Daemon {
    pub(crate) fn new(settings: &DaemonSettings) -> anyhow::Result<Self> {
        use anyhow::Context;

        Ok(Self {
            client: Context::context(
                reqwest::Client::builder()
                    .timeout(settings.timeout())
                    .build(),
                "failed to create daemon HTTP client",
            )?,
            id: AtomicU64::new(0),
            password: settings.password.clone(),
            url: settings.url.clone(),
            username: settings.username.clone(),
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, DaemonError> {
        let id = self.id.fetch_add(1, Ordering::Relaxed);

        debug!("Daemon request {id} `{method}`");

        let mut request = self.client.post(&self.url).json(&json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        }));

        if !self.username.is_empty() || !self.password.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        // Errors arrive with a non-200 status and a JSON body.
        let body = request
            .send()
            .await
            .context(TransportSnafu { method })?
            .bytes()
            .await
            .context(TransportSnafu { method })?;

        let response =
            serde_json::from_slice::<RpcResponse>(&body).context(DecodeSnafu { method })?;

        if let Some(error) = response.error {
            return RpcSnafu {
                method,
                code: error.code,
                message: error.message,
            }
            .fail();
        }

        Ok(response.result)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, DaemonError> {
        let result = self.request(method, params).await?;

        if result.is_null() {
            return MissingResultSnafu { method }.fail();
        }

        serde_json::from_value(result).context(DecodeSnafu { method })
    }

    pub(crate) async fn get_block_template(&self) -> Result<BlockTemplate, DaemonError> {
        self.call(
            "getblocktemplate",
            json!([{
                "capabilities": ["coinbasetxn", "workid", "coinbase/append"],
                "rules": ["segwit"],
            }]),
        )
        .await
    }

    pub(crate) async fn get_blockchain_info(&self) -> Result<BlockchainInfo, DaemonError> {
        self.call("getblockchaininfo", json!([])).await
    }

    pub(crate) async fn get_mining_info(&self) -> Result<MiningInfo, DaemonError> {
        self.call("getmininginfo", json!([])).await
    }

    pub(crate) async fn validate_address(&self, address: &str) -> Result<bool, DaemonError> {
        Ok(self
            .call::<AddressValidation>("validateaddress", json!([address]))
            .await?
            .is_valid)
    }

    /// Submits a solved block. `None` means the node accepted it, otherwise
    /// the rejection reason is returned.
    pub(crate) async fn submit_block(&self, hex: &str) -> Result<Option<String>, DaemonError> {
        let method = "submitblock";

        match self.request(method, json!([hex])).await? {
            Value::Null => Ok(None),
            Value::String(reason) => Ok(Some(reason)),
            other => Ok(Some(other.to_string())),
        }
    }

    pub(crate) async fn get_block(&self, hash: &str) -> Result<BlockInfo, DaemonError> {
        self.call("getblock", json!([hash])).await
    }

    pub(crate) async fn get_aux_block(&self) -> Result<AuxBlock, DaemonError> {
        self.call("getauxblock", json!([])).await
    }

    pub(crate) async fn submit_aux_block(
        &self,
        hash: &str,
        aux_pow: &str,
    ) -> Result<bool, DaemonError> {
        self.call("getauxblock", json!([hash, aux_pow])).await
    }
}
