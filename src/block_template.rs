use super::*;

/// `getblocktemplate` result, kept close to the daemon's JSON.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct BlockTemplate {
    pub bits: String,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,
    #[serde(rename = "curtime")]
    pub current_time: u64,
    pub height: u64,
    pub version: u32,
    #[serde(default)]
    pub transactions: Vec<TemplateTransaction>,
    #[serde(rename = "coinbasevalue")]
    pub coinbase_value: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_witness_commitment: Option<String>,
    #[serde(default, rename = "coinbaseaux")]
    pub coinbase_aux: CoinbaseAux,
    #[serde(default, rename = "coinbasetxn", skip_serializing_if = "Option::is_none")]
    pub coinbase_txn: Option<CoinbaseTxn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, rename = "auxData", skip_serializing_if = "Option::is_none")]
    pub aux: Option<AuxBlock>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TemplateTransaction {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CoinbaseAux {
    #[serde(default)]
    pub flags: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CoinbaseTxn {
    #[serde(default)]
    pub data: String,
}

/// `getauxblock` result of a merge-mined chain.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AuxBlock {
    pub hash: String,
    #[serde(default, rename = "chainid")]
    pub chain_id: u64,
    #[serde(default)]
    pub height: u64,
    #[serde(default, rename = "coinbasevalue")]
    pub coinbase_value: u64,
    #[serde(default, alias = "_target")]
    pub target: String,
}

impl BlockTemplate {
    /// Generation transaction version, taken from `coinbasetxn` when the
    /// daemon supplies one.
    pub(crate) fn coinbase_version(&self) -> Result<u32> {
        let Some(txn) = self.coinbase_txn.as_ref().filter(|txn| txn.data.len() >= 8) else {
            return Ok(4);
        };

        let bytes = hex::decode(&txn.data[..8])
            .with_context(|| format!("invalid coinbasetxn data `{}`", txn.data))?;

        Ok(LittleEndian::read_u32(&bytes))
    }

    pub(crate) fn target(&self) -> Result<U256> {
        match &self.target {
            Some(target) => {
                let bytes =
                    hex::decode(target).with_context(|| format!("invalid target `{target}`"))?;
                ensure!(bytes.len() <= 32, "target `{target}` longer than 32 bytes");
                Ok(U256::from_big_endian(&bytes))
            }
            None => target_from_bits(&self.bits),
        }
    }
}

impl TemplateTransaction {
    /// Txid in internal byte order, falling back to `hash` when the daemon
    /// leaves out `txid`.
    pub(crate) fn merkle_leaf(&self) -> Result<[u8; 32]> {
        let id = self
            .txid
            .as_deref()
            .or(self.hash.as_deref())
            .context("template transaction has neither txid nor hash")?;

        uint256_from_hash(id)
    }
}

impl AuxBlock {
    /// The aux daemon hands out its target as little-endian hex.
    pub(crate) fn target(&self) -> Result<U256> {
        let bytes = hex::decode(&self.target)
            .with_context(|| format!("invalid aux target `{}`", self.target))?;
        ensure!(bytes.len() <= 32, "aux target `{}` longer than 32 bytes", self.target);
        Ok(U256::from_little_endian(&bytes))
    }
}
