use super::*;

#[derive(
    Default,
    ValueEnum,
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    #[default]
    #[display("main")]
    Main,
    #[display("test")]
    Test,
    #[display("signet")]
    Signet,
    #[display("regtest")]
    Regtest,
}

impl Chain {
    /// Maps the `chain` field of `getblockchaininfo`.
    pub(crate) fn from_daemon(chain: &str) -> Result<Self> {
        match chain {
            "main" => Ok(Self::Main),
            "test" | "testnet4" => Ok(Self::Test),
            "signet" => Ok(Self::Signet),
            "regtest" => Ok(Self::Regtest),
            other => bail!("daemon reports unknown chain `{other}`"),
        }
    }

    pub(crate) fn network(self) -> Network {
        match self {
            Self::Main => Network::Bitcoin,
            Self::Test => Network::Testnet,
            Self::Signet => Network::Signet,
            Self::Regtest => Network::Regtest,
        }
    }

    pub(crate) fn pubkey_hash(self) -> u16 {
        match self {
            Self::Main => 0x00,
            Self::Test | Self::Signet | Self::Regtest => 0x6f,
        }
    }

    pub(crate) fn script_hash(self) -> u16 {
        match self {
            Self::Main => 0x05,
            Self::Test | Self::Signet | Self::Regtest => 0xc4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_chain_names() {
        assert_eq!(Chain::from_daemon("main").unwrap(), Chain::Main);
        assert_eq!(Chain::from_daemon("test").unwrap(), Chain::Test);
        assert_eq!(Chain::from_daemon("testnet4").unwrap(), Chain::Test);
        assert_eq!(Chain::from_daemon("regtest").unwrap(), Chain::Regtest);
        assert!(Chain::from_daemon("litecoin").is_err());
    }

    #[test]
    fn display_matches_config_spelling() {
        for chain in [Chain::Main, Chain::Test, Chain::Signet, Chain::Regtest] {
            assert_eq!(
                serde_json::to_string(&chain).unwrap(),
                format!("\"{chain}\"")
            );
        }
    }

    #[test]
    fn address_prefixes() {
        assert_eq!(Chain::Main.network(), Network::Bitcoin);
        assert_eq!(Chain::Regtest.network(), Network::Regtest);
        assert_eq!(Chain::Test.pubkey_hash(), 0x6f);
        assert_eq!(Chain::Main.script_hash(), 0x05);
    }
}
