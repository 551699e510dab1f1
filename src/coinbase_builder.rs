use super::*;

/// A fee output taking `percentage` of the block reward.
#[derive(Clone, Debug, PartialEq)]
pub struct Recipient {
    pub script: Vec<u8>,
    pub percentage: f64,
}

/// Where the generation transaction pays to, resolved once at startup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payout {
    pub pool_script: Vec<u8>,
    pub recipients: Vec<Recipient>,
    /// Merge-mining magic, present when auxiliary mining is enabled.
    pub aux_header: Option<Vec<u8>>,
    /// Pool signature appended to the coinbase flags.
    pub tag: Vec<u8>,
}

#[derive(Clone, Debug)]
pub(crate) struct CoinbaseBuilder {
    aux_commitment: Option<Vec<u8>>,
    flags: Vec<u8>,
    height: u64,
    placeholder_size: usize,
    pool_script: Vec<u8>,
    recipients: Vec<Recipient>,
    timestamp: Option<u64>,
    value: u64,
    version: u32,
    witness_commitment: Option<Vec<u8>>,
}

impl CoinbaseBuilder {
    const MAX_COINBASE_SCRIPT_SIG_SIZE: usize = 100;

    pub(crate) fn new(pool_script: Vec<u8>, height: u64, value: u64) -> Self {
        Self {
            aux_commitment: None,
            flags: Vec::new(),
            height,
            placeholder_size: EXTRANONCE_PLACEHOLDER_SIZE,
            pool_script,
            recipients: Vec::new(),
            timestamp: None,
            value,
            version: 4,
            witness_commitment: None,
        }
    }

    /// Builder for `template` paying out according to `payout`.
    pub(crate) fn from_template(payout: &Payout, template: &BlockTemplate) -> Result<Self> {
        let mut builder = Self::new(
            payout.pool_script.clone(),
            template.height,
            template.coinbase_value,
        )
        .with_version(template.coinbase_version()?)
        .with_recipients(payout.recipients.clone())
        .with_flags({
            let mut flags = hex::decode(&template.coinbase_aux.flags)
                .context("invalid coinbaseaux flags")?;
            flags.extend_from_slice(&payout.tag);
            flags
        });

        if let Some(commitment) = &template.default_witness_commitment {
            builder = builder.with_witness_commitment(
                hex::decode(commitment).context("invalid default_witness_commitment")?,
            );
        }

        if let (Some(header), Some(aux)) = (&payout.aux_header, &template.aux) {
            builder = builder.with_aux_commitment(
                header,
                &hex::decode(&aux.hash).context("invalid aux block hash")?,
            );
        }

        Ok(builder)
    }

    pub(crate) fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn with_recipients(mut self, recipients: Vec<Recipient>) -> Self {
        self.recipients = recipients;
        self
    }

    pub(crate) fn with_flags(mut self, flags: Vec<u8>) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn with_witness_commitment(mut self, commitment: Vec<u8>) -> Self {
        self.witness_commitment = Some(commitment);
        self
    }

    /// `header ‖ aux block hash ‖ merkle size 1 ‖ merkle nonce 0`.
    pub(crate) fn with_aux_commitment(mut self, header: &[u8], aux_hash: &[u8]) -> Self {
        let mut commitment = header.to_vec();
        commitment.extend_from_slice(aux_hash);
        commitment.extend_from_slice(&1u32.to_le_bytes());
        commitment.extend_from_slice(&0u32.to_le_bytes());
        self.aux_commitment = Some(commitment);
        self
    }

    pub(crate) fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Splits the generation transaction around the extranonce placeholder,
    /// returning the bytes before and after it.
    pub(crate) fn build(self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut script = serialize_number(self.height);
        script.extend_from_slice(&self.flags);
        script.extend(serialize_number(self.timestamp.unwrap_or_else(unix_now)));
        script.push(u8::try_from(self.placeholder_size).context("placeholder too large")?);

        if let Some(commitment) = &self.aux_commitment {
            script.extend_from_slice(commitment);
        }

        let script_prefix_size = script.len();

        script.resize(script_prefix_size + self.placeholder_size, 0);

        ensure!(
            script.len() <= Self::MAX_COINBASE_SCRIPT_SIG_SIZE,
            "Script sig too large is {} bytes (max {})",
            script.len(),
            Self::MAX_COINBASE_SCRIPT_SIG_SIZE
        );

        let script_sig_size = script.len();

        let mut recipient_outputs = Vec::with_capacity(self.recipients.len());
        let mut recipient_total = 0u64;

        for recipient in &self.recipients {
            let reward = (recipient.percentage * self.value as f64).floor() as u64;
            recipient_total += reward;
            recipient_outputs.push(TxOut {
                value: Amount::from_sat(reward),
                script_pubkey: ScriptBuf::from_bytes(recipient.script.clone()),
            });
        }

        let pool_reward = self.value.checked_sub(recipient_total).with_context(|| {
            format!(
                "recipient rewards {recipient_total} exceed coinbase value {}",
                self.value
            )
        })?;

        let mut output = vec![TxOut {
            value: Amount::from_sat(pool_reward),
            script_pubkey: ScriptBuf::from_bytes(self.pool_script),
        }];

        output.extend(recipient_outputs);

        if let Some(commitment) = self.witness_commitment {
            output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: ScriptBuf::from_bytes(commitment),
            });
        }

        let coinbase = Transaction {
            version: transaction::Version(self.version as i32),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(script),
                sequence: Sequence::ZERO,
                witness: Witness::new(),
            }],
            output,
        };

        // version, input count, outpoint, script length, script before the placeholder
        let offset = 4 + 1 + 36 + var_int(script_sig_size as u64).len() + script_prefix_size;

        let bin = consensus::serialize(&coinbase);

        Ok((
            bin[..offset].to_vec(),
            bin[offset + self.placeholder_size..].to_vec(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_script() -> Vec<u8> {
        hex::decode("0014e8df018c7e326cc253faac7e46cdc51e68542c42").unwrap()
    }

    fn witness_commitment() -> Vec<u8> {
        hex::decode(
            "6a24aa21a9ede2f61c3f71d1defd3fa999dfa36953755c690689799962b48bebd836974e8cf9",
        )
        .unwrap()
    }

    #[test]
    fn generation_parts() {
        let (coinb1, coinb2) = CoinbaseBuilder::new(pool_script(), 1, 5_000_000_000)
            .with_witness_commitment(witness_commitment())
            .with_timestamp(1_614_202_191)
            .build()
            .unwrap();

        pretty_assert_eq!(
            hex::encode(coinb1),
            "04000000010000000000000000000000000000000000000000000000000000000000000000ffffffff0f51044fc5366008"
        );

        pretty_assert_eq!(
            hex::encode(coinb2),
            "000000000200f2052a01000000160014e8df018c7e326cc253faac7e46cdc51e68542c420000000000000000266a24aa21a9ede2f61c3f71d1defd3fa999dfa36953755c690689799962b48bebd836974e8cf900000000"
        );
    }

    #[test]
    fn split_reassembles_into_transaction() {
        let recipient = Recipient {
            script: hex::decode("76a91477bff20c60e522dfaa3350c39b030a5d004e839a88ac").unwrap(),
            percentage: 0.015,
        };

        let (coinb1, coinb2) = CoinbaseBuilder::new(pool_script(), 500_000, 1_250_000_000)
            .with_recipients(vec![recipient.clone()])
            .with_flags(vec![0xaa, 0xbb])
            .with_witness_commitment(witness_commitment())
            .with_timestamp(1_614_202_191)
            .build()
            .unwrap();

        let mut full = coinb1.clone();
        full.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        full.extend_from_slice(&coinb2);

        let tx = consensus::deserialize::<Transaction>(&full).unwrap();

        assert_eq!(tx.version, transaction::Version(4));
        assert_eq!(tx.input[0].sequence, Sequence::ZERO);
        assert_eq!(tx.output.len(), 3);
        assert_eq!(tx.output[1].value, Amount::from_sat(18_750_000));
        assert_eq!(tx.output[1].script_pubkey.as_bytes(), recipient.script);
        assert_eq!(
            tx.output[0].value,
            Amount::from_sat(1_250_000_000 - 18_750_000)
        );
        assert_eq!(tx.output[2].value, Amount::ZERO);
        assert!(tx.input[0].script_sig.as_bytes().ends_with(&[1, 2, 3, 4, 5, 6, 7, 8]));
    }

    #[test]
    fn recipient_rewards_are_floored() {
        let recipient = Recipient {
            script: pool_script(),
            percentage: 0.333,
        };

        let (coinb1, coinb2) = CoinbaseBuilder::new(pool_script(), 1, 1000)
            .with_recipients(vec![recipient.clone(), recipient])
            .with_timestamp(1)
            .build()
            .unwrap();

        let mut full = coinb1;
        full.extend_from_slice(&[0; 8]);
        full.extend_from_slice(&coinb2);

        let tx = consensus::deserialize::<Transaction>(&full).unwrap();

        assert_eq!(tx.output[0].value, Amount::from_sat(334));
        assert_eq!(tx.output[1].value, Amount::from_sat(333));
        assert_eq!(tx.output[2].value, Amount::from_sat(333));
    }

    #[test]
    fn aux_commitment_follows_placeholder_length() {
        let (coinb1, _) = CoinbaseBuilder::new(pool_script(), 1, 1000)
            .with_aux_commitment(&[0xfa, 0xbe, 0x6d, 0x6d], &[0x11; 32])
            .with_timestamp(1_614_202_191)
            .build()
            .unwrap();

        let mut expected = hex::decode("51044fc5366008fabe6d6d").unwrap();
        expected.extend_from_slice(&[0x11; 32]);
        expected.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);

        assert!(coinb1.ends_with(&expected));
        assert_eq!(coinb1[41], (expected.len() + 8) as u8);
    }

    #[test]
    fn coinbase_version_override() {
        let (coinb1, _) = CoinbaseBuilder::new(pool_script(), 1, 1000)
            .with_version(1)
            .build()
            .unwrap();

        assert_eq!(&coinb1[..4], &[1, 0, 0, 0]);
    }

    #[test]
    fn exceed_script_size_limit() {
        let result = CoinbaseBuilder::new(pool_script(), 1, 1000)
            .with_flags(vec![0; 90])
            .build();

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Script sig too large")
        );
    }

    #[test]
    fn overpaying_recipients_is_an_error() {
        let recipient = Recipient {
            script: pool_script(),
            percentage: 1.5,
        };

        assert!(
            CoinbaseBuilder::new(pool_script(), 1, 1000)
                .with_recipients(vec![recipient])
                .build()
                .is_err()
        );
    }

    #[test]
    fn tag_follows_template_flags() {
        let template = BlockTemplate {
            height: 1,
            coinbase_value: 1000,
            coinbase_aux: CoinbaseAux {
                flags: "aabb".into(),
            },
            ..Default::default()
        };

        let payout = Payout {
            pool_script: pool_script(),
            tag: b"/pool/".to_vec(),
            ..Default::default()
        };

        let (coinb1, _) = CoinbaseBuilder::from_template(&payout, &template)
            .unwrap()
            .with_timestamp(1_614_202_191)
            .build()
            .unwrap();

        let mut expected = vec![0x51, 0xaa, 0xbb];
        expected.extend_from_slice(b"/pool/");
        expected.extend_from_slice(&hex::decode("044fc5366008").unwrap());

        assert!(coinb1.ends_with(&expected));
    }
}
