use super::*;

/// One unit of work handed to miners, immutable apart from the record of
/// submissions already seen for it.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) job_id: JobId,
    pub(crate) template: BlockTemplate,
    pub(crate) target: U256,
    pub(crate) difficulty: f64,
    pub(crate) merkle_steps: Vec<[u8; 32]>,
    aux_target: Option<U256>,
    bits: [u8; 4],
    coinb1: Vec<u8>,
    coinb2: Vec<u8>,
    prevhash: [u8; 32],
    submissions: Mutex<HashSet<String>>,
    transactions: Vec<u8>,
}

impl Job {
    /// Builds the job for `template`, stamping the coinbase with `timestamp`.
    pub(crate) fn new(
        job_id: JobId,
        payout: &Payout,
        template: BlockTemplate,
        timestamp: u64,
    ) -> Result<Self> {
        Self::with_builder(
            job_id,
            CoinbaseBuilder::from_template(payout, &template)?.with_timestamp(timestamp),
            template,
        )
    }

    pub(crate) fn with_builder(
        job_id: JobId,
        builder: CoinbaseBuilder,
        template: BlockTemplate,
    ) -> Result<Self> {
        let target = template.target()?;

        ensure!(!target.is_zero(), "template target is zero");

        let difficulty = difficulty_from_target(target);

        let bits = <[u8; 4]>::try_from(
            hex::decode(&template.bits)
                .with_context(|| format!("invalid bits `{}`", template.bits))?
                .as_slice(),
        )
        .with_context(|| format!("bits `{}` must be 4 bytes", template.bits))?;

        let prevhash = <[u8; 32]>::try_from(
            hex::decode(&template.previous_block_hash)
                .context("invalid previousblockhash")?
                .as_slice(),
        )
        .context("previousblockhash must be 32 bytes")?;

        u32::try_from(template.current_time).context("curtime does not fit in 32 bits")?;

        let (coinb1, coinb2) = builder.build()?;

        let leaves = template
            .transactions
            .iter()
            .map(TemplateTransaction::merkle_leaf)
            .collect::<Result<Vec<_>>>()?;

        let mut transactions = Vec::new();
        for tx in &template.transactions {
            transactions.extend(hex::decode(&tx.data).context("invalid transaction data")?);
        }

        let aux_target = template.aux.as_ref().map(AuxBlock::target).transpose()?;

        Ok(Self {
            job_id,
            target,
            difficulty,
            merkle_steps: merkle_steps(&leaves),
            aux_target,
            bits,
            coinb1,
            coinb2,
            prevhash,
            submissions: Mutex::new(HashSet::new()),
            transactions,
            template,
        })
    }

    pub(crate) fn aux_target(&self) -> Option<U256> {
        self.aux_target
    }

    /// The 80 byte header in wire order.
    pub(crate) fn handle_header(
        &self,
        version: u32,
        merkle_root: &[u8; 32],
        ntime: [u8; 4],
        nonce: [u8; 4],
    ) -> [u8; 80] {
        let mut header = [0u8; 80];

        header[..4].copy_from_slice(&nonce);
        header[4..8].copy_from_slice(&self.bits);
        header[8..12].copy_from_slice(&ntime);

        let mut root = *merkle_root;
        root.reverse();
        header[12..44].copy_from_slice(&root);

        header[44..76].copy_from_slice(&self.prevhash);
        BigEndian::write_u32(&mut header[76..], version);

        header.reverse();
        header
    }

    pub(crate) fn handle_coinbase(&self, extranonce1: &[u8], extranonce2: &[u8]) -> Vec<u8> {
        let mut coinbase = Vec::with_capacity(
            self.coinb1.len() + extranonce1.len() + extranonce2.len() + self.coinb2.len(),
        );
        coinbase.extend_from_slice(&self.coinb1);
        coinbase.extend_from_slice(extranonce1);
        coinbase.extend_from_slice(extranonce2);
        coinbase.extend_from_slice(&self.coinb2);
        coinbase
    }

    pub(crate) fn handle_blocks(&self, header: &[u8], coinbase: &[u8]) -> Vec<u8> {
        let mut block = header.to_vec();
        block.extend(var_int(self.template.transactions.len() as u64 + 1));
        block.extend_from_slice(coinbase);
        block.extend_from_slice(&self.transactions);
        block
    }

    pub(crate) fn handle_parameters(&self, clean_jobs: bool) -> Notify {
        Notify {
            job_id: self.job_id,
            prevhash: hex::encode(reverse_byte_order(self.prevhash)),
            coinb1: hex::encode(&self.coinb1),
            coinb2: hex::encode(&self.coinb2),
            merkle_branches: self.merkle_steps.iter().map(hex::encode).collect(),
            version: Version(self.template.version),
            nbits: self.template.bits.clone(),
            ntime: self.template.current_time as u32,
            clean_jobs,
        }
    }

    /// Records a submission fingerprint, returning false when it was already
    /// seen for this job.
    pub(crate) fn handle_submissions(&self, fields: &[&str]) -> bool {
        self.submissions
            .lock()
            .insert(fields.concat().to_lowercase())
    }
}
