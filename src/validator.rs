use super::*;

/// Owns the working job set and turns submissions into verdicts.
#[derive(Debug)]
pub struct Validator {
    clock: fn() -> u64,
    events: EventSender,
    extranonces: Extranonces,
    identifier: String,
    job_counter: Mutex<JobId>,
    jobs: RwLock<Jobs>,
    payout: Payout,
}

impl Validator {
    pub fn new(
        payout: Payout,
        extranonces: Extranonces,
        identifier: String,
        events: EventSender,
    ) -> Self {
        Self {
            clock: unix_now,
            events,
            extranonces,
            identifier,
            job_counter: Mutex::new(JobId::default()),
            jobs: RwLock::new(Jobs::default()),
            payout,
        }
    }

    /// Replaces the wall clock used for coinbase timestamps and the ntime
    /// bound.
    #[cfg(test)]
    pub(crate) fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn extranonces(&self) -> &Extranonces {
        &self.extranonces
    }

    pub(crate) fn current_job(&self) -> Option<Arc<Job>> {
        self.jobs.read().current().cloned()
    }

    fn next_job_id(&self) -> JobId {
        let mut counter = self.job_counter.lock();
        *counter = counter.next();
        *counter
    }

    /// Installs `template` as a new job when it starts a new block, or when
    /// `force` is set. Returns whether a job was built; the caller broadcasts
    /// it with `clean_jobs` set.
    pub fn handle_template(&self, template: BlockTemplate, force: bool) -> Result<bool> {
        let new_block = match self.jobs.read().current() {
            None => true,
            Some(current) => {
                template.height >= current.template.height
                    && (template.previous_block_hash != current.template.previous_block_hash
                        || template.bits != current.template.bits)
            }
        };

        if !new_block && !force {
            return Ok(false);
        }

        let job = self.build_job(template)?;

        self.publish(&job, true);

        self.jobs.write().replace(job);

        Ok(true)
    }

    /// Adds a job built from `template` on top of the working set without
    /// invalidating earlier ones.
    pub fn handle_updates(&self, template: BlockTemplate) -> Result {
        let job = self.build_job(template)?;

        self.publish(&job, false);

        let mut jobs = self.jobs.write();
        jobs.insert(job);
        debug!("Working set holds {} jobs", jobs.len());

        Ok(())
    }

    fn build_job(&self, template: BlockTemplate) -> Result<Arc<Job>> {
        Ok(Arc::new(Job::new(
            self.next_job_id(),
            &self.payout,
            template,
            (self.clock)(),
        )?))
    }

    fn publish(&self, job: &Job, clean: bool) {
        self.events.send(Event::NewJob(NewJobEvent {
            job: job.job_id.to_string(),
            height: job.template.height,
            difficulty: job.difficulty,
            clean,
        }));
    }

    /// Validates a submission, publishing a share event either way.
    pub(crate) fn handle_share(&self, request: &ShareRequest) -> Result<Verdict, StratumError> {
        let result = self.validate(request);

        let event = |difficulty: f64, result: ShareResult| {
            Event::Share(ShareEvent {
                job: request.job_id.clone(),
                ip: request.ip,
                port: request.port,
                addr_primary: request.addr_primary.clone(),
                addr_auxiliary: request.addr_auxiliary.clone(),
                difficulty,
                identifier: self.identifier.clone(),
                result,
            })
        };

        match &result {
            Ok(verdict) => {
                if verdict.share.block_type == BlockType::Primary {
                    self.events.candidate(verdict.share.clone());
                }

                if let Some(auxiliary) = &verdict.auxiliary {
                    self.events.candidate(auxiliary.clone());
                }

                self.events.send(event(
                    verdict.difficulty,
                    ShareResult::Valid(verdict.share.clone()),
                ));

                if let Some(auxiliary) = &verdict.auxiliary {
                    self.events.send(event(
                        verdict.difficulty,
                        ShareResult::Valid(auxiliary.clone()),
                    ));
                }
            }
            Err(err) => self.events.send(event(
                request.difficulty,
                ShareResult::Invalid {
                    error: err.to_string(),
                },
            )),
        }

        result
    }

    fn validate(&self, request: &ShareRequest) -> Result<Verdict, StratumError> {
        let submission = &request.submission;

        let job = request
            .job_id
            .parse::<JobId>()
            .ok()
            .filter(|id| id.to_string() == request.job_id)
            .and_then(|id| self.jobs.read().get(id))
            .ok_or(StratumError::JobNotFound)?;

        let extranonce2 = hex::decode(&submission.extranonce2)
            .ok()
            .filter(|bytes| bytes.len() == self.extranonces.extranonce2_size())
            .ok_or(StratumError::IncorrectExtranonce2Size)?;

        if submission.ntime.len() != 8 {
            return Err(StratumError::IncorrectNtimeSize);
        }

        let ntime = u32::from_str_radix(&submission.ntime, 16)
            .ok()
            .filter(|ntime| {
                u64::from(*ntime) >= job.template.current_time
                    && u64::from(*ntime) <= (self.clock)() + MAX_NTIME_OFFSET
            })
            .ok_or(StratumError::NtimeOutOfRange)?;

        let nonce = hex::decode(&submission.nonce)
            .ok()
            .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
            .filter(|_| submission.nonce.len() == 8)
            .ok_or(StratumError::IncorrectNonceSize)?;

        if request
            .addr_primary
            .as_deref()
            .is_none_or(|address| address.is_empty())
        {
            return Err(StratumError::WorkerAddressUnset);
        }

        if !job.handle_submissions(&[
            &submission.extranonce1.to_hex(),
            &submission.extranonce2,
            &submission.ntime,
            &submission.nonce,
        ]) {
            return Err(StratumError::DuplicateShare);
        }

        let mut version = Version(job.template.version);

        if let (true, Some(version_bits)) = (submission.asicboost, &submission.version_bits) {
            let bits = version_bits
                .parse::<Version>()
                .map_err(|_| StratumError::InvalidVersionBit)?;

            let mask = submission.version_mask;

            if bits & !mask != Version(0) {
                return Err(StratumError::InvalidVersionBit);
            }

            version = (version & !mask) | (bits & mask);
        }

        let coinbase = job.handle_coinbase(submission.extranonce1.as_bytes(), &extranonce2);
        let merkle_root = merkle_root_from_steps(sha256d(&coinbase), &job.merkle_steps);
        let header = job.handle_header(version.0, &merkle_root, ntime.to_be_bytes(), nonce);
        let header_hash = sha256d(&header);
        let header_int = U256::from_little_endian(&header_hash);

        let share_diff = DIFFICULTY_1 / u256_to_f64(header_int);

        let mut difficulty = request.difficulty;

        let block_type = if job.target >= header_int {
            BlockType::Primary
        } else {
            if share_diff / difficulty < 0.99 {
                match request.previous_difficulty {
                    Some(previous) if previous > 0.0 && share_diff >= previous => {
                        difficulty = previous;
                    }
                    _ => {
                        return Err(StratumError::LowDifficultyShare {
                            share_difficulty: share_diff,
                        });
                    }
                }
            }
            BlockType::Share
        };

        let mut block_hash = header_hash;
        block_hash.reverse();

        let block_diff_auxiliary = job
            .aux_target()
            .filter(|target| !target.is_zero())
            .map(|target| DIFFICULTY_1 / u256_to_f64(target));

        let share = Accepted {
            block_type,
            block_diff_primary: job.difficulty,
            block_diff_auxiliary,
            coinbase: hex::encode(&coinbase),
            hash: hex::encode(block_hash),
            hex: hex::encode(job.handle_blocks(&header, &coinbase)),
            header: hex::encode(header_hash),
            header_diff: header_int.to_string(),
            height: job.template.height,
            reward: job.template.coinbase_value,
            share_diff: round_to(share_diff, 8),
            aux_hash: None,
            aux_pow: None,
        };

        let auxiliary = match (job.aux_target(), &job.template.aux) {
            (Some(aux_target), Some(aux)) if aux_target >= header_int => Some(Accepted {
                block_type: BlockType::Auxiliary,
                height: aux.height,
                reward: aux.coinbase_value,
                aux_hash: Some(aux.hash.clone()),
                aux_pow: Some(hex::encode(aux_pow(
                    &job,
                    aux.chain_id,
                    &coinbase,
                    &header_hash,
                    &header,
                ))),
                ..share.clone()
            }),
            _ => None,
        };

        Ok(Verdict {
            difficulty,
            share,
            auxiliary,
        })
    }
}

/// Proof that the parent block commits to the aux chain: the coinbase, its
/// merkle branch to the parent header, an empty aux branch and the header.
fn aux_pow(
    job: &Job,
    chain_id: u64,
    coinbase: &[u8],
    header_hash: &[u8; 32],
    header: &[u8; 80],
) -> Vec<u8> {
    let mut aux_pow = coinbase.to_vec();
    aux_pow.extend_from_slice(header_hash);

    aux_pow.extend(var_int(job.merkle_steps.len() as u64));
    for step in &job.merkle_steps {
        aux_pow.extend_from_slice(step);
    }

    let mut index = [0u8; 4];
    LittleEndian::write_i32(&mut index, 0);
    aux_pow.extend_from_slice(&index);

    aux_pow.extend(var_int(0));
    LittleEndian::write_i32(&mut index, aux_merkle_position(chain_id, 1) as i32);
    aux_pow.extend_from_slice(&index);

    aux_pow.extend_from_slice(header);
    aux_pow
}
