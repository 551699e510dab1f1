use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Consequence {
    #[default]
    None,
    Reset,
    Ban,
}

/// Per-session tally of valid and invalid shares, judged once enough shares
/// have been seen.
#[derive(Debug, Default)]
pub(crate) struct ShareCounter {
    valid: u32,
    invalid: u32,
}

impl ShareCounter {
    pub(crate) fn record(&mut self, valid: bool, settings: &BanSettings) -> Consequence {
        if !settings.enabled {
            return Consequence::None;
        }

        if valid {
            self.valid += 1;
        } else {
            self.invalid += 1;
        }

        let total = self.valid + self.invalid;

        if total < settings.check_threshold {
            return Consequence::None;
        }

        let percent_bad = f64::from(self.invalid) / f64::from(total) * 100.0;

        if percent_bad < settings.invalid_percent {
            *self = Self::default();
            Consequence::Reset
        } else {
            Consequence::Ban
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BanStatus {
    Clear,
    Banned { remaining: Duration },
    Forgiven,
}

/// Banned addresses and when they were banned.
#[derive(Debug)]
pub(crate) struct Bans {
    settings: BanSettings,
    table: DashMap<IpAddr, Instant>,
}

impl Bans {
    pub(crate) fn new(settings: BanSettings) -> Self {
        Self {
            settings,
            table: DashMap::new(),
        }
    }

    pub(crate) fn settings(&self) -> &BanSettings {
        &self.settings
    }

    pub(crate) fn ban(&self, ip: IpAddr, now: Instant) {
        self.table.insert(ip, now);
    }

    /// Checks a connecting address. Expired bans are lifted on the spot.
    pub(crate) fn check(&self, ip: IpAddr, now: Instant) -> BanStatus {
        if !self.settings.enabled {
            return BanStatus::Clear;
        }

        let Some(banned_at) = self.table.get(&ip).map(|entry| *entry) else {
            return BanStatus::Clear;
        };

        let elapsed = now.saturating_duration_since(banned_at);
        let length = self.settings.ban_length();

        if elapsed < length {
            BanStatus::Banned {
                remaining: length - elapsed,
            }
        } else {
            self.table.remove(&ip);
            BanStatus::Forgiven
        }
    }

    /// Drops expired bans, returning how many were removed.
    pub(crate) fn purge(&self, now: Instant) -> usize {
        let length = self.settings.ban_length();
        let before = self.table.len();

        self.table
            .retain(|_, banned_at| now.saturating_duration_since(*banned_at) < length);

        before - self.table.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}
