use super::*;

#[derive(Debug)]
struct Window {
    intervals: VecDeque<f64>,
    last_retarget: Instant,
    last_sample: Instant,
}

/// Variable difficulty regulator for one listening port. Each session keeps a
/// bounded window of seconds between its shares; once a retarget period has
/// passed the mean interval decides whether to propose a new difficulty.
#[derive(Debug)]
pub(crate) struct Vardiff {
    capacity: usize,
    settings: DifficultySettings,
    windows: DashMap<SessionId, Window>,
}

impl Vardiff {
    pub(crate) fn new(settings: DifficultySettings) -> Self {
        Self {
            capacity: ((settings.retarget_time / settings.target_time) * 4.0).max(1.0) as usize,
            settings,
            windows: DashMap::new(),
        }
    }

    /// Records a share from `session` at `now`, returning a proposed
    /// difficulty when a retarget is due and the rate is out of bounds.
    pub(crate) fn record(&self, session: SessionId, difficulty: f64, now: Instant) -> Option<f64> {
        let retarget = Duration::from_secs_f64(self.settings.retarget_time);

        let mut window = match self.windows.entry(session) {
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Window {
                    intervals: VecDeque::with_capacity(self.capacity),
                    last_retarget: now.checked_sub(retarget / 2).unwrap_or(now),
                    last_sample: now,
                });
                return None;
            }
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.into_ref(),
        };

        if window.intervals.len() >= self.capacity {
            window.intervals.pop_front();
        }

        let interval = now.saturating_duration_since(window.last_sample);
        window.intervals.push_back(interval.as_secs_f64());
        window.last_sample = now;

        if now.saturating_duration_since(window.last_retarget) < retarget {
            return None;
        }

        window.last_retarget = now;

        self.propose(&window.intervals, difficulty)
    }

    fn propose(&self, intervals: &VecDeque<f64>, difficulty: f64) -> Option<f64> {
        if intervals.is_empty() {
            return None;
        }

        let DifficultySettings {
            minimum,
            maximum,
            target_time,
            variance,
            ..
        } = self.settings;

        let average = intervals.iter().sum::<f64>() / intervals.len() as f64;

        let mut factor = target_time / average;

        if average > target_time * (1.0 + variance) && difficulty > minimum {
            if factor * difficulty < minimum {
                factor = minimum / difficulty;
            }
        } else if average < target_time * (1.0 - variance) && difficulty < maximum {
            if factor * difficulty > maximum {
                factor = maximum / difficulty;
            }
        } else {
            return None;
        }

        Some(round_to(difficulty * factor, 8))
    }

    pub(crate) fn remove(&self, session: SessionId) {
        self.windows.remove(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DifficultySettings {
        DifficultySettings {
            initial: 32.0,
            minimum: 8.0,
            maximum: 512.0,
            target_time: 15.0,
            retarget_time: 90.0,
            variance: 0.3,
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn capacity_follows_retarget_ratio() {
        assert_eq!(Vardiff::new(settings()).capacity, 24);
    }

    #[test]
    fn first_share_only_starts_window() {
        let vardiff = Vardiff::new(settings());
        let session = SessionId::new(1);

        assert_eq!(vardiff.record(session, 32.0, Instant::now()), None);
        assert!(vardiff.windows.get(&session).unwrap().intervals.is_empty());
    }

    #[test]
    fn slow_miner_is_clamped_to_minimum() {
        let vardiff = Vardiff::new(settings());
        let session = SessionId::new(1);
        let start = Instant::now();

        assert_eq!(vardiff.record(session, 32.0, start), None);
        assert_eq!(vardiff.record(session, 32.0, start + secs(575)), Some(8.0));
    }

    #[test]
    fn slow_miner_is_lowered() {
        let vardiff = Vardiff::new(settings());
        let session = SessionId::new(1);
        let start = Instant::now();

        vardiff.record(session, 64.0, start);
        assert_eq!(vardiff.record(session, 64.0, start + secs(30)), None);
        assert_eq!(vardiff.record(session, 64.0, start + secs(60)), Some(32.0));
    }

    #[test]
    fn fast_miner_is_raised_and_clamped() {
        let vardiff = Vardiff::new(settings());
        let session = SessionId::new(1);
        let start = Instant::now();

        vardiff.record(session, 32.0, start);

        let mut proposal = None;
        for i in 1..=45 {
            proposal = vardiff.record(session, 32.0, start + secs(i));
            if proposal.is_some() {
                break;
            }
        }

        assert_eq!(proposal, Some(480.0));

        let vardiff = Vardiff::new(settings());
        vardiff.record(session, 400.0, start);

        let mut proposal = None;
        for i in 1..=45 {
            proposal = vardiff.record(session, 400.0, start + secs(i));
            if proposal.is_some() {
                break;
            }
        }

        assert_eq!(proposal, Some(512.0));
    }

    #[test]
    fn steady_miner_keeps_difficulty() {
        let vardiff = Vardiff::new(settings());
        let session = SessionId::new(1);
        let start = Instant::now();

        vardiff.record(session, 32.0, start);

        for i in 1..=10 {
            assert_eq!(vardiff.record(session, 32.0, start + secs(15 * i)), None);
        }
    }

    #[test]
    fn bounds_stop_adjustment() {
        let vardiff = Vardiff::new(settings());
        let session = SessionId::new(1);
        let start = Instant::now();

        vardiff.record(session, 8.0, start);
        assert_eq!(vardiff.record(session, 8.0, start + secs(600)), None);

        let session = SessionId::new(2);
        vardiff.record(session, 512.0, start);
        for i in 1..=60 {
            assert_eq!(vardiff.record(session, 512.0, start + secs(i)), None);
        }
    }

    #[test]
    fn window_is_bounded() {
        let vardiff = Vardiff::new(settings());
        let session = SessionId::new(1);
        let start = Instant::now();

        vardiff.record(session, 32.0, start);
        for i in 1..=100 {
            vardiff.record(session, 512.0, start + Duration::from_millis(100 * i));
        }

        assert!(vardiff.windows.get(&session).unwrap().intervals.len() <= 24);
    }

    #[test]
    fn sessions_are_independent() {
        let vardiff = Vardiff::new(settings());
        let start = Instant::now();

        vardiff.record(SessionId::new(1), 32.0, start);
        assert_eq!(vardiff.record(SessionId::new(2), 32.0, start + secs(575)), None);
        assert_eq!(
            vardiff.record(SessionId::new(1), 32.0, start + secs(575)),
            Some(8.0)
        );
    }

    #[test]
    fn remove_forgets_window() {
        let vardiff = Vardiff::new(settings());
        let session = SessionId::new(1);
        let start = Instant::now();

        vardiff.record(session, 32.0, start);
        vardiff.record(session, 32.0, start + secs(1));
        assert_eq!(vardiff.windows.get(&session).unwrap().intervals.len(), 1);

        vardiff.remove(session);
        assert!(vardiff.windows.get(&session).is_none());
    }
}
