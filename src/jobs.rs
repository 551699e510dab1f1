use super::*;

/// The jobs miners may currently reference.
#[derive(Debug, Default)]
pub(crate) struct Jobs {
    current: Option<Arc<Job>>,
    valid: HashMap<JobId, Arc<Job>>,
}

impl Jobs {
    pub(crate) fn get(&self, id: JobId) -> Option<Arc<Job>> {
        self.valid.get(&id).cloned()
    }

    pub(crate) fn current(&self) -> Option<&Arc<Job>> {
        self.current.as_ref()
    }

    pub(crate) fn len(&self) -> usize {
        self.valid.len()
    }

    /// Drops every earlier job, so their ids stop resolving.
    pub(crate) fn replace(&mut self, job: Arc<Job>) {
        self.valid.clear();
        self.insert(job);
    }

    pub(crate) fn insert(&mut self, job: Arc<Job>) {
        self.valid.insert(job.job_id, job.clone());
        self.current = Some(job);
    }
}
