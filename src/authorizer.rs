use {super::*, daemon::Daemon};

/// Outcome of a `mining.authorize` request.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub error: Option<StratumError>,
    pub authorized: bool,
    pub disconnect: bool,
}

impl Authorization {
    pub fn granted() -> Self {
        Self {
            error: None,
            authorized: true,
            disconnect: false,
        }
    }

    pub fn denied() -> Self {
        Self {
            error: None,
            authorized: false,
            disconnect: false,
        }
    }
}

/// Decides whether a worker may submit shares.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        ip: IpAddr,
        port: u16,
        addr_primary: Option<&str>,
        addr_auxiliary: Option<&str>,
        password: Option<&str>,
    ) -> Authorization;
}

/// Accepts workers whose payout addresses the daemons recognise.
pub(crate) struct DaemonAuthorizer {
    primary: Arc<Daemon>,
    auxiliary: Option<Arc<Daemon>>,
}

impl DaemonAuthorizer {
    pub(crate) fn new(primary: Arc<Daemon>, auxiliary: Option<Arc<Daemon>>) -> Self {
        Self { primary, auxiliary }
    }

    async fn check(daemon: &Daemon, address: Option<&str>) -> bool {
        let Some(address) = address
            .and_then(|address| address.split('.').next())
            .filter(|address| !address.is_empty())
        else {
            return false;
        };

        match daemon.validate_address(address).await {
            Ok(valid) => valid,
            Err(err) => {
                warn!("Failed to validate address {address}: {err}");
                false
            }
        }
    }
}

#[async_trait]
impl Authorizer for DaemonAuthorizer {
    async fn authorize(
        &self,
        ip: IpAddr,
        port: u16,
        addr_primary: Option<&str>,
        addr_auxiliary: Option<&str>,
        _password: Option<&str>,
    ) -> Authorization {
        if !Self::check(&self.primary, addr_primary).await {
            debug!("Rejected primary address {addr_primary:?} from {ip}:{port}");
            return Authorization::denied();
        }

        if let Some(auxiliary) = &self.auxiliary
            && !Self::check(auxiliary, addr_auxiliary).await
        {
            debug!("Rejected auxiliary address {addr_auxiliary:?} from {ip}:{port}");
            return Authorization::denied();
        }

        Authorization::granted()
    }
}
