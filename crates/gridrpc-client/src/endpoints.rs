//! Endpoint resolution
//!
//! A logical service may be reachable at a central endpoint, a local one
//! preferred for reads, and any number of replicas. [`Selection`] chooses
//! how those are ordered into a candidate list for one call.

use gridrpc_common::config::{split_service_name, system_section, ConfigStore};
use gridrpc_common::endpoint::parse_endpoint_list;
use gridrpc_common::protocol::{Result, RpcError};
use gridrpc_common::Endpoint;
use rand::seq::SliceRandom;
use rand::Rng;

/// How candidates are chosen for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Exactly this endpoint, typically the one that served an earlier call.
    Pinned(Endpoint),
    /// The local endpoint if configured, then the [`Selection::Failover`] order.
    Read,
    /// The central endpoint, then the replicas in random order.
    Failover,
    /// Only the central endpoint.
    CentralOnly,
}

/// The configured endpoints of one logical service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSet {
    service: String,
    central: Option<Endpoint>,
    local: Option<Endpoint>,
    replicas: Vec<Endpoint>,
}

impl EndpointSet {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn with_central(mut self, endpoint: Endpoint) -> Self {
        self.central = Some(endpoint);
        self
    }

    pub fn with_local(mut self, endpoint: Endpoint) -> Self {
        self.local = Some(endpoint);
        self
    }

    pub fn with_replicas(mut self, replicas: Vec<Endpoint>) -> Self {
        self.replicas = replicas;
        self
    }

    /// Reads `/Systems/<System>/URLs/<Service>/{Central,Local,Replicas}`.
    ///
    /// Missing options leave that part of the set empty; a malformed URL is
    /// an error.
    pub fn from_config(store: &dyn ConfigStore, service: &str) -> Result<Self> {
        let (system, name) = split_service_name(service);
        let base = format!("{}/URLs/{}", system_section(system), name);
        let single = |option: &str| -> Result<Option<Endpoint>> {
            match store.get_option(&format!("{}/{}", base, option)) {
                Some(url) if !url.trim().is_empty() => Endpoint::parse(&url).map(Some),
                _ => Ok(None),
            }
        };

        let set = Self {
            service: service.to_string(),
            central: single("Central")?,
            local: single("Local")?,
            replicas: match store.get_option(&format!("{}/Replicas", base)) {
                Some(list) => parse_endpoint_list(&list)?,
                None => Vec::new(),
            },
        };
        tracing::debug!(
            service,
            central = ?set.central.as_ref().map(Endpoint::url),
            local = ?set.local.as_ref().map(Endpoint::url),
            replicas = set.replicas.len(),
            "resolved endpoints"
        );
        Ok(set)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn central(&self) -> Option<&Endpoint> {
        self.central.as_ref()
    }

    pub fn local(&self) -> Option<&Endpoint> {
        self.local.as_ref()
    }

    pub fn replicas(&self) -> &[Endpoint] {
        &self.replicas
    }

    pub fn is_empty(&self) -> bool {
        self.central.is_none() && self.local.is_none() && self.replicas.is_empty()
    }

    /// Orders the endpoints for one call. Replicas are shuffled afresh every
    /// time.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NoEndpointsConfigured`] if the selection yields no
    /// candidate.
    pub fn candidates<R: Rng + ?Sized>(&self, selection: &Selection, rng: &mut R) -> Result<Vec<Endpoint>> {
        let mut candidates = Vec::new();
        match selection {
            Selection::Pinned(endpoint) => candidates.push(endpoint.clone()),
            Selection::CentralOnly => candidates.extend(self.central.clone()),
            Selection::Read => {
                candidates.extend(self.local.clone());
                self.push_failover_order(&mut candidates, rng);
            }
            Selection::Failover => self.push_failover_order(&mut candidates, rng),
        }

        if candidates.is_empty() {
            return Err(RpcError::NoEndpointsConfigured(self.service.clone()));
        }
        Ok(candidates)
    }

    fn push_failover_order<R: Rng + ?Sized>(&self, candidates: &mut Vec<Endpoint>, rng: &mut R) {
        if let Some(central) = &self.central {
            if !candidates.contains(central) {
                candidates.push(central.clone());
            }
        }

        let mut replicas: Vec<&Endpoint> = self
            .replicas
            .iter()
            .filter(|r| !candidates.contains(r))
            .collect();
        replicas.shuffle(rng);
        candidates.extend(replicas.into_iter().cloned());
    }
}
