use std::collections::HashMap;
use std::str::FromStr;

use crate::config::store::ConfigStore;
use crate::endpoint::{Endpoint, Protocol, DEFAULT_PROTOCOL};

pub const DEFAULT_PORT: u16 = 9876;
pub const DEFAULT_MAX_THREADS: usize = 15;
pub const DEFAULT_MAX_WAITING_PETITIONS: usize = 500;
pub const DEFAULT_MAX_THREADS_PER_FUNCTION: usize = 15;

const HOSTNAME_OPTION: &str = "/Global/Hostname";

/// Path of the configuration section of a system, e.g. `/Systems/Framework`.
pub fn system_section(system: &str) -> String {
    format!("/Systems/{}", system)
}

/// Splits a `System/Service` name. A bare name is its own system.
pub fn split_service_name(name: &str) -> (&str, &str) {
    match name.split_once('/') {
        Some((system, service)) => (system, service),
        None => (name, name),
    }
}

/// Accessors for one service's configuration section.
///
/// Relative option names resolve under the service section
/// (`/Systems/<System>/Services/<Service>`); names starting with `/` are
/// looked up as given. Every typed accessor falls back to its default when
/// the option is missing or does not parse.
pub struct ServiceSection<'a> {
    store: &'a dyn ConfigStore,
    name: String,
    service_path: String,
    system_path: String,
}

impl<'a> ServiceSection<'a> {
    pub fn new(store: &'a dyn ConfigStore, name: impl Into<String>) -> Self {
        let name = name.into();
        let (system, service) = split_service_name(&name);
        let system_path = system_section(system);
        let service_path = format!("{}/Services/{}", system_path, service);
        Self {
            store,
            name,
            service_path,
            system_path,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    pub fn system_path(&self) -> &str {
        &self.system_path
    }

    pub fn get_option(&self, option: &str) -> Option<String> {
        if option.starts_with('/') {
            self.store.get_option(option)
        } else {
            self.store.get_option(&format!("{}/{}", self.service_path, option))
        }
    }

    /// Listen address as `(host, port)`; an empty host binds all interfaces.
    pub fn address(&self) -> (String, u16) {
        (String::new(), self.port())
    }

    pub fn port(&self) -> u16 {
        self.parsed("Port").unwrap_or(DEFAULT_PORT)
    }

    pub fn protocol(&self) -> Protocol {
        match self.get_option("Protocol") {
            None => DEFAULT_PROTOCOL,
            Some(name) => Protocol::from_str(name.trim()).unwrap_or_else(|_| {
                tracing::warn!(service = %self.name, protocol = %name, "unknown protocol, using {}", DEFAULT_PROTOCOL);
                DEFAULT_PROTOCOL
            }),
        }
    }

    /// The declared public URL, if any.
    pub fn url(&self) -> Option<String> {
        self.get_option("URL").filter(|url| !url.trim().is_empty())
    }

    /// Alias names the service is also reachable under.
    pub fn register_also_as(&self) -> Vec<String> {
        self.get_option("RegisterAlsoAs")
            .map(|list| split_list(&list))
            .unwrap_or_default()
    }

    pub fn max_threads(&self) -> usize {
        self.ceiling("MaxThreads", DEFAULT_MAX_THREADS)
    }

    pub fn max_waiting_petitions(&self) -> usize {
        self.ceiling("MaxWaitingPetitions", DEFAULT_MAX_WAITING_PETITIONS)
    }

    pub fn max_threads_per_function(&self, method: &str) -> usize {
        self.ceiling(&format!("{}MaxThreads", method), DEFAULT_MAX_THREADS_PER_FUNCTION)
    }

    pub fn handler_path(&self) -> Option<String> {
        self.get_option("HandlerPath")
    }

    pub fn hostname(&self) -> String {
        self.get_option(HOSTNAME_OPTION)
            .or_else(|| std::env::var("HOSTNAME").ok())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    fn parsed<T: FromStr>(&self, option: &str) -> Option<T> {
        self.get_option(option)?.trim().parse().ok()
    }

    /// Zero is not a usable ceiling and is treated like a parse failure.
    fn ceiling(&self, option: &str, default: usize) -> usize {
        match self.parsed::<usize>(option) {
            Some(0) | None => default,
            Some(value) => value,
        }
    }
}

/// Resolved settings of one service process.
///
/// Read once at startup and never mutated by request handling; a new
/// snapshot is produced by [`ServiceConfig::reload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub aliases: Vec<String>,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub url: Option<String>,
    pub hostname: String,
    pub handler_path: Option<String>,
    pub max_threads: usize,
    pub max_waiting_petitions: usize,
    method_ceilings: HashMap<String, usize>,
}

impl ServiceConfig {
    /// Built-in defaults, without consulting any store.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            host: String::new(),
            port: DEFAULT_PORT,
            protocol: DEFAULT_PROTOCOL,
            url: None,
            hostname: "localhost".to_string(),
            handler_path: None,
            max_threads: DEFAULT_MAX_THREADS,
            max_waiting_petitions: DEFAULT_MAX_WAITING_PETITIONS,
            method_ceilings: HashMap::new(),
        }
    }

    /// Resolves the configuration of service `name`, including the
    /// per-method ceilings of `methods`.
    pub fn load<'m, I>(store: &dyn ConfigStore, name: &str, methods: I) -> Self
    where
        I: IntoIterator<Item = &'m str>,
    {
        let section = ServiceSection::new(store, name);
        let (host, port) = section.address();
        let method_ceilings = methods
            .into_iter()
            .map(|m| (m.to_string(), section.max_threads_per_function(m)))
            .collect();

        Self {
            name: section.name().to_string(),
            aliases: section.register_also_as(),
            host,
            port,
            protocol: section.protocol(),
            url: section.url(),
            hostname: section.hostname(),
            handler_path: section.handler_path(),
            max_threads: section.max_threads(),
            max_waiting_petitions: section.max_waiting_petitions(),
            method_ceilings,
        }
    }

    /// Re-reads the same service and methods from `store`.
    pub fn reload(&self, store: &dyn ConfigStore) -> Self {
        let methods: Vec<String> = self.method_ceilings.keys().cloned().collect();
        let reloaded = Self::load(store, &self.name, methods.iter().map(String::as_str));
        if reloaded != *self {
            tracing::info!(service = %self.name, "service configuration changed on reload");
        }
        reloaded
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_max_waiting_petitions(mut self, max_waiting: usize) -> Self {
        self.max_waiting_petitions = max_waiting;
        self
    }

    pub fn with_method_ceiling(mut self, method: impl Into<String>, ceiling: usize) -> Self {
        self.method_ceilings.insert(method.into(), ceiling);
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Worker ceiling for `method`: the narrower of its own ceiling and the
    /// service-wide one.
    pub fn method_ceiling(&self, method: &str) -> usize {
        let own = self
            .method_ceilings
            .get(method)
            .copied()
            .unwrap_or(DEFAULT_MAX_THREADS_PER_FUNCTION);
        own.min(self.max_threads)
    }

    /// True if `service` is this service's name or one of its aliases.
    pub fn answers_to(&self, service: &str) -> bool {
        self.name == service || self.aliases.iter().any(|a| a == service)
    }

    pub fn bind_address(&self) -> String {
        let host = if self.host.is_empty() { "0.0.0.0" } else { &self.host };
        format!("{}:{}", host, self.port)
    }

    /// The declared URL, or one built from the host name and port.
    pub fn public_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => Endpoint::new(self.protocol, format!("{}:{}", self.hostname, self.port))
                .with_service(self.name.clone())
                .url(),
        }
    }
}

pub(crate) fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
