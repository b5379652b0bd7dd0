//! Topic layout for bridge daemons
//!
//! Named registrations live under `{prefix}/{name}/...`; the single optional root
//! registration collapses to `{prefix}/...`. App-level topics (`status`, `error`)
//! are always directly under the prefix.

/// Identifies whose topics are being built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address<'a> {
    Root,
    Named(&'a str),
}

impl<'a> Address<'a> {
    pub fn new(name: &'a str, is_root: bool) -> Self {
        if is_root {
            Address::Root
        } else {
            Address::Named(name)
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Address::Root)
    }
}

/// Builds every topic the framework publishes or subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    prefix: String,
}

impl TopicLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn device_topic(&self, address: Address<'_>, leaf: &str) -> String {
        match address {
            Address::Root => format!("{}/{leaf}", self.prefix),
            Address::Named(name) => format!("{}/{name}/{leaf}", self.prefix),
        }
    }

    /// `{prefix}/{name}/set` or `{prefix}/set`
    pub fn command(&self, address: Address<'_>) -> String {
        self.device_topic(address, "set")
    }

    /// `{prefix}/{name}/state` or `{prefix}/state`
    pub fn state(&self, address: Address<'_>) -> String {
        self.device_topic(address, "state")
    }

    /// `{prefix}/{name}/availability` or `{prefix}/availability`
    pub fn availability(&self, address: Address<'_>) -> String {
        self.device_topic(address, "availability")
    }

    /// Per-device error topic; root registrations have none since it would
    /// duplicate the global error topic
    pub fn device_error(&self, address: Address<'_>) -> Option<String> {
        match address {
            Address::Root => None,
            Address::Named(name) => Some(format!("{}/{name}/error", self.prefix)),
        }
    }

    /// `{prefix}/error`
    pub fn global_error(&self) -> String {
        format!("{}/error", self.prefix)
    }

    /// `{prefix}/status`
    pub fn status(&self) -> String {
        format!("{}/status", self.prefix)
    }

    /// Arbitrary channel below a device, e.g. `{prefix}/{name}/{channel}`
    pub fn channel(&self, address: Address<'_>, channel: &str) -> String {
        self.device_topic(address, channel)
    }
}

/// Validate a single topic segment (app name, prefix, or device name)
pub fn validate_segment(segment: &str) -> Result<(), String> {
    if segment.is_empty() {
        return Err("must not be empty".to_string());
    }

    for ch in segment.chars() {
        if ch == '/' || ch == '+' || ch == '#' || ch.is_whitespace() || ch.is_control() {
            return Err(format!("contains invalid character {ch:?}"));
        }
    }

    Ok(())
}
