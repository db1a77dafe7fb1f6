// Command sentence builder plus the typed constructors tikvend-core
// actually issues. Attribute words are `=key=value`, query words are
// `?key=value`; the builder keeps them separate because RouterOS
// requires queries after attributes.

/// A single command to execute against a router.
#[derive(Debug, Clone)]
pub struct CommandSentence {
    path: String,
    attributes: Vec<(String, String)>,
    queries: Vec<(String, String)>,
}

impl CommandSentence {
    /// Start a command for the given API path (e.g. `/ip/hotspot/active/print`).
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            attributes: Vec::new(),
            queries: Vec::new(),
        }
    }

    /// Add an `=key=value` attribute word.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Add a `?key=value` query word (print filters).
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.queries.push((key.into(), value.into()));
        self
    }

    /// The API path of this command.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Render to the wire word sequence.
    pub fn to_words(&self) -> Vec<String> {
        let mut words = Vec::with_capacity(1 + self.attributes.len() + self.queries.len());
        words.push(self.path.clone());
        for (key, value) in &self.attributes {
            words.push(format!("={key}={value}"));
        }
        for (key, value) in &self.queries {
            words.push(format!("?{key}={value}"));
        }
        words
    }
}

// ── Typed constructors ───────────────────────────────────────────────

/// List active hotspot sessions, optionally filtered to one user.
pub fn hotspot_active_print(user: Option<&str>) -> CommandSentence {
    let cmd = CommandSentence::new("/ip/hotspot/active/print");
    match user {
        Some(user) => cmd.query("user", user),
        None => cmd,
    }
}

/// Drop one active hotspot session by its `.id`.
pub fn hotspot_active_remove(id: &str) -> CommandSentence {
    CommandSentence::new("/ip/hotspot/active/remove").attr("numbers", id)
}

/// List configured RADIUS client entries.
pub fn radius_print() -> CommandSentence {
    CommandSentence::new("/radius/print")
}

/// Point the router's hotspot service at a RADIUS server.
pub fn radius_add(server_address: &str, secret: &str) -> CommandSentence {
    CommandSentence::new("/radius/add")
        .attr("service", "hotspot")
        .attr("address", server_address)
        .attr("secret", secret)
}

/// Update an existing RADIUS client entry in place.
pub fn radius_set(id: &str, server_address: &str, secret: &str) -> CommandSentence {
    CommandSentence::new("/radius/set")
        .attr("numbers", id)
        .attr("address", server_address)
        .attr("secret", secret)
}

/// Remove a RADIUS client entry.
pub fn radius_remove(id: &str) -> CommandSentence {
    CommandSentence::new("/radius/remove").attr("numbers", id)
}

/// Cheap command used as a reachability probe.
pub fn system_identity() -> CommandSentence {
    CommandSentence::new("/system/identity/print")
}
