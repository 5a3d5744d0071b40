//! Topology document model
//!
//! The topology describes the server and named groups of clients. Group
//! order and name order inside a group are significant: they decide which
//! tunnel address each client receives, so groups are kept in document order
//! rather than in a sorted map.

use crate::keys::{KeyError, KeyPair, KeyProvider};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Invalid JSON: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("server.endpoint must not be empty")]
    EmptyEndpoint,
    #[error("server.endpoint {0:?} contains control characters")]
    InvalidEndpoint(String),
    #[error("Client group {0:?} has no names")]
    EmptyGroup(String),
    #[error("Client group {group:?} lists {name:?} more than once")]
    DuplicateName { group: String, name: String },
    #[error("Invalid {kind} name {name:?}: must be non-empty and usable as a file name")]
    InvalidName { kind: &'static str, name: String },
    #[error("Clients {first:?} and {second:?} would both be written to {file}.conf")]
    FileNameCollision {
        first: String,
        second: String,
        file: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Generated on first materialization, then carried forward verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<KeyPair>,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub names: Vec<String>,
    /// May hold entries for names no longer listed; those are never pruned
    #[serde(default)]
    pub keys: BTreeMap<String, KeyPair>,
}

impl ClientConfig {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            keys: BTreeMap::new(),
        }
    }
}

/// Client groups in document order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientGroups(Vec<(String, ClientConfig)>);

impl ClientGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, group: impl Into<String>, config: ClientConfig) {
        self.0.push((group.into(), config));
    }

    pub fn get(&self, group: &str) -> Option<&ClientConfig> {
        self.0.iter().find(|(name, _)| name == group).map(|(_, c)| c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClientConfig)> {
        self.0.iter().map(|(name, config)| (name.as_str(), config))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ClientConfig)> {
        self.0.iter_mut().map(|(name, config)| (name.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of declared client names across all groups
    pub fn client_count(&self) -> usize {
        self.0.iter().map(|(_, c)| c.names.len()).sum()
    }
}

impl Serialize for ClientGroups {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, config) in &self.0 {
            map.serialize_entry(name, config)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ClientGroups {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct GroupsVisitor;

        impl<'de> Visitor<'de> for GroupsVisitor {
            type Value = ClientGroups;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of client group names to client configs")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut groups = ClientGroups::new();
                while let Some((name, config)) = access.next_entry::<String, ClientConfig>()? {
                    if groups.get(&name).is_some() {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate client group {name:?}"
                        )));
                    }
                    groups.push(name, config);
                }
                Ok(groups)
            }
        }

        deserializer.deserialize_map(GroupsVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub clients: ClientGroups,
}

impl Config {
    /// Parse and validate a topology document
    pub fn from_json(content: &str) -> Result<Self, TopologyError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.server.endpoint.trim().is_empty() {
            return Err(TopologyError::EmptyEndpoint);
        }
        if self.server.endpoint.chars().any(char::is_control) {
            return Err(TopologyError::InvalidEndpoint(self.server.endpoint.clone()));
        }

        // file stem -> "group/name" that claimed it
        let mut files: HashMap<String, String> = HashMap::new();

        for (group, client) in self.clients.iter() {
            check_name("group", group)?;
            if client.names.is_empty() {
                return Err(TopologyError::EmptyGroup(group.to_string()));
            }

            let mut seen = HashSet::new();
            for name in &client.names {
                check_name("client", name)?;
                if !seen.insert(name.as_str()) {
                    return Err(TopologyError::DuplicateName {
                        group: group.to_string(),
                        name: name.clone(),
                    });
                }

                let owner = format!("{group}/{name}");
                if let Some(first) = files.insert(format!("{group}_{name}"), owner.clone()) {
                    return Err(TopologyError::FileNameCollision {
                        first,
                        second: owner,
                        file: format!("{group}_{name}"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Serialize with lexically sorted keys and two-space indentation
    pub fn to_snapshot_json(&self) -> Result<String, serde_json::Error> {
        // serde_json::Value objects are BTreeMap backed, which sorts the keys
        let value = serde_json::to_value(self)?;
        let mut out = serde_json::to_string_pretty(&value)?;
        out.push('\n');
        Ok(out)
    }
}

/// Group and client names end up in file names and in `# comment` lines
fn check_name(kind: &'static str, name: &str) -> Result<(), TopologyError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(TopologyError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Generate a key pair for the server and every declared client that lacks one
///
/// Existing pairs are never replaced. Returns the number of pairs generated,
/// so a second call on the same config returns 0.
pub fn ensure_keys(config: &mut Config, provider: &dyn KeyProvider) -> Result<usize, KeyError> {
    let mut generated = 0;

    if config.server.keys.is_none() {
        config.server.keys = Some(provider.generate()?);
        info!("Generated server key pair");
        generated += 1;
    }

    for (group, client) in config.clients.iter_mut() {
        for name in &client.names {
            if client.keys.contains_key(name) {
                continue;
            }
            let pair = provider.generate()?;
            client.keys.insert(name.clone(), pair);
            info!("Generated key pair for {}_{}", group, name);
            generated += 1;
        }
    }

    Ok(generated)
}

/// Copy key pairs from a previous snapshot wherever `config` has none
///
/// Carries every entry of a same-named group, including entries for names
/// that are no longer declared. Returns the number of pairs copied.
pub fn inherit_keys(config: &mut Config, previous: &Config) -> usize {
    let mut inherited = 0;

    if config.server.keys.is_none() {
        if let Some(keys) = &previous.server.keys {
            config.server.keys = Some(keys.clone());
            inherited += 1;
        }
    }

    for (group, client) in config.clients.iter_mut() {
        let Some(old) = previous.clients.get(group) else {
            continue;
        };
        for (name, pair) in &old.keys {
            if !client.keys.contains_key(name) {
                client.keys.insert(name.clone(), pair.clone());
                debug!("Inherited key pair for {}_{} from snapshot", group, name);
                inherited += 1;
            }
        }
    }

    inherited
}
