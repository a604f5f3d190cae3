//! the policy document as written by operators, and its validated form.
//!
//! ```json
//! {
//!   "groups": { "group:eng": ["alice@", "group:oncall"] },
//!   "hosts": { "db": "10.1.0.0/24" },
//!   "tagOwners": { "tag:web": ["group:eng"] },
//!   "acls": [
//!     { "action": "accept", "src": ["group:eng"], "dst": ["db:5432", "tag:web:80,443"] }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tailmesh_types::{PolicyJson, Tag};

use crate::alias::{Alias, DstAlias, is_host_name, is_name};
use crate::error::{Error, ValidationError};

/// the only supported acl action.
pub const ACTION_ACCEPT: &str = "accept";

/// a policy document exactly as supplied.
///
/// this is what `get_policy` hands back; it is never mutated after parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// group name (with `group:` prefix) to member references.
    #[serde(default, alias = "Groups", skip_serializing_if = "Definitions::is_empty")]
    pub groups: Memberships,

    /// named cidr aliases, in document order.
    #[serde(default, alias = "Hosts", skip_serializing_if = "Definitions::is_empty")]
    pub hosts: HostAliases,

    /// tag to the users or groups allowed to apply it.
    #[serde(
        default,
        rename = "tagOwners",
        alias = "TagOwners",
        skip_serializing_if = "Definitions::is_empty"
    )]
    pub tag_owners: Memberships,

    /// access rules, accumulated (no first-match).
    #[serde(default, alias = "ACLs")]
    pub acls: Vec<AclEntry>,
}

/// one access rule: every source may reach every destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    /// must be `accept`.
    pub action: String,

    /// source tokens.
    #[serde(rename = "src", alias = "sources", default)]
    pub sources: Vec<String>,

    /// destination tokens, each with a `:ports` suffix.
    #[serde(rename = "dst", alias = "destinations", default)]
    pub destinations: Vec<String>,
}

impl AclEntry {
    /// an `accept` entry from string slices.
    pub fn accept(sources: &[&str], destinations: &[&str]) -> Self {
        Self {
            action: ACTION_ACCEPT.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            destinations: destinations.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// a document section mapping names to definitions, in document order.
///
/// kept as a list rather than a map so duplicate names survive
/// deserialization and can be rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definitions<V>(Vec<(String, V)>);

/// host alias name to address or cidr.
pub type HostAliases = Definitions<String>;

/// group or tag name to member references.
pub type Memberships = Definitions<Vec<String>>;

impl<V> Default for Definitions<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> Definitions<V> {
    /// no definitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// append a definition.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<V>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// number of definitions, duplicates included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// definitions in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for Definitions<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<V: Serialize> Serialize for Definitions<V> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Definitions<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DefinitionsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for DefinitionsVisitor<V> {
            type Value = Definitions<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of names to definitions")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, V>()? {
                    entries.push((name, value));
                }
                Ok(Definitions(entries))
            }
        }

        deserializer.deserialize_map(DefinitionsVisitor(PhantomData))
    }
}

impl PolicyDocument {
    /// parse a document from json, enforcing the policy size limit.
    ///
    /// the result is not validated yet, see [`PolicyDocument::validate`].
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let json = PolicyJson::new(json)?;
        Ok(serde_json::from_str(json.as_str())?)
    }

    /// the document used when no policy was ever supplied: every node may
    /// reach every port on every other node.
    pub fn allow_all() -> Self {
        Self {
            acls: vec![AclEntry::accept(&["*"], &["*:*"])],
            ..Self::default()
        }
    }

    /// a document without rules; nothing is reachable.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// serialize back to pretty json.
    pub fn to_json_pretty(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// check the document and produce its normalised form.
    ///
    /// names are lower-cased. host aliases are only checked for shape here;
    /// references to undefined aliases fail later, at resolution time.
    pub fn validate(&self) -> Result<Policy, Error> {
        let hosts = self.validate_hosts()?;
        let groups = self.validate_groups()?;
        let tag_owners = self.validate_tag_owners(&groups)?;

        let mut acls = Vec::with_capacity(self.acls.len());
        for (index, entry) in self.acls.iter().enumerate() {
            acls.push(validate_entry(index, entry, &groups)?);
        }

        Ok(Policy {
            acls,
            groups,
            hosts,
            tag_owners,
        })
    }

    fn validate_hosts(&self) -> Result<BTreeMap<String, IpNet>, ValidationError> {
        let mut hosts = BTreeMap::new();
        for (name, value) in self.hosts.iter() {
            let name = name.trim().to_lowercase();
            if !is_host_name(&name) {
                return Err(ValidationError::InvalidHostName(name));
            }

            let value = value.trim();
            let net = value
                .parse::<IpNet>()
                .or_else(|_| value.parse::<IpAddr>().map(IpNet::from))
                .map_err(|_| ValidationError::InvalidHostAddress {
                    name: name.clone(),
                    value: value.to_string(),
                })?;

            if hosts.insert(name.clone(), net).is_some() {
                return Err(ValidationError::DuplicateHost(name));
            }
        }
        Ok(hosts)
    }

    fn validate_groups(&self) -> Result<BTreeMap<String, Vec<Principal>>, ValidationError> {
        let mut groups = BTreeMap::new();
        for (key, members) in self.groups.iter() {
            let key = key.trim().to_lowercase();
            let name = key
                .strip_prefix("group:")
                .filter(|name| is_name(name))
                .ok_or_else(|| ValidationError::InvalidGroupName(key.clone()))?;

            let members = members
                .iter()
                .map(|member| {
                    Principal::parse(member).ok_or_else(|| ValidationError::InvalidGroupMember {
                        group: key.clone(),
                        member: member.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            if groups.insert(name.to_string(), members).is_some() {
                return Err(ValidationError::DuplicateGroup(key));
            }
        }

        for (name, members) in &groups {
            for member in members {
                if let Principal::Group(nested) = member
                    && !groups.contains_key(nested)
                {
                    return Err(ValidationError::UndefinedGroup {
                        group: nested.clone(),
                        referenced_by: format!("group:{name}"),
                    });
                }
            }
        }

        check_group_cycles(&groups)?;
        Ok(groups)
    }

    fn validate_tag_owners(
        &self,
        groups: &BTreeMap<String, Vec<Principal>>,
    ) -> Result<BTreeMap<Tag, Vec<Principal>>, ValidationError> {
        let mut owners = BTreeMap::new();
        for (key, entries) in self.tag_owners.iter() {
            let tag = Tag::normalized(key.trim()).map_err(|cause| {
                ValidationError::InvalidTagOwnerTag {
                    tag: key.to_string(),
                    cause,
                }
            })?;

            let mut principals = Vec::with_capacity(entries.len());
            for entry in entries {
                let principal =
                    Principal::parse(entry).ok_or_else(|| ValidationError::InvalidTagOwner {
                        tag: tag.to_string(),
                        owner: entry.clone(),
                    })?;
                if let Principal::Group(group) = &principal
                    && !groups.contains_key(group)
                {
                    return Err(ValidationError::UndefinedGroup {
                        group: group.clone(),
                        referenced_by: tag.to_string(),
                    });
                }
                principals.push(principal);
            }
            if owners.contains_key(&tag) {
                return Err(ValidationError::DuplicateTagOwner(tag.to_string()));
            }
            owners.insert(tag, principals);
        }
        Ok(owners)
    }
}

fn validate_entry(
    index: usize,
    entry: &AclEntry,
    groups: &BTreeMap<String, Vec<Principal>>,
) -> Result<Acl, ValidationError> {
    if !entry.action.trim().eq_ignore_ascii_case(ACTION_ACCEPT) {
        return Err(ValidationError::UnsupportedAction {
            index,
            action: entry.action.clone(),
        });
    }
    if entry.sources.is_empty() {
        return Err(ValidationError::EmptySources { index });
    }
    if entry.destinations.is_empty() {
        return Err(ValidationError::EmptyDestinations { index });
    }

    let invalid = |token: &str, cause| ValidationError::InvalidToken {
        index,
        token: token.to_string(),
        cause,
    };

    let sources = entry
        .sources
        .iter()
        .map(|token| Alias::parse(token).map_err(|e| invalid(token, e)))
        .collect::<Result<Vec<_>, _>>()?;
    let destinations = entry
        .destinations
        .iter()
        .map(|token| DstAlias::parse(token).map_err(|e| invalid(token, e)))
        .collect::<Result<Vec<_>, _>>()?;

    let referenced_groups = sources
        .iter()
        .chain(destinations.iter().map(|dst| &dst.alias));
    for alias in referenced_groups {
        if let Alias::Group(group) = alias
            && !groups.contains_key(group)
        {
            return Err(ValidationError::UndefinedGroup {
                group: group.clone(),
                referenced_by: format!("acl entry {index}"),
            });
        }
    }

    Ok(Acl {
        index,
        sources,
        destinations,
    })
}

fn check_group_cycles(groups: &BTreeMap<String, Vec<Principal>>) -> Result<(), ValidationError> {
    fn visit<'a>(
        name: &'a str,
        groups: &'a BTreeMap<String, Vec<Principal>>,
        path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), ValidationError> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|p| *p == name) {
            let mut cycle: Vec<String> = path[start..].iter().map(|g| format!("group:{g}")).collect();
            cycle.push(format!("group:{name}"));
            return Err(ValidationError::CyclicGroup(cycle.join(" -> ")));
        }

        path.push(name);
        for member in groups.get(name).into_iter().flatten() {
            if let Principal::Group(nested) = member {
                visit(nested, groups, path, done)?;
            }
        }
        path.pop();
        done.insert(name);
        Ok(())
    }

    let mut done = HashSet::new();
    for name in groups.keys() {
        visit(name, groups, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}

/// a group member or tag owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    /// user reference, `name@` or `name@domain`.
    User(String),
    /// nested group, without the `group:` prefix.
    Group(String),
}

impl Principal {
    fn parse(s: &str) -> Option<Self> {
        match Alias::parse(s).ok()? {
            Alias::User(user) => Some(Principal::User(user)),
            Alias::Group(group) => Some(Principal::Group(group)),
            _ => None,
        }
    }
}

/// one validated acl entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    /// position of the entry in the document.
    pub index: usize,
    /// parsed source aliases.
    pub sources: Vec<Alias>,
    /// parsed destination aliases.
    pub destinations: Vec<DstAlias>,
}

/// a validated, normalised policy.
///
/// two documents that differ only in case or whitespace validate to equal
/// policies, which is what re-activation compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    acls: Vec<Acl>,
    groups: BTreeMap<String, Vec<Principal>>,
    hosts: BTreeMap<String, IpNet>,
    tag_owners: BTreeMap<Tag, Vec<Principal>>,
}

impl Policy {
    /// validated acl entries in document order.
    pub fn acls(&self) -> &[Acl] {
        &self.acls
    }

    /// members of a group, by name without prefix.
    pub fn group(&self, name: &str) -> Option<&[Principal]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// the cidr a host alias stands for.
    pub fn host(&self, name: &str) -> Option<IpNet> {
        self.hosts.get(name).copied()
    }

    /// principals allowed to apply `tag`.
    pub fn tag_owners(&self, tag: &Tag) -> Option<&[Principal]> {
        self.tag_owners.get(tag).map(Vec::as_slice)
    }
}
