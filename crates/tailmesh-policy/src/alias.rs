//! alias tokens used in acl sources and destinations.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use tailmesh_proto::PortRange;
use tailmesh_types::Tag;

use crate::error::ParseError;
use crate::ports::parse_ports;

/// a symbolic reference to a set of addresses.
///
/// tokens are lower-cased before parsing, so `Group:Eng` and `group:eng`
/// are the same alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Alias {
    /// every address, `0.0.0.0/0` and `::/0`.
    Wildcard,
    /// literal address or cidr.
    Prefix(IpNet),
    /// user reference, `name@` or `name@domain`.
    User(String),
    /// group reference, stored without the `group:` prefix.
    Group(String),
    /// tag reference.
    Tag(Tag),
    /// named host alias from the `hosts` section.
    Host(String),
    /// built-in autogroup.
    Autogroup(Autogroup),
}

/// built-in groups computed from the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Autogroup {
    /// every user-owned node.
    Member,
    /// every tagged node.
    Tagged,
}

impl Autogroup {
    fn name(self) -> &'static str {
        match self {
            Autogroup::Member => "member",
            Autogroup::Tagged => "tagged",
        }
    }
}

impl Alias {
    /// parse a source token.
    pub fn parse(token: &str) -> Result<Self, ParseError> {
        let token = token.trim().to_lowercase();
        if token.is_empty() {
            return Err(ParseError::Empty);
        }

        if token == "*" {
            return Ok(Alias::Wildcard);
        }
        if token.starts_with("tag:") {
            return Ok(Alias::Tag(Tag::new(token)?));
        }
        if let Some(name) = token.strip_prefix("group:") {
            if !is_name(name) {
                return Err(ParseError::InvalidName(token.clone()));
            }
            return Ok(Alias::Group(name.to_string()));
        }
        if let Some(name) = token.strip_prefix("autogroup:") {
            return match name {
                "member" => Ok(Alias::Autogroup(Autogroup::Member)),
                "tagged" => Ok(Alias::Autogroup(Autogroup::Tagged)),
                _ => Err(ParseError::UnknownAutogroup(name.to_string())),
            };
        }
        if token.contains('@') {
            return parse_user(&token).map(Alias::User);
        }
        if token.contains('/') {
            let net: IpNet = token
                .parse()
                .map_err(|_| ParseError::InvalidCidr(token.clone()))?;
            return Ok(Alias::Prefix(net));
        }
        if let Ok(ip) = token.parse::<IpAddr>() {
            return Ok(Alias::Prefix(IpNet::from(ip)));
        }
        if token.contains(':') {
            // looks like an address, but isn't one
            return Err(ParseError::InvalidCidr(token));
        }
        if is_host_name(&token) {
            return Ok(Alias::Host(token));
        }

        Err(ParseError::UnknownToken(token))
    }
}

impl FromStr for Alias {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Alias::parse(s)
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alias::Wildcard => f.write_str("*"),
            Alias::Prefix(net) if net.prefix_len() == net.max_prefix_len() => {
                write!(f, "{}", net.addr())
            }
            Alias::Prefix(net) => write!(f, "{net}"),
            Alias::User(user) => f.write_str(user),
            Alias::Group(group) => write!(f, "group:{group}"),
            Alias::Tag(tag) => f.write_str(tag.as_str()),
            Alias::Host(host) => f.write_str(host),
            Alias::Autogroup(ag) => write!(f, "autogroup:{}", ag.name()),
        }
    }
}

/// a destination token: an alias plus the ports it opens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DstAlias {
    /// the addressed alias.
    pub alias: Alias,
    /// port ranges opened on it, in document order.
    pub ports: Vec<PortRange>,
}

impl DstAlias {
    /// parse a destination token of the form `alias:ports`.
    ///
    /// the split happens at the last `:`, so ipv6 literals need no brackets
    /// (`fd7a:115c:a1e0::1:22`, `::/0:*`).
    pub fn parse(token: &str) -> Result<Self, ParseError> {
        let trimmed = token.trim();
        let Some((alias, ports)) = trimmed.rsplit_once(':') else {
            return Err(ParseError::MissingPorts(trimmed.to_string()));
        };

        // `tag:web` with no ports splits into ("tag", "web")
        if matches!(alias, "tag" | "group" | "autogroup") || alias.is_empty() {
            return Err(ParseError::MissingPorts(trimmed.to_string()));
        }

        Ok(Self {
            alias: Alias::parse(alias)?,
            ports: parse_ports(ports)?,
        })
    }
}

impl FromStr for DstAlias {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DstAlias::parse(s)
    }
}

impl fmt::Display for DstAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.alias)?;
        for (i, range) in self.ports.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

fn parse_user(token: &str) -> Result<String, ParseError> {
    let invalid = || ParseError::InvalidName(token.to_string());

    let (local, domain) = token.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let valid_local = local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'));
    if !valid_local || !(domain.is_empty() || is_host_name(domain)) {
        return Err(invalid());
    }

    Ok(token.to_string())
}

/// group names: lowercase alphanumerics plus `.`, `_` and `-`.
pub(crate) fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
}

/// host alias names must not be mistaken for any other token shape.
///
/// `tag`, `group` and `autogroup` are refused since `tag:22` reads as a
/// tag without ports.
pub(crate) fn is_host_name(s: &str) -> bool {
    is_name(s)
        && s.starts_with(|c: char| c.is_ascii_alphanumeric())
        && !matches!(s, "tag" | "group" | "autogroup")
        && s.parse::<IpAddr>().is_err()
}
