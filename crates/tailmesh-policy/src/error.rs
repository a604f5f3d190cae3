//! error types for tailmesh-policy.
//!
//! every error here is local to one reload attempt: the active policy is
//! never touched when one of them is returned.

use tailmesh_types::{PolicyJsonError, TagError};
use thiserror::Error;

/// errors that can occur while turning a policy document into network maps.
#[derive(Debug, Error)]
pub enum Error {
    /// failed to parse json policy.
    #[error("failed to parse policy JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    /// policy text above the size limit.
    #[error(transparent)]
    TooLarge(#[from] PolicyJsonError),

    /// the document is structurally invalid.
    #[error("invalid policy: {0}")]
    Validation(#[from] ValidationError),

    /// a token could not be resolved against the current inventory.
    #[error("acl entry {index}: cannot resolve {token:?}: {source}")]
    Resolution {
        /// zero-based index of the acl entry holding the token.
        index: usize,
        /// the offending token, normalised.
        token: String,
        /// why resolution failed.
        #[source]
        source: ResolutionError,
    },

    /// internal inconsistency while compiling filter rules.
    #[error("policy compilation failed: {0}")]
    Compile(#[from] CompileError),
}

/// structural problems in a policy document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// only `accept` is meaningful; absence of a rule is the deny.
    #[error("acl entry {index}: unsupported action {action:?}, only \"accept\" is allowed")]
    UnsupportedAction {
        /// zero-based index of the acl entry.
        index: usize,
        /// the action as written.
        action: String,
    },

    /// acl entry without sources.
    #[error("acl entry {index}: src cannot be empty")]
    EmptySources {
        /// zero-based index of the acl entry.
        index: usize,
    },

    /// acl entry without destinations.
    #[error("acl entry {index}: dst cannot be empty")]
    EmptyDestinations {
        /// zero-based index of the acl entry.
        index: usize,
    },

    /// a source or destination token is malformed.
    #[error("acl entry {index}: invalid token {token:?}: {cause}")]
    InvalidToken {
        /// zero-based index of the acl entry.
        index: usize,
        /// the token as written.
        token: String,
        /// the parse failure.
        cause: ParseError,
    },

    /// a group is referenced but never defined.
    #[error("group:{group} is not defined (referenced by {referenced_by})")]
    UndefinedGroup {
        /// the missing group name, without prefix.
        group: String,
        /// where the reference was found.
        referenced_by: String,
    },

    /// nested group definitions form a cycle.
    #[error("group definitions form a cycle: {0}")]
    CyclicGroup(String),

    /// group key is not of the form `group:name`.
    #[error("invalid group name {0:?}")]
    InvalidGroupName(String),

    /// group member is neither a user nor a group reference.
    #[error("group {group}: invalid member {member:?}")]
    InvalidGroupMember {
        /// group holding the member.
        group: String,
        /// the member as written.
        member: String,
    },

    /// the same host alias is defined twice (names are case-insensitive).
    #[error("host alias {0:?} is defined more than once")]
    DuplicateHost(String),

    /// the same group is defined twice (names are case-insensitive).
    #[error("group {0:?} is defined more than once")]
    DuplicateGroup(String),

    /// the same tag has two owner lists (tags are case-insensitive).
    #[error("tag owners of {0:?} are defined more than once")]
    DuplicateTagOwner(String),

    /// host alias name collides with another token shape.
    #[error("invalid host alias name {0:?}")]
    InvalidHostName(String),

    /// host alias value is not an address or cidr.
    #[error("host alias {name:?}: invalid address {value:?}")]
    InvalidHostAddress {
        /// the alias name.
        name: String,
        /// the value as written.
        value: String,
    },

    /// tag owner key is not a valid tag.
    #[error("invalid tag owner key {tag:?}: {cause}")]
    InvalidTagOwnerTag {
        /// the key as written.
        tag: String,
        /// why the tag is invalid.
        cause: TagError,
    },

    /// tag owner entry is neither a user nor a defined group.
    #[error("{tag}: invalid owner {owner:?}")]
    InvalidTagOwner {
        /// the owned tag.
        tag: String,
        /// the owner as written.
        owner: String,
    },
}

/// syntax problems in a single token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// empty token.
    #[error("empty token")]
    Empty,

    /// unknown autogroup name (only `member` and `tagged` are supported).
    #[error("unknown autogroup: {0}")]
    UnknownAutogroup(String),

    /// invalid address or cidr notation.
    #[error("invalid address or CIDR: {0}")]
    InvalidCidr(String),

    /// invalid tag reference.
    #[error("invalid tag: {0}")]
    InvalidTag(#[from] TagError),

    /// invalid group or user name.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// token doesn't match any known format.
    #[error("unknown token format: {0}")]
    UnknownToken(String),

    /// destination without a `:ports` suffix.
    #[error("destination {0:?} has no port specification")]
    MissingPorts(String),

    /// port number is not a valid u16 or the range is inverted.
    #[error("invalid port specification: {0}")]
    InvalidPort(String),
}

/// a token that is well-formed but cannot be expanded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// host alias not present in the `hosts` section.
    #[error("unknown host alias {0:?}")]
    UnknownHost(String),

    /// group not present in the `groups` section.
    #[error("unknown group {0:?}")]
    UnknownGroup(String),

    /// group nesting deeper than the resolver follows.
    #[error("group nesting too deep at {0:?}")]
    GroupTooDeep(String),
}

/// internal inconsistencies found while compiling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    /// a resolved destination carries an inverted port range.
    #[error("acl entry {index}: inverted port range {first}-{last}")]
    InvertedPortRange {
        /// zero-based index of the acl entry.
        index: usize,
        /// first port.
        first: u16,
        /// last port.
        last: u16,
    },
}

/// result type for tailmesh-policy operations.
pub type Result<T> = std::result::Result<T, Error>;
