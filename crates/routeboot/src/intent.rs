//! The declarative network intent and its on-disk form.
//!
//! A [`NetworkIntent`] is validated once at construction and never changes
//! afterwards. Intent files are YAML or JSON:
//!
//! ```yaml
//! secondary_address: 10.0.0.5/24
//! destination_cidr: 10.0.0.0/24
//! table_id: 200
//! table_name: secondary
//! gateway: 10.0.1.1          # or: { subnet: 10.0.1.0/24 }
//! rule: from                 # optional, `from` or `to`
//! rule_priority: 1000        # optional
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::netlink::types::route::rt_table;

/// Validation errors for intents and prefixes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error("invalid prefix length: {0}")]
    InvalidPrefixLen(String),

    #[error("table id {0} is reserved")]
    ReservedTableId(u32),

    #[error("table id {0} is out of range")]
    TableIdOutOfRange(u32),

    #[error("invalid table name {name:?}: {reason}")]
    InvalidTableName { name: String, reason: &'static str },

    #[error("gateway must not be 0.0.0.0")]
    UnspecifiedGateway,

    #[error("subnet {0} has no usable host address")]
    NoUsableHost(Ipv4Prefix),
}

/// An IPv4 address with a prefix length.
///
/// Host bits are kept as given, so the same type holds both an interface
/// address (`10.0.0.5/24`) and a network (`10.0.0.0/24`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Prefix {
    addr: Ipv4Addr,
    len: u8,
}

impl Ipv4Prefix {
    pub fn new(addr: Ipv4Addr, len: u8) -> std::result::Result<Self, IntentError> {
        if len > 32 {
            return Err(IntentError::InvalidPrefixLen(len.to_string()));
        }
        Ok(Self { addr, len })
    }

    /// Build from kernel-reported parts, capping the length at 32.
    pub fn clamped(addr: Ipv4Addr, len: u8) -> Self {
        Self {
            addr,
            len: len.min(32),
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    /// Netmask as a host-order integer.
    pub fn mask(&self) -> u32 {
        u32::MAX.checked_shl(32 - self.len as u32).unwrap_or(0)
    }

    /// The network this prefix belongs to, host bits cleared.
    pub fn network(&self) -> Self {
        Self {
            addr: Ipv4Addr::from(u32::from(self.addr) & self.mask()),
            len: self.len,
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.addr) & self.mask()
    }

    /// First usable host of the network (network address + 1).
    ///
    /// Cloud subnets reserve this address for the router.
    pub fn first_host(&self) -> Option<Ipv4Addr> {
        if self.len >= 31 {
            return None;
        }
        let first = u32::from(self.network().addr) + 1;
        Some(Ipv4Addr::from(first))
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for Ipv4Prefix {
    type Err = IntentError;

    /// Parse `a.b.c.d/len`; a bare address is a /32.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr_str, len) = match s.split_once('/') {
            Some((addr, len_str)) => {
                let len: u8 = len_str
                    .parse()
                    .map_err(|_| IntentError::InvalidPrefixLen(len_str.to_string()))?;
                (addr, len)
            }
            None => (s, 32),
        };
        let addr: Ipv4Addr = addr_str
            .trim()
            .parse()
            .map_err(|_| IntentError::InvalidAddress(addr_str.to_string()))?;
        Self::new(addr, len)
    }
}

impl TryFrom<String> for Ipv4Prefix {
    type Error = IntentError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4Prefix> for String {
    fn from(p: Ipv4Prefix) -> Self {
        p.to_string()
    }
}

/// Which side of a packet the policy rule matches on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSelector {
    /// `ip rule add from <prefix>`
    #[default]
    From,
    /// `ip rule add to <prefix>`
    To,
}

impl fmt::Display for RuleSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From => f.write_str("from"),
            Self::To => f.write_str("to"),
        }
    }
}

impl FromStr for RuleSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "from" => Ok(Self::From),
            "to" => Ok(Self::To),
            other => Err(format!("unknown rule selector {other:?}, expected from or to")),
        }
    }
}

const MAX_TABLE_NAME: usize = 64;
const RESERVED_NAMES: &[&str] = &["unspec", "default", "main", "local"];

/// A validated routing intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkIntent {
    secondary_address: Ipv4Prefix,
    destination_cidr: Ipv4Prefix,
    table_id: u32,
    table_name: String,
    gateway: Ipv4Addr,
    rule_selector: RuleSelector,
    rule_priority: Option<u32>,
}

impl NetworkIntent {
    /// Validate and build an intent.
    ///
    /// `destination_cidr` is normalised to its network address.
    pub fn new(
        secondary_address: Ipv4Prefix,
        destination_cidr: Ipv4Prefix,
        table_id: u32,
        table_name: impl Into<String>,
        gateway: Ipv4Addr,
    ) -> std::result::Result<Self, IntentError> {
        let table_name = table_name.into();
        validate_table_id(table_id)?;
        validate_table_name(&table_name)?;
        if gateway.is_unspecified() {
            return Err(IntentError::UnspecifiedGateway);
        }

        Ok(Self {
            secondary_address,
            destination_cidr: destination_cidr.network(),
            table_id,
            table_name,
            gateway,
            rule_selector: RuleSelector::default(),
            rule_priority: None,
        })
    }

    pub fn with_rule_selector(mut self, selector: RuleSelector) -> Self {
        self.rule_selector = selector;
        self
    }

    pub fn with_rule_priority(mut self, priority: Option<u32>) -> Self {
        self.rule_priority = priority;
        self
    }

    pub fn secondary_address(&self) -> Ipv4Prefix {
        self.secondary_address
    }

    pub fn destination_cidr(&self) -> Ipv4Prefix {
        self.destination_cidr
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn rule_selector(&self) -> RuleSelector {
        self.rule_selector
    }

    pub fn rule_priority(&self) -> Option<u32> {
        self.rule_priority
    }

    /// Load an intent file. `.json` files are JSON, anything else is YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(IntentFile::load(path)?.into_intent()?)
    }

    /// Serialise to the YAML intent-file form.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&IntentFile::from(self))?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&IntentFile::from(self))?)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn validate_table_id(id: u32) -> std::result::Result<(), IntentError> {
    if id == rt_table::UNSPEC || id == u32::MAX {
        return Err(IntentError::TableIdOutOfRange(id));
    }
    if matches!(id, rt_table::DEFAULT | rt_table::MAIN | rt_table::LOCAL) {
        return Err(IntentError::ReservedTableId(id));
    }
    Ok(())
}

fn validate_table_name(name: &str) -> std::result::Result<(), IntentError> {
    let invalid = |reason| IntentError::InvalidTableName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_TABLE_NAME {
        return Err(invalid("name is longer than 64 bytes"));
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid("name starts with a digit"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(invalid("name contains characters other than [A-Za-z0-9_.-]"));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(invalid("name is reserved"));
    }
    Ok(())
}

/// Gateway as written in an intent file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GatewaySpec {
    Address(Ipv4Addr),
    /// Derive the gateway as the first host of the subnet.
    Subnet { subnet: Ipv4Prefix },
}

impl GatewaySpec {
    pub fn resolve(&self) -> std::result::Result<Ipv4Addr, IntentError> {
        match self {
            Self::Address(addr) => Ok(*addr),
            Self::Subnet { subnet } => subnet
                .first_host()
                .ok_or(IntentError::NoUsableHost(*subnet)),
        }
    }
}

/// The serialised form of an intent, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntentFile {
    pub secondary_address: Ipv4Prefix,
    pub destination_cidr: Ipv4Prefix,
    pub table_id: u32,
    pub table_name: String,
    pub gateway: GatewaySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_priority: Option<u32>,
}

impl IntentFile {
    /// Read an intent file without validating it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        if is_json(path) {
            Ok(serde_json::from_str(&text)?)
        } else {
            Ok(serde_yaml::from_str(&text)?)
        }
    }

    pub fn into_intent(self) -> std::result::Result<NetworkIntent, IntentError> {
        let gateway = self.gateway.resolve()?;
        Ok(NetworkIntent::new(
            self.secondary_address,
            self.destination_cidr,
            self.table_id,
            self.table_name,
            gateway,
        )?
        .with_rule_selector(self.rule.unwrap_or_default())
        .with_rule_priority(self.rule_priority))
    }

    /// A filled-in example used by `routeboot example`.
    pub fn example() -> Self {
        Self {
            secondary_address: Ipv4Prefix {
                addr: Ipv4Addr::new(10, 0, 0, 5),
                len: 24,
            },
            destination_cidr: Ipv4Prefix {
                addr: Ipv4Addr::new(10, 0, 0, 0),
                len: 24,
            },
            table_id: 200,
            table_name: "secondary".to_string(),
            gateway: GatewaySpec::Subnet {
                subnet: Ipv4Prefix {
                    addr: Ipv4Addr::new(10, 0, 1, 0),
                    len: 24,
                },
            },
            rule: Some(RuleSelector::From),
            rule_priority: None,
        }
    }
}

impl From<&NetworkIntent> for IntentFile {
    fn from(intent: &NetworkIntent) -> Self {
        Self {
            secondary_address: intent.secondary_address,
            destination_cidr: intent.destination_cidr,
            table_id: intent.table_id,
            table_name: intent.table_name.clone(),
            gateway: GatewaySpec::Address(intent.gateway),
            rule: Some(intent.rule_selector),
            rule_priority: intent.rule_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> Ipv4Prefix {
        s.parse().unwrap()
    }

    fn intent() -> NetworkIntent {
        NetworkIntent::new(
            prefix("10.0.0.5/24"),
            prefix("10.0.0.0/24"),
            200,
            "secondary",
            Ipv4Addr::new(10, 0, 1, 1),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_prefix() {
        let p = prefix("10.0.0.5/24");
        assert_eq!(p.addr(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(p.prefix_len(), 24);
        assert_eq!(p.network(), prefix("10.0.0.0/24"));
        assert_eq!(prefix("192.168.1.1").prefix_len(), 32);
        assert_eq!(prefix("0.0.0.0/0").mask(), 0);
    }

    #[test]
    fn test_parse_prefix_invalid() {
        assert!(matches!(
            "10.0.0.0/33".parse::<Ipv4Prefix>(),
            Err(IntentError::InvalidPrefixLen(_))
        ));
        assert!(matches!(
            "10.0.0/24".parse::<Ipv4Prefix>(),
            Err(IntentError::InvalidAddress(_))
        ));
        assert!("fe80::1/64".parse::<Ipv4Prefix>().is_err());
    }

    #[test]
    fn test_contains() {
        let net = prefix("10.0.0.0/24");
        assert!(net.contains(Ipv4Addr::new(10, 0, 0, 200)));
        assert!(!net.contains(Ipv4Addr::new(10, 0, 1, 1)));
        assert!(prefix("0.0.0.0/0").contains(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_first_host() {
        assert_eq!(
            prefix("10.0.1.0/24").first_host(),
            Some(Ipv4Addr::new(10, 0, 1, 1))
        );
        assert_eq!(
            prefix("10.0.1.77/20").first_host(),
            Some(Ipv4Addr::new(10, 0, 0, 1))
        );
        assert_eq!(prefix("10.0.1.0/31").first_host(), None);
    }

    #[test]
    fn test_destination_is_normalised() {
        let intent = NetworkIntent::new(
            prefix("10.0.0.5/24"),
            prefix("10.0.0.77/24"),
            200,
            "secondary",
            Ipv4Addr::new(10, 0, 1, 1),
        )
        .unwrap();
        assert_eq!(intent.destination_cidr(), prefix("10.0.0.0/24"));
        assert_eq!(intent.secondary_address(), prefix("10.0.0.5/24"));
        assert_eq!(intent.rule_selector(), RuleSelector::From);
    }

    #[test]
    fn test_reserved_table_ids() {
        for id in [0, 253, 254, 255, u32::MAX] {
            let err = NetworkIntent::new(
                prefix("10.0.0.5/24"),
                prefix("10.0.0.0/24"),
                id,
                "secondary",
                Ipv4Addr::new(10, 0, 1, 1),
            )
            .unwrap_err();
            assert!(matches!(
                err,
                IntentError::ReservedTableId(_) | IntentError::TableIdOutOfRange(_)
            ));
        }
    }

    #[test]
    fn test_table_name_validation() {
        let long = "x".repeat(65);
        for name in ["", "main", "1st", "has space", "tab\tname", long.as_str()] {
            let err = validate_table_name(name).unwrap_err();
            assert!(matches!(err, IntentError::InvalidTableName { .. }), "{name:?}");
        }
        for name in ["secondary", "az-b.uplink", "t_200"] {
            assert!(validate_table_name(name).is_ok(), "{name:?}");
        }
    }

    #[test]
    fn test_unspecified_gateway() {
        let err = NetworkIntent::new(
            prefix("10.0.0.5/24"),
            prefix("10.0.0.0/24"),
            200,
            "secondary",
            Ipv4Addr::UNSPECIFIED,
        )
        .unwrap_err();
        assert_eq!(err, IntentError::UnspecifiedGateway);
    }

    #[test]
    fn test_yaml_with_subnet_gateway() {
        let yaml = "\
secondary_address: 10.0.0.5/24
destination_cidr: 10.0.0.0/24
table_id: 200
table_name: secondary
gateway:
  subnet: 10.0.1.0/24
rule: to
rule_priority: 1000
";
        let file: IntentFile = serde_yaml::from_str(yaml).unwrap();
        let intent = file.into_intent().unwrap();
        assert_eq!(intent.gateway(), Ipv4Addr::new(10, 0, 1, 1));
        assert_eq!(intent.rule_selector(), RuleSelector::To);
        assert_eq!(intent.rule_priority(), Some(1000));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "\
secondary_address: 10.0.0.5/24
destination_cidr: 10.0.0.0/24
table_id: 200
table_name: secondary
gateway: 10.0.1.1
metric: 5
";
        assert!(serde_yaml::from_str::<IntentFile>(yaml).is_err());
    }

    #[test]
    fn test_load_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let original = intent().with_rule_priority(Some(500));

        let yaml_path = dir.path().join("intent.yaml");
        std::fs::write(&yaml_path, original.to_yaml().unwrap()).unwrap();
        assert_eq!(NetworkIntent::load(&yaml_path).unwrap(), original);

        let json_path = dir.path().join("intent.json");
        std::fs::write(&json_path, original.to_json().unwrap()).unwrap();
        assert_eq!(NetworkIntent::load(&json_path).unwrap(), original);
    }

    #[test]
    fn test_example_is_valid() {
        let intent = IntentFile::example().into_intent().unwrap();
        assert_eq!(intent, intent_with_gateway(Ipv4Addr::new(10, 0, 1, 1)));
    }

    fn intent_with_gateway(gw: Ipv4Addr) -> NetworkIntent {
        NetworkIntent::new(prefix("10.0.0.5/24"), prefix("10.0.0.0/24"), 200, "secondary", gw)
            .unwrap()
    }
}
