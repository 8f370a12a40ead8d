//! Parameter encoding for the EC2 Query wire format.
//!
//! The Query API takes a flat, ordered set of string key/value pairs where
//! list and record structure is spelled out in the key itself (`ImageId.1`,
//! `Filter.2.Value.1`, `IpPermissions.1.IpRanges.1.CidrIp`). Everything in
//! this module is pure: arguments go in, wire parameters come out, nothing
//! touches the network.

use crate::error::{self, Result};

/// A single wire key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Parameter {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An ordered list of wire parameters under construction.
///
/// Order is preserved exactly as pushed; composite encodings rely on it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParamList {
    params: Vec<Parameter>,
}

impl ParamList {
    pub fn new() -> Self {
        ParamList { params: Vec::new() }
    }

    pub fn push<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params.push(Parameter::new(key, value));
    }

    /// Emits `Name=value`.
    pub fn scalar(&mut self, name: &str, value: &str) {
        self.push(name, value);
    }

    /// Emits `Name.1=v1 .. Name.n=vn`, 1-based, insertion order preserved.
    pub fn list(&mut self, name: &str, values: &[String]) {
        for (n, value) in values.iter().enumerate() {
            self.push(format!("{}.{}", name, n + 1), value.clone());
        }
    }

    /// Booleans go on the wire as the literal strings `true`/`false`.
    pub fn boolean(&mut self, name: &str, value: bool) {
        self.push(name, if value { "true" } else { "false" });
    }

    /// Emits `Filter.N.Name` / `Filter.N.Value.M` blocks. N and M are both
    /// 1-based and numbered independently per filter entry.
    pub fn filters(&mut self, filters: &[Filter]) {
        for (n, filter) in filters.iter().enumerate() {
            self.push(format!("Filter.{}.Name", n + 1), filter.name.clone());
            for (m, value) in filter.values.iter().enumerate() {
                self.push(
                    format!("Filter.{}.Value.{}", n + 1, m + 1),
                    value.clone(),
                );
            }
        }
    }

    /// Appends one composite record under `prefix`. An empty prefix emits
    /// the record's fields as top-level keys.
    pub fn fragment<F: QueryFragment>(&mut self, prefix: &str, fragment: &F) {
        fragment.append(prefix, self);
    }

    /// Appends a composite list as `Name.1.<Field> .. Name.n.<Field>`
    /// blocks. Each entry numbers its own inner lists from 1.
    pub fn fragment_list<F: QueryFragment>(&mut self, name: &str, entries: &[F]) {
        for (n, entry) in entries.iter().enumerate() {
            entry.append(&format!("{}.{}", name, n + 1), self);
        }
    }

    pub fn as_slice(&self) -> &[Parameter] {
        &self.params
    }

    pub fn into_vec(self) -> Vec<Parameter> {
        self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }
}

/// Joins a composite prefix with a field suffix, tolerating the empty
/// prefix used when a composite's fields sit at the top level.
fn keyed(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

/// One `Filter.N` entry: a filter name and its match values.
///
/// Filters are an ordered sequence of pairs rather than a map so that the
/// emitted parameter order is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new<N: Into<String>>(name: N, values: Vec<String>) -> Self {
        Filter {
            name: name.into(),
            values,
        }
    }
}

/// A composite wire record that owns its field-to-suffix mapping.
///
/// Inner lists (CIDR ranges inside a permission, values inside a DHCP
/// configuration) restart their numbering at 1 per entry, independent of
/// sibling entries.
pub trait QueryFragment {
    fn append(&self, prefix: &str, params: &mut ParamList);
}

/// A security group permission rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpPermission {
    pub ip_protocol: String,
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
    /// CIDR ranges, emitted as `IpRanges.M.CidrIp`.
    pub ip_ranges: Vec<String>,
    /// Peered security group ids, emitted as `Groups.M.GroupId`.
    pub group_ids: Vec<String>,
}

impl QueryFragment for IpPermission {
    fn append(&self, prefix: &str, params: &mut ParamList) {
        params.push(keyed(prefix, "IpProtocol"), self.ip_protocol.clone());
        if let Some(port) = self.from_port {
            params.push(keyed(prefix, "FromPort"), port.to_string());
        }
        if let Some(port) = self.to_port {
            params.push(keyed(prefix, "ToPort"), port.to_string());
        }
        for (m, cidr) in self.ip_ranges.iter().enumerate() {
            params.push(
                format!("{}.{}.CidrIp", keyed(prefix, "IpRanges"), m + 1),
                cidr.clone(),
            );
        }
        for (m, group_id) in self.group_ids.iter().enumerate() {
            params.push(
                format!("{}.{}.GroupId", keyed(prefix, "Groups"), m + 1),
                group_id.clone(),
            );
        }
    }
}

/// A block device mapping entry for image creation and registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDeviceMapping {
    pub device_name: String,
    pub virtual_name: Option<String>,
    pub ebs: Option<EbsBlockDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EbsBlockDevice {
    pub snapshot_id: Option<String>,
    pub volume_size: Option<i64>,
    pub volume_type: Option<String>,
    pub delete_on_termination: Option<bool>,
}

impl QueryFragment for BlockDeviceMapping {
    fn append(&self, prefix: &str, params: &mut ParamList) {
        params.push(keyed(prefix, "DeviceName"), self.device_name.clone());
        if let Some(virtual_name) = &self.virtual_name {
            params.push(keyed(prefix, "VirtualName"), virtual_name.clone());
        }
        if let Some(ebs) = &self.ebs {
            if let Some(snapshot_id) = &ebs.snapshot_id {
                params.push(keyed(prefix, "Ebs.SnapshotId"), snapshot_id.clone());
            }
            if let Some(size) = ebs.volume_size {
                params.push(keyed(prefix, "Ebs.VolumeSize"), size.to_string());
            }
            if let Some(volume_type) = &ebs.volume_type {
                params.push(keyed(prefix, "Ebs.VolumeType"), volume_type.clone());
            }
            if let Some(delete) = ebs.delete_on_termination {
                params.push(
                    keyed(prefix, "Ebs.DeleteOnTermination"),
                    if delete { "true" } else { "false" },
                );
            }
        }
    }
}

/// A network ACL rule. Used with an empty prefix: `CreateNetworkAclEntry`
/// takes the rule's fields as top-level parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAclEntry {
    pub rule_number: i64,
    pub protocol: String,
    /// `allow` or `deny`.
    pub rule_action: String,
    pub egress: bool,
    pub cidr_block: String,
    pub port_from: Option<i64>,
    pub port_to: Option<i64>,
}

impl QueryFragment for NetworkAclEntry {
    fn append(&self, prefix: &str, params: &mut ParamList) {
        params.push(keyed(prefix, "RuleNumber"), self.rule_number.to_string());
        params.push(keyed(prefix, "Protocol"), self.protocol.clone());
        params.push(keyed(prefix, "RuleAction"), self.rule_action.clone());
        params.push(
            keyed(prefix, "Egress"),
            if self.egress { "true" } else { "false" },
        );
        params.push(keyed(prefix, "CidrBlock"), self.cidr_block.clone());
        if let Some(from) = self.port_from {
            params.push(keyed(prefix, "PortRange.From"), from.to_string());
        }
        if let Some(to) = self.port_to {
            params.push(keyed(prefix, "PortRange.To"), to.to_string());
        }
    }
}

/// One DHCP option key with its value list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhcpConfiguration {
    pub key: String,
    pub values: Vec<String>,
}

impl QueryFragment for DhcpConfiguration {
    fn append(&self, prefix: &str, params: &mut ParamList) {
        params.push(keyed(prefix, "Key"), self.key.clone());
        for (m, value) in self.values.iter().enumerate() {
            params.push(
                format!("{}.{}", keyed(prefix, "Value"), m + 1),
                value.clone(),
            );
        }
    }
}

/// Option-name aliases: `(alias, canonical)` pairs consulted before
/// validation. When both names are supplied the canonical one wins and
/// nothing is emitted twice.
pub type AliasTable = &'static [(&'static str, &'static str)];

/// No aliasing; most operations use wire names directly.
pub const NO_ALIASES: AliasTable = &[];

/// Security group calls accept `Name`/`Description` as shorthand.
pub const SECURITY_GROUP_ALIASES: AliasTable = &[
    ("Name", "GroupName"),
    ("Description", "GroupDescription"),
];

/// The value bound to one option name.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Scalar(String),
    List(Vec<String>),
    Bool(bool),
    Filters(Vec<Filter>),
}

impl ArgValue {
    fn is_empty(&self) -> bool {
        match self {
            ArgValue::Scalar(s) => s.is_empty(),
            ArgValue::List(v) => v.is_empty(),
            ArgValue::Bool(_) => false,
            ArgValue::Filters(f) => f.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    name: String,
    value: ArgValue,
    /// Whether the caller used the canonical name (as opposed to an alias).
    canonical_supplied: bool,
}

/// A set of named call arguments, ordered by first insertion.
///
/// Aliases are resolved on insert, so by the time anything is encoded every
/// binding sits under its canonical name exactly once. Required-argument
/// validation happens in [`ArgumentSet::encode`], before any parameter is
/// produced.
#[derive(Debug, Clone)]
pub struct ArgumentSet {
    aliases: AliasTable,
    bindings: Vec<Binding>,
}

impl Default for ArgumentSet {
    fn default() -> Self {
        ArgumentSet::new()
    }
}

impl ArgumentSet {
    pub fn new() -> Self {
        ArgumentSet::with_aliases(NO_ALIASES)
    }

    pub fn with_aliases(aliases: AliasTable) -> Self {
        ArgumentSet {
            aliases,
            bindings: Vec::new(),
        }
    }

    fn canonical(&self, name: &str) -> String {
        for (alias, canonical) in self.aliases {
            if *alias == name {
                return (*canonical).to_string();
            }
        }
        name.to_string()
    }

    /// Binds `name` to `value`, resolving aliases first. A value supplied
    /// under the canonical name always beats one supplied under an alias,
    /// regardless of insertion order.
    pub fn insert(&mut self, name: &str, value: ArgValue) {
        let canonical = self.canonical(name);
        let is_canonical = canonical == name;
        if let Some(binding) = self.bindings.iter_mut().find(|b| b.name == canonical) {
            if binding.canonical_supplied && !is_canonical {
                return;
            }
            binding.value = value;
            binding.canonical_supplied = binding.canonical_supplied || is_canonical;
            return;
        }
        self.bindings.push(Binding {
            name: canonical,
            value,
            canonical_supplied: is_canonical,
        });
    }

    pub fn scalar<V: Into<String>>(&mut self, name: &str, value: V) {
        self.insert(name, ArgValue::Scalar(value.into()));
    }

    pub fn list(&mut self, name: &str, values: Vec<String>) {
        self.insert(name, ArgValue::List(values));
    }

    pub fn boolean(&mut self, name: &str, value: bool) {
        self.insert(name, ArgValue::Bool(value));
    }

    pub fn filters(&mut self, filters: Vec<Filter>) {
        self.insert("Filter", ArgValue::Filters(filters));
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        let canonical = self.canonical(name);
        self.bindings
            .iter()
            .find(|b| b.name == canonical)
            .map(|b| &b.value)
    }

    /// Validates the `required` options and encodes every binding, in
    /// insertion order, into `params`. Optional bindings that are empty
    /// emit nothing; a required option that is absent or empty fails with
    /// [`Error::MissingArgument`](crate::Error) before anything is emitted.
    pub fn encode_into(
        &self,
        operation: &'static str,
        required: &[&str],
        params: &mut ParamList,
    ) -> Result<()> {
        for option in required {
            let present = self
                .get(option)
                .map(|value| !value.is_empty())
                .unwrap_or(false);
            if !present {
                return error::MissingArgument {
                    option: (*option).to_string(),
                    operation,
                }
                .fail();
            }
        }
        for binding in &self.bindings {
            match &binding.value {
                ArgValue::Scalar(value) => {
                    if !value.is_empty() {
                        params.scalar(&binding.name, value);
                    }
                }
                ArgValue::List(values) => params.list(&binding.name, values),
                ArgValue::Bool(value) => params.boolean(&binding.name, *value),
                ArgValue::Filters(filters) => params.filters(filters),
            }
        }
        Ok(())
    }

    /// Like [`ArgumentSet::encode_into`] but starts a fresh parameter list.
    pub fn encode(&self, operation: &'static str, required: &[&str]) -> Result<ParamList> {
        let mut params = ParamList::new();
        self.encode_into(operation, required, &mut params)?;
        Ok(params)
    }
}
