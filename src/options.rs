//! Dereference configuration

use std::{fmt, str::FromStr};

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;

static ATTRIBUTE_DESCRIPTION_RE: Lazy<Regex> = Lazy::new(|| {
    // unwrap is justified here by the constant expression
    Regex::new(r"^(?:[A-Za-z][A-Za-z0-9-]*|[0-9]+(?:\.[0-9]+)+)(?:;[A-Za-z0-9-]+)*$").unwrap()
});

fn is_attribute_description(name: &str) -> bool {
    ATTRIBUTE_DESCRIPTION_RE.is_match(name)
}

// Ordered source attribute -> target attributes table with case-insensitive keys
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct AttributeTable(Vec<(String, Vec<String>)>);

impl AttributeTable {
    fn insert<I, T>(&mut self, source: &str, targets: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let targets = targets.into_iter().map(|t| t.as_ref().to_owned()).collect();
        match self.0.iter_mut().find(|(s, _)| s.eq_ignore_ascii_case(source)) {
            Some((_, existing)) => *existing = targets,
            None => self.0.push((source.to_owned(), targets)),
        }
    }

    fn get(&self, source: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(source))
            .map(|(_, targets)| targets.as_slice())
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(s, t)| (s.as_str(), t.as_slice()))
    }

    // Text form: `source:target1,target2;source2:target3`
    fn parse(s: &str) -> Result<Self, Error> {
        let mut table = AttributeTable::default();
        for item in s.split(';').filter(|item| !item.is_empty()) {
            let (source, targets) = item
                .split_once(':')
                .ok_or_else(|| Error::InvalidSpecification(format!("missing ':' in '{}'", item)))?;
            table.insert(source, split_targets(targets));
        }
        Ok(table)
    }
}

/// Split a comma-separated attribute list. Names are not trimmed, empty names are dropped
pub(crate) fn split_targets(csv: &str) -> impl Iterator<Item = &str> {
    csv.split(',').filter(|name| !name.is_empty())
}

/// Attributes to dereference: source attribute name mapped to the attributes
/// to return from the entry it references. Entries keep insertion order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DereferenceSpec(AttributeTable);

impl DereferenceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dereference `source` and return `targets` of the referenced entry.
    /// Replaces targets of an existing source with the same name, ignoring case
    pub fn attribute<S, I, T>(mut self, source: S, targets: I) -> Self
    where
        S: AsRef<str>,
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.0.insert(source.as_ref(), targets);
        self
    }

    /// Same as [`DereferenceSpec::attribute`] with a comma-separated target list
    pub fn attribute_csv<S: AsRef<str>, C: AsRef<str>>(self, source: S, targets: C) -> Self {
        let targets = split_targets(targets.as_ref()).collect::<Vec<_>>();
        self.attribute(source, targets)
    }

    /// Targets requested for a source attribute
    pub fn targets(&self, source: &str) -> Option<&[String]> {
        self.0.get(source)
    }

    /// Iterate over (source, targets) in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0 .0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0 .0.is_empty()
    }

    /// Check the spec can be sent to the server
    pub fn check(&self) -> Result<(), Error> {
        if self.is_empty() {
            return Err(Error::InvalidSpecification("no attributes to dereference".to_owned()));
        }
        for (source, targets) in self.iter() {
            if source.is_empty() {
                return Err(Error::InvalidSpecification("empty source attribute name".to_owned()));
            }
            if targets.is_empty() {
                return Err(Error::InvalidSpecification(format!(
                    "no target attributes for '{}'",
                    source
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for DereferenceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeTable::parse(s).map(DereferenceSpec)
    }
}

/// Source/target pairs whose values are also reported together with the value of the reference
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtendedSpec(AttributeTable);

impl ExtendedSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `targets` of `source` in extended form
    pub fn attribute<S, I, T>(mut self, source: S, targets: I) -> Self
    where
        S: AsRef<str>,
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.0.insert(source.as_ref(), targets);
        self
    }

    /// Iterate over (source, targets) in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter()
    }

    /// Returns true if the pair is listed, ignoring case on both names
    pub fn matches(&self, source: &str, target: &str) -> bool {
        self.0
            .get(source)
            .map(|targets| targets.iter().any(|t| t.eq_ignore_ascii_case(target)))
            .unwrap_or(false)
    }
}

impl FromStr for ExtendedSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeTable::parse(s).map(ExtendedSpec)
    }
}

/// Extended correlation check, false when no extended spec is configured
pub fn is_extended(spec: Option<&ExtendedSpec>, source: &str, target: &str) -> bool {
    spec.map(|spec| spec.matches(source, target)).unwrap_or(false)
}

/// Configuration problem which does not prevent dereferencing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Dereferencing is enabled but nothing is configured to dereference
    NoDereferenceAttributes,
    /// Extended source attribute is not dereferenced at all
    ExtendedWithoutDereference { source_attr: String },
    /// Extended target attribute is not among the requested targets
    ExtendedTargetNotRequested { source_attr: String, target_attr: String },
    /// Name is not a valid attribute description and will likely not match anything
    InvalidAttributeName { name: String },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::NoDereferenceAttributes => {
                write!(f, "No dereference attributes set, dereferencing will not be used")
            }
            ConfigWarning::ExtendedWithoutDereference { source_attr } => write!(
                f,
                "Extended attribute '{}' is not dereferenced, it will be ignored",
                source_attr
            ),
            ConfigWarning::ExtendedTargetNotRequested {
                source_attr,
                target_attr,
            } => write!(
                f,
                "Extended attribute '{}' is not among the dereferenced attributes of '{}', it will be ignored",
                target_attr, source_attr
            ),
            ConfigWarning::InvalidAttributeName { name } => write!(f, "Invalid attribute name: '{}'", name),
        }
    }
}

/// Dereference options
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DereferenceOptions {
    pub(crate) dereference: Option<DereferenceSpec>,
    pub(crate) extended: Option<ExtendedSpec>,
    pub(crate) critical: bool,
    pub(crate) enabled: bool,
    pub(crate) binary_attributes: Vec<String>,
}

impl Default for DereferenceOptions {
    fn default() -> Self {
        Self {
            dereference: None,
            extended: None,
            critical: false,
            enabled: true,
            binary_attributes: Vec::new(),
        }
    }
}

impl DereferenceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set attributes to dereference
    pub fn dereference(mut self, spec: DereferenceSpec) -> Self {
        self.dereference = Some(spec);
        self
    }

    /// Set pairs to report in extended form
    pub fn extended(mut self, spec: ExtendedSpec) -> Self {
        self.extended = Some(spec);
        self
    }

    /// Mark the request control as critical. Default is non-critical
    pub fn critical(mut self, flag: bool) -> Self {
        self.critical = flag;
        self
    }

    /// Enable or disable dereferencing. When disabled no control is sent
    /// and callers are expected to resolve references with secondary searches.
    /// By default dereferencing is enabled.
    pub fn enabled(mut self, flag: bool) -> Self {
        self.enabled = flag;
        self
    }

    /// Attributes whose values are kept as raw bytes
    pub fn binary_attributes<I, T>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.binary_attributes = attributes.into_iter().map(|a| a.as_ref().to_owned()).collect();
        self
    }

    pub fn dereference_spec(&self) -> Option<&DereferenceSpec> {
        self.dereference.as_ref()
    }

    pub fn extended_spec(&self) -> Option<&ExtendedSpec> {
        self.extended.as_ref()
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn binary_attribute_names(&self) -> &[String] {
        &self.binary_attributes
    }

    /// Check configuration consistency. Every returned warning is also logged
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        match self.dereference {
            Some(ref spec) if !spec.is_empty() => {
                for (source, targets) in spec.iter() {
                    for name in std::iter::once(source).chain(targets.iter().map(String::as_str)) {
                        if !is_attribute_description(name) {
                            warnings.push(ConfigWarning::InvalidAttributeName { name: name.to_owned() });
                        }
                    }
                }
            }
            _ if self.enabled => warnings.push(ConfigWarning::NoDereferenceAttributes),
            _ => {}
        }

        if let (Some(deref), Some(extended)) = (&self.dereference, &self.extended) {
            for (source, targets) in extended.iter() {
                match deref.targets(source) {
                    None => warnings.push(ConfigWarning::ExtendedWithoutDereference {
                        source_attr: source.to_owned(),
                    }),
                    Some(requested) => {
                        for target in targets {
                            if !requested.iter().any(|r| r.eq_ignore_ascii_case(target)) {
                                warnings.push(ConfigWarning::ExtendedTargetNotRequested {
                                    source_attr: source.to_owned(),
                                    target_attr: target.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }

        for warning in &warnings {
            warn!("{}", warning);
        }
        warnings
    }
}
