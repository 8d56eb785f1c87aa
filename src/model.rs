//! Data structures

use std::{collections::BTreeMap, fmt};

use bytes::Bytes;

/// Values of one attribute. An attribute holds either text or binary values, never both
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeValues {
    Text(Vec<String>),
    Binary(Vec<Bytes>),
}

impl AttributeValues {
    /// Number of values
    pub fn len(&self) -> usize {
        match self {
            AttributeValues::Text(values) => values.len(),
            AttributeValues::Binary(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, AttributeValues::Binary(_))
    }

    /// Text values, or None for a binary attribute
    pub fn as_text(&self) -> Option<&[String]> {
        match self {
            AttributeValues::Text(values) => Some(values),
            AttributeValues::Binary(_) => None,
        }
    }

    /// Binary values, or None for a text attribute
    pub fn as_binary(&self) -> Option<&[Bytes]> {
        match self {
            AttributeValues::Binary(values) => Some(values),
            AttributeValues::Text(_) => None,
        }
    }

    /// Append values, converting them to the kind of `self` when they differ
    pub fn append(&mut self, other: AttributeValues) {
        match (self, other) {
            (AttributeValues::Text(values), AttributeValues::Text(other)) => values.extend(other),
            (AttributeValues::Binary(values), AttributeValues::Binary(other)) => values.extend(other),
            (AttributeValues::Text(values), AttributeValues::Binary(other)) => {
                values.extend(other.iter().map(|v| String::from_utf8_lossy(v).into_owned()))
            }
            (AttributeValues::Binary(values), AttributeValues::Text(other)) => {
                values.extend(other.into_iter().map(Bytes::from))
            }
        }
    }
}

/// LDAP attribute definition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Attribute values
    pub values: AttributeValues,
}

impl Attribute {
    /// Create a text attribute
    pub fn text<N, I, V>(name: N, values: I) -> Self
    where
        N: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        Self {
            name: name.as_ref().to_owned(),
            values: AttributeValues::Text(values.into_iter().map(|v| v.as_ref().to_owned()).collect()),
        }
    }

    /// Create a binary attribute
    pub fn binary<N, I, V>(name: N, values: I) -> Self
    where
        N: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: Into<Bytes>,
    {
        Self {
            name: name.as_ref().to_owned(),
            values: AttributeValues::Binary(values.into_iter().map(Into::into).collect()),
        }
    }
}

pub type Attributes = Vec<Attribute>;

fn is_binary_attribute<S: AsRef<str>>(name: &str, binary_attributes: &[S]) -> bool {
    name.split(';').skip(1).any(|option| option.eq_ignore_ascii_case("binary"))
        || binary_attributes.iter().any(|b| b.as_ref().eq_ignore_ascii_case(name))
}

/// Search result entry. Also used for the merged entry of one dereference search
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchEntry {
    /// Distinguished name
    pub dn: String,
    /// Entry attributes in server order
    pub attributes: Attributes,
}

impl SearchEntry {
    pub fn new<S: AsRef<str>>(dn: S) -> Self {
        Self {
            dn: dn.as_ref().to_owned(),
            attributes: Vec::new(),
        }
    }

    /// Add attribute to the entry
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Find attribute by name, ignoring case
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub(crate) fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Returns true for an entry without DN and attributes
    pub fn is_empty(&self) -> bool {
        self.dn.is_empty() && self.attributes.is_empty()
    }

    /// Convert a protocol entry. Attributes named in `binary_attributes` or carrying
    /// the `;binary` option keep raw values, all others are decoded as UTF-8
    pub fn from_raw<S: AsRef<str>>(raw: rasn_ldap::SearchResultEntry, binary_attributes: &[S]) -> Self {
        let attributes = raw
            .attributes
            .into_iter()
            .map(|attr| {
                let name = String::from_utf8_lossy(attr.r#type.as_bytes()).into_owned();
                let vals = attr.vals.to_vec();
                let values = if is_binary_attribute(&name, binary_attributes) {
                    AttributeValues::Binary(vals.iter().map(|v| Bytes::copy_from_slice(v)).collect())
                } else {
                    AttributeValues::Text(vals.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect())
                };
                Attribute { name, values }
            })
            .collect();

        Self {
            dn: raw.object_name.to_string(),
            attributes,
        }
    }
}

impl From<rasn_ldap::SearchResultEntry> for SearchEntry {
    fn from(raw: rasn_ldap::SearchResultEntry) -> Self {
        SearchEntry::from_raw::<&str>(raw, &[])
    }
}

/// One reference returned by the server in the dereference response control
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DerefResult {
    /// Name of the dereferenced attribute, e.g. `manager`
    pub source_attr: String,
    /// Value of the dereferenced attribute, usually a DN
    pub source_value: String,
    /// Attributes of the referenced entry. None if the server returned no attribute list
    pub attributes: Option<Vec<DerefAttribute>>,
}

impl DerefResult {
    pub fn new<A: AsRef<str>, V: AsRef<str>>(source_attr: A, source_value: V) -> Self {
        Self {
            source_attr: source_attr.as_ref().to_owned(),
            source_value: source_value.as_ref().to_owned(),
            attributes: None,
        }
    }

    /// Add an attribute of the referenced entry
    pub fn with_attribute(mut self, attribute: DerefAttribute) -> Self {
        self.attributes.get_or_insert_with(Vec::new).push(attribute);
        self
    }
}

/// Attribute of a referenced entry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DerefAttribute {
    pub name: String,
    pub values: Vec<String>,
}

impl DerefAttribute {
    pub fn new<N, I, V>(name: N, values: I) -> Self
    where
        N: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        Self {
            name: name.as_ref().to_owned(),
            values: values.into_iter().map(|v| v.as_ref().to_owned()).collect(),
        }
    }
}

/// Dereferenced value tagged with the value of the reference it came from.
/// Displayed as `<source value>;<value>`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtendedValue {
    pub source_value: String,
    pub value: String,
}

impl fmt::Display for ExtendedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.source_value, self.value)
    }
}

/// Values collected for one (source attribute, target attribute) pair
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DereferencedValues {
    source_attr: String,
    target_attr: String,
    values: Vec<String>,
    extended: Vec<ExtendedValue>,
}

impl DereferencedValues {
    /// Source attribute name as first returned by the server
    pub fn source_attr(&self) -> &str {
        &self.source_attr
    }

    /// Target attribute name as first returned by the server
    pub fn target_attr(&self) -> &str {
        &self.target_attr
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Values correlated with their reference. Empty unless extended mode matched this pair
    pub fn extended(&self) -> &[ExtendedValue] {
        &self.extended
    }

    /// Composite key `<source>.<target>`
    pub fn key(&self) -> String {
        format!("{}.{}", self.source_attr, self.target_attr)
    }

    /// Composite key `<source>.<target>.extended`
    pub fn extended_key(&self) -> String {
        format!("{}.{}.extended", self.source_attr, self.target_attr)
    }
}

/// Attributes resolved by the server, grouped by source attribute then target attribute.
/// Lookups ignore case
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DereferencedAttributes {
    sources: BTreeMap<String, BTreeMap<String, DereferencedValues>>,
}

impl DereferencedAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, source_attr: &str, target_attr: &str, value: String, extended: Option<ExtendedValue>) {
        let entry = self
            .sources
            .entry(source_attr.to_ascii_lowercase())
            .or_default()
            .entry(target_attr.to_ascii_lowercase())
            .or_insert_with(|| DereferencedValues {
                source_attr: source_attr.to_owned(),
                target_attr: target_attr.to_owned(),
                ..Default::default()
            });
        entry.values.push(value);
        entry.extended.extend(extended);
    }

    /// Values and extended values for a pair
    pub fn get(&self, source_attr: &str, target_attr: &str) -> Option<&DereferencedValues> {
        self.sources
            .get(&source_attr.to_ascii_lowercase())
            .and_then(|targets| targets.get(&target_attr.to_ascii_lowercase()))
    }

    /// Values resolved for a pair
    pub fn values(&self, source_attr: &str, target_attr: &str) -> Option<&[String]> {
        self.get(source_attr, target_attr).map(DereferencedValues::values)
    }

    /// Extended values for a pair, None if extended mode did not match it
    pub fn extended(&self, source_attr: &str, target_attr: &str) -> Option<&[ExtendedValue]> {
        self.get(source_attr, target_attr)
            .map(DereferencedValues::extended)
            .filter(|v| !v.is_empty())
    }

    /// Iterate over all pairs
    pub fn iter(&self) -> impl Iterator<Item = &DereferencedValues> {
        self.sources.values().flat_map(|targets| targets.values())
    }

    /// Number of (source, target) pairs
    pub fn len(&self) -> usize {
        self.sources.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Flatten to `<source>.<target>` and `<source>.<target>.extended` keys
    pub fn to_flat_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        for values in self.iter() {
            map.insert(values.key(), values.values.clone());
            if !values.extended.is_empty() {
                map.insert(
                    values.extended_key(),
                    values.extended.iter().map(ToString::to_string).collect(),
                );
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_converts_kind() {
        let mut text = AttributeValues::Text(vec!["a".to_owned()]);
        text.append(AttributeValues::Binary(vec![Bytes::from_static(b"b")]));
        assert_eq!(text, AttributeValues::Text(vec!["a".to_owned(), "b".to_owned()]));

        let mut binary = AttributeValues::Binary(vec![Bytes::from_static(&[0xff])]);
        binary.append(AttributeValues::Text(vec!["c".to_owned()]));
        assert_eq!(
            binary.as_binary().unwrap(),
            &[Bytes::from_static(&[0xff]), Bytes::from_static(b"c")]
        );
    }

    #[test]
    fn test_binary_attribute_detection() {
        assert!(is_binary_attribute("jpegPhoto", &["JPEGPHOTO"]));
        assert!(is_binary_attribute("userCertificate;binary", &[] as &[&str]));
        assert!(!is_binary_attribute("cn", &["jpegPhoto"]));
    }

    #[test]
    fn test_entry_attribute_lookup_ignores_case() {
        let entry = SearchEntry::new("uid=alice,dc=example,dc=com").with_attribute(Attribute::text("mail", ["a@x"]));
        assert!(entry.attribute("MAIL").is_some());
        assert!(entry.attribute("cn").is_none());
        assert!(!entry.is_empty());
        assert!(SearchEntry::default().is_empty());
    }

    #[test]
    fn test_dereferenced_attributes() {
        let mut attrs = DereferencedAttributes::new();
        attrs.push("manager", "cn", "Bob".to_owned(), None);
        attrs.push(
            "Manager",
            "CN",
            "Robert".to_owned(),
            Some(ExtendedValue {
                source_value: "uid=bob".to_owned(),
                value: "Robert".to_owned(),
            }),
        );
        attrs.push("owner", "mail", "o@x".to_owned(), None);

        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.values("MANAGER", "cn").unwrap(), ["Bob", "Robert"]);
        assert_eq!(attrs.extended("manager", "cn").unwrap()[0].to_string(), "uid=bob;Robert");
        assert!(attrs.extended("owner", "mail").is_none());
        assert!(attrs.values("owner", "cn").is_none());

        let flat = attrs.to_flat_map();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat["manager.cn"], ["Bob", "Robert"]);
        assert_eq!(flat["manager.cn.extended"], ["uid=bob;Robert"]);
        assert_eq!(flat["owner.mail"], ["o@x"]);
    }
}
