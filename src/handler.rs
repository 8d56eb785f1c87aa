//! Dereference search result handling

use std::collections::BTreeMap;

use log::{debug, warn};
use rasn_ldap::{Control, SearchResultEntry};

use crate::{
    controls::{build_request_control, decode_response_control, DecodedResponse, DereferenceResponse},
    error::{Error, Result},
    merge::merge_entries,
    model::{AttributeValues, DereferencedAttributes, SearchEntry},
    options::DereferenceOptions,
};

/// Outcome of one dereference search
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DereferenceResult {
    /// Requesting entry merged with the entries returned for the references
    pub entry: SearchEntry,
    /// Decoded response control, None if the server did not return one
    pub dereferenced: Option<DecodedResponse>,
}

impl DereferenceResult {
    /// Returns true if the server returned the dereference control
    pub fn is_dereferenced(&self) -> bool {
        self.dereferenced.is_some()
    }

    /// Dereferenced attributes, if any
    pub fn attributes(&self) -> Option<&DereferencedAttributes> {
        self.dereferenced.as_ref().map(|d| &d.attributes)
    }

    /// Text attributes of the merged entry together with the dereferenced
    /// `<source>.<target>` and `<source>.<target>.extended` values.
    /// Binary attributes are left out
    pub fn attribute_map(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for attr in &self.entry.attributes {
            if let AttributeValues::Text(ref values) = attr.values {
                map.entry(attr.name.clone()).or_default().extend(values.iter().cloned());
            }
        }

        if let Some(attributes) = self.attributes() {
            for (key, values) in attributes.to_flat_map() {
                map.entry(key).or_default().extend(values);
            }
        }
        map
    }
}

/// Builds the request control and processes search responses for one configuration
#[derive(Clone, Debug, Default)]
pub struct DereferenceHandler {
    options: DereferenceOptions,
}

impl DereferenceHandler {
    pub fn new(options: DereferenceOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DereferenceOptions {
        &self.options
    }

    /// Control to attach to the search request, None when dereferencing is disabled
    pub fn request_control(&self) -> Result<Option<Control>> {
        if !self.options.enabled {
            debug!("Dereferencing disabled, no request control created");
            return Ok(None);
        }
        let spec = self
            .options
            .dereference
            .as_ref()
            .ok_or_else(|| Error::InvalidSpecification("no dereference attributes configured".to_owned()))?;
        build_request_control(spec, self.options.critical).map(Some)
    }

    /// Convert protocol entries, keeping the configured binary attributes as bytes
    pub fn convert_entries<I>(&self, entries: I) -> Vec<SearchEntry>
    where
        I: IntoIterator<Item = SearchResultEntry>,
    {
        entries
            .into_iter()
            .map(|raw| SearchEntry::from_raw(raw, &self.options.binary_attributes))
            .collect()
    }

    /// Merge the entries of one search response and decode its dereference control
    pub fn process<I>(&self, entries: I, controls: &[Control]) -> DereferenceResult
    where
        I: IntoIterator<Item = SearchEntry>,
    {
        let entry = merge_entries(entries);
        let dereferenced = decode_response_control(DereferenceResponse::OID, controls, self.options.extended.as_ref());

        match dereferenced {
            Some(ref decoded) => {
                for warning in &decoded.warnings {
                    warn!("{}, returning partial dereference results", warning);
                }
            }
            None if self.options.enabled => {
                warn!("No dereference control found in the response, returning non-dereferenced attributes")
            }
            None => {}
        }

        DereferenceResult { entry, dereferenced }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        controls::DereferenceControl,
        model::{Attribute, DerefAttribute, DerefResult},
        options::{DereferenceSpec, ExtendedSpec},
    };

    fn options() -> DereferenceOptions {
        DereferenceOptions::new()
            .dereference(DereferenceSpec::new().attribute_csv("manager", "cn,mail"))
            .extended(ExtendedSpec::new().attribute("manager", ["cn"]))
    }

    fn entries() -> Vec<SearchEntry> {
        vec![
            SearchEntry::new("uid=alice,dc=x")
                .with_attribute(Attribute::text("uid", ["alice"]))
                .with_attribute(Attribute::text("manager", ["uid=bob,dc=x"]))
                .with_attribute(Attribute::binary("jpegPhoto", [vec![0xffu8, 0xd8]])),
            SearchEntry::new("uid=bob,dc=x").with_attribute(Attribute::text("uid", ["bob"])),
        ]
    }

    fn response_controls() -> Vec<Control> {
        let response = DereferenceResponse::new(vec![DerefResult::new("manager", "uid=bob,dc=x")
            .with_attribute(DerefAttribute::new("cn", ["Bob"]))
            .with_attribute(DerefAttribute::new("mail", ["bob@x"]))]);
        vec![Control::try_from(response).unwrap()]
    }

    #[test]
    fn test_request_control() {
        let control = DereferenceHandler::new(options()).request_control().unwrap().unwrap();
        assert!(!control.criticality);
        let parsed = DereferenceControl::try_from(control).unwrap();
        assert_eq!(parsed.spec().targets("manager").unwrap(), ["cn", "mail"]);

        let disabled = DereferenceHandler::new(options().enabled(false));
        assert_eq!(disabled.request_control(), Ok(None));

        let missing = DereferenceHandler::new(DereferenceOptions::new());
        assert!(matches!(missing.request_control(), Err(Error::InvalidSpecification(_))));
    }

    #[test]
    fn test_process_with_control() {
        let result = DereferenceHandler::new(options()).process(entries(), &response_controls());
        assert!(result.is_dereferenced());
        assert_eq!(result.entry.dn, "uid=alice,dc=x");
        assert_eq!(result.attributes().unwrap().values("manager", "cn").unwrap(), ["Bob"]);

        let map = result.attribute_map();
        assert_eq!(map["uid"], ["alice", "bob"]);
        assert_eq!(map["manager"], ["uid=bob,dc=x"]);
        assert_eq!(map["manager.cn"], ["Bob"]);
        assert_eq!(map["manager.mail"], ["bob@x"]);
        assert_eq!(map["manager.cn.extended"], ["uid=bob,dc=x;Bob"]);
        assert!(!map.contains_key("jpegPhoto"));
    }

    #[test]
    fn test_process_without_control() {
        let result = DereferenceHandler::new(options()).process(entries(), &[]);
        assert!(!result.is_dereferenced());
        assert!(result.attributes().is_none());

        let map = result.attribute_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["uid"], ["alice", "bob"]);
    }

    #[test]
    fn test_process_partial_control() {
        let mut controls = response_controls();
        let value = controls[0].control_value.take().unwrap();
        controls[0].control_value = Some(value[..value.len() - 3].to_vec().into());

        let result = DereferenceHandler::new(options()).process(entries(), &controls);
        let decoded = result.dereferenced.as_ref().unwrap();
        assert!(!decoded.is_complete());
        assert_eq!(result.attribute_map()["manager.cn"], ["Bob"]);
    }

    #[test]
    fn test_process_empty_response() {
        let result = DereferenceHandler::default().process(Vec::new(), &[]);
        assert_eq!(result, DereferenceResult::default());
        assert!(result.attribute_map().is_empty());
    }
}
