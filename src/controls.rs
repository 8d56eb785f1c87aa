//! LDAP dereference control, OID 1.3.6.1.4.1.4203.666.5.16
//!
//! Request value:
//!
//! ```text
//! DerefRequestControlValue ::= SEQUENCE OF SEQUENCE {
//!     derefAttr   AttributeDescription,
//!     attributes  AttributeList }
//! ```
//!
//! Response value:
//!
//! ```text
//! DerefResponseControlValue ::= SEQUENCE OF SEQUENCE {
//!     derefAttr   AttributeDescription,
//!     derefVal    LDAPDN,
//!     attrVals    [0] PartialAttributeList OPTIONAL }
//! ```

use std::fmt;

use bytes::Bytes;
use log::{debug, trace};
use rasn_ldap::Control;

use crate::{
    ber::{hex_dump, BerError, BerReader, BerWriter, TAG_CONTEXT_0, TAG_OCTET_STRING, TAG_SEQUENCE, TAG_SET},
    error::{Error, Result},
    model::{DerefAttribute, DerefResult, DereferencedAttributes, ExtendedValue},
    options::{is_extended, DereferenceSpec, ExtendedSpec},
};

/// Encode the request control value for a dereference spec.
/// Fails with [`Error::InvalidSpecification`] if the spec is empty
pub fn encode_request_value(spec: &DereferenceSpec) -> Result<Bytes> {
    spec.check()?;

    let mut writer = BerWriter::new();
    writer.begin_sequence();
    for (source, targets) in spec.iter() {
        writer.begin_sequence();
        writer.write_string(source);
        writer.begin_sequence();
        for target in targets {
            writer.write_string(target);
        }
        writer.end()?;
        writer.end()?;
    }
    writer.end()?;

    let value = writer.finish()?;
    debug!("Encoded dereference request for {} attribute(s): {} bytes", spec.len(), value.len());
    Ok(value)
}

/// Strictly decode a request control value
pub fn decode_request_value(data: &[u8]) -> Result<DereferenceSpec> {
    let mut reader = BerReader::new(data);
    let end = reader.read_nested(TAG_SEQUENCE, data.len())?;

    let mut spec = DereferenceSpec::new();
    while reader.position() < end {
        let item_end = reader.read_nested(TAG_SEQUENCE, end)?;
        let source = reader.read_string_within(item_end)?;

        let list_end = reader.read_nested(TAG_SEQUENCE, item_end)?;
        let mut targets = Vec::new();
        while reader.position() < list_end {
            targets.push(reader.read_string_within(list_end)?);
        }
        reader.skip_to(item_end)?;
        spec = spec.attribute(source, targets);
    }
    spec.check()?;
    Ok(spec)
}

/// Build the request control to attach to a search request
pub fn build_request_control(spec: &DereferenceSpec, critical: bool) -> Result<Control> {
    Ok(Control::new(
        DereferenceControl::OID.into(),
        critical,
        Some(encode_request_value(spec)?.to_vec().into()),
    ))
}

/// Dereference request control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DereferenceControl {
    spec: DereferenceSpec,
    critical: bool,
}

impl DereferenceControl {
    /// Control OID
    pub const OID: &'static [u8] = crate::oid::DEREFERENCE_CONTROL_OID;

    /// Create non-critical control for a given spec
    pub fn new(spec: DereferenceSpec) -> Self {
        Self { spec, critical: false }
    }

    /// Set control criticality
    pub fn with_critical(self, critical: bool) -> Self {
        Self { critical, ..self }
    }

    /// Return the dereference spec
    pub fn spec(&self) -> &DereferenceSpec {
        &self.spec
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }
}

impl TryFrom<DereferenceControl> for Control {
    type Error = Error;

    fn try_from(control: DereferenceControl) -> Result<Self> {
        build_request_control(&control.spec, control.critical)
    }
}

impl TryFrom<Control> for DereferenceControl {
    type Error = Error;

    fn try_from(control: Control) -> Result<Self> {
        if control.control_type != DereferenceControl::OID {
            return Err(Error::InvalidControl);
        }
        let value = control.control_value.ok_or(Error::InvalidControl)?;
        Ok(DereferenceControl {
            spec: decode_request_value(&value)?,
            critical: control.criticality,
        })
    }
}

/// Find the first control with the given OID
pub fn find_control<O: AsRef<[u8]>>(controls: &[Control], oid: O) -> Option<&Control> {
    let oid = oid.as_ref();
    controls.iter().find(|c| c.control_type == oid)
}

/// Reason the response decoder did not consume the whole value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// Decoding stopped, everything decoded before the offset is kept
    Stopped { offset: usize, error: BerError },
    /// Bytes left after the outer sequence
    TrailingData { offset: usize, len: usize },
}

impl DecodeWarning {
    /// Offset where decoding stopped
    pub fn offset(&self) -> usize {
        match self {
            DecodeWarning::Stopped { offset, .. } | DecodeWarning::TrailingData { offset, .. } => *offset,
        }
    }

    /// Returns true if the value was cut short rather than malformed
    pub fn is_truncated(&self) -> bool {
        matches!(self, DecodeWarning::Stopped { error, .. } if error.is_truncated())
    }
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeWarning::Stopped { offset, error } => {
                write!(f, "Dereference decoding stopped at offset {}: {}", offset, error)
            }
            DecodeWarning::TrailingData { offset, len } => {
                write!(f, "{} byte(s) of trailing data at offset {}", len, offset)
            }
        }
    }
}

/// Result of decoding a response control value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedResponse {
    /// References in server order, including the unresolved ones
    pub results: Vec<DerefResult>,
    /// Resolved values grouped by source and target attribute
    pub attributes: DereferencedAttributes,
    /// Empty when the whole value was decoded
    pub warnings: Vec<DecodeWarning>,
}

impl DecodedResponse {
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Decode a response control value. Never fails: malformed input yields the
/// references decoded before the problem together with a warning
pub fn decode_response_value(data: &[u8], extended: Option<&ExtendedSpec>) -> DecodedResponse {
    trace!("Dereference response value:\n{}", hex_dump(data));

    let mut results = Vec::new();
    let mut warnings = Vec::new();

    if !data.is_empty() {
        let mut reader = BerReader::new(data);
        match parse_results(&mut reader, &mut results) {
            Ok(()) if reader.remaining() > 0 => warnings.push(DecodeWarning::TrailingData {
                offset: reader.position(),
                len: reader.remaining(),
            }),
            Ok(()) => {}
            Err(error) => warnings.push(DecodeWarning::Stopped {
                offset: error.offset().unwrap_or_else(|| reader.position()),
                error,
            }),
        }
    }

    let attributes = collect_attributes(&results, extended);
    debug!(
        "Decoded {} dereferenced value(s) into {} attribute(s)",
        results.len(),
        attributes.len()
    );

    DecodedResponse {
        results,
        attributes,
        warnings,
    }
}

fn parse_results(reader: &mut BerReader, results: &mut Vec<DerefResult>) -> std::result::Result<(), BerError> {
    let len = reader.read_header(TAG_SEQUENCE)?;
    trace!("Response sequence of length {}", len);
    let end = reader.position().saturating_add(len);

    while reader.position() < end {
        let item_end = reader.read_nested(TAG_SEQUENCE, end)?;
        let source_attr = reader.read_string_within(item_end)?;
        let source_value = reader.read_string_within(item_end)?;
        trace!("Dereferenced {}: {}", source_attr, source_value);

        let mut result = DerefResult::new(source_attr, source_value);
        let parsed = if reader.position() < item_end && reader.peek_tag() == Some(TAG_CONTEXT_0) {
            parse_attribute_list(reader, &mut result, item_end)
        } else {
            trace!("No attributes returned for {}", result.source_value);
            Ok(())
        };
        results.push(result);
        parsed?;
        reader.skip_to(item_end)?;
    }
    Ok(())
}

fn parse_attribute_list(
    reader: &mut BerReader,
    result: &mut DerefResult,
    item_end: usize,
) -> std::result::Result<(), BerError> {
    let end = reader.read_nested(TAG_CONTEXT_0, item_end)?;
    let attributes = result.attributes.get_or_insert_with(Vec::new);

    while reader.position() < end {
        let attr_end = reader.read_nested(TAG_SEQUENCE, end)?;
        let mut attribute = DerefAttribute {
            name: reader.read_string_within(attr_end)?,
            values: Vec::new(),
        };
        let set_end = reader.read_nested(TAG_SET, attr_end)?;

        let mut parsed = Ok(());
        while reader.position() < set_end && reader.peek_tag() == Some(TAG_OCTET_STRING) {
            match reader.read_string_within(set_end) {
                Ok(value) => {
                    trace!("{}: {}", attribute.name, value);
                    attribute.values.push(value);
                }
                Err(e) => {
                    parsed = Err(e);
                    break;
                }
            }
        }
        attributes.push(attribute);
        parsed?;
        reader.skip_to(attr_end)?;
    }
    Ok(())
}

/// Group decoded references by source and target attribute, adding extended
/// values for the pairs selected by `extended`
pub fn collect_attributes(results: &[DerefResult], extended: Option<&ExtendedSpec>) -> DereferencedAttributes {
    let mut attributes = DereferencedAttributes::new();
    for result in results {
        for attr in result.attributes.iter().flatten() {
            let with_extended = is_extended(extended, &result.source_attr, &attr.name);
            for value in &attr.values {
                let extended_value = with_extended.then(|| ExtendedValue {
                    source_value: result.source_value.clone(),
                    value: value.clone(),
                });
                attributes.push(&result.source_attr, &attr.name, value.clone(), extended_value);
            }
        }
    }
    attributes
}

/// Locate the dereference control with the given OID and decode it.
/// Returns None if the server did not send the control
pub fn decode_response_control<O: AsRef<[u8]>>(
    oid: O,
    controls: &[Control],
    extended: Option<&ExtendedSpec>,
) -> Option<DecodedResponse> {
    find_control(controls, oid)
        .map(|control| decode_response_value(control.control_value.as_deref().unwrap_or(b""), extended))
}

/// Dereference response control, as produced by a server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DereferenceResponse {
    results: Vec<DerefResult>,
}

impl DereferenceResponse {
    /// Control OID
    pub const OID: &'static [u8] = crate::oid::DEREFERENCE_CONTROL_OID;

    pub fn new(results: Vec<DerefResult>) -> Self {
        Self { results }
    }

    pub fn results(&self) -> &[DerefResult] {
        &self.results
    }

    /// Encode the response control value
    pub fn encode(&self) -> Result<Bytes> {
        let mut writer = BerWriter::new();
        writer.begin_sequence();
        for result in &self.results {
            writer.begin_sequence();
            writer.write_string(&result.source_attr);
            writer.write_string(&result.source_value);
            if let Some(ref attributes) = result.attributes {
                writer.begin(TAG_CONTEXT_0);
                for attr in attributes {
                    writer.begin_sequence();
                    writer.write_string(&attr.name);
                    writer.begin_set();
                    for value in &attr.values {
                        writer.write_string(value);
                    }
                    writer.end()?;
                    writer.end()?;
                }
                writer.end()?;
            }
            writer.end()?;
        }
        writer.end()?;
        Ok(writer.finish()?)
    }
}

impl TryFrom<DereferenceResponse> for Control {
    type Error = Error;

    fn try_from(response: DereferenceResponse) -> Result<Self> {
        Ok(Control::new(
            DereferenceResponse::OID.into(),
            false,
            Some(response.encode()?.to_vec().into()),
        ))
    }
}
