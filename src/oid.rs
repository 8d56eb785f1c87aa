//! OID definitions

/// Dereference control, draft-masarati-ldap-deref
pub const DEREFERENCE_CONTROL_OID: &[u8] = b"1.3.6.1.4.1.4203.666.5.16";
