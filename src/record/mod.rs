//! Record layer.
//!
//! Header validation lives here, the cryptographic transform of record
//! payloads in [`protection`] and the per connection keys, sequence
//! numbers and packet queue in [`state`]. Outgoing records are assembled
//! by the [`MessageBuilder`](crate::builder::MessageBuilder).

mod protection;
mod queue;
mod state;

pub(crate) use protection::{mac_header, OpenParams, Protection};
pub(crate) use queue::{HeldRecord, QueueRx};
pub(crate) use state::{ReadKeys, RecordLayer, WriteShape};

use crate::codec::RecordHeader;
use crate::types::ProtocolVersion;
use crate::Error;

/// Ciphertext may exceed the plaintext limit by this much.
pub const CIPHERTEXT_EXPANSION: usize = 2048;

/// Which record versions are acceptable.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VersionPolicy {
    /// Negotiated version. Once set, records must carry exactly this.
    pub negotiated: Option<ProtocolVersion>,
    /// Highest version we offer or accept.
    pub max: ProtocolVersion,
    /// Lowest version we accept.
    pub min: ProtocolVersion,
    pub allow_downgrade: bool,
}

impl VersionPolicy {
    /// Check the version of an incoming record.
    ///
    /// Before negotiation a record may carry the configured maximum, the
    /// family base version used for initial hellos, or (when downgrade is
    /// allowed) the version one step below the maximum, never under `min`.
    pub fn accepts(&self, version: ProtocolVersion) -> bool {
        if let Some(v) = self.negotiated {
            return version == v;
        }
        if !version.same_family(self.max) {
            return false;
        }
        if version == self.max || version == self.max.hello_record_version() {
            return true;
        }
        self.allow_downgrade
            && self.max.one_step_down() == Some(version)
            && version.at_least(self.min)
    }
}

/// Validate a decoded record header.
///
/// `encrypted` is whether the read direction currently has protection on,
/// which allows for cipher expansion in the length.
pub(crate) fn validate_header(
    header: &RecordHeader,
    policy: &VersionPolicy,
    max_fragment: usize,
    encrypted: bool,
) -> Result<(), Error> {
    if !policy.accepts(header.version) {
        return Err(Error::BadRecordVersion(header.version));
    }

    let mut limit = max_fragment;
    if encrypted {
        limit += CIPHERTEXT_EXPANSION;
    }
    let length = header.length as usize;
    if length > limit {
        return Err(Error::RecordOverflow(length));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentType;

    fn policy(negotiated: Option<ProtocolVersion>) -> VersionPolicy {
        VersionPolicy {
            negotiated,
            max: ProtocolVersion::TLS1_2,
            min: ProtocolVersion::TLS1_1,
            allow_downgrade: true,
        }
    }

    fn header(version: ProtocolVersion, length: u16) -> RecordHeader {
        RecordHeader {
            content_type: ContentType::Handshake,
            version,
            epoch: 0,
            sequence: 0,
            length,
        }
    }

    #[test]
    fn one_step_downgrade_only() {
        let p = policy(None);
        assert!(p.accepts(ProtocolVersion::TLS1_2));
        assert!(p.accepts(ProtocolVersion::TLS1_1));
        // Initial hello record version
        assert!(p.accepts(ProtocolVersion::TLS1_0));
        assert!(!p.accepts(ProtocolVersion::DTLS1_2));
        assert!(!p.accepts(ProtocolVersion::Unknown(0x0304)));

        let strict = VersionPolicy {
            allow_downgrade: false,
            ..p
        };
        assert!(!strict.accepts(ProtocolVersion::TLS1_1));
    }

    #[test]
    fn downgrade_never_below_floor() {
        let p = VersionPolicy {
            negotiated: None,
            max: ProtocolVersion::TLS1_2,
            min: ProtocolVersion::TLS1_2,
            allow_downgrade: true,
        };
        assert!(!p.accepts(ProtocolVersion::TLS1_1));
    }

    #[test]
    fn negotiated_version_is_exact() {
        let p = policy(Some(ProtocolVersion::TLS1_1));
        assert!(p.accepts(ProtocolVersion::TLS1_1));
        assert!(!p.accepts(ProtocolVersion::TLS1_2));
    }

    #[test]
    fn length_limits() {
        let p = policy(None);
        assert!(validate_header(&header(ProtocolVersion::TLS1_2, 16384), &p, 16384, false).is_ok());
        assert!(matches!(
            validate_header(&header(ProtocolVersion::TLS1_2, 16385), &p, 16384, false),
            Err(Error::RecordOverflow(16385))
        ));
        assert!(validate_header(&header(ProtocolVersion::TLS1_2, 16385), &p, 16384, true).is_ok());
        assert!(matches!(
            validate_header(&header(ProtocolVersion::TLS1_0, 10), &policy(Some(ProtocolVersion::TLS1_2)), 16384, false),
            Err(Error::BadRecordVersion(_))
        ));
    }
}
