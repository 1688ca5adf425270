use thiserror::Error;

use crate::types::{AlertDescription, ContentType, HandshakeType, ProtocolVersion};

/// Errors surfaced by the connection engine.
///
/// Every error raised while processing input or producing output is fatal for
/// the connection, apart from the ones that DTLS silently absorbs (bad MAC,
/// replays, stale epochs). Those never leave the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Not enough bytes to decode the structure. Internal signal for stream
    /// transports, never returned from the public API.
    #[error("Incomplete data")]
    IncompleteData,

    /// A length or field failed to decode.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Record content type is not one of the four known types.
    #[error("Unknown record type: {0}")]
    UnknownRecordType(u8),

    /// Record version does not match what is expected.
    #[error("Bad record version: {0}")]
    BadRecordVersion(ProtocolVersion),

    /// Record length exceeds the allowed maximum.
    #[error("Record overflow: {0}")]
    RecordOverflow(usize),

    /// Record could not be decrypted.
    #[error("Decryption failed")]
    DecryptError,

    /// Record MAC or AEAD tag did not verify.
    #[error("Bad record MAC")]
    VerifyMacError,

    /// The 64-bit TLS record sequence number would wrap.
    #[error("Sequence number overflow")]
    SequenceOverflow,

    /// The 48-bit DTLS record sequence number would wrap.
    #[error("DTLS sequence number too big: {0}")]
    TooBigDtlsSeq(u64),

    /// The 16-bit DTLS epoch would wrap.
    #[error("Epoch is not allowed to wrap")]
    WrappedEpoch,

    /// A message arrived that is not valid in the current state.
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// A handshake message of this type was already received.
    #[error("Duplicate handshake message: {0:?}")]
    DuplicateMessage(HandshakeType),

    /// A handshake message arrived before its prerequisites.
    #[error("Out of order handshake message: {0:?}")]
    OutOfOrder(HandshakeType),

    /// A record of this content type is not acceptable right now.
    #[error("Unexpected record: {0:?}")]
    UnexpectedRecord(ContentType),

    /// No cipher suite acceptable to both sides.
    #[error("No matching cipher suite")]
    MatchSuiteError,

    /// Protocol version outside of the configured range.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(ProtocolVersion),

    /// A required key, certificate or PSK is missing.
    #[error("No private key available: {0}")]
    NoPrivateKey(&'static str),

    /// A peer key is weaker than the configured minimum.
    #[error("Key too small: {0} bits")]
    KeyTooSmall(usize),

    /// A peer key or group parameter is too large.
    #[error("Key too large: {0} bits")]
    KeyTooLarge(usize),

    /// Curve or group not supported locally.
    #[error("Unsupported group: {0}")]
    UnsupportedGroup(u16),

    /// A handshake signature did not verify.
    #[error("Bad signature")]
    BadSignature,

    /// Finished verify_data mismatch.
    #[error("Bad Finished message")]
    BadFinished,

    /// Peer certificate could not be verified or used.
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// Peer PSK identity is unknown.
    #[error("Unknown PSK identity")]
    UnknownPskIdentity,

    /// Cookie exchange failed.
    #[error("Cookie error: {0}")]
    CookieError(String),

    /// Negotiation failed for a reason other than the suite list.
    #[error("Handshake failure: {0}")]
    HandshakeFailure(String),

    /// Error in a cryptographic primitive.
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// A second asynchronous operation was started while one is pending.
    #[error("Another asynchronous operation is pending")]
    AsyncConflict,

    /// Peer tried to start a new handshake on an established connection.
    #[error("Renegotiation attempt")]
    RenegotiationAttempt,

    /// Peer sent a fatal alert.
    #[error("Alert received: {0:?}")]
    AlertReceived(AlertDescription),

    /// The connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake or retransmission timers expired.
    #[error("Timeout: {0}")]
    Timeout(&'static str),

    /// Too many buffered incoming datagrams.
    #[error("Receive queue full")]
    ReceiveQueueFull,

    /// Too many buffered outgoing packets or messages.
    #[error("Transmit queue full")]
    TransmitQueueFull,

    /// Configuration is invalid.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Internal invariant failed.
    #[error("Internal error: {0}")]
    InternalError(&'static str),
}

/// Coarse classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input from the peer.
    Decode,
    /// Failure in the record layer.
    Record,
    /// Handshake state violation or negotiation failure.
    Handshake,
    /// Cryptographic failure.
    Crypto,
    /// Policy rejection (key sizes, groups, versions).
    Policy,
    /// Buffer, queue or timer exhaustion.
    Resource,
    /// The engine was used incorrectly.
    Usage,
    /// The peer closed the connection.
    Closed,
}

impl Error {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            IncompleteData | DecodeError(_) => ErrorKind::Decode,
            UnknownRecordType(_)
            | BadRecordVersion(_)
            | RecordOverflow(_)
            | DecryptError
            | VerifyMacError
            | SequenceOverflow
            | TooBigDtlsSeq(_)
            | WrappedEpoch
            | UnexpectedRecord(_) => ErrorKind::Record,
            UnexpectedMessage(_)
            | DuplicateMessage(_)
            | OutOfOrder(_)
            | MatchSuiteError
            | HandshakeFailure(_)
            | CookieError(_)
            | RenegotiationAttempt => ErrorKind::Handshake,
            BadSignature | BadFinished | CryptoError(_) | CertificateError(_) => ErrorKind::Crypto,
            UnsupportedVersion(_)
            | NoPrivateKey(_)
            | KeyTooSmall(_)
            | KeyTooLarge(_)
            | UnsupportedGroup(_)
            | UnknownPskIdentity => ErrorKind::Policy,
            Timeout(_) | ReceiveQueueFull | TransmitQueueFull => ErrorKind::Resource,
            AsyncConflict | ConfigError(_) | InternalError(_) => ErrorKind::Usage,
            AlertReceived(_) | ConnectionClosed => ErrorKind::Closed,
        }
    }

    /// The fatal alert to send to the peer for this error, if any.
    pub fn alert(&self) -> Option<AlertDescription> {
        use AlertDescription as A;
        use Error::*;
        let desc = match self {
            IncompleteData | DecodeError(_) => A::DecodeError,
            UnknownRecordType(_) | UnexpectedRecord(_) => A::UnexpectedMessage,
            BadRecordVersion(_) | UnsupportedVersion(_) => A::ProtocolVersion,
            RecordOverflow(_) => A::RecordOverflow,
            DecryptError | VerifyMacError => A::BadRecordMac,
            UnexpectedMessage(_) | DuplicateMessage(_) | OutOfOrder(_) => A::UnexpectedMessage,
            MatchSuiteError | HandshakeFailure(_) | NoPrivateKey(_) => A::HandshakeFailure,
            KeyTooSmall(_) | KeyTooLarge(_) => A::InsufficientSecurity,
            UnsupportedGroup(_) => A::IllegalParameter,
            BadSignature | BadFinished => A::DecryptError,
            CertificateError(_) => A::BadCertificate,
            UnknownPskIdentity => A::UnknownPskIdentity,
            CookieError(_) => A::IllegalParameter,
            RenegotiationAttempt => A::NoRenegotiation,
            Timeout(_) => A::UserCanceled,
            SequenceOverflow
            | TooBigDtlsSeq(_)
            | WrappedEpoch
            | CryptoError(_)
            | ReceiveQueueFull
            | TransmitQueueFull
            | InternalError(_) => A::InternalError,
            AsyncConflict | ConfigError(_) | AlertReceived(_) | ConnectionClosed => return None,
        };
        Some(desc)
    }

    /// Decode errors from nom parsers.
    pub(crate) fn decode(what: &str) -> Self {
        Error::DecodeError(what.to_string())
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::IncompleteData,
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::DecodeError(format!("{:?} at {} remaining bytes", e.code, e.input.len()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_failures_map_to_bad_record_mac() {
        assert_eq!(
            Error::VerifyMacError.alert(),
            Some(AlertDescription::BadRecordMac)
        );
        assert_eq!(Error::VerifyMacError.kind(), ErrorKind::Record);
    }

    #[test]
    fn usage_errors_send_no_alert() {
        assert_eq!(Error::AsyncConflict.alert(), None);
        assert_eq!(Error::AsyncConflict.kind(), ErrorKind::Usage);
        assert_eq!(Error::AlertReceived(AlertDescription::CloseNotify).alert(), None);
    }

    #[test]
    fn nom_errors_become_decode_errors() {
        let input: &[u8] = &[1];
        let r: nom::IResult<&[u8], u16> = nom::number::complete::be_u16(input);
        let err: Error = r.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
