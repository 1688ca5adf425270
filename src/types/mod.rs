//! Protocol enumerations shared by the record layer and the handshake.
//!
//! All of them keep unknown wire values in an `Unknown` variant so a parse
//! never fails on an unrecognized code point. Whether an unknown value is
//! acceptable is decided by the caller.

mod alert;
pub use alert::{Alert, AlertDescription, AlertLevel};

mod algorithm;
pub use algorithm::{HashAlgorithm, SignatureAlgorithm, SignatureScheme};

mod ctype;
pub use ctype::ContentType;

mod handshake;
pub use handshake::HandshakeType;

mod named_group;
pub use named_group::{CurveType, NamedGroup};

mod version;
pub use version::ProtocolVersion;
