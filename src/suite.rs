//! Cipher suite catalog and negotiation.
//!
//! A static table maps every suite this engine knows to its key exchange,
//! authentication, bulk cipher, MAC and PRF hash. Negotiation walks the
//! governing party's preference list and picks the first suite that both
//! sides offer and that local keys can actually serve.

use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::{HashAlgorithm, ProtocolVersion, SignatureAlgorithm, SignatureScheme};
use crate::{Error, Side};

/// Cipher suites by IANA value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum CipherSuite {
    RSA_WITH_NULL_SHA256,
    RSA_WITH_AES_128_CBC_SHA,
    RSA_WITH_AES_256_CBC_SHA,
    RSA_WITH_AES_128_CBC_SHA256,
    RSA_WITH_AES_256_CBC_SHA256,
    RSA_WITH_AES_128_GCM_SHA256,
    RSA_WITH_AES_256_GCM_SHA384,
    DHE_RSA_WITH_AES_128_CBC_SHA,
    DHE_RSA_WITH_AES_128_CBC_SHA256,
    DHE_RSA_WITH_AES_128_GCM_SHA256,
    DHE_RSA_WITH_AES_256_GCM_SHA384,
    ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
    ECDHE_ECDSA_WITH_AES_128_CBC_SHA256,
    ECDHE_ECDSA_WITH_AES_256_CBC_SHA384,
    ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    ECDHE_RSA_WITH_AES_128_CBC_SHA,
    ECDHE_RSA_WITH_AES_128_CBC_SHA256,
    ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    PSK_WITH_NULL_SHA256,
    PSK_WITH_AES_128_CBC_SHA256,
    PSK_WITH_AES_128_GCM_SHA256,
    DHE_PSK_WITH_AES_128_CBC_SHA256,
    DHE_PSK_WITH_AES_128_GCM_SHA256,
    ECDHE_PSK_WITH_AES_128_CBC_SHA256,
    /// Signalling value, never negotiated.
    EMPTY_RENEGOTIATION_INFO_SCSV,
    Unknown(u16),
}

impl Default for CipherSuite {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl CipherSuite {
    pub fn from_u16(value: u16) -> Self {
        use CipherSuite::*;
        match value {
            0x003B => RSA_WITH_NULL_SHA256,
            0x002F => RSA_WITH_AES_128_CBC_SHA,
            0x0035 => RSA_WITH_AES_256_CBC_SHA,
            0x003C => RSA_WITH_AES_128_CBC_SHA256,
            0x003D => RSA_WITH_AES_256_CBC_SHA256,
            0x009C => RSA_WITH_AES_128_GCM_SHA256,
            0x009D => RSA_WITH_AES_256_GCM_SHA384,
            0x0033 => DHE_RSA_WITH_AES_128_CBC_SHA,
            0x0067 => DHE_RSA_WITH_AES_128_CBC_SHA256,
            0x009E => DHE_RSA_WITH_AES_128_GCM_SHA256,
            0x009F => DHE_RSA_WITH_AES_256_GCM_SHA384,
            0xC009 => ECDHE_ECDSA_WITH_AES_128_CBC_SHA,
            0xC023 => ECDHE_ECDSA_WITH_AES_128_CBC_SHA256,
            0xC024 => ECDHE_ECDSA_WITH_AES_256_CBC_SHA384,
            0xC02B => ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            0xC02C => ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            0xC013 => ECDHE_RSA_WITH_AES_128_CBC_SHA,
            0xC027 => ECDHE_RSA_WITH_AES_128_CBC_SHA256,
            0xC02F => ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            0xC030 => ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            0x00B0 => PSK_WITH_NULL_SHA256,
            0x00AE => PSK_WITH_AES_128_CBC_SHA256,
            0x00A8 => PSK_WITH_AES_128_GCM_SHA256,
            0x00B2 => DHE_PSK_WITH_AES_128_CBC_SHA256,
            0x00AA => DHE_PSK_WITH_AES_128_GCM_SHA256,
            0xC037 => ECDHE_PSK_WITH_AES_128_CBC_SHA256,
            0x00FF => EMPTY_RENEGOTIATION_INFO_SCSV,
            _ => Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        use CipherSuite::*;
        match self {
            RSA_WITH_NULL_SHA256 => 0x003B,
            RSA_WITH_AES_128_CBC_SHA => 0x002F,
            RSA_WITH_AES_256_CBC_SHA => 0x0035,
            RSA_WITH_AES_128_CBC_SHA256 => 0x003C,
            RSA_WITH_AES_256_CBC_SHA256 => 0x003D,
            RSA_WITH_AES_128_GCM_SHA256 => 0x009C,
            RSA_WITH_AES_256_GCM_SHA384 => 0x009D,
            DHE_RSA_WITH_AES_128_CBC_SHA => 0x0033,
            DHE_RSA_WITH_AES_128_CBC_SHA256 => 0x0067,
            DHE_RSA_WITH_AES_128_GCM_SHA256 => 0x009E,
            DHE_RSA_WITH_AES_256_GCM_SHA384 => 0x009F,
            ECDHE_ECDSA_WITH_AES_128_CBC_SHA => 0xC009,
            ECDHE_ECDSA_WITH_AES_128_CBC_SHA256 => 0xC023,
            ECDHE_ECDSA_WITH_AES_256_CBC_SHA384 => 0xC024,
            ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => 0xC02B,
            ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 => 0xC02C,
            ECDHE_RSA_WITH_AES_128_CBC_SHA => 0xC013,
            ECDHE_RSA_WITH_AES_128_CBC_SHA256 => 0xC027,
            ECDHE_RSA_WITH_AES_128_GCM_SHA256 => 0xC02F,
            ECDHE_RSA_WITH_AES_256_GCM_SHA384 => 0xC030,
            PSK_WITH_NULL_SHA256 => 0x00B0,
            PSK_WITH_AES_128_CBC_SHA256 => 0x00AE,
            PSK_WITH_AES_128_GCM_SHA256 => 0x00A8,
            DHE_PSK_WITH_AES_128_CBC_SHA256 => 0x00B2,
            DHE_PSK_WITH_AES_128_GCM_SHA256 => 0x00AA,
            ECDHE_PSK_WITH_AES_128_CBC_SHA256 => 0xC037,
            EMPTY_RENEGOTIATION_INFO_SCSV => 0x00FF,
            Unknown(value) => *value,
        }
    }

    /// High byte of the IANA value.
    pub fn family(&self) -> SuiteFamily {
        match (self.as_u16() >> 8) as u8 {
            0x00 => SuiteFamily::Normal,
            0xC0 => SuiteFamily::Ecc,
            0xCC => SuiteFamily::ChaCha,
            0x13 => SuiteFamily::Tls13,
            other => SuiteFamily::Other(other),
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, CipherSuite::from_u16(value)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    /// Catalog entry, `None` for unknown and signalling values.
    pub fn params(&self) -> Option<&'static SuiteParams> {
        SUITES.iter().find(|p| p.suite == *self)
    }

    /// Every suite in the catalog, strongest first.
    pub fn all() -> impl Iterator<Item = CipherSuite> {
        SUITES.iter().map(|p| p.suite)
    }

    /// The suites enabled when the configuration does not say otherwise.
    /// NULL-cipher suites are opt-in.
    pub fn default_suites() -> Vec<CipherSuite> {
        SUITES
            .iter()
            .filter(|p| p.bulk != BulkCipher::Null)
            .map(|p| p.suite)
            .collect()
    }
}

/// Family tag from the suite's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteFamily {
    Normal,
    Ecc,
    ChaCha,
    Tls13,
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlgorithm {
    Rsa,
    Dhe,
    Ecdhe,
    Psk,
    DhePsk,
    EcdhePsk,
}

impl KeyExchangeAlgorithm {
    pub fn uses_psk(&self) -> bool {
        matches!(
            self,
            KeyExchangeAlgorithm::Psk | KeyExchangeAlgorithm::DhePsk | KeyExchangeAlgorithm::EcdhePsk
        )
    }

    pub fn uses_dh(&self) -> bool {
        matches!(self, KeyExchangeAlgorithm::Dhe | KeyExchangeAlgorithm::DhePsk)
    }

    pub fn uses_ecdh(&self) -> bool {
        matches!(
            self,
            KeyExchangeAlgorithm::Ecdhe | KeyExchangeAlgorithm::EcdhePsk
        )
    }
}

/// Who authenticates the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authentication {
    Rsa,
    Ecdsa,
    Psk,
}

impl Authentication {
    /// Key type of the server certificate, if the suite uses one.
    pub fn key_type(&self) -> Option<SignatureAlgorithm> {
        match self {
            Authentication::Rsa => Some(SignatureAlgorithm::RSA),
            Authentication::Ecdsa => Some(SignatureAlgorithm::ECDSA),
            Authentication::Psk => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkCipher {
    Null,
    Aes128Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes256Gcm,
}

impl BulkCipher {
    pub fn cipher_type(&self) -> CipherType {
        match self {
            BulkCipher::Null => CipherType::Stream,
            BulkCipher::Aes128Cbc | BulkCipher::Aes256Cbc => CipherType::Block,
            BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm => CipherType::Aead,
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            BulkCipher::Null => 0,
            BulkCipher::Aes128Cbc | BulkCipher::Aes128Gcm => 16,
            BulkCipher::Aes256Cbc | BulkCipher::Aes256Gcm => 32,
        }
    }

    pub fn block_len(&self) -> usize {
        match self.cipher_type() {
            CipherType::Block => 16,
            _ => 0,
        }
    }
}

/// How the record payload is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherType {
    /// MAC only (NULL cipher).
    Stream,
    /// MAC, pad, CBC encrypt.
    Block,
    /// Authenticated encryption.
    Aead,
}

/// Record MAC algorithm. AEAD suites have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    Aead,
    HmacSha1,
    HmacSha256,
    HmacSha384,
}

impl MacAlgorithm {
    pub fn hash(&self) -> Option<HashAlgorithm> {
        match self {
            MacAlgorithm::Aead => None,
            MacAlgorithm::HmacSha1 => Some(HashAlgorithm::SHA1),
            MacAlgorithm::HmacSha256 => Some(HashAlgorithm::SHA256),
            MacAlgorithm::HmacSha384 => Some(HashAlgorithm::SHA384),
        }
    }

    pub fn len(&self) -> usize {
        self.hash().map(|h| h.output_len()).unwrap_or(0)
    }
}

/// PRF construction for a negotiated version and suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfHash {
    /// TLS 1.0/1.1 split MD5 and SHA-1 PRF.
    Md5Sha1,
    Sha256,
    Sha384,
}

impl PrfHash {
    /// Hash of the handshake transcript for Finished and extended master secret.
    pub fn transcript_hashes(&self) -> &'static [HashAlgorithm] {
        match self {
            PrfHash::Md5Sha1 => &[HashAlgorithm::MD5, HashAlgorithm::SHA1],
            PrfHash::Sha256 => &[HashAlgorithm::SHA256],
            PrfHash::Sha384 => &[HashAlgorithm::SHA384],
        }
    }
}

/// Static parameters of one cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteParams {
    pub suite: CipherSuite,
    pub kx: KeyExchangeAlgorithm,
    pub auth: Authentication,
    pub bulk: BulkCipher,
    pub mac: MacAlgorithm,
    /// PRF hash under TLS 1.2.
    pub prf: HashAlgorithm,
    /// Only defined for TLS 1.2 / DTLS 1.2.
    pub tls12_only: bool,
}

impl SuiteParams {
    pub fn cipher_type(&self) -> CipherType {
        self.bulk.cipher_type()
    }

    pub fn key_len(&self) -> usize {
        self.bulk.key_len()
    }

    pub fn mac_len(&self) -> usize {
        self.mac.len()
    }

    /// Length of the implicit IV taken from the key block.
    pub fn fixed_iv_len(&self, version: ProtocolVersion) -> usize {
        match self.cipher_type() {
            CipherType::Aead => 4,
            CipherType::Block if !version.has_explicit_iv() => 16,
            _ => 0,
        }
    }

    /// Length of the per-record explicit IV or nonce.
    pub fn record_iv_len(&self, version: ProtocolVersion) -> usize {
        match self.cipher_type() {
            CipherType::Aead => 8,
            CipherType::Block if version.has_explicit_iv() => 16,
            _ => 0,
        }
    }

    pub fn tag_len(&self) -> usize {
        match self.cipher_type() {
            CipherType::Aead => 16,
            _ => 0,
        }
    }

    /// Largest number of bytes protection can add to a plaintext.
    pub fn max_expansion(&self, version: ProtocolVersion) -> usize {
        self.record_iv_len(version) + self.mac_len() + self.tag_len() + self.bulk.block_len()
    }

    pub fn prf_hash(&self, version: ProtocolVersion) -> PrfHash {
        if !version.is_tls12_family() {
            PrfHash::Md5Sha1
        } else if self.prf == HashAlgorithm::SHA384 {
            PrfHash::Sha384
        } else {
            PrfHash::Sha256
        }
    }

    /// Whether the suite can run under `version`.
    pub fn usable_with(&self, version: ProtocolVersion) -> bool {
        !self.tls12_only || version.is_tls12_family()
    }

    /// Server sends a ServerKeyExchange for this suite.
    ///
    /// Plain PSK only sends one when there is an identity hint.
    pub fn needs_server_kx(&self, has_psk_hint: bool) -> bool {
        match self.kx {
            KeyExchangeAlgorithm::Rsa => false,
            KeyExchangeAlgorithm::Psk => has_psk_hint,
            _ => true,
        }
    }

    /// Server certificate is part of the handshake.
    pub fn needs_certificate(&self) -> bool {
        self.auth != Authentication::Psk
    }
}

macro_rules! suite {
    ($suite:ident, $kx:ident, $auth:ident, $bulk:ident, $mac:ident, $prf:ident, $tls12:expr) => {
        SuiteParams {
            suite: CipherSuite::$suite,
            kx: KeyExchangeAlgorithm::$kx,
            auth: Authentication::$auth,
            bulk: BulkCipher::$bulk,
            mac: MacAlgorithm::$mac,
            prf: HashAlgorithm::$prf,
            tls12_only: $tls12,
        }
    };
}

// Ordered by default preference: forward secret AEAD first.
static SUITES: &[SuiteParams] = &[
    suite!(ECDHE_ECDSA_WITH_AES_256_GCM_SHA384, Ecdhe, Ecdsa, Aes256Gcm, Aead, SHA384, true),
    suite!(ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, Ecdhe, Ecdsa, Aes128Gcm, Aead, SHA256, true),
    suite!(ECDHE_RSA_WITH_AES_256_GCM_SHA384, Ecdhe, Rsa, Aes256Gcm, Aead, SHA384, true),
    suite!(ECDHE_RSA_WITH_AES_128_GCM_SHA256, Ecdhe, Rsa, Aes128Gcm, Aead, SHA256, true),
    suite!(DHE_RSA_WITH_AES_256_GCM_SHA384, Dhe, Rsa, Aes256Gcm, Aead, SHA384, true),
    suite!(DHE_RSA_WITH_AES_128_GCM_SHA256, Dhe, Rsa, Aes128Gcm, Aead, SHA256, true),
    suite!(ECDHE_ECDSA_WITH_AES_256_CBC_SHA384, Ecdhe, Ecdsa, Aes256Cbc, HmacSha384, SHA384, true),
    suite!(ECDHE_ECDSA_WITH_AES_128_CBC_SHA256, Ecdhe, Ecdsa, Aes128Cbc, HmacSha256, SHA256, true),
    suite!(ECDHE_RSA_WITH_AES_128_CBC_SHA256, Ecdhe, Rsa, Aes128Cbc, HmacSha256, SHA256, true),
    suite!(DHE_RSA_WITH_AES_128_CBC_SHA256, Dhe, Rsa, Aes128Cbc, HmacSha256, SHA256, true),
    suite!(ECDHE_ECDSA_WITH_AES_128_CBC_SHA, Ecdhe, Ecdsa, Aes128Cbc, HmacSha1, SHA256, false),
    suite!(ECDHE_RSA_WITH_AES_128_CBC_SHA, Ecdhe, Rsa, Aes128Cbc, HmacSha1, SHA256, false),
    suite!(DHE_RSA_WITH_AES_128_CBC_SHA, Dhe, Rsa, Aes128Cbc, HmacSha1, SHA256, false),
    suite!(RSA_WITH_AES_256_GCM_SHA384, Rsa, Rsa, Aes256Gcm, Aead, SHA384, true),
    suite!(RSA_WITH_AES_128_GCM_SHA256, Rsa, Rsa, Aes128Gcm, Aead, SHA256, true),
    suite!(RSA_WITH_AES_256_CBC_SHA256, Rsa, Rsa, Aes256Cbc, HmacSha256, SHA256, true),
    suite!(RSA_WITH_AES_128_CBC_SHA256, Rsa, Rsa, Aes128Cbc, HmacSha256, SHA256, true),
    suite!(RSA_WITH_AES_256_CBC_SHA, Rsa, Rsa, Aes256Cbc, HmacSha1, SHA256, false),
    suite!(RSA_WITH_AES_128_CBC_SHA, Rsa, Rsa, Aes128Cbc, HmacSha1, SHA256, false),
    suite!(ECDHE_PSK_WITH_AES_128_CBC_SHA256, EcdhePsk, Psk, Aes128Cbc, HmacSha256, SHA256, false),
    suite!(DHE_PSK_WITH_AES_128_GCM_SHA256, DhePsk, Psk, Aes128Gcm, Aead, SHA256, true),
    suite!(DHE_PSK_WITH_AES_128_CBC_SHA256, DhePsk, Psk, Aes128Cbc, HmacSha256, SHA256, false),
    suite!(PSK_WITH_AES_128_GCM_SHA256, Psk, Psk, Aes128Gcm, Aead, SHA256, true),
    suite!(PSK_WITH_AES_128_CBC_SHA256, Psk, Psk, Aes128Cbc, HmacSha256, SHA256, false),
    suite!(RSA_WITH_NULL_SHA256, Rsa, Rsa, Null, HmacSha256, SHA256, true),
    suite!(PSK_WITH_NULL_SHA256, Psk, Psk, Null, HmacSha256, SHA256, false),
];

/// What the local side is able to serve, as input to negotiation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    /// An RSA private key and certificate are loaded (server) or the
    /// client accepts RSA authentication.
    pub rsa: bool,
    /// Same for ECDSA.
    pub ecdsa: bool,
    /// A PSK callback is configured.
    pub psk: bool,
    /// Finite field DH parameters are available.
    pub dh: bool,
    /// At least one ECDHE group is shared with the peer.
    pub ecdhe: bool,
}

impl Capabilities {
    fn allows(&self, p: &SuiteParams) -> bool {
        let auth = match p.auth {
            Authentication::Rsa => self.rsa,
            Authentication::Ecdsa => self.ecdsa,
            Authentication::Psk => self.psk,
        };
        let kx = match p.kx {
            KeyExchangeAlgorithm::Rsa | KeyExchangeAlgorithm::Psk => true,
            KeyExchangeAlgorithm::Dhe | KeyExchangeAlgorithm::DhePsk => self.dh,
            KeyExchangeAlgorithm::Ecdhe | KeyExchangeAlgorithm::EcdhePsk => self.ecdhe,
        };
        auth && kx
    }
}

/// Inputs to [`negotiate`].
#[derive(Debug, Clone, Copy)]
pub struct Negotiation<'a> {
    pub local: &'a [CipherSuite],
    pub peer: &'a [CipherSuite],
    pub side: Side,
    /// The client's order governs instead of the server's.
    pub use_client_order: bool,
    pub version: ProtocolVersion,
    pub capabilities: Capabilities,
}

/// Pick the cipher suite.
///
/// The governing list is the server's unless `use_client_order` is set.
/// The first suite in that list which the other side also offers and
/// which local capabilities and the version allow wins. Deterministic for
/// identical input.
pub fn negotiate(n: &Negotiation<'_>) -> Result<&'static SuiteParams, Error> {
    let (client, server) = match n.side {
        Side::Server => (n.peer, n.local),
        Side::Client => (n.local, n.peer),
    };
    let (governing, other) = if n.use_client_order {
        (client, server)
    } else {
        (server, client)
    };

    for suite in governing {
        if !other.contains(suite) {
            continue;
        }
        let Some(params) = suite.params() else {
            continue;
        };
        if !params.usable_with(n.version) {
            continue;
        }
        if !n.capabilities.allows(params) {
            continue;
        }
        return Ok(params);
    }

    Err(Error::MatchSuiteError)
}

/// Choose the signature scheme for a ServerKeyExchange or
/// CertificateVerify signed with a key of type `key`.
///
/// TLS 1.2: the strongest hash among the peer's advertised schemes that we
/// support for this key type. A peer that sent no list gets SHA-1 (RFC 5246
/// 7.4.1.4.1). Earlier versions have no negotiation and return `None`,
/// meaning MD5+SHA-1 for RSA and SHA-1 for ECDSA.
pub fn select_signature_scheme(
    version: ProtocolVersion,
    key: SignatureAlgorithm,
    peer: Option<&[SignatureScheme]>,
    supported: &[SignatureScheme],
) -> Result<Option<SignatureScheme>, Error> {
    if !version.is_tls12_family() {
        return Ok(None);
    }

    let Some(peer) = peer else {
        let fallback = match key {
            SignatureAlgorithm::RSA => SignatureScheme::RSA_PKCS1_SHA1,
            SignatureAlgorithm::ECDSA => SignatureScheme::ECDSA_SHA1,
            _ => return Err(Error::NoPrivateKey("no signature scheme for key type")),
        };
        return Ok(Some(fallback));
    };

    peer.iter()
        .copied()
        .filter(|s| s.signature_algorithm() == key && supported.contains(s))
        // EdDSA has no separate hash and ranks above hashed schemes
        .max_by_key(|s| s.hash_algorithm().map(|h| h.output_len()).unwrap_or(usize::MAX))
        .map(Some)
        .ok_or(Error::HandshakeFailure(
            "no mutually supported signature scheme".into(),
        ))
}
