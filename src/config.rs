use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::MacHook;
use crate::crypto::{CertVerifier, CryptoProvider, LeafKeyVerifier};
use crate::kx::{FFDHE2048_PRIME, FFDHE_GENERATOR};
use crate::session::{SessionCache, TicketEncrypter};
use crate::suite::{BulkCipher, CipherSuite};
use crate::types::{NamedGroup, ProtocolVersion, SignatureScheme};
use crate::window::MAX_WINDOW_SIZE;
use crate::Error;

/// Underlying transport of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Reliable byte stream, TLS.
    Stream,
    /// Unreliable datagrams, DTLS.
    Datagram,
}

/// Source of pre-shared keys for the PSK suites.
pub trait PskProvider: Send + Sync + fmt::Debug {
    /// Client side: identity and key to use, given the server's hint.
    fn client_psk(&self, hint: Option<&[u8]>) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Server side: key for a client identity.
    fn server_psk(&self, identity: &[u8]) -> Option<Vec<u8>>;

    /// Identity hint sent by the server in the ServerKeyExchange.
    fn identity_hint(&self) -> Option<Vec<u8>> {
        None
    }
}

/// A single identity and key, usable on both sides.
pub struct StaticPsk {
    identity: Vec<u8>,
    key: zeroize::Zeroizing<Vec<u8>>,
    hint: Option<Vec<u8>>,
}

impl StaticPsk {
    pub fn new(identity: &[u8], key: &[u8]) -> Self {
        StaticPsk {
            identity: identity.to_vec(),
            key: zeroize::Zeroizing::new(key.to_vec()),
            hint: None,
        }
    }

    /// Identity hint the server advertises.
    pub fn with_hint(mut self, hint: &[u8]) -> Self {
        self.hint = Some(hint.to_vec());
        self
    }
}

impl PskProvider for StaticPsk {
    fn client_psk(&self, _hint: Option<&[u8]>) -> Option<(Vec<u8>, Vec<u8>)> {
        Some((self.identity.clone(), self.key.to_vec()))
    }

    fn server_psk(&self, identity: &[u8]) -> Option<Vec<u8>> {
        (identity == self.identity).then(|| self.key.to_vec())
    }

    fn identity_hint(&self) -> Option<Vec<u8>> {
        self.hint.clone()
    }
}

impl fmt::Debug for StaticPsk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPsk")
            .field("identity_len", &self.identity.len())
            .finish()
    }
}

/// Signature schemes offered when none are configured, in preference
/// order.
const DEFAULT_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ECDSA_SECP256R1_SHA256,
    SignatureScheme::ECDSA_SECP384R1_SHA384,
    SignatureScheme::RSA_PSS_RSAE_SHA256,
    SignatureScheme::RSA_PSS_RSAE_SHA384,
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
    SignatureScheme::RSA_PKCS1_SHA512,
    SignatureScheme::RSA_PKCS1_SHA1,
    SignatureScheme::ECDSA_SHA1,
];

const DEFAULT_GROUPS: &[NamedGroup] = &[
    NamedGroup::X25519,
    NamedGroup::Secp256r1,
    NamedGroup::Secp384r1,
];

/// Engine configuration, shared by connections through an `Arc`.
#[derive(Clone)]
pub struct Config {
    transport: Transport,
    min_version: ProtocolVersion,
    max_version: ProtocolVersion,
    allow_downgrade: bool,
    cipher_suites: Vec<CipherSuite>,
    use_client_preference: bool,
    signature_schemes: Vec<SignatureScheme>,
    named_groups: Vec<NamedGroup>,
    min_dh_bits: usize,
    max_dh_bits: usize,
    min_rsa_bits: usize,
    min_ecc_bits: usize,
    dh_params: (Vec<u8>, Vec<u8>),
    psk: Option<Arc<dyn PskProvider>>,
    max_fragment_len: usize,
    mtu: usize,
    replay_window: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    max_queue_rx: usize,
    max_queue_tx: usize,
    max_handshake_message_len: usize,
    require_client_certificate: bool,
    request_client_certificate: bool,
    extended_master_secret: bool,
    session_cache: Option<Arc<dyn SessionCache>>,
    ticket_encrypter: Option<Arc<dyn TicketEncrypter>>,
    cert_verifier: Arc<dyn CertVerifier>,
    mac_hook: Option<Arc<dyn MacHook>>,
    crypto_provider: CryptoProvider,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            transport: Transport::Stream,
            min_version: None,
            max_version: None,
            allow_downgrade: true,
            cipher_suites: None,
            use_client_preference: false,
            signature_schemes: DEFAULT_SCHEMES.to_vec(),
            named_groups: DEFAULT_GROUPS.to_vec(),
            min_dh_bits: 1024,
            max_dh_bits: 4096,
            min_rsa_bits: 1024,
            min_ecc_bits: 224,
            dh_params: (FFDHE2048_PRIME.to_vec(), FFDHE_GENERATOR.to_vec()),
            psk: None,
            max_fragment_len: 16384,
            mtu: 1150,
            replay_window: 64,
            flight_start_rto: Duration::from_secs(1),
            flight_max_rto: Duration::from_secs(60),
            flight_retries: 6,
            handshake_timeout: Duration::from_secs(40),
            max_queue_rx: 30,
            max_queue_tx: 30,
            max_handshake_message_len: 65536,
            require_client_certificate: false,
            request_client_certificate: false,
            extended_master_secret: true,
            session_cache: None,
            ticket_encrypter: None,
            cert_verifier: None,
            mac_hook: None,
            crypto_provider: None,
            rng_seed: None,
        }
    }

    /// Stream (TLS) or datagram (DTLS).
    #[inline(always)]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    #[inline(always)]
    pub fn is_datagram(&self) -> bool {
        self.transport == Transport::Datagram
    }

    /// Lowest protocol version accepted.
    #[inline(always)]
    pub fn min_version(&self) -> ProtocolVersion {
        self.min_version
    }

    /// Highest protocol version offered or accepted.
    #[inline(always)]
    pub fn max_version(&self) -> ProtocolVersion {
        self.max_version
    }

    /// Whether a client accepts a server hello one version below the one
    /// offered.
    #[inline(always)]
    pub fn allow_downgrade(&self) -> bool {
        self.allow_downgrade
    }

    /// Enabled cipher suites in preference order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// For a server, follow the client's suite order instead of its own.
    #[inline(always)]
    pub fn use_client_preference(&self) -> bool {
        self.use_client_preference
    }

    /// Signature schemes offered and accepted.
    #[inline(always)]
    pub fn signature_schemes(&self) -> &[SignatureScheme] {
        &self.signature_schemes
    }

    /// ECDHE groups in preference order.
    #[inline(always)]
    pub fn named_groups(&self) -> &[NamedGroup] {
        &self.named_groups
    }

    /// Smallest finite field DH prime accepted from a server, in bits.
    #[inline(always)]
    pub fn min_dh_bits(&self) -> usize {
        self.min_dh_bits
    }

    /// Largest finite field DH prime accepted from a server, in bits.
    #[inline(always)]
    pub fn max_dh_bits(&self) -> usize {
        self.max_dh_bits
    }

    /// Smallest RSA peer key accepted, in bits.
    #[inline(always)]
    pub fn min_rsa_bits(&self) -> usize {
        self.min_rsa_bits
    }

    /// Smallest EC peer key accepted, in bits.
    #[inline(always)]
    pub fn min_ecc_bits(&self) -> usize {
        self.min_ecc_bits
    }

    /// Prime and generator a server uses for DHE suites.
    #[inline(always)]
    pub fn dh_params(&self) -> (&[u8], &[u8]) {
        (&self.dh_params.0, &self.dh_params.1)
    }

    #[inline(always)]
    pub fn psk_provider(&self) -> Option<&dyn PskProvider> {
        self.psk.as_deref()
    }

    /// Largest plaintext fragment per record.
    #[inline(always)]
    pub fn max_fragment_len(&self) -> usize {
        self.max_fragment_len
    }

    /// Max transmission unit.
    ///
    /// The largest datagram produced in DTLS.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Size of the DTLS replay window, in records.
    #[inline(always)]
    pub fn replay_window(&self) -> usize {
        self.replay_window
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value.
    /// Doubled for every retry with a ±25% jitter.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Upper bound of the doubling retransmission timeout.
    #[inline(always)]
    pub fn flight_max_rto(&self) -> Duration {
        self.flight_max_rto
    }

    /// Max number of retries per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Timeout for the entire DTLS handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Max amount of early records held before rejecting more.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Max amount of outgoing packets to buffer.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// Largest handshake message accepted.
    #[inline(always)]
    pub fn max_handshake_message_len(&self) -> usize {
        self.max_handshake_message_len
    }

    /// For a server, fail the handshake if the client sends no
    /// certificate.
    #[inline(always)]
    pub fn require_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    /// For a server, send a CertificateRequest.
    #[inline(always)]
    pub fn request_client_certificate(&self) -> bool {
        self.request_client_certificate || self.require_client_certificate
    }

    /// Whether to offer and accept the Extended Master Secret extension
    /// (rfc7627).
    #[inline(always)]
    pub fn extended_master_secret(&self) -> bool {
        self.extended_master_secret
    }

    #[inline(always)]
    pub fn session_cache(&self) -> Option<&dyn SessionCache> {
        self.session_cache.as_deref()
    }

    #[inline(always)]
    pub fn ticket_encrypter(&self) -> Option<&dyn TicketEncrypter> {
        self.ticket_encrypter.as_deref()
    }

    #[inline(always)]
    pub fn cert_verifier(&self) -> &dyn CertVerifier {
        &*self.cert_verifier
    }

    /// Hook computing record MACs outside the engine.
    #[inline(always)]
    pub fn mac_hook(&self) -> Option<&Arc<dyn MacHook>> {
        self.mac_hook.as_ref()
    }

    /// Cryptographic provider.
    ///
    /// Provides all cryptographic operations (ciphers, key exchange, signing, etc.).
    #[inline(always)]
    pub fn crypto_provider(&self) -> &CryptoProvider {
        &self.crypto_provider
    }

    /// Seed for retransmission jitter.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    transport: Transport,
    min_version: Option<ProtocolVersion>,
    max_version: Option<ProtocolVersion>,
    allow_downgrade: bool,
    cipher_suites: Option<Vec<CipherSuite>>,
    use_client_preference: bool,
    signature_schemes: Vec<SignatureScheme>,
    named_groups: Vec<NamedGroup>,
    min_dh_bits: usize,
    max_dh_bits: usize,
    min_rsa_bits: usize,
    min_ecc_bits: usize,
    dh_params: (Vec<u8>, Vec<u8>),
    psk: Option<Arc<dyn PskProvider>>,
    max_fragment_len: usize,
    mtu: usize,
    replay_window: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    max_queue_rx: usize,
    max_queue_tx: usize,
    max_handshake_message_len: usize,
    require_client_certificate: bool,
    request_client_certificate: bool,
    extended_master_secret: bool,
    session_cache: Option<Arc<dyn SessionCache>>,
    ticket_encrypter: Option<Arc<dyn TicketEncrypter>>,
    cert_verifier: Option<Arc<dyn CertVerifier>>,
    mac_hook: Option<Arc<dyn MacHook>>,
    crypto_provider: Option<CryptoProvider>,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the transport.
    ///
    /// Defaults to [`Transport::Stream`].
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Shorthand for `transport(Transport::Datagram)`.
    pub fn dtls(self) -> Self {
        self.transport(Transport::Datagram)
    }

    /// Set the lowest accepted version.
    ///
    /// Defaults to TLS 1.2 for streams and DTLS 1.0 for datagrams.
    pub fn min_version(mut self, version: ProtocolVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// Set the highest offered version.
    ///
    /// Defaults to TLS 1.2 for streams and DTLS 1.2 for datagrams.
    pub fn max_version(mut self, version: ProtocolVersion) -> Self {
        self.max_version = Some(version);
        self
    }

    /// Set whether a client accepts a ServerHello one version below the
    /// offered one.
    ///
    /// Defaults to true.
    pub fn allow_downgrade(mut self, allow: bool) -> Self {
        self.allow_downgrade = allow;
        self
    }

    /// Set the enabled cipher suites, in preference order.
    ///
    /// Defaults to every non-NULL suite the provider supports.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = Some(suites.to_vec());
        self
    }

    /// Set whether a server follows the client's suite preference.
    ///
    /// Defaults to false.
    pub fn use_client_preference(mut self, yes: bool) -> Self {
        self.use_client_preference = yes;
        self
    }

    /// Set the signature schemes offered and accepted.
    pub fn signature_schemes(mut self, schemes: &[SignatureScheme]) -> Self {
        self.signature_schemes = schemes.to_vec();
        self
    }

    /// Set the ECDHE groups, in preference order.
    ///
    /// Defaults to x25519, secp256r1, secp384r1.
    pub fn named_groups(mut self, groups: &[NamedGroup]) -> Self {
        self.named_groups = groups.to_vec();
        self
    }

    /// Set the accepted range of server DH prime sizes, in bits.
    ///
    /// Defaults to 1024 to 4096.
    pub fn dh_bits(mut self, min: usize, max: usize) -> Self {
        self.min_dh_bits = min;
        self.max_dh_bits = max;
        self
    }

    /// Set the smallest RSA peer key accepted.
    ///
    /// Defaults to 1024.
    pub fn min_rsa_bits(mut self, bits: usize) -> Self {
        self.min_rsa_bits = bits;
        self
    }

    /// Set the smallest EC peer key accepted.
    ///
    /// Defaults to 224.
    pub fn min_ecc_bits(mut self, bits: usize) -> Self {
        self.min_ecc_bits = bits;
        self
    }

    /// Set the prime and generator a server offers for DHE suites.
    ///
    /// Defaults to the RFC 7919 ffdhe2048 group.
    pub fn dh_params(mut self, prime: &[u8], generator: &[u8]) -> Self {
        self.dh_params = (prime.to_vec(), generator.to_vec());
        self
    }

    /// Set the pre-shared key source. Required for the PSK suites.
    pub fn psk(mut self, psk: Arc<dyn PskProvider>) -> Self {
        self.psk = Some(psk);
        self
    }

    /// Set the largest plaintext fragment per record.
    ///
    /// Defaults to 16384.
    pub fn max_fragment_len(mut self, len: usize) -> Self {
        self.max_fragment_len = len;
        self
    }

    /// Set the max transmission unit (MTU).
    ///
    /// The largest datagram we will produce.
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the DTLS replay window size.
    ///
    /// Defaults to 64.
    pub fn replay_window(mut self, size: usize) -> Self {
        self.replay_window = size;
        self
    }

    /// Set the time of first retry.
    ///
    /// Every flight restarts with this value.
    /// Doubled for every retry with a ±25% jitter.
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the cap on the retransmission timeout.
    ///
    /// Defaults to 60 seconds.
    pub fn flight_max_rto(mut self, rto: Duration) -> Self {
        self.flight_max_rto = rto;
        self
    }

    /// Set the max number of retries per flight.
    ///
    /// Defaults to 6.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the timeout for the entire handshake, regardless of flights.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the max amount of early records to hold.
    ///
    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the max amount of outgoing packets to buffer.
    ///
    /// Defaults to 30.
    pub fn max_queue_tx(mut self, max_queue_tx: usize) -> Self {
        self.max_queue_tx = max_queue_tx;
        self
    }

    /// Set the largest handshake message accepted.
    ///
    /// Defaults to 65536.
    pub fn max_handshake_message_len(mut self, len: usize) -> Self {
        self.max_handshake_message_len = len;
        self
    }

    /// Set whether to require a client certificate (for servers).
    ///
    /// Implies [`request_client_certificate`](Self::request_client_certificate).
    /// Defaults to false.
    pub fn require_client_certificate(mut self, require: bool) -> Self {
        self.require_client_certificate = require;
        self
    }

    /// Set whether a server asks for a client certificate.
    ///
    /// Defaults to false.
    pub fn request_client_certificate(mut self, request: bool) -> Self {
        self.request_client_certificate = request;
        self
    }

    /// Set whether to enable Extended Master Secret extension (rfc7627).
    ///
    /// Defaults to true.
    pub fn extended_master_secret(mut self, enable: bool) -> Self {
        self.extended_master_secret = enable;
        self
    }

    /// Set the server side session cache for resumption by id.
    pub fn session_cache(mut self, cache: Arc<dyn SessionCache>) -> Self {
        self.session_cache = Some(cache);
        self
    }

    /// Set the server side ticket encrypter (rfc5077).
    pub fn ticket_encrypter(mut self, encrypter: Arc<dyn TicketEncrypter>) -> Self {
        self.ticket_encrypter = Some(encrypter);
        self
    }

    /// Set the peer certificate chain verifier.
    ///
    /// Defaults to [`LeafKeyVerifier`], which accepts any chain.
    pub fn cert_verifier(mut self, verifier: Arc<dyn CertVerifier>) -> Self {
        self.cert_verifier = Some(verifier);
        self
    }

    /// Set a hook that computes record MACs.
    pub fn mac_hook(mut self, hook: Arc<dyn MacHook>) -> Self {
        self.mac_hook = Some(hook);
        self
    }

    /// Set a custom crypto provider.
    ///
    /// If not set, the installed default or the built in RustCrypto
    /// provider is used.
    pub fn with_crypto_provider(mut self, provider: CryptoProvider) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Seed the jitter generator, for reproducible timers in tests.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::ConfigError` if the settings are inconsistent.
    ///
    /// The crypto provider is selected in the following priority order:
    /// 1. Explicit provider set via `with_crypto_provider()`
    /// 2. Default provider installed via `CryptoProvider::install_default()`
    /// 3. The built in RustCrypto provider
    pub fn build(self) -> Result<Config, Error> {
        let crypto_provider = self
            .crypto_provider
            .unwrap_or_else(CryptoProvider::get_default_or_builtin);

        let datagram = self.transport == Transport::Datagram;
        let (def_min, def_max) = if datagram {
            (ProtocolVersion::DTLS1_0, ProtocolVersion::DTLS1_2)
        } else {
            (ProtocolVersion::TLS1_2, ProtocolVersion::TLS1_2)
        };
        let min_version = self.min_version.unwrap_or(def_min);
        let max_version = self.max_version.unwrap_or(def_max);

        for v in [min_version, max_version] {
            if !v.is_known() || v.is_dtls() != datagram {
                return Err(Error::ConfigError(format!(
                    "{} does not match transport {:?}",
                    v, self.transport
                )));
            }
        }
        if !max_version.at_least(min_version) {
            return Err(Error::ConfigError(format!(
                "min version {} above max version {}",
                min_version, max_version
            )));
        }

        let supported = |s: &CipherSuite| {
            s.params().map_or(false, |p| {
                p.bulk == BulkCipher::Null || crypto_provider.ciphers.supports(p.bulk)
            })
        };
        let cipher_suites: Vec<CipherSuite> = self
            .cipher_suites
            .unwrap_or_else(CipherSuite::default_suites)
            .into_iter()
            .filter(supported)
            .collect();
        if cipher_suites.is_empty() {
            return Err(Error::ConfigError(
                "no cipher suite supported by the provider".into(),
            ));
        }

        if self.min_dh_bits == 0 || self.min_dh_bits > self.max_dh_bits {
            return Err(Error::ConfigError(format!(
                "bad DH bounds {}..{}",
                self.min_dh_bits, self.max_dh_bits
            )));
        }
        if self.dh_params.0.is_empty() || self.dh_params.1.is_empty() {
            return Err(Error::ConfigError("empty DH parameters".into()));
        }
        if !(512..=16384).contains(&self.max_fragment_len) {
            return Err(Error::ConfigError(format!(
                "max_fragment_len {} outside 512..=16384",
                self.max_fragment_len
            )));
        }
        if datagram && self.mtu < 256 {
            return Err(Error::ConfigError(format!("mtu {} too small", self.mtu)));
        }
        if self.replay_window == 0 || self.replay_window > MAX_WINDOW_SIZE {
            return Err(Error::ConfigError(format!(
                "replay_window {} outside 1..={}",
                self.replay_window, MAX_WINDOW_SIZE
            )));
        }
        if self.flight_start_rto.is_zero() || self.flight_start_rto > self.flight_max_rto {
            return Err(Error::ConfigError("bad flight timeouts".into()));
        }

        Ok(Config {
            transport: self.transport,
            min_version,
            max_version,
            allow_downgrade: self.allow_downgrade,
            cipher_suites,
            use_client_preference: self.use_client_preference,
            signature_schemes: self.signature_schemes,
            named_groups: self.named_groups,
            min_dh_bits: self.min_dh_bits,
            max_dh_bits: self.max_dh_bits,
            min_rsa_bits: self.min_rsa_bits,
            min_ecc_bits: self.min_ecc_bits,
            dh_params: self.dh_params,
            psk: self.psk,
            max_fragment_len: self.max_fragment_len,
            mtu: self.mtu,
            replay_window: self.replay_window,
            flight_start_rto: self.flight_start_rto,
            flight_max_rto: self.flight_max_rto,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            max_queue_rx: self.max_queue_rx,
            max_queue_tx: self.max_queue_tx,
            max_handshake_message_len: self.max_handshake_message_len,
            require_client_certificate: self.require_client_certificate,
            request_client_certificate: self.request_client_certificate,
            extended_master_secret: self.extended_master_secret,
            session_cache: self.session_cache,
            ticket_encrypter: self.ticket_encrypter,
            cert_verifier: self
                .cert_verifier
                .unwrap_or_else(|| Arc::new(LeafKeyVerifier)),
            mac_hook: self.mac_hook,
            crypto_provider,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("transport", &self.transport)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("cipher_suites", &self.cipher_suites.len())
            .field("mtu", &self.mtu)
            .finish()
    }
}
