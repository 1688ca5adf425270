use std::fmt;

use zeroize::Zeroizing;

use super::{prf, HmacProvider};
use crate::suite::SuiteParams;
use crate::types::ProtocolVersion;
use crate::{Error, Side};

/// Per direction keys cut from the key block.
///
/// Order in the key block: client MAC, server MAC, client key, server key,
/// client IV, server IV. Lengths that do not apply to the suite are zero.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub client_mac_key: Zeroizing<Vec<u8>>,
    pub server_mac_key: Zeroizing<Vec<u8>>,
    pub client_key: Zeroizing<Vec<u8>>,
    pub server_key: Zeroizing<Vec<u8>>,
    pub client_iv: Zeroizing<Vec<u8>>,
    pub server_iv: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    pub fn derive(
        hmac: &dyn HmacProvider,
        params: &SuiteParams,
        version: ProtocolVersion,
        master_secret: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) -> Result<Self, Error> {
        let mac_len = params.mac_len();
        let key_len = params.key_len();
        let iv_len = params.fixed_iv_len(version);
        let total = 2 * (mac_len + key_len + iv_len);

        let block = prf::key_block(
            hmac,
            params.prf_hash(version),
            master_secret,
            client_random,
            server_random,
            total,
        )?;

        let mut rest: &[u8] = &block;
        let mut take = |n: usize| {
            let (head, tail) = rest.split_at(n);
            rest = tail;
            Zeroizing::new(head.to_vec())
        };

        Ok(KeyMaterial {
            client_mac_key: take(mac_len),
            server_mac_key: take(mac_len),
            client_key: take(key_len),
            server_key: take(key_len),
            client_iv: take(iv_len),
            server_iv: take(iv_len),
        })
    }

    /// `(mac_key, key, iv)` used by `side` for writing.
    pub fn write_keys(&self, side: Side) -> (&[u8], &[u8], &[u8]) {
        match side {
            Side::Client => (&self.client_mac_key, &self.client_key, &self.client_iv),
            Side::Server => (&self.server_mac_key, &self.server_key, &self.server_iv),
        }
    }

    /// `(mac_key, key, iv)` used by `side` for reading.
    pub fn read_keys(&self, side: Side) -> (&[u8], &[u8], &[u8]) {
        self.write_keys(side.peer())
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("mac_len", &self.client_mac_key.len())
            .field("key_len", &self.client_key.len())
            .field("iv_len", &self.client_iv.len())
            .finish()
    }
}

/// Everything needed to install record protection for one direction pair:
/// negotiated suite, version and the derived keys.
#[derive(Debug, Clone)]
pub struct CipherSpec {
    pub params: &'static SuiteParams,
    pub version: ProtocolVersion,
    pub keys: KeyMaterial,
}
