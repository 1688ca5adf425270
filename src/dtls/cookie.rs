//! Stateless HelloVerifyRequest cookies (RFC 6347 section 4.2.1).
//!
//! The cookie is an HMAC-SHA256 under a per connection secret over the
//! parts of the ClientHello that must not change between the two hellos,
//! plus the peer address when the application supplies one.

use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::crypto::CryptoProvider;
use crate::message::ClientHello;
use crate::types::HashAlgorithm;
use crate::util::ct_eq;
use crate::Error;

pub(crate) const COOKIE_LEN: usize = 32;

pub(crate) struct CookieSecret {
    secret: Zeroizing<[u8; 32]>,
}

impl CookieSecret {
    pub fn new(provider: &CryptoProvider) -> Result<Self, Error> {
        let mut secret = Zeroizing::new([0u8; 32]);
        provider.random(&mut secret[..])?;
        Ok(CookieSecret { secret })
    }

    /// Cookie for `hello` from `peer`.
    pub fn generate(
        &self,
        provider: &CryptoProvider,
        hello: &ClientHello,
        peer: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let mut input = Buf::new();
        hello.client_version.serialize(&mut input);
        input.extend_from_slice(&hello.random.0);
        input.push(hello.session_id.as_slice().len() as u8);
        input.extend_from_slice(hello.session_id.as_slice());
        for suite in &hello.cipher_suites {
            suite.serialize(&mut input);
        }
        input.extend_from_slice(&hello.compression_methods);

        let mut out = Buf::new();
        provider
            .hmac_provider
            .hmac(
                HashAlgorithm::SHA256,
                &self.secret[..],
                &[&input, peer],
                &mut out,
            )
            .map_err(Error::CryptoError)?;
        out.truncate(COOKIE_LEN);
        Ok(out.into_vec())
    }

    /// Whether `hello` carries the cookie we would issue for it.
    pub fn verify(
        &self,
        provider: &CryptoProvider,
        hello: &ClientHello,
        peer: &[u8],
    ) -> Result<bool, Error> {
        if hello.cookie.len() != COOKIE_LEN {
            return Ok(false);
        }
        let expected = self.generate(provider, hello, peer)?;
        Ok(ct_eq(&expected, &hello.cookie))
    }
}

impl std::fmt::Debug for CookieSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSecret").finish()
    }
}
