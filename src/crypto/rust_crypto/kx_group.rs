//! Ephemeral key agreement: ECDHE over P-256, P-384 and X25519, and
//! finite field DHE with arbitrary server chosen groups.

use num_bigint::{BigUint, RandBigInt};
use p256::{ecdh::EphemeralSecret, PublicKey as P256PublicKey};
use p384::{ecdh::EphemeralSecret as P384EphemeralSecret, PublicKey as P384PublicKey};
use rand::rngs::OsRng;

use crate::buffer::Buf;
use crate::crypto::provider::{ActiveKeyExchange, DhProvider, SupportedKxGroup};
use crate::crypto::Async;
use crate::types::NamedGroup;

enum EcdhKeyExchange {
    P256 {
        secret: EphemeralSecret,
        public_key: Buf,
    },
    P384 {
        secret: P384EphemeralSecret,
        public_key: Buf,
    },
    X25519 {
        secret: x25519_dalek::StaticSecret,
        public_key: Buf,
    },
}

impl std::fmt::Debug for EcdhKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyExchange")
            .field("group", &self.group())
            .field("public_key_len", &self.public_key().len())
            .finish_non_exhaustive()
    }
}

impl EcdhKeyExchange {
    fn new(group: NamedGroup) -> Result<Self, String> {
        match group {
            NamedGroup::Secp256r1 => {
                let secret = EphemeralSecret::random(&mut OsRng);
                let public_key = Buf::from_slice(&P256PublicKey::from(&secret).to_sec1_bytes());
                Ok(EcdhKeyExchange::P256 { secret, public_key })
            }
            NamedGroup::Secp384r1 => {
                let secret = P384EphemeralSecret::random(&mut OsRng);
                let public_key = Buf::from_slice(&P384PublicKey::from(&secret).to_sec1_bytes());
                Ok(EcdhKeyExchange::P384 { secret, public_key })
            }
            NamedGroup::X25519 => {
                let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
                let public_key =
                    Buf::from_slice(x25519_dalek::PublicKey::from(&secret).as_bytes());
                Ok(EcdhKeyExchange::X25519 { secret, public_key })
            }
            _ => Err(format!("Unsupported group: {:?}", group)),
        }
    }

    fn group(&self) -> NamedGroup {
        match self {
            EcdhKeyExchange::P256 { .. } => NamedGroup::Secp256r1,
            EcdhKeyExchange::P384 { .. } => NamedGroup::Secp384r1,
            EcdhKeyExchange::X25519 { .. } => NamedGroup::X25519,
        }
    }
}

impl ActiveKeyExchange for EcdhKeyExchange {
    fn public_key(&self) -> &[u8] {
        match self {
            EcdhKeyExchange::P256 { public_key, .. } => public_key,
            EcdhKeyExchange::P384 { public_key, .. } => public_key,
            EcdhKeyExchange::X25519 { public_key, .. } => public_key,
        }
    }

    fn agree(&mut self, peer: &[u8], out: &mut Buf) -> Result<Async<()>, String> {
        out.clear();
        match self {
            EcdhKeyExchange::P256 { secret, .. } => {
                let peer = P256PublicKey::from_sec1_bytes(peer)
                    .map_err(|_| "Invalid P-256 public key".to_string())?;
                let shared = secret.diffie_hellman(&peer);
                out.extend_from_slice(shared.raw_secret_bytes().as_slice());
            }
            EcdhKeyExchange::P384 { secret, .. } => {
                let peer = P384PublicKey::from_sec1_bytes(peer)
                    .map_err(|_| "Invalid P-384 public key".to_string())?;
                let shared = secret.diffie_hellman(&peer);
                out.extend_from_slice(shared.raw_secret_bytes().as_slice());
            }
            EcdhKeyExchange::X25519 { secret, .. } => {
                let bytes: [u8; 32] = peer
                    .try_into()
                    .map_err(|_| "Invalid X25519 public key length".to_string())?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(bytes));
                if !shared.was_contributory() {
                    return Err("X25519 low order point".to_string());
                }
                out.extend_from_slice(shared.as_bytes());
            }
        }
        Ok(Async::Ready(()))
    }
}

#[derive(Debug)]
struct EcdhGroup(NamedGroup);

impl SupportedKxGroup for EcdhGroup {
    fn name(&self) -> NamedGroup {
        self.0
    }

    fn start(&self) -> Result<Box<dyn ActiveKeyExchange>, String> {
        Ok(Box::new(EcdhKeyExchange::new(self.0)?))
    }
}

static KX_GROUP_X25519: EcdhGroup = EcdhGroup(NamedGroup::X25519);
static KX_GROUP_P256: EcdhGroup = EcdhGroup(NamedGroup::Secp256r1);
static KX_GROUP_P384: EcdhGroup = EcdhGroup(NamedGroup::Secp384r1);

/// All supported ECDHE groups, in preference order.
pub(super) static ALL_KX_GROUPS: &[&dyn SupportedKxGroup] =
    &[&KX_GROUP_P256, &KX_GROUP_P384, &KX_GROUP_X25519];

/// Finite field Diffie-Hellman key pair.
struct DhKeyExchange {
    prime: BigUint,
    private: BigUint,
    public_key: Buf,
}

impl std::fmt::Debug for DhKeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyExchange")
            .field("prime_bits", &self.prime.bits())
            .finish_non_exhaustive()
    }
}

impl ActiveKeyExchange for DhKeyExchange {
    fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    fn agree(&mut self, peer: &[u8], out: &mut Buf) -> Result<Async<()>, String> {
        let y = BigUint::from_bytes_be(peer);
        let one = BigUint::from(1u32);
        // 1 < Y < p - 1
        if y <= one || y >= &self.prime - &one {
            return Err("Invalid DH public value".to_string());
        }
        let z = y.modpow(&self.private, &self.prime);
        out.clear();
        // Leading zero bytes of Z are stripped
        out.extend_from_slice(&z.to_bytes_be());
        Ok(Async::Ready(()))
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoDhProvider;

impl DhProvider for RustCryptoDhProvider {
    fn start(&self, prime: &[u8], generator: &[u8]) -> Result<Box<dyn ActiveKeyExchange>, String> {
        let p = BigUint::from_bytes_be(prime);
        let g = BigUint::from_bytes_be(generator);
        let two = BigUint::from(2u32);
        if p.bits() < 16 || g < two || g >= p {
            return Err("Invalid DH group".to_string());
        }

        let upper = &p - &two;
        let private = OsRng.gen_biguint_range(&two, &upper);
        let y = g.modpow(&private, &p);

        Ok(Box::new(DhKeyExchange {
            prime: p,
            private,
            public_key: Buf::from(y.to_bytes_be()),
        }))
    }
}

pub(super) static DH_PROVIDER: RustCryptoDhProvider = RustCryptoDhProvider;

#[cfg(test)]
mod tests {
    use super::*;

    fn run(group: &dyn SupportedKxGroup) {
        let mut a = group.start().unwrap();
        let mut b = group.start().unwrap();
        let (pa, pb) = (a.public_key().to_vec(), b.public_key().to_vec());
        let mut za = Buf::new();
        let mut zb = Buf::new();
        a.agree(&pb, &mut za).unwrap();
        b.agree(&pa, &mut zb).unwrap();
        assert_eq!(za, zb);
        assert!(!za.is_empty());
    }

    #[test]
    fn ecdh_groups_agree() {
        for g in ALL_KX_GROUPS {
            run(*g);
        }
    }

    #[test]
    fn dh_agrees_and_rejects_trivial_values() {
        // RFC 7919 ffdhe2048
        let p = crate::kx::FFDHE2048_PRIME;
        let mut a = DH_PROVIDER.start(p, &[2]).unwrap();
        let mut b = DH_PROVIDER.start(p, &[2]).unwrap();
        let (pa, pb) = (a.public_key().to_vec(), b.public_key().to_vec());
        let mut za = Buf::new();
        let mut zb = Buf::new();
        a.agree(&pb, &mut za).unwrap();
        b.agree(&pa, &mut zb).unwrap();
        assert_eq!(za, zb);

        assert!(a.agree(&[1], &mut za).is_err());
        assert!(a.agree(&[0], &mut za).is_err());
    }

    #[test]
    fn x25519_rejects_short_key() {
        let mut a = KX_GROUP_X25519.start().unwrap();
        let mut out = Buf::new();
        assert!(a.agree(&[1; 31], &mut out).is_err());
    }
}
