//! Client side key exchange procedures.

use zeroize::Zeroizing;

use super::{
    check_dh_params, check_peer_scheme, premaster_secret, signature_input,
    transcript_signature_input, verify_signature, Agreement, KeyExchange, KxContext,
    MAX_PSK_IDENTITY_LEN, RSA_PMS_LEN,
};
use crate::buffer::Buf;
use crate::crypto::{Async, SigningKey, Transcript};
use crate::message::{parse_complete, ClientKeyExchange, DigitallySigned};
use crate::message::{ServerKeyExchange, ServerKxParams};
use crate::pending::{AsyncOp, Stage};
use crate::suite::KeyExchangeAlgorithm;
use crate::types::{ProtocolVersion, SignatureAlgorithm, SignatureScheme};
use crate::Error;

/// Validate and verify the ServerKeyExchange.
#[derive(Debug)]
pub(crate) struct RecvServerKx {
    body: Vec<u8>,
    message: Option<ServerKeyExchange>,
    key_alg: Option<SignatureAlgorithm>,
    input: Buf,
    recovered: Buf,
}

impl RecvServerKx {
    pub fn new(body: &[u8]) -> Self {
        RecvServerKx {
            body: body.to_vec(),
            message: None,
            key_alg: None,
            input: Buf::new(),
            recovered: Buf::new(),
        }
    }

    /// `spki` is the server certificate key, absent for PSK suites.
    pub fn poll(
        op: &mut AsyncOp<Self>,
        ctx: &KxContext<'_>,
        kx: &mut KeyExchange,
        spki: Option<&[u8]>,
    ) -> Result<Async<()>, Error> {
        let signed = ctx.params.needs_certificate();

        if op.stage == Stage::Begin {
            let a = &mut *op.args;
            let tls12 = ctx.tls12();
            let message = parse_complete(&a.body, "ServerKeyExchange", |i| {
                ServerKeyExchange::parse(i, kx.algorithm, signed, tls12)
            })?;

            if let Some(hint) = &message.psk_hint {
                if hint.len() > MAX_PSK_IDENTITY_LEN {
                    return Err(Error::decode("PSK identity hint too long"));
                }
            }
            match &message.params {
                ServerKxParams::Dh { p, g, ys } => check_dh_params(ctx.config, p, g, ys)?,
                ServerKxParams::Ecdh { group, point } => {
                    let offered = ctx.config.named_groups().contains(group);
                    if !offered || ctx.provider.kx_group(*group).is_none() {
                        return Err(Error::UnsupportedGroup(group.as_u16()));
                    }
                    if point.is_empty() {
                        return Err(Error::decode("empty ECDH point"));
                    }
                }
                ServerKxParams::None => {}
            }

            if signed {
                let spki = spki.ok_or(Error::CertificateError("no server certificate".into()))?;
                let (alg, _) = ctx
                    .provider
                    .signature_verifier
                    .key_info(spki)
                    .map_err(Error::CertificateError)?;
                let scheme = message.signature.as_ref().and_then(|s| s.scheme);
                check_peer_scheme(tls12, alg, scheme, ctx.config.signature_schemes())?;
                a.key_alg = Some(alg);
            }
            a.message = Some(message);
            op.advance(Stage::Build);
        }

        if op.stage == Stage::Build {
            if signed {
                let a = &mut *op.args;
                let (Some(message), Some(alg)) = (&a.message, a.key_alg) else {
                    return Err(Error::InternalError("server key exchange not parsed"));
                };
                let scheme = message.signature.as_ref().and_then(|s| s.scheme);
                let mut encoded = Buf::new();
                message.params.serialize(&mut encoded);
                let [cr, sr] = ctx.randoms();
                signature_input(ctx.provider, alg, scheme, &[cr, sr, &encoded], &mut a.input)?;
            }
            op.advance(Stage::Do);
        }

        if op.stage == Stage::Do {
            if signed {
                let a = &mut *op.args;
                let (Some(message), Some(alg)) = (&a.message, a.key_alg) else {
                    return Err(Error::InternalError("server key exchange not parsed"));
                };
                let Some(signature) = &message.signature else {
                    return Err(Error::decode("missing ServerKeyExchange signature"));
                };
                let spki = spki.ok_or(Error::CertificateError("no server certificate".into()))?;
                match verify_signature(
                    ctx.provider,
                    spki,
                    alg,
                    signature.scheme,
                    &a.input,
                    &signature.signature,
                    &mut a.recovered,
                )? {
                    Async::Ready(true) => {}
                    Async::Ready(false) => return Err(Error::BadSignature),
                    Async::Pending => return Ok(Async::Pending),
                }
            }
            op.advance(Stage::Finalize);
        }

        if op.stage == Stage::Finalize {
            let message = op
                .args
                .message
                .take()
                .ok_or(Error::InternalError("server key exchange not parsed"))?;
            kx.psk_hint = message.psk_hint;
            match message.params {
                ServerKxParams::Dh { p, g, ys } => {
                    kx.agreement = Agreement::Dh { p, g };
                    kx.peer_public = ys;
                }
                ServerKxParams::Ecdh { group, point } => {
                    kx.agreement = Agreement::Ecdh(group);
                    kx.peer_public = point;
                }
                ServerKxParams::None => {}
            }
            op.advance(Stage::End);
        }

        Ok(Async::Ready(()))
    }
}

/// Build the ClientKeyExchange and the premaster secret.
#[derive(Debug)]
pub(crate) struct SendClientKx {
    client_version: ProtocolVersion,
    identity: Option<Vec<u8>>,
    psk: Option<Zeroizing<Vec<u8>>>,
    exchange: Buf,
    secret: Zeroizing<Buf>,
}

impl SendClientKx {
    /// `client_version` is the version offered in the ClientHello.
    pub fn new(client_version: ProtocolVersion) -> Self {
        SendClientKx {
            client_version,
            identity: None,
            psk: None,
            exchange: Buf::new(),
            secret: Zeroizing::new(Buf::new()),
        }
    }

    /// Writes the message body to `out` and returns the premaster secret.
    /// `spki` is the server certificate key, needed for RSA key transport.
    pub fn poll(
        op: &mut AsyncOp<Self>,
        ctx: &KxContext<'_>,
        kx: &mut KeyExchange,
        spki: Option<&[u8]>,
        out: &mut Buf,
    ) -> Result<Async<Zeroizing<Vec<u8>>>, Error> {
        if op.stage == Stage::Begin {
            let a = &mut *op.args;
            if kx.algorithm.uses_psk() {
                let provider = ctx
                    .config
                    .psk_provider()
                    .ok_or(Error::NoPrivateKey("no PSK provider"))?;
                let (identity, psk) = provider
                    .client_psk(kx.psk_hint.as_deref())
                    .ok_or(Error::NoPrivateKey("no PSK for server hint"))?;
                if identity.len() > MAX_PSK_IDENTITY_LEN {
                    return Err(Error::ConfigError("PSK identity too long".into()));
                }
                a.identity = Some(identity);
                a.psk = Some(Zeroizing::new(psk));
            }
            match kx.algorithm {
                KeyExchangeAlgorithm::Rsa => {
                    let mut pms = vec![0u8; RSA_PMS_LEN];
                    ctx.provider.random(&mut pms[2..])?;
                    pms[..2].copy_from_slice(&a.client_version.as_u16().to_be_bytes());
                    a.secret.clear();
                    a.secret.extend_from_slice(&pms);
                    zeroize::Zeroize::zeroize(&mut pms);
                }
                KeyExchangeAlgorithm::Psk => {}
                _ => kx.start_local(ctx.provider)?,
            }
            op.advance(Stage::Do);
        }

        if op.stage == Stage::Do {
            let a = &mut *op.args;
            match kx.algorithm {
                KeyExchangeAlgorithm::Rsa => {
                    let spki =
                        spki.ok_or(Error::CertificateError("no server certificate".into()))?;
                    a.exchange.clear();
                    match ctx
                        .provider
                        .signature_verifier
                        .rsa_encrypt(spki, &a.secret, &mut a.exchange)
                        .map_err(Error::CryptoError)?
                    {
                        Async::Ready(()) => {}
                        Async::Pending => return Ok(Async::Pending),
                    }
                }
                KeyExchangeAlgorithm::Psk => {}
                _ => {
                    let peer = std::mem::take(&mut kx.peer_public);
                    let r = kx.agree(&peer, &mut a.secret);
                    kx.peer_public = peer;
                    match r? {
                        Async::Ready(()) => {}
                        Async::Pending => return Ok(Async::Pending),
                    }
                    a.exchange.clear();
                    a.exchange.extend_from_slice(kx.local_public()?);
                }
            }
            op.advance(Stage::Finalize);
        }

        let a = &mut *op.args;
        let pms = premaster_secret(kx.algorithm, &a.secret, a.psk.as_deref().map(|p| &p[..]))?;
        let message = ClientKeyExchange {
            psk_identity: a.identity.take(),
            exchange: a.exchange.to_vec(),
        };
        message.serialize(kx.algorithm, out);
        op.advance(Stage::End);
        Ok(Async::Ready(pms))
    }
}

/// Sign the transcript for the client's CertificateVerify.
#[derive(Debug)]
pub(crate) struct SendCertVerify {
    scheme: Option<SignatureScheme>,
    input: Buf,
    signature: Buf,
}

impl SendCertVerify {
    pub fn new(scheme: Option<SignatureScheme>) -> Self {
        SendCertVerify {
            scheme,
            input: Buf::new(),
            signature: Buf::new(),
        }
    }

    pub fn poll(
        op: &mut AsyncOp<Self>,
        transcript: &Transcript,
        key: &mut Box<dyn SigningKey>,
        out: &mut Buf,
    ) -> Result<Async<()>, Error> {
        if op.stage == Stage::Begin {
            let a = &mut *op.args;
            transcript_signature_input(transcript, key.algorithm(), a.scheme, &mut a.input)?;
            op.advance(Stage::Do);
        }

        if op.stage == Stage::Do {
            let a = &mut *op.args;
            a.signature.clear();
            match key
                .sign(a.scheme, &a.input, &mut a.signature)
                .map_err(Error::CryptoError)?
            {
                Async::Ready(()) => {}
                Async::Pending => return Ok(Async::Pending),
            }
            op.advance(Stage::Finalize);
        }

        let a = &mut *op.args;
        DigitallySigned {
            scheme: a.scheme,
            signature: a.signature.to_vec(),
        }
        .serialize(out);
        op.advance(Stage::End);
        Ok(Async::Ready(()))
    }
}
