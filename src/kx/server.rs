//! Server side key exchange procedures.

use zeroize::Zeroizing;

use super::{
    check_peer_scheme, premaster_secret, signature_input, transcript_signature_input,
    verify_signature, Agreement, KeyExchange, KxContext, MAX_PSK_IDENTITY_LEN, RSA_PMS_LEN,
};
use crate::buffer::Buf;
use crate::crypto::{Async, SigningKey, Transcript};
use crate::message::{parse_complete, ClientKeyExchange, DigitallySigned};
use crate::message::{ServerKeyExchange, ServerKxParams};
use crate::pending::{AsyncOp, Stage};
use crate::suite::KeyExchangeAlgorithm;
use crate::types::{ProtocolVersion, SignatureAlgorithm, SignatureScheme};
use crate::Error;

/// Build and sign the ServerKeyExchange.
#[derive(Debug)]
pub(crate) struct SendServerKx {
    scheme: Option<SignatureScheme>,
    psk_hint: Option<Vec<u8>>,
    params: ServerKxParams,
    input: Buf,
    signature: Buf,
}

impl SendServerKx {
    pub fn new(scheme: Option<SignatureScheme>, psk_hint: Option<Vec<u8>>) -> Self {
        SendServerKx {
            scheme,
            psk_hint,
            params: ServerKxParams::None,
            input: Buf::new(),
            signature: Buf::new(),
        }
    }

    /// Drive to completion, writing the message body to `out`.
    pub fn poll(
        op: &mut AsyncOp<Self>,
        ctx: &KxContext<'_>,
        kx: &mut KeyExchange,
        mut key: Option<&mut Box<dyn SigningKey>>,
        out: &mut Buf,
    ) -> Result<Async<()>, Error> {
        let signed = ctx.params.needs_certificate();

        if op.stage == Stage::Begin {
            kx.start_local(ctx.provider)?;
            if kx.algorithm.uses_psk() {
                kx.psk_hint = op.args.psk_hint.clone();
            }
            op.advance(Stage::Build);
        }

        if op.stage == Stage::Build {
            let a = &mut *op.args;
            a.params = match &kx.agreement {
                Agreement::None => ServerKxParams::None,
                Agreement::Dh { p, g } => ServerKxParams::Dh {
                    p: p.clone(),
                    g: g.clone(),
                    ys: kx.local_public()?.to_vec(),
                },
                Agreement::Ecdh(group) => ServerKxParams::Ecdh {
                    group: *group,
                    point: kx.local_public()?.to_vec(),
                },
            };
            if signed {
                let key = key.as_deref().ok_or(Error::NoPrivateKey("server key"))?;
                let mut encoded = Buf::new();
                a.params.serialize(&mut encoded);
                let [cr, sr] = ctx.randoms();
                signature_input(
                    ctx.provider,
                    key.algorithm(),
                    a.scheme,
                    &[cr, sr, &encoded],
                    &mut a.input,
                )?;
            }
            op.advance(Stage::Do);
        }

        if op.stage == Stage::Do {
            if signed {
                let a = &mut *op.args;
                let key = key.as_deref_mut().ok_or(Error::NoPrivateKey("server key"))?;
                a.signature.clear();
                match key
                    .sign(a.scheme, &a.input, &mut a.signature)
                    .map_err(Error::CryptoError)?
                {
                    Async::Ready(()) => {}
                    Async::Pending => return Ok(Async::Pending),
                }
            }
            op.advance(Stage::Finalize);
        }

        if op.stage == Stage::Finalize {
            let a = &mut *op.args;
            let message = ServerKeyExchange {
                psk_hint: if kx.algorithm.uses_psk() {
                    Some(a.psk_hint.clone().unwrap_or_default())
                } else {
                    None
                },
                params: std::mem::replace(&mut a.params, ServerKxParams::None),
                signature: signed.then(|| DigitallySigned {
                    scheme: a.scheme,
                    signature: a.signature.to_vec(),
                }),
            };
            message.serialize(out);
            op.advance(Stage::End);
        }

        Ok(Async::Ready(()))
    }
}

/// Process the ClientKeyExchange into the premaster secret.
#[derive(Debug)]
pub(crate) struct RecvClientKx {
    body: Vec<u8>,
    client_version: ProtocolVersion,
    message: Option<ClientKeyExchange>,
    psk: Option<Zeroizing<Vec<u8>>>,
    fallback: Zeroizing<Vec<u8>>,
    secret: Zeroizing<Buf>,
}

impl RecvClientKx {
    /// `client_version` is the version from the ClientHello, which an RSA
    /// premaster secret must start with.
    pub fn new(body: &[u8], client_version: ProtocolVersion) -> Self {
        RecvClientKx {
            body: body.to_vec(),
            client_version,
            message: None,
            psk: None,
            fallback: Zeroizing::new(Vec::new()),
            secret: Zeroizing::new(Buf::new()),
        }
    }

    pub fn poll(
        op: &mut AsyncOp<Self>,
        ctx: &KxContext<'_>,
        kx: &mut KeyExchange,
        key: Option<&mut Box<dyn SigningKey>>,
    ) -> Result<Async<Zeroizing<Vec<u8>>>, Error> {
        if op.stage == Stage::Begin {
            let a = &mut *op.args;
            let message = parse_complete(&a.body, "ClientKeyExchange", |i| {
                ClientKeyExchange::parse(i, kx.algorithm)
            })?;
            if let Some(identity) = &message.psk_identity {
                if identity.len() > MAX_PSK_IDENTITY_LEN {
                    return Err(Error::decode("PSK identity too long"));
                }
                let provider = ctx
                    .config
                    .psk_provider()
                    .ok_or(Error::NoPrivateKey("no PSK provider"))?;
                let psk = provider.server_psk(identity).ok_or_else(|| {
                    debug!("Unknown PSK identity ({} bytes)", identity.len());
                    Error::UnknownPskIdentity
                })?;
                a.psk = Some(Zeroizing::new(psk));
            }
            if kx.algorithm != KeyExchangeAlgorithm::Psk
                && kx.algorithm != KeyExchangeAlgorithm::Rsa
                && message.exchange.is_empty()
            {
                return Err(Error::decode("empty client key share"));
            }
            a.message = Some(message);
            op.advance(Stage::Build);
        }

        if op.stage == Stage::Build {
            if kx.algorithm == KeyExchangeAlgorithm::Rsa {
                // Random premaster secret used instead of a malformed one,
                // so a padding failure is indistinguishable from success.
                let a = &mut *op.args;
                let mut fallback = vec![0u8; RSA_PMS_LEN];
                ctx.provider.random(&mut fallback[2..])?;
                fallback[..2].copy_from_slice(&a.client_version.as_u16().to_be_bytes());
                a.fallback = Zeroizing::new(fallback);
            }
            op.advance(Stage::Do);
        }

        if op.stage == Stage::Do {
            let a = &mut *op.args;
            let message = a
                .message
                .as_ref()
                .ok_or(Error::InternalError("client key exchange not parsed"))?;
            match kx.algorithm {
                KeyExchangeAlgorithm::Rsa => {
                    let key = key.ok_or(Error::NoPrivateKey("server key"))?;
                    a.secret.clear();
                    match key.decrypt(&message.exchange, &mut a.secret) {
                        Ok(Async::Ready(())) => {}
                        Ok(Async::Pending) => return Ok(Async::Pending),
                        Err(e) => {
                            debug!("Premaster secret decryption failed: {}", e);
                            a.secret.clear();
                        }
                    }
                }
                KeyExchangeAlgorithm::Psk => {}
                _ => match kx.agree(&message.exchange, &mut a.secret)? {
                    Async::Ready(()) => {}
                    Async::Pending => return Ok(Async::Pending),
                },
            }
            op.advance(Stage::Verify);
        }

        if op.stage == Stage::Verify {
            if kx.algorithm == KeyExchangeAlgorithm::Rsa {
                let a = &mut *op.args;
                let version = a.client_version.as_u16().to_be_bytes();
                let good = a.secret.len() == RSA_PMS_LEN && a.secret[..2] == version;
                if !good {
                    debug!("Bad RSA premaster secret, using random fallback");
                    a.secret.clear();
                    a.secret.extend_from_slice(&a.fallback);
                }
            }
            op.advance(Stage::Finalize);
        }

        let a = &mut *op.args;
        let pms = premaster_secret(kx.algorithm, &a.secret, a.psk.as_deref().map(|p| &p[..]))?;
        if let Some(m) = &a.message {
            kx.peer_public = m.exchange.clone();
        }
        op.advance(Stage::End);
        Ok(Async::Ready(pms))
    }
}

/// Verify the client's CertificateVerify against the transcript.
#[derive(Debug)]
pub(crate) struct RecvCertVerify {
    body: Vec<u8>,
    message: Option<DigitallySigned>,
    key_alg: Option<SignatureAlgorithm>,
    input: Buf,
    recovered: Buf,
}

impl RecvCertVerify {
    pub fn new(body: &[u8]) -> Self {
        RecvCertVerify {
            body: body.to_vec(),
            message: None,
            key_alg: None,
            input: Buf::new(),
            recovered: Buf::new(),
        }
    }

    pub fn poll(
        op: &mut AsyncOp<Self>,
        ctx: &KxContext<'_>,
        transcript: &Transcript,
        spki: &[u8],
    ) -> Result<Async<()>, Error> {
        if op.stage == Stage::Begin {
            let a = &mut *op.args;
            let tls12 = ctx.tls12();
            let message =
                parse_complete(&a.body, "CertificateVerify", |i| DigitallySigned::parse(i, tls12))?;
            let (alg, _) = ctx
                .provider
                .signature_verifier
                .key_info(spki)
                .map_err(Error::CertificateError)?;
            check_peer_scheme(tls12, alg, message.scheme, ctx.config.signature_schemes())?;
            a.key_alg = Some(alg);
            a.message = Some(message);
            op.advance(Stage::Build);
        }

        if op.stage == Stage::Build {
            let a = &mut *op.args;
            let (Some(message), Some(alg)) = (&a.message, a.key_alg) else {
                return Err(Error::InternalError("certificate verify not parsed"));
            };
            transcript_signature_input(transcript, alg, message.scheme, &mut a.input)?;
            op.advance(Stage::Do);
        }

        if op.stage == Stage::Do {
            let a = &mut *op.args;
            let (Some(message), Some(alg)) = (&a.message, a.key_alg) else {
                return Err(Error::InternalError("certificate verify not parsed"));
            };
            match verify_signature(
                ctx.provider,
                spki,
                alg,
                message.scheme,
                &a.input,
                &message.signature,
                &mut a.recovered,
            )? {
                Async::Ready(true) => {}
                Async::Ready(false) => return Err(Error::BadSignature),
                Async::Pending => return Ok(Async::Pending),
            }
            op.advance(Stage::End);
        }

        Ok(Async::Ready(()))
    }
}
