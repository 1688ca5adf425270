//! Handshake message ordering.
//!
//! A pure check of an incoming handshake message (or ChangeCipherSpec)
//! against the messages already seen in the current handshake. The ledger
//! is a bit set that only grows until the next handshake starts, which is
//! also the case after a DTLS cookie exchange.

use std::fmt;

use crate::suite::{KeyExchangeAlgorithm, SuiteParams};
use crate::types::{ContentType, HandshakeType};
use crate::{Error, Side};

// ChangeCipherSpec is not a handshake type; it takes a bit above all of them.
const CCS_BIT: u32 = 31;

/// What arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arrival {
    Handshake(HandshakeType),
    ChangeCipherSpec,
}

/// Set of messages seen in the current handshake.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct HandshakeLedger(u32);

impl HandshakeLedger {
    fn bit(arrival: Arrival) -> u32 {
        match arrival {
            Arrival::Handshake(t) => 1 << (t.as_u8() as u32 % CCS_BIT),
            Arrival::ChangeCipherSpec => 1 << CCS_BIT,
        }
    }

    pub fn has(&self, arrival: Arrival) -> bool {
        self.0 & Self::bit(arrival) != 0
    }

    pub fn seen(&self, t: HandshakeType) -> bool {
        self.has(Arrival::Handshake(t))
    }

    pub fn mark(&mut self, arrival: Arrival) {
        self.0 |= Self::bit(arrival);
    }

    /// Forget everything, for a fresh handshake.
    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

impl fmt::Debug for HandshakeLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandshakeLedger({:#010x})", self.0)
    }
}

/// Facts about the handshake the order depends on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OrderContext {
    /// Side receiving the message.
    pub side: Side,
    pub dtls: bool,
    /// Negotiated suite, once the hellos are through.
    pub params: Option<&'static SuiteParams>,
    /// Abbreviated handshake (session resumption).
    pub resuming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OrderError {
    /// Second message of a type in one handshake.
    Duplicate(HandshakeType),
    /// Prerequisite not seen yet.
    OutOfOrder(HandshakeType),
    /// Message never sent to this side.
    Unexpected(HandshakeType),
    /// ChangeCipherSpec seen twice or too early in a datagram handshake.
    /// Not an error, the record is dropped.
    RetransmittedCcs,
    /// ChangeCipherSpec seen twice or too early in a stream handshake.
    BadCcs,
}

impl OrderError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, OrderError::RetransmittedCcs)
    }
}

impl From<OrderError> for Error {
    fn from(value: OrderError) -> Self {
        match value {
            OrderError::Duplicate(t) => Error::DuplicateMessage(t),
            OrderError::OutOfOrder(t) => Error::OutOfOrder(t),
            OrderError::Unexpected(t) => Error::UnexpectedMessage(format!("{:?}", t)),
            OrderError::RetransmittedCcs | OrderError::BadCcs => {
                Error::UnexpectedRecord(ContentType::ChangeCipherSpec)
            }
        }
    }
}

fn server_kx_required(params: Option<&SuiteParams>) -> bool {
    params
        .map(|p| !matches!(p.kx, KeyExchangeAlgorithm::Rsa | KeyExchangeAlgorithm::Psk))
        .unwrap_or(false)
}

fn certificate_required(params: Option<&SuiteParams>) -> bool {
    params.map(|p| p.needs_certificate()).unwrap_or(true)
}

/// Decide whether `arrival` may be processed given `ledger`.
///
/// Does not mark the ledger. The caller marks after the message was
/// handled so a message that suspends is checked only once.
pub(crate) fn check(
    arrival: Arrival,
    ledger: &HandshakeLedger,
    ctx: &OrderContext,
) -> Result<(), OrderError> {
    use HandshakeType as H;

    let t = match arrival {
        Arrival::ChangeCipherSpec => return check_ccs(ledger, ctx),
        Arrival::Handshake(t) => t,
    };

    // HelloRequest sits outside the handshake proper.
    if t == H::HelloRequest {
        return match ctx.side {
            Side::Client => Ok(()),
            Side::Server => Err(OrderError::Unexpected(t)),
        };
    }

    let from_server = matches!(
        t,
        H::ServerHello
            | H::HelloVerifyRequest
            | H::ServerKeyExchange
            | H::CertificateRequest
            | H::ServerHelloDone
            | H::NewSessionTicket
    );
    let from_client = matches!(t, H::ClientHello | H::ClientKeyExchange | H::CertificateVerify);
    if (from_server && ctx.side == Side::Server) || (from_client && ctx.side == Side::Client) {
        return Err(OrderError::Unexpected(t));
    }
    if let H::Unknown(_) = t {
        return Err(OrderError::Unexpected(t));
    }
    if t == H::HelloVerifyRequest && !ctx.dtls {
        return Err(OrderError::Unexpected(t));
    }

    if ledger.seen(t) {
        return Err(OrderError::Duplicate(t));
    }

    let need = |prereq: HandshakeType| {
        if ledger.seen(prereq) {
            Ok(())
        } else {
            Err(OrderError::OutOfOrder(t))
        }
    };

    match ctx.side {
        Side::Client => match t {
            H::HelloVerifyRequest => {
                if ledger.seen(H::ServerHello) {
                    return Err(OrderError::OutOfOrder(t));
                }
            }
            H::ServerHello => {}
            H::Certificate => {
                need(H::ServerHello)?;
                if ctx.resuming {
                    return Err(OrderError::OutOfOrder(t));
                }
            }
            H::ServerKeyExchange => {
                need(H::ServerHello)?;
                // RSA key transport has no server parameters.
                if ctx.params.map_or(false, |p| p.kx == KeyExchangeAlgorithm::Rsa) {
                    return Err(OrderError::Unexpected(t));
                }
                if certificate_required(ctx.params) {
                    need(H::Certificate)?;
                }
            }
            H::CertificateRequest => {
                need(H::ServerHello)?;
                if certificate_required(ctx.params) {
                    need(H::Certificate)?;
                }
                if server_kx_required(ctx.params) {
                    need(H::ServerKeyExchange)?;
                }
            }
            H::ServerHelloDone => {
                need(H::ServerHello)?;
                if certificate_required(ctx.params) {
                    need(H::Certificate)?;
                }
                if server_kx_required(ctx.params) {
                    need(H::ServerKeyExchange)?;
                }
            }
            H::NewSessionTicket => {
                need(H::ServerHello)?;
                if !ctx.resuming {
                    need(H::ServerHelloDone)?;
                }
            }
            H::Finished => {
                need(H::ServerHello)?;
                if !ledger.has(Arrival::ChangeCipherSpec) {
                    return Err(OrderError::OutOfOrder(t));
                }
            }
            _ => return Err(OrderError::Unexpected(t)),
        },
        Side::Server => match t {
            H::ClientHello => {}
            H::Certificate => {
                need(H::ClientHello)?;
                if ctx.resuming {
                    return Err(OrderError::OutOfOrder(t));
                }
            }
            H::ClientKeyExchange => {
                need(H::ClientHello)?;
                if ctx.resuming {
                    return Err(OrderError::OutOfOrder(t));
                }
            }
            H::CertificateVerify => {
                need(H::Certificate)?;
                need(H::ClientKeyExchange)?;
            }
            H::Finished => {
                need(H::ClientHello)?;
                if !ledger.has(Arrival::ChangeCipherSpec) {
                    return Err(OrderError::OutOfOrder(t));
                }
            }
            _ => return Err(OrderError::Unexpected(t)),
        },
    }

    Ok(())
}

fn check_ccs(ledger: &HandshakeLedger, ctx: &OrderContext) -> Result<(), OrderError> {
    use HandshakeType as H;

    let bad = if ctx.dtls {
        OrderError::RetransmittedCcs
    } else {
        OrderError::BadCcs
    };

    if ledger.has(Arrival::ChangeCipherSpec) {
        return Err(bad);
    }

    let ready = match (ctx.side, ctx.resuming) {
        (Side::Client, false) => ledger.seen(H::ServerHelloDone),
        (Side::Client, true) => ledger.seen(H::ServerHello),
        (Side::Server, false) => ledger.seen(H::ClientKeyExchange),
        // Resuming server has sent its Finished before the client's CCS.
        (Side::Server, true) => ledger.seen(H::ClientHello),
    };

    if ready {
        Ok(())
    } else {
        Err(bad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::CipherSuite;
    use HandshakeType as H;

    fn ctx(side: Side, suite: CipherSuite, dtls: bool) -> OrderContext {
        OrderContext {
            side,
            dtls,
            params: suite.params(),
            resuming: false,
        }
    }

    fn feed(
        ledger: &mut HandshakeLedger,
        ctx: &OrderContext,
        arrivals: &[Arrival],
    ) -> Result<(), OrderError> {
        for a in arrivals {
            check(*a, ledger, ctx)?;
            ledger.mark(*a);
        }
        Ok(())
    }

    #[test]
    fn full_rsa_flight_is_in_order() {
        let c = ctx(Side::Client, CipherSuite::RSA_WITH_AES_128_CBC_SHA256, false);
        let mut ledger = HandshakeLedger::default();
        feed(
            &mut ledger,
            &c,
            &[
                Arrival::Handshake(H::ServerHello),
                Arrival::Handshake(H::Certificate),
                Arrival::Handshake(H::ServerHelloDone),
                Arrival::ChangeCipherSpec,
                Arrival::Handshake(H::Finished),
            ],
        )
        .unwrap();
    }

    #[test]
    fn second_message_of_a_type_is_a_duplicate() {
        let c = ctx(Side::Client, CipherSuite::RSA_WITH_AES_128_CBC_SHA256, false);
        let mut ledger = HandshakeLedger::default();
        feed(&mut ledger, &c, &[Arrival::Handshake(H::ServerHello)]).unwrap();
        assert_eq!(
            check(Arrival::Handshake(H::ServerHello), &ledger, &c),
            Err(OrderError::Duplicate(H::ServerHello))
        );
    }

    #[test]
    fn server_hello_done_needs_certificate_and_key_exchange() {
        let c = ctx(Side::Client, CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256, false);
        let mut ledger = HandshakeLedger::default();
        feed(&mut ledger, &c, &[Arrival::Handshake(H::ServerHello)]).unwrap();
        assert_eq!(
            check(Arrival::Handshake(H::ServerHelloDone), &ledger, &c),
            Err(OrderError::OutOfOrder(H::ServerHelloDone))
        );
        feed(&mut ledger, &c, &[Arrival::Handshake(H::Certificate)]).unwrap();
        assert_eq!(
            check(Arrival::Handshake(H::ServerHelloDone), &ledger, &c),
            Err(OrderError::OutOfOrder(H::ServerHelloDone))
        );
        feed(&mut ledger, &c, &[Arrival::Handshake(H::ServerKeyExchange)]).unwrap();
        assert!(check(Arrival::Handshake(H::ServerHelloDone), &ledger, &c).is_ok());
    }

    #[test]
    fn psk_needs_neither_certificate_nor_key_exchange() {
        let c = ctx(Side::Client, CipherSuite::PSK_WITH_AES_128_CBC_SHA256, false);
        let mut ledger = HandshakeLedger::default();
        feed(
            &mut ledger,
            &c,
            &[
                Arrival::Handshake(H::ServerHello),
                Arrival::Handshake(H::ServerHelloDone),
            ],
        )
        .unwrap();
    }

    #[test]
    fn rsa_key_transport_has_no_server_key_exchange() {
        let c = ctx(Side::Client, CipherSuite::RSA_WITH_AES_128_CBC_SHA256, false);
        let mut ledger = HandshakeLedger::default();
        feed(
            &mut ledger,
            &c,
            &[
                Arrival::Handshake(H::ServerHello),
                Arrival::Handshake(H::Certificate),
            ],
        )
        .unwrap();
        assert_eq!(
            check(Arrival::Handshake(H::ServerKeyExchange), &ledger, &c),
            Err(OrderError::Unexpected(H::ServerKeyExchange))
        );

        // A PSK server may still send its identity hint.
        let psk = ctx(Side::Client, CipherSuite::PSK_WITH_AES_128_CBC_SHA256, false);
        let mut ledger = HandshakeLedger::default();
        feed(&mut ledger, &psk, &[Arrival::Handshake(H::ServerHello)]).unwrap();
        assert!(check(Arrival::Handshake(H::ServerKeyExchange), &ledger, &psk).is_ok());
    }

    #[test]
    fn finished_needs_change_cipher_spec() {
        let c = ctx(Side::Server, CipherSuite::RSA_WITH_AES_128_CBC_SHA256, false);
        let mut ledger = HandshakeLedger::default();
        feed(
            &mut ledger,
            &c,
            &[
                Arrival::Handshake(H::ClientHello),
                Arrival::Handshake(H::ClientKeyExchange),
            ],
        )
        .unwrap();
        assert_eq!(
            check(Arrival::Handshake(H::Finished), &ledger, &c),
            Err(OrderError::OutOfOrder(H::Finished))
        );
        feed(&mut ledger, &c, &[Arrival::ChangeCipherSpec]).unwrap();
        assert!(check(Arrival::Handshake(H::Finished), &ledger, &c).is_ok());
    }

    #[test]
    fn duplicate_ccs_is_dropped_in_dtls_and_fatal_in_tls() {
        for dtls in [false, true] {
            let c = ctx(Side::Server, CipherSuite::RSA_WITH_AES_128_CBC_SHA256, dtls);
            let mut ledger = HandshakeLedger::default();
            feed(
                &mut ledger,
                &c,
                &[
                    Arrival::Handshake(H::ClientHello),
                    Arrival::Handshake(H::ClientKeyExchange),
                    Arrival::ChangeCipherSpec,
                ],
            )
            .unwrap();
            let err = check(Arrival::ChangeCipherSpec, &ledger, &c).unwrap_err();
            assert_eq!(err.is_fatal(), !dtls);
        }
    }

    #[test]
    fn early_ccs_in_dtls_is_not_fatal() {
        let c = ctx(Side::Server, CipherSuite::RSA_WITH_AES_128_CBC_SHA256, true);
        let mut ledger = HandshakeLedger::default();
        feed(&mut ledger, &c, &[Arrival::Handshake(H::ClientHello)]).unwrap();
        assert_eq!(
            check(Arrival::ChangeCipherSpec, &ledger, &c),
            Err(OrderError::RetransmittedCcs)
        );
    }

    #[test]
    fn wrong_direction_is_unexpected() {
        let c = ctx(Side::Server, CipherSuite::RSA_WITH_AES_128_CBC_SHA256, false);
        let ledger = HandshakeLedger::default();
        assert_eq!(
            check(Arrival::Handshake(H::ServerHello), &ledger, &c),
            Err(OrderError::Unexpected(H::ServerHello))
        );
        assert_eq!(
            check(Arrival::Handshake(H::HelloVerifyRequest), &ledger, &ctx(Side::Client, CipherSuite::RSA_WITH_AES_128_CBC_SHA256, false)),
            Err(OrderError::Unexpected(H::HelloVerifyRequest))
        );
    }

    #[test]
    fn reset_starts_over() {
        let c = ctx(Side::Client, CipherSuite::RSA_WITH_AES_128_CBC_SHA256, true);
        let mut ledger = HandshakeLedger::default();
        feed(&mut ledger, &c, &[Arrival::Handshake(H::HelloVerifyRequest)]).unwrap();
        ledger.reset();
        feed(&mut ledger, &c, &[Arrival::Handshake(H::HelloVerifyRequest)]).unwrap();
    }
}
