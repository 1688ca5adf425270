//! Datagram transport: cookies, loss, reordering, replay and fragmentation.

mod common;

use std::time::{Duration, Instant};

use tlscore::suite::CipherSuite;
use tlscore::types::ProtocolVersion;
use tlscore::Status;

use common::*;

#[test]
fn handshake_with_cookie_exchange() {
    let _ = env_logger::try_init();
    let mut pair = pair(datagram().build().unwrap(), Some(rsa_identity));

    pair.client.conn.start_handshake().unwrap();
    let hello = pair.client.drain();
    assert_eq!(hello.len(), 1);
    assert_eq!(handshake_types(&hello[0], true), vec![CLIENT_HELLO]);

    pair.server.feed(&hello[0]).unwrap();
    let hvr = pair.server.drain();
    assert_eq!(hvr.len(), 1);
    assert_eq!(handshake_types(&hvr[0], true), vec![HELLO_VERIFY_REQUEST]);

    pair.client.feed(&hvr[0]).unwrap();
    let retry = pair.client.drain();
    assert_eq!(handshake_types(&retry[0], true), vec![CLIENT_HELLO]);

    pair.server.feed(&retry[0]).unwrap();
    let flight: Vec<u8> = pair
        .server
        .drain()
        .iter()
        .flat_map(|p| handshake_types(p, true))
        .collect();
    assert_eq!(flight[0], SERVER_HELLO);
    assert!(flight.contains(&CERTIFICATE));

    // Hand the rest to the driver: the server flight went through above.
    let mut pair = common::pair(datagram().build().unwrap(), Some(rsa_identity));
    pair.handshake().unwrap();
    assert!(pair.client.connected);
    assert!(pair.server.connected);
    assert_eq!(pair.client.peer_cert.as_deref(), Some(RSA_CERT));
    assert_eq!(
        pair.client.session.as_ref().unwrap().version,
        ProtocolVersion::DTLS1_2
    );
    assert_eq!(pair.client_to_server(b"datagram"), b"datagram");
    assert_eq!(pair.server_to_client(b"margatad"), b"margatad");
}

#[test]
fn mismatched_cookie_gets_another_hello_verify_request() {
    let _ = env_logger::try_init();
    let mut pair = pair(datagram().build().unwrap(), Some(rsa_identity));

    pair.client.conn.start_handshake().unwrap();
    for p in pair.client.drain() {
        pair.server.feed(&p).unwrap();
    }
    for p in pair.server.drain() {
        pair.client.feed(&p).unwrap();
    }
    let retry = pair.client.drain();
    assert_eq!(retry.len(), 1);

    // Record header 13, handshake header 12, version 2, random 32 and an
    // empty session id put the cookie length at 60.
    let mut forged = retry[0].clone();
    assert!(forged[60] > 0);
    forged[61] ^= 0xff;

    assert_eq!(pair.server.feed(&forged).unwrap(), Status::Progress);
    let again = pair.server.drain();
    assert_eq!(again.len(), 1);
    assert_eq!(handshake_types(&again[0], true), vec![HELLO_VERIFY_REQUEST]);
    assert!(!pair.server.conn.is_closed());

    // The client retries with the new cookie and the handshake goes on.
    pair.client.feed(&again[0]).unwrap();
    pair.run().unwrap();
    assert!(pair.client.connected);
    assert!(pair.server.connected);
}

#[test]
fn cookie_binds_peer_address() {
    let mut pair = pair(datagram().build().unwrap(), Some(rsa_identity));
    pair.server.conn.set_peer_address(&[10, 0, 0, 1, 0x1f, 0x90]);

    pair.client.conn.start_handshake().unwrap();
    for p in pair.client.drain() {
        pair.server.feed(&p).unwrap();
    }
    // A different source address: the cookie does not verify.
    pair.server.conn.set_peer_address(&[10, 0, 0, 2, 0x1f, 0x90]);
    for p in pair.server.drain() {
        pair.client.feed(&p).unwrap();
    }
    for p in pair.client.drain() {
        pair.server.feed(&p).unwrap();
    }
    let answer = pair.server.drain();
    assert_eq!(handshake_types(&answer[0], true), vec![HELLO_VERIFY_REQUEST]);
}

#[test]
fn bad_mac_datagram_is_dropped() {
    let _ = env_logger::try_init();
    let config = datagram()
        .cipher_suites(&[CipherSuite::ECDHE_RSA_WITH_AES_128_CBC_SHA256])
        .build()
        .unwrap();
    let mut pair = pair(config, Some(rsa_identity));
    pair.handshake().unwrap();

    // One datagram each.
    pair.client.send(b"first").unwrap();
    let mut packets = pair.client.drain();
    pair.client.send(b"second").unwrap();
    packets.extend(pair.client.drain());
    assert_eq!(packets.len(), 2);

    let mut bad = packets[0].clone();
    let i = bad.len() - 1;
    bad[i] ^= 0x01;

    assert_eq!(pair.server.feed(&bad).unwrap(), Status::Progress);
    assert!(pair.server.drain().is_empty());
    assert!(pair.server.received.is_empty());
    assert!(pair.server.conn.is_connected());

    pair.server.feed(&packets[1]).unwrap();
    pair.server.drain();
    assert_eq!(pair.server.take_received(), b"second");

    // The sequence number of the broken copy was never accepted.
    pair.server.feed(&packets[0]).unwrap();
    pair.server.drain();
    assert_eq!(pair.server.take_received(), b"first");
}

#[test]
fn replayed_datagram_is_dropped() {
    let mut pair = pair(datagram().build().unwrap(), Some(rsa_identity));
    pair.handshake().unwrap();

    pair.client.send(b"once").unwrap();
    let packets = pair.client.drain();
    pair.server.feed(&packets[0]).unwrap();
    pair.server.feed(&packets[0]).unwrap();
    pair.server.drain();
    assert_eq!(pair.server.take_received(), b"once");
    assert!(pair.server.conn.is_connected());
}

#[test]
fn garbage_datagram_is_dropped() {
    let mut pair = pair(datagram().build().unwrap(), Some(rsa_identity));
    pair.handshake().unwrap();

    assert_eq!(
        pair.server.feed(&[23, 0xfe, 0xfd, 0, 1, 0, 0]).unwrap(),
        Status::Progress
    );
    assert!(pair.server.conn.is_connected());
    assert_eq!(pair.client_to_server(b"fine"), b"fine");
}

#[test]
fn small_mtu_fragments_handshake() {
    let _ = env_logger::try_init();
    let config = datagram().mtu(256).build().unwrap();
    let mut pair = pair(config, Some(rsa_identity));

    pair.client.conn.start_handshake().unwrap();
    let mut largest = 0;
    let mut certificate_fragments = 0;
    for _ in 0..20 {
        let to_server = pair.client.drain();
        for p in &to_server {
            largest = largest.max(p.len());
            pair.server.feed(p).unwrap();
        }
        let to_client = pair.server.drain();
        for p in &to_client {
            largest = largest.max(p.len());
            certificate_fragments += handshake_types(p, true)
                .iter()
                .filter(|t| **t == CERTIFICATE)
                .count();
            pair.client.feed(p).unwrap();
        }
        if to_server.is_empty() && to_client.is_empty() {
            break;
        }
    }

    assert!(pair.client.connected);
    assert!(pair.server.connected);
    assert!(largest <= 256, "datagram of {} bytes", largest);
    assert!(certificate_fragments > 1);
    assert_eq!(pair.client.peer_cert.as_deref(), Some(RSA_CERT));
}

#[test]
fn reordered_flight_is_reassembled() {
    let _ = env_logger::try_init();
    let config = datagram().mtu(256).build().unwrap();
    let mut pair = pair(config, Some(rsa_identity));

    pair.client.conn.start_handshake().unwrap();
    for _ in 0..20 {
        let to_server = pair.client.drain();
        for p in &to_server {
            pair.server.feed(p).unwrap();
        }
        let to_client = pair.server.drain();
        for p in to_client.iter().rev() {
            pair.client.feed(p).unwrap();
        }
        if to_server.is_empty() && to_client.is_empty() {
            break;
        }
    }
    assert!(pair.client.connected);
    assert!(pair.server.connected);
}

#[test]
fn lost_hello_is_retransmitted() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let mut pair = pair(datagram().build().unwrap(), Some(rsa_identity));

    pair.client.conn.start_handshake().unwrap();
    let lost = pair.client.drain();
    assert_eq!(lost.len(), 1);

    // The first call arms the timers.
    pair.client.conn.handle_timeout(now).unwrap();
    assert!(pair.client.drain().is_empty());
    let deadline = pair.client.timeout.unwrap();
    assert!(deadline > now);

    pair.client
        .conn
        .handle_timeout(now + Duration::from_secs(2))
        .unwrap();
    let resent = pair.client.drain();
    assert_eq!(resent.len(), 1);

    let (a, b) = (records(&lost[0], true), records(&resent[0], true));
    assert_eq!(a.len(), b.len());
    assert_eq!(a[0].1, b[0].1, "same epoch");
    assert!(b[0].2 > a[0].2, "fresh sequence number");
    assert_eq!(a[0].3, b[0].3, "same fragment");

    pair.run().unwrap();
    assert!(pair.client.connected);
    assert!(pair.server.connected);
}

#[test]
fn lost_final_flight_is_answered_again() {
    let _ = env_logger::try_init();
    let now = Instant::now();
    let mut pair = pair(datagram().build().unwrap(), Some(rsa_identity));

    pair.client.conn.start_handshake().unwrap();
    // ClientHello, HelloVerifyRequest, ClientHello, server flight.
    for _ in 0..2 {
        for p in pair.client.drain() {
            pair.server.feed(&p).unwrap();
        }
        for p in pair.server.drain() {
            pair.client.feed(&p).unwrap();
        }
    }
    // Client key exchange flight.
    for p in pair.client.drain() {
        pair.server.feed(&p).unwrap();
    }
    let lost = pair.server.drain();
    assert!(!lost.is_empty());
    assert!(pair.server.connected);
    assert!(!pair.client.connected);

    pair.client.conn.handle_timeout(now).unwrap();
    pair.client
        .conn
        .handle_timeout(now + Duration::from_secs(2))
        .unwrap();
    let resent = pair.client.drain();
    assert!(!resent.is_empty());

    for p in &resent {
        pair.server.feed(p).unwrap();
    }
    let answer = pair.server.drain();
    assert!(!answer.is_empty());
    for p in &answer {
        pair.client.feed(p).unwrap();
    }
    pair.client.drain();
    assert!(pair.client.connected);
    assert_eq!(pair.client_to_server(b"after loss"), b"after loss");
}

#[test]
fn handshake_times_out() {
    let now = Instant::now();
    let config = datagram()
        .flight_retries(1)
        .handshake_timeout(Duration::from_secs(30))
        .build()
        .unwrap();
    let mut pair = pair(config, Some(rsa_identity));
    pair.client.conn.start_handshake().unwrap();
    pair.client.drain();

    pair.client.conn.handle_timeout(now).unwrap();
    let err = pair
        .client
        .conn
        .handle_timeout(now + Duration::from_secs(31))
        .unwrap_err();
    assert!(matches!(err, tlscore::Error::Timeout(_)));
    assert!(pair.client.conn.is_closed());
}

#[test]
fn dtls_1_0_handshake() {
    let config = datagram()
        .min_version(ProtocolVersion::DTLS1_0)
        .max_version(ProtocolVersion::DTLS1_0)
        .cipher_suites(&[CipherSuite::ECDHE_ECDSA_WITH_AES_128_CBC_SHA])
        .build()
        .unwrap();
    let mut pair = pair(config, Some(ec_identity));
    pair.handshake().unwrap();
    assert_eq!(
        pair.server.conn.session().unwrap().version,
        ProtocolVersion::DTLS1_0
    );
    assert_eq!(pair.server_to_client(b"legacy"), b"legacy");
}
