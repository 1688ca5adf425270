//! Stream transport handshakes and record protection.

mod common;

use std::sync::Arc;

use tlscore::suite::CipherSuite;
use tlscore::types::{AlertDescription, AlertLevel, ProtocolVersion};
use tlscore::{Connection, Error, Side, StaticPsk, Status};

use common::*;

fn suite(suite: CipherSuite) -> tlscore::Config {
    stream().cipher_suites(&[suite]).build().unwrap()
}

#[test]
fn rsa_cbc_sha256_full_handshake() {
    let _ = env_logger::try_init();
    let config = suite(CipherSuite::RSA_WITH_AES_128_CBC_SHA256);
    let mut pair = pair(config, Some(rsa_identity));

    pair.client.conn.start_handshake().unwrap();
    let hello = pair.client.drain();
    assert_eq!(hello.len(), 1);
    assert_eq!(handshake_types(&hello[0], false), vec![CLIENT_HELLO]);
    pair.server.feed(&hello[0]).unwrap();

    // ServerHello, Certificate, ServerHelloDone
    let flight: Vec<u8> = pair
        .server
        .drain()
        .iter()
        .flat_map(|p| handshake_types(p, false))
        .collect();
    assert_eq!(flight, vec![SERVER_HELLO, CERTIFICATE, 14]);

    // Replay the server flight through a fresh pair to look at the
    // client's answer on the wire.
    let mut pair = common::pair(suite(CipherSuite::RSA_WITH_AES_128_CBC_SHA256), Some(rsa_identity));
    pair.client.conn.start_handshake().unwrap();
    for p in pair.client.drain() {
        pair.server.feed(&p).unwrap();
    }
    for p in pair.server.drain() {
        pair.client.feed(&p).unwrap();
    }
    let answer = pair.client.drain();
    let recs: Vec<_> = answer.iter().flat_map(|p| records(p, false)).collect();
    let (ctype, _, _, cke) = &recs[0];
    assert_eq!(*ctype, HANDSHAKE);
    assert_eq!(cke[0], 16, "ClientKeyExchange");
    // 2048 bit RSA: 4 byte header, 2 byte length, 256 byte ciphertext.
    assert_eq!(cke.len(), 4 + 2 + 256);
    assert_eq!(recs[1].0, CHANGE_CIPHER_SPEC);
    assert_eq!(recs[1].3, vec![1]);
    assert_eq!(recs[2].0, HANDSHAKE);

    for p in &answer {
        pair.server.feed(p).unwrap();
    }
    assert!(pair.server.conn.is_connected());
    pair.run().unwrap();

    assert!(pair.client.connected);
    assert!(pair.server.connected);
    assert_eq!(pair.client.peer_cert.as_deref(), Some(RSA_CERT));
    assert_eq!(pair.server.peer_cert, None);

    assert_eq!(pair.client_to_server(b"hello server"), b"hello server");
    assert_eq!(pair.server_to_client(b"hello client"), b"hello client");
}

#[test]
fn key_exchanges_and_bulk_ciphers() {
    let _ = env_logger::try_init();
    let cases: &[(CipherSuite, fn(&tlscore::Config) -> tlscore::Identity)] = &[
        (CipherSuite::ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, ec_identity),
        (CipherSuite::ECDHE_ECDSA_WITH_AES_256_CBC_SHA384, ec_identity),
        (CipherSuite::ECDHE_RSA_WITH_AES_128_CBC_SHA, rsa_identity),
        (CipherSuite::ECDHE_RSA_WITH_AES_256_GCM_SHA384, rsa_identity),
        (CipherSuite::DHE_RSA_WITH_AES_128_GCM_SHA256, rsa_identity),
        (CipherSuite::RSA_WITH_AES_256_GCM_SHA384, rsa_identity),
    ];
    for (s, identity) in cases {
        let mut pair = pair(suite(*s), Some(*identity));
        pair.handshake().unwrap();
        assert!(pair.client.connected, "{:?}", s);
        assert!(pair.server.connected, "{:?}", s);
        assert_eq!(pair.client.session.as_ref().unwrap().cipher_suite, *s);
        assert_eq!(pair.client_to_server(b"ping"), b"ping", "{:?}", s);
        assert_eq!(pair.server_to_client(b"pong"), b"pong", "{:?}", s);
    }
}

#[test]
fn server_preference_decides() {
    let client = stream()
        .cipher_suites(&[
            CipherSuite::RSA_WITH_AES_128_CBC_SHA,
            CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ])
        .build()
        .unwrap();
    let server = stream()
        .cipher_suites(&[
            CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::RSA_WITH_AES_128_CBC_SHA,
        ])
        .build()
        .unwrap();
    let mut pair = pair_with(client, server, Some(rsa_identity));
    pair.handshake().unwrap();
    let session = pair.client.session.unwrap();
    assert_eq!(
        session.cipher_suite,
        CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256
    );
}

#[test]
fn older_versions() {
    let _ = env_logger::try_init();
    for version in [ProtocolVersion::TLS1_0, ProtocolVersion::TLS1_1] {
        for (s, identity) in [
            (
                CipherSuite::ECDHE_RSA_WITH_AES_128_CBC_SHA,
                rsa_identity as fn(&tlscore::Config) -> tlscore::Identity,
            ),
            (CipherSuite::ECDHE_ECDSA_WITH_AES_128_CBC_SHA, ec_identity),
            (CipherSuite::RSA_WITH_AES_128_CBC_SHA, rsa_identity),
        ] {
            let config = stream()
                .min_version(version)
                .max_version(version)
                .cipher_suites(&[s])
                .build()
                .unwrap();
            let mut pair = pair(config, Some(identity));
            pair.handshake().unwrap();
            assert!(pair.client.connected, "{} {:?}", version, s);
            assert_eq!(pair.client.session.as_ref().unwrap().version, version);
            assert_eq!(pair.client_to_server(b"old"), b"old");
        }
    }
}

#[test]
fn one_step_downgrade() {
    let client = stream()
        .min_version(ProtocolVersion::TLS1_0)
        .max_version(ProtocolVersion::TLS1_1)
        .build()
        .unwrap();
    let server = stream()
        .min_version(ProtocolVersion::TLS1_1)
        .max_version(ProtocolVersion::TLS1_2)
        .build()
        .unwrap();
    let mut pair = pair_with(client, server, Some(rsa_identity));
    pair.handshake().unwrap();
    assert_eq!(
        pair.server.conn.session().unwrap().version,
        ProtocolVersion::TLS1_1
    );
}

#[test]
fn version_below_minimum_is_refused() {
    let _ = env_logger::try_init();
    let client = stream()
        .min_version(ProtocolVersion::TLS1_0)
        .max_version(ProtocolVersion::TLS1_1)
        .build()
        .unwrap();
    let server = stream().build().unwrap();
    let mut pair = pair_with(client, server, Some(rsa_identity));

    let err = pair.handshake().unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedVersion(ProtocolVersion::TLS1_1)
    ));
    assert!(pair.server.conn.is_closed());

    let alert = pair.server.drain();
    assert_eq!(alert.len(), 1);
    let err = pair.client.feed(&alert[0]).unwrap_err();
    assert!(matches!(
        err,
        Error::AlertReceived(AlertDescription::ProtocolVersion)
    ));
    assert!(pair.client.conn.is_closed());
}

#[test]
fn psk_handshake() {
    let _ = env_logger::try_init();
    for s in [
        CipherSuite::PSK_WITH_AES_128_GCM_SHA256,
        CipherSuite::DHE_PSK_WITH_AES_128_CBC_SHA256,
        CipherSuite::ECDHE_PSK_WITH_AES_128_CBC_SHA256,
    ] {
        let psk = Arc::new(StaticPsk::new(b"device-7", &[0x42; 16]).with_hint(b"fleet"));
        let config = stream().cipher_suites(&[s]).psk(psk).build().unwrap();
        let mut pair = pair(config, None);
        pair.handshake().unwrap();
        assert!(pair.client.connected, "{:?}", s);
        assert_eq!(pair.client.peer_cert, None);
        assert_eq!(pair.client_to_server(b"psk data"), b"psk data");
    }
}

#[test]
fn unknown_psk_identity() {
    let s = CipherSuite::PSK_WITH_AES_128_GCM_SHA256;
    let client = stream()
        .cipher_suites(&[s])
        .psk(Arc::new(StaticPsk::new(b"stranger", &[1; 16])))
        .build()
        .unwrap();
    let server = stream()
        .cipher_suites(&[s])
        .psk(Arc::new(StaticPsk::new(b"device-7", &[1; 16])))
        .build()
        .unwrap();
    let mut pair = pair_with(client, server, None);

    let err = pair.handshake().unwrap_err();
    assert!(matches!(err, Error::UnknownPskIdentity));
    for p in pair.server.drain() {
        let err = pair.client.feed(&p).unwrap_err();
        assert!(matches!(
            err,
            Error::AlertReceived(AlertDescription::UnknownPskIdentity)
        ));
    }
    assert!(pair.client.conn.is_closed());
}

#[test]
fn bad_mac_is_fatal() {
    let _ = env_logger::try_init();
    let mut pair = pair(
        suite(CipherSuite::RSA_WITH_AES_128_CBC_SHA256),
        Some(rsa_identity),
    );
    pair.handshake().unwrap();

    pair.client.send(b"attack at dawn").unwrap();
    let mut packets = pair.client.drain();
    assert_eq!(packets.len(), 1);
    let i = packets[0].len() - 20;
    packets[0][i] ^= 0x01;

    let err = pair.server.feed(&packets[0]).unwrap_err();
    assert_eq!(err.alert(), Some(AlertDescription::BadRecordMac));
    assert!(pair.server.conn.is_closed());
    assert!(pair.server.received.is_empty());

    // The alert goes out under the current write keys.
    let alert = pair.server.drain();
    assert_eq!(alert.len(), 1);
    assert_eq!(alert[0][0], ALERT);
    let err = pair.client.feed(&alert[0]).unwrap_err();
    assert!(matches!(
        err,
        Error::AlertReceived(AlertDescription::BadRecordMac)
    ));
}

#[test]
fn input_split_anywhere() {
    let _ = env_logger::try_init();
    let mut pair = pair(
        suite(CipherSuite::ECDHE_ECDSA_WITH_AES_128_GCM_SHA256),
        Some(ec_identity),
    );
    pair.client.conn.start_handshake().unwrap();

    let mut partial = 0;
    for _ in 0..10 {
        let to_server: Vec<u8> = pair.client.drain().concat();
        for b in &to_server {
            if pair.server.feed(std::slice::from_ref(b)).unwrap() == Status::NeedMoreData {
                partial += 1;
            }
        }
        let to_client: Vec<u8> = pair.server.drain().concat();
        for chunk in to_client.chunks(7) {
            pair.client.feed(chunk).unwrap();
        }
        if to_server.is_empty() && to_client.is_empty() {
            break;
        }
    }
    assert!(partial > 0);
    assert!(pair.client.connected);
    assert!(pair.server.connected);
}

#[test]
fn large_data_is_split_into_records() {
    let config = stream()
        .cipher_suites(&[CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256])
        .max_fragment_len(1024)
        .build()
        .unwrap();
    let mut pair = pair(config, Some(rsa_identity));
    pair.handshake().unwrap();

    let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
    pair.client.send(&data).unwrap();
    let packets = pair.client.drain();
    let recs: Vec<_> = packets.iter().flat_map(|p| records(p, false)).collect();
    assert_eq!(recs.len(), 40);
    assert!(recs.iter().all(|r| r.0 == APPLICATION_DATA));

    for p in &packets {
        pair.server.feed(p).unwrap();
        pair.server.drain();
    }
    assert_eq!(pair.server.take_received(), data);
}

#[test]
fn client_certificate_on_request() {
    let _ = env_logger::try_init();
    let s = CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256;
    let client_config = suite(s);
    let server_config = stream()
        .cipher_suites(&[s])
        .require_client_certificate(true)
        .build()
        .unwrap();

    let client_id = ec_identity(&client_config);
    let server_id = rsa_identity(&server_config);
    let client =
        Connection::with_identity(Arc::new(client_config), Side::Client, client_id).unwrap();
    let server =
        Connection::with_identity(Arc::new(server_config), Side::Server, server_id).unwrap();
    let mut pair = Pair::new(client, server);

    pair.handshake().unwrap();
    assert!(pair.client.connected);
    assert!(pair.server.connected);
    assert_eq!(pair.server.peer_cert.as_deref(), Some(EC_CERT));
    assert_eq!(pair.client.peer_cert.as_deref(), Some(RSA_CERT));
    assert_eq!(pair.server_to_client(b"welcome"), b"welcome");
}

#[test]
fn required_client_certificate_missing() {
    let s = CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256;
    let server_config = stream()
        .cipher_suites(&[s])
        .require_client_certificate(true)
        .build()
        .unwrap();
    let mut pair = pair_with(suite(s), server_config, Some(rsa_identity));

    let err = pair.handshake().unwrap_err();
    assert!(matches!(err, Error::HandshakeFailure(_)));
    assert!(!pair.server.connected);
    assert!(pair.server.conn.is_closed());
}

#[test]
fn data_before_connect_is_sent_after() {
    let mut pair = pair(stream().build().unwrap(), Some(rsa_identity));
    pair.client.send(b"early").unwrap();
    pair.handshake().unwrap();
    assert!(pair.server.connected);
    assert_eq!(pair.server.take_received(), b"early");
}

#[test]
fn close_notify_both_ways() {
    let _ = env_logger::try_init();
    let mut pair = pair(stream().build().unwrap(), Some(rsa_identity));
    pair.handshake().unwrap();

    pair.client.conn.close().unwrap();
    assert!(pair.client.conn.is_closed());
    assert!(matches!(
        pair.client.conn.send_application_data(b"late"),
        Err(Error::ConnectionClosed)
    ));

    let close = pair.client.drain();
    assert_eq!(close.len(), 1);
    let err = pair.server.feed(&close[0]).unwrap_err();
    assert!(matches!(
        err,
        Error::AlertReceived(AlertDescription::CloseNotify)
    ));
    assert!(pair.server.conn.is_closed());

    // The server answers with its own close_notify.
    let reply = pair.server.drain();
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0][0], ALERT);
}

#[test]
fn warning_alert_is_not_fatal() {
    let mut pair = pair(stream().build().unwrap(), Some(rsa_identity));
    pair.handshake().unwrap();

    pair.client
        .conn
        .send_alert(AlertLevel::Warning, AlertDescription::UserCanceled)
        .unwrap();
    pair.run().unwrap();
    assert!(!pair.server.conn.is_closed());
    assert_eq!(pair.client_to_server(b"still here"), b"still here");
}

#[test]
fn usage_errors() {
    let config = Arc::new(stream().build().unwrap());
    let mut client = Connection::new(config.clone(), Side::Client).unwrap();
    assert!(matches!(
        client.process_incoming(&[22, 3, 3, 0, 0]),
        Err(Error::UnexpectedMessage(_))
    ));

    let mut client = Connection::new(config, Side::Client).unwrap();
    client.start_handshake().unwrap();
    assert!(matches!(
        client.start_handshake(),
        Err(Error::InternalError(_))
    ));
}

#[test]
fn garbage_record_is_rejected() {
    let mut pair = pair(stream().build().unwrap(), Some(rsa_identity));
    let err = pair.server.feed(&[99, 3, 3, 0, 1, 0]).unwrap_err();
    assert!(matches!(err, Error::UnknownRecordType(99)));
    assert!(pair.server.conn.is_closed());
}

#[test]
fn server_key_exchange_refused_for_rsa_key_transport() {
    let _ = env_logger::try_init();
    let mut pair = pair(
        suite(CipherSuite::RSA_WITH_AES_128_CBC_SHA256),
        Some(rsa_identity),
    );
    pair.client.conn.start_handshake().unwrap();
    for p in pair.client.drain() {
        pair.server.feed(&p).unwrap();
    }
    let flight: Vec<u8> = pair.server.drain().concat();

    // Put a ServerKeyExchange between Certificate and ServerHelloDone.
    let mut forged = Vec::new();
    for (ctype, _, _, body) in records(&flight, false) {
        if ctype == HANDSHAKE && body[0] == 14 {
            let ske = [12, 0, 0, 4, 0, 0, 0, 0];
            forged.extend_from_slice(&[HANDSHAKE, flight[1], flight[2], 0, ske.len() as u8]);
            forged.extend_from_slice(&ske);
        }
        forged.extend_from_slice(&[ctype, flight[1], flight[2]]);
        forged.extend_from_slice(&(body.len() as u16).to_be_bytes());
        forged.extend_from_slice(&body);
    }

    let err = pair.client.feed(&forged).unwrap_err();
    assert!(matches!(err, Error::UnexpectedMessage(_)));
    assert_eq!(err.alert(), Some(AlertDescription::UnexpectedMessage));
    assert!(pair.client.conn.is_closed());
}
