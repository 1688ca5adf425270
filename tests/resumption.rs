//! Abbreviated handshakes from a server session cache and from tickets.

mod common;

use std::sync::Arc;

use tlscore::crypto::rust_crypto::default_provider;
use tlscore::{AeadTicketEncrypter, Config, Connection, MemorySessionCache, Session, Side};

use common::*;

fn resume(client_config: &Config, server_config: &Config, session: Session) -> Pair {
    let mut client = Connection::new(Arc::new(client_config.clone()), Side::Client).unwrap();
    client.set_session(session);
    let identity = rsa_identity(server_config);
    let server =
        Connection::with_identity(Arc::new(server_config.clone()), Side::Server, identity)
            .unwrap();
    let mut pair = Pair::new(client, server);
    pair.handshake().unwrap();
    pair
}

#[test]
fn resume_by_session_id() {
    let _ = env_logger::try_init();
    let client_config = stream().build().unwrap();
    let server_config = stream()
        .session_cache(Arc::new(MemorySessionCache::new(8)))
        .build()
        .unwrap();

    let mut first = pair_with(client_config.clone(), server_config.clone(), Some(rsa_identity));
    first.handshake().unwrap();
    assert!(first.client.peer_cert.is_some());
    let session = first.client.session.clone().unwrap();
    assert_eq!(session.id.len(), 32);
    assert_eq!(first.client.conn.session(), Some(session.clone()));

    let mut second = resume(&client_config, &server_config, session.clone());
    assert!(second.client.connected);
    assert!(second.server.connected);
    // No Certificate in an abbreviated handshake.
    assert_eq!(second.client.peer_cert, None);
    let resumed = second.client.session.clone().unwrap();
    assert_eq!(resumed.id, session.id);
    assert_eq!(resumed.master_secret, session.master_secret);
    assert_eq!(second.client_to_server(b"resumed"), b"resumed");
    assert_eq!(second.server_to_client(b"indeed"), b"indeed");
}

#[test]
fn unknown_session_falls_back_to_full_handshake() {
    let client_config = stream().build().unwrap();
    let server_config = stream()
        .session_cache(Arc::new(MemorySessionCache::new(8)))
        .build()
        .unwrap();

    let mut first = pair_with(client_config.clone(), server_config, Some(rsa_identity));
    first.handshake().unwrap();
    let session = first.client.session.clone().unwrap();

    // Another server with an empty cache.
    let other = stream()
        .session_cache(Arc::new(MemorySessionCache::new(8)))
        .build()
        .unwrap();
    let second = resume(&client_config, &other, session.clone());
    assert!(second.client.connected);
    assert_eq!(second.client.peer_cert.as_deref(), Some(RSA_CERT));
    assert_ne!(second.client.session.as_ref().unwrap().id, session.id);
}

#[test]
fn failed_connection_evicts_session() {
    let cache = Arc::new(MemorySessionCache::new(8));
    let client_config = stream().build().unwrap();
    let server_config = stream().session_cache(cache.clone()).build().unwrap();

    let mut first = pair_with(client_config.clone(), server_config.clone(), Some(rsa_identity));
    first.handshake().unwrap();
    let session = first.client.session.clone().unwrap();
    assert!(tlscore::SessionCache::get(&*cache, &session.id).is_some());

    // A fatal error on the server side drops the session.
    first.server.feed(&[99, 3, 3, 0, 1, 0]).unwrap_err();
    assert!(tlscore::SessionCache::get(&*cache, &session.id).is_none());

    let second = resume(&client_config, &server_config, session);
    assert!(second.client.peer_cert.is_some());
}

#[test]
fn resume_by_ticket() {
    let _ = env_logger::try_init();
    let encrypter = Arc::new(AeadTicketEncrypter::new(default_provider(), 3600).unwrap());
    let client_config = stream().build().unwrap();
    let server_config = stream().ticket_encrypter(encrypter).build().unwrap();

    let mut first = pair_with(client_config.clone(), server_config.clone(), Some(rsa_identity));
    first.handshake().unwrap();
    let session = first.client.session.clone().unwrap();
    assert!(session.ticket.as_ref().map_or(false, |t| !t.is_empty()));

    let mut second = resume(&client_config, &server_config, session.clone());
    assert!(second.client.connected);
    assert_eq!(second.client.peer_cert, None);
    assert_eq!(
        second.client.session.as_ref().unwrap().master_secret,
        session.master_secret
    );
    assert_eq!(second.client_to_server(b"ticket"), b"ticket");
}

#[test]
fn foreign_ticket_is_ignored() {
    let client_config = stream().build().unwrap();
    let issuing = stream()
        .ticket_encrypter(Arc::new(
            AeadTicketEncrypter::new(default_provider(), 3600).unwrap(),
        ))
        .build()
        .unwrap();
    let other = stream()
        .ticket_encrypter(Arc::new(
            AeadTicketEncrypter::new(default_provider(), 3600).unwrap(),
        ))
        .build()
        .unwrap();

    let mut first = pair_with(client_config.clone(), issuing, Some(rsa_identity));
    first.handshake().unwrap();
    let session = first.client.session.clone().unwrap();

    let second = resume(&client_config, &other, session);
    assert!(second.client.connected);
    assert_eq!(second.client.peer_cert.as_deref(), Some(RSA_CERT));
}

#[test]
fn dtls_resumption() {
    let client_config = datagram().build().unwrap();
    let server_config = datagram()
        .session_cache(Arc::new(MemorySessionCache::new(8)))
        .build()
        .unwrap();

    let mut first = pair_with(client_config.clone(), server_config.clone(), Some(rsa_identity));
    first.handshake().unwrap();
    let session = first.client.session.clone().unwrap();

    let mut second = resume(&client_config, &server_config, session);
    assert!(second.client.connected);
    assert!(second.server.connected);
    assert_eq!(second.client.peer_cert, None);
    assert_eq!(second.server_to_client(b"again"), b"again");
}
