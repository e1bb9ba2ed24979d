//! Session tests over in-memory transports.
use std::sync::Arc;

use rstest::rstest;
use tls_wrap::{
    ContextOptions, ErrorKind, MemoryTransport, Role, SecureContext, Session, State, VerifyError,
    Wrap, WrapConfig, CLEAR_OUT_CHUNK_SIZE,
};
use tlswrap_fixtures::{
    ALT_DOMAIN, CA_CERT_DER, CA_CRL_PEM, REVOKED_CERT_PEM, REVOKED_DOMAIN, REVOKED_KEY_PEM,
    SELF_SIGNED_CERT_PEM, SELF_SIGNED_KEY_PEM, SERVER_DOMAIN,
};

mod common;
use crate::common::*;

#[test]
fn handshake_and_ping() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);

    assert_eq!(client.handler().handshake_start, 1);
    assert_eq!(client.handler().handshake_done, 1);
    assert_eq!(server.handler().handshake_start, 1);
    assert_eq!(server.handler().handshake_done, 1);

    let client_cipher = client.get_cipher().unwrap();
    assert_eq!(Some(client_cipher.clone()), server.get_cipher());
    assert_eq!(client_cipher.version, "TLSv1.3");
    assert_eq!(client.get_protocol(), Some("TLSv1.3"));
    assert_eq!(server.get_protocol(), Some("TLSv1.3"));

    let id = client.write(&[b"ping"]).unwrap();
    pump(&mut client, &mut server);
    assert_eq!(server.handler().data, b"ping");
    assert_eq!(client.handler().write_result(id), Some(Ok(())));

    let id = server.write(&[b"pong"]).unwrap();
    pump(&mut client, &mut server);
    assert_eq!(client.handler().data, b"pong");
    assert_eq!(server.handler().write_result(id), Some(Ok(())));

    assert!(client.handler().errors.is_empty());
    assert!(server.handler().errors.is_empty());
}

#[test]
fn tls12_handshake() {
    let mut client = make_client(
        Arc::new(client_context_with(Some("TLSv1_2_method"))),
        WrapConfig::client(SERVER_DOMAIN),
    );
    let mut server = make_server(Arc::new(server_context()), WrapConfig::server());
    handshake(&mut client, &mut server);

    assert_eq!(client.get_protocol(), Some("TLSv1.2"));
    assert_eq!(server.get_protocol(), Some("TLSv1.2"));
    assert_eq!(client.get_cipher().unwrap().version, "TLSv1.2");

    let key = client.get_ephemeral_key_info().unwrap();
    assert_eq!(key.kind, "ECDH");
    assert!(server.get_ephemeral_key_info().is_none());
}

#[test]
fn ephemeral_key_info_tls13() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);

    let key = client.get_ephemeral_key_info().unwrap();
    assert_eq!(key.kind, "ECDH");
    assert!(key.size > 0);
}

#[test]
fn disjoint_ciphers_fail_on_both_sides() {
    let mut client_context = client_context_with(Some("TLSv1_2_method"));
    client_context
        .set_ciphers("ECDHE-RSA-AES128-GCM-SHA256")
        .unwrap();
    let mut server_context = server_context_with(Some("TLSv1_2_method"));
    server_context
        .set_ciphers("ECDHE-RSA-AES256-GCM-SHA384")
        .unwrap();

    let mut client = make_client(Arc::new(client_context), WrapConfig::client(SERVER_DOMAIN));
    let mut server = make_server(Arc::new(server_context), WrapConfig::server());
    handshake(&mut client, &mut server);

    assert_eq!(
        client.handler().error_code(),
        Some("ERR_SSL_SSLV3_ALERT_HANDSHAKE_FAILURE")
    );
    assert_eq!(server.handler().error_code(), Some("ERR_SSL_NO_SHARED_CIPHER"));
    assert_eq!(
        server.handler().errors[0].reason(),
        Some("no shared cipher")
    );
    assert_eq!(client.handler().errors.len(), 1);
    assert_eq!(server.handler().errors.len(), 1);
    assert_eq!(client.state(), State::Failed);
    assert_eq!(server.state(), State::Failed);
}

#[test]
fn pending_write_is_failed_with_the_session_error() {
    let mut server_context = server_context_with(Some("TLSv1_2_method"));
    server_context
        .set_ciphers("ECDHE-RSA-AES256-GCM-SHA384")
        .unwrap();
    let mut client_context = client_context_with(Some("TLSv1_2_method"));
    client_context
        .set_ciphers("ECDHE-RSA-AES128-GCM-SHA256")
        .unwrap();

    let mut client = make_client(Arc::new(client_context), WrapConfig::client(SERVER_DOMAIN));
    let mut server = make_server(Arc::new(server_context), WrapConfig::server());

    let id = client.write(&[b"never sent"]).unwrap();
    handshake(&mut client, &mut server);
    assert_eq!(
        client.handler().write_result(id),
        Some(Err("ERR_SSL_SSLV3_ALERT_HANDSHAKE_FAILURE"))
    );
    assert_eq!(client.handler().writes.len(), 1);
}

#[test]
fn write_after_handshake_failure_completes_with_the_session_error() {
    let mut client_context = client_context_with(Some("TLSv1_2_method"));
    client_context
        .set_ciphers("ECDHE-RSA-AES128-GCM-SHA256")
        .unwrap();
    let mut server_context = server_context_with(Some("TLSv1_2_method"));
    server_context
        .set_ciphers("ECDHE-RSA-AES256-GCM-SHA384")
        .unwrap();

    let mut client = make_client(Arc::new(client_context), WrapConfig::client(SERVER_DOMAIN));
    let mut server = make_server(Arc::new(server_context), WrapConfig::server());
    handshake(&mut client, &mut server);
    assert_eq!(client.state(), State::Failed);
    assert_eq!(server.state(), State::Failed);

    let client_write = client.write(&[b"x"]).unwrap();
    let server_write = server.write(&[b"x"]).unwrap();
    // Completions never fire from inside the write call.
    assert!(client.handler().writes.is_empty());
    assert!(server.handler().writes.is_empty());
    assert!(client.write(&[b"y"]).is_err());

    pump(&mut client, &mut server);
    assert_eq!(
        client.handler().write_result(client_write),
        Some(Err("ERR_SSL_SSLV3_ALERT_HANDSHAKE_FAILURE"))
    );
    assert_eq!(
        server.handler().write_result(server_write),
        Some(Err("ERR_SSL_NO_SHARED_CIPHER"))
    );
    assert_eq!(
        client.handler().writes[0].1.as_ref().unwrap_err().kind(),
        ErrorKind::Protocol
    );

    // No new error is reported and the next write fails the same way.
    let id = client.write(&[b"z"]).unwrap();
    client.tick();
    assert_eq!(
        client.handler().write_result(id),
        Some(Err("ERR_SSL_SSLV3_ALERT_HANDSHAKE_FAILURE"))
    );
    assert_eq!(client.handler().writes.len(), 2);
    assert_eq!(client.handler().errors.len(), 1);
    assert_eq!(server.handler().errors.len(), 1);
}

#[test]
fn write_after_transport_error_fails() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);
    assert_eq!(client.state(), State::Established);

    client.on_transport_error(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
    assert_eq!(client.handler().error_code(), Some("ECONNRESET"));
    assert_eq!(client.state(), State::Failed);

    let id = client.write(&[b"after reset"]).unwrap();
    client.tick();
    assert_eq!(client.handler().write_result(id), Some(Err("ECONNRESET")));
    assert_eq!(client.handler().errors.len(), 1);
    assert_eq!(client.get_write_queue_size(), 0);
}

#[test]
fn destroy_cancels_write_queued_after_failure() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);
    client.on_transport_error(std::io::Error::from(std::io::ErrorKind::BrokenPipe));

    let id = client.write(&[b"late"]).unwrap();
    client.destroy();
    client.tick();
    assert_eq!(client.handler().write_result(id), Some(Err("ECANCELED")));
    assert_eq!(client.handler().writes.len(), 1);
}

#[test]
fn destroy_cancels_pending_write() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);

    client.transport().set_async(true);
    let id = client.write(&[b"in flight"]).unwrap();
    assert!(client.get_write_queue_size() > 0);

    client.destroy();
    assert_eq!(client.handler().write_result(id), Some(Err("ECANCELED")));
    assert_eq!(
        client.handler().writes[0].1.as_ref().unwrap_err().kind(),
        ErrorKind::Canceled
    );

    // The transport finishing afterwards must not complete the write again.
    client.on_transport_write_done(Ok(()));
    client.tick();
    assert_eq!(client.handler().writes.len(), 1);
    assert_eq!(client.get_write_queue_size(), 0);
}

#[test]
fn destroy_twice_is_a_noop() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);

    client.destroy();
    client.destroy();
    assert_eq!(client.state(), State::Destroyed);
    assert!(client.handler().writes.is_empty());
    assert!(client.handler().errors.is_empty());
    assert!(client.get_cipher().is_none());
    assert!(client.verify_error().is_none());
    assert!(!client.transport().is_reading());

    let err = client.write(&[b"late"]).unwrap_err();
    assert_eq!(err.code(), "EPROTO");

    // Reads after destroy are dropped.
    client.on_transport_read(b"ignored");
    assert!(client.handler().data.is_empty());
}

#[test]
fn large_write_is_delivered_in_bounded_chunks() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);

    let payload: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
    let id = client.write(&[&payload]).unwrap();
    pump(&mut client, &mut server);

    assert_eq!(server.handler().data, payload);
    assert!(server.handler().largest_chunk <= CLEAR_OUT_CHUNK_SIZE);
    assert_eq!(client.handler().write_result(id), Some(Ok(())));
}

#[test]
fn close_notify_ends_the_stream_once() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);

    client.write(&[b"last words"]).unwrap();
    pump(&mut client, &mut server);
    client.shutdown().unwrap();
    assert_eq!(client.state(), State::ShuttingDown);
    pump(&mut client, &mut server);

    assert_eq!(server.handler().data, b"last words");
    assert_eq!(server.handler().eof, 1);
    server.on_transport_eof();
    assert_eq!(server.handler().eof, 1);
}

#[rstest]
#[case::server_preference(
    vec![b"h2".to_vec(), b"http/1.1".to_vec()],
    vec![b"http/1.1".to_vec(), b"h2".to_vec()],
    Some(&b"h2"[..])
)]
#[case::single_overlap(
    vec![b"http/1.1".to_vec()],
    vec![b"h2".to_vec(), b"http/1.1".to_vec()],
    Some(&b"http/1.1"[..])
)]
#[case::server_without_alpn(vec![], vec![b"h2".to_vec()], None)]
fn alpn(
    #[case] server_protocols: Vec<Vec<u8>>,
    #[case] client_protocols: Vec<Vec<u8>>,
    #[case] agreed: Option<&[u8]>,
) {
    let (mut client, mut server) = make_pair();
    client.set_alpn_protocols(client_protocols);
    server.set_alpn_protocols(server_protocols);
    handshake(&mut client, &mut server);

    assert!(server.handler().errors.is_empty());
    assert_eq!(client.alpn_protocol(), agreed);
    assert_eq!(server.alpn_protocol(), agreed);
}

#[test]
fn alpn_without_overlap_is_rejected() {
    let (mut client, mut server) = make_pair();
    client.set_alpn_protocols(vec![b"client-proto".to_vec()]);
    server.set_alpn_protocols(vec![b"server-proto".to_vec()]);
    handshake(&mut client, &mut server);

    assert_eq!(
        server.handler().error_code(),
        Some("ERR_SSL_NO_APPLICATION_PROTOCOL")
    );
    assert_eq!(
        client.handler().error_code(),
        Some("ERR_SSL_TLSV1_ALERT_NO_APPLICATION_PROTOCOL")
    );
}

#[test]
fn cert_cb_switches_to_sni_context() {
    let mut client = make_client(Arc::new(client_context()), WrapConfig::client(ALT_DOMAIN));
    let config = WrapConfig::builder()
        .role(Role::Server)
        .enable_cert_cb(true)
        .build()
        .unwrap();
    let mut server = make_server(Arc::new(server_context()), config);
    handshake(&mut client, &mut server);

    // The handshake waits for the certificate decision.
    assert_eq!(server.handler().cert_cb, vec![Some(ALT_DOMAIN.to_string())]);
    assert_eq!(server.get_servername(), Some(ALT_DOMAIN));
    assert_eq!(client.state(), State::Handshaking);
    assert_eq!(server.get_write_queue_size(), 0);

    server.set_sni_context(Arc::new(alt_context())).unwrap();
    server.cert_cb_done().unwrap();
    assert!(server.cert_cb_done().is_err());
    pump(&mut client, &mut server);

    assert!(client.handler().errors.is_empty());
    assert_eq!(client.state(), State::Established);
    let peer = client.get_peer_certificate(false).unwrap().unwrap();
    assert_eq!(peer.subject.get("CN"), Some(ALT_DOMAIN));
    let own = server.get_certificate().unwrap().unwrap();
    assert_eq!(own.raw, peer.raw);
}

#[test]
fn cert_cb_keeping_the_context_fails_hostname_check() {
    let mut client = make_client(Arc::new(client_context()), WrapConfig::client(ALT_DOMAIN));
    let mut server = make_server(Arc::new(server_context()), WrapConfig::server());
    server.enable_cert_cb().unwrap();
    handshake(&mut client, &mut server);

    server.cert_cb_done().unwrap();
    pump(&mut client, &mut server);
    assert_eq!(client.handler().error_code(), Some("Hostname mismatch"));
    assert_eq!(client.verify_error(), Some(VerifyError::HostnameMismatch));
}

#[test]
fn revoked_certificate_is_rejected() {
    let mut server_context = SecureContext::init(None, None, None).unwrap();
    server_context.set_key(REVOKED_KEY_PEM, None).unwrap();
    server_context.set_cert(REVOKED_CERT_PEM).unwrap();

    let mut client_context = client_context();
    client_context.add_crl(CA_CRL_PEM).unwrap();

    let mut client = make_client(Arc::new(client_context), WrapConfig::client(REVOKED_DOMAIN));
    let mut server = make_server(Arc::new(server_context), WrapConfig::server());
    handshake(&mut client, &mut server);

    assert_eq!(client.handler().error_code(), Some("CERT_REVOKED"));
    assert_eq!(client.verify_error(), Some(VerifyError::CertRevoked));
    assert_eq!(server.handler().errors.len(), 1);
}

#[rstest]
#[case::rejected(true)]
#[case::accepted(false)]
fn self_signed_certificate(#[case] reject_unauthorized: bool) {
    let mut server_context = SecureContext::init(None, None, None).unwrap();
    server_context.set_key(SELF_SIGNED_KEY_PEM, None).unwrap();
    server_context.set_cert(SELF_SIGNED_CERT_PEM).unwrap();

    let config = WrapConfig::builder()
        .role(Role::Client)
        .server_name(SERVER_DOMAIN)
        .reject_unauthorized(reject_unauthorized)
        .build()
        .unwrap();
    let mut client = make_client(Arc::new(client_context()), config);
    let mut server = make_server(Arc::new(server_context), WrapConfig::server());
    handshake(&mut client, &mut server);

    assert_eq!(client.verify_error(), Some(VerifyError::DepthZeroSelfSignedCert));
    if reject_unauthorized {
        assert_eq!(
            client.handler().error_code(),
            Some("DEPTH_ZERO_SELF_SIGNED_CERT")
        );
        assert_ne!(client.state(), State::Established);
    } else {
        assert!(client.handler().errors.is_empty());
        assert_eq!(client.state(), State::Established);
    }
}

#[test]
fn verify_error_is_none_for_trusted_peer() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);

    assert_eq!(client.verify_error(), None);
    // The server did not ask for a client certificate.
    assert_eq!(server.verify_error(), Some(VerifyError::UnableToGetIssuerCert));
}

#[test]
fn detailed_peer_certificate_links_the_issuer() {
    let (mut client, mut server) = make_pair();
    handshake(&mut client, &mut server);

    let leaf = client.get_peer_certificate(true).unwrap().unwrap();
    assert_eq!(leaf.subject.get("CN"), Some(SERVER_DOMAIN));
    let issuer = leaf.issuer_certificate.as_deref().unwrap();
    assert_eq!(issuer.raw, CA_CERT_DER);
    assert!(issuer.is_self_issued());
    assert!(issuer.issuer_certificate.is_none());

    let short = client.get_peer_certificate(false).unwrap().unwrap();
    assert!(short.issuer_certificate.is_none());
}

#[test]
fn mutual_authentication() {
    let mut client = make_client(
        Arc::new(client_context_with_cert()),
        WrapConfig::client(SERVER_DOMAIN),
    );
    let config = WrapConfig::builder()
        .role(Role::Server)
        .request_cert(true)
        .build()
        .unwrap();
    let mut server = make_server(Arc::new(server_context()), config);
    handshake(&mut client, &mut server);

    assert!(server.handler().errors.is_empty());
    assert_eq!(server.verify_error(), None);
    let peer = server.get_peer_certificate(false).unwrap().unwrap();
    assert_eq!(peer.subject.get("CN"), Some("tlswrap-client"));
}

#[test]
fn missing_client_certificate_is_rejected() {
    let (mut client, mut server) = make_pair();
    server.set_verify_mode(true, true);
    handshake(&mut client, &mut server);

    assert_eq!(server.handler().errors.len(), 1);
    assert_eq!(server.handler().errors[0].kind(), ErrorKind::Protocol);
    assert!(server.get_peer_certificate(false).unwrap().is_none());
}

#[test]
fn added_ca_is_not_visible_to_other_contexts() {
    let mut trusting = SecureContext::init(None, None, None).unwrap();
    trusting.add_ca_cert(tlswrap_fixtures::CA_CERT_PEM).unwrap();
    let untrusting = SecureContext::init(None, None, None).unwrap();

    let mut client = make_client(Arc::new(untrusting), WrapConfig::client(SERVER_DOMAIN));
    let mut server = make_server(Arc::new(server_context()), WrapConfig::server());
    handshake(&mut client, &mut server);
    assert_eq!(
        client.handler().error_code(),
        Some("UNABLE_TO_VERIFY_LEAF_SIGNATURE")
    );

    let mut client = make_client(Arc::new(trusting), WrapConfig::client(SERVER_DOMAIN));
    let mut server = make_server(Arc::new(server_context()), WrapConfig::server());
    handshake(&mut client, &mut server);
    assert!(client.handler().errors.is_empty());
}

#[test]
fn tls13_ticket_resumption() {
    let server_context = Arc::new(server_context());
    let client_context = Arc::new(client_context());

    let mut client = make_client(client_context.clone(), WrapConfig::client(SERVER_DOMAIN));
    client.enable_session_callbacks();
    let mut server = make_server(server_context.clone(), WrapConfig::server());
    handshake(&mut client, &mut server);

    assert!(!client.is_session_reused());
    assert!(!server.is_session_reused());
    assert!(server.get_tls_ticket().is_some());
    assert!(client.get_tls_ticket().is_none());
    let session = match client.handler().sessions.last() {
        Some(Session::Client(session)) => session.clone(),
        other => panic!("expected a client session, got {other:?}"),
    };

    let mut client = make_client(client_context, WrapConfig::client(SERVER_DOMAIN));
    client.set_session(session).unwrap();
    let mut server = make_server(server_context, WrapConfig::server());
    handshake(&mut client, &mut server);

    assert!(client.handler().errors.is_empty());
    assert!(client.is_session_reused());
    assert!(server.is_session_reused());
}

#[test]
fn shared_ticket_keys_resume_across_contexts() {
    let first = server_context();
    let mut second = server_context();
    second.set_ticket_keys(&first.get_ticket_keys()).unwrap();
    let client_context = Arc::new(client_context());

    let mut client = make_client(client_context.clone(), WrapConfig::client(SERVER_DOMAIN));
    let mut server = make_server(Arc::new(first), WrapConfig::server());
    handshake(&mut client, &mut server);
    let Some(Session::Client(session)) = client.get_session() else {
        panic!("no client session");
    };

    let mut client = make_client(client_context, WrapConfig::client(SERVER_DOMAIN));
    client.set_session(session).unwrap();
    let mut server = make_server(Arc::new(second), WrapConfig::server());
    handshake(&mut client, &mut server);

    assert!(client.is_session_reused());
    assert!(server.is_session_reused());
}

#[test]
fn tls12_session_id_resumption() {
    let mut server_context = server_context();
    server_context.set_options(ContextOptions::NO_TICKET);
    let server_context = Arc::new(server_context);
    let client_context = Arc::new(client_context_with(Some("TLSv1_2_method")));

    let server_config = || {
        WrapConfig::builder()
            .role(Role::Server)
            .enable_session_callbacks(true)
            .build()
            .unwrap()
    };

    let mut client = make_client(client_context.clone(), WrapConfig::client(SERVER_DOMAIN));
    let mut server = make_server(server_context.clone(), server_config());
    handshake(&mut client, &mut server);

    // The server holds its Finished until the application cached the session.
    assert_eq!(server.handler().sessions.len(), 1);
    assert_eq!(client.state(), State::Handshaking);
    server.new_session_done();
    pump(&mut client, &mut server);
    assert_eq!(client.state(), State::Established);
    assert!(!server.is_session_reused());

    let cached = match &server.handler().sessions[0] {
        Session::Server(session) => session.clone(),
        other => panic!("expected a server session, got {other:?}"),
    };
    let Some(Session::Client(session)) = client.get_session() else {
        panic!("no client session");
    };

    let mut client = make_client(client_context, WrapConfig::client(SERVER_DOMAIN));
    client.set_session(session).unwrap();
    let mut server = make_server(server_context, server_config());
    server.load_session(cached).unwrap();
    handshake(&mut client, &mut server);

    assert!(client.handler().errors.is_empty());
    assert_eq!(client.get_protocol(), Some("TLSv1.2"));
    assert!(client.is_session_reused());
    assert!(server.is_session_reused());
}

#[test]
fn keylog_lines() {
    let (mut client, mut server) = make_pair();
    client.enable_keylog();
    handshake(&mut client, &mut server);

    let lines = &client.handler().keylog;
    assert!(!lines.is_empty());
    for line in lines {
        let line = std::str::from_utf8(line).unwrap();
        assert!(line.ends_with('\n'));
        let fields: Vec<&str> = line.trim_end().split(' ').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].len(), 64);
    }
    assert!(lines
        .iter()
        .any(|line| line.starts_with(b"CLIENT_TRAFFIC_SECRET_0 ")));
    assert!(server.handler().keylog.is_empty());
}

#[test]
fn ocsp_response_reaches_the_client() {
    let (mut client, mut server) = make_pair();
    client.request_ocsp().unwrap();
    server.set_ocsp_response(vec![0x30, 0x03, 0x0a, 0x01, 0x00]).unwrap();
    handshake(&mut client, &mut server);

    assert_eq!(
        client.handler().ocsp,
        vec![Some(vec![0x30, 0x03, 0x0a, 0x01, 0x00])]
    );
}

#[test]
fn role_restricted_context() {
    let context = Arc::new(SecureContext::init(Some("TLS_server_method"), None, None).unwrap());
    let err = Wrap::new(
        context.clone(),
        WrapConfig::client(SERVER_DOMAIN),
        MemoryTransport::new(),
        Recorder::default(),
    )
    .unwrap_err();
    assert_eq!(err.code(), "ERR_SSL_CALLED_A_FUNCTION_YOU_SHOULD_NOT_CALL");

    assert!(Wrap::new(
        context,
        WrapConfig::server(),
        MemoryTransport::new(),
        Recorder::default()
    )
    .is_ok());
}

#[test]
fn closed_context_cannot_start_sessions() {
    let mut context = server_context();
    context.close();
    context.close();
    let err = Wrap::new(
        Arc::new(context),
        WrapConfig::server(),
        MemoryTransport::new(),
        Recorder::default(),
    )
    .unwrap_err();
    assert_eq!(err.code(), "ERR_TLS_INVALID_STATE");
}

#[test]
fn receive_injects_bytes() {
    let (mut client, mut server) = make_pair();
    client.start().unwrap();
    client.tick();

    let hello = client.transport().take_outbox();
    server.receive(&hello);
    server.tick();
    let flight = server.transport().take_outbox();
    assert!(!flight.is_empty());
    client.receive(&flight);
    pump(&mut client, &mut server);

    assert_eq!(client.state(), State::Established);
    assert_eq!(server.state(), State::Established);
}
