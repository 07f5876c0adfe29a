//! TLS negotiation surface without a configured identity.

mod common;

use common::connect;

#[tokio::test]
async fn auth_tls_without_identity_reports_not_configured() {
    let mut client = connect().await;
    client.send("AUTH TLS").await;
    client.expect(431).await;
    // The plain control channel keeps working.
    client.send("NOOP").await;
    client.expect(200).await;
}

#[tokio::test]
async fn unknown_auth_mechanisms_are_rejected() {
    let mut client = connect().await;
    client.send("AUTH KERBEROS").await;
    client.expect(504).await;
}

#[tokio::test]
async fn tls_companions_require_a_secured_channel() {
    let mut client = connect().await;
    client.send("PBSZ 0").await;
    client.expect(503).await;
    client.send("PROT P").await;
    client.expect(503).await;
}
