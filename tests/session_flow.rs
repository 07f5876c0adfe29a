//! Control-channel scenarios against the default handler set.

mod common;

use common::{connect, seeded_filesystem};

#[tokio::test]
async fn anonymous_login_then_pwd() {
    let mut client = connect().await;
    client.send("USER anonymous").await;
    client.expect(331).await;
    client.send("PASS -").await;
    client.expect(230).await;
    client.send("PWD").await;
    let reply = client.expect(257).await;
    assert_eq!(reply, "257 \"/\"");
}

#[tokio::test]
async fn unknown_command_leaves_the_connection_usable() {
    let mut client = connect().await;
    client.send("FOO").await;
    client.expect(500).await;
    client.send("NOOP").await;
    client.expect(200).await;
}

#[tokio::test]
async fn login_required_commands_yield_530_before_authentication() {
    let mut client = connect().await;
    client.send("CWD /pub").await;
    client.expect(530).await;

    client.login().await;
    client.send("CWD /pub").await;
    client.expect(250).await;
    client.send("PWD").await;
    let reply = client.expect(257).await;
    assert_eq!(reply, "257 \"/pub\"");
}

#[tokio::test]
async fn quit_flushes_the_farewell_and_closes() {
    let mut client = connect().await;
    client.send("QUIT").await;
    client.expect(221).await;
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn feat_is_a_dash_continued_multiline_reply() {
    let mut client = connect().await;
    client.send("FEAT").await;
    let first = client.line().await.expect("FEAT replies");
    assert_eq!(first, "211-Extensions supported:");
    let mut saw_utf8 = false;
    loop {
        let line = client.line().await.expect("continuation expected");
        if line == "211 END" {
            break;
        }
        assert!(line.starts_with(' '), "body lines are space-prefixed: {line:?}");
        if line.trim() == "UTF8" {
            saw_utf8 = true;
        }
    }
    assert!(saw_utf8, "FEAT must announce UTF8");
}

#[tokio::test]
async fn opts_utf8_works_before_login_and_switches_the_encoding() {
    let fs = seeded_filesystem();
    fs.seed_dir("/café");
    let mut client = common::connect_with(wharf::commands::default_registry(), fs).await;

    // The extension overrides OPTS' login requirement.
    client.send("OPTS UTF8 ON").await;
    client.expect(200).await;

    client.login().await;
    client.send("CWD /café").await;
    client.expect(250).await;
}

#[tokio::test]
async fn working_directory_navigation() {
    let mut client = connect().await;
    client.login().await;

    client.send("CWD pub").await;
    client.expect(250).await;
    client.send("CDUP").await;
    client.expect(200).await;
    client.send("PWD").await;
    assert_eq!(client.expect(257).await, "257 \"/\"");

    client.send("CWD missing").await;
    client.expect(550).await;
}

#[tokio::test]
async fn rename_flow_uses_the_rename_from_pointer() {
    let mut client = connect().await;
    client.login().await;

    client.send("RNTO /new.txt").await;
    client.expect(503).await;

    client.send("RNFR /welcome.txt").await;
    client.expect(350).await;
    client.send("RNTO /hello.txt").await;
    client.expect(250).await;

    client.send("SIZE /hello.txt").await;
    client.expect(213).await;
    client.send("SIZE /welcome.txt").await;
    client.expect(550).await;
}
