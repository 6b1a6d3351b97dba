//! Tests for credential precedence.

use camino::Utf8PathBuf;
use rstest::rstest;

use super::*;

fn key(name: &str) -> Credential {
    Credential::PrivateKey {
        key: name.to_owned(),
    }
}

#[rstest]
fn exact_match_wins_over_earlier_wildcard() {
    let wallet = CredentialWallet::import(vec![
        WalletEntry::new("deploy", "*", key("wild")),
        WalletEntry::new("deploy", "web1", key("exact")),
    ]);
    assert_eq!(wallet.find("deploy", "web1"), Some(&key("exact")));
}

#[rstest]
fn first_exact_duplicate_wins() {
    let wallet = CredentialWallet::import(vec![
        WalletEntry::new("deploy", "web1", key("first")),
        WalletEntry::new("deploy", "web1", key("second")),
    ]);
    assert_eq!(wallet.find("deploy", "web1"), Some(&key("first")));
}

#[rstest]
fn first_wildcard_is_fallback() {
    let wallet = CredentialWallet::import(vec![
        WalletEntry::new("deploy", "web2", key("other")),
        WalletEntry::new("deploy", "*", key("wild-1")),
        WalletEntry::new("deploy", "*", key("wild-2")),
    ]);
    assert_eq!(wallet.find("deploy", "web1"), Some(&key("wild-1")));
}

#[rstest]
#[case("root", "web1")]
#[case("deploy", "db1")]
fn no_match_returns_none(#[case] user: &str, #[case] host: &str) {
    let wallet = CredentialWallet::import(vec![WalletEntry::new("deploy", "web1", key("k"))]);
    assert_eq!(wallet.find(user, host), None);
}

#[rstest]
fn load_reads_json_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("credentials.json"))
        .expect("utf8 temp path");
    std::fs::write(
        &path,
        r#"[{
            "user": "deploy",
            "host": "*",
            "credential": {"type": "private_key_file", "path": "/keys/id"}
        }]"#,
    )
    .expect("write credentials");

    let wallet = CredentialWallet::load(&path).expect("load wallet");
    assert_eq!(wallet.len(), 1);
    assert_eq!(
        wallet.find("deploy", "anything"),
        Some(&Credential::PrivateKeyFile {
            path: String::from("/keys/id")
        })
    );
}

#[rstest]
fn load_missing_file_is_empty() {
    let wallet = CredentialWallet::load(camino::Utf8Path::new("/nonexistent/credentials.json"))
        .expect("missing file tolerated");
    assert!(wallet.is_empty());
}

#[rstest]
fn load_rejects_malformed_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(dir.path().join("credentials.json"))
        .expect("utf8 temp path");
    std::fs::write(&path, "{not json").expect("write credentials");
    assert!(matches!(
        CredentialWallet::load(&path),
        Err(WalletError::Parse { .. })
    ));
}
