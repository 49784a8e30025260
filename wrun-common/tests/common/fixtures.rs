use std::net::SocketAddr;
use std::path::PathBuf;

use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use wrun_common::{Action, ClientTls, Server, ServerConfig, ServerError, ServerHandle, ServerTls};

/// Bind `action` on an ephemeral port and serve it in the background.
pub async fn spawn_server<A: Action>(
    config: ServerConfig,
    action: A,
) -> (SocketAddr, ServerHandle, JoinHandle<Result<(), ServerError>>) {
    let server = Server::bind(config, action)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind test server: {e}"));
    let addr = server.local_addr().expect("Failed to read local address");
    let handle = server.handle();
    let task = tokio::spawn(server.serve());
    (addr, handle, task)
}

/// Base directory holding a generated `sample` script.
///
/// The script prints its working directory, then a greeting built from its
/// first argument; `ERROR` writes to stderr and exits 1, `STDIN` echoes one
/// line of input, `SLOW` sleeps two seconds before printing `done`.
#[cfg(unix)]
pub struct JobDir {
    pub dir: TempDir,
}

#[cfg(unix)]
impl JobDir {
    pub fn new(greeting: &str) -> Self {
        use std::os::unix::fs::PermissionsExt;

        crate::test_log!("FIXTURE: Creating job dir with '{}' sample", greeting);
        let dir = TempDir::new().expect("Failed to create temp dir");
        let script = format!(
            r#"#!/bin/sh
pwd -P
case "$1" in
    ERROR) echo "err_msg ERROR " >&2; exit 1 ;;
    STDIN) read line; echo "$line" ;;
    SLOW) sleep 2; echo done ;;
    *) echo "{greeting} $1" ;;
esac
"#
        );
        let path = dir.path().join("sample");
        std::fs::write(&path, script).expect("Failed to write sample script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod sample script");
        Self { dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

/// Throwaway CA with a server certificate for 127.0.0.1/localhost and a
/// client certificate, written as PEM files.
pub struct TestPki {
    pub dir: TempDir,
    pub ca_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

fn ca(name: &str) -> (Certificate, KeyPair) {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().expect("CA key generation");
    let cert = params.self_signed(&key).expect("CA self-signing");
    (cert, key)
}

fn leaf(names: &[&str], ca_cert: &Certificate, ca_key: &KeyPair) -> (String, String) {
    let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    let mut params = CertificateParams::new(names.clone()).expect("leaf params");
    params.distinguished_name.push(DnType::CommonName, names[0].clone());
    let key = KeyPair::generate().expect("leaf key generation");
    let cert = params
        .signed_by(&key, ca_cert, ca_key)
        .expect("leaf signing");
    (cert.pem(), key.serialize_pem())
}

impl TestPki {
    pub fn new() -> Self {
        crate::test_log!("FIXTURE: Generating test PKI");
        let (ca_cert, ca_key) = ca("wrun test CA");
        let (server_cert_pem, server_key_pem) = leaf(&["localhost", "127.0.0.1"], &ca_cert, &ca_key);
        let (client_cert_pem, client_key_pem) = leaf(&["wrun-client"], &ca_cert, &ca_key);

        let pki = Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            ca_pem: ca_cert.pem(),
            server_cert_pem,
            server_key_pem,
            client_cert_pem,
            client_key_pem,
        };
        for (name, pem) in [
            ("ca.pem", &pki.ca_pem),
            ("server.crt", &pki.server_cert_pem),
            ("server.key", &pki.server_key_pem),
            ("client.crt", &pki.client_cert_pem),
            ("client.key", &pki.client_key_pem),
        ] {
            std::fs::write(pki.dir.path().join(name), pem).expect("Failed to write PEM");
        }
        pki
    }

    /// A different CA nobody trusts.
    pub fn stranger() -> Self {
        Self::new()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn server_tls(&self, mutual: bool) -> ServerTls {
        let client_ca = mutual.then_some(self.ca_pem.as_bytes());
        ServerTls::from_pem(
            self.server_cert_pem.as_bytes(),
            self.server_key_pem.as_bytes(),
            client_ca,
        )
        .expect("server TLS config")
    }

    pub fn client_tls(&self) -> ClientTls {
        ClientTls::from_pem(self.ca_pem.as_bytes(), None).expect("client TLS config")
    }

    pub fn client_tls_with_identity(&self) -> ClientTls {
        ClientTls::from_pem(
            self.ca_pem.as_bytes(),
            Some((
                self.client_cert_pem.as_bytes(),
                self.client_key_pem.as_bytes(),
            )),
        )
        .expect("client TLS config")
    }
}
