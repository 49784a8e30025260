use std::net::SocketAddr;

use tokio::task::JoinHandle;
use wrun_common::{
    Command, ExecResult, FnAction, HandlerError, Server, ServerConfig, ServerError, ServerHandle,
    SharedSecret,
};

/// Canned remote executables:
/// - `echo ARGS...` prints its arguments on one line
/// - `cat` prints its standard input
/// - `fail` writes to stderr and returns 3
///
/// Anything else is treated as a missing executable.
pub fn fake_remote(request: Vec<u8>) -> Result<Vec<u8>, HandlerError> {
    let command = Command::decode(&request)?;
    let result = match command.executable.as_str() {
        "echo" => ExecResult {
            stdout: format!("{}\n", command.arguments.join(" ")),
            stderr: None,
            returncode: 0,
        },
        "cat" => ExecResult {
            stdout: command.stdin,
            stderr: None,
            returncode: 0,
        },
        "fail" => ExecResult {
            stdout: "partial\n".to_string(),
            stderr: Some("bad things\n".to_string()),
            returncode: 3,
        },
        other => return Err(HandlerError::action(format!("no executable named {other}"))),
    };
    Ok(result.encode()?)
}

/// In-process server answering with [`fake_remote`].
pub struct FakeRemote {
    pub addr: SocketAddr,
    handle: ServerHandle,
    task: JoinHandle<Result<(), ServerError>>,
}

impl FakeRemote {
    pub async fn start(secret: Option<&str>) -> Self {
        let mut config = ServerConfig::new("127.0.0.1:0");
        if let Some(secret) = secret {
            config = config.with_secret(SharedSecret::new(secret).expect("valid secret"));
        }
        let server = Server::bind(config, FnAction::new(fake_remote))
            .await
            .expect("Failed to bind fake remote");
        let addr = server.local_addr().expect("Failed to read local address");
        let handle = server.handle();
        let task = tokio::spawn(server.serve());
        crate::test_log!("FIXTURE: Fake remote listening on {}", addr);
        Self { addr, handle, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn shutdown(self) {
        self.handle.stop();
        self.task
            .await
            .expect("server task panicked")
            .expect("server loop failed");
    }
}
