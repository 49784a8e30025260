use std::path::PathBuf;

use tempfile::TempDir;

/// Temp directory with a `jobs/` base directory and room for settings files.
pub struct SettingsDir {
    pub dir: TempDir,
}

impl SettingsDir {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        std::fs::create_dir(dir.path().join("jobs")).expect("Failed to create jobs dir");
        Self { dir }
    }

    /// Write `contents` as `name` and return its path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        crate::test_log!("FIXTURE: Writing settings file {}", name);
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("Failed to write settings file");
        path
    }

    pub fn jobs(&self) -> PathBuf {
        self.dir.path().join("jobs")
    }

    /// Write an executable script into `jobs/`.
    #[cfg(unix)]
    pub fn write_job(&self, name: &str, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        crate::test_log!("FIXTURE: Writing job {}", name);
        let path = self.jobs().join(name);
        std::fs::write(&path, script).expect("Failed to write job script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod job script");
        path
    }
}

/// A loopback port nothing is listening on right now.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind ephemeral port");
    listener.local_addr().expect("Failed to read local address").port()
}
