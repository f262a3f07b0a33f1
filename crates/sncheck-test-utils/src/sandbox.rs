//! Hermetic sandbox for running the `sncheck` binary in tests.
//!
//! - Private `HOME`, so the session token and config live under a TempDir
//! - Environment is cleared except for `PATH` and whatever the test sets
//! - Files can be written relative to the sandbox root (import fixtures, config)
//!
//! Everything lives under an `assert_fs::TempDir` and is cleaned up on drop.
//!
//! ## Quick example
//! ```no_run
//! use sncheck_test_utils::sandbox::Sandbox;
//! use sncheck_test_utils::MockStore;
//!
//! let mock = MockStore::builder().record("ABC123", true).start();
//! let mut sb = Sandbox::new();
//! sb.api_url(&mock.url()).logged_in();
//! let output = sb.run_ok(["search", "ABC123"]);
//! assert!(output.contains("ABC123"));
//! ```

use crate::mock_store::{
    FAR_FUTURE_EXP, MOCK_USER_EMAIL, MOCK_USER_ID, MOCK_USER_NAME, make_token,
};
use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::fixture::PathChild;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;

pub struct Sandbox {
    root: TempDir,
    pub home: PathBuf,
    env: BTreeMap<String, String>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox {
    /// Create a new sandbox; all state is under an auto-cleaned TempDir.
    pub fn new() -> Self {
        let root = TempDir::new().expect("create sandbox TempDir");
        let home = root.child("home").to_path_buf();
        fs::create_dir_all(&home).expect("create home dir");

        Self {
            root,
            home,
            env: BTreeMap::new(),
        }
    }

    /// Absolute path to the sandbox root.
    pub fn root_path(&self) -> &Path {
        self.root.path()
    }

    /// Write/overwrite a file relative to the sandbox root.
    pub fn write<P: AsRef<Path>, S: AsRef<[u8]>>(&mut self, rel: P, contents: S) -> &mut Self {
        let p = self.root_path().join(rel);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(p, contents).expect("write file");
        self
    }

    pub fn env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn api_url(&mut self, url: &str) -> &mut Self {
        self.env("SNCHECK_API_URL", url)
    }

    /// Path of the persisted session token.
    pub fn auth_file(&self) -> PathBuf {
        self.home.join(".sncheck").join("auth.toml")
    }

    /// Persist a session token the mock store will accept.
    pub fn logged_in(&mut self) -> &mut Self {
        self.logged_in_with(&make_token(FAR_FUTURE_EXP))
    }

    pub fn logged_in_with(&mut self, token: &str) -> &mut Self {
        let contents = format!(
            "token = \"{token}\"\n\n[identity]\nid = \"{MOCK_USER_ID}\"\nemail = \"{MOCK_USER_EMAIL}\"\nname = \"{MOCK_USER_NAME}\"\n"
        );
        let path = self.auth_file();
        fs::create_dir_all(path.parent().expect("auth file parent")).expect("create config dir");
        fs::write(path, contents).expect("write auth file");
        self
    }

    /// Run the `sncheck` binary with the sandbox environment, cwd at the sandbox root.
    pub fn run<I>(&self, args: I) -> Output
    where
        I: IntoIterator,
        I::Item: AsRef<OsStr>,
    {
        let mut cmd = Command::cargo_bin("sncheck").expect("locate sncheck binary");
        cmd.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        cmd.env("HOME", &self.home)
            .env("NO_COLOR", "1")
            .envs(&self.env)
            .current_dir(self.root_path())
            .args(args);
        cmd.output().expect("run sncheck")
    }

    /// Run and return stdout, panicking with stderr if the command failed.
    pub fn run_ok<I>(&self, args: I) -> String
    where
        I: IntoIterator,
        I::Item: AsRef<OsStr>,
    {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "sncheck failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}
