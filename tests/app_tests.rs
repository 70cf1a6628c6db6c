//! Integration tests for command orchestration.
//!
//! Commands run against a temporary home with a fake key generator and a
//! fake agent, so these tests never touch the real `~/.ssh` or agent.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use ssh_key::public::{Ed25519PublicKey, KeyData};
use tempfile::TempDir;

use keyhop::cli::{AddHostArgs, Command, GenerateKeyArgs};
use keyhop::ssh::keygen::KeygenRequest;
use keyhop::ssh::{
    parse, AgentBackend, AgentController, AgentEndpoint, AgentError, KeyGenerator, KeygenError,
    LoadedKey,
};
use keyhop::{App, Config, Error, ErrorKind};

// ============================================================================
// Fakes
// ============================================================================

/// Builds an `ssh-ed25519` public key line whose key bytes are all `seed`.
fn public_line(seed: u8, comment: &str) -> String {
    let key = ssh_key::PublicKey::new(KeyData::Ed25519(Ed25519PublicKey([seed; 32])), comment);
    key.to_openssh().expect("encode public key")
}

/// Writes recognizable key pairs instead of running `ssh-keygen`.
#[derive(Default)]
struct FakeKeygen {
    calls: Cell<u8>,
}

impl KeyGenerator for FakeKeygen {
    fn generate(&self, request: &KeygenRequest<'_>) -> Result<(), KeygenError> {
        let n = self.calls.get() + 1;
        self.calls.set(n);

        let private = format!("fake private key {}\n", n);
        let mut public_path = request.output.as_os_str().to_os_string();
        public_path.push(".pub");

        fs::write(request.output, private).map_err(|source| KeygenError::Spawn {
            program: "fake-keygen".to_string(),
            source,
        })?;
        fs::write(&public_path, public_line(n, request.comment)).map_err(|source| {
            KeygenError::Spawn {
                program: "fake-keygen".to_string(),
                source,
            }
        })
    }

    fn change_passphrase(&self, _private_key: &Path) -> Result<(), KeygenError> {
        Ok(())
    }

    fn program(&self) -> String {
        "fake-keygen".to_string()
    }
}

/// Agent that keeps keys in memory.
#[derive(Default)]
struct FakeAgent {
    keys: RefCell<Vec<LoadedKey>>,
}

impl AgentBackend for FakeAgent {
    fn list(&self) -> Result<Vec<LoadedKey>, AgentError> {
        Ok(self.keys.borrow().clone())
    }

    fn add(&self, private_key: &Path, _interactive: bool) -> Result<(), AgentError> {
        let mut public = private_key.as_os_str().to_os_string();
        public.push(".pub");
        let line = fs::read_to_string(PathBuf::from(public))
            .map_err(|_| AgentError::MissingKey(private_key.to_path_buf()))?;
        let key = LoadedKey::from_public_line(line.trim())
            .ok_or_else(|| AgentError::MissingKey(private_key.to_path_buf()))?;
        self.keys.borrow_mut().push(key);
        Ok(())
    }

    fn remove(&self, key: &LoadedKey) -> Result<(), AgentError> {
        self.keys.borrow_mut().retain(|k| k != key);
        Ok(())
    }
}

// ============================================================================
// Fixture
// ============================================================================

const TWO_ACCOUNTS: &str = "\
# Personal account
Host gitlab-personal
    HostName gitlab.com
    User git
    IdentityFile ~/keys/id_personal
    IdentitiesOnly yes

# Work account
Host gitlab-work
    HostName gitlab.com
    User git
    IdentityFile ~/keys/id_work
    IdentitiesOnly yes
";

struct Fixture {
    home: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            home: TempDir::new().expect("temp home"),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.home.path().join(rel)
    }

    fn ssh_config(&self) -> PathBuf {
        self.path(".ssh/config")
    }

    fn config(&self) -> Config {
        Config {
            ssh_config: self.ssh_config(),
            key_dir: self.path("keys"),
            registry: self.path(".keyhop/identities.toml"),
            ..Config::default()
        }
    }

    /// Writes the two-account config and the key files it names.
    fn with_two_accounts(self) -> Self {
        fs::create_dir_all(self.path(".ssh")).expect("mkdir .ssh");
        fs::create_dir_all(self.path("keys")).expect("mkdir keys");
        fs::write(self.ssh_config(), TWO_ACCOUNTS).expect("write config");
        fs::write(self.path("keys/id_personal"), "p").expect("write key");
        fs::write(self.path("keys/id_work"), "w").expect("write key");
        self
    }

    fn app(&self) -> App<FakeKeygen, FakeAgent> {
        self.app_with_agent(None)
    }

    fn app_with_agent(&self, endpoint: Option<AgentEndpoint>) -> App<FakeKeygen, FakeAgent> {
        App::new(
            self.config(),
            FakeKeygen::default(),
            AgentController::new(FakeAgent::default(), endpoint),
        )
        .with_home(self.home.path())
    }

    fn read_config(&self) -> String {
        fs::read_to_string(self.ssh_config()).expect("read config")
    }

    fn lock_exists(&self) -> bool {
        self.path(".ssh/config.lock").exists()
    }
}

fn run(app: &mut App<FakeKeygen, FakeAgent>, command: Command) -> Result<String, Error> {
    let mut out = Vec::new();
    app.run(command, &mut out)?;
    Ok(String::from_utf8(out).expect("utf-8 output"))
}

fn add_host(alias: &str, identity_file: Option<PathBuf>, key: Option<&str>) -> Command {
    Command::AddHost(AddHostArgs {
        alias: alias.to_string(),
        hostname: "gitlab.com".to_string(),
        user: None,
        identity_file,
        key: key.map(str::to_string),
        no_identities_only: false,
        forward_agent: false,
        options: Vec::new(),
    })
}

fn generate(name: &str, force: bool) -> Command {
    Command::GenerateKey(GenerateKeyArgs {
        name: name.to_string(),
        algorithm: None,
        comment: None,
        passphrase: false,
        force,
    })
}

// ============================================================================
// Host commands
// ============================================================================

#[test]
fn test_list_hosts_in_file_order() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let json = run(&mut app, Command::ListHosts { json: true }).expect("list-hosts");
    let hosts: serde_json::Value = serde_json::from_str(&json).expect("json");
    let aliases: Vec<&str> = hosts
        .as_array()
        .expect("array")
        .iter()
        .map(|h| h["alias"].as_str().expect("alias"))
        .collect();
    assert_eq!(aliases, vec!["gitlab-personal", "gitlab-work"]);

    let text = run(&mut app, Command::ListHosts { json: false }).expect("list-hosts");
    let personal = text.find("gitlab-personal").expect("personal listed");
    let work = text.find("gitlab-work").expect("work listed");
    assert!(personal < work);
}

#[test]
fn test_add_duplicate_alias_leaves_file_unchanged() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let err = run(
        &mut app,
        add_host("gitlab-work", Some(fx.path("keys/id_work")), None),
    )
    .expect_err("duplicate alias");

    assert_eq!(err.kind(), ErrorKind::DuplicateAlias);
    assert_eq!(err.exit_code(), 11);
    assert_eq!(fx.read_config(), TWO_ACCOUNTS);
    assert!(!fx.lock_exists());
}

#[test]
fn test_alias_uniqueness_ignores_case() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let err = run(
        &mut app,
        add_host("GitLab-Work", Some(fx.path("keys/id_work")), None),
    )
    .expect_err("duplicate alias");
    assert_eq!(err.kind(), ErrorKind::DuplicateAlias);
}

#[test]
fn test_add_host_appends_block_and_keeps_comments() {
    let fx = Fixture::new().with_two_accounts();
    fs::write(fx.path("keys/id_github"), "g").expect("write key");
    let mut app = fx.app();

    let out = run(
        &mut app,
        add_host("github-work", Some(fx.path("keys/id_github")), None),
    )
    .expect("add-host");
    assert!(out.contains("git@github-work:"), "output: {}", out);

    let text = fx.read_config();
    assert!(text.starts_with(TWO_ACCOUNTS), "existing text kept: {}", text);
    assert!(text.ends_with(
        "\nHost github-work\n    HostName gitlab.com\n    User git\n    \
         IdentityFile ~/keys/id_github\n    IdentitiesOnly yes\n"
    ));
    assert!(!fx.lock_exists());
}

#[test]
fn test_add_host_with_missing_identity_file_writes_nothing() {
    let fx = Fixture::new();
    let mut app = fx.app();

    let err = run(
        &mut app,
        add_host("gitlab-work", Some(fx.path("keys/nope")), None),
    )
    .expect_err("missing identity file");

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!fx.ssh_config().exists());
    assert!(!fx.lock_exists());
}

#[test]
fn test_add_host_rejects_pattern_alias() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let err = run(
        &mut app,
        add_host("*.gitlab.com", Some(fx.path("keys/id_work")), None),
    )
    .expect_err("pattern alias");
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(fx.read_config(), TWO_ACCOUNTS);
}

#[test]
fn test_add_host_with_extra_options() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let mut args = AddHostArgs {
        alias: "corp".to_string(),
        hostname: "git.corp.example".to_string(),
        user: Some("deploy".to_string()),
        identity_file: Some(fx.path("keys/id_work")),
        key: None,
        no_identities_only: true,
        forward_agent: true,
        options: vec![("Port".to_string(), "2222".to_string())],
    };
    run(&mut app, Command::AddHost(args.clone())).expect("add-host");

    let config = parse(&fx.read_config()).expect("parse");
    let corp = config.get("corp").expect("corp");
    assert_eq!(corp.user(), Some("deploy"));
    assert!(!corp.identities_only());
    assert!(corp.forward_agent());
    assert_eq!(corp.extra_options().collect::<Vec<_>>(), vec![("Port", "2222")]);

    args.alias = "corp2".to_string();
    args.options = vec![("HostName".to_string(), "x".to_string())];
    let err = run(&mut app, Command::AddHost(args)).expect_err("reserved option");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

fn corp_args(fx: &Fixture) -> AddHostArgs {
    AddHostArgs {
        alias: "corp".to_string(),
        hostname: "git.corp.example".to_string(),
        user: None,
        identity_file: Some(fx.path("keys/id_work")),
        key: None,
        no_identities_only: false,
        forward_agent: false,
        options: Vec::new(),
    }
}

#[test]
fn test_add_host_rejects_empty_user() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let mut args = corp_args(&fx);
    args.user = Some(String::new());
    let err = run(&mut app, Command::AddHost(args)).expect_err("empty user");

    assert_eq!(err.exit_code(), 18);
    assert!(err.to_string().contains("User"), "error: {}", err);
    assert_eq!(fx.read_config(), TWO_ACCOUNTS);
    assert!(!fx.lock_exists());
}

#[test]
fn test_add_host_rejects_line_break_in_hostname() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let mut args = corp_args(&fx);
    args.hostname = "git.corp.example\nHost *".to_string();
    let err = run(&mut app, Command::AddHost(args)).expect_err("newline in hostname");

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(fx.read_config(), TWO_ACCOUNTS);
}

#[test]
fn test_add_host_rejects_line_break_in_option_value() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let mut args = corp_args(&fx);
    args.options = vec![(
        "Port".to_string(),
        "22\nHost *\n    ProxyCommand evil".to_string(),
    )];
    let err = run(&mut app, Command::AddHost(args)).expect_err("newline in option");

    assert_eq!(err.exit_code(), 18);
    let text = fx.read_config();
    assert_eq!(text, TWO_ACCOUNTS);
    assert!(!text.contains("ProxyCommand"));

    let mut args = corp_args(&fx);
    args.options = vec![("Proxy Command".to_string(), "evil".to_string())];
    let err = run(&mut app, Command::AddHost(args)).expect_err("bad option name");
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_add_host_rejects_control_characters_in_identity_and_alias() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let mut args = corp_args(&fx);
    args.identity_file = Some(fx.path("keys/id_work\nHost *"));
    let err = run(&mut app, Command::AddHost(args)).expect_err("newline in identity file");
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut args = corp_args(&fx);
    args.alias = "corp\0".to_string();
    let err = run(&mut app, Command::AddHost(args)).expect_err("nul in alias");
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(fx.read_config(), TWO_ACCOUNTS);
    assert!(parse(&fx.read_config()).is_ok());
}

#[test]
fn test_remove_host() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    run(
        &mut app,
        Command::RemoveHost {
            alias: "gitlab-personal".to_string(),
        },
    )
    .expect("remove-host");

    let config = parse(&fx.read_config()).expect("parse");
    assert_eq!(config.aliases(), vec!["gitlab-work"]);

    let err = run(
        &mut app,
        Command::RemoveHost {
            alias: "gitlab-personal".to_string(),
        },
    )
    .expect_err("already removed");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.exit_code(), 17);
}

#[test]
fn test_show_host() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app();

    let out = run(
        &mut app,
        Command::ShowHost {
            alias: "gitlab-work".to_string(),
            json: false,
        },
    )
    .expect("show-host");
    assert!(out.contains("IdentityFile:   ~/keys/id_work"), "output: {}", out);
    assert!(out.contains("IdentitiesOnly: yes"));
}

#[test]
fn test_locked_config_is_reported_and_left_alone() {
    let fx = Fixture::new().with_two_accounts();
    fs::write(fx.path(".ssh/config.lock"), "12345\n").expect("write lock");
    let mut app = fx.app();

    let err = run(
        &mut app,
        Command::RemoveHost {
            alias: "gitlab-work".to_string(),
        },
    )
    .expect_err("locked");

    assert_eq!(err.kind(), ErrorKind::FileSystem);
    assert!(err.hint().is_some());
    assert!(fx.lock_exists());
    assert_eq!(fx.read_config(), TWO_ACCOUNTS);
}

#[test]
fn test_malformed_config_is_parse_error() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.path(".ssh")).expect("mkdir");
    fs::write(fx.ssh_config(), "Host broken\n    HostName example.com\n").expect("write");
    let mut app = fx.app();

    let err = run(&mut app, Command::ListHosts { json: false }).expect_err("parse error");
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(err.exit_code(), 10);
}

#[test]
fn test_validate_reports_missing_identity_files() {
    let fx = Fixture::new().with_two_accounts();
    fs::remove_file(fx.path("keys/id_work")).expect("remove key");
    let mut app = fx.app();

    let err = run(&mut app, Command::Validate).expect_err("validation fails");
    assert_eq!(err.kind(), ErrorKind::Validation);

    fs::write(fx.path("keys/id_work"), "w").expect("restore key");
    let out = run(&mut app, Command::Validate).expect("validate");
    assert!(out.contains("2 host(s)"), "output: {}", out);
}

// ============================================================================
// Key commands
// ============================================================================

#[test]
fn test_generate_key_then_add_host_by_name() {
    let fx = Fixture::new();
    let mut app = fx.app();

    let out = run(&mut app, generate("work", false)).expect("generate-key");
    assert!(out.contains("fingerprint: SHA256:"), "output: {}", out);
    assert!(fx.path("keys/id_ed25519_work").exists());
    assert!(fx.path("keys/id_ed25519_work.pub").exists());

    run(&mut app, add_host("gitlab-work", None, Some("work"))).expect("add-host");

    let config = parse(&fx.read_config()).expect("parse");
    let entry = config.get("gitlab-work").expect("entry");
    assert_eq!(entry.identity_file(), Some("~/keys/id_ed25519_work"));
    assert!(entry.identities_only());
}

#[test]
fn test_generate_key_never_overwrites_without_force() {
    let fx = Fixture::new();
    let mut app = fx.app();

    run(&mut app, generate("work", false)).expect("first generate");
    let private = fx.path("keys/id_ed25519_work");
    let public = fx.path("keys/id_ed25519_work.pub");
    let first_private = fs::read_to_string(&private).expect("read");
    let first_public = fs::read_to_string(&public).expect("read");

    let err = run(&mut app, generate("work", false)).expect_err("duplicate name");
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
    assert_eq!(err.exit_code(), 12);
    assert_eq!(fs::read_to_string(&private).expect("read"), first_private);

    run(&mut app, generate("work", true)).expect("forced generate");
    assert_ne!(fs::read_to_string(&private).expect("read"), first_private);
    assert_ne!(fs::read_to_string(&public).expect("read"), first_public);
}

#[test]
fn test_generate_key_refuses_unregistered_existing_file() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.path("keys")).expect("mkdir");
    fs::write(fx.path("keys/id_ed25519_work"), "precious").expect("write");
    let mut app = fx.app();

    let err = run(&mut app, generate("work", false)).expect_err("would overwrite");
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        fs::read_to_string(fx.path("keys/id_ed25519_work")).expect("read"),
        "precious"
    );
}

#[test]
fn test_list_show_and_remove_key() {
    let fx = Fixture::new();
    let mut app = fx.app();
    run(&mut app, generate("work", false)).expect("generate");
    run(&mut app, generate("personal", false)).expect("generate");

    let json = run(&mut app, Command::ListKeys { json: true }).expect("list-keys");
    let keys: serde_json::Value = serde_json::from_str(&json).expect("json");
    let names: Vec<&str> = keys
        .as_array()
        .expect("array")
        .iter()
        .map(|k| k["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["personal", "work"]);
    assert!(keys[0]["fingerprint"].as_str().expect("fp").starts_with("SHA256:"));

    let line = run(
        &mut app,
        Command::ShowKey {
            name: "work".to_string(),
        },
    )
    .expect("show-key");
    assert!(line.starts_with("ssh-ed25519 "));
    assert!(line.trim_end().ends_with(" work"));

    run(
        &mut app,
        Command::RemoveKey {
            name: "work".to_string(),
            delete_files: false,
        },
    )
    .expect("remove-key");
    assert!(fx.path("keys/id_ed25519_work").exists());

    run(
        &mut app,
        Command::RemoveKey {
            name: "personal".to_string(),
            delete_files: true,
        },
    )
    .expect("remove-key --delete-files");
    assert!(!fx.path("keys/id_ed25519_personal").exists());
    assert!(!fx.path("keys/id_ed25519_personal.pub").exists());

    let err = run(
        &mut app,
        Command::ShowKey {
            name: "work".to_string(),
        },
    )
    .expect_err("forgotten");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// Agent commands
// ============================================================================

#[test]
fn test_agent_add_without_agent_is_unavailable_and_config_untouched() {
    let fx = Fixture::new().with_two_accounts();
    let mut app = fx.app_with_agent(None);

    let err = run(
        &mut app,
        Command::AgentAdd {
            key: fx.path("keys/id_work").display().to_string(),
        },
    )
    .expect_err("no agent");

    assert_eq!(err.kind(), ErrorKind::AgentUnavailable);
    assert_eq!(err.exit_code(), 14);
    assert_eq!(fx.read_config(), TWO_ACCOUNTS);
    assert!(!fx.lock_exists());
}

#[test]
fn test_agent_add_with_corrupt_registry_reports_missing_agent() {
    let fx = Fixture::new().with_two_accounts();
    fs::create_dir_all(fx.path(".keyhop")).expect("mkdir .keyhop");
    fs::write(fx.path(".keyhop/identities.toml"), "[[identity]\nname = ").expect("write registry");
    let mut app = fx.app_with_agent(None);

    let err = run(
        &mut app,
        Command::AgentAdd {
            key: fx.path("keys/id_work").display().to_string(),
        },
    )
    .expect_err("no agent");

    assert_eq!(err.exit_code(), 14);
}

#[cfg(unix)]
#[test]
fn test_agent_add_list_remove() {
    use std::os::unix::net::UnixListener;

    let fx = Fixture::new();
    let socket = fx.path("agent.sock");
    let _listener = UnixListener::bind(&socket).expect("bind agent socket");
    let mut app = fx.app_with_agent(Some(AgentEndpoint::Socket(socket)));

    run(&mut app, generate("work", false)).expect("generate");
    run(
        &mut app,
        Command::AgentAdd {
            key: "work".to_string(),
        },
    )
    .expect("agent-add");

    let json = run(&mut app, Command::AgentList { json: true }).expect("agent-list");
    let keys: serde_json::Value = serde_json::from_str(&json).expect("json");
    assert_eq!(keys[0]["identity"], "work");
    let fingerprint = keys[0]["fingerprint"].as_str().expect("fingerprint").to_string();

    run(
        &mut app,
        Command::AgentRemove {
            fingerprint: fingerprint.clone(),
        },
    )
    .expect("agent-remove");

    let out = run(&mut app, Command::AgentList { json: false }).expect("agent-list");
    assert!(out.contains("no identities"), "output: {}", out);

    let err = run(&mut app, Command::AgentRemove { fingerprint }).expect_err("not loaded");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
