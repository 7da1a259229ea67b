//! Boot persistence: a service unit that re-runs the engine on every boot.
//!
//! The unit never carries a cached plan. The intent is written next to it
//! and the unit runs `routeboot apply --intent <file>`, so each boot resolves
//! the interface and rebuilds the plan from current host state.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::plan::RoutePlan;

/// How the unit is ordered and kept at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootPolicy {
    /// Order after (and pull in) `network-online.target`.
    pub after_network_online: bool,
    /// Keep the unit "active" after the command exits.
    pub remain_after_exit: bool,
    pub description: String,
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self {
            after_network_online: true,
            remain_after_exit: true,
            description: "routeboot secondary routing".to_string(),
        }
    }
}

/// The minimal service-manager surface the installer needs.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Create or update `unit`. Returns `Ok(true)` if anything changed.
    async fn register(&self, unit: &str, exec: &[String], policy: &BootPolicy) -> Result<bool>;

    async fn enable(&self, unit: &str) -> Result<()>;

    async fn start(&self, unit: &str) -> Result<()>;

    async fn is_registered(&self, unit: &str) -> Result<bool>;

    /// Disable and remove `unit`. Returns `Ok(false)` if it was not registered.
    async fn unregister(&self, unit: &str) -> Result<bool>;
}

/// Where the installer writes and what the unit runs.
#[derive(Debug, Clone)]
pub struct InstallSettings {
    /// Directory persisted intents live in.
    pub state_dir: PathBuf,
    /// Binary the unit runs.
    pub binary_path: PathBuf,
    /// Arguments appended after `apply --intent <file>`.
    pub extra_args: Vec<String>,
    pub policy: BootPolicy,
}

/// What [`install`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub unit: String,
    pub intent_path: PathBuf,
    pub intent_changed: bool,
    pub unit_changed: bool,
}

/// What [`uninstall`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstallReport {
    pub unit: String,
    pub unit_removed: bool,
    pub intent_removed: bool,
}

/// Unit name for a table: `routeboot-<table_name>.service`.
pub fn unit_name(table_name: &str) -> String {
    format!("routeboot-{table_name}.service")
}

/// Where the intent for `table_name` is persisted.
pub fn intent_path(state_dir: &Path, table_name: &str) -> PathBuf {
    state_dir.join(format!("{table_name}.yaml"))
}

fn exec_command(settings: &InstallSettings, intent: &Path) -> Vec<String> {
    let mut exec = vec![
        settings.binary_path.display().to_string(),
        "apply".to_string(),
        "--intent".to_string(),
        intent.display().to_string(),
    ];
    exec.extend(settings.extra_args.iter().cloned());
    exec
}

fn install_error(unit: &str, err: Error) -> Error {
    match err {
        Error::Install { .. } => err,
        other => Error::Install {
            unit: unit.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Persist the plan's intent and install, enable and start its boot unit.
///
/// Idempotent: unchanged files are not rewritten and the unit is registered
/// exactly once however often this runs.
pub async fn install<S: ServiceManager + ?Sized>(
    manager: &S,
    plan: &RoutePlan,
    settings: &InstallSettings,
) -> Result<InstallReport> {
    let table_name = plan.intent().table_name();
    let unit = unit_name(table_name);
    let path = intent_path(&settings.state_dir, table_name);

    let yaml = plan.intent().to_yaml().map_err(|e| install_error(&unit, e))?;
    let intent_changed = write_string_if_changed(&path, &yaml)
        .await
        .map_err(|e| Error::Install {
            unit: unit.clone(),
            reason: format!("{}: {e}", path.display()),
        })?;

    let exec = exec_command(settings, &path);
    let unit_changed = manager
        .register(&unit, &exec, &settings.policy)
        .await
        .map_err(|e| install_error(&unit, e))?;
    manager
        .enable(&unit)
        .await
        .map_err(|e| install_error(&unit, e))?;
    manager
        .start(&unit)
        .await
        .map_err(|e| install_error(&unit, e))?;

    info!(%unit, intent = %path.display(), intent_changed, unit_changed, "boot unit installed");

    Ok(InstallReport {
        unit,
        intent_path: path,
        intent_changed,
        unit_changed,
    })
}

/// Disable and remove the unit for `table_name` and its persisted intent.
///
/// The unit is not stopped: its routes stay in place until reverted.
pub async fn uninstall<S: ServiceManager + ?Sized>(
    manager: &S,
    table_name: &str,
    settings: &InstallSettings,
) -> Result<UninstallReport> {
    let unit = unit_name(table_name);
    let unit_removed = manager
        .unregister(&unit)
        .await
        .map_err(|e| install_error(&unit, e))?;

    let path = intent_path(&settings.state_dir, table_name);
    let intent_removed = match fs::remove_file(&path).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            return Err(Error::Install {
                unit,
                reason: format!("{}: {e}", path.display()),
            });
        }
    };

    info!(%unit, unit_removed, intent_removed, "boot unit removed");
    Ok(UninstallReport {
        unit,
        unit_removed,
        intent_removed,
    })
}

/// Write `content` to `path` unless it already holds exactly that.
///
/// Writes go through a temporary file and a rename. Returns whether the
/// file changed.
pub async fn write_string_if_changed(path: &Path, content: &str) -> io::Result<bool> {
    if let Ok(existing) = fs::read(path).await
        && existing == content.as_bytes()
    {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(true)
}

/// Render a systemd unit for `exec` under `policy`.
pub fn render_unit(exec: &[String], policy: &BootPolicy) -> String {
    let mut unit = String::from("[Unit]\n");
    unit.push_str(&format!("Description={}\n", policy.description));
    if policy.after_network_online {
        unit.push_str("Wants=network-online.target\nAfter=network-online.target\n");
    }

    unit.push_str("\n[Service]\nType=oneshot\n");
    let args: Vec<String> = exec.iter().map(|a| systemd_quote(a)).collect();
    unit.push_str(&format!("ExecStart={}\n", args.join(" ")));
    if policy.remain_after_exit {
        unit.push_str("RemainAfterExit=yes\n");
    }

    unit.push_str("\n[Install]\nWantedBy=multi-user.target\n");
    unit
}

/// Quote one `ExecStart=` word.
fn systemd_quote(arg: &str) -> String {
    let escaped = arg.replace('%', "%%");
    if !escaped.is_empty()
        && !escaped
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'))
    {
        return escaped;
    }
    let mut quoted = String::with_capacity(escaped.len() + 2);
    quoted.push('"');
    for c in escaped.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// systemd, driven through unit files and `systemctl`.
#[derive(Debug, Clone)]
pub struct Systemd {
    unit_dir: PathBuf,
    systemctl: PathBuf,
}

impl Systemd {
    /// Default system unit directory.
    pub const UNIT_DIR: &'static str = "/etc/systemd/system";

    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
            systemctl: PathBuf::from("systemctl"),
        }
    }

    /// Use another `systemctl` binary.
    pub fn with_systemctl(mut self, systemctl: impl Into<PathBuf>) -> Self {
        self.systemctl = systemctl.into();
        self
    }

    pub fn unit_path(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(unit)
    }

    async fn systemctl(&self, unit: &str, args: &[&str]) -> Result<()> {
        debug!(systemctl = %self.systemctl.display(), ?args, "running systemctl");
        let output = Command::new(&self.systemctl)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Install {
                unit: unit.to_string(),
                reason: format!("spawning {}: {e}", self.systemctl.display()),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(Error::Install {
            unit: unit.to_string(),
            reason: format!(
                "systemctl {} exited with {}: {stderr}",
                args.join(" "),
                output.status
            ),
        })
    }
}

impl Default for Systemd {
    fn default() -> Self {
        Self::new(Self::UNIT_DIR)
    }
}

#[async_trait]
impl ServiceManager for Systemd {
    async fn register(&self, unit: &str, exec: &[String], policy: &BootPolicy) -> Result<bool> {
        let path = self.unit_path(unit);
        let changed = write_string_if_changed(&path, &render_unit(exec, policy))
            .await
            .map_err(|e| Error::Install {
                unit: unit.to_string(),
                reason: format!("{}: {e}", path.display()),
            })?;
        if changed {
            self.systemctl(unit, &["daemon-reload"]).await?;
        }
        Ok(changed)
    }

    async fn enable(&self, unit: &str) -> Result<()> {
        self.systemctl(unit, &["enable", unit]).await
    }

    async fn start(&self, unit: &str) -> Result<()> {
        self.systemctl(unit, &["start", unit]).await
    }

    async fn is_registered(&self, unit: &str) -> Result<bool> {
        Ok(fs::try_exists(self.unit_path(unit)).await?)
    }

    async fn unregister(&self, unit: &str) -> Result<bool> {
        let path = self.unit_path(unit);
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        self.systemctl(unit, &["disable", unit]).await?;
        fs::remove_file(&path).await.map_err(|e| Error::Install {
            unit: unit.to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
        self.systemctl(unit, &["daemon-reload"]).await?;
        Ok(true)
    }
}

/// A registered unit as seen by [`RecordingServiceManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUnit {
    pub exec: Vec<String>,
    pub policy: BootPolicy,
    pub enabled: bool,
    pub started: bool,
}

#[derive(Debug, Default)]
struct Recording {
    units: BTreeMap<String, RecordedUnit>,
    calls: Vec<String>,
}

/// In-memory service manager that records every call.
#[derive(Debug, Default)]
pub struct RecordingServiceManager {
    inner: Mutex<Recording>,
    fail_start: bool,
}

impl RecordingServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `start` fail.
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }

    pub fn units(&self) -> BTreeMap<String, RecordedUnit> {
        self.lock().units.clone()
    }

    /// Calls in order, as `"<method> <unit>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn not_registered(unit: &str) -> Error {
        Error::Install {
            unit: unit.to_string(),
            reason: "unit is not registered".to_string(),
        }
    }
}

#[async_trait]
impl ServiceManager for RecordingServiceManager {
    async fn register(&self, unit: &str, exec: &[String], policy: &BootPolicy) -> Result<bool> {
        let mut rec = self.lock();
        rec.calls.push(format!("register {unit}"));
        let entry = RecordedUnit {
            exec: exec.to_vec(),
            policy: policy.clone(),
            enabled: false,
            started: false,
        };
        match rec.units.get_mut(unit) {
            Some(existing) if existing.exec == entry.exec && existing.policy == entry.policy => {
                Ok(false)
            }
            Some(existing) => {
                existing.exec = entry.exec;
                existing.policy = entry.policy;
                Ok(true)
            }
            None => {
                rec.units.insert(unit.to_string(), entry);
                Ok(true)
            }
        }
    }

    async fn enable(&self, unit: &str) -> Result<()> {
        let mut rec = self.lock();
        rec.calls.push(format!("enable {unit}"));
        let entry = rec
            .units
            .get_mut(unit)
            .ok_or_else(|| Self::not_registered(unit))?;
        entry.enabled = true;
        Ok(())
    }

    async fn start(&self, unit: &str) -> Result<()> {
        let mut rec = self.lock();
        rec.calls.push(format!("start {unit}"));
        if self.fail_start {
            return Err(Error::Install {
                unit: unit.to_string(),
                reason: "start refused".to_string(),
            });
        }
        let entry = rec
            .units
            .get_mut(unit)
            .ok_or_else(|| Self::not_registered(unit))?;
        entry.started = true;
        Ok(())
    }

    async fn is_registered(&self, unit: &str) -> Result<bool> {
        Ok(self.lock().units.contains_key(unit))
    }

    async fn unregister(&self, unit: &str) -> Result<bool> {
        let mut rec = self.lock();
        rec.calls.push(format!("unregister {unit}"));
        Ok(rec.units.remove(unit).is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::intent::NetworkIntent;
    use crate::resolve::ResolvedInterface;
    use crate::rt_tables::TableRegistry;

    fn plan() -> RoutePlan {
        let intent = NetworkIntent::new(
            "10.0.0.5/24".parse().unwrap(),
            "10.0.0.0/24".parse().unwrap(),
            200,
            "secondary",
            Ipv4Addr::new(10, 0, 1, 1),
        )
        .unwrap();
        let iface = ResolvedInterface {
            name: "eth0".into(),
            index: 2,
            primary_address: "10.0.1.5/24".parse().unwrap(),
            gateway: None,
        };
        RoutePlan::build(&intent, &iface, &TableRegistry::builtin()).unwrap()
    }

    fn settings(dir: &Path) -> InstallSettings {
        InstallSettings {
            state_dir: dir.join("state"),
            binary_path: PathBuf::from("/usr/local/bin/routeboot"),
            extra_args: Vec::new(),
            policy: BootPolicy::default(),
        }
    }

    #[test]
    fn test_render_unit() {
        let exec = vec![
            "/usr/local/bin/routeboot".to_string(),
            "apply".to_string(),
            "--intent".to_string(),
            "/etc/routeboot/secondary.yaml".to_string(),
        ];
        let unit = render_unit(&exec, &BootPolicy::default());
        assert_eq!(
            unit,
            "[Unit]\n\
Description=routeboot secondary routing\n\
Wants=network-online.target\n\
After=network-online.target\n\
\n\
[Service]\n\
Type=oneshot\n\
ExecStart=/usr/local/bin/routeboot apply --intent /etc/routeboot/secondary.yaml\n\
RemainAfterExit=yes\n\
\n\
[Install]\n\
WantedBy=multi-user.target\n"
        );
    }

    #[test]
    fn test_systemd_quote() {
        assert_eq!(systemd_quote("plain"), "plain");
        assert_eq!(systemd_quote("/opt/my dir/x"), "\"/opt/my dir/x\"");
        assert_eq!(systemd_quote("50%"), "50%%");
        assert_eq!(systemd_quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(systemd_quote(""), "\"\"");
    }

    #[tokio::test]
    async fn test_write_if_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/file.yaml");
        assert!(write_string_if_changed(&path, "a: 1\n").await.unwrap());
        assert!(!write_string_if_changed(&path, "a: 1\n").await.unwrap());
        assert!(write_string_if_changed(&path, "a: 2\n").await.unwrap());
        assert_eq!(fs::read_to_string(&path).await.unwrap(), "a: 2\n");
    }

    #[tokio::test]
    async fn test_install_twice_registers_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RecordingServiceManager::new();
        let settings = settings(dir.path());

        let first = install(&manager, &plan(), &settings).await.unwrap();
        assert_eq!(first.unit, "routeboot-secondary.service");
        assert!(first.intent_changed);
        assert!(first.unit_changed);

        let second = install(&manager, &plan(), &settings).await.unwrap();
        assert!(!second.intent_changed);
        assert!(!second.unit_changed);

        let units = manager.units();
        assert_eq!(units.len(), 1);
        let unit = &units["routeboot-secondary.service"];
        assert!(unit.enabled && unit.started);
        assert_eq!(
            unit.exec,
            [
                "/usr/local/bin/routeboot",
                "apply",
                "--intent",
                first.intent_path.to_str().unwrap()
            ]
        );

        let persisted = NetworkIntent::load(&first.intent_path).unwrap();
        assert_eq!(&persisted, plan().intent());
    }

    #[tokio::test]
    async fn test_install_always_enables_and_starts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RecordingServiceManager::new();
        install(&manager, &plan(), &settings(dir.path())).await.unwrap();
        assert_eq!(
            manager.calls(),
            [
                "register routeboot-secondary.service",
                "enable routeboot-secondary.service",
                "start routeboot-secondary.service"
            ]
        );
    }

    #[tokio::test]
    async fn test_start_failure_is_install_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RecordingServiceManager::failing_start();
        let err = install(&manager, &plan(), &settings(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Install { ref unit, .. } if unit == "routeboot-secondary.service"));
    }

    #[tokio::test]
    async fn test_uninstall() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RecordingServiceManager::new();
        let settings = settings(dir.path());
        let report = install(&manager, &plan(), &settings).await.unwrap();

        let removed = uninstall(&manager, "secondary", &settings).await.unwrap();
        assert!(removed.unit_removed && removed.intent_removed);
        assert!(!report.intent_path.exists());
        assert!(!manager.is_registered(&report.unit).await.unwrap());

        let again = uninstall(&manager, "secondary", &settings).await.unwrap();
        assert!(!again.unit_removed && !again.intent_removed);
    }

    #[tokio::test]
    async fn test_systemd_writes_unit_once() {
        let dir = tempfile::tempdir().unwrap();
        // `true` accepts any arguments and succeeds.
        let systemd = Systemd::new(dir.path()).with_systemctl("true");
        let exec = vec!["/bin/routeboot".to_string(), "apply".to_string()];

        assert!(systemd.register("rb.service", &exec, &BootPolicy::default()).await.unwrap());
        assert!(!systemd.register("rb.service", &exec, &BootPolicy::default()).await.unwrap());
        assert!(systemd.is_registered("rb.service").await.unwrap());
        assert!(systemd.unregister("rb.service").await.unwrap());
        assert!(!systemd.is_registered("rb.service").await.unwrap());
        assert!(!systemd.unregister("rb.service").await.unwrap());
    }

    #[tokio::test]
    async fn test_systemctl_failure() {
        let dir = tempfile::tempdir().unwrap();
        let systemd = Systemd::new(dir.path()).with_systemctl("false");
        let err = systemd.enable("rb.service").await.unwrap_err();
        assert!(matches!(err, Error::Install { ref reason, .. } if reason.contains("systemctl enable")));
    }
}
