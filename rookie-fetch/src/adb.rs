use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rookie_core::{DeviceAgent, DeviceProperties, EngineError, InstalledApp, RenamePolicy};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::process;

/// Where expansion files live on the device.
pub const OBB_ROOT: &str = "/sdcard/Android/obb/";

/// [`DeviceAgent`] driving the first attached device through `adb`.
#[derive(Debug, Clone)]
pub struct Adb {
    program: PathBuf,
}

impl Default for Adb {
    fn default() -> Self {
        Self::new("adb")
    }
}

impl Adb {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn adb<I, S>(&self, args: I) -> Result<String, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        process::run(&self.program, args).await
    }

    async fn shell(&self, serial: &str, args: &[&str]) -> Result<String, FetchError> {
        let mut full = vec!["-s", serial, "shell"];
        full.extend_from_slice(args);
        self.adb(full).await
    }

    /// Serials of devices in the `device` state.
    pub async fn serials(&self) -> Result<Vec<String>, FetchError> {
        Ok(parse_devices(&self.adb(["devices"]).await?))
    }

    /// The device all commands target.
    pub async fn serial(&self) -> Result<String, FetchError> {
        self.serials()
            .await?
            .into_iter()
            .next()
            .ok_or(FetchError::NoDevice)
    }

    pub async fn model(&self, serial: &str) -> Result<String, FetchError> {
        let out = self.shell(serial, &["getprop", "ro.product.model"]).await?;
        Ok(out.trim().to_owned())
    }

    /// `(total, free)` KiB of shared storage.
    pub async fn space_usage(&self, serial: &str) -> Result<(u64, u64), FetchError> {
        let out = self.shell(serial, &["df", "/sdcard"]).await?;
        parse_df(&out).ok_or_else(|| FetchError::invalid(format!("unexpected df output: {out}")))
    }

    async fn push_obb(&self, serial: &str, dir: &Path, package_name: &str) -> Result<(), FetchError> {
        let remote = format!("{OBB_ROOT}{package_name}");
        self.shell(serial, &["rm", "-rf", &remote]).await?;
        self.shell(serial, &["mkdir", &remote]).await?;

        let mut local = dir.join(package_name).into_os_string();
        local.push("/");
        let serial = std::ffi::OsString::from(serial);
        self.adb([
            std::ffi::OsString::from("-s"),
            serial,
            "push".into(),
            local,
            OBB_ROOT.into(),
        ])
        .await?;
        info!(package_name, "expansion files pushed");
        Ok(())
    }
}

#[async_trait]
impl DeviceAgent for Adb {
    async fn is_connected(&self) -> bool {
        match self.serials().await {
            Ok(serials) => !serials.is_empty(),
            Err(e) => {
                debug!(error = %e, "adb devices failed");
                false
            }
        }
    }

    async fn list_installed_apps(&self) -> Result<Vec<InstalledApp>, EngineError> {
        let serial = self.serial().await?;
        let out = self
            .shell(&serial, &["pm", "list", "packages", "--show-versioncode", "-3"])
            .await?;
        Ok(parse_packages(&out))
    }

    async fn install(
        &self,
        local_path: &Path,
        package_name: &str,
        rename: RenamePolicy,
    ) -> Result<(), EngineError> {
        let serial = self.serial().await.map_err(FetchError::into_install)?;
        let apk = prepare_apk(local_path, package_name, rename)
            .await
            .map_err(FetchError::into_install)?;

        info!(serial = %serial, apk = %apk.display(), "adb install");
        let mut args = vec![
            std::ffi::OsString::from("-s"),
            serial.clone().into(),
            "install".into(),
            "-r".into(),
        ];
        args.push(apk.into_os_string());
        self.adb(args).await.map_err(FetchError::into_install)?;

        if is_dir(&local_path.join(package_name)).await {
            self.push_obb(&serial, local_path, package_name)
                .await
                .map_err(FetchError::into_install)?;
        }
        Ok(())
    }

    async fn uninstall(&self, package_name: &str) -> Result<(), EngineError> {
        let serial = self.serial().await.map_err(FetchError::into_install)?;
        self.adb(["-s", serial.as_str(), "uninstall", package_name])
            .await
            .map_err(FetchError::into_install)?;
        Ok(())
    }

    async fn properties(&self) -> Result<Option<DeviceProperties>, EngineError> {
        let serial = match self.serial().await {
            Ok(serial) => serial,
            Err(FetchError::NoDevice) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let model = self.model(&serial).await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read device model");
            String::new()
        });
        let (total_space_kib, free_space_kib) =
            self.space_usage(&serial).await.unwrap_or_else(|e| {
                warn!(error = %e, "failed to read device storage");
                (0, 0)
            });
        Ok(Some(DeviceProperties {
            serial,
            model,
            total_space_kib,
            free_space_kib,
        }))
    }
}

/// Locate `<dir>/<package>.apk`, renaming a lone APK to that name when the
/// policy allows it.
pub async fn prepare_apk(
    dir: &Path,
    package_name: &str,
    rename: RenamePolicy,
) -> Result<PathBuf, FetchError> {
    let apk = dir.join(format!("{package_name}.apk"));
    if is_file(&apk).await {
        return Ok(apk);
    }
    if rename == RenamePolicy::Keep {
        return Err(FetchError::invalid(format!("{} does not exist", apk.display())));
    }

    let mut candidates = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_apk = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("apk"));
        if is_apk && entry.file_type().await?.is_file() {
            candidates.push(path);
        }
    }
    match candidates.as_slice() {
        [only] => {
            info!(from = %only.display(), to = %apk.display(), "renaming package file");
            tokio::fs::rename(only, &apk).await?;
            Ok(apk)
        }
        [] => Err(FetchError::invalid(format!("no APK in {}", dir.display()))),
        _ => Err(FetchError::invalid(format!(
            "{} APKs in {}, cannot pick one",
            candidates.len(),
            dir.display()
        ))),
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file())
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

/// Serials from `adb devices` output.
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let (serial, state) = line.split_once('\t')?;
            (state.trim() == "device").then(|| serial.trim().to_owned())
        })
        .collect()
}

/// `package:<id> versionCode:<n>` lines from `pm list packages`.
pub fn parse_packages(output: &str) -> Vec<InstalledApp> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("package:")?;
            let (package_name, version) = rest.split_once(" versionCode:")?;
            let version_code = version.trim().parse::<i64>().ok()?;
            Some(InstalledApp::new(package_name.trim(), version_code))
        })
        .collect()
}

/// Total and available KiB from `df` output.
pub fn parse_df(output: &str) -> Option<(u64, u64)> {
    let line = output.lines().skip(1).find(|l| !l.trim().is_empty())?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }
    Some((parts[1].parse().ok()?, parts[3].parse().ok()?))
}
