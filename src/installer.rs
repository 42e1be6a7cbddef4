use std::{
    collections::{HashMap, HashSet},
    fs,
    io::{self, Read, Seek},
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::{
    config::LauncherConfig,
    error::UpdateError,
    resolver::VersionResolver,
    version::ResolvedVersion,
};

/// What a single synchronisation pass did to the install directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub extracted: usize,
    pub skipped: usize,
    pub preserved: usize,
    /// Top-level entries written to, in the order they were first touched.
    pub touched: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub resolved: ResolvedVersion,
    pub summary: SyncSummary,
}

#[derive(Debug, Clone)]
pub struct PackageInstaller {
    resolver: VersionResolver,
    install_path: PathBuf,
    preserve: Vec<String>,
}

impl PackageInstaller {
    pub fn new(config: &LauncherConfig) -> Result<Self, UpdateError> {
        Ok(Self::with_resolver(VersionResolver::new(config)?, config))
    }

    pub fn with_resolver(resolver: VersionResolver, config: &LauncherConfig) -> Self {
        Self {
            resolver,
            install_path: config.install_path(),
            preserve: config.preserve_files.clone(),
        }
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    /// Bring the install directory up to the latest published build.
    ///
    /// Nothing is rolled back on failure; the directory keeps whatever was
    /// written before the error.
    pub async fn update(&self) -> Result<UpdateReport, UpdateError> {
        let resolved = self.resolver.check_available_version().await?;
        info!(
            "Latest server build is {} for {}",
            resolved.version,
            self.install_path.display()
        );

        tokio::fs::create_dir_all(&self.install_path)
            .await
            .map_err(|e| UpdateError::extraction(&self.install_path, e))?;

        let package = self.download(&resolved.url).await?;

        let install_path = self.install_path.clone();
        let preserve = self.preserve.clone();
        let summary = tokio::task::spawn_blocking(move || {
            let mut package = package;
            package
                .rewind()
                .map_err(|e| UpdateError::extraction(&install_path, e))?;
            sync_archive(package, &install_path, &preserve)
        })
        .await??;

        info!(
            "Update to {} finished: {} extracted, {} up to date, {} preserved",
            resolved.version, summary.extracted, summary.skipped, summary.preserved
        );

        Ok(UpdateReport { resolved, summary })
    }

    /// Synchronise the install directory against an archive that is already
    /// available locally.
    pub fn apply_archive<R: Read + Seek>(&self, reader: R) -> Result<SyncSummary, UpdateError> {
        fs::create_dir_all(&self.install_path)
            .map_err(|e| UpdateError::extraction(&self.install_path, e))?;
        sync_archive(reader, &self.install_path, &self.preserve)
    }

    /// Streams the package into an anonymous temporary file.
    async fn download(&self, url: &str) -> Result<fs::File, UpdateError> {
        let mut response = self
            .resolver
            .client()
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        let temp = tempfile::tempfile().map_err(|e| UpdateError::extraction(std::env::temp_dir(), e))?;
        let mut file = tokio::fs::File::from_std(temp);

        let mut bytes = 0usize;
        while let Some(chunk) = response.chunk().await? {
            bytes += chunk.len();
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdateError::extraction(std::env::temp_dir(), e))?;
        }
        file.flush()
            .await
            .map_err(|e| UpdateError::extraction(std::env::temp_dir(), e))?;

        debug!("Downloaded {} bytes from {}", bytes, url);
        Ok(file.into_std().await)
    }
}

fn sync_archive<R: Read + Seek>(
    reader: R,
    install_path: &Path,
    preserve: &[String],
) -> Result<SyncSummary, UpdateError> {
    let mut archive = ZipArchive::new(reader)?;
    // only directories present before this run are protected
    let preserve: Vec<String> = preserve
        .iter()
        .map(|p| normalize(p))
        .filter(|p| !p.is_empty() && install_path.join(p).is_dir())
        .collect();

    let mut summary = SyncSummary::default();
    // mtime of each top-level entry as it was before this run wrote into it
    let mut baselines: HashMap<String, Option<SystemTime>> = HashMap::new();
    let mut announced: HashSet<String> = HashSet::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| UpdateError::UnsafeEntry(name.clone()))?;
        let Some(root) = top_level(&relative) else {
            continue;
        };
        let dest = install_path.join(&relative);

        if is_preserved(&name, &preserve) {
            debug!("Preserving {}", dest.display());
            summary.preserved += 1;
            continue;
        }

        let baseline = *baselines
            .entry(root.clone())
            .or_insert_with(|| modified(&install_path.join(&root)));
        let entry_time = zip_time(entry.last_modified());

        if !is_newer(entry_time, baseline) {
            summary.skipped += 1;
            continue;
        }

        if announced.insert(root.clone()) {
            info!("Overwriting {}", root);
            summary.touched.push(root);
        }

        if entry.is_dir() {
            fs::create_dir_all(&dest).map_err(|e| UpdateError::extraction(&dest, e))?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| UpdateError::extraction(parent, e))?;
            }
            let mut out = fs::File::create(&dest).map_err(|e| UpdateError::extraction(&dest, e))?;
            io::copy(&mut entry, &mut out).map_err(|e| UpdateError::extraction(&dest, e))?;
            if let Some(time) = entry_time {
                out.set_modified(time)
                    .map_err(|e| UpdateError::extraction(&dest, e))?;
            }
            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&dest, fs::Permissions::from_mode(mode & 0o777))
                    .map_err(|e| UpdateError::extraction(&dest, e))?;
            }
        }

        summary.extracted += 1;
    }

    Ok(summary)
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// An entry is left alone when it is, or sits below, one of the existing
/// preserved directories.
fn is_preserved(name: &str, preserve: &[String]) -> bool {
    let name = normalize(name);
    preserve
        .iter()
        .any(|p| name == *p || name.starts_with(&format!("{p}/")))
}

fn top_level(relative: &Path) -> Option<String> {
    relative.components().find_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    })
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// A missing destination is always older than the archive.
fn is_newer(entry: Option<SystemTime>, baseline: Option<SystemTime>) -> bool {
    match (entry, baseline) {
        (_, None) => true,
        (Some(entry), Some(baseline)) => entry > baseline,
        (None, Some(_)) => false,
    }
}

/// Zip timestamps carry no zone; treat them as local time.
fn zip_time(time: zip::DateTime) -> Option<SystemTime> {
    let naive = NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?
        .and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())?;
    Some(local_to_system(naive))
}

/// Wall-clock times skipped by a DST change have no local instant; read
/// those as UTC.
fn local_to_system(naive: NaiveDateTime) -> SystemTime {
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => SystemTime::from(local),
        None => SystemTime::from(Utc.from_utc_datetime(&naive)),
    }
}
