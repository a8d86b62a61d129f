use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use tar::Archive;
use ureq::{AgentBuilder, Error as UreqError};
use walkdir::WalkDir;
use zip::read::ZipArchive;

const DEFAULT_PDFIUM_VERSION: &str = "7350";
const DEFAULT_RELEASE_PREFIX: &str = "chromium";
const DEFAULT_BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

const WATCHED_ENV: &[&str] = &[
    "SLIDEDECK_PDFIUM_SKIP_DOWNLOAD",
    "SLIDEDECK_PDFIUM_ARCHIVE_PATH",
    "SLIDEDECK_PDFIUM_VERSION",
    "SLIDEDECK_PDFIUM_RELEASE_TAG",
    "SLIDEDECK_PDFIUM_PLATFORM",
    "SLIDEDECK_PDFIUM_BASE_URL",
    "SLIDEDECK_FORCE_DOWNLOAD",
    "PDFIUM_DYNAMIC_LIB_PATH",
    "PDFIUM_STATIC_LIB_PATH",
];

/// Everything needed to locate or fetch a prebuilt pdfium for the target.
struct PdfiumFetch {
    staging_dir: PathBuf,
    target_os: String,
    platform: String,
    version: String,
    release_tag: String,
    base_url: String,
}

impl PdfiumFetch {
    fn from_env() -> Result<Self> {
        let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR env var not set")?);
        let target_os =
            env::var("CARGO_CFG_TARGET_OS").context("CARGO_CFG_TARGET_OS env var missing")?;
        let target_arch =
            env::var("CARGO_CFG_TARGET_ARCH").context("CARGO_CFG_TARGET_ARCH env var missing")?;
        let platform = env::var("SLIDEDECK_PDFIUM_PLATFORM")
            .unwrap_or_else(|_| default_platform(&target_os, &target_arch));
        let version = env::var("SLIDEDECK_PDFIUM_VERSION")
            .unwrap_or_else(|_| DEFAULT_PDFIUM_VERSION.to_string());
        let release_tag = env::var("SLIDEDECK_PDFIUM_RELEASE_TAG")
            .unwrap_or_else(|_| format!("{DEFAULT_RELEASE_PREFIX}/{version}"));
        let base_url =
            env::var("SLIDEDECK_PDFIUM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            staging_dir: out_dir.join("pdfium"),
            target_os,
            platform,
            version,
            release_tag,
            base_url,
        })
    }

    fn library_names(&self) -> &'static [&'static str] {
        match self.target_os.as_str() {
            "windows" => &["pdfium.dll"],
            "macos" => &["libpdfium.dylib"],
            _ => &["libpdfium.so"],
        }
    }

    fn locate_library(&self) -> Option<PathBuf> {
        let names = self.library_names();
        WalkDir::new(&self.staging_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| {
                let file_name = entry.file_name().to_string_lossy();
                names.iter().any(|name| *name == file_name)
            })
            .map(|entry| entry.into_path())
    }

    fn archive_names(&self) -> [String; 4] {
        let (version, platform) = (&self.version, &self.platform);
        [
            format!("pdfium-{platform}.tgz"),
            format!("pdfium-{version}-{platform}.tgz"),
            format!("pdfium-{platform}.zip"),
            format!("pdfium-{version}-{platform}.zip"),
        ]
    }

    fn download(&self) -> Result<PathBuf> {
        let download_dir = self.staging_dir.join("downloads");
        fs::create_dir_all(&download_dir).context("failed to create download cache directory")?;
        let force = env::var_os("SLIDEDECK_FORCE_DOWNLOAD").is_some();

        let mut failures = Vec::new();
        for name in self.archive_names() {
            let archive_path = download_dir.join(&name);
            if archive_path.exists() && !force {
                return Ok(archive_path);
            }

            let url = format!(
                "{}/{}/{}",
                self.base_url.trim_end_matches('/'),
                self.release_tag.trim_matches('/'),
                name
            );
            match fetch(&url, &archive_path) {
                Ok(()) => return Ok(archive_path),
                Err(err) => failures.push(err.to_string()),
            }
        }

        Err(anyhow!(
            "failed to download Pdfium for platform {} (version {}): {}",
            self.platform,
            self.version,
            failures.join("; ")
        ))
    }

    fn unpack(&self, archive: &Path) -> Result<()> {
        clear_previous_extraction(&self.staging_dir)?;

        let extension = archive
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let file =
            File::open(archive).with_context(|| format!("failed to open archive {:?}", archive))?;

        match extension.as_str() {
            "tgz" | "gz" => Archive::new(GzDecoder::new(file))
                .unpack(&self.staging_dir)
                .with_context(|| format!("failed to unpack {:?}", archive)),
            "zip" => ZipArchive::new(file)
                .with_context(|| format!("failed to read zip archive {:?}", archive))?
                .extract(&self.staging_dir)
                .with_context(|| format!("failed to extract {:?}", archive)),
            _ => Err(anyhow!("unsupported archive format for {:?}", archive)),
        }
    }
}

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=build.rs");
    for name in WATCHED_ENV {
        println!("cargo:rerun-if-env-changed={name}");
    }

    if env::var_os("SLIDEDECK_PDFIUM_SKIP_DOWNLOAD").is_some()
        || env::var_os("PDFIUM_DYNAMIC_LIB_PATH").is_some()
        || env::var_os("PDFIUM_STATIC_LIB_PATH").is_some()
    {
        return Ok(());
    }

    let fetch = PdfiumFetch::from_env()?;
    fs::create_dir_all(&fetch.staging_dir).context("failed to create staging directory")?;

    if let Some(path) = fetch.locate_library() {
        return export_library_path(&path);
    }

    let archive = match env::var_os("SLIDEDECK_PDFIUM_ARCHIVE_PATH") {
        Some(path) => PathBuf::from(path),
        None => fetch.download()?,
    };
    fetch.unpack(&archive)?;

    let library = fetch.locate_library().with_context(|| {
        format!(
            "Pdfium library not found in {:?} after extraction",
            fetch.staging_dir
        )
    })?;
    export_library_path(&library)
}

fn export_library_path(path: &Path) -> Result<()> {
    let path = path
        .to_str()
        .ok_or_else(|| anyhow!("failed to convert library path {:?} to UTF-8", path))?;
    println!("cargo:rustc-env=SLIDEDECK_PDFIUM_LIBRARY_PATH={path}");
    Ok(())
}

fn default_platform(target_os: &str, target_arch: &str) -> String {
    let platform = match (target_os, target_arch) {
        ("macos", "aarch64") => "mac-arm64",
        ("macos", "x86_64") => "mac-x64",
        ("linux", "aarch64") => "linux-arm64",
        ("linux", "arm") => "linux-arm",
        ("linux", "x86_64") => "linux-x64",
        ("windows", "aarch64") => "windows-arm64",
        ("windows", "x86_64") => "windows-x64",
        ("windows", "x86") => "windows-x86",
        (os, arch) => return format!("{os}-{arch}"),
    };
    platform.to_string()
}

fn fetch(url: &str, destination: &Path) -> Result<()> {
    let agent = AgentBuilder::new()
        .timeout_read(Duration::from_secs(120))
        .timeout_write(Duration::from_secs(120))
        .build();

    let response = agent.get(url).call().map_err(|err| match err {
        UreqError::Status(code, _) => anyhow!("GET {url} failed with HTTP status {code}"),
        other => anyhow!("GET {url} failed: {other}"),
    })?;

    let mut file =
        File::create(destination).with_context(|| format!("failed to create {:?}", destination))?;
    io::copy(&mut response.into_reader(), &mut file)
        .with_context(|| format!("failed to write downloaded data to {:?}", destination))?;
    file.flush().ok();
    Ok(())
}

/// Removes an earlier extraction but keeps the `downloads` cache.
fn clear_previous_extraction(staging_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(staging_dir)? {
        let entry = entry?;
        if entry.file_name() == "downloads" {
            continue;
        }
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.with_context(|| format!("failed to remove stale {:?}", path))?;
    }
    Ok(())
}
