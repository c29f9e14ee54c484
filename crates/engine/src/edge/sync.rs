//! Edge server config synchronization
//!
//! Each domain gets one generated fragment in the fragment directory. The
//! master config is hand-authored; the only edit ever made to it is adding
//! or deduplicating the line that imports the fragment directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use wildcert_common::{wildcard_of, InstalledPaths, SyncResult};
use wildcert_config::EdgeConfig;

use crate::error::SyncError;

/// Fragment file extension
const FRAGMENT_EXTENSION: &str = "caddy";

/// Master config edits are serialized across the whole process
static MASTER_CONFIG_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Writes per-domain fragments and keeps the master import directive intact
#[derive(Debug, Clone)]
pub struct EdgeConfigSynchronizer {
    config: EdgeConfig,
}

impl EdgeConfigSynchronizer {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    pub fn master_config(&self) -> &Path {
        &self.config.master_config
    }

    /// Fragment location for `domain`
    pub fn fragment_path(&self, domain: &str) -> Result<PathBuf, SyncError> {
        if domain.is_empty()
            || domain.starts_with('.')
            || domain.contains(['/', '\\'])
            || domain.contains("..")
        {
            return Err(SyncError::InvalidDomain(domain.to_string()));
        }
        Ok(self
            .config
            .fragment_dir
            .join(format!("{}.{}", domain, FRAGMENT_EXTENSION)))
    }

    /// The exact import line expected in the master config
    pub fn import_line(&self) -> String {
        self.config
            .import_directive
            .replace("{dir}", &self.config.fragment_dir.display().to_string())
    }

    /// Render the fragment for `domain` serving `names` with `paths`
    pub fn render_fragment(&self, domain: &str, names: &[String], paths: &InstalledPaths) -> String {
        self.config
            .fragment_template
            .replace("{names}", &names.join(", "))
            .replace("{wildcard}", &wildcard_of(domain))
            .replace("{domain}", domain)
            .replace("{cert}", &paths.certificate.display().to_string())
            .replace("{key}", &paths.private_key.display().to_string())
            .replace("{chain}", &paths.chain.display().to_string())
    }

    /// Write `domain`'s fragment and repair the master import directive.
    ///
    /// Idempotent: running it again with the same inputs changes nothing and
    /// reports `updated = false`.
    pub async fn sync(
        &self,
        domain: &str,
        names: &[String],
        paths: &InstalledPaths,
    ) -> Result<SyncResult, SyncError> {
        let fragment_path = self.fragment_path(domain)?;
        let fragment = self.render_fragment(domain, names, paths);

        fs::create_dir_all(&self.config.fragment_dir).map_err(|source| SyncError::Io {
            path: self.config.fragment_dir.clone(),
            source,
        })?;

        let fragment_written = write_if_changed(&fragment_path, &fragment)?;
        if fragment_written {
            info!(domain = %domain, path = %fragment_path.display(), "Wrote edge config fragment");
        } else {
            trace!(domain = %domain, "Edge config fragment unchanged");
        }

        let master_repaired = {
            let _guard = MASTER_CONFIG_LOCK.lock().await;
            self.ensure_import_directive()?
        };

        Ok(SyncResult {
            updated: fragment_written || master_repaired,
            fragment_path,
            master_repaired,
        })
    }

    /// Delete `domain`'s fragment; the import directive stays
    pub async fn remove(&self, domain: &str) -> Result<bool, SyncError> {
        let path = self.fragment_path(domain)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| SyncError::Io {
            path: path.clone(),
            source,
        })?;
        info!(domain = %domain, path = %path.display(), "Removed edge config fragment");
        Ok(true)
    }

    /// Make the master config contain the import line exactly once.
    ///
    /// Returns whether the file was changed. Every other line is preserved
    /// byte for byte.
    fn ensure_import_directive(&self) -> Result<bool, SyncError> {
        let master = &self.config.master_config;
        let directive = self.import_line();

        let current = match fs::read_to_string(master) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(SyncError::Io {
                    path: master.clone(),
                    source,
                })
            }
        };

        let repaired = repair_directive(&current, &directive);
        if repaired == current {
            trace!(master = %master.display(), "Import directive present exactly once");
            return Ok(false);
        }

        if let Some(parent) = master.parent() {
            fs::create_dir_all(parent).map_err(|source| SyncError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_atomic(master, &repaired)?;

        info!(
            master = %master.display(),
            directive = %directive,
            "Repaired import directive in master config"
        );
        Ok(true)
    }
}

/// Keep the first matching directive line, drop the rest, append if absent
fn repair_directive(content: &str, directive: &str) -> String {
    let mut seen = false;
    let mut out = String::with_capacity(content.len() + directive.len() + 2);

    for line in content.split_inclusive('\n') {
        let is_directive = line.trim() == directive;
        if is_directive && seen {
            continue;
        }
        seen |= is_directive;
        out.push_str(line);
    }

    if !seen {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(directive);
        out.push('\n');
    }

    out
}

fn write_if_changed(path: &Path, content: &str) -> Result<bool, SyncError> {
    match fs::read_to_string(path) {
        Ok(existing) if existing == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(SyncError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    write_atomic(path, content)?;
    Ok(true)
}

/// Replace `path` via a temporary file in the same directory
fn write_atomic(path: &Path, content: &str) -> Result<(), SyncError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let io_err = |source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".wildcert-")
        .tempfile_in(dir)
        .map_err(io_err)?;
    tmp.write_all(content.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;

    // Keep the original file's mode
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions()).map_err(io_err)?;
    }

    tmp.persist(path).map_err(|e| io_err(e.error))?;
    debug!(path = %path.display(), bytes = content.len(), "Wrote file atomically");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        sync: EdgeConfigSynchronizer,
        master: PathBuf,
        fragment_dir: PathBuf,
        paths: InstalledPaths,
    }

    fn fixture(master_content: Option<&str>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let master = temp.path().join("Caddyfile");
        let fragment_dir = temp.path().join("sites");
        if let Some(content) = master_content {
            fs::write(&master, content).unwrap();
        }

        let config = EdgeConfig {
            master_config: master.clone(),
            fragment_dir: fragment_dir.clone(),
            ..Default::default()
        };

        let store = temp.path().join("store/p2s.tech");
        let paths = InstalledPaths {
            certificate: store.join("cert.pem"),
            private_key: store.join("key.pem"),
            chain: store.join("chain.pem"),
            directory: store,
        };

        Fixture {
            _temp: temp,
            sync: EdgeConfigSynchronizer::new(config),
            master,
            fragment_dir,
            paths,
        }
    }

    fn wildcard_names() -> Vec<String> {
        vec!["p2s.tech".to_string(), "*.p2s.tech".to_string()]
    }

    fn directive_count(f: &Fixture) -> usize {
        let directive = f.sync.import_line();
        fs::read_to_string(&f.master)
            .unwrap()
            .lines()
            .filter(|l| l.trim() == directive)
            .count()
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let f = fixture(Some("{\n\temail admin@p2s.tech\n}\n"));

        let first = f.sync.sync("p2s.tech", &wildcard_names(), &f.paths).await.unwrap();
        assert!(first.updated);
        assert!(first.master_repaired);
        assert_eq!(first.fragment_path, f.fragment_dir.join("p2s.tech.caddy"));

        let second = f.sync.sync("p2s.tech", &wildcard_names(), &f.paths).await.unwrap();
        assert!(!second.updated);
        assert!(!second.master_repaired);
        assert_eq!(directive_count(&f), 1);
    }

    #[tokio::test]
    async fn test_fragment_contents() {
        let f = fixture(None);
        let result = f.sync.sync("p2s.tech", &wildcard_names(), &f.paths).await.unwrap();

        let fragment = fs::read_to_string(result.fragment_path).unwrap();
        assert!(fragment.contains("p2s.tech, *.p2s.tech {"));
        assert!(fragment.contains(&format!(
            "tls {} {}",
            f.paths.certificate.display(),
            f.paths.private_key.display()
        )));
        // Missing master config is created with just the directive
        assert_eq!(
            fs::read_to_string(&f.master).unwrap(),
            format!("{}\n", f.sync.import_line())
        );
    }

    #[tokio::test]
    async fn test_apex_fragment_has_no_wildcard() {
        let f = fixture(None);
        let result = f
            .sync
            .sync("p2s.tech", &["p2s.tech".to_string()], &f.paths)
            .await
            .unwrap();
        let fragment = fs::read_to_string(result.fragment_path).unwrap();
        assert!(!fragment.contains("*.p2s.tech"));
    }

    #[tokio::test]
    async fn test_duplicate_directives_collapsed_without_touching_other_lines() {
        let f = fixture(None);
        let directive = f.sync.import_line();
        let original = format!(
            "# hand-written\n{d}\nexample.org {{\n\trespond \"hi\"\n}}\n  {d}  \n{d}\n",
            d = directive
        );
        fs::write(&f.master, &original).unwrap();

        let result = f.sync.sync("p2s.tech", &wildcard_names(), &f.paths).await.unwrap();
        assert!(result.master_repaired);
        assert_eq!(directive_count(&f), 1);
        assert_eq!(
            fs::read_to_string(&f.master).unwrap(),
            format!("# hand-written\n{}\nexample.org {{\n\trespond \"hi\"\n}}\n", directive)
        );
    }

    #[tokio::test]
    async fn test_changed_paths_rewrite_fragment() {
        let f = fixture(None);
        f.sync.sync("p2s.tech", &wildcard_names(), &f.paths).await.unwrap();

        let mut moved = f.paths.clone();
        moved.certificate = PathBuf::from("/srv/certs/p2s.tech/cert.pem");
        let result = f.sync.sync("p2s.tech", &wildcard_names(), &moved).await.unwrap();
        assert!(result.updated);
        assert!(!result.master_repaired);
    }

    #[tokio::test]
    async fn test_remove_fragment() {
        let f = fixture(None);
        f.sync.sync("p2s.tech", &wildcard_names(), &f.paths).await.unwrap();

        assert!(f.sync.remove("p2s.tech").await.unwrap());
        assert!(!f.sync.remove("p2s.tech").await.unwrap());
        assert_eq!(directive_count(&f), 1);
    }

    #[test]
    fn test_fragment_path_rejects_traversal() {
        let f = fixture(None);
        assert!(f.sync.fragment_path("../etc").is_err());
        assert!(f.sync.fragment_path("a/b").is_err());
        assert!(f.sync.fragment_path("").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_syncs_share_one_directive() {
        let f = fixture(Some("{\n\temail admin@p2s.tech\n}\n"));
        let domains: Vec<String> = (0..8).map(|i| format!("site{}.p2s.tech", i)).collect();

        let tasks: Vec<_> = domains
            .iter()
            .map(|domain| {
                let sync = f.sync.clone();
                let paths = f.paths.clone();
                let domain = domain.clone();
                tokio::spawn(async move {
                    let names = vec![domain.clone(), format!("*.{}", domain)];
                    sync.sync(&domain, &names, &paths).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let master = fs::read_to_string(&f.master).unwrap();
        assert_eq!(master.matches(f.sync.import_line().as_str()).count(), 1);
        assert!(master.starts_with("{\n\temail admin@p2s.tech\n}\n"));
        for domain in &domains {
            assert!(f.fragment_dir.join(format!("{}.caddy", domain)).exists());
        }
        assert_eq!(directive_count(&f), 1);
    }

    #[test]
    fn test_repair_directive_appends_after_unterminated_line() {
        assert_eq!(repair_directive("a {\n}", "import x/*"), "a {\n}\nimport x/*\n");
        assert_eq!(repair_directive("", "import x/*"), "import x/*\n");
    }
}
