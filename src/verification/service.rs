use super::detection::{detect_available_methods, prioritize_checksum_files, resolve_skip};
use super::hasher::{FileHasher, HashAlgorithm};
use super::parser::{detect_format_from_content, find_checksum_entry, parse_checksum_file};
use super::{MethodResult, VerificationResult, CHECKSUM_FILE_METHOD, DIGEST_METHOD};
use crate::config::VerificationConfig;
use crate::download::Fetcher;
use crate::error::{Error, Result};
use crate::progress::{NoopProgress, ProgressReporter};
use crate::types::{Asset, ChecksumFileInfo};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const NOT_VERIFIED_WARNING: &str = "Not verified: no digest or checksum file available";
pub const SKIPPED_WARNING: &str = "Not verified: verification skipped by configuration";

/// Everything needed to verify one downloaded file.
#[derive(Debug, Clone, Copy)]
pub struct VerificationContext<'a> {
    pub app_name: &'a str,
    pub file_path: &'a Path,
    pub asset: &'a Asset,
    pub config: &'a VerificationConfig,
    pub all_assets: &'a [Asset],
    pub owner: &'a str,
    pub repo: &'a str,
    pub tag_name: &'a str,
}

#[derive(Clone)]
pub struct VerificationService {
    fetcher: Arc<dyn Fetcher>,
    progress: Arc<dyn ProgressReporter>,
}

impl VerificationService {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn verify_file(&self, ctx: &VerificationContext<'_>) -> Result<VerificationResult> {
        // PREPARE
        let detected = detect_available_methods(
            ctx.asset,
            ctx.config,
            ctx.all_assets,
            ctx.owner,
            ctx.repo,
            ctx.tag_name,
        );
        let (skip, updated_config) = resolve_skip(ctx.config, &detected);
        if skip {
            tracing::warn!("Skipping verification for {}", ctx.app_name);
            return Ok(VerificationResult {
                passed: true,
                methods: BTreeMap::new(),
                warning: Some(SKIPPED_WARNING.to_string()),
                updated_config,
            });
        }

        self.check_size(ctx);

        let hasher = FileHasher::new(ctx.file_path);
        let checksum_file = prioritize_checksum_files(&detected.checksum_files, &ctx.asset.name)
            .into_iter()
            .next();
        let planned = u64::from(detected.has_digest) + u64::from(checksum_file.is_some());
        let task = self
            .progress
            .add_task(&format!("Verifying {}", ctx.app_name), planned);

        // EXECUTE
        let digest_check = async {
            match ctx.asset.digest() {
                Some(digest) if detected.has_digest => {
                    Some(self.verify_digest(&hasher, digest).await)
                }
                _ => None,
            }
        };
        let checksum_check = async {
            match &checksum_file {
                Some(file) => self.verify_checksum_file(&hasher, file, &ctx.asset.name).await,
                None => None,
            }
        };
        let (digest_result, checksum_result) = tokio::join!(digest_check, checksum_check);

        // FINALIZE
        let mut methods = BTreeMap::new();
        if let Some(result) = digest_result {
            methods.insert(DIGEST_METHOD.to_string(), result);
        }
        if let Some(result) = checksum_result {
            methods.insert(CHECKSUM_FILE_METHOD.to_string(), result);
        }
        self.progress.update_task(task, methods.len() as u64, None);

        let outcome = classify(ctx, methods, updated_config);
        let success = outcome.is_ok();
        let message = match &outcome {
            Ok(result) => result.warning.clone(),
            Err(e) => Some(e.to_string()),
        };
        self.progress.finish_task(task, success, message.as_deref());
        outcome
    }

    fn check_size(&self, ctx: &VerificationContext<'_>) {
        if ctx.asset.size == 0 {
            return;
        }
        match std::fs::metadata(ctx.file_path) {
            Ok(meta) if meta.len() != ctx.asset.size => tracing::warn!(
                "{}: downloaded size {} differs from release size {}",
                ctx.app_name,
                meta.len(),
                ctx.asset.size
            ),
            Ok(_) => {}
            Err(e) => tracing::debug!("Could not stat {}: {}", ctx.file_path.display(), e),
        }
    }

    async fn verify_digest(&self, hasher: &FileHasher, digest: &str) -> MethodResult {
        let (algorithm, expected) = match digest.split_once(':') {
            Some((algo, hash)) => (algo.trim(), hash.trim()),
            None => ("sha256", digest.trim()),
        };

        let algorithm = match algorithm.parse::<HashAlgorithm>() {
            Ok(algorithm) => algorithm,
            Err(e) => return MethodResult::failed(expected, None, e.to_string()),
        };

        match hasher.compute(algorithm).await {
            Ok(actual) if actual.eq_ignore_ascii_case(expected) => {
                tracing::debug!("Digest verification passed ({})", algorithm);
                MethodResult::passed(expected, actual, format!("{} digest matches", algorithm))
            }
            Ok(actual) => {
                tracing::warn!(
                    "Digest mismatch for {}: expected {}, got {}",
                    hasher.path().display(),
                    expected,
                    actual
                );
                MethodResult::failed(expected, Some(actual), format!("{} digest mismatch", algorithm))
            }
            Err(e) => MethodResult::failed(expected, None, format!("Could not hash file: {}", e)),
        }
    }

    /// `None` when the file only lists a digest this crate does not hash.
    async fn verify_checksum_file(
        &self,
        hasher: &FileHasher,
        file: &ChecksumFileInfo,
        target: &str,
    ) -> Option<MethodResult> {
        let content = match self.fetcher.get_text(&file.url).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Could not fetch checksum file {}: {}", file.filename, e);
                return Some(MethodResult::failed(
                    "",
                    None,
                    format!("Could not fetch {}: {}", file.filename, e),
                ));
            }
        };

        let mut parsed = parse_checksum_file(&content, file.format);
        if parsed.is_empty() {
            let guessed = detect_format_from_content(&content);
            if guessed != file.format {
                tracing::debug!("Re-parsing {} as {}", file.filename, guessed);
                parsed = parse_checksum_file(&content, guessed);
            }
        }

        let Some(entry) = find_checksum_entry(&parsed, target) else {
            return Some(MethodResult::failed(
                "",
                None,
                format!("No entry for {} in {}", target, file.filename),
            ));
        };
        if !entry.algorithm.is_supported() {
            tracing::warn!(
                "{} lists a {} hash for {}, which cannot be checked",
                file.filename,
                entry.algorithm,
                target
            );
            return None;
        }

        let result = match hasher.compute(entry.algorithm).await {
            Ok(actual) if actual.eq_ignore_ascii_case(&entry.hash) => MethodResult::passed(
                &entry.hash,
                actual,
                format!("{} matches {}", entry.algorithm, file.filename),
            ),
            Ok(actual) => MethodResult::failed(
                &entry.hash,
                Some(actual),
                format!("{} mismatch against {}", entry.algorithm, file.filename),
            ),
            Err(e) => MethodResult::failed(&entry.hash, None, format!("Could not hash file: {}", e)),
        };
        Some(result)
    }
}

fn classify(
    ctx: &VerificationContext<'_>,
    methods: BTreeMap<String, MethodResult>,
    updated_config: VerificationConfig,
) -> Result<VerificationResult> {
    if methods.is_empty() {
        tracing::warn!("{}: {}", ctx.app_name, NOT_VERIFIED_WARNING);
        return Ok(VerificationResult {
            passed: true,
            methods,
            warning: Some(NOT_VERIFIED_WARNING.to_string()),
            updated_config,
        });
    }

    let failed: Vec<String> = methods
        .iter()
        .filter(|(_, result)| !result.passed)
        .map(|(name, _)| name.clone())
        .collect();

    if failed.is_empty() {
        tracing::info!("{} verified ({})", ctx.app_name, methods.keys().cloned().collect::<Vec<_>>().join(", "));
        return Ok(VerificationResult {
            passed: true,
            methods,
            warning: None,
            updated_config,
        });
    }

    if failed.len() < methods.len() {
        let warning = format!("Partial verification: {} failed", failed.join(", "));
        tracing::warn!("{}: {}", ctx.app_name, warning);
        return Ok(VerificationResult {
            passed: true,
            methods,
            warning: Some(warning),
            updated_config,
        });
    }

    Err(Error::Verification {
        app_name: ctx.app_name.to_string(),
        file_path: ctx.file_path.to_path_buf(),
        failed_methods: failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::hasher::sha256_file;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MapFetcher {
        pages: HashMap<String, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn get_text(&self, url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages.get(url).cloned().ok_or_else(|| Error::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
        }

        async fn download(
            &self,
            url: &str,
            _dest: &Path,
            _progress: &dyn ProgressReporter,
        ) -> Result<u64> {
            Err(Error::network(url, "not supported"))
        }
    }

    struct Fixture {
        _dir: TempDir,
        path: std::path::PathBuf,
        sha256: String,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Foo.AppImage");
        std::fs::write(&path, b"appimage payload").unwrap();
        let sha256 = sha256_file(&path).unwrap();
        Fixture {
            _dir: dir,
            path,
            sha256,
        }
    }

    fn asset(name: &str, digest: Option<String>) -> Asset {
        Asset {
            name: name.to_string(),
            browser_download_url: format!("https://example.com/{}", name),
            size: 0,
            digest,
        }
    }

    fn service(fetcher: MapFetcher) -> (VerificationService, Arc<MapFetcher>) {
        let fetcher = Arc::new(fetcher);
        (VerificationService::new(fetcher.clone()), fetcher)
    }

    fn ctx<'a>(
        fx: &'a Fixture,
        target: &'a Asset,
        config: &'a VerificationConfig,
        assets: &'a [Asset],
    ) -> VerificationContext<'a> {
        VerificationContext {
            app_name: "foo",
            file_path: &fx.path,
            asset: target,
            config,
            all_assets: assets,
            owner: "owner",
            repo: "foo",
            tag_name: "v1.0.0",
        }
    }

    #[tokio::test]
    async fn test_correct_digest_passes_without_warning() {
        let fx = fixture();
        let target = asset("Foo.AppImage", Some(format!("sha256:{}", fx.sha256.to_uppercase())));
        let assets = vec![target.clone()];
        let config = VerificationConfig::default();
        let (svc, _) = service(MapFetcher::default());

        let result = svc.verify_file(&ctx(&fx, &target, &config, &assets)).await.unwrap();

        assert!(result.passed);
        assert!(result.warning.is_none());
        assert_eq!(result.method_names(), vec![DIGEST_METHOD.to_string()]);
        assert!(result.methods[DIGEST_METHOD].passed);
    }

    #[tokio::test]
    async fn test_single_checksum_file_used_among_many() {
        let fx = fixture();
        let target = asset("Foo.AppImage", None);
        let sums = format!("{}  Foo.AppImage\n", fx.sha256);
        let assets = vec![
            target.clone(),
            asset("SHA256SUMS", None),
            asset("Foo.AppImage.sha256", None),
            asset("checksums-beta.txt", None),
        ];
        let mut fetcher = MapFetcher::default();
        fetcher
            .pages
            .insert("https://example.com/Foo.AppImage.sha256".into(), sums.clone());
        fetcher.pages.insert("https://example.com/SHA256SUMS".into(), sums);
        let config = VerificationConfig::default();
        let (svc, fetcher) = service(fetcher);

        let result = svc.verify_file(&ctx(&fx, &target, &config, &assets)).await.unwrap();

        assert!(result.passed);
        assert!(result.warning.is_none());
        assert_eq!(result.method_names(), vec![CHECKSUM_FILE_METHOD.to_string()]);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_verify_warns() {
        let fx = fixture();
        let target = asset("Foo.AppImage", None);
        let assets = vec![target.clone()];
        let config = VerificationConfig::default();
        let (svc, _) = service(MapFetcher::default());

        let result = svc.verify_file(&ctx(&fx, &target, &config, &assets)).await.unwrap();

        assert!(result.passed);
        assert!(result.methods.is_empty());
        assert!(result.warning.unwrap().contains("Not verified"));
    }

    #[tokio::test]
    async fn test_failing_digest_without_checksum_file_is_error() {
        let fx = fixture();
        let target = asset("Foo.AppImage", Some(format!("sha256:{}", "0".repeat(64))));
        let assets = vec![target.clone()];
        let config = VerificationConfig::default();
        let (svc, _) = service(MapFetcher::default());

        let err = svc
            .verify_file(&ctx(&fx, &target, &config, &assets))
            .await
            .unwrap_err();

        match err {
            Error::Verification {
                app_name,
                failed_methods,
                ..
            } => {
                assert_eq!(app_name, "foo");
                assert_eq!(failed_methods, vec![DIGEST_METHOD.to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_partial_verification_passes_with_warning() {
        let fx = fixture();
        let target = asset("Foo.AppImage", Some(format!("sha256:{}", fx.sha256)));
        let assets = vec![target.clone(), asset("SHA256SUMS", None)];
        // checksum file fetch fails: 404
        let config = VerificationConfig::default();
        let (svc, _) = service(MapFetcher::default());

        let result = svc.verify_file(&ctx(&fx, &target, &config, &assets)).await.unwrap();

        assert!(result.passed);
        assert!(result.methods[DIGEST_METHOD].passed);
        assert!(!result.methods[CHECKSUM_FILE_METHOD].passed);
        assert!(result.warning.unwrap().contains("Partial verification"));
    }

    #[tokio::test]
    async fn test_skip_honored_only_without_methods() {
        let fx = fixture();
        let config = VerificationConfig {
            skip: true,
            ..Default::default()
        };
        let (svc, _) = service(MapFetcher::default());

        let bare = asset("Foo.AppImage", None);
        let assets = vec![bare.clone()];
        let result = svc.verify_file(&ctx(&fx, &bare, &config, &assets)).await.unwrap();
        assert!(result.updated_config.skip);
        assert_eq!(result.warning.as_deref(), Some(SKIPPED_WARNING));

        let with_digest = asset("Foo.AppImage", Some(format!("sha256:{}", fx.sha256)));
        let assets = vec![with_digest.clone()];
        let result = svc
            .verify_file(&ctx(&fx, &with_digest, &config, &assets))
            .await
            .unwrap();
        assert!(!result.updated_config.skip);
        assert!(result.methods[DIGEST_METHOD].passed);
    }

    #[tokio::test]
    async fn test_checksum_file_missing_entry_fails() {
        let fx = fixture();
        let target = asset("Foo.AppImage", None);
        let assets = vec![target.clone(), asset("SHA256SUMS", None)];
        let mut fetcher = MapFetcher::default();
        fetcher.pages.insert(
            "https://example.com/SHA256SUMS".into(),
            format!("{}  Other.AppImage\n", fx.sha256),
        );
        let config = VerificationConfig::default();
        let (svc, _) = service(fetcher);

        let err = svc
            .verify_file(&ctx(&fx, &target, &config, &assets))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Verification { .. }));
    }

    #[tokio::test]
    async fn test_md5_only_checksum_file_is_not_a_failure() {
        let fx = fixture();
        let mut fetcher = MapFetcher::default();
        fetcher.pages.insert(
            "https://example.com/checksums.txt".into(),
            format!("{}  Foo.AppImage\n", "a".repeat(32)),
        );
        let config = VerificationConfig::default();
        let (svc, _) = service(fetcher);

        let with_digest = asset("Foo.AppImage", Some(format!("sha256:{}", fx.sha256)));
        let assets = vec![with_digest.clone(), asset("checksums.txt", None)];
        let result = svc
            .verify_file(&ctx(&fx, &with_digest, &config, &assets))
            .await
            .unwrap();
        assert!(result.warning.is_none());
        assert_eq!(result.method_names(), vec![DIGEST_METHOD.to_string()]);

        let bare = asset("Foo.AppImage", None);
        let assets = vec![bare.clone(), asset("checksums.txt", None)];
        let result = svc.verify_file(&ctx(&fx, &bare, &config, &assets)).await.unwrap();
        assert!(result.passed);
        assert!(result.methods.is_empty());
        assert_eq!(result.warning.as_deref(), Some(NOT_VERIFIED_WARNING));
    }
}
