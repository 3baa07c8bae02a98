use crate::types::*;
use crate::verification::detection::is_checksum_file;

const ARCH_ALIASES: [(&str, &[&str]); 4] = [
    ("x86_64", &["x86_64", "amd64", "x64"]),
    ("aarch64", &["aarch64", "arm64"]),
    ("armhf", &["armhf", "armv7", "armv7l"]),
    ("i386", &["i386", "i686", "x86_32"]),
];

pub fn get_system_info() -> PlatformInfo {
    let os = std::env::consts::OS.to_string();
    let arch = match std::env::consts::ARCH {
        "arm" => "armhf".to_string(),
        "x86" => "i386".to_string(),
        other => other.to_string(),
    };

    PlatformInfo { os, arch }
}

pub fn is_appimage(name: &str) -> bool {
    name.to_lowercase().ends_with(".appimage")
}

fn aliases_for(arch: &str) -> &'static [&'static str] {
    ARCH_ALIASES
        .iter()
        .find(|(key, aliases)| *key == arch || aliases.contains(&arch))
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

fn name_has_alias(name_lower: &str, aliases: &[&str]) -> bool {
    aliases.iter().any(|alias| name_lower.contains(alias))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchMatch {
    Exact,
    Neutral,
    Foreign,
}

fn classify_arch(name: &str, arch: &str) -> ArchMatch {
    let name_lower = name.to_lowercase();
    if name_has_alias(&name_lower, aliases_for(arch)) {
        return ArchMatch::Exact;
    }
    let foreign = ARCH_ALIASES
        .iter()
        .filter(|(key, _)| aliases_for(arch) != aliases_for(key))
        .any(|(_, aliases)| name_has_alias(&name_lower, aliases));
    if foreign {
        ArchMatch::Foreign
    } else {
        ArchMatch::Neutral
    }
}

/// Keep the AppImages and checksum files usable on `arch`, in release order.
///
/// Checksum files naming another architecture (`latest-linux-arm64.yml`) go too,
/// so they never outrank the manifest that covers the selected AppImage.
pub fn filter_release_assets(assets: Vec<Asset>, arch: &str) -> Vec<Asset> {
    assets
        .into_iter()
        .filter(|asset| {
            (is_checksum_file(&asset.name) || is_appimage(&asset.name))
                && classify_arch(&asset.name, arch) != ArchMatch::Foreign
        })
        .collect()
}

/// Pick the AppImage to install: preferred suffix first, then exact arch, then arch-neutral.
pub fn select_appimage_asset<'a>(
    assets: &'a [Asset],
    arch: &str,
    preferred_suffixes: &[String],
) -> Option<&'a Asset> {
    tracing::trace!("Looking for AppImage matching ARCH: '{}'", arch);

    let mut candidates: Vec<(i32, &Asset)> = assets
        .iter()
        .filter(|asset| is_appimage(&asset.name))
        .filter_map(|asset| {
            let mut score = match classify_arch(&asset.name, arch) {
                ArchMatch::Exact => 50,
                ArchMatch::Neutral => 10,
                ArchMatch::Foreign => return None,
            };

            let name_lower = asset.name.to_lowercase();
            if preferred_suffixes
                .iter()
                .any(|suffix| name_lower.ends_with(&suffix.to_lowercase()))
            {
                score += 100;
            }

            tracing::trace!("Asset '{}' scored {}", asset.name, score);
            Some((score, asset))
        })
        .collect();

    candidates.sort_by(|(a_score, a), (b_score, b)| b_score.cmp(a_score).then(a.name.cmp(&b.name)));

    let best = candidates.first().map(|(_, asset)| *asset);
    if let Some(asset) = best {
        tracing::debug!("Found best match: '{}'", asset.name);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            browser_download_url: format!("https://example.com/{}", name),
            size: 10,
            digest: None,
        }
    }

    #[test]
    fn test_platform_info() {
        let info = get_system_info();
        assert!(!info.os.is_empty());
        assert!(!info.arch.is_empty());
    }

    #[test]
    fn test_filter_drops_foreign_arch_and_keeps_checksums() {
        let assets = vec![
            asset("Foo-1.0-x86_64.AppImage"),
            asset("Foo-1.0-arm64.AppImage"),
            asset("Foo-1.0.tar.gz"),
            asset("SHA256SUMS"),
            asset("latest-linux.yml"),
        ];

        let filtered = filter_release_assets(assets, "x86_64");
        let names: Vec<&str> = filtered.iter().map(|a| a.name.as_str()).collect();

        assert_eq!(
            names,
            vec!["Foo-1.0-x86_64.AppImage", "SHA256SUMS", "latest-linux.yml"]
        );
    }

    #[test]
    fn test_filter_drops_foreign_arch_manifests() {
        let assets = vec![
            asset("Foo-x86_64.AppImage"),
            asset("latest-linux.yml"),
            asset("latest-linux-arm64.yml"),
            asset("Foo-arm64.AppImage"),
            asset("Foo-x86_64.AppImage.sha256"),
            asset("Foo-arm64.AppImage.sha256"),
        ];

        let filtered = filter_release_assets(assets, "x86_64");
        let names: Vec<&str> = filtered.iter().map(|a| a.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "Foo-x86_64.AppImage",
                "latest-linux.yml",
                "Foo-x86_64.AppImage.sha256"
            ]
        );
    }

    #[test]
    fn test_select_prefers_exact_arch_over_neutral() {
        let assets = vec![asset("Foo.AppImage"), asset("Foo-x86_64.AppImage")];
        let chosen = select_appimage_asset(&assets, "x86_64", &[]).unwrap();
        assert_eq!(chosen.name, "Foo-x86_64.AppImage");
    }

    #[test]
    fn test_select_honors_preferred_suffix() {
        let assets = vec![
            asset("Foo-x86_64.AppImage"),
            asset("Foo-wayland.AppImage"),
        ];
        let preferred = vec!["wayland.AppImage".to_string()];
        let chosen = select_appimage_asset(&assets, "x86_64", &preferred).unwrap();
        assert_eq!(chosen.name, "Foo-wayland.AppImage");
    }

    #[test]
    fn test_select_none_for_foreign_only() {
        let assets = vec![asset("Foo-aarch64.AppImage")];
        assert!(select_appimage_asset(&assets, "x86_64", &[]).is_none());
    }
}
