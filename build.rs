use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn main() {
    let commit = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let branch = git(&["branch", "--show-current"]).unwrap_or_else(|| "unknown".into());

    println!("cargo:rustc-env=APPKEEP_GIT_COMMIT={}", commit);
    println!("cargo:rustc-env=APPKEEP_GIT_BRANCH={}", branch);

    // Release builds are tagged; the CLI then reports just the tag
    if let Some(tag) = git(&["tag", "--points-at", "HEAD"]) {
        let tag = tag.lines().next().unwrap_or_default();
        println!("cargo:rustc-env=APPKEEP_GIT_TAG={}", tag);
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
}
