use std::env;
use std::process::Command;

fn git_short_commit() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "--short", "HEAD"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!commit.is_empty()).then_some(commit)
}

fn main() {
    let build_number = env::var("BUILD_NUMBER").unwrap_or_else(|_| "0".to_string());
    let git_commit = env::var("GIT_COMMIT")
        .ok()
        .or_else(git_short_commit)
        .unwrap_or_else(|| "unknown".to_string());
    let built_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

    println!("cargo:rustc-env=BUILD_NUMBER={}", build_number);
    println!("cargo:rustc-env=GIT_COMMIT={}", git_commit);
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", built_at);

    println!("cargo:rerun-if-env-changed=BUILD_NUMBER");
    println!("cargo:rerun-if-env-changed=GIT_COMMIT");
    println!("cargo:rerun-if-changed=migrations");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
