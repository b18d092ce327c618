use std::process::Command;

/// Set by CI or packaging when the source tree has no git metadata
const REV_OVERRIDE: &str = "SALES_INSIGHT_BUILD_REV";

fn git_revision() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let rev = String::from_utf8(out.stdout).ok()?.trim().to_string();
    (!rev.is_empty()).then_some(rev)
}

fn main() {
    let rev = std::env::var(REV_OVERRIDE)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(git_revision)
        .unwrap_or_else(|| "nogit".to_string());
    println!("cargo:rustc-env=GIT_HASH={rev}");

    println!("cargo:rerun-if-env-changed={REV_OVERRIDE}");
    for path in ["../../.git/HEAD", "../../.git/index", "../../.git/refs/heads/"] {
        println!("cargo:rerun-if-changed={path}");
    }
}
