use std::process::Command;

fn main() {
    // "unknown" outside a git checkout.
    let describe = git_describe().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=MIRAI_BUILD_DESCRIBE={}", describe);

    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");
}

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let describe = String::from_utf8(output.stdout).ok()?;
    let describe = describe.trim();
    if describe.is_empty() {
        None
    } else {
        Some(describe.to_string())
    }
}
