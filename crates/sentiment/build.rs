use std::process::{Command, Stdio};

/// Runs `git` with the given arguments and returns its trimmed output, if it succeeded.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .stderr(Stdio::inherit())
        .output()
        .ok()?;

    if !output.status.success() {
        println!("cargo:warning=`git {}` failed: {}", args.join(" "), output.status);
        return None;
    }

    Some(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

fn emit(var: &str, value: Option<String>) {
    let fallback = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let value = std::env::var(var).ok().or(value).unwrap_or(fallback);

    println!("cargo:rustc-env={var}={value}");
    println!("cargo:rerun-if-env-changed={var}");
}

fn main() {
    emit(
        "SENTIMENT_GIT_VERSION",
        git(&["describe", "--always", "--dirty=-modified"]),
    );
    emit("SENTIMENT_RELEASE", git(&["rev-parse", "HEAD"]));
}
