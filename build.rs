use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=CHEMSENS_GIT_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    if let Ok(sha) = env::var("CHEMSENS_GIT_SHA") {
        if !sha.trim().is_empty() {
            println!("cargo:rustc-env=CHEMSENS_GIT_SHA={}", sha.trim());
        }
        return;
    }

    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output();

    let sha = match output {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        _ => String::new(),
    };

    // Always defined so the crate can rely on env! rather than option_env!
    let sha = if sha.is_empty() { "unknown".to_string() } else { sha };
    println!("cargo:rustc-env=CHEMSENS_GIT_SHA={}", sha);
}
