use std::process::Command;

fn main() {
    // Build date for the version banner
    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    println!("cargo:rustc-env=BUILD_DATE={}", date);

    // Short commit hash, when building from a checkout
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    {
        if output.status.success() {
            let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
            println!("cargo:rustc-env=GIT_COMMIT={}", commit);
        }
    }

    // The aura-shell bindings are generated from this file at compile time
    println!("cargo:rerun-if-changed=protocols/aura-shell.xml");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
