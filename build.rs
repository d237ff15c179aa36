use std::process::Command;
use std::str;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    // Agents are often built from source tarballs, so a missing git is not fatal.
    let git_tag = match Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .output()
    {
        Ok(output) if output.status.success() => str::from_utf8(&output.stdout)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string()),
        Ok(output) => {
            eprintln!("WARNING: git describe failed: {:?}", output.stderr);
            "unknown".to_string()
        }
        Err(err) => {
            eprintln!("WARNING: git not available: {err}");
            "unknown".to_string()
        }
    };

    println!("cargo:rustc-env=GIT_TAG={git_tag}");
}
