// Compiles src/plugin.c into two shared libraries in OUT_DIR: the complete
// plugin and a copy without `plugin_free`. Their paths are handed to the
// crate through `C_INPROC_LIBRARY` and `C_INPROC_LIBRARY_WITHOUT_FREE`.

use std::env;
use std::path::{Path, PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=src/plugin.c");
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let source = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo"))
        .join("src")
        .join("plugin.c");

    let full = build_shared(&source, &out_dir, "c_plugin_example", &[]);
    let partial = build_shared(&source, &out_dir, "c_plugin_without_free", &["C_INPROC_OMIT_FREE"]);

    println!("cargo:rustc-env=C_INPROC_LIBRARY={}", full.display());
    println!("cargo:rustc-env=C_INPROC_LIBRARY_WITHOUT_FREE={}", partial.display());
}

fn library_file(stem: &str) -> String {
    match env::var("CARGO_CFG_TARGET_OS").as_deref() {
        Ok("windows") => format!("{}.dll", stem),
        Ok("macos") | Ok("ios") => format!("lib{}.dylib", stem),
        _ => format!("lib{}.so", stem),
    }
}

/// Compile and link `source` as a shared library with the C compiler `cc`
/// selects for the target.
fn build_shared(source: &Path, out_dir: &Path, stem: &str, defines: &[&str]) -> PathBuf {
    let output = out_dir.join(library_file(stem));
    let compiler = cc::Build::new().pic(true).cargo_metadata(false).get_compiler();
    let mut cmd = compiler.to_command();
    cmd.current_dir(out_dir);

    if compiler.is_like_msvc() {
        for define in defines {
            cmd.arg(format!("/D{}", define));
        }
        cmd.arg("/LD").arg(source).arg(format!("/Fe{}", output.display()));
    } else {
        for define in defines {
            cmd.arg(format!("-D{}", define));
        }
        cmd.arg("-shared").arg(source).arg("-o").arg(&output);
    }

    let status = cmd
        .status()
        .unwrap_or_else(|e| panic!("failed to run {}: {}", compiler.path().display(), e));
    assert!(status.success(), "building {} failed: {}", output.display(), status);
    output
}
