// build.rs

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=RANDOMX_LIB_DIR");
    println!("cargo:rerun-if-env-changed=RANDOMX_STATIC");

    if let Ok(dir) = env::var("RANDOMX_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    }

    // The RandomX library itself is an external native dependency; a static
    // build additionally needs the C++ runtime it was compiled against.
    if env::var("RANDOMX_STATIC").is_ok() {
        println!("cargo:rustc-link-lib=static=randomx");

        let target_os = env::var("CARGO_CFG_TARGET_OS");
        match target_os.as_ref().map(|x| &**x) {
            Ok("linux") | Ok("android") => {
                println!("cargo:rustc-link-lib=dylib=stdc++");
            }
            Ok("openbsd") | Ok("netbsd") | Ok("freebsd") | Ok("macos") | Ok("ios") => {
                println!("cargo:rustc-link-lib=dylib=c++");
            }
            _ => {}
        }
    } else {
        println!("cargo:rustc-link-lib=randomx");
    }
}
