fn main() {
    #[cfg(target_os = "windows")]
    windows::stage_ffmpeg_runtime();
}

#[cfg(target_os = "windows")]
mod windows {
    use std::path::{Path, PathBuf};
    use std::time::SystemTime;

    const FFMPEG_BIN: &str = "third_party/ffmpeg/bin";
    // libvpx is linked statically into avcodec on the supported builds
    const RUNTIME_PREFIXES: &[&str] = &["avcodec-", "avutil-"];

    /// Link against the bundled FFmpeg and copy its DLLs next to the binaries.
    pub fn stage_ffmpeg_runtime() {
        println!("cargo:rerun-if-changed={}", FFMPEG_BIN);
        let bin = PathBuf::from(FFMPEG_BIN);
        if !bin.exists() {
            println!("cargo:warning=FFmpeg DLLs not found at {}", bin.display());
            return;
        }
        println!("cargo:rustc-link-search=native={}", bin.display());

        let Some(target_dir) = target_dir() else {
            println!("cargo:warning=Cannot resolve the target directory from OUT_DIR");
            return;
        };
        if let Err(e) = copy_runtime(&bin, &target_dir) {
            println!("cargo:warning=Failed to stage FFmpeg DLLs: {}", e);
        }
    }

    /// OUT_DIR is target/<profile>/build/<crate>/out.
    fn target_dir() -> Option<PathBuf> {
        let out_dir = PathBuf::from(std::env::var_os("OUT_DIR")?);
        out_dir.ancestors().nth(3).map(Path::to_path_buf)
    }

    fn copy_runtime(bin: &Path, target_dir: &Path) -> std::io::Result<()> {
        for entry in std::fs::read_dir(bin)? {
            let path = entry?.path();
            let Some(name) = path.file_name() else {
                continue;
            };
            if !is_runtime_dll(&path) {
                continue;
            }
            let dest = target_dir.join(name);
            if !dest.exists() || modified(&path) > modified(&dest) {
                std::fs::copy(&path, &dest)?;
                println!("cargo:warning=Copied {} to output dir", path.display());
            }
        }
        Ok(())
    }

    fn modified(path: &Path) -> SystemTime {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    fn is_runtime_dll(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let lower = name.to_ascii_lowercase();
        lower.ends_with(".dll") && RUNTIME_PREFIXES.iter().any(|p| lower.starts_with(p))
    }
}
