use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::saves::SaveInstance;

/// Zips one slot into `dest_dir` as `<world>_<save>_<slot>_<timestamp>.zip`.
/// The slot itself is left untouched.
pub fn archive_slot(instance: &SaveInstance, slot_dir: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    if !slot_dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("slot not found: {}", slot_dir.display()),
        ));
    }
    let slot = slot_dir.file_name().and_then(|s| s.to_str()).unwrap_or("slot").replace(' ', "-");
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let zip_name = format!("{}_{}_{}_{}.zip", instance.world, instance.save, slot, ts);
    fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(zip_name);

    let file = fs::File::create(&dest)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    for entry in WalkDir::new(slot_dir) {
        let entry = entry.map_err(|e| io::Error::other(e.to_string()))?;
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(slot_dir) else { continue };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = rel.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let data = fs::read(path)?;
            zip.write_all(&data)?;
        }
    }
    zip.finish()?;
    Ok(dest)
}
