use stackrun::{Error, Result};
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Zips a directory tree into an IaC bundle. Entries are added in sorted
/// order so the same tree always produces the same archive.
pub fn zip_dir(dir: &Path) -> Result<Vec<u8>> {
  let mut buf = Vec::new();
  let mut writer = ZipWriter::new(Cursor::new(&mut buf));
  let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

  for path in collect_files(dir)? {
    let relative = path
      .strip_prefix(dir)
      .map_err(|err| Error::internal(format!("Path outside bundle root: {}", err)))?;

    writer
      .start_file(relative.to_string_lossy(), options)
      .map_err(|err| Error::internal(format!("Failed to add bundle entry: {}", err)))?;

    let mut file = File::open(&path)?;
    std::io::copy(&mut file, &mut writer)?;
  }

  writer
    .finish()
    .map_err(|err| Error::internal(format!("Failed to finish bundle: {}", err)))?;

  Ok(buf)
}

/// Unpacks an IaC bundle into a directory.
pub fn unzip_into(bytes: &[u8], dir: &Path) -> Result<()> {
  let mut archive = ZipArchive::new(Cursor::new(bytes))
    .map_err(|err| Error::internal(format!("Corrupt IaC bundle: {}", err)))?;

  archive
    .extract(dir)
    .map_err(|err| Error::internal(format!("Failed to unpack IaC bundle: {}", err)))?;

  Ok(())
}

fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  let mut stack = vec![dir.to_path_buf()];

  while let Some(current) = stack.pop() {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&current)?
      .map(|entry| entry.map(|e| e.path()))
      .collect::<std::io::Result<_>>()?;
    entries.sort();

    for path in entries {
      if path.is_dir() {
        stack.push(path);
      } else {
        files.push(path);
      }
    }
  }

  files.sort();
  Ok(files)
}
