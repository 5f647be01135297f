use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use zip::write::SimpleFileOptions;

/// Unpacks an EPUB container into `out_dir`, preserving the entry tree.
///
/// Entry names are validated through the archive's own sanitizer; anything
/// that would escape `out_dir` is rejected rather than corrected.
pub fn extract_container(container: &Path, out_dir: &Path) -> anyhow::Result<()> {
    let file = fs::File::open(container)
        .with_context(|| format!("open container: {}", container.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("read zip: {}", container.display()))?;

    fs::create_dir_all(out_dir)
        .with_context(|| format!("create extraction dir: {}", out_dir.display()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("read zip entry {index}"))?;
        let Some(rel_path) = entry.enclosed_name() else {
            anyhow::bail!("zip entry escapes the extraction dir: {}", entry.name());
        };
        let out_path = out_dir.join(rel_path);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .with_context(|| format!("create dir: {}", out_path.display()))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let mut out_file = fs::File::create(&out_path)
            .with_context(|| format!("create file: {}", out_path.display()))?;
        std::io::copy(&mut entry, &mut out_file)
            .with_context(|| format!("write file: {}", out_path.display()))?;
    }

    Ok(())
}

/// Packs a directory tree back into an EPUB container.
///
/// Per EPUB spec, `mimetype` MUST be the first entry and MUST be stored
/// (no compression); it is written first whether or not the tree carries
/// one. Every other file keeps its relative path and byte content.
pub fn pack_container(dir: &Path, out_path: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("container source is not a directory: {}", dir.display());
    }
    if let Some(parent) = out_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create container parent dir: {}", parent.display()))?;
    }

    let out_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(out_path)
        .with_context(|| format!("open container output: {}", out_path.display()))?;
    let mut zip = zip::ZipWriter::new(out_file);

    let mimetype_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    zip.start_file("mimetype", mimetype_options)
        .context("container start_file mimetype")?;
    let mimetype = match fs::read(dir.join("mimetype")) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            b"application/epub+zip".to_vec()
        }
        Err(err) => return Err(err).context("read mimetype"),
    };
    zip.write_all(&mimetype).context("container write mimetype")?;

    let deflated_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for path in list_files_recursively_sorted(dir)? {
        let rel = path
            .strip_prefix(dir)
            .with_context(|| format!("strip container prefix: {}", path.display()))?;
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if rel_str == "mimetype" {
            continue;
        }

        let mut f = fs::File::open(&path)
            .with_context(|| format!("open entry: {}", path.display()))?;
        zip.start_file(&rel_str, deflated_options)
            .with_context(|| format!("container start_file: {rel_str}"))?;
        std::io::copy(&mut f, &mut zip)
            .with_context(|| format!("container write entry: {rel_str}"))?;
    }

    zip.finish().context("container finish zip")?;
    Ok(())
}

pub fn list_files_recursively_sorted(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let mut entries = fs::read_dir(&current)
            .with_context(|| format!("read dir: {}", current.display()))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("list dir: {}", current.display()))?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let file_type = entry.file_type().context("read entry type")?;
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("OEBPS/text")).unwrap();
        fs::create_dir_all(root.join("META-INF")).unwrap();
        fs::write(root.join("mimetype"), "application/epub+zip").unwrap();
        fs::write(root.join("META-INF/container.xml"), "<container/>").unwrap();
        fs::write(root.join("OEBPS/text/ch1.xhtml"), "<p>Hello</p>").unwrap();
    }

    #[test]
    fn pack_then_extract_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        build_tree(&tree);

        let container = dir.path().join("book.epub");
        pack_container(&tree, &container).unwrap();

        let out = dir.path().join("out");
        extract_container(&container, &out).unwrap();

        assert_eq!(
            fs::read(out.join("OEBPS/text/ch1.xhtml")).unwrap(),
            b"<p>Hello</p>"
        );
        assert_eq!(
            fs::read(out.join("mimetype")).unwrap(),
            b"application/epub+zip"
        );
    }

    #[test]
    fn mimetype_is_the_first_entry_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        build_tree(&tree);

        let container = dir.path().join("book.epub");
        pack_container(&tree, &container).unwrap();

        let file = fs::File::open(&container).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), zip::CompressionMethod::Stored);
    }

    #[test]
    fn mimetype_is_synthesized_when_the_tree_lacks_one() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("a.txt"), "a").unwrap();

        let container = dir.path().join("book.epub");
        pack_container(&tree, &container).unwrap();

        let file = fs::File::open(&container).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut first = archive.by_index(0).unwrap();
        let mut body = String::new();
        std::io::Read::read_to_string(&mut first, &mut body).unwrap();
        assert_eq!(body, "application/epub+zip");
    }
}
