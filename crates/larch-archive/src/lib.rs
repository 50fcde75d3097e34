//! JAR reading and writing for the deobfuscation pipeline.
//!
//! Class entries and other resources are kept apart so the pipeline can
//! transform the former and pass the latter through untouched. Writing goes
//! through a temporary file in the target directory followed by a rename, so
//! a failed run never leaves a truncated archive behind.

#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// One `.class` entry; `name` is the internal class name without extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Any non-class entry, carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct JarContents {
    pub classes: Vec<ClassEntry>,
    pub resources: Vec<Resource>,
}

/// Reads a JAR, splitting class entries from passthrough resources.
pub fn read_jar(path: &Path) -> anyhow::Result<JarContents> {
    let file = File::open(path)
        .with_context(|| format!("failed to open archive {}", path.display()))?;
    let mut zip = ZipArchive::new(file)
        .with_context(|| format!("failed to read zip {}", path.display()))?;

    let mut contents = JarContents::default();
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .with_context(|| format!("failed to read entry {index} of {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {} from {}", entry_name, path.display()))?;
        match entry_name.strip_suffix(".class") {
            Some(class_name) => contents.classes.push(ClassEntry {
                name: class_name.to_string(),
                bytes,
            }),
            None => contents.resources.push(Resource {
                path: entry_name,
                bytes,
            }),
        }
    }
    Ok(contents)
}

/// Writes a JAR atomically. Entries come out in sorted order so two runs
/// over the same input produce byte-comparable archives.
pub fn write_jar(path: &Path, contents: &JarContents) -> anyhow::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = tempfile::NamedTempFile::new_in(dir.unwrap_or(Path::new(".")))
        .with_context(|| format!("failed to create a temporary file next to {}", path.display()))?;

    {
        let mut zip = ZipWriter::new(&mut tmp);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut classes: Vec<&ClassEntry> = contents.classes.iter().collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        for class in classes {
            let entry_name = format!("{}.class", class.name);
            zip.start_file(&entry_name, options)
                .with_context(|| format!("failed to start entry {entry_name}"))?;
            zip.write_all(&class.bytes)
                .with_context(|| format!("failed to write entry {entry_name}"))?;
        }

        let mut resources: Vec<&Resource> = contents.resources.iter().collect();
        resources.sort_by(|a, b| a.path.cmp(&b.path));
        for resource in resources {
            zip.start_file(&resource.path, options)
                .with_context(|| format!("failed to start entry {}", resource.path))?;
            zip.write_all(&resource.bytes)
                .with_context(|| format!("failed to write entry {}", resource.path))?;
        }
        zip.finish().context("failed to finalize the archive")?;
    }

    tmp.persist(path)
        .with_context(|| format!("failed to move the archive into place at {}", path.display()))?;
    Ok(())
}
