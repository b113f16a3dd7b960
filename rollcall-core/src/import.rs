use crate::store::{BlobId, BlobStore, RecordStore, StorageError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Cannot read folder {path}: {source}")]
    Folder {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cannot read {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// One imported reference image
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedPerson {
    pub name: String,
    pub image: BlobId,
    pub source: PathBuf,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Import every image in `folder` as a reference person.
///
/// The person name is the file stem. Files are processed in name order.
/// Existing records are not checked, so importing a folder twice creates
/// duplicate people.
pub fn import_folder<P: AsRef<Path>>(
    folder: P,
    blobs: &BlobStore,
    records: &RecordStore,
) -> Result<Vec<ImportedPerson>, ImportError> {
    let folder = folder.as_ref();
    let entries = fs::read_dir(folder).map_err(|source| ImportError::Folder {
        path: folder.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ImportError::Folder {
            path: folder.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && is_image(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut imported = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };

        let data = fs::read(&path).map_err(|source| ImportError::File {
            path: path.clone(),
            source,
        })?;
        let image = blobs.put(&data)?;
        records.insert_person(&name, &image)?;

        log::info!("Imported {} as {} ({})", path.display(), name, image);
        imported.push(ImportedPerson {
            name,
            image,
            source: path,
        });
    }

    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("alice.png")));
        assert!(is_image(Path::new("Bob.JPG")));
        assert!(is_image(Path::new("carol.Jpeg")));
        assert!(!is_image(Path::new("notes.txt")));
        assert!(!is_image(Path::new("png")));
    }

    #[test]
    fn test_import_folder() {
        let dir = TempDir::new().unwrap();
        let faces = dir.path().join("faces");
        fs::create_dir(&faces).unwrap();
        fs::write(faces.join("Bob.JPG"), b"bob bytes").unwrap();
        fs::write(faces.join("Alice.png"), b"alice bytes").unwrap();
        fs::write(faces.join("readme.txt"), b"ignore me").unwrap();
        fs::create_dir(faces.join("nested.png")).unwrap();

        let blobs = BlobStore::new(dir.path().join("blobs"));
        let records = RecordStore::open_in_memory().unwrap();

        let imported = import_folder(&faces, &blobs, &records).unwrap();
        let names: Vec<_> = imported.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);

        let people = records.people().unwrap();
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].name, "Alice");
        let image = people[0].image.as_ref().unwrap();
        assert_eq!(blobs.get(image).unwrap(), b"alice bytes");
    }

    #[test]
    fn test_reimport_duplicates_people() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("alice.jpeg"), b"alice").unwrap();

        let blobs = BlobStore::new(dir.path().join("blobs"));
        let records = RecordStore::open_in_memory().unwrap();

        import_folder(dir.path(), &blobs, &records).unwrap();
        import_folder(dir.path(), &blobs, &records).unwrap();

        assert_eq!(records.people().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_folder() {
        let dir = TempDir::new().unwrap();
        let blobs = BlobStore::new(dir.path().join("blobs"));
        let records = RecordStore::open_in_memory().unwrap();

        let result = import_folder(dir.path().join("nope"), &blobs, &records);
        assert!(matches!(result, Err(ImportError::Folder { .. })));
    }
}
