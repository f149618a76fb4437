//! Output directory ownership and array persistence.
//!
//! [`OutputDir::acquire`] is the only place the destination is wiped. Every
//! archive and segment is written through the returned handle.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use ndarray::{ArrayBase, ArrayView1, ArrayView2, Data, Dimension};
use ndarray_npy::WriteNpyExt;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{PrepError, Result};

/// Top-level directories that are never wiped.
const PROTECTED_DIRS: &[&str] = &[
    "/", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/opt", "/proc", "/root",
    "/sbin", "/sys", "/tmp", "/usr", "/var",
];

/// An emptied destination directory owned by one run.
#[derive(Debug)]
pub struct OutputDir {
    path: PathBuf,
}

impl OutputDir {
    /// Reset `path` to an empty directory.
    ///
    /// Refuses protected locations (system directories, the home directory,
    /// the working directory or any of its parents), any path that contains
    /// `input_dir`, and an existing non-empty directory unless `confirm` is
    /// set.
    pub fn acquire(path: &Path, input_dir: &Path, confirm: bool) -> Result<Self> {
        let resolved = resolve(path)?;
        guard_protected(&lexical_absolute(path)?, &resolved)?;

        let input = resolve(input_dir)?;
        if input.starts_with(&resolved) {
            return Err(PrepError::OutputContainsInput {
                output: resolved,
                input,
            });
        }

        if resolved.exists() {
            if !resolved.is_dir() {
                return Err(PrepError::InvalidConfig(format!(
                    "output path {} is not a directory",
                    resolved.display()
                )));
            }
            let mut entries =
                std::fs::read_dir(&resolved).map_err(|e| PrepError::io(&resolved, e))?;
            if entries.next().is_some() {
                if !confirm {
                    return Err(PrepError::OutputNotEmpty(resolved));
                }
                warn!("wiping existing contents of {}", resolved.display());
            }
            std::fs::remove_dir_all(&resolved).map_err(|e| PrepError::io(&resolved, e))?;
        }
        std::fs::create_dir_all(&resolved).map_err(|e| PrepError::io(&resolved, e))?;

        Ok(Self { path: resolved })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<speaker>_<batch>.npz`
    pub fn archive_path(&self, batch_name: &str) -> PathBuf {
        self.path.join(format!("{batch_name}.npz"))
    }

    /// `<speaker>_<batch>_<start>.npy`
    pub fn segment_path(&self, batch_name: &str, start: usize) -> PathBuf {
        self.path.join(format!("{batch_name}_{start}.npy"))
    }

    /// Write the batch archive holding the full `f0` and `coded_sp` arrays.
    pub fn write_archive(
        &self,
        batch_name: &str,
        f0: ArrayView1<'_, f64>,
        coded_sp: ArrayView2<'_, f64>,
    ) -> Result<PathBuf> {
        let path = self.archive_path(batch_name);
        let members = [
            ("f0.npy", npy_bytes(&f0, &path)?),
            ("coded_sp.npy", npy_bytes(&coded_sp, &path)?),
        ];

        let file = File::create(&path).map_err(|e| PrepError::io(&path, e))?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        // Fixed timestamps keep archives byte-identical across runs.
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(DateTime::default());
        let zip_err = |source| PrepError::Zip {
            path: path.clone(),
            source,
        };
        for (name, bytes) in members {
            zip.start_file(name, options).map_err(zip_err)?;
            zip.write_all(&bytes).map_err(|e| PrepError::io(&path, e))?;
        }
        let mut inner = zip.finish().map_err(zip_err)?;
        inner.flush().map_err(|e| PrepError::io(&path, e))?;

        info!("[save]: {}", path.display());
        Ok(path)
    }

    /// Write one `D x FRAMES` segment.
    pub fn write_segment(
        &self,
        batch_name: &str,
        start: usize,
        data: ArrayView2<'_, f64>,
    ) -> Result<PathBuf> {
        let path = self.segment_path(batch_name, start);
        let bytes = npy_bytes(&data, &path)?;
        std::fs::write(&path, bytes).map_err(|e| PrepError::io(&path, e))?;
        info!("[save]: {}", path.display());
        Ok(path)
    }
}

/// Encode `arr` as `.npy` bytes in C order.
fn npy_bytes<S, D>(arr: &ArrayBase<S, D>, path: &Path) -> Result<Vec<u8>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let mut buf = Vec::new();
    arr.as_standard_layout()
        .write_npy(&mut buf)
        .map_err(|source| PrepError::Npy {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(buf)
}

/// Absolute form of `path` with `.` and `..` folded lexically.
fn lexical_absolute(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| PrepError::io(path, e))?;
    let mut normal = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                normal.pop();
            }
            Component::CurDir => {}
            other => normal.push(other),
        }
    }
    Ok(normal)
}

/// Absolute, symlink-free form of `path`, which need not exist yet.
pub fn resolve(path: &Path) -> Result<PathBuf> {
    let lexical = lexical_absolute(path)?;

    // Canonicalise the deepest existing ancestor, then re-append the rest.
    let mut existing = lexical.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_owned());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = existing
        .canonicalize()
        .map_err(|e| PrepError::io(existing, e))?;
    for name in tail.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Whether `path` names a protected directory, either literally or through
/// the directory's canonical form (`/bin` -> `/usr/bin`, `/tmp` ->
/// `/private/tmp`).
fn is_protected_dir(path: &Path) -> bool {
    path.parent().is_none()
        || PROTECTED_DIRS.iter().any(|dir| {
            let dir = Path::new(dir);
            path == dir || dir.canonicalize().is_ok_and(|canonical| path == canonical)
        })
}

/// Both the spelled-out and the symlink-resolved forms of the target must
/// pass.
fn guard_protected(lexical: &Path, resolved: &Path) -> Result<()> {
    let protected = || Err(PrepError::ProtectedPath(resolved.to_path_buf()));

    if is_protected_dir(lexical) || is_protected_dir(resolved) {
        return protected();
    }
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        let canonical = home.canonicalize().unwrap_or_else(|_| home.clone());
        if lexical == home || resolved == canonical {
            return protected();
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        let canonical = cwd.canonicalize().unwrap_or_else(|_| cwd.clone());
        if cwd.starts_with(lexical) || canonical.starts_with(resolved) {
            return protected();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array2};

    #[test]
    fn refuses_protected_paths() {
        let input = tempfile::tempdir().unwrap();
        for p in ["/", "/etc", "/usr", "/tmp"] {
            let err = OutputDir::acquire(Path::new(p), input.path(), true).unwrap_err();
            assert!(matches!(err, PrepError::ProtectedPath(_)), "{p}: {err}");
        }
        let cwd = std::env::current_dir().unwrap();
        let err = OutputDir::acquire(&cwd, input.path(), true).unwrap_err();
        assert!(matches!(err, PrepError::ProtectedPath(_)));
        let parent = cwd.join("..");
        assert!(OutputDir::acquire(&parent, input.path(), true).is_err());
    }

    #[test]
    fn refuses_protected_paths_through_symlinks() {
        let input = tempfile::tempdir().unwrap();
        // Merged-/usr systems link these into /usr; either way they stay off limits.
        for p in ["/bin", "/lib", "/sbin"] {
            if Path::new(p).exists() {
                let err = OutputDir::acquire(Path::new(p), input.path(), false).unwrap_err();
                assert!(matches!(err, PrepError::ProtectedPath(_)), "{p}: {err}");
            }
        }

        #[cfg(unix)]
        {
            let root = tempfile::tempdir().unwrap();
            let link = root.path().join("usr_link");
            std::os::unix::fs::symlink("/usr", &link).unwrap();
            let err = OutputDir::acquire(&link, input.path(), false).unwrap_err();
            assert!(matches!(err, PrepError::ProtectedPath(_)), "{err}");
            assert!(Path::new("/usr").is_dir());
        }
    }

    #[test]
    fn resolves_parent_components_of_missing_paths() {
        let root = tempfile::tempdir().unwrap();
        let resolved = resolve(&root.path().join("x/./y/../../z")).unwrap();
        assert_eq!(resolved, root.path().canonicalize().unwrap().join("z"));
    }

    #[test]
    fn refuses_to_wipe_input() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("speakers");
        std::fs::create_dir_all(&input).unwrap();
        let err = OutputDir::acquire(root.path(), &input, true).unwrap_err();
        assert!(matches!(err, PrepError::OutputContainsInput { .. }));
        let err = OutputDir::acquire(&input, &input, true).unwrap_err();
        assert!(matches!(err, PrepError::OutputContainsInput { .. }));
    }

    #[test]
    fn non_empty_output_needs_confirmation() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        let out = root.path().join("out");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("stale.npy"), b"old").unwrap();

        let err = OutputDir::acquire(&out, &input, false).unwrap_err();
        assert!(matches!(err, PrepError::OutputNotEmpty(_)));
        assert!(out.join("stale.npy").exists());

        let dir = OutputDir::acquire(&out, &input, true).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn creates_missing_nested_output() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("a/b/../c");
        let dir = OutputDir::acquire(&out, root.path().join("in").as_path(), false).unwrap();
        assert!(dir.path().ends_with("a/c"));
        assert!(dir.path().is_dir());
    }

    #[test]
    fn writes_named_npy_and_npz() {
        let root = tempfile::tempdir().unwrap();
        let dir = OutputDir::acquire(&root.path().join("out"), &root.path().join("in"), false)
            .unwrap();

        let f0 = arr1(&[0.0, 120.0, 121.5]);
        let coded = Array2::from_shape_fn((4, 3), |(d, t)| (d * 3 + t) as f64);

        let archive = dir.write_archive("A_0", f0.view(), coded.view()).unwrap();
        assert!(archive.ends_with("A_0.npz"));
        let mut npz = ndarray_npy::NpzReader::new(File::open(&archive).unwrap()).unwrap();
        let read_f0: ndarray::Array1<f64> = npz.by_name("f0.npy").unwrap();
        let read_sp: Array2<f64> = npz.by_name("coded_sp.npy").unwrap();
        assert_eq!(read_f0, f0);
        assert_eq!(read_sp, coded);

        let seg = dir
            .write_segment("A_0", 512, coded.slice(ndarray::s![.., 1..3]))
            .unwrap();
        assert!(seg.ends_with("A_0_512.npy"));
        let read: Array2<f64> = ndarray_npy::read_npy(&seg).unwrap();
        assert_eq!(read, coded.slice(ndarray::s![.., 1..3]));
    }
}
