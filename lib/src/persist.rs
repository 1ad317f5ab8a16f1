//! Assembled cube on disk
//!
//! The cube is written through a writable memory map of
//! `mmw_array.bin.partial` inside the capture directory and renamed to
//! `mmw_array.bin` once it is complete. A JSON sidecar records the shape and
//! the configuration it was built from, so a later run can decide whether
//! the cached cube is still valid.
use memmap2::{Mmap, MmapMut};
use ndarray::{ArrayView6, ArrayViewMut6};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::MmwConfig;
use crate::errors::PersistenceError;

// The cube file is little-endian int16 and is viewed in place.
#[cfg(target_endian = "big")]
compile_error!("cube files can only be mapped on little-endian targets");

pub const CUBE_FILE: &str = "mmw_array.bin";
pub const SIDECAR_FILE: &str = "mmw_array.json";
const PARTIAL_SUFFIX: &str = "partial";

/// Element type tag stored in the sidecar (numpy notation)
pub const CUBE_DTYPE: &str = "<i2";

/// Metadata stored next to the cube
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeSidecar {
    pub shape: Vec<usize>,
    pub dtype: String,
    /// Rows left zero-filled over all devices when the cube was built
    pub zero_filled_rows: usize,
    pub config: MmwConfig,
}

fn byte_len(shape: &[usize]) -> usize {
    shape.iter().product::<usize>() * std::mem::size_of::<i16>()
}

fn as_words(bytes: &[u8]) -> Result<&[i16], PersistenceError> {
    // SAFETY: every bit pattern is a valid i16; alignment is checked below.
    let (head, words, tail) = unsafe { bytes.align_to::<i16>() };
    if !head.is_empty() || !tail.is_empty() {
        return Err(PersistenceError::Layout(format!(
            "{} byte mapping is not 2-byte aligned",
            bytes.len()
        )));
    }
    Ok(words)
}

fn as_words_mut(bytes: &mut [u8]) -> Result<&mut [i16], PersistenceError> {
    let len = bytes.len();
    // SAFETY: every bit pattern is a valid i16; alignment is checked below.
    let (head, words, tail) = unsafe { bytes.align_to_mut::<i16>() };
    if !head.is_empty() || !tail.is_empty() {
        return Err(PersistenceError::Layout(format!(
            "{len} byte mapping is not 2-byte aligned"
        )));
    }
    Ok(words)
}

/// A cube being written. Removed from disk on drop unless committed.
pub struct CubeFile {
    dir: PathBuf,
    partial: PathBuf,
    shape: [usize; 6],
    mmap: MmapMut,
    committed: bool,
}

impl CubeFile {
    /// Create a zero-filled cube file of the given shape in `dir`.
    ///
    /// Any stale sidecar is removed first, so an interrupted run never leaves
    /// a sidecar describing a cube that doesn't exist.
    pub fn create(dir: &Path, shape: [usize; 6]) -> Result<Self, PersistenceError> {
        let partial = dir.join(format!("{CUBE_FILE}.{PARTIAL_SUFFIX}"));
        let sidecar = dir.join(SIDECAR_FILE);
        if sidecar.exists() {
            fs::remove_file(&sidecar)?;
        }

        let len = byte_len(&shape);
        if len == 0 {
            return Err(PersistenceError::Layout(format!("empty cube shape {shape:?}")));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&partial)?;
        file.set_len(len as u64)?;
        // SAFETY: the partial file is private to this run until renamed.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        log::debug!(
            "Allocated cube {:?} ({} MiB) at {}",
            shape,
            len / (1 << 20),
            partial.display()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            partial,
            shape,
            mmap,
            committed: false,
        })
    }

    /// Writable view of the whole cube
    pub fn view_mut(&mut self) -> Result<ArrayViewMut6<'_, i16>, PersistenceError> {
        let shape = self.shape;
        let words = as_words_mut(&mut self.mmap)?;
        let len = words.len();
        ArrayViewMut6::from_shape(shape, words).map_err(|_| PersistenceError::ShapeMismatch {
            expected: shape.to_vec(),
            found: vec![len],
        })
    }

    /// Flush the cube, rename it into place and write its sidecar.
    ///
    /// Returns the path of the finished cube file.
    pub fn commit(
        mut self,
        config: &MmwConfig,
        zero_filled_rows: usize,
    ) -> Result<PathBuf, PersistenceError> {
        self.mmap.flush()?;

        let target = self.dir.join(CUBE_FILE);
        fs::rename(&self.partial, &target)?;
        self.committed = true;

        let sidecar = CubeSidecar {
            shape: self.shape.to_vec(),
            dtype: CUBE_DTYPE.to_string(),
            zero_filled_rows,
            config: config.clone(),
        };
        let mut writer = BufWriter::new(File::create(self.dir.join(SIDECAR_FILE))?);
        serde_json::to_writer_pretty(&mut writer, &sidecar)?;
        writer.flush()?;

        log::info!("Wrote assembled cube to {}", target.display());
        Ok(target)
    }
}

impl Drop for CubeFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.partial) {
            log::warn!("Couldn't remove {}: {}", self.partial.display(), e);
        } else {
            log::debug!("Removed unfinished cube {}", self.partial.display());
        }
    }
}

/// A finished cube, mapped read-only
pub struct AssembledCube {
    shape: [usize; 6],
    sidecar: CubeSidecar,
    mmap: Mmap,
}

impl AssembledCube {
    pub fn shape(&self) -> [usize; 6] {
        self.shape
    }

    pub fn sidecar(&self) -> &CubeSidecar {
        &self.sidecar
    }

    pub fn view(&self) -> Result<ArrayView6<'_, i16>, PersistenceError> {
        let words = as_words(&self.mmap)?;
        ArrayView6::from_shape(self.shape, words).map_err(|_| PersistenceError::ShapeMismatch {
            expected: self.shape.to_vec(),
            found: vec![words.len()],
        })
    }
}

/// Read the sidecar of the cube in `dir`, if there is one.
pub fn read_sidecar(dir: &Path) -> Result<Option<CubeSidecar>, PersistenceError> {
    let path = dir.join(SIDECAR_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(&path)?;
    Ok(Some(serde_json::from_reader(BufReader::new(file))?))
}

/// Map the cached cube in `dir` if it matches `expected_shape`.
///
/// Returns `None` when there is no cube, when the sidecar describes another
/// shape or when the file length doesn't match; the caller rebuilds then.
pub fn load_cached_cube(
    dir: &Path,
    expected_shape: [usize; 6],
) -> Result<Option<AssembledCube>, PersistenceError> {
    let path = dir.join(CUBE_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let Some(sidecar) = read_sidecar(dir)? else {
        log::info!("{} has no sidecar, ignoring it", path.display());
        return Ok(None);
    };

    if sidecar.shape != expected_shape || sidecar.dtype != CUBE_DTYPE {
        log::info!(
            "Cached cube has shape {:?} ({}), configuration needs {:?}",
            sidecar.shape,
            sidecar.dtype,
            expected_shape
        );
        return Ok(None);
    }

    let file = File::open(&path)?;
    let len = file.metadata()?.len() as usize;
    if len != byte_len(&expected_shape) {
        log::warn!(
            "Cached cube {} is {} bytes, expected {}",
            path.display(),
            len,
            byte_len(&expected_shape)
        );
        return Ok(None);
    }

    // SAFETY: the cube is only rewritten through a fresh partial file and rename.
    let mmap = unsafe { Mmap::map(&file)? };
    log::debug!("Mapped cached cube {}", path.display());

    Ok(Some(AssembledCube {
        shape: expected_shape,
        sidecar,
        mmap,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;
    use tempfile::TempDir;

    const SHAPE: [usize; 6] = [16, 12, 2, 3, 4, 2];

    #[test]
    fn test_commit_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut cube = CubeFile::create(dir.path(), SHAPE).unwrap();
        {
            let mut view = cube.view_mut().unwrap();
            assert_eq!(view.shape(), &SHAPE);
            assert!(view.iter().all(|&v| v == 0));
            view.slice_mut(s![5, 1, 1, 2, .., 0]).fill(-7);
        }
        cube.commit(&MmwConfig::default(), 3).unwrap();

        assert!(dir.path().join(CUBE_FILE).exists());
        assert!(!dir.path().join("mmw_array.bin.partial").exists());

        let loaded = load_cached_cube(dir.path(), SHAPE).unwrap().unwrap();
        assert_eq!(loaded.shape(), SHAPE);
        assert_eq!(loaded.sidecar().zero_filled_rows, 3);
        assert_eq!(loaded.sidecar().config, MmwConfig::default());
        let view = loaded.view().unwrap();
        assert_eq!(view[[5, 1, 1, 2, 3, 0]], -7);
        assert_eq!(view[[5, 1, 1, 2, 3, 1]], 0);
        assert_eq!(view.iter().filter(|&&v| v != 0).count(), 4);
    }

    #[test]
    fn test_uncommitted_cube_is_removed() {
        let dir = TempDir::new().unwrap();
        {
            let _cube = CubeFile::create(dir.path(), SHAPE).unwrap();
            assert!(dir.path().join("mmw_array.bin.partial").exists());
        }
        assert!(!dir.path().join("mmw_array.bin.partial").exists());
        assert!(!dir.path().join(CUBE_FILE).exists());
        assert!(load_cached_cube(dir.path(), SHAPE).unwrap().is_none());
    }

    #[test]
    fn test_shape_change_invalidates_cache() {
        let dir = TempDir::new().unwrap();
        CubeFile::create(dir.path(), SHAPE)
            .unwrap()
            .commit(&MmwConfig::default(), 0)
            .unwrap();

        let mut other = SHAPE;
        other[2] = 5;
        assert!(load_cached_cube(dir.path(), other).unwrap().is_none());
        assert!(load_cached_cube(dir.path(), SHAPE).unwrap().is_some());
    }

    #[test]
    fn test_truncated_cube_is_ignored() {
        let dir = TempDir::new().unwrap();
        CubeFile::create(dir.path(), SHAPE)
            .unwrap()
            .commit(&MmwConfig::default(), 0)
            .unwrap();
        let file = OpenOptions::new()
            .write(true)
            .open(dir.path().join(CUBE_FILE))
            .unwrap();
        file.set_len(10).unwrap();
        assert!(load_cached_cube(dir.path(), SHAPE).unwrap().is_none());
    }

    #[test]
    fn test_create_removes_stale_sidecar() {
        let dir = TempDir::new().unwrap();
        CubeFile::create(dir.path(), SHAPE)
            .unwrap()
            .commit(&MmwConfig::default(), 0)
            .unwrap();
        assert!(read_sidecar(dir.path()).unwrap().is_some());

        let _cube = CubeFile::create(dir.path(), SHAPE).unwrap();
        assert!(read_sidecar(dir.path()).unwrap().is_none());
    }
}
