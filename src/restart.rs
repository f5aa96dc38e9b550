//! Checkpointing of the curve population.
//!
//! Each rank writes one file per time slice holding a small header followed by its
//! curves. A missing or unreadable file is never fatal: callers fall back to a cold start.
use crate::curve::IntegralCurve;
use crate::types::{FatalError, Rank, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const MAGIC: [u8; 4] = *b"PCRS";
const VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u32,
    rank: u64,
    time_step: i32,
    count: u64,
}

/// Rank-local store of restart files
#[derive(Debug, Clone)]
pub struct RestartStore {
    directory: PathBuf,
    rank: Rank,
}

impl RestartStore {
    /// Create a store writing into `directory`
    pub fn new(directory: impl Into<PathBuf>, rank: Rank) -> Self {
        Self {
            directory: directory.into(),
            rank,
        }
    }

    /// The file holding the curves of this rank for a time slice
    pub fn path(&self, time_step: i32) -> PathBuf {
        self.directory
            .join(format!("ics_rank{:05}_ts{time_step}.bin", self.rank))
    }

    /// Save the curves of this rank for a time slice, replacing any earlier save
    pub fn save_ics(&self, curves: &[IntegralCurve], time_step: i32) -> Result<()> {
        fs::create_dir_all(&self.directory)?;
        let path = self.path(time_step);
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            let header = Header {
                magic: MAGIC,
                version: VERSION,
                rank: self.rank as u64,
                time_step,
                count: curves.len() as u64,
            };
            bincode::serialize_into(&mut writer, &header)?;
            bincode::serialize_into(&mut writer, curves)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(
            "Rank {} saved {} curves for time slice {time_step}",
            self.rank,
            curves.len()
        );
        Ok(())
    }

    /// Whether a valid restart file exists for a time slice
    pub fn check_if_restart(&self, time_step: i32) -> bool {
        let path = self.path(time_step);
        if !path.exists() {
            return false;
        }
        match self.read(&path, time_step) {
            Ok(_) => true,
            Err(e) => {
                warn!("Ignoring restart file {}: {e}", path.display());
                false
            }
        }
    }

    /// Restore the curves saved for a time slice
    pub fn restore_ics(&self, time_step: i32) -> Result<Vec<IntegralCurve>> {
        let curves = self.read(&self.path(time_step), time_step)?;
        debug!(
            "Rank {} restored {} curves for time slice {time_step}",
            self.rank,
            curves.len()
        );
        Ok(curves)
    }

    fn read(&self, path: &Path, time_step: i32) -> Result<Vec<IntegralCurve>> {
        let mut reader = BufReader::new(File::open(path)?);
        let header: Header = bincode::deserialize_from(&mut reader)
            .map_err(|e| FatalError::CorruptRestart(format!("unreadable header: {e}")))?;
        if header.magic != MAGIC {
            return Err(FatalError::CorruptRestart(String::from(
                "not a restart file",
            )));
        }
        if header.version != VERSION {
            return Err(FatalError::CorruptRestart(format!(
                "format version {} is not supported",
                header.version
            )));
        }
        if header.rank != self.rank as u64 || header.time_step != time_step {
            return Err(FatalError::CorruptRestart(format!(
                "file of rank {} for time slice {}",
                header.rank, header.time_step
            )));
        }
        let curves: Vec<IntegralCurve> = bincode::deserialize_from(&mut reader)
            .map_err(|e| FatalError::CorruptRestart(format!("unreadable curves: {e}")))?;
        if curves.len() as u64 != header.count {
            return Err(FatalError::CorruptRestart(format!(
                "expected {} curves, found {}",
                header.count,
                curves.len()
            )));
        }
        Ok(curves)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::curve::{Seed, Status};
    use crate::domain::DomainType;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "parcurve_restart_{name}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_save_restore() {
        let dir = scratch_dir("save_restore");
        let store = RestartStore::new(&dir, 1);
        let mut curve =
            IntegralCurve::from_seed(42, &Seed::new([1.0, 2.0, 3.0], 0.5), vec![], 1);
        curve.assign_domain(DomainType::new(3, 5));
        curve.steps_taken = 17;
        curve.trajectory = vec![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0]];
        assert_eq!(curve.status, Status::Ok);

        assert!(!store.check_if_restart(5));
        store.save_ics(&[curve.clone()], 5).unwrap();
        assert!(store.check_if_restart(5));
        assert!(!store.check_if_restart(6));
        assert_eq!(store.restore_ics(5).unwrap(), vec![curve]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_other_rank_is_rejected() {
        let dir = scratch_dir("other_rank");
        RestartStore::new(&dir, 0).save_ics(&[], 2).unwrap();
        let store = RestartStore::new(&dir, 3);
        fs::copy(
            RestartStore::new(&dir, 0).path(2),
            store.path(2),
        )
        .unwrap();
        assert!(!store.check_if_restart(2));
        assert!(matches!(
            store.restore_ics(2),
            Err(FatalError::CorruptRestart(_))
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let dir = scratch_dir("corrupt");
        let store = RestartStore::new(&dir, 0);
        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path(1), b"definitely not curves").unwrap();
        assert!(!store.check_if_restart(1));
        assert!(store.restore_ics(1).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
