//! Scoped replacement of compiled class files.
//!
//! The live artifact is moved aside to `<name>.class.orig` before a mutant is
//! installed and moved back on restore. A content hash taken at backup time
//! confirms the restored file is the original.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const BACKUP_SUFFIX: &str = "orig";

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("artifact swap failed for {path:?}: {source}")]
    ArtifactSwapFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn swap_failed(path: &Path) -> impl FnOnce(io::Error) -> SwapError + '_ {
    move |source| SwapError::ArtifactSwapFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Live path of a class inside the compiled-classes directory.
pub fn class_file_path(class_files: &Path, class_name: &str) -> PathBuf {
    class_files.join(format!("{}.class", class_name.replace('.', "/")))
}

fn backup_path(live: &Path) -> PathBuf {
    let mut name = live.as_os_str().to_owned();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

fn compute_hash(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug)]
struct Swapped {
    live: PathBuf,
    backup: PathBuf,
    hash: String,
}

/// At most one class is swapped at a time. Dropping the swap restores it.
#[derive(Debug)]
pub struct ArtifactSwap {
    class_files: PathBuf,
    active: Option<(String, Swapped)>,
}

impl ArtifactSwap {
    pub fn new(class_files: impl Into<PathBuf>) -> Self {
        Self {
            class_files: class_files.into(),
            active: None,
        }
    }

    pub fn active_class(&self) -> Option<&str> {
        self.active.as_ref().map(|(class, _)| class.as_str())
    }

    /// Install `artifact` as the live class file of `class_name`.
    ///
    /// The original is backed up the first time a class is swapped; switching
    /// to another class restores the previous one first.
    pub fn swap_in(&mut self, class_name: &str, artifact: &Path) -> Result<(), SwapError> {
        if self.active_class() != Some(class_name) {
            self.restore()?;
            self.back_up(class_name)?;
        }

        let live = match &self.active {
            Some((_, swapped)) => swapped.live.clone(),
            None => class_file_path(&self.class_files, class_name),
        };
        fs::copy(artifact, &live).map_err(swap_failed(artifact))?;
        tracing::debug!("Installed {:?} as {:?}", artifact, live);
        Ok(())
    }

    fn back_up(&mut self, class_name: &str) -> Result<(), SwapError> {
        let live = class_file_path(&self.class_files, class_name);
        let backup = backup_path(&live);

        if backup.exists() {
            tracing::warn!(
                "Found stale backup {:?} from an interrupted run, restoring it",
                backup
            );
            fs::rename(&backup, &live).map_err(swap_failed(&backup))?;
        }

        let hash = compute_hash(&live).map_err(swap_failed(&live))?;
        fs::rename(&live, &backup).map_err(swap_failed(&live))?;
        self.active = Some((class_name.to_string(), Swapped { live, backup, hash }));
        Ok(())
    }

    /// Put the original class file back. A no-op when nothing is swapped.
    pub fn restore(&mut self) -> Result<(), SwapError> {
        let Some((class, swapped)) = self.active.take() else {
            return Ok(());
        };

        if let Err(e) = fs::rename(&swapped.backup, &swapped.live) {
            let err = swap_failed(&swapped.backup)(e);
            // keep the record so a later restore can retry
            self.active = Some((class, swapped));
            return Err(err);
        }

        let hash = compute_hash(&swapped.live).map_err(swap_failed(&swapped.live))?;
        if hash != swapped.hash {
            return Err(SwapError::ArtifactSwapFailed {
                path: swapped.live,
                source: io::Error::new(io::ErrorKind::InvalidData, "restored content hash differs"),
            });
        }
        tracing::debug!("Restored original class file for {}", class);
        Ok(())
    }
}

impl Drop for ArtifactSwap {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!("CRITICAL: failed to restore original class file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        classes: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let classes = dir.path().join("classes");
        fs::create_dir_all(classes.join("bank")).unwrap();
        fs::write(classes.join("bank/Bank.class"), b"ORIGINAL-BANK").unwrap();
        fs::write(classes.join("bank/Customer.class"), b"ORIGINAL-CUSTOMER").unwrap();

        let mutants = dir.path().join("mutants");
        fs::create_dir_all(&mutants).unwrap();
        fs::write(mutants.join("Bank1.class"), b"MUTANT-BANK-1").unwrap();
        fs::write(mutants.join("Bank2.class"), b"MUTANT-BANK-2").unwrap();
        fs::write(mutants.join("Customer1.class"), b"MUTANT-CUSTOMER-1").unwrap();
        Fixture { dir, classes }
    }

    impl Fixture {
        fn mutant(&self, name: &str) -> PathBuf {
            self.dir.path().join("mutants").join(name)
        }

        fn read(&self, class: &str) -> Vec<u8> {
            fs::read(class_file_path(&self.classes, class)).unwrap()
        }
    }

    #[test]
    fn test_class_file_path() {
        assert_eq!(
            class_file_path(Path::new("/c"), "bank.Bank"),
            PathBuf::from("/c/bank/Bank.class")
        );
    }

    #[test]
    fn test_swap_and_restore() {
        let fx = fixture();
        let mut swap = ArtifactSwap::new(&fx.classes);

        swap.swap_in("bank.Bank", &fx.mutant("Bank1.class")).unwrap();
        assert_eq!(fx.read("bank.Bank"), b"MUTANT-BANK-1");
        assert!(fx.classes.join("bank/Bank.class.orig").exists());

        swap.swap_in("bank.Bank", &fx.mutant("Bank2.class")).unwrap();
        assert_eq!(fx.read("bank.Bank"), b"MUTANT-BANK-2");

        swap.restore().unwrap();
        assert_eq!(fx.read("bank.Bank"), b"ORIGINAL-BANK");
        assert!(!fx.classes.join("bank/Bank.class.orig").exists());
        assert_eq!(swap.active_class(), None);
    }

    #[test]
    fn test_switching_class_restores_previous() {
        let fx = fixture();
        let mut swap = ArtifactSwap::new(&fx.classes);

        swap.swap_in("bank.Bank", &fx.mutant("Bank1.class")).unwrap();
        swap.swap_in("bank.Customer", &fx.mutant("Customer1.class")).unwrap();

        assert_eq!(fx.read("bank.Bank"), b"ORIGINAL-BANK");
        assert_eq!(fx.read("bank.Customer"), b"MUTANT-CUSTOMER-1");
        assert_eq!(swap.active_class(), Some("bank.Customer"));
    }

    #[test]
    fn test_drop_restores() {
        let fx = fixture();
        {
            let mut swap = ArtifactSwap::new(&fx.classes);
            swap.swap_in("bank.Bank", &fx.mutant("Bank1.class")).unwrap();
        }
        assert_eq!(fx.read("bank.Bank"), b"ORIGINAL-BANK");
    }

    #[test]
    fn test_stale_backup_is_recovered() {
        let fx = fixture();
        // An interrupted run left the mutant live and the original aside.
        let live = class_file_path(&fx.classes, "bank.Bank");
        fs::rename(&live, backup_path(&live)).unwrap();
        fs::write(&live, b"MUTANT-LEFT-BEHIND").unwrap();

        let mut swap = ArtifactSwap::new(&fx.classes);
        swap.swap_in("bank.Bank", &fx.mutant("Bank1.class")).unwrap();
        swap.restore().unwrap();
        assert_eq!(fx.read("bank.Bank"), b"ORIGINAL-BANK");
    }

    #[test]
    fn test_missing_artifact_fails_and_drop_restores() {
        let fx = fixture();
        {
            let mut swap = ArtifactSwap::new(&fx.classes);
            let err = swap
                .swap_in("bank.Bank", &fx.mutant("Missing.class"))
                .unwrap_err();
            assert!(matches!(err, SwapError::ArtifactSwapFailed { .. }));
        }
        assert_eq!(fx.read("bank.Bank"), b"ORIGINAL-BANK");
    }

    #[test]
    fn test_missing_live_class_fails() {
        let fx = fixture();
        let mut swap = ArtifactSwap::new(&fx.classes);
        let err = swap
            .swap_in("bank.Unknown", &fx.mutant("Bank1.class"))
            .unwrap_err();
        assert!(matches!(err, SwapError::ArtifactSwapFailed { .. }));
        assert_eq!(swap.active_class(), None);
    }
}
