//! Per-cell lock flags.
//!
//! Locks are user state: they survive session restarts and are only cleared
//! explicitly. Flags are `AtomicBool`s written with `Release` and read with
//! `Acquire`, so a lock taken before a recommendation pull is always seen by it.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ValidationError;
use crate::table::{CellIndex, Selection};

#[derive(Debug)]
pub struct LockMask {
    rows: usize,
    cols: usize,
    flags: Vec<AtomicBool>,
}

impl LockMask {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            flags: (0..rows * cols).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    fn flag(&self, cell: CellIndex) -> Result<&AtomicBool, ValidationError> {
        if cell.row >= self.rows || cell.col >= self.cols {
            return Err(ValidationError::CellOutOfBounds {
                row: cell.row,
                col: cell.col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(&self.flags[cell.row * self.cols + cell.col])
    }

    pub fn lock(&self, cell: CellIndex) -> Result<(), ValidationError> {
        self.flag(cell)?.store(true, Ordering::Release);
        Ok(())
    }

    pub fn unlock(&self, cell: CellIndex) -> Result<(), ValidationError> {
        self.flag(cell)?.store(false, Ordering::Release);
        Ok(())
    }

    /// Out-of-bounds cells read as unlocked.
    pub fn is_locked(&self, cell: CellIndex) -> bool {
        self.flag(cell).is_ok_and(|f| f.load(Ordering::Acquire))
    }

    pub fn any_locked(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::Acquire))
    }

    pub fn locked_cells(&self) -> Vec<CellIndex> {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, f)| f.load(Ordering::Acquire))
            .map(|(i, _)| CellIndex::new(i / self.cols, i % self.cols))
            .collect()
    }

    /// Row-major copy of the flags.
    pub fn snapshot(&self) -> Vec<bool> {
        self.flags.iter().map(|f| f.load(Ordering::Acquire)).collect()
    }

    /// First locked cell in `selection`, as an error.
    pub fn ensure_unlocked(&self, selection: &Selection) -> Result<(), ValidationError> {
        match selection.iter().find(|c| self.is_locked(*c)) {
            Some(c) => Err(ValidationError::LockedCell {
                row: c.row,
                col: c.col,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_unlock_roundtrip() {
        let m = LockMask::new(2, 3);
        assert!(!m.any_locked());
        m.lock(CellIndex::new(1, 2)).unwrap();
        assert!(m.is_locked(CellIndex::new(1, 2)));
        assert_eq!(m.locked_cells(), vec![CellIndex::new(1, 2)]);
        m.unlock(CellIndex::new(1, 2)).unwrap();
        assert!(!m.any_locked());
    }

    #[test]
    fn out_of_bounds() {
        let m = LockMask::new(2, 2);
        assert!(m.lock(CellIndex::new(2, 0)).is_err());
        assert!(!m.is_locked(CellIndex::new(9, 9)));
    }

    #[test]
    fn ensure_unlocked_names_the_cell() {
        let m = LockMask::new(2, 2);
        m.lock(CellIndex::new(0, 1)).unwrap();
        assert_eq!(
            m.ensure_unlocked(&Selection::all(2, 2)),
            Err(ValidationError::LockedCell { row: 0, col: 1 })
        );
        assert_eq!(m.ensure_unlocked(&Selection::new([(1, 1)])), Ok(()));
    }
}
