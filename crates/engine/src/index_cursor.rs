//! The index cursor: legacy B-tree cursor semantics over a KV cursor.

use crate::error::{Error, Result};
use quill_kv::{Cursor, Database, FromView, Transaction};
use quill_types::{DiskLoc, IndexKey};

/// Traversal direction, fixed at cursor creation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Reverse,
}

/// A cursor over one index, tracking end-of-scan state and supporting
/// detach/reattach around yields.
///
/// [`IndexCursor::save_position`] materializes the current key and
/// locator and drops the underlying KV cursor;
/// [`IndexCursor::restore_position`] opens a fresh one and reconciles
/// against whatever changed in between under the same transaction.
pub struct IndexCursor<'t, T: Transaction> {
    txn: &'t T,
    db: Database,
    direction: Direction,
    dups: bool,
    cursor: Option<Cursor<'t, T::Mode>>,
    eof: bool,
    saved: Option<(IndexKey, DiskLoc)>,
}

impl<T: Transaction> std::fmt::Debug for IndexCursor<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCursor")
            .field("direction", &self.direction)
            .field("eof", &self.eof)
            .field("saved", &self.saved)
            .finish_non_exhaustive()
    }
}

impl<'t, T: Transaction> IndexCursor<'t, T> {
    pub(crate) fn new(
        txn: &'t T,
        db: Database,
        direction: Direction,
        dups: bool,
    ) -> Result<Self> {
        let cursor = txn.cursor(db)?;
        Ok(Self { txn, db, direction, dups, cursor: Some(cursor), eof: false, saved: None })
    }

    /// Whether the cursor has run off the end of the scan.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    fn current_pair(&self) -> Result<(IndexKey, DiskLoc)> {
        if self.eof {
            return Err(Error::IllegalOperation("index cursor is at EOF"));
        }
        let cursor = self
            .cursor
            .as_ref()
            .ok_or(Error::IllegalOperation("index cursor is detached; restore it first"))?;
        match cursor.current()? {
            Some((key, value)) => {
                Ok((IndexKey::from_bytes(key.to_vec()), DiskLoc::from_view(value)?))
            }
            None => Err(Error::Internal("index cursor lost its position".into())),
        }
    }

    /// The key under the cursor.
    pub fn key(&self) -> Result<IndexKey> {
        Ok(self.current_pair()?.0)
    }

    /// The locator under the cursor.
    pub fn loc(&self) -> Result<DiskLoc> {
        Ok(self.current_pair()?.1)
    }

    /// Positions at `key`.
    ///
    /// Lands on the first pair at or past the key in scan direction; on
    /// a duplicate-bearing key, forward scans land on the first
    /// duplicate and reverse scans on the last. With `after_key`, an
    /// exact hit is skipped to the following (or preceding) key instead.
    pub fn seek(&mut self, key: &IndexKey, after_key: bool) -> Result<()> {
        let direction = self.direction;
        let dups = self.dups;
        let cursor = self
            .cursor
            .as_mut()
            .ok_or(Error::IllegalOperation("index cursor is detached; restore it first"))?;

        let landed_eq = cursor
            .seek_range(key.as_bytes())?
            .map(|(landed, _)| landed == key.as_bytes());

        match landed_eq {
            Some(eq) => {
                if after_key && eq {
                    self.eof = match direction {
                        Direction::Forward => cursor.next_nodup()?.is_none(),
                        Direction::Reverse => cursor.prev_nodup()?.is_none(),
                    };
                } else {
                    if dups && cursor.count_dups()? > 1 {
                        match direction {
                            Direction::Forward => cursor.first_dup()?,
                            Direction::Reverse => cursor.last_dup()?,
                        };
                    }
                    self.eof = false;
                }
            }
            None => {
                self.eof = match direction {
                    Direction::Forward => true,
                    Direction::Reverse => cursor.last()?.is_none(),
                };
            }
        }
        Ok(())
    }

    /// Advances one pair in scan direction, traversing duplicates.
    pub fn next(&mut self) -> Result<()> {
        let direction = self.direction;
        let cursor = self
            .cursor
            .as_mut()
            .ok_or(Error::IllegalOperation("index cursor is detached; restore it first"))?;
        self.eof = match direction {
            Direction::Forward => cursor.next()?.is_none(),
            Direction::Reverse => cursor.prev()?.is_none(),
        };
        Ok(())
    }

    /// Whether both cursors reference the same (key, locator) pair.
    pub fn points_at(&self, other: &IndexCursor<'t, T>) -> Result<bool> {
        if self.eof || other.eof {
            return Ok(self.eof == other.eof);
        }
        let (my_key, my_loc) = self.current_pair()?;
        let (other_key, other_loc) = other.current_pair()?;
        // Locators are cheaper to compare than keys.
        Ok(my_loc == other_loc && my_key == other_key)
    }

    /// Materializes the current position and releases the KV cursor.
    ///
    /// Fails at EOF, where there is no position to save.
    pub fn save_position(&mut self) -> Result<()> {
        if self.eof {
            return Err(Error::IllegalOperation("can't save position when EOF"));
        }
        let pair = self.current_pair()?;
        self.saved = Some(pair);
        self.cursor = None;
        Ok(())
    }

    /// Reopens a KV cursor and repositions at, or as close as possible
    /// to, the saved pair.
    ///
    /// Forward scans settle on the smallest pair at or past the saved
    /// one; reverse scans settle on the largest pair at or before it.
    /// Either way a deleted saved pair is skipped, not resurrected.
    pub fn restore_position(&mut self) -> Result<()> {
        let (saved_key, saved_loc) = self
            .saved
            .clone()
            .ok_or(Error::IllegalOperation("no saved position to restore"))?;

        let mut cursor = self.txn.cursor(self.db)?;

        // The smallest locator at the saved key that is >= the saved
        // locator, when the key is still present.
        let landed_loc = if self.dups {
            match cursor.seek_both_range(saved_key.as_bytes(), &saved_loc.to_bytes())? {
                Some((_, value)) => Some(DiskLoc::from_view(value)?),
                None => None,
            }
        } else {
            match cursor.seek_key(saved_key.as_bytes())? {
                Some((_, value)) => {
                    let loc = DiskLoc::from_view(value)?;
                    (loc >= saved_loc).then_some(loc)
                }
                None => None,
            }
        };

        match landed_loc {
            Some(loc) => {
                if self.direction == Direction::Forward || loc == saved_loc {
                    self.eof = false;
                } else {
                    // Reverse scan and the exact pair is gone; the landed
                    // pair is past the mark, so step back over it.
                    self.eof = cursor.prev()?.is_none();
                }
            }
            None => match self.direction {
                Direction::Forward => {
                    let landed_eq = cursor
                        .seek_range(saved_key.as_bytes())?
                        .map(|(landed, _)| landed == saved_key.as_bytes());
                    match landed_eq {
                        // The key survives but every remaining duplicate
                        // is below the saved locator; move past the key.
                        Some(true) => self.eof = cursor.next_nodup()?.is_none(),
                        // The saved pair was deleted; the landed pair is
                        // the next position in scan order.
                        Some(false) => self.eof = false,
                        None => self.eof = true,
                    }
                }
                Direction::Reverse => {
                    let landed_eq = cursor
                        .seek_range(saved_key.as_bytes())?
                        .map(|(landed, _)| landed == saved_key.as_bytes());
                    match landed_eq {
                        Some(true) => {
                            // All remaining duplicates are below the
                            // saved locator; the last one is the largest
                            // pair at or before the mark.
                            if self.dups && cursor.count_dups()? > 1 {
                                cursor.last_dup()?;
                            }
                            self.eof = false;
                        }
                        Some(false) => self.eof = cursor.prev()?.is_none(),
                        None => self.eof = cursor.last()?.is_none(),
                    }
                }
            },
        }

        self.cursor = Some(cursor);
        Ok(())
    }
}
