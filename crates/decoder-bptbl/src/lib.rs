//! Back-pointer table (C4): the forward-search lattice of word exits.
//!
//! Entries are partitioned into a **retired** region (stable, frozen
//! indices) and an **active** region (still growing, still subject to
//! garbage collection as the search window advances). Grounded in
//! `bptbl.h`/`bptbl.c` from the retrieved multisphinx source, most
//! importantly `bptbl_push_frame`'s `oldest_bp` parameter and the
//! abandoned `bptable_gc` insertion-sort routine, which the retrieved
//! source compiles out entirely (`return;` followed by `#if 0`).
//!
//! Because entries are always appended with a non-decreasing exit
//! frame (frame only moves forward, and every `enter` call stamps the
//! table's current frame), the active region is already sorted by exit
//! frame by construction. Retirement therefore always removes a
//! *prefix* of the active region and appends it verbatim to the
//! retired region: the index a caller was given at `enter()` time never
//! changes. This is the resolution of the open question the dead
//! insertion-sort code leaves behind: entries are never reordered,
//! only ever sliced at the boundary and moved to the frozen side.

use decoder_foundation::error::BptblError;

pub type BpIdx = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackPointer {
    pub word_id: i32,
    pub bp: Option<BpIdx>,
    pub ac_score: i32,
    pub lm_score: i32,
    pub exit_frame: i32,
    pub right_context: i32,
    /// Number of entries that name this one as their predecessor.
    pub refcnt: u32,
}

impl BackPointer {
    pub fn score(&self) -> i32 {
        self.ac_score + self.lm_score
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub word_id: i32,
    pub start_frame: i32,
    pub end_frame: i32,
    pub ac_score: i32,
    pub lm_score: i32,
}

pub struct BackPointerTable {
    retired: Vec<BackPointer>,
    active: Vec<BackPointer>,
    /// `ef_idx[frame]` is the global index recorded by `push_frame` at
    /// the moment that frame began, before any of its exits were
    /// entered.
    ef_idx: Vec<u64>,
    cur_frame: i32,
    active_sf: i32,
    gc_runs: u64,
}

impl Default for BackPointerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BackPointerTable {
    pub fn new() -> Self {
        Self {
            retired: Vec::new(),
            active: Vec::new(),
            ef_idx: Vec::new(),
            cur_frame: -1,
            active_sf: 0,
            gc_runs: 0,
        }
    }

    fn total_len(&self) -> u64 {
        self.retired.len() as u64 + self.active.len() as u64
    }

    /// Begins a new frame, recording its starting global index. If
    /// `oldest_active_bp` names an entry whose exit frame is later than
    /// the current floor, runs a GC pass that retires everything before
    /// that entry's exit frame.
    pub fn push_frame(&mut self, oldest_active_bp: Option<BpIdx>) -> Result<i32, BptblError> {
        self.cur_frame += 1;
        self.ef_idx.push(self.total_len());
        if let Some(oldest) = oldest_active_bp {
            let floor = self.get(oldest)?.exit_frame;
            if floor > self.active_sf {
                self.gc(floor);
                self.active_sf = floor;
            }
        }
        Ok(self.cur_frame)
    }

    fn gc(&mut self, new_active_sf: i32) {
        let split = self
            .active
            .partition_point(|bp| bp.exit_frame < new_active_sf);
        if split == 0 {
            return;
        }
        self.retired.extend(self.active.drain(..split));
        self.gc_runs += 1;
    }

    /// Appends a word exit in the current frame, returning its stable
    /// index.
    pub fn enter(
        &mut self,
        word_id: i32,
        predecessor: Option<BpIdx>,
        ac_score: i32,
        lm_score: i32,
        right_context: i32,
    ) -> Result<BpIdx, BptblError> {
        let idx = self.total_len();
        if let Some(p) = predecessor {
            let pred = self.get_mut(p)?;
            pred.refcnt += 1;
        }
        self.active.push(BackPointer {
            word_id,
            bp: predecessor,
            ac_score,
            lm_score,
            exit_frame: self.cur_frame,
            right_context,
            refcnt: 0,
        });
        Ok(idx)
    }

    pub fn get(&self, idx: BpIdx) -> Result<BackPointer, BptblError> {
        self.get_ref(idx).copied()
    }

    fn get_ref(&self, idx: BpIdx) -> Result<&BackPointer, BptblError> {
        let retired_len = self.retired.len() as u64;
        if idx < retired_len {
            Ok(&self.retired[idx as usize])
        } else {
            self.active
                .get((idx - retired_len) as usize)
                .ok_or(BptblError::IndexOutOfRange {
                    idx: idx as u32,
                    n_ent: self.total_len() as u32,
                })
        }
    }

    fn get_mut(&mut self, idx: BpIdx) -> Result<&mut BackPointer, BptblError> {
        let retired_len = self.retired.len() as u64;
        let n_ent = self.total_len() as u32;
        if idx < retired_len {
            Ok(&mut self.retired[idx as usize])
        } else {
            self.active
                .get_mut((idx - retired_len) as usize)
                .ok_or(BptblError::IndexOutOfRange {
                    idx: idx as u32,
                    n_ent,
                })
        }
    }

    /// Start frame: one past the predecessor's exit frame, or 0 if this
    /// is a root entry.
    pub fn sf(&self, idx: BpIdx) -> Result<i32, BptblError> {
        let bp = self.get(idx)?;
        match bp.bp {
            Some(p) => Ok(self.get(p)?.exit_frame + 1),
            None => Ok(0),
        }
    }

    pub fn ef_count(&self, frame: i32) -> usize {
        let retired_lo = self.retired.partition_point(|bp| bp.exit_frame < frame);
        let retired_hi = self.retired.partition_point(|bp| bp.exit_frame <= frame);
        let active_count = self.active.iter().filter(|bp| bp.exit_frame == frame).count();
        (retired_hi - retired_lo) + active_count
    }

    /// Index of the first bp exiting in `frame`, if that frame's exits
    /// have all been retired (i.e. fall entirely within the stable
    /// region); `None` while the frame is still partly or wholly active.
    pub fn ef_idx(&self, frame: i32) -> Option<u64> {
        if frame >= self.active_sf {
            return None;
        }
        let pos = self.retired.partition_point(|bp| bp.exit_frame < frame);
        Some(pos as u64)
    }

    pub fn n_ent(&self) -> u64 {
        self.total_len()
    }

    pub fn n_retired(&self) -> usize {
        self.retired.len()
    }

    pub fn gc_runs(&self) -> u64 {
        self.gc_runs
    }

    /// The current floor of the active window: frames before this have
    /// been (or are eligible to be) retired.
    pub fn active_sf(&self) -> i32 {
        self.active_sf
    }

    /// The most recent frame opened by `push_frame`, or -1 before the
    /// first call.
    pub fn cur_frame(&self) -> i32 {
        self.cur_frame
    }

    /// Clears the table ahead of a new utterance: both regions, the
    /// frame index, and the GC counter. Mirrors the feature buffer's and
    /// scorer's own per-utterance counter resets.
    pub fn reset(&mut self) {
        self.retired.clear();
        self.active.clear();
        self.ef_idx.clear();
        self.cur_frame = -1;
        self.active_sf = 0;
        self.gc_runs = 0;
    }

    /// Retires everything remaining and returns the best final exit:
    /// highest-scoring bp among the last frame's exits matching
    /// `finish_word_id` (or any word, if `None`).
    pub fn finalize(&mut self, finish_word_id: Option<i32>) -> Result<BpIdx, BptblError> {
        self.retired.append(&mut self.active);
        self.find_exit(finish_word_id)
    }

    pub fn find_exit(&self, finish_word_id: Option<i32>) -> Result<BpIdx, BptblError> {
        if self.retired.is_empty() {
            return Err(BptblError::EmptyTable);
        }
        let last_frame = self.retired.last().map(|bp| bp.exit_frame).unwrap_or(-1);
        let candidates = self
            .retired
            .iter()
            .enumerate()
            .filter(|(_, bp)| bp.exit_frame == last_frame)
            .filter(|(_, bp)| finish_word_id.map_or(true, |wid| bp.word_id == wid));
        candidates
            .max_by_key(|(_, bp)| bp.score())
            .map(|(i, _)| i as BpIdx)
            .ok_or(BptblError::NoFinishWord {
                wid: finish_word_id.unwrap_or(-1),
            })
    }

    /// Walks backward from the best finish-word exit to the root,
    /// returning segments in forward (chronological) order.
    pub fn seg_iter(&self, finish_word_id: Option<i32>) -> Result<Vec<Segment>, BptblError> {
        let mut idx = Some(self.find_exit(finish_word_id)?);
        let mut segments = Vec::new();
        while let Some(i) = idx {
            let bp = self.get(i)?;
            segments.push(Segment {
                word_id: bp.word_id,
                start_frame: self.sf(i)?,
                end_frame: bp.exit_frame,
                ac_score: bp.ac_score,
                lm_score: bp.lm_score,
            });
            idx = bp.bp;
        }
        segments.reverse();
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gc_retires_prefix_and_preserves_indices() {
        let mut bp = BackPointerTable::new();
        bp.push_frame(None).unwrap();
        let i0 = bp.enter(42, None, 1, 0, 0).unwrap();
        bp.push_frame(None).unwrap();
        let i1 = bp.enter(42, None, 2, 0, 0).unwrap();
        bp.push_frame(None).unwrap();
        let i2 = bp.enter(42, None, 3, 0, 0).unwrap();
        bp.push_frame(None).unwrap();
        let i3 = bp.enter(69, Some(i1), 4, 0, 0).unwrap();
        let i4 = bp.enter(69, Some(i1), 5, 0, 0).unwrap();

        bp.push_frame(Some(i2)).unwrap();

        assert_eq!((i0, i1, i2, i3, i4), (0, 1, 2, 3, 4));
        assert_eq!(bp.n_retired(), 2);
        assert_eq!(bp.gc_runs(), 1);

        assert_eq!(bp.get(i1).unwrap().bp, None);
        assert_eq!(bp.get(i2).unwrap().ac_score, 3);
        assert_eq!(bp.get(i3).unwrap().ac_score, 4);
        assert_eq!(bp.get(i4).unwrap().ac_score, 5);
        assert_eq!(bp.sf(i3).unwrap(), 2);
        assert_eq!(bp.sf(i4).unwrap(), 2);
    }

    #[test]
    fn invariant_predecessor_index_always_smaller() {
        let mut bp = BackPointerTable::new();
        bp.push_frame(None).unwrap();
        let root = bp.enter(1, None, 0, 0, 0).unwrap();
        bp.push_frame(None).unwrap();
        let child = bp.enter(2, Some(root), 1, 0, 0).unwrap();
        assert!(root < child);
    }

    #[test]
    fn finalize_selects_best_scoring_final_exit() {
        let mut bp = BackPointerTable::new();
        bp.push_frame(None).unwrap();
        bp.enter(1, None, 10, 0, 0).unwrap();
        let better = bp.enter(1, None, 20, 0, 0).unwrap();
        let best = bp.finalize(None).unwrap();
        assert_eq!(best, better);
    }

    #[test]
    fn find_exit_filters_by_finish_word() {
        let mut bp = BackPointerTable::new();
        bp.push_frame(None).unwrap();
        let target = bp.enter(7, None, 5, 0, 0).unwrap();
        bp.enter(8, None, 100, 0, 0).unwrap();
        let found = bp.finalize(Some(7)).unwrap();
        assert_eq!(found, target);
    }

    #[test]
    fn seg_iter_walks_chain_in_forward_order() {
        let mut bp = BackPointerTable::new();
        bp.push_frame(None).unwrap();
        let a = bp.enter(1, None, 1, 0, 0).unwrap();
        bp.push_frame(None).unwrap();
        let b = bp.enter(2, Some(a), 2, 0, 0).unwrap();
        bp.push_frame(None).unwrap();
        bp.enter(3, Some(b), 3, 0, 0).unwrap();

        let segments = bp.seg_iter(Some(3)).unwrap();
        let words: Vec<i32> = segments.iter().map(|s| s.word_id).collect();
        assert_eq!(words, vec![1, 2, 3]);
        assert_eq!(segments[0].start_frame, 0);
        assert_eq!(segments[1].start_frame, 1);
        assert_eq!(segments[2].start_frame, 2);
    }

    #[test]
    fn empty_table_finalize_errors() {
        let mut bp = BackPointerTable::new();
        assert!(matches!(bp.finalize(None), Err(BptblError::EmptyTable)));
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut bp = BackPointerTable::new();
        bp.push_frame(None).unwrap();
        bp.enter(1, None, 5, 0, 0).unwrap();
        bp.reset();
        assert_eq!(bp.n_ent(), 0);
        assert_eq!(bp.n_retired(), 0);
        assert_eq!(bp.cur_frame(), -1);
        assert_eq!(bp.active_sf(), 0);
        assert_eq!(bp.gc_runs(), 0);
    }
}
