//! Order-preserving bounded row-group packing.
//!
//! Zoom levels arrive one at a time in ascending order, each already sorted.
//! The packer concatenates them into row groups of at most `max_rows` rows,
//! merging small adjacent levels into a shared group and splitting large
//! levels across several. Row order is never changed: reading the emitted
//! groups back to back yields exactly the levels as pushed.
//!
//! A group is flushed only when the next level would overflow it, so the
//! packer emits the fewest groups a greedy left-to-right fill can produce.
//!
//! # Example
//!
//! ```
//! use yosegi_core::packer::RowGroupPacker;
//!
//! let sink: Vec<Vec<std::ops::Range<usize>>> = Vec::new();
//! let mut packer = RowGroupPacker::new(sink, 10).unwrap();
//! packer.push_level(0..3).unwrap();
//! packer.push_level(3..7).unwrap();
//! packer.push_level(7..15).unwrap();
//! packer.push_level(15..16).unwrap();
//!
//! let (groups, stats) = packer.finish().unwrap();
//! assert_eq!(stats.row_groups, vec![7, 9]);
//! assert_eq!(groups, vec![vec![0..3, 3..7], vec![7..15, 15..16]]);
//! ```

use std::ops::Range;

use arrow_array::RecordBatch;

use crate::{Error, Result};

/// A contiguous, sliceable run of rows.
pub trait Rows: Sized {
    fn num_rows(&self) -> usize;

    /// Rows `offset..offset + len` as a new value.
    fn slice(&self, offset: usize, len: usize) -> Self;
}

impl Rows for RecordBatch {
    fn num_rows(&self) -> usize {
        RecordBatch::num_rows(self)
    }

    fn slice(&self, offset: usize, len: usize) -> Self {
        RecordBatch::slice(self, offset, len)
    }
}

impl<T: Clone> Rows for Vec<T> {
    fn num_rows(&self) -> usize {
        self.len()
    }

    fn slice(&self, offset: usize, len: usize) -> Self {
        self[offset..offset + len].to_vec()
    }
}

impl Rows for Range<usize> {
    fn num_rows(&self) -> usize {
        self.len()
    }

    fn slice(&self, offset: usize, len: usize) -> Self {
        let start = self.start + offset;
        start..start + len
    }
}

/// Destination for packed row groups.
pub trait RowGroupSink<R> {
    /// Write one row group made of `parts`, in order.
    fn write_row_group(&mut self, parts: Vec<R>) -> Result<()>;
}

/// Collects groups in memory.
impl<R> RowGroupSink<R> for Vec<Vec<R>> {
    fn write_row_group(&mut self, parts: Vec<R>) -> Result<()> {
        self.push(parts);
        Ok(())
    }
}

/// Row counts of the emitted groups, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackStats {
    pub row_groups: Vec<usize>,
}

impl PackStats {
    pub fn total_rows(&self) -> usize {
        self.row_groups.iter().sum()
    }
}

/// Streams levels into bounded row groups.
pub struct RowGroupPacker<R: Rows, S: RowGroupSink<R>> {
    sink: S,
    max_rows: usize,
    buffer: Vec<R>,
    buffered_rows: usize,
    stats: PackStats,
}

impl<R: Rows, S: RowGroupSink<R>> RowGroupPacker<R, S> {
    /// Fails with [`Error::InvalidConfig`] when `max_rows` is zero.
    pub fn new(sink: S, max_rows: usize) -> Result<Self> {
        if max_rows == 0 {
            return Err(Error::InvalidConfig(
                "row group size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            sink,
            max_rows,
            buffer: Vec::new(),
            buffered_rows: 0,
            stats: PackStats::default(),
        })
    }

    /// Add the next level. Levels must be pushed in ascending zoom order.
    ///
    /// Empty levels are skipped.
    pub fn push_level(&mut self, rows: R) -> Result<()> {
        let n = rows.num_rows();
        if n == 0 {
            return Ok(());
        }

        if self.buffered_rows + n <= self.max_rows {
            self.buffer.push(rows);
            self.buffered_rows += n;
            return Ok(());
        }

        self.flush()?;

        if n <= self.max_rows {
            self.buffer.push(rows);
            self.buffered_rows = n;
            return Ok(());
        }

        // Oversized level: full chunks go out directly, the tail stays buffered
        let mut offset = 0;
        while n - offset > self.max_rows {
            self.emit(vec![rows.slice(offset, self.max_rows)], self.max_rows)?;
            offset += self.max_rows;
        }
        let rest = n - offset;
        self.buffer.push(rows.slice(offset, rest));
        self.buffered_rows = rest;
        Ok(())
    }

    /// Flush the last group and hand back the sink.
    pub fn finish(mut self) -> Result<(S, PackStats)> {
        self.flush()?;
        Ok((self.sink, self.stats))
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffered_rows == 0 {
            return Ok(());
        }
        let parts = std::mem::take(&mut self.buffer);
        let rows = std::mem::replace(&mut self.buffered_rows, 0);
        self.emit(parts, rows)
    }

    fn emit(&mut self, parts: Vec<R>, rows: usize) -> Result<()> {
        debug_assert!(rows > 0 && rows <= self.max_rows);
        log::debug!("Row group {}: {} rows", self.stats.row_groups.len(), rows);
        self.sink.write_row_group(parts)?;
        self.stats.row_groups.push(rows);
        Ok(())
    }
}

/// Row-group sizes the packer would emit for levels of the given sizes.
pub fn plan_row_groups(level_sizes: &[usize], max_rows: usize) -> Result<Vec<usize>> {
    let mut packer = RowGroupPacker::new(Vec::<Vec<Range<usize>>>::new(), max_rows)?;
    let mut start = 0;
    for &size in level_sizes {
        packer.push_level(start..start + size)?;
        start += size;
    }
    let (_, stats) = packer.finish()?;
    Ok(stats.row_groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{ArrayRef, Int32Array};
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    fn pack(levels: Vec<Vec<u32>>, max_rows: usize) -> Vec<Vec<Vec<u32>>> {
        let mut packer = RowGroupPacker::new(Vec::new(), max_rows).unwrap();
        for level in levels {
            packer.push_level(level).unwrap();
        }
        packer.finish().unwrap().0
    }

    // ========== Grouping ==========

    #[test]
    fn test_small_levels_are_merged() {
        assert_eq!(plan_row_groups(&[3, 4, 8, 1], 10).unwrap(), vec![7, 9]);
    }

    #[test]
    fn test_large_level_is_split() {
        assert_eq!(plan_row_groups(&[25], 10).unwrap(), vec![10, 10, 5]);
    }

    #[test]
    fn test_split_tail_absorbs_next_level() {
        assert_eq!(plan_row_groups(&[25, 3], 10).unwrap(), vec![10, 10, 8]);
    }

    #[test]
    fn test_exact_fit_stays_in_one_group() {
        assert_eq!(plan_row_groups(&[4, 6], 10).unwrap(), vec![10]);
        assert_eq!(plan_row_groups(&[10, 10], 10).unwrap(), vec![10, 10]);
    }

    #[test]
    fn test_buffer_flushed_before_oversized_level() {
        assert_eq!(plan_row_groups(&[2, 21], 10).unwrap(), vec![2, 10, 10, 1]);
    }

    #[test]
    fn test_empty_levels_are_skipped() {
        assert_eq!(plan_row_groups(&[0, 3, 0, 0, 4], 10).unwrap(), vec![7]);
        assert!(plan_row_groups(&[0, 0], 10).unwrap().is_empty());
        assert!(plan_row_groups(&[], 10).unwrap().is_empty());
    }

    #[test]
    fn test_max_rows_of_one() {
        assert_eq!(plan_row_groups(&[2, 1], 1).unwrap(), vec![1, 1, 1]);
    }

    #[test]
    fn test_zero_max_rows_rejected() {
        assert!(matches!(
            plan_row_groups(&[1], 0),
            Err(Error::InvalidConfig(_))
        ));
    }

    // ========== Order ==========

    #[test]
    fn test_concatenation_preserves_order() {
        let levels = vec![vec![1, 2, 3], (4..18).collect(), vec![18], vec![19, 20]];
        let groups = pack(levels, 5);

        let flat: Vec<u32> = groups.iter().flatten().flatten().copied().collect();
        assert_eq!(flat, (1..=20).collect::<Vec<_>>());

        for group in &groups {
            let rows: usize = group.iter().map(Vec::len).sum();
            assert!(rows >= 1 && rows <= 5);
        }
    }

    #[test]
    fn test_group_parts_keep_level_boundaries() {
        let groups = pack(vec![vec![1, 2], vec![3]], 10);
        assert_eq!(groups, vec![vec![vec![1, 2], vec![3]]]);
    }

    #[test]
    fn test_record_batch_rows() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let column: ArrayRef = Arc::new(Int32Array::from((0..12).collect::<Vec<i32>>()));
        let batch = RecordBatch::try_new(schema, vec![column]).unwrap();

        let mut packer = RowGroupPacker::new(Vec::new(), 5).unwrap();
        packer.push_level(batch).unwrap();
        let (groups, stats) = packer.finish().unwrap();

        assert_eq!(stats.row_groups, vec![5, 5, 2]);
        assert_eq!(stats.total_rows(), 12);
        let last = groups[2][0]
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(last.iter().flatten().collect::<Vec<_>>(), vec![10, 11]);
    }

    #[test]
    fn test_sink_error_propagates() {
        struct Failing;
        impl RowGroupSink<Vec<u8>> for Failing {
            fn write_row_group(&mut self, _parts: Vec<Vec<u8>>) -> Result<()> {
                Err(Error::OutputWrite("disk full".to_string()))
            }
        }

        let mut packer = RowGroupPacker::new(Failing, 2).unwrap();
        packer.push_level(vec![1, 2]).unwrap();
        let err = packer.push_level(vec![3]).unwrap_err();
        assert!(matches!(err, Error::OutputWrite(_)));
    }
}
