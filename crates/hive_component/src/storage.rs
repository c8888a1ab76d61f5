//! Chunked columnar storage.
//!
//! A [`ChunkedColumn`] stores one component type for every entity in an
//! archetype. Rows are packed into fixed-size chunks of [`CHUNK_SIZE`]
//! entries; every chunk except the last is full, and pushing never moves
//! existing chunks, so chunk slices stay stable across growth.
//!
//! Each chunk is allocated with a handful of extra default-initialised slots
//! (the *SIMD tail padding*, computed once per type at registration) so that
//! [`ChunkedColumn::padded_chunk`] can hand out slices whose length is a
//! whole number of vector lanes without ever reading out of bounds.

use std::any::Any;
use std::ops::{Index, IndexMut};

use crate::component::Component;

/// Number of logical rows per chunk.
pub const CHUNK_SIZE: usize = 128;

/// Assumed vector register width used to size the tail padding.
const SIMD_WIDTH_BYTES: usize = 32;

/// Extra default slots to allocate per chunk for a component of
/// `item_size` bytes.
///
/// The lane count is the largest power of two that fits the register, so it
/// always divides [`CHUNK_SIZE`]. Types wider than a register get no
/// padding.
#[must_use]
pub const fn simd_tail_padding(item_size: usize) -> usize {
    if item_size == 0 || item_size >= SIMD_WIDTH_BYTES {
        return 0;
    }
    let max_lanes = SIMD_WIDTH_BYTES / item_size;
    let mut lanes = 1;
    while lanes * 2 <= max_lanes {
        lanes *= 2;
    }
    lanes - 1
}

/// Columnar storage for a single component type.
///
/// Invariants: `len == full_chunks * CHUNK_SIZE + tail_len`; every chunk
/// before the last is full; slots at or past `len` hold `T::default()`.
#[derive(Debug)]
pub struct ChunkedColumn<T> {
    chunks: Vec<Box<[T]>>,
    len: usize,
    pad: usize,
}

impl<T: Clone + Default> ChunkedColumn<T> {
    /// Creates an empty column with `pad` extra slots per chunk.
    #[must_use]
    pub fn new(pad: usize) -> Self {
        Self {
            chunks: Vec::new(),
            len: 0,
            pad,
        }
    }

    /// Number of live rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the column holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks holding at least one live row.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.len.div_ceil(CHUNK_SIZE)
    }

    /// Appends a value, returning its row. Never relocates existing chunks.
    pub fn push(&mut self, value: T) -> usize {
        let row = self.len;
        let chunk = row / CHUNK_SIZE;
        if chunk == self.chunks.len() {
            self.chunks
                .push(vec![T::default(); CHUNK_SIZE + self.pad].into_boxed_slice());
        }
        self.chunks[chunk][row % CHUNK_SIZE] = value;
        self.len += 1;
        row
    }

    /// Removes the row in O(1) by swapping the last row into its place.
    ///
    /// The vacated slot is reset to `T::default()` so owned resources are
    /// released immediately. Returns the removed value.
    pub fn swap_remove(&mut self, row: usize) -> T {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        let last = self.len - 1;
        let removed = std::mem::take(&mut self.chunks[row / CHUNK_SIZE][row % CHUNK_SIZE]);
        if row != last {
            let filler = std::mem::take(&mut self.chunks[last / CHUNK_SIZE][last % CHUNK_SIZE]);
            self.chunks[row / CHUNK_SIZE][row % CHUNK_SIZE] = filler;
        }
        self.len = last;
        removed
    }

    /// Borrows a row, or `None` past the end.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<&T> {
        if row < self.len {
            Some(&self.chunks[row / CHUNK_SIZE][row % CHUNK_SIZE])
        } else {
            None
        }
    }

    /// Mutably borrows a row, or `None` past the end.
    pub fn get_mut(&mut self, row: usize) -> Option<&mut T> {
        if row < self.len {
            Some(&mut self.chunks[row / CHUNK_SIZE][row % CHUNK_SIZE])
        } else {
            None
        }
    }

    /// The live rows of chunk `index`.
    #[must_use]
    pub fn chunk(&self, index: usize) -> &[T] {
        let n = self.chunk_len(index);
        &self.chunks[index][..n]
    }

    /// The live rows of chunk `index`, mutably.
    pub fn chunk_mut(&mut self, index: usize) -> &mut [T] {
        let n = self.chunk_len(index);
        &mut self.chunks[index][..n]
    }

    /// The rows of chunk `index` with the tail rounded up to a whole number
    /// of vector lanes. Padding slots hold `T::default()`.
    #[must_use]
    pub fn padded_chunk(&self, index: usize) -> &[T] {
        let lane = self.pad + 1;
        let n = self.chunk_len(index);
        let padded = n.div_ceil(lane) * lane;
        &self.chunks[index][..padded.min(CHUNK_SIZE + self.pad)]
    }

    /// Iterates every live row in order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.chunk_count()).flat_map(|c| self.chunk(c).iter())
    }

    fn chunk_len(&self, index: usize) -> usize {
        assert!(index < self.chunk_count(), "chunk {index} out of bounds");
        (self.len - index * CHUNK_SIZE).min(CHUNK_SIZE)
    }
}

impl<T: Clone + Default> Index<usize> for ChunkedColumn<T> {
    type Output = T;

    fn index(&self, row: usize) -> &T {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        &self.chunks[row / CHUNK_SIZE][row % CHUNK_SIZE]
    }
}

impl<T: Clone + Default> IndexMut<usize> for ChunkedColumn<T> {
    fn index_mut(&mut self, row: usize) -> &mut T {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        &mut self.chunks[row / CHUNK_SIZE][row % CHUNK_SIZE]
    }
}

/// Type-erased view over a [`ChunkedColumn`], used by archetypes to operate
/// on columns of unknown component type.
pub trait ColumnStorage: Send + Sync {
    /// Number of live rows.
    fn len(&self) -> usize;

    /// Whether the column holds no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a default-initialised row, returning its index.
    fn push_default(&mut self) -> usize;

    /// Swap-removes a row, discarding its value.
    fn remove_row(&mut self, row: usize);

    /// Moves a row into `dst` (same component type), swap-removing it here.
    fn move_row_to(&mut self, row: usize, dst: &mut dyn ColumnStorage);

    /// Appends a clone of `row` onto `dst` (same component type).
    fn clone_row_to(&self, row: usize, dst: &mut dyn ColumnStorage);

    /// Appends a clone of `row` onto this column, returning the new row.
    fn clone_row(&mut self, row: usize) -> usize;

    /// Overwrites a row from a boxed value. Returns `false` on a type
    /// mismatch.
    fn set_boxed(&mut self, row: usize, value: Box<dyn Any>) -> bool;

    /// Clones a row out as a boxed value.
    fn get_boxed(&self, row: usize) -> Box<dyn Any>;

    /// Serialises a row to a JSON value.
    fn row_to_json(&self, row: usize) -> serde_json::Result<serde_json::Value>;

    /// Overwrites a row from a JSON value.
    fn set_row_from_json(
        &mut self,
        row: usize,
        value: &serde_json::Value,
    ) -> serde_json::Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ColumnStorage for ChunkedColumn<T> {
    fn len(&self) -> usize {
        self.len
    }

    fn push_default(&mut self) -> usize {
        self.push(T::default())
    }

    fn remove_row(&mut self, row: usize) {
        let _ = self.swap_remove(row);
    }

    fn move_row_to(&mut self, row: usize, dst: &mut dyn ColumnStorage) {
        let value = self.swap_remove(row);
        let dst = dst
            .as_any_mut()
            .downcast_mut::<ChunkedColumn<T>>()
            .expect("column type mismatch in structural move");
        dst.push(value);
    }

    fn clone_row_to(&self, row: usize, dst: &mut dyn ColumnStorage) {
        let value = self[row].clone();
        let dst = dst
            .as_any_mut()
            .downcast_mut::<ChunkedColumn<T>>()
            .expect("column type mismatch in row clone");
        dst.push(value);
    }

    fn clone_row(&mut self, row: usize) -> usize {
        let value = self[row].clone();
        self.push(value)
    }

    fn set_boxed(&mut self, row: usize, value: Box<dyn Any>) -> bool {
        match value.downcast::<T>() {
            Ok(v) => {
                self[row] = *v;
                true
            }
            Err(_) => false,
        }
    }

    fn get_boxed(&self, row: usize) -> Box<dyn Any> {
        Box::new(self[row].clone())
    }

    fn row_to_json(&self, row: usize) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self[row])
    }

    fn set_row_from_json(
        &mut self,
        row: usize,
        value: &serde_json::Value,
    ) -> serde_json::Result<()> {
        self[row] = serde_json::from_value(value.clone())?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
