//! Double-buffered toroidal cell grid.
//!
//! Two same-sized flat buffers hold consecutive generations. During a
//! generation every worker reads the front buffer and writes its own rows of
//! the back buffer; the publish step flips which buffer is the front. Cells
//! are `AtomicU8` so the disjoint-row writers and the whole-buffer readers
//! need no locks; ordering between generations comes from the barrier, so
//! relaxed loads and stores are enough.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use rand::Rng;

/// State of a single cell. No history beyond two generations is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellState {
    Dead = 0,
    Alive = 1,
}

impl CellState {
    fn from_u8(raw: u8) -> CellState {
        if raw == 0 {
            CellState::Dead
        } else {
            CellState::Alive
        }
    }
}

/// One generation of cells, stored flat in row-major order (`y * width + x`).
///
/// The buffer is allocated once and never resized; `width * height` always
/// equals the backing length.
pub struct CellBuffer {
    width: usize,
    height: usize,
    cells: Vec<AtomicU8>,
}

impl CellBuffer {
    /// Allocates an all-Dead buffer of `width * height` cells.
    pub fn new(width: usize, height: usize) -> CellBuffer {
        let cells = (0..width * height)
            .map(|_| AtomicU8::new(CellState::Dead as u8))
            .collect();
        CellBuffer {
            width,
            height,
            cells,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> CellState {
        CellState::from_u8(self.cells[self.index(x, y)].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, x: usize, y: usize, state: CellState) {
        self.cells[self.index(x, y)].store(state as u8, Ordering::Relaxed);
    }

    /// Fills the buffer with an independent Bernoulli(`density`) draw per
    /// cell.
    pub fn randomize(&self, rng: &mut impl Rng, density: f64) {
        for cell in &self.cells {
            let state = if rng.gen_bool(density) {
                CellState::Alive
            } else {
                CellState::Dead
            };
            cell.store(state as u8, Ordering::Relaxed);
        }
    }

    /// Number of Alive cells.
    pub fn live_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.load(Ordering::Relaxed) != 0)
            .count()
    }

    /// Copies the buffer out as plain states, row-major.
    pub fn snapshot(&self) -> Vec<CellState> {
        self.cells
            .iter()
            .map(|cell| CellState::from_u8(cell.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Two generations of cells plus the index of the published one.
///
/// `front()` is the last published generation and is read-only for the whole
/// of the next generation; `back()` is the buffer being written. `flip()` is
/// called only by the barrier's publish action.
pub struct Grid {
    buffers: [CellBuffer; 2],
    front: AtomicUsize,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Grid {
        Grid {
            buffers: [
                CellBuffer::new(width, height),
                CellBuffer::new(width, height),
            ],
            front: AtomicUsize::new(0),
        }
    }

    pub fn width(&self) -> usize {
        self.buffers[0].width()
    }

    pub fn height(&self) -> usize {
        self.buffers[0].height()
    }

    /// The last published generation.
    pub fn front(&self) -> &CellBuffer {
        &self.buffers[self.front.load(Ordering::Acquire)]
    }

    /// The generation currently being written.
    pub fn back(&self) -> &CellBuffer {
        &self.buffers[self.front.load(Ordering::Acquire) ^ 1]
    }

    /// `(read, write)` buffer pair for one generation of work.
    pub fn generation_buffers(&self) -> (&CellBuffer, &CellBuffer) {
        let front = self.front.load(Ordering::Acquire);
        (&self.buffers[front], &self.buffers[front ^ 1])
    }

    /// Publishes the back buffer: the generation just written becomes the
    /// read buffer for the next one.
    pub fn flip(&self) {
        self.front.fetch_xor(1, Ordering::AcqRel);
    }
}

/// Counts Alive cells among the 8 toroidal neighbors of `(x, y)`.
///
/// Edges wrap to the opposite side: coordinate `-1` maps to `size - 1` and
/// `size` maps to `0`. Pure, and safe to call from any number of threads
/// reading the same buffer.
pub fn count_neighbors(cells: &CellBuffer, x: usize, y: usize) -> u8 {
    let width = cells.width() as i64;
    let height = cells.height() as i64;
    let mut count = 0;

    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }

            let nx = (x as i64 + dx).rem_euclid(width) as usize;
            let ny = (y as i64 + dy).rem_euclid(height) as usize;

            if cells.get(nx, ny) == CellState::Alive {
                count += 1;
            }
        }
    }

    count
}

/// The classic birth/survival rule:
///
/// * a live cell with two or three live neighbors survives,
/// * a dead cell with exactly three live neighbors is born,
/// * every other cell is dead in the next generation.
pub fn next_state(cell: CellState, live_neighbors: u8) -> CellState {
    match (cell, live_neighbors) {
        (CellState::Alive, 2) | (CellState::Alive, 3) => CellState::Alive,
        (CellState::Dead, 3) => CellState::Alive,
        _ => CellState::Dead,
    }
}

/// Single-threaded whole-grid transition from `prev` into `next`.
///
/// This is the reference the threaded engine must agree with bit-for-bit.
pub fn step_reference(prev: &CellBuffer, next: &CellBuffer) {
    for y in 0..prev.height() {
        for x in 0..prev.width() {
            let live_neighbors = count_neighbors(prev, x, y);
            next.set(x, y, next_state(prev.get(x, y), live_neighbors));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_from(rows: &[&str]) -> CellBuffer {
        let buf = CellBuffer::new(rows[0].len(), rows.len());
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.bytes().enumerate() {
                if ch == b'#' {
                    buf.set(x, y, CellState::Alive);
                }
            }
        }
        buf
    }

    fn rows_from(buf: &CellBuffer) -> Vec<String> {
        (0..buf.height())
            .map(|y| {
                (0..buf.width())
                    .map(|x| match buf.get(x, y) {
                        CellState::Alive => '#',
                        CellState::Dead => '.',
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn rule_table() {
        assert_eq!(next_state(CellState::Alive, 1), CellState::Dead);
        assert_eq!(next_state(CellState::Alive, 2), CellState::Alive);
        assert_eq!(next_state(CellState::Alive, 3), CellState::Alive);
        assert_eq!(next_state(CellState::Alive, 4), CellState::Dead);
        assert_eq!(next_state(CellState::Dead, 2), CellState::Dead);
        assert_eq!(next_state(CellState::Dead, 3), CellState::Alive);
        assert_eq!(next_state(CellState::Dead, 4), CellState::Dead);
    }

    #[test]
    fn no_spontaneous_generation() {
        let prev = CellBuffer::new(8, 6);
        let next = CellBuffer::new(8, 6);
        step_reference(&prev, &next);
        assert_eq!(next.live_count(), 0);
    }

    #[test]
    fn lone_cell_dies() {
        let prev = buffer_from(&["....", ".#..", "....", "...."]);
        let next = CellBuffer::new(4, 4);
        step_reference(&prev, &next);
        assert_eq!(next.live_count(), 0);
    }

    #[test]
    fn block_is_a_still_life() {
        let rows = &["....", ".##.", ".##.", "...."];
        let prev = buffer_from(rows);
        let next = CellBuffer::new(4, 4);
        step_reference(&prev, &next);
        assert_eq!(rows_from(&next), rows);
    }

    #[test]
    fn corner_neighbor_wraps_around_both_axes() {
        let buf = CellBuffer::new(5, 4);
        buf.set(4, 3, CellState::Alive);
        assert_eq!(count_neighbors(&buf, 0, 0), 1);
    }

    #[test]
    fn edge_neighbors_wrap_horizontally() {
        let buf = CellBuffer::new(5, 4);
        buf.set(4, 1, CellState::Alive);
        buf.set(4, 2, CellState::Alive);
        assert_eq!(count_neighbors(&buf, 0, 1), 2);
    }

    #[test]
    fn neighbor_count_excludes_the_cell_itself() {
        let buf = buffer_from(&["###", "###", "###"]);
        assert_eq!(count_neighbors(&buf, 1, 1), 8);
    }

    // A 5x5 board leaves a dead margin around the blinker; on a 3x3 torus
    // the column would wrap onto itself and fill the grid instead.
    #[test]
    fn blinker_oscillates_through_reference_step() {
        let vertical = buffer_from(&[".....", "..#..", "..#..", "..#..", "....."]);
        let horizontal = CellBuffer::new(5, 5);
        step_reference(&vertical, &horizontal);
        assert_eq!(
            rows_from(&horizontal),
            &[".....", ".....", ".###.", ".....", "....."]
        );

        let back = CellBuffer::new(5, 5);
        step_reference(&horizontal, &back);
        assert_eq!(
            rows_from(&back),
            &[".....", "..#..", "..#..", "..#..", "....."]
        );
    }

    #[test]
    fn flip_swaps_read_and_write_buffers() {
        let grid = Grid::new(3, 3);
        grid.back().set(1, 1, CellState::Alive);
        assert_eq!(grid.front().get(1, 1), CellState::Dead);

        grid.flip();
        assert_eq!(grid.front().get(1, 1), CellState::Alive);
        assert_eq!(grid.back().get(1, 1), CellState::Dead);
    }

    #[test]
    fn randomize_respects_extreme_densities() {
        let buf = CellBuffer::new(10, 10);
        let mut rng = rand::thread_rng();

        buf.randomize(&mut rng, 1.0);
        assert_eq!(buf.live_count(), 100);

        buf.randomize(&mut rng, 0.0);
        assert_eq!(buf.live_count(), 0);
    }
}
