//! C ABI entry point for the accelerated backend.
//!
//! Lets a host process in another language rank moves through the same
//! [`SearchBackend`] contract. Each call is stateless: the lookup tables are
//! built once and shared read-only, transposition tables live per call.

use std::sync::OnceLock;

use crate::engine::Tile;
use crate::expectimax::{ExpectimaxParallel, SearchBackend};

static BACKEND: OnceLock<ExpectimaxParallel> = OnceLock::new();

/// Rank the legal moves of a board.
///
/// Reads 16 row-major tile values from `board_ptr` and writes up to four
/// scores and direction codes (0=up, 1=down, 2=left, 3=right), best first.
/// Returns the number of entries written; 0 when no move is legal or a
/// pointer is null.
///
/// # Safety
/// `board_ptr` must point to 16 readable `u16`s; `scores_out` and `dirs_out`
/// must each point to 4 writable elements.
#[no_mangle]
pub unsafe extern "C" fn search_ranked_moves(
    board_ptr: *const u16,
    depth: u32,
    scores_out: *mut f64,
    dirs_out: *mut u8,
) -> u32 {
    if board_ptr.is_null() || scores_out.is_null() || dirs_out.is_null() {
        return 0;
    }
    let input = std::slice::from_raw_parts(board_ptr, 16);
    let mut cells = [0 as Tile; 16];
    for (cell, &v) in cells.iter_mut().zip(input) {
        *cell = Tile::from(v);
    }
    let ranking = BACKEND.get_or_init(ExpectimaxParallel::new).search(&cells, depth);

    let scores = std::slice::from_raw_parts_mut(scores_out, 4);
    let dirs = std::slice::from_raw_parts_mut(dirs_out, 4);
    for (i, branch) in ranking.branches.iter().take(4).enumerate() {
        scores[i] = branch.ev;
        dirs[i] = branch.code;
    }
    ranking.branches.len().min(4) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_ranks_through_the_c_abi() {
        let board: [u16; 16] = [2, 4, 8, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut scores = [0.0f64; 4];
        let mut dirs = [9u8; 4];
        let n = unsafe { search_ranked_moves(board.as_ptr(), 2, scores.as_mut_ptr(), dirs.as_mut_ptr()) };
        assert_eq!(n, 1);
        assert_eq!(dirs[0], 1);
        assert_eq!(dirs[1], 9);
    }

    #[test]
    fn null_pointers_write_nothing() {
        let mut scores = [0.0f64; 4];
        let mut dirs = [0u8; 4];
        let n = unsafe { search_ranked_moves(std::ptr::null(), 2, scores.as_mut_ptr(), dirs.as_mut_ptr()) };
        assert_eq!(n, 0);
    }

    #[test]
    fn dead_board_has_no_moves() {
        let board: [u16; 16] = [2, 4, 2, 4, 4, 2, 4, 2, 2, 4, 2, 4, 4, 2, 4, 2];
        let mut scores = [0.0f64; 4];
        let mut dirs = [0u8; 4];
        let n = unsafe { search_ranked_moves(board.as_ptr(), 3, scores.as_mut_ptr(), dirs.as_mut_ptr()) };
        assert_eq!(n, 0);
    }
}
