use arrayvec::ArrayVec;
use cozy_chess::{Board, Color, Piece, Square};

use crate::bitset::Bitset;
use crate::error::EncodingError;
use crate::position::Position;

// Feature Layout (2560 per perspective):
//
// King bucket [0-3] (selected by the perspective's own king):
//   [Bucket 0][Bucket 1][Bucket 2][Bucket 3]
//   └─ 640 ──┘└─ 640 ──┘└─ 640 ──┘└─ 640 ──┘
//
// Within a bucket, 10 piece codes of 64 squares each:
//   [OurP, OurN, OurB, OurR, OurQ, TheirP, TheirN, TheirB, TheirR, TheirQ]
//
// Squares are absolute for the white perspective and mirrored vertically
// (A1 <-> A8) for the black perspective. Kings produce no feature.

pub const N_BUCKETS: usize = 4;
pub const NUM_PIECE_CODES: usize = 10;
pub const FEATURES_PER_BUCKET: usize = NUM_PIECE_CODES * Square::NUM;
pub const NUM_FEATURES: usize = N_BUCKETS * FEATURES_PER_BUCKET; // 2560 total
pub const NUM_U64S: usize = NUM_FEATURES.div_ceil(64);

/// 32 pieces minus the two kings.
pub const MAX_ACTIVE_FEATURES: usize = 30;

/// King bucket by perspective-relative king square (A1..H8).
#[rustfmt::skip]
const KING_BUCKETS: [usize; Square::NUM] = [
    0, 0, 0, 0, 1, 1, 1, 1,
    2, 2, 2, 2, 2, 2, 2, 2,
    2, 2, 2, 2, 2, 2, 2, 2,
    3, 3, 3, 3, 3, 3, 3, 3,
    3, 3, 3, 3, 3, 3, 3, 3,
    3, 3, 3, 3, 3, 3, 3, 3,
    3, 3, 3, 3, 3, 3, 3, 3,
    3, 3, 3, 3, 3, 3, 3, 3,
];

pub type FeatureSet = ArrayVec<usize, MAX_ACTIVE_FEATURES>;
pub type FeatureBits = Bitset<NUM_U64S>;

/// Active features of one position from both perspectives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Features {
    pub white_to_move: bool,
    pub white: FeatureSet,
    pub black: FeatureSet,
}

impl Features {
    /// (side to move, side not to move)
    #[inline(always)]
    pub fn by_side_to_move(&self) -> (&FeatureSet, &FeatureSet) {
        if self.white_to_move {
            (&self.white, &self.black)
        } else {
            (&self.black, &self.white)
        }
    }
}

#[inline(always)]
pub fn relative_square(perspective: Color, sq: Square) -> Square {
    match perspective {
        Color::White => sq,
        Color::Black => sq.flip_rank(),
    }
}

#[inline(always)]
pub fn king_bucket(perspective: Color, king: Square) -> usize {
    KING_BUCKETS[relative_square(perspective, king) as usize]
}

/// Compound piece code: friendly pieces first, then enemy pieces.
#[inline(always)]
pub fn piece_code(perspective: Color, color: Color, piece: Piece) -> usize {
    debug_assert!(piece != Piece::King, "kings have no piece code");
    5 * (color != perspective) as usize + piece as usize
}

#[inline(always)]
pub fn feature_index(bucket: usize, code: usize, sq: Square) -> usize {
    bucket * FEATURES_PER_BUCKET + code * Square::NUM + sq as usize
}

/// Feature of a single non-king piece as seen from `perspective`.
#[inline(always)]
pub fn piece_feature(
    perspective: Color,
    own_king: Square,
    color: Color,
    piece: Piece,
    sq: Square,
) -> usize {
    feature_index(
        king_bucket(perspective, own_king),
        piece_code(perspective, color, piece),
        relative_square(perspective, sq),
    )
}

pub fn encode(position: &Position) -> Result<Features, EncodingError> {
    let white_king = single_king(position, Color::White)?;
    let black_king = single_king(position, Color::Black)?;

    let non_kings = position
        .pieces()
        .filter(|&(_, _, piece)| piece != Piece::King)
        .count();
    if non_kings > MAX_ACTIVE_FEATURES {
        return Err(EncodingError::TooManyPieces(non_kings));
    }

    let mut white = FeatureSet::new();
    let mut black = FeatureSet::new();

    for (sq, color, piece) in position.pieces() {
        if piece == Piece::King {
            continue;
        }
        white.push(piece_feature(Color::White, white_king, color, piece, sq));
        black.push(piece_feature(Color::Black, black_king, color, piece, sq));
    }

    Ok(Features {
        white_to_move: position.side_to_move() == Color::White,
        white,
        black,
    })
}

pub fn encode_fen(fen: &str) -> Result<Features, EncodingError> {
    encode(&Position::from_fen(fen)?)
}

/// Encodes a legal engine board. `cozy_chess` guarantees one king per side.
pub fn encode_board(board: &Board) -> Result<Features, EncodingError> {
    encode(&Position::from_board(board))
}

/// Writes the one-hot representation of `set` into `out`.
/// Used during training where f32 tensors are required.
#[inline(always)]
pub fn write_dense(set: &[usize], out: &mut [f32]) {
    for &idx in set {
        out[idx] = 1.0;
    }
}

pub fn to_dense(set: &[usize]) -> Vec<f32> {
    let mut dense = vec![0f32; NUM_FEATURES];
    write_dense(set, &mut dense);
    dense
}

/// Packed representation for inference: XOR between consecutive positions
/// finds the changed features directly.
#[inline(always)]
pub fn to_bitset(set: &[usize]) -> FeatureBits {
    set.iter().copied().collect()
}

fn single_king(position: &Position, color: Color) -> Result<Square, EncodingError> {
    let mut kings = position.king_squares(color);
    let king = kings.next().ok_or(EncodingError::MissingKing(color))?;
    if kings.next().is_some() {
        return Err(EncodingError::MultipleKings(color));
    }
    Ok(king)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TEST_POSITIONS: &[&str] = &[
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1", // Starting
        "r1bqkbnr/pppppppp/2n5/8/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 1 2", // After 1.e4 Nc6
        "r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4", // Italian
        "rnbqkb1r/pp1p1ppp/4pn2/2p5/2PP4/2N5/PP2PPPP/R1BQKBNR b KQkq - 0 4", // Sicilian
        "8/8/8/8/8/5k2/8/4K2R w - - 0 1",                           // Endgame
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1", // Kiwipete
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        "6k1/5ppp/8/8/8/8/1q3PPP/3R2K1 b - - 0 1",
    ];

    fn sorted(set: &FeatureSet) -> Vec<usize> {
        let mut v = set.to_vec();
        v.sort_unstable();
        v
    }

    #[test]
    fn test_start_position_feature_counts() {
        let features = encode_fen(TEST_POSITIONS[0]).unwrap();

        assert!(features.white_to_move);
        assert_eq!(features.white.len(), 30);
        assert_eq!(features.black.len(), 30);

        // 8 pawns + 2 knights + 2 bishops + 2 rooks + 1 queen per color
        let friendly = |set: &FeatureSet| {
            set.iter()
                .filter(|&&idx| (idx % FEATURES_PER_BUCKET) / Square::NUM < 5)
                .count()
        };
        assert_eq!(friendly(&features.white), 15);
        assert_eq!(friendly(&features.black), 15);

        // Both kings sit on their first rank, king side files
        assert!(features.white.iter().all(|&idx| idx / FEATURES_PER_BUCKET == 1));
        assert!(features.black.iter().all(|&idx| idx / FEATURES_PER_BUCKET == 1));

        // Symmetric start position: both perspectives see the same features
        assert_eq!(sorted(&features.white), sorted(&features.black));
    }

    #[test]
    fn test_perspective_symmetry() {
        for fen in TEST_POSITIONS {
            let pos = Position::from_fen(fen).unwrap();
            let features = encode(&pos).unwrap();
            let mirrored = encode(&pos.flipped()).unwrap();

            assert_eq!(
                sorted(&features.white),
                sorted(&mirrored.black),
                "white/black mismatch for {}",
                fen
            );
            assert_eq!(
                sorted(&features.black),
                sorted(&mirrored.white),
                "black/white mismatch for {}",
                fen
            );
            assert_ne!(features.white_to_move, mirrored.white_to_move);
        }
    }

    #[test]
    fn test_piece_feature_symmetry_on_every_square() {
        for king in Square::ALL {
            for sq in Square::ALL {
                for piece in [
                    Piece::Pawn,
                    Piece::Knight,
                    Piece::Bishop,
                    Piece::Rook,
                    Piece::Queen,
                ] {
                    for color in Color::ALL {
                        let white = piece_feature(Color::White, king, color, piece, sq);
                        let black = piece_feature(
                            Color::Black,
                            king.flip_rank(),
                            !color,
                            piece,
                            sq.flip_rank(),
                        );
                        assert_eq!(white, black);
                    }
                }
            }
        }
    }

    #[test]
    fn test_feature_indices_are_disjoint() {
        let mut seen = HashSet::new();
        for bucket in 0..N_BUCKETS {
            for code in 0..NUM_PIECE_CODES {
                for sq in Square::ALL {
                    let idx = feature_index(bucket, code, sq);
                    assert!(idx < NUM_FEATURES);
                    assert!(seen.insert(idx), "collision at {}", idx);
                }
            }
        }
        assert_eq!(seen.len(), NUM_FEATURES);
    }

    #[test]
    fn test_king_bucket_table_is_mirror_symmetric() {
        for sq in Square::ALL {
            assert_eq!(
                king_bucket(Color::White, sq),
                king_bucket(Color::Black, sq.flip_rank())
            );
            assert!(king_bucket(Color::White, sq) < N_BUCKETS);
        }
    }

    #[test]
    fn test_kings_never_produce_features() {
        let features = encode_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert!(features.white.is_empty());
        assert!(features.black.is_empty());
    }

    #[test]
    fn test_invalid_king_counts_are_rejected() {
        assert!(matches!(
            encode_fen("8/8/8/8/8/8/8/4K3 w - - 0 1"),
            Err(EncodingError::MissingKing(Color::Black))
        ));
        assert!(matches!(
            encode_fen("4k3/8/8/8/8/8/8/8 b - - 0 1"),
            Err(EncodingError::MissingKing(Color::White))
        ));
        assert!(matches!(
            encode_fen("4k3/8/8/8/8/8/8/K3K3 w - - 0 1"),
            Err(EncodingError::MultipleKings(Color::White))
        ));
    }

    #[test]
    fn test_too_many_pieces_is_an_error() {
        let fen = "qqqqkqqq/qqqqqqqq/qqqqqqqq/qqqqqqqq/8/8/8/4K3 w - - 0 1";
        assert!(matches!(
            encode_fen(fen),
            Err(EncodingError::TooManyPieces(31))
        ));
    }

    #[test]
    fn test_encode_board_matches_encode_fen() {
        for fen in TEST_POSITIONS {
            let board: Board = fen.parse().unwrap();
            assert_eq!(encode_board(&board).unwrap(), encode_fen(fen).unwrap());
        }
    }

    #[test]
    fn test_dense_and_bitset_are_consistent() {
        for fen in TEST_POSITIONS {
            let features = encode_fen(fen).unwrap();
            let dense = to_dense(&features.white);
            let bits = to_bitset(&features.white);

            for (i, &f) in dense.iter().enumerate() {
                assert_eq!(f == 1.0, bits.get(i), "Mismatch at feature {} for FEN: {}", i, fen);
            }
        }
    }
}
