use std::str::FromStr;

use cozy_chess::{Board, Color, File, Piece, Rank, Square};

use crate::error::EncodingError;

/// Immutable board snapshot holding only what feature encoding needs:
/// piece placement and side to move.
///
/// Unlike `cozy_chess::Board` this accepts positions with a wrong number of
/// kings, so that the encoder can reject them with a precise error.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Position {
    squares: [Option<(Color, Piece)>; Square::NUM],
    side_to_move: Color,
}

impl Position {
    /// Parses the placement and side-to-move fields of a FEN string.
    /// Castling, en passant and move counters are accepted but ignored.
    pub fn from_fen(fen: &str) -> Result<Self, EncodingError> {
        let mut fields = fen.split_whitespace();
        let placement = fields
            .next()
            .ok_or_else(|| EncodingError::fen(fen, "empty string"))?;
        let side = fields
            .next()
            .ok_or_else(|| EncodingError::fen(fen, "missing side to move"))?;

        let side_to_move = match side {
            "w" => Color::White,
            "b" => Color::Black,
            other => {
                return Err(EncodingError::fen(
                    fen,
                    format!("bad side to move '{}'", other),
                ))
            }
        };

        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != Rank::NUM {
            return Err(EncodingError::fen(
                fen,
                format!("expected 8 ranks, found {}", ranks.len()),
            ));
        }

        let mut squares = [None; Square::NUM];

        // FEN lists rank 8 first
        for (row, rank_str) in ranks.iter().enumerate() {
            let rank = Rank::index(Rank::NUM - 1 - row);
            let mut file = 0usize;

            for c in rank_str.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file += skip as usize;
                    continue;
                }

                let (color, piece) = piece_from_char(c)
                    .ok_or_else(|| EncodingError::fen(fen, format!("bad piece '{}'", c)))?;
                if file >= File::NUM {
                    return Err(EncodingError::fen(fen, "rank overflows 8 files"));
                }
                squares[Square::new(File::index(file), rank) as usize] = Some((color, piece));
                file += 1;
            }

            if file != File::NUM {
                return Err(EncodingError::fen(
                    fen,
                    format!("rank {} covers {} files", rank_str, file),
                ));
            }
        }

        Ok(Self {
            squares,
            side_to_move,
        })
    }

    pub fn from_board(board: &Board) -> Self {
        let mut squares = [None; Square::NUM];
        for color in Color::ALL {
            for piece in Piece::ALL {
                for sq in board.colored_pieces(color, piece) {
                    squares[sq as usize] = Some((color, piece));
                }
            }
        }

        Self {
            squares,
            side_to_move: board.side_to_move(),
        }
    }

    #[inline(always)]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    /// Occupied squares in A1..H8 order.
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Color, Piece)> + '_ {
        self.squares
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.map(|(color, piece)| (Square::index(idx), color, piece)))
    }

    pub fn king_squares(&self, color: Color) -> impl Iterator<Item = Square> + '_ {
        self.pieces()
            .filter(move |&(_, c, p)| c == color && p == Piece::King)
            .map(|(sq, _, _)| sq)
    }

    /// The same position seen from the other side: colors swapped, ranks
    /// mirrored and the side to move flipped.
    pub fn flipped(&self) -> Self {
        let mut squares = [None; Square::NUM];
        for (sq, color, piece) in self.pieces() {
            squares[sq.flip_rank() as usize] = Some((!color, piece));
        }

        Self {
            squares,
            side_to_move: !self.side_to_move,
        }
    }
}

impl FromStr for Position {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_fen(s)
    }
}

impl From<&Board> for Position {
    fn from(board: &Board) -> Self {
        Self::from_board(board)
    }
}

fn piece_from_char(c: char) -> Option<(Color, Piece)> {
    let color = if c.is_ascii_uppercase() {
        Color::White
    } else {
        Color::Black
    };

    let piece = match c.to_ascii_lowercase() {
        'p' => Piece::Pawn,
        'n' => Piece::Knight,
        'b' => Piece::Bishop,
        'r' => Piece::Rook,
        'q' => Piece::Queen,
        'k' => Piece::King,
        _ => return None,
    };

    Some((color, piece))
}

#[cfg(test)]
mod tests {
    use super::*;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn piece_on(pos: &Position, sq: Square) -> Option<(Color, Piece)> {
        pos.pieces()
            .find(|&(s, _, _)| s == sq)
            .map(|(_, color, piece)| (color, piece))
    }

    #[test]
    fn test_parses_start_position() {
        let pos = Position::from_fen(START_FEN).unwrap();

        assert_eq!(pos.side_to_move(), Color::White);
        assert_eq!(pos.pieces().count(), 32);
        assert_eq!(piece_on(&pos, Square::E1), Some((Color::White, Piece::King)));
        assert_eq!(piece_on(&pos, Square::D8), Some((Color::Black, Piece::Queen)));
        assert_eq!(piece_on(&pos, Square::E4), None);
    }

    #[test]
    fn test_matches_cozy_chess_board() {
        let fen = "r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4";
        let board: Board = fen.parse().unwrap();

        assert_eq!(Position::from_board(&board), Position::from_fen(fen).unwrap());
    }

    #[test]
    fn test_accepts_wrong_king_counts() {
        // Rejected later by the encoder, not by the parser
        assert!(Position::from_fen("8/8/8/8/8/8/8/8 w - - 0 1").is_ok());
        assert!(Position::from_fen("kk6/8/8/8/8/8/8/K7 b - - 0 1").is_ok());
    }

    #[test]
    fn test_rejects_malformed_fen() {
        for fen in [
            "",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP w",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR x",
            "rnbqkbnr/pppppppp/9/8/8/8/PPPPPPPP/RNBQKBNR w",
            "rnbqkbnr/ppppxppp/8/8/8/8/PPPPPPPP/RNBQKBNR w",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR",
        ] {
            assert!(Position::from_fen(fen).is_err(), "accepted '{}'", fen);
        }
    }

    #[test]
    fn test_flipped_twice_is_identity() {
        let pos = Position::from_fen("8/8/3k4/8/2P5/8/4K3/7R b - - 0 1").unwrap();
        let flipped = pos.flipped();

        assert_eq!(flipped.side_to_move(), Color::White);
        assert_eq!(piece_on(&flipped, Square::C5), Some((Color::Black, Piece::Pawn)));
        assert_eq!(piece_on(&flipped, Square::H8), Some((Color::Black, Piece::Rook)));
        assert_eq!(flipped.flipped(), pos);
    }
}
