use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::Path;

use nnue::samples::Samples;

/// FENs from a training CSV (detected by its `fen` header column) or from a
/// plain file with one FEN per line.
pub fn read_positions(path: &Path, limit: usize) -> Result<Vec<String>, Box<dyn Error>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut first = String::new();
    reader.read_line(&mut first)?;

    let is_csv = first.split(',').any(|column| column.trim() == "fen");
    let fens: Vec<String> = if is_csv {
        let rest = Cursor::new(first).chain(reader);
        Samples::read(BufReader::new(rest))?
            .iter()
            .take(limit)
            .map(|sample| sample.fen.clone())
            .collect()
    } else {
        std::iter::once(Ok(first))
            .chain(reader.lines())
            .filter_map(|line| match line {
                Ok(line) if line.trim().is_empty() => None,
                other => Some(other.map(|line| line.trim().to_string())),
            })
            .take(limit)
            .collect::<Result<_, _>>()?
    };

    if fens.is_empty() {
        return Err(format!("no positions in {}", path.display()).into());
    }
    Ok(fens)
}
