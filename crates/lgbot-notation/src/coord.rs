//! サーバー表記と GTP エンジン表記の座標変換
//!
//! LittleGolem の棋譜/着手 URL で使われる座標と、Hex 系 GTP エンジンが受け付ける
//! 座標は盤の種類ごとに異なる。
//!
//! - [`BoardFamily::Square`]: 菱形の Hex 盤。サーバーは `fj` のように列・行とも英字、
//!   エンジンは `f10` のように行を数字で表す (`a` = 1)。
//! - [`BoardFamily::Hexagonal`]: 一辺 `size` の六角盤 (列数 `2*size-1`)。サーバーは
//!   `f10` 形式だが、盤の右半分 (列 > size) では行番号が `列 - size` だけずれる。
//!
//! swap (パイルール) 成立後は、サーバー側の座標を列と行の入れ替えで鏡映してから
//! エンジンへ渡し、エンジンの応手も同じ鏡映でサーバーへ戻す。

use std::fmt;

use serde::Deserialize;

use crate::error::CoordError;

/// 列を英字1文字で表すので、盤の一辺は 26 が上限
pub const MAX_BOARD_SIZE: u32 = 26;

/// 手番
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    /// 先手 (HGF の `B`)
    First,
    /// 後手 (HGF の `W`)
    Second,
}

impl Color {
    pub fn from_record_tag(tag: char) -> Option<Self> {
        match tag {
            'B' | 'b' => Some(Color::First),
            'W' | 'w' => Some(Color::Second),
            _ => None,
        }
    }

    /// `ply` 手目 (0 始まり) を指す側。先手から交互。
    pub fn for_ply(ply: usize) -> Self {
        if ply % 2 == 0 { Color::First } else { Color::Second }
    }

    /// GTP の色指定 (`b` / `w`)
    pub fn gtp(self) -> &'static str {
        match self {
            Color::First => "b",
            Color::Second => "w",
        }
    }
}

/// 1手分のトークン
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MoveToken {
    /// 盤上の1マス (表記は文脈依存: 棋譜ならサーバー表記)
    Cell(String),
    Swap,
    Resign,
}

impl MoveToken {
    /// サーバー側のトークン文字列を解釈する。大文字小文字は区別しない。
    pub fn parse(raw: &str) -> Self {
        let token = raw.trim().to_ascii_lowercase();
        match token.as_str() {
            "swap" => MoveToken::Swap,
            "resign" => MoveToken::Resign,
            _ => MoveToken::Cell(token),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MoveToken::Cell(cell) => cell,
            MoveToken::Swap => "swap",
            MoveToken::Resign => "resign",
        }
    }
}

impl fmt::Display for MoveToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 色付きの1手
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub color: Color,
    pub token: MoveToken,
}

impl Move {
    pub fn new(color: Color, token: &str) -> Self {
        Self {
            color,
            token: MoveToken::parse(token),
        }
    }
}

/// 座標系の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardFamily {
    #[default]
    Square,
    Hexagonal,
}

impl BoardFamily {
    /// サーバー表記 -> エンジン表記 (鏡映はしない)
    pub fn to_engine_cell(self, server: &str, size: u32) -> Result<String, CoordError> {
        match self {
            BoardFamily::Square => {
                let (col, row) = parse_letter_pair(server)?;
                check_square(server, col, row, size)?;
                Ok(format!("{}{}", letter(server, col, size)?, row))
            }
            BoardFamily::Hexagonal => {
                let (col, row) = parse_letter_number(server)?;
                check_hexagonal(server, col, row, size)?;
                Ok(format!("{}{}", letter(server, col, size)?, row + hex_shift(col, size)))
            }
        }
    }

    /// エンジン表記 -> サーバー表記 (鏡映はしない)
    pub fn from_engine_cell(self, engine: &str, size: u32) -> Result<String, CoordError> {
        let (col, engine_row) = parse_letter_number(engine)?;
        match self {
            BoardFamily::Square => {
                check_square(engine, col, engine_row, size)?;
                Ok(format!("{}{}", letter(engine, col, size)?, letter(engine, engine_row, size)?))
            }
            BoardFamily::Hexagonal => {
                let row = engine_row.checked_sub(hex_shift(col, size)).ok_or_else(|| {
                    CoordError::OutOfRange {
                        coord: engine.to_string(),
                        size,
                    }
                })?;
                check_hexagonal(engine, col, row, size)?;
                Ok(format!("{}{}", letter(engine, col, size)?, row))
            }
        }
    }

    /// サーバー表記のまま列と行を入れ替える。2回適用すると元に戻る。
    pub fn mirror(self, server: &str, size: u32) -> Result<String, CoordError> {
        match self {
            BoardFamily::Square => {
                let (col, row) = parse_letter_pair(server)?;
                check_square(server, col, row, size)?;
                Ok(format!("{}{}", letter(server, row, size)?, letter(server, col, size)?))
            }
            BoardFamily::Hexagonal => {
                let (col, row) = parse_letter_number(server)?;
                check_hexagonal(server, col, row, size)?;
                Ok(format!("{}{}", letter(server, row, size)?, col))
            }
        }
    }
}

/// 1局分の変換器。`swap_applied` はこの値が生きている間だけ有効。
#[derive(Debug, Clone)]
pub struct CoordinateTranslator {
    family: BoardFamily,
    size: u32,
    swap_applied: bool,
}

impl CoordinateTranslator {
    pub fn new(family: BoardFamily, size: u32) -> Self {
        Self {
            family,
            size,
            swap_applied: false,
        }
    }

    pub fn swap_applied(&self) -> bool {
        self.swap_applied
    }

    pub fn reset(&mut self) {
        self.swap_applied = false;
    }

    /// 棋譜の手順をエンジン表記の手順に変換する。
    ///
    /// swap は初手 (サーバーの棋譜では 2 手目) にだけ現れ得る。swap を取り除いたうえで
    /// 2 手目以降を鏡映する。
    pub fn to_engine(&mut self, moves: &[Move]) -> Result<Vec<String>, CoordError> {
        self.swap_applied = false;
        let mut cells: Vec<&str> = Vec::with_capacity(moves.len());
        for (index, mv) in moves.iter().enumerate() {
            match &mv.token {
                MoveToken::Swap if index <= 1 && !self.swap_applied => self.swap_applied = true,
                MoveToken::Swap => return Err(CoordError::MisplacedSwap { index }),
                MoveToken::Resign => return Err(CoordError::UnexpectedToken("resign".into())),
                MoveToken::Cell(cell) => cells.push(cell),
            }
        }

        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                if self.swap_applied && i >= 1 {
                    let mirrored = self.family.mirror(cell, self.size)?;
                    self.family.to_engine_cell(&mirrored, self.size)
                } else {
                    self.family.to_engine_cell(cell, self.size)
                }
            })
            .collect()
    }

    /// エンジンの応手をサーバー表記に戻す。
    pub fn from_engine(&self, engine: &str) -> Result<MoveToken, CoordError> {
        let token = engine.trim().to_ascii_lowercase();
        match token.as_str() {
            "swap" | "swap-pieces" => return Ok(MoveToken::Swap),
            "resign" => return Ok(MoveToken::Resign),
            _ => {}
        }
        let cell = self.family.from_engine_cell(&token, self.size)?;
        if self.swap_applied {
            Ok(MoveToken::Cell(self.family.mirror(&cell, self.size)?))
        } else {
            Ok(MoveToken::Cell(cell))
        }
    }
}

fn hex_shift(col: u32, size: u32) -> u32 {
    col.saturating_sub(size)
}

fn check_square(coord: &str, col: u32, row: u32, size: u32) -> Result<(), CoordError> {
    if (1..=size).contains(&col) && (1..=size).contains(&row) {
        Ok(())
    } else {
        Err(CoordError::OutOfRange {
            coord: coord.to_string(),
            size,
        })
    }
}

fn check_hexagonal(coord: &str, col: u32, row: u32, size: u32) -> Result<(), CoordError> {
    let span = size.saturating_mul(2).saturating_sub(1);
    if (1..=span).contains(&col) && (1..=span).contains(&row) {
        Ok(())
    } else {
        Err(CoordError::OutOfRange {
            coord: coord.to_string(),
            size,
        })
    }
}

fn letter(coord: &str, index: u32, size: u32) -> Result<char, CoordError> {
    if (1..=MAX_BOARD_SIZE).contains(&index) {
        Ok(char::from(b'a' + (index - 1) as u8))
    } else {
        Err(CoordError::OutOfRange {
            coord: coord.to_string(),
            size,
        })
    }
}

fn letter_index(c: char) -> Option<u32> {
    let c = c.to_ascii_lowercase();
    c.is_ascii_lowercase().then(|| c as u32 - 'a' as u32 + 1)
}

/// `fj` -> (6, 10)
fn parse_letter_pair(coord: &str) -> Result<(u32, u32), CoordError> {
    let mut chars = coord.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(c), Some(r), None) => letter_index(c)
            .zip(letter_index(r))
            .ok_or_else(|| CoordError::Malformed(coord.to_string())),
        _ => Err(CoordError::Malformed(coord.to_string())),
    }
}

/// `f10` -> (6, 10)
fn parse_letter_number(coord: &str) -> Result<(u32, u32), CoordError> {
    let malformed = || CoordError::Malformed(coord.to_string());
    let mut chars = coord.chars();
    let col = chars.next().and_then(letter_index).ok_or_else(malformed)?;
    let digits = chars.as_str();
    if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let row = digits.parse::<u32>().map_err(|_| malformed())?;
    Ok((col, row))
}
