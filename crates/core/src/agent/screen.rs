//! Rendered screen snapshots.
//!
//! The emulated screen is published in two encodings: a plain array of row
//! strings, and an ANSI SGR stream that reproduces colors and attributes.
//! Feeding the ANSI stream into a fresh emulator of the same size yields the
//! same grid, so clients can prime any terminal widget with one frame.

use serde::{Deserialize, Serialize};
use vt100::Color;

/// One consistent rendering of the terminal grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenUpdate {
  pub project_id: String,
  /// One string per row, trailing default-colored spaces trimmed.
  pub lines: Vec<String>,
  pub cursor_row: u16,
  pub cursor_col: u16,
  pub rows: u16,
  pub cols: u16,
  /// ANSI-colored encoding of the same grid.
  pub ansi_content: String,
}

/// Snapshot the current screen of a vt100 parser.
pub fn snapshot(project_id: &str, parser: &vt100::Parser) -> ScreenUpdate {
  let screen = parser.screen();
  let (rows, cols) = screen.size();
  let (cursor_row, cursor_col) = screen.cursor_position();

  let mut lines = Vec::with_capacity(rows as usize);
  for row in 0..rows {
    let mut line = String::with_capacity(cols as usize);
    for col in 0..cols {
      match screen.cell(row, col) {
        Some(cell) if cell.has_contents() => line.push_str(&cell.contents()),
        _ => line.push(' '),
      }
    }
    while line.ends_with(' ') {
      line.pop();
    }
    lines.push(line);
  }

  ScreenUpdate {
    project_id: project_id.to_string(),
    lines,
    cursor_row,
    cursor_col,
    rows,
    cols,
    ansi_content: render_ansi(screen),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sgr {
  fg: Color,
  bg: Color,
  bold: bool,
  italic: bool,
  underline: bool,
  inverse: bool,
}

impl Sgr {
  fn default_attrs() -> Self {
    Self {
      fg: Color::Default,
      bg: Color::Default,
      bold: false,
      italic: false,
      underline: false,
      inverse: false,
    }
  }

  fn of_cell(cell: &vt100::Cell) -> Self {
    Self {
      fg: cell.fgcolor(),
      bg: cell.bgcolor(),
      bold: cell.bold(),
      italic: cell.italic(),
      underline: cell.underline(),
      inverse: cell.inverse(),
    }
  }

  fn is_default(&self) -> bool {
    *self == Self::default_attrs()
  }
}

/// Render the grid as rows of SGR-colored text separated by CR-LF.
///
/// Each attribute change emits a full `ESC[0;...m` reset-and-set so the
/// stream never depends on state older than the previous cell.
fn render_ansi(screen: &vt100::Screen) -> String {
  let (rows, cols) = screen.size();
  let mut out = String::with_capacity(rows as usize * cols as usize * 3);

  for row in 0..rows {
    if row > 0 {
      // CR-LF so re-feeding the stream restarts every row at column zero.
      out.push_str("\r\n");
    }

    // Last column that is not a default-colored blank; everything after is
    // trimmed to avoid overflowing embedded viewports.
    let mut last_col: i32 = cols as i32 - 1;
    while last_col >= 0 {
      match screen.cell(row, last_col as u16) {
        Some(cell) => {
          let blank = !cell.has_contents() || cell.contents() == " ";
          if !blank || !Sgr::of_cell(cell).is_default() {
            break;
          }
        }
        None => {}
      }
      last_col -= 1;
    }

    let mut current = Sgr::default_attrs();
    let mut in_sgr = false;
    for col in 0..=last_col {
      let cell = screen.cell(row, col as u16);
      let attrs = cell.map(Sgr::of_cell).unwrap_or_else(Sgr::default_attrs);

      if attrs != current {
        out.push_str("\x1b[0");
        if attrs.bold {
          out.push_str(";1");
        }
        if attrs.italic {
          out.push_str(";3");
        }
        if attrs.underline {
          out.push_str(";4");
        }
        if attrs.inverse {
          out.push_str(";7");
        }
        push_sgr_color(&mut out, attrs.fg, true);
        push_sgr_color(&mut out, attrs.bg, false);
        out.push('m');
        in_sgr = true;
        current = attrs;
      }

      match cell {
        Some(c) if c.has_contents() => out.push_str(&c.contents()),
        _ => out.push(' '),
      }
    }

    if in_sgr {
      out.push_str("\x1b[0m");
    }
  }

  out
}

/// Append the SGR parameter for one color: 8/16-color codes, the 256-color
/// palette, or 24-bit RGB.
fn push_sgr_color(out: &mut String, color: Color, is_fg: bool) {
  match color {
    Color::Default => {}
    Color::Idx(idx) => {
      if idx < 8 {
        let base = if is_fg { 30 } else { 40 };
        out.push_str(&format!(";{}", base + idx as u16));
      } else if idx < 16 {
        let base = if is_fg { 90 } else { 100 };
        out.push_str(&format!(";{}", base + (idx - 8) as u16));
      } else if is_fg {
        out.push_str(&format!(";38;5;{idx}"));
      } else {
        out.push_str(&format!(";48;5;{idx}"));
      }
    }
    Color::Rgb(r, g, b) => {
      if is_fg {
        out.push_str(&format!(";38;2;{r};{g};{b}"));
      } else {
        out.push_str(&format!(";48;2;{r};{g};{b}"));
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parser_with(rows: u16, cols: u16, input: &[u8]) -> vt100::Parser {
    let mut parser = vt100::Parser::new(rows, cols, 0);
    parser.process(input);
    parser
  }

  fn grid(parser: &vt100::Parser) -> Vec<String> {
    snapshot("p", parser).lines
  }

  /// The observable-screen invariant: re-feeding the ANSI stream into a fresh
  /// emulator of the same size reproduces the grid, colors included.
  fn assert_round_trip(rows: u16, cols: u16, input: &[u8]) {
    let original = parser_with(rows, cols, input);
    let ansi = snapshot("p", &original).ansi_content;
    let replayed = parser_with(rows, cols, ansi.as_bytes());

    let (orig_screen, replay_screen) = (original.screen(), replayed.screen());
    for row in 0..rows {
      for col in 0..cols {
        let a = orig_screen.cell(row, col);
        let b = replay_screen.cell(row, col);
        let (a_text, b_text) = (
          a.map(|c| c.contents()).unwrap_or_default(),
          b.map(|c| c.contents()).unwrap_or_default(),
        );
        let a_text = if a_text.is_empty() { " ".to_string() } else { a_text };
        let b_text = if b_text.is_empty() { " ".to_string() } else { b_text };
        assert_eq!(a_text, b_text, "text mismatch at ({row},{col})");
        let a_sgr = a.map(Sgr::of_cell).unwrap_or_else(Sgr::default_attrs);
        let b_sgr = b.map(Sgr::of_cell).unwrap_or_else(Sgr::default_attrs);
        assert_eq!(a_sgr, b_sgr, "attr mismatch at ({row},{col})");
      }
    }
  }

  #[test]
  fn snapshot_reports_plain_lines_and_cursor() {
    let parser = parser_with(4, 20, b"hello\r\nworld");
    let snap = snapshot("proj", &parser);
    assert_eq!(snap.lines[0], "hello");
    assert_eq!(snap.lines[1], "world");
    assert_eq!(snap.lines[2], "");
    assert_eq!((snap.cursor_row, snap.cursor_col), (1, 5));
    assert_eq!((snap.rows, snap.cols), (4, 20));
  }

  #[test]
  fn trailing_default_spaces_are_trimmed() {
    let parser = parser_with(2, 10, b"ab   ");
    let snap = snapshot("p", &parser);
    assert_eq!(snap.lines[0], "ab");
    assert!(!snap.ansi_content.ends_with(' '), "ansi rows are trimmed too");
  }

  #[test]
  fn colored_trailing_spaces_survive_trimming() {
    // A red-background blank is visible content, not trailing padding.
    let parser = parser_with(1, 10, b"x\x1b[41m \x1b[0m");
    let ansi = snapshot("p", &parser).ansi_content;
    assert!(ansi.contains(";41"), "background color must be encoded: {ansi:?}");
  }

  #[test]
  fn round_trip_plain_text() {
    assert_round_trip(4, 20, b"hello\r\nworld\r\n$ ");
  }

  #[test]
  fn round_trip_16_color_and_attributes() {
    assert_round_trip(3, 24, b"\x1b[1;31mred bold\x1b[0m\r\n\x1b[4;92mbright\x1b[0m ok");
  }

  #[test]
  fn round_trip_256_and_rgb_colors() {
    assert_round_trip(2, 30, b"\x1b[38;5;141mpalette\x1b[0m \x1b[48;2;10;20;30mrgb\x1b[0m");
  }

  #[test]
  fn round_trip_reverse_and_italic() {
    assert_round_trip(2, 20, b"\x1b[7mreverse\x1b[0m \x1b[3mitalic\x1b[0m");
  }

  #[test]
  fn round_trip_cursor_positioning() {
    // Text drawn out of order via cursor moves still round-trips as a grid.
    assert_round_trip(5, 20, b"\x1b[3;5Hmiddle\x1b[1;1Htop");
  }
}
