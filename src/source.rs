use lsp_types::{Position, Range};

/// Source text plus the bookkeeping needed to turn byte offsets into
/// line/column positions and to render diagnostic underlines.
pub struct SourceFile {
  name: Option<String>,
  text: String,
  line_offsets: Vec<usize>,
}

impl SourceFile {
  pub fn new(text: impl Into<String>, name: Option<String>) -> Self {
    let text = text.into();

    let mut line_offsets = vec![0];
    for (i, b) in text.bytes().enumerate() {
      if b == b'\n' {
        line_offsets.push(i + 1);
      }
    }

    SourceFile {
      name,
      text,
      line_offsets,
    }
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  /// Converts a byte offset into a zero-based line/column position.
  pub fn position(&self, offset: usize) -> Position {
    let line = self.line_offsets.partition_point(|&start| start <= offset) - 1;
    Position::new(line as u32, (offset - self.line_offsets[line]) as u32)
  }

  pub fn range(&self, start: usize, end: usize) -> Range {
    Range::new(self.position(start), self.position(end))
  }

  /// The text of a zero-based line, without its trailing newline.
  pub fn line(&self, line: u32) -> &str {
    let line = line as usize;
    if line >= self.line_offsets.len() {
      return "";
    }
    let start = self.line_offsets[line];
    let end = self
      .line_offsets
      .get(line + 1)
      .map(|&next| next - 1)
      .unwrap_or(self.text.len());
    &self.text[start..end.max(start)]
  }

  /// Renders the source lines covered by `range` with a `~~~` underline
  /// beneath the covered columns.
  pub fn squiggly(&self, range: Range, indent: &str) -> String {
    let mut out = Vec::new();
    for linenum in range.start.line..=range.end.line {
      let line = self.line(linenum);
      let col1 = if linenum == range.start.line {
        range.start.character as usize
      } else {
        0
      };
      let col2 = if linenum == range.end.line {
        range.end.character as usize
      } else {
        line.len()
      };

      out.push(format!("{}{}", indent, line.trim_end()));
      out.push(format!(
        "{}{}{}",
        indent,
        " ".repeat(col1),
        "~".repeat(col2.max(col1 + 1) - col1)
      ));
    }
    out.join("\n")
  }
}

fn pos_min(a: Position, b: Position) -> Position {
  if (b.line, b.character) < (a.line, a.character) {
    b
  } else {
    a
  }
}

fn pos_max(a: Position, b: Position) -> Position {
  if (b.line, b.character) > (a.line, a.character) {
    b
  } else {
    a
  }
}

/// The smallest range covering both inputs.
pub fn union_of(a: Range, b: Range) -> Range {
  Range::new(pos_min(a.start, b.start), pos_max(a.end, b.end))
}
