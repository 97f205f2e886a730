use std::{borrow::Cow, fmt::Write as _};

const COLUMN_GAP: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct Table {
    headers: Vec<String>,
    align: Vec<Align>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        Self {
            align: vec![Align::Left; headers.len()],
            headers,
            rows: Vec::new(),
        }
    }

    /// Right-aligns the given column positions.
    pub fn right_align(mut self, columns: &[usize]) -> Self {
        for &idx in columns {
            if let Some(slot) = self.align.get_mut(idx) {
                *slot = Align::Right;
            }
        }
        self
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn extend_rows(&mut self, rows: impl IntoIterator<Item = Vec<String>>) {
        self.rows.extend(rows);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let column_count = self.headers.len();
        let mut widths = self
            .headers
            .iter()
            .map(|h| display_width(h).max(3))
            .collect::<Vec<_>>();
        for row in &self.rows {
            for (idx, cell) in row.iter().enumerate().take(column_count) {
                widths[idx] = widths[idx].max(display_width(&sanitize_cell(cell)));
            }
        }

        let mut output = String::new();
        let _ = writeln!(output, "{}", self.format_row(&self.headers, &widths));
        let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        let _ = writeln!(output, "{}", rule.join(COLUMN_GAP));
        for row in &self.rows {
            let _ = writeln!(output, "{}", self.format_row(row, &widths));
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }

    fn format_row(&self, values: &[String], widths: &[usize]) -> String {
        let line = widths
            .iter()
            .enumerate()
            .map(|(idx, width)| {
                let value = values.get(idx).map(String::as_str).unwrap_or("");
                let cell = sanitize_cell(value);
                let padding = " ".repeat(width.saturating_sub(display_width(&cell)));
                match self.align[idx] {
                    Align::Left => format!("{cell}{padding}"),
                    Align::Right => format!("{padding}{cell}"),
                }
            })
            .collect::<Vec<_>>()
            .join(COLUMN_GAP);
        line.trim_end().to_string()
    }
}

/// Character count, ignoring ANSI color sequences.
fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
