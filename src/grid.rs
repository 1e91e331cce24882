// Screen grid: a fixed rows x cols character matrix with a cursor.
//
// Invariants: every row holds exactly `cols` characters and the cursor
// always lies within bounds. All edit primitives clamp their inputs so
// the invariants survive arbitrary call sequences.

/// The visible screen of one session: printable characters only, no
/// attribute state.
#[derive(Debug, Clone)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Vec<char>>,
    cursor_row: usize,
    cursor_col: usize,
}

impl Grid {
    pub fn new(rows: usize, cols: usize) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Grid {
            rows,
            cols,
            cells: vec![vec![' '; cols]; rows],
            cursor_row: 0,
            cursor_col: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Cursor position as (row, col), 0-indexed.
    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_col)
    }

    /// Write a printable character at the cursor and advance. Passing the
    /// right edge wraps to column 0 of the next row; wrapping below the
    /// last row scrolls the grid up by one and parks the cursor there.
    pub fn put(&mut self, ch: char) {
        self.cells[self.cursor_row][self.cursor_col] = ch;
        self.cursor_col += 1;
        if self.cursor_col >= self.cols {
            self.cursor_col = 0;
            self.cursor_row += 1;
            if self.cursor_row >= self.rows {
                self.scroll_up();
                self.cursor_row = self.rows - 1;
            }
        }
    }

    /// Move down one row, scrolling on overflow. No implicit carriage
    /// return.
    pub fn line_feed(&mut self) {
        self.cursor_row += 1;
        if self.cursor_row >= self.rows {
            self.scroll_up();
            self.cursor_row = self.rows - 1;
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor_col = 0;
    }

    pub fn backspace(&mut self) {
        self.cursor_col = self.cursor_col.saturating_sub(1);
    }

    /// Advance to the next multiple-of-8 tab stop, clamped below `cols`.
    pub fn tab(&mut self) {
        self.cursor_col = (((self.cursor_col / 8) + 1) * 8).min(self.cols - 1);
    }

    pub fn move_to(&mut self, row: usize, col: usize) {
        self.cursor_row = row.min(self.rows - 1);
        self.cursor_col = col.min(self.cols - 1);
    }

    pub fn move_rel(&mut self, dr: isize, dc: isize) {
        let row = self.cursor_row as isize + dr;
        let col = self.cursor_col as isize + dc;
        self.cursor_row = row.clamp(0, self.rows as isize - 1) as usize;
        self.cursor_col = col.clamp(0, self.cols as isize - 1) as usize;
    }

    /// Erase within the cursor row. Mode 0: cursor to end; 1: start to
    /// cursor inclusive; 2 or 3: the whole row. Other modes are ignored.
    pub fn erase_line(&mut self, mode: u16) {
        let row = &mut self.cells[self.cursor_row];
        match mode {
            0 => {
                for cell in &mut row[self.cursor_col..] {
                    *cell = ' ';
                }
            }
            1 => {
                for cell in &mut row[..=self.cursor_col] {
                    *cell = ' ';
                }
            }
            2 | 3 => {
                for cell in row.iter_mut() {
                    *cell = ' ';
                }
            }
            _ => {}
        }
    }

    /// Erase across the display. Mode 0: cursor to end of screen; 1:
    /// start of screen to cursor inclusive; 2 or 3: everything. The
    /// cursor does not move.
    pub fn erase_display(&mut self, mode: u16) {
        match mode {
            0 => {
                self.erase_line(0);
                for row in &mut self.cells[self.cursor_row + 1..] {
                    for cell in row.iter_mut() {
                        *cell = ' ';
                    }
                }
            }
            1 => {
                for row in &mut self.cells[..self.cursor_row] {
                    for cell in row.iter_mut() {
                        *cell = ' ';
                    }
                }
                self.erase_line(1);
            }
            2 | 3 => {
                for row in &mut self.cells {
                    for cell in row.iter_mut() {
                        *cell = ' ';
                    }
                }
            }
            _ => {}
        }
    }

    /// Insert `n` blank characters at the cursor, shifting the rest of
    /// the row right; characters pushed past the edge are lost.
    pub fn insert_chars(&mut self, n: usize) {
        let row = &mut self.cells[self.cursor_row];
        for _ in 0..n.min(self.cols - self.cursor_col) {
            row.pop();
            row.insert(self.cursor_col, ' ');
        }
    }

    /// Delete `n` characters at the cursor, shifting the rest of the row
    /// left and padding the right end with spaces.
    pub fn delete_chars(&mut self, n: usize) {
        let row = &mut self.cells[self.cursor_row];
        for _ in 0..n.min(self.cols - self.cursor_col) {
            row.remove(self.cursor_col);
            row.push(' ');
        }
    }

    /// Change dimensions, preserving the overlapping region: rows are
    /// padded or truncated to the new width, blank rows appended or
    /// trailing rows dropped, and the cursor clamped back into range.
    pub fn resize(&mut self, new_rows: usize, new_cols: usize) {
        let new_rows = new_rows.max(1);
        let new_cols = new_cols.max(1);
        for row in &mut self.cells {
            row.resize(new_cols, ' ');
        }
        self.cells.resize(new_rows, vec![' '; new_cols]);
        self.rows = new_rows;
        self.cols = new_cols;
        self.cursor_row = self.cursor_row.min(new_rows - 1);
        self.cursor_col = self.cursor_col.min(new_cols - 1);
    }

    /// Full reset: blank cells, cursor home. Dimensions are kept.
    pub fn reset(&mut self) {
        for row in &mut self.cells {
            for cell in row.iter_mut() {
                *cell = ' ';
            }
        }
        self.cursor_row = 0;
        self.cursor_col = 0;
    }

    /// One row at full width (for the live renderer).
    pub fn line(&self, row: usize) -> String {
        self.cells.get(row).map(|r| r.iter().collect()).unwrap_or_default()
    }

    /// The whole screen as text, one line per row with trailing spaces
    /// trimmed, each terminated by a newline.
    pub fn to_text(&self) -> String {
        let mut result = String::new();
        for row in &self.cells {
            let line: String = row.iter().collect();
            result.push_str(line.trim_end());
            result.push('\n');
        }
        result
    }

    fn scroll_up(&mut self) {
        self.cells.remove(0);
        self.cells.push(vec![' '; self.cols]);
    }
}
