// ANSI interpreter: parses the child's byte stream and drives a Grid.
//
// The vte parser carries the Ground/Escape/CSI/OSC state machine,
// including the buffering needed when an escape sequence is split
// across read chunks; this module only supplies the dispatch. The grid
// is attribute-free, so SGR, scroll regions, and mode changes are
// dropped on the floor. Ill-formed or unknown sequences must never
// derail the output that follows them.

use vte::{Params, Perform};

use crate::grid::Grid;

/// Stateful interpreter for one session's output stream.
pub struct Interpreter {
    parser: vte::Parser,
    last_char: char,
}

impl Interpreter {
    pub fn new() -> Self {
        Interpreter {
            parser: vte::Parser::new(),
            last_char: ' ',
        }
    }

    /// Apply a chunk of child output to the grid. Bytes are consumed in
    /// order; a sequence truncated at the end of the chunk is resumed by
    /// the next call.
    pub fn feed(&mut self, grid: &mut Grid, bytes: &[u8]) {
        let mut dispatch = Dispatch {
            grid,
            last_char: &mut self.last_char,
        };
        for &byte in bytes {
            self.parser.advance(&mut dispatch, byte);
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

struct Dispatch<'a> {
    grid: &'a mut Grid,
    last_char: &'a mut char,
}

/// Numeric parameter at `idx`, with missing or empty values replaced by
/// `default`.
fn param_or(params: &Params, idx: usize, default: u16) -> u16 {
    params
        .iter()
        .nth(idx)
        .and_then(|p| p.first())
        .copied()
        .filter(|&v| v != 0)
        .unwrap_or(default)
}

/// Mode-style parameter at `idx`: zero is meaningful here.
fn mode_or(params: &Params, idx: usize, default: u16) -> u16 {
    params
        .iter()
        .nth(idx)
        .and_then(|p| p.first())
        .copied()
        .unwrap_or(default)
}

impl Perform for Dispatch<'_> {
    fn print(&mut self, c: char) {
        *self.last_char = c;
        self.grid.put(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.grid.line_feed(),
            b'\r' => self.grid.carriage_return(),
            b'\x08' => self.grid.backspace(),
            b'\t' => self.grid.tab(),
            // BEL and the rest of C0 are ignored.
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        match action {
            'H' | 'f' => {
                let row = param_or(params, 0, 1).saturating_sub(1) as usize;
                let col = param_or(params, 1, 1).saturating_sub(1) as usize;
                self.grid.move_to(row, col);
            }
            'A' => self.grid.move_rel(-(param_or(params, 0, 1) as isize), 0),
            'B' => self.grid.move_rel(param_or(params, 0, 1) as isize, 0),
            'C' => self.grid.move_rel(0, param_or(params, 0, 1) as isize),
            'D' => self.grid.move_rel(0, -(param_or(params, 0, 1) as isize)),
            'G' => {
                let col = param_or(params, 0, 1).saturating_sub(1) as usize;
                let (row, _) = self.grid.cursor();
                self.grid.move_to(row, col);
            }
            'd' => {
                let row = param_or(params, 0, 1).saturating_sub(1) as usize;
                let (_, col) = self.grid.cursor();
                self.grid.move_to(row, col);
            }
            'J' => self.grid.erase_display(mode_or(params, 0, 0)),
            'K' => self.grid.erase_line(mode_or(params, 0, 0)),
            '@' => self.grid.insert_chars(param_or(params, 0, 1) as usize),
            'P' => self.grid.delete_chars(param_or(params, 0, 1) as usize),
            'b' => {
                // Repeat the last printed character.
                let c = *self.last_char;
                for _ in 0..param_or(params, 0, 1) {
                    self.grid.put(c);
                }
            }
            // SGR, scroll regions, and mode set/reset carry no meaning
            // on an attribute-free grid. Unknown finals fall here too.
            'm' | 'r' | 'h' | 'l' => {}
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        // Charset designators (ESC ( x, ESC ) x) arrive with the paren as
        // an intermediate; skipping them is all the support we offer.
        if !intermediates.is_empty() {
            return;
        }
        match byte {
            b'c' => self.grid.reset(),
            // Save/restore cursor: no state kept.
            b'7' | b'8' => {}
            _ => {}
        }
    }

    // OSC sequences are consumed by the parser and discarded here.
    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}
    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}
    fn put(&mut self, _byte: u8) {}
    fn unhook(&mut self) {}
}
