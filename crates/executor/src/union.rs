//! Disjoint union of two join cursors.
//!
//! The two sides of a split full join produce disjoint row sets; the union
//! round-robins between them while both have rows, then drains the survivor.

use common::DbResult;

use crate::JoinScanner;
use crate::row::JoinRow;

pub struct UnionCursor {
    first: JoinScanner,
    second: JoinScanner,
    turn: usize,
}

impl UnionCursor {
    pub fn new(first: JoinScanner, second: JoinScanner) -> UnionCursor {
        let turn = if first.row().is_some() { 0 } else { 1 };
        UnionCursor {
            first,
            second,
            turn,
        }
    }

    pub fn row(&self) -> Option<&JoinRow> {
        match self.turn {
            0 => self.first.row(),
            _ => self.second.row(),
        }
    }

    pub fn step(&mut self) -> DbResult<()> {
        match self.turn {
            0 => {
                self.first.step()?;
            }
            _ => {
                self.second.step()?;
            }
        }
        let other = 1 - self.turn;
        let other_ready = match other {
            0 => self.first.row().is_some(),
            _ => self.second.row().is_some(),
        };
        if other_ready {
            self.turn = other;
        }
        Ok(())
    }

    /// Step the active side with a caller-supplied row instance.
    pub fn step_with(&mut self, row: crate::JoinRow) -> DbResult<()> {
        match self.turn {
            0 => {
                self.first.step_with(row)?;
            }
            _ => {
                self.second.step_with(row)?;
            }
        }
        let other = 1 - self.turn;
        let other_ready = match other {
            0 => self.first.row().is_some(),
            _ => self.second.row().is_some(),
        };
        if other_ready {
            self.turn = other;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.first.close();
        self.second.close();
    }
}
